//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub provider: PaymentProviderConfig,
    pub security: SecurityConfig,
    pub limits: LimitsConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment-link provider configuration
#[derive(Debug, Clone)]
pub struct PaymentProviderConfig {
    pub base_url: String,
    pub api_key: String,
    /// HMAC secret for inbound webhooks. When unset, webhook signature
    /// verification is skipped (development mode).
    pub webhook_secret: Option<String>,
    pub request_timeout: u64, // seconds
    pub max_retries: u32,
}

/// PIN gate and webhook authentication settings
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub pin_max_attempts: u32,
    /// Accepted clock skew for signed webhook timestamps
    pub webhook_timestamp_tolerance_secs: i64,
}

/// Limits and cache tuning
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Minimum USD-converted amount accepted at transaction creation
    pub min_transaction_usd: Decimal,
    /// Orders expire this many minutes after creation; deposits never expire
    pub order_expiry_minutes: i64,
    pub currency_cache_ttl_secs: u64,
    pub currency_cache_capacity: usize,
    pub idempotency_ttl_secs: u64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    /// Interval of the background sweep that evicts expired cache entries
    pub cache_sweep_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            provider: PaymentProviderConfig::from_env()?,
            security: SecurityConfig::from_env()?,
            limits: LimitsConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.provider.validate()?;
        self.security.validate()?;
        self.limits.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .parse()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl PaymentProviderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaymentProviderConfig {
            base_url: env::var("PAYMENT_PROVIDER_URL")
                .unwrap_or_else(|_| "https://api.paylink.example.com".to_string()),
            api_key: env::var("PAYMENT_PROVIDER_API_KEY")
                .map_err(|_| ConfigError::MissingVariable("PAYMENT_PROVIDER_API_KEY".to_string()))?,
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            request_timeout: env::var("PAYMENT_PROVIDER_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_PROVIDER_TIMEOUT".to_string()))?,
            max_retries: env::var("PAYMENT_PROVIDER_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("PAYMENT_PROVIDER_MAX_RETRIES".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_PROVIDER_URL must be a valid URL".to_string(),
            ));
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_PROVIDER_API_KEY cannot be empty".to_string(),
            ));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_PROVIDER_TIMEOUT".to_string(),
            ));
        }

        Ok(())
    }
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SecurityConfig {
            pin_max_attempts: env::var("PIN_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PIN_MAX_ATTEMPTS".to_string()))?,
            webhook_timestamp_tolerance_secs: env::var("WEBHOOK_TIMESTAMP_TOLERANCE")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBHOOK_TIMESTAMP_TOLERANCE".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pin_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("PIN_MAX_ATTEMPTS".to_string()));
        }
        if self.webhook_timestamp_tolerance_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_TIMESTAMP_TOLERANCE must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl LimitsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LimitsConfig {
            min_transaction_usd: env::var("MIN_TRANSACTION_USD")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<Decimal>()
                .map_err(|_| ConfigError::InvalidValue("MIN_TRANSACTION_USD".to_string()))?,
            order_expiry_minutes: env::var("ORDER_EXPIRY_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ORDER_EXPIRY_MINUTES".to_string()))?,
            currency_cache_ttl_secs: env::var("CURRENCY_CACHE_TTL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CURRENCY_CACHE_TTL".to_string()))?,
            currency_cache_capacity: env::var("CURRENCY_CACHE_CAPACITY")
                .unwrap_or_else(|_| "128".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CURRENCY_CACHE_CAPACITY".to_string()))?,
            idempotency_ttl_secs: env::var("IDEMPOTENCY_TTL")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("IDEMPOTENCY_TTL".to_string()))?,
            rate_limit_max_requests: env::var("RATE_LIMIT_MAX_REQUESTS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_MAX_REQUESTS".to_string()))?,
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_WINDOW".to_string()))?,
            cache_sweep_interval_secs: env::var("CACHE_SWEEP_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_SWEEP_INTERVAL".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_transaction_usd <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue(
                "MIN_TRANSACTION_USD must be positive".to_string(),
            ));
        }
        if self.order_expiry_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "ORDER_EXPIRY_MINUTES must be positive".to_string(),
            ));
        }
        if self.rate_limit_max_requests == 0 || self.rate_limit_window_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "rate limit window and max requests must be non-zero".to_string(),
            ));
        }
        if self.currency_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "CURRENCY_CACHE_CAPACITY must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(LogFormat::Json),
            "plain" => Ok(LogFormat::Plain),
            other => Err(ConfigError::InvalidValue(format!(
                "LOG_FORMAT '{}' is not supported",
                other
            ))),
        }
    }
}
