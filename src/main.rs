use anyhow::Context;
use axum::http::HeaderName;
use merchpay_backend::api::{self, AppState};
use merchpay_backend::cache::currency::CurrencyRateCache;
use merchpay_backend::cache::idempotency::IdempotencyCache;
use merchpay_backend::cache::rate_limit::RateLimiter;
use merchpay_backend::config::AppConfig;
use merchpay_backend::database::{self, audit_repository::AuditRepository};
use merchpay_backend::database::currency_repository::CurrencyRepository;
use merchpay_backend::database::merchant_repository::MerchantRepository;
use merchpay_backend::database::token_repository::TokenRepository;
use merchpay_backend::database::transaction_repository::TransactionRepository;
use merchpay_backend::logging;
use merchpay_backend::payments::custody::HttpSigningProvider;
use merchpay_backend::payments::provider::HttpPaymentLinkProvider;
use merchpay_backend::services::notification::{LogNotifier, NotificationEvent, Notifier};
use merchpay_backend::services::pin_gate::PinGate;
use merchpay_backend::services::status_reconciler::StatusReconciler;
use merchpay_backend::services::transaction_factory::TransactionFactory;
use merchpay_backend::services::transfer::TransferService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    logging::init_tracing(&config.logging);

    info!(
        host = %config.server.host,
        port = config.server.port,
        "starting merchpay backend"
    );

    let pool = database::init_pool_from_config(&config.database)
        .await
        .context("failed to initialize database pool")?;

    let merchants = Arc::new(MerchantRepository::new(pool.clone()));
    let transactions: Arc<TransactionRepository> =
        Arc::new(TransactionRepository::new(pool.clone()));
    let tokens = Arc::new(TokenRepository::new(pool.clone()));
    let currencies = Arc::new(CurrencyRepository::new(pool.clone()));
    let audit = Arc::new(AuditRepository::new(pool.clone()));

    let rates = Arc::new(CurrencyRateCache::new(
        currencies,
        Duration::from_secs(config.limits.currency_cache_ttl_secs),
        config.limits.currency_cache_capacity,
    ));
    let idempotency = Arc::new(IdempotencyCache::new(Duration::from_secs(
        config.limits.idempotency_ttl_secs,
    )));
    let limiter = Arc::new(RateLimiter::new(
        config.limits.rate_limit_max_requests,
        Duration::from_secs(config.limits.rate_limit_window_secs),
    ));

    let link_provider = Arc::new(
        HttpPaymentLinkProvider::new(&config.provider)
            .context("failed to build payment-link provider client")?,
    );
    let signer = Arc::new(
        HttpSigningProvider::new(&config.provider)
            .context("failed to build custody signing client")?,
    );
    let notifier = Arc::new(LogNotifier);

    let factory = Arc::new(TransactionFactory::new(
        transactions.clone(),
        tokens,
        link_provider,
        rates.clone(),
        config.limits.clone(),
    ));
    let reconciler = Arc::new(StatusReconciler::new(
        transactions.clone(),
        audit,
        notifier.clone(),
        &config.provider,
        &config.security,
    ));
    let pin_gate = Arc::new(PinGate::new(
        merchants.clone(),
        config.security.pin_max_attempts,
    ));
    let transfers = Arc::new(TransferService::new(
        signer,
        pin_gate.clone(),
        idempotency.clone(),
        limiter.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    spawn_cache_sweeper(
        rates,
        idempotency,
        limiter,
        Duration::from_secs(config.limits.cache_sweep_interval_secs),
        shutdown_rx.clone(),
    );
    spawn_order_expiry_worker(transactions, notifier, shutdown_rx);

    let request_id_header = HeaderName::from_static("x-request-id");
    let app = api::router(AppState {
        merchants,
        factory,
        reconciler,
        pin_gate,
        transfers,
        pool,
    })
    .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
    .layer(TraceLayer::new_for_http())
    .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}

/// Periodically evict expired cache entries and stale rate-limit windows.
fn spawn_cache_sweeper(
    rates: Arc<CurrencyRateCache>,
    idempotency: Arc<IdempotencyCache<merchpay_backend::services::transfer::TransferReceipt>>,
    limiter: Arc<RateLimiter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let rates_evicted = rates.sweep().await;
                    let results_evicted = idempotency.sweep().await;
                    let windows_evicted = limiter.sweep(interval).await;
                    if rates_evicted + results_evicted + windows_evicted > 0 {
                        info!(
                            rates_evicted,
                            results_evicted,
                            windows_evicted,
                            "cache sweep complete"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("cache sweeper stopping");
                    return;
                }
            }
        }
    });
}

/// Move overdue pending orders to `expired` and notify their merchants.
fn spawn_order_expiry_worker(
    store: Arc<TransactionRepository>,
    notifier: Arc<LogNotifier>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.expire_overdue_orders(chrono::Utc::now()).await {
                        Ok(expired) if !expired.is_empty() => {
                            info!(count = expired.len(), "expired overdue orders");
                            for record in expired {
                                notifier
                                    .notify(
                                        record.merchant_id,
                                        NotificationEvent::OrderExpired {
                                            transaction_number: record.transaction_number,
                                        },
                                    )
                                    .await;
                            }
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "order expiry pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("order expiry worker stopping");
                    return;
                }
            }
        }
    });
}
