//! PIN gate lifecycle and PIN-gated idempotent transfers against
//! in-memory stores.

mod support;

use merchpay_backend::cache::idempotency::IdempotencyCache;
use merchpay_backend::cache::rate_limit::RateLimiter;
use merchpay_backend::services::pin_gate::{PinError, PinGate};
use merchpay_backend::services::transfer::{TransferError, TransferRequest, TransferService};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use support::{make_merchant, InMemoryMerchantStore, RecordingSigner};
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 3;

fn pin_harness() -> (Arc<InMemoryMerchantStore>, PinGate, Uuid) {
    let merchant = make_merchant("0xdest", Some("usdc-base"));
    let id = merchant.id;
    let store = Arc::new(InMemoryMerchantStore::with(merchant));
    let gate = PinGate::new(store.clone(), MAX_ATTEMPTS);
    (store, gate, id)
}

fn transfer_request(pin: Option<&str>, request_id: Option<&str>) -> TransferRequest {
    TransferRequest {
        recipient: "0xrecipient".to_string(),
        amount: Decimal::from(25),
        pin: pin.map(|s| s.to_string()),
        request_id: request_id.map(|s| s.to_string()),
    }
}

struct TransferHarness {
    merchants: Arc<InMemoryMerchantStore>,
    signer: Arc<RecordingSigner>,
    service: TransferService,
    merchant_id: Uuid,
}

fn transfer_harness(rate_limit: u32) -> TransferHarness {
    let merchant = make_merchant("0xdest", Some("usdc-base"));
    let merchant_id = merchant.id;
    let merchants = Arc::new(InMemoryMerchantStore::with(merchant));
    let signer = Arc::new(RecordingSigner::new());
    let gate = Arc::new(PinGate::new(merchants.clone(), MAX_ATTEMPTS));
    let service = TransferService::new(
        signer.clone(),
        gate,
        Arc::new(IdempotencyCache::new(Duration::from_secs(60))),
        Arc::new(RateLimiter::new(rate_limit, Duration::from_secs(60))),
    );
    TransferHarness {
        merchants,
        signer,
        service,
        merchant_id,
    }
}

#[tokio::test]
async fn set_validate_and_revoke_round_trip() {
    let (store, gate, id) = pin_harness();

    gate.set(&store.get(id), "123456").await.unwrap();
    assert!(store.get(id).has_pin());

    let report = gate.validate(&store.get(id), "123456").await.unwrap();
    assert!(report.valid);
    assert_eq!(report.attempts_remaining, MAX_ATTEMPTS);

    gate.revoke(&store.get(id), "123456").await.unwrap();
    assert!(!store.get(id).has_pin());
}

#[tokio::test]
async fn validation_trivially_passes_before_any_pin_is_set() {
    let (store, gate, id) = pin_harness();

    let report = gate.validate(&store.get(id), "123456").await.unwrap();
    assert!(report.valid);
    assert_eq!(report.attempts_remaining, MAX_ATTEMPTS);
    assert!(!report.is_blocked);
    assert_eq!(store.get(id).pin_attempts, 0);
}

#[tokio::test]
async fn update_and_revoke_require_an_existing_pin() {
    let (store, gate, id) = pin_harness();

    assert!(matches!(
        gate.update(&store.get(id), "123456", "654321")
            .await
            .unwrap_err(),
        PinError::NotSet
    ));
    assert!(matches!(
        gate.revoke(&store.get(id), "123456").await.unwrap_err(),
        PinError::NotSet
    ));
}

#[tokio::test]
async fn setting_a_second_pin_requires_update() {
    let (store, gate, id) = pin_harness();

    gate.set(&store.get(id), "123456").await.unwrap();
    let err = gate.set(&store.get(id), "654321").await.unwrap_err();
    assert!(matches!(err, PinError::AlreadySet));

    gate.update(&store.get(id), "123456", "654321").await.unwrap();
    let report = gate.validate(&store.get(id), "654321").await.unwrap();
    assert!(report.valid);
}

#[tokio::test]
async fn malformed_pins_are_rejected() {
    let (store, gate, id) = pin_harness();

    assert!(matches!(
        gate.set(&store.get(id), "12345").await.unwrap_err(),
        PinError::Format
    ));
    assert!(matches!(
        gate.set(&store.get(id), "12345a").await.unwrap_err(),
        PinError::Format
    ));
}

#[tokio::test]
async fn failed_attempts_accumulate_until_the_account_blocks() {
    let (store, gate, id) = pin_harness();
    gate.set(&store.get(id), "123456").await.unwrap();

    let first = gate.validate(&store.get(id), "000000").await.unwrap();
    assert!(!first.valid);
    assert_eq!(first.attempts_remaining, 2);

    let second = gate.validate(&store.get(id), "000000").await.unwrap();
    assert_eq!(second.attempts_remaining, 1);
    assert!(!second.is_blocked);

    let third = gate.validate(&store.get(id), "000000").await.unwrap();
    assert!(third.is_blocked);
    assert_eq!(third.attempts_remaining, 0);
    assert!(store.get(id).is_pin_blocked());

    // Once blocked, even the correct PIN no longer validates and the
    // stored state stays untouched.
    let blocked = gate.validate(&store.get(id), "123456").await.unwrap();
    assert!(!blocked.valid);
    assert!(blocked.is_blocked);
    assert!(store.get(id).has_pin());
}

#[tokio::test]
async fn successful_validation_resets_the_attempt_counter() {
    let (store, gate, id) = pin_harness();
    gate.set(&store.get(id), "123456").await.unwrap();

    gate.validate(&store.get(id), "000000").await.unwrap();
    gate.validate(&store.get(id), "000000").await.unwrap();
    assert_eq!(store.get(id).pin_attempts, 2);

    let ok = gate.validate(&store.get(id), "123456").await.unwrap();
    assert!(ok.valid);
    assert_eq!(store.get(id).pin_attempts, 0);
    // A match wipes the failure trail, timestamp included.
    assert!(store.get(id).pin_last_attempt_at.is_none());

    // The budget is whole again.
    let wrong = gate.validate(&store.get(id), "000000").await.unwrap();
    assert_eq!(wrong.attempts_remaining, 2);
}

#[tokio::test]
async fn transfer_without_a_configured_pin_signs_directly() {
    let h = transfer_harness(60);

    let receipt = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(None, Some("req-1")),
        )
        .await
        .unwrap();

    assert!(!receipt.from_cache);
    assert!(receipt.signature.starts_with("sig-1"));
    assert_eq!(h.signer.calls(), 1);
}

#[tokio::test]
async fn transfer_requires_a_pin_once_one_is_set() {
    let h = transfer_harness(60);
    let gate = PinGate::new(h.merchants.clone(), MAX_ATTEMPTS);
    gate.set(&h.merchants.get(h.merchant_id), "123456")
        .await
        .unwrap();

    let err = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(None, Some("req-1")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::PinRequired));

    let err = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(Some("000000"), Some("req-1")),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Pin(PinError::Invalid {
            attempts_remaining: 2
        })
    ));
    assert_eq!(h.signer.calls(), 0);

    let receipt = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(Some("123456"), Some("req-1")),
        )
        .await
        .unwrap();
    assert!(!receipt.from_cache);
    assert_eq!(h.signer.calls(), 1);
}

#[tokio::test]
async fn retried_transfer_replays_the_original_receipt() {
    let h = transfer_harness(60);

    let first = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(None, Some("req-42")),
        )
        .await
        .unwrap();
    let second = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(None, Some("req-42")),
        )
        .await
        .unwrap();

    // Same receipt, flagged as replayed; the signer ran exactly once.
    assert_eq!(second.transfer_id, first.transfer_id);
    assert_eq!(second.signature, first.signature);
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(h.signer.calls(), 1);
}

#[tokio::test]
async fn identical_requests_without_request_id_share_a_fingerprint() {
    let h = transfer_harness(60);

    let first = h
        .service
        .transfer(&h.merchants.get(h.merchant_id), transfer_request(None, None))
        .await
        .unwrap();
    let second = h
        .service
        .transfer(&h.merchants.get(h.merchant_id), transfer_request(None, None))
        .await
        .unwrap();

    assert_eq!(second.transfer_id, first.transfer_id);
    assert!(second.from_cache);
    assert_eq!(h.signer.calls(), 1);
}

#[tokio::test]
async fn derived_key_does_not_depend_on_the_pin_field() {
    let h = transfer_harness(60);

    let first = h
        .service
        .transfer(&h.merchants.get(h.merchant_id), transfer_request(None, None))
        .await
        .unwrap();
    // No PIN is configured, so the stray PIN is ignored by the gate and
    // must not produce a different idempotency key either.
    let second = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(Some("999999"), None),
        )
        .await
        .unwrap();

    assert_eq!(second.transfer_id, first.transfer_id);
    assert!(second.from_cache);
    assert_eq!(h.signer.calls(), 1);
}

#[tokio::test]
async fn failed_signing_releases_the_key_for_retry() {
    let h = transfer_harness(60);
    h.signer.set_fail(true);

    let err = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(None, Some("req-9")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Signing(_)));

    h.signer.set_fail(false);
    let receipt = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(None, Some("req-9")),
        )
        .await
        .unwrap();
    assert!(!receipt.from_cache);
    assert_eq!(h.signer.calls(), 2);
}

#[tokio::test]
async fn transfers_are_rate_limited_per_merchant() {
    let h = transfer_harness(2);

    for i in 0..2 {
        let request_id = format!("req-{}", i);
        h.service
            .transfer(
                &h.merchants.get(h.merchant_id),
                transfer_request(None, Some(request_id.as_str())),
            )
            .await
            .unwrap();
    }

    let err = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(None, Some("req-overflow")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::RateLimited { .. }));
    assert_eq!(h.signer.calls(), 2);
}

#[tokio::test]
async fn blocked_merchant_cannot_transfer() {
    let h = transfer_harness(60);
    let gate = PinGate::new(h.merchants.clone(), MAX_ATTEMPTS);
    gate.set(&h.merchants.get(h.merchant_id), "123456")
        .await
        .unwrap();
    for _ in 0..MAX_ATTEMPTS {
        gate.validate(&h.merchants.get(h.merchant_id), "000000")
            .await
            .unwrap();
    }
    assert!(h.merchants.get(h.merchant_id).is_pin_blocked());

    let err = h
        .service
        .transfer(
            &h.merchants.get(h.merchant_id),
            transfer_request(Some("123456"), Some("req-1")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Pin(PinError::Blocked)));
    assert_eq!(h.signer.calls(), 0);
}
