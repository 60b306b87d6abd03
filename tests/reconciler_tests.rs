//! Webhook reconciliation against in-memory stores: authentication,
//! event mapping, monotonic status merging and duplicate handling.

mod support;

use async_trait::async_trait;
use chrono::Utc;
use merchpay_backend::config::{PaymentProviderConfig, SecurityConfig};
use merchpay_backend::database::transaction_repository::{
    NewTransaction, TransactionKind, TransactionStatus,
};
use merchpay_backend::payments::utils::sign_hmac_sha512_hex;
use merchpay_backend::services::notification::{NotificationEvent, Notifier};
use merchpay_backend::services::ports::TransactionStore;
use merchpay_backend::services::status_reconciler::{
    ReconcileError, ReconcileOutcome, StatusReconciler,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{CollectingAudit, CollectingNotifier, InMemoryTransactionStore};
use uuid::Uuid;

const MERCHANT_TOKEN: &str = "0xmerchant-destination";

fn provider_config(secret: Option<&str>) -> PaymentProviderConfig {
    PaymentProviderConfig {
        base_url: "https://provider.test".to_string(),
        api_key: "test-key".to_string(),
        webhook_secret: secret.map(|s| s.to_string()),
        request_timeout: 5,
        max_retries: 0,
    }
}

fn security_config() -> SecurityConfig {
    SecurityConfig {
        pin_max_attempts: 3,
        webhook_timestamp_tolerance_secs: 300,
    }
}

struct Harness {
    store: Arc<InMemoryTransactionStore>,
    audit: Arc<CollectingAudit>,
    notifier: Arc<CollectingNotifier>,
    reconciler: StatusReconciler,
}

fn harness(secret: Option<&str>) -> Harness {
    let store = Arc::new(InMemoryTransactionStore::new());
    let audit = Arc::new(CollectingAudit::new());
    let notifier = Arc::new(CollectingNotifier::new());
    let reconciler = StatusReconciler::new(
        store.clone(),
        audit.clone(),
        notifier.clone(),
        &provider_config(secret),
        &security_config(),
    );
    Harness {
        store,
        audit,
        notifier,
        reconciler,
    }
}

async fn seed(
    store: &InMemoryTransactionStore,
    kind: TransactionKind,
    number: &str,
) -> uuid::Uuid {
    let record = store
        .insert(NewTransaction {
            merchant_id: Uuid::new_v4(),
            kind,
            transaction_number: number.to_string(),
            payment_id: "pay-seed".to_string(),
            payment_payload: json!({"id": "pay-seed"}),
            amount_usd: Decimal::from(100),
            display_currency: "USD".to_string(),
            display_amount: Decimal::from(100),
            description: None,
            chain_id: "base".to_string(),
            token_id: "usdc-base".to_string(),
            destination_address: MERCHANT_TOKEN.to_string(),
            expires_at: None,
        })
        .await
        .unwrap();
    record.id
}

/// Notification delivery runs on a detached task; give it a turn before
/// asserting on collected events.
async fn settle_notifications() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn body(event: &str, number: &str, token: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": event,
        "payment": {
            "id": "pay-seed",
            "metadata": { "orderNumber": number, "merchantToken": token }
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn payment_started_moves_pending_to_processing() {
    let h = harness(None);
    let id = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0001").await;

    let outcome = h
        .reconciler
        .process_event(
            &body("payment_started", "ORD-20260829-AAAA0001", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ReconcileOutcome::Applied {
            new_status: TransactionStatus::Processing,
            ..
        }
    ));
    assert_eq!(h.store.get(id).unwrap().status, "processing");
}

#[tokio::test]
async fn completed_event_settles_and_notifies() {
    let h = harness(None);
    let id = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0002").await;

    let outcome = h
        .reconciler
        .process_event(
            &body("payment_completed", "ORD-20260829-AAAA0002", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ReconcileOutcome::Applied {
            new_status: TransactionStatus::Completed,
            ..
        }
    ));
    let record = h.store.get(id).unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.status_rank, 2);

    let audit = h.audit.entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].old_status, "pending");
    assert_eq!(audit[0].new_status, "completed");

    settle_notifications().await;
    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1, "payment_completed");
}

#[tokio::test]
async fn duplicate_delivery_is_discarded_without_side_effects() {
    let h = harness(None);
    seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0003").await;
    let payload = body("payment_completed", "ORD-20260829-AAAA0003", MERCHANT_TOKEN);

    h.reconciler.process_event(&payload, None).await.unwrap();
    let second = h.reconciler.process_event(&payload, None).await.unwrap();

    assert!(matches!(
        second,
        ReconcileOutcome::Discarded {
            current_status: TransactionStatus::Completed,
            ..
        }
    ));
    // Exactly one audit entry and one notification for the pair.
    settle_notifications().await;
    assert_eq!(h.audit.entries().len(), 1);
    assert_eq!(h.notifier.events().len(), 1);
}

#[tokio::test]
async fn late_out_of_order_event_cannot_regress_a_terminal_status() {
    let h = harness(None);
    let id = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0004").await;

    h.reconciler
        .process_event(
            &body("payment_completed", "ORD-20260829-AAAA0004", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();

    // The delayed "started" echo arrives after settlement.
    let late = h
        .reconciler
        .process_event(
            &body("payment_started", "ORD-20260829-AAAA0004", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();

    assert!(matches!(late, ReconcileOutcome::Discarded { .. }));
    assert_eq!(h.store.get(id).unwrap().status, "completed");
}

#[tokio::test]
async fn equal_rank_event_does_not_replace_a_terminal_status() {
    let h = harness(None);
    let id = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0005").await;

    h.reconciler
        .process_event(
            &body("payment_completed", "ORD-20260829-AAAA0005", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();
    let refund = h
        .reconciler
        .process_event(
            &body("payment_refunded", "ORD-20260829-AAAA0005", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();

    assert!(matches!(refund, ReconcileOutcome::Discarded { .. }));
    assert_eq!(h.store.get(id).unwrap().status, "completed");
}

#[tokio::test]
async fn legacy_dotted_completed_alias_is_accepted() {
    let h = harness(None);
    let id = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0006").await;

    h.reconciler
        .process_event(
            &body("payment.completed", "ORD-20260829-AAAA0006", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();

    assert_eq!(h.store.get(id).unwrap().status, "completed");
}

#[tokio::test]
async fn bounced_maps_to_discrepancy_and_refunded_to_failed() {
    let h = harness(None);
    let bounced = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0007").await;
    let refunded = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0008").await;

    h.reconciler
        .process_event(
            &body("payment_bounced", "ORD-20260829-AAAA0007", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();
    h.reconciler
        .process_event(
            &body("payment_refunded", "ORD-20260829-AAAA0008", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();

    assert_eq!(h.store.get(bounced).unwrap().status, "discrepancy");
    assert_eq!(h.store.get(refunded).unwrap().status, "failed");
    // A refund is a failure from the merchant's point of view.
    settle_notifications().await;
    assert!(h.notifier.events().iter().any(|(_, e)| e == "payment_failed"));
}

#[tokio::test]
async fn unknown_event_type_is_rejected() {
    let h = harness(None);
    seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0009").await;

    let err = h
        .reconciler
        .process_event(
            &body("payment_teleported", "ORD-20260829-AAAA0009", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::UnknownEvent(event) if event == "payment_teleported"));
}

#[tokio::test]
async fn unknown_transaction_number_is_rejected() {
    let h = harness(None);

    let err = h
        .reconciler
        .process_event(
            &body("payment_completed", "ORD-20260829-ZZZZ9999", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::UnknownTransaction(_)));
}

#[tokio::test]
async fn merchant_token_mismatch_is_rejected() {
    let h = harness(None);
    let id = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0010").await;

    let err = h
        .reconciler
        .process_event(
            &body("payment_completed", "ORD-20260829-AAAA0010", "0xsomeone-else"),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::TokenMismatch));
    assert_eq!(h.store.get(id).unwrap().status, "pending");
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let h = harness(None);

    let err = h
        .reconciler
        .process_event(br#"{"event": "payment_completed"}"#, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Malformed(_)));
}

#[tokio::test]
async fn signature_is_required_and_verified_when_a_secret_is_configured() {
    let h = harness(Some("hook-secret"));
    let id = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0011").await;
    let payload = body("payment_completed", "ORD-20260829-AAAA0011", MERCHANT_TOKEN);

    let missing = h.reconciler.process_event(&payload, None).await.unwrap_err();
    assert!(matches!(missing, ReconcileError::Unauthorized));

    let wrong = h
        .reconciler
        .process_event(&payload, Some("deadbeef"))
        .await
        .unwrap_err();
    assert!(matches!(wrong, ReconcileError::Unauthorized));
    assert_eq!(h.store.get(id).unwrap().status, "pending");

    let signature = sign_hmac_sha512_hex(&payload, "hook-secret").unwrap();
    let outcome = h
        .reconciler
        .process_event(&payload, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));
}

#[tokio::test]
async fn stale_timestamp_is_rejected_and_fresh_one_accepted() {
    let h = harness(None);
    seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0012").await;

    let stale = serde_json::to_vec(&json!({
        "event": "payment_completed",
        "timestamp": Utc::now().timestamp() - 3600,
        "payment": {
            "id": "pay-seed",
            "metadata": {
                "orderNumber": "ORD-20260829-AAAA0012",
                "merchantToken": MERCHANT_TOKEN
            }
        }
    }))
    .unwrap();
    let err = h.reconciler.process_event(&stale, None).await.unwrap_err();
    assert!(matches!(err, ReconcileError::StaleTimestamp));

    let fresh = serde_json::to_vec(&json!({
        "event": "payment_completed",
        "timestamp": Utc::now().timestamp(),
        "payment": {
            "id": "pay-seed",
            "metadata": {
                "orderNumber": "ORD-20260829-AAAA0012",
                "merchantToken": MERCHANT_TOKEN
            }
        }
    }))
    .unwrap();
    let outcome = h.reconciler.process_event(&fresh, None).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));
}

struct SlowNotifier {
    delay: Duration,
    delivered: AtomicUsize,
}

#[async_trait]
impl Notifier for SlowNotifier {
    async fn notify(&self, _merchant_id: Uuid, _event: NotificationEvent) {
        tokio::time::sleep(self.delay).await;
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn acknowledgement_does_not_wait_for_notification_delivery() {
    let store = Arc::new(InMemoryTransactionStore::new());
    let notifier = Arc::new(SlowNotifier {
        delay: Duration::from_millis(200),
        delivered: AtomicUsize::new(0),
    });
    let reconciler = StatusReconciler::new(
        store.clone(),
        Arc::new(CollectingAudit::new()),
        notifier.clone(),
        &provider_config(None),
        &security_config(),
    );
    seed(&store, TransactionKind::Order, "ORD-20260829-AAAA0014").await;

    let started = std::time::Instant::now();
    let outcome = reconciler
        .process_event(
            &body("payment_completed", "ORD-20260829-AAAA0014", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));
    assert!(elapsed < Duration::from_millis(100), "waited {:?}", elapsed);
    assert_eq!(notifier.delivered.load(Ordering::SeqCst), 0);

    // The detached task still delivers.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(notifier.delivered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn order_namespace_is_tried_before_deposit() {
    let h = harness(None);
    let order = seed(&h.store, TransactionKind::Order, "TX-20260829-SHARED01").await;
    let deposit = seed(&h.store, TransactionKind::Deposit, "TX-20260829-SHARED01").await;

    h.reconciler
        .process_event(
            &body("payment_completed", "TX-20260829-SHARED01", MERCHANT_TOKEN),
            None,
        )
        .await
        .unwrap();

    assert_eq!(h.store.get(order).unwrap().status, "completed");
    assert_eq!(h.store.get(deposit).unwrap().status, "pending");
}

#[tokio::test]
async fn settlement_facts_are_copied_from_the_applied_event() {
    let h = harness(None);
    let id = seed(&h.store, TransactionKind::Order, "ORD-20260829-AAAA0013").await;

    let payload = serde_json::to_vec(&json!({
        "event": "payment_completed",
        "payment": {
            "id": "pay-seed",
            "payinchainid": "ethereum",
            "payintokenaddress": "0xsourcetoken",
            "metadata": {
                "orderNumber": "ORD-20260829-AAAA0013",
                "merchantToken": MERCHANT_TOKEN,
                "transaction_hash": "0xhash",
                "actual_amount": "99.25"
            }
        }
    }))
    .unwrap();
    h.reconciler.process_event(&payload, None).await.unwrap();

    let record = h.store.get(id).unwrap();
    assert_eq!(record.source_chain.as_deref(), Some("ethereum"));
    assert_eq!(record.source_token.as_deref(), Some("0xsourcetoken"));
    assert_eq!(record.source_tx_hash.as_deref(), Some("0xhash"));
    assert_eq!(record.source_amount, Some("99.25".parse().unwrap()));
    assert!(record.last_event_payload.is_some());
}
