//! Deposit monitor, deadline monitor and session behavior.

use crate::harness::Harness;
use ks_deal_lifecycle::ports::outbound::{DealRepository, SessionStore};
use ks_deal_lifecycle::{
    AuditAction, CommissionPayer, DealDraft, DealLifecycleApi, DealStatus, NotificationKind,
    SessionKind,
};
use rust_decimal_macros::dec;
use shared_types::{TelegramId, HOUR_MS, MINUTE_MS};

/// An exact deposit seen by the monitor locks the deal.
#[tokio::test]
async fn monitor_locks_on_sufficient_deposit() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;
    let monitor = h.deposit_monitor();

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    let (deal, multisig) = h.funded_address(&deal, 200).await;

    let mut stream = h.chain.deposit_stream();
    h.chain.emit_deposit(&multisig, dec!(500.5), 2);
    monitor.on_deposit(stream.recv().await.unwrap()).await;

    let stored = DealRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DealStatus::Locked);
}

/// An under-deposit leaves the deal waiting and writes the audit entry.
#[tokio::test]
async fn monitor_rejects_under_deposit() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;
    let monitor = h.deposit_monitor();

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    let (deal, multisig) = h.funded_address(&deal, 200).await;

    let mut stream = h.chain.deposit_stream();
    h.chain.emit_deposit(&multisig, dec!(499.99), 2);
    monitor.on_deposit(stream.recv().await.unwrap()).await;

    let stored = DealRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DealStatus::WaitingForDeposit);
    assert!(stored.deposit_tx.is_none());

    let rejected = h
        .store
        .audit_entries()
        .into_iter()
        .filter(|e| e.action == AuditAction::DepositRejected)
        .count();
    assert_eq!(rejected, 1);
}

/// The same on-chain transaction replayed through the monitor locks once.
#[tokio::test]
async fn monitor_debounces_replays() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;
    let monitor = h.deposit_monitor();

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    let (deal, multisig) = h.funded_address(&deal, 200).await;

    let mut stream = h.chain.deposit_stream();
    let tx = h.chain.emit_deposit(&multisig, dec!(500), 2);
    h.chain.replay_deposit(&multisig, dec!(500), 2, tx);

    monitor.on_deposit(stream.recv().await.unwrap()).await;
    monitor.on_deposit(stream.recv().await.unwrap()).await;

    let stored = DealRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DealStatus::Locked);

    let locked_entries = h
        .store
        .audit_entries()
        .into_iter()
        .filter(|e| e.action == AuditAction::DepositLocked)
        .count();
    assert_eq!(locked_entries, 1);
}

/// A funding deal past its deadline expires on the sweep, with no
/// blockchain calls.
#[tokio::test]
async fn sweep_expires_unfunded_deals() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;
    let monitor = h.deadline_monitor();

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(100), CommissionPayer::Buyer, 24))
        .await
        .unwrap();

    h.clock.set(deal.deadline + 1_000);
    monitor.sweep().await;

    let stored = DealRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DealStatus::Expired);
    assert!(h.chain.payouts().is_empty());
    // Engine notifications are spawned; give them a beat.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(h.notifier.sent_to(TelegramId(100), NotificationKind::Expired) >= 1);
}

/// One warning goes out shortly before a funding deadline, and only one.
#[tokio::test]
async fn sweep_warns_once_before_expiry() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;
    let monitor = h.deadline_monitor();

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(100), CommissionPayer::Buyer, 24))
        .await
        .unwrap();

    h.clock.set(deal.deadline - 30 * MINUTE_MS);
    monitor.sweep().await;
    monitor.sweep().await;

    assert_eq!(
        h.notifier
            .sent_to(TelegramId(100), NotificationKind::DeadlineWarning),
        1
    );
    let stored = DealRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.status.is_waiting());
}

/// The sweep auto-releases submitted work once the acceptance window ends.
#[tokio::test]
async fn sweep_drives_auto_release() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;
    let monitor = h.deadline_monitor();

    let deal = h
        .submitted_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    h.clock.set(deal.deadline + 72 * HOUR_MS + 1_000);
    monitor.sweep().await;

    let stored = DealRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DealStatus::Completed);
    assert_eq!(h.chain.payouts().len(), 1);
}

/// Draft sessions expire by TTL, and a lost session never half-creates a
/// deal; the full creation still works afterwards.
#[tokio::test]
async fn lost_draft_session_leaves_no_trace() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let draft = DealDraft {
        counterparty_handle: Some("seller".into()),
        amount: Some(dec!(500)),
        ..DealDraft::default()
    };
    SessionStore::put(
        h.store.as_ref(),
        TelegramId(100),
        SessionKind::DealDraft,
        serde_json::to_value(&draft).unwrap(),
        30 * MINUTE_MS,
    )
    .await
    .unwrap();

    // The user walks away; the draft expires.
    h.clock.advance(31 * MINUTE_MS);
    assert!(SessionStore::get(
        h.store.as_ref(),
        TelegramId(100),
        SessionKind::DealDraft
    )
    .await
    .unwrap()
    .is_none());

    // Nothing authoritative leaked from the lost session.
    h.engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .expect("creation is unaffected by the lost draft");
}
