//! Admin surface and transition-conflict coverage.

use crate::harness::Harness;
use ks_deal_lifecycle::ports::outbound::{AuditSink, DealRepository, DisputeRepository};
use ks_deal_lifecycle::{
    Actor, AdminApi, CommissionPayer, DealError, DealLifecycleApi, DealStatus, DisputeApi,
    DisputeDecision, DisputeStatus,
};
use rust_decimal_macros::dec;
use shared_types::{TelegramId, WalletAddress};

const ADMIN: Actor = Actor::Admin(TelegramId(1));
const SUPERADMIN: Actor = Actor::Superadmin(TelegramId(1));

/// Operations outside the transition table fail with `Conflict`.
#[tokio::test]
async fn illegal_events_conflict() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    // A locked deal accepts neither wallets, nor deposits by another tx,
    // nor confirmation, nor cancellation.
    assert!(matches!(
        h.engine
            .provide_wallet(&deal.id, TelegramId(200), WalletAddress::new("TLate"))
            .await
            .unwrap_err(),
        DealError::Conflict { .. }
    ));
    assert!(matches!(
        h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap_err(),
        DealError::Conflict { .. }
    ));
    assert!(matches!(
        h.engine
            .cancel(&deal.id, Actor::User(TelegramId(100)))
            .await
            .unwrap_err(),
        DealError::Conflict { .. }
    ));

    // Waiting deals accept no work submission.
    h.user(101, "buyer2").await;
    h.user(201, "seller2").await;
    let waiting = h
        .engine
        .create_deal(h.request(101, 201, dec!(100), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    assert!(matches!(
        h.engine
            .submit_work(&waiting.id, TelegramId(201), "early".into())
            .await
            .unwrap_err(),
        DealError::Conflict { .. }
    ));
}

/// Role guards: wrong callers are rejected before any state changes.
#[tokio::test]
async fn role_guards_reject_wrong_callers() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    // Buyer cannot submit work; outsider cannot dispute; non-admin cannot
    // resolve.
    assert!(matches!(
        h.engine
            .submit_work(&deal.id, TelegramId(100), "not mine".into())
            .await
            .unwrap_err(),
        DealError::NotAuthorized(_)
    ));
    assert!(matches!(
        h.engine
            .open_dispute(&deal.id, TelegramId(999), "outsider".into(), vec![])
            .await
            .unwrap_err(),
        DealError::NotAuthorized(_)
    ));
    h.engine
        .open_dispute(&deal.id, TelegramId(100), "case".into(), vec![])
        .await
        .unwrap();
    assert!(matches!(
        h.engine
            .resolve_dispute(
                &deal.id,
                Actor::User(TelegramId(100)),
                DisputeDecision::RefundBuyer,
                "self-serve".into()
            )
            .await
            .unwrap_err(),
        DealError::NotAuthorized(_)
    ));
}

/// Admin cancels a dispute: the deal reopens `locked` with a new deadline
/// and the dispute closes without a decision.
#[tokio::test]
async fn cancelled_dispute_reopens_the_deal() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;
    h.engine
        .open_dispute(&deal.id, TelegramId(100), "impatient".into(), vec![])
        .await
        .unwrap();

    let before = h.clock.now_ms();
    let deal = h
        .engine
        .cancel_dispute(&deal.id, ADMIN, 48)
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::Locked);
    assert!(deal.deadline >= before + 48 * shared_types::HOUR_MS);

    let dispute = DisputeRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dispute.status, DisputeStatus::Resolved);
    assert!(dispute.decision.is_none());
    assert!(dispute.cancelled_by_admin);

    // No payout happened.
    assert!(h.chain.payouts().is_empty());
}

/// Forced transitions require superadmin and are audited.
#[tokio::test]
async fn force_status_requires_superadmin() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    assert!(matches!(
        h.engine
            .force_status(&deal.id, ADMIN, DealStatus::Cancelled, "nope".into())
            .await
            .unwrap_err(),
        DealError::NotAuthorized(_)
    ));

    let forced = h
        .engine
        .force_status(&deal.id, SUPERADMIN, DealStatus::Cancelled, "support case".into())
        .await
        .unwrap();
    assert_eq!(forced.status, DealStatus::Cancelled);

    let entries = AuditSink::for_deal(h.store.as_ref(), &deal.id)
        .await
        .unwrap();
    assert!(entries
        .iter()
        .any(|e| e.action == ks_deal_lifecycle::AuditAction::ForcedTransition));
}

/// A forced refund on a funded deal returns the full deposit on-chain.
#[tokio::test]
async fn forced_refund_moves_the_money() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    let refunded = h
        .engine
        .force_status(&deal.id, SUPERADMIN, DealStatus::Refunded, "goodwill".into())
        .await
        .unwrap();
    assert_eq!(refunded.status, DealStatus::Refunded);

    let payouts = h.chain.payouts();
    assert_eq!(payouts.len(), 1);
    assert!(payouts[0].refund);
    assert_eq!(payouts[0].amount, dec!(500));
}

/// Terminal deals reject further forced transitions.
#[tokio::test]
async fn terminals_cannot_be_forced() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(100), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    h.engine
        .cancel(&deal.id, Actor::User(TelegramId(100)))
        .await
        .unwrap();

    assert!(matches!(
        h.engine
            .force_status(&deal.id, SUPERADMIN, DealStatus::Locked, "undo".into())
            .await
            .unwrap_err(),
        DealError::Conflict { .. }
    ));
}

/// Dispute comments: participants keep it open, the arbiter moves it to
/// review, and resolution closes the thread.
#[tokio::test]
async fn dispute_conversation_flow() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;
    h.engine
        .open_dispute(&deal.id, TelegramId(100), "case".into(), vec![])
        .await
        .unwrap();

    let dispute = h
        .dispute_engine
        .add_comment(&deal.id, Actor::User(TelegramId(200)), "my side".into())
        .await
        .unwrap();
    assert_eq!(dispute.status, DisputeStatus::Open);

    let dispute = h
        .dispute_engine
        .add_comment(&deal.id, ADMIN, "reviewing".into())
        .await
        .unwrap();
    assert_eq!(dispute.status, DisputeStatus::InReview);

    h.engine
        .resolve_dispute(&deal.id, ADMIN, DisputeDecision::ReleaseSeller, "ok".into())
        .await
        .unwrap();
    let err = h
        .dispute_engine
        .add_comment(&deal.id, Actor::User(TelegramId(100)), "late".into())
        .await
        .unwrap_err();
    assert!(matches!(err, DealError::Conflict { .. }));
}

/// Ban and unban round-trip with audit entries.
#[tokio::test]
async fn ban_unban_round_trip() {
    let h = Harness::new();
    h.user(100, "target").await;

    h.engine
        .ban_user(ADMIN, TelegramId(100), "spam".into())
        .await
        .unwrap();
    let user = ks_deal_lifecycle::ports::outbound::UserRepository::get(
        h.store.as_ref(),
        TelegramId(100),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(user.blacklisted);
    assert_eq!(user.blacklist_reason.as_deref(), Some("spam"));

    h.engine.unban_user(ADMIN, TelegramId(100)).await.unwrap();
    let user = ks_deal_lifecycle::ports::outbound::UserRepository::get(
        h.store.as_ref(),
        TelegramId(100),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!user.blacklisted);
    assert!(user.blacklist_reason.is_none());

    assert!(matches!(
        h.engine
            .ban_user(Actor::User(TelegramId(2)), TelegramId(100), "nope".into())
            .await
            .unwrap_err(),
        DealError::NotAuthorized(_)
    ));
}

/// Audit entries for one deal arrive in transition order.
#[tokio::test]
async fn audit_trail_is_ordered() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .submitted_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;
    h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();

    let actions: Vec<_> = AuditSink::for_deal(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();

    use ks_deal_lifecycle::AuditAction::*;
    assert_eq!(
        actions,
        vec![DealCreated, WalletAssigned, DepositLocked, WorkSubmitted, DealCompleted]
    );

    let stored = DealRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DealStatus::Completed);
}
