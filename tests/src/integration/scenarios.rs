//! End-to-end lifecycle scenarios.

use crate::harness::Harness;
use ks_deal_lifecycle::{
    AdminApi, CommissionPayer, DealError, DealLifecycleApi, DealStatus, DisputeDecision,
    NotificationKind, Role,
};
use ks_deal_lifecycle::ports::outbound::UserRepository;
use rust_decimal_macros::dec;
use shared_types::{TelegramId, WalletAddress, HOUR_MS};

/// Happy path: create → wallets → deposit → work → confirm → completed.
#[tokio::test]
async fn happy_path_settles_exactly() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    assert_eq!(deal.id.as_str(), "D-1");
    assert_eq!(deal.commission, dec!(25.00));
    assert_eq!(deal.status, DealStatus::WaitingForSellerWallet);
    assert_eq!(deal.creator_role, Role::Buyer);

    let (deal, multisig) = h.funded_address(&deal, 200).await;
    assert_eq!(deal.status, DealStatus::WaitingForDeposit);
    assert!(h
        .chain
        .watched_addresses()
        .contains(&multisig.as_str().to_string()));

    let deal = h
        .engine
        .deposit_detected(&deal.id, shared_types::TxHash::new("tx1"), dec!(500), 2)
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::Locked);

    let deal = h
        .engine
        .submit_work(&deal.id, TelegramId(200), "done".into())
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::WorkSubmitted);

    let deal = h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
    assert!(deal.completed_at.is_some());
    assert!(deal.payout_tx.is_some());
    assert_eq!(deal.costs.trx_price_at_completion, Some(dec!(0.12)));

    // The seller received exactly amount minus commission.
    let payouts = h.chain.payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, dec!(475.00));
    assert_eq!(payouts[0].to, WalletAddress::new("TSeller200"));
    assert!(!payouts[0].refund);

    // Both participants are free again.
    for id in [100, 200] {
        let user = UserRepository::get(h.store.as_ref(), TelegramId(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.active_deal_id, None);
    }

    // Notifications are fire-and-forget; give the spawned sends a beat.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(h.notifier.sent_to(TelegramId(100), NotificationKind::Completed) >= 1);
}

/// The optional acknowledgement step: locked → in_progress → submitted.
#[tokio::test]
async fn seller_can_start_work_before_submitting() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    // Only the seller may acknowledge.
    assert!(matches!(
        h.engine.start_work(&deal.id, TelegramId(100)).await.unwrap_err(),
        DealError::NotAuthorized(_)
    ));

    let deal = h.engine.start_work(&deal.id, TelegramId(200)).await.unwrap();
    assert_eq!(deal.status, DealStatus::InProgress);

    // Acknowledging twice conflicts; submitting from in_progress works.
    assert!(matches!(
        h.engine.start_work(&deal.id, TelegramId(200)).await.unwrap_err(),
        DealError::Conflict { .. }
    ));
    let deal = h
        .engine
        .submit_work(&deal.id, TelegramId(200), "done".into())
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::WorkSubmitted);
}

/// Seller-created deal: buyer wallet is collected first, and providing it
/// jumps straight to funding because the seller wallet is already known.
#[tokio::test]
async fn seller_created_deal_collects_the_buyer_wallet_first() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let mut request = h.request(200, 100, dec!(500), CommissionPayer::Seller, 48);
    request.creator_role = Role::Seller;
    request.creator_wallet = Some(WalletAddress::new("TSeller200"));

    let deal = h.engine.create_deal(request).await.unwrap();
    assert_eq!(deal.status, DealStatus::WaitingForBuyerWallet);
    assert_eq!(deal.buyer, TelegramId(100));
    assert_eq!(deal.seller, TelegramId(200));

    let deal = h
        .engine
        .provide_wallet(&deal.id, TelegramId(100), WalletAddress::new("TBuyer100"))
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::WaitingForDeposit);
    assert!(deal.multisig_address.is_some());
}

/// Buyer-created deal without a wallet walks both waiting states in order.
#[tokio::test]
async fn walletless_creation_collects_both_wallets() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let mut request = h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48);
    request.creator_wallet = None;

    let deal = h.engine.create_deal(request).await.unwrap();
    assert_eq!(deal.status, DealStatus::WaitingForBuyerWallet);

    let deal = h
        .engine
        .provide_wallet(&deal.id, TelegramId(100), WalletAddress::new("TBuyer100"))
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::WaitingForSellerWallet);

    let deal = h
        .engine
        .provide_wallet(&deal.id, TelegramId(200), WalletAddress::new("TSeller200"))
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::WaitingForDeposit);
}

/// A saved wallet template can stand in for typing an address.
#[tokio::test]
async fn saved_wallet_provides_the_address() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    let mut seller = h.user(200, "seller").await;
    seller.save_wallet("main", shared_types::WalletAddress::new("TSellerSaved"));
    ks_deal_lifecycle::ports::outbound::UserRepository::update(h.store.as_ref(), &seller)
        .await
        .unwrap();

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    let deal = h
        .engine
        .provide_saved_wallet(&deal.id, TelegramId(200), "main")
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::WaitingForDeposit);
    assert_eq!(
        deal.seller_address,
        Some(shared_types::WalletAddress::new("TSellerSaved"))
    );

    let err = h
        .engine
        .provide_saved_wallet(&deal.id, TelegramId(200), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, DealError::InvariantViolation(_)));
}

/// Settlement identity: released + refunded + withheld = amount, exactly.
#[tokio::test]
async fn commission_law_holds_for_every_payer() {
    for (buyer, seller, payer, expected_release) in [
        (110, 210, CommissionPayer::Buyer, dec!(475.00)),
        (111, 211, CommissionPayer::Seller, dec!(475.00)),
        (112, 212, CommissionPayer::Split, dec!(487.50)),
    ] {
        let h = Harness::new();
        h.user(buyer, "b").await;
        h.user(seller, "s").await;
        let deal = h
            .submitted_deal(buyer, seller, dec!(500), payer)
            .await;
        let deal = h.engine.confirm(&deal.id, TelegramId(buyer)).await.unwrap();
        assert_eq!(deal.status, DealStatus::Completed);

        let released = h.chain.payouts()[0].amount;
        assert_eq!(released, expected_release);
        // withheld = amount - released - refunded(0)
        assert_eq!(dec!(500) - released + dec!(0), dec!(500) - expected_release);
    }
}

/// Split commission on a flat-floor deal: amount 200, commission 15,
/// seller receives 192.50 and the buyer gets no refund.
#[tokio::test]
async fn split_commission_flat_floor() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .submitted_deal(100, 200, dec!(200), CommissionPayer::Split)
        .await;
    assert_eq!(deal.commission, dec!(15));

    let deal = h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();
    assert_eq!(deal.status, DealStatus::Completed);

    let payouts = h.chain.payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, dec!(192.50));
}

/// Dispute resolved for the buyer: the full deposit comes back.
#[tokio::test]
async fn dispute_refunds_the_buyer_in_full() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;
    let dispute = h
        .engine
        .open_dispute(&deal.id, TelegramId(100), "never delivered".into(), vec![])
        .await
        .unwrap();
    assert_eq!(dispute.opener, TelegramId(100));

    let deal = h
        .engine
        .resolve_dispute(
            &deal.id,
            ks_deal_lifecycle::Actor::Admin(TelegramId(1)),
            DisputeDecision::RefundBuyer,
            "seller unresponsive".into(),
        )
        .await
        .unwrap();
    assert_eq!(deal.status, DealStatus::Resolved);

    let payouts = h.chain.payouts();
    assert_eq!(payouts.len(), 1);
    assert!(payouts[0].refund);
    assert_eq!(payouts[0].amount, dec!(500));
    assert_eq!(payouts[0].to, WalletAddress::new("TBuyer100"));

    let seller = UserRepository::get(h.store.as_ref(), TelegramId(200))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seller.dispute_stats.lost, 1);
    assert_eq!(seller.dispute_stats.loss_streak, 1);
    assert!(!seller.blacklisted);

    let buyer = UserRepository::get(h.store.as_ref(), TelegramId(100))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(buyer.dispute_stats.won, 1);
}

/// Buyer silence: work auto-releases 72h after the deadline.
#[tokio::test]
async fn work_auto_releases_after_the_acceptance_window() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .submitted_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    // One hour short of the window: nothing happens.
    h.clock.set(deal.deadline + 71 * HOUR_MS);
    assert!(h.engine.auto_release(&deal.id).await.unwrap().is_none());

    h.clock.set(deal.deadline + 72 * HOUR_MS);
    let released = h.engine.auto_release(&deal.id).await.unwrap().unwrap();
    assert_eq!(released.status, DealStatus::Completed);
    assert_eq!(h.chain.payouts()[0].amount, dec!(475.00));
}

/// A failed payout submission completes through the retry worker instead
/// of failing the buyer's confirmation.
#[tokio::test]
async fn payout_failure_resolves_through_retries() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;
    let worker = h.spawn_retry_worker();

    let deal = h
        .submitted_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;
    h.chain.fail_next_payouts(2);

    let deal = h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();
    assert_eq!(deal.status, DealStatus::WorkSubmitted);
    assert!(deal.payout_pending);

    // The worker retries on millisecond backoffs; wait for it to win.
    let mut settled = None;
    for _ in 0..200 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let current = h
            .engine
            .deadline_expired(&deal.id)
            .await
            .ok()
            .flatten();
        assert!(current.is_none(), "expiry must never fire on a funded deal");
        let stored = ks_deal_lifecycle::ports::outbound::DealRepository::get(
            h.store.as_ref(),
            &deal.id,
        )
        .await
        .unwrap()
        .unwrap();
        if stored.status == DealStatus::Completed {
            settled = Some(stored);
            break;
        }
    }
    let settled = settled.expect("retry worker settled the deal");
    assert!(!settled.payout_pending);
    assert_eq!(h.chain.payouts().len(), 1);
    worker.abort();
}

/// A second confirm while the payout is pending must not double-pay.
#[tokio::test]
async fn confirm_is_idempotent_while_payout_pending() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .submitted_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;
    h.chain.fail_next_payouts(1);

    let deal = h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();
    assert!(deal.payout_pending);

    let again = h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();
    assert!(again.payout_pending);
    assert_eq!(h.chain.payouts().len(), 0);
}

/// Blacklisted users cannot create deals.
#[tokio::test]
async fn blacklisted_creator_is_rejected() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;
    h.engine
        .ban_user(
            ks_deal_lifecycle::Actor::Admin(TelegramId(1)),
            TelegramId(100),
            "fraud".into(),
        )
        .await
        .unwrap();

    let err = h
        .engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .unwrap_err();
    assert!(matches!(err, DealError::UserBlacklisted { user_id } if user_id == TelegramId(100)));
}

/// Creation guards: amount floor, deadline bounds, self-deal.
#[tokio::test]
async fn creation_invariants_are_enforced() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let too_small = h.request(100, 200, dec!(49.99), CommissionPayer::Buyer, 48);
    assert!(matches!(
        h.engine.create_deal(too_small).await.unwrap_err(),
        DealError::InvariantViolation(_)
    ));

    let short_deadline = h.request(100, 200, dec!(100), CommissionPayer::Buyer, 23);
    assert!(matches!(
        h.engine.create_deal(short_deadline).await.unwrap_err(),
        DealError::InvariantViolation(_)
    ));

    let long_deadline = h.request(100, 200, dec!(100), CommissionPayer::Buyer, 721);
    assert!(matches!(
        h.engine.create_deal(long_deadline).await.unwrap_err(),
        DealError::InvariantViolation(_)
    ));

    let mut self_deal = h.request(100, 200, dec!(100), CommissionPayer::Buyer, 48);
    self_deal.counterparty = TelegramId(100);
    assert!(matches!(
        h.engine.create_deal(self_deal).await.unwrap_err(),
        DealError::InvariantViolation(_)
    ));
}

/// Wallet verification failures keep the state and surface a typed error.
#[tokio::test]
async fn invalid_wallet_keeps_the_deal_waiting() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .unwrap();

    let bad = WalletAddress::new("TBadSeller");
    h.chain
        .mark_invalid_wallet(&bad, ks_deal_lifecycle::WalletFault::NotFound);
    let err = h
        .engine
        .provide_wallet(&deal.id, TelegramId(200), bad)
        .await
        .unwrap_err();
    assert!(matches!(err, DealError::WalletInvalid { .. }));

    let stored = ks_deal_lifecycle::ports::outbound::DealRepository::get(
        h.store.as_ref(),
        &deal.id,
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(stored.status, DealStatus::WaitingForSellerWallet);
    assert!(stored.seller_address.is_none());
}
