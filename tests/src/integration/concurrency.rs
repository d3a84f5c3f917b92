//! Races, idempotence and the single-active-deal constraint.

use crate::harness::Harness;
use ks_deal_lifecycle::ports::outbound::DealRepository;
use ks_deal_lifecycle::{
    Actor, CommissionPayer, DealError, DealLifecycleApi, DealStatus, DisputeDecision,
};
use rust_decimal_macros::dec;
use shared_types::{TelegramId, TxHash, HOUR_MS};

/// Deal ids are strictly increasing across successful creations.
#[tokio::test]
async fn deal_ids_are_monotonic() {
    let h = Harness::new();
    for id in [100, 200, 300, 400] {
        h.user(id, &format!("u{id}")).await;
    }

    let first = h
        .engine
        .create_deal(h.request(100, 200, dec!(100), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    let second = h
        .engine
        .create_deal(h.request(300, 400, dec!(100), CommissionPayer::Buyer, 48))
        .await
        .unwrap();

    let a = first.id.counter_value().unwrap();
    let b = second.id.counter_value().unwrap();
    assert!(b > a, "expected {b} > {a}");
}

/// Two concurrent creations sharing a seller: exactly one wins.
#[tokio::test]
async fn active_deal_race_has_one_winner() {
    let h = Harness::new();
    h.user(100, "buyer_a").await;
    h.user(101, "buyer_b").await;
    h.user(200, "seller").await;

    let left = h.engine.create_deal(h.request(100, 200, dec!(100), CommissionPayer::Buyer, 48));
    let right = h.engine.create_deal(h.request(101, 200, dec!(100), CommissionPayer::Buyer, 48));
    let (left, right) = tokio::join!(left, right);

    let winners = [&left, &right].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one creation must win the seller");

    let loser = if left.is_err() { left } else { right };
    assert!(matches!(
        loser.unwrap_err(),
        DealError::UserHasActiveDeal { user_id } if user_id == TelegramId(200)
    ));
}

/// The losing creation leaves no claim behind: the free buyer can deal again.
#[tokio::test]
async fn losing_creation_compensates_its_claims() {
    let h = Harness::new();
    h.user(100, "buyer_a").await;
    h.user(101, "buyer_b").await;
    h.user(200, "seller").await;
    h.user(300, "other_seller").await;

    let left = h.engine.create_deal(h.request(100, 200, dec!(100), CommissionPayer::Buyer, 48));
    let right = h.engine.create_deal(h.request(101, 200, dec!(100), CommissionPayer::Buyer, 48));
    let (left, right) = tokio::join!(left, right);
    let losing_buyer = if left.is_err() { 100 } else { 101 };
    drop((left, right));

    // The buyer whose creation lost must be free for a new deal.
    h.engine
        .create_deal(h.request(losing_buyer, 300, dec!(100), CommissionPayer::Buyer, 48))
        .await
        .expect("losing buyer's claim was rolled back");
}

/// Replaying the same deposit twice performs exactly one transition.
#[tokio::test]
async fn deposit_replay_is_idempotent() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(500), CommissionPayer::Buyer, 48))
        .await
        .unwrap();
    let (deal, _) = h.funded_address(&deal, 200).await;

    let tx = TxHash::new("tx-replay");
    let first = h
        .engine
        .deposit_detected(&deal.id, tx.clone(), dec!(500), 1)
        .await
        .unwrap();
    assert_eq!(first.status, DealStatus::Locked);

    let second = h
        .engine
        .deposit_detected(&deal.id, tx.clone(), dec!(500), 1)
        .await
        .unwrap();
    assert_eq!(second.status, DealStatus::Locked);
    assert_eq!(second.deposit_tx, Some(tx.clone()));

    // A different transaction after locking is a conflict, not a second lock.
    let err = h
        .engine
        .deposit_detected(&deal.id, TxHash::new("tx-late"), dec!(500), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, DealError::Conflict { .. }));
}

/// Expiry after the first success is a no-op.
#[tokio::test]
async fn deadline_expiry_is_idempotent() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(100), CommissionPayer::Buyer, 24))
        .await
        .unwrap();

    h.clock.set(deal.deadline + 1);
    let expired = h.engine.deadline_expired(&deal.id).await.unwrap();
    assert_eq!(expired.unwrap().status, DealStatus::Expired);

    for _ in 0..3 {
        assert!(h.engine.deadline_expired(&deal.id).await.unwrap().is_none());
    }
    // No blockchain interaction on the expiry path.
    assert!(h.chain.payouts().is_empty());
}

/// Two concurrent dispute openings produce exactly one dispute.
#[tokio::test]
async fn dispute_race_has_one_winner() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let (deal, _) = h
        .locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    let left = h
        .engine
        .open_dispute(&deal.id, TelegramId(100), "buyer's case".into(), vec![]);
    let right = h
        .engine
        .open_dispute(&deal.id, TelegramId(200), "seller's case".into(), vec![]);
    let (left, right) = tokio::join!(left, right);

    let winners = [&left, &right].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "a deal carries exactly one dispute");

    let loser = if left.is_err() { left } else { right };
    assert!(matches!(
        loser.unwrap_err(),
        DealError::DisputeAlreadyExists(_)
    ));
}

/// Three straight dispute losses blacklist the loser automatically.
#[tokio::test]
async fn dispute_loss_streak_blacklists() {
    let h = Harness::new();
    h.user(200, "seller").await;

    for round in 0..3u32 {
        let buyer = 100 + i64::from(round);
        h.user(buyer, &format!("buyer{round}")).await;
        let (deal, _) = h
            .locked_deal(buyer, 200, dec!(100), CommissionPayer::Buyer)
            .await;
        h.engine
            .open_dispute(&deal.id, TelegramId(buyer), "bad delivery".into(), vec![])
            .await
            .unwrap();
        h.engine
            .resolve_dispute(
                &deal.id,
                Actor::Admin(TelegramId(1)),
                DisputeDecision::RefundBuyer,
                "upheld".into(),
            )
            .await
            .unwrap();

        let seller = ks_deal_lifecycle::ports::outbound::UserRepository::get(
            h.store.as_ref(),
            TelegramId(200),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(seller.dispute_stats.loss_streak, round + 1);
        assert_eq!(seller.blacklisted, round == 2);
    }

    let seller = ks_deal_lifecycle::ports::outbound::UserRepository::get(
        h.store.as_ref(),
        TelegramId(200),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(
        seller.blacklist_reason.as_deref(),
        Some(ks_deal_lifecycle::BLACKLIST_REASON_DISPUTE_STREAK)
    );
}

/// Terminal transitions free both participants even on the expiry path.
#[tokio::test]
async fn expiry_clears_active_deals() {
    let h = Harness::new();
    h.user(100, "buyer").await;
    h.user(200, "seller").await;

    let deal = h
        .engine
        .create_deal(h.request(100, 200, dec!(100), CommissionPayer::Buyer, 24))
        .await
        .unwrap();
    h.clock.advance(24 * HOUR_MS + 1);
    h.engine.deadline_expired(&deal.id).await.unwrap();

    h.user(300, "fresh_seller").await;
    h.engine
        .create_deal(h.request(100, 300, dec!(100), CommissionPayer::Buyer, 48))
        .await
        .expect("both participants were released");

    let stored = DealRepository::get(h.store.as_ref(), &deal.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DealStatus::Expired);
}
