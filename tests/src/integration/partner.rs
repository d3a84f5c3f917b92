//! Partner ledger accounting.

use crate::harness::Harness;
use ks_deal_lifecycle::service::PartnerService;
use ks_deal_lifecycle::{CommissionPayer, DealFilter, DealLifecycleApi, PartnerApi};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use shared_types::{PlatformCode, TelegramId};

/// Settled deals roll up into the platform stats, and the payout identity
/// `payout + pure_profit = net_profit` holds.
#[tokio::test]
async fn ledger_rolls_up_settled_deals() {
    let h = Harness::new();
    h.platform("acme", dec!(30)).await;
    h.platform_user(100, "buyer", "acme").await;
    h.user(200, "seller").await;

    let deal = h
        .submitted_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;
    assert_eq!(deal.platform_code, Some(PlatformCode::new("acme")));
    h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();

    // The terminal event recomputed the ledger inline.
    let stats = h
        .ledger
        .recompute(&PlatformCode::new("acme"))
        .await
        .unwrap();
    assert_eq!(stats.deals, 1);
    assert_eq!(stats.users, 1);
    assert_eq!(stats.total_volume, dec!(500));
    assert_eq!(stats.total_commission, dec!(25.00));

    // 5 TRX activation + 8 TRX feesaver energy at 0.12 USD.
    assert_eq!(stats.total_trx_spent, dec!(13));
    assert_eq!(stats.total_trx_spent_usdt, dec!(1.56));
    assert_eq!(stats.net_profit, dec!(25.00) - dec!(1.56));
    assert_eq!(stats.payout + stats.platform_pure_profit, stats.net_profit);
    assert_eq!(
        stats.payout,
        (stats.net_profit * dec!(30) / dec!(100)).max(Decimal::ZERO)
    );
}

/// Recompute is idempotent: running it again changes nothing.
#[tokio::test]
async fn recompute_is_idempotent() {
    let h = Harness::new();
    h.platform("acme", dec!(25)).await;
    h.platform_user(100, "buyer", "acme").await;
    h.user(200, "seller").await;

    let deal = h
        .submitted_deal(100, 200, dec!(400), CommissionPayer::Buyer)
        .await;
    h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();

    let code = PlatformCode::new("acme");
    let first = h.ledger.recompute(&code).await.unwrap();
    let second = h.ledger.recompute(&code).await.unwrap();
    assert_eq!(first, second);
}

/// Unsettled deals are excluded from the totals.
#[tokio::test]
async fn only_settled_deals_count() {
    let h = Harness::new();
    h.platform("acme", dec!(50)).await;
    h.platform_user(100, "buyer", "acme").await;
    h.user(200, "seller").await;

    // Locked but not settled: contributes nothing yet.
    h.locked_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;

    let stats = h
        .ledger
        .recompute(&PlatformCode::new("acme"))
        .await
        .unwrap();
    assert_eq!(stats.deals, 0);
    assert_eq!(stats.total_volume, Decimal::ZERO);
    // The sourced user still shows in the user count.
    assert_eq!(stats.users, 1);
}

/// The partner read surface serves stats and hides hidden deals.
#[tokio::test]
async fn partner_api_reads_stats_and_deals() {
    let h = Harness::new();
    h.platform("acme", dec!(30)).await;
    h.platform_user(100, "buyer", "acme").await;
    h.user(200, "seller").await;

    let deal = h
        .submitted_deal(100, 200, dec!(500), CommissionPayer::Buyer)
        .await;
    h.engine.confirm(&deal.id, TelegramId(100)).await.unwrap();

    let api = PartnerService::new(h.store.clone(), h.store.clone());
    let code = PlatformCode::new("acme");

    let stats = api.get_stats(&code).await.unwrap();
    assert_eq!(stats.deals, 1);

    let deals = api.list_deals(&code, DealFilter::default()).await.unwrap();
    assert_eq!(deals.len(), 1);

    // Hide the deal; partner listings must no longer show it.
    use ks_deal_lifecycle::AdminApi;
    h.engine
        .toggle_deal_hidden(ks_deal_lifecycle::Actor::Admin(TelegramId(1)), &deal.id)
        .await
        .unwrap();
    let deals = api.list_deals(&code, DealFilter::default()).await.unwrap();
    assert!(deals.is_empty());
}
