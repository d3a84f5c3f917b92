//! Test fixture for the lifecycle core.
//!
//! Builds the engine over the in-memory store, a hand-driven clock, the
//! simulated TRON chain and a recording notifier, and offers helpers that
//! walk deals to common lifecycle points.

use ks_deal_lifecycle::adapters::{MemoryStore, RecordingNotifier, SimulatedTron};
use ks_deal_lifecycle::service::{
    DeadlineMonitor, DealLifecycleEngine, DepositMonitor, DisputeEngine, EngineDeps,
    LedgerRecomputeHandler, PartnerLedger, PayoutQueue, PayoutRetryWorker,
};
use ks_deal_lifecycle::{
    CommissionPayer, CreateDealRequest, Deal, DealEventBus, DealLifecycleApi, EngineConfig,
    PayoutRetryPolicy, Platform, PriceOracle, Role, User,
};
use ks_deal_lifecycle::adapters::StaticRateSource;
use ks_deal_lifecycle::adapters::CachedPriceOracle;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use shared_types::{Asset, ManualClock, PlatformCode, TelegramId, TxHash, WalletAddress, HOUR_MS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use ks_deal_lifecycle::service::PayoutJob;
use ks_deal_lifecycle::ports::outbound::UserRepository;
use ks_deal_lifecycle::ports::outbound::PlatformRepository;

/// A fixed, readable start instant (2024-01-01T00:00:00Z).
pub const T0: u64 = 1_704_067_200_000;

/// The assembled core with every fake exposed for scripting.
pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub chain: Arc<SimulatedTron>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: Arc<DealEventBus>,
    pub engine: Arc<DealLifecycleEngine>,
    pub ledger: Arc<PartnerLedger>,
    pub dispute_engine: Arc<DisputeEngine>,
    payout_rx: Mutex<Option<UnboundedReceiver<PayoutJob>>>,
    payout_queue: PayoutQueue,
    config: EngineConfig,
}

impl Harness {
    /// Default harness: fast retries, everything else at production values.
    pub fn new() -> Self {
        let mut config = EngineConfig::default();
        config.payout_retry = PayoutRetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            horizon_ms: 24 * HOUR_MS,
        };
        Self::with_config(config)
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = ManualClock::at(T0);
        let clock_arc: Arc<ManualClock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new(clock_arc.clone()));
        let chain = Arc::new(SimulatedTron::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let events = Arc::new(DealEventBus::new());
        let oracle: Arc<dyn PriceOracle> = Arc::new(CachedPriceOracle::new(
            Arc::new(StaticRateSource(dec!(0.12))),
            clock_arc.clone(),
        ));

        let ledger = Arc::new(PartnerLedger::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        events.register(Arc::new(LedgerRecomputeHandler::new(ledger.clone())));

        let (payout_queue, payout_rx) = PayoutQueue::channel();
        let engine = Arc::new(DealLifecycleEngine::new(
            config.clone(),
            EngineDeps {
                clock: clock_arc.clone(),
                deals: store.clone(),
                users: store.clone(),
                disputes: store.clone(),
                counters: store.clone(),
                audit: store.clone(),
                chain: chain.clone(),
                oracle,
                notifier: notifier.clone(),
                events: events.clone(),
            },
            payout_queue.clone(),
        ));
        let dispute_engine = Arc::new(DisputeEngine::new(store.clone(), clock_arc));

        Self {
            clock,
            store,
            chain,
            notifier,
            events,
            engine,
            ledger,
            dispute_engine,
            payout_rx: Mutex::new(Some(payout_rx)),
            payout_queue,
            config,
        }
    }

    /// Spawn the payout retry worker against this harness.
    pub fn spawn_retry_worker(&self) -> tokio::task::JoinHandle<()> {
        let rx = self
            .payout_rx
            .lock()
            .take()
            .expect("retry worker already spawned");
        PayoutRetryWorker::new(
            self.engine.clone(),
            rx,
            self.payout_queue.clone(),
            self.config.payout_retry.clone(),
            Arc::new(self.clock.clone()),
        )
        .spawn()
    }

    /// Deposit monitor wired to this harness's chain and engine.
    pub fn deposit_monitor(&self) -> DepositMonitor {
        DepositMonitor::new(
            self.chain.clone(),
            self.store.clone(),
            self.engine.clone(),
            self.store.clone(),
            Arc::new(self.clock.clone()),
        )
    }

    /// Deadline monitor wired to this harness.
    pub fn deadline_monitor(&self) -> DeadlineMonitor {
        DeadlineMonitor::new(
            self.store.clone(),
            self.engine.clone(),
            self.notifier.clone(),
            Arc::new(self.clock.clone()),
            self.config.clone(),
        )
    }

    /// Register a user.
    pub async fn user(&self, id: i64, handle: &str) -> User {
        let user = User::new(TelegramId(id), handle, self.clock.now_ms());
        UserRepository::insert(self.store.as_ref(), &user)
            .await
            .expect("user insert");
        user
    }

    /// Register a user sourced by a platform.
    pub async fn platform_user(&self, id: i64, handle: &str, code: &str) -> User {
        let mut user = User::new(TelegramId(id), handle, self.clock.now_ms());
        user.platform_code = Some(PlatformCode::new(code));
        UserRepository::insert(self.store.as_ref(), &user)
            .await
            .expect("user insert");
        user
    }

    /// Register a platform with the given profit share.
    pub async fn platform(&self, code: &str, share_percent: Decimal) -> Platform {
        let platform = Platform::new(PlatformCode::new(code), code, "hash", share_percent);
        PlatformRepository::insert(self.store.as_ref(), &platform)
            .await
            .expect("platform insert");
        platform
    }

    /// A buyer-created USDT deal with the buyer wallet already provided.
    pub fn request(
        &self,
        buyer: i64,
        seller: i64,
        amount: Decimal,
        payer: CommissionPayer,
        deadline_hours: u64,
    ) -> CreateDealRequest {
        CreateDealRequest {
            creator: TelegramId(buyer),
            counterparty: TelegramId(seller),
            creator_role: Role::Buyer,
            product: "test product".into(),
            description: "integration fixture".into(),
            amount,
            asset: Asset::Usdt,
            commission_payer: payer,
            deadline_hours,
            creator_wallet: Some(WalletAddress::new(format!("TBuyer{buyer}"))),
        }
    }

    /// Create a deal and walk it to `waiting_for_deposit`.
    pub async fn funded_address(&self, deal: &Deal, seller: i64) -> (Deal, WalletAddress) {
        let deal = self
            .engine
            .provide_wallet(
                &deal.id,
                TelegramId(seller),
                WalletAddress::new(format!("TSeller{seller}")),
            )
            .await
            .expect("seller wallet");
        let multisig = deal.multisig_address.clone().expect("multisig created");
        (deal, multisig)
    }

    /// Walk a fresh deal to `locked` with an exact deposit.
    pub async fn locked_deal(
        &self,
        buyer: i64,
        seller: i64,
        amount: Decimal,
        payer: CommissionPayer,
    ) -> (Deal, TxHash) {
        let deal = self
            .engine
            .create_deal(self.request(buyer, seller, amount, payer, 48))
            .await
            .expect("create");
        let (deal, _multisig) = self.funded_address(&deal, seller).await;
        let tx = TxHash::new(format!("txdep-{}", deal.id));
        let deal = self
            .engine
            .deposit_detected(&deal.id, tx.clone(), amount, 1)
            .await
            .expect("deposit");
        (deal, tx)
    }

    /// Walk a fresh deal to `work_submitted`.
    pub async fn submitted_deal(
        &self,
        buyer: i64,
        seller: i64,
        amount: Decimal,
        payer: CommissionPayer,
    ) -> Deal {
        let (deal, _) = self.locked_deal(buyer, seller, amount, payer).await;
        self.engine
            .submit_work(&deal.id, TelegramId(seller), "done".into())
            .await
            .expect("submit work")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
