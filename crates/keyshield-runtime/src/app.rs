//! Application wiring.
//!
//! Builds every component once at process init with injected dependencies
//! (no singletons, no module-level mutable state) and tears them down on
//! shutdown.

use anyhow::{bail, Context};
use ks_deal_lifecycle::adapters::{
    CachedPriceOracle, HttpRateSource, MemoryStore, RateSource, RocksDbConfig, RocksDbStore,
    SimulatedTron, StaticRateSource, TracingNotifier,
};
use ks_deal_lifecycle::service::{
    DeadlineMonitor, DealLifecycleEngine, DepositMonitor, DisputeEngine, EngineDeps,
    LedgerRecomputeHandler, PartnerLedger, PartnerService, PayoutQueue, PayoutRetryWorker,
};
use ks_deal_lifecycle::{
    AuditSink, BlockchainPort, CounterStore, DealEventBus, DealRepository, DisputeRepository,
    EngineConfig, NotificationPort, PlatformRepository, PriceOracle, SessionStore, UserRepository,
};
use rust_decimal::Decimal;
use shared_types::{Clock, SystemClock, WalletAddress};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Runtime configuration from environment variables.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `KS_STORE` | `rocksdb` | `rocksdb` or `memory` (dev) |
/// | `KS_DATA_DIR` | `./data/keyshield` | RocksDB directory |
/// | `KS_SERVICE_WALLET` | built-in dev key | Service key of the 2-of-3 multisig |
/// | `KS_RATE_URL` | none | TRX/USD ticker endpoint; static dev rate when unset |
/// | `KS_FALLBACK_TRX_PRICE` | `0.12` | Rate used when the feed is down |
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub store_kind: String,
    pub data_dir: String,
    pub service_wallet: Option<String>,
    pub rate_url: Option<String>,
    pub fallback_trx_price: Decimal,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            store_kind: env::var("KS_STORE").unwrap_or_else(|_| "rocksdb".to_string()),
            data_dir: env::var("KS_DATA_DIR").unwrap_or_else(|_| "./data/keyshield".to_string()),
            service_wallet: env::var("KS_SERVICE_WALLET").ok(),
            rate_url: env::var("KS_RATE_URL").ok(),
            fallback_trx_price: env::var("KS_FALLBACK_TRX_PRICE")
                .ok()
                .and_then(|raw| Decimal::from_str(&raw).ok())
                .unwrap_or_else(|| Decimal::new(12, 2)),
        }
    }
}

/// Every repository trait object the wiring hands out, backed by one store.
struct Stores {
    deals: Arc<dyn DealRepository>,
    users: Arc<dyn UserRepository>,
    disputes: Arc<dyn DisputeRepository>,
    platforms: Arc<dyn PlatformRepository>,
    counters: Arc<dyn CounterStore>,
    audit: Arc<dyn AuditSink>,
    sessions: Arc<dyn SessionStore>,
}

impl Stores {
    fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            deals: store.clone(),
            users: store.clone(),
            disputes: store.clone(),
            platforms: store.clone(),
            counters: store.clone(),
            audit: store.clone(),
            sessions: store,
        }
    }

    fn from_rocksdb(store: Arc<RocksDbStore>) -> Self {
        Self {
            deals: store.clone(),
            users: store.clone(),
            disputes: store.clone(),
            platforms: store.clone(),
            counters: store.clone(),
            audit: store.clone(),
            sessions: store,
        }
    }
}

/// The wired application, before its background tasks run.
pub struct App {
    engine: Arc<DealLifecycleEngine>,
    deposit_monitor: DepositMonitor,
    deadline_monitor: DeadlineMonitor,
    retry_worker: PayoutRetryWorker,
    sessions: Arc<dyn SessionStore>,
    session_ttl_sweep: Duration,
    pub dispute_engine: Arc<DisputeEngine>,
    pub partner_api: Arc<PartnerService>,
}

/// The application with its background tasks running.
pub struct RunningApp {
    engine: Arc<DealLifecycleEngine>,
    sessions: Arc<dyn SessionStore>,
    handles: Vec<JoinHandle<()>>,
    pub dispute_engine: Arc<DisputeEngine>,
    pub partner_api: Arc<PartnerService>,
}

impl App {
    /// Wire everything. No tasks run yet.
    pub async fn build(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let stores = match config.store_kind.as_str() {
            "memory" => Stores::from_memory(Arc::new(MemoryStore::new(clock.clone()))),
            "rocksdb" => {
                let rocks = RocksDbStore::open(
                    &RocksDbConfig {
                        path: config.data_dir.clone(),
                        ..RocksDbConfig::default()
                    },
                    clock.clone(),
                )
                .context("opening RocksDB")?;
                Stores::from_rocksdb(Arc::new(rocks))
            }
            other => bail!("unknown KS_STORE '{other}'"),
        };

        // The TRON collaborator runs as its own service; the simulated
        // chain stands in until its adapter is wired via KS_TRON_ENDPOINT.
        let chain: Arc<SimulatedTron> = Arc::new(SimulatedTron::new());

        let rate_source: Arc<dyn RateSource> = match &config.rate_url {
            Some(url) => Arc::new(HttpRateSource::new(url.clone())),
            None => Arc::new(StaticRateSource(config.fallback_trx_price)),
        };
        let oracle: Arc<dyn PriceOracle> = Arc::new(
            CachedPriceOracle::new(rate_source, clock.clone())
                .with_fallback(config.fallback_trx_price),
        );

        let notifier: Arc<dyn NotificationPort> = Arc::new(TracingNotifier);
        let events = Arc::new(DealEventBus::new());

        let ledger = Arc::new(PartnerLedger::new(
            stores.deals.clone(),
            stores.users.clone(),
            stores.platforms.clone(),
        ));
        events.register(Arc::new(LedgerRecomputeHandler::new(ledger)));

        let mut engine_config = EngineConfig::default();
        if let Some(wallet) = &config.service_wallet {
            engine_config.service_wallet = WalletAddress::new(wallet.clone());
        }

        let (payout_queue, payout_rx) = PayoutQueue::channel();
        let engine = Arc::new(DealLifecycleEngine::new(
            engine_config.clone(),
            EngineDeps {
                clock: clock.clone(),
                deals: stores.deals.clone(),
                users: stores.users.clone(),
                disputes: stores.disputes.clone(),
                counters: stores.counters.clone(),
                audit: stores.audit.clone(),
                chain: chain.clone(),
                oracle,
                notifier: notifier.clone(),
                events,
            },
            payout_queue.clone(),
        ));

        let retry_worker = PayoutRetryWorker::new(
            engine.clone(),
            payout_rx,
            payout_queue,
            engine_config.payout_retry.clone(),
            clock.clone(),
        );
        let deposit_monitor = DepositMonitor::new(
            chain.clone() as Arc<dyn BlockchainPort>,
            stores.deals.clone(),
            engine.clone(),
            stores.audit.clone(),
            clock.clone(),
        );
        let deadline_monitor = DeadlineMonitor::new(
            stores.deals.clone(),
            engine.clone(),
            notifier,
            clock.clone(),
            engine_config,
        );

        let dispute_engine = Arc::new(DisputeEngine::new(stores.disputes.clone(), clock));
        let partner_api = Arc::new(PartnerService::new(
            stores.deals.clone(),
            stores.platforms.clone(),
        ));

        Ok(Self {
            engine,
            deposit_monitor,
            deadline_monitor,
            retry_worker,
            sessions: stores.sessions,
            session_ttl_sweep: Duration::from_secs(60),
            dispute_engine,
            partner_api,
        })
    }

    /// Recover pending work and spawn the background tasks.
    pub async fn start(self) -> anyhow::Result<RunningApp> {
        let recovered = self
            .engine
            .recover_pending_payouts()
            .await
            .context("payout recovery failed")?;
        if recovered > 0 {
            info!(recovered, "requeued pending payouts");
        }

        let mut handles = vec![
            self.deposit_monitor.spawn(),
            self.deadline_monitor.spawn(),
            self.retry_worker.spawn(),
        ];

        let sessions = self.sessions.clone();
        let sweep = self.session_ttl_sweep;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match sessions.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "expired sessions purged"),
                    Err(err) => tracing::warn!(%err, "session purge failed"),
                }
            }
        }));

        Ok(RunningApp {
            engine: self.engine,
            sessions: self.sessions,
            handles,
            dispute_engine: self.dispute_engine,
            partner_api: self.partner_api,
        })
    }
}

impl RunningApp {
    /// Abort the background tasks.
    pub async fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
        info!("background tasks stopped");
    }

    /// The engine, for embedders driving the inbound ports directly.
    pub fn engine(&self) -> Arc<DealLifecycleEngine> {
        self.engine.clone()
    }

    /// The session store, for input-flow buffering.
    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.sessions.clone()
    }
}
