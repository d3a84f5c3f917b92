//! # KeyShield Runtime
//!
//! Entry point for the Deal Lifecycle Core service.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Initialize telemetry (logging + metric registration)
//! 3. Open the document store (RocksDB, or memory in dev mode)
//! 4. Wire the engine, event bus, ledger handler and adapters
//! 5. Requeue payouts left pending by a previous crash
//! 6. Spawn the monitors and the retry worker
//! 7. Run until SIGINT
//!
//! The Telegram bot, admin console and partner portal are separate
//! processes; they drive this service through its inbound ports.

mod app;

use anyhow::Context;
use keyshield_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

use crate::app::{App, RuntimeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("telemetry init failed")?;

    let config = RuntimeConfig::from_env();
    info!(store = %config.store_kind, data_dir = %config.data_dir, "starting KeyShield core");

    let app = App::build(&config).await.context("wiring failed")?;
    let running = app.start().await.context("startup failed")?;

    tokio::signal::ctrl_c()
        .await
        .context("signal handler failed")?;
    info!("shutdown signal received; stopping");

    running.shutdown().await;
    Ok(())
}
