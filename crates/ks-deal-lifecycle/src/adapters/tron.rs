//! Simulated TRON chain.
//!
//! Deterministic in-process stand-in for the blockchain collaborator, used
//! by the test suite and the dev-mode runtime. Wallet verdicts, payout
//! failures and the energy method are all scriptable, and deposits are
//! emitted on demand through the same broadcast stream the production
//! adapter would feed.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use shared_types::{Asset, TxHash, WalletAddress};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{DealError, EnergyMethod, WalletFault};
use crate::ports::outbound::{BlockchainPort, DepositEvent, MultisigCreated, PayoutReceipt};

/// One release or refund the simulator executed, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRecord {
    pub multisig: WalletAddress,
    pub to: WalletAddress,
    pub amount: Decimal,
    pub asset: Asset,
    pub refund: bool,
    pub tx_hash: TxHash,
}

/// Scriptable in-process chain.
pub struct SimulatedTron {
    deposits: broadcast::Sender<DepositEvent>,
    watched: DashSet<String>,
    bad_wallets: DashMap<String, WalletFault>,
    payout_failures: AtomicU32,
    energy_method: Mutex<EnergyMethod>,
    activation_cost_trx: Decimal,
    tx_seq: AtomicU64,
    payouts: Mutex<Vec<PayoutRecord>>,
}

impl SimulatedTron {
    pub fn new() -> Self {
        let (deposits, _) = broadcast::channel(256);
        Self {
            deposits,
            watched: DashSet::new(),
            bad_wallets: DashMap::new(),
            payout_failures: AtomicU32::new(0),
            energy_method: Mutex::new(EnergyMethod::Feesaver),
            activation_cost_trx: dec!(5),
            tx_seq: AtomicU64::new(0),
            payouts: Mutex::new(Vec::new()),
        }
    }

    fn next_tx(&self, prefix: &str) -> TxHash {
        let n = self.tx_seq.fetch_add(1, Ordering::SeqCst) + 1;
        TxHash::new(format!("{prefix}{n:08x}"))
    }

    /// Fee charged for the current energy method.
    fn energy_fee(&self, method: EnergyMethod) -> Decimal {
        match method {
            EnergyMethod::Feesaver => dec!(8),
            EnergyMethod::Trx => dec!(27),
            EnergyMethod::None => Decimal::ZERO,
        }
    }

    // -------------------------------------------------------------------------
    // Scripting surface
    // -------------------------------------------------------------------------

    /// Make `verify_wallet` reject this address.
    pub fn mark_invalid_wallet(&self, address: &WalletAddress, fault: WalletFault) {
        self.bad_wallets
            .insert(address.as_str().to_string(), fault);
    }

    /// Fail the next `n` release/refund submissions.
    pub fn fail_next_payouts(&self, n: u32) {
        self.payout_failures.store(n, Ordering::SeqCst);
    }

    /// Choose the energy method reported by subsequent payouts.
    pub fn set_energy_method(&self, method: EnergyMethod) {
        *self.energy_method.lock() = method;
    }

    /// Emit a deposit on the shared stream. Returns the transaction hash
    /// so tests can replay it.
    pub fn emit_deposit(
        &self,
        address: &WalletAddress,
        amount: Decimal,
        confirmations: u32,
    ) -> TxHash {
        let tx_hash = self.next_tx("dep");
        self.replay_deposit(address, amount, confirmations, tx_hash.clone());
        tx_hash
    }

    /// Re-emit a deposit with a known hash (at-least-once delivery).
    pub fn replay_deposit(
        &self,
        address: &WalletAddress,
        amount: Decimal,
        confirmations: u32,
        tx_hash: TxHash,
    ) {
        let _ = self.deposits.send(DepositEvent {
            address: address.clone(),
            tx_hash,
            amount,
            confirmations,
        });
    }

    /// Addresses currently watched.
    pub fn watched_addresses(&self) -> Vec<String> {
        self.watched.iter().map(|a| a.clone()).collect()
    }

    /// Every payout executed so far.
    pub fn payouts(&self) -> Vec<PayoutRecord> {
        self.payouts.lock().clone()
    }

    fn take_payout_failure(&self) -> bool {
        self.payout_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn execute_payout(
        &self,
        multisig: &WalletAddress,
        to: &WalletAddress,
        amount: Decimal,
        asset: Asset,
        refund: bool,
    ) -> Result<PayoutReceipt, DealError> {
        if self.take_payout_failure() {
            return Err(DealError::BlockchainUnavailable(
                "simulated node outage".into(),
            ));
        }
        let method = *self.energy_method.lock();
        let tx_hash = self.next_tx(if refund { "ref" } else { "rel" });
        self.payouts.lock().push(PayoutRecord {
            multisig: multisig.clone(),
            to: to.clone(),
            amount,
            asset,
            refund,
            tx_hash: tx_hash.clone(),
        });
        debug!(%multisig, %to, %amount, refund, "simulated payout");
        Ok(PayoutReceipt {
            tx_hash,
            fee_trx: self.energy_fee(method),
            energy_method: method,
        })
    }
}

impl Default for SimulatedTron {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockchainPort for SimulatedTron {
    async fn verify_wallet(&self, address: &WalletAddress) -> Result<(), DealError> {
        if address.as_str().is_empty() {
            return Err(DealError::WalletInvalid {
                fault: WalletFault::BadFormat,
            });
        }
        if let Some(fault) = self.bad_wallets.get(address.as_str()) {
            return Err(DealError::WalletInvalid { fault: *fault });
        }
        Ok(())
    }

    async fn create_multisig(
        &self,
        buyer: &WalletAddress,
        seller: &WalletAddress,
        _service: &WalletAddress,
    ) -> Result<MultisigCreated, DealError> {
        let n = self.tx_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let address = WalletAddress::new(format!(
            "TM{n:06}{}{}",
            &buyer.as_str()[..buyer.as_str().len().min(4)],
            &seller.as_str()[..seller.as_str().len().min(4)],
        ));
        Ok(MultisigCreated {
            address,
            activation_cost_trx: self.activation_cost_trx,
        })
    }

    fn subscribe_deposits(&self, address: &WalletAddress) {
        self.watched.insert(address.as_str().to_string());
    }

    fn deposit_stream(&self) -> broadcast::Receiver<DepositEvent> {
        self.deposits.subscribe()
    }

    async fn release(
        &self,
        multisig: &WalletAddress,
        to: &WalletAddress,
        amount: Decimal,
        asset: Asset,
    ) -> Result<PayoutReceipt, DealError> {
        self.execute_payout(multisig, to, amount, asset, false)
    }

    async fn refund(
        &self,
        multisig: &WalletAddress,
        to: &WalletAddress,
        amount: Decimal,
        asset: Asset,
    ) -> Result<PayoutReceipt, DealError> {
        self.execute_payout(multisig, to, amount, asset, true)
    }
}
