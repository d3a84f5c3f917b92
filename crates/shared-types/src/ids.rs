//! # Identifiers
//!
//! Newtype identifiers used across the deal lifecycle. All of them persist
//! as plain strings or integers; the newtypes exist so the compiler keeps a
//! buyer id from ever standing in for a deal id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram numeric user id. Primary key for users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelegramId(pub i64);

impl fmt::Display for TelegramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable deal identifier, formatted `D-<n>` with `n` allocated
/// from the `deal_id` counter. No zero padding, base-10.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(String);

impl DealId {
    /// Build an id from a freshly allocated counter value.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("D-{n}"))
    }

    /// Re-wrap an id read back from persistence.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The string form, e.g. `D-17`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric counter component, if the id is well-formed.
    pub fn counter_value(&self) -> Option<u64> {
        self.0.strip_prefix("D-").and_then(|n| n.parse().ok())
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short immutable partner/platform code (e.g. `acme`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformCode(String);

impl PlatformCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A TRON transaction hash, hex-encoded by the chain collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A TRON base58 wallet address.
///
/// The core never validates the checksum itself; activation and format
/// checks are delegated to the blockchain collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
