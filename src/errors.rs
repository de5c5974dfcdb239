//! Error taxonomy for the coinvault economy engine.
//!
//! Every fallible operation returns [`CoinvaultResult`]. Mutation failures
//! always leave stored state unchanged: checks run before the single batch
//! write that commits an operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::CoinType;

/// Root error type for all coinvault operations
#[derive(Debug, Error)]
pub enum CoinvaultError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("loot box error: {0}")]
    LootBox(#[from] LootBoxError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Coin ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Award/spend amounts must be strictly positive.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("insufficient {coin_type} balance: requested {requested}, available {available}")]
    InsufficientBalance {
        coin_type: CoinType,
        requested: i64,
        available: i64,
    },

    #[error("wallet not found: {0}")]
    WalletNotFound(String),
}

/// Loot box resolver errors
#[derive(Debug, Error)]
pub enum LootBoxError {
    #[error("loot box not found: {0}")]
    NotFound(String),

    /// The wallet failed an eligibility gate. Carries a machine-readable
    /// reason and, for time-based gates, when the box becomes available.
    #[error("not eligible: {reason}")]
    Ineligible {
        reason: IneligibleReason,
        next_available_at: Option<DateTime<Utc>>,
    },

    #[error("ad watch required before opening")]
    AdRequired,
}

/// Why an open attempt was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    BoxInactive,
    PremiumRequired,
    CooldownActive,
    DailyLimitReached,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::BoxInactive => write!(f, "loot box is inactive"),
            IneligibleReason::PremiumRequired => write!(f, "premium profile required"),
            IneligibleReason::CooldownActive => write!(f, "cooldown active"),
            IneligibleReason::DailyLimitReached => write!(f, "daily limit reached"),
        }
    }
}

/// Tournament settlement errors
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("settlement signer not configured")]
    SignerNotConfigured,

    #[error("transfer failed for {wallet}: {reason}")]
    TransferFailed { wallet: String, reason: String },
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Backing-store errors, surfaced rather than retried
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

impl From<rocksdb::Error> for CoinvaultError {
    fn from(e: rocksdb::Error) -> Self {
        CoinvaultError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

/// Convenience type alias for Results
pub type CoinvaultResult<T> = Result<T, CoinvaultError>;
