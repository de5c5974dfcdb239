//! Coinvault - Virtual-Economy Engine
//!
//! Issues, debits and audits a multi-denomination in-platform currency,
//! resolves probabilistic loot box reward draws, materializes periodic
//! leaderboards over balances, and settles competitive-event prize pools.
//!
//! The engine is transport-agnostic: upstream request handling performs
//! authentication and validation and hands over verified wallet addresses;
//! the engine answers with plain data structures or taxonomy errors.

pub mod config;
pub mod errors;
pub mod leaderboard;
pub mod ledger;
pub mod lootbox;
pub mod prize;
pub mod settlement;
pub mod storage;
pub mod traits;
pub mod types;

pub use config::{ConfigLoader, EconomyConfig};
pub use errors::{CoinvaultError, CoinvaultResult, IneligibleReason};
pub use leaderboard::LeaderboardMaterializer;
pub use ledger::CoinLedgerService;
pub use lootbox::LootBoxResolver;
pub use storage::KvStorage;
pub use traits::{ChainSigner, PremiumStatusProvider};
pub use types::{
    CoinType, LeaderboardPeriod, LeaderboardSegment, LootBoxDefinition, LootBoxKind,
    PrizeContribution, RewardKind, SourceKind, TransactionKind, WalletBalance,
};
