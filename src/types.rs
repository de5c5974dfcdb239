//! Domain model for the virtual economy: coins, ledger entries, loot boxes,
//! leaderboards and prize distribution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Currency denominations held by a wallet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CoinType {
    Experience,
    Achievement,
    Social,
    Premium,
}

impl CoinType {
    pub const ALL: [CoinType; 4] = [
        CoinType::Experience,
        CoinType::Achievement,
        CoinType::Social,
        CoinType::Premium,
    ];
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinType::Experience => write!(f, "experience"),
            CoinType::Achievement => write!(f, "achievement"),
            CoinType::Social => write!(f, "social"),
            CoinType::Premium => write!(f, "premium"),
        }
    }
}

/// Direction of a ledger mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Earned,
    Spent,
    AdminAdjustment,
}

/// Origin of a ledger mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Registration,
    Referral,
    Quest,
    GamePlay,
    Tournament,
    Admin,
    LootBox,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Registration => write!(f, "registration"),
            SourceKind::Referral => write!(f, "referral"),
            SourceKind::Quest => write!(f, "quest"),
            SourceKind::GamePlay => write!(f, "game_play"),
            SourceKind::Tournament => write!(f, "tournament"),
            SourceKind::Admin => write!(f, "admin"),
            SourceKind::LootBox => write!(f, "loot_box"),
        }
    }
}

/// Per-wallet balance row.
///
/// Invariant: `total` equals the sum of the four sub-balances at all times.
/// Mutated only by the coin ledger service, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletBalance {
    pub wallet_address: String,
    pub total: i64,
    pub experience: i64,
    pub achievement: i64,
    pub social: i64,
    pub premium: i64,
    pub last_updated_at: DateTime<Utc>,
}

impl WalletBalance {
    pub fn new(wallet_address: &str, now: DateTime<Utc>) -> Self {
        Self {
            wallet_address: wallet_address.to_string(),
            total: 0,
            experience: 0,
            achievement: 0,
            social: 0,
            premium: 0,
            last_updated_at: now,
        }
    }

    /// Current sub-balance for one coin type
    pub fn of(&self, coin_type: CoinType) -> i64 {
        match coin_type {
            CoinType::Experience => self.experience,
            CoinType::Achievement => self.achievement,
            CoinType::Social => self.social,
            CoinType::Premium => self.premium,
        }
    }

    /// Apply a signed delta to one sub-balance and the total
    pub fn apply(&mut self, coin_type: CoinType, delta: i64, now: DateTime<Utc>) {
        match coin_type {
            CoinType::Experience => self.experience += delta,
            CoinType::Achievement => self.achievement += delta,
            CoinType::Social => self.social += delta,
            CoinType::Premium => self.premium += delta,
        }
        self.total += delta;
        self.last_updated_at = now;
    }

    pub fn sub_balance_sum(&self) -> i64 {
        self.experience + self.achievement + self.social + self.premium
    }
}

/// Append-only audit record of one balance mutation.
///
/// `balance_after == balance_before + amount` for the entry's coin type;
/// entries are immutable once written and are the source of truth for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Per-wallet monotonic sequence number
    pub id: u64,
    pub wallet_address: String,
    pub coin_type: CoinType,
    /// Signed: positive for earns, negative for spends
    pub amount: i64,
    pub transaction_kind: TransactionKind,
    pub source_kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Display-oriented "earned coins" feed row, appended on awards only.
/// Kept separate from the audit ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinEarnRecord {
    pub wallet_address: String,
    pub coin_type: CoinType,
    pub amount: i64,
    pub source_kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub earned_at: DateTime<Utc>,
}

/// One page of a newest-first listing, with an opaque resume cursor
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ============================================================================
// Loot boxes
// ============================================================================

/// Reward payload, dispatched by kind.
///
/// Coins, experience and achievement rewards are issued through the coin
/// ledger immediately; NFT and crypto rewards are fulfilled off-system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardKind {
    Coins { coin_type: CoinType, amount: i64 },
    Experience { amount: i64 },
    Achievement { achievement_id: String, amount: i64 },
    Nft { collection: String, token_id: String },
    Crypto { token: String, amount: f64 },
}

impl RewardKind {
    /// Whether the ledger can settle this reward immediately
    pub fn is_ledger_issued(&self) -> bool {
        matches!(
            self,
            RewardKind::Coins { .. } | RewardKind::Experience { .. } | RewardKind::Achievement { .. }
        )
    }
}

/// One probability-weighted reward attached to a premium box.
/// Rules roll independently; probabilities are not normalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardRule {
    pub reward: RewardKind,
    /// Independent draw probability in [0, 1]
    pub probability: f64,
}

/// Free boxes grant a uniform coin range; premium boxes roll per-rule draws
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LootBoxKind {
    Free {
        min_coin_reward: i64,
        max_coin_reward: i64,
        coin_type: CoinType,
    },
    Premium {
        reward_rules: Vec<RewardRule>,
    },
}

/// Loot box configuration entity. Soft-deleted via `is_active` so open
/// records keep a valid reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LootBoxDefinition {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: LootBoxKind,
    pub cooldown_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_opens_per_day: Option<u32>,
    pub ad_required: bool,
    /// Empty list means any provider is accepted
    #[serde(default)]
    pub allowed_ad_providers: Vec<String>,
    pub requires_premium: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a loot box definition
#[derive(Debug, Clone, Deserialize)]
pub struct NewLootBox {
    pub name: String,
    pub kind: LootBoxKind,
    pub cooldown_minutes: i64,
    #[serde(default)]
    pub max_opens_per_day: Option<u32>,
    #[serde(default)]
    pub ad_required: bool,
    #[serde(default)]
    pub allowed_ad_providers: Vec<String>,
    #[serde(default)]
    pub requires_premium: bool,
}

/// Partial update for a loot box definition; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LootBoxUpdate {
    pub name: Option<String>,
    pub cooldown_minutes: Option<i64>,
    /// `Some(None)` clears the daily cap
    pub max_opens_per_day: Option<Option<u32>>,
    pub ad_required: Option<bool>,
    pub allowed_ad_providers: Option<Vec<String>>,
    pub requires_premium: Option<bool>,
    pub is_active: Option<bool>,
}

/// Ad-watch proof supplied by the client for ad-gated boxes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdWatchData {
    pub ad_watched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watched_at: Option<DateTime<Utc>>,
}

/// Request metadata recorded with each open attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// One reward granted by an open. Ledger-issued kinds are claimed
/// immediately; off-system kinds wait for an external fulfiller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedReward {
    pub reward: RewardKind,
    pub claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Immutable record of one successful open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LootBoxOpenRecord {
    pub open_id: String,
    pub wallet_address: String,
    pub loot_box_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_data: Option<AdWatchData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_info: Option<RequestInfo>,
    pub opened_at: DateTime<Utc>,
    pub rewards: Vec<IssuedReward>,
}

/// Per (wallet, box) cooldown, upserted on every successful open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownRecord {
    pub next_available_at: DateTime<Utc>,
}

/// Per (wallet, box, calendar date) open counter; expires by date key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLimitRecord {
    pub open_count: u32,
}

/// Result of an eligibility probe, evaluated fresh on every call
#[derive(Debug, Clone, Serialize)]
pub struct OpenEligibility {
    pub can_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<crate::errors::IneligibleReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_available_at: Option<DateTime<Utc>>,
}

/// Successful open: the issued rewards and the next cooldown boundary
#[derive(Debug, Clone, Serialize)]
pub struct OpenOutcome {
    pub open_id: String,
    pub rewards: Vec<IssuedReward>,
    pub next_available_at: DateTime<Utc>,
}

/// Aggregate open counters for one box
#[derive(Debug, Clone, Serialize)]
pub struct LootBoxStats {
    pub total_opens: u64,
    pub opens_last_24h: u64,
}

// ============================================================================
// Leaderboards
// ============================================================================

/// User population a ranking is computed over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardSegment {
    All,
    /// Non-premium wallets only
    Free,
    Premium,
}

impl fmt::Display for LeaderboardSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaderboardSegment::All => write!(f, "all"),
            LeaderboardSegment::Free => write!(f, "free"),
            LeaderboardSegment::Premium => write!(f, "premium"),
        }
    }
}

/// Ranking window shape
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    Daily,
    /// Monday-aligned
    Weekly,
    /// Calendar month
    Monthly,
    AllTime,
}

impl fmt::Display for LeaderboardPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaderboardPeriod::Daily => write!(f, "daily"),
            LeaderboardPeriod::Weekly => write!(f, "weekly"),
            LeaderboardPeriod::Monthly => write!(f, "monthly"),
            LeaderboardPeriod::AllTime => write!(f, "all_time"),
        }
    }
}

/// One ranked row: 1-based rank plus the full balance breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub balance: WalletBalance,
}

/// Versioned ranking snapshot for one (segment, period, window)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    pub id: String,
    pub segment: LeaderboardSegment,
    pub period: LeaderboardPeriod,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub built_at: DateTime<Utc>,
    pub entries: Vec<LeaderboardEntry>,
}

/// Snapshot plus the requesting wallet's position, if inside top-N
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardView {
    pub snapshot: LeaderboardSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_entry: Option<LeaderboardEntry>,
}

/// One of a wallet's past appearances across snapshots
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardHistoryItem {
    pub snapshot_id: String,
    pub segment: LeaderboardSegment,
    pub period: LeaderboardPeriod,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub entry: LeaderboardEntry,
}

/// Platform-wide balance aggregates
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardStats {
    pub total_users: u64,
    pub total_coins: i64,
    pub average_coins: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_user: Option<String>,
}

// ============================================================================
// Prize distribution
// ============================================================================

/// Input to the prize calculator: what one participant burned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrizeContribution {
    pub wallet_address: String,
    pub coins_burned: i64,
}

/// Proportional payout for one participant. `prize_amount` is authoritative;
/// `prize_share_bps` is informational only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrizeResult {
    pub wallet_address: String,
    pub prize_share_bps: u32,
    pub prize_amount: f64,
}

/// Per-participant settlement outcome after invoking the chain signer
#[derive(Debug, Clone, Serialize)]
pub struct SettlementRecord {
    pub wallet_address: String,
    pub prize_share_bps: u32,
    pub prize_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
