//! Coin ledger service: atomic balance mutations with an append-only audit
//! trail.
//!
//! Every mutation runs as one atomic unit under the wallet's lock: read the
//! balance and sequence, compute, then commit the balance row, the ledger
//! entry and (for awards) the earned-feed row in a single batch write.
//! Concurrent mutations on the same wallet serialize on the lock, so two
//! spends can never both observe the same stale "before" balance. Mutations
//! on different wallets proceed fully in parallel.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

use crate::{
    config::LedgerConfig,
    errors::{CoinvaultResult, LedgerError, StorageError},
    storage::KvStorage,
    types::{CoinEarnRecord, CoinType, LedgerEntry, Page, SourceKind, TransactionKind, WalletBalance},
};

const BALANCE_PREFIX: &str = "balance:";

fn balance_key(wallet: &str) -> Vec<u8> {
    format!("{BALANCE_PREFIX}{wallet}").into_bytes()
}

fn seq_key(wallet: &str) -> Vec<u8> {
    format!("ledger:seq:{wallet}").into_bytes()
}

// Entries sort newest-first by storing an inverted sequence number.
// Key layout: prefix | inv_seq(be)
fn entry_prefix(wallet: &str) -> Vec<u8> {
    format!("ledger:entry:{wallet}:").into_bytes()
}

fn entry_key(wallet: &str, seq: u64) -> Vec<u8> {
    let mut key = entry_prefix(wallet);
    key.extend_from_slice(&(u64::MAX - seq).to_be_bytes());
    key
}

fn earn_prefix(wallet: &str) -> Vec<u8> {
    format!("coins:history:{wallet}:").into_bytes()
}

fn earn_key(wallet: &str, seq: u64) -> Vec<u8> {
    let mut key = earn_prefix(wallet);
    key.extend_from_slice(&(u64::MAX - seq).to_be_bytes());
    key
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> CoinvaultResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::CorruptedData(format!("failed to decode {what}: {e}")).into()
    })
}

fn encode<T: serde::Serialize>(value: &T, what: &str) -> CoinvaultResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("failed to encode {what}: {e}")).into())
}

pub struct CoinLedgerService {
    storage: KvStorage,
    config: LedgerConfig,
    wallet_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CoinLedgerService {
    pub fn new(storage: KvStorage, config: LedgerConfig) -> Self {
        Self {
            storage,
            config,
            wallet_locks: DashMap::new(),
        }
    }

    fn wallet_lock(&self, wallet: &str) -> Arc<Mutex<()>> {
        self.wallet_locks
            .entry(wallet.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn load_balance(&self, wallet: &str) -> CoinvaultResult<Option<WalletBalance>> {
        match self.storage.get(&balance_key(wallet))? {
            Some(bytes) => Ok(Some(decode(&bytes, "wallet balance")?)),
            None => Ok(None),
        }
    }

    fn load_seq(&self, wallet: &str) -> CoinvaultResult<u64> {
        match self.storage.get(&seq_key(wallet))? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::CorruptedData(format!("invalid ledger sequence for {wallet}"))
                })?;
                Ok(u64::from_le_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Balance query; unknown wallets are an error, not an empty default
    pub fn get_balance(&self, wallet: &str) -> CoinvaultResult<WalletBalance> {
        self.load_balance(wallet)?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet.to_string()).into())
    }

    /// Idempotent creation of a zeroed balance row
    pub fn initialize_balance(&self, wallet: &str) -> CoinvaultResult<WalletBalance> {
        let lock = self.wallet_lock(wallet);
        let _guard = lock.lock().unwrap();

        if let Some(existing) = self.load_balance(wallet)? {
            return Ok(existing);
        }
        let balance = WalletBalance::new(wallet, Utc::now());
        self.storage
            .put(&balance_key(wallet), &encode(&balance, "wallet balance")?)?;
        tracing::debug!(wallet, "initialized zero balance");
        Ok(balance)
    }

    /// Credit coins to a wallet, creating the balance row lazily
    #[allow(clippy::too_many_arguments)]
    pub fn award(
        &self,
        wallet: &str,
        coin_type: CoinType,
        amount: i64,
        source_kind: SourceKind,
        source_id: Option<&str>,
        metadata: Option<serde_json::Value>,
        description: Option<&str>,
    ) -> CoinvaultResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount).into());
        }
        self.mutate(
            wallet,
            coin_type,
            amount,
            TransactionKind::Earned,
            source_kind,
            source_id,
            metadata,
            description,
            true,
        )
    }

    /// Debit coins; fails with `InsufficientBalance` inside the atomic unit
    #[allow(clippy::too_many_arguments)]
    pub fn spend(
        &self,
        wallet: &str,
        coin_type: CoinType,
        amount: i64,
        source_kind: SourceKind,
        source_id: Option<&str>,
        metadata: Option<serde_json::Value>,
        description: Option<&str>,
    ) -> CoinvaultResult<LedgerEntry> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount).into());
        }
        self.mutate(
            wallet,
            coin_type,
            -amount,
            TransactionKind::Spent,
            source_kind,
            source_id,
            metadata,
            description,
            true,
        )
    }

    /// Signed correction by an admin. Overdraft is permitted when
    /// `allow_admin_overdraft` is set, so mistakes can be reversed.
    pub fn admin_adjust(
        &self,
        wallet: &str,
        coin_type: CoinType,
        amount: i64,
        reason: &str,
        admin_wallet: &str,
    ) -> CoinvaultResult<LedgerEntry> {
        let metadata = serde_json::json!({
            "reason": reason,
            "admin_wallet": admin_wallet,
        });
        self.mutate(
            wallet,
            coin_type,
            amount,
            TransactionKind::AdminAdjustment,
            SourceKind::Admin,
            None,
            Some(metadata),
            Some(reason),
            !self.config.allow_admin_overdraft,
        )
    }

    /// The single atomic unit every mutation goes through. Holds the wallet
    /// lock across read, check, and batch write; `balance_before`/`after`
    /// come from the same read that feeds the write.
    #[allow(clippy::too_many_arguments)]
    fn mutate(
        &self,
        wallet: &str,
        coin_type: CoinType,
        delta: i64,
        transaction_kind: TransactionKind,
        source_kind: SourceKind,
        source_id: Option<&str>,
        metadata: Option<serde_json::Value>,
        description: Option<&str>,
        floor_checked: bool,
    ) -> CoinvaultResult<LedgerEntry> {
        let lock = self.wallet_lock(wallet);
        let _guard = lock.lock().unwrap();

        let now = Utc::now();
        let mut balance = self
            .load_balance(wallet)?
            .unwrap_or_else(|| WalletBalance::new(wallet, now));

        let before = balance.of(coin_type);
        let after = before + delta;
        if floor_checked && delta < 0 && after < 0 {
            return Err(LedgerError::InsufficientBalance {
                coin_type,
                requested: -delta,
                available: before,
            }
            .into());
        }

        balance.apply(coin_type, delta, now);
        let seq = self.load_seq(wallet)?;

        let entry = LedgerEntry {
            id: seq,
            wallet_address: wallet.to_string(),
            coin_type,
            amount: delta,
            transaction_kind,
            source_kind,
            source_id: source_id.map(str::to_string),
            source_metadata: metadata,
            description: description.map(str::to_string),
            balance_before: before,
            balance_after: after,
            created_at: now,
        };

        let mut puts = vec![
            (balance_key(wallet), encode(&balance, "wallet balance")?),
            (seq_key(wallet), (seq + 1).to_le_bytes().to_vec()),
            (entry_key(wallet, seq), encode(&entry, "ledger entry")?),
        ];

        if transaction_kind == TransactionKind::Earned {
            let earn = CoinEarnRecord {
                wallet_address: wallet.to_string(),
                coin_type,
                amount: delta,
                source_kind,
                source_id: entry.source_id.clone(),
                description: entry.description.clone(),
                earned_at: now,
            };
            puts.push((earn_key(wallet, seq), encode(&earn, "coin earn record")?));
        }

        self.storage.batch_write(&puts, &[])?;

        tracing::debug!(
            wallet,
            coin_type = %coin_type,
            amount = delta,
            kind = ?transaction_kind,
            balance_after = after,
            "ledger mutation committed"
        );
        Ok(entry)
    }

    /// Audit-trail page, newest first, optionally filtered by coin type
    pub fn list_transactions(
        &self,
        wallet: &str,
        limit: usize,
        cursor: Option<&str>,
        coin_type: Option<CoinType>,
    ) -> CoinvaultResult<Page<LedgerEntry>> {
        self.scan_page(wallet, limit, cursor, &entry_prefix(wallet), "ledger entry", |entry: &LedgerEntry| {
            coin_type.map_or(true, |ct| entry.coin_type == ct)
        })
    }

    /// Earned-coins feed page, newest first
    pub fn list_coin_history(
        &self,
        wallet: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> CoinvaultResult<Page<CoinEarnRecord>> {
        self.scan_page(wallet, limit, cursor, &earn_prefix(wallet), "coin earn record", |_: &CoinEarnRecord| true)
    }

    fn scan_page<T, F>(
        &self,
        wallet: &str,
        limit: usize,
        cursor: Option<&str>,
        prefix: &[u8],
        what: &str,
        keep: F,
    ) -> CoinvaultResult<Page<T>>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let limit = limit.clamp(1, self.config.max_page_size);
        let cursor_bytes = match cursor {
            Some(c) => Some(hex::decode(c).map_err(|e| {
                StorageError::CorruptedData(format!("invalid cursor hex: {e}"))
            })?),
            None => None,
        };

        // Scan in chunks and resume each full chunk from its last key: a
        // dense run of filtered-out rows cannot hide older matching entries.
        let scan_limit = (limit * 10).max(50);
        let mut items = Vec::new();
        let mut next_cursor = None;
        let mut resume = cursor_bytes;
        'scan: loop {
            let rows = self
                .storage
                .scan_prefix(prefix, resume.as_deref(), scan_limit)?;
            let exhausted = rows.len() < scan_limit;
            for (key, value) in &rows {
                let item: T = decode(value, what)?;
                if keep(&item) {
                    items.push(item);
                }
                if items.len() >= limit {
                    next_cursor = Some(hex::encode(key));
                    break 'scan;
                }
            }
            if exhausted {
                break;
            }
            resume = rows.last().map(|(key, _)| key.clone());
        }

        tracing::debug!(wallet, count = items.len(), "listed {what} page");
        Ok(Page { items, next_cursor })
    }

    /// Every balance row in the store; used by leaderboard materialization
    pub fn all_balances(&self) -> CoinvaultResult<Vec<WalletBalance>> {
        let rows = self
            .storage
            .scan_prefix(BALANCE_PREFIX.as_bytes(), None, usize::MAX)?;
        rows.iter()
            .map(|(_, value)| decode(value, "wallet balance"))
            .collect()
    }

    /// Wallets ranked by descending balance, total or per coin type
    pub fn top_balances(
        &self,
        limit: usize,
        coin_type: Option<CoinType>,
    ) -> CoinvaultResult<Vec<WalletBalance>> {
        let mut balances = self.all_balances()?;
        match coin_type {
            Some(ct) => balances.sort_by(|a, b| b.of(ct).cmp(&a.of(ct))),
            None => balances.sort_by(|a, b| b.total.cmp(&a.total)),
        }
        balances.truncate(limit);
        Ok(balances)
    }
}
