//! Leaderboard materializer: time-windowed rankings over current balances,
//! cached as versioned snapshots.
//!
//! A snapshot is rebuilt on read when stale. The rebuild assembles the full
//! ranked entry list in memory and swaps it in with a single snapshot write,
//! so readers never observe a half-built window. Rebuild failures are logged
//! and the stale snapshot is served; rebuild is best-effort.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::LeaderboardConfig,
    errors::{CoinvaultResult, StorageError},
    ledger::CoinLedgerService,
    storage::KvStorage,
    traits::PremiumStatusProvider,
    types::{
        LeaderboardEntry, LeaderboardHistoryItem, LeaderboardPeriod, LeaderboardSegment,
        LeaderboardSnapshot, LeaderboardStats, LeaderboardView,
    },
};

const ACTIVE_PREFIX: &str = "leaderboard:active:";
const SNAPSHOT_PREFIX: &str = "leaderboard:snapshot:";

fn active_key(segment: LeaderboardSegment, period: LeaderboardPeriod) -> Vec<u8> {
    format!("{ACTIVE_PREFIX}{segment}:{period}").into_bytes()
}

fn snapshot_key(id: &str) -> Vec<u8> {
    format!("{SNAPSHOT_PREFIX}{id}").into_bytes()
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

/// `[start, end)` window containing `now` for the given period shape
pub fn period_window(period: LeaderboardPeriod, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    match period {
        LeaderboardPeriod::Daily => {
            let start = today.and_time(NaiveTime::MIN).and_utc();
            (start, start + Duration::days(1))
        }
        LeaderboardPeriod::Weekly => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            let start = monday.and_time(NaiveTime::MIN).and_utc();
            (start, start + Duration::days(7))
        }
        LeaderboardPeriod::Monthly => {
            let first = today.with_day(1).expect("day 1 is always valid");
            let (next_year, next_month) = if first.month() == 12 {
                (first.year() + 1, 1)
            } else {
                (first.year(), first.month() + 1)
            };
            let next_first =
                NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("day 1 is always valid");
            (
                first.and_time(NaiveTime::MIN).and_utc(),
                next_first.and_time(NaiveTime::MIN).and_utc(),
            )
        }
        LeaderboardPeriod::AllTime => {
            let far_future = NaiveDate::from_ymd_opt(9999, 1, 1)
                .expect("fixed date")
                .and_time(NaiveTime::MIN)
                .and_utc();
            (DateTime::UNIX_EPOCH, far_future)
        }
    }
}

pub struct LeaderboardMaterializer {
    storage: KvStorage,
    ledger: Arc<CoinLedgerService>,
    premium: Arc<dyn PremiumStatusProvider>,
    config: LeaderboardConfig,
}

impl LeaderboardMaterializer {
    pub fn new(
        storage: KvStorage,
        ledger: Arc<CoinLedgerService>,
        premium: Arc<dyn PremiumStatusProvider>,
        config: LeaderboardConfig,
    ) -> Self {
        Self {
            storage,
            ledger,
            premium,
            config,
        }
    }

    /// Active snapshot for the window containing now, created on first use
    /// and rebuilt in place when stale.
    pub fn get_or_create(
        &self,
        segment: LeaderboardSegment,
        period: LeaderboardPeriod,
    ) -> CoinvaultResult<LeaderboardSnapshot> {
        let now = Utc::now();
        let (start, end) = period_window(period, now);

        let mut snapshot = match self.load_active(segment, period)? {
            Some(existing) if existing.start_date <= now && now < existing.end_date => existing,
            superseded => self.create_snapshot(segment, period, start, end, superseded)?,
        };

        if self.is_stale(&snapshot, now) {
            if let Err(e) = self.rebuild(&mut snapshot, now) {
                tracing::warn!(
                    segment = %segment,
                    period = %period,
                    error = %e,
                    "leaderboard rebuild failed, serving stale snapshot"
                );
            }
        }

        Ok(snapshot)
    }

    /// Snapshot plus the wallet's own position (absent outside top-N)
    pub fn get_with_user_rank(
        &self,
        segment: LeaderboardSegment,
        period: LeaderboardPeriod,
        wallet: &str,
    ) -> CoinvaultResult<LeaderboardView> {
        let snapshot = self.get_or_create(segment, period)?;
        let user_entry = snapshot
            .entries
            .iter()
            .find(|entry| entry.balance.wallet_address == wallet)
            .cloned();
        Ok(LeaderboardView {
            user_rank: user_entry.as_ref().map(|entry| entry.rank),
            user_entry,
            snapshot,
        })
    }

    /// A wallet's past appearances across all snapshots, newest first
    pub fn user_history(&self, wallet: &str, limit: usize) -> CoinvaultResult<Vec<LeaderboardHistoryItem>> {
        let rows = self
            .storage
            .scan_prefix(SNAPSHOT_PREFIX.as_bytes(), None, usize::MAX)?;

        let mut items = Vec::new();
        for (_, value) in rows {
            let snapshot: LeaderboardSnapshot = decode(&value, "leaderboard snapshot")?;
            if let Some(entry) = snapshot
                .entries
                .iter()
                .find(|entry| entry.balance.wallet_address == wallet)
            {
                items.push(LeaderboardHistoryItem {
                    snapshot_id: snapshot.id.clone(),
                    segment: snapshot.segment,
                    period: snapshot.period,
                    start_date: snapshot.start_date,
                    end_date: snapshot.end_date,
                    entry: entry.clone(),
                });
            }
        }
        items.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        items.truncate(limit);
        Ok(items)
    }

    /// Platform-wide aggregates over all balance rows
    pub fn stats(&self) -> CoinvaultResult<LeaderboardStats> {
        let balances = self.ledger.all_balances()?;
        let total_users = balances.len() as u64;
        let total_coins: i64 = balances.iter().map(|b| b.total).sum();
        let average_coins = if total_users == 0 {
            0.0
        } else {
            total_coins as f64 / total_users as f64
        };
        let top_user = balances
            .iter()
            .max_by_key(|b| b.total)
            .map(|b| b.wallet_address.clone());
        Ok(LeaderboardStats {
            total_users,
            total_coins,
            average_coins,
            top_user,
        })
    }

    /// Mark snapshots whose window has closed as inactive. Idempotent
    /// housekeeping, safe to run on a timer. Returns how many were retired.
    pub fn deactivate_expired(&self) -> CoinvaultResult<usize> {
        let now = Utc::now();
        let rows = self
            .storage
            .scan_prefix(ACTIVE_PREFIX.as_bytes(), None, usize::MAX)?;

        let mut retired = 0;
        for (pointer_key, value) in rows {
            let id = String::from_utf8(value).map_err(|_| {
                StorageError::CorruptedData("invalid active snapshot pointer".to_string())
            })?;
            let Some(bytes) = self.storage.get(&snapshot_key(&id))? else {
                // dangling pointer, drop it
                self.storage.delete(&pointer_key)?;
                continue;
            };
            let mut snapshot: LeaderboardSnapshot = decode(&bytes, "leaderboard snapshot")?;
            if snapshot.end_date <= now {
                snapshot.is_active = false;
                self.storage.batch_write(
                    &[(snapshot_key(&id), encode(&snapshot, "leaderboard snapshot")?)],
                    &[pointer_key],
                )?;
                retired += 1;
            }
        }
        if retired > 0 {
            tracing::info!(retired, "deactivated expired leaderboard snapshots");
        }
        Ok(retired)
    }

    fn load_active(
        &self,
        segment: LeaderboardSegment,
        period: LeaderboardPeriod,
    ) -> CoinvaultResult<Option<LeaderboardSnapshot>> {
        let Some(pointer) = self.storage.get(&active_key(segment, period))? else {
            return Ok(None);
        };
        let id = String::from_utf8(pointer).map_err(|_| {
            StorageError::CorruptedData("invalid active snapshot pointer".to_string())
        })?;
        match self.storage.get(&snapshot_key(&id))? {
            Some(bytes) => Ok(Some(decode(&bytes, "leaderboard snapshot")?)),
            None => Ok(None),
        }
    }

    fn create_snapshot(
        &self,
        segment: LeaderboardSegment,
        period: LeaderboardPeriod,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        superseded: Option<LeaderboardSnapshot>,
    ) -> CoinvaultResult<LeaderboardSnapshot> {
        let snapshot = LeaderboardSnapshot {
            id: Uuid::new_v4().to_string(),
            segment,
            period,
            start_date: start,
            end_date: end,
            is_active: true,
            // forces an immediate rebuild on first read
            built_at: DateTime::UNIX_EPOCH,
            entries: Vec::new(),
        };
        let mut puts = vec![
            (
                snapshot_key(&snapshot.id),
                encode(&snapshot, "leaderboard snapshot")?,
            ),
            (active_key(segment, period), snapshot.id.clone().into_bytes()),
        ];
        // the snapshot whose window just closed is archived in the same
        // batch that moves the pointer; it stays readable, marked inactive
        if let Some(mut old) = superseded {
            old.is_active = false;
            puts.push((snapshot_key(&old.id), encode(&old, "leaderboard snapshot")?));
        }
        self.storage.batch_write(&puts, &[])?;
        tracing::debug!(segment = %segment, period = %period, id = %snapshot.id, "created leaderboard snapshot");
        Ok(snapshot)
    }

    /// Stale when empty, or when the newest entry's balance timestamp has
    /// fallen behind the staleness threshold.
    fn is_stale(&self, snapshot: &LeaderboardSnapshot, now: DateTime<Utc>) -> bool {
        let newest = snapshot
            .entries
            .iter()
            .map(|entry| entry.balance.last_updated_at)
            .max();
        match newest {
            Some(ts) => now - ts > Duration::seconds(self.config.staleness_secs),
            None => true,
        }
    }

    fn rebuild(&self, snapshot: &mut LeaderboardSnapshot, now: DateTime<Utc>) -> CoinvaultResult<()> {
        let balances = self.ledger.all_balances()?;

        let mut ranked = Vec::new();
        for balance in balances {
            let keep = match snapshot.segment {
                LeaderboardSegment::All => true,
                LeaderboardSegment::Free => !self.premium.is_premium(&balance.wallet_address)?,
                LeaderboardSegment::Premium => self.premium.is_premium(&balance.wallet_address)?,
            };
            if keep {
                ranked.push(balance);
            }
        }
        // descending total; ties keep the underlying scan order
        ranked.sort_by(|a, b| b.total.cmp(&a.total));
        ranked.truncate(self.config.top_n);

        snapshot.entries = ranked
            .into_iter()
            .enumerate()
            .map(|(i, balance)| LeaderboardEntry {
                rank: i as u32 + 1,
                balance,
            })
            .collect();
        snapshot.built_at = now;

        // single write: readers see either the old or the new entry list
        self.storage.put(
            &snapshot_key(&snapshot.id),
            &encode(snapshot, "leaderboard snapshot")?,
        )?;
        tracing::debug!(
            id = %snapshot.id,
            entries = snapshot.entries.len(),
            "rebuilt leaderboard snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::types::{CoinType, SourceKind};
    use chrono::{TimeZone, Weekday};
    use tempfile::TempDir;

    struct PremiumSet(Vec<String>);

    impl PremiumStatusProvider for PremiumSet {
        fn is_premium(&self, wallet: &str) -> CoinvaultResult<bool> {
            Ok(self.0.iter().any(|w| w == wallet))
        }
    }

    fn setup(premium: Vec<&str>) -> (TempDir, Arc<CoinLedgerService>, LeaderboardMaterializer) {
        let dir = TempDir::new().unwrap();
        let storage = KvStorage::open(dir.path()).unwrap();
        let ledger = Arc::new(CoinLedgerService::new(storage.clone(), LedgerConfig::default()));
        let premium = Arc::new(PremiumSet(premium.into_iter().map(String::from).collect()));
        let materializer = LeaderboardMaterializer::new(
            storage,
            ledger.clone(),
            premium,
            LeaderboardConfig::default(),
        );
        (dir, ledger, materializer)
    }

    fn seed(ledger: &CoinLedgerService, wallet: &str, amount: i64) {
        ledger
            .award(wallet, CoinType::Experience, amount, SourceKind::Quest, None, None, None)
            .unwrap();
    }

    #[test]
    fn test_period_windows() {
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 15, 30, 0).unwrap();

        let (start, end) = period_window(LeaderboardPeriod::Daily, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 8, 27, 0, 0, 0).unwrap());
        assert_eq!(end - start, Duration::days(1));

        let (start, end) = period_window(LeaderboardPeriod::Weekly, now);
        assert_eq!(start.weekday(), Weekday::Mon);
        assert!(start <= now && now < end);
        assert_eq!(end - start, Duration::days(7));

        let (start, end) = period_window(LeaderboardPeriod::Monthly, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap());

        let (start, end) = period_window(LeaderboardPeriod::AllTime, now);
        assert_eq!(start, DateTime::UNIX_EPOCH);
        assert!(end.year() == 9999);
    }

    #[test]
    fn test_get_or_create_ranks_by_total() {
        let (_dir, ledger, materializer) = setup(vec![]);
        seed(&ledger, "a", 10);
        seed(&ledger, "b", 30);
        seed(&ledger, "c", 20);

        let snapshot = materializer
            .get_or_create(LeaderboardSegment::All, LeaderboardPeriod::AllTime)
            .unwrap();

        assert_eq!(snapshot.entries.len(), 3);
        assert_eq!(snapshot.entries[0].rank, 1);
        assert_eq!(snapshot.entries[0].balance.wallet_address, "b");
        assert_eq!(snapshot.entries[2].balance.wallet_address, "a");
        assert!(snapshot.is_active);
    }

    #[test]
    fn test_snapshot_reused_within_window() {
        let (_dir, ledger, materializer) = setup(vec![]);
        seed(&ledger, "a", 10);

        let first = materializer
            .get_or_create(LeaderboardSegment::All, LeaderboardPeriod::Daily)
            .unwrap();
        let second = materializer
            .get_or_create(LeaderboardSegment::All, LeaderboardPeriod::Daily)
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_segment_filters() {
        let (_dir, ledger, materializer) = setup(vec!["vip"]);
        seed(&ledger, "vip", 100);
        seed(&ledger, "pleb", 50);

        let premium = materializer
            .get_or_create(LeaderboardSegment::Premium, LeaderboardPeriod::AllTime)
            .unwrap();
        assert_eq!(premium.entries.len(), 1);
        assert_eq!(premium.entries[0].balance.wallet_address, "vip");

        let free = materializer
            .get_or_create(LeaderboardSegment::Free, LeaderboardPeriod::AllTime)
            .unwrap();
        assert_eq!(free.entries.len(), 1);
        assert_eq!(free.entries[0].balance.wallet_address, "pleb");
    }

    #[test]
    fn test_user_rank_lookup() {
        let (_dir, ledger, materializer) = setup(vec![]);
        seed(&ledger, "a", 10);
        seed(&ledger, "b", 30);

        let view = materializer
            .get_with_user_rank(LeaderboardSegment::All, LeaderboardPeriod::AllTime, "a")
            .unwrap();
        assert_eq!(view.user_rank, Some(2));
        assert_eq!(view.user_entry.unwrap().balance.total, 10);

        let missing = materializer
            .get_with_user_rank(LeaderboardSegment::All, LeaderboardPeriod::AllTime, "ghost")
            .unwrap();
        assert_eq!(missing.user_rank, None);
        assert!(missing.user_entry.is_none());
    }

    #[test]
    fn test_user_history_across_snapshots() {
        let (_dir, ledger, materializer) = setup(vec![]);
        seed(&ledger, "a", 10);

        materializer
            .get_or_create(LeaderboardSegment::All, LeaderboardPeriod::Daily)
            .unwrap();
        materializer
            .get_or_create(LeaderboardSegment::All, LeaderboardPeriod::AllTime)
            .unwrap();

        let history = materializer.user_history("a", 10).unwrap();
        assert_eq!(history.len(), 2);
        // all-time window starts at the epoch, daily sorts first
        assert_eq!(history[0].period, LeaderboardPeriod::Daily);
    }

    #[test]
    fn test_stats() {
        let (_dir, ledger, materializer) = setup(vec![]);
        seed(&ledger, "a", 10);
        seed(&ledger, "b", 30);

        let stats = materializer.stats().unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_coins, 40);
        assert!((stats.average_coins - 20.0).abs() < f64::EPSILON);
        assert_eq!(stats.top_user.as_deref(), Some("b"));
    }

    #[test]
    fn test_rollover_archives_superseded_snapshot() {
        let (_dir, ledger, materializer) = setup(vec![]);
        seed(&ledger, "a", 10);

        // an active daily snapshot whose window closed yesterday
        let rolled = LeaderboardSnapshot {
            id: "rolled".to_string(),
            segment: LeaderboardSegment::All,
            period: LeaderboardPeriod::Daily,
            start_date: Utc::now() - Duration::days(2),
            end_date: Utc::now() - Duration::days(1),
            is_active: true,
            built_at: Utc::now() - Duration::days(2),
            entries: vec![],
        };
        materializer
            .storage
            .batch_write(
                &[
                    (snapshot_key("rolled"), serde_json::to_vec(&rolled).unwrap()),
                    (
                        active_key(LeaderboardSegment::All, LeaderboardPeriod::Daily),
                        b"rolled".to_vec(),
                    ),
                ],
                &[],
            )
            .unwrap();

        let fresh = materializer
            .get_or_create(LeaderboardSegment::All, LeaderboardPeriod::Daily)
            .unwrap();
        assert_ne!(fresh.id, "rolled");
        assert!(fresh.is_active);

        // the rollover itself archives the old window, no housekeeping needed
        let archived: LeaderboardSnapshot = serde_json::from_slice(
            &materializer.storage.get(&snapshot_key("rolled")).unwrap().unwrap(),
        )
        .unwrap();
        assert!(!archived.is_active);
        assert_eq!(materializer.deactivate_expired().unwrap(), 0);
    }

    #[test]
    fn test_deactivate_expired_is_idempotent() {
        let (_dir, ledger, materializer) = setup(vec![]);
        seed(&ledger, "a", 10);

        // daily snapshot for today is still inside its window
        materializer
            .get_or_create(LeaderboardSegment::All, LeaderboardPeriod::Daily)
            .unwrap();
        assert_eq!(materializer.deactivate_expired().unwrap(), 0);

        // force an already-closed window
        let expired = LeaderboardSnapshot {
            id: "old".to_string(),
            segment: LeaderboardSegment::All,
            period: LeaderboardPeriod::Daily,
            start_date: Utc::now() - Duration::days(2),
            end_date: Utc::now() - Duration::days(1),
            is_active: true,
            built_at: Utc::now() - Duration::days(2),
            entries: vec![],
        };
        materializer
            .storage
            .batch_write(
                &[
                    (
                        snapshot_key("old"),
                        serde_json::to_vec(&expired).unwrap(),
                    ),
                    (
                        active_key(LeaderboardSegment::Free, LeaderboardPeriod::Daily),
                        b"old".to_vec(),
                    ),
                ],
                &[],
            )
            .unwrap();

        assert_eq!(materializer.deactivate_expired().unwrap(), 1);
        assert_eq!(materializer.deactivate_expired().unwrap(), 0);

        let archived: LeaderboardSnapshot = serde_json::from_slice(
            &materializer.storage.get(&snapshot_key("old")).unwrap().unwrap(),
        )
        .unwrap();
        assert!(!archived.is_active, "archive keeps the snapshot, inactive");
    }
}
