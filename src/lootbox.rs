//! Loot box resolver: eligibility gates, probability rolls and reward
//! issuance.
//!
//! An open attempt walks eligibility -> ad gate -> reward rolls -> record,
//! then updates the cooldown and daily counters. The check-then-update
//! sequence for one (wallet, box) pair is serialized by its own lock entry,
//! distinct from the ledger's per-wallet lock so reward issuance can take
//! the latter without self-deadlock.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::{
    errors::{ConfigurationError, CoinvaultError, CoinvaultResult, IneligibleReason, LootBoxError, StorageError},
    ledger::CoinLedgerService,
    storage::KvStorage,
    traits::PremiumStatusProvider,
    types::{
        AdWatchData, CooldownRecord, DailyLimitRecord, IssuedReward, LootBoxDefinition,
        LootBoxKind, LootBoxStats, LootBoxOpenRecord, LootBoxUpdate, NewLootBox, OpenEligibility,
        OpenOutcome, RequestInfo, RewardKind, RewardRule, SourceKind,
    },
};

const DEF_PREFIX: &str = "lootbox:def:";
const OPEN_SCAN_CHUNK: usize = 500;

fn def_key(box_id: &str) -> Vec<u8> {
    format!("{DEF_PREFIX}{box_id}").into_bytes()
}

fn cooldown_key(wallet: &str, box_id: &str) -> Vec<u8> {
    format!("lootbox:cooldown:{wallet}:{box_id}").into_bytes()
}

fn daily_key(wallet: &str, box_id: &str, date: &str) -> Vec<u8> {
    format!("lootbox:daily:{wallet}:{box_id}:{date}").into_bytes()
}

fn open_count_key(box_id: &str) -> Vec<u8> {
    format!("lootbox:opencount:{box_id}").into_bytes()
}

// Open records sort newest-first by inverting the open timestamp.
// Key layout: prefix | inv_millis(be) | open_id
fn open_prefix(box_id: &str) -> Vec<u8> {
    format!("lootbox:open:{box_id}:").into_bytes()
}

fn open_key(box_id: &str, opened_at: DateTime<Utc>, open_id: &Uuid) -> Vec<u8> {
    let inv_millis = u64::MAX - opened_at.timestamp_millis() as u64;
    let mut key = open_prefix(box_id);
    key.extend_from_slice(&inv_millis.to_be_bytes());
    key.extend_from_slice(open_id.as_bytes());
    key
}

fn opened_at_millis(key: &[u8], prefix_len: usize) -> Option<u64> {
    let raw: [u8; 8] = key.get(prefix_len..prefix_len + 8)?.try_into().ok()?;
    Some(u64::MAX - u64::from_be_bytes(raw))
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

fn validate_probability(probability: f64) -> CoinvaultResult<()> {
    if !(0.0..=1.0).contains(&probability) || probability.is_nan() {
        return Err(ConfigurationError::InvalidValue {
            field: "probability".to_string(),
            value: probability.to_string(),
            reason: "must be within [0, 1]".to_string(),
        }
        .into());
    }
    Ok(())
}

pub struct LootBoxResolver {
    storage: KvStorage,
    ledger: Arc<CoinLedgerService>,
    premium: Arc<dyn PremiumStatusProvider>,
    open_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LootBoxResolver {
    pub fn new(
        storage: KvStorage,
        ledger: Arc<CoinLedgerService>,
        premium: Arc<dyn PremiumStatusProvider>,
    ) -> Self {
        Self {
            storage,
            ledger,
            premium,
            open_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: String) -> Arc<Mutex<()>> {
        self.open_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ------------------------------------------------------------------
    // Admin surface
    // ------------------------------------------------------------------

    pub fn create_box(&self, new_box: NewLootBox) -> CoinvaultResult<LootBoxDefinition> {
        match &new_box.kind {
            LootBoxKind::Free {
                min_coin_reward,
                max_coin_reward,
                ..
            } => {
                if *min_coin_reward <= 0 || max_coin_reward < min_coin_reward {
                    return Err(ConfigurationError::InvalidValue {
                        field: "coin_reward_range".to_string(),
                        value: format!("[{min_coin_reward}, {max_coin_reward}]"),
                        reason: "requires 0 < min <= max".to_string(),
                    }
                    .into());
                }
            }
            LootBoxKind::Premium { reward_rules } => {
                for rule in reward_rules {
                    validate_probability(rule.probability)?;
                }
            }
        }
        if new_box.cooldown_minutes < 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "cooldown_minutes".to_string(),
                value: new_box.cooldown_minutes.to_string(),
                reason: "must be non-negative".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let def = LootBoxDefinition {
            id: Uuid::new_v4().to_string(),
            name: new_box.name,
            kind: new_box.kind,
            cooldown_minutes: new_box.cooldown_minutes,
            max_opens_per_day: new_box.max_opens_per_day,
            ad_required: new_box.ad_required,
            allowed_ad_providers: new_box.allowed_ad_providers,
            requires_premium: new_box.requires_premium,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.storage
            .put(&def_key(&def.id), &encode(&def, "loot box definition")?)?;
        tracing::info!(box_id = %def.id, name = %def.name, "created loot box");
        Ok(def)
    }

    pub fn update_box(&self, box_id: &str, update: LootBoxUpdate) -> CoinvaultResult<LootBoxDefinition> {
        let mut def = self.get_box(box_id)?;

        if let Some(name) = update.name {
            def.name = name;
        }
        if let Some(cooldown) = update.cooldown_minutes {
            def.cooldown_minutes = cooldown;
        }
        if let Some(cap) = update.max_opens_per_day {
            def.max_opens_per_day = cap;
        }
        if let Some(ad_required) = update.ad_required {
            def.ad_required = ad_required;
        }
        if let Some(providers) = update.allowed_ad_providers {
            def.allowed_ad_providers = providers;
        }
        if let Some(requires_premium) = update.requires_premium {
            def.requires_premium = requires_premium;
        }
        if let Some(is_active) = update.is_active {
            def.is_active = is_active;
        }
        def.updated_at = Utc::now();

        self.storage
            .put(&def_key(box_id), &encode(&def, "loot box definition")?)?;
        Ok(def)
    }

    /// Soft delete: history keeps referencing the definition
    pub fn soft_delete_box(&self, box_id: &str) -> CoinvaultResult<()> {
        let mut def = self.get_box(box_id)?;
        def.is_active = false;
        def.updated_at = Utc::now();
        self.storage
            .put(&def_key(box_id), &encode(&def, "loot box definition")?)?;
        tracing::info!(box_id, "soft-deleted loot box");
        Ok(())
    }

    /// Attach a reward rule to a premium box
    pub fn add_reward_rule(&self, box_id: &str, rule: RewardRule) -> CoinvaultResult<LootBoxDefinition> {
        validate_probability(rule.probability)?;
        let mut def = self.get_box(box_id)?;
        match &mut def.kind {
            LootBoxKind::Premium { reward_rules } => reward_rules.push(rule),
            LootBoxKind::Free { .. } => {
                return Err(ConfigurationError::InvalidValue {
                    field: "kind".to_string(),
                    value: "free".to_string(),
                    reason: "reward rules only apply to premium boxes".to_string(),
                }
                .into())
            }
        }
        def.updated_at = Utc::now();
        self.storage
            .put(&def_key(box_id), &encode(&def, "loot box definition")?)?;
        Ok(def)
    }

    pub fn get_box(&self, box_id: &str) -> CoinvaultResult<LootBoxDefinition> {
        match self.storage.get(&def_key(box_id))? {
            Some(bytes) => decode(&bytes, "loot box definition"),
            None => Err(LootBoxError::NotFound(box_id.to_string()).into()),
        }
    }

    pub fn list_boxes(&self, include_inactive: bool) -> CoinvaultResult<Vec<LootBoxDefinition>> {
        let rows = self
            .storage
            .scan_prefix(DEF_PREFIX.as_bytes(), None, usize::MAX)?;
        let mut boxes = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let def: LootBoxDefinition = decode(&value, "loot box definition")?;
            if include_inactive || def.is_active {
                boxes.push(def);
            }
        }
        Ok(boxes)
    }

    /// Total opens plus the trailing-24h count for one box
    pub fn stats(&self, box_id: &str) -> CoinvaultResult<LootBoxStats> {
        self.get_box(box_id)?;

        let total_opens = match self.storage.get(&open_count_key(box_id))? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::CorruptedData(format!("invalid open counter for {box_id}"))
                })?;
                u64::from_le_bytes(raw)
            }
            None => 0,
        };

        // Open keys are newest-first, so the scan stops at the first record
        // older than the window.
        let prefix = open_prefix(box_id);
        let window_start = (Utc::now() - Duration::hours(24)).timestamp_millis() as u64;
        let mut opens_last_24h = 0u64;
        let mut cursor: Option<Vec<u8>> = None;
        'scan: loop {
            let rows = self
                .storage
                .scan_prefix(&prefix, cursor.as_deref(), OPEN_SCAN_CHUNK)?;
            if rows.is_empty() {
                break;
            }
            for (key, _) in &rows {
                match opened_at_millis(key, prefix.len()) {
                    Some(millis) if millis >= window_start => opens_last_24h += 1,
                    _ => break 'scan,
                }
            }
            cursor = rows.last().map(|(key, _)| key.clone());
        }

        Ok(LootBoxStats {
            total_opens,
            opens_last_24h,
        })
    }

    // ------------------------------------------------------------------
    // Open path
    // ------------------------------------------------------------------

    /// Eligibility probe; evaluated fresh on every call, nothing cached
    pub fn can_open(&self, wallet: &str, box_id: &str) -> CoinvaultResult<OpenEligibility> {
        let def = self.get_box(box_id)?;
        match self.check_eligibility(wallet, &def, Utc::now()) {
            Ok(()) => Ok(OpenEligibility {
                can_open: true,
                reason: None,
                next_available_at: None,
            }),
            Err(CoinvaultError::LootBox(LootBoxError::Ineligible {
                reason,
                next_available_at,
            })) => Ok(OpenEligibility {
                can_open: false,
                reason: Some(reason),
                next_available_at,
            }),
            Err(e) => Err(e),
        }
    }

    fn check_eligibility(
        &self,
        wallet: &str,
        def: &LootBoxDefinition,
        now: DateTime<Utc>,
    ) -> CoinvaultResult<()> {
        if !def.is_active {
            return Err(LootBoxError::Ineligible {
                reason: IneligibleReason::BoxInactive,
                next_available_at: None,
            }
            .into());
        }

        if def.requires_premium && !self.premium.is_premium(wallet)? {
            return Err(LootBoxError::Ineligible {
                reason: IneligibleReason::PremiumRequired,
                next_available_at: None,
            }
            .into());
        }

        if let Some(bytes) = self.storage.get(&cooldown_key(wallet, &def.id))? {
            let cooldown: CooldownRecord = decode(&bytes, "cooldown record")?;
            if cooldown.next_available_at > now {
                return Err(LootBoxError::Ineligible {
                    reason: IneligibleReason::CooldownActive,
                    next_available_at: Some(cooldown.next_available_at),
                }
                .into());
            }
        }

        if let Some(max) = def.max_opens_per_day {
            let date = now.date_naive().format("%Y-%m-%d").to_string();
            if let Some(bytes) = self.storage.get(&daily_key(wallet, &def.id, &date))? {
                let daily: DailyLimitRecord = decode(&bytes, "daily limit record")?;
                if daily.open_count >= max {
                    let next_midnight = (now.date_naive() + Duration::days(1))
                        .and_time(chrono::NaiveTime::MIN)
                        .and_utc();
                    return Err(LootBoxError::Ineligible {
                        reason: IneligibleReason::DailyLimitReached,
                        next_available_at: Some(next_midnight),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Open a loot box with the process RNG
    pub fn open(
        &self,
        wallet: &str,
        box_id: &str,
        ad_data: Option<AdWatchData>,
        request_info: Option<RequestInfo>,
    ) -> CoinvaultResult<OpenOutcome> {
        self.open_with_rng(wallet, box_id, ad_data, request_info, &mut rand::thread_rng())
    }

    /// Open with a caller-supplied RNG (deterministic in tests).
    ///
    /// Holds the (wallet, box) lock across the eligibility re-check and the
    /// cooldown/daily-limit update, so two racing opens cannot both pass a
    /// cap. Reward issuance is per-rule best-effort: a failing rule is
    /// logged and skipped without revoking rewards already granted.
    pub fn open_with_rng<R: Rng>(
        &self,
        wallet: &str,
        box_id: &str,
        ad_data: Option<AdWatchData>,
        request_info: Option<RequestInfo>,
        rng: &mut R,
    ) -> CoinvaultResult<OpenOutcome> {
        let lock = self.lock_for(format!("{wallet}:{box_id}"));
        let _guard = lock.lock().unwrap();

        let now = Utc::now();
        let def = self.get_box(box_id)?;
        self.check_eligibility(wallet, &def, now)?;
        self.check_ad_gate(&def, ad_data.as_ref())?;

        let rewards = self.roll_rewards(wallet, &def, now, rng);

        let open_id = Uuid::new_v4();
        let record = LootBoxOpenRecord {
            open_id: open_id.to_string(),
            wallet_address: wallet.to_string(),
            loot_box_id: def.id.clone(),
            ad_data,
            request_info,
            opened_at: now,
            rewards: rewards.clone(),
        };

        let next_available_at = now + Duration::minutes(def.cooldown_minutes);
        let cooldown = CooldownRecord { next_available_at };

        let mut puts = vec![
            (
                open_key(&def.id, now, &open_id),
                encode(&record, "loot box open record")?,
            ),
            (
                cooldown_key(wallet, &def.id),
                encode(&cooldown, "cooldown record")?,
            ),
        ];

        if def.max_opens_per_day.is_some() {
            let date = now.date_naive().format("%Y-%m-%d").to_string();
            let key = daily_key(wallet, &def.id, &date);
            let open_count = match self.storage.get(&key)? {
                Some(bytes) => decode::<DailyLimitRecord>(&bytes, "daily limit record")?.open_count + 1,
                None => 1,
            };
            puts.push((key, encode(&DailyLimitRecord { open_count }, "daily limit record")?));
        }

        // The counter has its own lock entry: opens of the same box by
        // different wallets still serialize the increment.
        {
            let counter_lock = self.lock_for(format!("count:{box_id}"));
            let _counter_guard = counter_lock.lock().unwrap();
            let total = match self.storage.get(&open_count_key(&def.id))? {
                Some(bytes) => {
                    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        StorageError::CorruptedData(format!("invalid open counter for {box_id}"))
                    })?;
                    u64::from_le_bytes(raw)
                }
                None => 0,
            };
            puts.push((open_count_key(&def.id), (total + 1).to_le_bytes().to_vec()));
            // Rewards already sit in the ledger at this point: if this batch
            // fails the coins stand, but the open record, cooldown and
            // counters are lost and the wallet can open again.
            self.storage.batch_write(&puts, &[])?;
        }

        tracing::info!(
            wallet,
            box_id,
            rewards = record.rewards.len(),
            "loot box opened"
        );

        Ok(OpenOutcome {
            open_id: record.open_id,
            rewards,
            next_available_at,
        })
    }

    fn check_ad_gate(&self, def: &LootBoxDefinition, ad_data: Option<&AdWatchData>) -> CoinvaultResult<()> {
        if !def.ad_required {
            return Ok(());
        }
        let ad = match ad_data {
            Some(ad) if ad.ad_watched => ad,
            _ => return Err(LootBoxError::AdRequired.into()),
        };
        match &ad.ad_provider {
            Some(provider)
                if def.allowed_ad_providers.is_empty()
                    || def.allowed_ad_providers.iter().any(|p| p == provider) =>
            {
                Ok(())
            }
            _ => Err(LootBoxError::AdRequired.into()),
        }
    }

    fn roll_rewards<R: Rng>(
        &self,
        wallet: &str,
        def: &LootBoxDefinition,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<IssuedReward> {
        match &def.kind {
            LootBoxKind::Free {
                min_coin_reward,
                max_coin_reward,
                coin_type,
            } => {
                // Always exactly one reward, uniform over the range.
                let amount = rng.gen_range(*min_coin_reward..=*max_coin_reward);
                let reward = RewardKind::Coins {
                    coin_type: *coin_type,
                    amount,
                };
                self.issue(wallet, &def.id, reward, now).into_iter().collect()
            }
            LootBoxKind::Premium { reward_rules } => {
                // Each rule rolls independently; zero, one or many rewards
                // may come out of a single open.
                let mut rewards = Vec::new();
                for rule in reward_rules {
                    if rng.gen::<f64>() < rule.probability {
                        rewards.extend(self.issue(wallet, &def.id, rule.reward.clone(), now));
                    }
                }
                rewards
            }
        }
    }

    /// Issue one reward. Ledger-issued kinds are claimed immediately;
    /// NFT/crypto kinds are recorded unclaimed for the external fulfiller.
    /// Returns None when ledger issuance fails, leaving other rewards alone.
    fn issue(
        &self,
        wallet: &str,
        box_id: &str,
        reward: RewardKind,
        now: DateTime<Utc>,
    ) -> Option<IssuedReward> {
        let issued = match &reward {
            RewardKind::Coins { coin_type, amount } => self
                .ledger
                .award(
                    wallet,
                    *coin_type,
                    *amount,
                    SourceKind::LootBox,
                    Some(box_id),
                    None,
                    Some("loot box reward"),
                )
                .map(|_| true),
            RewardKind::Experience { amount } => self
                .ledger
                .award(
                    wallet,
                    crate::types::CoinType::Experience,
                    *amount,
                    SourceKind::LootBox,
                    Some(box_id),
                    None,
                    Some("loot box reward"),
                )
                .map(|_| true),
            RewardKind::Achievement {
                achievement_id,
                amount,
            } => self
                .ledger
                .award(
                    wallet,
                    crate::types::CoinType::Achievement,
                    *amount,
                    SourceKind::LootBox,
                    Some(box_id),
                    Some(serde_json::json!({ "achievement_id": achievement_id })),
                    Some("loot box reward"),
                )
                .map(|_| true),
            RewardKind::Nft { .. } | RewardKind::Crypto { .. } => Ok(false),
        };

        match issued {
            Ok(claimed) => Some(IssuedReward {
                reward,
                claimed,
                claimed_at: claimed.then_some(now),
            }),
            Err(e) => {
                tracing::warn!(wallet, box_id, error = %e, "reward issuance failed, skipping rule");
                None
            }
        }
    }
}
