//! Configuration for the economy engine.
//!
//! Defaults cover every field; a TOML file and `COINVAULT_*` environment
//! variables may override them. The loader validates the final result.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::errors::{ConfigurationError, CoinvaultResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EconomyConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./economy_data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Admin adjustments may drive a sub-balance negative. The source
    /// behavior (corrective overdrafts) is preserved as a policy switch.
    pub allow_admin_overdraft: bool,
    pub max_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            allow_admin_overdraft: true,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    /// Snapshot depth: only the top N wallets are materialized
    pub top_n: usize,
    /// A snapshot older than this is rebuilt on read
    pub staleness_secs: i64,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            top_n: 100,
            staleness_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Key reference handed to the on-chain signer. Settlement refuses to
    /// run without one.
    pub signer_key: Option<String>,
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> CoinvaultResult<EconomyConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EconomyConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> CoinvaultResult<EconomyConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut EconomyConfig) -> CoinvaultResult<()> {
        if let Ok(data_dir) = env::var("COINVAULT_DATA_DIR") {
            config.storage.data_dir = data_dir;
        }
        if let Ok(overdraft) = env::var("COINVAULT_ALLOW_ADMIN_OVERDRAFT") {
            config.ledger.allow_admin_overdraft =
                overdraft.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "COINVAULT_ALLOW_ADMIN_OVERDRAFT".to_string(),
                    value: overdraft,
                    reason: "invalid boolean value".to_string(),
                })?;
        }
        if let Ok(top_n) = env::var("COINVAULT_LEADERBOARD_TOP_N") {
            config.leaderboard.top_n =
                top_n.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "COINVAULT_LEADERBOARD_TOP_N".to_string(),
                    value: top_n,
                    reason: "invalid number".to_string(),
                })?;
        }
        if let Ok(key) = env::var("COINVAULT_SETTLEMENT_SIGNER_KEY") {
            config.settlement.signer_key = Some(key);
        }
        Ok(())
    }

    fn validate(&self, config: &EconomyConfig) -> CoinvaultResult<()> {
        if config.leaderboard.top_n == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "leaderboard.top_n".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if config.leaderboard.staleness_secs <= 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "leaderboard.staleness_secs".to_string(),
                value: config.leaderboard.staleness_secs.to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if config.ledger.max_page_size == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "ledger.max_page_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
