//! Configuration for slerfhub-ledger

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::LedgerError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slerfhub-ledger")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the ledger database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Display symbol for the off-chain point balance
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,

    /// Install the stock catalog when the database is empty
    #[serde(default = "default_true")]
    pub seed_catalog: bool,

    /// Size of the SQLite connection pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Fixed reward amounts for non-definition rewards
    #[serde(default)]
    pub rewards: RewardRates,
}

/// Reward table for rewards that are not backed by a catalog row.
///
/// Mission, quest and game rewards live on their definitions; everything
/// else is looked up here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardRates {
    /// Per correct answer
    pub daily_trivia: i64,
    /// Per correct answer
    pub weekly_trivia: i64,
    pub perfect_score: i64,
    pub first_wallet: i64,
    pub second_wallet: i64,
    pub cross_chain: i64,
    pub twitter_follow: i64,
    pub discord_join: i64,
    pub github_star: i64,
    /// Paid to the referrer; the referee receives half
    pub referral_bonus: i64,
}

impl Default for RewardRates {
    fn default() -> Self {
        Self {
            daily_trivia: 500_000,
            weekly_trivia: 2_000_000,
            perfect_score: 5_000_000,
            first_wallet: 1_000_000,
            second_wallet: 500_000,
            cross_chain: 2_000_000,
            twitter_follow: 100_000,
            discord_join: 100_000,
            github_star: 200_000,
            referral_bonus: 1_000_000,
        }
    }
}

fn default_database_file() -> String {
    "ledger.db".to_string()
}

fn default_token_symbol() -> String {
    "$SLERF".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    crate::db::DEFAULT_MAX_CONNECTIONS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            token_symbol: default_token_symbol(),
            seed_catalog: true,
            max_connections: default_max_connections(),
            rewards: RewardRates::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| LedgerError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), LedgerError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| LedgerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate pool size and reward amounts
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.max_connections == 0 {
            return Err(LedgerError::Config("max_connections must be at least 1".into()));
        }

        let r = &self.rewards;
        let amounts = [
            ("daily_trivia", r.daily_trivia),
            ("weekly_trivia", r.weekly_trivia),
            ("perfect_score", r.perfect_score),
            ("first_wallet", r.first_wallet),
            ("second_wallet", r.second_wallet),
            ("cross_chain", r.cross_chain),
            ("twitter_follow", r.twitter_follow),
            ("discord_join", r.discord_join),
            ("github_star", r.github_star),
            ("referral_bonus", r.referral_bonus),
        ];
        for (name, amount) in amounts {
            if amount < 0 {
                return Err(LedgerError::Config(format!(
                    "rewards.{} must not be negative (got {})",
                    name, amount
                )));
            }
        }
        Ok(())
    }

    /// Get ledger database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
