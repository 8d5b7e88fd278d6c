//! SlerfHub Ledger - reward and staking ledger
//!
//! Tracks each user's off-chain token balance and every way it can move:
//! mission and quest rewards, one-off rewards (trivia, wallets, socials,
//! referrals, game high scores), staking with time-accrued yield, and
//! spending on NFT boosters and marketplace items.
//!
//! ## Architecture
//!
//! - **Balance Store**: the only writer of `users.balance`; conditional debit
//! - **Reward Catalog**: amount lookup for every reward kind
//! - **Progress Tracker**: mission/quest records, the claim gate
//! - **Staking Ledger**: stakes, lazy accrual, claim and unstake
//! - **Acquisition Gate**: price check, debit and record in one step
//! - **Referral Tracker**: tiers and earnings derived from the user graph
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/slerfhub-ledger/
//! ├── ledger.db      # SQLite (WAL mode)
//! └── config.toml    # Configuration
//! ```
//!
//! ## Guarantees
//!
//! Balances never go negative, a completed record pays out once, and every
//! failed command leaves the database exactly as it found it.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

// Re-exports
pub use catalog::{RewardCatalog, RewardKind, SocialPlatform, TriviaKind, WalletKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, RewardRates};
pub use db::{AcquisitionKind, LedgerDb, ProgressKind};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use services::Ledger;
