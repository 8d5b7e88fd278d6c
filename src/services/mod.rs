//! Service layer for the ledger
//!
//! Services hold the business rules between a request layer and the
//! repository functions in `db/`. Each service:
//! - validates its command
//! - runs every read-check-write sequence inside one database transaction
//! - routes every balance change through the Balance Store helpers
//! - emits a [`LedgerEvent`] after commit
//!
//! ## Architecture
//!
//! ```text
//! Request layer (out of scope)
//!     ↓
//! Ledger (service container)
//!     ↓
//! Repository layer (db/*.rs)
//!     ↓
//! SQLite
//! ```

pub mod events;
pub mod balance;
pub mod catalog_service;
pub mod progress;
pub mod staking;
pub mod acquisition;
pub mod referral;
pub mod rewards;

pub use events::{spawn_logging_listener, EventBus, EventListener, LedgerEvent};
pub use balance::{BalanceStore, CreateUserInput};
pub use catalog_service::CatalogService;
pub use progress::{ClaimOutcome, ProgressTracker, ProgressView};
pub use staking::{pending_reward, StakeClaim, StakePosition, StakingLedger, UnstakeOutcome};
pub use acquisition::{AcquisitionGate, OwnedItem, OwnedNft};
pub use referral::{ReferralLeaderboardEntry, ReferralStats, ReferralTier, ReferralTracker};
pub use rewards::{GameScoreOutcome, ReferralOutcome, RewardDistributor, RewardGrant, SocialConnectOutcome};

use std::sync::Arc;

use tracing::info;

use crate::catalog::RewardCatalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, RewardRates};
use crate::db::{LedgerDb, PlatformStats};
use crate::error::LedgerResult;

/// Service container
///
/// One instance per database. Every service shares the same database
/// handle, clock, catalog and event bus, so there is exactly one
/// authority issuing rewards.
pub struct Ledger {
    pub balances: Arc<BalanceStore>,
    pub catalog: Arc<CatalogService>,
    pub progress: Arc<ProgressTracker>,
    pub staking: Arc<StakingLedger>,
    pub acquisitions: Arc<AcquisitionGate>,
    pub referrals: Arc<ReferralTracker>,
    pub rewards: Arc<RewardDistributor>,
    pub events: Arc<EventBus>,
    db: Arc<LedgerDb>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Wire all services over an opened database
    pub fn new(db: Arc<LedgerDb>, clock: Arc<dyn Clock>, rates: RewardRates) -> Self {
        let events = Arc::new(EventBus::new());
        let catalog = Arc::new(RewardCatalog::new(rates));

        Self {
            balances: Arc::new(BalanceStore::new(db.clone(), clock.clone(), events.clone())),
            catalog: Arc::new(CatalogService::new(db.clone(), clock.clone(), catalog.clone())),
            progress: Arc::new(ProgressTracker::new(
                db.clone(),
                clock.clone(),
                events.clone(),
                catalog.clone(),
            )),
            staking: Arc::new(StakingLedger::new(db.clone(), clock.clone(), events.clone())),
            acquisitions: Arc::new(AcquisitionGate::new(db.clone(), clock.clone(), events.clone())),
            referrals: Arc::new(ReferralTracker::new(db.clone())),
            rewards: Arc::new(RewardDistributor::new(
                db.clone(),
                clock.clone(),
                events.clone(),
                catalog,
            )),
            events,
            db,
            clock,
        }
    }

    /// Open the configured database file, seeding the stock catalog when
    /// the config asks for it.
    pub fn open(config: &Config) -> LedgerResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage_dir)?;

        let db = Arc::new(LedgerDb::open_with_max_connections(
            &config.database_path(),
            config.max_connections,
        )?);
        let ledger = Self::new(db, Arc::new(SystemClock), config.rewards.clone());

        if config.seed_catalog {
            if let Some(report) = ledger.catalog.seed_default()? {
                info!(?report, "Installed stock catalog");
            }
        }
        Ok(ledger)
    }

    /// In-memory ledger on the wall clock with default rates
    pub fn in_memory() -> LedgerResult<Self> {
        Ok(Self::new(
            Arc::new(LedgerDb::open_in_memory()?),
            Arc::new(SystemClock),
            RewardRates::default(),
        ))
    }

    pub fn platform_stats(&self) -> LedgerResult<PlatformStats> {
        self.db.stats(self.clock.now())
    }
}
