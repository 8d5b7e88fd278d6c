//! SQLite database module for the reward and staking ledger
//!
//! Every balance, progress record, stake and acquisition lives in one
//! SQLite file, shared by an r2d2 pool of WAL-mode connections. Multi-step
//! commands run inside a single `IMMEDIATE` transaction, and each row-level
//! invariant is enforced by a conditional statement
//! (`UPDATE ... WHERE balance >= ?`, `UPDATE ... WHERE claimed = 0`,
//! compare-and-set on `last_claimed`) or a UNIQUE key, never by holding a
//! lock in Rust.
//!
//! ## Tables
//!
//! - `users` - balances, wallet addresses, referral graph
//! - `daily_missions`, `weekly_quests`, `games` - rewardable definitions
//! - `staking_vaults`, `nft_boosters`, `marketplace_items` - priced definitions
//! - `progress_records` - per-user mission/quest progress (claim gate)
//! - `user_stakes` - open stakes
//! - `user_nfts`, `user_purchases` - acquisition records
//! - `social_connections`, `game_scores`
//! - `token_transactions` - journal of every credit/debit

pub mod schema;
pub mod users;
pub mod definitions;
pub mod progress;
pub mod stakes;
pub mod acquisitions;
pub mod social;
pub mod scores;
pub mod journal;

use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::{ManageConnection, Pool};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::LedgerError;

/// Pool size when the config does not set one
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// How long a writer waits on another writer's lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// r2d2 manager handing out configured rusqlite connections
#[derive(Debug)]
pub struct SqliteManager {
    path: Option<PathBuf>,
}

impl SqliteManager {
    pub fn file(path: &Path) -> Self {
        Self { path: Some(path.to_path_buf()) }
    }

    /// Private in-memory database; only usable behind a single-connection pool
    pub fn memory() -> Self {
        Self { path: None }
    }
}

impl ManageConnection for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = match &self.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch("")
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

/// SQLite database for the ledger
///
/// File databases run in WAL mode behind a connection pool: reads never
/// wait for a writer, and writers only queue behind each other for the
/// length of one immediate transaction.
pub struct LedgerDb {
    pool: Pool<SqliteManager>,
}

impl LedgerDb {
    /// Open or create the ledger database
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        Self::open_with_max_connections(path, DEFAULT_MAX_CONNECTIONS)
    }

    pub fn open_with_max_connections(path: &Path, max_connections: u32) -> Result<Self, LedgerError> {
        info!("Opening ledger database at {:?}", path);

        // WAL and the schema are set up once, before any pooled connection exists
        let bootstrap = Connection::open(path)
            .map_err(|e| LedgerError::Database(format!("Failed to open SQLite: {}", e)))?;
        bootstrap
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| LedgerError::Database(format!("Failed to set PRAGMA: {}", e)))?;
        schema::init_schema(&bootstrap)?;
        drop(bootstrap);

        let pool = Pool::builder()
            .max_size(max_connections.max(1))
            .build(SqliteManager::file(path))?;
        debug!(max_connections, "Ledger connection pool ready");

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing)
    ///
    /// An in-memory database lives and dies with its one connection, so
    /// this pool never grows past it nor recycles it.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory SQLite database");

        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteManager::memory())?;
        let db = Self { pool };
        db.with_conn(schema::init_schema)?;

        Ok(db)
    }

    /// Run a read against a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError>,
    {
        let conn = self.pool.get()?;
        f(&*conn)
    }

    /// Run `f` inside an immediate transaction.
    ///
    /// Commits when `f` returns `Ok`; any error drops the transaction,
    /// which rolls back every statement `f` executed.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| LedgerError::Database(format!("Transaction failed: {}", e)))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| LedgerError::Database(format!("Commit failed: {}", e)))?;
        Ok(value)
    }

    /// Get platform statistics; quests count as active until `now`
    pub fn stats(&self, now: chrono::DateTime<chrono::Utc>) -> Result<PlatformStats, LedgerError> {
        self.with_conn(|conn| {
            let total_users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;

            let total_balances: i64 = conn.query_row(
                "SELECT COALESCE(SUM(balance), 0) FROM users",
                [],
                |row| row.get(0),
            )?;

            let total_staked: i64 = conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM user_stakes",
                [],
                |row| row.get(0),
            )?;

            let active_quests: i64 = conn.query_row(
                "SELECT COUNT(*) FROM weekly_quests WHERE active = 1 AND expires_at > ?",
                [now],
                |row| row.get(0),
            )?;

            let average_apr_bps: f64 = conn.query_row(
                "SELECT COALESCE(AVG(apr_bps), 0.0) FROM staking_vaults",
                [],
                |row| row.get(0),
            )?;

            Ok(PlatformStats {
                total_users: total_users as u64,
                total_balances,
                total_staked,
                active_quests: active_quests as u64,
                // one decimal place, in percent
                average_apr_percent: (average_apr_bps / 10.0).round() / 10.0,
            })
        })
    }
}

/// Platform statistics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_users: u64,
    pub total_balances: i64,
    pub total_staked: i64,
    pub active_quests: u64,
    pub average_apr_percent: f64,
}

/// Map a unique-constraint violation to `AlreadyExists`, anything else to `Database`.
pub(crate) fn map_insert_error(e: rusqlite::Error, what: impl Into<String>) -> LedgerError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            LedgerError::AlreadyExists(what.into())
        }
        _ => LedgerError::Database(format!("Insert failed: {}", e)),
    }
}

// Re-exports
pub use users::UserRow;
pub use definitions::{
    GameRow, MarketplaceItemRow, MissionRow, NftBoosterRow, QuestRow, VaultRow,
};
pub use progress::{ProgressKind, ProgressRecord};
pub use stakes::StakeRow;
pub use acquisitions::{AcquisitionKind, AcquisitionRecord};
pub use social::SocialConnectionRow;
pub use scores::{GameScoreRow, LeaderboardEntry};
pub use journal::{Direction, DistributionStats, JournalEntry, TransactionRow};
