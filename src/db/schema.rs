//! Database schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::LedgerError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Create the tables on a fresh database, or confirm an existing one is
/// at [`SCHEMA_VERSION`]. A file written by a newer build is refused.
pub fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    match get_schema_version(conn)? {
        0 => {
            info!("Creating new ledger schema v{}", SCHEMA_VERSION);
            create_tables(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)
        }
        SCHEMA_VERSION => {
            debug!("Ledger schema is up to date (v{})", SCHEMA_VERSION);
            Ok(())
        }
        other => Err(LedgerError::Database(format!(
            "Unsupported ledger schema v{} (this build reads v{})",
            other, SCHEMA_VERSION
        ))),
    }
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, LedgerError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| LedgerError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|e| LedgerError::Database(format!("Failed to read schema_version: {}", e)))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), LedgerError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| LedgerError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| LedgerError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(USERS_SCHEMA)
        .map_err(|e| LedgerError::Database(format!("Failed to create user tables: {}", e)))?;

    conn.execute_batch(CATALOG_SCHEMA)
        .map_err(|e| LedgerError::Database(format!("Failed to create catalog tables: {}", e)))?;

    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| LedgerError::Database(format!("Failed to create ledger tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| LedgerError::Database(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

const USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    wallet_address TEXT UNIQUE,
    -- smallest token denomination, never negative
    balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
    referral_code TEXT NOT NULL UNIQUE,
    referred_by INTEGER REFERENCES users(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS social_connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    platform TEXT NOT NULL,
    username TEXT,
    connected INTEGER NOT NULL DEFAULT 1,
    connected_at TEXT NOT NULL,
    UNIQUE (user_id, platform)
);
"#;

const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS daily_missions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    reward INTEGER NOT NULL CHECK (reward >= 0),
    icon TEXT,
    -- opaque to the ledger, interpreted by the UI layer
    requirements_json TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS weekly_quests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    reward INTEGER NOT NULL CHECK (reward >= 0),
    icon TEXT,
    requirements_json TEXT,
    progress_max INTEGER NOT NULL DEFAULT 1 CHECK (progress_max > 0),
    active INTEGER NOT NULL DEFAULT 1,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS games (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    reward INTEGER NOT NULL CHECK (reward >= 0),
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS staking_vaults (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    -- annual rate in basis points: 1000 = 10%
    apr_bps INTEGER NOT NULL CHECK (apr_bps >= 0),
    min_stake INTEGER NOT NULL DEFAULT 0 CHECK (min_stake >= 0),
    requirements_json TEXT
);

CREATE TABLE IF NOT EXISTS nft_boosters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    boost INTEGER NOT NULL DEFAULT 0,
    rarity TEXT NOT NULL,
    price INTEGER NOT NULL CHECK (price >= 0)
);

CREATE TABLE IF NOT EXISTS marketplace_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    item_type TEXT NOT NULL,
    price INTEGER NOT NULL CHECK (price >= 0),
    available INTEGER NOT NULL DEFAULT 1
);
"#;

const LEDGER_SCHEMA: &str = r#"
-- One row per (kind, user, definition); claimed = 1 is terminal
CREATE TABLE IF NOT EXISTS progress_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN ('mission', 'quest')),
    user_id INTEGER NOT NULL REFERENCES users(id),
    definition_id INTEGER NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress >= 0),
    progress_max INTEGER,
    completed INTEGER NOT NULL DEFAULT 0,
    claimed INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT NOT NULL,
    UNIQUE (kind, user_id, definition_id)
);

CREATE TABLE IF NOT EXISTS user_stakes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    vault_id INTEGER NOT NULL REFERENCES staking_vaults(id),
    amount INTEGER NOT NULL CHECK (amount > 0),
    rewards_paid INTEGER NOT NULL DEFAULT 0,
    staked_at TEXT NOT NULL,
    last_claimed TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_nfts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    nft_id INTEGER NOT NULL REFERENCES nft_boosters(id),
    price_paid INTEGER NOT NULL,
    minted_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_purchases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    item_id INTEGER NOT NULL REFERENCES marketplace_items(id),
    price_paid INTEGER NOT NULL,
    purchased_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS game_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    game_id INTEGER NOT NULL REFERENCES games(id),
    score INTEGER NOT NULL,
    played_at TEXT NOT NULL
);

-- Journal of every balance mutation; idempotency_key makes one-off rewards exactly-once.
-- Zero-amount rows are allowed so a worthless reward still consumes its key.
CREATE TABLE IF NOT EXISTS token_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    direction TEXT NOT NULL CHECK (direction IN ('credit', 'debit')),
    amount INTEGER NOT NULL CHECK (amount >= 0),
    reason TEXT NOT NULL,
    idempotency_key TEXT UNIQUE,
    metadata_json TEXT,
    created_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_users_referred_by ON users(referred_by);
CREATE INDEX IF NOT EXISTS idx_progress_user ON progress_records(user_id);
CREATE INDEX IF NOT EXISTS idx_stakes_user ON user_stakes(user_id);
CREATE INDEX IF NOT EXISTS idx_user_nfts_user ON user_nfts(user_id);
CREATE INDEX IF NOT EXISTS idx_user_purchases_user ON user_purchases(user_id);
CREATE INDEX IF NOT EXISTS idx_game_scores_game ON game_scores(game_id, score DESC);
CREATE INDEX IF NOT EXISTS idx_transactions_user ON token_transactions(user_id);
"#;
