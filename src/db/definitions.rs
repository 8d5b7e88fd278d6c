//! Catalog definitions: missions, quests, games, vaults, NFT boosters, marketplace items
//!
//! Definitions are immutable once created. Amounts are read at claim or
//! purchase time, never copied into progress rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LedgerError;

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub reward: i64,
    pub icon: Option<String>,
    pub requirements: Option<Value>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub reward: i64,
    pub icon: Option<String>,
    pub requirements: Option<Value>,
    pub progress_max: i64,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
}

impl QuestRow {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub reward: i64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Basis points: 1000 = 10% a year
    pub apr_bps: i64,
    pub min_stake: i64,
    /// NFT / partner-token eligibility, advisory only
    pub requirements: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftBoosterRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub boost: i64,
    pub rarity: String,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceItemRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub item_type: String,
    pub price: i64,
    pub available: bool,
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMissionInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub reward: i64,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub requirements: Option<Value>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuestInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub reward: i64,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub requirements: Option<Value>,
    #[serde(default = "default_progress_max")]
    pub progress_max: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGameInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub reward: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVaultInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub apr_bps: i64,
    #[serde(default)]
    pub min_stake: i64,
    #[serde(default)]
    pub requirements: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNftBoosterInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub boost: i64,
    pub rarity: String,
    pub price: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMarketplaceItemInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub item_type: String,
    pub price: i64,
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool { true }
fn default_progress_max() -> i64 { 1 }

fn non_negative(field: &str, value: i64) -> Result<(), LedgerError> {
    if value < 0 {
        return Err(LedgerError::InvalidInput(format!("{} must not be negative", field)));
    }
    Ok(())
}

// ============================================================================
// Missions
// ============================================================================

fn mission_from_row(row: &Row) -> Result<MissionRow, rusqlite::Error> {
    Ok(MissionRow {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        reward: row.get("reward")?,
        icon: row.get("icon")?,
        requirements: row.get("requirements_json")?,
        active: row.get("active")?,
    })
}

pub fn create_mission(conn: &Connection, input: &CreateMissionInput) -> Result<MissionRow, LedgerError> {
    non_negative("reward", input.reward)?;
    conn.execute(
        "INSERT INTO daily_missions (title, description, reward, icon, requirements_json, active)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![input.title, input.description, input.reward, input.icon, input.requirements, input.active],
    )?;
    let id = conn.last_insert_rowid();
    get_mission(conn, id)?.ok_or_else(|| LedgerError::Database("Mission not found after insert".into()))
}

pub fn get_mission(conn: &Connection, id: i64) -> Result<Option<MissionRow>, LedgerError> {
    conn.query_row("SELECT * FROM daily_missions WHERE id = ?", params![id], mission_from_row)
        .optional()
        .map_err(LedgerError::from)
}

pub fn list_missions(conn: &Connection) -> Result<Vec<MissionRow>, LedgerError> {
    let mut stmt = conn.prepare("SELECT * FROM daily_missions WHERE active = 1 ORDER BY id")?;
    let rows = stmt
        .query_map([], mission_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// Quests
// ============================================================================

fn quest_from_row(row: &Row) -> Result<QuestRow, rusqlite::Error> {
    Ok(QuestRow {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        reward: row.get("reward")?,
        icon: row.get("icon")?,
        requirements: row.get("requirements_json")?,
        progress_max: row.get("progress_max")?,
        active: row.get("active")?,
        expires_at: row.get("expires_at")?,
    })
}

pub fn create_quest(conn: &Connection, input: &CreateQuestInput) -> Result<QuestRow, LedgerError> {
    non_negative("reward", input.reward)?;
    if input.progress_max <= 0 {
        return Err(LedgerError::InvalidInput("progress_max must be positive".into()));
    }
    conn.execute(
        "INSERT INTO weekly_quests (title, description, reward, icon, requirements_json, progress_max, active, expires_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            input.title,
            input.description,
            input.reward,
            input.icon,
            input.requirements,
            input.progress_max,
            input.active,
            input.expires_at,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_quest(conn, id)?.ok_or_else(|| LedgerError::Database("Quest not found after insert".into()))
}

pub fn get_quest(conn: &Connection, id: i64) -> Result<Option<QuestRow>, LedgerError> {
    conn.query_row("SELECT * FROM weekly_quests WHERE id = ?", params![id], quest_from_row)
        .optional()
        .map_err(LedgerError::from)
}

/// Active quests that have not yet expired
pub fn list_open_quests(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<QuestRow>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM weekly_quests WHERE active = 1 AND expires_at > ? ORDER BY expires_at, id",
    )?;
    let rows = stmt
        .query_map(params![now], quest_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// Games
// ============================================================================

fn game_from_row(row: &Row) -> Result<GameRow, rusqlite::Error> {
    Ok(GameRow {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        reward: row.get("reward")?,
        active: row.get("active")?,
    })
}

pub fn create_game(conn: &Connection, input: &CreateGameInput) -> Result<GameRow, LedgerError> {
    non_negative("reward", input.reward)?;
    conn.execute(
        "INSERT INTO games (title, description, reward, active) VALUES (?, ?, ?, ?)",
        params![input.title, input.description, input.reward, input.active],
    )?;
    let id = conn.last_insert_rowid();
    get_game(conn, id)?.ok_or_else(|| LedgerError::Database("Game not found after insert".into()))
}

pub fn get_game(conn: &Connection, id: i64) -> Result<Option<GameRow>, LedgerError> {
    conn.query_row("SELECT * FROM games WHERE id = ?", params![id], game_from_row)
        .optional()
        .map_err(LedgerError::from)
}

pub fn list_games(conn: &Connection) -> Result<Vec<GameRow>, LedgerError> {
    let mut stmt = conn.prepare("SELECT * FROM games WHERE active = 1 ORDER BY id")?;
    let rows = stmt.query_map([], game_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// Staking vaults
// ============================================================================

fn vault_from_row(row: &Row) -> Result<VaultRow, rusqlite::Error> {
    Ok(VaultRow {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        apr_bps: row.get("apr_bps")?,
        min_stake: row.get("min_stake")?,
        requirements: row.get("requirements_json")?,
    })
}

pub fn create_vault(conn: &Connection, input: &CreateVaultInput) -> Result<VaultRow, LedgerError> {
    non_negative("apr_bps", input.apr_bps)?;
    non_negative("min_stake", input.min_stake)?;
    conn.execute(
        "INSERT INTO staking_vaults (name, description, apr_bps, min_stake, requirements_json)
         VALUES (?, ?, ?, ?, ?)",
        params![input.name, input.description, input.apr_bps, input.min_stake, input.requirements],
    )?;
    let id = conn.last_insert_rowid();
    get_vault(conn, id)?.ok_or(LedgerError::VaultNotFound(id))
}

pub fn get_vault(conn: &Connection, id: i64) -> Result<Option<VaultRow>, LedgerError> {
    conn.query_row("SELECT * FROM staking_vaults WHERE id = ?", params![id], vault_from_row)
        .optional()
        .map_err(LedgerError::from)
}

pub fn list_vaults(conn: &Connection) -> Result<Vec<VaultRow>, LedgerError> {
    let mut stmt = conn.prepare("SELECT * FROM staking_vaults ORDER BY id")?;
    let rows = stmt.query_map([], vault_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// NFT boosters
// ============================================================================

fn nft_from_row(row: &Row) -> Result<NftBoosterRow, rusqlite::Error> {
    Ok(NftBoosterRow {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        boost: row.get("boost")?,
        rarity: row.get("rarity")?,
        price: row.get("price")?,
    })
}

pub fn create_nft_booster(conn: &Connection, input: &CreateNftBoosterInput) -> Result<NftBoosterRow, LedgerError> {
    non_negative("price", input.price)?;
    conn.execute(
        "INSERT INTO nft_boosters (name, description, boost, rarity, price) VALUES (?, ?, ?, ?, ?)",
        params![input.name, input.description, input.boost, input.rarity, input.price],
    )?;
    let id = conn.last_insert_rowid();
    get_nft_booster(conn, id)?
        .ok_or_else(|| LedgerError::Database("NFT booster not found after insert".into()))
}

pub fn get_nft_booster(conn: &Connection, id: i64) -> Result<Option<NftBoosterRow>, LedgerError> {
    conn.query_row("SELECT * FROM nft_boosters WHERE id = ?", params![id], nft_from_row)
        .optional()
        .map_err(LedgerError::from)
}

pub fn list_nft_boosters(conn: &Connection) -> Result<Vec<NftBoosterRow>, LedgerError> {
    let mut stmt = conn.prepare("SELECT * FROM nft_boosters ORDER BY price, id")?;
    let rows = stmt.query_map([], nft_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// Marketplace items
// ============================================================================

fn item_from_row(row: &Row) -> Result<MarketplaceItemRow, rusqlite::Error> {
    Ok(MarketplaceItemRow {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        item_type: row.get("item_type")?,
        price: row.get("price")?,
        available: row.get("available")?,
    })
}

pub fn create_marketplace_item(
    conn: &Connection,
    input: &CreateMarketplaceItemInput,
) -> Result<MarketplaceItemRow, LedgerError> {
    non_negative("price", input.price)?;
    conn.execute(
        "INSERT INTO marketplace_items (name, description, item_type, price, available)
         VALUES (?, ?, ?, ?, ?)",
        params![input.name, input.description, input.item_type, input.price, input.available],
    )?;
    let id = conn.last_insert_rowid();
    get_marketplace_item(conn, id)?
        .ok_or_else(|| LedgerError::Database("Marketplace item not found after insert".into()))
}

pub fn get_marketplace_item(conn: &Connection, id: i64) -> Result<Option<MarketplaceItemRow>, LedgerError> {
    conn.query_row("SELECT * FROM marketplace_items WHERE id = ?", params![id], item_from_row)
        .optional()
        .map_err(LedgerError::from)
}

/// Available items only
pub fn list_marketplace_items(conn: &Connection) -> Result<Vec<MarketplaceItemRow>, LedgerError> {
    let mut stmt = conn.prepare("SELECT * FROM marketplace_items WHERE available = 1 ORDER BY id")?;
    let rows = stmt.query_map([], item_from_row)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_marketplace_item_available(conn: &Connection, id: i64, available: bool) -> Result<(), LedgerError> {
    let updated = conn.execute(
        "UPDATE marketplace_items SET available = ? WHERE id = ?",
        params![available, id],
    )?;
    if updated == 0 {
        return Err(LedgerError::NotFound(format!("marketplace item {}", id)));
    }
    Ok(())
}

/// True when no definitions of any kind exist yet
pub fn catalog_is_empty(conn: &Connection) -> Result<bool, LedgerError> {
    let total: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM daily_missions)
              + (SELECT COUNT(*) FROM weekly_quests)
              + (SELECT COUNT(*) FROM staking_vaults)
              + (SELECT COUNT(*) FROM games)
              + (SELECT COUNT(*) FROM nft_boosters)
              + (SELECT COUNT(*) FROM marketplace_items)",
        [],
        |row| row.get(0),
    )?;
    Ok(total == 0)
}
