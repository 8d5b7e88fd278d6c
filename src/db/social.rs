//! Social platform connections
//!
//! At most one row per (user, platform); reconnecting reuses the row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialConnectionRow {
    pub id: i64,
    pub user_id: i64,
    pub platform: String,
    pub username: Option<String>,
    pub connected: bool,
    pub connected_at: DateTime<Utc>,
}

impl SocialConnectionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            platform: row.get("platform")?,
            username: row.get("username")?,
            connected: row.get("connected")?,
            connected_at: row.get("connected_at")?,
        })
    }
}

/// Insert or reactivate the (user, platform) connection
pub fn upsert_connection(
    conn: &Connection,
    user_id: i64,
    platform: &str,
    username: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SocialConnectionRow, LedgerError> {
    conn.query_row(
        "INSERT INTO social_connections (user_id, platform, username, connected, connected_at)
         VALUES (?1, ?2, ?3, 1, ?4)
         ON CONFLICT (user_id, platform) DO UPDATE
         SET username = excluded.username, connected = 1, connected_at = excluded.connected_at
         RETURNING *",
        params![user_id, platform, username, now],
        SocialConnectionRow::from_row,
    )
    .map_err(LedgerError::from)
}

/// Mark a connection as disconnected. Returns false when the connection
/// does not exist or belongs to someone else.
pub fn disconnect(conn: &Connection, connection_id: i64, user_id: i64) -> Result<bool, LedgerError> {
    let updated = conn.execute(
        "UPDATE social_connections SET connected = 0 WHERE id = ? AND user_id = ?",
        params![connection_id, user_id],
    )?;
    Ok(updated == 1)
}

pub fn get_connection(conn: &Connection, id: i64) -> Result<Option<SocialConnectionRow>, LedgerError> {
    conn.query_row(
        "SELECT * FROM social_connections WHERE id = ?",
        params![id],
        SocialConnectionRow::from_row,
    )
    .optional()
    .map_err(LedgerError::from)
}

pub fn list_connections(conn: &Connection, user_id: i64) -> Result<Vec<SocialConnectionRow>, LedgerError> {
    let mut stmt = conn.prepare("SELECT * FROM social_connections WHERE user_id = ? ORDER BY platform")?;
    let rows = stmt
        .query_map(params![user_id], SocialConnectionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
