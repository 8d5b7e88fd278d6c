//! Token transaction journal
//!
//! Every balance mutation writes one row here inside the same transaction
//! as the mutation itself. Rows carrying an `idempotency_key` can be
//! written only once, which is what makes one-off rewards exactly-once.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::map_insert_error;
use crate::error::LedgerError;

/// Suffix shared by every reason that counts as a distributed reward
pub const REWARD_SUFFIX: &str = "_reward";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }
}

/// What a balance mutation is for
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JournalEntry {
    pub reason: String,
    pub idempotency_key: Option<String>,
    pub metadata: Option<Value>,
}

impl JournalEntry {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    pub id: i64,
    pub user_id: i64,
    pub direction: String,
    pub amount: i64,
    pub reason: String,
    pub idempotency_key: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            direction: row.get("direction")?,
            amount: row.get("amount")?,
            reason: row.get("reason")?,
            idempotency_key: row.get("idempotency_key")?,
            metadata: row.get("metadata_json")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Totals across the whole journal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStats {
    pub total_distributed: i64,
    pub total_transactions: i64,
    pub distribution_by_reason: BTreeMap<String, i64>,
}

pub fn insert_transaction(
    conn: &Connection,
    user_id: i64,
    direction: Direction,
    amount: i64,
    entry: &JournalEntry,
    now: DateTime<Utc>,
) -> Result<i64, LedgerError> {
    conn.execute(
        "INSERT INTO token_transactions (user_id, direction, amount, reason, idempotency_key, metadata_json, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            direction.as_str(),
            amount,
            entry.reason,
            entry.idempotency_key,
            entry.metadata,
            now,
        ],
    )
    .map_err(|e| {
        map_insert_error(
            e,
            format!("reward '{}'", entry.idempotency_key.as_deref().unwrap_or(&entry.reason)),
        )
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn key_exists(conn: &Connection, key: &str) -> Result<bool, LedgerError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM token_transactions WHERE idempotency_key = ?",
        params![key],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_user_transactions(
    conn: &Connection,
    user_id: i64,
    limit: u32,
) -> Result<Vec<TransactionRow>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM token_transactions WHERE user_id = ? ORDER BY id DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![user_id, limit as i64], TransactionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn distribution_stats(conn: &Connection) -> Result<DistributionStats, LedgerError> {
    let total_transactions: i64 =
        conn.query_row("SELECT COUNT(*) FROM token_transactions", [], |row| row.get(0))?;

    let mut stmt = conn.prepare(
        "SELECT reason, SUM(amount) FROM token_transactions
         WHERE direction = 'credit' AND substr(reason, -length(?1)) = ?1
         GROUP BY reason",
    )?;
    let distribution_by_reason = stmt
        .query_map(params![REWARD_SUFFIX], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(DistributionStats {
        total_distributed: distribution_by_reason.values().sum(),
        total_transactions,
        distribution_by_reason,
    })
}
