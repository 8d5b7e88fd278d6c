//! Stake records

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::LedgerError;

/// Stake row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeRow {
    pub id: i64,
    pub user_id: i64,
    pub vault_id: i64,
    /// Principal
    pub amount: i64,
    /// Accrued rewards already paid out
    pub rewards_paid: i64,
    pub staked_at: DateTime<Utc>,
    pub last_claimed: DateTime<Utc>,
}

impl StakeRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            vault_id: row.get("vault_id")?,
            amount: row.get("amount")?,
            rewards_paid: row.get("rewards_paid")?,
            staked_at: row.get("staked_at")?,
            last_claimed: row.get("last_claimed")?,
        })
    }
}

pub fn insert_stake(
    conn: &Connection,
    user_id: i64,
    vault_id: i64,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<StakeRow, LedgerError> {
    conn.execute(
        "INSERT INTO user_stakes (user_id, vault_id, amount, rewards_paid, staked_at, last_claimed)
         VALUES (?, ?, ?, 0, ?, ?)",
        params![user_id, vault_id, amount, now, now],
    )?;
    let id = conn.last_insert_rowid();
    get_stake(conn, id)?.ok_or(LedgerError::StakeNotFound(id))
}

pub fn get_stake(conn: &Connection, id: i64) -> Result<Option<StakeRow>, LedgerError> {
    conn.query_row("SELECT * FROM user_stakes WHERE id = ?", params![id], StakeRow::from_row)
        .optional()
        .map_err(LedgerError::from)
}

pub fn list_user_stakes(conn: &Connection, user_id: i64) -> Result<Vec<StakeRow>, LedgerError> {
    let mut stmt = conn.prepare("SELECT * FROM user_stakes WHERE user_id = ? ORDER BY staked_at, id")?;
    let rows = stmt
        .query_map(params![user_id], StakeRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Advance `last_claimed` from `expected_last_claimed` to `now` and add
/// `paid` to the paid-out counter.
///
/// Compare-and-set: returns false if another claim already moved
/// `last_claimed`, in which case nothing is written.
pub fn advance_claim(
    conn: &Connection,
    id: i64,
    expected_last_claimed: DateTime<Utc>,
    now: DateTime<Utc>,
    paid: i64,
) -> Result<bool, LedgerError> {
    let updated = conn.execute(
        "UPDATE user_stakes SET last_claimed = ?, rewards_paid = rewards_paid + ?
         WHERE id = ? AND last_claimed = ?",
        params![now, paid, id, expected_last_claimed],
    )?;
    Ok(updated == 1)
}

/// Remove a stake. Returns false when it was already gone.
pub fn delete_stake(conn: &Connection, id: i64, user_id: i64) -> Result<bool, LedgerError> {
    let deleted = conn.execute(
        "DELETE FROM user_stakes WHERE id = ? AND user_id = ?",
        params![id, user_id],
    )?;
    Ok(deleted == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::definitions::{create_vault, CreateVaultInput};
    use crate::db::{users, LedgerDb};
    use chrono::Duration;

    #[test]
    fn test_advance_claim_is_compare_and_set() {
        let db = LedgerDb::open_in_memory().unwrap();
        let t0 = Utc::now();
        let stake = db
            .transaction(|tx| {
                let user = users::insert_user(tx, "alice", None, "ALICE001", None, t0)?;
                let vault = create_vault(tx, &CreateVaultInput {
                    name: "Basic".into(),
                    description: String::new(),
                    apr_bps: 1000,
                    min_stake: 0,
                    requirements: None,
                })?;
                insert_stake(tx, user.id, vault.id, 500, t0)
            })
            .unwrap();

        let t1 = t0 + Duration::hours(1);
        assert!(db.with_conn(|conn| advance_claim(conn, stake.id, t0, t1, 5)).unwrap());
        // Stale expectation loses
        assert!(!db.with_conn(|conn| advance_claim(conn, stake.id, t0, t1, 5)).unwrap());

        let row = db.with_conn(|conn| get_stake(conn, stake.id)).unwrap().unwrap();
        assert_eq!(row.rewards_paid, 5);
        assert_eq!(row.last_claimed, t1);
        assert!(row.last_claimed >= row.staked_at);
    }
}
