//! User rows and the conditional balance primitives

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::map_insert_error;
use crate::error::LedgerError;

/// User row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub wallet_address: Option<String>,
    pub balance: i64,
    pub referral_code: String,
    pub referred_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            wallet_address: row.get("wallet_address")?,
            balance: row.get("balance")?,
            referral_code: row.get("referral_code")?,
            referred_by: row.get("referred_by")?,
            created_at: row.get("created_at")?,
        })
    }
}

const SELECT_USER: &str = "SELECT id, username, wallet_address, balance, referral_code, referred_by, created_at FROM users";

pub fn insert_user(
    conn: &Connection,
    username: &str,
    wallet_address: Option<&str>,
    referral_code: &str,
    referred_by: Option<i64>,
    now: DateTime<Utc>,
) -> Result<UserRow, LedgerError> {
    conn.execute(
        "INSERT INTO users (username, wallet_address, balance, referral_code, referred_by, created_at)
         VALUES (?, ?, 0, ?, ?, ?)",
        params![username, wallet_address, referral_code, referred_by, now],
    )
    .map_err(|e| map_insert_error(e, format!("user '{}' or wallet already registered", username)))?;

    let id = conn.last_insert_rowid();
    get_user(conn, id)?.ok_or(LedgerError::UserNotFound(id))
}

pub fn get_user(conn: &Connection, id: i64) -> Result<Option<UserRow>, LedgerError> {
    conn.query_row(&format!("{} WHERE id = ?", SELECT_USER), params![id], UserRow::from_row)
        .optional()
        .map_err(LedgerError::from)
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>, LedgerError> {
    conn.query_row(
        &format!("{} WHERE username = ?", SELECT_USER),
        params![username],
        UserRow::from_row,
    )
    .optional()
    .map_err(LedgerError::from)
}

pub fn get_user_by_wallet(conn: &Connection, address: &str) -> Result<Option<UserRow>, LedgerError> {
    conn.query_row(
        &format!("{} WHERE wallet_address = ?", SELECT_USER),
        params![address],
        UserRow::from_row,
    )
    .optional()
    .map_err(LedgerError::from)
}

pub fn get_user_by_referral_code(conn: &Connection, code: &str) -> Result<Option<UserRow>, LedgerError> {
    conn.query_row(
        &format!("{} WHERE referral_code = ?", SELECT_USER),
        params![code],
        UserRow::from_row,
    )
    .optional()
    .map_err(LedgerError::from)
}

pub fn referral_code_exists(conn: &Connection, code: &str) -> Result<bool, LedgerError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE referral_code = ?",
        params![code],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Attach a wallet address. Fails with `AlreadyExists` if another user holds it.
pub fn set_wallet_address(conn: &Connection, user_id: i64, address: &str) -> Result<(), LedgerError> {
    let updated = conn
        .execute(
            "UPDATE users SET wallet_address = ? WHERE id = ?",
            params![address, user_id],
        )
        .map_err(|e| map_insert_error(e, format!("wallet {} already registered", address)))?;
    if updated == 0 {
        return Err(LedgerError::UserNotFound(user_id));
    }
    Ok(())
}

/// Record the referral edge. The edge is append-only: a user already
/// referred keeps the original referrer.
pub fn set_referred_by(conn: &Connection, user_id: i64, referrer_id: i64) -> Result<bool, LedgerError> {
    let updated = conn.execute(
        "UPDATE users SET referred_by = ? WHERE id = ? AND referred_by IS NULL",
        params![referrer_id, user_id],
    )?;
    Ok(updated == 1)
}

pub fn balance_of(conn: &Connection, user_id: i64) -> Result<i64, LedgerError> {
    conn.query_row("SELECT balance FROM users WHERE id = ?", params![user_id], |row| row.get(0))
        .optional()?
        .ok_or(LedgerError::UserNotFound(user_id))
}

/// Increase a balance. Returns the new balance.
pub fn increase_balance(conn: &Connection, user_id: i64, amount: i64) -> Result<i64, LedgerError> {
    conn.query_row(
        "UPDATE users SET balance = balance + ?1 WHERE id = ?2 RETURNING balance",
        params![amount, user_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(LedgerError::UserNotFound(user_id))
}

/// Decrease a balance only if it covers `amount`. Returns the new balance.
///
/// Check and decrement are one statement, so no concurrent writer can
/// slip in between them.
pub fn decrease_balance(conn: &Connection, user_id: i64, amount: i64) -> Result<i64, LedgerError> {
    let updated: Option<i64> = conn
        .query_row(
            "UPDATE users SET balance = balance - ?1 WHERE id = ?2 AND balance >= ?1 RETURNING balance",
            params![amount, user_id],
            |row| row.get(0),
        )
        .optional()?;

    match updated {
        Some(balance) => Ok(balance),
        None => {
            let available = balance_of(conn, user_id)?;
            Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            })
        }
    }
}

/// Users whose `referred_by` points at `referrer_id`: (count, sum of balances)
pub fn referral_totals(conn: &Connection, referrer_id: i64) -> Result<(i64, i64), LedgerError> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(balance), 0) FROM users WHERE referred_by = ?",
        params![referrer_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(LedgerError::from)
}

/// Per-referrer aggregates, most referrals first
pub fn referral_leaderboard(
    conn: &Connection,
    limit: u32,
) -> Result<Vec<(i64, String, i64, i64)>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT referrer.id, referrer.username, COUNT(referee.id) AS referrals,
                COALESCE(SUM(referee.balance), 0) AS referred_balance
         FROM users AS referrer
         JOIN users AS referee ON referee.referred_by = referrer.id
         GROUP BY referrer.id, referrer.username
         ORDER BY referrals DESC, referrer.id ASC
         LIMIT ?",
    )?;

    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
