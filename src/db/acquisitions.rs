//! Acquisition records: minted NFTs and marketplace purchases
//!
//! Rows are written once by the acquisition gate and never mutated.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionKind {
    NftMint,
    MarketplacePurchase,
}

impl AcquisitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionKind::NftMint => "nft_mint",
            AcquisitionKind::MarketplacePurchase => "marketplace_purchase",
        }
    }

    fn table(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            AcquisitionKind::NftMint => ("user_nfts", "nft_id", "minted_at"),
            AcquisitionKind::MarketplacePurchase => ("user_purchases", "item_id", "purchased_at"),
        }
    }
}

/// UserNft / UserPurchase row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionRecord {
    pub id: i64,
    pub kind: AcquisitionKind,
    pub user_id: i64,
    pub definition_id: i64,
    pub price_paid: i64,
    pub acquired_at: DateTime<Utc>,
}

impl AcquisitionRecord {
    fn from_row(kind: AcquisitionKind, row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            kind,
            user_id: row.get(1)?,
            definition_id: row.get(2)?,
            price_paid: row.get(3)?,
            acquired_at: row.get(4)?,
        })
    }
}

pub fn insert_acquisition(
    conn: &Connection,
    kind: AcquisitionKind,
    user_id: i64,
    definition_id: i64,
    price_paid: i64,
    now: DateTime<Utc>,
) -> Result<AcquisitionRecord, LedgerError> {
    let (table, def_col, at_col) = kind.table();
    conn.execute(
        &format!(
            "INSERT INTO {} (user_id, {}, price_paid, {}) VALUES (?, ?, ?, ?)",
            table, def_col, at_col
        ),
        params![user_id, definition_id, price_paid, now],
    )?;

    Ok(AcquisitionRecord {
        id: conn.last_insert_rowid(),
        kind,
        user_id,
        definition_id,
        price_paid,
        acquired_at: now,
    })
}

pub fn list_user_acquisitions(
    conn: &Connection,
    kind: AcquisitionKind,
    user_id: i64,
) -> Result<Vec<AcquisitionRecord>, LedgerError> {
    let (table, def_col, at_col) = kind.table();
    let mut stmt = conn.prepare(&format!(
        "SELECT id, user_id, {def}, price_paid, {at} FROM {table} WHERE user_id = ? ORDER BY {at}, id",
        def = def_col,
        at = at_col,
        table = table
    ))?;
    let rows = stmt
        .query_map(params![user_id], |row| AcquisitionRecord::from_row(kind, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
