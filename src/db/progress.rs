//! Mission and quest progress records
//!
//! One row per (kind, user, definition). `claimed = 1` is terminal: the
//! claim gate is a single conditional UPDATE, so a record can flip to
//! claimed at most once no matter how many claims race.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::map_insert_error;
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Mission,
    Quest,
}

impl ProgressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressKind::Mission => "mission",
            ProgressKind::Quest => "quest",
        }
    }
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mission" => Ok(ProgressKind::Mission),
            "quest" => Ok(ProgressKind::Quest),
            other => Err(LedgerError::InvalidInput(format!("unknown progress kind '{}'", other))),
        }
    }
}

impl ToSql for ProgressKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ProgressKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
    }
}

/// Progress record from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: i64,
    pub kind: ProgressKind,
    pub user_id: i64,
    pub definition_id: i64,
    pub progress: i64,
    /// Quests only
    pub progress_max: Option<i64>,
    pub completed: bool,
    pub claimed: bool,
    pub last_updated: DateTime<Utc>,
}

impl ProgressRecord {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            user_id: row.get("user_id")?,
            definition_id: row.get("definition_id")?,
            progress: row.get("progress")?,
            progress_max: row.get("progress_max")?,
            completed: row.get("completed")?,
            claimed: row.get("claimed")?,
            last_updated: row.get("last_updated")?,
        })
    }
}

pub fn insert_progress(
    conn: &Connection,
    kind: ProgressKind,
    user_id: i64,
    definition_id: i64,
    progress_max: Option<i64>,
    now: DateTime<Utc>,
) -> Result<ProgressRecord, LedgerError> {
    conn.execute(
        "INSERT INTO progress_records (kind, user_id, definition_id, progress, progress_max, completed, claimed, last_updated)
         VALUES (?, ?, ?, 0, ?, 0, 0, ?)",
        params![kind, user_id, definition_id, progress_max, now],
    )
    .map_err(|e| {
        map_insert_error(
            e,
            format!("{} progress for user {} and {} {}", kind, user_id, kind, definition_id),
        )
    })?;

    let id = conn.last_insert_rowid();
    get_progress(conn, id)?
        .ok_or_else(|| LedgerError::Database("Progress record not found after insert".into()))
}

pub fn get_progress(conn: &Connection, id: i64) -> Result<Option<ProgressRecord>, LedgerError> {
    conn.query_row("SELECT * FROM progress_records WHERE id = ?", params![id], ProgressRecord::from_row)
        .optional()
        .map_err(LedgerError::from)
}

/// Overwrite progress on an unclaimed record.
///
/// `completed` is sticky once set. Quest records also complete once
/// `progress >= progress_max`. Returns the number of rows touched (0 when
/// the record is claimed or absent).
pub fn update_progress(
    conn: &Connection,
    id: i64,
    progress: i64,
    completed: bool,
    now: DateTime<Utc>,
) -> Result<usize, LedgerError> {
    let updated = conn.execute(
        "UPDATE progress_records
         SET progress = ?1,
             completed = (completed OR ?2 OR (progress_max IS NOT NULL AND ?1 >= progress_max)),
             last_updated = ?3
         WHERE id = ?4 AND claimed = 0",
        params![progress, completed, now, id],
    )?;
    Ok(updated)
}

/// Flip `claimed` on a completed, unclaimed record owned by `user_id`.
/// Returns false when any of those conditions does not hold.
pub fn mark_claimed(
    conn: &Connection,
    id: i64,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<bool, LedgerError> {
    let updated = conn.execute(
        "UPDATE progress_records SET claimed = 1, last_updated = ?
         WHERE id = ? AND user_id = ? AND completed = 1 AND claimed = 0",
        params![now, id, user_id],
    )?;
    Ok(updated == 1)
}

pub fn list_user_progress(
    conn: &Connection,
    user_id: i64,
    kind: ProgressKind,
) -> Result<Vec<ProgressRecord>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM progress_records WHERE user_id = ? AND kind = ? ORDER BY definition_id",
    )?;
    let rows = stmt
        .query_map(params![user_id, kind], ProgressRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{users, LedgerDb};

    fn setup() -> (LedgerDb, i64) {
        let db = LedgerDb::open_in_memory().unwrap();
        let user = db
            .transaction(|tx| users::insert_user(tx, "alice", None, "ALICE001", None, Utc::now()))
            .unwrap();
        (db, user.id)
    }

    #[test]
    fn test_second_insert_for_same_pair_is_rejected() {
        let (db, user_id) = setup();
        db.with_conn(|conn| insert_progress(conn, ProgressKind::Mission, user_id, 1, None, Utc::now()))
            .unwrap();
        let err = db
            .with_conn(|conn| insert_progress(conn, ProgressKind::Mission, user_id, 1, None, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists(_)));

        // Same definition id under the other kind is a different pair
        db.with_conn(|conn| insert_progress(conn, ProgressKind::Quest, user_id, 1, Some(3), Utc::now()))
            .unwrap();
    }

    #[test]
    fn test_quest_autocompletes_at_max() {
        let (db, user_id) = setup();
        let record = db
            .with_conn(|conn| insert_progress(conn, ProgressKind::Quest, user_id, 7, Some(3), Utc::now()))
            .unwrap();

        db.with_conn(|conn| update_progress(conn, record.id, 2, false, Utc::now())).unwrap();
        let mid = db.with_conn(|conn| get_progress(conn, record.id)).unwrap().unwrap();
        assert!(!mid.completed);

        db.with_conn(|conn| update_progress(conn, record.id, 3, false, Utc::now())).unwrap();
        let done = db.with_conn(|conn| get_progress(conn, record.id)).unwrap().unwrap();
        assert!(done.completed);
    }

    #[test]
    fn test_mark_claimed_only_once() {
        let (db, user_id) = setup();
        let record = db
            .with_conn(|conn| insert_progress(conn, ProgressKind::Mission, user_id, 1, None, Utc::now()))
            .unwrap();

        assert!(!db.with_conn(|conn| mark_claimed(conn, record.id, user_id, Utc::now())).unwrap());
        db.with_conn(|conn| update_progress(conn, record.id, 1, true, Utc::now())).unwrap();
        assert!(db.with_conn(|conn| mark_claimed(conn, record.id, user_id, Utc::now())).unwrap());
        assert!(!db.with_conn(|conn| mark_claimed(conn, record.id, user_id, Utc::now())).unwrap());

        // Claimed records are frozen
        let touched = db.with_conn(|conn| update_progress(conn, record.id, 0, false, Utc::now())).unwrap();
        assert_eq!(touched, 0);
    }
}
