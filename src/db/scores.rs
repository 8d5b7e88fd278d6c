//! Game scores and leaderboards

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameScoreRow {
    pub id: i64,
    pub user_id: i64,
    pub game_id: i64,
    pub score: i64,
    pub played_at: DateTime<Utc>,
}

impl GameScoreRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            game_id: row.get("game_id")?,
            score: row.get("score")?,
            played_at: row.get("played_at")?,
        })
    }
}

/// Best score per user for one game
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub best_score: i64,
}

pub fn best_score(conn: &Connection, user_id: i64, game_id: i64) -> Result<Option<i64>, LedgerError> {
    conn.query_row(
        "SELECT MAX(score) FROM game_scores WHERE user_id = ? AND game_id = ?",
        params![user_id, game_id],
        |row| row.get(0),
    )
    .map_err(LedgerError::from)
}

pub fn insert_score(
    conn: &Connection,
    user_id: i64,
    game_id: i64,
    score: i64,
    now: DateTime<Utc>,
) -> Result<GameScoreRow, LedgerError> {
    conn.execute(
        "INSERT INTO game_scores (user_id, game_id, score, played_at) VALUES (?, ?, ?, ?)",
        params![user_id, game_id, score, now],
    )?;
    Ok(GameScoreRow {
        id: conn.last_insert_rowid(),
        user_id,
        game_id,
        score,
        played_at: now,
    })
}

pub fn leaderboard(conn: &Connection, game_id: i64, limit: u32) -> Result<Vec<LeaderboardEntry>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, MAX(s.score) AS best
         FROM game_scores s JOIN users u ON u.id = s.user_id
         WHERE s.game_id = ?
         GROUP BY u.id, u.username
         ORDER BY best DESC, u.id ASC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![game_id, limit as i64], |row| {
            Ok(LeaderboardEntry {
                user_id: row.get(0)?,
                username: row.get(1)?,
                best_score: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_user_scores(conn: &Connection, user_id: i64) -> Result<Vec<GameScoreRow>, LedgerError> {
    let mut stmt = conn.prepare("SELECT * FROM game_scores WHERE user_id = ? ORDER BY played_at DESC, id DESC")?;
    let rows = stmt
        .query_map(params![user_id], GameScoreRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
