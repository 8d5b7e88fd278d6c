//! Progress Tracker
//!
//! Mission and quest records move `Pending -> InProgress -> Completed ->
//! Claimed`. The claim is the idempotency gate for definition rewards:
//! flipping `claimed` and crediting the balance happen in one transaction,
//! and the flip is a conditional update, so a record pays out once.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::catalog::{RewardCatalog, RewardKind};
use crate::clock::Clock;
use crate::db::progress::{self, ProgressKind, ProgressRecord};
use crate::db::{definitions, users, JournalEntry, LedgerDb};
use crate::error::{LedgerError, LedgerResult};

use super::balance::credit_in;
use super::events::{EventBus, LedgerEvent};

/// Result of a successful claim
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub record: ProgressRecord,
    pub amount: i64,
    pub balance: i64,
}

/// Progress record with the definition it tracks
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    #[serde(flatten)]
    pub record: ProgressRecord,
    pub title: String,
    pub reward: i64,
}

pub struct ProgressTracker {
    db: Arc<LedgerDb>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    catalog: Arc<RewardCatalog>,
}

impl ProgressTracker {
    pub fn new(
        db: Arc<LedgerDb>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
        catalog: Arc<RewardCatalog>,
    ) -> Self {
        Self { db, clock, events, catalog }
    }

    /// Start tracking a mission or quest for a user.
    ///
    /// Fails with `AlreadyExists` for a pair that already has a record and
    /// with `Unavailable` for an inactive mission or a closed quest.
    pub fn init_progress(&self, user_id: i64, kind: ProgressKind, definition_id: i64) -> LedgerResult<ProgressRecord> {
        let now = self.clock.now();

        let record = self.db.transaction(|tx| {
            users::get_user(tx, user_id)?.ok_or(LedgerError::UserNotFound(user_id))?;

            let progress_max = match kind {
                ProgressKind::Mission => {
                    let mission = definitions::get_mission(tx, definition_id)?
                        .ok_or_else(|| LedgerError::NotFound(format!("mission {}", definition_id)))?;
                    if !mission.active {
                        return Err(LedgerError::Unavailable(format!("mission {} is inactive", definition_id)));
                    }
                    None
                }
                ProgressKind::Quest => {
                    let quest = definitions::get_quest(tx, definition_id)?
                        .ok_or_else(|| LedgerError::NotFound(format!("quest {}", definition_id)))?;
                    if !quest.is_open(now) {
                        return Err(LedgerError::Unavailable(format!("quest {} is closed", definition_id)));
                    }
                    Some(quest.progress_max)
                }
            };

            progress::insert_progress(tx, kind, user_id, definition_id, progress_max, now)
        })?;

        debug!(record_id = record.id, user_id, kind = %kind, definition_id, "Progress started");
        Ok(record)
    }

    /// Set the progress counter and completion flag of an unclaimed record.
    ///
    /// The counter never moves backwards and `completed` stays set once set.
    /// Quests complete on their own when the counter reaches `progress_max`.
    pub fn update_progress(&self, record_id: i64, progress: i64, completed: bool) -> LedgerResult<ProgressRecord> {
        if progress < 0 {
            return Err(LedgerError::InvalidInput("progress must not be negative".into()));
        }
        let now = self.clock.now();

        self.db.transaction(|tx| {
            let current = find_record(tx, record_id)?;
            if current.claimed {
                return Err(LedgerError::AlreadyClaimed(record_id));
            }
            if progress < current.progress {
                return Err(LedgerError::InvalidInput(format!(
                    "progress cannot go from {} back to {}",
                    current.progress, progress
                )));
            }
            if progress::update_progress(tx, record_id, progress, completed, now)? == 0 {
                return Err(LedgerError::AlreadyClaimed(record_id));
            }
            find_record(tx, record_id)
        })
    }

    /// Pay the definition's reward for a completed record.
    ///
    /// A record owned by someone else fails with `Unauthorized`; an
    /// incomplete or already claimed one with `NotClaimable`.
    pub fn claim_reward(&self, record_id: i64, user_id: i64) -> LedgerResult<ClaimOutcome> {
        let now = self.clock.now();

        let (outcome, kind) = self.db.transaction(|tx| {
            if !progress::mark_claimed(tx, record_id, user_id, now)? {
                let record = find_record(tx, record_id)?;
                return Err(if record.user_id != user_id {
                    LedgerError::Unauthorized
                } else {
                    LedgerError::NotClaimable
                });
            }

            let record = find_record(tx, record_id)?;
            let kind = match record.kind {
                ProgressKind::Mission => RewardKind::Mission { mission_id: record.definition_id },
                ProgressKind::Quest => RewardKind::Quest { quest_id: record.definition_id },
            };
            let amount = self.catalog.amount_for(tx, &kind)?;

            let entry = JournalEntry::new(kind.reason())
                .with_key(format!("progress:{}", record.id))
                .with_metadata(json!({ "kind": record.kind, "definitionId": record.definition_id }));
            let balance = credit_in(tx, user_id, amount, &entry, now)?;

            Ok((ClaimOutcome { record, amount, balance }, kind))
        })
        .map_err(|e| {
            debug!(record_id, user_id, error = %e, "Claim rejected");
            e
        })?;

        info!(record_id, user_id, amount = outcome.amount, "Progress reward claimed");
        self.events.emit(LedgerEvent::RewardGranted { user_id, kind, amount: outcome.amount });
        Ok(outcome)
    }

    /// Get a record owned by `user_id`
    pub fn get(&self, record_id: i64, user_id: i64) -> LedgerResult<ProgressRecord> {
        let record = self.db.with_conn(|conn| find_record(conn, record_id))?;
        if record.user_id != user_id {
            return Err(LedgerError::Unauthorized);
        }
        Ok(record)
    }

    /// A user's records of one kind, with their definitions
    pub fn user_progress(&self, user_id: i64, kind: ProgressKind) -> LedgerResult<Vec<ProgressView>> {
        self.db.with_conn(|conn| {
            let records = progress::list_user_progress(conn, user_id, kind)?;
            let mut views = Vec::with_capacity(records.len());
            for record in records {
                let (title, reward) = match kind {
                    ProgressKind::Mission => match definitions::get_mission(conn, record.definition_id)? {
                        Some(m) => (m.title, m.reward),
                        None => continue,
                    },
                    ProgressKind::Quest => match definitions::get_quest(conn, record.definition_id)? {
                        Some(q) => (q.title, q.reward),
                        None => continue,
                    },
                };
                views.push(ProgressView { record, title, reward });
            }
            Ok(views)
        })
    }
}

fn find_record(conn: &Connection, record_id: i64) -> LedgerResult<ProgressRecord> {
    progress::get_progress(conn, record_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("progress record {}", record_id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::db::definitions::{CreateMissionInput, CreateQuestInput};
    use crate::services::test_support::*;
    use crate::services::Ledger;

    fn mission(ledger: &Ledger, reward: i64) -> i64 {
        ledger
            .catalog
            .create_mission(CreateMissionInput {
                title: "Daily Check-in".into(),
                description: String::new(),
                reward,
                icon: None,
                requirements: None,
                active: true,
            })
            .unwrap()
            .id
    }

    fn quest(ledger: &Ledger, reward: i64, progress_max: i64) -> i64 {
        ledger
            .catalog
            .create_quest(CreateQuestInput {
                title: "Refer 3 Friends".into(),
                description: String::new(),
                reward,
                icon: None,
                requirements: None,
                progress_max,
                active: true,
                expires_at: start() + Duration::days(7),
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_mission_claim_scenario() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);
        let mission_id = mission(&ledger, 50);

        let record = ledger.progress.init_progress(alice.id, ProgressKind::Mission, mission_id).unwrap();
        assert_eq!(record.progress, 0);
        assert!(!record.completed);

        ledger.progress.update_progress(record.id, 1, true).unwrap();
        let outcome = ledger.progress.claim_reward(record.id, alice.id).unwrap();
        assert_eq!(outcome.amount, 50);
        assert_eq!(outcome.balance, 50);
        assert!(outcome.record.claimed);

        let again = ledger.progress.claim_reward(record.id, alice.id);
        assert!(matches!(again, Err(LedgerError::NotClaimable)));
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 50);
    }

    #[test]
    fn test_init_twice_rejected() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);
        let mission_id = mission(&ledger, 50);

        ledger.progress.init_progress(alice.id, ProgressKind::Mission, mission_id).unwrap();
        let again = ledger.progress.init_progress(alice.id, ProgressKind::Mission, mission_id);
        assert!(matches!(again, Err(LedgerError::AlreadyExists(_))));
    }

    #[test]
    fn test_claim_incomplete_is_not_claimable() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);
        let record = ledger
            .progress
            .init_progress(alice.id, ProgressKind::Mission, mission(&ledger, 50))
            .unwrap();

        ledger.progress.update_progress(record.id, 1, false).unwrap();
        assert!(matches!(
            ledger.progress.claim_reward(record.id, alice.id),
            Err(LedgerError::NotClaimable)
        ));
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 0);
    }

    #[test]
    fn test_claim_by_other_user_is_unauthorized() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);
        let mallory = user(&ledger, "mallory", 0);
        let record = ledger
            .progress
            .init_progress(alice.id, ProgressKind::Mission, mission(&ledger, 50))
            .unwrap();
        ledger.progress.update_progress(record.id, 1, true).unwrap();

        let err = ledger.progress.claim_reward(record.id, mallory.id).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized));
        assert_eq!(
            err.public_message(),
            ledger.progress.claim_reward(9_999, mallory.id).unwrap_err().public_message()
        );

        // Still claimable by the owner
        assert_eq!(ledger.progress.claim_reward(record.id, alice.id).unwrap().amount, 50);
    }

    #[test]
    fn test_update_after_claim_rejected() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);
        let record = ledger
            .progress
            .init_progress(alice.id, ProgressKind::Mission, mission(&ledger, 50))
            .unwrap();
        ledger.progress.update_progress(record.id, 1, true).unwrap();
        ledger.progress.claim_reward(record.id, alice.id).unwrap();

        assert!(matches!(
            ledger.progress.update_progress(record.id, 2, true),
            Err(LedgerError::AlreadyClaimed(_))
        ));
        assert!(matches!(
            ledger.progress.update_progress(12_345, 1, true),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_quest_completes_at_target_and_lists() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);
        let quest_id = quest(&ledger, 250, 3);

        let record = ledger.progress.init_progress(alice.id, ProgressKind::Quest, quest_id).unwrap();
        assert_eq!(record.progress_max, Some(3));

        let mid = ledger.progress.update_progress(record.id, 2, false).unwrap();
        assert!(!mid.completed);
        assert!(matches!(
            ledger.progress.update_progress(record.id, 1, false),
            Err(LedgerError::InvalidInput(_))
        ));

        let done = ledger.progress.update_progress(record.id, 3, false).unwrap();
        assert!(done.completed);

        let views = ledger.progress.user_progress(alice.id, ProgressKind::Quest).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].title, "Refer 3 Friends");
        assert_eq!(views[0].reward, 250);

        assert_eq!(ledger.progress.claim_reward(record.id, alice.id).unwrap().amount, 250);
    }

    #[test]
    fn test_expired_quest_cannot_start() {
        let (ledger, clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);
        let quest_id = quest(&ledger, 250, 3);

        clock.advance(Duration::days(8));
        assert!(matches!(
            ledger.progress.init_progress(alice.id, ProgressKind::Quest, quest_id),
            Err(LedgerError::Unavailable(_))
        ));
    }

    #[test]
    fn test_concurrent_claims_pay_once() {
        let (ledger, _clock, _dir) = ledger();
        let ledger = Arc::new(ledger);
        let alice = user(&ledger, "alice", 0);
        let record = ledger
            .progress
            .init_progress(alice.id, ProgressKind::Mission, mission(&ledger, 50))
            .unwrap();
        ledger.progress.update_progress(record.id, 1, true).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.progress.claim_reward(record.id, alice.id))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::NotClaimable)));
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 50);
    }
}
