//! Reward Distributor - one-off rewards
//!
//! Trivia sessions, wallet and social connections, referrals and game high
//! scores. Each grant writes a journal row under a unique idempotency key
//! in the same transaction as the credit, so replaying a command cannot
//! pay twice: the second insert fails with `AlreadyExists` and the whole
//! transaction rolls back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{ReferralRole, RewardCatalog, RewardKind, SocialPlatform, TriviaKind, WalletKind};
use crate::clock::Clock;
use crate::db::journal::{self, DistributionStats};
use crate::db::{definitions, scores, social, users};
use crate::db::{GameScoreRow, JournalEntry, LeaderboardEntry, LedgerDb, SocialConnectionRow, UserRow};
use crate::error::{LedgerError, LedgerResult};

use super::balance::{create_user_in, credit_in, CreateUserInput};
use super::events::{EventBus, LedgerEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardGrant {
    pub user_id: i64,
    pub kind: RewardKind,
    pub amount: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialConnectOutcome {
    pub connection: SocialConnectionRow,
    /// None on reconnects and for platforms without a reward
    pub reward: Option<RewardGrant>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralOutcome {
    pub referrer: RewardGrant,
    pub referee: RewardGrant,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameScoreOutcome {
    pub score: GameScoreRow,
    pub previous_best: Option<i64>,
    pub reward: Option<RewardGrant>,
}

pub struct RewardDistributor {
    db: Arc<LedgerDb>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    catalog: Arc<RewardCatalog>,
}

impl RewardDistributor {
    pub fn new(
        db: Arc<LedgerDb>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
        catalog: Arc<RewardCatalog>,
    ) -> Self {
        Self { db, clock, events, catalog }
    }

    /// Credit `kind` under `key` inside an open transaction
    fn grant_in(
        &self,
        conn: &Connection,
        user_id: i64,
        kind: RewardKind,
        key: String,
        now: DateTime<Utc>,
    ) -> LedgerResult<RewardGrant> {
        let amount = self.catalog.amount_for(conn, &kind)?;
        let entry = JournalEntry::new(kind.reason())
            .with_key(key)
            .with_metadata(serde_json::to_value(kind)?);
        let balance = credit_in(conn, user_id, amount, &entry, now)?;
        Ok(RewardGrant { user_id, kind, amount, balance })
    }

    fn announce(&self, grant: &RewardGrant) {
        info!(user_id = grant.user_id, amount = grant.amount, reward = %grant.kind, "Reward granted");
        self.events.emit(LedgerEvent::RewardGranted {
            user_id: grant.user_id,
            kind: grant.kind,
            amount: grant.amount,
        });
    }

    // =========================================================================
    // Trivia
    // =========================================================================

    /// Pay a finished trivia session; each session id pays once per user
    pub fn complete_trivia(
        &self,
        user_id: i64,
        session_id: &str,
        kind: TriviaKind,
        correct: u32,
        total: u32,
    ) -> LedgerResult<RewardGrant> {
        if session_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("session id is required".into()));
        }
        let now = self.clock.now();
        let reward = RewardKind::Trivia { kind, correct, total };
        let key = format!("trivia:{}:{}", user_id, session_id);

        let grant = self.db.transaction(|tx| self.grant_in(tx, user_id, reward, key, now))?;
        self.announce(&grant);
        Ok(grant)
    }

    // =========================================================================
    // Wallets
    // =========================================================================

    /// Record a wallet connection and pay its reward once per kind.
    ///
    /// The first address a user connects becomes their wallet address; an
    /// address held by another user is rejected.
    pub fn connect_wallet(&self, user_id: i64, address: &str, kind: WalletKind) -> LedgerResult<RewardGrant> {
        let address = address.trim();
        if address.is_empty() {
            return Err(LedgerError::InvalidInput("wallet address is required".into()));
        }
        let now = self.clock.now();

        let grant = self.db.transaction(|tx| {
            let user = users::get_user(tx, user_id)?.ok_or(LedgerError::UserNotFound(user_id))?;
            if let Some(holder) = users::get_user_by_wallet(tx, address)? {
                if holder.id != user_id {
                    return Err(LedgerError::AlreadyExists(format!("wallet {}", address)));
                }
            }
            if user.wallet_address.is_none() {
                users::set_wallet_address(tx, user_id, address)?;
            }

            let key = format!("wallet:{}:{}", user_id, kind.as_str());
            self.grant_in(tx, user_id, RewardKind::Wallet { kind }, key, now)
        })?;

        self.announce(&grant);
        Ok(grant)
    }

    // =========================================================================
    // Social
    // =========================================================================

    /// Connect (or reconnect) a social account.
    ///
    /// Twitter, Discord and GitHub pay on the first connection only; other
    /// platforms are stored without a reward.
    pub fn connect_social(&self, user_id: i64, platform: &str, username: Option<&str>) -> LedgerResult<SocialConnectOutcome> {
        let platform = platform.trim().to_ascii_lowercase();
        if platform.is_empty() {
            return Err(LedgerError::InvalidInput("platform is required".into()));
        }
        let rewarded = platform.parse::<SocialPlatform>().ok();
        let now = self.clock.now();

        let outcome = self.db.transaction(|tx| {
            users::get_user(tx, user_id)?.ok_or(LedgerError::UserNotFound(user_id))?;
            let stored_platform = rewarded.map(|p| p.as_str()).unwrap_or(platform.as_str());
            let connection = social::upsert_connection(tx, user_id, stored_platform, username, now)?;

            let reward = match rewarded {
                Some(platform) => {
                    let key = format!("social:{}:{}", user_id, platform.as_str());
                    if journal::key_exists(tx, &key)? {
                        None
                    } else {
                        Some(self.grant_in(tx, user_id, RewardKind::Social { platform }, key, now)?)
                    }
                }
                None => None,
            };
            Ok(SocialConnectOutcome { connection, reward })
        })?;

        match &outcome.reward {
            Some(grant) => self.announce(grant),
            None => debug!(user_id, platform = %outcome.connection.platform, "Social connection without reward"),
        }
        Ok(outcome)
    }

    pub fn disconnect_social(&self, user_id: i64, connection_id: i64) -> LedgerResult<()> {
        self.db.with_conn(|conn| {
            if social::disconnect(conn, connection_id, user_id)? {
                return Ok(());
            }
            match social::get_connection(conn, connection_id)? {
                Some(_) => Err(LedgerError::Unauthorized),
                None => Err(LedgerError::NotFound(format!("social connection {}", connection_id))),
            }
        })?;
        debug!(user_id, connection_id, "Social account disconnected");
        Ok(())
    }

    pub fn social_connections(&self, user_id: i64) -> LedgerResult<Vec<SocialConnectionRow>> {
        self.db.with_conn(|conn| social::list_connections(conn, user_id))
    }

    // =========================================================================
    // Referrals
    // =========================================================================

    /// Link `referee_id` to the owner of `referral_code` and pay both sides.
    ///
    /// A user can be referred once and never by themselves.
    pub fn register_referral(&self, referee_id: i64, referral_code: &str) -> LedgerResult<ReferralOutcome> {
        let now = self.clock.now();
        let outcome = self
            .db
            .transaction(|tx| self.register_referral_in(tx, referee_id, referral_code, now))?;

        self.announce_referral(&outcome);
        Ok(outcome)
    }

    /// Sign up a user who arrived with someone's referral code.
    ///
    /// The user row, the referral edge and both bonuses commit together:
    /// an unknown code leaves no user behind, so the signup can be retried.
    pub fn create_user_with_referral(
        &self,
        input: CreateUserInput,
        referral_code: &str,
    ) -> LedgerResult<(UserRow, ReferralOutcome)> {
        let now = self.clock.now();

        let (user, outcome) = self
            .db
            .transaction(|tx| {
                let user = create_user_in(tx, &input, now)?;
                let outcome = self.register_referral_in(tx, user.id, referral_code, now)?;
                let user = users::get_user(tx, user.id)?.ok_or(LedgerError::UserNotFound(user.id))?;
                Ok((user, outcome))
            })
            .map_err(|e| {
                debug!(username = %input.username, error = %e, "Referred signup rejected");
                e
            })?;

        info!(user_id = user.id, username = %user.username, "User created");
        self.events.emit(LedgerEvent::UserCreated {
            user_id: user.id,
            username: user.username.clone(),
        });
        self.announce_referral(&outcome);
        Ok((user, outcome))
    }

    fn register_referral_in(
        &self,
        conn: &Connection,
        referee_id: i64,
        referral_code: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReferralOutcome> {
        users::get_user(conn, referee_id)?.ok_or(LedgerError::UserNotFound(referee_id))?;
        let referrer = users::get_user_by_referral_code(conn, referral_code)?
            .ok_or_else(|| LedgerError::NotFound(format!("referral code {}", referral_code)))?;
        if referrer.id == referee_id {
            return Err(LedgerError::InvalidInput("users cannot refer themselves".into()));
        }
        if !users::set_referred_by(conn, referee_id, referrer.id)? {
            return Err(LedgerError::AlreadyExists(format!("referral for user {}", referee_id)));
        }

        let referrer_grant = self.grant_in(
            conn,
            referrer.id,
            RewardKind::Referral { role: ReferralRole::Referrer },
            format!("referral:{}:referrer", referee_id),
            now,
        )?;
        let referee_grant = self.grant_in(
            conn,
            referee_id,
            RewardKind::Referral { role: ReferralRole::Referee },
            format!("referral:{}:referee", referee_id),
            now,
        )?;
        Ok(ReferralOutcome { referrer: referrer_grant, referee: referee_grant })
    }

    fn announce_referral(&self, outcome: &ReferralOutcome) {
        self.events.emit(LedgerEvent::ReferralRegistered {
            referrer_id: outcome.referrer.user_id,
            referee_id: outcome.referee.user_id,
        });
        self.announce(&outcome.referrer);
        self.announce(&outcome.referee);
    }

    // =========================================================================
    // Games
    // =========================================================================

    /// Record a score; beating the user's previous best pays the game reward
    pub fn submit_game_score(&self, user_id: i64, game_id: i64, score: i64) -> LedgerResult<GameScoreOutcome> {
        if score < 0 {
            return Err(LedgerError::InvalidInput("score must not be negative".into()));
        }
        let now = self.clock.now();

        let outcome = self.db.transaction(|tx| {
            users::get_user(tx, user_id)?.ok_or(LedgerError::UserNotFound(user_id))?;
            let game = definitions::get_game(tx, game_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("game {}", game_id)))?;
            if !game.active {
                return Err(LedgerError::Unavailable(format!("{} is not active", game.title)));
            }

            let previous_best = scores::best_score(tx, user_id, game_id)?;
            let row = scores::insert_score(tx, user_id, game_id, score, now)?;

            let reward = if previous_best.map_or(true, |best| score > best) {
                let key = format!("game:{}:{}:{}", user_id, game_id, row.id);
                Some(self.grant_in(tx, user_id, RewardKind::GameHighScore { game_id }, key, now)?)
            } else {
                None
            };
            Ok(GameScoreOutcome { score: row, previous_best, reward })
        })?;

        if let Some(grant) = &outcome.reward {
            self.announce(grant);
        }
        Ok(outcome)
    }

    pub fn game_leaderboard(&self, game_id: i64, limit: u32) -> LedgerResult<Vec<LeaderboardEntry>> {
        self.db.with_conn(|conn| scores::leaderboard(conn, game_id, limit))
    }

    pub fn user_scores(&self, user_id: i64) -> LedgerResult<Vec<GameScoreRow>> {
        self.db.with_conn(|conn| scores::list_user_scores(conn, user_id))
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Totals of every reward credited so far
    pub fn distribution_stats(&self) -> LedgerResult<DistributionStats> {
        self.db.with_conn(journal::distribution_stats)
    }
}
