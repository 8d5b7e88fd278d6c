//! Referral Tracker
//!
//! Read-only: counts, tiers and earnings are derived from `users.referred_by`
//! and current balances every time they are asked for.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::db::{users, LedgerDb};
use crate::error::{LedgerError, LedgerResult};

/// Flat commission used for the public leaderboard
pub const LEADERBOARD_RATE_BPS: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ReferralTier {
    Bronze,
    Silver,
    Gold,
    Diamond,
}

impl ReferralTier {
    /// Thresholds are inclusive: 5 referrals is already Silver.
    pub fn for_referrals(count: i64) -> Self {
        match count {
            c if c >= 50 => ReferralTier::Diamond,
            c if c >= 20 => ReferralTier::Gold,
            c if c >= 5 => ReferralTier::Silver,
            _ => ReferralTier::Bronze,
        }
    }

    pub fn commission_bps(&self) -> i64 {
        match self {
            ReferralTier::Bronze => 500,
            ReferralTier::Silver => 750,
            ReferralTier::Gold => 1000,
            ReferralTier::Diamond => 1500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralTier::Bronze => "Bronze",
            ReferralTier::Silver => "Silver",
            ReferralTier::Gold => "Gold",
            ReferralTier::Diamond => "Diamond",
        }
    }
}

impl fmt::Display for ReferralTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStats {
    pub referrals: i64,
    pub earned: i64,
    pub tier: ReferralTier,
    pub referral_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralLeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub referrals: i64,
    pub earned: i64,
}

/// floor(balance * bps / 10000) without overflow
fn commission(referred_balance: i64, bps: i64) -> i64 {
    let earned = referred_balance as i128 * bps as i128 / 10_000;
    i64::try_from(earned).unwrap_or(i64::MAX)
}

pub struct ReferralTracker {
    db: Arc<LedgerDb>,
}

impl ReferralTracker {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    pub fn stats(&self, user_id: i64) -> LedgerResult<ReferralStats> {
        self.db.with_conn(|conn| {
            let user = users::get_user(conn, user_id)?.ok_or(LedgerError::UserNotFound(user_id))?;
            let (referrals, referred_balance) = users::referral_totals(conn, user_id)?;
            let tier = ReferralTier::for_referrals(referrals);
            Ok(ReferralStats {
                referrals,
                earned: commission(referred_balance, tier.commission_bps()),
                tier,
                referral_code: user.referral_code,
            })
        })
    }

    /// Top referrers by referral count
    pub fn leaderboard(&self, limit: u32) -> LedgerResult<Vec<ReferralLeaderboardEntry>> {
        let rows = self.db.with_conn(|conn| users::referral_leaderboard(conn, limit))?;
        Ok(rows
            .into_iter()
            .map(|(user_id, username, referrals, referred_balance)| ReferralLeaderboardEntry {
                user_id,
                username,
                referrals,
                earned: commission(referred_balance, LEADERBOARD_RATE_BPS),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRow;
    use crate::services::test_support::*;
    use crate::services::Ledger;

    /// Sign up `count` users with `referrer`'s code; each referee holds 500_000
    fn refer(ledger: &Ledger, referrer: &UserRow, prefix: &str, count: usize) {
        for i in 0..count {
            let referee = user(ledger, &format!("{}{}", prefix, i), 0);
            ledger
                .rewards
                .register_referral(referee.id, &referrer.referral_code)
                .unwrap();
        }
    }

    #[test]
    fn test_tier_boundaries_inclusive() {
        assert_eq!(ReferralTier::for_referrals(0), ReferralTier::Bronze);
        assert_eq!(ReferralTier::for_referrals(4), ReferralTier::Bronze);
        assert_eq!(ReferralTier::for_referrals(5), ReferralTier::Silver);
        assert_eq!(ReferralTier::for_referrals(5).commission_bps(), 750);
        assert_eq!(ReferralTier::for_referrals(19), ReferralTier::Silver);
        assert_eq!(ReferralTier::for_referrals(20), ReferralTier::Gold);
        assert_eq!(ReferralTier::for_referrals(50), ReferralTier::Diamond);
    }

    #[test]
    fn test_commission_floors() {
        assert_eq!(commission(999, 500), 49);
        assert_eq!(commission(0, 1500), 0);
    }

    #[test]
    fn test_fifth_referral_reaches_silver() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);

        refer(&ledger, &alice, "friend", 4);
        let stats = ledger.referrals.stats(alice.id).unwrap();
        assert_eq!(stats.referrals, 4);
        assert_eq!(stats.tier, ReferralTier::Bronze);
        // 5% of 4 * 500_000
        assert_eq!(stats.earned, 100_000);

        refer(&ledger, &alice, "late", 1);
        let stats = ledger.referrals.stats(alice.id).unwrap();
        assert_eq!(stats.referrals, 5);
        assert_eq!(stats.tier, ReferralTier::Silver);
        // 7.5% of 5 * 500_000
        assert_eq!(stats.earned, 187_500);
        assert_eq!(stats.referral_code, alice.referral_code);
    }

    #[test]
    fn test_leaderboard_orders_by_referral_count() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 0);
        let bob = user(&ledger, "bob", 0);
        let carol = user(&ledger, "carol", 0);
        refer(&ledger, &alice, "a", 2);
        refer(&ledger, &bob, "b", 3);
        refer(&ledger, &carol, "c", 2);

        let board = ledger.referrals.leaderboard(10).unwrap();
        let order: Vec<(i64, i64)> = board.iter().map(|e| (e.user_id, e.referrals)).collect();
        // Ties keep signup order
        assert_eq!(order, vec![(bob.id, 3), (alice.id, 2), (carol.id, 2)]);
        // Flat 5% regardless of tier
        assert_eq!(board[0].earned, 75_000);
        assert_eq!(board[0].username, "bob");

        assert_eq!(ledger.referrals.leaderboard(1).unwrap().len(), 1);
    }
}
