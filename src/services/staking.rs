//! Staking Ledger
//!
//! Accrual is computed lazily at claim and unstake time from the vault APR
//! and the time since `last_claimed`; nothing ticks in the background.
//! A claim advances `last_claimed` with a compare-and-set, so two claims
//! that read the same `last_claimed` cannot both pay the same interval.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::db::stakes::{self, StakeRow};
use crate::db::{definitions, JournalEntry, LedgerDb, VaultRow};
use crate::error::{LedgerError, LedgerResult};

use super::balance::{credit_in, debit_in};
use super::events::{EventBus, LedgerEvent};

const BPS_DENOMINATOR: u128 = 10_000;
const MILLIS_PER_YEAR: u128 = 8_760 * 3_600_000;

/// Reward accrued on `principal` at `apr_bps` between `from` and `to`,
/// rounded down. Zero or negative elapsed time accrues nothing.
pub fn pending_reward(principal: i64, apr_bps: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let elapsed_ms = (to - from).num_milliseconds();
    if elapsed_ms <= 0 || principal <= 0 || apr_bps <= 0 {
        return 0;
    }
    let numerator = (principal as u128)
        .checked_mul(apr_bps as u128)
        .and_then(|n| n.checked_mul(elapsed_ms as u128));
    match numerator {
        Some(n) => i64::try_from(n / (BPS_DENOMINATOR * MILLIS_PER_YEAR)).unwrap_or(i64::MAX),
        None => i64::MAX,
    }
}

/// Open stake with its vault and live accrual
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakePosition {
    #[serde(flatten)]
    pub stake: StakeRow,
    pub vault_name: String,
    pub apr_bps: i64,
    pub pending_rewards: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeClaim {
    pub stake_id: i64,
    pub rewards: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnstakeOutcome {
    pub stake_id: i64,
    pub principal: i64,
    pub rewards: i64,
    /// principal + rewards, credited as one mutation
    pub amount: i64,
    pub balance: i64,
}

pub struct StakingLedger {
    db: Arc<LedgerDb>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl StakingLedger {
    pub fn new(db: Arc<LedgerDb>, clock: Arc<dyn Clock>, events: Arc<EventBus>) -> Self {
        Self { db, clock, events }
    }

    /// Lock `amount` into a vault
    pub fn stake(&self, user_id: i64, vault_id: i64, amount: i64) -> LedgerResult<StakeRow> {
        if amount <= 0 {
            return Err(LedgerError::InvalidInput(format!("stake amount must be positive (got {})", amount)));
        }
        let now = self.clock.now();

        let stake = self
            .db
            .transaction(|tx| {
                let vault = definitions::get_vault(tx, vault_id)?.ok_or(LedgerError::VaultNotFound(vault_id))?;
                if amount < vault.min_stake {
                    return Err(LedgerError::BelowMinimum {
                        minimum: vault.min_stake,
                        requested: amount,
                    });
                }

                let entry = JournalEntry::new("stake").with_metadata(json!({ "vaultId": vault_id }));
                debit_in(tx, user_id, amount, &entry, now)?;
                stakes::insert_stake(tx, user_id, vault_id, amount, now)
            })
            .map_err(|e| {
                debug!(user_id, vault_id, amount, error = %e, "Stake rejected");
                e
            })?;

        info!(stake_id = stake.id, user_id, vault_id, amount, "Stake opened");
        self.events.emit(LedgerEvent::Staked {
            user_id,
            stake_id: stake.id,
            vault_id,
            amount,
        });
        Ok(stake)
    }

    /// Pay out accrual since the last claim, leaving the principal staked
    pub fn claim_rewards(&self, stake_id: i64, user_id: i64) -> LedgerResult<StakeClaim> {
        let now = self.clock.now();

        let claim = self.db.transaction(|tx| {
            let stake = owned_stake(tx, stake_id, user_id)?;
            let vault = stake_vault(tx, &stake)?;

            let rewards = pending_reward(stake.amount, vault.apr_bps, stake.last_claimed, now);
            if rewards <= 0 {
                return Err(LedgerError::NothingToClaim);
            }
            if !stakes::advance_claim(tx, stake_id, stake.last_claimed, now, rewards)? {
                return Err(LedgerError::NothingToClaim);
            }

            let entry = JournalEntry::new("staking_reward")
                .with_metadata(json!({ "stakeId": stake_id, "vaultId": vault.id }));
            let balance = credit_in(tx, user_id, rewards, &entry, now)?;
            Ok(StakeClaim { stake_id, rewards, balance })
        })?;

        info!(stake_id, user_id, rewards = claim.rewards, "Staking rewards claimed");
        self.events.emit(LedgerEvent::StakeRewardsClaimed {
            user_id,
            stake_id,
            amount: claim.rewards,
        });
        Ok(claim)
    }

    /// Close a stake, returning principal plus pending accrual
    pub fn unstake(&self, stake_id: i64, user_id: i64) -> LedgerResult<UnstakeOutcome> {
        let now = self.clock.now();

        let outcome = self.db.transaction(|tx| {
            let stake = owned_stake(tx, stake_id, user_id)?;
            let vault = stake_vault(tx, &stake)?;
            let rewards = pending_reward(stake.amount, vault.apr_bps, stake.last_claimed, now);
            let amount = stake
                .amount
                .checked_add(rewards)
                .ok_or_else(|| LedgerError::InvalidInput("unstake amount overflows".into()))?;

            if !stakes::delete_stake(tx, stake_id, user_id)? {
                return Err(LedgerError::StakeNotFound(stake_id));
            }

            let entry = JournalEntry::new("unstake").with_metadata(json!({
                "stakeId": stake_id,
                "vaultId": vault.id,
                "principal": stake.amount,
                "rewards": rewards,
            }));
            let balance = credit_in(tx, user_id, amount, &entry, now)?;

            Ok(UnstakeOutcome {
                stake_id,
                principal: stake.amount,
                rewards,
                amount,
                balance,
            })
        })?;

        info!(stake_id, user_id, principal = outcome.principal, rewards = outcome.rewards, "Stake closed");
        self.events.emit(LedgerEvent::Unstaked {
            user_id,
            stake_id,
            principal: outcome.principal,
            rewards: outcome.rewards,
        });
        Ok(outcome)
    }

    /// A user's open stakes with accrual as of now
    pub fn user_stakes(&self, user_id: i64) -> LedgerResult<Vec<StakePosition>> {
        let now = self.clock.now();
        self.db.with_conn(|conn| {
            stakes::list_user_stakes(conn, user_id)?
                .into_iter()
                .map(|stake| -> LedgerResult<StakePosition> {
                    let vault = stake_vault(conn, &stake)?;
                    Ok(StakePosition {
                        pending_rewards: pending_reward(stake.amount, vault.apr_bps, stake.last_claimed, now),
                        vault_name: vault.name,
                        apr_bps: vault.apr_bps,
                        stake,
                    })
                })
                .collect()
        })
    }
}

fn owned_stake(conn: &rusqlite::Connection, stake_id: i64, user_id: i64) -> LedgerResult<StakeRow> {
    let stake = stakes::get_stake(conn, stake_id)?.ok_or(LedgerError::StakeNotFound(stake_id))?;
    if stake.user_id != user_id {
        return Err(LedgerError::Unauthorized);
    }
    Ok(stake)
}

fn stake_vault(conn: &rusqlite::Connection, stake: &StakeRow) -> LedgerResult<VaultRow> {
    definitions::get_vault(conn, stake.vault_id)?.ok_or(LedgerError::VaultNotFound(stake.vault_id))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::definitions::CreateVaultInput;
    use crate::services::test_support::*;
    use crate::services::Ledger;

    fn vault(ledger: &Ledger, apr_bps: i64, min_stake: i64) -> i64 {
        ledger
            .catalog
            .create_vault(CreateVaultInput {
                name: "Basic Vault".into(),
                description: String::new(),
                apr_bps,
                min_stake,
                requirements: None,
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_pending_reward_one_year_at_ten_percent() {
        let t0 = start();
        assert_eq!(pending_reward(100_000, 1000, t0, t0 + Duration::hours(8760)), 10_000);
        assert_eq!(pending_reward(100_000, 1000, t0, t0), 0);
        assert_eq!(pending_reward(100_000, 1000, t0, t0 - Duration::hours(1)), 0);
        // 100000 * 10% / 8760 = 1.14 per hour, floored
        assert_eq!(pending_reward(100_000, 1000, t0, t0 + Duration::hours(1)), 1);
        assert_eq!(pending_reward(100_000, 1000, t0, t0 + Duration::minutes(30)), 0);
    }

    #[test]
    fn test_stake_validation_order() {
        let (ledger, _clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 50);
        let vault_id = vault(&ledger, 1800, 100);

        assert!(matches!(
            ledger.staking.stake(alice.id, 999, 100),
            Err(LedgerError::VaultNotFound(999))
        ));
        assert!(matches!(
            ledger.staking.stake(alice.id, vault_id, 99),
            Err(LedgerError::BelowMinimum { minimum: 100, requested: 99 })
        ));
        assert!(matches!(
            ledger.staking.stake(alice.id, vault_id, 100),
            Err(LedgerError::InsufficientBalance { required: 100, available: 50 })
        ));
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 50);
        assert!(ledger.staking.user_stakes(alice.id).unwrap().is_empty());
    }

    #[test]
    fn test_claim_after_one_year() {
        let (ledger, clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 100_000);
        let vault_id = vault(&ledger, 1000, 0);

        let stake = ledger.staking.stake(alice.id, vault_id, 100_000).unwrap();
        assert_eq!(stake.staked_at, stake.last_claimed);
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 0);

        clock.advance(Duration::hours(8760));
        let claim = ledger.staking.claim_rewards(stake.id, alice.id).unwrap();
        assert_eq!(claim.rewards, 10_000);
        assert_eq!(claim.balance, 10_000);

        // Immediately again: nothing accrued
        assert!(matches!(
            ledger.staking.claim_rewards(stake.id, alice.id),
            Err(LedgerError::NothingToClaim)
        ));

        let positions = ledger.staking.user_stakes(alice.id).unwrap();
        assert_eq!(positions[0].stake.rewards_paid, 10_000);
        assert_eq!(positions[0].pending_rewards, 0);
    }

    #[test]
    fn test_claim_ownership() {
        let (ledger, clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 1_000);
        let mallory = user(&ledger, "mallory", 0);
        let stake = ledger.staking.stake(alice.id, vault(&ledger, 1000, 0), 1_000).unwrap();
        clock.advance(Duration::days(365));

        assert!(matches!(
            ledger.staking.claim_rewards(stake.id, mallory.id),
            Err(LedgerError::Unauthorized)
        ));
        assert!(matches!(
            ledger.staking.unstake(stake.id, mallory.id),
            Err(LedgerError::Unauthorized)
        ));
        assert!(matches!(
            ledger.staking.claim_rewards(777, alice.id),
            Err(LedgerError::StakeNotFound(777))
        ));
    }

    #[test]
    fn test_unstake_returns_principal_plus_accrual() {
        let (ledger, clock, _dir) = ledger();
        let alice = user(&ledger, "alice", 100_000);
        let stake = ledger.staking.stake(alice.id, vault(&ledger, 1000, 0), 100_000).unwrap();

        clock.advance(Duration::hours(4380));
        let outcome = ledger.staking.unstake(stake.id, alice.id).unwrap();
        assert_eq!(outcome.principal, 100_000);
        assert_eq!(outcome.rewards, 5_000);
        assert_eq!(outcome.amount, 105_000);
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 105_000);

        assert!(matches!(
            ledger.staking.claim_rewards(stake.id, alice.id),
            Err(LedgerError::StakeNotFound(_))
        ));
        assert!(matches!(
            ledger.staking.unstake(stake.id, alice.id),
            Err(LedgerError::StakeNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_claims_pay_interval_once() {
        let (ledger, clock, _dir) = ledger();
        let ledger = Arc::new(ledger);
        let alice = user(&ledger, "alice", 100_000);
        let stake = ledger.staking.stake(alice.id, vault(&ledger, 1000, 0), 100_000).unwrap();
        clock.advance(Duration::hours(8760));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.staking.claim_rewards(stake.id, alice.id))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(ledger.balances.get_balance(alice.id).unwrap(), 10_000);
    }
}
