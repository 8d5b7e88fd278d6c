//! End-to-end ledger scenarios over a file-backed database
//!
//! Each test opens a fresh SQLite file in a temp directory, seeds the stock
//! catalog and drives the public services the way the CLI does.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use slerfhub_ledger::db::JournalEntry;
use slerfhub_ledger::services::CreateUserInput;
use slerfhub_ledger::{Config, Ledger, LedgerDb, LedgerError, ManualClock, ProgressKind, RewardRates};
use tempfile::TempDir;

/// Ledger over `<temp>/ledger.db` on a manual clock, stock catalog installed
fn open_ledger(temp: &TempDir) -> (Ledger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
    let db = Arc::new(LedgerDb::open(&temp.path().join("ledger.db")).unwrap());
    let ledger = Ledger::new(db, clock.clone(), RewardRates::default());
    ledger.catalog.seed_default().unwrap();
    (ledger, clock)
}

fn signup(ledger: &Ledger, name: &str) -> i64 {
    ledger
        .balances
        .create_user(CreateUserInput { username: name.into(), ..Default::default() })
        .unwrap()
        .id
}

/// Daily check-in mission: init, complete, claim once
#[test]
fn test_mission_reward_paid_once() {
    let temp = TempDir::new().unwrap();
    let (ledger, _clock) = open_ledger(&temp);
    let alice = signup(&ledger, "alice");

    let checkin = ledger
        .catalog
        .missions()
        .unwrap()
        .into_iter()
        .find(|m| m.title == "Daily Check-in")
        .unwrap();
    assert_eq!(checkin.reward, 50);

    let record = ledger.progress.init_progress(alice, ProgressKind::Mission, checkin.id).unwrap();
    ledger.progress.update_progress(record.id, 1, true).unwrap();

    let outcome = ledger.progress.claim_reward(record.id, alice).unwrap();
    assert_eq!(outcome.amount, 50);
    assert_eq!(outcome.balance, 50);
    assert!(outcome.record.claimed);

    assert!(matches!(
        ledger.progress.claim_reward(record.id, alice),
        Err(LedgerError::NotClaimable)
    ));
    assert_eq!(ledger.balances.get_balance(alice).unwrap(), 50);

    let views = ledger.progress.user_progress(alice, ProgressKind::Mission).unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].title, "Daily Check-in");
}

/// Stake into the basic vault, let a month pass, claim, then unstake
#[test]
fn test_staking_lifecycle() {
    let temp = TempDir::new().unwrap();
    let (ledger, clock) = open_ledger(&temp);
    let alice = signup(&ledger, "alice");
    ledger.balances.credit(alice, 150_000, JournalEntry::new("admin_credit")).unwrap();

    let basic = ledger
        .catalog
        .vaults()
        .unwrap()
        .into_iter()
        .find(|v| v.name == "Basic Vault")
        .unwrap();
    assert_eq!(basic.apr_bps, 1_800);

    assert!(matches!(
        ledger.staking.stake(alice, basic.id, 50),
        Err(LedgerError::BelowMinimum { minimum: 100, requested: 50 })
    ));

    let stake = ledger.staking.stake(alice, basic.id, 100_000).unwrap();
    assert_eq!(ledger.balances.get_balance(alice).unwrap(), 50_000);

    // 100_000 * 18% / 8760h * 720h = 1479.45
    clock.advance(Duration::hours(720));
    let claim = ledger.staking.claim_rewards(stake.id, alice).unwrap();
    assert_eq!(claim.rewards, 1_479);
    assert_eq!(claim.balance, 51_479);

    assert!(matches!(
        ledger.staking.claim_rewards(stake.id, alice),
        Err(LedgerError::NothingToClaim)
    ));

    let positions = ledger.staking.user_stakes(alice).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].pending_rewards, 0);

    let out = ledger.staking.unstake(stake.id, alice).unwrap();
    assert_eq!(out.principal, 100_000);
    assert_eq!(out.rewards, 0);
    assert_eq!(ledger.balances.get_balance(alice).unwrap(), 151_479);
    assert!(ledger.staking.user_stakes(alice).unwrap().is_empty());
}

/// Purchases debit exactly the price and never overdraw
#[test]
fn test_purchase_and_mint() {
    let temp = TempDir::new().unwrap();
    let (ledger, _clock) = open_ledger(&temp);
    let bob = signup(&ledger, "bob");
    ledger.balances.credit(bob, 6_000, JournalEntry::new("admin_credit")).unwrap();

    let frame = ledger
        .catalog
        .marketplace_items()
        .unwrap()
        .into_iter()
        .find(|i| i.name == "Profile Frame")
        .unwrap();
    ledger.acquisitions.purchase_item(bob, frame.id).unwrap();
    assert_eq!(ledger.balances.get_balance(bob).unwrap(), 3_500);

    let rookie = ledger
        .catalog
        .nft_boosters()
        .unwrap()
        .into_iter()
        .find(|n| n.name == "Rookie Booster")
        .unwrap();
    assert!(matches!(
        ledger.acquisitions.mint_nft(bob, rookie.id),
        Err(LedgerError::InsufficientBalance { required: 5_000, available: 3_500 })
    ));
    assert_eq!(ledger.balances.get_balance(bob).unwrap(), 3_500);
    assert!(ledger.acquisitions.user_nfts(bob).unwrap().is_empty());
    assert_eq!(ledger.acquisitions.user_purchases(bob).unwrap().len(), 1);
}

/// Referral bonus goes to both sides once; stats follow the referee's balance
#[test]
fn test_referral_flow() {
    let temp = TempDir::new().unwrap();
    let (ledger, _clock) = open_ledger(&temp);
    let alice = signup(&ledger, "alice");
    let bob = signup(&ledger, "bob");
    let code = ledger.balances.get_user(alice).unwrap().referral_code;

    let outcome = ledger.rewards.register_referral(bob, &code).unwrap();
    assert_eq!(outcome.referrer.amount, 1_000_000);
    assert_eq!(outcome.referee.amount, 500_000);

    assert!(matches!(
        ledger.rewards.register_referral(bob, &code),
        Err(LedgerError::AlreadyExists(_))
    ));

    let stats = ledger.referrals.stats(alice).unwrap();
    assert_eq!(stats.referrals, 1);
    // Bronze: 5% of bob's 500_000
    assert_eq!(stats.earned, 25_000);

    let board = ledger.referrals.leaderboard(10).unwrap();
    assert_eq!(board[0].user_id, alice);
}

/// A signup with a bad referral code is retried cleanly with the right one
#[test]
fn test_referred_signup_is_all_or_nothing() {
    let temp = TempDir::new().unwrap();
    let (ledger, _clock) = open_ledger(&temp);
    let alice = signup(&ledger, "alice");
    let code = ledger.balances.get_user(alice).unwrap().referral_code;
    let bob = || CreateUserInput { username: "bob".into(), ..Default::default() };

    assert!(ledger.rewards.create_user_with_referral(bob(), "NOPE0000").is_err());
    assert!(ledger.balances.find_by_username("bob").unwrap().is_none());

    let (user, outcome) = ledger.rewards.create_user_with_referral(bob(), &code).unwrap();
    assert_eq!(user.referred_by, Some(alice));
    assert_eq!(outcome.referrer.balance, 1_000_000);
    assert_eq!(ledger.referrals.stats(alice).unwrap().referrals, 1);
}

/// Balances, stakes and the journal survive closing and reopening the file
#[test]
fn test_state_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let stake_id = {
        let (ledger, _clock) = open_ledger(&temp);
        let alice = signup(&ledger, "alice");
        ledger.balances.credit(alice, 10_000, JournalEntry::new("admin_credit")).unwrap();
        let vault = ledger.catalog.vaults().unwrap()[0].id;
        ledger.staking.stake(alice, vault, 1_000).unwrap().id
    };

    let (ledger, _clock) = open_ledger(&temp);
    let alice = ledger.balances.find_by_username("alice").unwrap().unwrap();
    assert_eq!(alice.balance, 9_000);

    let positions = ledger.staking.user_stakes(alice.id).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].stake.id, stake_id);

    let reasons: Vec<String> = ledger
        .balances
        .transactions(alice.id, 10)
        .unwrap()
        .into_iter()
        .map(|t| t.reason)
        .collect();
    assert!(reasons.iter().any(|r| r == "admin_credit"));
    assert!(reasons.iter().any(|r| r == "stake"));

    // Seeding a populated catalog is a no-op
    assert!(ledger.catalog.seed_default().unwrap().is_none());
    assert_eq!(ledger.catalog.vaults().unwrap().len(), 3);
}

/// `Ledger::open` creates the storage dir and seeds when configured
#[test]
fn test_open_from_config() {
    let temp = TempDir::new().unwrap();
    let config = Config {
        storage_dir: temp.path().join("nested"),
        ..Default::default()
    };

    let ledger = Ledger::open(&config).unwrap();
    assert!(config.database_path().exists());

    let stats = ledger.platform_stats().unwrap();
    assert_eq!(stats.total_users, 0);
    assert_eq!(stats.active_quests, 4);
}
