//! Balance Store
//!
//! The only code path that changes `users.balance`. Other services call
//! [`credit_in`] / [`debit_in`] with the transaction they already hold, so
//! the balance change, its journal row and the caller's own records commit
//! or roll back together.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::db::journal::{self, Direction, JournalEntry, TransactionRow};
use crate::db::{users, LedgerDb, UserRow};
use crate::error::{LedgerError, LedgerResult};

use super::events::{EventBus, LedgerEvent};

const REFERRAL_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const REFERRAL_CODE_LEN: usize = 8;
const REFERRAL_CODE_ATTEMPTS: usize = 16;

/// Input for user registration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUserInput {
    pub username: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Generated when absent
    #[serde(default)]
    pub referral_code: Option<String>,
}

pub struct BalanceStore {
    db: Arc<LedgerDb>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl BalanceStore {
    pub fn new(db: Arc<LedgerDb>, clock: Arc<dyn Clock>, events: Arc<EventBus>) -> Self {
        Self { db, clock, events }
    }

    // =========================================================================
    // Balances
    // =========================================================================

    pub fn get_balance(&self, user_id: i64) -> LedgerResult<i64> {
        self.db.with_conn(|conn| users::balance_of(conn, user_id))
    }

    /// Credit a positive amount. Returns the new balance.
    pub fn credit(&self, user_id: i64, amount: i64, entry: JournalEntry) -> LedgerResult<i64> {
        require_positive(amount)?;
        let now = self.clock.now();
        let reason = entry.reason.clone();
        let balance = self
            .db
            .transaction(|tx| credit_in(tx, user_id, amount, &entry, now))?;

        self.events.emit(LedgerEvent::Credited { user_id, amount, reason, balance });
        Ok(balance)
    }

    /// Debit a positive amount, failing with `InsufficientBalance` rather
    /// than going negative. Returns the new balance.
    pub fn debit(&self, user_id: i64, amount: i64, entry: JournalEntry) -> LedgerResult<i64> {
        require_positive(amount)?;
        let now = self.clock.now();
        let reason = entry.reason.clone();
        let balance = self
            .db
            .transaction(|tx| debit_in(tx, user_id, amount, &entry, now))
            .map_err(|e| {
                debug!(user_id, amount, error = %e, "Debit rejected");
                e
            })?;

        self.events.emit(LedgerEvent::Debited { user_id, amount, reason, balance });
        Ok(balance)
    }

    /// Most recent journal rows for a user
    pub fn transactions(&self, user_id: i64, limit: u32) -> LedgerResult<Vec<TransactionRow>> {
        self.db.with_conn(|conn| {
            users::get_user(conn, user_id)?.ok_or(LedgerError::UserNotFound(user_id))?;
            journal::list_user_transactions(conn, user_id, limit)
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Register a user with a zero balance.
    ///
    /// A generated referral code is retried on collision; an explicit one
    /// that is taken fails with `AlreadyExists`.
    pub fn create_user(&self, input: CreateUserInput) -> LedgerResult<UserRow> {
        let now = self.clock.now();
        let user = self.db.transaction(|tx| create_user_in(tx, &input, now))?;

        info!(user_id = user.id, username = %user.username, "User created");
        self.events.emit(LedgerEvent::UserCreated {
            user_id: user.id,
            username: user.username.clone(),
        });
        Ok(user)
    }

    pub fn get_user(&self, user_id: i64) -> LedgerResult<UserRow> {
        self.db
            .with_conn(|conn| users::get_user(conn, user_id))?
            .ok_or(LedgerError::UserNotFound(user_id))
    }

    pub fn find_by_username(&self, username: &str) -> LedgerResult<Option<UserRow>> {
        self.db.with_conn(|conn| users::get_user_by_username(conn, username))
    }

    pub fn find_by_wallet(&self, address: &str) -> LedgerResult<Option<UserRow>> {
        self.db.with_conn(|conn| users::get_user_by_wallet(conn, address))
    }

    pub fn find_by_referral_code(&self, code: &str) -> LedgerResult<Option<UserRow>> {
        self.db.with_conn(|conn| users::get_user_by_referral_code(conn, code))
    }
}

/// Insert a user inside an open transaction
pub(crate) fn create_user_in(conn: &Connection, input: &CreateUserInput, now: DateTime<Utc>) -> LedgerResult<UserRow> {
    let username = input.username.trim();
    if username.is_empty() {
        return Err(LedgerError::InvalidInput("username must not be empty".into()));
    }

    let code = match &input.referral_code {
        Some(code) => {
            if users::referral_code_exists(conn, code)? {
                return Err(LedgerError::AlreadyExists(format!("referral code {}", code)));
            }
            code.clone()
        }
        None => unused_referral_code(conn)?,
    };
    users::insert_user(conn, username, input.wallet_address.as_deref(), &code, None, now)
}

/// Credit inside an open transaction and journal it. Returns the new balance.
pub(crate) fn credit_in(
    conn: &Connection,
    user_id: i64,
    amount: i64,
    entry: &JournalEntry,
    now: DateTime<Utc>,
) -> LedgerResult<i64> {
    let balance = users::increase_balance(conn, user_id, amount)?;
    journal::insert_transaction(conn, user_id, Direction::Credit, amount, entry, now)?;
    Ok(balance)
}

/// Conditional debit inside an open transaction, journaled. Returns the new balance.
pub(crate) fn debit_in(
    conn: &Connection,
    user_id: i64,
    amount: i64,
    entry: &JournalEntry,
    now: DateTime<Utc>,
) -> LedgerResult<i64> {
    let balance = users::decrease_balance(conn, user_id, amount)?;
    journal::insert_transaction(conn, user_id, Direction::Debit, amount, entry, now)?;
    Ok(balance)
}

fn require_positive(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidInput(format!("amount must be positive (got {})", amount)));
    }
    Ok(())
}

fn generate_referral_code() -> String {
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| REFERRAL_CODE_CHARSET[rng.gen_range(0..REFERRAL_CODE_CHARSET.len())] as char)
        .collect()
}

fn unused_referral_code(conn: &Connection) -> LedgerResult<String> {
    for _ in 0..REFERRAL_CODE_ATTEMPTS {
        let code = generate_referral_code();
        if !users::referral_code_exists(conn, &code)? {
            return Ok(code);
        }
    }
    Err(LedgerError::Database("could not generate an unused referral code".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn store() -> BalanceStore {
        BalanceStore::new(
            Arc::new(LedgerDb::open_in_memory().unwrap()),
            Arc::new(SystemClock),
            Arc::new(EventBus::new()),
        )
    }

    fn user(store: &BalanceStore, name: &str) -> UserRow {
        store
            .create_user(CreateUserInput { username: name.into(), ..Default::default() })
            .unwrap()
    }

    #[test]
    fn test_generated_referral_code_shape() {
        let store = store();
        let alice = user(&store, "alice");
        assert_eq!(alice.referral_code.len(), 8);
        assert!(alice
            .referral_code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(alice.balance, 0);
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let store = store();
        user(&store, "alice");
        let again = store.create_user(CreateUserInput { username: "alice".into(), ..Default::default() });
        assert!(matches!(again, Err(LedgerError::AlreadyExists(_))));
    }

    #[test]
    fn test_overdraft_is_a_no_op() {
        let store = store();
        let alice = user(&store, "alice");
        store.credit(alice.id, 100, JournalEntry::new("admin_credit")).unwrap();

        let err = store.debit(alice.id, 101, JournalEntry::new("spend")).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { required: 101, available: 100 }));
        assert_eq!(store.get_balance(alice.id).unwrap(), 100);
        assert_eq!(store.transactions(alice.id, 10).unwrap().len(), 1);

        assert_eq!(store.debit(alice.id, 100, JournalEntry::new("spend")).unwrap(), 0);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let store = store();
        let alice = user(&store, "alice");
        assert!(matches!(
            store.credit(alice.id, 0, JournalEntry::new("x")),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            store.debit(alice.id, -5, JournalEntry::new("x")),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_credit_unknown_user() {
        let store = store();
        assert!(matches!(
            store.credit(404, 10, JournalEntry::new("x")),
            Err(LedgerError::UserNotFound(404))
        ));
        assert!(matches!(store.get_balance(404), Err(LedgerError::UserNotFound(404))));
    }

    #[test]
    fn test_concurrent_credits_are_not_lost() {
        let store = Arc::new(store());
        let alice = user(&store, "alice");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.credit(alice.id, 2, JournalEntry::new("tick")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get_balance(alice.id).unwrap(), 400);
    }
}
