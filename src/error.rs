//! Error types for slerfhub-ledger

use thiserror::Error;

/// Coarse classification of a [`LedgerError`] for request layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Entity absent
    NotFound,
    /// Ownership mismatch
    Unauthorized,
    /// Balance or minimum-amount rule violated
    BusinessRule,
    /// Operation valid in general but not in the record's current state
    StateViolation,
    /// Malformed command (non-positive amount, empty name, ...)
    InvalidInput,
    /// Storage or configuration fault
    Infrastructure,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Staking vault not found: {0}")]
    VaultNotFound(i64),

    #[error("Stake not found: {0}")]
    StakeNotFound(i64),

    #[error("Not authorized for this record")]
    Unauthorized,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Amount {requested} is below the minimum of {minimum}")]
    BelowMinimum { minimum: i64, requested: i64 },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Reward is not claimable")]
    NotClaimable,

    #[error("No rewards available to claim yet")]
    NothingToClaim,

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Progress record {0} has already been claimed")]
    AlreadyClaimed(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::UserNotFound(_)
            | LedgerError::NotFound(_)
            | LedgerError::VaultNotFound(_)
            | LedgerError::StakeNotFound(_) => ErrorKind::NotFound,
            LedgerError::Unauthorized => ErrorKind::Unauthorized,
            LedgerError::InsufficientBalance { .. } | LedgerError::BelowMinimum { .. } => {
                ErrorKind::BusinessRule
            }
            LedgerError::AlreadyExists(_)
            | LedgerError::NotClaimable
            | LedgerError::NothingToClaim
            | LedgerError::Unavailable(_)
            | LedgerError::AlreadyClaimed(_) => ErrorKind::StateViolation,
            LedgerError::InvalidInput(_) => ErrorKind::InvalidInput,
            LedgerError::Database(_)
            | LedgerError::Io(_)
            | LedgerError::Json(_)
            | LedgerError::Config(_) => ErrorKind::Infrastructure,
        }
    }

    /// Expected outcome of a command, as opposed to a fatal fault.
    pub fn is_business(&self) -> bool {
        self.kind() != ErrorKind::Infrastructure
    }

    /// Message safe to show an end user.
    ///
    /// Ownership failures read the same as a missing record so callers
    /// cannot enumerate other users' ids.
    pub fn public_message(&self) -> String {
        match self {
            LedgerError::Unauthorized => "Record not found".to_string(),
            LedgerError::StakeNotFound(_) | LedgerError::NotFound(_) => {
                "Record not found".to_string()
            }
            LedgerError::Database(_) | LedgerError::Io(_) | LedgerError::Json(_) => {
                "Internal storage error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for LedgerError {
    fn from(e: r2d2::Error) -> Self {
        LedgerError::Database(format!("Connection pool: {}", e))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(LedgerError::StakeNotFound(3).kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::Unauthorized.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            LedgerError::InsufficientBalance { required: 5, available: 1 }.kind(),
            ErrorKind::BusinessRule
        );
        assert_eq!(LedgerError::NotClaimable.kind(), ErrorKind::StateViolation);
        assert_eq!(LedgerError::Database("x".into()).kind(), ErrorKind::Infrastructure);
        assert!(!LedgerError::Database("x".into()).is_business());
        assert!(LedgerError::NothingToClaim.is_business());
    }

    #[test]
    fn test_unauthorized_does_not_leak_existence() {
        assert_eq!(
            LedgerError::Unauthorized.public_message(),
            LedgerError::StakeNotFound(42).public_message()
        );
    }

    #[test]
    fn test_business_messages_are_verbatim() {
        let err = LedgerError::InsufficientBalance { required: 100, available: 40 };
        assert_eq!(err.public_message(), "Insufficient balance: required 100, available 40");
    }
}
