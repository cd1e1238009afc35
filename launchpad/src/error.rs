//! Error kinds surfaced by the vault, the registry and the sale state machine.
//!
//! Every variant names the violated precondition so callers can branch on it.
//! All failing operations leave internal state untouched.

use thiserror::Error;

use crate::{access::Role, phase::Phase, Balance, Timestamp};

pub type Result<T> = std::result::Result<T, LaunchpadError>;

/// Failure reported by an external collaborator (token ledger or yield farm).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("insufficient balance")]
    Insufficient,
    #[error("transfer exceeds allowance")]
    AllowanceExceeded,
    #[error("backend rejected call: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchpadError {
    #[error("stake is locked until {unlock_time}")]
    LockedStake { unlock_time: Timestamp },
    #[error("snapshot already taken")]
    AlreadySnapshotted,
    #[error("phase mismatch: expected {expected:?}, actual {actual:?}")]
    PhaseMismatch { expected: Phase, actual: Phase },
    #[error("contribution {amount} below minimum {min}")]
    BelowMinimumContribution { min: Balance, amount: Balance },
    #[error("allocation exceeded: requested {requested}, available {available}")]
    AllocationExceeded { available: Balance, requested: Balance },
    #[error("account is not KYC approved")]
    NotKycApproved,
    #[error("sale is cancelled")]
    CancelledSale,
    #[error("sale is not cancelled")]
    NotCancelled,
    #[error("tokens already claimed")]
    AlreadyClaimed,
    #[error("nothing to return")]
    NothingToReturn,
    #[error("not authorized: {role:?} role required")]
    Unauthorized { role: Role },

    #[error("sale not found")]
    NotFound,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("amount must be > 0")]
    ZeroAmount,
    #[error("insufficient shares")]
    InsufficientShares,
    #[error("no stake position")]
    NoStake,
    #[error("lock of {requested}s exceeds maximum {max}s")]
    LockTooLong { max: u64, requested: u64 },
    #[error("new unlock time {requested} is earlier than current {current}")]
    LockShortened { current: Timestamp, requested: Timestamp },
    #[error("nothing to claim")]
    NothingToClaim,
    #[error("sale already settled")]
    AlreadySettled,
    #[error("paused")]
    Paused,
    #[error("arithmetic overflow")]
    MathOverflow,
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
}
