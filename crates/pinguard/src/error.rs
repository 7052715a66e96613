//! Error types for the PIN guard
//!
//! Wrong PINs and active lockouts are not errors; they surface as
//! [`Notice`](crate::messages::Notice) values on the prompt. Everything in
//! here is either an infrastructure failure (the guard fails closed) or a
//! caller driving the controller out of order.

use thiserror::Error;

use crate::controller::GuardState;

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors that can occur in guard operations
#[derive(Debug, Error)]
pub enum GuardError {
    /// IO error from a storage backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend refused or could not complete the operation
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Compare-and-swap kept losing to concurrent writers
    #[error("Attempt record update lost {0} consecutive races")]
    Contention(u32),

    /// Lockout tiers failed validation
    #[error("Invalid lockout policy: {0}")]
    InvalidPolicy(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A PIN was submitted while the flow was not accepting input
    #[error("PIN submitted in state {0:?}")]
    UnexpectedSubmission(GuardState),
}

impl GuardError {
    /// Whether this error comes from persistence rather than from the caller.
    ///
    /// Infrastructure errors must be treated as a denial by callers.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            GuardError::Io(_)
                | GuardError::Serialization(_)
                | GuardError::StorageUnavailable(_)
                | GuardError::Contention(_)
        )
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(e: serde_json::Error) -> Self {
        GuardError::Serialization(e.to_string())
    }
}
