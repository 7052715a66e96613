//! Guard notifications
//!
//! Broadcast so the host can audit flows and tell "user failed" apart from
//! "system failed" without parsing log lines.

use chrono::{DateTime, Utc};

use crate::record::Identity;

/// Why a flow ended in `Denied`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenialReason {
    /// The user dismissed the prompt
    Cancelled,
    /// Persistence failed and the guard failed closed
    StorageFailure,
}

/// Event emitted by a [`GuardClient`](crate::GuardClient)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardEvent {
    /// A flow resolved as approved
    Approved { identity: Identity, bypassed: bool },
    /// A flow resolved as denied
    Denied {
        identity: Identity,
        reason: DenialReason,
    },
    /// A wrong PIN triggered a lockout
    LockoutStarted {
        identity: Identity,
        until: DateTime<Utc>,
        failed_count: u32,
    },
    /// A lockout ran out while the prompt was open
    LockoutExpired { identity: Identity },
    /// Persistence failed
    StorageFailure { identity: Identity, message: String },
}
