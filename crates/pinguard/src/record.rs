//! Persisted guard state
//!
//! One document per identity holds both the attempt counters and the session
//! stamp, so every update is a single compare-and-swap.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated identity the guard state is scoped to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe key for this identity
    pub fn storage_key(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure counter and lockout deadline
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttemptRecord {
    pub failed_count: u32,
    pub lockout_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    /// Whether the lockout deadline is still ahead of `now`
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    /// Whether a lockout deadline is recorded but already passed
    pub fn has_expired_lockout(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| now >= until)
    }
}

/// Trust window anchor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerificationSession {
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Everything persisted for one identity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Number of failed attempts
    #[serde(default)]
    pub failed_count: u32,
    /// End of the current lockout, if any
    #[serde(default)]
    pub lockout_until: Option<DateTime<Utc>>,
    /// Last successful verification
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
}

impl PersistedState {
    pub fn attempts(&self) -> AttemptRecord {
        AttemptRecord {
            failed_count: self.failed_count,
            lockout_until: self.lockout_until,
        }
    }

    pub fn session(&self) -> VerificationSession {
        VerificationSession {
            last_success_at: self.last_success_at,
        }
    }
}

/// A persisted state tagged with the version it was written at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    /// Monotonic write counter, starting at 1 for the first write
    pub version: u64,
    pub state: PersistedState,
}

impl Versioned {
    /// Version that a successful write after `expected` will carry
    pub fn next_version(expected: Option<u64>) -> u64 {
        expected.map_or(1, |v| v.saturating_add(1))
    }
}
