//! Persisted attempt state
//!
//! [`AttemptStore`] is the capability the guard uses; it is bound to one
//! identity and turns each operation into a versioned read-modify-write
//! against a [`StateBackend`]. Backends only need to load a record and
//! compare-and-swap it, which is enough to keep two windows or processes from
//! both writing `failed_count = 3` over a shared `2`.

mod file;
mod memory;

pub use file::{FileBackend, DEFAULT_LOCK_TIMEOUT};
pub use memory::MemoryBackend;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::{self, Clock};
use crate::error::{GuardError, Result};
use crate::policy::LockoutPolicy;
use crate::record::{AttemptRecord, Identity, PersistedState, VerificationSession, Versioned};

/// Default number of compare-and-swap attempts per update
pub const DEFAULT_MAX_RETRIES: u32 = 8;

/// Storage for per-identity guard state
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load the current record, `None` if the identity has never written one
    async fn load(&self, identity: &Identity) -> Result<Option<Versioned>>;

    /// Replace the record if its version still equals `expected`
    ///
    /// `expected = None` means the record must not exist yet. Returns
    /// `Ok(false)` when another writer got there first.
    async fn compare_and_swap(
        &self,
        identity: &Identity,
        expected: Option<u64>,
        state: PersistedState,
    ) -> Result<bool>;

    /// Delete everything stored for the identity
    async fn remove(&self, identity: &Identity) -> Result<()>;
}

/// Attempt counters and session stamp for one identity
#[derive(Clone)]
pub struct AttemptStore {
    identity: Identity,
    backend: Arc<dyn StateBackend>,
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl AttemptStore {
    /// Create a store for `identity`
    pub fn new(
        identity: Identity,
        backend: Arc<dyn StateBackend>,
        policy: LockoutPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            backend,
            policy,
            clock,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override how many lost races an update tolerates
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current attempt record (`{0, None}` when nothing was stored)
    pub async fn load(&self) -> Result<AttemptRecord> {
        Ok(self.load_state().await?.attempts())
    }

    /// Current verification session
    pub async fn session(&self) -> Result<VerificationSession> {
        Ok(self.load_state().await?.session())
    }

    /// Count one more failure and recompute the lockout
    pub async fn record_failure(&self) -> Result<AttemptRecord> {
        let policy = self.policy.clone();
        let state = self
            .update("record_failure", move |mut state, now| {
                state.failed_count = state.failed_count.saturating_add(1);
                state.lockout_until = policy
                    .lockout_duration(state.failed_count)
                    .map(|duration| clock::add(now, duration));
                state
            })
            .await?;

        let record = state.attempts();
        match record.lockout_until {
            Some(until) => warn!(
                "Identity {} locked until {} after {} failed attempts",
                self.identity, until, record.failed_count
            ),
            None => debug!(
                "Identity {} failed attempt {}",
                self.identity, record.failed_count
            ),
        }
        Ok(record)
    }

    /// Reset the counters and start a new trust window
    pub async fn record_success(&self) -> Result<()> {
        self.update("record_success", |mut state, now| {
            state.failed_count = 0;
            state.lockout_until = None;
            state.last_success_at = Some(now);
            state
        })
        .await?;
        debug!("Identity {} verified", self.identity);
        Ok(())
    }

    /// Reset the counters if the recorded lockout has passed
    pub async fn clear_expired_lockout(&self) -> Result<AttemptRecord> {
        let state = self
            .update("clear_expired_lockout", |mut state, now| {
                if state.attempts().has_expired_lockout(now) {
                    state.failed_count = 0;
                    state.lockout_until = None;
                }
                state
            })
            .await?;
        Ok(state.attempts())
    }

    /// Forget the last success so the next request prompts again
    pub async fn end_session(&self) -> Result<()> {
        self.update("end_session", |mut state, _| {
            state.last_success_at = None;
            state
        })
        .await?;
        Ok(())
    }

    /// Remove all persisted state for the identity
    pub async fn forget(&self) -> Result<()> {
        self.backend.remove(&self.identity).await?;
        info!("Removed guard state for identity {}", self.identity);
        Ok(())
    }

    async fn load_state(&self) -> Result<PersistedState> {
        Ok(self
            .backend
            .load(&self.identity)
            .await?
            .map(|versioned| versioned.state)
            .unwrap_or_default())
    }

    /// Versioned read-modify-write, retried while other writers win the race
    async fn update<F>(&self, op: &'static str, mut apply: F) -> Result<PersistedState>
    where
        F: FnMut(PersistedState, DateTime<Utc>) -> PersistedState + Send,
    {
        for attempt in 1..=self.max_retries {
            let current = self.backend.load(&self.identity).await?;
            let expected = current.map(|versioned| versioned.version);
            let before = current.map(|versioned| versioned.state).unwrap_or_default();

            let after = apply(before, self.clock.now());
            if after == before {
                return Ok(after);
            }

            if self
                .backend
                .compare_and_swap(&self.identity, expected, after)
                .await?
            {
                return Ok(after);
            }
            debug!(
                "{} for identity {} lost a write race (attempt {})",
                op, self.identity, attempt
            );
        }

        warn!(
            "{} for identity {} gave up after {} conflicts",
            op, self.identity, self.max_retries
        );
        Err(GuardError::Contention(self.max_retries))
    }
}
