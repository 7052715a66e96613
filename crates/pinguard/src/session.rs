//! Session trust window
//!
//! A successful verification opens a short window in which further sensitive
//! actions go through without prompting, unless the caller forces
//! re-verification.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::record::VerificationSession;
use crate::VerificationRequest;

/// Default trust window after a successful verification
pub const SESSION_DURATION: Duration = Duration::from_secs(5 * 60);

/// Decides whether a request may skip the prompt
#[derive(Clone, Copy, Debug)]
pub struct SessionGate {
    window: Duration,
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new(SESSION_DURATION)
    }
}

impl SessionGate {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True iff the caller did not force re-verification and the last success
    /// is less than one window old
    pub fn should_bypass(
        &self,
        request: &VerificationRequest,
        session: &VerificationSession,
        now: DateTime<Utc>,
    ) -> bool {
        if request.bypass_session {
            return false;
        }
        session
            .last_success_at
            .and_then(|last| (now - last).to_std().ok())
            .is_some_and(|elapsed| elapsed < self.window)
    }

    /// Time left in the trust window
    pub fn remaining(&self, session: &VerificationSession, now: DateTime<Utc>) -> Duration {
        session
            .last_success_at
            .and_then(|last| (now - last).to_std().ok())
            .map(|elapsed| self.window.saturating_sub(elapsed))
            .unwrap_or(Duration::ZERO)
    }
}
