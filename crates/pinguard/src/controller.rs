//! Verification flow state machine
//!
//! ```text
//! Idle -> CheckingSession -+-> Resolved(Approved)            (session bypass)
//!                          +-> Locked --poll/expiry--> AwaitingInput
//!                          +-> AwaitingInput -submit-> Verifying
//! Verifying -+-> Resolved(Approved)                          (correct PIN)
//!            +-> Locked | AwaitingInput                      (wrong PIN)
//! AwaitingInput | Locked -cancel-> Resolved(Denied)
//! ```
//!
//! One controller is one flow. Nothing is carried between flows except what
//! the [`AttemptStore`] persists. Any storage failure resolves the flow as
//! `Denied` and is returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::clock;
use crate::error::{GuardError, Result};
use crate::messages::{countdown_text, notice_text, Notice};
use crate::prompt::{PromptPhase, PromptView};
use crate::record::AttemptRecord;
use crate::session::SessionGate;
use crate::store::AttemptStore;
use crate::verifier::PinVerifier;

/// What the caller wants to do, shown on the prompt
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationRequest {
    pub title: String,
    pub description: String,
    /// Force a prompt even inside the session trust window
    pub bypass_session: bool,
}

impl VerificationRequest {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            bypass_session: false,
        }
    }

    /// Require a fresh PIN regardless of recent successes
    pub fn always_prompt(mut self) -> Self {
        self.bypass_session = true;
        self
    }
}

/// Final answer of a flow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    Approved,
    Denied,
}

impl VerificationOutcome {
    pub fn is_approved(self) -> bool {
        self == VerificationOutcome::Approved
    }
}

/// Controller state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    CheckingSession,
    Locked { until: DateTime<Utc> },
    AwaitingInput,
    Verifying,
    Resolved(VerificationOutcome),
}

impl GuardState {
    pub fn is_resolved(&self) -> bool {
        matches!(self, GuardState::Resolved(_))
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, GuardState::Locked { .. })
    }
}

/// Drives one verification flow
pub struct GuardController {
    store: AttemptStore,
    verifier: Arc<dyn PinVerifier>,
    gate: SessionGate,
    request: VerificationRequest,
    state: GuardState,
    notice: Option<Notice>,
    /// Full length of the current lockout, for the progress bar
    lockout_total: Option<Duration>,
    bypassed: bool,
}

impl GuardController {
    pub fn new(
        store: AttemptStore,
        verifier: Arc<dyn PinVerifier>,
        gate: SessionGate,
        request: VerificationRequest,
    ) -> Self {
        Self {
            store,
            verifier,
            gate,
            request,
            state: GuardState::Idle,
            notice: None,
            lockout_total: None,
            bypassed: false,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn notice(&self) -> Option<Notice> {
        self.notice
    }

    pub fn request(&self) -> &VerificationRequest {
        &self.request
    }

    /// Whether the flow was approved by the session window without a prompt
    pub fn was_bypassed(&self) -> bool {
        self.bypassed
    }

    /// Final outcome once resolved
    pub fn outcome(&self) -> Option<VerificationOutcome> {
        match self.state {
            GuardState::Resolved(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Time left in the current lockout, derived from the clock
    pub fn remaining_lockout(&self) -> Option<Duration> {
        match self.state {
            GuardState::Locked { until } => Some(clock::until(until, self.now())),
            _ => None,
        }
    }

    /// Start the flow: check the session window, then the lockout
    pub async fn begin(&mut self) -> Result<GuardState> {
        if self.state != GuardState::Idle {
            return Ok(self.state);
        }
        self.state = GuardState::CheckingSession;
        let result = self.check_session().await;
        self.settle(result)
    }

    /// Re-evaluate a running lockout; unlocks once the deadline has passed
    pub async fn poll(&mut self) -> Result<GuardState> {
        let GuardState::Locked { until } = self.state else {
            return Ok(self.state);
        };
        if self.now() < until {
            return Ok(self.state);
        }
        let result = self.expire_lockout().await;
        self.settle(result)
    }

    /// Submit a candidate PIN
    ///
    /// While locked the candidate is refused without being checked. Wrong PINs
    /// and refusals are reported through [`notice`](Self::notice), not errors.
    pub async fn submit(&mut self, candidate: &str) -> Result<GuardState> {
        let state = self.state;
        match state {
            GuardState::Locked { .. } => {
                if let GuardState::Locked { until } = self.poll().await? {
                    let remaining = clock::until(until, self.now());
                    debug!(
                        "Refused PIN for {} while locked ({:?} left)",
                        self.store.identity(),
                        remaining
                    );
                    self.notice = Some(Notice::StillLocked { remaining });
                    return Ok(self.state);
                }
            }
            GuardState::AwaitingInput => {}
            other => return Err(GuardError::UnexpectedSubmission(other)),
        }

        self.state = GuardState::Verifying;
        let result = self.verify(candidate).await;
        self.settle(result)
    }

    /// Dismiss the prompt; only meaningful while waiting on the user
    pub fn cancel(&mut self) -> GuardState {
        if matches!(
            self.state,
            GuardState::AwaitingInput | GuardState::Locked { .. }
        ) {
            info!("Verification for {} cancelled", self.store.identity());
            self.state = GuardState::Resolved(VerificationOutcome::Denied);
            self.notice = None;
            self.lockout_total = None;
        }
        self.state
    }

    /// Everything the prompt needs to draw right now
    pub fn view(&self) -> PromptView {
        let phase = match self.state {
            GuardState::Idle | GuardState::CheckingSession => PromptPhase::CheckingSession,
            GuardState::Locked { .. } => PromptPhase::Locked,
            GuardState::AwaitingInput => PromptPhase::AwaitingInput,
            GuardState::Verifying => PromptPhase::Verifying,
            GuardState::Resolved(_) => PromptPhase::Closed,
        };
        let remaining = self.remaining_lockout();
        let progress = remaining.zip(self.lockout_total).map(|(left, total)| {
            if total.is_zero() {
                1.0
            } else {
                (1.0 - left.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
            }
        });

        PromptView {
            title: self.request.title.clone(),
            description: self.request.description.clone(),
            phase,
            notice: self.notice,
            message: self.notice.as_ref().map(notice_text),
            remaining,
            countdown: remaining.map(countdown_text),
            progress,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.store.clock().now()
    }

    async fn check_session(&mut self) -> Result<GuardState> {
        let session = self.store.session().await?;
        if self
            .gate
            .should_bypass(&self.request, &session, self.now())
        {
            info!(
                "Verification for {} approved by session window",
                self.store.identity()
            );
            self.bypassed = true;
            return Ok(GuardState::Resolved(VerificationOutcome::Approved));
        }

        let mut record = self.store.load().await?;
        if record.has_expired_lockout(self.now()) {
            record = self.store.clear_expired_lockout().await?;
        }
        Ok(self.enter(record))
    }

    async fn expire_lockout(&mut self) -> Result<GuardState> {
        let record = self.store.clear_expired_lockout().await?;
        let state = self.enter(record);
        if state == GuardState::AwaitingInput {
            info!("Lockout for {} expired", self.store.identity());
            self.notice = Some(Notice::LockoutExpired);
        }
        Ok(state)
    }

    async fn verify(&mut self, candidate: &str) -> Result<GuardState> {
        let identity = self.store.identity().clone();
        if self.verifier.verify_pin(&identity, candidate).await {
            self.store.record_success().await?;
            info!("Verification for {} approved", identity);
            self.notice = None;
            return Ok(GuardState::Resolved(VerificationOutcome::Approved));
        }

        let record = self.store.record_failure().await?;
        let state = self.enter(record);
        let failed_count = record.failed_count;
        let policy = self.store.policy();

        self.notice = Some(if state.is_locked() {
            Notice::LockoutStarted {
                failed_count,
                duration: policy.tier(failed_count),
            }
        } else {
            Notice::WrongPin {
                failed_count,
                attempts_before_lockout: policy.attempts_before_next_tier(failed_count),
                next_lockout: policy
                    .next_threshold(failed_count)
                    .and_then(|next| policy.lockout_duration(next)),
            }
        });
        Ok(state)
    }

    /// State implied by a freshly loaded record
    fn enter(&mut self, record: AttemptRecord) -> GuardState {
        match record.lockout_until {
            Some(until) if self.now() < until => {
                self.lockout_total = Some(self.store.policy().tier(record.failed_count));
                GuardState::Locked { until }
            }
            _ => {
                self.lockout_total = None;
                GuardState::AwaitingInput
            }
        }
    }

    /// Commit a transition, failing closed on error
    fn settle(&mut self, result: Result<GuardState>) -> Result<GuardState> {
        match result {
            Ok(state) => {
                self.state = state;
                Ok(state)
            }
            Err(e) => {
                error!(
                    "Verification for {} failed closed: {}",
                    self.store.identity(),
                    e
                );
                self.state = GuardState::Resolved(VerificationOutcome::Denied);
                self.notice = None;
                self.lockout_total = None;
                Err(e)
            }
        }
    }
}
