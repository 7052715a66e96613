//! Public entry point for sensitive actions
//!
//! Every caller about to delete a payment method, cancel a contribution or
//! similar goes through [`GuardClient::request_verification`] and proceeds
//! only on [`VerificationOutcome::Approved`].

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info};

use crate::clock::{self, Clock, SystemClock};
use crate::config::GuardConfig;
use crate::controller::{GuardController, GuardState, VerificationOutcome, VerificationRequest};
use crate::error::Result;
use crate::events::{DenialReason, GuardEvent};
use crate::messages::Notice;
use crate::prompt::{Prompt, PromptEvent};
use crate::record::{AttemptRecord, Identity};
use crate::session::SessionGate;
use crate::store::{AttemptStore, FileBackend};
use crate::verifier::PinVerifier;

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 64;

/// Flow locks shared by every client in the process, one per identity
static FLOWS: LazyLock<std::sync::Mutex<HashMap<Identity, Weak<Mutex<()>>>>> =
    LazyLock::new(Default::default);

/// Lock serialising flows for `identity`, shared with any other live client
fn flow_lock(identity: &Identity) -> Arc<Mutex<()>> {
    let mut flows = FLOWS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(flow) = flows.get(identity).and_then(Weak::upgrade) {
        return flow;
    }
    flows.retain(|_, flow| flow.strong_count() > 0);

    let flow = Arc::new(Mutex::new(()));
    flows.insert(identity.clone(), Arc::downgrade(&flow));
    flow
}

/// Snapshot of an identity's guard state, without opening a prompt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardStatus {
    pub record: AttemptRecord,
    /// Time left in an active lockout
    pub locked_for: Option<Duration>,
    /// Time left in the session trust window
    pub session_remaining: Duration,
}

/// Guard for one authenticated identity
pub struct GuardClient {
    store: AttemptStore,
    verifier: Arc<dyn PinVerifier>,
    gate: SessionGate,
    countdown_tick: Duration,
    /// Held for the whole of a flow so requests for one identity queue
    /// instead of racing, across every client in the process
    flow: Arc<Mutex<()>>,
    events: broadcast::Sender<GuardEvent>,
}

impl GuardClient {
    /// Create a client with the default session window and countdown tick
    pub fn new(store: AttemptStore, verifier: Arc<dyn PinVerifier>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            flow: flow_lock(store.identity()),
            store,
            verifier,
            gate: SessionGate::default(),
            countdown_tick: Duration::from_secs(1),
            events,
        }
    }

    /// Create a file-backed client from configuration
    pub fn from_config(
        identity: Identity,
        config: &GuardConfig,
        verifier: Arc<dyn PinVerifier>,
    ) -> Result<Self> {
        Self::from_config_with_clock(identity, config, verifier, Arc::new(SystemClock))
    }

    /// Create a file-backed client with an explicit clock
    pub fn from_config_with_clock(
        identity: Identity,
        config: &GuardConfig,
        verifier: Arc<dyn PinVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        config.ensure_directories()?;

        let backend = FileBackend::new(config.store_path.clone())?.with_lock_timeout(config.lock_timeout());
        let store = AttemptStore::new(
            identity,
            Arc::new(backend),
            config.lockout_policy.clone(),
            clock,
        )
        .with_max_retries(config.max_store_retries);

        Ok(Self::new(store, verifier)
            .with_session_window(config.session_window())
            .with_countdown_tick(config.countdown_tick()))
    }

    pub fn with_session_window(mut self, window: Duration) -> Self {
        self.gate = SessionGate::new(window);
        self
    }

    pub fn with_countdown_tick(mut self, tick: Duration) -> Self {
        self.countdown_tick = tick.max(Duration::from_millis(1));
        self
    }

    pub fn identity(&self) -> &Identity {
        self.store.identity()
    }

    /// Subscribe to guard events
    pub fn subscribe(&self) -> broadcast::Receiver<GuardEvent> {
        self.events.subscribe()
    }

    /// Ask the user to re-enter their PIN before a sensitive action
    ///
    /// Wrong PINs, lockouts and cancellation all end in `Ok`; `Err` means
    /// persistence failed, and the caller must treat it as a denial.
    pub async fn request_verification<P>(
        &self,
        request: VerificationRequest,
        prompt: &mut P,
    ) -> Result<VerificationOutcome>
    where
        P: Prompt + ?Sized,
    {
        let _flow = self.flow.lock().await;
        info!(
            "Verification requested for {}: {}",
            self.identity(),
            request.title
        );

        let mut controller = GuardController::new(
            self.store.clone(),
            Arc::clone(&self.verifier),
            self.gate,
            request,
        );

        match self.drive(&mut controller, prompt).await {
            Ok(outcome) => {
                if !controller.was_bypassed() {
                    prompt.render(&controller.view());
                    prompt.dismiss(outcome);
                }
                self.emit(match outcome {
                    VerificationOutcome::Approved => GuardEvent::Approved {
                        identity: self.identity().clone(),
                        bypassed: controller.was_bypassed(),
                    },
                    VerificationOutcome::Denied => GuardEvent::Denied {
                        identity: self.identity().clone(),
                        reason: DenialReason::Cancelled,
                    },
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    "Verification for {} denied by storage failure: {}",
                    self.identity(),
                    e
                );
                prompt.render(&controller.view());
                prompt.dismiss(VerificationOutcome::Denied);
                self.emit(GuardEvent::StorageFailure {
                    identity: self.identity().clone(),
                    message: e.to_string(),
                });
                self.emit(GuardEvent::Denied {
                    identity: self.identity().clone(),
                    reason: DenialReason::StorageFailure,
                });
                Err(e)
            }
        }
    }

    /// Current counters and windows, clearing a lockout that has run out
    pub async fn status(&self) -> Result<GuardStatus> {
        let now = self.store.clock().now();
        let mut record = self.store.load().await?;
        if record.has_expired_lockout(now) {
            record = self.store.clear_expired_lockout().await?;
        }
        let session = self.store.session().await?;

        Ok(GuardStatus {
            record,
            locked_for: record
                .lockout_until
                .filter(|&until| now < until)
                .map(|until| clock::until(until, now)),
            session_remaining: self.gate.remaining(&session, now),
        })
    }

    /// End the trust window, e.g. on sign-out
    pub async fn end_session(&self) -> Result<()> {
        let _flow = self.flow.lock().await;
        self.store.end_session().await
    }

    /// Drop all guard state for this identity, e.g. on account removal
    pub async fn forget(&self) -> Result<()> {
        let _flow = self.flow.lock().await;
        self.store.forget().await
    }

    async fn drive<P>(
        &self,
        controller: &mut GuardController,
        prompt: &mut P,
    ) -> Result<VerificationOutcome>
    where
        P: Prompt + ?Sized,
    {
        controller.begin().await?;

        // Exists only while locked; dropping it stops the ticking
        let mut countdown: Option<Interval> = None;

        loop {
            let state = controller.state();
            if let GuardState::Resolved(outcome) = state {
                return Ok(outcome);
            }
            if state.is_locked() {
                let tick = self.countdown_tick;
                countdown.get_or_insert_with(|| {
                    let mut interval = interval_at(Instant::now() + tick, tick);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    interval
                });
            } else {
                countdown = None;
            }

            prompt.render(&controller.view());

            tokio::select! {
                biased;
                event = prompt.next_event() => match event {
                    Some(PromptEvent::Submit(candidate)) => {
                        let after = controller.submit(&candidate).await?;
                        self.note_transition(state, after, controller.notice());
                    }
                    Some(PromptEvent::Cancel) | None => {
                        controller.cancel();
                    }
                },
                _ = next_tick(&mut countdown) => {
                    let after = controller.poll().await?;
                    self.note_transition(state, after, controller.notice());
                }
            }
        }
    }

    /// Broadcast lockout start and expiry
    ///
    /// A submission after the deadline can expire one lockout and start the
    /// next in a single step, so both events may fire.
    fn note_transition(&self, before: GuardState, after: GuardState, notice: Option<Notice>) {
        let was = locked_until(before);
        let now = locked_until(after);
        if was == now {
            return;
        }
        if was.is_some() {
            self.emit(GuardEvent::LockoutExpired {
                identity: self.identity().clone(),
            });
        }
        if let (Some(until), Some(Notice::LockoutStarted { failed_count, .. })) = (now, notice) {
            self.emit(GuardEvent::LockoutStarted {
                identity: self.identity().clone(),
                until,
                failed_count,
            });
        }
    }

    fn emit(&self, event: GuardEvent) {
        let _ = self.events.send(event);
    }
}

fn locked_until(state: GuardState) -> Option<DateTime<Utc>> {
    match state {
        GuardState::Locked { until } => Some(until),
        _ => None,
    }
}

async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
