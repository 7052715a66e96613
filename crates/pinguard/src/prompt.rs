//! Renderable prompt driven by the controller
//!
//! The guard never draws anything. It hands a [`PromptView`] to a [`Prompt`]
//! whenever something visible changes and waits for the user's next
//! [`PromptEvent`]. [`ChannelPrompt`] connects that to a UI task over tokio
//! channels.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use zeroize::Zeroizing;

use crate::messages::Notice;
use crate::VerificationOutcome;

/// Which screen the prompt should show
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptPhase {
    CheckingSession,
    AwaitingInput,
    Locked,
    Verifying,
    Closed,
}

/// Snapshot of everything the prompt needs to draw
#[derive(Clone, Debug, PartialEq)]
pub struct PromptView {
    pub title: String,
    pub description: String,
    pub phase: PromptPhase,
    /// Reason code behind `message`
    pub notice: Option<Notice>,
    /// Display text for `notice`
    pub message: Option<String>,
    /// Time left in the lockout, recomputed on every render
    pub remaining: Option<Duration>,
    /// Display text for `remaining`
    pub countdown: Option<String>,
    /// Fraction of the lockout already served, 0.0 to 1.0
    pub progress: Option<f64>,
}

/// User input from the prompt
pub enum PromptEvent {
    /// Candidate PIN, wiped from memory when dropped
    Submit(Zeroizing<String>),
    /// Prompt dismissed
    Cancel,
}

impl PromptEvent {
    pub fn submit(pin: impl Into<String>) -> Self {
        PromptEvent::Submit(Zeroizing::new(pin.into()))
    }
}

impl fmt::Debug for PromptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptEvent::Submit(_) => f.write_str("Submit(<redacted>)"),
            PromptEvent::Cancel => f.write_str("Cancel"),
        }
    }
}

/// A prompt the guard can drive
#[async_trait]
pub trait Prompt: Send {
    /// Show the current view
    fn render(&mut self, view: &PromptView);

    /// Wait for the next user event; `None` means the prompt went away
    ///
    /// Must be cancel-safe: the guard races it against the lockout countdown
    /// and drops the future on every tick.
    async fn next_event(&mut self) -> Option<PromptEvent>;

    /// The flow resolved; the prompt can close
    fn dismiss(&mut self, _outcome: VerificationOutcome) {}
}

/// Prompt backed by tokio channels
pub struct ChannelPrompt {
    events: mpsc::Receiver<PromptEvent>,
    views: watch::Sender<Option<PromptView>>,
    outcome: watch::Sender<Option<VerificationOutcome>>,
}

/// UI side of a [`ChannelPrompt`]
#[derive(Clone)]
pub struct PromptHandle {
    events: mpsc::Sender<PromptEvent>,
    views: watch::Receiver<Option<PromptView>>,
    outcome: watch::Receiver<Option<VerificationOutcome>>,
}

impl ChannelPrompt {
    /// Create a prompt and the handle a UI task uses to drive it
    pub fn channel(buffer: usize) -> (Self, PromptHandle) {
        let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
        let (view_tx, view_rx) = watch::channel(None);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        (
            Self {
                events: event_rx,
                views: view_tx,
                outcome: outcome_tx,
            },
            PromptHandle {
                events: event_tx,
                views: view_rx,
                outcome: outcome_rx,
            },
        )
    }
}

#[async_trait]
impl Prompt for ChannelPrompt {
    fn render(&mut self, view: &PromptView) {
        self.views.send_replace(Some(view.clone()));
    }

    async fn next_event(&mut self) -> Option<PromptEvent> {
        self.events.recv().await
    }

    fn dismiss(&mut self, outcome: VerificationOutcome) {
        self.outcome.send_replace(Some(outcome));
    }
}

impl PromptHandle {
    /// Send a candidate PIN; false if the flow has already ended
    pub async fn submit(&self, pin: impl Into<String>) -> bool {
        self.events.send(PromptEvent::submit(pin)).await.is_ok()
    }

    /// Dismiss the prompt; false if the flow has already ended
    pub async fn cancel(&self) -> bool {
        self.events.send(PromptEvent::Cancel).await.is_ok()
    }

    /// Most recently rendered view
    pub fn current(&self) -> Option<PromptView> {
        self.views.borrow().clone()
    }

    /// Wait for the next render; `None` once the guard side is gone
    pub async fn changed(&mut self) -> Option<PromptView> {
        self.views.changed().await.ok()?;
        self.views.borrow_and_update().clone()
    }

    /// Final outcome, once the flow has resolved
    pub fn outcome(&self) -> Option<VerificationOutcome> {
        *self.outcome.borrow()
    }
}
