//! PIN Guard - step-up re-authentication for sensitive actions
//!
//! Before a payment credential is deleted, a recurring contribution is
//! cancelled or a default payment method changes, the caller asks the guard
//! to re-verify the user's PIN.
//!
//! # Security Model
//!
//! - Progressive lockout: 3 failures lock for 1 minute, 5 for 5 minutes,
//!   10 for 30 minutes
//! - Failure counters and lockout deadlines are persisted per identity and
//!   survive restarts
//! - A successful verification opens a 5 minute trust window that callers
//!   can opt out of for especially sensitive actions
//! - Storage failures fail closed and are reported separately from denials
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use pinguard::{ChannelPrompt, GuardClient, GuardConfig, Identity, VerificationRequest};
//!
//! # async fn run() -> pinguard::Result<()> {
//! let config = GuardConfig::default();
//! let verifier = Arc::new(|candidate: &str| candidate == "482916");
//! let guard = GuardClient::from_config(Identity::new("user-42"), &config, verifier)?;
//!
//! let (mut prompt, _ui) = ChannelPrompt::channel(8);
//! let request = VerificationRequest::new("Delete card", "Remove the Visa ending 4242");
//! if guard.request_verification(request, &mut prompt).await?.is_approved() {
//!     // perform the deletion
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod messages;
pub mod policy;
pub mod prompt;
pub mod record;
pub mod session;
pub mod store;
pub mod verifier;

pub use client::{GuardClient, GuardStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use controller::{GuardController, GuardState, VerificationOutcome, VerificationRequest};
pub use error::{GuardError, Result};
pub use events::{DenialReason, GuardEvent};
pub use messages::Notice;
pub use policy::{LockoutPolicy, LockoutTier};
pub use prompt::{ChannelPrompt, Prompt, PromptEvent, PromptHandle, PromptPhase, PromptView};
pub use record::{AttemptRecord, Identity, PersistedState, VerificationSession, Versioned};
pub use session::{SessionGate, SESSION_DURATION};
pub use store::{AttemptStore, FileBackend, MemoryBackend, StateBackend};
pub use verifier::PinVerifier;
