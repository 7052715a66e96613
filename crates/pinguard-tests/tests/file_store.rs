//! File-backed guard state across restarts and concurrent writers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::tempdir;

use pinguard::{
    AttemptStore, Clock, FileBackend, GuardClient, GuardConfig, Identity, LockoutPolicy, ManualClock,
    PinVerifier, Prompt, PromptEvent, PromptPhase, PromptView, VerificationOutcome,
    VerificationRequest,
};

const PIN: &str = "650284";

struct OneShotPrompt {
    events: Vec<PromptEvent>,
    first_phase: Option<PromptPhase>,
}

impl OneShotPrompt {
    fn new(mut events: Vec<PromptEvent>) -> Self {
        events.reverse();
        Self {
            events,
            first_phase: None,
        }
    }
}

#[async_trait]
impl Prompt for OneShotPrompt {
    fn render(&mut self, view: &PromptView) {
        self.first_phase.get_or_insert(view.phase);
    }

    async fn next_event(&mut self) -> Option<PromptEvent> {
        self.events.pop()
    }
}

fn verifier() -> Arc<dyn PinVerifier> {
    Arc::new(|candidate: &str| candidate == PIN)
}

fn request() -> VerificationRequest {
    VerificationRequest::new("Save bank account", "Add the checking account ending 0091")
}

#[tokio::test]
async fn test_lockout_survives_restart() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = GuardConfig {
        store_path: dir.path().join("state"),
        ..Default::default()
    };
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 9, 9, 18, 0, 0).unwrap());
    let identity = Identity::new("ivan@example.com");

    {
        let client = GuardClient::from_config_with_clock(
            identity.clone(),
            &config,
            verifier(),
            Arc::new(clock.clone()),
        )?;
        let mut prompt = OneShotPrompt::new(vec![
            PromptEvent::submit("000000"),
            PromptEvent::submit("000000"),
            PromptEvent::submit("000000"),
            PromptEvent::Cancel,
        ]);
        let outcome = client.request_verification(request(), &mut prompt).await?;
        assert_eq!(outcome, VerificationOutcome::Denied);
    }

    // New client over the same directory, as after an app restart
    clock.advance(Duration::from_secs(30));
    let client =
        GuardClient::from_config_with_clock(identity, &config, verifier(), Arc::new(clock.clone()))?;

    let status = client.status().await?;
    assert_eq!(status.record.failed_count, 3);
    assert_eq!(status.locked_for, Some(Duration::from_secs(30)));

    let mut prompt = OneShotPrompt::new(vec![PromptEvent::submit(PIN), PromptEvent::Cancel]);
    let outcome = client.request_verification(request(), &mut prompt).await?;
    assert_eq!(outcome, VerificationOutcome::Denied);
    assert_eq!(prompt.first_phase, Some(PromptPhase::Locked));

    clock.advance(Duration::from_secs(30));
    let mut prompt = OneShotPrompt::new(vec![PromptEvent::submit(PIN)]);
    let outcome = client.request_verification(request(), &mut prompt).await?;
    assert_eq!(outcome, VerificationOutcome::Approved);
    assert_eq!(client.status().await?.record.failed_count, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_contexts_do_not_lose_failures() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 9, 9, 18, 0, 0).unwrap());
    let identity = Identity::new("shared-household");

    // Two windows, each with its own backend over the same directory
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let store = AttemptStore::new(
            identity.clone(),
            Arc::new(FileBackend::new(dir.path().to_path_buf())?),
            LockoutPolicy::default(),
            Arc::new(clock.clone()),
        )
        .with_max_retries(64);

        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                store.record_failure().await?;
            }
            pinguard::Result::<()>::Ok(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    let reader = AttemptStore::new(
        identity,
        Arc::new(FileBackend::new(dir.path().to_path_buf())?),
        LockoutPolicy::default(),
        Arc::new(clock.clone()),
    );
    let record = reader.load().await?;
    assert_eq!(record.failed_count, 10);
    assert_eq!(
        record.lockout_until,
        Some(clock.now() + chrono::Duration::seconds(1800))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crashed_writer_lock_does_not_lose_failures() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 9, 9, 18, 0, 0).unwrap());
    let identity = Identity::new("shared-household");

    // A writer died holding the lock and left the file behind
    std::fs::write(
        dir.path().join(format!("{}.lock", identity.storage_key())),
        b"pid 31337",
    )?;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = AttemptStore::new(
            identity.clone(),
            Arc::new(FileBackend::new(dir.path().to_path_buf())?),
            LockoutPolicy::default(),
            Arc::new(clock.clone()),
        )
        .with_max_retries(64);

        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                store.record_failure().await?;
            }
            pinguard::Result::<()>::Ok(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    let reader = AttemptStore::new(
        identity,
        Arc::new(FileBackend::new(dir.path().to_path_buf())?),
        LockoutPolicy::default(),
        Arc::new(clock.clone()),
    );
    assert_eq!(reader.load().await?.failed_count, 40);
    Ok(())
}

#[tokio::test]
async fn test_forget_removes_identity_state() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = GuardConfig {
        store_path: dir.path().to_path_buf(),
        ..Default::default()
    };
    let client = GuardClient::from_config(Identity::new("julia"), &config, verifier())?;

    let mut prompt = OneShotPrompt::new(vec![PromptEvent::submit("999999"), PromptEvent::Cancel]);
    client.request_verification(request(), &mut prompt).await?;
    assert_eq!(client.status().await?.record.failed_count, 1);

    client.forget().await?;
    assert_eq!(client.status().await?.record.failed_count, 0);
    // Only the lock file stays behind
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext != "lock"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}
