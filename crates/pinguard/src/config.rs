//! Guard configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GuardError, Result};
use crate::policy::LockoutPolicy;
use crate::session::SESSION_DURATION;
use crate::store::{DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_RETRIES};

/// Guard configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Directory holding per-identity state files
    pub store_path: PathBuf,

    /// Trust window after a successful verification (seconds)
    pub session_window_secs: u64,

    /// Countdown refresh interval while locked (milliseconds)
    pub countdown_tick_ms: u64,

    /// Lost write races tolerated per update
    pub max_store_retries: u32,

    /// How long a writer waits for the per-identity store lock (milliseconds)
    pub lock_timeout_ms: u64,

    /// Lockout tiers
    pub lockout_policy: LockoutPolicy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            store_path: Self::default_store_path(),
            session_window_secs: SESSION_DURATION.as_secs(),
            countdown_tick_ms: 1000,
            max_store_retries: DEFAULT_MAX_RETRIES,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            lockout_policy: LockoutPolicy::default(),
        }
    }
}

impl GuardConfig {
    /// Get the default storage path
    pub fn default_store_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pinguard")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, writing the defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        info!("Created default guard config at {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the guard cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.countdown_tick_ms == 0 {
            return Err(GuardError::Config(
                "countdown_tick_ms must be positive".to_string(),
            ));
        }
        if self.max_store_retries == 0 {
            return Err(GuardError::Config(
                "max_store_retries must be positive".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(GuardError::Config(
                "lock_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the store directory if it doesn't exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store_path)?;
        Ok(())
    }

    pub fn session_window(&self) -> Duration {
        Duration::from_secs(self.session_window_secs)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
