//! File-backed guard state
//!
//! One JSON file per identity (`<hex identity>.json`). Writers from any
//! process serialise on an advisory `flock` held on `<hex identity>.lock`,
//! re-check the stored version inside the lock, and replace the record
//! atomically with a temp file and rename.
//!
//! The lock file itself is never deleted. The kernel drops the lock when the
//! holder's descriptor closes, including when the holding process dies, so a
//! lock file left behind by a crashed writer is simply locked again.

use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::time::Instant;
use tracing::debug;

use super::StateBackend;
use crate::error::{GuardError, Result};
use crate::record::{Identity, PersistedState, Versioned};

/// Default time a writer waits for the lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause between lock attempts
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Guard state persisted under a directory
#[derive(Clone, Debug)]
pub struct FileBackend {
    /// Base path for storage
    base_path: PathBuf,
    /// How long a writer waits for a contended lock
    lock_timeout: Duration,
}

impl FileBackend {
    /// Create a backend rooted at `base_path`, creating the directory
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Override how long writers wait for the lock
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, identity: &Identity) -> PathBuf {
        self.base_path
            .join(format!("{}.json", identity.storage_key()))
    }

    fn lock_path(&self, identity: &Identity) -> PathBuf {
        self.base_path
            .join(format!("{}.lock", identity.storage_key()))
    }

    async fn read(&self, path: &Path) -> Result<Option<Versioned>> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents).map_err(|e| {
                GuardError::Serialization(format!(
                    "Failed to parse {}: {}",
                    path.display(),
                    e
                ))
            })?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the record; only called with the lock held
    async fn write(&self, path: &Path, record: &Versioned) -> Result<()> {
        let contents = serde_json::to_string_pretty(record)?;

        // Write atomically
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).await?;

        // Set restrictive permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn acquire(&self, identity: &Identity) -> Result<LockFile> {
        let path = self.lock_path(identity);

        let mut options = fs::OpenOptions::new();
        options.create(true).read(true).write(true).truncate(false);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(&path).await?.into_std().await;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            if try_lock_exclusive(&file)? {
                return Ok(LockFile { _file: file });
            }
            if Instant::now() >= deadline {
                return Err(GuardError::StorageUnavailable(format!(
                    "Timed out waiting for {}",
                    path.display()
                )));
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }
}

/// Held lock; closing the descriptor on drop releases it
struct LockFile {
    _file: File,
}

/// Try to take an exclusive advisory lock without blocking
///
/// Returns `Ok(false)` while another descriptor holds the lock.
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `file` and stays open for the call
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn load(&self, identity: &Identity) -> Result<Option<Versioned>> {
        self.read(&self.record_path(identity)).await
    }

    async fn compare_and_swap(
        &self,
        identity: &Identity,
        expected: Option<u64>,
        state: PersistedState,
    ) -> Result<bool> {
        let _lock = self.acquire(identity).await?;
        let path = self.record_path(identity);

        let current = self.read(&path).await?.map(|v| v.version);
        if current != expected {
            debug!(
                "Stale write to {}: expected {:?}, found {:?}",
                path.display(),
                expected,
                current
            );
            return Ok(false);
        }

        let record = Versioned {
            version: Versioned::next_version(expected),
            state,
        };
        self.write(&path, &record).await?;
        Ok(true)
    }

    async fn remove(&self, identity: &Identity) -> Result<()> {
        let _lock = self.acquire(identity).await?;
        match fs::remove_file(self.record_path(identity)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
