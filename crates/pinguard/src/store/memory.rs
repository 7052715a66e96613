//! In-memory backend
//!
//! Used by tests and by hosts that keep guard state for the life of the
//! process only.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::StateBackend;
use crate::error::Result;
use crate::record::{Identity, PersistedState, Versioned};

/// Guard state held in a process-local map
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<Identity, Versioned>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, e.g. counters left over from an earlier session
    pub async fn insert(&self, identity: Identity, state: PersistedState) {
        let mut records = self.records.lock().await;
        let version = Versioned::next_version(records.get(&identity).map(|v| v.version));
        records.insert(identity, Versioned { version, state });
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self, identity: &Identity) -> Result<Option<Versioned>> {
        Ok(self.records.lock().await.get(identity).copied())
    }

    async fn compare_and_swap(
        &self,
        identity: &Identity,
        expected: Option<u64>,
        state: PersistedState,
    ) -> Result<bool> {
        let mut records = self.records.lock().await;
        let current = records.get(identity).map(|v| v.version);
        if current != expected {
            return Ok(false);
        }
        records.insert(
            identity.clone(),
            Versioned {
                version: Versioned::next_version(expected),
                state,
            },
        );
        Ok(true)
    }

    async fn remove(&self, identity: &Identity) -> Result<()> {
        self.records.lock().await.remove(identity);
        Ok(())
    }
}
