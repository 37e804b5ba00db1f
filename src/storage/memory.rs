//! In-memory cassette store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{CassetteWriter, ResourceLoader};
use crate::{Result, TapedeckError};

/// Cassette store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    cassettes: Mutex<HashMap<String, Vec<u8>>>,
    persist_count: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a serialized cassette
    #[must_use]
    pub fn with_cassette(self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.cassettes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), data.into());
        self
    }

    /// Current bytes of cassette `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.cassettes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Number of successful writes so far
    #[must_use]
    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::Acquire)
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }
}

impl ResourceLoader for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(name))
    }
}

impl CassetteWriter for MemoryStore {
    fn persist(&self, name: &str, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(TapedeckError::Other(format!(
                "Writes to cassette '{name}' are disabled"
            )));
        }

        self.cassettes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), data.to_vec());
        self.persist_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
