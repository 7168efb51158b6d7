//! In-memory session store
//!
//! Shared by every worker in the process, lost on restart. Useful for
//! single-process deployments and for tests, which can inspect the
//! write statistics to check what reached the durable tier.

use super::{AccessRecord, CommitSummary, EntryTable, SessionStore, WriteBatch};
use crate::data::SessionEntry;
use crate::error::{Result, SessionError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Counters of durable-tier traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Successful non-empty commits
    pub commits: u64,

    /// Entries written
    pub writes: u64,

    /// Entries deleted
    pub deletes: u64,
}

/// In-memory durable tier backed by a `HashMap`
#[derive(Default)]
pub struct MemorySessionStore {
    table: RwLock<EntryTable>,
    commits: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Traffic counters since creation
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            commits: self.commits.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.entries.len()).unwrap_or_default()
    }

    /// Whether no entries are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(e: impl std::fmt::Display) -> SessionError {
    SessionError::Storage(format!("Session store lock poisoned: {}", e))
}

impl SessionStore for MemorySessionStore {
    fn read(&self, client_id: &str) -> Result<Option<SessionEntry>> {
        let table = self.table.read().map_err(poisoned)?;
        Ok(table.entries.get(client_id).cloned())
    }

    fn iterate(&self) -> Result<Vec<(String, SessionEntry)>> {
        let table = self.table.read().map_err(poisoned)?;
        Ok(table
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn access_times(&self) -> Result<Vec<AccessRecord>> {
        let table = self.table.read().map_err(poisoned)?;
        Ok(table.access_times())
    }

    fn commit(&self, batch: WriteBatch) -> Result<CommitSummary> {
        if batch.is_empty() {
            return Ok(CommitSummary::default());
        }

        let mut table = self.table.write().map_err(poisoned)?;
        let summary = table.apply(batch)?;

        self.commits.fetch_add(1, Ordering::Relaxed);
        self.writes.fetch_add(summary.written as u64, Ordering::Relaxed);
        self.deletes.fetch_add(summary.deleted as u64, Ordering::Relaxed);
        Ok(summary)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
