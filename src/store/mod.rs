//! Durable session storage, the core abstraction for backends
//!
//! All durable tiers (in-memory, JSON file, or an external database)
//! implement `SessionStore`. The container never writes through a store
//! directly; transactions hand it one `WriteBatch` per commit, which the
//! store applies all-or-nothing.
//!
//! Backends own concurrency control. Each stored entry carries a revision;
//! a write naming a revision the store no longer holds fails with
//! `SessionError::Conflict`, leaving retry to the caller.

use crate::data::SessionEntry;
use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub mod file;
pub mod memory;

/// Access-time summary of one stored entry, used by the sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    /// Client id the entry is stored under
    pub client_id: String,

    /// Last coarse access time (Unix seconds)
    pub last_access_time: i64,

    /// Stored revision
    pub revision: u64,
}

/// A write staged by a transaction
#[derive(Debug, Clone)]
pub struct StagedWrite {
    /// Client id to store under
    pub client_id: String,

    /// Entry to store; its revision is assigned by the backend
    pub entry: SessionEntry,

    /// Revision read by the transaction, `None` for an entry it created
    pub expected_revision: Option<u64>,
}

/// A deletion staged by a transaction
#[derive(Debug, Clone)]
pub struct StagedDelete {
    /// Client id to remove
    pub client_id: String,

    /// Revision the transaction saw when deciding to delete
    pub expected_revision: u64,
}

/// Everything one transaction commits to one store
///
/// Deletes are applied before writes, so a batch may delete a stale entry
/// and insert its replacement under the same client id.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Entries to insert or overwrite
    pub writes: Vec<StagedWrite>,

    /// Entries to remove
    pub deletes: Vec<StagedDelete>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write
    pub fn write(
        mut self,
        client_id: impl Into<String>,
        entry: SessionEntry,
        expected_revision: Option<u64>,
    ) -> Self {
        self.writes.push(StagedWrite {
            client_id: client_id.into(),
            entry,
            expected_revision,
        });
        self
    }

    /// Stage a delete
    pub fn delete(mut self, client_id: impl Into<String>, expected_revision: u64) -> Self {
        self.deletes.push(StagedDelete {
            client_id: client_id.into(),
            expected_revision,
        });
        self
    }

    /// Whether there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// Outcome of applying a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Entries inserted or overwritten
    pub written: usize,

    /// Entries actually removed (absent ones are skipped)
    pub deleted: usize,
}

/// Backend status information
#[derive(Debug, Clone)]
pub struct StoreInfo {
    /// Backend name
    pub backend: String,

    /// Number of stored entries
    pub entries: usize,
}

/// Core trait for durable session backends
pub trait SessionStore: Send + Sync {
    /// Read one entry
    ///
    /// Each call returns an independent copy; transactions provide identity
    /// within a unit of work.
    fn read(&self, client_id: &str) -> Result<Option<SessionEntry>>;

    /// Snapshot every stored entry, in no particular order
    fn iterate(&self) -> Result<Vec<(String, SessionEntry)>>;

    /// Apply a batch atomically: either every staged change lands or none
    fn commit(&self, batch: WriteBatch) -> Result<CommitSummary>;

    /// Backend name (e.g., "memory", "file")
    fn name(&self) -> &str;

    /// Access times of every stored entry
    ///
    /// Default implementation derives them from `iterate()`. Backends that
    /// can answer without materializing session data should override this.
    fn access_times(&self) -> Result<Vec<AccessRecord>> {
        Ok(self
            .iterate()?
            .into_iter()
            .map(|(client_id, entry)| AccessRecord {
                client_id,
                last_access_time: entry.last_access_time,
                revision: entry.revision,
            })
            .collect())
    }

    /// Backend info
    fn info(&self) -> Result<StoreInfo> {
        Ok(StoreInfo {
            backend: self.name().to_string(),
            entries: self.access_times()?.len(),
        })
    }
}

/// Stored entries plus the store-wide revision counter
///
/// Revisions come from one counter that only moves forward, so an entry
/// deleted by a sweep and later recreated under the same client id never
/// reuses a revision an older reader may still hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EntryTable {
    /// Revision the next write will be assigned
    #[serde(default = "first_revision")]
    pub next_revision: u64,

    /// Client id -> entry
    #[serde(default)]
    pub entries: HashMap<String, SessionEntry>,
}

fn first_revision() -> u64 {
    1
}

impl Default for EntryTable {
    fn default() -> Self {
        Self {
            next_revision: first_revision(),
            entries: HashMap::new(),
        }
    }
}

impl EntryTable {
    /// Raise the counter above every stored revision
    ///
    /// Applied after loading, so a hand-edited or truncated counter can
    /// never hand out a revision that is already in use.
    pub fn reconcile(&mut self) {
        let floor = self
            .entries
            .values()
            .map(|e| e.revision)
            .max()
            .unwrap_or(0)
            + 1;
        self.next_revision = self.next_revision.max(floor);
    }

    pub fn access_times(&self) -> Vec<AccessRecord> {
        self.entries
            .iter()
            .map(|(k, v)| AccessRecord {
                client_id: k.clone(),
                last_access_time: v.last_access_time,
                revision: v.revision,
            })
            .collect()
    }

    /// Validate and apply a batch
    ///
    /// Every precondition is checked before anything is mutated, so a
    /// failed batch leaves the table untouched.
    pub fn apply(&mut self, batch: WriteBatch) -> Result<CommitSummary> {
        let mut removed: HashSet<&str> = HashSet::new();

        for delete in &batch.deletes {
            if let Some(current) = self.entries.get(&delete.client_id) {
                if current.revision != delete.expected_revision {
                    return Err(SessionError::Conflict {
                        client_id: delete.client_id.clone(),
                        expected: Some(delete.expected_revision),
                        found: Some(current.revision),
                    });
                }
                removed.insert(delete.client_id.as_str());
            }
        }

        for write in &batch.writes {
            let found = if removed.contains(write.client_id.as_str()) {
                None
            } else {
                self.entries.get(&write.client_id).map(|e| e.revision)
            };
            if found != write.expected_revision {
                return Err(SessionError::Conflict {
                    client_id: write.client_id.clone(),
                    expected: write.expected_revision,
                    found,
                });
            }
        }

        let mut summary = CommitSummary::default();
        for delete in batch.deletes {
            if self.entries.remove(&delete.client_id).is_some() {
                summary.deleted += 1;
            }
        }
        for write in batch.writes {
            let mut entry = write.entry;
            entry.revision = self.next_revision;
            self.next_revision += 1;
            entry.mark_clean();
            self.entries.insert(write.client_id, entry);
            summary.written += 1;
        }
        Ok(summary)
    }
}
