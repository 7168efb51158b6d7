//! Unit of work over the durable tier
//!
//! A `Transaction` borrows a worker's volatile tier and keeps, per
//! container, the entries it has handed out plus the deletions staged by
//! sweeps. Repeated reads of one client id inside a transaction address
//! the same working entry, so a write made through one handle is seen by
//! the next.
//!
//! Nothing reaches a store before `commit()`. Commit sends each container's
//! store a single `WriteBatch` holding the staged deletes and every entry
//! with a mutated namespace. Volatile entries in that batch are promoted:
//! once the store accepts the batch they leave the worker's tier. Entries
//! that were only read are never written. Dropping or aborting the
//! transaction discards all of it.
//!
//! Batches are atomic per store, not across stores.

use crate::data::{SessionEntry, SessionMap};
use crate::error::Result;
use crate::store::{CommitSummary, SessionStore, WriteBatch};
use crate::worker::WorkerCache;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Where a handed-out entry currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Only in the worker's volatile tier; promoted by the first committed write
    Volatile,
    /// Read from the durable store
    Durable,
}

impl Tier {
    /// Whether the entry has never been committed
    pub fn is_volatile(self) -> bool {
        matches!(self, Tier::Volatile)
    }
}

/// Working copy of one entry within a transaction
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) entry: SessionEntry,
    pub(crate) tier: Tier,
}

impl Slot {
    pub(crate) fn durable(entry: SessionEntry) -> Self {
        Self {
            entry,
            tier: Tier::Durable,
        }
    }

    pub(crate) fn volatile(entry: SessionEntry) -> Self {
        Self {
            entry,
            tier: Tier::Volatile,
        }
    }

    /// Revision the store must still hold for this slot's write to apply
    fn expected_revision(&self) -> Option<u64> {
        match self.tier {
            Tier::Durable => Some(self.entry.revision),
            Tier::Volatile => None,
        }
    }
}

/// Per-container state of a transaction
pub(crate) struct Scope {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) slots: HashMap<String, Slot>,
    pub(crate) deletes: HashMap<String, u64>,
}

impl Scope {
    fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            slots: HashMap::new(),
            deletes: HashMap::new(),
        }
    }

    fn dirty_slots(&self) -> usize {
        self.slots.values().filter(|s| s.entry.is_dirty()).count()
    }

    /// Build the batch for this scope, plus the client ids it promotes
    fn into_batch(self) -> (Arc<dyn SessionStore>, WriteBatch, Vec<String>) {
        let mut batch = WriteBatch::new();
        let mut promoted = Vec::new();

        for (client_id, expected) in self.deletes {
            batch = batch.delete(client_id, expected);
        }

        for (client_id, slot) in self.slots {
            if !slot.entry.is_dirty() {
                continue;
            }
            let expected = slot.expected_revision();
            if slot.tier.is_volatile() {
                promoted.push(client_id.clone());
            }

            let mut entry = slot.entry;
            entry.namespaces.retain(|_, data| !data.is_empty());
            batch = batch.write(client_id, entry, expected);
        }

        (self.store, batch, promoted)
    }
}

/// A unit of work spanning any number of containers
pub struct Transaction<'w> {
    worker: &'w mut WorkerCache,
    scopes: HashMap<Uuid, Scope>,
}

impl<'w> Transaction<'w> {
    /// Start a transaction on a worker's volatile tier
    pub fn begin(worker: &'w mut WorkerCache) -> Self {
        Self {
            worker,
            scopes: HashMap::new(),
        }
    }

    /// The worker cache this transaction borrows
    pub fn worker(&self) -> &WorkerCache {
        self.worker
    }

    /// Entries that would be written by `commit()`
    pub fn pending_writes(&self) -> usize {
        self.scopes.values().map(Scope::dirty_slots).sum()
    }

    /// Deletions staged by sweeps
    pub fn pending_deletes(&self) -> usize {
        self.scopes.values().map(|s| s.deletes.len()).sum()
    }

    /// Whether `commit()` would touch no store
    pub fn is_clean(&self) -> bool {
        self.pending_writes() == 0 && self.pending_deletes() == 0
    }

    /// Scope for a container together with the worker tier
    pub(crate) fn parts(
        &mut self,
        container: Uuid,
        store: &Arc<dyn SessionStore>,
    ) -> (&mut Scope, &mut WorkerCache) {
        let scope = self
            .scopes
            .entry(container)
            .or_insert_with(|| Scope::new(Arc::clone(store)));
        (scope, &mut *self.worker)
    }

    /// Write every mutated entry and staged delete
    ///
    /// Backend errors, including `Conflict`, are returned unchanged and
    /// never retried. A failed batch leaves its store and the worker's
    /// volatile tier untouched.
    pub fn commit(self) -> Result<CommitSummary> {
        let Transaction { worker, scopes } = self;
        let mut total = CommitSummary::default();

        for (container, scope) in scopes {
            let (store, batch, promoted) = scope.into_batch();
            if batch.is_empty() {
                continue;
            }

            let summary = store.commit(batch)?;
            for client_id in &promoted {
                worker.remove(container, client_id);
            }

            total.written += summary.written;
            total.deleted += summary.deleted;
        }

        tracing::debug!(
            worker = %worker.id(),
            written = total.written,
            deleted = total.deleted,
            "Session transaction committed"
        );
        Ok(total)
    }

    /// Discard every change made in this transaction
    pub fn abort(self) {
        tracing::debug!(
            worker = %self.worker.id(),
            discarded_writes = self.pending_writes(),
            discarded_deletes = self.pending_deletes(),
            "Session transaction aborted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemorySessionStore;

    fn scope_with(store: &Arc<MemorySessionStore>) -> Scope {
        let store: Arc<dyn SessionStore> = store.clone();
        Scope::new(store)
    }

    #[test]
    fn test_clean_slots_are_not_written() {
        let store = Arc::new(MemorySessionStore::new());
        let mut scope = scope_with(&store);
        scope
            .slots
            .insert("a".into(), Slot::volatile(SessionEntry::new(100)));

        let (_, batch, promoted) = scope.into_batch();
        assert!(batch.is_empty());
        assert!(promoted.is_empty());
    }

    #[test]
    fn test_dirty_volatile_slot_is_promoted() {
        let store = Arc::new(MemorySessionStore::new());
        let mut scope = scope_with(&store);
        let mut entry = SessionEntry::new(100);
        entry.namespace_mut("ns").set("k", 1).unwrap();
        entry.namespace_mut("unused");
        scope.slots.insert("a".into(), Slot::volatile(entry));

        let (_, batch, promoted) = scope.into_batch();
        assert_eq!(promoted, vec!["a".to_string()]);
        assert_eq!(batch.writes.len(), 1);
        assert_eq!(batch.writes[0].expected_revision, None);
        assert!(batch.writes[0].entry.namespace("unused").is_none());
    }

    #[test]
    fn test_durable_slot_expects_read_revision() {
        let store = Arc::new(MemorySessionStore::new());
        let mut scope = scope_with(&store);
        let mut entry = SessionEntry::new(100);
        entry.revision = 7;
        entry.namespace_mut("ns").set("k", 1).unwrap();
        scope.slots.insert("a".into(), Slot::durable(entry));
        scope.deletes.insert("b".into(), 2);

        let (_, batch, promoted) = scope.into_batch();
        assert!(promoted.is_empty());
        assert_eq!(batch.writes[0].expected_revision, Some(7));
        assert_eq!(batch.deletes[0].client_id, "b");
        assert_eq!(batch.deletes[0].expected_revision, 2);
    }

    #[test]
    fn test_empty_transaction_commits_nothing() {
        let mut worker = WorkerCache::new();
        let tx = worker.begin();
        assert!(tx.is_clean());
        assert_eq!(tx.commit().unwrap(), CommitSummary::default());
    }

    #[test]
    fn test_tier_flags() {
        assert!(Tier::Volatile.is_volatile());
        assert!(!Tier::Durable.is_volatile());
    }
}
