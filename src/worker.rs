//! Per-worker volatile tier
//!
//! Entries created by a read live here until their first committed
//! mutation promotes them into the durable store. Each worker (thread,
//! task executor, request loop) owns its own `WorkerCache` and lends it to
//! one `Transaction` at a time, so the tier never needs a lock.
//!
//! The tier is never authoritative. Dropping it only loses entries that
//! nobody wrote to; they are recreated empty on the next access.
//!
//! Stale entries are pruned by sweeps and, at most once per sweep
//! interval, whenever a read creates a new entry. A worker serving only
//! cookieless traffic never sees a stale read, so creation is the point
//! where its tier gets bounded.

use crate::data::SessionEntry;
use crate::transaction::Transaction;
use std::collections::HashMap;
use uuid::Uuid;

/// Volatile entries owned by one worker, partitioned by container
#[derive(Debug)]
pub struct WorkerCache {
    id: Uuid,
    tiers: HashMap<Uuid, HashMap<String, SessionEntry>>,
    pruned_at: HashMap<Uuid, i64>,
}

impl Default for WorkerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            tiers: HashMap::new(),
            pruned_at: HashMap::new(),
        }
    }

    /// Identity of this worker, used in log fields
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start a unit of work borrowing this cache
    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction::begin(self)
    }

    /// Total volatile entries across all containers
    pub fn len(&self) -> usize {
        self.tiers.values().map(HashMap::len).sum()
    }

    /// Whether no volatile entries are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a volatile entry exists for `client_id` in a container
    pub fn contains(&self, container: Uuid, client_id: &str) -> bool {
        self.tiers
            .get(&container)
            .is_some_and(|tier| tier.contains_key(client_id))
    }

    /// Drop every volatile entry
    pub fn clear(&mut self) {
        self.tiers.clear();
        self.pruned_at.clear();
    }

    pub(crate) fn get(&self, container: Uuid, client_id: &str) -> Option<&SessionEntry> {
        self.tiers.get(&container)?.get(client_id)
    }

    pub(crate) fn insert(&mut self, container: Uuid, client_id: &str, entry: SessionEntry) {
        self.tiers
            .entry(container)
            .or_default()
            .insert(client_id.to_string(), entry);
    }

    pub(crate) fn remove(&mut self, container: Uuid, client_id: &str) -> Option<SessionEntry> {
        let tier = self.tiers.get_mut(&container)?;
        let removed = tier.remove(client_id);
        if tier.is_empty() {
            self.tiers.remove(&container);
        }
        removed
    }

    /// Drop entries of one container that are stale at `now`
    pub(crate) fn prune(&mut self, container: Uuid, now: i64, interval: u64) -> usize {
        self.pruned_at.insert(container, now);
        let Some(tier) = self.tiers.get_mut(&container) else {
            return 0;
        };
        let before = tier.len();
        tier.retain(|_, entry| !entry.is_stale(now, interval));
        let pruned = before - tier.len();
        if tier.is_empty() {
            self.tiers.remove(&container);
        }
        pruned
    }

    /// Prune one container unless it was pruned less than `interval` ago
    pub(crate) fn prune_if_due(&mut self, container: Uuid, now: i64, interval: u64) -> usize {
        let due = self
            .pruned_at
            .get(&container)
            .map_or(true, |last| last.saturating_add_unsigned(interval) <= now);
        if !due {
            return 0;
        }
        self.prune(container, now, interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut worker = WorkerCache::new();
        let container = Uuid::new_v4();
        assert!(worker.is_empty());

        worker.insert(container, "a", SessionEntry::new(100));
        assert!(worker.contains(container, "a"));
        assert_eq!(worker.get(container, "a").unwrap().last_access_time, 100);
        assert_eq!(worker.len(), 1);

        assert!(worker.remove(container, "a").is_some());
        assert!(worker.remove(container, "a").is_none());
        assert!(worker.is_empty());
    }

    #[test]
    fn test_containers_are_partitioned() {
        let mut worker = WorkerCache::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        worker.insert(first, "a", SessionEntry::new(100));
        assert!(!worker.contains(second, "a"));
        assert!(worker.get(second, "a").is_none());
    }

    #[test]
    fn test_prune_drops_only_stale() {
        let mut worker = WorkerCache::new();
        let container = Uuid::new_v4();
        worker.insert(container, "old", SessionEntry::new(0));
        worker.insert(container, "new", SessionEntry::new(950));

        assert_eq!(worker.prune(container, 1_000, 60), 1);
        assert!(!worker.contains(container, "old"));
        assert!(worker.contains(container, "new"));
        assert_eq!(worker.prune(Uuid::new_v4(), 1_000, 60), 0);
    }

    #[test]
    fn test_prune_if_due_is_throttled() {
        let mut worker = WorkerCache::new();
        let container = Uuid::new_v4();
        assert_eq!(worker.prune_if_due(container, 1_000, 60), 0);

        worker.insert(container, "old", SessionEntry::new(900));
        assert_eq!(worker.prune_if_due(container, 1_030, 60), 0);
        assert!(worker.contains(container, "old"));

        assert_eq!(worker.prune_if_due(container, 1_060, 60), 1);
        assert!(worker.is_empty());
    }

    #[test]
    fn test_workers_have_distinct_ids() {
        assert_ne!(WorkerCache::new().id(), WorkerCache::new().id());
    }
}
