//! Session data container
//!
//! Maps client id -> namespace -> `SessionData` over two tiers: the
//! durable `SessionStore` and the calling worker's volatile tier. A read
//! of an unknown client id creates an entry in the volatile tier only, so
//! sessions that are merely looked at never cost a store write.
//!
//! Access times are coarse. An entry's `last_access_time` is left alone
//! until it falls more than one sweep interval behind; the read that
//! notices runs a sweep and hands back a fresh, empty entry in place of
//! the stale one.

use crate::clock::{Clock, SystemClock};
use crate::config::ContainerConfig;
use crate::data::{SessionData, SessionEntry};
use crate::error::Result;
use crate::id::short_id;
use crate::store::memory::MemorySessionStore;
use crate::store::SessionStore;
use crate::transaction::{Scope, Slot, Tier, Transaction};
use crate::worker::WorkerCache;
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::BinaryHeap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use uuid::Uuid;

/// Two-tier session data container with lazy expiry
pub struct SessionDataContainer {
    key: Uuid,
    name: String,
    config: ContainerConfig,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SessionDataContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDataContainer")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl SessionDataContainer {
    /// Create a container over a durable store
    ///
    /// A store backs exactly one container; client ids are its keys.
    pub fn new(
        name: impl Into<String>,
        config: ContainerConfig,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        Self::with_clock(name, config, store, Arc::new(SystemClock))
    }

    /// Create a container using a custom time source
    pub fn with_clock(
        name: impl Into<String>,
        config: ContainerConfig,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        tracing::debug!(
            container = %name,
            store = %store.name(),
            sweep_interval = config.sweep_interval,
            "Session data container created"
        );
        Ok(Self {
            key: Uuid::new_v4(),
            name,
            config,
            store,
            clock,
        })
    }

    /// Create a container over a fresh in-memory store
    pub fn in_memory(name: impl Into<String>, config: ContainerConfig) -> Result<Self> {
        Self::new(name, config, Arc::new(MemorySessionStore::new()))
    }

    /// Identity of this container instance (keys its volatile tier)
    pub fn id(&self) -> Uuid {
        self.key
    }

    /// Container name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expiry policy
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Seconds between access-time refreshes and sweeps
    pub fn sweep_interval(&self) -> u64 {
        self.config.sweep_interval
    }

    /// Advertised staleness bound in seconds
    ///
    /// Not consulted by `get` or `sweep`; expiry follows `sweep_interval`.
    pub fn timeout(&self) -> u64 {
        self.config.timeout
    }

    /// The durable tier
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Whether the durable tier holds an entry for `client_id`
    pub fn contains(&self, client_id: &str) -> Result<bool> {
        Ok(self.store.read(client_id)?.is_some())
    }

    /// Whether `worker` holds a volatile entry for `client_id`
    pub fn is_volatile(&self, worker: &WorkerCache, client_id: &str) -> bool {
        worker.contains(self.key, client_id)
    }

    /// Data for a (client, namespace) pair, created on demand
    ///
    /// Lookup goes durable tier, then the worker's volatile tier, then
    /// creates a new volatile entry stamped with the current time. An
    /// entry more than one sweep interval old triggers a sweep and is
    /// replaced by a new, empty volatile entry.
    ///
    /// Only backend failures are errors; a missing client id or namespace
    /// never is.
    pub fn get<'t>(
        &self,
        tx: &'t mut Transaction<'_>,
        client_id: &str,
        namespace: &str,
    ) -> Result<SessionHandle<'t>> {
        let now = self.clock.now();
        let interval = self.config.sweep_interval;
        let (scope, worker) = tx.parts(self.key, &self.store);

        let slot = match scope.slots.remove(client_id) {
            Some(slot) => slot,
            None => self.load(scope, worker, client_id, now)?,
        };

        let slot = if slot.entry.is_stale(now, interval) {
            if slot.tier == Tier::Durable {
                scope
                    .deletes
                    .entry(client_id.to_string())
                    .or_insert(slot.entry.revision);
            }
            self.sweep_scope(scope, worker, now)?;

            let fresh = SessionEntry::new(now);
            worker.insert(self.key, client_id, fresh.clone());
            tracing::debug!(
                container = %self.name,
                client = %short_id(client_id),
                stale_since = slot.entry.last_access_time,
                "Replaced stale session entry"
            );
            Slot::volatile(fresh)
        } else {
            slot
        };

        let slot = match scope.slots.entry(client_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(slot);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(slot),
        };

        Ok(SessionHandle {
            tier: slot.tier,
            last_access_time: slot.entry.last_access_time,
            data: slot.entry.namespace_mut(namespace),
        })
    }

    /// Delete every durable entry last accessed before `now - sweep_interval`
    ///
    /// Deletions are staged in `tx` and applied by its commit. Stale
    /// entries are also dropped from the transaction's working set and
    /// from the worker's volatile tier. Returns the number of durable
    /// entries staged for deletion.
    pub fn sweep(&self, tx: &mut Transaction<'_>) -> Result<usize> {
        let now = self.clock.now();
        let (scope, worker) = tx.parts(self.key, &self.store);
        self.sweep_scope(scope, worker, now)
    }

    fn load(
        &self,
        scope: &Scope,
        worker: &mut WorkerCache,
        client_id: &str,
        now: i64,
    ) -> Result<Slot> {
        if !scope.deletes.contains_key(client_id) {
            if let Some(entry) = scope.store.read(client_id)? {
                return Ok(Slot::durable(entry));
            }
        }

        if let Some(entry) = worker.get(self.key, client_id) {
            return Ok(Slot::volatile(entry.clone()));
        }

        let pruned = worker.prune_if_due(self.key, now, self.config.sweep_interval);
        let entry = SessionEntry::new(now);
        worker.insert(self.key, client_id, entry.clone());
        tracing::debug!(
            container = %self.name,
            client = %short_id(client_id),
            pruned,
            "Created volatile session entry"
        );
        Ok(Slot::volatile(entry))
    }

    fn sweep_scope(&self, scope: &mut Scope, worker: &mut WorkerCache, now: i64) -> Result<usize> {
        let interval = self.config.sweep_interval;
        let cutoff = now.saturating_sub_unsigned(interval);

        let mut heap: BinaryHeap<Reverse<(i64, String, u64)>> = scope
            .store
            .access_times()?
            .into_iter()
            .filter(|record| !scope.deletes.contains_key(&record.client_id))
            .map(|record| Reverse((record.last_access_time, record.client_id, record.revision)))
            .collect();

        let mut removed = 0;
        while let Some(Reverse((last_access_time, client_id, stored_revision))) = heap.pop() {
            if last_access_time >= cutoff {
                break;
            }

            let mut revision = stored_revision;
            if let Entry::Occupied(slot) = scope.slots.entry(client_id.clone()) {
                if slot.get().tier == Tier::Durable {
                    revision = slot.remove().entry.revision;
                }
            }
            scope.deletes.insert(client_id, revision);
            removed += 1;
        }

        let pruned = worker.prune(self.key, now, interval);
        tracing::debug!(
            container = %self.name,
            removed,
            pruned,
            cutoff,
            "Session sweep completed"
        );
        Ok(removed)
    }
}

/// Session data vended by a container for one transaction
///
/// Derefs to the namespace's `SessionData`. A handle whose tier is
/// `Volatile` is ephemeral: its writes reach the store only when the
/// transaction commits, which promotes the entry.
#[derive(Debug)]
pub struct SessionHandle<'t> {
    data: &'t mut SessionData,
    tier: Tier,
    last_access_time: i64,
}

impl<'t> SessionHandle<'t> {
    /// Tier the entry was found in (or created in)
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Whether the entry has not been committed yet
    pub fn is_ephemeral(&self) -> bool {
        self.tier.is_volatile()
    }

    /// Coarse last access time of the owning entry
    pub fn last_access_time(&self) -> i64 {
        self.last_access_time
    }

    /// Unwrap into the data reference
    pub fn into_data(self) -> &'t mut SessionData {
        self.data
    }
}

impl Deref for SessionHandle<'_> {
    type Target = SessionData;

    fn deref(&self) -> &SessionData {
        self.data
    }
}

impl DerefMut for SessionHandle<'_> {
    fn deref_mut(&mut self) -> &mut SessionData {
        self.data
    }
}
