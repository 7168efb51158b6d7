//! Session data: flat key/value maps and the per-client entry holding them
//!
//! A `SessionEntry` is what the durable tier stores for one client id. It
//! carries the coarse last-access time used by the sweep and one
//! `SessionData` map per namespace, so unrelated features never share keys.

use crate::error::{Result, SessionError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Associative-container operations shared by session mappings
///
/// Absent keys are a `NotFound` error for `get` and `remove`, mirroring
/// indexing semantics; `find`, `take` and `get_or` are the non-failing forms.
pub trait SessionMap {
    /// Look up a key
    fn find(&self, key: &str) -> Option<&Value>;

    /// Store a value, returning the previous one
    fn insert(&mut self, key: String, value: Value) -> Option<Value>;

    /// Remove a key, returning its value if present
    fn take(&mut self, key: &str) -> Option<Value>;

    /// Number of keys
    fn len(&self) -> usize;

    /// Iterate over key/value pairs in key order
    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &Value)> + '_>;

    /// Remove every key
    fn clear(&mut self);

    /// Look up a key that must exist
    fn get(&self, key: &str) -> Result<&Value> {
        self.find(key)
            .ok_or_else(|| SessionError::NotFound(key.to_string()))
    }

    /// Look up a key, falling back to `default`
    fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.find(key).unwrap_or(default)
    }

    /// Remove a key that must exist
    fn remove(&mut self, key: &str) -> Result<Value> {
        self.take(key)
            .ok_or_else(|| SessionError::NotFound(key.to_string()))
    }

    /// Whether the key is present
    fn contains_key(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Whether the map is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in order
    fn keys(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.iter().map(|(k, _)| k))
    }

    /// Values in key order
    fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        Box::new(self.iter().map(|(_, v)| v))
    }
}

/// Key/value data scoped to one (client, namespace) pair
///
/// Values are arbitrary JSON so any backend can persist them. Every
/// mutation marks the map dirty; a transaction writes an entry to the
/// durable tier only when one of its maps is dirty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData {
    values: BTreeMap<String, Value>,

    #[serde(skip)]
    dirty: bool,
}

impl PartialEq for SessionData {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl SessionData {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and store a value
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.insert(key.into(), value))
    }

    /// Look up and deserialize a value
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get(key)?;
        T::deserialize(value).map_err(Into::into)
    }

    /// Whether the map changed since it was loaded or last committed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl SessionMap for SessionData {
    fn find(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.dirty = true;
        self.values.insert(key, value)
    }

    fn take(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &Value)> + '_> {
        Box::new(self.values.iter().map(|(k, v)| (k.as_str(), v)))
    }

    fn clear(&mut self) {
        if !self.values.is_empty() {
            self.dirty = true;
        }
        self.values.clear();
    }
}

impl<'a> IntoIterator for &'a SessionData {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Everything stored for one client id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    /// Unix seconds of the last coarse access-time refresh
    pub last_access_time: i64,

    /// Backend-assigned revision; 0 for entries never committed
    #[serde(default)]
    pub revision: u64,

    /// Namespace -> data
    #[serde(default)]
    pub namespaces: BTreeMap<String, SessionData>,
}

impl SessionEntry {
    /// Create an empty entry stamped with `now`
    pub fn new(now: i64) -> Self {
        Self {
            last_access_time: now,
            revision: 0,
            namespaces: BTreeMap::new(),
        }
    }

    /// Data for a namespace, if any was created
    pub fn namespace(&self, namespace: &str) -> Option<&SessionData> {
        self.namespaces.get(namespace)
    }

    /// Data for a namespace, created empty on demand
    pub fn namespace_mut(&mut self, namespace: &str) -> &mut SessionData {
        self.namespaces.entry(namespace.to_string()).or_default()
    }

    /// Whether any namespace changed
    pub fn is_dirty(&self) -> bool {
        self.namespaces.values().any(SessionData::is_dirty)
    }

    /// Whether the entry is older than `interval` seconds at `now`
    pub fn is_stale(&self, now: i64, interval: u64) -> bool {
        self.last_access_time.saturating_add_unsigned(interval) < now
    }

    pub(crate) fn mark_clean(&mut self) {
        for data in self.namespaces.values_mut() {
            data.mark_clean();
        }
    }
}
