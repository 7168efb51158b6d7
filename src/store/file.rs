//! JSON file session store
//!
//! Keeps the working copy in memory and rewrites the whole file on every
//! commit. Writes go to a temp file that is renamed over the original, so
//! a crash mid-write never leaves a truncated store behind.
//!
//! The document holds the entries and the store's revision counter
//! (`nextRevision`), so revisions stay unique across restarts.

use super::{AccessRecord, CommitSummary, EntryTable, SessionStore, WriteBatch};
use crate::data::SessionEntry;
use crate::error::{Result, SessionError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable tier persisted as a single JSON document
pub struct FileSessionStore {
    path: PathBuf,
    table: Mutex<EntryTable>,
}

impl FileSessionStore {
    /// Open a store, loading existing entries if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = load_table(&path)?;
        tracing::debug!(
            path = %path.display(),
            count = table.entries.len(),
            next_revision = table.next_revision,
            "Session store loaded"
        );
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_table(path: &Path) -> Result<EntryTable> {
    if !path.exists() {
        return Ok(EntryTable::default());
    }

    let json = std::fs::read_to_string(path).map_err(|e| {
        SessionError::Storage(format!(
            "Failed to read session store {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut table: EntryTable = serde_json::from_str(&json).map_err(|e| {
        SessionError::Storage(format!(
            "Failed to parse session store {}: {}",
            path.display(),
            e
        ))
    })?;
    table.reconcile();
    Ok(table)
}

/// Write `contents` to `path` via a temp file and rename
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SessionError::Storage(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    std::fs::write(&tmp_path, contents).map_err(|e| {
        SessionError::Storage(format!(
            "Failed to write {}: {}",
            tmp_path.display(),
            e
        ))
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        SessionError::Storage(format!(
            "Failed to rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })
}

fn poisoned(e: impl std::fmt::Display) -> SessionError {
    SessionError::Storage(format!("Session store lock poisoned: {}", e))
}

impl SessionStore for FileSessionStore {
    fn read(&self, client_id: &str) -> Result<Option<SessionEntry>> {
        let table = self.table.lock().map_err(poisoned)?;
        Ok(table.entries.get(client_id).cloned())
    }

    fn iterate(&self) -> Result<Vec<(String, SessionEntry)>> {
        let table = self.table.lock().map_err(poisoned)?;
        Ok(table
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn access_times(&self) -> Result<Vec<AccessRecord>> {
        let table = self.table.lock().map_err(poisoned)?;
        Ok(table.access_times())
    }

    fn commit(&self, batch: WriteBatch) -> Result<CommitSummary> {
        if batch.is_empty() {
            return Ok(CommitSummary::default());
        }

        let mut table = self.table.lock().map_err(poisoned)?;
        let mut next = table.clone();
        let summary = next.apply(batch)?;

        let json = serde_json::to_vec(&next)?;
        write_atomic(&self.path, &json)?;
        *table = next;

        tracing::debug!(
            path = %self.path.display(),
            written = summary.written,
            deleted = summary.deleted,
            "Session store saved"
        );
        Ok(summary)
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SessionMap;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("a3s-session-test-{}", uuid::Uuid::new_v4()))
    }

    fn entry_with(value: &str) -> SessionEntry {
        let mut entry = SessionEntry::new(100);
        entry.namespace_mut("products.foo").set("color", value).unwrap();
        entry
    }

    #[test]
    fn test_open_nonexistent_is_empty() {
        let store = FileSessionStore::open("/tmp/nonexistent-a3s-session.json").unwrap();
        assert!(store.iterate().unwrap().is_empty());
    }

    #[test]
    fn test_commit_survives_reopen() {
        let dir = temp_dir();
        let path = dir.join("sessions.json");

        let store = FileSessionStore::open(&path).unwrap();
        store
            .commit(WriteBatch::new().write("client", entry_with("red"), None))
            .unwrap();
        assert!(path.exists());
        drop(store);

        let reopened = FileSessionStore::open(&path).unwrap();
        let entry = reopened.read("client").unwrap().unwrap();
        assert_eq!(entry.revision, 1);
        assert_eq!(
            entry.namespace("products.foo").unwrap().get("color").unwrap(),
            "red"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = temp_dir();
        let path = dir.join("nested/deep/sessions.json");

        let store = FileSessionStore::open(&path).unwrap();
        store
            .commit(WriteBatch::new().write("client", entry_with("red"), None))
            .unwrap();
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp() {
        let dir = temp_dir();
        let path = dir.join("sessions.json");
        let store = FileSessionStore::open(&path).unwrap();

        store
            .commit(WriteBatch::new().write("a", entry_with("red"), None))
            .unwrap();
        store
            .commit(WriteBatch::new().write("a", entry_with("blue"), Some(1)))
            .unwrap();

        assert!(!path.with_extension("tmp").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_conflict_does_not_touch_file() {
        let dir = temp_dir();
        let path = dir.join("sessions.json");
        let store = FileSessionStore::open(&path).unwrap();
        store
            .commit(WriteBatch::new().write("a", entry_with("red"), None))
            .unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let result = store.commit(WriteBatch::new().write("a", entry_with("blue"), None));
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_revision_counter_survives_reopen() {
        let dir = temp_dir();
        let path = dir.join("sessions.json");

        let store = FileSessionStore::open(&path).unwrap();
        store
            .commit(WriteBatch::new().write("a", entry_with("red"), None))
            .unwrap();
        store.commit(WriteBatch::new().delete("a", 1)).unwrap();
        drop(store);

        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["nextRevision"], 2);

        let reopened = FileSessionStore::open(&path).unwrap();
        reopened
            .commit(WriteBatch::new().write("a", entry_with("blue"), None))
            .unwrap();
        assert_eq!(reopened.read("a").unwrap().unwrap().revision, 2);

        let stale = reopened.commit(WriteBatch::new().write("a", entry_with("red"), Some(1)));
        assert!(stale.unwrap_err().is_conflict());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sessions.json");
        std::fs::write(&path, "{broken").unwrap();

        assert!(matches!(
            FileSessionStore::open(&path),
            Err(SessionError::Storage(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
