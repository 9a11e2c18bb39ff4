//! Persistent variable store.
//!
//! Backs `__key__` variables: a key → [`Value`] map that survives restarts
//! by being written to a JSON document.  Any thread may read; writes come
//! from the logic thread, and [`PersistentStore::increment`] holds the write
//! lock for the whole read-modify-write so it never loses an update.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::error::StoreError;
use crate::script::Value;

/// Thread-safe persistent key/value store.
#[derive(Debug, Default)]
pub struct PersistentStore {
    values: RwLock<HashMap<String, Value>>,
    dirty: AtomicBool,
    path: Option<PathBuf>,
}

impl PersistentStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A store backed by `path`, loading it if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = PersistentStore { path: Some(path.into()), ..Self::default() };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.values.write().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    // ── Contract ──────────────────────────────────────────────────────────────

    /// Value for `key`, or null if absent.
    pub fn get(&self, key: &str) -> Value {
        self.read().get(key).cloned().unwrap_or_default()
    }

    /// Store `value`; storing null deletes the key.
    pub fn set(&self, key: &str, value: Value) {
        if value.is_null() {
            self.delete(key);
            return;
        }
        self.write().insert(key.to_owned(), value);
        self.touch();
    }

    /// Atomically add `amount` to the numeric value of `key` (absent counts
    /// as 0) and return the new value.
    pub fn increment(&self, key: &str, amount: f64) -> Value {
        let mut values = self.write();
        let current = values.get(key).map_or(0.0, Value::as_number);
        let next = Value::Number(current + amount);
        values.insert(key.to_owned(), next.clone());
        drop(values);
        self.touch();
        next
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    // ── Extras ────────────────────────────────────────────────────────────────

    /// Remove `key`.  Returns `true` if it existed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.write().remove(key).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    pub fn has(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Snapshot of every entry.
    pub fn get_all(&self) -> HashMap<String, Value> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Drop every entry.
    pub fn reset(&self) {
        self.write().clear();
        self.touch();
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Replace the contents with the backing file, if there is one.
    pub fn load(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else { return Ok(()) };
        if !path.exists() {
            debug!(target: "flok", "no data file at {}, starting empty", path.display());
            return Ok(());
        }
        let text = fs::read_to_string(path)
            .map_err(|source| StoreError::Io { path: path.clone(), source })?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|source| StoreError::Json { path: path.clone(), source })?;
        let mut values = self.write();
        values.clear();
        if let serde_json::Value::Object(entries) = json {
            for (k, v) in &entries {
                values.insert(k.clone(), Value::from_serializable(v));
            }
        }
        let count = values.len();
        drop(values);
        self.dirty.store(false, Ordering::Release);
        info!(target: "flok", "Loaded {count} persistent variable(s)");
        Ok(())
    }

    /// Write to the backing file if anything changed since the last save.
    pub fn save(&self) -> Result<(), StoreError> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.force_save()
    }

    /// Write to the backing file unconditionally.
    ///
    /// The dirty flag is cleared before the snapshot is taken, so a write
    /// racing the save stays dirty for the next one.
    pub fn force_save(&self) -> Result<(), StoreError> {
        self.dirty.store(false, Ordering::Release);
        let Some(path) = &self.path else { return Ok(()) };
        let mut entries: Vec<(String, Value)> = self.get_all().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let doc: serde_json::Map<String, serde_json::Value> =
            entries.into_iter().map(|(k, v)| (k, v.to_serializable())).collect();
        if let Err(e) = write_document(path, &serde_json::Value::Object(doc)) {
            self.touch();
            return Err(e);
        }
        debug!(target: "flok", "saved persistent store to {}", path.display());
        Ok(())
    }
}

/// Write `doc` to a sibling temp file, then move it over `path`.
fn write_document(path: &Path, doc: &serde_json::Value) -> Result<(), StoreError> {
    let text = serde_json::to_string_pretty(doc).map_err(|source| StoreError::Json { path: path.to_owned(), source })?;
    let io_err = |source| StoreError::Io { path: path.to_owned(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
