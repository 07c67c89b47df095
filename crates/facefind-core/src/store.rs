//! Record Store
//!
//! Durable `id → record` map persisted as a single JSON file.
//! Storage: `{"records": {"<id>": <record>, ...}}`
//!
//! Every mutation runs under the store mutex: mutate a copy, write the file,
//! swap the copy in. The in-memory map only changes once the write succeeded.
//! Writes also hold an exclusive advisory lock on `<file>.lock` so other
//! processes sharing the data directory cannot interleave.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fs::{atomic_write_bytes, sibling_path};
use crate::{CoreError, CoreResult};

/// A value that can live in a [`RecordStore`]
pub trait Record: Clone + Serialize + DeserializeOwned + Send + 'static {
    fn id(&self) -> &str;

    /// Read-side bookkeeping applied by [`RecordStore::get`].
    ///
    /// Returns `true` when the record changed and has to be persisted.
    fn record_access(&mut self, _at: DateTime<Utc>) -> bool {
        false
    }
}

#[derive(Serialize)]
#[serde(bound = "T: Serialize")]
struct RecordFileRef<'a, T> {
    records: &'a HashMap<String, T>,
}

#[derive(Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct RecordFile<T> {
    #[serde(default)]
    records: HashMap<String, T>,
}

/// File-backed record map with a single-writer discipline
pub struct RecordStore<T: Record> {
    path: PathBuf,
    records: Mutex<HashMap<String, T>>,
}

impl<T: Record> RecordStore<T> {
    /// Opens the store at `path`, creating the file if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let store = Self {
            path: path.into(),
            records: Mutex::new(HashMap::new()),
        };
        store.load()?;
        Ok(store)
    }

    /// Returns the backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reloads the map from disk.
    ///
    /// A missing file initializes an empty store and persists it right away.
    /// A zero-length file is treated as empty.
    pub fn load(&self) -> CoreResult<()> {
        let mut guard = self.lock()?;
        self.ensure_parent()?;

        let loaded = self.with_file_lock(false, || {
            if !self.path.exists() {
                return Ok(None);
            }

            let content = fs::read_to_string(&self.path).map_err(|e| {
                CoreError::Storage(format!(
                    "Failed to read record file {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

            if content.trim().is_empty() {
                return Ok(Some(HashMap::new()));
            }

            let file: RecordFile<T> = serde_json::from_str(&content).map_err(|e| {
                CoreError::Storage(format!(
                    "Failed to parse record file {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
            Ok(Some(file.records))
        })?;

        match loaded {
            Some(records) => {
                debug!(
                    "Loaded {} records from {}",
                    records.len(),
                    self.path.display()
                );
                *guard = records;
            }
            None => {
                info!("Record file {} not found, creating", self.path.display());
                let empty = HashMap::new();
                self.persist(&empty)?;
                *guard = empty;
            }
        }
        Ok(())
    }

    /// Rewrites the whole file from the current map
    pub fn save(&self) -> CoreResult<()> {
        let guard = self.lock()?;
        self.persist(&guard)
    }

    /// Inserts or replaces a record by id
    pub fn upsert(&self, record: T) -> CoreResult<()> {
        self.commit(|records| {
            records.insert(record.id().to_string(), record);
            Ok(())
        })
    }

    /// Replaces an existing record
    pub fn update(&self, record: T) -> CoreResult<()> {
        self.commit(|records| {
            if !records.contains_key(record.id()) {
                return Err(CoreError::RecordNotFound(record.id().to_string()));
            }
            records.insert(record.id().to_string(), record);
            Ok(())
        })
    }

    /// Applies `op` to the record with `id` and persists the result.
    ///
    /// `op` runs under the store lock, so a check-then-mutate inside it cannot
    /// race with other writers. If `op` fails nothing is written.
    pub fn modify(&self, id: &str, op: impl FnOnce(&mut T) -> CoreResult<()>) -> CoreResult<T> {
        self.commit(|records| {
            let record = records
                .get_mut(id)
                .ok_or_else(|| CoreError::RecordNotFound(id.to_string()))?;
            op(record)?;
            Ok(record.clone())
        })
    }

    /// Looks up a record, applying its read-side bookkeeping.
    ///
    /// When the bookkeeping write fails the change is rolled back, logged, and
    /// the record is returned as it was before the read.
    pub fn get(&self, id: &str) -> CoreResult<Option<T>> {
        let mut guard = self.lock()?;
        let Some(current) = guard.get(id).cloned() else {
            return Ok(None);
        };

        let mut touched = current.clone();
        if !touched.record_access(Utc::now()) {
            return Ok(Some(current));
        }

        guard.insert(id.to_string(), touched.clone());
        if let Err(e) = self.persist(&guard) {
            warn!("Failed to persist access stats for {}: {}", id, e);
            guard.insert(id.to_string(), current.clone());
            return Ok(Some(current));
        }
        Ok(Some(touched))
    }

    /// Looks up a record without side effects
    pub fn peek(&self, id: &str) -> CoreResult<Option<T>> {
        Ok(self.lock()?.get(id).cloned())
    }

    /// Returns every record, in no particular order
    pub fn list_all(&self) -> CoreResult<Vec<T>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    /// Returns the records matching `predicate`, in no particular order
    pub fn list_where(&self, predicate: impl Fn(&T) -> bool) -> CoreResult<Vec<T>> {
        Ok(self
            .lock()?
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect())
    }

    /// Removes every record matching `predicate`.
    ///
    /// Persists once, and only when something was removed.
    pub fn remove_where(&self, predicate: impl Fn(&T) -> bool) -> CoreResult<usize> {
        let mut guard = self.lock()?;
        let doomed: Vec<String> = guard
            .iter()
            .filter(|(_, r)| predicate(r))
            .map(|(id, _)| id.clone())
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        let mut next = guard.clone();
        for id in &doomed {
            next.remove(id);
        }
        self.persist(&next)?;
        *guard = next;
        Ok(doomed.len())
    }

    /// Drops every record and persists the empty map
    pub fn clear(&self) -> CoreResult<usize> {
        self.take_all().map(|records| records.len())
    }

    /// Empties the store under one lock and returns what it held.
    ///
    /// On a failed write the store keeps its records and nothing is returned.
    pub fn take_all(&self) -> CoreResult<Vec<T>> {
        let mut guard = self.lock()?;
        let empty = HashMap::new();
        self.persist(&empty)?;
        let taken = std::mem::replace(&mut *guard, empty);
        Ok(taken.into_values().collect())
    }

    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// Leaves the store mutex poisoned, as after a panicking writer
    #[cfg(test)]
    pub(crate) fn poison_lock(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.records.lock();
            panic!("writer panicked while holding the store lock");
        }));
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lock(&self) -> CoreResult<MutexGuard<'_, HashMap<String, T>>> {
        self.records.lock().map_err(|_| {
            CoreError::Storage(format!(
                "Record store lock poisoned: {}",
                self.path.display()
            ))
        })
    }

    /// Mutates a copy of the map, writes it, then swaps it in.
    fn commit<R>(
        &self,
        op: impl FnOnce(&mut HashMap<String, T>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let out = op(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    fn persist(&self, records: &HashMap<String, T>) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(&RecordFileRef { records }).map_err(|e| {
            CoreError::Storage(format!("Failed to serialize records: {}", e))
        })?;

        self.with_file_lock(true, || {
            atomic_write_bytes(&self.path, &bytes).map_err(|e| {
                CoreError::Storage(format!(
                    "Failed to write record file {}: {}",
                    self.path.display(),
                    e
                ))
            })
        })
    }

    fn ensure_parent(&self) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CoreError::Storage(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }

    fn with_file_lock<R>(
        &self,
        exclusive: bool,
        op: impl FnOnce() -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.ensure_parent()?;

        let lock_path = sibling_path(&self.path, "lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                CoreError::Storage(format!(
                    "Failed to open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        let locked = if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
        } else {
            fs2::FileExt::lock_shared(&lock_file)
        };
        locked.map_err(|e| {
            CoreError::Storage(format!(
                "Failed to lock {}: {}",
                lock_path.display(),
                e
            ))
        })?;

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock {}: {}", lock_path.display(), e);
        }

        result
    }
}

// =============================================================================
// Tests
// =============================================================================
