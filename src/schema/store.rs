//! Schema Status Store
//!
//! The versioned record of every index definition and of each constituent key's status.
//! Writes use optimistic concurrency: the caller quotes the version it read, and the write
//! fails with `Conflict` if the record moved on in the meantime.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use super::types::{ConstituentKey, IndexDefinition, IndexRef, IndexStatus, VersionedStatus};
use crate::error::{LifecycleError, Result};

pub trait SchemaStatusStore: Send + Sync {
    /// Stores a new definition with every key at INSTALLED.
    fn define(&self, definition: IndexDefinition) -> Result<()>;

    fn definition(&self, index: &IndexRef) -> Option<IndexDefinition>;

    fn definitions(&self) -> Vec<IndexDefinition>;

    fn get(&self, index: &IndexRef, key: &ConstituentKey) -> Result<VersionedStatus>;

    /// Writes `status` if the stored version still equals `expected_version`.
    fn set(
        &self,
        index: &IndexRef,
        key: &ConstituentKey,
        expected_version: u64,
        status: IndexStatus,
    ) -> Result<VersionedStatus>;

    /// Every key of the index with its current status, in definition order.
    fn statuses(&self, index: &IndexRef) -> Result<Vec<(ConstituentKey, VersionedStatus)>> {
        let definition = self
            .definition(index)
            .ok_or_else(|| LifecycleError::UnknownIndex(index.clone()))?;

        definition
            .keys
            .iter()
            .map(|key| Ok((key.clone(), self.get(index, key)?)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRecord {
    pub index: IndexRef,
    pub key: ConstituentKey,
    pub status: IndexStatus,
    pub version: u64,
}

/// Serializable image of a whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreSnapshot {
    pub definitions: Vec<IndexDefinition>,
    pub records: Vec<StatusRecord>,
}

#[derive(Default)]
pub struct InMemorySchemaStore {
    definitions: DashMap<IndexRef, IndexDefinition>,
    records: DashMap<(IndexRef, ConstituentKey), VersionedStatus>,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        store.load(snapshot);
        store
    }

    /// Drops the current contents in favour of `snapshot`.
    pub fn replace(&self, snapshot: StoreSnapshot) {
        self.definitions.clear();
        self.records.clear();
        self.load(snapshot);
    }

    fn load(&self, snapshot: StoreSnapshot) {
        for definition in snapshot.definitions {
            self.definitions.insert(definition.index.clone(), definition);
        }
        for record in snapshot.records {
            self.records.insert(
                (record.index, record.key),
                VersionedStatus {
                    status: record.status,
                    version: record.version,
                },
            );
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let mut definitions: Vec<IndexDefinition> = self
            .definitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        definitions.sort_by(|a, b| a.index.cmp(&b.index));

        let mut records: Vec<StatusRecord> = self
            .records
            .iter()
            .map(|entry| StatusRecord {
                index: entry.key().0.clone(),
                key: entry.key().1.clone(),
                status: entry.value().status,
                version: entry.value().version,
            })
            .collect();
        records.sort_by(|a, b| (&a.index, &a.key).cmp(&(&b.index, &b.key)));

        StoreSnapshot {
            definitions,
            records,
        }
    }

    fn undefine(&self, index: &IndexRef) {
        if let Some((_, definition)) = self.definitions.remove(index) {
            for key in definition.keys {
                self.records.remove(&(index.clone(), key));
            }
        }
    }

    fn restore_record(&self, index: &IndexRef, key: &ConstituentKey, previous: VersionedStatus) {
        self.records.insert((index.clone(), key.clone()), previous);
    }
}

impl SchemaStatusStore for InMemorySchemaStore {
    fn define(&self, definition: IndexDefinition) -> Result<()> {
        if definition.keys.is_empty() {
            return Err(LifecycleError::InvalidDefinition {
                index: definition.index.clone(),
                reason: "an index needs at least one constituent key".to_string(),
            });
        }

        match self.definitions.entry(definition.index.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(LifecycleError::IndexExists(definition.index))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                for key in &definition.keys {
                    self.records.insert(
                        (definition.index.clone(), key.clone()),
                        VersionedStatus {
                            status: IndexStatus::Installed,
                            version: 1,
                        },
                    );
                }
                slot.insert(definition);
                Ok(())
            }
        }
    }

    fn definition(&self, index: &IndexRef) -> Option<IndexDefinition> {
        self.definitions.get(index).map(|entry| entry.value().clone())
    }

    fn definitions(&self) -> Vec<IndexDefinition> {
        self.definitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn get(&self, index: &IndexRef, key: &ConstituentKey) -> Result<VersionedStatus> {
        if !self.definitions.contains_key(index) {
            return Err(LifecycleError::UnknownIndex(index.clone()));
        }
        self.records
            .get(&(index.clone(), key.clone()))
            .map(|entry| *entry.value())
            .ok_or_else(|| LifecycleError::UnknownKey {
                index: index.clone(),
                key: key.clone(),
            })
    }

    fn set(
        &self,
        index: &IndexRef,
        key: &ConstituentKey,
        expected_version: u64,
        status: IndexStatus,
    ) -> Result<VersionedStatus> {
        let mut record = self
            .records
            .get_mut(&(index.clone(), key.clone()))
            .ok_or_else(|| LifecycleError::UnknownKey {
                index: index.clone(),
                key: key.clone(),
            })?;

        if record.version != expected_version {
            return Err(LifecycleError::Conflict {
                index: index.clone(),
                key: key.clone(),
                expected: expected_version,
                found: record.version,
                status: record.status,
            });
        }

        if record.status == IndexStatus::Removed && status != IndexStatus::Removed {
            return Err(LifecycleError::StatusRegression {
                index: index.clone(),
                key: key.clone(),
                current: record.status,
                requested: status,
            });
        }

        record.status = status;
        record.version += 1;

        tracing::debug!(
            "Status of {} key {} set to {} (version {})",
            index,
            key,
            status,
            record.version
        );

        Ok(*record)
    }
}

/// Status store persisted as a JSON snapshot file.
///
/// Several handles, in one process or in many, may open the same file. Writes take an
/// exclusive lock on a sibling `.lock` file, re-read the snapshot under it, check the
/// quoted version against what is on disk and then rewrite the snapshot (temp file +
/// rename). Reads pick up another handle's writes as soon as the file changes.
///
/// If persisting fails the in-memory change is undone, so a write is either fully visible
/// or not at all.
pub struct FileSchemaStore {
    inner: InMemorySchemaStore,
    path: PathBuf,
    lock_path: PathBuf,
    /// Stamp of the snapshot `inner` was last loaded from or written to.
    loaded: Mutex<Option<FileStamp>>,
}

/// Identifies one version of the snapshot file. Every write renames a fresh file into
/// place, so the inode changes even when size and mtime happen to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    #[cfg(unix)]
    inode: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
            #[cfg(unix)]
            inode: std::os::unix::fs::MetadataExt::ino(&meta),
        })
    }
}

impl FileSchemaStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            inner: InMemorySchemaStore::new(),
            lock_path: path.with_extension("lock"),
            path,
            loaded: Mutex::new(None),
        };

        {
            let mut loaded = store.guard()?;
            store.refresh(&mut loaded)?;
        }
        tracing::info!(
            "Loaded {} index definitions from {}",
            store.inner.definitions.len(),
            store.path.display()
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, Option<FileStamp>>> {
        self.loaded
            .lock()
            .map_err(|_| LifecycleError::Store("store lock poisoned".to_string()))
    }

    /// Reloads `inner` if the snapshot on disk is not the one it was loaded from.
    fn refresh(&self, loaded: &mut Option<FileStamp>) -> Result<()> {
        let current = FileStamp::of(&self.path);
        if current.is_some() && current == *loaded {
            return Ok(());
        }

        let snapshot = match std::fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| LifecycleError::Store(format!("parse {}: {}", self.path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => {
                return Err(LifecycleError::Store(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if loaded.is_some() {
            tracing::debug!("Snapshot {} changed on disk, reloading", self.path.display());
        }
        self.inner.replace(snapshot);
        *loaded = current;
        Ok(())
    }

    /// Takes the cross-handle write lock and brings `inner` up to date under it.
    /// The lock is released when the returned file is dropped.
    fn lock_for_write(&self, loaded: &mut Option<FileStamp>) -> Result<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| {
                LifecycleError::Store(format!("open {}: {}", self.lock_path.display(), e))
            })?;
        lock_file.lock_exclusive().map_err(|e| {
            LifecycleError::Store(format!("lock {}: {}", self.lock_path.display(), e))
        })?;

        // Another handle may have written since our last read
        self.refresh(loaded)?;
        Ok(lock_file)
    }

    fn persist(&self, loaded: &mut Option<FileStamp>) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(&self.inner.snapshot())
            .map_err(|e| LifecycleError::Store(format!("encode snapshot: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, encoded)
            .map_err(|e| LifecycleError::Store(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| LifecycleError::Store(format!("rename {}: {}", tmp.display(), e)))?;

        *loaded = FileStamp::of(&self.path);
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&InMemorySchemaStore) -> T) -> Result<T> {
        let mut loaded = self.guard()?;
        self.refresh(&mut loaded)?;
        Ok(f(&self.inner))
    }
}

impl SchemaStatusStore for FileSchemaStore {
    fn define(&self, definition: IndexDefinition) -> Result<()> {
        let mut loaded = self.guard()?;
        let _lock = self.lock_for_write(&mut loaded)?;

        let index = definition.index.clone();
        self.inner.define(definition)?;

        if let Err(e) = self.persist(&mut loaded) {
            self.inner.undefine(&index);
            return Err(e);
        }
        Ok(())
    }

    fn definition(&self, index: &IndexRef) -> Option<IndexDefinition> {
        match self.read(|inner| inner.definition(index)) {
            Ok(definition) => definition,
            Err(e) => {
                tracing::warn!("Serving cached definition of {}: {}", index, e);
                self.inner.definition(index)
            }
        }
    }

    fn definitions(&self) -> Vec<IndexDefinition> {
        match self.read(|inner| inner.definitions()) {
            Ok(definitions) => definitions,
            Err(e) => {
                tracing::warn!("Serving cached definitions: {}", e);
                self.inner.definitions()
            }
        }
    }

    fn get(&self, index: &IndexRef, key: &ConstituentKey) -> Result<VersionedStatus> {
        self.read(|inner| inner.get(index, key))?
    }

    fn set(
        &self,
        index: &IndexRef,
        key: &ConstituentKey,
        expected_version: u64,
        status: IndexStatus,
    ) -> Result<VersionedStatus> {
        let mut loaded = self.guard()?;
        let _lock = self.lock_for_write(&mut loaded)?;

        let previous = self.inner.get(index, key)?;
        let written = self.inner.set(index, key, expected_version, status)?;

        if let Err(e) = self.persist(&mut loaded) {
            self.inner.restore_record(index, key, previous);
            return Err(e);
        }
        Ok(written)
    }
}
