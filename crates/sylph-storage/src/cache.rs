//! Spill cache for column data.
//!
//! Entries are resident (held in memory, tracked in LRU order) or spilled (encoded into a
//! private scratch store). When resident bytes exceed the configured cap, least recently used
//! entries are spilled until usage drops to half the cap. The most recently used entry is never
//! spilled, so a single oversized value can keep usage above the cap.
//!
//! [`SpillCache::set`] hands out a [`CacheHandle`]; dropping the last clone of a handle deletes
//! its entry.

use crate::codec;
use crate::column::Column;
use crate::error::{ErrorKind, Result, StorageError};
use crate::path::{self, ROOT};
use crate::store::Store;
use lru::LruCache;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_MAX_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Resident byte cap before entries start spilling (default: 512 MiB).
    pub max_bytes: usize,
    /// Directory for the on-disk spill store. `None` keeps spilled data in memory.
    pub spill_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            spill_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unknown cache key: {0}")]
    UnknownKey(String),
    #[error("spilled cache entry {0} could not be restored")]
    Consistency(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::UnknownKey(_) => ErrorKind::Protocol,
            CacheError::Consistency(_) => ErrorKind::CacheConsistency,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub restores: u64,
    pub spills: u64,
    pub deletes: u64,
}

/// Current cache state plus cumulative counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct CacheMetrics {
    pub stats: CacheStats,
    pub resident_entries: usize,
    pub resident_bytes: usize,
    pub spilled_entries: usize,
    pub max_bytes: usize,
}

#[derive(Debug)]
struct Resident {
    value: Arc<Column>,
    bytes: usize,
    generation: u64,
}

#[derive(Debug)]
struct SpillStore {
    store: Store,
    // Declared after `store` so the connection closes before the file is removed.
    _file: Option<NamedTempFile>,
}

impl SpillStore {
    fn create(config: &CacheConfig) -> Result<Self> {
        match &config.spill_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let file = tempfile::Builder::new()
                    .prefix("sylph-spill-")
                    .suffix(".sqlite")
                    .tempfile_in(dir)?;
                let store = Store::open_path(file.path())?;
                log::debug!("spill store created at {}", file.path().display());
                Ok(Self {
                    store,
                    _file: Some(file),
                })
            }
            None => Ok(Self {
                store: Store::open_in_memory("<spill>")?,
                _file: None,
            }),
        }
    }
}

fn spill_path(key: &str) -> String {
    path::join(ROOT, key)
}

#[derive(Debug)]
struct CacheInner {
    config: CacheConfig,
    resident: LruCache<String, Resident>,
    spilled: HashMap<String, u64>,
    bytes: usize,
    spill: Option<SpillStore>,
    next_generation: u64,
    stats: CacheStats,
}

impl CacheInner {
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            resident: LruCache::unbounded(),
            spilled: HashMap::new(),
            bytes: 0,
            spill: None,
            next_generation: 0,
            stats: CacheStats::default(),
        }
    }

    fn generation_of(&self, key: &str) -> Option<u64> {
        self.resident
            .peek(key)
            .map(|entry| entry.generation)
            .or_else(|| self.spilled.get(key).copied())
    }

    fn spill_store(&mut self) -> Result<&Store> {
        if self.spill.is_none() {
            self.spill = Some(SpillStore::create(&self.config)?);
        }
        match &self.spill {
            Some(spill) => Ok(&spill.store),
            None => Err(CacheError::Consistency("<spill store>".to_string()).into()),
        }
    }

    fn insert_resident(&mut self, key: String, value: Arc<Column>, generation: u64) {
        let bytes = value.byte_size();
        self.bytes = self.bytes.saturating_add(bytes);
        self.resident.put(
            key,
            Resident {
                value,
                bytes,
                generation,
            },
        );
    }

    fn evict_if_needed(&mut self) -> Result<()> {
        if self.bytes <= self.config.max_bytes {
            return Ok(());
        }
        let target = self.config.max_bytes / 2;
        // LRU first; the most recently used entry is never a candidate.
        let mut candidates: Vec<String> = self.resident.iter().rev().map(|(key, _)| key.clone()).collect();
        candidates.pop();

        for key in candidates {
            if self.bytes <= target {
                break;
            }
            let Some((value, generation)) = self
                .resident
                .peek(&key)
                .map(|entry| (entry.value.clone(), entry.generation))
            else {
                continue;
            };

            let encoded = match codec::encode(&value) {
                Ok(encoded) => encoded,
                Err(err) => {
                    log::warn!("cache entry {key} cannot be spilled, keeping it resident: {err}");
                    continue;
                }
            };
            self.spill_store()?.put_dataset(&spill_path(&key), &encoded)?;

            if let Some(entry) = self.resident.pop(&key) {
                self.bytes = self.bytes.saturating_sub(entry.bytes);
            }
            log::debug!("spilled cache entry {key} ({} bytes resident)", self.bytes);
            self.spilled.insert(key, generation);
            self.stats.spills = self.stats.spills.saturating_add(1);
        }
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Arc<Column>> {
        if let Some(entry) = self.resident.get(key) {
            let value = entry.value.clone();
            self.stats.hits = self.stats.hits.saturating_add(1);
            return Ok(value);
        }
        let Some(generation) = self.spilled.get(key).copied() else {
            return Err(CacheError::UnknownKey(key.to_string()).into());
        };

        let store = match &self.spill {
            Some(spill) => &spill.store,
            None => return Err(CacheError::Consistency(key.to_string()).into()),
        };
        let encoded = match store.read_dataset(&spill_path(key)) {
            Ok(encoded) => encoded,
            Err(StorageError::MissingPath { .. } | StorageError::NotADataset { .. }) => {
                return Err(CacheError::Consistency(key.to_string()).into())
            }
            Err(err) => return Err(err),
        };
        let value = Arc::new(codec::decode(&encoded)?);
        store.remove(&spill_path(key))?;

        self.spilled.remove(key);
        self.insert_resident(key.to_string(), value.clone(), generation);
        self.stats.restores = self.stats.restores.saturating_add(1);
        log::debug!("restored cache entry {key}");
        self.evict_if_needed()?;
        Ok(value)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        if let Some(entry) = self.resident.pop(key) {
            self.bytes = self.bytes.saturating_sub(entry.bytes);
        } else if self.spilled.remove(key).is_some() {
            if let Some(spill) = &self.spill {
                spill.store.remove(&spill_path(key))?;
            }
        } else {
            return Err(CacheError::UnknownKey(key.to_string()).into());
        }
        self.stats.deletes = self.stats.deletes.saturating_add(1);
        Ok(())
    }

    fn clear(&mut self) {
        self.resident.clear();
        self.spilled.clear();
        self.bytes = 0;
        self.spill = None;
    }
}

/// LRU cache of column values with spill-to-store eviction. Clones share the same cache.
#[derive(Debug, Clone)]
pub struct SpillCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl Default for SpillCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl SpillCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::new(config))),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.inner
            .lock()
            .expect("spill cache mutex poisoned")
            .config
            .clone()
    }

    /// Store `value` under `key`, replacing (and deleting) any previous entry for the key.
    pub fn set(&self, key: impl Into<String>, value: Column) -> Result<CacheHandle> {
        let key = key.into();
        let generation = {
            let mut inner = self.inner.lock().expect("spill cache mutex poisoned");
            if inner.generation_of(&key).is_some() {
                inner.delete(&key)?;
            }
            let generation = inner.next_generation;
            inner.next_generation = inner.next_generation.wrapping_add(1);
            inner.insert_resident(key.clone(), Arc::new(value), generation);
            if let Err(err) = inner.evict_if_needed() {
                // Nothing will ever hold a handle for this entry.
                let _ = inner.delete(&key);
                return Err(err);
            }
            generation
        };
        Ok(CacheHandle {
            inner: Arc::new(HandleInner {
                key,
                generation,
                cache: Arc::downgrade(&self.inner),
            }),
        })
    }

    /// Store `value` under a freshly generated key.
    pub fn insert(&self, value: Column) -> Result<CacheHandle> {
        self.set(Uuid::new_v4().to_string(), value)
    }

    /// Fetch `key`, restoring it from the spill store if needed.
    pub fn get(&self, key: &str) -> Result<Arc<Column>> {
        self.inner
            .lock()
            .expect("spill cache mutex poisoned")
            .get(key)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.inner
            .lock()
            .expect("spill cache mutex poisoned")
            .delete(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .expect("spill cache mutex poisoned")
            .generation_of(key)
            .is_some()
    }

    pub fn is_resident(&self, key: &str) -> bool {
        self.inner
            .lock()
            .expect("spill cache mutex poisoned")
            .resident
            .contains(key)
    }

    pub fn is_spilled(&self, key: &str) -> bool {
        self.inner
            .lock()
            .expect("spill cache mutex poisoned")
            .spilled
            .contains_key(key)
    }

    /// Drop every entry and the spill store. Outstanding handles become inert.
    pub fn clear(&self) {
        self.inner.lock().expect("spill cache mutex poisoned").clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("spill cache mutex poisoned").stats
    }

    pub fn metrics(&self) -> CacheMetrics {
        let inner = self.inner.lock().expect("spill cache mutex poisoned");
        CacheMetrics {
            stats: inner.stats,
            resident_entries: inner.resident.len(),
            resident_bytes: inner.bytes,
            spilled_entries: inner.spilled.len(),
            max_bytes: inner.config.max_bytes,
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    key: String,
    generation: u64,
    cache: Weak<Mutex<CacheInner>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        let Ok(mut inner) = cache.lock() else {
            return;
        };
        // The key may have been replaced by a newer `set`; only delete our own entry.
        if inner.generation_of(&self.key) != Some(self.generation) {
            return;
        }
        if let Err(err) = inner.delete(&self.key) {
            log::debug!("ignoring cache release error for {}: {err}", self.key);
        }
    }
}

/// Shared ownership of one cache entry. The entry is deleted when the last clone drops.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    inner: Arc<HandleInner>,
}

impl CacheHandle {
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Fetch the value, restoring it if it was spilled.
    pub fn get(&self) -> Result<Arc<Column>> {
        let cache = self.inner.cache.upgrade().ok_or(StorageError::Closed)?;
        let mut inner = cache.lock().expect("spill cache mutex poisoned");
        if inner.generation_of(&self.inner.key) != Some(self.inner.generation) {
            return Err(CacheError::UnknownKey(self.inner.key.clone()).into());
        }
        inner.get(&self.inner.key)
    }

    /// Whether the entry this handle owns is still held by its cache.
    pub fn is_live(&self) -> bool {
        let Some(cache) = self.inner.cache.upgrade() else {
            return false;
        };
        let inner = cache.lock().expect("spill cache mutex poisoned");
        inner.generation_of(&self.inner.key) == Some(self.inner.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn forty_bytes(seed: i64) -> Column {
        Column::from(vec![seed; 5])
    }

    fn cache(max_bytes: usize) -> SpillCache {
        SpillCache::new(CacheConfig {
            max_bytes,
            spill_dir: None,
        })
    }

    #[test]
    fn spills_lru_entries_down_to_half_the_cap() {
        let cache = cache(100);
        let _a = cache.set("A", forty_bytes(1)).expect("set A");
        let _b = cache.set("B", forty_bytes(2)).expect("set B");
        let _c = cache.set("C", forty_bytes(3)).expect("set C");

        assert!(cache.is_spilled("A"));
        assert!(cache.is_spilled("B"));
        assert!(cache.is_resident("C"));
        assert_eq!(cache.metrics().resident_bytes, 40);

        let a = cache.get("A").expect("restore A");
        assert_eq!(*a, forty_bytes(1));
        assert!(cache.is_resident("A"));
        assert!(cache.is_resident("C"));
        assert!(cache.is_spilled("B"));

        let metrics = cache.metrics();
        assert_eq!(metrics.resident_bytes, 80);
        assert_eq!(metrics.stats.spills, 2);
        assert_eq!(metrics.stats.restores, 1);
    }

    #[test]
    fn most_recent_entry_is_never_spilled() {
        let cache = cache(10);
        let _a = cache.set("A", forty_bytes(1)).expect("set A");
        assert!(cache.is_resident("A"));
        assert_eq!(cache.metrics().resident_bytes, 40);

        let _b = cache.set("B", forty_bytes(2)).expect("set B");
        assert!(cache.is_spilled("A"));
        assert!(cache.is_resident("B"));
        assert_eq!(cache.metrics().resident_bytes, 40);
    }

    #[test]
    fn dropping_last_handle_deletes_entry() {
        let cache = cache(1024);
        let handle = cache.set("k", forty_bytes(7)).expect("set");
        let clone = handle.clone();
        drop(handle);
        assert!(cache.contains("k"));
        assert_eq!(*clone.get().expect("get"), forty_bytes(7));
        drop(clone);
        assert!(!cache.contains("k"));
        assert_eq!(cache.metrics().resident_bytes, 0);
    }

    #[test]
    fn replaced_key_survives_old_handle_drop() {
        let cache = cache(1024);
        let old = cache.set("k", forty_bytes(1)).expect("set old");
        let new = cache.set("k", forty_bytes(2)).expect("set new");
        assert!(!old.is_live());
        drop(old);
        assert_eq!(*new.get().expect("get"), forty_bytes(2));
    }

    #[test]
    fn delete_of_unknown_key_is_an_error() {
        let err = cache(1024).delete("missing").expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn delete_spilled_entry_removes_it_from_the_spill_store() {
        let cache = cache(50);
        let _a = cache.set("A", forty_bytes(1)).expect("set A");
        let _b = cache.set("B", forty_bytes(2)).expect("set B");
        assert!(cache.is_spilled("A"));
        cache.delete("A").expect("delete spilled");
        assert!(!cache.contains("A"));
        assert!(matches!(
            cache.get("A"),
            Err(StorageError::Cache(CacheError::UnknownKey(_)))
        ));
    }

    #[test]
    fn spilled_timestamps_restore_with_nanoseconds() {
        let ts = chrono::NaiveDate::from_ymd_opt(2021, 3, 14)
            .and_then(|d| d.and_hms_nano_opt(1, 2, 3, 123_456_789))
            .expect("valid timestamp");
        let cache = cache(1);
        let a = cache.insert(Column::from(vec![ts])).expect("insert timestamp");
        let _b = cache.insert(forty_bytes(1)).expect("insert filler");
        assert!(cache.is_spilled(a.key()));
        assert_eq!(*a.get().expect("restore"), Column::from(vec![ts]));
    }

    #[test]
    fn extreme_durations_do_not_wedge_eviction() {
        let cache = cache(1);
        let extreme = Column::from(vec![chrono::TimeDelta::MAX, chrono::TimeDelta::MIN]);
        let a = cache.insert(extreme.clone()).expect("insert extreme");
        let _b = cache.insert(forty_bytes(1)).expect("insert after extreme");
        let _c = cache.insert(forty_bytes(2)).expect("insert again");
        assert!(cache.is_spilled(a.key()));
        assert_eq!(*a.get().expect("restore"), extreme);
    }

    #[test]
    fn restore_of_missing_spill_data_is_a_consistency_error() {
        let cache = cache(50);
        let _a = cache.set("A", forty_bytes(1)).expect("set A");
        let _b = cache.set("B", forty_bytes(2)).expect("set B");
        assert!(cache.is_spilled("A"));

        {
            let inner = cache.inner.lock().expect("lock");
            let spill = inner.spill.as_ref().expect("spill store exists");
            assert!(spill.store.remove(&spill_path("A")).expect("remove spilled data"));
        }

        let err = cache.get("A").expect_err("backing data is gone");
        assert_eq!(err.kind(), ErrorKind::CacheConsistency);
        assert!(matches!(err, StorageError::Cache(CacheError::Consistency(ref key)) if key == "A"));
    }

    #[test]
    fn spill_dir_holds_an_on_disk_store() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let cache = SpillCache::new(CacheConfig {
            max_bytes: 50,
            spill_dir: Some(tmp.path().to_path_buf()),
        });
        let _a = cache.set("A", Column::from(vec!["x/y", "a\\b"])).expect("set A");
        let _b = cache.set("B", forty_bytes(2)).expect("set B");
        assert!(cache.is_spilled("A"));
        assert_eq!(fs::read_dir(tmp.path()).expect("read dir").count(), 1);
        assert_eq!(
            *cache.get("A").expect("restore"),
            Column::from(vec!["x/y", "a\\b"])
        );

        cache.clear();
        assert_eq!(fs::read_dir(tmp.path()).expect("read dir").count(), 0);
    }
}
