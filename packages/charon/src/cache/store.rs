use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::cache::entry::CacheEntry;

/// Validation cache entries are considered fresh for this long regardless of
/// the TTL passed to other tiers.
const VALIDATION_TTL: Duration = Duration::from_secs(600);

/// Default capacity of the hot-folder MRU.
pub const DEFAULT_HOT_FOLDER_CAPACITY: usize = 20;

/// Rough per-entry memory estimate, in bytes, used by the evictor. These are
/// deliberately coarse; the point is relative ordering between tiers, not
/// byte-accurate accounting.
mod estimate {
    pub const FOLDER: usize = 1000;
    pub const TAG: usize = 500;
    pub const VALIDATION: usize = 200;
    pub const GENERAL_BASE: usize = 500;
}

/// A single cached folder listing: `(subfolder path, subfolder name)` pairs.
pub type FolderListing = Vec<(String, String)>;

/// A cached validation result for a single workflow script.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptValidationRecord {
    pub has_entry: bool,
    pub has_icon: bool,
    pub icon_path: Option<String>,
    pub can_execute: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum CacheKind {
    Folder,
    Tag,
    General,
}

struct Inner {
    folder_cache: HashMap<String, CacheEntry<FolderListing>>,
    tag_cache: HashMap<String, CacheEntry<HashSet<String>>>,
    general_cache: HashMap<String, CacheEntry<(serde_json::Value, Option<u64>)>>,
    validation_cache: HashMap<String, CacheEntry<ScriptValidationRecord>>,
    /// Most-recently-marked-hot folder is at the back.
    hot_folders: Vec<String>,
    hot_capacity: usize,
    estimated_memory_bytes: usize,
}

impl Inner {
    fn mark_hot(&mut self, path: &str) {
        if let Some(pos) = self.hot_folders.iter().position(|p| p == path) {
            self.hot_folders.remove(pos);
        }
        self.hot_folders.push(path.to_string());
        while self.hot_folders.len() > self.hot_capacity {
            self.hot_folders.remove(0);
        }
    }

    fn is_hot(&self, path: &str) -> bool {
        self.hot_folders.iter().any(|p| p == path)
    }

    fn general_entry_size(key: &str, value: &serde_json::Value) -> usize {
        estimate::GENERAL_BASE + key.len() + value.to_string().len()
    }

    /// Insert into `folder_cache`, adjusting the running memory estimate by
    /// only the delta this insert introduces (the per-entry size is fixed,
    /// so a replacement of an existing key is a no-op on the total).
    fn insert_folder(&mut self, path: String, entry: CacheEntry<FolderListing>) {
        if self.folder_cache.insert(path, entry).is_none() {
            self.estimated_memory_bytes += estimate::FOLDER;
        }
    }

    fn remove_folder(&mut self, path: &str) {
        if self.folder_cache.remove(path).is_some() {
            self.estimated_memory_bytes = self.estimated_memory_bytes.saturating_sub(estimate::FOLDER);
        }
    }

    fn insert_tag(&mut self, path: String, entry: CacheEntry<HashSet<String>>) {
        if self.tag_cache.insert(path, entry).is_none() {
            self.estimated_memory_bytes += estimate::TAG;
        }
    }

    fn remove_tag(&mut self, path: &str) {
        if self.tag_cache.remove(path).is_some() {
            self.estimated_memory_bytes = self.estimated_memory_bytes.saturating_sub(estimate::TAG);
        }
    }

    fn insert_validation(&mut self, path: String, entry: CacheEntry<ScriptValidationRecord>) {
        if self.validation_cache.insert(path, entry).is_none() {
            self.estimated_memory_bytes += estimate::VALIDATION;
        }
    }

    fn remove_validation(&mut self, path: &str) {
        if self.validation_cache.remove(path).is_some() {
            self.estimated_memory_bytes = self.estimated_memory_bytes.saturating_sub(estimate::VALIDATION);
        }
    }

    /// Insert into `general_cache`, subtracting any replaced entry's size and
    /// adding the new one's, so the running total stays exact without a
    /// rescan of the whole tier.
    fn insert_general(&mut self, key: String, entry: CacheEntry<(serde_json::Value, Option<u64>)>) {
        let new_size = Self::general_entry_size(&key, &entry.value.0);
        if let Some(old) = self.general_cache.insert(key.clone(), entry) {
            let old_size = Self::general_entry_size(&key, &old.value.0);
            self.estimated_memory_bytes = self.estimated_memory_bytes.saturating_sub(old_size);
        }
        self.estimated_memory_bytes += new_size;
    }

    fn remove_general(&mut self, key: &str) {
        if let Some(old) = self.general_cache.remove(key) {
            let old_size = Self::general_entry_size(key, &old.value.0);
            self.estimated_memory_bytes = self.estimated_memory_bytes.saturating_sub(old_size);
        }
    }
}

/// Thread-safe, memory-bounded container for the four cache tiers plus the
/// hot-folder MRU overlay. A single mutex guards everything; callers must
/// never be invoked while the lock is held (no callbacks are taken by this
/// type, so that invariant holds trivially).
pub struct CacheStore {
    inner: Mutex<Inner>,
    memory_cap_bytes: usize,
}

/// Aggregate cache statistics, exposed for diagnostics / the `charon cache
/// show` CLI command.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CacheStats {
    pub folder_entries: usize,
    pub tag_entries: usize,
    pub general_entries: usize,
    pub validation_entries: usize,
    pub hot_folders: usize,
    pub estimated_memory_mb: f64,
}

impl CacheStore {
    /// Create a new store with the given memory budget (megabytes) and
    /// hot-folder MRU capacity.
    pub fn new(memory_cap_mb: u64, hot_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                folder_cache: HashMap::new(),
                tag_cache: HashMap::new(),
                general_cache: HashMap::new(),
                validation_cache: HashMap::new(),
                hot_folders: Vec::new(),
                hot_capacity,
                estimated_memory_bytes: 0,
            }),
            memory_cap_bytes: (memory_cap_mb as usize) * 1024 * 1024,
        }
    }

    /// Create a store using [`DEFAULT_HOT_FOLDER_CAPACITY`].
    pub fn with_memory_cap_mb(memory_cap_mb: u64) -> Self {
        Self::new(memory_cap_mb, DEFAULT_HOT_FOLDER_CAPACITY)
    }

    #[instrument(skip(self))]
    pub fn get_folder_contents(&self, path: &str) -> Option<FolderListing> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.mark_hot(path);
        inner.folder_cache.get(path).map(|e| e.value.clone())
    }

    #[instrument(skip(self, list))]
    pub fn cache_folder_contents(&self, path: &str, list: FolderListing) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.insert_folder(path.to_string(), CacheEntry::new(list));
        inner.mark_hot(path);
        self.evict_if_over_cap(&mut inner);
    }

    #[instrument(skip(self))]
    pub fn get_folder_tags(&self, path: &str) -> Option<HashSet<String>> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.mark_hot(path);
        inner.tag_cache.get(path).map(|e| e.value.clone())
    }

    #[instrument(skip(self, tags))]
    pub fn cache_folder_tags(&self, path: &str, tags: HashSet<String>) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.insert_tag(path.to_string(), CacheEntry::new(tags));
        inner.mark_hot(path);
        self.evict_if_over_cap(&mut inner);
    }

    #[instrument(skip(self, value))]
    pub fn cache_data(&self, key: &str, value: serde_json::Value, ttl_seconds: Option<u64>) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.insert_general(key.to_string(), CacheEntry::new((value, ttl_seconds)));
        self.evict_if_over_cap(&mut inner);
    }

    #[instrument(skip(self))]
    pub fn get_cached_data(
        &self,
        key: &str,
        max_age_seconds: Option<u64>,
    ) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let expired = match inner.general_cache.get(key) {
            Some(entry) => {
                let ttl = max_age_seconds.or(entry.value.1);
                ttl.is_some_and(|ttl| entry.age() > Duration::from_secs(ttl))
            }
            None => return None,
        };

        if expired {
            inner.remove_general(key);
            return None;
        }

        inner.general_cache.get(key).map(|e| e.value.0.clone())
    }

    #[instrument(skip(self))]
    pub fn get_script_validation(&self, path: &str) -> Option<ScriptValidationRecord> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let expired = inner
            .validation_cache
            .get(path)
            .is_some_and(|e| e.is_older_than(VALIDATION_TTL));

        if expired {
            inner.remove_validation(path);
            return None;
        }

        inner.validation_cache.get(path).map(|e| e.value.clone())
    }

    #[instrument(skip(self, record))]
    pub fn cache_script_validation(&self, path: &str, record: ScriptValidationRecord) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.insert_validation(path.to_string(), CacheEntry::new(record));
        self.evict_if_over_cap(&mut inner);
    }

    /// Remove the folder/tag/batch-metadata entries for `path`, plus every
    /// validation entry whose path is prefixed by `path`.
    #[instrument(skip(self))]
    pub fn invalidate_folder(&self, path: &str) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.remove_folder(path);
        inner.remove_tag(path);
        inner.remove_general(&format!("batch_metadata:{path}"));
        if let Some(pos) = inner.hot_folders.iter().position(|p| p == path) {
            inner.hot_folders.remove(pos);
        }

        let prefix = format!("{}{}", path, std::path::MAIN_SEPARATOR);
        let alt_prefix = format!("{path}/");
        let stale: Vec<String> = inner
            .validation_cache
            .keys()
            .filter(|k| k.starts_with(&prefix) || k.starts_with(&alt_prefix))
            .cloned()
            .collect();
        for key in stale {
            inner.remove_validation(&key);
        }

        trace!(target: "charon::system", ?path, "invalidated folder");
    }

    /// Invalidate the folder enclosing `script_path`.
    #[instrument(skip(self))]
    pub fn invalidate_script(&self, script_path: &str) {
        let parent = std::path::Path::new(script_path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        self.invalidate_folder(&parent);
    }

    /// Hot folders, in MRU order (most recently marked hot first).
    #[instrument(skip(self))]
    pub fn get_hot_folders(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.hot_folders.iter().rev().cloned().collect()
    }

    #[instrument(skip(self))]
    pub fn get_stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        CacheStats {
            folder_entries: inner.folder_cache.len(),
            tag_entries: inner.tag_cache.len(),
            general_entries: inner.general_cache.len(),
            validation_entries: inner.validation_cache.len(),
            hot_folders: inner.hot_folders.len(),
            estimated_memory_mb: inner.estimated_memory_bytes as f64 / (1024.0 * 1024.0),
        }
    }

    /// Clear every tier. Used by `charon cache reset`.
    #[instrument(skip(self))]
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.folder_cache.clear();
        inner.tag_cache.clear();
        inner.general_cache.clear();
        inner.validation_cache.clear();
        inner.hot_folders.clear();
        inner.estimated_memory_bytes = 0;
    }

    /// Evict if the running memory estimate (kept up to date incrementally
    /// by every insert/remove, never rescanned in full) exceeds the cap.
    fn evict_if_over_cap(&self, inner: &mut Inner) {
        if inner.estimated_memory_bytes > self.memory_cap_bytes {
            self.evict(inner);
        }
    }

    /// Evict the oldest 20% of non-hot candidates across folder/tag/general
    /// tiers.
    fn evict(&self, inner: &mut Inner) {
        let mut candidates: Vec<(std::time::Duration, CacheKind, String)> = Vec::new();

        for (key, entry) in inner.folder_cache.iter() {
            if !inner.is_hot(key) {
                candidates.push((entry.age(), CacheKind::Folder, key.clone()));
            }
        }
        for (key, entry) in inner.tag_cache.iter() {
            if !inner.is_hot(key) {
                candidates.push((entry.age(), CacheKind::Tag, key.clone()));
            }
        }
        for (key, entry) in inner.general_cache.iter() {
            candidates.push((entry.age(), CacheKind::General, key.clone()));
        }

        // Oldest (largest age) first.
        candidates.sort_by_key(|c| std::cmp::Reverse(c.0));

        let evict_count = (candidates.len() * 20) / 100;
        for (_, kind, key) in candidates.into_iter().take(evict_count) {
            match kind {
                CacheKind::Folder => inner.remove_folder(&key),
                CacheKind::Tag => inner.remove_tag(&key),
                CacheKind::General => inner.remove_general(&key),
            }
        }

        trace!(target: "charon::system", evicted = evict_count, "cache eviction pass");
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("stats", &self.get_stats())
            .finish()
    }
}
