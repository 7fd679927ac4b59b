//! Background prefetch scheduler: a bounded FIFO queue drained by a single
//! worker task, warming the cache ahead of user navigation.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use color_eyre::Result;
use tracing::{debug, instrument, warn};

use crate::{
    cache::{CacheStore, ScriptValidationRecord},
    lister::{AlwaysCompatible, CompatibilityProbe},
    metadata::read_batch_metadata,
    path::{AbsDirPath, TryJoinWith as _},
};

/// Capacity of the prefetch queue. Enqueues beyond this are dropped
/// (non-blocking put), matching the "best effort, never blocks the caller"
/// contract.
pub const QUEUE_CAPACITY: usize = 256;

/// A unit of prefetch work.
enum Task {
    Folder(AbsDirPath),
    AllFolders { base: AbsDirPath, host: String },
    Shutdown,
}

/// Runs a single prefetch worker consuming tasks from a bounded FIFO queue.
pub struct PrefetchScheduler {
    sender: flume::Sender<Task>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl PrefetchScheduler {
    /// Spawn the worker. `shutdown` is also checked between folders inside
    /// `prefetch_all_folders`.
    pub fn spawn(cache: Arc<CacheStore>) -> Self {
        let (sender, receiver) = flume::bounded(QUEUE_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(worker_loop(receiver, cache, shutdown));
        Self {
            sender,
            worker: Some(worker),
        }
    }

    /// Enqueue a single folder prefetch. Returns `false` if the queue is
    /// full (the enqueue is dropped, never blocks).
    pub fn enqueue_folder(&self, folder: AbsDirPath) -> bool {
        self.sender.try_send(Task::Folder(folder)).is_ok()
    }

    /// Enqueue a whole-repository prefetch.
    pub fn enqueue_all_folders(&self, base: AbsDirPath, host: impl Into<String>) -> bool {
        self.sender
            .try_send(Task::AllFolders {
                base,
                host: host.into(),
            })
            .is_ok()
    }

    /// Cooperative shutdown: enqueue a sentinel that wakes the worker, then
    /// join it with no further draining (the queue is processed in order up
    /// to the sentinel).
    #[instrument(skip(self))]
    pub async fn shutdown(mut self) {
        let _ = self.sender.send_async(Task::Shutdown).await;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    receiver: flume::Receiver<Task>,
    cache: Arc<CacheStore>,
    shutdown: Arc<AtomicBool>,
) {
    while let Ok(task) = receiver.recv_async().await {
        match task {
            Task::Shutdown => {
                debug!(target: "charon::system", "prefetch worker received shutdown sentinel");
                break;
            }
            Task::Folder(folder) => {
                if let Err(err) = prefetch_folder(&folder, &cache).await {
                    warn!(target: "charon::system", ?folder, ?err, "prefetch_folder failed");
                }
            }
            Task::AllFolders { base, host } => {
                if let Err(err) = prefetch_all_folders(&base, &host, &cache, &shutdown).await {
                    warn!(target: "charon::system", ?base, ?err, "prefetch_all_folders failed");
                }
            }
        }
    }
}

/// A minimal, filesystem-only validation used to populate the validation
/// cache during prefetch (distinct from the full browser-based orchestrator
/// in [`crate::validate`]).
async fn quick_validate_folder(folder: &AbsDirPath) -> Result<ScriptValidationRecord> {
    let workflow_path = folder.try_join_file("workflow.json")?;
    let has_entry = crate::fs::is_file(workflow_path.as_std_path()).await;

    let mut has_icon = false;
    let mut icon_path = None;
    for name in ["icon.png", "icon.jpg"] {
        let candidate = folder.try_join_file(name)?;
        if crate::fs::is_file(candidate.as_std_path()).await {
            has_icon = true;
            icon_path = Some(candidate.as_str_lossy().to_string());
            break;
        }
    }

    Ok(ScriptValidationRecord {
        has_entry,
        has_icon,
        icon_path,
        can_execute: has_entry,
    })
}

/// Warm the cache for a single folder: if both the listing and the batch
/// metadata are already cached, this is a no-op (coalescing).
#[instrument(skip(cache))]
pub async fn prefetch_folder(folder: &AbsDirPath, cache: &CacheStore) -> Result<()> {
    let folder_key = folder.as_str_lossy().to_string();
    let batch_key = format!("batch_metadata:{folder_key}");

    if cache.get_folder_contents(&folder_key).is_some()
        && cache.get_cached_data(&batch_key, None).is_some()
    {
        return Ok(());
    }

    let mut subdirs = Vec::new();
    let mut entries = crate::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        if crate::fs::is_dir(entry.path()).await {
            let name = entry.file_name().to_string_lossy().to_string();
            let sub_path = folder.try_join_dir(&name)?;
            subdirs.push((sub_path.as_str_lossy().to_string(), name));
        }
    }

    cache.cache_folder_contents(&folder_key, subdirs.clone());

    let batch = read_batch_metadata(folder, cache, || false).await?;

    let mut tags: HashSet<String> = HashSet::new();
    for metadata in batch.values() {
        tags.extend(metadata.tags.iter().cloned());
    }
    cache.cache_folder_tags(&folder_key, tags);

    for (sub_path, _) in &subdirs {
        let sub_abs = AbsDirPath::try_from(sub_path.as_str())?;
        let record = quick_validate_folder(&sub_abs).await?;
        cache.cache_script_validation(sub_path, record);
    }

    Ok(())
}

/// Warm the cache for every subfolder of `base`, honoring `shutdown`
/// between folders and logging progress every 10 folders.
#[instrument(skip(cache, shutdown))]
pub async fn prefetch_all_folders(
    base: &AbsDirPath,
    host: &str,
    cache: &CacheStore,
    shutdown: &AtomicBool,
) -> Result<()> {
    prefetch_all_folders_with_probe(base, host, cache, shutdown, &AlwaysCompatible).await
}

/// As [`prefetch_all_folders`], but with a pluggable host-compatibility
/// probe (see [`crate::lister::CompatibilityProbe`]).
#[instrument(skip(cache, shutdown, probe))]
pub async fn prefetch_all_folders_with_probe(
    base: &AbsDirPath,
    host: &str,
    cache: &CacheStore,
    shutdown: &AtomicBool,
    probe: &(dyn CompatibilityProbe + Sync),
) -> Result<()> {
    let mut names = Vec::new();
    let mut entries = crate::fs::read_dir(base).await?;
    while let Some(entry) = entries.next_entry().await? {
        if crate::fs::is_dir(entry.path()).await {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort_by_key(|n| n.to_lowercase());

    for (i, name) in names.iter().enumerate() {
        if shutdown.load(Ordering::SeqCst) {
            debug!(target: "charon::system", processed = i, total = names.len(), "prefetch_all_folders cancelled");
            break;
        }

        let folder = base.try_join_dir(name)?;
        prefetch_folder(&folder, cache).await?;

        let compatible = probe.is_compatible(&folder, host);
        let key = format!("compat:{}:{}:{}", base.as_str_lossy(), name, host);
        cache.cache_data(
            &key,
            serde_json::json!(compatible),
            Some(crate::lister::COMPAT_TTL_SECONDS),
        );

        if (i + 1) % 10 == 0 {
            debug!(target: "charon::system", processed = i + 1, total = names.len(), "prefetch progress");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn prefetch_folder_populates_listing_tags_and_validation() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("workflow.json"), "{}").unwrap();
        std::fs::write(
            dir.path().join("sub").join(".charon.json"),
            r#"{"tags": ["a", "b"]}"#,
        )
        .unwrap();

        let base = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let cache = CacheStore::with_memory_cap_mb(64);

        prefetch_folder(&base, &cache).await.unwrap();

        let folder_key = base.as_str_lossy().to_string();
        assert!(cache.get_folder_contents(&folder_key).is_some());
        let tags = cache.get_folder_tags(&folder_key).unwrap();
        assert!(tags.contains("a") && tags.contains("b"));

        let sub_key = format!("{folder_key}/sub");
        let record = cache.get_script_validation(&sub_key);
        assert!(record.is_some());
        assert!(record.unwrap().has_entry);
    }

    #[tokio::test]
    async fn prefetch_folder_is_coalesced_when_already_cached() {
        let dir = tempdir().unwrap();
        let base = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let cache = CacheStore::with_memory_cap_mb(64);

        let folder_key = base.as_str_lossy().to_string();
        cache.cache_folder_contents(&folder_key, vec![]);
        cache.cache_data(
            &format!("batch_metadata:{folder_key}"),
            serde_json::json!({}),
            None,
        );

        // Directory no longer needs to be scanned; removing it proves the
        // coalescing check short-circuits before any I/O.
        std::fs::remove_dir_all(dir.path()).ok();
        prefetch_folder(&base, &cache).await.unwrap();
    }

    #[tokio::test]
    async fn scheduler_drains_on_shutdown_sentinel() {
        let cache = Arc::new(CacheStore::with_memory_cap_mb(64));
        let scheduler = PrefetchScheduler::spawn(cache);
        scheduler.shutdown().await;
    }
}
