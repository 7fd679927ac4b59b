//! Bounded-concurrency batch reader for `.charon.json` across a folder's
//! immediate children.

use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::Result;
use futures::{StreamExt, stream};
use tracing::{debug, instrument, warn};

use crate::{
    cache::CacheStore,
    metadata::{WorkflowMetadata, load_workflow_metadata},
    path::{AbsDirPath, TryJoinWith as _},
};

/// TTL, in seconds, for the `batch_metadata:<folder>` cache entry.
pub const BATCH_METADATA_TTL_SECONDS: u64 = 300;

/// Default bounded worker count.
pub const DEFAULT_WORKERS: usize = 8;

/// A reusable batch reader with a fixed worker-pool width.
#[derive(Clone, Copy, Debug)]
pub struct BatchMetadataReader {
    workers: usize,
}

impl Default for BatchMetadataReader {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl BatchMetadataReader {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    /// Read `.charon.json` for every non-dot subdirectory of `folder`,
    /// checking `cancel` between the scan and each individual read. Missing
    /// or malformed metadata resolves to `None` for that entry rather than
    /// aborting the batch.
    #[instrument(skip(self, cancel))]
    pub async fn read(
        &self,
        folder: &AbsDirPath,
        cancel: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Result<HashMap<String, WorkflowMetadata>> {
        let subdirs = list_non_dot_subdirs(folder).await?;
        let cancel = Arc::new(cancel);

        let results: Vec<Option<(String, WorkflowMetadata)>> = stream::iter(subdirs)
            .map(|(name, path)| {
                let cancel = Arc::clone(&cancel);
                async move {
                    if cancel() {
                        return None;
                    }
                    match load_workflow_metadata(&path).await {
                        Ok(metadata) => Some((name, metadata)),
                        Err(err) => {
                            warn!(target: "charon::system", ?path, ?err, "failed to read workflow metadata");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        Ok(results.into_iter().flatten().collect())
    }
}

async fn list_non_dot_subdirs(folder: &AbsDirPath) -> Result<Vec<(String, AbsDirPath)>> {
    let mut entries = crate::fs::read_dir(folder).await?;
    let mut subdirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if !crate::fs::is_dir(entry.path()).await {
            continue;
        }
        let path = folder.try_join_dir(&name)?;
        subdirs.push((name, path));
    }
    Ok(subdirs)
}

/// Convenience wrapper: read the batch, populate `batch_metadata:<folder>`
/// in the cache store, and return the mapping.
#[instrument(skip(cache, cancel))]
pub async fn read_batch_metadata(
    folder: &AbsDirPath,
    cache: &CacheStore,
    cancel: impl Fn() -> bool + Send + Sync + 'static,
) -> Result<HashMap<String, WorkflowMetadata>> {
    let key = format!("batch_metadata:{}", folder.as_str_lossy());
    if let Some(cached) = cache.get_cached_data(&key, None)
        && let Ok(map) = serde_json::from_value(cached)
    {
        return Ok(map);
    }

    let reader = BatchMetadataReader::default();
    let results = reader.read(folder, cancel).await?;
    debug!(target: "charon::system", folder = ?folder, count = results.len(), "batch metadata read complete");

    if let Ok(value) = serde_json::to_value(&results) {
        cache.cache_data(&key, value, Some(BATCH_METADATA_TTL_SECONDS));
    }

    Ok(results)
}
