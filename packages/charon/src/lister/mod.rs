//! Async folder lister: produces a sorted folder listing followed by a
//! per-folder host-compatibility map, both cached.

use std::cmp::min;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use color_eyre::Result;
use futures::{StreamExt, stream};
use tracing::instrument;

use crate::{cache::CacheStore, path::AbsDirPath};

/// TTL, in seconds, for the folder listing cache entry.
pub const FOLDER_LIST_TTL_SECONDS: u64 = 300;
/// TTL, in seconds, for each per-folder compatibility cache entry.
pub const COMPAT_TTL_SECONDS: u64 = 600;
/// Pseudo-folder name prepended when the user has bookmarks.
pub const BOOKMARKS_PSEUDO_FOLDER: &str = "Bookmarks";

/// Decides whether a folder is relevant to a given host tag. The distilled
/// spec names this check abstractly ("checking whether a folder is relevant
/// for the given host") without specifying its test; callers plug in their
/// own, e.g. by consulting `.charon.json`'s `run_on_main` flag.
pub trait CompatibilityProbe: Send + Sync {
    fn is_compatible(&self, folder: &AbsDirPath, host: &str) -> bool;
}

/// Default probe: compatible with every host. Callers embedding Charon in a
/// host that distinguishes machine classes should supply their own probe.
pub struct AlwaysCompatible;

impl CompatibilityProbe for AlwaysCompatible {
    fn is_compatible(&self, _folder: &AbsDirPath, _host: &str) -> bool {
        true
    }
}

/// The caller's bookmarked folders and user slug, used to compute the
/// pseudo-folders prepended to a listing.
#[derive(Clone, Copy, Default)]
pub struct UserContext<'a> {
    pub bookmarks: &'a [String],
    pub user_slug: Option<&'a str>,
}

/// A cancellation flag shared between the lister and its caller.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// List the immediate subfolders of `base`, sorted case-insensitively, with
/// the bookmarks pseudo-folder and the user's slug folder prepended per the
/// rules above. Cached for [`FOLDER_LIST_TTL_SECONDS`] under `folders:<base>`.
#[instrument(skip(cache, user))]
pub async fn list_folders(base: &AbsDirPath, cache: &CacheStore, user: UserContext<'_>) -> Result<Vec<String>> {
    let key = format!("folders:{}", base.as_str_lossy());
    if let Some(cached) = cache.get_cached_data(&key, None)
        && let Ok(list) = serde_json::from_value(cached)
    {
        return Ok(list);
    }

    let mut names = Vec::new();
    let mut entries = crate::fs::read_dir(base).await?;
    while let Some(entry) = entries.next_entry().await? {
        if crate::fs::is_dir(entry.path()).await {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort_by_key(|n| n.to_lowercase());

    let mut result = Vec::new();
    if !user.bookmarks.is_empty() {
        result.push(BOOKMARKS_PSEUDO_FOLDER.to_string());
    }
    if let Some(slug) = user.user_slug
        && names.iter().any(|n| n == slug)
    {
        result.push(slug.to_string());
        names.retain(|n| n != slug);
    }
    result.extend(names);

    if let Ok(value) = serde_json::to_value(&result) {
        cache.cache_data(&key, value, Some(FOLDER_LIST_TTL_SECONDS));
    }
    Ok(result)
}

/// Compute per-folder host compatibility with bounded concurrency
/// (`min(4, cpus)`), checking the cancel token between each completed
/// future. Cancelled futures do not contribute to the returned map.
#[instrument(skip(cache, probe, cancel))]
pub async fn compute_compatibility(
    base: &AbsDirPath,
    folders: &[String],
    host: &str,
    cache: &CacheStore,
    probe: &(dyn CompatibilityProbe + Sync),
    cancel: &CancelToken,
) -> Result<Vec<(String, bool)>> {
    use crate::path::TryJoinWith as _;

    let workers = min(4, num_cpus::get());
    let results: Vec<Option<(String, bool)>> = stream::iter(
        folders
            .iter()
            .filter(|f| f.as_str() != BOOKMARKS_PSEUDO_FOLDER)
            .cloned(),
    )
    .map(|name| {
        let base = base.clone();
        let host = host.to_string();
        let cancel = cancel.clone();
        async move {
            if cancel.is_cancelled() {
                return None;
            }

            let key = format!("compat:{}:{}:{}", base.as_str_lossy(), name, host);
            if let Some(cached) = cache.get_cached_data(&key, None)
                && let Some(value) = cached.as_bool()
            {
                return Some((name, value));
            }

            let folder_path = base.try_join_dir(&name).ok()?;
            let compatible = probe.is_compatible(&folder_path, &host);
            cache.cache_data(&key, serde_json::json!(compatible), Some(COMPAT_TTL_SECONDS));

            if cancel.is_cancelled() {
                return None;
            }
            Some((name, compatible))
        }
    })
    .buffer_unordered(workers.max(1))
    .collect()
    .await;

    Ok(results.into_iter().flatten().collect())
}

/// Full listing operation: folder list, then compatibility map. The folder
/// list is made available to `on_folders` before any compatibility work
/// starts, matching the "list strictly before compat results" ordering
/// guarantee.
#[instrument(skip(cache, probe, cancel, user, on_folders))]
pub async fn list(
    base: &AbsDirPath,
    host: &str,
    cache: &CacheStore,
    user: UserContext<'_>,
    probe: &(dyn CompatibilityProbe + Sync),
    cancel: &CancelToken,
    mut on_folders: impl FnMut(&[String]),
) -> Result<Vec<(String, bool)>> {
    let folders = list_folders(base, cache, user).await?;
    on_folders(&folders);

    if cancel.is_cancelled() {
        return Ok(Vec::new());
    }

    compute_compatibility(base, &folders, host, cache, probe, cancel).await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn lists_folders_alphabetically_case_insensitive() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::create_dir(dir.path().join("A")).unwrap();
        let base = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let cache = CacheStore::with_memory_cap_mb(64);
        let names = list_folders(&base, &cache, UserContext::default()).await.unwrap();
        assert_eq!(names, vec!["A".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn prepends_bookmarks_and_user_slug() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("alice")).unwrap();
        std::fs::create_dir(dir.path().join("zeta")).unwrap();
        let base = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let cache = CacheStore::with_memory_cap_mb(64);
        let bookmarks = vec!["x".to_string()];
        let names = list_folders(
            &base,
            &cache,
            UserContext {
                bookmarks: &bookmarks,
                user_slug: Some("alice"),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            names,
            vec!["Bookmarks".to_string(), "alice".to_string(), "zeta".to_string()]
        );
    }

    #[tokio::test]
    async fn repeated_listing_within_ttl_does_not_rescan() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("A")).unwrap();
        let base = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let cache = CacheStore::with_memory_cap_mb(64);
        let first = list_folders(&base, &cache, UserContext::default()).await.unwrap();
        std::fs::create_dir(dir.path().join("B")).unwrap();
        let second = list_folders(&base, &cache, UserContext::default()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cancel_between_list_and_compat_yields_list_without_compat() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("A")).unwrap();
        let base = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let cache = CacheStore::with_memory_cap_mb(64);
        let cancel = CancelToken::new();
        let mut captured = Vec::new();
        let compat = list(
            &base,
            "main",
            &cache,
            UserContext::default(),
            &AlwaysCompatible,
            &cancel,
            |folders| {
                captured = folders.to_vec();
                cancel.cancel();
            },
        )
        .await
        .unwrap();

        assert_eq!(captured, vec!["A".to_string()]);
        assert!(compat.is_empty());
    }
}
