//! End-to-end "metadata mutation" scenario: editing a workflow's
//! `.charon.json` and invalidating its script path must make a subsequent
//! prefetch pick up the new tags, even though the parent folder's listing
//! and batch-metadata entries were already warm.

use charon_core::{cache::CacheStore, prefetch::prefetch_folder};

use crate::{temporary_directory, write_json};

#[tokio::test]
async fn tag_added_after_invalidation_is_visible_on_rescan() {
    let (_root, base) = temporary_directory();
    let wf_dir = base.as_std_path().join("wf");
    std::fs::create_dir_all(&wf_dir).unwrap();
    std::fs::write(wf_dir.join("workflow.json"), "{}").unwrap();
    let charon_json = wf_dir.join(".charon.json");
    write_json(&charon_json, &serde_json::json!({ "tags": ["old"] }));

    let cache = CacheStore::with_memory_cap_mb(64);
    prefetch_folder(&base, &cache).await.unwrap();

    let base_path = base.as_str_lossy().to_string();
    let tags = cache.get_folder_tags(&base_path).unwrap();
    assert_eq!(tags, std::collections::HashSet::from(["old".to_string()]));

    // Mutate metadata to add a tag.
    write_json(&charon_json, &serde_json::json!({ "tags": ["old", "new"] }));

    // Without invalidation, the stale batch-metadata/tag entries would still
    // be served; invalidating the listing folder clears both the tag cache
    // and the batch-metadata entry that aggregated `wf`'s tags into it.
    cache.invalidate_folder(&base_path);
    assert!(cache.get_folder_tags(&base_path).is_none());

    prefetch_folder(&base, &cache).await.unwrap();
    let refreshed_tags = cache.get_folder_tags(&base_path).unwrap();
    assert_eq!(
        refreshed_tags,
        std::collections::HashSet::from(["old".to_string(), "new".to_string()])
    );
}
