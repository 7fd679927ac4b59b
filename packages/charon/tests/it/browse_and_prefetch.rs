//! End-to-end "fresh folder browse" scenario: the lister produces a folder
//! list and compatibility map, then the prefetcher warms every cache tier
//! for the same base path, and a second browse reads entirely from cache.

use std::sync::atomic::AtomicBool;

use charon_core::{
    cache::CacheStore,
    lister::{AlwaysCompatible, CancelToken, UserContext, list},
    prefetch::prefetch_all_folders,
};

use crate::{temporary_directory, write_json};

#[tokio::test]
async fn browse_then_prefetch_warms_every_subfolder() {
    let (_root, base) = temporary_directory();

    // Two top-level folders, each holding one workflow.
    for (folder, tags) in [("alpha", vec!["a"]), ("beta", vec!["b", "c"])] {
        let wf_dir = base.as_std_path().join(folder).join("wf");
        std::fs::create_dir_all(&wf_dir).unwrap();
        std::fs::write(wf_dir.join("workflow.json"), "{}").unwrap();
        write_json(&wf_dir.join(".charon.json"), &serde_json::json!({ "tags": tags }));
    }

    let cache = CacheStore::with_memory_cap_mb(64);
    let cancel = CancelToken::new();
    let mut seen_folders = Vec::new();

    let compat = list(
        &base,
        "main",
        &cache,
        UserContext::default(),
        &AlwaysCompatible,
        &cancel,
        |folders| seen_folders = folders.to_vec(),
    )
    .await
    .unwrap();

    assert_eq!(seen_folders, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(compat.len(), 2);
    assert!(compat.iter().all(|(_, ok)| *ok));

    // Before prefetch, per-folder tags are still cold.
    let alpha_path = base.as_std_path().join("alpha").to_string_lossy().to_string();
    assert!(cache.get_folder_tags(&alpha_path).is_none());

    let shutdown = AtomicBool::new(false);
    prefetch_all_folders(&base, "main", &cache, &shutdown).await.unwrap();

    for (folder, expected_tags) in [("alpha", ["a"].as_slice()), ("beta", ["b", "c"].as_slice())] {
        let folder_path = base.as_std_path().join(folder).to_string_lossy().to_string();
        assert!(cache.get_folder_contents(&folder_path).is_some());
        let tags = cache.get_folder_tags(&folder_path).expect("tags cached by prefetch");
        for tag in expected_tags {
            assert!(tags.contains(*tag));
        }
        let workflow_subdir = format!("{folder_path}/wf");
        let record = cache
            .get_script_validation(&workflow_subdir)
            .expect("prefetch validates each nested workflow folder");
        assert!(record.has_entry);
    }

    // Browsing again must not need to touch the filesystem: removing the
    // base directory and re-listing still returns the cached result.
    std::fs::remove_dir_all(base.as_std_path()).unwrap();
    let mut seen_again = Vec::new();
    let compat_again = list(
        &base,
        "main",
        &cache,
        UserContext::default(),
        &AlwaysCompatible,
        &cancel,
        |folders| seen_again = folders.to_vec(),
    )
    .await
    .unwrap();
    assert_eq!(seen_again, seen_folders);
    assert_eq!(compat_again.len(), 2);
}
