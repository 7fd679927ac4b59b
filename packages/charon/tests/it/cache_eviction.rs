//! End-to-end "cache eviction" scenario: prefetching a repository with many
//! workflow folders under a tight memory cap must keep the estimated memory
//! bounded close to the cap while the most recently touched folder survives.

use charon_core::{cache::CacheStore, prefetch::prefetch_folder};

use crate::temporary_directory;

#[tokio::test]
async fn prefetching_many_folders_under_tight_cap_stays_bounded_and_keeps_hot_folder() {
    let (_root, base) = temporary_directory();

    for i in 0..40 {
        let wf_dir = base.as_std_path().join(format!("wf-{i:02}")).join("inner");
        std::fs::create_dir_all(&wf_dir).unwrap();
        std::fs::write(wf_dir.join("workflow.json"), "{}").unwrap();
    }

    // A cap tiny enough that prefetching 40 folders' worth of entries must
    // trigger multiple eviction passes; a hot-folder capacity small enough
    // that only the most recently touched few are protected from eviction.
    let cache = CacheStore::new(0, 5);

    for i in 0..40 {
        let folder = base.as_std_path().join(format!("wf-{i:02}"));
        let folder = charon_core::path::AbsDirPath::try_from(folder).unwrap();
        prefetch_folder(&folder, &cache).await.unwrap();
    }

    let stats = cache.get_stats();
    // The folder/tag tiers stay bounded near the hot-folder capacity across
    // 40 inserts under a zero-byte cap, since every non-hot entry is subject
    // to eviction; only the handful of currently-hot folders survive.
    assert!(stats.folder_entries <= 5, "{stats:?}");
    assert!(stats.tag_entries <= 5, "{stats:?}");

    // The last-touched folder is hot and must have survived every eviction
    // pass along the way.
    let last_folder_path = base.as_std_path().join("wf-39").to_string_lossy().to_string();
    assert!(cache.get_hot_folders().contains(&last_folder_path));
    assert!(cache.get_folder_contents(&last_folder_path).is_some());
}
