use charon_core::path::AbsDirPath;
use tempfile::TempDir;

pub mod browse_and_prefetch;
pub mod cache_eviction;
pub mod custom_node_resolution;
pub mod metadata_invalidation;
pub mod model_resolution;
pub mod source_drift;

/// A fresh temporary directory plus its typed absolute path. The `TempDir`
/// guard must stay alive for as long as the path is used.
#[track_caller]
pub fn temporary_directory() -> (TempDir, AbsDirPath) {
    let dir = TempDir::new().expect("create temporary directory");
    let path = AbsDirPath::try_from(dir.path().to_path_buf()).expect("read temp dir as abs dir");
    (dir, path)
}

/// Write `value` as pretty JSON to `path`, creating parent directories first.
pub fn write_json(path: &std::path::Path, value: &serde_json::Value) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}
