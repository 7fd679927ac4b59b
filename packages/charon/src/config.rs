//! Process-wide configuration.
//!
//! Charon is embedded in a DCC host, so there is no interactive config file;
//! everything is sourced from the environment (set by whatever launches the
//! host process) with CLI overrides available to the `charon` binary for
//! manual exercising.

use bon::Builder;
use color_eyre::{Result, eyre::Context};
use derive_more::Debug;

use crate::path::{AbsDirPath, AbsFilePath};

/// Default cache memory budget, in megabytes, when `CHARON_CACHE_MEMORY_MB`
/// is unset.
pub const DEFAULT_CACHE_MEMORY_MB: u64 = 64;

/// Configuration assembled from environment variables, with optional
/// explicit overrides (used by the `charon` binary's CLI flags).
#[derive(Clone, Debug, Builder)]
pub struct CharonConfig {
    /// Root of the shared workflow repository (`CHARON_REPO_ROOT`).
    pub repo_root: String,

    /// Root of the per-user preferences/mirror directory
    /// (`CHARON_USER_PREFS_ROOT`).
    pub user_prefs_root: AbsDirPath,

    /// Shared, read-only model repository root, typically a UNC path
    /// (`CHARON_SHARED_MODELS_ROOT`).
    pub shared_models_root: Option<String>,

    /// Root of the local ComfyUI installation (`CHARON_COMFY_DIR`).
    pub comfy_dir: Option<AbsDirPath>,

    /// Memory budget for the cache store, in megabytes
    /// (`CHARON_CACHE_MEMORY_MB`).
    #[builder(default = DEFAULT_CACHE_MEMORY_MB)]
    pub cache_memory_mb: u64,

    /// Path to the browser-driven custom-node registry probe script
    /// (`CHARON_NODE_REGISTRY_PROBE_SCRIPT`).
    pub node_registry_probe_script: Option<AbsFilePath>,

    /// Path to the authoritative in-process model-path resolver script
    /// (`CHARON_MODEL_RESOLVER_SCRIPT`).
    pub model_resolver_script: Option<AbsFilePath>,
}

impl CharonConfig {
    /// Build configuration from the process environment, falling back to
    /// `fs::user_prefs_root` for the mirror location if unset.
    pub async fn from_env() -> Result<Self> {
        let repo_root =
            std::env::var("CHARON_REPO_ROOT").context("CHARON_REPO_ROOT is not set")?;

        let user_prefs_root = match std::env::var("CHARON_USER_PREFS_ROOT") {
            Ok(dir) => AbsDirPath::try_from(dir).context("parse CHARON_USER_PREFS_ROOT")?,
            Err(_) => crate::fs::user_prefs_root()
                .await
                .context("determine default user preferences root")?,
        };

        let shared_models_root = std::env::var("CHARON_SHARED_MODELS_ROOT").ok();

        let comfy_dir = match std::env::var("CHARON_COMFY_DIR") {
            Ok(dir) => Some(AbsDirPath::try_from(dir).context("parse CHARON_COMFY_DIR")?),
            Err(_) => None,
        };

        let cache_memory_mb = std::env::var("CHARON_CACHE_MEMORY_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CACHE_MEMORY_MB);

        let node_registry_probe_script = match std::env::var("CHARON_NODE_REGISTRY_PROBE_SCRIPT") {
            Ok(path) => Some(AbsFilePath::try_from(path).context("parse CHARON_NODE_REGISTRY_PROBE_SCRIPT")?),
            Err(_) => None,
        };

        let model_resolver_script = match std::env::var("CHARON_MODEL_RESOLVER_SCRIPT") {
            Ok(path) => Some(AbsFilePath::try_from(path).context("parse CHARON_MODEL_RESOLVER_SCRIPT")?),
            Err(_) => None,
        };

        Ok(Self {
            repo_root,
            user_prefs_root,
            shared_models_root,
            comfy_dir,
            cache_memory_mb,
            node_registry_probe_script,
            model_resolver_script,
        })
    }

    /// The local mirror root, `<user-pref-root>/Charon_repo_local/workflow/`.
    pub fn mirror_root(&self) -> Result<AbsDirPath> {
        use crate::path::TryJoinWith as _;
        self.user_prefs_root
            .try_join_dirs(["Charon_repo_local", "workflow"])
    }
}
