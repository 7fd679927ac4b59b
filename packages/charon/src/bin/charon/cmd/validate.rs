use std::path::PathBuf;

use charon_core::{
    cache::CacheStore,
    fs,
    mirror::LocalMirror,
    path::{AbsDirPath, AbsFilePath, TryJoinWith as _},
    resolve::model::ModelTransferManager,
    validate::{ValidateOptions, WorkflowBundle, validate_comfy_environment},
};
use clap::Args;
use color_eyre::{Result, eyre::Context};

#[derive(Clone, Debug, Args)]
pub struct Opts {
    /// Absolute path to the ComfyUI installation to validate against.
    pub comfy_dir: PathBuf,

    /// Path to the embedded Python interpreter used by ComfyUI.
    pub python_exe: PathBuf,

    /// Path to the workflow JSON payload to validate.
    pub workflow: PathBuf,

    /// Reuse a fresh (non-stale) cached result instead of re-running.
    #[arg(long, default_value_t = false)]
    pub use_cache: bool,

    /// Bypass the cache even if `--use-cache` is set.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Skip the ComfyUI environment sanity check.
    #[arg(long, default_value_t = false)]
    pub skip_environment_check: bool,

    /// Path to the browser-driven custom-node registry probe script.
    #[arg(long)]
    pub node_registry_probe_script: Option<PathBuf>,

    /// Path to the authoritative in-process model-path resolver script.
    #[arg(long)]
    pub model_resolver_script: Option<PathBuf>,
}

pub async fn exec(opts: Opts) -> Result<()> {
    let comfy_dir = AbsDirPath::try_from(opts.comfy_dir)?;
    let python_exe = AbsFilePath::try_from(opts.python_exe)?;

    let payload_text = tokio::fs::read_to_string(&opts.workflow)
        .await
        .context("read workflow payload")?;
    let payload: serde_json::Value = serde_json::from_str(&payload_text).context("parse workflow payload as json")?;

    let remote_folder = opts.workflow.to_string_lossy().to_string();
    let workflow_name = opts
        .workflow
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "workflow".to_string());

    let mirror_root = fs::user_prefs_root().await?.try_join_dir("Charon_cache")?;
    fs::create_dir_all(&mirror_root).await?;
    let mirror = LocalMirror::new(mirror_root, comfy_dir.as_str_lossy().to_string());

    let cache = CacheStore::with_memory_cap_mb(256);
    let transfers = ModelTransferManager::new();

    let bundle = WorkflowBundle {
        remote_folder: remote_folder.clone(),
        workflow_folder: remote_folder,
        workflow_name,
        payload,
    };

    let result = validate_comfy_environment(
        &comfy_dir,
        &python_exe,
        &bundle,
        &cache,
        &mirror,
        &transfers,
        ValidateOptions {
            use_cache: opts.use_cache,
            force: opts.force,
            include_environment: !opts.skip_environment_check,
            node_registry_probe_script: opts
                .node_registry_probe_script
                .map(AbsFilePath::try_from)
                .transpose()?,
            model_resolver_script: opts
                .model_resolver_script
                .map(AbsFilePath::try_from)
                .transpose()?,
        },
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
