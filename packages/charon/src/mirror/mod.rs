//! Per-user local mirror of workflow folders: validated payload, state, and
//! validation artifacts, invalidated automatically when the shared source
//! drifts.

use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    fs, hash,
    path::{AbsDirPath, AbsFilePath, RelativeTo as _, TryJoinWith as _},
};

const VALIDATED_FILENAME: &str = "workflow_validated.json";
const STATE_FILENAME: &str = "workflow_state.json";
const CACHE_SUBDIR: &str = ".charon_cache";
const VALIDATION_SUBDIR: &str = "validation";
const RAW_RESULT_FILENAME: &str = "validation_result_raw.json";
const RESOLVE_LOG_FILENAME: &str = "validation_resolve_log.json";
const NODE_INSTALL_LOG_FILENAME: &str = "validation_node_install_log.json";

/// Persisted per-workflow mirror state (`workflow_state.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub source_hash: Option<String>,
    pub source_path: Option<String>,
    pub local_path: Option<String>,
    #[serde(default)]
    pub validated: bool,
    pub validated_hash: Option<String>,
    pub validated_at: Option<u64>,
    pub last_synced_at: Option<u64>,
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The per-user local mirror. Owns everything under
/// `<user-pref-root>/Charon_repo_local/workflow/`.
#[derive(Clone, Debug)]
pub struct LocalMirror {
    root: AbsDirPath,
    repo_root: String,
}

impl LocalMirror {
    pub fn new(root: AbsDirPath, repo_root: impl Into<String>) -> Self {
        Self {
            root,
            repo_root: repo_root.into(),
        }
    }

    /// Compute the local directory for a workflow given its absolute path
    /// under the configured repository root.
    fn local_dir_for(&self, remote_folder: &str) -> Result<AbsDirPath> {
        let relative = hash::relative_to_repo_root(&self.repo_root, remote_folder)
            .context("map remote folder to repository-relative path")?;
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        self.root.try_join_dirs(segments)
    }

    fn state_path(local_dir: &AbsDirPath) -> Result<AbsFilePath> {
        local_dir.try_join_file(STATE_FILENAME)
    }

    fn validated_path(local_dir: &AbsDirPath) -> Result<AbsFilePath> {
        local_dir.try_join_file(VALIDATED_FILENAME)
    }

    fn cache_subtree(local_dir: &AbsDirPath) -> Result<AbsDirPath> {
        local_dir.try_join_dir(CACHE_SUBDIR)
    }

    fn raw_result_path(local_dir: &AbsDirPath) -> Result<AbsFilePath> {
        local_dir
            .try_join_dir(CACHE_SUBDIR)?
            .try_join_dir(VALIDATION_SUBDIR)?
            .try_join_file(RAW_RESULT_FILENAME)
    }

    fn resolve_log_path(local_dir: &AbsDirPath) -> Result<AbsFilePath> {
        local_dir
            .try_join_dir(CACHE_SUBDIR)?
            .try_join_dir(VALIDATION_SUBDIR)?
            .try_join_file(RESOLVE_LOG_FILENAME)
    }

    fn node_install_log_path(local_dir: &AbsDirPath) -> Result<AbsFilePath> {
        local_dir
            .try_join_dir(CACHE_SUBDIR)?
            .try_join_dir(VALIDATION_SUBDIR)?
            .try_join_file(NODE_INSTALL_LOG_FILENAME)
    }

    async fn load_state(local_dir: &AbsDirPath) -> Result<WorkflowState> {
        let path = Self::state_path(local_dir)?;
        match fs::read_buffered_utf8(&path).await? {
            Some(content) => {
                serde_json::from_str(&content).context("parse workflow_state.json")
            }
            None => Ok(WorkflowState::default()),
        }
    }

    async fn persist_state(local_dir: &AbsDirPath, state: &WorkflowState) -> Result<()> {
        let path = Self::state_path(local_dir)?;
        let content = serde_json::to_vec_pretty(state).context("serialize workflow state")?;
        fs::write_atomic(&path, content).await
    }

    /// Synchronize a freshly-read shared payload into the local mirror,
    /// invalidating the cached validation subtree if the source has drifted.
    #[instrument(skip(self, payload))]
    pub async fn synchronize_remote_payload(
        &self,
        remote_folder: &str,
        payload: &serde_json::Value,
        source_path: &str,
    ) -> Result<(AbsDirPath, WorkflowState)> {
        let local_dir = self.local_dir_for(remote_folder)?;
        fs::create_dir_all(&local_dir).await?;

        let new_source_hash = hash::compute_workflow_hash(payload)?;
        let mut state = Self::load_state(&local_dir).await?;
        let validated_path = Self::validated_path(&local_dir)?;

        let drifted = state.source_hash.as_deref() != Some(new_source_hash.as_str());
        if drifted {
            debug!(target: "charon::system", ?remote_folder, "source drift detected, purging local cache");
            state.validated = false;
            state.validated_hash = None;
            state.validated_at = None;
            fs::remove_dir_all(&Self::cache_subtree(&local_dir)?).await?;
            let content = serde_json::to_vec_pretty(payload).context("serialize payload")?;
            fs::write_atomic(&validated_path, content).await?;
        } else if !fs::exists(validated_path.as_std_path()).await {
            let content = serde_json::to_vec_pretty(payload).context("serialize payload")?;
            fs::write_atomic(&validated_path, content).await?;
        }

        state.source_hash = Some(new_source_hash);
        state.source_path = Some(source_path.to_string());
        state.local_path = Some(local_dir.as_str_lossy().to_string());
        state.last_synced_at = Some(now_epoch());

        Self::persist_state(&local_dir, &state).await?;
        Ok((local_dir, state))
    }

    /// Commit a validated (possibly override-rewritten) payload. This is the
    /// only path that flips `validated` to `true`.
    #[instrument(skip(self, payload))]
    pub async fn mark_validated_workflow(
        &self,
        remote_folder: &str,
        payload: &serde_json::Value,
    ) -> Result<WorkflowState> {
        let local_dir = self.local_dir_for(remote_folder)?;
        fs::create_dir_all(&local_dir).await?;

        let validated_path = Self::validated_path(&local_dir)?;
        let content = serde_json::to_vec_pretty(payload).context("serialize payload")?;
        fs::write_atomic(&validated_path, content).await?;

        let validated_hash = hash::compute_workflow_hash(payload)?;
        let mut state = Self::load_state(&local_dir).await?;
        state.validated = true;
        state.validated_hash = Some(validated_hash);
        state.validated_at = Some(now_epoch());
        state.local_path = Some(local_dir.as_str_lossy().to_string());

        Self::persist_state(&local_dir, &state).await?;
        Ok(state)
    }

    /// Remove the `.charon_cache/` subtree for a workflow, clearing the raw
    /// validation result and the resolve log.
    #[instrument(skip(self))]
    pub async fn purge_local_artifacts(&self, remote_folder: &str) -> Result<()> {
        let local_dir = self.local_dir_for(remote_folder)?;
        fs::remove_dir_all(&Self::cache_subtree(&local_dir)?).await
    }

    /// Persist the raw validation payload for a workflow.
    #[instrument(skip(self, raw))]
    pub async fn write_validation_result_raw(
        &self,
        remote_folder: &str,
        raw: &serde_json::Value,
    ) -> Result<()> {
        let local_dir = self.local_dir_for(remote_folder)?;
        let path = Self::raw_result_path(&local_dir)?;
        let content = serde_json::to_vec_pretty(raw).context("serialize raw validation result")?;
        fs::write_atomic(&path, content).await
    }

    /// Append an entry to the resolve log.
    #[instrument(skip(self, entry))]
    pub async fn append_resolve_log(
        &self,
        remote_folder: &str,
        entry: &serde_json::Value,
    ) -> Result<()> {
        let local_dir = self.local_dir_for(remote_folder)?;
        let path = Self::resolve_log_path(&local_dir)?;
        let mut log: Vec<serde_json::Value> = match fs::read_buffered_utf8(&path).await? {
            Some(content) => serde_json::from_str(&content).unwrap_or_default(),
            None => Vec::new(),
        };
        log.push(entry.clone());
        let content = serde_json::to_vec_pretty(&log).context("serialize resolve log")?;
        fs::write_atomic(&path, content).await
    }

    /// Read the resolve log for a workflow.
    #[instrument(skip(self))]
    pub async fn read_resolve_log(&self, remote_folder: &str) -> Result<Vec<serde_json::Value>> {
        let local_dir = self.local_dir_for(remote_folder)?;
        let path = Self::resolve_log_path(&local_dir)?;
        match fs::read_buffered_utf8(&path).await? {
            Some(content) => Ok(serde_json::from_str(&content).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Append an entry to the custom-node install log, recording the
    /// outcome of a batched Manager-UI install.
    #[instrument(skip(self, entry))]
    pub async fn append_node_install_log(
        &self,
        remote_folder: &str,
        entry: &serde_json::Value,
    ) -> Result<()> {
        let local_dir = self.local_dir_for(remote_folder)?;
        let path = Self::node_install_log_path(&local_dir)?;
        let mut log: Vec<serde_json::Value> = match fs::read_buffered_utf8(&path).await? {
            Some(content) => serde_json::from_str(&content).unwrap_or_default(),
            None => Vec::new(),
        };
        log.push(entry.clone());
        let content = serde_json::to_vec_pretty(&log).context("serialize node install log")?;
        fs::write_atomic(&path, content).await
    }

    /// Read the custom-node install log for a workflow.
    #[instrument(skip(self))]
    pub async fn read_node_install_log(&self, remote_folder: &str) -> Result<Vec<serde_json::Value>> {
        let local_dir = self.local_dir_for(remote_folder)?;
        let path = Self::node_install_log_path(&local_dir)?;
        match fs::read_buffered_utf8(&path).await? {
            Some(content) => Ok(serde_json::from_str(&content).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Enumerate every mirrored workflow's repository-relative path, used
    /// for cache-warming on startup.
    #[instrument(skip(self))]
    pub async fn list_mirrored(&self) -> Result<Vec<String>> {
        use futures::StreamExt as _;

        if !fs::is_dir(self.root.as_std_path()).await {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut files = fs::walk_files(&self.root);
        while let Some(file) = files.next().await {
            let file = file?;
            if file.file_name().and_then(|n| n.to_str()) != Some(STATE_FILENAME) {
                continue;
            }
            if let Some(parent) = file.parent()
                && let Ok(rel) = parent.relative_to(&self.root)
            {
                out.push(rel.as_str_lossy().to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}
