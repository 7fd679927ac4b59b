//! Validation orchestrator: ties together the environment check, the
//! custom-node probe, and the model resolver into one `ValidationResult`,
//! with cache-backed resume semantics.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::{
    cache::CacheStore,
    hash,
    mirror::LocalMirror,
    path::{AbsDirPath, AbsFilePath, TryJoinWith as _},
    resolve::{
        MissingPack, ResolveStatus,
        model::{ModelTransferManager, extract_model_references, resolve_reference, resolve_via_authoritative_script},
        node::{
            InstallNodesResponse, build_missing_packs, extract_node_aux_ids, extract_required_node_classes,
            install_missing_packs, list_installed_node_folders, probe_registry,
        },
        override_writer::ResolveLogEntry,
    },
};

/// Staleness horizon for a cached validation result.
pub const VALIDATION_RESULT_TTL_SECONDS: u64 = 900;

/// One category's outcome within a [`ValidationResult`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub key: String,
    pub label: String,
    pub ok: bool,
    pub summary: String,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub data: Value,
}

/// The outcome of one `validate_comfy_environment` run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationResult {
    pub comfy_path: String,
    pub issues: Vec<ValidationIssue>,
    pub workflow_folder: String,
    pub workflow_name: String,
    pub started_at: u64,
    pub finished_at: u64,
    pub cache_key: String,
    pub used_cache: bool,
}

impl ValidationResult {
    pub fn ok(&self) -> bool {
        self.issues.iter().all(|i| i.ok)
    }

    /// Whether this result is older than `ttl`, measured from `finished_at`.
    pub fn is_stale(&self, ttl_seconds: u64, now: u64) -> bool {
        now.saturating_sub(self.finished_at) > ttl_seconds
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Bundle of everything the orchestrator needs about the workflow under
/// validation; the GUI/host layer is responsible for assembling this.
pub struct WorkflowBundle {
    pub remote_folder: String,
    pub workflow_folder: String,
    pub workflow_name: String,
    pub payload: Value,
}

/// Flags controlling one `validate_comfy_environment` run.
#[derive(Clone, Debug, Default)]
pub struct ValidateOptions {
    /// Reuse a fresh (non-stale) cached result instead of re-running.
    pub use_cache: bool,
    /// Bypass the cache even if `use_cache` is set.
    pub force: bool,
    /// Whether to include the ComfyUI environment sanity check.
    pub include_environment: bool,
    /// Path to the browser-driven custom-node registry probe script. If
    /// unset, custom-node resolution falls back to metadata/installed-folder
    /// matching against whatever classes the payload itself references,
    /// without a live "what does the Manager consider missing" check.
    pub node_registry_probe_script: Option<AbsFilePath>,
    /// Path to the authoritative in-process model-path resolver script
    /// (runs inside the ComfyUI embedded interpreter). If unset, or if the
    /// subprocess fails, model resolution falls back to the pure filesystem
    /// resolver per the retry/partial-failure policy.
    pub model_resolver_script: Option<AbsFilePath>,
}

/// Cache key under which a `ValidationResult` is stored in the general
/// cache tier, keyed by normalized `comfy_path`.
pub fn cache_key_for(comfy_path: &str) -> String {
    format!("validation_result:{}", hash::cache_key_for_path(comfy_path))
}

/// Fetch the last persisted result for `comfy_path`, if any.
#[instrument(skip(cache))]
pub fn get_cached_result(cache: &CacheStore, comfy_path: &str) -> Option<ValidationResult> {
    let key = cache_key_for(comfy_path);
    cache
        .get_cached_data(&key, None)
        .and_then(|v| serde_json::from_value(v).ok())
}

fn environment_issue(comfy_dir: &AbsDirPath, python_exe: &AbsFilePath) -> ValidationIssue {
    let comfy_ok = comfy_dir.as_std_path().exists();
    let python_ok = python_exe.as_std_path().exists();
    let ok = comfy_ok && python_ok;
    let mut details = Vec::new();
    if !comfy_ok {
        details.push(format!("ComfyUI directory not found: {comfy_dir}"));
    }
    if !python_ok {
        details.push(format!("embedded interpreter not found: {python_exe}"));
    }

    ValidationIssue {
        key: "environment".to_string(),
        label: "ComfyUI Environment".to_string(),
        ok,
        summary: if ok {
            "ComfyUI environment looks correct".to_string()
        } else {
            "ComfyUI environment is misconfigured".to_string()
        },
        details,
        data: serde_json::json!({
            "comfy_dir": comfy_dir.as_str_lossy(),
            "python_exe": python_exe.as_str_lossy(),
        }),
    }
}

/// Run the custom-node probe and compose its issue: the live browser-driven
/// registry probe if configured, else the pure metadata/installed-folder
/// strategies against whatever classes the payload itself references.
///
/// `data.attempts`, keyed by repo, counts how many validation runs in a row
/// have found that repo still unresolved, per the node install log — the
/// same "distinct from resolve_status" counter the model resolver keeps.
#[instrument(skip(comfy_dir, bundle, mirror, options))]
async fn run_custom_node_validation(
    comfy_dir: &AbsDirPath,
    bundle: &WorkflowBundle,
    mirror: &LocalMirror,
    options: &ValidateOptions,
) -> Result<ValidationIssue> {
    let required_classes = extract_required_node_classes(&bundle.payload);
    let aux_ids = extract_node_aux_ids(&bundle.payload);
    let installed_folders = list_installed_node_folders(comfy_dir).await.unwrap_or_default();

    let classes: Vec<String> = required_classes.iter().cloned().collect();
    let missing_packs = match &options.node_registry_probe_script {
        Some(script) => {
            let probe = probe_registry(script, &classes, comfy_dir).await?;
            let missing: std::collections::HashSet<String> = probe.missing.into_iter().collect();
            let catalog: Vec<_> = probe.pack_meta.into_values().collect();
            build_missing_packs(
                &missing,
                &Default::default(),
                &catalog,
                &installed_folders,
                &Default::default(),
                &aux_ids,
            )
        }
        None => build_missing_packs(
            &required_classes,
            &Default::default(),
            &[],
            &installed_folders,
            &Default::default(),
            &aux_ids,
        ),
    };

    let node_ok = missing_packs.iter().all(|p| p.resolve_status.is_considered_resolved());
    debug!(target: "charon::system", missing = missing_packs.len(), "custom node validation complete");

    let install_log = mirror
        .read_node_install_log(&bundle.remote_folder)
        .await
        .unwrap_or_default();
    let attempts_by_repo: HashMap<String, u32> = missing_packs
        .iter()
        .map(|p| {
            let attempts = install_log
                .iter()
                .filter(|v| v.get("repo").and_then(Value::as_str) == Some(p.repo.as_str()))
                .count() as u32;
            (p.repo.clone(), attempts)
        })
        .collect();

    Ok(ValidationIssue {
        key: "custom_nodes".to_string(),
        label: "Custom Nodes".to_string(),
        ok: node_ok,
        summary: if missing_packs.is_empty() {
            "All required custom nodes are present".to_string()
        } else {
            format!("{} custom node package(s) need attention", missing_packs.len())
        },
        details: missing_packs
            .iter()
            .map(|p| format!("{}: {:?}", p.repo, p.resolve_status))
            .collect(),
        data: serde_json::json!({ "missing_packs": missing_packs, "attempts": attempts_by_repo }),
    })
}

/// The issue reported when the custom-node registry probe subprocess itself
/// fails (timeout, non-zero exit, malformed JSON): per the retry/partial-
/// failure policy, the issue is marked failed outright rather than silently
/// degrading to the metadata/installed-folder fallback.
fn node_probe_failed_issue(err: &color_eyre::Report) -> ValidationIssue {
    warn!(target: "charon::system", ?err, "custom node registry probe failed");
    ValidationIssue {
        key: "custom_nodes".to_string(),
        label: "Custom Nodes".to_string(),
        ok: false,
        summary: "Custom node registry probe failed".to_string(),
        details: vec![err.to_string()],
        data: serde_json::json!({ "missing_packs": Vec::<MissingPack>::new() }),
    }
}

/// Drive a batched custom-node install for every pack in `packs` that isn't
/// already resolved, recording per-repo `resolve_status`/`resolve_method`
/// in the mirror's node install log. Returns whether ComfyUI needs
/// restarting before the install takes effect, per §4.H's "restart ComfyUI"
/// call-to-action.
#[instrument(skip(mirror, packs))]
pub async fn install_missing_node_packs(
    script: &AbsFilePath,
    comfy_dir: &AbsDirPath,
    mirror: &LocalMirror,
    remote_folder: &str,
    packs: &[MissingPack],
) -> Result<bool> {
    let repos: Vec<String> = packs
        .iter()
        .filter(|p| !p.resolve_status.is_considered_resolved())
        .map(|p| p.repo.clone())
        .collect();

    if repos.is_empty() {
        return Ok(false);
    }

    let response: InstallNodesResponse = install_missing_packs(script, &repos, comfy_dir).await?;

    for outcome in &response.outcomes {
        mirror
            .append_node_install_log(remote_folder, &serde_json::to_value(outcome)?)
            .await?;
    }

    Ok(response.restart_required)
}

/// Run the full validation/resolution pipeline for one workflow.
///
/// If `options.use_cache` is set and a fresh (non-stale) cached result
/// exists, it's returned immediately with `used_cache = true`.
/// `options.force` bypasses that cache read (the result is still written
/// back either way).
#[instrument(skip(cache, mirror, transfers, bundle), fields(comfy_path = %comfy_dir))]
pub async fn validate_comfy_environment(
    comfy_dir: &AbsDirPath,
    python_exe: &AbsFilePath,
    bundle: &WorkflowBundle,
    cache: &CacheStore,
    mirror: &LocalMirror,
    transfers: &ModelTransferManager,
    options: ValidateOptions,
) -> Result<ValidationResult> {
    let comfy_path = comfy_dir.as_str_lossy().to_string();
    let cache_key = cache_key_for(&comfy_path);

    if options.use_cache
        && !options.force
        && let Some(mut cached) = get_cached_result(cache, &comfy_path)
        && !cached.is_stale(VALIDATION_RESULT_TTL_SECONDS, now_epoch())
    {
        cached.used_cache = true;
        return Ok(cached);
    }

    let started_at = now_epoch();
    let mut issues = Vec::new();

    if options.include_environment {
        issues.push(environment_issue(comfy_dir, python_exe));
    }

    issues.push(
        run_custom_node_validation(comfy_dir, bundle, mirror, &options)
            .await
            .unwrap_or_else(|err| node_probe_failed_issue(&err)),
    );

    // Model resolver.
    let references = extract_model_references(&bundle.payload);
    let existing_log = mirror.read_resolve_log(&bundle.remote_folder).await?;
    let existing_entries: Vec<ResolveLogEntry> = existing_log
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect();

    let authoritative_paths = match &options.model_resolver_script {
        Some(script) => match resolve_via_authoritative_script(script, &references, comfy_dir).await {
            Ok(paths) => paths,
            Err(err) => {
                debug!(target: "charon::system", ?err, "authoritative model resolver failed, falling back to filesystem resolver");
                HashMap::new()
            }
        },
        None => HashMap::new(),
    };

    let mut resolve_log_entries = Vec::new();
    let mut all_resolved = true;

    for reference in &references {
        let previous_attempts = existing_entries
            .iter()
            .find(|e| e.original == reference.name)
            .map(|e| e.attempts)
            .unwrap_or(0);

        let outcome = if let Some(path) = authoritative_paths.get(&reference.name) {
            crate::resolve::model::ResolveOutcome {
                status: ResolveStatus::Resolved,
                resolved_path: Some(path.clone()),
                method: "authoritative resolver".to_string(),
            }
        } else {
            match resolve_reference(reference, comfy_dir, None, None, transfers, || false).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(target: "charon::system", ?reference, ?err, "model resolution failed");
                    all_resolved = false;
                    resolve_log_entries.push(ResolveLogEntry {
                        original: reference.name.clone(),
                        category: reference.category.clone(),
                        status: ResolveStatus::Failed,
                        resolved_path: None,
                        method: err.to_string(),
                        attempts: previous_attempts + 1,
                    });
                    continue;
                }
            }
        };

        if !outcome.status.is_considered_resolved() {
            all_resolved = false;
        }

        resolve_log_entries.push(ResolveLogEntry {
            original: reference.name.clone(),
            category: reference.category.clone(),
            status: outcome.status,
            resolved_path: outcome.resolved_path.clone(),
            method: outcome.method.clone(),
            attempts: if outcome.status.is_considered_resolved() {
                previous_attempts
            } else {
                previous_attempts + 1
            },
        });
    }

    // Merge with whatever the resolve log already recorded, so a previously
    // resolved entry that the fresh pass didn't touch still counts.
    for entry in existing_entries {
        if entry.status.is_considered_resolved()
            && !resolve_log_entries.iter().any(|e| e.original == entry.original)
        {
            resolve_log_entries.push(entry);
        }
    }

    for entry in &resolve_log_entries {
        mirror
            .append_resolve_log(&bundle.remote_folder, &serde_json::to_value(entry)?)
            .await?;
    }

    let attempts_by_name: HashMap<&str, u32> = resolve_log_entries
        .iter()
        .map(|e| (e.original.as_str(), e.attempts))
        .collect();

    issues.push(ValidationIssue {
        key: "models".to_string(),
        label: "Model Files".to_string(),
        ok: all_resolved,
        summary: if all_resolved {
            "All referenced models are resolved".to_string()
        } else {
            "Some referenced models could not be resolved".to_string()
        },
        details: resolve_log_entries
            .iter()
            .map(|e| format!("{}: {:?} ({})", e.original, e.status, e.method))
            .collect(),
        data: serde_json::json!({ "resolved": resolve_log_entries, "attempts": attempts_by_name }),
    });

    let finished_at = now_epoch();
    let result = ValidationResult {
        comfy_path: comfy_path.clone(),
        issues,
        workflow_folder: bundle.workflow_folder.clone(),
        workflow_name: bundle.workflow_name.clone(),
        started_at,
        finished_at,
        cache_key: cache_key_for_path_display(&comfy_path),
        used_cache: false,
    };

    cache.cache_data(&cache_key, serde_json::to_value(&result)?, None);
    write_debug_artifact(&comfy_path, &result).await.ok();

    Ok(result)
}

fn cache_key_for_path_display(comfy_path: &str) -> String {
    hash::cache_key_for_path(comfy_path)
}

async fn write_debug_artifact(comfy_path: &str, result: &ValidationResult) -> Result<()> {
    let dir = crate::fs::user_prefs_root().await?.try_join_dir("debug")?;
    crate::fs::create_dir_all(&dir).await?;
    let filename = format!("validation_{}.json", hash::cache_key_for_path(comfy_path));
    let path = dir.try_join_file(filename)?;
    let content = serde_json::to_vec_pretty(result)?;
    crate::fs::write_atomic(&path, content).await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn reports_ok_when_no_nodes_or_models_referenced() {
        let dir = tempdir().unwrap();
        let comfy_dir = AbsDirPath::try_from(dir.path().join("comfy")).unwrap();
        std::fs::create_dir_all(comfy_dir.as_std_path()).unwrap();
        let python_exe = comfy_dir.try_join_file("python").unwrap();
        std::fs::write(python_exe.as_std_path(), b"").unwrap();

        let cache = CacheStore::with_memory_cap_mb(64);
        let mirror_root = AbsDirPath::try_from(dir.path().join("mirror")).unwrap();
        let mirror = LocalMirror::new(mirror_root, dir.path().to_string_lossy().to_string());
        let transfers = ModelTransferManager::new();

        let bundle = WorkflowBundle {
            remote_folder: dir.path().join("wf").to_string_lossy().to_string(),
            workflow_folder: "wf".to_string(),
            workflow_name: "wf".to_string(),
            payload: json!({"nodes": []}),
        };

        let result = validate_comfy_environment(
            &comfy_dir,
            &python_exe,
            &bundle,
            &cache,
            &mirror,
            &transfers,
            ValidateOptions {
                include_environment: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(result.ok());
        assert!(!result.used_cache);
    }

    #[tokio::test]
    async fn environment_issue_fails_when_paths_missing() {
        let dir = tempdir().unwrap();
        let comfy_dir = AbsDirPath::try_from(dir.path().join("missing-comfy")).unwrap();
        let python_exe = comfy_dir.try_join_file("python").unwrap();

        let cache = CacheStore::with_memory_cap_mb(64);
        let mirror_root = AbsDirPath::try_from(dir.path().join("mirror")).unwrap();
        let mirror = LocalMirror::new(mirror_root, dir.path().to_string_lossy().to_string());
        let transfers = ModelTransferManager::new();

        let bundle = WorkflowBundle {
            remote_folder: dir.path().join("wf").to_string_lossy().to_string(),
            workflow_folder: "wf".to_string(),
            workflow_name: "wf".to_string(),
            payload: json!({}),
        };

        let result = validate_comfy_environment(
            &comfy_dir,
            &python_exe,
            &bundle,
            &cache,
            &mirror,
            &transfers,
            ValidateOptions {
                include_environment: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(!result.ok());
        assert!(!result.issues[0].ok);
    }

    #[test]
    fn cached_result_round_trips_and_reports_used_cache() {
        let cache = CacheStore::with_memory_cap_mb(64);
        let result = ValidationResult {
            comfy_path: "/comfy".to_string(),
            issues: vec![],
            workflow_folder: "wf".to_string(),
            workflow_name: "wf".to_string(),
            started_at: 0,
            finished_at: now_epoch(),
            cache_key: hash::cache_key_for_path("/comfy"),
            used_cache: false,
        };
        cache.cache_data(
            &cache_key_for("/comfy"),
            serde_json::to_value(&result).unwrap(),
            None,
        );

        let fetched = get_cached_result(&cache, "/comfy").unwrap();
        assert_eq!(fetched.comfy_path, "/comfy");
        assert!(!fetched.is_stale(VALIDATION_RESULT_TTL_SECONDS, now_epoch()));
    }
}
