//! Model file extraction, search, and resolution (copy/download), plus the
//! process-wide transfer manager coordinating concurrent resolves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use color_eyre::{Result, eyre::Context};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tap::Pipe;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{instrument, trace, warn};

use crate::{
    fs,
    path::{AbsDirPath, AbsFilePath, TryJoinWith as _},
    resolve::{ModelReference, ResolveStatus},
};

/// Extensions recognized as model files.
const MODEL_EXTENSIONS: &[&str] = &[
    ".ckpt",
    ".safetensors",
    ".pth",
    ".pt",
    ".bin",
    ".onnx",
    ".yaml",
];

/// 4 MiB chunk size for copying model blobs, matching the spec's progress
/// granularity.
const COPY_CHUNK_BYTES: usize = 4 * 1024 * 1024;

fn has_model_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    MODEL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Infer the ComfyUI model category directory for a reference, from its
/// owning node's class/type and its filename.
pub fn infer_category(node_type: &str, _name: &str) -> String {
    let lower = node_type.to_lowercase();
    if lower.contains("unet") || lower.contains("diffusion") {
        "diffusion_models"
    } else if lower.contains("lora") {
        "loras"
    } else if lower.contains("vae") {
        "vae"
    } else if lower.contains("clip") {
        "clip"
    } else if lower.contains("checkpoint") || lower.contains("ckpt") {
        "checkpoints"
    } else if lower.contains("controlnet") {
        "controlnet"
    } else if lower.contains("upscale") {
        "upscale_models"
    } else {
        "other"
    }
    .to_string()
}

fn collect_string_candidates(node_type: &str, node: &Value, out: &mut Vec<ModelReference>) {
    if let Some(widgets) = node.get("widgets_values").and_then(Value::as_array) {
        for value in widgets {
            if let Some(s) = value.as_str()
                && has_model_extension(s)
            {
                out.push(ModelReference {
                    name: s.to_string(),
                    category: infer_category(node_type, s),
                    node_type: node_type.to_string(),
                });
            }
        }
    }

    match node.get("inputs") {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(s) = item.get("default").and_then(Value::as_str)
                    && has_model_extension(s)
                {
                    out.push(ModelReference {
                        name: s.to_string(),
                        category: infer_category(node_type, s),
                        node_type: node_type.to_string(),
                    });
                }
            }
        }
        Some(Value::Object(map)) => {
            for value in map.values() {
                if let Some(s) = value.as_str()
                    && has_model_extension(s)
                {
                    out.push(ModelReference {
                        name: s.to_string(),
                        category: infer_category(node_type, s),
                        node_type: node_type.to_string(),
                    });
                }
            }
        }
        _ => {}
    }
}

/// Walk every node in a workflow payload, supporting both the array-of-nodes
/// (UI) and id→node (API) shapes, extracting and deduping model references.
#[instrument(skip(payload))]
pub fn extract_model_references(payload: &Value) -> Vec<ModelReference> {
    let mut refs = Vec::new();

    if let Some(nodes) = payload.get("nodes").and_then(Value::as_array) {
        for node in nodes {
            let node_type = node
                .get("type")
                .or_else(|| node.get("class_type"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            collect_string_candidates(node_type, node, &mut refs);
        }
    } else if let Some(map) = payload.as_object() {
        for node in map.values() {
            let node_type = node
                .get("class_type")
                .or_else(|| node.get("type"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            collect_string_candidates(node_type, node, &mut refs);
        }
    }

    let mut seen = HashSet::new();
    refs.retain(|r| seen.insert((r.name.to_lowercase(), r.category.clone())));
    refs
}

/// Search for a reference already on disk, following the spec's ordered
/// lookup rules (steps 1–6, minus the authoritative in-process resolver,
/// which is a separate subprocess contract — see [`crate::subprocess`]).
#[instrument(skip(reference))]
pub async fn search_path(
    reference: &ModelReference,
    comfy_dir: &AbsDirPath,
) -> Result<Option<AbsFilePath>> {
    // 1. Absolute and exists.
    if let Ok(abs) = AbsFilePath::try_from(reference.name.as_str())
        && fs::is_file(abs.as_std_path()).await
    {
        return Ok(Some(abs));
    }

    // 2. Under comfy dir with the normalized relative path.
    let normalized_rel = reference.name.replace('\\', "/");
    let segments: Vec<&str> = normalized_rel.split('/').filter(|s| !s.is_empty()).collect();
    if let Some((file, dirs)) = segments.split_last()
        && let Ok(candidate) = comfy_dir.try_join_combined(dirs.iter().copied(), *file)
        && fs::is_file(candidate.as_std_path()).await
    {
        return Ok(Some(candidate));
    }

    let models_root = comfy_dir.try_join_dir("models")?;

    // 3. Strip a leading `models/` component and retry under `<comfy>/models/`.
    if let Some(pos) = segments.iter().position(|s| *s == "models") {
        let rest = &segments[pos + 1..];
        if let Some((file, dirs)) = rest.split_last()
            && let Ok(candidate) = models_root.try_join_combined(dirs.iter().copied(), *file)
            && fs::is_file(candidate.as_std_path()).await
        {
            return Ok(Some(candidate));
        }
    }

    let base = basename(&reference.name);

    // 4. `<comfy>/models/<category>/<basename>`.
    if let Ok(candidate) = models_root.try_join_combined([reference.category.as_str()], base)
        && fs::is_file(candidate.as_std_path()).await
    {
        return Ok(Some(candidate));
    }

    // 5. `<comfy>/models/<basename>`.
    if let Ok(candidate) = models_root.try_join_file(base)
        && fs::is_file(candidate.as_std_path()).await
    {
        return Ok(Some(candidate));
    }

    // 6. Shallow index of `<comfy>/models/` (depth <= 3), lookup by lowercased
    // basename.
    find_in_shallow_index(&models_root, base).await
}

/// Build a depth-bounded index of `root` and find a file matching
/// `basename` case-insensitively.
async fn find_in_shallow_index(root: &AbsDirPath, basename: &str) -> Result<Option<AbsFilePath>> {
    use futures::StreamExt as _;

    if !fs::is_dir(root.as_std_path()).await {
        return Ok(None);
    }

    let target = basename.to_lowercase();
    let mut files = fs::walk_dirs_bounded(root, 3);
    while let Some(file) = files.next().await {
        let file = file?;
        if let Some(name) = file.file_name().and_then(|n| n.to_str())
            && name.to_lowercase() == target
        {
            return Ok(Some(file));
        }
    }
    Ok(None)
}

/// Search a directory recursively (no depth bound) for a basename match;
/// used by the resolution pipeline against the local `models/` tree and the
/// shared model repository.
#[instrument]
async fn search_recursive(root: &AbsDirPath, basename: &str) -> Result<Option<AbsFilePath>> {
    use futures::StreamExt as _;

    if !fs::is_dir(root.as_std_path()).await {
        return Ok(None);
    }

    let target = basename.to_lowercase();
    let mut files = fs::walk_files(root);
    while let Some(file) = files.next().await {
        let file = file?;
        if let Some(name) = file.file_name().and_then(|n| n.to_str())
            && name.to_lowercase() == target
        {
            return Ok(Some(file));
        }
    }
    Ok(None)
}

/// Request payload for the authoritative in-process model-path resolver.
#[derive(Serialize)]
struct ModelResolverRequest<'a> {
    references: &'a [ModelReference],
}

/// The authoritative resolver's return shape: resolved absolute paths keyed
/// by the original reference name.
#[derive(Deserialize, Default)]
struct ModelResolverResponse {
    #[serde(default)]
    paths: HashMap<String, String>,
}

/// Run the authoritative model-path resolver: a subprocess inside the
/// ComfyUI embedded interpreter that imports `folder_paths` and calls its
/// `get_full_path`/`get_file_path`/folder-listing functions per category.
/// An entry whose resolved path doesn't end with the reference's own
/// (forward-slash-normalized) subpath is dropped — the authoritative
/// resolver disagreed about what the reference names, so the entry is left
/// for the filesystem resolver instead.
#[instrument(skip(references))]
pub async fn resolve_via_authoritative_script(
    script: &AbsFilePath,
    references: &[ModelReference],
    comfy_dir: &AbsDirPath,
) -> Result<HashMap<String, String>> {
    let response: ModelResolverResponse = crate::subprocess::run_json_script(
        script,
        &[],
        comfy_dir,
        &ModelResolverRequest { references },
        crate::subprocess::MODEL_RESOLVER_TIMEOUT,
    )
    .await?;

    Ok(response
        .paths
        .into_iter()
        .filter(|(name, path)| path_matches_reference(name, path))
        .collect())
}

fn path_matches_reference(name: &str, resolved_path: &str) -> bool {
    let normalized_name = name.replace('\\', "/");
    let normalized_path = resolved_path.replace('\\', "/");
    normalized_path.ends_with(&normalized_name)
}

/// Transfer kind tracked by [`ModelTransferManager`].
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Copy,
    Download,
}

/// Live state of one in-flight (or just-finished) transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferState {
    pub kind: TransferKind,
    pub percent: f32,
    pub copied_bytes: u64,
    pub total_bytes: u64,
    pub in_progress: bool,
    pub error: Option<String>,
}

/// Coordinates model transfers process-wide: a given destination has at
/// most one active transfer, and listeners can poll [`active_transfers`]
/// for a GUI-facing transfers panel.
#[derive(Clone, Default)]
pub struct ModelTransferManager {
    transfers: Arc<DashMap<String, TransferState>>,
}

impl ModelTransferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently tracked transfers, keyed by destination path.
    pub fn active_transfers(&self) -> Vec<(String, TransferState)> {
        self.transfers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Copy `src` to `dest` in 4 MiB chunks via a `.tmp` sibling, emitting
    /// progress updates after each chunk. Cancellation between chunks
    /// deletes the partial file. Re-running against an already-resolved
    /// destination is a no-op (idempotence, §8).
    #[instrument(skip(self, cancel))]
    pub async fn copy_chunked(
        &self,
        src: &AbsFilePath,
        dest: &AbsFilePath,
        cancel: impl Fn() -> bool,
    ) -> Result<()> {
        if fs::is_file(dest.as_std_path()).await {
            trace!(target: "charon::system", ?dest, "already resolved, skipping copy");
            return Ok(());
        }

        if self.transfers.contains_key(&dest.as_str_lossy().to_string()) {
            return Ok(());
        }

        let key = dest.as_str_lossy().to_string();
        let total_bytes = fs::metadata(src.as_std_path())
            .await?
            .map(|m| m.len())
            .unwrap_or(0);

        self.transfers.insert(
            key.clone(),
            TransferState {
                kind: TransferKind::Copy,
                percent: 0.0,
                copied_bytes: 0,
                total_bytes,
                in_progress: true,
                error: None,
            },
        );

        let result = self.copy_chunked_inner(src, dest, total_bytes, &key, cancel).await;

        if let Err(err) = &result {
            if let Some(mut state) = self.transfers.get_mut(&key) {
                state.in_progress = false;
                state.error = Some(err.to_string());
            }
        } else if let Some(mut state) = self.transfers.get_mut(&key) {
            state.in_progress = false;
            state.percent = 100.0;
        }

        result
    }

    async fn copy_chunked_inner(
        &self,
        src: &AbsFilePath,
        dest: &AbsFilePath,
        total_bytes: u64,
        key: &str,
        cancel: impl Fn() -> bool,
    ) -> Result<()> {
        let tmp_path = dest
            .as_std_path()
            .with_extension("tmp")
            .pipe(AbsFilePath::try_from)
            .context("build temp destination")?;

        let mut reader = fs::open_file(src).await?;
        let mut writer = fs::create_file(&tmp_path).await?;
        let mut buf = vec![0u8; COPY_CHUNK_BYTES];
        let mut copied = 0u64;

        loop {
            if cancel() {
                drop(writer);
                fs::remove_file(&tmp_path).await.ok();
                color_eyre::eyre::bail!("copy cancelled");
            }

            let n = reader.read(&mut buf).await.context("read chunk")?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await.context("write chunk")?;
            copied += n as u64;

            if let Some(mut state) = self.transfers.get_mut(key) {
                state.copied_bytes = copied;
                state.percent = if total_bytes > 0 {
                    (copied as f32 / total_bytes as f32) * 100.0
                } else {
                    100.0
                };
            }
        }

        writer.flush().await.context("flush")?;
        drop(writer);
        fs::rename(&tmp_path, dest).await
    }

    /// Download `url` to `dest` via a `.download` sibling, then rename.
    #[instrument(skip(self, cancel))]
    pub async fn download(
        &self,
        url: &str,
        dest: &AbsFilePath,
        cancel: impl Fn() -> bool,
    ) -> Result<()> {
        if fs::is_file(dest.as_std_path()).await {
            return Ok(());
        }

        let key = dest.as_str_lossy().to_string();
        self.transfers.insert(
            key.clone(),
            TransferState {
                kind: TransferKind::Download,
                percent: 0.0,
                copied_bytes: 0,
                total_bytes: 0,
                in_progress: true,
                error: None,
            },
        );

        let result = self.download_inner(url, dest, &key, cancel).await;

        if let Err(err) = &result {
            warn!(target: "charon::system", ?url, ?err, "model download failed");
            if let Some(mut state) = self.transfers.get_mut(&key) {
                state.in_progress = false;
                state.error = Some(err.to_string());
            }
        } else if let Some(mut state) = self.transfers.get_mut(&key) {
            state.in_progress = false;
            state.percent = 100.0;
        }

        result
    }

    async fn download_inner(
        &self,
        url: &str,
        dest: &AbsFilePath,
        key: &str,
        cancel: impl Fn() -> bool,
    ) -> Result<()> {
        use futures::StreamExt as _;

        let tmp_path = dest
            .as_std_path()
            .with_extension("download")
            .pipe(AbsFilePath::try_from)
            .context("build temp destination")?;

        let client = reqwest::Client::new();
        let response = client.get(url).send().await.context("send request")?;
        let total_bytes = response.content_length().unwrap_or(0);
        if let Some(mut state) = self.transfers.get_mut(key) {
            state.total_bytes = total_bytes;
        }

        let mut writer = fs::create_file(&tmp_path).await?;
        let mut stream = response.bytes_stream();
        let mut copied = 0u64;

        while let Some(chunk) = stream.next().await {
            if cancel() {
                drop(writer);
                fs::remove_file(&tmp_path).await.ok();
                color_eyre::eyre::bail!("download cancelled");
            }

            let chunk = chunk.context("read response chunk")?;
            writer.write_all(&chunk).await.context("write chunk")?;
            copied += chunk.len() as u64;

            if let Some(mut state) = self.transfers.get_mut(key) {
                state.copied_bytes = copied;
                state.percent = if total_bytes > 0 {
                    (copied as f32 / total_bytes as f32) * 100.0
                } else {
                    0.0
                };
            }
        }

        writer.flush().await.context("flush")?;
        drop(writer);
        fs::rename(&tmp_path, dest).await
    }
}

/// Outcome of resolving a single missing reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub status: ResolveStatus,
    pub resolved_path: Option<String>,
    pub method: String,
}

/// Resolve a single missing reference: search local `models/`, then the
/// shared model repository, copying or downloading as needed. This is the
/// pure-filesystem fallback; the authoritative in-process resolver (run
/// inside the ComfyUI embedded interpreter) is a separate subprocess
/// contract layered on top by the validation orchestrator.
#[instrument(skip(transfers, cancel))]
pub async fn resolve_reference(
    reference: &ModelReference,
    comfy_dir: &AbsDirPath,
    shared_models_root: Option<&str>,
    url: Option<&str>,
    transfers: &ModelTransferManager,
    cancel: impl Fn() -> bool + Copy,
) -> Result<ResolveOutcome> {
    if let Some(found) = search_path(reference, comfy_dir).await? {
        return Ok(ResolveOutcome {
            status: ResolveStatus::Success,
            resolved_path: Some(found.as_str_lossy().to_string()),
            method: "found on disk".to_string(),
        });
    }

    let base = basename(&reference.name);
    let models_root = comfy_dir.try_join_dir("models")?;
    let dest = models_root.try_join_combined([reference.category.as_str()], base)?;

    if let Some(candidate) = search_recursive(&models_root, base).await? {
        transfers.copy_chunked(&candidate, &dest, cancel).await?;
        return Ok(ResolveOutcome {
            status: ResolveStatus::Copied,
            resolved_path: Some(dest.as_str_lossy().to_string()),
            method: format!("copied from local models tree ({candidate})"),
        });
    }

    if let Some(shared_root) = shared_models_root
        && let Ok(shared_root) = AbsDirPath::try_from(shared_root)
        && let Some(candidate) = search_recursive(&shared_root, base).await?
    {
        transfers.copy_chunked(&candidate, &dest, cancel).await?;
        return Ok(ResolveOutcome {
            status: ResolveStatus::Copied,
            resolved_path: Some(dest.as_str_lossy().to_string()),
            method: "copied from shared model repository".to_string(),
        });
    }

    if let Some(url) = url {
        transfers.download(url, &dest, cancel).await?;
        return Ok(ResolveOutcome {
            status: ResolveStatus::Resolved,
            resolved_path: Some(dest.as_str_lossy().to_string()),
            method: format!("downloaded from {url}"),
        });
    }

    Ok(ResolveOutcome {
        status: ResolveStatus::Failed,
        resolved_path: None,
        method: format!(
            "manual install required: copy to {}",
            dest.as_str_lossy()
        ),
    })
}

/// Format a resolved category path as the shortest unambiguous workflow
/// reference string, relative to `<comfy>/models/<category>/`.
///
/// See [`crate::hash`] module docs for the open question on path separators;
/// this is the one function that would need to flip if forward-slash turns
/// out to be the only accepted form.
pub fn format_category_relative(category: &str, original: &str, resolved_basename: &str) -> String {
    let single_segment = !original.contains('/') && !original.contains('\\');
    if single_segment {
        resolved_basename.to_string()
    } else {
        format!("{category}\\{resolved_basename}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn extracts_from_array_of_nodes_widgets_values() {
        let payload = json!({
            "nodes": [
                {"type": "CheckpointLoaderSimple", "widgets_values": ["model.ckpt", 42]}
            ]
        });
        let refs = extract_model_references(&payload);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "model.ckpt");
        assert_eq!(refs[0].category, "checkpoints");
    }

    #[test]
    fn extracts_from_id_to_node_api_shape() {
        let payload = json!({
            "1": {"class_type": "LoraLoader", "inputs": {"lora_name": "foo.safetensors"}}
        });
        let refs = extract_model_references(&payload);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "foo.safetensors");
        assert_eq!(refs[0].category, "loras");
    }

    #[test]
    fn dedupes_by_lowercased_name_and_category() {
        let payload = json!({
            "nodes": [
                {"type": "LoraLoader", "widgets_values": ["Foo.safetensors"]},
                {"type": "LoraLoader", "widgets_values": ["foo.safetensors"]},
            ]
        });
        assert_eq!(extract_model_references(&payload).len(), 1);
    }

    #[tokio::test]
    async fn search_path_finds_basename_under_category_dir() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("models/loras")).unwrap();
        std::fs::write(dir.path().join("models/loras/foo.safetensors"), b"x").unwrap();

        let comfy_dir = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let reference = ModelReference {
            name: "foo.safetensors".to_string(),
            category: "loras".to_string(),
            node_type: "LoraLoader".to_string(),
        };

        let found = search_path(&reference, &comfy_dir).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn resolve_reference_copies_when_found_elsewhere_in_models() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("models/loras")).unwrap();
        // Nested deeper than the shallow index's depth bound, so only
        // `search_recursive`'s unbounded walk (not `search_path`) finds it.
        std::fs::create_dir_all(dir.path().join("models/a/b/c/d")).unwrap();
        std::fs::write(dir.path().join("models/a/b/c/d/foo.safetensors"), b"hello").unwrap();

        let comfy_dir = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let reference = ModelReference {
            name: "foo.safetensors".to_string(),
            category: "loras".to_string(),
            node_type: "LoraLoader".to_string(),
        };

        let transfers = ModelTransferManager::new();
        let outcome = resolve_reference(&reference, &comfy_dir, None, None, &transfers, || false)
            .await
            .unwrap();

        assert_eq!(outcome.status, ResolveStatus::Copied);
        let dest = dir.path().join("models/loras/foo.safetensors");
        assert!(dest.exists());
        assert_eq!(std::fs::read(dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn resolve_reference_is_idempotent_once_resolved() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("models/loras")).unwrap();
        std::fs::write(dir.path().join("models/loras/foo.safetensors"), b"hello").unwrap();

        let comfy_dir = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let reference = ModelReference {
            name: "foo.safetensors".to_string(),
            category: "loras".to_string(),
            node_type: "LoraLoader".to_string(),
        };

        let transfers = ModelTransferManager::new();
        let outcome = resolve_reference(&reference, &comfy_dir, None, None, &transfers, || false)
            .await
            .unwrap();
        assert_eq!(outcome.status, ResolveStatus::Success);
        assert!(transfers.active_transfers().is_empty());
    }

    #[test]
    fn path_matches_reference_rejects_mismatched_suffix() {
        assert!(path_matches_reference(
            "loras/foo.safetensors",
            "/comfy/models/loras/foo.safetensors"
        ));
        assert!(!path_matches_reference(
            "loras/foo.safetensors",
            "/comfy/models/checkpoints/bar.safetensors"
        ));
    }

    #[tokio::test]
    async fn resolve_via_authoritative_script_drops_mismatched_entries() {
        if std::process::Command::new("python3").arg("--version").output().is_err() {
            eprintln!("skipping: python3 not available");
            return;
        }

        let dir = tempdir().unwrap();
        let script_path = dir.path().join("resolver.py");
        std::fs::write(
            &script_path,
            "import sys, json\n\
             data = json.load(sys.stdin)\n\
             ref = data['references'][0]['name']\n\
             print(json.dumps({'paths': {ref: '/comfy/models/wrong/place.safetensors'}}))\n",
        )
        .unwrap();

        let script = AbsFilePath::try_from(script_path).unwrap();
        let comfy_dir = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let references = vec![ModelReference {
            name: "loras/foo.safetensors".to_string(),
            category: "loras".to_string(),
            node_type: "LoraLoader".to_string(),
        }];

        let paths = resolve_via_authoritative_script(&script, &references, &comfy_dir)
            .await
            .unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn format_category_relative_prefers_basename_for_single_segment_refs() {
        assert_eq!(
            format_category_relative("loras", "foo.safetensors", "foo.safetensors"),
            "foo.safetensors"
        );
        assert_eq!(
            format_category_relative("loras", "sub/foo.safetensors", "foo.safetensors"),
            "loras\\foo.safetensors"
        );
    }
}
