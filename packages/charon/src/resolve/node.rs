//! Custom node resolution: extracting required node classes from a workflow
//! payload, mapping them to installable packages, and recording the outcome
//! in the local mirror's resolve log.

use std::collections::{HashMap, HashSet};

use color_eyre::Result;
use lazy_regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::{
    fs,
    metadata::WorkflowMetadata,
    path::{AbsDirPath, AbsFilePath, TryJoinWith as _},
    resolve::{MissingPack, MissingPackNode, ResolveStatus},
    subprocess,
};

/// Node class names that are built into ComfyUI itself and never need a
/// custom node package.
const IGNORED_CLASS_TYPES: &[&str] = &[
    "Note",
    "PrimitiveNode",
    "Reroute",
    "SetNode",
    "GetNode",
    "MarkdownNote",
    "PreviewImage",
    "SaveImage",
    "LoadImage",
];

/// The package id that backs ComfyUI's own built-in nodes; never surfaced as
/// a missing install.
const COMFY_CORE_PACKAGE: &str = "comfy-core";

/// Collect every `class_type`/`type` value referenced by nodes in a
/// workflow payload, supporting both the array-of-nodes and id→node shapes,
/// minus the fixed ignore list.
pub fn extract_required_node_classes(payload: &Value) -> HashSet<String> {
    let mut classes = HashSet::new();

    let push = |classes: &mut HashSet<String>, class: &str| {
        if !IGNORED_CLASS_TYPES.iter().any(|ignored| ignored.eq_ignore_ascii_case(class)) {
            classes.insert(class.to_string());
        }
    };

    if let Some(nodes) = payload.get("nodes").and_then(Value::as_array) {
        for node in nodes {
            if let Some(class) = node.get("type").and_then(Value::as_str) {
                push(&mut classes, class);
            }
        }
    } else if let Some(map) = payload.as_object() {
        for node in map.values() {
            if let Some(class) = node.get("class_type").and_then(Value::as_str) {
                push(&mut classes, class);
            }
        }
    }

    classes
}

/// A catalog entry for an installable custom node package, as surfaced by
/// the node registry probe (a subprocess-driven browser automation; see
/// [`crate::subprocess`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryPackage {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub last_update: Option<String>,
    /// Class names this package is known to provide, from its manifest.
    #[serde(default)]
    pub provides_classes: Vec<String>,
    /// Regex patterns (against class name) this package is known to match.
    #[serde(default)]
    pub nodename_patterns: Vec<String>,
}

/// Extract each required class's first-seen `properties.aux_id` value: the
/// repo id the Manager stamps onto nodes it already manages, keyed by class
/// name.
pub fn extract_node_aux_ids(payload: &Value) -> HashMap<String, String> {
    let mut out = HashMap::new();

    let mut visit = |class: &str, node: &Value| {
        if out.contains_key(class) {
            return;
        }
        if let Some(aux_id) = node
            .get("properties")
            .and_then(|p| p.get("aux_id"))
            .and_then(Value::as_str)
            && !aux_id.is_empty()
        {
            out.insert(class.to_string(), aux_id.to_string());
        }
    };

    if let Some(nodes) = payload.get("nodes").and_then(Value::as_array) {
        for node in nodes {
            if let Some(class) = node.get("type").and_then(Value::as_str) {
                visit(class, node);
            }
        }
    } else if let Some(map) = payload.as_object() {
        for node in map.values() {
            if let Some(class) = node.get("class_type").and_then(Value::as_str) {
                visit(class, node);
            }
        }
    }

    out
}

/// List the names of installed `custom_nodes/` subdirectories under a
/// ComfyUI installation: the last-resort match for [`resolve_class`].
#[instrument]
pub async fn list_installed_node_folders(comfy_dir: &AbsDirPath) -> Result<Vec<String>> {
    let custom_nodes = comfy_dir.try_join_dir("custom_nodes")?;
    if !fs::is_dir(custom_nodes.as_std_path()).await {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    let mut entries = fs::read_dir(&custom_nodes).await?;
    while let Some(entry) = entries.next_entry().await? {
        if fs::is_dir(entry.path()).await {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}

/// Request payload for the browser-driven custom-node registry probe.
#[derive(Serialize)]
struct NodeRegistryProbeRequest<'a> {
    classes: &'a [String],
}

/// The registry probe's return shape: the Manager's live view of which
/// classes are missing, plus the catalog data needed to resolve them.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodeRegistryProbeResponse {
    pub missing: Vec<String>,
    pub registered_count: usize,
    pub nodepack_count: usize,
    pub missing_models: Vec<String>,
    #[serde(default)]
    pub model_paths: HashMap<String, String>,
    #[serde(default)]
    pub pack_meta: HashMap<String, RegistryPackage>,
    #[serde(default)]
    pub model_capture: Vec<String>,
}

/// Run the browser-driven custom-node registry probe: load the workflow in
/// the running ComfyUI UI, wait for the node-type registry and the
/// Manager's node-pack catalog, and read back the set of missing classes
/// plus `class_name → [pack_ids]`/regex mappings baked into `pack_meta`.
#[instrument(skip(classes))]
pub async fn probe_registry(
    script: &AbsFilePath,
    classes: &[String],
    comfy_dir: &AbsDirPath,
) -> Result<NodeRegistryProbeResponse> {
    subprocess::run_json_script(
        script,
        &[],
        comfy_dir,
        &NodeRegistryProbeRequest { classes },
        subprocess::NODE_REGISTRY_PROBE_TIMEOUT,
    )
    .await
}

/// Per-repo outcome of a batched Manager-UI install, matching the resolve
/// log's `{resolve_status, resolve_method, resolve_failed}` shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub repo: String,
    pub resolve_status: ResolveStatus,
    pub resolve_method: Option<String>,
    pub resolve_failed: Option<String>,
}

/// Request payload for the installer: every repo to install in one batched
/// automation session.
#[derive(Serialize)]
struct InstallNodesRequest<'a> {
    repos: &'a [String],
}

/// The installer's return shape: per-repo outcomes plus whether ComfyUI
/// needs restarting before the install takes effect.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InstallNodesResponse {
    pub outcomes: Vec<InstallOutcome>,
    pub restart_required: bool,
}

/// Drive the Manager UI to click Install for every repo in `repos`,
/// batching them into one browser automation session. Shares the registry
/// probe's JSON-over-stdio contract and timeout.
#[instrument(skip(repos))]
pub async fn install_missing_packs(
    script: &AbsFilePath,
    repos: &[String],
    comfy_dir: &AbsDirPath,
) -> Result<InstallNodesResponse> {
    subprocess::run_json_script(
        script,
        &["--install"],
        comfy_dir,
        &InstallNodesRequest { repos },
        subprocess::NODE_REGISTRY_PROBE_TIMEOUT,
    )
    .await
}

/// Split `s` into lowercase tokens on non-alphanumeric boundaries and
/// camelCase transitions, so `"UpscaleToolsNode"` and `"upscale-tools"`
/// both yield `{"upscale", "tools", ...}`.
fn tokens(s: &str) -> HashSet<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase() || c.is_numeric();
            current.push(c);
        } else {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out.into_iter().map(|t| t.to_lowercase()).collect()
}

/// Resolve one missing class name to a package id, trying each strategy in
/// order: an explicit class→package mapping, a regex pattern match, the
/// workflow node's own `properties.aux_id` (the Manager stamps this onto
/// nodes it already manages), a fuzzy title/name token overlap against the
/// catalog, and finally overlap against locally installed `custom_nodes/`
/// folder names.
pub fn resolve_class(
    class_name: &str,
    mapping: &HashMap<String, Vec<String>>,
    catalog: &[RegistryPackage],
    installed_folders: &[String],
    aux_id: Option<&str>,
) -> Option<(String, &'static str)> {
    if let Some(candidates) = mapping.get(class_name)
        && let Some(first) = candidates.first()
    {
        return Some((first.clone(), "class mapping"));
    }

    for package in catalog {
        for pattern in &package.nodename_patterns {
            if let Ok(re) = Regex::new(pattern)
                && re.is_match(class_name)
            {
                return Some((package.id.clone(), "regex pattern"));
            }
        }
    }

    if let Some(aux_id) = aux_id
        && !aux_id.is_empty()
    {
        return Some((aux_id.to_string(), "node aux_id property"));
    }

    let class_tokens = tokens(class_name);
    if !class_tokens.is_empty() {
        let mut best: Option<(&RegistryPackage, usize)> = None;
        for package in catalog {
            let title_tokens = tokens(&package.title);
            let overlap = class_tokens.intersection(&title_tokens).count();
            if overlap > 0 && best.as_ref().is_none_or(|(_, score)| overlap > *score) {
                best = Some((package, overlap));
            }
        }
        if let Some((package, _)) = best {
            return Some((package.id.clone(), "catalog title overlap"));
        }
    }

    for folder in installed_folders {
        let folder_tokens = tokens(folder);
        if !class_tokens.is_empty() && !class_tokens.is_disjoint(&folder_tokens) {
            return Some((folder.clone(), "installed folder overlap"));
        }
    }

    None
}

/// Fall back to `.charon.json`'s declared dependencies when neither the
/// registry nor installed folders resolve a class: if a dependency's
/// inferred name shares tokens with the class name, treat it as the answer.
pub fn resolve_from_metadata_overrides(
    class_name: &str,
    metadata: &WorkflowMetadata,
) -> Option<(String, &'static str)> {
    let class_tokens = tokens(class_name);
    metadata.dependencies.iter().find_map(|dep| {
        let dep_tokens = tokens(&dep.name);
        if !class_tokens.is_empty() && !dep_tokens.is_empty() && !class_tokens.is_disjoint(&dep_tokens)
        {
            Some((dep.repo.clone(), "metadata override"))
        } else {
            None
        }
    })
}

/// Group unresolved classes into [`MissingPack`] records, one per resolved
/// package id (classes that resolve to no package are grouped under their
/// own class name as the "repo", so the caller can still surface them).
pub fn build_missing_packs(
    classes: &HashSet<String>,
    mapping: &HashMap<String, Vec<String>>,
    catalog: &[RegistryPackage],
    installed_folders: &[String],
    metadata: &WorkflowMetadata,
    aux_ids: &HashMap<String, String>,
) -> Vec<MissingPack> {
    let mut by_repo: HashMap<String, MissingPack> = HashMap::new();

    for (index, class_name) in classes.iter().enumerate() {
        if class_name == COMFY_CORE_PACKAGE {
            continue;
        }

        let aux_id = aux_ids.get(class_name).map(String::as_str);
        let resolution = resolve_class(class_name, mapping, catalog, installed_folders, aux_id)
            .or_else(|| resolve_from_metadata_overrides(class_name, metadata));

        let (repo, method) = match resolution {
            Some((repo, method)) => (repo, Some(method.to_string())),
            None => (class_name.clone(), None),
        };

        let catalog_entry = catalog.iter().find(|p| p.id == repo);

        let entry = by_repo.entry(repo.clone()).or_insert_with(|| MissingPack {
            repo: repo.clone(),
            pack_title: catalog_entry.map(|p| p.title.clone()),
            pack_author: catalog_entry.and_then(|p| p.author.clone()),
            pack_last_update: catalog_entry.and_then(|p| p.last_update.clone()),
            nodes: Vec::new(),
            resolve_status: if method.is_some() {
                ResolveStatus::Resolved
            } else {
                ResolveStatus::Failed
            },
            resolve_method: method,
            resolve_failed: if catalog_entry.is_none() && resolution_failed(&repo, class_name) {
                Some("no matching package found".to_string())
            } else {
                None
            },
        });

        entry.nodes.push(MissingPackNode {
            class_type: class_name.clone(),
            id: index.to_string(),
        });
    }

    let mut packs: Vec<_> = by_repo.into_values().collect();
    packs.sort_by(|a, b| a.repo.cmp(&b.repo));
    packs
}

fn resolution_failed(repo: &str, class_name: &str) -> bool {
    repo == class_name
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_classes_excluding_ignore_list() {
        let payload = json!({
            "nodes": [
                {"type": "KSampler"},
                {"type": "Note"},
                {"type": "Reroute"},
            ]
        });
        let classes = extract_required_node_classes(&payload);
        assert_eq!(classes, HashSet::from(["KSampler".to_string()]));
    }

    #[test]
    fn extracts_classes_from_api_shape() {
        let payload = json!({
            "1": {"class_type": "CustomSampler"},
        });
        let classes = extract_required_node_classes(&payload);
        assert_eq!(classes, HashSet::from(["CustomSampler".to_string()]));
    }

    #[test]
    fn resolves_via_explicit_mapping_first() {
        let mut mapping = HashMap::new();
        mapping.insert("Foo".to_string(), vec!["owner/foo-pack".to_string()]);
        let result = resolve_class("Foo", &mapping, &[], &[], None);
        assert_eq!(result, Some(("owner/foo-pack".to_string(), "class mapping")));
    }

    #[test]
    fn resolves_via_regex_pattern_when_no_mapping() {
        let catalog = vec![RegistryPackage {
            id: "owner/pack".to_string(),
            title: "Pack".to_string(),
            author: None,
            last_update: None,
            provides_classes: vec![],
            nodename_patterns: vec!["^Foo.*".to_string()],
        }];
        let result = resolve_class("FooBar", &HashMap::new(), &catalog, &[], None);
        assert_eq!(result, Some(("owner/pack".to_string(), "regex pattern")));
    }

    #[test]
    fn resolves_via_aux_id_before_catalog_overlap() {
        let catalog = vec![RegistryPackage {
            id: "owner/upscale-pack".to_string(),
            title: "Upscale Tools".to_string(),
            author: None,
            last_update: None,
            provides_classes: vec![],
            nodename_patterns: vec![],
        }];
        let result = resolve_class(
            "UpscaleToolsNode",
            &HashMap::new(),
            &catalog,
            &[],
            Some("owner/aux-id-pack"),
        );
        assert_eq!(
            result,
            Some(("owner/aux-id-pack".to_string(), "node aux_id property"))
        );
    }

    #[test]
    fn resolves_via_catalog_title_token_overlap() {
        let catalog = vec![RegistryPackage {
            id: "owner/upscale-pack".to_string(),
            title: "Upscale Tools".to_string(),
            author: None,
            last_update: None,
            provides_classes: vec![],
            nodename_patterns: vec![],
        }];
        let result = resolve_class("UpscaleToolsNode", &HashMap::new(), &catalog, &[], None);
        assert_eq!(result.map(|(id, _)| id), Some("owner/upscale-pack".to_string()));
    }

    #[test]
    fn falls_back_to_installed_folder_overlap() {
        let installed = vec!["comfyui-upscale-tools".to_string()];
        let result = resolve_class("UpscaleToolsNode", &HashMap::new(), &[], &installed, None);
        assert_eq!(result.map(|(id, _)| id), Some("comfyui-upscale-tools".to_string()));
    }

    #[test]
    fn comfy_core_never_surfaces_as_missing() {
        let classes = HashSet::from([COMFY_CORE_PACKAGE.to_string()]);
        let metadata = WorkflowMetadata::default();
        let packs = build_missing_packs(&classes, &HashMap::new(), &[], &[], &metadata, &HashMap::new());
        assert!(packs.is_empty());
    }

    #[test]
    fn unresolved_class_surfaces_with_failed_status() {
        let classes = HashSet::from(["TotallyUnknownNode".to_string()]);
        let metadata = WorkflowMetadata::default();
        let packs = build_missing_packs(&classes, &HashMap::new(), &[], &[], &metadata, &HashMap::new());
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].resolve_status, ResolveStatus::Failed);
        assert!(packs[0].resolve_failed.is_some());
    }

    #[test]
    fn aux_id_resolves_class_when_probe_provides_it() {
        let classes = HashSet::from(["UnknownLoader".to_string()]);
        let metadata = WorkflowMetadata::default();
        let mut aux_ids = HashMap::new();
        aux_ids.insert("UnknownLoader".to_string(), "owner/unknown-loader-pack".to_string());

        let packs = build_missing_packs(&classes, &HashMap::new(), &[], &[], &metadata, &aux_ids);
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].repo, "owner/unknown-loader-pack");
        assert_eq!(packs[0].resolve_method.as_deref(), Some("node aux_id property"));
    }

    #[test]
    fn extracts_aux_id_from_node_properties() {
        let payload = json!({
            "nodes": [
                {"type": "Foo", "properties": {"aux_id": "owner/foo-pack"}},
                {"type": "Bar"},
            ]
        });
        let aux_ids = extract_node_aux_ids(&payload);
        assert_eq!(aux_ids.get("Foo"), Some(&"owner/foo-pack".to_string()));
        assert_eq!(aux_ids.get("Bar"), None);
    }

    #[tokio::test]
    async fn lists_installed_custom_node_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("custom_nodes/comfyui-upscale-tools")).unwrap();
        std::fs::write(dir.path().join("custom_nodes/README.txt"), b"not a dir").unwrap();

        let comfy_dir = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let folders = list_installed_node_folders(&comfy_dir).await.unwrap();
        assert_eq!(folders, vec!["comfyui-upscale-tools".to_string()]);
    }

    #[tokio::test]
    async fn probe_registry_runs_script_and_parses_response() {
        if std::process::Command::new("python3").arg("--version").output().is_err() {
            eprintln!("skipping: python3 not available");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("probe.py");
        std::fs::write(
            &script_path,
            "import sys, json\n\
             data = json.load(sys.stdin)\n\
             print(json.dumps({\n\
             \t'missing': data['classes'],\n\
             \t'registered_count': 10,\n\
             \t'nodepack_count': 3,\n\
             \t'missing_models': [],\n\
             \t'model_paths': {},\n\
             \t'pack_meta': {},\n\
             \t'model_capture': [],\n\
             }))\n",
        )
        .unwrap();

        let script = AbsFilePath::try_from(script_path).unwrap();
        let comfy_dir = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let classes = vec!["FooNode".to_string()];

        let response = probe_registry(&script, &classes, &comfy_dir).await.unwrap();
        assert_eq!(response.missing, classes);
        assert_eq!(response.registered_count, 10);
    }
}
