//! Workflow override writer: substitutes resolved model paths back into a
//! workflow payload and commits the result through the local mirror.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::{
    mirror::LocalMirror,
    path::AbsDirPath,
    resolve::{ResolveStatus, model::format_category_relative},
};

/// One entry in a workflow's `.charon_cache/validation/validation_resolve_log.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolveLogEntry {
    pub original: String,
    pub category: String,
    pub status: ResolveStatus,
    pub resolved_path: Option<String>,
    pub method: String,
    /// Number of validation runs (including this one) that attempted to
    /// resolve this entry while it remained unresolved. Distinct from
    /// `status`; used to avoid retrying indefinitely within one run.
    #[serde(default)]
    pub attempts: u32,
}

/// Recursively walk `payload`, replacing any string value that
/// forward-slash-normalized-equals a key in `replacements` with its mapped
/// value. Returns whether any substitution was made.
///
/// Idempotent: running this again against its own output with the same
/// replacement map is a no-op, since the replaced values no longer match
/// any `from` key (unless `from == to`).
pub fn replace_workflow_model_paths(payload: &mut Value, replacements: &[(String, String)]) -> bool {
    let mut changed = false;
    walk_replace(payload, replacements, &mut changed);
    changed
}

fn normalize(s: &str) -> String {
    s.replace('\\', "/")
}

fn walk_replace(value: &mut Value, replacements: &[(String, String)], changed: &mut bool) {
    match value {
        Value::String(s) => {
            let normalized = normalize(s);
            if let Some((_, to)) = replacements.iter().find(|(from, _)| normalize(from) == normalized)
                && *s != *to
            {
                *s = to.clone();
                *changed = true;
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_replace(item, replacements, changed);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                walk_replace(item, replacements, changed);
            }
        }
        _ => {}
    }
}

/// Commit a (possibly override-rewritten) payload as the validated workflow.
#[instrument(skip(mirror, payload))]
pub async fn save_workflow_override(
    mirror: &LocalMirror,
    remote_folder: &str,
    payload: &Value,
) -> Result<()> {
    mirror.mark_validated_workflow(remote_folder, payload).await?;
    Ok(())
}

/// Load the resolve log for a workflow and apply every resolved-enough
/// entry's replacement to the payload in place, returning whether anything
/// changed.
#[instrument(skip(mirror, payload))]
pub async fn apply_validation_model_overrides(
    mirror: &LocalMirror,
    remote_folder: &str,
    payload: &mut Value,
    _comfy_dir: &AbsDirPath,
) -> Result<bool> {
    let log = mirror.read_resolve_log(remote_folder).await?;
    let entries: Vec<ResolveLogEntry> = log
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();

    let mut replacements = Vec::new();
    for entry in &entries {
        if !entry.status.is_considered_resolved() {
            continue;
        }
        let Some(resolved_path) = &entry.resolved_path else {
            continue;
        };
        let basename = resolved_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(resolved_path);
        let replacement = format_category_relative(&entry.category, &entry.original, basename);
        replacements.push((entry.original.clone(), replacement));
    }

    Ok(replace_workflow_model_paths(payload, &replacements))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::path::TryJoinWith as _;

    #[test]
    fn replaces_matching_string_leaves_regardless_of_separator() {
        let mut payload = json!({
            "nodes": [{"widgets_values": ["sub/foo.safetensors", "unrelated.txt"]}]
        });
        let replacements = vec![("sub\\foo.safetensors".to_string(), "loras\\foo.safetensors".to_string())];
        let changed = replace_workflow_model_paths(&mut payload, &replacements);
        assert!(changed);
        assert_eq!(
            payload["nodes"][0]["widgets_values"][0],
            json!("loras\\foo.safetensors")
        );
        assert_eq!(payload["nodes"][0]["widgets_values"][1], json!("unrelated.txt"));
    }

    #[test]
    fn replacement_is_idempotent() {
        let mut payload = json!({"a": "foo.safetensors"});
        let replacements = vec![("foo.safetensors".to_string(), "loras\\foo.safetensors".to_string())];
        replace_workflow_model_paths(&mut payload, &replacements);
        let changed_again = replace_workflow_model_paths(&mut payload, &replacements);
        assert!(!changed_again);
    }

    #[tokio::test]
    async fn applies_resolved_entries_from_resolve_log() {
        let dir = tempdir().unwrap();
        let root = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        let mirror = LocalMirror::new(root.clone(), r"\\shared\repo");
        let remote = r"\\shared\repo\folderA";

        mirror
            .synchronize_remote_payload(remote, &json!({}), "source")
            .await
            .unwrap();

        let entry = ResolveLogEntry {
            original: "sub/foo.safetensors".to_string(),
            category: "loras".to_string(),
            status: ResolveStatus::Copied,
            resolved_path: Some("/models/loras/foo.safetensors".to_string()),
            method: "copied".to_string(),
            attempts: 1,
        };
        mirror
            .append_resolve_log(remote, &serde_json::to_value(&entry).unwrap())
            .await
            .unwrap();

        let comfy_dir = root.try_join_dir("comfy").unwrap();
        let mut payload = json!({"a": "sub/foo.safetensors"});
        let changed = apply_validation_model_overrides(&mirror, remote, &mut payload, &comfy_dir)
            .await
            .unwrap();

        assert!(changed);
        assert_eq!(payload["a"], json!("loras\\foo.safetensors"));
    }
}
