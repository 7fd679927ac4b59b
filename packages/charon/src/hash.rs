//! Hashing and repository-relative path mapping.
//!
//! Workflow payloads are hashed for change detection (the local mirror uses
//! this to decide whether a shared workflow has drifted); validation results
//! are keyed by a hash of the comfy install path. Both hashes are computed
//! here so every caller gets the same normalization rules.

use color_eyre::{Result, eyre::bail};
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Compute the stable hash of a workflow payload.
///
/// `serde_json::Value` maps are backed by a `BTreeMap` unless the
/// `preserve_order` feature is enabled (it isn't here), so serializing
/// through `Value` already yields sorted keys; combined with
/// `serde_json::to_vec`'s compact (whitespace-free) output, this gives the
/// canonical form the hash is defined over.
pub fn compute_workflow_hash(payload: &serde_json::Value) -> Result<String> {
    let canonical = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the stable hash of any serializable payload, by first routing it
/// through `serde_json::Value` to get canonical (sorted-key) ordering.
pub fn compute_hash_of(payload: &impl Serialize) -> Result<String> {
    let value = serde_json::to_value(payload)?;
    compute_workflow_hash(&value)
}

/// Compute the validation cache key for a comfy installation path.
///
/// The spec calls for SHA-1 here (distinct from the workflow hash's SHA-256)
/// because it keys an in-memory cache, not a durability check.
pub fn cache_key_for_path(comfy_path: &str) -> String {
    let normalized = normalize_case_preserving(comfy_path);
    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalize a path string for hashing/comparison purposes: unify separators
/// to `/` and drop a trailing separator. Case is preserved; only prefix
/// comparisons (see [`relative_to_repo_root`]) are case-insensitive.
pub fn normalize_case_preserving(path: &str) -> String {
    let unified = path.replace('\\', "/");
    unified.strip_suffix('/').unwrap_or(&unified).to_string()
}

/// Map an absolute path under the configured repository root to a
/// repository-relative path, using a case-insensitive prefix match (the
/// shared repository may be reached via a UNC path with a differently-cased
/// server or share component than what the caller passes in).
///
/// Fails with "outside repository" if `path` is not under `root`.
pub fn relative_to_repo_root(root: &str, path: &str) -> Result<String> {
    let root_norm = normalize_case_preserving(root);
    let path_norm = normalize_case_preserving(path);

    let root_lower = root_norm.to_lowercase();
    let path_lower = path_norm.to_lowercase();

    if path_lower == root_lower {
        return Ok(String::new());
    }

    let prefix = format!("{root_lower}/");
    if let Some(stripped_lower_len) = path_lower.strip_prefix(&prefix).map(str::len) {
        let rel_start = path_norm.len() - stripped_lower_len;
        return Ok(path_norm[rel_start..].to_string());
    }

    bail!("path is outside repository: {path:?} not under {root:?}")
}
