//! The validation/resolution pipeline: extracting missing assets from a
//! workflow payload and resolving them to files on disk.

pub mod model;
pub mod node;
pub mod override_writer;

use serde::{Deserialize, Serialize};

/// A model file referenced by a workflow node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModelReference {
    pub name: String,
    pub category: String,
    pub node_type: String,
}

/// Per-asset resolution outcome.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStatus {
    Success,
    Resolved,
    Copied,
    Failed,
    #[default]
    Empty,
}

impl ResolveStatus {
    /// Whether this status is resolved-enough for the override writer to
    /// substitute a replacement path.
    pub fn is_considered_resolved(self) -> bool {
        matches!(self, Self::Success | Self::Resolved | Self::Copied)
    }
}

/// A missing custom-node package.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MissingPack {
    pub repo: String,
    pub pack_title: Option<String>,
    pub pack_author: Option<String>,
    pub pack_last_update: Option<String>,
    pub nodes: Vec<MissingPackNode>,
    pub resolve_status: ResolveStatus,
    pub resolve_method: Option<String>,
    pub resolve_failed: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissingPackNode {
    pub class_type: String,
    pub id: String,
}
