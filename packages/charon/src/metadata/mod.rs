//! `.charon.json` schema, normalization, and per-folder metadata loading.

mod batch;

pub use batch::{read_batch_metadata, BatchMetadataReader};

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tap::Pipe;
use tracing::instrument;

use crate::{fs, path::AbsDirPath};

/// The metadata filename inside each workflow folder.
pub const METADATA_FILENAME: &str = ".charon.json";

/// Dependency entry: either a `{name, repo, ref}` object or a bare URL
/// string, the latter backfilled with a name derived from the URL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Url(String),
    Object {
        name: Option<String>,
        repo: String,
        #[serde(rename = "ref")]
        git_ref: Option<String>,
    },
}

impl From<RawDependency> for Dependency {
    fn from(raw: RawDependency) -> Self {
        match raw {
            RawDependency::Url(url) => Dependency {
                name: name_from_url(&url),
                repo: url,
                git_ref: None,
            },
            RawDependency::Object { name, repo, git_ref } => {
                let name = name.unwrap_or_else(|| name_from_url(&repo));
                Dependency { name, repo, git_ref }
            }
        }
    }
}

/// Derive a dependency name from the last path component of a URL, stripping
/// a trailing `.git`.
fn name_from_url(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

fn deserialize_dependencies<'de, D>(deserializer: D) -> Result<Vec<Dependency>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<RawDependency> = Deserialize::deserialize(deserializer)?;
    Ok(raw.into_iter().map(Dependency::from).collect())
}

fn deserialize_min_vram<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// A single GUI-configurable parameter binding.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub node_id: String,
    pub attribute: String,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub param_type: Option<String>,
    pub default: Option<Value>,
    pub node_name: Option<String>,
    #[serde(default)]
    pub choices: Vec<Value>,
}

/// The normalized projection of `.charon.json`. Unknown/dynamic fields are
/// preserved in `raw` for pass-through operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    #[serde(default = "default_workflow_file")]
    pub workflow_file: String,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_min_vram")]
    pub min_vram_gb: Option<String>,
    #[serde(default, deserialize_with = "deserialize_dependencies")]
    pub dependencies: Vec<Dependency>,
    pub last_changed: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub is_3d_texturing: bool,
    #[serde(default)]
    pub is_3d_texturing_step2: bool,
    #[serde(default)]
    pub run_on_main: bool,

    /// The original, unnormalized object, preserved for pass-through
    /// operations such as the override writer's deep model-path walk.
    #[serde(skip)]
    pub raw: Value,
}

fn default_workflow_file() -> String {
    "workflow.json".to_string()
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        Self {
            workflow_file: default_workflow_file(),
            description: None,
            min_vram_gb: None,
            dependencies: Vec::new(),
            last_changed: None,
            tags: Vec::new(),
            parameters: Vec::new(),
            is_3d_texturing: false,
            is_3d_texturing_step2: false,
            run_on_main: false,
            raw: Value::Null,
        }
    }
}

impl WorkflowMetadata {
    /// Parse `.charon.json` content. Malformed JSON is treated as "no
    /// metadata" by callers, not as an error surfaced here — see
    /// [`load_workflow_metadata`].
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(content)?;
        let mut metadata: WorkflowMetadata = serde_json::from_value(raw.clone())?;
        metadata.raw = raw;
        Ok(metadata)
    }
}

/// A workflow folder in the shared repository: its path plus normalized
/// metadata (empty/default if `.charon.json` is absent or malformed).
#[derive(Clone, Debug)]
pub struct WorkflowFolder {
    pub path: AbsDirPath,
    pub metadata: WorkflowMetadata,
}

/// Load and normalize `.charon.json` for a single workflow folder.
///
/// Absence or a JSON parse failure both resolve to default (empty) metadata
/// rather than an error: per the error-handling design, a malformed metadata
/// file must not make the folder unbrowseable.
#[instrument]
pub async fn load_workflow_metadata(folder: &AbsDirPath) -> Result<WorkflowMetadata> {
    use crate::path::TryJoinWith as _;
    let path = folder.try_join_file(METADATA_FILENAME)?;
    match fs::read_buffered_utf8(&path).await? {
        Some(content) => content
            .pipe(|c| WorkflowMetadata::parse(&c))
            .unwrap_or_default()
            .pipe(Ok),
        None => Ok(WorkflowMetadata::default()),
    }
}

/// Load a full [`WorkflowFolder`] record.
#[instrument]
pub async fn load_workflow_folder(folder: &AbsDirPath) -> Result<WorkflowFolder> {
    let metadata = load_workflow_metadata(folder).await?;
    Ok(WorkflowFolder {
        path: folder.clone(),
        metadata,
    })
}
