use std::path::PathBuf;

use clap::{Args, Subcommand};

pub mod models;
pub mod nodes;

/// Resolve missing models or custom nodes for a workflow.
#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Resolve every model file referenced by a workflow.
    Models(ModelsOpts),
    /// List the custom node classes a workflow requires.
    Nodes(NodesOpts),
}

#[derive(Clone, Debug, Args)]
pub struct ModelsOpts {
    /// Absolute path to the ComfyUI installation.
    pub comfy_dir: PathBuf,

    /// Path to the workflow JSON payload.
    pub workflow: PathBuf,

    /// Absolute path to a shared model repository to search as a fallback.
    #[arg(long)]
    pub shared_models_root: Option<String>,
}

#[derive(Clone, Debug, Args)]
pub struct NodesOpts {
    /// Path to the workflow JSON payload.
    pub workflow: PathBuf,
}
