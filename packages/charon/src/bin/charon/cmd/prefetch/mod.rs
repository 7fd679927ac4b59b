use std::path::PathBuf;

use clap::{Args, Subcommand};

pub mod all;
pub mod folder;

/// List and warm workflow folders.
#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Prefetch a single workflow folder's listing, tags, and scripts.
    Folder(FolderOpts),
    /// Prefetch every subfolder of a workflow repository root.
    All(AllOpts),
}

#[derive(Clone, Debug, Args)]
pub struct FolderOpts {
    /// Absolute path to the workflow folder to warm.
    pub folder: PathBuf,
}

#[derive(Clone, Debug, Args)]
pub struct AllOpts {
    /// Absolute path to the workflow repository root.
    pub base: PathBuf,

    /// ComfyUI host identifier used for the compatibility probe cache key.
    #[arg(long, default_value = "default")]
    pub host: String,
}
