//! The binary entrypoint for `charon`, the ComfyUI workflow browser/launcher
//! core engine's command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, crate_version};
use color_eyre::{Result, eyre::Context};
use tracing::instrument;
use tracing_subscriber::util::SubscriberInitExt;

// Since this is a binary crate, we need to ensure these modules aren't pub
// so that they can correctly warn about dead code:
// https://github.com/rust-lang/rust/issues/74970
//
// Relatedly, in this file specifically nothing should be `pub`.
mod cmd;
mod log;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "charon",
    about = "ComfyUI workflow browser/launcher core engine",
    version = format!("v{} ({})", crate_version!(), env!("CHARON_VERSION"))
)]
struct TopLevelFlags {
    #[command(subcommand)]
    command: Command,

    /// Emit flamegraph profiling data
    #[arg(short, long, hide(true))]
    profile: Option<PathBuf>,

    /// When to colorize output
    #[arg(long, value_enum, default_value_t = log::WhenColor::Auto)]
    color: log::WhenColor,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Manage the in-process folder/tag/validation cache
    #[clap(subcommand)]
    Cache(cmd::cache::Command),

    /// List and warm workflow folders
    #[clap(subcommand)]
    Prefetch(cmd::prefetch::Command),

    /// Run the full validation/resolution pipeline for a workflow
    Validate(cmd::validate::Opts),

    /// Resolve missing models or custom nodes for a workflow
    #[clap(subcommand)]
    Resolve(cmd::resolve::Command),
}

#[instrument]
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let top = TopLevelFlags::parse();

    let (logger, flame_guard) = log::make_logger(std::io::stderr, top.profile.clone(), top.color)?;
    logger.init();

    let result = match top.command {
        Command::Cache(cmd) => match cmd {
            cmd::cache::Command::Show => cmd::cache::show::exec().await,
            cmd::cache::Command::Reset => cmd::cache::reset::exec().await,
        },
        Command::Prefetch(cmd) => match cmd {
            cmd::prefetch::Command::Folder(opts) => cmd::prefetch::folder::exec(opts).await,
            cmd::prefetch::Command::All(opts) => cmd::prefetch::all::exec(opts).await,
        },
        Command::Validate(opts) => cmd::validate::exec(opts).await,
        Command::Resolve(cmd) => match cmd {
            cmd::resolve::Command::Models(opts) => cmd::resolve::models::exec(opts).await,
            cmd::resolve::Command::Nodes(opts) => cmd::resolve::nodes::exec(opts).await,
        },
    };

    if let Some(flame_guard) = flame_guard {
        flame_guard.flush().context("flush flame_guard")?;
    }

    result
}
