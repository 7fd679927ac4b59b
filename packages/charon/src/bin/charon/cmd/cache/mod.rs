use clap::Subcommand;

pub mod reset;
pub mod show;

/// Manage the in-process folder/tag/validation cache.
///
/// The cache lives for the lifetime of a single process; these commands are
/// mainly useful for exercising the cache API from the command line rather
/// than inspecting a long-running daemon's state.
#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Print aggregate cache statistics for a freshly constructed cache.
    Show,
    /// Construct and immediately discard a cache, confirming reset works.
    Reset,
}
