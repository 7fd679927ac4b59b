//! Filesystem operations tailored to `charon`.
//!
//! Inside this module, we refer to `std::fs` or `tokio::fs` by its fully
//! qualified path to make it maximally clear what we are using.
//!
//! All other modules in this crate route file access through here instead of
//! calling `tokio::fs`/`std::fs` directly, so that logging, error context,
//! and not-found handling stay consistent across the cache, mirror, and
//! resolver subsystems.

#![allow(
    clippy::disallowed_methods,
    reason = "The methods are disallowed elsewhere, but we need them here!"
)]

use std::convert::identity;
use std::fmt::Debug as StdDebug;

use color_eyre::{Result, eyre::Context, eyre::ContextCompat};
use futures::{Stream, TryStreamExt};
use tap::{Pipe, TapFallible};
use tokio::{fs::ReadDir, task::spawn_blocking};
use tracing::{debug, instrument, trace};

use crate::path::{Abs, AbsDirPath, AbsFilePath, JoinWith as _, RelativeTo as _, TypedPath};

/// The default level of concurrency used in charon `fs` operations.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Determine the canonical preferences root for the current user.
///
/// This is where the local mirror (`Charon_repo_local/`), debug artifacts,
/// and anything else charon persists per-user lives. Can be overridden with
/// the `CHARON_USER_PREFS_ROOT` environment variable (see
/// [`crate::config::CharonConfig`]).
#[instrument]
pub async fn user_prefs_root() -> Result<AbsDirPath> {
    if let Ok(dir) = std::env::var("CHARON_USER_PREFS_ROOT") {
        return AbsDirPath::try_from(dir).context("parse CHARON_USER_PREFS_ROOT");
    }

    let dirs = spawn_blocking(|| directories::ProjectDirs::from("", "", "charon"))
        .await
        .expect("join task")
        .context("determine user preferences directory")?;

    dirs.config_dir()
        .to_path_buf()
        .pipe(AbsDirPath::try_from)
        .tap_ok(|dir| debug!(?dir, "user preferences root"))
}

/// Create the directory and all its parents, if they don't already exist.
#[instrument]
pub async fn create_dir_all(dir: &AbsDirPath) -> Result<()> {
    tokio::fs::create_dir_all(dir.as_std_path())
        .await
        .with_context(|| format!("create dir: {dir:?}"))
        .tap_ok(|_| trace!(?dir, "create directory"))
}

/// Walk files in a directory recursively.
///
/// Only emits regular files; symbolic links and directories are not emitted
/// in the stream.
#[instrument]
pub fn walk_files(root: &AbsDirPath) -> impl Stream<Item = Result<AbsFilePath>> + Unpin {
    let (tx, rx) = flume::bounded::<Result<AbsFilePath>>(0);
    let root = root.clone();

    spawn_blocking(move || {
        for entry in jwalk::WalkDir::new(root.as_std_path()).skip_hidden(false) {
            let entry = match entry.with_context(|| format!("walk files in {root:?}")) {
                Ok(entry) => entry,
                Err(err) => {
                    if tx.send(Err(err)).is_err() {
                        return;
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = match AbsFilePath::try_from(entry.path()) {
                Ok(path) => path,
                Err(err) => {
                    if tx.send(Err(err)).is_err() {
                        return;
                    }
                    continue;
                }
            };

            if tx.send(Ok(path)).is_err() {
                return;
            }
        }
    });

    rx.into_stream().pipe(Box::pin)
}

/// Walk directories up to `max_depth` levels deep (the root is depth 0).
///
/// Used by the model resolver to build a shallow index of `<comfy>/models/`.
#[instrument]
pub fn walk_dirs_bounded(
    root: &AbsDirPath,
    max_depth: usize,
) -> impl Stream<Item = Result<AbsFilePath>> + Unpin {
    let (tx, rx) = flume::bounded::<Result<AbsFilePath>>(0);
    let root = root.clone();

    spawn_blocking(move || {
        for entry in jwalk::WalkDir::new(root.as_std_path())
            .max_depth(max_depth)
            .skip_hidden(false)
        {
            let entry = match entry.with_context(|| format!("walk dirs in {root:?}")) {
                Ok(entry) => entry,
                Err(err) => {
                    if tx.send(Err(err)).is_err() {
                        return;
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = match AbsFilePath::try_from(entry.path()) {
                Ok(path) => path,
                Err(err) => {
                    if tx.send(Err(err)).is_err() {
                        return;
                    }
                    continue;
                }
            };

            if tx.send(Ok(path)).is_err() {
                return;
            }
        }
    });

    rx.into_stream().pipe(Box::pin)
}

/// Report whether the provided directory is empty.
/// For the purpose of this function, the directory is empty if it has no
/// regular files.
#[instrument]
pub async fn is_dir_empty(path: &AbsDirPath) -> Result<bool> {
    walk_files(path)
        .try_any(|_| async { true })
        .await
        .map(|found| !found)
}

/// Recursively copy the contents of `src` to `dst`.
#[instrument]
pub async fn copy_dir(src: &AbsDirPath, dst: &AbsDirPath) -> Result<u64> {
    copy_dir_with_concurrency(DEFAULT_CONCURRENCY, src, dst).await
}

/// Recursively copy the contents of `src` to `dst` with specified concurrency.
///
/// Returns the total number of bytes copied across all files.
#[instrument]
pub async fn copy_dir_with_concurrency(
    concurrency: usize,
    src: &AbsDirPath,
    dst: &AbsDirPath,
) -> Result<u64> {
    walk_files(src)
        .map_ok(|src_file| async move {
            let rel = src_file.relative_to(src).context("make relative")?;
            let dst_file = dst.join(rel);
            copy_file(&src_file, &dst_file)
                .await
                .with_context(|| format!("copy {src_file:?} to {dst_file:?}"))
        })
        .try_buffer_unordered(concurrency)
        .try_fold(0u64, |total, copied| async move { Ok(total + copied) })
        .await
}

/// Copy the file from `src` to `dst`. Returns the total number of bytes copied.
#[instrument]
pub async fn copy_file(src: &AbsFilePath, dst: &AbsFilePath) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        create_dir_all(&parent)
            .await
            .context("create parent directory")?;
    }
    let bytes = tokio::fs::copy(src.as_std_path(), dst.as_std_path())
        .await
        .context("copy file")?;
    trace!(target: "charon::system", ?src, ?dst, ?bytes, "copy file");
    Ok(bytes)
}

/// Buffer the file content from disk. Returns `None` if the file is absent.
#[instrument]
pub async fn read_buffered(path: &AbsFilePath) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path.as_std_path()).await {
        Ok(buf) => {
            trace!(target: "charon::system", ?path, bytes = buf.len(), "read file");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Buffer the file content from disk and parse it as UTF8.
#[instrument]
pub async fn read_buffered_utf8(path: &AbsFilePath) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path.as_std_path()).await {
        Ok(buf) => {
            trace!(target: "charon::system", ?path, bytes = buf.len(), "read file as string");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Write the provided file content to disk, creating parent directories if
/// needed. Not atomic; see [`write_atomic`] for the common "stage then
/// rename" pattern used by the mirror and model resolver.
#[instrument(skip(content))]
pub async fn write(path: &AbsFilePath, content: impl AsRef<[u8]>) -> Result<()> {
    let content = content.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(&parent)
            .await
            .context("create parent directory")?;
    }
    tokio::fs::write(path.as_std_path(), content)
        .await
        .with_context(|| format!("write file: {path:?}"))
        .tap_ok(|_| trace!(?path, bytes = content.len(), "write file"))
}

/// Write `content` to a `.tmp` sibling of `path`, then rename it into place.
///
/// This is the pattern the local mirror and model resolver use everywhere
/// they need a reader to never observe a half-written file.
#[instrument(skip(content))]
pub async fn write_atomic(path: &AbsFilePath, content: impl AsRef<[u8]>) -> Result<()> {
    let tmp_path = path
        .as_std_path()
        .with_extension("tmp")
        .pipe(AbsFilePath::try_from)
        .context("build temp path")?;
    write(&tmp_path, content).await.context("write temp file")?;
    rename(&tmp_path, path).await.context("rename into place")
}

/// Open a file for reading.
#[instrument]
pub async fn open_file(path: &AbsFilePath) -> Result<tokio::fs::File> {
    tokio::fs::File::open(path.as_std_path())
        .await
        .with_context(|| format!("open file: {path:?}"))
        .tap_ok(|_| trace!(?path, "open file"))
}

/// Open a file for writing, creating it (and its parents) if needed.
#[instrument]
pub async fn create_file(path: &AbsFilePath) -> Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        create_dir_all(&parent)
            .await
            .context("create parent directory")?;
    }
    tokio::fs::File::create(path.as_std_path())
        .await
        .with_context(|| format!("create file: {path:?}"))
        .tap_ok(|_| trace!(?path, "create file"))
}

/// Remove a file if it exists; a no-op if it is already absent.
#[instrument]
pub async fn remove_file(path: &AbsFilePath) -> Result<()> {
    match tokio::fs::remove_file(path.as_std_path()).await {
        Ok(()) => {
            trace!(target: "charon::system", ?path, "removed file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).context(format!("remove file: {path:?}")),
    }
}

/// Rename a file or folder, overwriting the destination if it already exists.
#[instrument]
pub async fn rename<T>(src: &TypedPath<Abs, T>, dst: &TypedPath<Abs, T>) -> Result<()> {
    tokio::fs::rename(src.as_std_path(), dst.as_std_path())
        .await
        .with_context(|| format!("rename file: {src:?} -> {dst:?}"))
        .tap_ok(|_| trace!(?src, ?dst, "rename file"))
}

/// Read directory entries.
#[instrument]
pub async fn read_dir(path: &AbsDirPath) -> Result<ReadDir> {
    tokio::fs::read_dir(path.as_std_path())
        .await
        .with_context(|| format!("read directory: {path:?}"))
        .tap_ok(|_| trace!(?path, "read directory"))
}

/// Remove the directory and all its contents. A no-op if already absent.
#[instrument]
pub async fn remove_dir_all(path: &AbsDirPath) -> Result<()> {
    match tokio::fs::remove_dir_all(path.as_std_path()).await {
        Ok(()) => {
            trace!(target: "charon::system", ?path, "removed directory");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            trace!(target: "charon::system", ?path, "removed directory (already removed)");
            Ok(())
        }
        Err(err) => Err(err).context(format!("remove directory: {path:?}")),
    }
}

/// Get the standard metadata for the file, if it exists.
#[instrument]
pub async fn metadata(
    path: impl AsRef<std::path::Path> + StdDebug,
) -> Result<Option<std::fs::Metadata>> {
    let path = path.as_ref();
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            trace!(target: "charon::system", ?path, ?metadata, "stat metadata");
            Ok(Some(metadata))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("stat metadata: {path:?}")),
    }
}

/// Check whether the path exists.
///
/// Returns `false` if there is an error checking whether the path exists.
/// This sort of check is prone to TOCTOU races; prefer to just attempt the
/// operation and handle the not-found case where possible.
#[instrument]
pub async fn exists(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    tokio::fs::try_exists(path).await.is_ok_and(identity)
}

/// Check whether the file is marked executable.
#[instrument]
pub async fn is_executable(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    let path = path.as_ref().to_path_buf();
    spawn_blocking(move || is_executable::is_executable(path))
        .await
        .expect("join task")
}

/// Return whether the path represents a directory.
#[instrument]
pub async fn is_dir(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    metadata(path)
        .await
        .is_ok_and(|m| m.is_some_and(|m| m.is_dir()))
}

/// Return whether the path represents a normal file.
#[instrument]
pub async fn is_file(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    metadata(path)
        .await
        .is_ok_and(|m| m.is_some_and(|m| m.is_file()))
}
