//! Loading the file to send and saving the file received.
//!
//! A received file is first written to `<name>.out.part` and only renamed to
//! `<name>.out` once it is complete, so an interrupted write never leaves a
//! final-looking output behind.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::TransferError;
use crate::sender::Outgoing;

/// Suffix of a saved file.
pub const OUTPUT_SUFFIX: &str = ".out";

/// Suffix while the file is being written.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Read `path` into memory, announcing it under its base name.
pub async fn load(path: &Path) -> Result<Outgoing, TransferError> {
    let name = base_name(path)?;
    let data = tokio::fs::read(path).await.map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            TransferError::FileNotFound(path.to_path_buf())
        } else {
            TransferError::FileRead {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    log::debug!("[store] loaded {} ({} bytes)", path.display(), data.len());
    Ok(Outgoing::new(name, data))
}

/// Write `bytes` as `dir/<name>.out` and return the final path.
///
/// Only the last path component of `name` is used, so a peer cannot direct
/// the write outside `dir`.
pub async fn save(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, TransferError> {
    let name = base_name(Path::new(name))?;
    let target = dir.join(format!("{name}{OUTPUT_SUFFIX}"));
    let partial = dir.join(format!("{name}{OUTPUT_SUFFIX}{PARTIAL_SUFFIX}"));

    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| TransferError::FileWrite { path, source }
    };
    tokio::fs::write(&partial, bytes)
        .await
        .map_err(write_err(&partial))?;
    tokio::fs::rename(&partial, &target)
        .await
        .map_err(write_err(&target))?;

    log::debug!("[store] saved {} ({} bytes)", target.display(), bytes.len());
    Ok(target)
}

/// Last component of `path` as UTF-8.
fn base_name(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            TransferError::Argument(format!("{} has no usable file name", path.display()))
        })
}
