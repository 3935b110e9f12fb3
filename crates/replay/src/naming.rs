//! Metric names from archive paths.
//!
//! `<base>/collectd/host/cpu/user.wsp` becomes `collectd.host.cpu.user`.

use std::path::{Component, Path, PathBuf};

use crate::error::NamingError;

/// Suffix stripped from archive file names.
pub const ARCHIVE_SUFFIX: &str = ".wsp";

/// Derives the dotted metric name of `path` relative to `base_dir`.
///
/// Both paths are made absolute against the working directory and
/// normalized lexically (no symlink resolution). The prefix check is done
/// per path component, so `/data/whisper2/x.wsp` is not inside
/// `/data/whisper`. A file equal to the base yields an empty name.
pub fn metric_name(
    path: impl AsRef<Path>,
    base_dir: impl AsRef<Path>,
) -> Result<String, NamingError> {
    let path = absolute(path.as_ref())?;
    let base = absolute(base_dir.as_ref())?;

    let relative = path
        .strip_prefix(&base)
        .map_err(|_| NamingError::OutOfScope {
            path: path.clone(),
            base: base.clone(),
        })?;

    let name = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join(".");

    Ok(match name.strip_suffix(ARCHIVE_SUFFIX) {
        Some(stripped) => stripped.to_string(),
        None => name,
    })
}

fn absolute(path: &Path) -> Result<PathBuf, NamingError> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = std::env::current_dir().map_err(|source| NamingError::Resolve {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(normalize(&cwd.join(path)))
}

/// Drops `.` components and folds `..` into its parent. `..` at the root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
