//! Config file discovery.
//!
//! Config files are looked up from a starting directory towards the
//! filesystem root, so code running anywhere inside a project picks up the
//! project's file.

use std::path::{Path, PathBuf};

/// File name searched for when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Files whose presence marks a project root, in priority order.
pub const ROOT_MARKERS: &[&str] = &[".env", "Cargo.toml", ".git", "README.md"];

/// Directories from `start` up to the filesystem root, nearest first.
///
/// A `start` that names a file begins at its parent directory.
fn search_dirs(start: &Path) -> impl Iterator<Item = &Path> {
    let first = if start.is_file() {
        start.parent().unwrap_or(start)
    } else {
        start
    };
    first.ancestors().filter(|dir| !dir.as_os_str().is_empty())
}

/// Find the nearest `file_name`, walking up from `start`.
pub fn find_config_file(file_name: impl AsRef<Path>, start: impl AsRef<Path>) -> Option<PathBuf> {
    let file_name = file_name.as_ref();
    search_dirs(start.as_ref())
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// Find the project root above `start`.
///
/// Each marker in [`ROOT_MARKERS`] is tried in turn against every directory
/// up to the filesystem root; the first hit wins. Falls back to `start`
/// itself when no marker is found.
pub fn find_project_root(start: impl AsRef<Path>) -> PathBuf {
    let start = start.as_ref();
    ROOT_MARKERS
        .iter()
        .find_map(|marker| {
            search_dirs(start)
                .find(|dir| dir.join(marker).exists())
                .map(Path::to_path_buf)
        })
        .unwrap_or_else(|| start.to_path_buf())
}
