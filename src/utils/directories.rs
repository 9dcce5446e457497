//! Filesystem scanning helpers for bucket archives.
//!
//! Bucket archives are plain directory trees, so listing partition
//! directories and their Parquet files efficiently is a recurring need.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use rayon::prelude::*;

use crate::error::{BucketError, Result};
use crate::utils::logging::log_warning;

/// Validates that a directory exists and is a directory
pub fn validate_directory(dir: &Path) -> Result<()> {
    if !dir.exists() || !dir.is_dir() {
        return Err(BucketError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Directory does not exist: {}", dir.display()),
        )));
    }
    Ok(())
}

/// List the files directly inside a directory, optionally filtered by
/// extension, sorted by path.
pub fn list_files(dir: &Path, extension: Option<&str>) -> Result<Vec<PathBuf>> {
    validate_directory(dir)?;
    let files = std::fs::read_dir(dir)
        .map_err(|e| BucketError::io_with_path(e, dir))?
        .filter_map(|entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(BucketError::Io(e))),
            };
            let path = entry.path();
            if !path.is_file() {
                return None;
            }
            match extension {
                Some(ext)
                    if path.extension().and_then(|e| e.to_str())
                        != Some(ext.trim_start_matches('.')) =>
                {
                    None
                }
                _ => Some(Ok(path)),
            }
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .sorted()
        .collect_vec();
    Ok(files)
}

/// List all matching files within a set of directories.
///
/// Directories are scanned in parallel with rayon; the combined result is
/// sorted so downstream grouping is deterministic.
pub fn files_in_dirs(dirs: &[PathBuf], extension: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = dirs
        .par_iter()
        .map(|dir| list_files(dir, extension))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    files.sort();
    Ok(files)
}

/// Recursively collect the leaf directories (directories containing no
/// subdirectories) under a base directory.
pub fn leaf_directories(base_dir: &Path) -> Result<Vec<PathBuf>> {
    validate_directory(base_dir)?;
    let mut leaves = Vec::new();
    collect_leaves(base_dir, &mut leaves)?;
    leaves.sort();
    Ok(leaves)
}

fn collect_leaves(dir: &Path, leaves: &mut Vec<PathBuf>) -> Result<()> {
    let mut is_leaf = true;
    for entry in std::fs::read_dir(dir).map_err(|e| BucketError::io_with_path(e, dir))? {
        let entry = entry.map_err(BucketError::Io)?;
        if entry.path().is_dir() {
            is_leaf = false;
            collect_leaves(&entry.path(), leaves)?;
        }
    }
    if is_leaf {
        leaves.push(dir.to_path_buf());
    }
    Ok(())
}

/// Retrieve the first file inside a directory, if any.
#[must_use]
pub fn first_file(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut files = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect_vec();
    files.sort();
    files.into_iter().next()
}

/// Delete files inside a directory whose name starts with a given prefix.
///
/// Used by update merges to drop consolidated files that are about to be
/// rewritten. The prefix is matched up to the following separator so that
/// `2021_1` does not also match `2021_10`.
pub fn remove_files_with_prefix(dir: &Path, prefix: &str) -> Result<usize> {
    let mut removed = 0;
    for path in list_files(dir, None)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(&format!("{prefix}_")) {
            if let Err(e) = std::fs::remove_file(&path) {
                log_warning(&format!("Failed to remove stale file: {e}"), Some(&path));
            } else {
                removed += 1;
            }
        }
    }
    Ok(removed)
}
