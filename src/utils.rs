//! Filesystem and hashing helpers shared across the engine

use crate::error::{Result, RewindError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Bytes inspected when sniffing for binary content
const BINARY_SNIFF_LEN: usize = 8192;

/// SHA-256 of `data` as 64 lowercase hex characters
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Content is binary if a NUL byte appears in its first 8KB
pub fn is_binary_content(content: &[u8]) -> bool {
    let check_len = content.len().min(BINARY_SNIFF_LEN);
    content[..check_len].contains(&0)
}

/// Check that `path` is a plain relative path that stays inside the workspace
///
/// Returns the path with `.` components removed. Absolute paths, roots,
/// prefixes and any `..` component are rejected.
pub fn normalize_tracked_path(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RewindError::validation(format!(
                    "Tracked path must be relative to the workspace: {:?}",
                    path
                )));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(RewindError::validation("Tracked path is empty"));
    }
    Ok(normalized)
}

/// Atomic file write (write to a sibling temp file then rename)
///
/// The temp name is unique per call so concurrent writers to the same
/// directory never clobber each other's partial files.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| RewindError::internal(format!("No parent directory for {:?}", path)))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    if let Err(e) = fs::write(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Remove empty ancestors of `path`, stopping at `root`
pub fn prune_empty_parents(path: &Path, root: &Path) -> Result<()> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if !remove_dir_if_empty(dir)? {
            break;
        }
        current = dir.parent();
    }
    Ok(())
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
