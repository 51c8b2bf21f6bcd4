//! Checkpoint records
//!
//! A [`Checkpoint`] is an immutable manifest of a session's tracked files at
//! one point in time. On disk it is split into a JSON header
//! ([`CheckpointHeader`]) and a bincode manifest of [`FileSnapshot`]s; the
//! header carries a digest of the manifest so a torn or edited manifest is
//! detected on load.

use crate::error::{Result, RewindError};
use crate::types::FileSnapshot;
use crate::utils::format_bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Represents a checkpoint in a session timeline
///
/// # Examples
///
/// ```rust
/// use rewind::checkpoint::Checkpoint;
///
/// let checkpoint = Checkpoint::new("session-1", "Initial state", None, None, vec![], 0);
/// assert!(checkpoint.parent_id.is_none());
/// assert_eq!(checkpoint.short_id().len(), 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Session this checkpoint belongs to
    pub session_id: String,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Short human label
    pub label: String,
    /// Checkpoint that was current when this one was created
    pub parent_id: Option<String>,
    /// Branch that was current when this one was created
    pub branch_id: Option<String>,
    /// Tracked files, sorted by path
    pub files: Vec<FileSnapshot>,
    /// Optional longer description
    pub description: Option<String>,
    /// Per-session creation counter, breaks timestamp ties
    pub sequence: u64,
}

impl Checkpoint {
    /// Create a new checkpoint with a fresh ID and the current time
    ///
    /// `files` are sorted by path so manifests compare and hash stably.
    pub fn new(
        session_id: impl Into<String>,
        label: impl Into<String>,
        parent_id: Option<String>,
        branch_id: Option<String>,
        mut files: Vec<FileSnapshot>,
        sequence: u64,
    ) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            label: label.into(),
            parent_id,
            branch_id,
            files,
            description: None,
            sequence,
        }
    }

    /// Attach a description
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// First 8 characters of the ID
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }

    /// Sum of tracked file sizes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Look up one tracked file
    pub fn file(&self, path: &Path) -> Option<&FileSnapshot> {
        self.files
            .binary_search_by(|f| f.path.as_path().cmp(path))
            .ok()
            .map(|idx| &self.files[idx])
    }

    /// Ordering key used for "latest" queries
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }

    /// Format checkpoint for display
    pub fn display_format(&self) -> String {
        format!(
            "[{}] {} - {} ({} files, {})",
            self.short_id(),
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.label,
            self.files.len(),
            format_bytes(self.total_size())
        )
    }

    /// Split into the persisted header and manifest
    pub(crate) fn header(&self) -> CheckpointHeader {
        CheckpointHeader {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            timestamp: self.timestamp,
            label: self.label.clone(),
            parent_id: self.parent_id.clone(),
            branch_id: self.branch_id.clone(),
            description: self.description.clone(),
            sequence: self.sequence,
            file_count: self.files.len(),
            total_size: self.total_size(),
            manifest_digest: manifest_digest(&self.files),
        }
    }

    /// Reassemble a checkpoint from its persisted parts
    pub(crate) fn from_parts(header: CheckpointHeader, files: Vec<FileSnapshot>) -> Result<Self> {
        let digest = manifest_digest(&files);
        if files.len() != header.file_count || digest != header.manifest_digest {
            return Err(RewindError::corrupt(format!(
                "Manifest of checkpoint {} does not match its header",
                header.id
            )));
        }
        Ok(Self {
            id: header.id,
            session_id: header.session_id,
            timestamp: header.timestamp,
            label: header.label,
            parent_id: header.parent_id,
            branch_id: header.branch_id,
            files,
            description: header.description,
            sequence: header.sequence,
        })
    }
}

/// Checkpoint metadata as written to `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CheckpointHeader {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub parent_id: Option<String>,
    pub branch_id: Option<String>,
    pub description: Option<String>,
    pub sequence: u64,
    pub file_count: usize,
    pub total_size: u64,
    pub manifest_digest: String,
}

/// SHA-256 over every `(path, hash, size)` triple in manifest order
fn manifest_digest(files: &[FileSnapshot]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(file.content_hash.as_bytes());
        hasher.update(file.size.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}
