//! Error types for the Rewind engine
//!
//! Every public operation returns [`Result<T>`]. The variants mirror the
//! failure classes callers are expected to branch on: missing records,
//! rejected input, name collisions, blocked deletions, store corruption and
//! partially applied restores. Infrastructure failures (I/O, serialization)
//! are carried through unchanged.

use crate::types::RestoreResult;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Rewind engine
pub type Result<T> = std::result::Result<T, RewindError>;

/// Kind of record a [`RewindError::NotFound`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A session with no checkpoints yet
    Session,
    /// A checkpoint record
    Checkpoint,
    /// A branch record
    Branch,
    /// A blob in the content store
    Blob,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Session => "Session",
            EntityKind::Checkpoint => "Checkpoint",
            EntityKind::Branch => "Branch",
            EntityKind::Blob => "Blob",
        };
        f.write_str(name)
    }
}

/// Main error type for all Rewind operations
#[derive(Debug, Error)]
pub enum RewindError {
    /// Unknown session, checkpoint, branch or blob
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up
        kind: EntityKind,
        /// The identifier that did not resolve
        id: String,
    },

    /// Empty or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Branch name already taken within the session
    #[error("Branch name already exists: {0}")]
    DuplicateName(String),

    /// Deletion blocked by children, branch origins or the current pointer
    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    /// The main branch of a session can never be deleted
    #[error("Cannot delete the main branch: {0}")]
    CannotDeleteMainBranch(String),

    /// A referenced blob is missing or does not match its hash
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    /// Restore stopped partway through applying files to the workspace
    #[error("Partial restore: {}", .0.error.as_deref().unwrap_or("unknown failure"))]
    PartialRestore(Box<RestoreResult>),

    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Glob or ignore pattern parsing error
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Storage is not initialized
    #[error("Storage not initialized at path: {0:?}")]
    StorageNotInitialized(PathBuf),

    /// Storage already exists
    #[error("Storage already exists at path: {0:?}")]
    StorageAlreadyExists(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for RewindError {
    fn from(err: bincode::error::DecodeError) -> Self {
        RewindError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for RewindError {
    fn from(err: bincode::error::EncodeError) -> Self {
        RewindError::Bincode(err.to_string())
    }
}

impl From<globset::Error> for RewindError {
    fn from(err: globset::Error) -> Self {
        RewindError::InvalidPattern(err.to_string())
    }
}

impl From<ignore::Error> for RewindError {
    fn from(err: ignore::Error) -> Self {
        RewindError::InvalidPattern(err.to_string())
    }
}

impl RewindError {
    /// Unknown session
    pub fn session_not_found(id: impl Into<String>) -> Self {
        RewindError::NotFound { kind: EntityKind::Session, id: id.into() }
    }

    /// Unknown checkpoint
    pub fn checkpoint_not_found(id: impl Into<String>) -> Self {
        RewindError::NotFound { kind: EntityKind::Checkpoint, id: id.into() }
    }

    /// Unknown branch
    pub fn branch_not_found(id: impl Into<String>) -> Self {
        RewindError::NotFound { kind: EntityKind::Branch, id: id.into() }
    }

    /// Unknown blob
    pub fn blob_not_found(hash: impl Into<String>) -> Self {
        RewindError::NotFound { kind: EntityKind::Blob, id: hash.into() }
    }

    /// Create a validation error with a custom message
    pub fn validation(msg: impl Into<String>) -> Self {
        RewindError::Validation(msg.into())
    }

    /// Create a corruption error with a custom message
    pub fn corrupt(msg: impl Into<String>) -> Self {
        RewindError::CorruptStore(msg.into())
    }

    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        RewindError::Decompression(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        RewindError::Internal(msg.into())
    }

    /// Stable machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            RewindError::NotFound { .. } => "NotFound",
            RewindError::Validation(_) => "ValidationError",
            RewindError::DuplicateName(_) => "DuplicateNameError",
            RewindError::ReferentialIntegrity(_) => "ReferentialIntegrityError",
            RewindError::CannotDeleteMainBranch(_) => "CannotDeleteMainBranchError",
            RewindError::CorruptStore(_) => "CorruptStoreError",
            RewindError::PartialRestore(_) => "PartialRestoreError",
            RewindError::Io(_) => "IoError",
            RewindError::Json(_) | RewindError::Bincode(_) => "SerializationError",
            RewindError::Decompression(_) => "CorruptStoreError",
            RewindError::InvalidPattern(_) => "ValidationError",
            RewindError::StorageNotInitialized(_)
            | RewindError::StorageAlreadyExists(_)
            | RewindError::InvalidConfiguration(_) => "ConfigurationError",
            RewindError::WalkDir(_) => "IoError",
            RewindError::Internal(_) => "InternalError",
        }
    }

    /// Check if retrying the same call may succeed
    ///
    /// Only I/O failures qualify. A partial restore has already changed the
    /// workspace and must not be retried blindly.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RewindError::Io(_) | RewindError::WalkDir(_))
    }

    /// Check if this error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RewindError::CorruptStore(_) | RewindError::Decompression(_)
        )
    }

    /// Restore accounting carried by a partial restore
    pub fn restore_result(&self) -> Option<&RestoreResult> {
        match self {
            RewindError::PartialRestore(result) => Some(result),
            _ => None,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            RewindError::NotFound { kind: EntityKind::Checkpoint, id } => {
                format!("Checkpoint '{}' not found. Run 'rewind list' to see available checkpoints.", id)
            }
            RewindError::NotFound { kind: EntityKind::Branch, id } => {
                format!("Branch '{}' not found. Run 'rewind branches' to see available branches.", id)
            }
            RewindError::CannotDeleteMainBranch(_) => {
                "The main branch cannot be deleted. Rename it instead if needed.".to_string()
            }
            RewindError::PartialRestore(result) => match &result.backup_checkpoint_id {
                Some(backup) => format!(
                    "{} Your previous state was saved as checkpoint {}.",
                    self, backup
                ),
                None => self.to_string(),
            },
            RewindError::StorageNotInitialized(path) => {
                format!("Storage not initialized at {:?}. Run 'rewind init' first.", path)
            }
            _ => self.to_string(),
        }
    }
}
