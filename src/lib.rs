//! # Rewind - checkpoint timelines for agent workspaces
//!
//! Rewind records the files an AI agent (or any editor session) is working
//! on as a tree of checkpoints, lets the session branch off any checkpoint,
//! compares checkpoints line by line and restores the workspace to any of
//! them.
//!
//! ## Overview
//!
//! - **Checkpoints**: immutable manifests of tracked files, linked to the
//!   checkpoint that was current when they were taken
//! - **Branches**: named lines of work forked from a checkpoint; every
//!   session has exactly one `main` branch
//! - **Diffs**: added, modified and deleted files with unified line diffs
//! - **Restore**: writes a checkpoint back to the workspace, optionally after
//!   saving the live state as a backup checkpoint
//!
//! Sessions are independent timelines inside one storage root, addressed by
//! a caller-chosen `session_id`.
//!
//! ## Architecture
//!
//! - **Content-addressed storage**: file content is stored once per SHA-256
//!   hash, LZ4 compressed, and reference counted across all sessions
//! - **Session records**: checkpoints, branches and pointers are small files
//!   replaced atomically, reloaded as-is on open
//! - **Per-session locking**: each session has its own reader-writer lock
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rewind::{Rewind, RewindError};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rewind = Rewind::init(PathBuf::from("./project"), PathBuf::from("./project/.rewind"))?;
//! let files = rewind.scan_workspace()?;
//!
//! let base = rewind.create_checkpoint("agent-1", "Initial state", &files)?;
//! let attempt = rewind.fork_branch("agent-1", &base.id, "attempt-2")?;
//! rewind.switch_branch("agent-1", &attempt.id)?;
//!
//! match rewind.restore_checkpoint("agent-1", &base.id, true, &files) {
//!     Ok(result) => println!("Restored {} files", result.restored_files.len()),
//!     Err(RewindError::PartialRestore(result)) => {
//!         eprintln!("Restore stopped: {:?}", result.error);
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`](error::Result) with a [`RewindError`].
//! Validation and referential errors leave every record untouched. A restore
//! that fails while changing the workspace reports exactly what it applied
//! through [`RewindError::PartialRestore`].
//!
//! ## Module Organization
//!
//! - [`rewind`]: the [`Rewind`] engine and [`RewindBuilder`]
//! - [`api`]: JSON request envelope over the engine operations
//! - [`checkpoint`], [`branch`], [`timeline`]: the data model
//! - [`repository`], [`diff`], [`restore`]: checkpoint creation, diffs, restores
//! - [`storage`], [`records`], [`compression`]: persistence
//! - [`verification`]: integrity checks
//! - [`file_tracking`]: workspace scanning
//! - [`types`], [`error`]: shared types

// Public API modules
pub mod api;
pub mod branch;
pub mod checkpoint;
pub mod compression;
pub mod diff;
pub mod error;
pub mod file_tracking;
pub mod records;
pub mod repository;
pub mod restore;
pub mod rewind;
pub mod storage;
pub mod timeline;
pub mod types;
pub mod verification;

// Internal modules
mod collections;
mod utils;

pub use branch::{Branch, MAIN_BRANCH_NAME};
pub use checkpoint::Checkpoint;
pub use compression::{CompressionEngine, CompressionStrategy};
pub use error::{EntityKind, Result, RewindError};
pub use file_tracking::WorkspaceScanner;
pub use restore::{RestorePhase, RestorePlan};
pub use rewind::{Rewind, RewindBuilder, DEFAULT_STORAGE_DIR};
pub use storage::Storage;
pub use timeline::{SessionTimeline, TimelineMetadata};
pub use types::*;
pub use verification::VerificationReport;
