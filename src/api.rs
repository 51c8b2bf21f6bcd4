//! JSON request envelope for the engine operations
//!
//! A front end (an editor extension, an agent host) talks to the engine with
//! [`Request`] values and receives a [`Response`]. Requests are tagged by
//! `op`:
//!
//! ```json
//! {"op": "fork_branch", "session_id": "agent-1", "checkpoint_id": "3f2a...", "name": "retry"}
//! ```
//!
//! Every error is reported as an [`ErrorPayload`] whose `kind` is the stable
//! error name from [`RewindError::kind`]. A partial restore carries its
//! [`RestoreResult`](crate::types::RestoreResult) in `details`.

use crate::error::RewindError;
use crate::rewind::Rewind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

fn default_true() -> bool {
    true
}

/// One engine operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Snapshot tracked files as a new checkpoint
    CreateCheckpoint {
        /// Session to add the checkpoint to
        session_id: String,
        /// Non-empty label
        label: String,
        /// Workspace-relative paths to snapshot
        tracked_files: Vec<PathBuf>,
        /// Optional free-form description
        #[serde(default)]
        description: Option<String>,
    },
    /// Read a session's checkpoints, branches and pointers
    GetTimeline {
        /// Session to read
        session_id: String,
    },
    /// Delete an unreferenced checkpoint
    DeleteCheckpoint {
        /// Owning session
        session_id: String,
        /// Checkpoint to delete
        checkpoint_id: String,
    },
    /// Restore the workspace to a checkpoint
    RestoreCheckpoint {
        /// Owning session
        session_id: String,
        /// Target checkpoint
        checkpoint_id: String,
        /// Save the live state first (default true)
        #[serde(default = "default_true")]
        create_backup: bool,
        /// Workspace-relative paths describing the live state
        tracked_files: Vec<PathBuf>,
    },
    /// Create a branch at a checkpoint
    ForkBranch {
        /// Owning session
        session_id: String,
        /// Origin checkpoint
        checkpoint_id: String,
        /// Branch name, unique in the session
        name: String,
    },
    /// Make a branch current
    SwitchBranch {
        /// Owning session
        session_id: String,
        /// Branch to switch to
        branch_id: String,
    },
    /// Delete a non-main, non-current branch
    DeleteBranch {
        /// Owning session
        session_id: String,
        /// Branch to delete
        branch_id: String,
    },
    /// Rename a branch
    RenameBranch {
        /// Owning session
        session_id: String,
        /// Branch to rename
        branch_id: String,
        /// New name
        new_name: String,
    },
    /// Compare two checkpoints
    DiffCheckpoints {
        /// Owning session
        session_id: String,
        /// Older side
        from_id: String,
        /// Newer side
        to_id: String,
    },
}

impl Request {
    /// Operation name as it appears in the `op` tag
    pub fn op(&self) -> &'static str {
        match self {
            Request::CreateCheckpoint { .. } => "create_checkpoint",
            Request::GetTimeline { .. } => "get_timeline",
            Request::DeleteCheckpoint { .. } => "delete_checkpoint",
            Request::RestoreCheckpoint { .. } => "restore_checkpoint",
            Request::ForkBranch { .. } => "fork_branch",
            Request::SwitchBranch { .. } => "switch_branch",
            Request::DeleteBranch { .. } => "delete_branch",
            Request::RenameBranch { .. } => "rename_branch",
            Request::DiffCheckpoints { .. } => "diff_checkpoints",
        }
    }
}

/// Error as seen by a front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable error name, e.g. `DuplicateNameError`
    pub kind: String,
    /// Human readable message
    pub message: String,
    /// Whether repeating the same request may succeed
    pub retryable: bool,
    /// Structured context, e.g. the partial restore result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&RewindError> for ErrorPayload {
    fn from(err: &RewindError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_recoverable(),
            details: err
                .restore_result()
                .and_then(|result| serde_json::to_value(result).ok()),
        }
    }
}

/// Outcome of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the operation succeeded
    pub ok: bool,
    /// Operation output on success (`null` for operations without one)
    #[serde(default)]
    pub data: Option<Value>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    /// Successful response carrying `data`
    pub fn success(data: Value) -> Self {
        Self { ok: true, data: Some(data), error: None }
    }

    /// Failed response
    pub fn failure(err: &RewindError) -> Self {
        Self { ok: false, data: None, error: Some(err.into()) }
    }
}

fn respond<T: Serialize>(result: crate::Result<T>) -> Response {
    match result.and_then(|value| serde_json::to_value(value).map_err(RewindError::from)) {
        Ok(data) => Response::success(data),
        Err(err) => Response::failure(&err),
    }
}

/// Run one request against the engine
pub fn dispatch(rewind: &Rewind, request: Request) -> Response {
    debug!("Dispatching {}", request.op());
    match request {
        Request::CreateCheckpoint { session_id, label, tracked_files, description } => respond(
            rewind.create_checkpoint_with_description(&session_id, &label, &tracked_files, description),
        ),
        Request::GetTimeline { session_id } => respond(rewind.get_timeline(&session_id)),
        Request::DeleteCheckpoint { session_id, checkpoint_id } => {
            respond(rewind.delete_checkpoint(&session_id, &checkpoint_id))
        }
        Request::RestoreCheckpoint { session_id, checkpoint_id, create_backup, tracked_files } => respond(
            rewind.restore_checkpoint(&session_id, &checkpoint_id, create_backup, &tracked_files),
        ),
        Request::ForkBranch { session_id, checkpoint_id, name } => {
            respond(rewind.fork_branch(&session_id, &checkpoint_id, &name))
        }
        Request::SwitchBranch { session_id, branch_id } => {
            respond(rewind.switch_branch(&session_id, &branch_id))
        }
        Request::DeleteBranch { session_id, branch_id } => {
            respond(rewind.delete_branch(&session_id, &branch_id))
        }
        Request::RenameBranch { session_id, branch_id, new_name } => {
            respond(rewind.rename_branch(&session_id, &branch_id, &new_name))
        }
        Request::DiffCheckpoints { session_id, from_id, to_id } => {
            respond(rewind.diff_checkpoints(&session_id, &from_id, &to_id))
        }
    }
}

/// Parse a JSON request, run it and serialize the response
///
/// Malformed JSON is answered with a `ValidationError` response.
pub fn handle_json(rewind: &Rewind, request: &str) -> String {
    let response = match serde_json::from_str::<Request>(request) {
        Ok(request) => dispatch(rewind, request),
        Err(e) => Response::failure(&RewindError::validation(format!("Malformed request: {}", e))),
    };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(
            r#"{{"ok":false,"data":null,"error":{{"kind":"SerializationError","message":"{}","retryable":false}}}}"#,
            e.to_string().replace('"', "'")
        )
    })
}
