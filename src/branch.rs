//! Branch records and the branch manager
//!
//! A branch is a named pointer rooted at the checkpoint it was forked from.
//! Checkpoints record the branch that was current when they were taken,
//! which is how a branch's "latest" checkpoint is found.

use crate::error::{Result, RewindError};
use crate::records::SessionRecords;
use crate::timeline::SessionTimeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Name given to the branch created with a session's first checkpoint
pub const MAIN_BRANCH_NAME: &str = "main";

/// Longest accepted branch name
const MAX_NAME_LEN: usize = 100;

/// A named line of work within a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branch {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Session the branch belongs to
    pub session_id: String,
    /// Name, unique within the session
    pub name: String,
    /// Checkpoint the branch was forked from
    pub parent_checkpoint_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Optional description
    pub description: Option<String>,
    /// Whether this is the session's undeletable main branch
    pub is_main: bool,
}

impl Branch {
    /// Create a branch record with a fresh ID
    pub fn new(
        session_id: impl Into<String>,
        name: impl Into<String>,
        parent_checkpoint_id: impl Into<String>,
        is_main: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            name: name.into(),
            parent_checkpoint_id: parent_checkpoint_id.into(),
            created_at: Utc::now(),
            description: None,
            is_main,
        }
    }

    /// The main branch of a session rooted at its first checkpoint
    pub fn main(session_id: impl Into<String>, origin_checkpoint_id: impl Into<String>) -> Self {
        Self::new(session_id, MAIN_BRANCH_NAME, origin_checkpoint_id, true)
    }

    /// First 8 characters of the ID
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }
}

/// Trim a branch name and reject empty or unprintable ones
pub fn validate_branch_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RewindError::validation("Branch name must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(RewindError::validation(format!(
            "Branch name longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(RewindError::validation(
            "Branch name must not contain control characters",
        ));
    }
    Ok(trimmed.to_string())
}

/// Branch operations over one locked session
///
/// Each operation persists its records before touching the in-memory
/// timeline, so a failed write leaves the session exactly as it was.
#[derive(Debug, Clone, Copy)]
pub struct BranchManager<'a> {
    records: &'a SessionRecords,
}

impl<'a> BranchManager<'a> {
    /// Manager writing through `records`
    pub fn new(records: &'a SessionRecords) -> Self {
        Self { records }
    }

    /// Create a branch rooted at `checkpoint_id`; pointers do not move
    pub fn fork(
        &self,
        timeline: &mut SessionTimeline,
        checkpoint_id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<Branch> {
        let name = validate_branch_name(name)?;
        timeline.get_checkpoint(checkpoint_id)?;
        if timeline.branch_by_name(&name).is_some() {
            return Err(RewindError::DuplicateName(name));
        }

        let mut branch = Branch::new(timeline.session_id.clone(), name, checkpoint_id, false);
        branch.description = description;
        self.records.write_branch(&branch)?;
        timeline.branches.insert(branch.id.clone(), branch.clone());

        info!(
            "Forked branch '{}' ({}) from checkpoint {}",
            branch.name,
            branch.short_id(),
            &checkpoint_id[..8.min(checkpoint_id.len())]
        );
        Ok(branch)
    }

    /// Make `branch_id` current and move to its latest checkpoint
    ///
    /// A branch with no checkpoints of its own resolves to its origin.
    pub fn switch(&self, timeline: &mut SessionTimeline, branch_id: &str) -> Result<()> {
        let branch = timeline.get_branch(branch_id)?;
        let target = timeline
            .latest_on_branch(branch_id)
            .map(|c| c.id.clone())
            .unwrap_or_else(|| branch.parent_checkpoint_id.clone());

        let mut state = timeline.state();
        state.current_branch_id = Some(branch_id.to_string());
        state.current_checkpoint_id = Some(target.clone());
        self.records.write_state(&state)?;

        timeline.current_branch_id = state.current_branch_id;
        timeline.current_checkpoint_id = state.current_checkpoint_id;
        debug!(
            "Switched session {} to branch {} at checkpoint {}",
            timeline.session_id,
            branch_id,
            &target[..8.min(target.len())]
        );
        Ok(())
    }

    /// Rename a branch, keeping names unique within the session
    pub fn rename(&self, timeline: &mut SessionTimeline, branch_id: &str, new_name: &str) -> Result<()> {
        let new_name = validate_branch_name(new_name)?;
        let branch = timeline.get_branch(branch_id)?;
        if branch.name == new_name {
            return Ok(());
        }
        if timeline.branch_by_name(&new_name).is_some() {
            return Err(RewindError::DuplicateName(new_name));
        }

        let mut renamed = branch.clone();
        let old_name = std::mem::replace(&mut renamed.name, new_name);
        self.records.write_branch(&renamed)?;
        info!("Renamed branch '{}' to '{}'", old_name, renamed.name);
        timeline.branches.insert(renamed.id.clone(), renamed);
        Ok(())
    }

    /// Delete a branch record; checkpoints authored on it are kept
    pub fn delete(&self, timeline: &mut SessionTimeline, branch_id: &str) -> Result<()> {
        let branch = timeline.get_branch(branch_id)?;
        if branch.is_main {
            return Err(RewindError::CannotDeleteMainBranch(branch.name.clone()));
        }
        if timeline.current_branch_id.as_deref() == Some(branch_id) {
            return Err(RewindError::ReferentialIntegrity(format!(
                "branch '{}' is the session's current branch; switch away first",
                branch.name
            )));
        }

        self.records.remove_branch(&timeline.session_id, branch_id)?;
        if let Some(branch) = timeline.branches.remove(branch_id) {
            info!("Deleted branch '{}' ({})", branch.name, branch.short_id());
        }
        Ok(())
    }

    /// Resolve a branch by ID, name or unique ID prefix
    pub fn resolve<'t>(&self, timeline: &'t SessionTimeline, reference: &str) -> Result<&'t Branch> {
        if let Some(branch) = timeline.branches.get(reference) {
            return Ok(branch);
        }
        if let Some(branch) = timeline.branch_by_name(reference) {
            return Ok(branch);
        }
        let matches: Vec<&Branch> = timeline
            .branches
            .values()
            .filter(|b| b.id.starts_with(reference))
            .collect();
        match matches.as_slice() {
            [only] if !reference.is_empty() => Ok(only),
            [] | [_] => Err(RewindError::branch_not_found(reference)),
            _ => Err(RewindError::validation(format!(
                "Branch prefix '{}' is ambiguous",
                reference
            ))),
        }
    }
}
