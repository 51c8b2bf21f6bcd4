//! Per-session checkpoint tree and branch table
//!
//! [`SessionTimeline`] is the in-memory arena for one session: checkpoints
//! keyed by ID with a children index, the branch table, and the session's
//! current pointers. Navigation is by repeated lookup through `parent_id`;
//! nothing holds references between records.
//!
//! [`TimelineMetadata`] is the read view handed to callers. It is assembled
//! on demand and never stored.

use crate::branch::Branch;
use crate::checkpoint::Checkpoint;
use crate::collections::{HashMap, HashSet};
use crate::error::{Result, RewindError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Indentation levels drawn by [`SessionTimeline::format_tree`] before deeper
/// checkpoints are rendered flush with their parent
pub const MAX_TREE_INDENT: usize = 32;

/// Session pointers as persisted in `state.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    /// Session identifier
    pub session_id: String,
    /// Checkpoint the workspace is considered to be at
    pub current_checkpoint_id: Option<String>,
    /// Branch new checkpoints are authored on
    pub current_branch_id: Option<String>,
    /// Next value handed out as a checkpoint sequence number
    pub next_sequence: u64,
    /// When the session's first checkpoint was taken
    pub created_at: DateTime<Utc>,
}

/// Read view of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineMetadata {
    /// Session identifier
    pub session_id: String,
    /// All checkpoints ordered by creation
    pub checkpoints: Vec<Checkpoint>,
    /// All branches ordered by creation
    pub branches: Vec<Branch>,
    /// Current checkpoint pointer
    pub current_checkpoint_id: Option<String>,
    /// Current branch pointer
    pub current_branch_id: Option<String>,
}

/// Checkpoint tree, branches and pointers of one session
#[derive(Debug, Clone)]
pub struct SessionTimeline {
    /// Session identifier
    pub session_id: String,
    /// All checkpoints indexed by ID
    pub checkpoints: HashMap<String, Checkpoint>,
    /// Parent ID to child IDs
    pub children: HashMap<String, Vec<String>>,
    /// Checkpoints without a parent
    pub roots: Vec<String>,
    /// All branches indexed by ID
    pub branches: HashMap<String, Branch>,
    /// Current checkpoint pointer
    pub current_checkpoint_id: Option<String>,
    /// Current branch pointer
    pub current_branch_id: Option<String>,
    /// Next checkpoint sequence number
    pub next_sequence: u64,
    /// Creation time of the session
    pub created_at: DateTime<Utc>,
}

impl SessionTimeline {
    /// Create an empty session
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            checkpoints: HashMap::default(),
            children: HashMap::default(),
            roots: Vec::new(),
            branches: HashMap::default(),
            current_checkpoint_id: None,
            current_branch_id: None,
            next_sequence: 0,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a session from persisted records
    ///
    /// Checkpoints are inserted in sequence order so every parent is present
    /// before its children. Dangling parents, dangling pointers or a missing
    /// main branch are reported as store corruption.
    pub fn from_records(
        state: SessionState,
        mut checkpoints: Vec<Checkpoint>,
        branches: Vec<Branch>,
    ) -> Result<Self> {
        let mut timeline = Self::new(state.session_id.clone());
        timeline.created_at = state.created_at;
        timeline.next_sequence = state.next_sequence;

        checkpoints.sort_by_key(|c| c.sequence);
        for checkpoint in checkpoints {
            if checkpoint.sequence >= timeline.next_sequence {
                timeline.next_sequence = checkpoint.sequence + 1;
            }
            timeline.add_checkpoint(checkpoint).map_err(|e| {
                RewindError::corrupt(format!(
                    "Session {} has an inconsistent checkpoint tree: {}",
                    state.session_id, e
                ))
            })?;
        }

        for branch in branches {
            if !timeline.checkpoints.contains_key(&branch.parent_checkpoint_id) {
                return Err(RewindError::corrupt(format!(
                    "Branch '{}' points at missing checkpoint {}",
                    branch.name, branch.parent_checkpoint_id
                )));
            }
            timeline.branches.insert(branch.id.clone(), branch);
        }

        if !timeline.checkpoints.is_empty() {
            let mains = timeline.branches.values().filter(|b| b.is_main).count();
            if mains != 1 {
                return Err(RewindError::corrupt(format!(
                    "Session {} has {} main branches",
                    state.session_id, mains
                )));
            }
        }

        if let Some(id) = &state.current_checkpoint_id {
            if !timeline.checkpoints.contains_key(id) {
                return Err(RewindError::corrupt(format!(
                    "Current checkpoint {} of session {} is missing",
                    id, state.session_id
                )));
            }
        }
        if let Some(id) = &state.current_branch_id {
            if !timeline.branches.contains_key(id) {
                return Err(RewindError::corrupt(format!(
                    "Current branch {} of session {} is missing",
                    id, state.session_id
                )));
            }
        }
        timeline.current_checkpoint_id = state.current_checkpoint_id;
        timeline.current_branch_id = state.current_branch_id;

        debug!(
            "Loaded session {} ({} checkpoints, {} branches)",
            timeline.session_id,
            timeline.checkpoints.len(),
            timeline.branches.len()
        );
        Ok(timeline)
    }

    /// Persistable pointer state
    pub fn state(&self) -> SessionState {
        SessionState {
            session_id: self.session_id.clone(),
            current_checkpoint_id: self.current_checkpoint_id.clone(),
            current_branch_id: self.current_branch_id.clone(),
            next_sequence: self.next_sequence,
            created_at: self.created_at,
        }
    }

    /// A session exists once it has a checkpoint
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Insert a checkpoint into the tree
    ///
    /// The parent, if any, must already be present. Pointers are not moved.
    pub fn add_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<()> {
        let checkpoint_id = checkpoint.id.clone();
        if self.checkpoints.contains_key(&checkpoint_id) {
            return Err(RewindError::internal(format!(
                "Checkpoint {} already exists",
                checkpoint_id
            )));
        }

        match &checkpoint.parent_id {
            Some(parent_id) => {
                if !self.checkpoints.contains_key(parent_id) {
                    return Err(RewindError::checkpoint_not_found(parent_id.clone()));
                }
                if self.would_create_cycle(&checkpoint_id, parent_id) {
                    return Err(RewindError::internal(format!(
                        "Checkpoint {} would create a cycle",
                        checkpoint_id
                    )));
                }
                self.children
                    .entry(parent_id.clone())
                    .or_default()
                    .push(checkpoint_id.clone());
            }
            None => self.roots.push(checkpoint_id.clone()),
        }

        trace!("Added checkpoint {} to session {}", checkpoint.short_id(), self.session_id);
        self.checkpoints.insert(checkpoint_id, checkpoint);
        Ok(())
    }

    /// Reject deletion of checkpoints other records still point at
    pub fn check_deletable(&self, checkpoint_id: &str) -> Result<&Checkpoint> {
        let checkpoint = self
            .checkpoints
            .get(checkpoint_id)
            .ok_or_else(|| RewindError::checkpoint_not_found(checkpoint_id))?;

        if self.children.get(checkpoint_id).is_some_and(|c| !c.is_empty()) {
            return Err(RewindError::ReferentialIntegrity(format!(
                "checkpoint {} has child checkpoints",
                checkpoint_id
            )));
        }
        if let Some(branch) = self.branch_origins_of(checkpoint_id).first() {
            return Err(RewindError::ReferentialIntegrity(format!(
                "checkpoint {} is the origin of branch '{}'",
                checkpoint_id, branch.name
            )));
        }
        if self.current_checkpoint_id.as_deref() == Some(checkpoint_id) {
            return Err(RewindError::ReferentialIntegrity(format!(
                "checkpoint {} is the session's current checkpoint",
                checkpoint_id
            )));
        }
        Ok(checkpoint)
    }

    /// Remove a checkpoint after [`check_deletable`](Self::check_deletable) passes
    pub fn remove_checkpoint(&mut self, checkpoint_id: &str) -> Result<Checkpoint> {
        self.check_deletable(checkpoint_id)?;
        self.detach_checkpoint(checkpoint_id)
            .ok_or_else(|| RewindError::checkpoint_not_found(checkpoint_id))
    }

    /// Remove a leaf without referential checks, used to undo a failed creation
    pub(crate) fn detach_checkpoint(&mut self, checkpoint_id: &str) -> Option<Checkpoint> {
        let checkpoint = self.checkpoints.remove(checkpoint_id)?;
        match &checkpoint.parent_id {
            Some(parent_id) => {
                if let Some(children) = self.children.get_mut(parent_id) {
                    children.retain(|id| id != checkpoint_id);
                    if children.is_empty() {
                        self.children.remove(parent_id);
                    }
                }
            }
            None => self.roots.retain(|id| id != checkpoint_id),
        }
        debug!("Removed checkpoint {} from session {}", checkpoint.short_id(), self.session_id);
        Some(checkpoint)
    }

    /// Look up a checkpoint
    pub fn get_checkpoint(&self, checkpoint_id: &str) -> Result<&Checkpoint> {
        self.checkpoints
            .get(checkpoint_id)
            .ok_or_else(|| RewindError::checkpoint_not_found(checkpoint_id))
    }

    /// Current checkpoint, if any
    pub fn current_checkpoint(&self) -> Option<&Checkpoint> {
        self.current_checkpoint_id
            .as_ref()
            .and_then(|id| self.checkpoints.get(id))
    }

    /// Direct children of a checkpoint
    pub fn get_children(&self, checkpoint_id: &str) -> Vec<&Checkpoint> {
        self.children
            .get(checkpoint_id)
            .map(|ids| ids.iter().filter_map(|id| self.checkpoints.get(id)).collect())
            .unwrap_or_default()
    }

    /// Whether following `parent_id` from `checkpoint_id` reaches a root
    pub fn parent_chain_terminates(&self, checkpoint_id: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::default();
        let mut current = checkpoint_id;
        loop {
            let Some(checkpoint) = self.checkpoints.get(current) else {
                return false;
            };
            if !visited.insert(current) {
                return false;
            }
            match &checkpoint.parent_id {
                Some(parent) => current = parent,
                None => return true,
            }
        }
    }

    fn would_create_cycle(&self, child_id: &str, parent_id: &str) -> bool {
        if child_id == parent_id {
            return true;
        }
        let mut current_id = parent_id;
        let mut visited: HashSet<&str> = HashSet::default();
        while let Some(checkpoint) = self.checkpoints.get(current_id) {
            if !visited.insert(current_id) || current_id == child_id {
                return true;
            }
            match &checkpoint.parent_id {
                Some(id) => current_id = id,
                None => break,
            }
        }
        false
    }

    /// All checkpoints ordered by (timestamp, sequence)
    pub fn list_checkpoints(&self) -> Vec<&Checkpoint> {
        let mut list: Vec<&Checkpoint> = self.checkpoints.values().collect();
        list.sort_by_key(|c| c.order_key());
        list
    }

    /// Checkpoints authored on a branch, oldest first
    pub fn checkpoints_on_branch(&self, branch_id: &str) -> Vec<&Checkpoint> {
        let mut list: Vec<&Checkpoint> = self
            .checkpoints
            .values()
            .filter(|c| c.branch_id.as_deref() == Some(branch_id))
            .collect();
        list.sort_by_key(|c| c.order_key());
        list
    }

    /// Most recent checkpoint authored on a branch
    pub fn latest_on_branch(&self, branch_id: &str) -> Option<&Checkpoint> {
        self.checkpoints
            .values()
            .filter(|c| c.branch_id.as_deref() == Some(branch_id))
            .max_by_key(|c| c.order_key())
    }

    /// Look up a branch
    pub fn get_branch(&self, branch_id: &str) -> Result<&Branch> {
        self.branches
            .get(branch_id)
            .ok_or_else(|| RewindError::branch_not_found(branch_id))
    }

    /// Look up a branch by its name
    pub fn branch_by_name(&self, name: &str) -> Option<&Branch> {
        self.branches.values().find(|b| b.name == name)
    }

    /// The session's main branch
    pub fn main_branch(&self) -> Option<&Branch> {
        self.branches.values().find(|b| b.is_main)
    }

    /// Current branch, if any
    pub fn current_branch(&self) -> Option<&Branch> {
        self.current_branch_id
            .as_ref()
            .and_then(|id| self.branches.get(id))
    }

    /// Branches rooted at a checkpoint
    pub fn branch_origins_of(&self, checkpoint_id: &str) -> Vec<&Branch> {
        self.branches
            .values()
            .filter(|b| b.parent_checkpoint_id == checkpoint_id)
            .collect()
    }

    /// All branches ordered by creation time, main first on ties
    pub fn list_branches(&self) -> Vec<&Branch> {
        let mut list: Vec<&Branch> = self.branches.values().collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| b.is_main.cmp(&a.is_main))
                .then_with(|| a.name.cmp(&b.name))
        });
        list
    }

    /// Assemble the read view
    pub fn metadata(&self) -> TimelineMetadata {
        TimelineMetadata {
            session_id: self.session_id.clone(),
            checkpoints: self.list_checkpoints().into_iter().cloned().collect(),
            branches: self.list_branches().into_iter().cloned().collect(),
            current_checkpoint_id: self.current_checkpoint_id.clone(),
            current_branch_id: self.current_branch_id.clone(),
        }
    }

    /// Shape statistics for the checkpoint tree
    pub fn stats(&self) -> TimelineStats {
        let leaf_checkpoints = self
            .checkpoints
            .keys()
            .filter(|id| !self.children.contains_key(*id))
            .count();
        let max_depth = self
            .roots
            .iter()
            .map(|root| self.depth_below(root))
            .max()
            .unwrap_or(0);
        let fork_points = self.children.values().filter(|c| c.len() > 1).count();

        TimelineStats {
            total_checkpoints: self.checkpoints.len(),
            root_checkpoints: self.roots.len(),
            leaf_checkpoints,
            max_depth,
            fork_points,
            branches: self.branches.len(),
        }
    }

    fn depth_below(&self, checkpoint_id: &str) -> usize {
        // Iterative so very long linear histories do not overflow the stack.
        let mut max_depth = 0;
        let mut stack = vec![(checkpoint_id, 1usize)];
        while let Some((id, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let Some(children) = self.children.get(id) {
                stack.extend(children.iter().map(|c| (c.as_str(), depth + 1)));
            }
        }
        max_depth
    }

    /// Render the checkpoint tree with box-drawing connectors
    ///
    /// Walks with an explicit stack, and indentation stops growing after
    /// [`MAX_TREE_INDENT`] levels, so long histories stay printable.
    pub fn format_tree(&self) -> String {
        let mut roots: Vec<&Checkpoint> = self
            .roots
            .iter()
            .filter_map(|id| self.checkpoints.get(id))
            .collect();
        roots.sort_by_key(|c| c.order_key());

        let mut stack: Vec<(&Checkpoint, String, bool, usize)> = Vec::new();
        let count = roots.len();
        for (i, root) in roots.into_iter().enumerate().rev() {
            stack.push((root, String::new(), i + 1 == count, 0));
        }

        let mut result = String::new();
        while let Some((checkpoint, prefix, is_last, depth)) = stack.pop() {
            result.push_str(&prefix);
            result.push_str(if is_last { "└── " } else { "├── " });
            if self.current_checkpoint_id.as_deref() == Some(checkpoint.id.as_str()) {
                result.push_str("* ");
            }
            result.push_str(&checkpoint.display_format());

            let mut branch_names: Vec<&str> = self
                .branch_origins_of(&checkpoint.id)
                .into_iter()
                .map(|b| b.name.as_str())
                .collect();
            if !branch_names.is_empty() {
                branch_names.sort_unstable();
                result.push_str(&format!(" <{}>", branch_names.join(", ")));
            }
            result.push('\n');

            let mut children = self.get_children(&checkpoint.id);
            children.sort_by_key(|c| c.order_key());
            let child_prefix = if depth < MAX_TREE_INDENT {
                format!("{}{}", prefix, if is_last { "    " } else { "│   " })
            } else {
                prefix
            };
            let count = children.len();
            // Pushed newest first so the oldest child is rendered first.
            for (i, child) in children.into_iter().enumerate().rev() {
                stack.push((child, child_prefix.clone(), i + 1 == count, depth + 1));
            }
        }
        result
    }
}

/// Shape of a session's checkpoint tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineStats {
    /// Total checkpoints
    pub total_checkpoints: usize,
    /// Checkpoints without a parent
    pub root_checkpoints: usize,
    /// Checkpoints without children
    pub leaf_checkpoints: usize,
    /// Longest root-to-leaf path
    pub max_depth: usize,
    /// Checkpoints with more than one child
    pub fork_points: usize,
    /// Branch records
    pub branches: usize,
}
