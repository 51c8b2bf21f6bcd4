//! Store-wide integrity checking
//!
//! [`StoreVerifier`] cross-checks every session against the content store:
//!
//! 1. **Timelines**: parent chains terminate, branch origins and pointers
//!    resolve, and each non-empty session has exactly one main branch.
//! 2. **References**: the reference count recorded for each blob equals the
//!    number of manifest entries naming it across all sessions.
//! 3. **Blobs**: every referenced blob exists and, for a deep check, still
//!    hashes to its name. Blob files nothing references are reported as
//!    orphans.
//!
//! Verification never modifies anything; problems are collected in a
//! [`VerificationReport`].

use crate::collections::HashMap;
use crate::error::{Result, RewindError};
use crate::storage::Storage;
use crate::timeline::SessionTimeline;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Recorded and expected reference counts for one blob disagree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefCountMismatch {
    /// Blob hash
    pub hash: String,
    /// Manifest entries referencing the blob
    pub expected: u64,
    /// Count held by the store
    pub recorded: u64,
}

/// Result of verifying a storage root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Sessions examined
    pub sessions_checked: usize,
    /// Checkpoints examined
    pub checkpoints_checked: usize,
    /// Distinct referenced blobs examined
    pub blobs_checked: usize,
    /// Referenced blobs with no file on disk
    pub missing_blobs: Vec<String>,
    /// Blobs whose content no longer matches their hash
    pub corrupt_blobs: Vec<String>,
    /// Reference count disagreements
    pub ref_count_mismatches: Vec<RefCountMismatch>,
    /// Blob files nothing references
    pub orphaned_objects: Vec<String>,
    /// Structural problems in session timelines
    pub timeline_errors: Vec<String>,
    /// Time taken in milliseconds
    pub verification_time_ms: u64,
}

impl VerificationReport {
    /// No problem of any kind was found
    pub fn is_valid(&self) -> bool {
        self.missing_blobs.is_empty()
            && self.corrupt_blobs.is_empty()
            && self.ref_count_mismatches.is_empty()
            && self.orphaned_objects.is_empty()
            && self.timeline_errors.is_empty()
    }

    /// One-line description
    pub fn summary(&self) -> String {
        if self.is_valid() {
            return format!(
                "Storage is valid ({} sessions, {} checkpoints, {} blobs verified in {}ms)",
                self.sessions_checked,
                self.checkpoints_checked,
                self.blobs_checked,
                self.verification_time_ms
            );
        }
        let issues = [
            (self.missing_blobs.len(), "missing blobs"),
            (self.corrupt_blobs.len(), "corrupt blobs"),
            (self.ref_count_mismatches.len(), "reference count mismatches"),
            (self.orphaned_objects.len(), "orphaned objects"),
            (self.timeline_errors.len(), "timeline errors"),
        ]
        .into_iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, what)| format!("{} {}", count, what))
        .collect::<Vec<_>>()
        .join(", ");
        format!("Storage is invalid: {}", issues)
    }
}

/// Read-only cross-check of sessions and the content store
#[derive(Debug)]
pub struct StoreVerifier<'a> {
    storage: &'a Storage,
}

impl<'a> StoreVerifier<'a> {
    /// Verifier over `storage`
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Verify every given session against the store
    ///
    /// With `deep` set each referenced blob is read back and re-hashed.
    pub fn verify(&self, timelines: &[SessionTimeline], deep: bool) -> Result<VerificationReport> {
        let start = Instant::now();
        let mut report = VerificationReport {
            sessions_checked: timelines.len(),
            ..Default::default()
        };

        let mut expected: HashMap<String, u64> = HashMap::default();
        for timeline in timelines {
            report.timeline_errors.extend(check_timeline(timeline));
            report.checkpoints_checked += timeline.checkpoints.len();
            for checkpoint in timeline.checkpoints.values() {
                for file in &checkpoint.files {
                    *expected.entry(file.content_hash.clone()).or_insert(0) += 1;
                }
            }
        }
        report.blobs_checked = expected.len();

        for (hash, recorded) in self.storage.referenced_hashes() {
            let expected_count = expected.get(&hash).copied().unwrap_or(0);
            if expected_count != recorded {
                report.ref_count_mismatches.push(RefCountMismatch {
                    hash,
                    expected: expected_count,
                    recorded,
                });
            }
        }
        for (hash, &expected_count) in &expected {
            if self.storage.ref_count(hash) == 0 {
                report.ref_count_mismatches.push(RefCountMismatch {
                    hash: hash.clone(),
                    expected: expected_count,
                    recorded: 0,
                });
            }
        }

        let hashes: Vec<&String> = expected.keys().collect();
        let outcomes: Vec<(String, Option<bool>)> = hashes
            .par_iter()
            .map(|hash| {
                let state = if !self.storage.contains(hash) {
                    None
                } else if deep {
                    Some(self.storage.get(hash).is_ok())
                } else {
                    Some(true)
                };
                ((*hash).clone(), state)
            })
            .collect();
        for (hash, state) in outcomes {
            match state {
                None => report.missing_blobs.push(hash),
                Some(false) => report.corrupt_blobs.push(hash),
                Some(true) => {}
            }
        }

        report.orphaned_objects = self
            .storage
            .list_all_objects()?
            .into_iter()
            .map(|(hash, _)| hash)
            .filter(|hash| !expected.contains_key(hash))
            .collect();

        report.missing_blobs.sort();
        report.corrupt_blobs.sort();
        report.orphaned_objects.sort();
        report.ref_count_mismatches.sort_by(|a, b| a.hash.cmp(&b.hash));
        report.verification_time_ms = start.elapsed().as_millis() as u64;

        if report.is_valid() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }
}

/// Structural problems of one session
fn check_timeline(timeline: &SessionTimeline) -> Vec<String> {
    let mut errors = Vec::new();
    let sid = &timeline.session_id;

    for checkpoint in timeline.checkpoints.values() {
        if let Some(parent_id) = &checkpoint.parent_id {
            if !timeline.checkpoints.contains_key(parent_id) {
                errors.push(format!(
                    "{}: checkpoint {} has missing parent {}",
                    sid, checkpoint.id, parent_id
                ));
            }
        }
        if !timeline.parent_chain_terminates(&checkpoint.id) {
            errors.push(format!("{}: checkpoint {} is on a parent cycle", sid, checkpoint.id));
        }
    }

    for branch in timeline.branches.values() {
        if timeline.get_checkpoint(&branch.parent_checkpoint_id).is_err() {
            errors.push(format!(
                "{}: branch '{}' starts at missing checkpoint {}",
                sid, branch.name, branch.parent_checkpoint_id
            ));
        }
    }

    let mains = timeline.branches.values().filter(|b| b.is_main).count();
    if !timeline.is_empty() && mains != 1 {
        errors.push(format!("{}: expected one main branch, found {}", sid, mains));
    }

    if let Some(current) = &timeline.current_checkpoint_id {
        if !timeline.checkpoints.contains_key(current) {
            errors.push(format!("{}: current checkpoint {} does not exist", sid, current));
        }
    }
    if let Some(current) = &timeline.current_branch_id {
        if !timeline.branches.contains_key(current) {
            errors.push(format!("{}: current branch {} does not exist", sid, current));
        }
    }

    if !errors.is_empty() {
        debug!("Session {} has {} structural problems", sid, errors.len());
    }
    errors
}

/// Fail with [`RewindError::CorruptStore`] when a report found lost or damaged blobs
pub fn ensure_blobs_intact(report: &VerificationReport) -> Result<()> {
    match report.missing_blobs.first().or(report.corrupt_blobs.first()) {
        Some(hash) => Err(RewindError::corrupt(format!(
            "{} missing and {} corrupt blobs (first: {})",
            report.missing_blobs.len(),
            report.corrupt_blobs.len(),
            hash
        ))),
        None => Ok(()),
    }
}
