//! Checkpoint and line-level diffs
//!
//! Two checkpoints are compared through their manifests: a path present only
//! in the newer one is added, one present only in the older one is deleted,
//! and a path whose content hash changed is modified. Unchanged paths are
//! omitted. Text files additionally get a unified line diff.
//!
//! ## Line diffs
//!
//! The line diff strips the common prefix and suffix of both sides, then runs
//! a longest-common-subsequence pass over what remains. Inputs whose middle
//! section would need more than [`LCS_CELL_LIMIT`] table cells fall back to
//! replacing the whole middle section, which is still a correct (if larger)
//! diff.
//!
//! ```rust
//! use rewind::diff::{apply_unified_diff, unified_diff};
//!
//! let old = "one\ntwo\nthree\n";
//! let new = "one\n2\nthree\nfour\n";
//! let (patch, added, removed) = unified_diff("a/f.txt", "b/f.txt", old, new, 3);
//! assert_eq!((added, removed), (2, 1));
//! assert_eq!(apply_unified_diff(old, &patch).unwrap(), "one\n2\nthree\nfour");
//! ```

use crate::checkpoint::Checkpoint;
use crate::collections::HashMap;
use crate::error::{Result, RewindError};
use crate::storage::Storage;
use crate::types::{ChangeType, CheckpointDiff, DiffOptions, DiffSummary, FileDiff, FileSnapshot};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Largest LCS table (in cells) computed before falling back to replacement
pub const LCS_CELL_LIMIT: usize = 4_000_000;

/// One step of a line edit script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOp {
    /// Line kept: (old index, new index)
    Equal(usize, usize),
    /// Old line removed
    Delete(usize),
    /// New line inserted
    Insert(usize),
}

impl LineOp {
    fn is_change(&self) -> bool {
        !matches!(self, LineOp::Equal(..))
    }
}

/// Edit script turning `old` into `new`
pub fn line_ops(old: &[&str], new: &[&str]) -> Vec<LineOp> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops = Vec::with_capacity(old.len().max(new.len()));
    ops.extend((0..prefix).map(|i| LineOp::Equal(i, i)));

    if old_mid.is_empty() || new_mid.is_empty() || old_mid.len() * new_mid.len() > LCS_CELL_LIMIT {
        if !old_mid.is_empty() && !new_mid.is_empty() {
            debug!(
                "Line diff of {}x{} exceeds LCS limit, replacing block",
                old_mid.len(),
                new_mid.len()
            );
        }
        ops.extend((0..old_mid.len()).map(|i| LineOp::Delete(prefix + i)));
        ops.extend((0..new_mid.len()).map(|j| LineOp::Insert(prefix + j)));
    } else {
        ops.extend(lcs_ops(old_mid, new_mid).into_iter().map(|op| match op {
            LineOp::Equal(i, j) => LineOp::Equal(prefix + i, prefix + j),
            LineOp::Delete(i) => LineOp::Delete(prefix + i),
            LineOp::Insert(j) => LineOp::Insert(prefix + j),
        }));
    }

    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    ops.extend((0..suffix).map(|k| LineOp::Equal(old_tail + k, new_tail + k)));
    ops
}

fn lcs_ops(old: &[&str], new: &[&str]) -> Vec<LineOp> {
    let m = old.len();
    let n = new.len();
    let width = n + 1;
    let mut dp = vec![0u32; (m + 1) * width];

    for i in (0..m).rev() {
        for j in (0..n).rev() {
            dp[i * width + j] = if old[i] == new[j] {
                dp[(i + 1) * width + j + 1] + 1
            } else {
                dp[(i + 1) * width + j].max(dp[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(m + n);
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if old[i] == new[j] {
            ops.push(LineOp::Equal(i, j));
            i += 1;
            j += 1;
        } else if dp[(i + 1) * width + j] >= dp[i * width + j + 1] {
            ops.push(LineOp::Delete(i));
            i += 1;
        } else {
            ops.push(LineOp::Insert(j));
            j += 1;
        }
    }
    ops.extend((i..m).map(LineOp::Delete));
    ops.extend((j..n).map(LineOp::Insert));
    ops
}

/// Render a unified diff with `context` lines around each hunk
///
/// Returns the text along with the number of added and removed lines. Equal
/// inputs produce just the two header lines.
pub fn unified_diff(
    old_label: &str,
    new_label: &str,
    old: &str,
    new: &str,
    context: usize,
) -> (String, usize, usize) {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = line_ops(&old_lines, &new_lines);

    let mut out = format!("--- {}\n+++ {}\n", old_label, new_label);
    let added = ops.iter().filter(|op| matches!(op, LineOp::Insert(_))).count();
    let removed = ops.iter().filter(|op| matches!(op, LineOp::Delete(_))).count();

    // Position (old, new) reached before each op
    let mut positions = Vec::with_capacity(ops.len() + 1);
    let (mut old_pos, mut new_pos) = (0usize, 0usize);
    for op in &ops {
        positions.push((old_pos, new_pos));
        match op {
            LineOp::Equal(..) => {
                old_pos += 1;
                new_pos += 1;
            }
            LineOp::Delete(_) => old_pos += 1,
            LineOp::Insert(_) => new_pos += 1,
        }
    }
    positions.push((old_pos, new_pos));

    for (lo, hi) in hunk_ranges(&ops, context) {
        let (old_start, new_start) = positions[lo];
        let (old_end, new_end) = positions[hi];
        let old_count = old_end - old_start;
        let new_count = new_end - new_start;
        let _ = writeln!(
            out,
            "@@ -{} +{} @@",
            range_header(old_start, old_count),
            range_header(new_start, new_count)
        );
        for op in &ops[lo..hi] {
            let _ = match *op {
                LineOp::Equal(i, _) => writeln!(out, " {}", old_lines[i]),
                LineOp::Delete(i) => writeln!(out, "-{}", old_lines[i]),
                LineOp::Insert(j) => writeln!(out, "+{}", new_lines[j]),
            };
        }
    }

    (out, added, removed)
}

fn range_header(start: usize, count: usize) -> String {
    // An empty range names the line before it
    let first = if count == 0 { start } else { start + 1 };
    if count == 1 {
        first.to_string()
    } else {
        format!("{},{}", first, count)
    }
}

/// Op index ranges covered by each hunk, changes merged when their context overlaps
fn hunk_ranges(ops: &[LineOp], context: usize) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (idx, op) in ops.iter().enumerate() {
        if !op.is_change() {
            continue;
        }
        let lo = idx.saturating_sub(context);
        let hi = (idx + 1 + context).min(ops.len());
        match ranges.last_mut() {
            Some(last) if lo <= last.1 => last.1 = hi,
            _ => ranges.push((lo, hi)),
        }
    }
    ranges
}

/// Apply a unified diff produced by [`unified_diff`] to `old`
///
/// Lines are joined with `\n` without a trailing newline. Context and
/// removed lines must match `old` exactly.
pub fn apply_unified_diff(old: &str, patch: &str) -> Result<String> {
    let old_lines: Vec<&str> = old.lines().collect();
    let mut result: Vec<&str> = Vec::with_capacity(old_lines.len());
    let mut cursor = 0usize;

    let mut lines = patch.lines().peekable();
    while let Some(line) = lines.next() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        let Some(header) = line.strip_prefix("@@ -") else {
            return Err(RewindError::validation(format!("Unexpected patch line: {:?}", line)));
        };
        let old_range = header.split(' ').next().unwrap_or_default();
        let (start, count) = parse_range(old_range)?;
        let hunk_start = if count == 0 { start } else { start - 1 };
        if hunk_start < cursor || hunk_start > old_lines.len() {
            return Err(RewindError::validation(format!("Hunk out of order: {}", line)));
        }
        result.extend_from_slice(&old_lines[cursor..hunk_start]);
        cursor = hunk_start;

        while let Some(body) = lines.peek() {
            if body.starts_with("@@ ") {
                break;
            }
            let body = lines.next().unwrap_or_default();
            let mut chars = body.chars();
            let tag = chars.next();
            let text = chars.as_str();
            match tag {
                Some(' ') | Some('-') => {
                    if old_lines.get(cursor) != Some(&text) {
                        return Err(RewindError::validation(format!(
                            "Patch does not apply at line {}",
                            cursor + 1
                        )));
                    }
                    if tag == Some(' ') {
                        result.push(text);
                    }
                    cursor += 1;
                }
                Some('+') => result.push(text),
                _ => {
                    return Err(RewindError::validation(format!(
                        "Unexpected patch line: {:?}",
                        body
                    )))
                }
            }
        }
    }
    result.extend_from_slice(&old_lines[cursor.min(old_lines.len())..]);
    Ok(result.join("\n"))
}

fn parse_range(range: &str) -> Result<(usize, usize)> {
    let invalid = || RewindError::validation(format!("Invalid hunk range: {}", range));
    let mut parts = range.splitn(2, ',');
    let start = parts
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(invalid)?;
    let count = match parts.next() {
        Some(c) => c.parse::<usize>().map_err(|_| invalid())?,
        None => 1,
    };
    if count > 0 && start == 0 {
        return Err(invalid());
    }
    Ok((start, count))
}

/// Manifest entries grouped by how they changed
#[derive(Debug, Default)]
pub struct ManifestChanges<'a> {
    /// Only in the newer manifest
    pub added: Vec<&'a FileSnapshot>,
    /// In both with different hashes: (old, new)
    pub modified: Vec<(&'a FileSnapshot, &'a FileSnapshot)>,
    /// Only in the older manifest
    pub deleted: Vec<&'a FileSnapshot>,
    /// In both with the same hash
    pub unchanged: Vec<&'a FileSnapshot>,
}

/// Classify every path of two manifests, each group sorted by path
pub fn compare_manifests<'a>(from: &'a [FileSnapshot], to: &'a [FileSnapshot]) -> ManifestChanges<'a> {
    let from_map: HashMap<&PathBuf, &FileSnapshot> = from.iter().map(|f| (&f.path, f)).collect();
    let to_map: HashMap<&PathBuf, &FileSnapshot> = to.iter().map(|f| (&f.path, f)).collect();

    let mut changes = ManifestChanges::default();
    for new in to {
        match from_map.get(&new.path) {
            None => changes.added.push(new),
            Some(old) if old.content_hash != new.content_hash => changes.modified.push((old, new)),
            Some(_) => changes.unchanged.push(new),
        }
    }
    changes.deleted = from
        .iter()
        .filter(|old| !to_map.contains_key(&old.path))
        .collect();

    changes.added.sort_by(|a, b| a.path.cmp(&b.path));
    changes.modified.sort_by(|a, b| a.1.path.cmp(&b.1.path));
    changes.deleted.sort_by(|a, b| a.path.cmp(&b.path));
    changes.unchanged.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

/// Computes [`CheckpointDiff`]s from stored content
pub struct DiffEngine<'a> {
    storage: &'a Storage,
    options: DiffOptions,
    filter: Option<GlobSet>,
}

impl<'a> DiffEngine<'a> {
    /// Engine reading blobs from `storage`
    ///
    /// Fails with [`RewindError::InvalidPattern`] if a path filter glob does
    /// not parse.
    pub fn new(storage: &'a Storage, options: DiffOptions) -> Result<Self> {
        let filter = if options.path_filter.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &options.path_filter {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };
        Ok(Self { storage, options, filter })
    }

    /// Diff two checkpoints
    #[instrument(skip_all, fields(from = %from.short_id(), to = %to.short_id()))]
    pub fn diff(&self, from: &Checkpoint, to: &Checkpoint) -> Result<CheckpointDiff> {
        self.diff_manifests(&from.id, &from.files, &to.id, &to.files)
    }

    /// Diff two manifests whose blobs are in the store
    pub fn diff_manifests(
        &self,
        from_id: &str,
        from_files: &[FileSnapshot],
        to_id: &str,
        to_files: &[FileSnapshot],
    ) -> Result<CheckpointDiff> {
        let from_files = self.filtered(from_files);
        let to_files = self.filtered(to_files);
        let changes = compare_manifests(&from_files, &to_files);

        let added = changes
            .added
            .par_iter()
            .map(|new| self.file_diff(ChangeType::Added, None, Some(*new)))
            .collect::<Result<Vec<_>>>()?;
        let modified = changes
            .modified
            .par_iter()
            .map(|(old, new)| self.file_diff(ChangeType::Modified, Some(*old), Some(*new)))
            .collect::<Result<Vec<_>>>()?;
        let deleted = changes
            .deleted
            .par_iter()
            .map(|old| self.file_diff(ChangeType::Deleted, Some(*old), None))
            .collect::<Result<Vec<_>>>()?;

        let mut summary = DiffSummary {
            files_added: added.len(),
            files_modified: modified.len(),
            files_deleted: deleted.len(),
            ..Default::default()
        };
        for diff in added.iter().chain(&modified).chain(&deleted) {
            summary.lines_added += diff.lines_added;
            summary.lines_removed += diff.lines_removed;
            summary.size_delta += diff.new_size as i64 - diff.old_size as i64;
        }
        summary.bytes_added = added.iter().map(|d| d.new_size).sum();
        summary.bytes_deleted = deleted.iter().map(|d| d.old_size).sum();

        debug!(
            "Diff {} -> {}: +{} ~{} -{}",
            &from_id[..8.min(from_id.len())],
            &to_id[..8.min(to_id.len())],
            summary.files_added,
            summary.files_modified,
            summary.files_deleted
        );

        Ok(CheckpointDiff {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            added,
            modified,
            deleted,
            summary,
        })
    }

    fn filtered(&self, files: &[FileSnapshot]) -> Vec<FileSnapshot> {
        match &self.filter {
            Some(set) => files.iter().filter(|f| set.is_match(&f.path)).cloned().collect(),
            None => files.to_vec(),
        }
    }

    fn file_diff(
        &self,
        change_type: ChangeType,
        old: Option<&FileSnapshot>,
        new: Option<&FileSnapshot>,
    ) -> Result<FileDiff> {
        let path = new
            .or(old)
            .map(|f| f.path.clone())
            .ok_or_else(|| RewindError::internal("file diff with neither side"))?;
        let is_binary = old.is_some_and(|f| f.is_binary) || new.is_some_and(|f| f.is_binary);
        let limit = self.options.max_content_size;
        let content_skipped = limit > 0
            && (old.is_some_and(|f| f.size > limit) || new.is_some_and(|f| f.size > limit));

        let mut diff = FileDiff {
            path: path.clone(),
            change_type,
            is_binary,
            diff_content: None,
            old_hash: old.map(|f| f.content_hash.clone()),
            new_hash: new.map(|f| f.content_hash.clone()),
            old_size: old.map_or(0, |f| f.size),
            new_size: new.map_or(0, |f| f.size),
            lines_added: 0,
            lines_removed: 0,
            content_skipped,
        };

        if is_binary || content_skipped {
            for side in old.into_iter().chain(new) {
                if !self.storage.contains(&side.content_hash) {
                    return Err(RewindError::corrupt(format!(
                        "Referenced blob {} for {:?} is missing",
                        side.content_hash, side.path
                    )));
                }
            }
            return Ok(diff);
        }

        let old_text = match old {
            Some(f) => String::from_utf8_lossy(&self.storage.get_referenced(&f.content_hash)?).into_owned(),
            None => String::new(),
        };
        let new_text = match new {
            Some(f) => String::from_utf8_lossy(&self.storage.get_referenced(&f.content_hash)?).into_owned(),
            None => String::new(),
        };
        let display = path.to_string_lossy();
        let old_label = if old.is_some() { format!("a/{}", display) } else { "/dev/null".to_string() };
        let new_label = if new.is_some() { format!("b/{}", display) } else { "/dev/null".to_string() };

        let (content, added, removed) =
            unified_diff(&old_label, &new_label, &old_text, &new_text, self.options.context_lines);
        diff.diff_content = Some(content);
        diff.lines_added = added;
        diff.lines_removed = removed;
        Ok(diff)
    }
}
