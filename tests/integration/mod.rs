//! Integration tests for Rewind
//!
//! End-to-end scenarios over a real workspace: checkpoint chains, branching,
//! restore with and without backups, deletion guards and reopening storage.

use ::rewind::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Workspace plus engine for one test
pub struct RewindHarness {
    pub workspace: TempDir,
    pub storage: TempDir,
    pub rewind: Rewind,
}

impl RewindHarness {
    pub const SESSION: &'static str = "session-1";

    pub fn new() -> Self {
        Self::with_builder(RewindBuilder::new().parallel_workers(2))
    }

    pub fn with_builder(builder: RewindBuilder) -> Self {
        let workspace = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let rewind = builder
            .build(workspace.path().to_path_buf(), storage.path().to_path_buf())
            .unwrap();
        Self { workspace, storage, rewind }
    }

    /// Reopen the same storage root with a fresh engine
    pub fn reopen(&mut self) {
        self.rewind = Rewind::open(
            self.workspace.path().to_path_buf(),
            self.storage.path().to_path_buf(),
        )
        .unwrap();
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.workspace.path().join(relative)
    }

    pub fn write(&mut self, relative: &str, content: &str) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).unwrap()
    }

    pub fn checkpoint(&mut self, label: &str, files: &[&str]) -> Checkpoint {
        self.rewind
            .create_checkpoint(Self::SESSION, label, &paths(files))
            .unwrap()
    }

    pub fn restore(&mut self, checkpoint_id: &str, live: &[&str]) -> RestoreResult {
        self.rewind
            .restore_checkpoint(Self::SESSION, checkpoint_id, false, &paths(live))
            .unwrap()
    }

    pub fn ref_count_of(&self, checkpoint: &Checkpoint, file: &str) -> u64 {
        let snapshot = checkpoint.file(Path::new(file)).unwrap();
        self.rewind.storage().ref_count(&snapshot.content_hash)
    }
}

impl Default for RewindHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn paths(files: &[&str]) -> Vec<PathBuf> {
    files.iter().map(PathBuf::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_checkpoint_chain_and_timeline() {
        let mut h = RewindHarness::new();
        h.write("f1.txt", "one");
        let c1 = h.checkpoint("first", &["f1.txt"]);
        h.write("f1.txt", "one, edited");
        let c2 = h.checkpoint("second", &["f1.txt"]);

        assert!(c1.parent_id.is_none());
        assert_eq!(c2.parent_id.as_deref(), Some(c1.id.as_str()));

        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        let ids: Vec<_> = timeline.checkpoints.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![c1.id.as_str(), c2.id.as_str()]);
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(c2.id.as_str()));

        assert_eq!(timeline.branches.len(), 1);
        let main = &timeline.branches[0];
        assert!(main.is_main);
        assert_eq!(main.name, MAIN_BRANCH_NAME);
        assert_eq!(main.parent_checkpoint_id, c1.id);
        assert_eq!(timeline.current_branch_id.as_deref(), Some(main.id.as_str()));
        assert_eq!(c2.branch_id.as_deref(), Some(main.id.as_str()));
    }

    #[test]
    fn test_identical_content_is_stored_once() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "same bytes");
        h.write("b.txt", "other");
        let c1 = h.checkpoint("first", &["a.txt", "b.txt"]);
        let c2 = h.checkpoint("second", &["a.txt"]);

        let hash = &c1.file(Path::new("a.txt")).unwrap().content_hash;
        assert_eq!(hash, &c2.file(Path::new("a.txt")).unwrap().content_hash);
        assert_eq!(h.rewind.storage().ref_count(hash), 2);
        assert_eq!(h.ref_count_of(&c1, "b.txt"), 1);
        assert_eq!(h.rewind.storage_stats().unwrap().object_count, 2);
    }

    #[test]
    fn test_restore_happy_path() {
        let mut h = RewindHarness::new();
        h.write("f1.txt", "f1 v1");
        h.write("f2.txt", "f2 v1");
        let a = h.checkpoint("A", &["f1.txt", "f2.txt"]);

        h.write("f1.txt", "f1 v2");
        h.write("f3.txt", "new file");
        let live = ["f1.txt", "f2.txt", "f3.txt"];

        let result = h
            .rewind
            .restore_checkpoint(RewindHarness::SESSION, &a.id, true, &paths(&live))
            .unwrap();

        assert!(result.success);
        assert_eq!(result.restored_checkpoint_id, a.id);
        assert_eq!(result.restored_files, paths(&["f1.txt", "f2.txt"]));
        assert_eq!(result.removed_files, paths(&["f3.txt"]));
        assert!(result.error.is_none());

        assert_eq!(h.read("f1.txt"), "f1 v1");
        assert_eq!(h.read("f2.txt"), "f2 v1");
        assert!(!h.path("f3.txt").exists());

        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(a.id.as_str()));
    }

    #[test]
    fn test_backup_captures_live_state() {
        let mut h = RewindHarness::new();
        h.write("f1.txt", "f1 v1");
        let a = h.checkpoint("A", &["f1.txt"]);

        h.write("f1.txt", "f1 v2");
        h.write("f3.txt", "extra");
        let live = ["f1.txt", "f3.txt"];
        let result = h
            .rewind
            .restore_checkpoint(RewindHarness::SESSION, &a.id, true, &paths(&live))
            .unwrap();

        let backup_id = result.backup_checkpoint_id.unwrap();
        let session = h.rewind.get_session(RewindHarness::SESSION).unwrap();
        let backup = session.get_checkpoint(&backup_id).unwrap();
        assert_eq!(backup.label, "Backup before restore to A");
        assert_eq!(backup.parent_id.as_deref(), Some(a.id.as_str()));

        // Restoring the backup brings the pre-restore files back.
        h.restore(&backup_id, &["f1.txt"]);
        assert_eq!(h.read("f1.txt"), "f1 v2");
        assert_eq!(h.read("f3.txt"), "extra");

        let diff = h
            .rewind
            .diff_checkpoints(RewindHarness::SESSION, &a.id, &backup_id)
            .unwrap();
        assert_eq!(diff.summary.files_added, 1);
        assert_eq!(diff.summary.files_modified, 1);
    }

    #[test]
    fn test_restore_without_backup_adds_no_checkpoint() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "v1");
        let a = h.checkpoint("A", &["a.txt"]);
        h.write("a.txt", "v2");
        h.checkpoint("B", &["a.txt"]);

        let result = h.restore(&a.id, &["a.txt"]);
        assert!(result.backup_checkpoint_id.is_none());
        assert_eq!(h.rewind.get_timeline(RewindHarness::SESSION).unwrap().checkpoints.len(), 2);
        assert_eq!(h.read("a.txt"), "v1");
    }

    #[test]
    fn test_restore_does_not_move_branch() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "v1");
        let a = h.checkpoint("A", &["a.txt"]);
        let branch = h.rewind.fork_branch(RewindHarness::SESSION, &a.id, "side").unwrap();
        h.rewind.switch_branch(RewindHarness::SESSION, &branch.id).unwrap();
        h.write("a.txt", "v2");
        let b = h.checkpoint("B", &["a.txt"]);
        assert_eq!(b.branch_id.as_deref(), Some(branch.id.as_str()));

        h.restore(&a.id, &["a.txt"]);
        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        assert_eq!(timeline.current_branch_id.as_deref(), Some(branch.id.as_str()));
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(a.id.as_str()));
    }

    #[test]
    fn test_restore_replaces_directory_with_file() {
        let mut h = RewindHarness::new();
        let tracked = ["a", "a/b"];
        h.write("a", "plain file");
        let a = h.checkpoint("File", &tracked);
        assert_eq!(a.files.len(), 1);

        fs::remove_file(h.path("a")).unwrap();
        h.write("a/b", "nested");
        h.checkpoint("Directory", &tracked);

        let result = h.restore(&a.id, &tracked);
        assert!(result.success);
        assert_eq!(result.restored_files, paths(&["a"]));
        assert_eq!(result.removed_files, paths(&["a/b"]));
        assert!(h.path("a").is_file());
        assert_eq!(h.read("a"), "plain file");
    }

    #[test]
    fn test_restore_replaces_file_with_directory() {
        let mut h = RewindHarness::new();
        let tracked = ["a", "a/b"];
        h.write("a/b", "nested");
        let nested = h.checkpoint("Directory", &tracked);
        assert_eq!(nested.files.len(), 1);

        fs::remove_dir_all(h.path("a")).unwrap();
        h.write("a", "plain file");

        let result = h
            .rewind
            .restore_checkpoint(RewindHarness::SESSION, &nested.id, true, &paths(&tracked))
            .unwrap();
        assert!(result.success);
        assert_eq!(result.restored_files, paths(&["a/b"]));
        assert_eq!(result.removed_files, paths(&["a"]));
        assert_eq!(h.read("a/b"), "nested");

        // The backup holds the plain file and can be restored over the directory.
        let backup_id = result.backup_checkpoint_id.unwrap();
        h.restore(&backup_id, &tracked);
        assert_eq!(h.read("a"), "plain file");
    }

    #[test]
    fn test_deletion_guard_leaves_everything_unchanged() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "a");
        let a = h.checkpoint("A", &["a.txt"]);
        let b = h.checkpoint("B", &["a.txt"]);
        let count_before = h.ref_count_of(&a, "a.txt");

        let err = h.rewind.delete_checkpoint(RewindHarness::SESSION, &a.id).unwrap_err();
        assert!(matches!(err, RewindError::ReferentialIntegrity(_)));
        assert_eq!(err.kind(), "ReferentialIntegrityError");

        let err = h.rewind.delete_checkpoint(RewindHarness::SESSION, &b.id).unwrap_err();
        assert!(matches!(err, RewindError::ReferentialIntegrity(_)), "current checkpoint");

        assert_eq!(h.ref_count_of(&a, "a.txt"), count_before);
        assert_eq!(h.rewind.get_timeline(RewindHarness::SESSION).unwrap().checkpoints.len(), 2);
    }

    #[test]
    fn test_delete_leaf_releases_blobs() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "shared");
        let a = h.checkpoint("A", &["a.txt"]);
        h.write("b.txt", "only in leaf");
        let b = h.checkpoint("B", &["a.txt", "b.txt"]);
        h.restore(&a.id, &["a.txt", "b.txt"]);

        assert_eq!(h.ref_count_of(&b, "b.txt"), 1);
        h.rewind.delete_checkpoint(RewindHarness::SESSION, &b.id).unwrap();

        assert_eq!(h.ref_count_of(&a, "a.txt"), 1);
        let b_hash = &b.file(Path::new("b.txt")).unwrap().content_hash;
        assert_eq!(h.rewind.storage().ref_count(b_hash), 0);
        assert!(!h.rewind.storage().contains(b_hash));

        let err = h.rewind.delete_checkpoint(RewindHarness::SESSION, &b.id).unwrap_err();
        assert!(matches!(err, RewindError::NotFound { kind: EntityKind::Checkpoint, .. }));
    }

    #[test]
    fn test_branch_origin_cannot_be_deleted() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "a");
        let a = h.checkpoint("A", &["a.txt"]);
        let b = h.checkpoint("B", &["a.txt"]);
        h.rewind.fork_branch(RewindHarness::SESSION, &b.id, "experiment").unwrap();
        h.restore(&a.id, &["a.txt"]);

        let err = h.rewind.delete_checkpoint(RewindHarness::SESSION, &b.id).unwrap_err();
        assert!(matches!(err, RewindError::ReferentialIntegrity(_)));
    }

    #[test]
    fn test_fork_switch_and_branching_history() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "base");
        let base = h.checkpoint("base", &["a.txt"]);
        h.write("a.txt", "main work");
        let main_tip = h.checkpoint("main tip", &["a.txt"]);

        let side = h.rewind.fork_branch(RewindHarness::SESSION, &base.id, "side").unwrap();
        assert_eq!(side.parent_checkpoint_id, base.id);
        assert!(!side.is_main);

        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(main_tip.id.as_str()));

        // A fresh branch resolves to its origin.
        h.rewind.switch_branch(RewindHarness::SESSION, &side.id).unwrap();
        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(base.id.as_str()));
        assert_eq!(timeline.current_branch_id.as_deref(), Some(side.id.as_str()));

        h.restore(&base.id, &["a.txt"]);
        h.write("a.txt", "side work");
        let side_tip = h.checkpoint("side tip", &["a.txt"]);
        assert_eq!(side_tip.parent_id.as_deref(), Some(base.id.as_str()));

        let main_id = timeline.branches.iter().find(|b| b.is_main).unwrap().id.clone();
        h.rewind.switch_branch(RewindHarness::SESSION, &main_id).unwrap();
        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(main_tip.id.as_str()));

        h.rewind.switch_branch(RewindHarness::SESSION, &side.id).unwrap();
        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(side_tip.id.as_str()));

        let session = h.rewind.get_session(RewindHarness::SESSION).unwrap();
        let children: Vec<_> = session.get_children(&base.id).iter().map(|c| c.id.clone()).collect();
        assert_eq!(children.len(), 2);
        assert!(children.contains(&main_tip.id) && children.contains(&side_tip.id));
    }

    #[test]
    fn test_rename_collision_leaves_names_unchanged() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "a");
        let a = h.checkpoint("A", &["a.txt"]);
        let x = h.rewind.fork_branch(RewindHarness::SESSION, &a.id, "X").unwrap();
        let y = h.rewind.fork_branch(RewindHarness::SESSION, &a.id, "Y").unwrap();

        let err = h.rewind.rename_branch(RewindHarness::SESSION, &y.id, "X").unwrap_err();
        assert!(matches!(err, RewindError::DuplicateName(ref name) if name == "X"));

        h.reopen();
        let names: Vec<_> = h
            .rewind
            .get_timeline(RewindHarness::SESSION)
            .unwrap()
            .branches
            .into_iter()
            .map(|b| (b.id, b.name))
            .collect();
        assert!(names.contains(&(x.id.clone(), "X".to_string())));
        assert!(names.contains(&(y.id.clone(), "Y".to_string())));

        h.rewind.rename_branch(RewindHarness::SESSION, &y.id, "  Z ").unwrap();
        let session = h.rewind.get_session(RewindHarness::SESSION).unwrap();
        assert_eq!(session.get_branch(&y.id).unwrap().name, "Z");
    }

    #[test]
    fn test_branch_deletion_rules() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "a");
        let a = h.checkpoint("A", &["a.txt"]);
        let side = h.rewind.fork_branch(RewindHarness::SESSION, &a.id, "side").unwrap();
        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        let main_id = timeline.current_branch_id.clone().unwrap();

        let err = h.rewind.delete_branch(RewindHarness::SESSION, &main_id).unwrap_err();
        assert!(matches!(err, RewindError::CannotDeleteMainBranch(_)));

        h.rewind.switch_branch(RewindHarness::SESSION, &side.id).unwrap();
        let err = h.rewind.delete_branch(RewindHarness::SESSION, &side.id).unwrap_err();
        assert!(matches!(err, RewindError::ReferentialIntegrity(_)));

        h.rewind.switch_branch(RewindHarness::SESSION, &main_id).unwrap();
        h.rewind.delete_branch(RewindHarness::SESSION, &side.id).unwrap();

        let timeline = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        assert_eq!(timeline.branches.len(), 1);
        assert_eq!(timeline.checkpoints.len(), 1);

        let err = h.rewind.switch_branch(RewindHarness::SESSION, &side.id).unwrap_err();
        assert!(matches!(err, RewindError::NotFound { kind: EntityKind::Branch, .. }));
    }

    #[test]
    fn test_fork_validation() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "a");
        let a = h.checkpoint("A", &["a.txt"]);

        let err = h.rewind.fork_branch(RewindHarness::SESSION, &a.id, "   ").unwrap_err();
        assert!(matches!(err, RewindError::Validation(_)));
        let err = h.rewind.fork_branch(RewindHarness::SESSION, &a.id, "main").unwrap_err();
        assert!(matches!(err, RewindError::DuplicateName(_)));
        let err = h.rewind.fork_branch(RewindHarness::SESSION, "missing", "x").unwrap_err();
        assert!(matches!(err, RewindError::NotFound { kind: EntityKind::Checkpoint, .. }));

        assert_eq!(h.rewind.get_timeline(RewindHarness::SESSION).unwrap().branches.len(), 1);
    }

    #[test]
    fn test_diff_between_checkpoints() {
        let mut h = RewindHarness::new();
        h.write("keep.txt", "same\n");
        h.write("edit.txt", "line 1\nline 2\nline 3\n");
        h.write("gone.txt", "bye\n");
        let a = h.checkpoint("A", &["keep.txt", "edit.txt", "gone.txt"]);

        h.write("edit.txt", "line 1\nline two\nline 3\n");
        h.write("new.txt", "hello\n");
        let b = h.checkpoint("B", &["keep.txt", "edit.txt", "new.txt"]);

        let diff = h.rewind.diff_checkpoints(RewindHarness::SESSION, &a.id, &b.id).unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].path, PathBuf::from("new.txt"));
        assert_eq!(diff.deleted[0].path, PathBuf::from("gone.txt"));
        assert_eq!(diff.modified[0].path, PathBuf::from("edit.txt"));
        assert_eq!(diff.modified[0].change_type, ChangeType::Modified);
        assert_eq!(diff.modified[0].lines_added, 1);
        assert_eq!(diff.modified[0].lines_removed, 1);
        assert_eq!(diff.summary.total_files(), 3);

        let patch = diff.modified[0].diff_content.as_deref().unwrap();
        assert!(patch.contains("-line 2"));
        assert!(patch.contains("+line two"));

        let same = h.rewind.diff_checkpoints(RewindHarness::SESSION, &b.id, &b.id).unwrap();
        assert!(same.is_empty());
        assert!(!same.summary.has_changes());
    }

    #[test]
    fn test_diff_across_sessions_not_found() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "a");
        let a = h.checkpoint("A", &["a.txt"]);
        let other = h.rewind.create_checkpoint("other", "O", &paths(&["a.txt"])).unwrap();

        let err = h
            .rewind
            .diff_checkpoints(RewindHarness::SESSION, &a.id, &other.id)
            .unwrap_err();
        assert!(matches!(err, RewindError::NotFound { kind: EntityKind::Checkpoint, .. }));
        // Content is still shared across sessions.
        assert_eq!(h.ref_count_of(&a, "a.txt"), 2);
    }

    #[test]
    fn test_state_survives_reopen() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "v1");
        let a = h.checkpoint("A", &["a.txt"]);
        h.write("a.txt", "v2");
        let b = h.checkpoint("B", &["a.txt"]);
        let side = h.rewind.fork_branch(RewindHarness::SESSION, &a.id, "side").unwrap();
        h.rewind.switch_branch(RewindHarness::SESSION, &side.id).unwrap();
        let before = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();

        h.reopen();
        let after = h.rewind.get_timeline(RewindHarness::SESSION).unwrap();
        assert_eq!(after.checkpoints, before.checkpoints);
        assert_eq!(after.branches, before.branches);
        assert_eq!(after.current_checkpoint_id, before.current_checkpoint_id);
        assert_eq!(after.current_branch_id, before.current_branch_id);
        assert_eq!(h.ref_count_of(&b, "a.txt"), 1);

        h.write("a.txt", "v3");
        let c = h.checkpoint("C", &["a.txt"]);
        assert_eq!(c.parent_id.as_deref(), Some(a.id.as_str()));
        assert!(c.sequence > b.sequence);
    }

    #[test]
    fn test_verify_and_gc_on_healthy_store() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "a");
        h.write("b.txt", "b");
        h.checkpoint("A", &["a.txt", "b.txt"]);

        let report = h.rewind.verify().unwrap();
        assert!(report.is_valid(), "{}", report.summary());
        assert_eq!(report.checkpoints_checked, 1);

        let stats = h.rewind.gc(false).unwrap();
        assert_eq!(stats.objects_examined, 2);
        assert_eq!(stats.objects_deleted, 0);
    }

    #[test]
    fn test_scan_workspace_feeds_checkpoints() {
        let mut h = RewindHarness::with_builder(
            RewindBuilder::new().ignore_patterns(vec!["*.log".to_string()]),
        );
        h.write("src/main.rs", "fn main() {}");
        h.write("notes.txt", "notes");
        h.write("debug.log", "noise");

        let files = h.rewind.scan_workspace().unwrap();
        assert_eq!(files, paths(&["notes.txt", "src/main.rs"]));

        let checkpoint = h
            .rewind
            .create_checkpoint(RewindHarness::SESSION, "scan", &files)
            .unwrap();
        assert_eq!(checkpoint.files.len(), 2);
    }

    #[test]
    fn test_oversized_file_rejected() {
        let mut h = RewindHarness::with_builder(RewindBuilder::new().max_file_size(8));
        h.write("big.txt", "more than eight bytes");
        let err = h
            .rewind
            .create_checkpoint(RewindHarness::SESSION, "big", &paths(&["big.txt"]))
            .unwrap_err();
        assert!(matches!(err, RewindError::Validation(_)));
        assert_eq!(h.rewind.storage_stats().unwrap().object_count, 0);
    }

    #[test]
    #[traced_test]
    fn test_operations_are_logged() {
        let mut h = RewindHarness::new();
        h.write("a.txt", "a");
        let a = h.checkpoint("A", &["a.txt"]);
        h.rewind.fork_branch(RewindHarness::SESSION, &a.id, "logged").unwrap();

        assert!(logs_contain("Forked branch 'logged'"));
    }
}
