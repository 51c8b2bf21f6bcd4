//! Chaos testing for Rewind
//!
//! Random workloads driven by a seeded RNG, plus damaged storage and
//! workspaces that make restores fail partway.

use ::rewind::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Seeded random workload over several sessions of one engine
pub struct ChaosWorkload {
    pub workspace: TempDir,
    pub storage: TempDir,
    pub rewind: Rewind,
    rng: StdRng,
    files: Vec<PathBuf>,
    sessions: Vec<String>,
}

impl ChaosWorkload {
    pub fn new(seed: u64) -> Self {
        let workspace = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let rewind = RewindBuilder::new()
            .parallel_workers(2)
            .build(workspace.path().to_path_buf(), storage.path().to_path_buf())
            .unwrap();
        let files = (0..8)
            .map(|i| PathBuf::from(format!("dir{}/file{}.txt", i % 3, i)))
            .collect();
        Self {
            workspace,
            storage,
            rewind,
            rng: StdRng::seed_from_u64(seed),
            files,
            sessions: vec!["alpha".to_string(), "beta".to_string()],
        }
    }

    fn mutate_workspace(&mut self) {
        for _ in 0..self.rng.random_range(1..4) {
            let path = self.workspace.path().join(&self.files[self.rng.random_range(0..self.files.len())]);
            if self.rng.random_bool(0.2) {
                let _ = fs::remove_file(&path);
                continue;
            }
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            let lines: Vec<String> = (0..self.rng.random_range(0..20))
                .map(|_| format!("line {}", self.rng.random_range(0..5)))
                .collect();
            fs::write(&path, lines.join("\n")).unwrap();
        }
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            Some(&items[self.rng.random_range(0..items.len())])
        }
    }

    /// Run `steps` random operations, checking every result's error class
    pub fn run(&mut self, steps: usize) -> usize {
        let mut failures = 0;
        for step in 0..steps {
            let session = self.sessions[self.rng.random_range(0..self.sessions.len())].clone();
            let timeline = self.rewind.get_timeline(&session).ok();
            let checkpoints: Vec<String> = timeline
                .as_ref()
                .map(|t| t.checkpoints.iter().map(|c| c.id.clone()).collect())
                .unwrap_or_default();
            let branches: Vec<String> = timeline
                .as_ref()
                .map(|t| t.branches.iter().map(|b| b.id.clone()).collect())
                .unwrap_or_default();

            let outcome = match self.rng.random_range(0..7) {
                0 | 1 => {
                    self.mutate_workspace();
                    self.rewind
                        .create_checkpoint(&session, &format!("step {}", step), &self.files)
                        .map(|_| ())
                }
                2 => match self.pick(&checkpoints).cloned() {
                    Some(id) => {
                        let backup = self.rng.random_bool(0.5);
                        self.rewind
                            .restore_checkpoint(&session, &id, backup, &self.files)
                            .map(|_| ())
                    }
                    None => Ok(()),
                },
                3 => match self.pick(&checkpoints).cloned() {
                    Some(id) => self
                        .rewind
                        .fork_branch(&session, &id, &format!("b{}", self.rng.random_range(0..6)))
                        .map(|_| ()),
                    None => Ok(()),
                },
                4 => match self.pick(&branches).cloned() {
                    Some(id) => self.rewind.switch_branch(&session, &id),
                    None => Ok(()),
                },
                5 => match self.pick(&checkpoints).cloned() {
                    Some(id) => self.rewind.delete_checkpoint(&session, &id),
                    None => Ok(()),
                },
                _ => match self.pick(&branches).cloned() {
                    Some(id) => self.rewind.delete_branch(&session, &id),
                    None => Ok(()),
                },
            };

            if let Err(err) = outcome {
                assert!(
                    matches!(
                        err,
                        RewindError::DuplicateName(_)
                            | RewindError::ReferentialIntegrity(_)
                            | RewindError::CannotDeleteMainBranch(_)
                    ),
                    "step {}: unexpected error {:?}",
                    step,
                    err
                );
                failures += 1;
            }
        }
        failures
    }
}

fn object_path(storage: &Path, hash: &str) -> PathBuf {
    storage.join("objects").join(&hash[..2]).join(&hash[2..])
}

/// Raw (uncompressed) blob frame as the store writes it
fn raw_frame(content: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 4];
    frame.extend_from_slice(content);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_workload_keeps_store_consistent() {
        for seed in [7u64, 42, 1337] {
            let mut workload = ChaosWorkload::new(seed);
            let failures = workload.run(150);
            info!("Seed {} finished with {} rejected operations", seed, failures);

            let report = workload.rewind.verify().unwrap();
            assert!(report.is_valid(), "seed {}: {}", seed, report.summary());

            let before: Vec<_> = workload
                .rewind
                .list_sessions()
                .into_iter()
                .map(|s| workload.rewind.get_timeline(&s).unwrap())
                .collect();

            let reopened = Rewind::open(
                workload.workspace.path().to_path_buf(),
                workload.storage.path().to_path_buf(),
            )
            .unwrap();
            for timeline in before {
                let after = reopened.get_timeline(&timeline.session_id).unwrap();
                assert_eq!(after.checkpoints, timeline.checkpoints);
                assert_eq!(after.branches, timeline.branches);
                assert_eq!(after.current_checkpoint_id, timeline.current_checkpoint_id);
                assert_eq!(after.current_branch_id, timeline.current_branch_id);
            }
            assert!(reopened.verify().unwrap().is_valid());
        }
    }

    #[test]
    fn test_corrupt_blob_aborts_restore_before_touching_workspace() {
        let workload = ChaosWorkload::new(1);
        let ws = workload.workspace.path().to_path_buf();
        fs::write(ws.join("a.txt"), "original").unwrap();
        let tracked = vec![PathBuf::from("a.txt")];
        let a = workload.rewind.create_checkpoint("s", "A", &tracked).unwrap();
        fs::write(ws.join("a.txt"), "edited").unwrap();
        let b = workload.rewind.create_checkpoint("s", "B", &tracked).unwrap();

        let hash = &a.files[0].content_hash;
        fs::write(object_path(workload.storage.path(), hash), raw_frame(b"tampered")).unwrap();

        let err = workload
            .rewind
            .restore_checkpoint("s", &a.id, true, &tracked)
            .unwrap_err();
        assert!(matches!(err, RewindError::CorruptStore(_)), "{:?}", err);
        assert!(err.is_corruption());

        assert_eq!(fs::read_to_string(ws.join("a.txt")).unwrap(), "edited");
        let timeline = workload.rewind.get_timeline("s").unwrap();
        assert_eq!(timeline.checkpoints.len(), 2, "backup was rolled back");
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(b.id.as_str()));
        assert_eq!(workload.rewind.storage().ref_count(&b.files[0].content_hash), 1);

        let report = workload.rewind.verify().unwrap();
        assert_eq!(report.corrupt_blobs, vec![hash.clone()]);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_missing_blob_is_reported() {
        let workload = ChaosWorkload::new(2);
        let ws = workload.workspace.path();
        fs::write(ws.join("a.txt"), "one\ntwo\n").unwrap();
        let tracked = vec![PathBuf::from("a.txt")];
        let a = workload.rewind.create_checkpoint("s", "A", &tracked).unwrap();
        fs::write(ws.join("a.txt"), "one\n2\n").unwrap();
        let b = workload.rewind.create_checkpoint("s", "B", &tracked).unwrap();

        fs::remove_file(object_path(workload.storage.path(), &a.files[0].content_hash)).unwrap();

        let err = workload.rewind.diff_checkpoints("s", &a.id, &b.id).unwrap_err();
        assert!(matches!(err, RewindError::CorruptStore(_)), "{:?}", err);

        let report = workload.rewind.verify().unwrap();
        assert_eq!(report.missing_blobs, vec![a.files[0].content_hash.clone()]);
    }

    #[test]
    fn test_partial_restore_reports_applied_files() {
        let workload = ChaosWorkload::new(3);
        let ws = workload.workspace.path();
        fs::write(ws.join("a.txt"), "a v1").unwrap();
        fs::create_dir_all(ws.join("sub")).unwrap();
        fs::write(ws.join("sub/file.txt"), "nested").unwrap();
        let target = workload
            .rewind
            .create_checkpoint("s", "A", &[PathBuf::from("a.txt"), PathBuf::from("sub/file.txt")])
            .unwrap();

        fs::write(ws.join("a.txt"), "a v2").unwrap();
        fs::remove_dir_all(ws.join("sub")).unwrap();
        fs::write(ws.join("sub"), "a file where a directory should be").unwrap();
        fs::write(ws.join("extra.txt"), "extra").unwrap();
        let live = vec![PathBuf::from("a.txt"), PathBuf::from("extra.txt")];
        let current = workload.rewind.create_checkpoint("s", "live", &live).unwrap();

        let err = workload
            .rewind
            .restore_checkpoint("s", &target.id, false, &live)
            .unwrap_err();
        let RewindError::PartialRestore(result) = &err else {
            panic!("expected a partial restore, got {:?}", err);
        };
        assert!(!result.success);
        assert_eq!(result.restored_files, vec![PathBuf::from("a.txt")]);
        assert_eq!(result.removed_files, vec![PathBuf::from("extra.txt")]);
        assert!(result.error.as_deref().unwrap().contains("sub"));
        assert_eq!(err.kind(), "PartialRestoreError");

        assert_eq!(fs::read_to_string(ws.join("a.txt")).unwrap(), "a v1");
        assert!(!ws.join("extra.txt").exists());
        let timeline = workload.rewind.get_timeline("s").unwrap();
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(current.id.as_str()));

        let payload = api::ErrorPayload::from(&err);
        assert_eq!(payload.details.unwrap()["restored_files"][0], "a.txt");
    }

    #[test]
    fn test_partial_restore_keeps_backup() {
        let workload = ChaosWorkload::new(4);
        let ws = workload.workspace.path();
        fs::create_dir_all(ws.join("sub")).unwrap();
        fs::write(ws.join("sub/file.txt"), "nested").unwrap();
        let target = workload
            .rewind
            .create_checkpoint("s", "A", &[PathBuf::from("sub/file.txt")])
            .unwrap();

        fs::remove_dir_all(ws.join("sub")).unwrap();
        fs::write(ws.join("sub"), "blocker").unwrap();
        fs::write(ws.join("b.txt"), "live").unwrap();
        let live = vec![PathBuf::from("b.txt")];

        let err = workload
            .rewind
            .restore_checkpoint("s", &target.id, true, &live)
            .unwrap_err();
        let RewindError::PartialRestore(result) = err else {
            panic!("expected a partial restore");
        };
        let backup_id = result.backup_checkpoint_id.unwrap();
        let session = workload.rewind.get_session("s").unwrap();
        let backup = session.get_checkpoint(&backup_id).unwrap();
        assert_eq!(backup.files.len(), 1);
        assert_eq!(backup.files[0].path, PathBuf::from("b.txt"));
        assert_eq!(session.current_checkpoint_id.as_deref(), Some(backup_id.as_str()));
    }

    #[test]
    fn test_unsaved_pointer_after_apply_is_a_partial_restore() {
        let workload = ChaosWorkload::new(6);
        let ws = workload.workspace.path();
        let files = vec![PathBuf::from("a.txt")];
        fs::write(ws.join("a.txt"), "v1").unwrap();
        let a = workload.rewind.create_checkpoint("s", "A", &files).unwrap();
        fs::write(ws.join("a.txt"), "v2").unwrap();
        let b = workload.rewind.create_checkpoint("s", "B", &files).unwrap();

        // A non-empty directory in place of state.json makes the pointer write fail.
        let state_path = workload.storage.path().join("sessions/s/state.json");
        fs::remove_file(&state_path).unwrap();
        fs::create_dir_all(state_path.join("blocker")).unwrap();

        let err = workload
            .rewind
            .restore_checkpoint("s", &a.id, false, &files)
            .unwrap_err();
        let RewindError::PartialRestore(result) = &err else {
            panic!("expected a partial restore, got {:?}", err);
        };
        assert!(!result.success);
        assert_eq!(result.restored_files, files);
        assert!(result.removed_files.is_empty());
        assert!(result.error.as_deref().unwrap().contains("not persisted"));
        assert!(!err.is_recoverable());

        assert_eq!(fs::read_to_string(ws.join("a.txt")).unwrap(), "v1");
        let timeline = workload.rewind.get_timeline("s").unwrap();
        assert_eq!(timeline.current_checkpoint_id.as_deref(), Some(b.id.as_str()));

        let payload = api::ErrorPayload::from(&err);
        assert!(!payload.retryable);
        assert_eq!(payload.details.unwrap()["restored_files"][0], "a.txt");
    }

    #[test]
    fn test_gc_removes_only_unreferenced_objects() {
        let workload = ChaosWorkload::new(5);
        let ws = workload.workspace.path();
        fs::write(ws.join("kept.txt"), "kept").unwrap();
        let checkpoint = workload
            .rewind
            .create_checkpoint("s", "A", &[PathBuf::from("kept.txt")])
            .unwrap();

        let orphan = b"left behind by a crash";
        let orphan_hash = hex::encode(Sha256::digest(orphan));
        let orphan_path = object_path(workload.storage.path(), &orphan_hash);
        fs::create_dir_all(orphan_path.parent().unwrap()).unwrap();
        fs::write(&orphan_path, raw_frame(orphan)).unwrap();

        let report = workload.rewind.verify().unwrap();
        assert_eq!(report.orphaned_objects, vec![orphan_hash.clone()]);

        let dry = workload.rewind.gc(true).unwrap();
        assert_eq!(dry.unreferenced_objects, vec![orphan_hash.clone()]);
        assert!(orphan_path.exists());

        let stats = workload.rewind.gc(false).unwrap();
        assert_eq!(stats.objects_deleted, 1);
        assert!(!orphan_path.exists());
        assert!(workload.rewind.storage().contains(&checkpoint.files[0].content_hash));
        assert!(workload.rewind.verify().unwrap().is_valid());
    }
}
