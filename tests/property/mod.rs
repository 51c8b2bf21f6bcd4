//! Property-based testing for Rewind
//!
//! Uses proptest to check diff reconstruction and the timeline invariants
//! across randomly generated inputs and operation sequences.

use ::rewind::diff::{apply_unified_diff, unified_diff};
use ::rewind::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Lines drawn from a small vocabulary so diffs have plenty of matches
fn text_strategy() -> impl Strategy<Value = String> {
    let line = prop_oneof![
        Just("alpha".to_string()),
        Just("beta".to_string()),
        Just("gamma".to_string()),
        Just(String::new()),
        "[a-z ]{1,12}",
    ];
    (prop::collection::vec(line, 0..40), any::<bool>()).prop_map(|(lines, trailing)| {
        let mut text = lines.join("\n");
        if trailing && !text.is_empty() {
            text.push('\n');
        }
        text
    })
}

/// One engine call in a generated workload
#[derive(Debug, Clone)]
pub enum TimelineOp {
    Checkpoint { file: usize, content: u8 },
    Fork { at: usize },
    Switch { branch: usize },
    Restore { at: usize },
    Delete { at: usize },
    Rename { branch: usize, name: u8 },
}

fn timeline_op_strategy() -> impl Strategy<Value = TimelineOp> {
    prop_oneof![
        4 => (0..3usize, 0..4u8).prop_map(|(file, content)| TimelineOp::Checkpoint { file, content }),
        2 => any::<usize>().prop_map(|at| TimelineOp::Fork { at }),
        2 => any::<usize>().prop_map(|branch| TimelineOp::Switch { branch }),
        2 => any::<usize>().prop_map(|at| TimelineOp::Restore { at }),
        2 => any::<usize>().prop_map(|at| TimelineOp::Delete { at }),
        1 => (any::<usize>(), 0..4u8).prop_map(|(branch, name)| TimelineOp::Rename { branch, name }),
    ]
}

const FILES: [&str; 3] = ["a.txt", "b.txt", "dir/c.txt"];

const MANIFEST_PATHS: [&str; 6] = ["a.txt", "b.bin", "dir/c.txt", "dir/d.txt", "dir/sub/e.txt", "f.txt"];

/// Write one generated state: 0 removes the file, 4 writes binary content
fn write_manifest_state(workspace: &TempDir, values: &[u8]) -> Vec<PathBuf> {
    for (file, value) in MANIFEST_PATHS.iter().zip(values) {
        let path = workspace.path().join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        match value {
            0 => {
                let _ = fs::remove_file(&path);
            }
            4 => fs::write(&path, [0u8, 1, 2, *value]).unwrap(),
            _ => fs::write(&path, format!("{}\nvalue {}\n", file, value)).unwrap(),
        }
    }
    MANIFEST_PATHS.iter().map(PathBuf::from).collect()
}

fn hash_map(checkpoint: &Checkpoint) -> BTreeMap<PathBuf, String> {
    checkpoint
        .files
        .iter()
        .map(|f| (f.path.clone(), f.content_hash.clone()))
        .collect()
}

fn tracked() -> Vec<PathBuf> {
    FILES.iter().map(PathBuf::from).collect()
}

fn run_op(rewind: &Rewind, workspace: &TempDir, op: &TimelineOp, fork_count: &mut usize) {
    const SESSION: &str = "prop";
    let timeline = rewind.get_timeline(SESSION).ok();
    let checkpoints = timeline.as_ref().map(|t| t.checkpoints.clone()).unwrap_or_default();
    let branches = timeline.as_ref().map(|t| t.branches.clone()).unwrap_or_default();

    match op {
        TimelineOp::Checkpoint { file, content } => {
            let path = workspace.path().join(FILES[*file]);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("content {}\n", content)).unwrap();
            rewind.create_checkpoint(SESSION, "step", &tracked()).unwrap();
        }
        TimelineOp::Fork { at } if !checkpoints.is_empty() => {
            let origin = &checkpoints[at % checkpoints.len()];
            *fork_count += 1;
            rewind
                .fork_branch(SESSION, &origin.id, &format!("fork-{}", fork_count))
                .unwrap();
        }
        TimelineOp::Switch { branch } if !branches.is_empty() => {
            let branch = &branches[branch % branches.len()];
            rewind.switch_branch(SESSION, &branch.id).unwrap();
        }
        TimelineOp::Restore { at } if !checkpoints.is_empty() => {
            let target = &checkpoints[at % checkpoints.len()];
            let result = rewind.restore_checkpoint(SESSION, &target.id, false, &tracked()).unwrap();
            assert!(result.success);
            for file in &target.files {
                assert!(workspace.path().join(&file.path).exists());
            }
        }
        TimelineOp::Delete { at } if !checkpoints.is_empty() => {
            let target = &checkpoints[at % checkpoints.len()];
            let before = rewind.get_timeline(SESSION).unwrap();
            let counts: Vec<u64> = target
                .files
                .iter()
                .map(|f| rewind.storage().ref_count(&f.content_hash))
                .collect();
            if let Err(err) = rewind.delete_checkpoint(SESSION, &target.id) {
                assert!(matches!(err, RewindError::ReferentialIntegrity(_)), "{:?}", err);
                let after = rewind.get_timeline(SESSION).unwrap();
                assert_eq!(after.checkpoints, before.checkpoints);
                let counts_after: Vec<u64> = target
                    .files
                    .iter()
                    .map(|f| rewind.storage().ref_count(&f.content_hash))
                    .collect();
                assert_eq!(counts, counts_after);
            }
        }
        TimelineOp::Rename { branch, name } if !branches.is_empty() => {
            let branch = &branches[branch % branches.len()];
            let new_name = format!("renamed-{}", name);
            match rewind.rename_branch(SESSION, &branch.id, &new_name) {
                Ok(()) => {}
                Err(RewindError::DuplicateName(_)) => {
                    let after = rewind.get_timeline(SESSION).unwrap();
                    assert_eq!(after.branches, branches);
                }
                Err(e) => panic!("unexpected rename error: {:?}", e),
            }
        }
        _ => {}
    }
}

fn assert_invariants(rewind: &Rewind) {
    let Ok(session) = rewind.get_session("prop") else {
        return;
    };

    for checkpoint in session.checkpoints.values() {
        assert!(session.parent_chain_terminates(&checkpoint.id), "cycle at {}", checkpoint.id);
        if let Some(parent) = &checkpoint.parent_id {
            assert!(session.checkpoints.contains_key(parent));
        }
    }

    let mains: Vec<_> = session.branches.values().filter(|b| b.is_main).collect();
    assert_eq!(mains.len(), 1);
    assert!(mains[0].name == MAIN_BRANCH_NAME || mains[0].name.starts_with("renamed-"));

    let mut names: Vec<_> = session.branches.values().map(|b| b.name.as_str()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), session.branches.len(), "branch names are unique");

    for branch in session.branches.values() {
        assert!(session.checkpoints.contains_key(&branch.parent_checkpoint_id));
    }
    if let Some(current) = &session.current_checkpoint_id {
        assert!(session.checkpoints.contains_key(current));
    }
    if let Some(current) = &session.current_branch_id {
        assert!(session.branches.contains_key(current));
    }

    let report = rewind.verify().unwrap();
    assert!(report.is_valid(), "{}", report.summary());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Applying the rendered diff to the old text yields the new text
    #[test]
    fn diff_reconstructs_new_text(
        old in text_strategy(),
        new in text_strategy(),
        context in 0..5usize,
    ) {
        let (patch, added, removed) = unified_diff("a/f", "b/f", &old, &new, context);
        let rebuilt = apply_unified_diff(&old, &patch).unwrap();
        prop_assert_eq!(rebuilt, new.lines().collect::<Vec<_>>().join("\n"));

        let old_count = old.lines().count();
        let new_count = new.lines().count();
        prop_assert_eq!(old_count + added, new_count + removed);
    }

    /// Comparing a text with itself produces no hunks
    #[test]
    fn diff_of_identical_text_is_empty(text in text_strategy(), context in 0..5usize) {
        let (patch, added, removed) = unified_diff("a/f", "b/f", &text, &text, context);
        prop_assert_eq!((added, removed), (0, 0));
        prop_assert!(!patch.contains("@@"));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Random operation sequences keep the timeline a forest with one main branch
    #[test]
    fn timeline_invariants_hold(
        ops in prop::collection::vec(timeline_op_strategy(), 1..30)
    ) {
        let workspace = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let rewind = RewindBuilder::new()
            .parallel_workers(1)
            .build(workspace.path().to_path_buf(), storage.path().to_path_buf())
            .unwrap();

        let mut fork_count = 0;
        for op in &ops {
            run_op(&rewind, &workspace, op, &mut fork_count);
            assert_invariants(&rewind);
        }
    }

    /// Applying the diff buckets to the source manifest yields the target manifest
    #[test]
    fn diff_rebuilds_target_manifest(
        first in prop::collection::vec(0..5u8, MANIFEST_PATHS.len()),
        second in prop::collection::vec(0..5u8, MANIFEST_PATHS.len()),
    ) {
        let workspace = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let rewind = Rewind::init(workspace.path().to_path_buf(), storage.path().to_path_buf()).unwrap();

        let tracked = write_manifest_state(&workspace, &first);
        let a = rewind.create_checkpoint("s", "A", &tracked).unwrap();
        write_manifest_state(&workspace, &second);
        let b = rewind.create_checkpoint("s", "B", &tracked).unwrap();

        let diff = rewind.diff_checkpoints("s", &a.id, &b.id).unwrap();
        let mut rebuilt = hash_map(&a);
        for file in &diff.deleted {
            prop_assert!(file.new_hash.is_none());
            prop_assert_eq!(rebuilt.remove(&file.path), file.old_hash.clone());
        }
        for file in &diff.modified {
            prop_assert_ne!(&file.old_hash, &file.new_hash);
            let new_hash = file.new_hash.clone().unwrap();
            prop_assert_eq!(rebuilt.insert(file.path.clone(), new_hash), file.old_hash.clone());
        }
        for file in &diff.added {
            prop_assert!(file.old_hash.is_none());
            let new_hash = file.new_hash.clone().unwrap();
            prop_assert_eq!(rebuilt.insert(file.path.clone(), new_hash), None);
        }
        prop_assert_eq!(rebuilt, hash_map(&b));
    }

    /// diff(A, B) and diff(B, A) mirror each other
    #[test]
    fn diff_is_antisymmetric(
        first in prop::collection::vec(0..4u8, 3),
        second in prop::collection::vec(0..4u8, 3),
    ) {
        let workspace = TempDir::new().unwrap();
        let storage = TempDir::new().unwrap();
        let rewind = Rewind::init(workspace.path().to_path_buf(), storage.path().to_path_buf()).unwrap();

        let write_all = |values: &[u8]| {
            for (file, value) in FILES.iter().zip(values) {
                let path = workspace.path().join(file);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                if *value == 0 {
                    let _ = fs::remove_file(&path);
                } else {
                    fs::write(&path, format!("value {}\n", value)).unwrap();
                }
            }
        };

        write_all(&first);
        let a = rewind.create_checkpoint("s", "A", &tracked()).unwrap();
        write_all(&second);
        let b = rewind.create_checkpoint("s", "B", &tracked()).unwrap();

        let forward = rewind.diff_checkpoints("s", &a.id, &b.id).unwrap();
        let backward = rewind.diff_checkpoints("s", &b.id, &a.id).unwrap();
        prop_assert_eq!(forward.summary.files_added, backward.summary.files_deleted);
        prop_assert_eq!(forward.summary.files_deleted, backward.summary.files_added);
        prop_assert_eq!(forward.summary.files_modified, backward.summary.files_modified);
        prop_assert_eq!(forward.summary.lines_added, backward.summary.lines_removed);
        prop_assert_eq!(forward.is_empty(), first == second);
    }
}
