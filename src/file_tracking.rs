//! Workspace scanning
//!
//! [`WorkspaceScanner`] lists the files under a workspace root the way a
//! user expects a checkpoint to see them: `.gitignore` rules apply (even
//! outside a git repository), custom gitignore-style patterns apply on top,
//! and the storage directory is never included. The result is a sorted list
//! of relative paths ready to be passed as `tracked_files`.

use crate::error::Result;
use ignore::{overrides::OverrideBuilder, WalkBuilder, WalkState};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Gitignore-aware lister of workspace files
#[derive(Debug, Clone)]
pub struct WorkspaceScanner {
    root_path: PathBuf,
    ignore_patterns: Vec<String>,
    excluded_dirs: Vec<PathBuf>,
    max_file_size: u64,
    parallel_workers: usize,
}

impl WorkspaceScanner {
    /// Scanner for `root_path` with no extra rules
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            ignore_patterns: Vec::new(),
            excluded_dirs: Vec::new(),
            max_file_size: 0,
            parallel_workers: num_cpus::get(),
        }
    }

    /// Extra gitignore-style patterns; a leading `!` re-includes
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Never descend into `dir` (absolute, or relative to the root)
    pub fn exclude_dir(mut self, dir: PathBuf) -> Self {
        let dir = if dir.is_absolute() { dir } else { self.root_path.join(dir) };
        self.excluded_dirs.push(dir);
        self
    }

    /// Skip files larger than `size` bytes (0 = unlimited)
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Walker threads (minimum 1)
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    /// List tracked files as sorted paths relative to the root
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let start = Instant::now();

        let mut walker_builder = WalkBuilder::new(&self.root_path);
        walker_builder
            .follow_links(false)
            .hidden(false)
            .parents(true)
            .ignore(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .threads(self.parallel_workers);

        let mut override_builder = OverrideBuilder::new(&self.root_path);
        // In override builder, ! prefix means exclude
        override_builder.add("!.git/")?;
        for dir in &self.excluded_dirs {
            if let Ok(relative) = dir.strip_prefix(&self.root_path) {
                let relative = relative.to_string_lossy();
                if !relative.is_empty() {
                    override_builder.add(&format!("!{}/", relative))?;
                }
            }
        }
        for pattern in &self.ignore_patterns {
            let final_pattern = match pattern.strip_prefix('!') {
                Some(include) => include.to_string(),
                None => format!("!{}", pattern),
            };
            override_builder.add(&final_pattern)?;
        }
        walker_builder.overrides(override_builder.build()?);

        let found = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
        let excluded = Arc::new(self.excluded_dirs.clone());
        let root = self.root_path.clone();
        let max_file_size = self.max_file_size;

        walker_builder.build_parallel().run(|| {
            let found = Arc::clone(&found);
            let excluded = Arc::clone(&excluded);
            let root = root.clone();

            Box::new(move |entry_result| {
                let entry = match entry_result {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Walk error: {}", e);
                        return WalkState::Continue;
                    }
                };
                let path = entry.path();
                if excluded.iter().any(|dir| path.starts_with(dir)) {
                    return WalkState::Skip;
                }
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return WalkState::Continue;
                }
                if max_file_size > 0 {
                    match entry.metadata() {
                        Ok(meta) if meta.len() > max_file_size => {
                            debug!("Skipping {:?}: {} bytes exceeds limit", path, meta.len());
                            return WalkState::Continue;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Cannot stat {:?}: {}", path, e);
                            return WalkState::Continue;
                        }
                    }
                }
                if let Ok(relative) = path.strip_prefix(&root) {
                    trace!("Found {:?}", relative);
                    found.lock().push(relative.to_path_buf());
                }
                WalkState::Continue
            })
        });

        let mut files = std::mem::take(&mut *found.lock());
        files.sort();
        debug!("Scanned {} files under {:?} in {:?}", files.len(), self.root_path, start.elapsed());
        Ok(files)
    }

    /// Root directory being scanned
    pub fn root(&self) -> &Path {
        &self.root_path
    }
}
