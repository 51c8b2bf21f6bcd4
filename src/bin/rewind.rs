//! # Rewind CLI - checkpoint timelines for a workspace
//!
//! Command-line front end for the Rewind engine.
//!
//! ## Usage
//! ```bash
//! # Initialize storage in the current directory
//! rewind init
//!
//! # Snapshot every tracked file of the workspace
//! rewind checkpoint -m "Initial state"
//!
//! # Try something on a separate branch
//! rewind fork <checkpoint-id> experiment
//! rewind switch experiment
//!
//! # Compare and go back
//! rewind diff <from-id> <to-id>
//! rewind restore <checkpoint-id>
//! ```
//!
//! Checkpoint IDs accept any unique prefix; branches accept names.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use rewind::verification::ensure_blobs_intact;
use rewind::{
    CheckpointDiff, CompressionStrategy, DiffOptions, FileDiff, Rewind, RewindBuilder,
    RewindError, DEFAULT_STORAGE_DIR,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Rewind CLI - branching checkpoints for your workspace
#[derive(Parser)]
#[command(name = "rewind")]
#[command(version)]
#[command(about = "Checkpoint, branch, compare and restore workspace states")]
#[command(long_about = None)]
struct Cli {
    /// Workspace directory (defaults to current)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Storage directory (defaults to <path>/.rewind)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Session to operate on
    #[arg(long, global = true, default_value = "default")]
    session: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize storage for a workspace
    Init {
        /// Compression strategy
        #[arg(long, value_enum, default_value = "fast")]
        compression: CompressionMode,

        /// Ignore patterns (gitignore syntax)
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Largest file to track in bytes (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_file_size: u64,
    },

    /// Create a checkpoint
    #[command(alias = "cp")]
    Checkpoint {
        /// Checkpoint label
        #[arg(short, long)]
        message: String,

        /// Longer description
        #[arg(short, long)]
        description: Option<String>,

        /// Files to track (defaults to every file in the workspace)
        files: Vec<PathBuf>,
    },

    /// Show the checkpoint tree
    #[command(alias = "tl")]
    Timeline,

    /// List checkpoints in creation order
    #[command(alias = "ls")]
    List {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,

        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Compare two checkpoints
    Diff {
        /// Older checkpoint
        from: String,

        /// Newer checkpoint
        to: String,

        /// Show only statistics
        #[arg(long)]
        stat: bool,

        /// Only show paths matching these globs
        #[arg(long = "path-filter", value_name = "GLOB")]
        filter: Vec<String>,

        /// Number of context lines
        #[arg(long, default_value = "3")]
        context: usize,
    },

    /// Restore the workspace to a checkpoint
    #[command(alias = "rs")]
    Restore {
        /// Checkpoint ID
        checkpoint: String,

        /// Do not save the live state before restoring
        #[arg(long)]
        no_backup: bool,
    },

    /// Create a branch at a checkpoint
    Fork {
        /// Checkpoint to fork from
        checkpoint: String,

        /// Branch name
        name: String,

        /// Branch description
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Make a branch current
    Switch {
        /// Branch name or ID
        branch: String,
    },

    /// Rename a branch
    Rename {
        /// Branch name or ID
        branch: String,

        /// New name
        name: String,
    },

    /// List branches
    Branches,

    /// Delete a branch
    DeleteBranch {
        /// Branch name or ID
        branch: String,
    },

    /// Delete a checkpoint without children
    Delete {
        /// Checkpoint ID
        checkpoint: String,
    },

    /// Remove unreferenced blobs
    Gc {
        /// Report without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Check storage integrity
    Verify,

    /// Show current status
    Status,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CompressionMode {
    None,
    Fast,
    Adaptive,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        match e.downcast_ref::<RewindError>() {
            Some(err) => eprintln!("{}: {}", "Error".red().bold(), err.user_message()),
            None => eprintln!("{}: {:#}", "Error".red().bold(), e),
        }
        std::process::exit(1);
    }
}

/// Command context shared by every subcommand
struct Workspace {
    root_path: PathBuf,
    storage_path: PathBuf,
    session: String,
}

impl Workspace {
    fn open(&self) -> Result<Rewind> {
        if !self.storage_path.join("metadata.json").exists() {
            bail!("Not a Rewind workspace. Run 'rewind init' first.");
        }
        Rewind::open(self.root_path.clone(), self.storage_path.clone())
            .with_context(|| format!("Failed to open storage at {}", self.storage_path.display()))
    }
}

fn run(cli: Cli) -> Result<()> {
    let root_path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let storage_path = cli
        .storage
        .unwrap_or_else(|| root_path.join(DEFAULT_STORAGE_DIR));
    let ctx = Workspace { root_path, storage_path, session: cli.session };

    match cli.command {
        Commands::Init { compression, ignore, max_file_size } => {
            cmd_init(&ctx, compression, ignore, max_file_size)
        }
        Commands::Checkpoint { message, description, files } => {
            cmd_checkpoint(&ctx, message, description, files)
        }
        Commands::Timeline => cmd_timeline(&ctx),
        Commands::List { detailed, limit } => cmd_list(&ctx, detailed, limit),
        Commands::Diff { from, to, stat, filter, context } => {
            cmd_diff(&ctx, from, to, stat, filter, context)
        }
        Commands::Restore { checkpoint, no_backup } => cmd_restore(&ctx, checkpoint, !no_backup),
        Commands::Fork { checkpoint, name, message } => cmd_fork(&ctx, checkpoint, name, message),
        Commands::Switch { branch } => cmd_switch(&ctx, branch),
        Commands::Rename { branch, name } => cmd_rename(&ctx, branch, name),
        Commands::Branches => cmd_branches(&ctx),
        Commands::DeleteBranch { branch } => cmd_delete_branch(&ctx, branch),
        Commands::Delete { checkpoint } => cmd_delete(&ctx, checkpoint),
        Commands::Gc { dry_run } => cmd_gc(&ctx, dry_run),
        Commands::Verify => cmd_verify(&ctx),
        Commands::Status => cmd_status(&ctx),
    }
}

/// Initialize storage for a workspace
///
/// The storage directory contains:
/// - metadata.json: configuration and format version
/// - objects/: content-addressed blobs
/// - refs/: reference counts
/// - sessions/: checkpoints, branches and pointers per session
fn cmd_init(
    ctx: &Workspace,
    compression: CompressionMode,
    ignore: Vec<String>,
    max_file_size: u64,
) -> Result<()> {
    if ctx.storage_path.join("metadata.json").exists() {
        bail!("Storage already initialized at {}", ctx.storage_path.display());
    }

    println!("{}", "Initializing Rewind...".blue().bold());

    let compression_strategy = match compression {
        CompressionMode::None => CompressionStrategy::None,
        CompressionMode::Fast => CompressionStrategy::Fast,
        CompressionMode::Adaptive => CompressionStrategy::Adaptive { min_size: 4096 },
    };

    RewindBuilder::new()
        .compression_strategy(compression_strategy)
        .ignore_patterns(ignore)
        .max_file_size(max_file_size)
        .build(ctx.root_path.clone(), ctx.storage_path.clone())?;

    println!("{} Initialized Rewind storage", "✓".green().bold());
    println!("  Workspace: {}", ctx.root_path.display().to_string().cyan());
    println!("  Storage: {}", ctx.storage_path.display().to_string().cyan());
    println!("\nNext steps:");
    println!("  - Create your first checkpoint: {}", "rewind checkpoint -m \"Initial state\"".yellow());
    println!("  - View the timeline: {}", "rewind timeline".yellow());

    Ok(())
}

/// Create a checkpoint of the given files, or of the whole workspace
fn cmd_checkpoint(
    ctx: &Workspace,
    message: String,
    description: Option<String>,
    files: Vec<PathBuf>,
) -> Result<()> {
    let rewind = ctx.open()?;
    let start = Instant::now();

    let spinner = spinner("Scanning files...");
    let files = if files.is_empty() { rewind.scan_workspace()? } else { files };
    spinner.set_message(format!("Storing {} files...", files.len()));
    let checkpoint =
        rewind.create_checkpoint_with_description(&ctx.session, &message, &files, description)?;
    spinner.finish_and_clear();

    println!(
        "{} Created checkpoint {}",
        "✓".green().bold(),
        checkpoint.short_id().yellow().bold()
    );
    println!("  Label: {}", checkpoint.label.cyan());
    println!("  Files: {}", checkpoint.files.len().to_string().cyan());
    println!("  Size: {}", format_bytes(checkpoint.total_size()).cyan());
    let stats = rewind.storage().compression_stats();
    if stats.blobs_compressed + stats.blobs_stored_raw > 0 {
        println!(
            "  New blobs: {} ({:.0}% compressed, {} saved)",
            (stats.blobs_compressed + stats.blobs_stored_raw).to_string().cyan(),
            stats.compression_ratio() * 100.0,
            format_bytes(stats.bytes_saved).cyan()
        );
    }
    println!("  Time: {}", format_duration(trim_millis(start.elapsed())).to_string().cyan());

    Ok(())
}

/// Render the session's checkpoint tree
fn cmd_timeline(ctx: &Workspace) -> Result<()> {
    let rewind = ctx.open()?;
    let timeline = rewind.get_session(&ctx.session)?;

    println!("{} {}", "Timeline for session".blue().bold(), ctx.session.cyan());
    println!();

    print!("{}", timeline.format_tree());

    if let Some(branch) = timeline.current_branch() {
        println!("\nOn branch {}", branch.name.green().bold());
    }

    Ok(())
}

/// List checkpoints in creation order
fn cmd_list(ctx: &Workspace, detailed: bool, limit: Option<usize>) -> Result<()> {
    let rewind = ctx.open()?;
    let timeline = rewind.get_timeline(&ctx.session)?;

    println!("{}", "Checkpoints:".blue().bold());
    println!();

    let display_count = limit.unwrap_or(timeline.checkpoints.len()).min(timeline.checkpoints.len());
    let branch_name = |id: &Option<String>| {
        id.as_ref()
            .and_then(|id| timeline.branches.iter().find(|b| &b.id == id))
            .map(|b| b.name.clone())
            .unwrap_or_default()
    };

    for checkpoint in timeline.checkpoints.iter().take(display_count) {
        let marker = if timeline.current_checkpoint_id.as_deref() == Some(checkpoint.id.as_str()) {
            "*".green().bold()
        } else {
            " ".normal()
        };

        println!(
            "{} {} {} {} {}",
            marker,
            checkpoint.short_id().yellow().bold(),
            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            checkpoint.label.cyan(),
            format!("[{}]", branch_name(&checkpoint.branch_id)).dimmed()
        );

        if detailed {
            println!(
                "    Files: {} | Size: {}",
                checkpoint.files.len().to_string().dimmed(),
                format_bytes(checkpoint.total_size()).dimmed()
            );
            if let Some(parent) = &checkpoint.parent_id {
                println!("    Parent: {}", short(parent).dimmed());
            }
            if let Some(desc) = &checkpoint.description {
                println!("    {}", desc.dimmed());
            }
            println!();
        }
    }

    if display_count < timeline.checkpoints.len() {
        println!(
            "\n{}",
            format!("Showing {} of {} checkpoints", display_count, timeline.checkpoints.len()).dimmed()
        );
    }

    Ok(())
}

/// Compare two checkpoints
fn cmd_diff(
    ctx: &Workspace,
    from: String,
    to: String,
    stat_only: bool,
    path_filter: Vec<String>,
    context_lines: usize,
) -> Result<()> {
    let rewind = ctx.open()?;
    let from_id = rewind.resolve_checkpoint(&ctx.session, &from)?;
    let to_id = rewind.resolve_checkpoint(&ctx.session, &to)?;

    println!("{} {} → {}", "Comparing".blue().bold(), short(&from_id).yellow(), short(&to_id).yellow());
    println!();

    let options = DiffOptions { context_lines, path_filter, ..DiffOptions::default() };
    let diff = rewind.diff_checkpoints_with_options(&ctx.session, &from_id, &to_id, options)?;

    show_diff_stats(&diff);
    if !stat_only {
        for file in diff.iter() {
            show_file_diff(file);
        }
    }

    Ok(())
}

fn show_diff_stats(diff: &CheckpointDiff) {
    let summary = &diff.summary;
    println!("{}", "Summary:".bold());
    println!(
        "  {} files changed, {} insertions(+), {} deletions(-)",
        summary.total_files(),
        summary.lines_added.to_string().green(),
        summary.lines_removed.to_string().red()
    );
    println!(
        "  Added: {}  Modified: {}  Deleted: {}",
        summary.files_added.to_string().green(),
        summary.files_modified.to_string().yellow(),
        summary.files_deleted.to_string().red()
    );
    let sign = if summary.size_delta >= 0 { "+" } else { "-" };
    println!("  Size change: {}{}", sign, format_bytes(summary.size_delta.unsigned_abs()));
}

fn show_file_diff(file: &FileDiff) {
    println!("\n{} {}", "diff".dimmed(), file.path.display().to_string().cyan());

    if file.is_binary {
        println!("{}", "Binary files differ".yellow());
        return;
    }
    if file.content_skipped {
        println!("{}", "Content too large to diff".yellow());
        return;
    }

    let Some(text) = &file.diff_content else { return };
    for line in text.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            println!("{}", line.bold());
        } else if line.starts_with("@@") {
            println!("{}", line.cyan());
        } else if line.starts_with('+') {
            println!("{}", line.green());
        } else if line.starts_with('-') {
            println!("{}", line.red());
        } else {
            println!("{}", line.dimmed());
        }
    }
}

/// Restore the workspace to a checkpoint
///
/// The live state is taken from a fresh workspace scan, so files created
/// after the target checkpoint are removed.
fn cmd_restore(ctx: &Workspace, checkpoint: String, create_backup: bool) -> Result<()> {
    let rewind = ctx.open()?;
    let full_id = rewind.resolve_checkpoint(&ctx.session, &checkpoint)?;

    println!("{} {}", "Restoring to checkpoint".blue().bold(), short(&full_id).yellow());

    let start = Instant::now();
    let spinner = spinner("Restoring files...");
    let tracked = rewind.scan_workspace()?;
    let outcome = rewind.restore_checkpoint(&ctx.session, &full_id, create_backup, &tracked);
    spinner.finish_and_clear();

    let result = match outcome {
        Ok(result) => result,
        Err(RewindError::PartialRestore(result)) => {
            println!("{} Restore stopped partway", "✗".red().bold());
            println!("  Files written: {}", result.restored_files.len().to_string().yellow());
            println!("  Files removed: {}", result.removed_files.len().to_string().yellow());
            if let Some(backup) = &result.backup_checkpoint_id {
                println!("  Backup checkpoint: {}", short(backup).yellow());
            }
            bail!(result.error.clone().unwrap_or_else(|| "restore failed".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    println!("{} Restoration complete", "✓".green().bold());
    println!("  Files restored: {}", result.restored_files.len().to_string().cyan());
    println!("  Files removed: {}", result.removed_files.len().to_string().yellow());
    if let Some(backup) = &result.backup_checkpoint_id {
        println!("  Backup checkpoint: {}", short(backup).cyan());
    }
    println!("  Time: {}", format_duration(trim_millis(start.elapsed())).to_string().cyan());

    Ok(())
}

fn cmd_fork(ctx: &Workspace, checkpoint: String, name: String, message: Option<String>) -> Result<()> {
    let rewind = ctx.open()?;
    let full_id = rewind.resolve_checkpoint(&ctx.session, &checkpoint)?;

    let branch = rewind.fork_branch_with_description(&ctx.session, &full_id, &name, message)?;

    println!(
        "{} Created branch {} at {}",
        "✓".green().bold(),
        branch.name.green().bold(),
        short(&full_id).yellow()
    );
    println!("  Branch ID: {}", branch.short_id().dimmed());
    println!("  Switch with: {}", format!("rewind switch {}", branch.name).yellow());

    Ok(())
}

fn cmd_switch(ctx: &Workspace, branch: String) -> Result<()> {
    let rewind = ctx.open()?;
    let branch_id = rewind.resolve_branch(&ctx.session, &branch)?;
    rewind.switch_branch(&ctx.session, &branch_id)?;

    let timeline = rewind.get_session(&ctx.session)?;
    let name = timeline.current_branch().map(|b| b.name.clone()).unwrap_or_default();
    println!("{} Switched to branch {}", "✓".green().bold(), name.green().bold());
    if let Some(current) = timeline.current_checkpoint() {
        println!("  At checkpoint: {}", current.display_format().cyan());
    }
    println!(
        "  {}",
        "The workspace is unchanged; use 'rewind restore' to materialize the checkpoint.".dimmed()
    );

    Ok(())
}

fn cmd_rename(ctx: &Workspace, branch: String, name: String) -> Result<()> {
    let rewind = ctx.open()?;
    let branch_id = rewind.resolve_branch(&ctx.session, &branch)?;
    rewind.rename_branch(&ctx.session, &branch_id, &name)?;

    println!("{} Renamed branch {} to {}", "✓".green().bold(), branch.yellow(), name.trim().green().bold());
    Ok(())
}

fn cmd_branches(ctx: &Workspace) -> Result<()> {
    let rewind = ctx.open()?;
    let timeline = rewind.get_session(&ctx.session)?;

    println!("{}", "Branches:".blue().bold());
    for branch in timeline.list_branches() {
        let is_current = timeline.current_branch_id.as_deref() == Some(branch.id.as_str());
        let marker = if is_current { "*".green().bold() } else { " ".normal() };
        let name = if is_current { branch.name.green().bold() } else { branch.name.normal() };
        let authored = timeline.checkpoints_on_branch(&branch.id);
        let head = authored
            .last()
            .map(|c| c.short_id().to_string())
            .unwrap_or_else(|| short(&branch.parent_checkpoint_id).to_string());
        println!(
            "{} {} {} {} {}",
            marker,
            name,
            head.yellow(),
            format!("({} checkpoints)", authored.len()).cyan(),
            format!("(from {})", short(&branch.parent_checkpoint_id)).dimmed()
        );
    }

    Ok(())
}

fn cmd_delete_branch(ctx: &Workspace, branch: String) -> Result<()> {
    let rewind = ctx.open()?;
    let branch_id = rewind.resolve_branch(&ctx.session, &branch)?;
    rewind.delete_branch(&ctx.session, &branch_id)?;

    println!("{} Deleted branch {}", "✓".green().bold(), branch.yellow());
    Ok(())
}

fn cmd_delete(ctx: &Workspace, checkpoint: String) -> Result<()> {
    let rewind = ctx.open()?;
    let full_id = rewind.resolve_checkpoint(&ctx.session, &checkpoint)?;
    rewind.delete_checkpoint(&ctx.session, &full_id)?;

    println!("{} Deleted checkpoint {}", "✓".green().bold(), short(&full_id).yellow());
    Ok(())
}

/// Garbage collect unreferenced blobs
fn cmd_gc(ctx: &Workspace, dry_run: bool) -> Result<()> {
    let rewind = ctx.open()?;

    if dry_run {
        println!("{}", "Analyzing garbage collection (dry run)...".blue().bold());
    } else {
        println!("{}", "Running garbage collection...".blue().bold());
    }

    let stats = rewind.gc(dry_run)?;

    println!("\n{}", "Results:".bold());
    println!("  Objects examined: {}", stats.objects_examined);
    println!("  Unreferenced objects: {}", stats.unreferenced_objects.len().to_string().yellow());
    if dry_run {
        println!("  Space to reclaim: {}", format_bytes(stats.bytes_reclaimed).green());
        for hash in stats.unreferenced_objects.iter().take(10) {
            println!("  - {}", short_hash(hash).dimmed());
        }
        if stats.unreferenced_objects.len() > 10 {
            println!("  ... and {} more", stats.unreferenced_objects.len() - 10);
        }
        println!("\n{}", "No changes made (dry run)".dimmed());
    } else {
        println!("  Objects deleted: {}", stats.objects_deleted.to_string().green());
        println!("  Space reclaimed: {}", format_bytes(stats.bytes_reclaimed).green());
        println!(
            "  Time: {}",
            format_duration(Duration::from_millis(stats.duration_ms)).to_string().cyan()
        );
    }

    Ok(())
}

/// Verify every session against the content store
fn cmd_verify(ctx: &Workspace) -> Result<()> {
    let rewind = ctx.open()?;

    let spinner = spinner("Verifying storage...");
    let report = rewind.verify()?;
    spinner.finish_and_clear();

    if report.is_valid() {
        println!("{} {}", "✓".green().bold(), report.summary());
        return Ok(());
    }

    println!("{} {}", "✗".red().bold(), report.summary().red());
    for hash in &report.missing_blobs {
        println!("  missing blob {}", short_hash(hash).yellow());
    }
    for hash in &report.corrupt_blobs {
        println!("  corrupt blob {}", short_hash(hash).yellow());
    }
    for mismatch in &report.ref_count_mismatches {
        println!(
            "  {} referenced {} times, counted {}",
            short_hash(&mismatch.hash).yellow(),
            mismatch.expected,
            mismatch.recorded
        );
    }
    for hash in &report.orphaned_objects {
        println!("  orphaned blob {}", short_hash(hash).dimmed());
    }
    for error in &report.timeline_errors {
        println!("  {}", error.yellow());
    }

    ensure_blobs_intact(&report)?;
    bail!("Verification failed: bookkeeping is inconsistent but every blob is intact")
}

/// Show current status
fn cmd_status(ctx: &Workspace) -> Result<()> {
    let rewind = ctx.open()?;

    println!("{}", "Rewind Status:".blue().bold());
    println!();
    println!("  Session: {}", ctx.session.cyan());

    match rewind.get_session(&ctx.session) {
        Ok(timeline) => {
            if let Some(branch) = timeline.current_branch() {
                println!("  Branch: {}", branch.name.green().bold());
            }
            if let Some(current) = timeline.current_checkpoint() {
                println!("  Checkpoint: {}", current.display_format().cyan());
            }
            let stats = timeline.stats();
            println!("  Checkpoints: {}", stats.total_checkpoints);
            println!("  Branches: {}", stats.branches);
        }
        Err(RewindError::NotFound { .. }) => {
            println!("  {}", "No checkpoints yet".yellow());
        }
        Err(e) => return Err(e.into()),
    }

    let storage = rewind.storage_stats()?;
    println!("\n{}", "Storage:".bold());
    println!("  Location: {}", rewind.storage_path().display());
    println!("  Objects: {}", storage.object_count);
    println!("  Size: {}", format_bytes(storage.total_bytes));
    println!("  Sessions: {}", storage.session_count);

    Ok(())
}

// Helper functions

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}

fn short_hash(hash: &str) -> &str {
    &hash[..16.min(hash.len())]
}

fn trim_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// Format bytes in human-readable form
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
