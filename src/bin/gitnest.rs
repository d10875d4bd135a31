//! # gitnest CLI - nested workspace management
//!
//! Command-line interface for tracking nested git workspaces inside a
//! parent repository, with keep-file preservation on sync and verified
//! backup archival.
//!
//! ## Usage
//! ```bash
//! # Track a new workspace
//! gitnest add https://example.com/widget.git vendor/widget --keep config.yaml
//!
//! # List tracked workspaces
//! gitnest list
//!
//! # Sync everything (keep files resolved interactively)
//! gitnest sync
//!
//! # Force archival maintenance, ignoring the 24h throttle
//! gitnest archive --force
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use gitnest::{
    archive_old_backups, cleanup, ensure_ignore_entry, layout, sync_all, sync_workspace,
    update_archive_check, FixedPrompt, GitCli, KeepChoice, Manifest, Prompt, ResolveSummary,
    SyncReport, TerminalPrompt, Vcs, Workspace,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// gitnest - nested, independently-versioned workspaces inside one repository
#[derive(Parser)]
#[command(name = "gitnest")]
#[command(version)]
#[command(about = "Track nested git workspaces with keep-file preservation and backup archival")]
struct Cli {
    /// Parent repository root (defaults to current directory)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a repository and track it as a workspace
    Add {
        /// Remote URL to clone from
        url: String,

        /// Destination path relative to the repository root
        path: PathBuf,

        /// Keep files (relative to the workspace) to protect from sync
        #[arg(short, long)]
        keep: Vec<PathBuf>,
    },

    /// List tracked workspaces
    #[command(alias = "ls")]
    List {
        /// Show keep files and remotes
        #[arg(short, long)]
        detailed: bool,
    },

    /// Stop tracking a workspace
    #[command(alias = "rm")]
    Remove {
        /// Workspace path relative to the repository root
        path: PathBuf,

        /// Also delete the workspace directory from disk
        #[arg(long)]
        delete: bool,
    },

    /// Show the status of every tracked workspace
    Status,

    /// Synchronize workspaces with their upstream remotes
    Sync {
        /// Sync only this workspace (default: all)
        path: Option<PathBuf>,

        /// Answer every keep-file prompt the same way instead of asking
        #[arg(long, value_enum)]
        choice: Option<ChoiceMode>,
    },

    /// Manage keep files of a workspace
    Keep {
        #[command(subcommand)]
        action: KeepAction,
    },

    /// Archive prior-month backup buckets into verified tarballs
    Archive {
        /// Ignore the 24-hour throttle
        #[arg(long)]
        force: bool,
    },

    /// Delete backups older than the retention window
    Cleanup {
        /// Retention window in days
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum KeepAction {
    /// Protect files from sync
    Add {
        /// Workspace path relative to the repository root
        workspace: PathBuf,
        /// Files relative to the workspace
        files: Vec<PathBuf>,
    },
    /// Stop protecting files
    Remove {
        /// Workspace path relative to the repository root
        workspace: PathBuf,
        /// Files relative to the workspace
        files: Vec<PathBuf>,
    },
}

#[derive(Copy, Clone, ValueEnum)]
enum ChoiceMode {
    Reapply,
    Discard,
    Skip,
}

impl From<ChoiceMode> for KeepChoice {
    fn from(mode: ChoiceMode) -> Self {
        match mode {
            ChoiceMode::Reapply => KeepChoice::Reapply,
            ChoiceMode::Discard => KeepChoice::Discard,
            ChoiceMode::Skip => KeepChoice::Skip,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gitnest=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gitnest=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let repo_root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let git = GitCli::default();

    match cli.command {
        Commands::Add { url, path, keep } => cmd_add(&git, &repo_root, &url, &path, keep),
        Commands::List { detailed } => cmd_list(&repo_root, detailed),
        Commands::Remove { path, delete } => cmd_remove(&repo_root, &path, delete),
        Commands::Status => cmd_status(&git, &repo_root),
        Commands::Sync { path, choice } => cmd_sync(&git, &repo_root, path.as_deref(), choice),
        Commands::Keep { action } => cmd_keep(&git, &repo_root, action),
        Commands::Archive { force } => cmd_archive(&repo_root, force),
        Commands::Cleanup { days } => cmd_cleanup(&repo_root, days),
    }
}

fn cmd_add(
    git: &GitCli,
    repo_root: &Path,
    url: &str,
    path: &Path,
    keep: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let mut manifest = Manifest::load(repo_root)?;
    if manifest.find(path).is_some() {
        bail!("workspace '{}' is already tracked", path.display());
    }

    let workspace_path = repo_root.join(path);
    if workspace_path.exists() {
        bail!("destination '{}' already exists", workspace_path.display());
    }
    git.clone_repo(url, &workspace_path)
        .with_context(|| format!("cloning {}", url))?;

    let mut workspace = Workspace::new(path, url);
    for file in keep {
        workspace.add_keep_file(file.clone());
        git.set_skip_worktree(&workspace_path, &file)
            .with_context(|| format!("protecting {}", file.display()))?;
    }
    manifest.add(workspace)?;
    manifest.save(repo_root)?;

    // The workspace is versioned by its own repository, so the parent
    // repository must not track its files.
    let entry = format!("{}/", path.display());
    if ensure_ignore_entry(repo_root, &entry)? {
        println!("Added '{}' to .gitignore", entry);
    }

    println!("{} workspace '{}'", "Tracked".green().bold(), path.display());
    Ok(())
}

fn cmd_list(repo_root: &Path, detailed: bool) -> anyhow::Result<()> {
    let manifest = Manifest::load(repo_root)?;
    if manifest.is_empty() {
        println!("No workspaces tracked.");
        return Ok(());
    }
    for ws in manifest.iter() {
        if detailed {
            println!("{}", ws.path.display().to_string().bold());
            println!("  remote: {}", ws.remote_url);
            if ws.has_keep_files() {
                for file in &ws.keep_files {
                    println!("  keep:   {}", file.display().to_string().yellow());
                }
            }
        } else {
            let keeps = if ws.has_keep_files() {
                format!(" ({} keep file(s))", ws.keep_files.len())
            } else {
                String::new()
            };
            println!("{}{}", ws.path.display(), keeps.dimmed());
        }
    }
    Ok(())
}

fn cmd_remove(repo_root: &Path, path: &Path, delete: bool) -> anyhow::Result<()> {
    let mut manifest = Manifest::load(repo_root)?;
    let Some(ws) = manifest.remove(path) else {
        bail!("workspace '{}' is not tracked", path.display());
    };
    manifest.save(repo_root)?;
    if delete {
        let workspace_path = repo_root.join(&ws.path);
        if workspace_path.exists() {
            std::fs::remove_dir_all(&workspace_path)
                .with_context(|| format!("deleting {}", workspace_path.display()))?;
        }
    }
    println!("{} workspace '{}'", "Untracked".green().bold(), path.display());
    Ok(())
}

fn cmd_status(git: &GitCli, repo_root: &Path) -> anyhow::Result<()> {
    let manifest = Manifest::load(repo_root)?;
    if manifest.is_empty() {
        println!("No workspaces tracked.");
        return Ok(());
    }
    for ws in manifest.iter() {
        let workspace_path = repo_root.join(&ws.path);
        println!("{}", ws.path.display().to_string().bold());
        if !git.is_repo(&workspace_path) {
            println!("  {}", "missing (not cloned)".red());
            continue;
        }
        match git.status_short(&workspace_path) {
            Ok(status) => {
                for line in status.lines() {
                    println!("  {}", line);
                }
            }
            Err(e) => println!("  {} {}", "status failed:".red(), e),
        }
    }
    Ok(())
}

fn cmd_sync(
    git: &GitCli,
    repo_root: &Path,
    path: Option<&Path>,
    choice: Option<ChoiceMode>,
) -> anyhow::Result<()> {
    let manifest = Manifest::load(repo_root)?;
    let mut terminal = TerminalPrompt;
    let mut fixed;
    let prompt: &mut dyn Prompt = match choice {
        Some(mode) => {
            fixed = FixedPrompt(mode.into());
            &mut fixed
        }
        None => &mut terminal,
    };

    match path {
        Some(path) => {
            let Some(ws) = manifest.find(path) else {
                bail!("workspace '{}' is not tracked", path.display());
            };
            let resolution = sync_workspace(git, prompt, ws, repo_root)?;
            print_resolution(&ws.path, resolution.as_ref());
            println!("{} '{}'", "Synced".green().bold(), ws.path.display());
        }
        None => {
            let report = sync_all(git, prompt, &manifest, repo_root)?;
            print_sync_report(&report);
            if !report.failures.is_empty() {
                bail!("{} workspace(s) failed to sync", report.failures.len());
            }
        }
    }
    Ok(())
}

fn print_resolution(path: &Path, resolution: Option<&ResolveSummary>) {
    let Some(summary) = resolution else { return };
    println!(
        "  {}: {} unchanged, {} reapplied, {} discarded, {} skipped",
        path.display(),
        summary.unchanged,
        summary.reapplied,
        summary.discarded,
        summary.skipped
    );
    for patch in &summary.retained_patches {
        println!(
            "  {} local changes retained at {}",
            "conflict:".yellow().bold(),
            patch.display()
        );
    }
    for (file, err) in &summary.errors {
        println!("  {} {}: {}", "error:".red().bold(), file.display(), err);
    }
}

fn print_sync_report(report: &SyncReport) {
    for sync in &report.synced {
        println!("{} '{}'", "Synced".green().bold(), sync.path.display());
        print_resolution(&sync.path, sync.resolution.as_ref());
    }
    for (path, err) in &report.failures {
        println!("{} '{}': {}", "Failed".red().bold(), path.display(), err);
    }
    if let Some(archive) = &report.archive {
        if !archive.archived.is_empty() {
            println!(
                "Archived {} backup bucket(s) into {}",
                archive.archived.len(),
                layout::ARCHIVED_DIR
            );
        }
        for (bucket, err) in &archive.failures {
            println!(
                "{} archiving '{}': {}",
                "Failed".red().bold(),
                bucket.display(),
                err
            );
        }
    }
}

fn cmd_keep(git: &GitCli, repo_root: &Path, action: KeepAction) -> anyhow::Result<()> {
    let mut manifest = Manifest::load(repo_root)?;
    match action {
        KeepAction::Add { workspace, files } => {
            let workspace_path = repo_root.join(&workspace);
            let Some(ws) = manifest.find_mut(&workspace) else {
                bail!("workspace '{}' is not tracked", workspace.display());
            };
            for file in files {
                if ws.add_keep_file(file.clone()) {
                    git.set_skip_worktree(&workspace_path, &file)
                        .with_context(|| format!("protecting {}", file.display()))?;
                    println!("{} {}", "Protected".green().bold(), file.display());
                } else {
                    println!("'{}' is already a keep file", file.display());
                }
            }
        }
        KeepAction::Remove { workspace, files } => {
            let workspace_path = repo_root.join(&workspace);
            let Some(ws) = manifest.find_mut(&workspace) else {
                bail!("workspace '{}' is not tracked", workspace.display());
            };
            for file in files {
                if ws.remove_keep_file(&file) {
                    git.clear_skip_worktree(&workspace_path, &file)
                        .with_context(|| format!("unprotecting {}", file.display()))?;
                    println!("{} {}", "Unprotected".green().bold(), file.display());
                } else {
                    println!("'{}' is not a keep file", file.display());
                }
            }
        }
    }
    manifest.save(repo_root)?;
    Ok(())
}

fn cmd_archive(repo_root: &Path, force: bool) -> anyhow::Result<()> {
    if !force && !gitnest::should_run_archive(repo_root) {
        println!("Archive maintenance already ran in the last 24 hours (use --force to override).");
        return Ok(());
    }
    let report = archive_old_backups(&layout::backup_root(repo_root))?;
    update_archive_check(repo_root)?;

    if report.archived.is_empty() && !report.has_failures() {
        println!("Nothing to archive.");
    }
    for archive in &report.archived {
        println!("{} {}", "Archived".green().bold(), archive.display());
    }
    for (bucket, err) in &report.failures {
        println!("{} '{}': {}", "Failed".red().bold(), bucket.display(), err);
    }
    if report.has_failures() {
        bail!("{} bucket(s) failed to archive", report.failures.len());
    }
    Ok(())
}

fn cmd_cleanup(repo_root: &Path, days: i64) -> anyhow::Result<()> {
    let deleted = cleanup(&layout::backup_root(repo_root), days)?;
    println!(
        "Deleted {} backup(s) older than {} day(s).",
        deleted, days
    );
    Ok(())
}
