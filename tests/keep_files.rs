//! End-to-end keep-file resolution against real git repositories
//!
//! These tests build a small upstream repository, clone it as a workspace,
//! advance the upstream, and drive the resolver through its terminal
//! states: no divergence, clean reapply, conflicting reapply, and discard.

use gitnest::{
    layout, resolve_keep_files, FixedPrompt, GitCli, KeepChoice, PatchEngine, ResolveContext, Vcs,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use walkdir::WalkDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.email=test@example.com", "-c", "user.name=Test"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git command");
    assert!(
        output.status.success(),
        "git {:?} failed:\nstdout: {}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit_all(dir: &Path, message: &str) {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-m", message]);
}

/// Upstream repo + parent repo with one cloned workspace holding one keep file
struct Fixture {
    _root: TempDir,
    repo_root: PathBuf,
    upstream: PathBuf,
    workspace: PathBuf,
    workspace_rel: PathBuf,
    keep_file: PathBuf,
}

impl Fixture {
    /// Base content committed upstream and cloned into the workspace
    const BASE: &'static str = "version: 1.0\nsetting: default\n";

    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let upstream = root.path().join("upstream");
        fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init"]);
        fs::write(upstream.join("config.yaml"), Self::BASE).unwrap();
        commit_all(&upstream, "base");

        let repo_root = root.path().join("parent");
        let workspace_rel = PathBuf::from("vendor/widget");
        let workspace = repo_root.join(&workspace_rel);
        fs::create_dir_all(workspace.parent().unwrap()).unwrap();
        git(
            repo_root.parent().unwrap(),
            &[
                "clone",
                upstream.to_str().unwrap(),
                workspace.to_str().unwrap(),
            ],
        );

        Fixture {
            _root: root,
            repo_root,
            upstream,
            workspace,
            workspace_rel,
            keep_file: PathBuf::from("config.yaml"),
        }
    }

    /// Write a permanent local edit and protect the file
    fn diverge_locally(&self, content: &str) {
        fs::write(self.workspace.join(&self.keep_file), content).unwrap();
        git(&self.workspace, &["update-index", "--skip-worktree", "config.yaml"]);
    }

    /// Commit new content upstream and fetch it into the workspace
    fn diverge_remotely(&self, content: &str) {
        fs::write(self.upstream.join("config.yaml"), content).unwrap();
        commit_all(&self.upstream, "upstream change");
        git(&self.workspace, &["fetch", "origin"]);
    }

    /// Fast-forward the workspace onto the fetched upstream, as a sync does
    /// after resolution
    fn pull(&self) {
        git(&self.workspace, &["pull", "--ff-only"]);
    }

    fn resolve_with(&self, choice: KeepChoice) -> gitnest::ResolveSummary {
        let vcs = GitCli::default();
        let branch = vcs.current_branch(&self.workspace).unwrap();
        let keep_files = vec![self.keep_file.clone()];
        let ctx = ResolveContext {
            workspace_path: &self.workspace,
            branch: &branch,
            keep_files: &keep_files,
            repo_root: &self.repo_root,
            workspace_rel: &self.workspace_rel,
        };
        let mut prompt = FixedPrompt(choice);
        resolve_keep_files(&vcs, &mut prompt, &PatchEngine::new(), &ctx).unwrap()
    }

    fn file_content(&self) -> String {
        fs::read_to_string(self.workspace.join(&self.keep_file)).unwrap()
    }

    fn skip_worktree_is_set(&self) -> bool {
        let listing = git(&self.workspace, &["ls-files", "-v", "config.yaml"]);
        listing.starts_with('S')
    }

    fn patch_path(&self) -> PathBuf {
        layout::patch_path(&self.repo_root, &self.workspace_rel, &self.keep_file)
    }

    fn day_backups(&self) -> Vec<PathBuf> {
        let modified = layout::backup_root(&self.repo_root).join("modified");
        if !modified.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&modified)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }
}

#[test]
fn remote_unchanged_is_a_complete_noop() {
    let fx = Fixture::new();
    fx.diverge_locally("version: 1.0\nsetting: default\nlocal: true\n");

    // Reapply would mutate, but the matching-blob check comes first.
    let summary = fx.resolve_with(KeepChoice::Reapply);

    assert_eq!(summary.unchanged, 1);
    assert!(summary.is_clean());
    assert_eq!(
        fx.file_content(),
        "version: 1.0\nsetting: default\nlocal: true\n"
    );
    assert!(fx.day_backups().is_empty(), "no backup without divergence");
    assert!(!fx.patch_path().exists());
    assert!(fx.skip_worktree_is_set(), "flag restored after the run");
}

#[test]
fn clean_reapply_preserves_local_line_on_remote_content() {
    let fx = Fixture::new();
    // Local edit appends a line; remote edit touches a different line.
    let local = "version: 1.0\nsetting: default\nlocal: true\n";
    let remote = "version: 2.0\nsetting: default\n";
    fx.diverge_locally(local);
    fx.diverge_remotely(remote);

    let summary = fx.resolve_with(KeepChoice::Reapply);

    assert_eq!(summary.reapplied, 1);
    assert!(summary.is_clean());
    assert_eq!(
        fx.file_content(),
        "version: 2.0\nsetting: default\nlocal: true\n",
        "remote content with the local line reapplied"
    );
    assert!(!fx.patch_path().exists(), "patch removed after clean apply");

    // Exactly one file backup, holding the pre-reset local content.
    let backups = fx.day_backups();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), local);
    assert!(fx.skip_worktree_is_set());
}

#[test]
fn conflicting_reapply_retains_patch_and_backup() {
    let fx = Fixture::new();
    // Local and remote rewrite the same line: the dry run must report a
    // conflict and nothing may be lost.
    let local = "version: 1.0-local\nsetting: default\n";
    let remote = "version: 2.0\nremote: true\n";
    fx.diverge_locally(local);
    fx.diverge_remotely(remote);

    let summary = fx.resolve_with(KeepChoice::Reapply);

    assert_eq!(summary.retained_patches.len(), 1);
    assert!(summary.errors.is_empty());
    assert_eq!(
        fx.file_content(),
        remote,
        "file left at the remote version exactly"
    );

    let patch = fx.patch_path();
    assert_eq!(summary.retained_patches[0], patch);
    assert!(patch.exists(), "patch retained for manual recovery");
    let patch_text = fs::read_to_string(&patch).unwrap();
    assert!(patch_text.contains("version: 1.0-local"));

    let backups = fx.day_backups();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), local);
    assert!(fx.skip_worktree_is_set());
}

#[test]
fn discard_takes_remote_without_artifacts() {
    let fx = Fixture::new();
    fx.diverge_locally("version: 1.0\nsetting: default\nlocal: true\n");
    fx.diverge_remotely("version: 3.0\nsetting: default\n");

    let summary = fx.resolve_with(KeepChoice::Discard);

    assert_eq!(summary.discarded, 1);
    assert_eq!(fx.file_content(), "version: 3.0\nsetting: default\n");
    assert!(fx.day_backups().is_empty(), "discard creates no backup");
    assert!(!fx.patch_path().exists());
    assert!(fx.skip_worktree_is_set());
}

#[test]
fn skip_leaves_local_content_in_place() {
    let fx = Fixture::new();
    let local = "version: 1.0\nsetting: default\nlocal: true\n";
    fx.diverge_locally(local);
    fx.diverge_remotely("version: 4.0\nsetting: default\n");

    let summary = fx.resolve_with(KeepChoice::Skip);

    assert_eq!(summary.skipped, 1);
    assert_eq!(fx.file_content(), local);
    assert!(fx.skip_worktree_is_set());
}

#[test]
fn repeated_syncs_accumulate_only_real_divergence() {
    let fx = Fixture::new();
    let local = "version: 1.0\nsetting: default\nlocal: true\n";
    fx.diverge_locally(local);
    fx.diverge_remotely("version: 2.0\nsetting: default\n");

    let summary = fx.resolve_with(KeepChoice::Reapply);
    assert_eq!(summary.reapplied, 1);
    assert_eq!(fx.day_backups().len(), 1);
    fx.pull();

    // Nothing new upstream: the resolver sees matching blobs and the
    // backup store stays as it was.
    let summary = fx.resolve_with(KeepChoice::Reapply);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(fx.day_backups().len(), 1);

    // A real upstream change produces exactly one more backup, holding the
    // pre-reset content of the second run.
    fx.diverge_remotely("version: 2.1\nsetting: default\n");
    let summary = fx.resolve_with(KeepChoice::Reapply);
    assert_eq!(summary.reapplied, 1);
    assert_eq!(
        fx.file_content(),
        "version: 2.1\nsetting: default\nlocal: true\n"
    );
    assert_eq!(fx.day_backups().len(), 2);
}

#[test]
fn patch_engine_round_trip() {
    let fx = Fixture::new();
    let edited = "version: 1.0\nsetting: default\nextra: line\n";
    fs::write(fx.workspace.join("config.yaml"), edited).unwrap();

    let engine = PatchEngine::new();
    let patch = fx.repo_root.join("work.patch");
    engine
        .create_patch(&fx.workspace, Path::new("config.yaml"), &patch)
        .unwrap();
    assert!(fs::read_to_string(&patch).unwrap().contains("+extra: line"));

    // Restore the committed content, then check and apply the patch.
    git(&fx.workspace, &["checkout", "--", "config.yaml"]);
    assert!(!engine.check_patch(&fx.workspace, &patch).unwrap());
    engine.apply_patch(&fx.workspace, &patch).unwrap();
    assert_eq!(fx.file_content(), edited);

    // Against unrelated content the dry run reports a conflict, not an error.
    fs::write(fx.workspace.join("config.yaml"), "totally: different\n").unwrap();
    assert!(engine.check_patch(&fx.workspace, &patch).unwrap());
}

#[test]
fn empty_diff_is_valid_patch_output() {
    let fx = Fixture::new();
    let engine = PatchEngine::new();
    let patch = fx.repo_root.join("empty.patch");
    engine
        .create_patch(&fx.workspace, Path::new("config.yaml"), &patch)
        .unwrap();
    assert_eq!(fs::read_to_string(&patch).unwrap(), "");
}
