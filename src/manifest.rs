//! Workspace manifest
//!
//! The manifest records every nested workspace embedded in the parent
//! repository: where it lives, where it came from, and which of its files
//! are keep files. Stored as pretty-printed JSON at
//! `.workspaces/workspaces.json` and written atomically.

use crate::error::{GitNestError, Result};
use crate::layout;
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One nested workspace tracked inside the parent repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace path relative to the parent repository root
    pub path: PathBuf,
    /// Upstream remote the workspace is cloned from and synced with
    pub remote_url: String,
    /// Keep files, relative to the workspace, in insertion order
    #[serde(default)]
    pub keep_files: Vec<PathBuf>,
}

impl Workspace {
    /// Create a workspace entry with no keep files
    pub fn new(path: impl Into<PathBuf>, remote_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            remote_url: remote_url.into(),
            keep_files: Vec::new(),
        }
    }

    /// Whether this workspace has any keep files
    pub fn has_keep_files(&self) -> bool {
        !self.keep_files.is_empty()
    }

    /// Register a keep file; returns false if it was already present
    pub fn add_keep_file(&mut self, file: impl Into<PathBuf>) -> bool {
        let file = file.into();
        if self.keep_files.contains(&file) {
            return false;
        }
        self.keep_files.push(file);
        true
    }

    /// Unregister a keep file; returns false if it was not present
    pub fn remove_keep_file(&mut self, file: &Path) -> bool {
        let before = self.keep_files.len();
        self.keep_files.retain(|f| f != file);
        self.keep_files.len() != before
    }
}

/// Ordered collection of workspace entries
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    workspaces: Vec<Workspace>,
}

impl Manifest {
    /// Load the manifest of `repo_root`; a missing file is an empty manifest
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = layout::manifest_path(repo_root);
        if !path.exists() {
            debug!("No manifest at {:?}, starting empty", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        let manifest = serde_json::from_str(&content)?;
        Ok(manifest)
    }

    /// Persist the manifest atomically under `repo_root`
    pub fn save(&self, repo_root: &Path) -> Result<()> {
        let path = layout::manifest_path(repo_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        atomic_write(&path, content.as_bytes())?;
        debug!("Saved manifest with {} workspace(s)", self.workspaces.len());
        Ok(())
    }

    /// Add a workspace entry
    ///
    /// # Errors
    ///
    /// Returns [`GitNestError::Manifest`] if an entry with the same path
    /// already exists.
    pub fn add(&mut self, workspace: Workspace) -> Result<()> {
        if self.find(&workspace.path).is_some() {
            return Err(GitNestError::Manifest(format!(
                "workspace '{}' is already tracked",
                workspace.path.display()
            )));
        }
        self.workspaces.push(workspace);
        Ok(())
    }

    /// Remove the entry at `path`, returning it if it existed
    pub fn remove(&mut self, path: &Path) -> Option<Workspace> {
        let index = self.workspaces.iter().position(|w| w.path == path)?;
        Some(self.workspaces.remove(index))
    }

    /// Find the entry at `path`
    pub fn find(&self, path: &Path) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.path == path)
    }

    /// Find the entry at `path`, mutably
    pub fn find_mut(&mut self, path: &Path) -> Option<&mut Workspace> {
        self.workspaces.iter_mut().find(|w| w.path == path)
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Workspace> {
        self.workspaces.iter()
    }

    /// Number of tracked workspaces
    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    /// Whether no workspaces are tracked
    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}
