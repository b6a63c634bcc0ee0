//! Workspace ("town") root discovery and the paths derived from it.

use std::path::{Path, PathBuf};

use crate::{zlog_debug, Error, Result};

/// Directory whose presence marks a workspace root.
pub const WORKSPACE_MARKER: &str = "mayor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Walk up from `start` to the first directory containing the marker.
    pub fn find(start: &Path) -> Result<Self> {
        zlog_debug!("Workspace::find start={}", start.display());
        let start = start
            .canonicalize()
            .map_err(|_| Error::WorkspaceNotFound(start.display().to_string()))?;

        for dir in start.ancestors() {
            if dir.join(WORKSPACE_MARKER).is_dir() {
                zlog_debug!("Workspace root: {}", dir.display());
                return Ok(Self {
                    root: dir.to_path_buf(),
                });
            }
        }

        Err(Error::WorkspaceNotFound(start.display().to_string()))
    }

    /// Create the marker under `root` and return the workspace.
    pub fn init(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join(WORKSPACE_MARKER))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join(".beads").join("agents")
    }

    pub fn mail_dir(&self) -> PathBuf {
        self.root.join(".mail")
    }

    pub fn polecat_worktree(&self, rig: &str, polecat: &str) -> PathBuf {
        self.root.join(rig).join("polecats").join(polecat)
    }
}
