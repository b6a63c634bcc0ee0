//! Lifecycle reclaimer: terminates a tripped polecat, but only when doing
//! so cannot destroy unsaved work.

use serde::{Deserialize, Serialize};

use crate::circuit::IsolationCandidate;
use crate::config::DEFAULT_BEAD_PREFIX;
use crate::git::GitOps;
use crate::tmux::Tmux;
use crate::workspace::Workspace;
use crate::{zlog, zlog_debug, Result};

/// Cleanup statuses reported by a polecat that block an automatic reclaim.
pub const BLOCKING_CLEANUP_STATUSES: &[(&str, &str)] = &[
    ("has_uncommitted", "polecat reports uncommitted changes"),
    ("has_stash", "polecat reports stashed changes"),
    ("has_unpushed", "polecat reports unpushed commits"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NukeOutcome {
    pub nuked: bool,
    /// What happened, or why the reclaim was refused.
    pub reason: String,
}

impl NukeOutcome {
    pub fn nuked(reason: impl Into<String>) -> Self {
        Self {
            nuked: true,
            reason: reason.into(),
        }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            nuked: false,
            reason: reason.into(),
        }
    }
}

pub trait Reclaimer: Send + Sync {
    /// Terminate the polecat and reclaim its worktree if it holds no unsaved
    /// work. A refusal is `Ok` with `nuked == false`; `Err` is reserved for
    /// failures of the reclaim itself.
    fn terminate_if_clean(&self, candidate: &IsolationCandidate) -> Result<NukeOutcome>;
}

/// Reason a cleanup status blocks reclamation, if it does.
pub fn cleanup_blocker(cleanup_status: &str) -> Option<&'static str> {
    BLOCKING_CLEANUP_STATUSES
        .iter()
        .find(|(status, _)| *status == cleanup_status)
        .map(|(_, reason)| *reason)
}

/// Reclaims polecats running in tmux sessions over git worktrees laid out
/// under the workspace root.
pub struct SessionReclaimer {
    workspace: Workspace,
    session_prefix: String,
}

impl SessionReclaimer {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            session_prefix: DEFAULT_BEAD_PREFIX.to_string(),
        }
    }

    /// Use `prefix` for tmux session names; it follows the bead prefix.
    pub fn with_session_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_prefix = prefix.into();
        self
    }

    /// Name of the tmux session hosting `polecat`.
    pub fn session_name(&self, rig: &str, polecat: &str) -> String {
        Tmux::polecat_session(&self.session_prefix, rig, polecat)
    }
}

impl Reclaimer for SessionReclaimer {
    fn terminate_if_clean(&self, candidate: &IsolationCandidate) -> Result<NukeOutcome> {
        let rig = &candidate.rig;
        let polecat = &candidate.polecat;

        if let Some(reason) = cleanup_blocker(&candidate.cleanup_status) {
            zlog!("Reclaim of {}/{} refused: {}", rig, polecat, reason);
            return Ok(NukeOutcome::refused(reason));
        }

        let worktree = self.workspace.polecat_worktree(rig, polecat);
        if worktree.exists() && GitOps::is_dirty(&worktree)? {
            zlog!(
                "Reclaim of {}/{} refused: worktree {} is dirty",
                rig,
                polecat,
                worktree.display()
            );
            return Ok(NukeOutcome::refused("worktree has uncommitted changes"));
        }

        let session = self.session_name(rig, polecat);
        if Tmux::is_available() && Tmux::session_exists(&session) {
            Tmux::kill_session(&session)?;
        } else {
            zlog_debug!("No live session {} for {}/{}", session, rig, polecat);
        }

        GitOps::remove_worktree(&worktree)?;
        zlog!("Reclaimed polecat {}/{}", rig, polecat);
        Ok(NukeOutcome::nuked("session terminated and worktree removed"))
    }
}
