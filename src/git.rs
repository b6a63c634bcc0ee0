//! Git inspection of polecat worktrees.

use std::path::Path;

use git2::{Repository, StatusOptions};

use crate::{zlog_debug, zlog_warn, Result};

pub struct GitOps;

impl GitOps {
    /// Check if a worktree has uncommitted changes (staged, unstaged or
    /// untracked). Ignored files do not count.
    pub fn is_dirty(worktree_path: &Path) -> Result<bool> {
        let repo = Repository::open(worktree_path)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        zlog_debug!(
            "GitOps::is_dirty path={} changes={}",
            worktree_path.display(),
            statuses.len()
        );
        Ok(!statuses.is_empty())
    }

    /// Remove a polecat worktree. Linked worktrees are pruned from their
    /// parent repository so the branch is no longer considered checked out.
    pub fn remove_worktree(worktree_path: &Path) -> Result<()> {
        zlog_debug!("GitOps::remove_worktree path={}", worktree_path.display());
        if let Ok(repo) = Repository::open(worktree_path) {
            if repo.is_worktree() {
                // commondir is the main repository's .git directory
                if let Ok(main) = Repository::open(repo.commondir()) {
                    Self::prune_linked(&main, worktree_path);
                }
            }
        }

        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)?;
        }
        Ok(())
    }

    fn prune_linked(main: &Repository, worktree_path: &Path) {
        let Ok(names) = main.worktrees() else {
            return;
        };
        for name in names.iter().flatten() {
            let Ok(wt) = main.find_worktree(name) else {
                continue;
            };
            if wt.path() != worktree_path {
                continue;
            }
            let _ = wt.unlock();
            let pruned = wt.prune(Some(
                git2::WorktreePruneOptions::new()
                    .valid(true)
                    .working_tree(true)
                    .locked(true),
            ));
            if let Err(e) = pruned {
                zlog_warn!("Worktree prune failed for '{}': {}", name, e);
            }
        }
    }
}
