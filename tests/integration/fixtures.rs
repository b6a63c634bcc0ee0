//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating a temporary workspace ("town") with file-backed collaborators
//! - Registering polecats in a given circuit state
//! - Creating clean or dirty polecat worktrees

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::{Repository, Signature};
use tempfile::TempDir;

use rigwatch::agent::{polecat_bead_id, AgentHealth, CircuitState, POLECAT_ROLE};
use rigwatch::mail::FileMailbox;
use rigwatch::reclaim::SessionReclaimer;
use rigwatch::store::FileAgentStore;
use rigwatch::workspace::Workspace;

pub const RIG: &str = "gastown";
pub const PREFIX: &str = "gt";

/// A temporary workspace with a store, mailbox and reclaimer rooted in it.
pub struct TestTown {
    /// Keeps the directory alive for the duration of the test.
    pub temp_dir: TempDir,
    pub workspace: Workspace,
    pub store: Arc<FileAgentStore>,
    pub mailbox: Arc<FileMailbox>,
}

impl TestTown {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let workspace = Workspace::init(temp_dir.path()).expect("Failed to init workspace");
        let store = Arc::new(FileAgentStore::for_workspace(&workspace));
        let mailbox = Arc::new(FileMailbox::for_workspace(&workspace));
        Self {
            temp_dir,
            workspace,
            store,
            mailbox,
        }
    }

    pub fn root(&self) -> &Path {
        self.workspace.root()
    }

    pub fn reclaimer(&self) -> Arc<SessionReclaimer> {
        Arc::new(SessionReclaimer::new(self.workspace.clone()).with_session_prefix(PREFIX))
    }

    pub fn agent_id(&self, name: &str) -> String {
        polecat_bead_id(PREFIX, RIG, name)
    }

    /// Register a polecat in `state` with `failures` recorded.
    pub fn add_polecat(
        &self,
        name: &str,
        state: CircuitState,
        failures: u32,
        hook: Option<&str>,
    ) -> String {
        let id = self.agent_id(name);
        let mut agent = AgentHealth::new(id.clone(), POLECAT_ROLE, RIG);
        agent.circuit_state = state;
        agent.failure_count = failures;
        agent.hook_bead = hook.map(str::to_string);
        agent.cleanup_status = "clean".to_string();
        if state == CircuitState::Open {
            agent.circuit_opened_at = Some(Utc::now());
        }
        self.store.insert(&agent).expect("Failed to insert agent");
        id
    }

    /// Create a committed git worktree for a polecat.
    pub fn add_worktree(&self, name: &str) -> PathBuf {
        let path = self.workspace.polecat_worktree(RIG, name);
        std::fs::create_dir_all(&path).expect("Failed to create worktree dir");
        init_repo(&path);
        path
    }

    /// Create a worktree with an uncommitted file in it.
    pub fn add_dirty_worktree(&self, name: &str) -> PathBuf {
        let path = self.add_worktree(name);
        std::fs::write(path.join("wip.rs"), "fn unfinished() {}\n")
            .expect("Failed to write wip file");
        path
    }
}

/// Initialize a repository with one commit.
pub fn init_repo(path: &Path) {
    let repo = Repository::init(path).expect("Failed to init git");
    std::fs::write(path.join("README.md"), "# Polecat\n").expect("Failed to write README");
    let mut index = repo.index().expect("Failed to open index");
    index
        .add_path(Path::new("README.md"))
        .expect("Failed to git add");
    index.write().expect("Failed to write index");
    let tree_id = index.write_tree().expect("Failed to write tree");
    let tree = repo.find_tree(tree_id).expect("Failed to find tree");
    let sig = Signature::now("Test User", "test@test.com").expect("Failed to build signature");
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .expect("Failed to git commit");
}

/// Fixed evaluation instant used by scoring tests.
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-12-17T12:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}
