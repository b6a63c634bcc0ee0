use thiserror::Error;

use crate::agent::CircuitState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Tmux error: {0}")]
    Tmux(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Workspace root not found from {0}")]
    WorkspaceNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Mail transport failure: {0}")]
    Transport(String),

    #[error("Reclaim refused for {agent}: {reason}")]
    ReclaimRefused { agent: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid circuit transition from {from} to {to}")]
    InvalidCircuitTransition { from: CircuitState, to: CircuitState },

    #[error("Circuit cooldown still active: {remaining:?} remaining")]
    CooldownActive { remaining: std::time::Duration },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
