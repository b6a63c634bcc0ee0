pub mod agent;
pub mod circuit;
pub mod config;
pub mod error;
pub mod git;
pub mod isolation;
pub mod log;
pub mod mail;
pub mod notify;
pub mod patrol;
pub mod queue;
pub mod reclaim;
pub mod score;
pub mod store;
pub mod tmux;
pub mod util;
pub mod workspace;

pub use agent::{AgentHealth, CircuitState};
pub use circuit::{CircuitBreakerConfig, IsolationCandidate};
pub use error::{Error, Result};
pub use isolation::{IsolationAction, IsolationResult, Isolator};
pub use patrol::Patrol;
pub use score::{score, ScoreConfig, ScoreInput};
