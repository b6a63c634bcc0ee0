//! Per-agent circuit breaker.
//!
//! The failure counter is a pair of pure transitions (`on_failure`,
//! `on_success`) applied by the agent store inside its read-modify-write,
//! plus thin wrappers that persist through an [`AgentStore`]. The evaluator
//! is a pure filter over a snapshot.
//!
//! State machine:
//!
//! ```text
//! closed --(count reaches max)--> open --(operator, after cooldown)--> half_open
//!   ^                                                                   |   |
//!   +-----------------------------(success)-----------------------------+   |
//!                                  open <-----------(failure)---------------+
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentHealth, CircuitState, POLECAT_ROLE};
use crate::isolation::{IsolationAction, IsolationResult};
use crate::store::AgentStore;
use crate::{zlog, zlog_debug, Error, Result};

/// Consecutive failures before the circuit trips.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Time an open circuit must wait before an operator may half-open it.
pub const DEFAULT_COOLDOWN_PERIOD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub cooldown_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            cooldown_period: DEFAULT_COOLDOWN_PERIOD,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_failures == 0 {
            return Err(Error::Validation(
                "circuit_breaker.max_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of applying one failure to a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTransition {
    pub count: u32,
    pub state: CircuitState,
    /// True only when this failure moved the circuit to open.
    pub tripped: bool,
}

/// Apply one failure to `(count, state)`.
///
/// A half-open circuit re-opens on any failure. A closed circuit opens once
/// the new count reaches `max_failures`. An open circuit stays open and does
/// not report a second trip.
pub fn on_failure(count: u32, state: CircuitState, max_failures: u32) -> FailureTransition {
    let count = count.saturating_add(1);
    let next = match state {
        CircuitState::Open => CircuitState::Open,
        CircuitState::HalfOpen => CircuitState::Open,
        CircuitState::Closed if count >= max_failures => CircuitState::Open,
        CircuitState::Closed => CircuitState::Closed,
    };
    FailureTransition {
        count,
        state: next,
        tripped: next == CircuitState::Open && state != CircuitState::Open,
    }
}

/// Apply a success: the counter resets and the circuit closes, whatever
/// state it was in.
pub fn on_success() -> (u32, CircuitState) {
    (0, CircuitState::Closed)
}

/// Record a failed exit for an agent. Returns the new count and whether this
/// call tripped the circuit.
pub fn record_failure(
    store: &dyn AgentStore,
    agent_id: &str,
    max_failures: u32,
) -> Result<(u32, bool)> {
    zlog_debug!("record_failure agent={} max={}", agent_id, max_failures);
    let (count, tripped) = store.increment_failure(agent_id, max_failures)?;
    if tripped {
        zlog!(
            "Circuit tripped for {} after {} consecutive failures",
            agent_id,
            count
        );
    }
    Ok((count, tripped))
}

/// Record a successful completion, resetting the counter.
pub fn record_success(store: &dyn AgentStore, agent_id: &str) -> Result<()> {
    zlog_debug!("record_success agent={}", agent_id);
    store.reset_failure(agent_id)
}

/// Operator action: move an open circuit to half-open once the cooldown has
/// elapsed, granting the agent one unsupervised retry.
pub fn set_half_open(
    store: &dyn AgentStore,
    agent_id: &str,
    config: &CircuitBreakerConfig,
    now: DateTime<Utc>,
) -> Result<IsolationResult> {
    let agent = store.get_agent(agent_id)?;
    if agent.circuit_state != CircuitState::Open {
        return Err(Error::InvalidCircuitTransition {
            from: agent.circuit_state,
            to: CircuitState::HalfOpen,
        });
    }

    if let Some(opened) = agent.circuit_opened_at {
        let elapsed = (now - opened).to_std().unwrap_or(Duration::ZERO);
        if elapsed < config.cooldown_period {
            return Err(Error::CooldownActive {
                remaining: config.cooldown_period - elapsed,
            });
        }
    }

    store.set_circuit_state(agent_id, CircuitState::HalfOpen)?;
    zlog!("Circuit for {} moved to half_open", agent_id);

    Ok(IsolationResult {
        polecat: agent.polecat_name().to_string(),
        agent_bead_id: agent.id.clone(),
        circuit_state: CircuitState::Open,
        failure_count: agent.failure_count,
        action: IsolationAction::HalfOpen,
        requeue_mail_id: None,
        escalation_mail_id: None,
        error: None,
    })
}

/// A tripped agent selected for isolation.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationCandidate {
    pub agent_bead_id: String,
    pub polecat: String,
    pub rig: String,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub hook_bead: Option<String>,
    pub cleanup_status: String,
}

impl IsolationCandidate {
    pub fn from_agent(agent: &AgentHealth) -> Self {
        Self {
            agent_bead_id: agent.id.clone(),
            polecat: agent.polecat_name().to_string(),
            rig: agent.rig.clone(),
            circuit_state: agent.circuit_state,
            failure_count: agent.failure_count,
            hook_bead: agent.hook_bead.clone(),
            cleanup_status: agent.cleanup_status.clone(),
        }
    }
}

/// Select the polecats of `rig` whose circuit is open.
///
/// Closed and half-open agents are never candidates. The config is accepted
/// so deployments can tighten selection without changing callers; the
/// current rules depend on circuit state alone.
pub fn evaluate(
    snapshot: &[AgentHealth],
    rig: &str,
    _config: &CircuitBreakerConfig,
) -> Vec<IsolationCandidate> {
    snapshot
        .iter()
        .filter(|a| a.role == POLECAT_ROLE && a.rig == rig)
        .filter(|a| a.circuit_state == CircuitState::Open)
        .map(IsolationCandidate::from_agent)
        .collect()
}
