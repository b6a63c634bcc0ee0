//! Agent records as seen by the witness.
//!
//! An agent bead is a title line followed by `key: value` fields. The witness
//! only cares about a handful of them (role, rig, hooked work, cleanup status
//! and the circuit breaker pair), but formatting preserves the rest so a
//! read-modify-write cycle never drops data owned by other roles.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Role type of the ephemeral workers the witness supervises.
pub const POLECAT_ROLE: &str = "polecat";

const POLECAT_MARKER: &str = "-polecat-";

static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([a-z_]+):\s*(.*?)\s*$").unwrap());

/// Per-agent circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            other => Err(Error::Parse(format!("unknown circuit state '{}'", other))),
        }
    }
}

/// Structured fields of an agent bead description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentFields {
    pub role_type: String,
    pub rig: String,
    pub agent_state: String,
    pub hook_bead: Option<String>,
    pub cleanup_status: Option<String>,
    pub active_mr: Option<String>,
    pub notification_level: Option<String>,
    pub failure_count: u32,
    /// `None` for legacy beads written before the circuit breaker existed.
    pub circuit_state: Option<CircuitState>,
    pub circuit_opened_at: Option<DateTime<Utc>>,
    /// Fields this crate does not interpret, kept for round-tripping.
    pub extra: BTreeMap<String, String>,
}

fn optional(value: &str) -> Option<String> {
    match value {
        "" | "null" => None,
        v => Some(v.to_string()),
    }
}

/// Parse the structured fields out of an agent bead description.
///
/// Tolerant by construction: unknown keys are kept in `extra`, a malformed
/// `failure_count` reads as 0 and an unknown `circuit_state` as legacy.
pub fn parse_agent_fields(description: &str) -> AgentFields {
    let mut fields = AgentFields::default();

    for line in description.lines() {
        let Some(caps) = FIELD_RE.captures(line) else {
            continue;
        };
        let value = &caps[2];
        match &caps[1] {
            "role_type" => fields.role_type = optional(value).unwrap_or_default(),
            "rig" => fields.rig = optional(value).unwrap_or_default(),
            "agent_state" => fields.agent_state = optional(value).unwrap_or_default(),
            "hook_bead" => fields.hook_bead = optional(value),
            "cleanup_status" => fields.cleanup_status = optional(value),
            "active_mr" => fields.active_mr = optional(value),
            "notification_level" => fields.notification_level = optional(value),
            "failure_count" => fields.failure_count = value.parse().unwrap_or(0),
            "circuit_state" => fields.circuit_state = value.parse().ok(),
            "circuit_opened_at" => {
                fields.circuit_opened_at = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            }
            key => {
                fields.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    fields
}

/// Render an agent bead description from a title and its fields.
///
/// The circuit breaker pair is always written; a legacy (absent) state is
/// written as `closed`.
pub fn format_agent_description(title: &str, fields: &AgentFields) -> String {
    fn or_null(v: &Option<String>) -> &str {
        v.as_deref().unwrap_or("null")
    }

    let mut lines = vec![
        title.to_string(),
        String::new(),
        format!("role_type: {}", fields.role_type),
        format!("rig: {}", fields.rig),
        format!("agent_state: {}", fields.agent_state),
        format!("hook_bead: {}", or_null(&fields.hook_bead)),
        format!("cleanup_status: {}", or_null(&fields.cleanup_status)),
        format!("active_mr: {}", or_null(&fields.active_mr)),
        format!("notification_level: {}", or_null(&fields.notification_level)),
        format!("failure_count: {}", fields.failure_count),
        format!(
            "circuit_state: {}",
            fields.circuit_state.unwrap_or_default()
        ),
    ];
    if let Some(opened) = fields.circuit_opened_at {
        lines.push(format!("circuit_opened_at: {}", opened.to_rfc3339()));
    }
    for (key, value) in &fields.extra {
        lines.push(format!("{}: {}", key, value));
    }

    lines.join("\n")
}

/// Snapshot of one agent's health as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    /// Agent bead id, e.g. `gt-gastown-polecat-nux`.
    pub id: String,
    pub role: String,
    pub rig: String,
    pub failure_count: u32,
    pub circuit_state: CircuitState,
    pub hook_bead: Option<String>,
    pub cleanup_status: String,
    pub circuit_opened_at: Option<DateTime<Utc>>,
}

impl AgentHealth {
    /// A freshly registered agent: no failures, circuit closed.
    pub fn new(id: impl Into<String>, role: impl Into<String>, rig: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            rig: rig.into(),
            failure_count: 0,
            circuit_state: CircuitState::Closed,
            hook_bead: None,
            cleanup_status: String::new(),
            circuit_opened_at: None,
        }
    }

    pub fn from_fields(id: &str, fields: &AgentFields) -> Self {
        Self {
            id: id.to_string(),
            role: fields.role_type.clone(),
            rig: fields.rig.clone(),
            failure_count: fields.failure_count,
            circuit_state: fields.circuit_state.unwrap_or_default(),
            hook_bead: fields.hook_bead.clone(),
            cleanup_status: fields.cleanup_status.clone().unwrap_or_default(),
            circuit_opened_at: fields.circuit_opened_at,
        }
    }

    pub fn with_hook(mut self, bead: impl Into<String>) -> Self {
        self.hook_bead = Some(bead.into());
        self
    }

    /// Polecat name derived from the bead id.
    pub fn polecat_name(&self) -> &str {
        extract_polecat_name(&self.id)
    }
}

/// Build the agent bead id for a polecat: `<prefix>-<rig>-polecat-<name>`.
pub fn polecat_bead_id(prefix: &str, rig: &str, name: &str) -> String {
    format!("{}-{}{}{}", prefix, rig, POLECAT_MARKER, name)
}

/// Recover the polecat name from an agent bead id.
///
/// Takes everything after the last `-polecat-` marker; ids without the marker
/// fall back to the last `-`-separated segment, then to the whole id.
pub fn extract_polecat_name(agent_bead_id: &str) -> &str {
    if let Some(idx) = agent_bead_id.rfind(POLECAT_MARKER) {
        return &agent_bead_id[idx + POLECAT_MARKER.len()..];
    }
    match agent_bead_id.rfind('-') {
        Some(idx) => &agent_bead_id[idx + 1..],
        None => agent_bead_id,
    }
}
