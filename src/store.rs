//! Agent store: the durable home of agent health records.
//!
//! The witness never caches agent state across cycles. Every read goes to the
//! store and every mutation is a single read-modify-write call on one agent.
//! Callers serialize operations per agent identity; the implementations here
//! also hold an in-process lock so concurrent calls from one process cannot
//! lose updates.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::agent::{
    format_agent_description, parse_agent_fields, AgentFields, AgentHealth, CircuitState,
};
use crate::circuit;
use crate::workspace::Workspace;
use crate::{zlog_debug, zlog_warn, Error, Result};

/// Capabilities the witness needs from the agent store.
pub trait AgentStore: Send + Sync {
    /// List agents, optionally restricted to one role type.
    fn list_agents(&self, role: Option<&str>) -> Result<Vec<AgentHealth>>;

    fn get_agent(&self, id: &str) -> Result<AgentHealth>;

    /// Add one failure; returns the new count and whether the circuit tripped.
    fn increment_failure(&self, id: &str, max_failures: u32) -> Result<(u32, bool)>;

    /// Zero the failure count and close the circuit.
    fn reset_failure(&self, id: &str) -> Result<()>;

    fn set_circuit_state(&self, id: &str, state: CircuitState) -> Result<()>;

    /// Drop the agent's claim on its hooked work once it has been handed off.
    fn clear_hook(&self, id: &str) -> Result<()>;

    /// Delete the record of an agent whose resources have been reclaimed.
    fn remove_agent(&self, id: &str) -> Result<()>;
}

fn apply_failure(fields: &mut AgentFields, max_failures: u32) -> (u32, bool) {
    let t = circuit::on_failure(
        fields.failure_count,
        fields.circuit_state.unwrap_or_default(),
        max_failures,
    );
    fields.failure_count = t.count;
    fields.circuit_state = Some(t.state);
    if t.tripped {
        fields.circuit_opened_at = Some(Utc::now());
    }
    (t.count, t.tripped)
}

fn apply_reset(fields: &mut AgentFields) {
    let (count, state) = circuit::on_success();
    fields.failure_count = count;
    fields.circuit_state = Some(state);
    fields.circuit_opened_at = None;
}

fn apply_state(fields: &mut AgentFields, state: CircuitState) {
    let previous = fields.circuit_state.unwrap_or_default();
    fields.circuit_state = Some(state);
    match state {
        CircuitState::Open if previous != CircuitState::Open => {
            fields.circuit_opened_at = Some(Utc::now())
        }
        CircuitState::Closed => fields.circuit_opened_at = None,
        _ => {}
    }
}

/// Agent store backed by one description file per agent bead under
/// `<workspace>/.beads/agents/<id>.md`.
pub struct FileAgentStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileAgentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn for_workspace(workspace: &Workspace) -> Self {
        Self::new(workspace.agents_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(Error::Validation(format!("invalid agent bead id '{}'", id)));
        }
        Ok(self.dir.join(format!("{}.md", id)))
    }

    fn read(&self, id: &str) -> Result<(String, AgentFields)> {
        let path = self.path_for(id)?;
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::AgentNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let title = content.lines().next().unwrap_or(id).to_string();
        Ok((title, parse_agent_fields(&content)))
    }

    fn write(&self, id: &str, title: &str, fields: &AgentFields) -> Result<()> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("md.tmp");
        fs::write(&tmp, format_agent_description(title, fields))?;
        fs::rename(&tmp, &path)?;
        zlog_debug!(
            "FileAgentStore wrote {} failure_count={} circuit_state={}",
            id,
            fields.failure_count,
            fields.circuit_state.unwrap_or_default()
        );
        Ok(())
    }

    fn update<T>(&self, id: &str, f: impl FnOnce(&mut AgentFields) -> T) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let (title, mut fields) = self.read(id)?;
        let out = f(&mut fields);
        self.write(id, &title, &fields)?;
        Ok(out)
    }

    /// Register an agent bead, overwriting any existing record.
    pub fn insert(&self, agent: &AgentHealth) -> Result<()> {
        let fields = AgentFields {
            role_type: agent.role.clone(),
            rig: agent.rig.clone(),
            hook_bead: agent.hook_bead.clone(),
            cleanup_status: (!agent.cleanup_status.is_empty())
                .then(|| agent.cleanup_status.clone()),
            failure_count: agent.failure_count,
            circuit_state: Some(agent.circuit_state),
            circuit_opened_at: agent.circuit_opened_at,
            ..Default::default()
        };
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.write(&agent.id, &agent.id, &fields)
    }
}

impl AgentStore for FileAgentStore {
    fn list_agents(&self, role: Option<&str>) -> Result<Vec<AgentHealth>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut agents = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read(id) {
                Ok((_, fields)) => {
                    if role.map_or(true, |r| fields.role_type == r) {
                        agents.push(AgentHealth::from_fields(id, &fields));
                    }
                }
                // Deleted between read_dir and read (agent nuked concurrently)
                Err(Error::AgentNotFound(_)) => continue,
                Err(e) => {
                    zlog_warn!("Skipping unreadable agent bead {}: {}", path.display(), e);
                }
            }
        }
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    fn get_agent(&self, id: &str) -> Result<AgentHealth> {
        let (_, fields) = self.read(id)?;
        Ok(AgentHealth::from_fields(id, &fields))
    }

    fn increment_failure(&self, id: &str, max_failures: u32) -> Result<(u32, bool)> {
        self.update(id, |fields| apply_failure(fields, max_failures))
    }

    fn reset_failure(&self, id: &str) -> Result<()> {
        self.update(id, apply_reset)
    }

    fn set_circuit_state(&self, id: &str, state: CircuitState) -> Result<()> {
        self.update(id, |fields| apply_state(fields, state))
    }

    fn clear_hook(&self, id: &str) -> Result<()> {
        self.update(id, |fields| fields.hook_bead = None)
    }

    fn remove_agent(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        match fs::remove_file(&path) {
            Ok(()) => {
                zlog_debug!("FileAgentStore removed {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::AgentNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory agent store for tests and dry runs.
#[derive(Default)]
pub struct MemoryAgentStore {
    agents: Mutex<BTreeMap<String, AgentFields>>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, agent: AgentHealth) {
        let fields = AgentFields {
            role_type: agent.role,
            rig: agent.rig,
            hook_bead: agent.hook_bead,
            cleanup_status: (!agent.cleanup_status.is_empty()).then_some(agent.cleanup_status),
            failure_count: agent.failure_count,
            circuit_state: Some(agent.circuit_state),
            circuit_opened_at: agent.circuit_opened_at,
            ..Default::default()
        };
        self.lock().insert(agent.id, fields);
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, AgentFields>> {
        self.agents.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn update<T>(&self, id: &str, f: impl FnOnce(&mut AgentFields) -> T) -> Result<T> {
        let mut agents = self.lock();
        let fields = agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        Ok(f(fields))
    }
}

impl AgentStore for MemoryAgentStore {
    fn list_agents(&self, role: Option<&str>) -> Result<Vec<AgentHealth>> {
        Ok(self
            .lock()
            .iter()
            .filter(|(_, f)| role.map_or(true, |r| f.role_type == r))
            .map(|(id, f)| AgentHealth::from_fields(id, f))
            .collect())
    }

    fn get_agent(&self, id: &str) -> Result<AgentHealth> {
        self.lock()
            .get(id)
            .map(|f| AgentHealth::from_fields(id, f))
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))
    }

    fn increment_failure(&self, id: &str, max_failures: u32) -> Result<(u32, bool)> {
        self.update(id, |fields| apply_failure(fields, max_failures))
    }

    fn reset_failure(&self, id: &str) -> Result<()> {
        self.update(id, apply_reset)
    }

    fn set_circuit_state(&self, id: &str, state: CircuitState) -> Result<()> {
        self.update(id, |fields| apply_state(fields, state))
    }

    fn clear_hook(&self, id: &str) -> Result<()> {
        self.update(id, |fields| fields.hook_bead = None)
    }

    fn remove_agent(&self, id: &str) -> Result<()> {
        if self.remove(id) {
            Ok(())
        } else {
            Err(Error::AgentNotFound(id.to_string()))
        }
    }
}
