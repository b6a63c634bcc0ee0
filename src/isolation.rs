//! Isolation of tripped polecats.
//!
//! For each candidate, in order: requeue hooked work to the mayor, then ask
//! the reclaimer to terminate the polecat. A refused or failed reclaim is
//! escalated. A failed requeue stops the isolation before anything is
//! terminated, so hooked work is never lost silently.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::CircuitState;
use crate::circuit::IsolationCandidate;
use crate::mail::Mailer;
use crate::notify::{self, EscalationContext};
use crate::reclaim::Reclaimer;
use crate::store::AgentStore;
use crate::{zlog, zlog_debug, zlog_error, zlog_warn, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationAction {
    /// Work was requeued and the polecat reclaimed.
    Requeued,
    /// The polecat held no work and was reclaimed.
    Nuked,
    /// The reclaim was refused or failed; the mayor was alerted.
    Escalated,
    /// An operator granted the polecat one more attempt.
    HalfOpen,
    /// Isolation aborted before reclaiming anything.
    Error,
}

impl IsolationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationAction::Requeued => "requeued",
            IsolationAction::Nuked => "nuked",
            IsolationAction::Escalated => "escalated",
            IsolationAction::HalfOpen => "half_open",
            IsolationAction::Error => "error",
        }
    }
}

impl fmt::Display for IsolationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationResult {
    pub polecat: String,
    pub agent_bead_id: String,
    /// Circuit state the agent was in when isolation started.
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub action: IsolationAction,
    pub requeue_mail_id: Option<String>,
    pub escalation_mail_id: Option<String>,
    pub error: Option<String>,
}

impl IsolationResult {
    fn for_candidate(candidate: &IsolationCandidate, action: IsolationAction) -> Self {
        Self {
            polecat: candidate.polecat.clone(),
            agent_bead_id: candidate.agent_bead_id.clone(),
            circuit_state: candidate.circuit_state,
            failure_count: candidate.failure_count,
            action,
            requeue_mail_id: None,
            escalation_mail_id: None,
            error: None,
        }
    }

    /// Error result for an isolation that never produced an outcome, such
    /// as one cut off by a timeout.
    pub fn failed(candidate: &IsolationCandidate, error: &Error) -> Self {
        let mut result = Self::for_candidate(candidate, IsolationAction::Error);
        result.error = Some(error.to_string());
        result
    }

    fn push_error(&mut self, message: String) {
        match &mut self.error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(&message);
            }
            None => self.error = Some(message),
        }
    }
}

/// Runs the isolation sequence against the store, mail transport and
/// reclaimer. Cheap to clone; collaborators are shared.
#[derive(Clone)]
pub struct Isolator {
    store: Arc<dyn AgentStore>,
    mailer: Arc<dyn Mailer>,
    reclaimer: Arc<dyn Reclaimer>,
}

impl Isolator {
    pub fn new(
        store: Arc<dyn AgentStore>,
        mailer: Arc<dyn Mailer>,
        reclaimer: Arc<dyn Reclaimer>,
    ) -> Self {
        Self {
            store,
            mailer,
            reclaimer,
        }
    }

    pub fn isolate(&self, candidate: &IsolationCandidate) -> IsolationResult {
        let mut result = IsolationResult::for_candidate(candidate, IsolationAction::Error);
        zlog_debug!(
            "isolate agent={} state={} failures={} hook={:?}",
            candidate.agent_bead_id,
            candidate.circuit_state,
            candidate.failure_count,
            candidate.hook_bead
        );

        if let Some(bead) = candidate.hook_bead.as_deref() {
            let message =
                notify::work_requeue(&candidate.rig, &candidate.polecat, bead, candidate.failure_count);
            match self.mailer.send(&message) {
                Ok(id) => {
                    zlog!("Requeued {} from {}/{} ({})", bead, candidate.rig, candidate.polecat, id);
                    result.requeue_mail_id = Some(id);
                    if let Err(e) = self.store.clear_hook(&candidate.agent_bead_id) {
                        zlog_warn!("Failed to clear hook on {}: {}", candidate.agent_bead_id, e);
                        result.push_error(format!("clearing hook failed: {}", e));
                    }
                }
                Err(e) => {
                    zlog_error!(
                        "Requeue of {} failed, leaving {}/{} running: {}",
                        bead,
                        candidate.rig,
                        candidate.polecat,
                        e
                    );
                    result.push_error(format!("requeue failed: {}", e));
                    return result;
                }
            }
        }

        match self.reclaimer.terminate_if_clean(candidate) {
            Ok(outcome) if outcome.nuked => {
                if let Err(e) = self.store.remove_agent(&candidate.agent_bead_id) {
                    zlog_warn!("Failed to remove agent {}: {}", candidate.agent_bead_id, e);
                    result.push_error(format!("removing agent record failed: {}", e));
                }
                result.action = if result.requeue_mail_id.is_some() {
                    IsolationAction::Requeued
                } else {
                    IsolationAction::Nuked
                };
            }
            Ok(outcome) => self.escalate(candidate, &mut result, &outcome.reason),
            Err(Error::ReclaimRefused { reason, .. }) => {
                self.escalate(candidate, &mut result, &reason)
            }
            Err(e) => {
                let reason = format!("reclaim failed: {}", e);
                result.push_error(reason.clone());
                self.escalate(candidate, &mut result, &reason);
            }
        }

        zlog!(
            "Isolation of {}: {}",
            candidate.agent_bead_id,
            result.action
        );
        result
    }

    fn escalate(&self, candidate: &IsolationCandidate, result: &mut IsolationResult, reason: &str) {
        result.action = IsolationAction::Escalated;
        let message = notify::circuit_escalation(&EscalationContext {
            rig: &candidate.rig,
            polecat: &candidate.polecat,
            circuit_state: candidate.circuit_state,
            failure_count: candidate.failure_count,
            cleanup_status: &candidate.cleanup_status,
            hook_bead: candidate.hook_bead.as_deref(),
            reason,
        });
        match self.mailer.send(&message) {
            Ok(id) => {
                zlog_warn!(
                    "Escalated {}/{} to mayor ({}): {}",
                    candidate.rig,
                    candidate.polecat,
                    id,
                    reason
                );
                result.escalation_mail_id = Some(id);
            }
            Err(e) => {
                zlog_error!(
                    "Escalation for {}/{} could not be sent: {}",
                    candidate.rig,
                    candidate.polecat,
                    e
                );
                result.push_error(format!("escalation failed: {}", e));
            }
        }
    }
}
