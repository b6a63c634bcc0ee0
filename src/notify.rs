//! Requeue and escalation messages sent to the mayor.
//!
//! Subjects are machine-parseable (`"<KIND> <identifier>"`) and requeue
//! bodies carry every field a dispatcher needs, so the mayor can reassign
//! work from the message alone.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::CircuitState;
use crate::mail::{Message, MessageType, Priority};
use crate::{Error, Result};

pub const WORK_REQUEUE: &str = "WORK_REQUEUE";
pub const CIRCUIT_BREAKER_ESCALATION: &str = "CIRCUIT_BREAKER_ESCALATION";

/// Supervisory address for requeues and escalations.
pub const MAYOR_ADDRESS: &str = "mayor/";

static BODY_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(Bead|Previous Polecat|Failure Count):\s*(.*?)\s*$").unwrap());

fn witness_address(rig: &str) -> String {
    format!("{}/witness", rig)
}

/// Message asking the mayor to hand `hook_bead` to a fresh polecat.
pub fn work_requeue(rig: &str, polecat: &str, hook_bead: &str, failure_count: u32) -> Message {
    Message {
        id: String::new(),
        from: witness_address(rig),
        to: MAYOR_ADDRESS.to_string(),
        subject: format!("{} {}", WORK_REQUEUE, hook_bead),
        priority: Priority::High,
        message_type: MessageType::Task,
        body: format!(
            "Work needs reassignment after circuit breaker trip.

Bead: {hook_bead}
Previous Polecat: {rig}/{polecat}
Failure Count: {failure_count}
Reason: Circuit breaker tripped after consecutive failures

The previous polecat is being reclaimed. Please assign this work to a fresh polecat.
This is NOT a retry by the same polecat - the work may need investigation for consistent failures."
        ),
        sent_at: None,
    }
}

/// Context for an escalation raised when a tripped polecat could not be
/// reclaimed automatically.
#[derive(Debug, Clone)]
pub struct EscalationContext<'a> {
    pub rig: &'a str,
    pub polecat: &'a str,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub cleanup_status: &'a str,
    pub hook_bead: Option<&'a str>,
    /// Why the reclaim did not happen.
    pub reason: &'a str,
}

pub fn circuit_escalation(ctx: &EscalationContext<'_>) -> Message {
    let cleanup = if ctx.cleanup_status.is_empty() {
        "unknown"
    } else {
        ctx.cleanup_status
    };
    Message {
        id: String::new(),
        from: witness_address(ctx.rig),
        to: MAYOR_ADDRESS.to_string(),
        subject: format!("{} {}/{}", CIRCUIT_BREAKER_ESCALATION, ctx.rig, ctx.polecat),
        priority: Priority::Urgent,
        message_type: MessageType::Task,
        body: format!(
            "Circuit breaker tripped but the polecat could not be reclaimed automatically.

Polecat: {rig}/{polecat}
Circuit State: {state}
Failure Count: {count}
Cleanup Status: {cleanup}
Hook Bead: {hook}
Reclaim Blocked: {reason}

Please investigate and resolve manually:
1. Check if the polecat has valuable uncommitted work
2. Either recover the work or authorize a forced reclaim
3. Reassign the work (if any) to a fresh polecat",
            rig = ctx.rig,
            polecat = ctx.polecat,
            state = ctx.circuit_state,
            count = ctx.failure_count,
            hook = ctx.hook_bead.unwrap_or("none"),
            reason = ctx.reason,
        ),
        sent_at: None,
    }
}

/// Fields recovered from a WORK_REQUEUE message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequeuePayload {
    pub bead_id: String,
    /// `<rig>/<polecat>`, empty when the body does not say.
    pub previous_polecat: String,
    pub failure_count: u32,
}

/// Parse a WORK_REQUEUE message.
///
/// Only the subject is required. Missing body lines default to an empty
/// previous polecat and zero failures; a present but malformed line, or a
/// `Bead:` line naming different work than the subject, is an error.
pub fn parse_work_requeue(subject: &str, body: &str) -> Result<WorkRequeuePayload> {
    let bead_id = subject
        .strip_prefix(WORK_REQUEUE)
        .and_then(|rest| rest.strip_prefix(' '))
        .map(str::trim)
        .ok_or_else(|| Error::Parse(format!("not a {} subject: {:?}", WORK_REQUEUE, subject)))?;
    if bead_id.is_empty() || bead_id.contains(char::is_whitespace) {
        return Err(Error::Parse(format!("invalid bead id in subject: {:?}", subject)));
    }

    let mut payload = WorkRequeuePayload {
        bead_id: bead_id.to_string(),
        previous_polecat: String::new(),
        failure_count: 0,
    };

    for line in body.lines() {
        let Some(caps) = BODY_FIELD_RE.captures(line.trim()) else {
            continue;
        };
        let value = &caps[2];
        match &caps[1] {
            "Bead" => {
                if value != payload.bead_id {
                    return Err(Error::Parse(format!(
                        "body bead {:?} does not match subject bead {:?}",
                        value, payload.bead_id
                    )));
                }
            }
            "Previous Polecat" => payload.previous_polecat = value.to_string(),
            "Failure Count" => {
                payload.failure_count = value
                    .parse()
                    .map_err(|_| Error::Parse(format!("invalid failure count {:?}", value)))?;
            }
            _ => {}
        }
    }

    Ok(payload)
}
