//! Isolation integration tests: tripped polecats in a real workspace.

use std::sync::Arc;

use rigwatch::agent::CircuitState;
use rigwatch::circuit::IsolationCandidate;
use rigwatch::isolation::{IsolationAction, Isolator};
use rigwatch::mail::{MemoryMailbox, Priority};
use rigwatch::notify::{parse_work_requeue, MAYOR_ADDRESS};
use rigwatch::store::AgentStore;
use rigwatch::Error;

use crate::fixtures::{TestTown, RIG};

fn candidate(town: &TestTown, id: &str) -> IsolationCandidate {
    IsolationCandidate::from_agent(&town.store.get_agent(id).unwrap())
}

/// Test: Clean polecat with hooked work
/// Given an open polecat with a clean worktree and hooked work
/// When it is isolated
/// Then the work is requeued to the mayor and the polecat is reclaimed
#[test]
fn test_clean_polecat_is_requeued_and_reclaimed() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Open, 3, Some("gt-abc123"));
    let worktree = town.add_worktree("nux");
    let isolator = Isolator::new(town.store.clone(), town.mailbox.clone(), town.reclaimer());

    let result = isolator.isolate(&candidate(&town, &id));

    assert_eq!(result.action, IsolationAction::Requeued);
    assert!(result.error.is_none());
    assert!(!worktree.exists());
    assert!(matches!(town.store.get_agent(&id), Err(Error::AgentNotFound(_))));

    let inbox = town.mailbox.inbox(MAYOR_ADDRESS).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(Some(&inbox[0].id), result.requeue_mail_id.as_ref());
    let payload = parse_work_requeue(&inbox[0].subject, &inbox[0].body).unwrap();
    assert_eq!(payload.bead_id, "gt-abc123");
    assert_eq!(payload.previous_polecat, format!("{}/nux", RIG));
    assert_eq!(payload.failure_count, 3);
}

/// Test: Dirty worktree
/// Given an open polecat whose worktree has uncommitted changes
/// When it is isolated
/// Then the work is still requeued, the worktree is kept and the mayor
/// receives an escalation
#[test]
fn test_dirty_polecat_is_escalated() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Open, 4, Some("gt-abc123"));
    let worktree = town.add_dirty_worktree("nux");
    let isolator = Isolator::new(town.store.clone(), town.mailbox.clone(), town.reclaimer());

    let result = isolator.isolate(&candidate(&town, &id));

    assert_eq!(result.action, IsolationAction::Escalated);
    assert!(result.requeue_mail_id.is_some());
    assert!(result.escalation_mail_id.is_some());
    assert!(worktree.join("wip.rs").exists());

    let inbox = town.mailbox.inbox(MAYOR_ADDRESS).unwrap();
    assert_eq!(inbox.len(), 2);
    let escalation = inbox
        .iter()
        .find(|m| m.subject.starts_with("CIRCUIT_BREAKER_ESCALATION"))
        .unwrap();
    assert_eq!(escalation.priority, Priority::Urgent);
    assert!(escalation.body.contains("Failure Count: 4"));
    assert!(escalation.body.contains("Hook Bead: gt-abc123"));

    // The agent stays open with its hook cleared, so the next cycle only
    // escalates again.
    let agent = town.store.get_agent(&id).unwrap();
    assert_eq!(agent.circuit_state, CircuitState::Open);
    assert!(agent.hook_bead.is_none());
}

#[test]
fn test_polecat_without_work_is_nuked() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Open, 3, None);
    town.add_worktree("nux");
    let isolator = Isolator::new(town.store.clone(), town.mailbox.clone(), town.reclaimer());

    let result = isolator.isolate(&candidate(&town, &id));

    assert_eq!(result.action, IsolationAction::Nuked);
    assert!(result.requeue_mail_id.is_none());
    assert!(town.mailbox.inbox(MAYOR_ADDRESS).unwrap().is_empty());
}

/// Test: Transport down
/// Given an open polecat with hooked work and a failing mail transport
/// When it is isolated
/// Then the result is an error and nothing is reclaimed
#[test]
fn test_transport_failure_never_reclaims() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Open, 3, Some("gt-abc123"));
    let worktree = town.add_worktree("nux");
    let mailer = Arc::new(MemoryMailbox::new());
    mailer.set_failing(true);
    let isolator = Isolator::new(town.store.clone(), mailer, town.reclaimer());

    let result = isolator.isolate(&candidate(&town, &id));

    assert_eq!(result.action, IsolationAction::Error);
    assert!(result.error.is_some());
    assert!(worktree.exists());
    let agent = town.store.get_agent(&id).unwrap();
    assert_eq!(agent.hook_bead.as_deref(), Some("gt-abc123"));
}
