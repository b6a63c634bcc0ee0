//! Patrol integration tests: whole cycles over a file-backed workspace.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rigwatch::agent::CircuitState;
use rigwatch::circuit::record_failure;
use rigwatch::isolation::IsolationAction;
use rigwatch::notify::MAYOR_ADDRESS;
use rigwatch::patrol::Patrol;
use rigwatch::store::AgentStore;
use rigwatch::workspace::Workspace;
use rigwatch::Error;

use crate::fixtures::{TestTown, RIG};

fn patrol(town: &TestTown) -> Patrol {
    Patrol::new(RIG, town.store.clone(), town.mailbox.clone(), town.reclaimer())
        .with_timeout(Duration::from_secs(5))
}

/// Test: Mixed fleet
/// Given one clean tripped polecat, one dirty tripped polecat and one healthy
/// When a concurrent cycle runs
/// Then each tripped polecat gets its own outcome and the healthy one is untouched
#[tokio::test]
async fn test_concurrent_cycle_over_mixed_fleet() {
    let town = TestTown::new();
    town.add_polecat("clean", CircuitState::Open, 3, Some("gt-1"));
    town.add_worktree("clean");
    town.add_polecat("dirty", CircuitState::Open, 3, Some("gt-2"));
    town.add_dirty_worktree("dirty");
    let healthy = town.add_polecat("healthy", CircuitState::Closed, 1, Some("gt-3"));

    let mut results = patrol(&town).check_circuit_breakers_concurrent().await.unwrap();
    results.sort_by(|a, b| a.polecat.cmp(&b.polecat));

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].polecat, "clean");
    assert_eq!(results[0].action, IsolationAction::Requeued);
    assert_eq!(results[1].polecat, "dirty");
    assert_eq!(results[1].action, IsolationAction::Escalated);

    let agent = town.store.get_agent(&healthy).unwrap();
    assert_eq!(agent.failure_count, 1);
    assert_eq!(agent.hook_bead.as_deref(), Some("gt-3"));
}

/// Test: No double requeue
/// Given a dirty tripped polecat isolated once
/// When a second cycle runs
/// Then the work is not requeued again, only re-escalated
#[test]
fn test_second_cycle_does_not_requeue_again() {
    let town = TestTown::new();
    town.add_polecat("nux", CircuitState::Open, 3, Some("gt-abc"));
    town.add_dirty_worktree("nux");
    let patrol = patrol(&town);

    patrol.check_circuit_breakers().unwrap();
    let second = patrol.check_circuit_breakers().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].action, IsolationAction::Escalated);
    assert!(second[0].requeue_mail_id.is_none());

    let requeues = town
        .mailbox
        .inbox(MAYOR_ADDRESS)
        .unwrap()
        .into_iter()
        .filter(|m| m.subject.starts_with("WORK_REQUEUE"))
        .count();
    assert_eq!(requeues, 1);
}

#[test]
fn test_failures_feed_the_next_cycle() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Closed, 0, Some("gt-abc"));
    town.add_worktree("nux");
    let patrol = patrol(&town);

    for _ in 0..2 {
        record_failure(town.store.as_ref(), &id, 3).unwrap();
        assert!(patrol.check_circuit_breakers().unwrap().is_empty());
    }
    record_failure(town.store.as_ref(), &id, 3).unwrap();

    let results = patrol.check_circuit_breakers().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].action, IsolationAction::Requeued);
}

#[tokio::test]
async fn test_run_until_cancelled() {
    let town = TestTown::new();
    town.add_polecat("nux", CircuitState::Open, 3, None);
    let patrol = patrol(&town);
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    let mut isolated = Vec::new();
    let cycles = patrol
        .run(Duration::from_millis(10), cancel, |outcome| {
            if let Ok(results) = outcome {
                isolated.extend(results.iter().map(|r| r.action));
            }
            stopper.cancel();
        })
        .await;

    assert_eq!(cycles, 1);
    assert_eq!(isolated, vec![IsolationAction::Nuked]);
}

#[test]
fn test_workspace_must_exist() {
    let temp = tempfile::TempDir::new().unwrap();
    assert!(matches!(
        Workspace::find(temp.path()),
        Err(Error::WorkspaceNotFound(_))
    ));
}
