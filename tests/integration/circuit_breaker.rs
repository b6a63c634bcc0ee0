//! Circuit breaker integration tests against the file-backed store.

use std::time::Duration;

use chrono::Utc;

use rigwatch::agent::{parse_agent_fields, CircuitState};
use rigwatch::circuit::{record_failure, record_success, set_half_open, CircuitBreakerConfig};
use rigwatch::isolation::IsolationAction;
use rigwatch::store::AgentStore;
use rigwatch::Error;

use crate::fixtures::TestTown;

/// Test: Trip on the max-th failure
/// Given a fresh polecat and max_failures = 3
/// When three failures are recorded
/// Then only the third reports a trip and the state persists as open
#[test]
fn test_trip_persists_across_store_instances() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Closed, 0, Some("gt-abc"));

    assert_eq!(record_failure(town.store.as_ref(), &id, 3).unwrap(), (1, false));
    assert_eq!(record_failure(town.store.as_ref(), &id, 3).unwrap(), (2, false));
    assert_eq!(record_failure(town.store.as_ref(), &id, 3).unwrap(), (3, true));

    // A second store over the same directory sees the same record.
    let reopened = rigwatch::store::FileAgentStore::for_workspace(&town.workspace);
    let agent = reopened.get_agent(&id).unwrap();
    assert_eq!(agent.failure_count, 3);
    assert_eq!(agent.circuit_state, CircuitState::Open);
    assert!(agent.circuit_opened_at.is_some());
    assert_eq!(agent.hook_bead.as_deref(), Some("gt-abc"));

    // Failures past the trip keep counting but do not trip again.
    assert_eq!(record_failure(&reopened, &id, 3).unwrap(), (4, false));
}

#[test]
fn test_success_resets_open_circuit() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Open, 5, None);

    record_success(town.store.as_ref(), &id).unwrap();

    let agent = town.store.get_agent(&id).unwrap();
    assert_eq!(agent.failure_count, 0);
    assert_eq!(agent.circuit_state, CircuitState::Closed);
    assert!(agent.circuit_opened_at.is_none());
}

#[test]
fn test_description_file_is_human_readable() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Closed, 0, Some("gt-abc"));
    record_failure(town.store.as_ref(), &id, 3).unwrap();

    let path = town.store.dir().join(format!("{}.md", id));
    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.starts_with(&id));
    assert!(content.contains("role_type: polecat"));
    assert!(content.contains("failure_count: 1"));
    assert!(content.contains("circuit_state: closed"));

    let fields = parse_agent_fields(&content);
    assert_eq!(fields.failure_count, 1);
    assert_eq!(fields.hook_bead.as_deref(), Some("gt-abc"));
}

/// Test: Half-open cycle
/// Given a tripped polecat past its cooldown
/// When the operator half-opens it and the retry fails
/// Then the circuit re-opens immediately
#[test]
fn test_half_open_then_failure_reopens() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::Open, 3, None);
    let config = CircuitBreakerConfig {
        max_failures: 3,
        cooldown_period: Duration::from_secs(60),
    };

    let too_soon = set_half_open(town.store.as_ref(), &id, &config, Utc::now());
    assert!(matches!(too_soon, Err(Error::CooldownActive { .. })));

    let later = Utc::now() + chrono::Duration::minutes(2);
    let result = set_half_open(town.store.as_ref(), &id, &config, later).unwrap();
    assert_eq!(result.action, IsolationAction::HalfOpen);
    assert_eq!(result.polecat, "nux");
    assert_eq!(
        town.store.get_agent(&id).unwrap().circuit_state,
        CircuitState::HalfOpen
    );

    let (_, tripped) = record_failure(town.store.as_ref(), &id, 3).unwrap();
    assert!(tripped);
    assert_eq!(town.store.get_agent(&id).unwrap().circuit_state, CircuitState::Open);
}

#[test]
fn test_half_open_then_success_closes() {
    let town = TestTown::new();
    let id = town.add_polecat("nux", CircuitState::HalfOpen, 3, None);

    record_success(town.store.as_ref(), &id).unwrap();
    let agent = town.store.get_agent(&id).unwrap();
    assert_eq!(agent.circuit_state, CircuitState::Closed);
    assert_eq!(agent.failure_count, 0);
}

#[test]
fn test_missing_agent_is_reported() {
    let town = TestTown::new();
    let missing = town.agent_id("ghost");
    assert!(matches!(
        record_failure(town.store.as_ref(), &missing, 3),
        Err(Error::AgentNotFound(_))
    ));
}
