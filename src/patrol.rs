//! Witness patrol for one rig: find tripped polecats and isolate them.
//!
//! Each cycle reads a fresh snapshot from the store. An agent that was
//! isolated successfully has left the store or lost its hook, so the next
//! snapshot does not repeat the work. The only state kept across cycles is
//! the set of agents whose isolation has not finished yet; those are skipped
//! until it does.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::agent::POLECAT_ROLE;
use crate::circuit::{self, CircuitBreakerConfig, IsolationCandidate};
use crate::config::DEFAULT_COLLABORATOR_TIMEOUT_SECS;
use crate::isolation::{IsolationResult, Isolator};
use crate::mail::Mailer;
use crate::queue::{self, QueueEntry};
use crate::reclaim::Reclaimer;
use crate::score::{ScoreConfig, WorkItem};
use crate::store::AgentStore;
use crate::util::blocking_with_timeout;
use crate::{zlog, zlog_debug, zlog_error, zlog_warn, Error, Result};

pub struct Patrol {
    rig: String,
    store: Arc<dyn AgentStore>,
    isolator: Isolator,
    circuit_breaker: CircuitBreakerConfig,
    score: ScoreConfig,
    timeout: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Marks one agent's isolation as running; dropping it releases the agent,
/// including when the isolation panics.
struct InFlight {
    agents: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut agents) = self.agents.lock() {
            agents.remove(&self.id);
        }
    }
}

impl Patrol {
    pub fn new(
        rig: impl Into<String>,
        store: Arc<dyn AgentStore>,
        mailer: Arc<dyn Mailer>,
        reclaimer: Arc<dyn Reclaimer>,
    ) -> Self {
        Self {
            rig: rig.into(),
            isolator: Isolator::new(store.clone(), mailer, reclaimer),
            store,
            circuit_breaker: CircuitBreakerConfig::default(),
            score: ScoreConfig::default(),
            timeout: Duration::from_secs(DEFAULT_COLLABORATOR_TIMEOUT_SECS),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn with_score(mut self, config: ScoreConfig) -> Self {
        self.score = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rig(&self) -> &str {
        &self.rig
    }

    fn candidates(&self) -> Result<Vec<IsolationCandidate>> {
        let snapshot = self.store.list_agents(Some(POLECAT_ROLE))?;
        let candidates = circuit::evaluate(&snapshot, &self.rig, &self.circuit_breaker);
        zlog_debug!(
            "Patrol {}: {} polecats, {} tripped",
            self.rig,
            snapshot.len(),
            candidates.len()
        );
        Ok(candidates)
    }

    /// Claim `candidate` for isolation. `None` while an earlier isolation
    /// of the same agent is still running.
    fn claim(&self, candidate: &IsolationCandidate) -> Option<InFlight> {
        let mut agents = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !agents.insert(candidate.agent_bead_id.clone()) {
            zlog_debug!(
                "Skipping {}: previous isolation still running",
                candidate.agent_bead_id
            );
            return None;
        }
        Some(InFlight {
            agents: self.in_flight.clone(),
            id: candidate.agent_bead_id.clone(),
        })
    }

    /// Number of isolations still running, including ones a cycle gave up
    /// waiting for.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// One circuit breaker cycle, isolating tripped polecats one at a time.
    ///
    /// Only a failure to read the snapshot fails the cycle; per-agent
    /// problems are reported in that agent's result. Agents still being
    /// isolated by an earlier cycle are skipped.
    pub fn check_circuit_breakers(&self) -> Result<Vec<IsolationResult>> {
        let results: Vec<_> = self
            .candidates()?
            .iter()
            .filter_map(|c| {
                let _guard = self.claim(c)?;
                Some(self.isolator.isolate(c))
            })
            .collect();
        log_cycle(&self.rig, &results);
        Ok(results)
    }

    /// Like [`Self::check_circuit_breakers`], but isolates distinct polecats
    /// concurrently. Each isolation is bounded by the collaborator timeout.
    /// One that stalls is reported as an error result, but it keeps running
    /// and its agent is skipped by later cycles until it finishes.
    pub async fn check_circuit_breakers_concurrent(&self) -> Result<Vec<IsolationResult>> {
        let store = self.store.clone();
        let rig = self.rig.clone();
        let config = self.circuit_breaker;
        let candidates = blocking_with_timeout("agent snapshot", self.timeout, move || {
            let snapshot = store.list_agents(Some(POLECAT_ROLE))?;
            Ok(circuit::evaluate(&snapshot, &rig, &config))
        })
        .await?;

        let claimed: Vec<_> = candidates
            .into_iter()
            .filter_map(|c| self.claim(&c).map(|guard| (c, guard)))
            .collect();

        let tasks = claimed.into_iter().map(|(candidate, guard)| {
            let isolator = self.isolator.clone();
            let timeout = self.timeout;
            async move {
                let label = format!("isolation of {}", candidate.agent_bead_id);
                let c = candidate.clone();
                let work = move || {
                    let _guard = guard;
                    Ok(isolator.isolate(&c))
                };
                match blocking_with_timeout(&label, timeout, work).await {
                    Ok(result) => result,
                    Err(e @ Error::Timeout(_)) => {
                        zlog_warn!(
                            "Isolation of {} still running after {:?}",
                            candidate.agent_bead_id,
                            timeout
                        );
                        let mut result = IsolationResult::failed(&candidate, &e);
                        result.error = Some(format!(
                            "{}; isolation continues in the background, outcome unknown",
                            e
                        ));
                        result
                    }
                    Err(e) => IsolationResult::failed(&candidate, &e),
                }
            }
        });
        let results = join_all(tasks).await;
        log_cycle(&self.rig, &results);
        Ok(results)
    }

    pub fn rank_queue(&self, items: &[WorkItem], now: Option<DateTime<Utc>>) -> Vec<QueueEntry> {
        queue::rank(items, now, &self.score)
    }

    /// Run cycles every `interval` until `cancel` fires. `on_cycle` sees each
    /// cycle's outcome; a failed cycle is logged and the loop carries on.
    /// Returns the number of cycles run.
    pub async fn run<F>(&self, interval: Duration, cancel: CancellationToken, mut on_cycle: F) -> u64
    where
        F: FnMut(&Result<Vec<IsolationResult>>),
    {
        zlog!("Patrol started for rig {} every {:?}", self.rig, interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cycles = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    zlog!("Patrol for rig {} cancelled after {} cycles", self.rig, cycles);
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.check_circuit_breakers_concurrent().await;
                    if let Err(e) = &outcome {
                        zlog_error!("Patrol cycle for rig {} failed: {}", self.rig, e);
                    }
                    cycles += 1;
                    on_cycle(&outcome);
                }
            }
        }
        cycles
    }
}

fn log_cycle(rig: &str, results: &[IsolationResult]) {
    for r in results {
        match &r.error {
            Some(e) => zlog_error!("{}/{}: {} ({})", rig, r.polecat, r.action, e),
            None => zlog!("{}/{}: {}", rig, r.polecat, r.action),
        }
    }
    zlog_debug!("Patrol cycle for rig {} done: {} isolated", rig, results.len());
}
