//! Per-endpoint health state and threshold classification.
//!
//! The tracker is owned by a single writer (the scheduler) and is updated
//! once per round. Readers get copies through the reporter's snapshot.

use crate::types::{CheckResult, Classification, Outcome, ThresholdPolicy, Transition};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Health state of one endpoint
#[derive(Debug, Clone)]
pub struct EndpointState {
    endpoint: String,
    history: VecDeque<CheckResult>,
    capacity: usize,
    classification: Classification,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_check: Option<SystemTime>,
    last_transition: Option<SystemTime>,
}

impl EndpointState {
    /// Create an empty state with `unknown` classification
    pub fn new(endpoint: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            endpoint: endpoint.into(),
            history: VecDeque::with_capacity(capacity),
            capacity,
            classification: Classification::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check: None,
            last_transition: None,
        }
    }

    /// Fold one result of round `round` into the state.
    ///
    /// Returns the transition when the classification changed.
    pub fn apply(
        &mut self,
        round: u64,
        result: &CheckResult,
        policy: &ThresholdPolicy,
    ) -> Option<Transition> {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(result.clone());

        let previous = self.classification;
        match result.outcome {
            Outcome::Success => {
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                self.consecutive_failures = 0;
                self.last_check = Some(result.timestamp);
                if previous != Classification::Healthy
                    && self.consecutive_successes >= policy.recovery_threshold
                {
                    self.classification = Classification::Healthy;
                }
            }
            Outcome::Failure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.consecutive_successes = 0;
                self.last_check = Some(result.timestamp);
                if previous != Classification::Unhealthy
                    && self.consecutive_failures >= policy.failure_threshold
                {
                    self.classification = Classification::Unhealthy;
                }
            }
            // Neutral: counters and classification stay put
            Outcome::Skipped => {}
        }

        if self.classification == previous {
            return None;
        }

        let at = result.timestamp;
        self.last_transition = Some(at);
        Some(Transition {
            endpoint: self.endpoint.clone(),
            from: previous,
            to: self.classification,
            at,
            round,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Timestamp of the latest completed (non-skipped) check
    pub fn last_check(&self) -> Option<SystemTime> {
        self.last_check
    }

    pub fn last_transition(&self) -> Option<SystemTime> {
        self.last_transition
    }

    /// Most recent entry, skipped ones included
    pub fn latest(&self) -> Option<&CheckResult> {
        self.history.back()
    }

    /// History oldest first
    pub fn history(&self) -> impl ExactSizeIterator<Item = &CheckResult> {
        self.history.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Counts of endpoints per classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

/// Aggregates results for every configured endpoint
#[derive(Debug, Clone)]
pub struct HealthTracker {
    policy: ThresholdPolicy,
    states: Vec<EndpointState>,
    index: HashMap<String, usize>,
    /// Rounds applied so far
    rounds: u64,
}

impl HealthTracker {
    /// Create a tracker for the given endpoint identifiers, in order
    pub fn new<I, S>(endpoints: I, policy: ThresholdPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut states = Vec::new();
        let mut index = HashMap::new();
        for endpoint in endpoints {
            let endpoint = endpoint.into();
            if index.contains_key(&endpoint) {
                warn!(endpoint = %endpoint, "Duplicate endpoint ignored");
                continue;
            }
            index.insert(endpoint.clone(), states.len());
            states.push(EndpointState::new(endpoint, policy.history_capacity));
        }

        Self {
            policy,
            states,
            index,
            rounds: 0,
        }
    }

    /// Apply one round of results.
    ///
    /// Each call is one round; transitions carry its sequence number,
    /// starting at 1. Each endpoint is mutated at most once; extra results
    /// for the same endpoint and results for unknown endpoints are dropped.
    pub fn update(&mut self, results: &[CheckResult]) -> Vec<Transition> {
        self.rounds += 1;
        let round = self.rounds;
        let mut seen = HashSet::with_capacity(results.len());
        let mut transitions = Vec::new();

        for result in results {
            let Some(&slot) = self.index.get(&result.endpoint) else {
                warn!(endpoint = %result.endpoint, "Result for unregistered endpoint ignored");
                continue;
            };
            if !seen.insert(slot) {
                warn!(endpoint = %result.endpoint, "Duplicate result in round ignored");
                continue;
            }

            let state = &mut self.states[slot];
            match state.apply(round, result, &self.policy) {
                Some(transition) => {
                    info!(
                        endpoint = %transition.endpoint,
                        from = %transition.from,
                        to = %transition.to,
                        "Classification changed"
                    );
                    transitions.push(transition);
                }
                None => {
                    debug!(
                        endpoint = %result.endpoint,
                        outcome = %result.outcome,
                        failures = state.consecutive_failures,
                        successes = state.consecutive_successes,
                        "Result recorded"
                    );
                }
            }
        }

        transitions
    }

    /// Number of rounds applied
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    pub fn state(&self, endpoint: &str) -> Option<&EndpointState> {
        self.index.get(endpoint).map(|&slot| &self.states[slot])
    }

    pub fn classification(&self, endpoint: &str) -> Option<Classification> {
        self.state(endpoint).map(EndpointState::classification)
    }

    /// States in configuration order
    pub fn states(&self) -> impl ExactSizeIterator<Item = &EndpointState> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// True when there is at least one endpoint and every one is healthy
    pub fn all_healthy(&self) -> bool {
        !self.states.is_empty()
            && self
                .states
                .iter()
                .all(|s| s.classification == Classification::Healthy)
    }

    pub fn counts(&self) -> ClassificationCounts {
        let mut counts = ClassificationCounts::default();
        for state in &self.states {
            match state.classification {
                Classification::Healthy => counts.healthy += 1,
                Classification::Unhealthy => counts.unhealthy += 1,
                Classification::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}
