//! Circuit breaker - per-agent anomaly detection
//!
//! Watches a sliding window of negative events per agent and trips on
//! configured burst thresholds. State machine per agent:
//!
//! ```text
//! closed --trip--> open --freeze_duration--> half_open --quiet--> closed
//!                    ^                           |
//!                    +------ negative event -----+
//! ```
//!
//! Opening freezes the agent's trust profile; the manager owns applying
//! that side effect. The rollback trigger is different: it demotes one
//! tier and never freezes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use arbor_common::config::CircuitBreakerConfig;
use arbor_common::TrustEventType;

/// Per-agent circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Side effect the manager must apply after recording an event
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerAction {
    /// Open the circuit: freeze the profile with this reason
    Freeze { reason: String },
    /// Rollback burst: demote one tier, do not freeze
    DemoteTier,
}

/// Timer-driven state transition from [`CircuitBreaker::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// Freeze duration elapsed; probing (still frozen)
    ToHalfOpen,
    /// Half-open period passed quietly; unfreeze the profile
    AutoClosed,
}

/// Trigger kinds, used as freeze reasons
pub mod trip_reasons {
    pub const RAPID_FAILURES: &str = "rapid_failures";
    pub const SECURITY_VIOLATIONS: &str = "security_violations";
    pub const TEST_FAILURES: &str = "test_failures";
    pub const HALF_OPEN_RETRIP: &str = "half_open_retrip";
}

fn count_within(
    window: &[(TrustEventType, i64)],
    target: TrustEventType,
    window_seconds: u64,
    now_ms: i64,
) -> u32 {
    let cutoff = now_ms - (window_seconds as i64) * 1_000;
    window
        .iter()
        .filter(|(t, ts)| *t == target && *ts >= cutoff)
        .count() as u32
}

#[derive(Debug, Default)]
struct AgentCircuit {
    state: CircuitState,
    /// `(event_type, timestamp_ms)` entries, pruned to the longest window
    window: Vec<(TrustEventType, i64)>,
    opened_at: Option<i64>,
    half_opened_at: Option<i64>,
    /// Rollback demotions already applied for the current window burst
    demoted_for_burst: bool,
}

/// Sliding-window circuit breaker over all agents
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<String, AgentCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Event types the breaker watches
    pub fn is_relevant(event_type: TrustEventType) -> bool {
        matches!(
            event_type,
            TrustEventType::ActionFailure
                | TrustEventType::SecurityViolation
                | TrustEventType::RollbackExecuted
                | TrustEventType::TestFailed
        )
    }

    /// Current state for an agent
    pub fn state(&self, agent_id: &str) -> CircuitState {
        self.circuits
            .read()
            .get(agent_id)
            .map(|circuit| circuit.state)
            .unwrap_or_default()
    }

    /// Record a relevant event and evaluate the triggers. Returns the
    /// action the manager must apply, if any.
    pub fn record(
        &self,
        agent_id: &str,
        event_type: TrustEventType,
        now_ms: i64,
    ) -> Option<BreakerAction> {
        if !Self::is_relevant(event_type) {
            return None;
        }

        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(agent_id.to_string()).or_default();

        circuit.window.push((event_type, now_ms));
        let horizon = now_ms - (self.config.max_window_seconds() as i64) * 1_000;
        circuit.window.retain(|(_, ts)| *ts >= horizon);

        // Any negative event during the probe re-opens the circuit
        if circuit.state == CircuitState::HalfOpen {
            circuit.state = CircuitState::Open;
            circuit.opened_at = Some(now_ms);
            circuit.half_opened_at = None;
            warn!(agent_id, "circuit re-opened during half-open probe");
            return Some(BreakerAction::Freeze {
                reason: trip_reasons::HALF_OPEN_RETRIP.to_string(),
            });
        }
        if circuit.state == CircuitState::Open {
            // Already frozen; nothing further to apply
            return None;
        }

        let failures = count_within(
            &circuit.window,
            TrustEventType::ActionFailure,
            self.config.failure_window_seconds,
            now_ms,
        );
        let violations = count_within(
            &circuit.window,
            TrustEventType::SecurityViolation,
            self.config.violation_window_seconds,
            now_ms,
        );
        let test_failures = count_within(
            &circuit.window,
            TrustEventType::TestFailed,
            self.config.test_failure_window_seconds,
            now_ms,
        );
        let rollbacks = count_within(
            &circuit.window,
            TrustEventType::RollbackExecuted,
            self.config.rollback_window_seconds,
            now_ms,
        );

        let freeze_reason = if failures >= self.config.failure_threshold {
            Some(trip_reasons::RAPID_FAILURES)
        } else if violations >= self.config.violation_threshold {
            Some(trip_reasons::SECURITY_VIOLATIONS)
        } else if test_failures >= self.config.test_failure_threshold {
            Some(trip_reasons::TEST_FAILURES)
        } else {
            None
        };

        if let Some(reason) = freeze_reason {
            circuit.state = CircuitState::Open;
            circuit.opened_at = Some(now_ms);
            warn!(agent_id, reason, "circuit opened");
            return Some(BreakerAction::Freeze {
                reason: reason.to_string(),
            });
        }

        // Rollback bursts demote instead of freezing, once per burst
        if rollbacks >= self.config.rollback_threshold {
            if !circuit.demoted_for_burst {
                circuit.demoted_for_burst = true;
                info!(agent_id, "rollback burst; demoting one tier");
                return Some(BreakerAction::DemoteTier);
            }
        } else {
            circuit.demoted_for_burst = false;
        }

        None
    }

    /// Advance one agent's timers. Idempotent on replay.
    pub fn tick(&self, agent_id: &str, now_ms: i64) -> Option<BreakerTransition> {
        let mut circuits = self.circuits.write();
        let circuit = circuits.get_mut(agent_id)?;

        match circuit.state {
            CircuitState::Open => {
                let opened_at = circuit.opened_at?;
                if now_ms - opened_at >= (self.config.freeze_duration_seconds as i64) * 1_000 {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_opened_at = Some(now_ms);
                    debug!(agent_id, "circuit half-open");
                    return Some(BreakerTransition::ToHalfOpen);
                }
                None
            }
            CircuitState::HalfOpen => {
                let half_opened_at = circuit.half_opened_at?;
                if now_ms - half_opened_at
                    >= (self.config.half_open_duration_seconds as i64) * 1_000
                {
                    circuit.state = CircuitState::Closed;
                    circuit.opened_at = None;
                    circuit.half_opened_at = None;
                    circuit.window.clear();
                    info!(agent_id, "circuit auto-closed");
                    return Some(BreakerTransition::AutoClosed);
                }
                None
            }
            CircuitState::Closed => None,
        }
    }

    /// Advance every agent's timers
    pub fn tick_all(&self, now_ms: i64) -> Vec<(String, BreakerTransition)> {
        let agent_ids: Vec<String> = self.circuits.read().keys().cloned().collect();
        agent_ids
            .into_iter()
            .filter_map(|agent_id| {
                self.tick(&agent_id, now_ms)
                    .map(|transition| (agent_id, transition))
            })
            .collect()
    }

    /// Administrative reset: close the circuit and clear the window. The
    /// caller is responsible for unfreezing the profile.
    pub fn reset(&self, agent_id: &str) {
        if let Some(circuit) = self.circuits.write().get_mut(agent_id) {
            *circuit = AgentCircuit::default();
            info!(agent_id, "circuit reset");
        }
    }
}
