//! TrustProfile - per-agent behavioral record
//!
//! One profile per agent, unique by `agent_id`. Carries the raw behavior
//! counters, the derived component scores, the aggregate trust score, the
//! discrete trust points, and the assigned tier. The score calculator in
//! `arbor-trust` owns all derivation; this type only holds state and
//! enforces the structural invariants.

use serde::{Deserialize, Serialize};

use crate::types::tier::TrustTier;

/// Durable trust profile for a single agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustProfile {
    /// Stable agent identifier; immutable after creation
    pub agent_id: String,

    /// Creation timestamp (Unix milliseconds); immutable after creation
    pub created_at: i64,

    // -- behavior counters --
    /// Total actions attempted
    pub total_actions: u64,

    /// Actions that completed successfully
    pub successful_actions: u64,

    /// Security violations observed
    pub security_violations: u64,

    /// Total test runs attributed to the agent
    pub total_tests: u64,

    /// Test runs that passed
    pub tests_passed: u64,

    /// Rollbacks executed against the agent's changes
    pub rollback_count: u64,

    /// Improvements applied by the agent
    pub improvement_count: u64,

    /// Proposals submitted to the council
    pub proposals_submitted: u64,

    /// Proposals the council approved
    pub proposals_approved: u64,

    /// Installations that completed successfully
    pub installations_successful: u64,

    /// Installations that were rolled back
    pub installations_rolled_back: u64,

    // -- derived component scores, each in [0.0, 100.0] --
    pub success_rate_score: f64,
    pub uptime_score: f64,
    pub security_score: f64,
    pub test_pass_score: f64,
    pub rollback_score: f64,

    /// Weighted aggregate score in [0, 100]
    pub trust_score: u8,

    /// Discrete points granted per council-adjudicated event
    pub trust_points: u64,

    /// Assigned tier: max(score tier, points tier) unless frozen
    pub tier: TrustTier,

    // -- lifecycle --
    /// When true, progression is blocked and authorization denies
    pub frozen: bool,

    /// Why the profile was frozen, if it is
    pub frozen_reason: Option<String>,

    /// Last observed activity (Unix milliseconds)
    pub last_activity_at: i64,

    /// Last mutation timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl TrustProfile {
    /// Create a fresh profile at the bottom tier
    pub fn new(agent_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            agent_id: agent_id.into(),
            created_at: now_ms,
            total_actions: 0,
            successful_actions: 0,
            security_violations: 0,
            total_tests: 0,
            tests_passed: 0,
            rollback_count: 0,
            improvement_count: 0,
            proposals_submitted: 0,
            proposals_approved: 0,
            installations_successful: 0,
            installations_rolled_back: 0,
            success_rate_score: 0.0,
            uptime_score: 100.0,
            security_score: 100.0,
            test_pass_score: 0.0,
            rollback_score: 100.0,
            trust_score: 0,
            trust_points: 0,
            tier: TrustTier::Untrusted,
            frozen: false,
            frozen_reason: None,
            last_activity_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Fraction of actions that succeeded, 0.0 when none recorded
    pub fn success_rate(&self) -> f64 {
        if self.total_actions == 0 {
            0.0
        } else {
            self.successful_actions as f64 / self.total_actions as f64
        }
    }

    /// Fraction of tests that passed, 0.0 when none recorded
    pub fn test_pass_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.tests_passed as f64 / self.total_tests as f64
        }
    }

    /// Whole days since the later of last activity and creation
    pub fn days_inactive(&self, now_ms: i64) -> i64 {
        let reference = self.last_activity_at.max(self.created_at);
        ((now_ms - reference) / 86_400_000).max(0)
    }

    /// Structural invariants that must hold after any mutation.
    ///
    /// Returns the first violated invariant as a message, `Ok(())` otherwise.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.successful_actions > self.total_actions {
            return Err(format!(
                "successful_actions {} > total_actions {}",
                self.successful_actions, self.total_actions
            ));
        }
        if self.tests_passed > self.total_tests {
            return Err(format!(
                "tests_passed {} > total_tests {}",
                self.tests_passed, self.total_tests
            ));
        }
        if self.trust_score > 100 {
            return Err(format!("trust_score {} > 100", self.trust_score));
        }
        for (name, value) in [
            ("success_rate_score", self.success_rate_score),
            ("uptime_score", self.uptime_score),
            ("security_score", self.security_score),
            ("test_pass_score", self.test_pass_score),
            ("rollback_score", self.rollback_score),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("{} {} outside [0, 100]", name, value));
            }
        }
        Ok(())
    }

    /// Mark activity now, refreshing `last_activity_at` and `updated_at`
    pub fn touch(&mut self, now_ms: i64) {
        self.last_activity_at = now_ms;
        self.updated_at = now_ms;
    }
}

impl std::fmt::Display for TrustProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TrustProfile({} score={} points={} tier={}{})",
            self.agent_id,
            self.trust_score,
            self.trust_points,
            self.tier,
            if self.frozen { " FROZEN" } else { "" }
        )
    }
}
