//! Configuration surface for the trust core
//!
//! Every knob has a default; deployments override through a config file
//! and/or `ARBOR_`-prefixed environment variables. Validation rejects
//! configurations that would break the core's invariants (weights not
//! summing to one, shell auto-approved, non-monotone thresholds).

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ArborError, Result};
use crate::types::bundle::ResourceBundle;
use crate::types::capability::Constraints;
use crate::types::decision::ConfirmationMode;
use crate::types::event::TrustEventType;
use crate::types::tier::{PolicyTier, TrustTier, ALL_POLICY_TIERS, ALL_TIERS};

/// Top-level configuration for the trust and authorization core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArborConfig {
    /// Tier score thresholds and points thresholds
    pub tiers: TierConfig,

    /// Component weights for the aggregate score
    pub score_weights: ScoreWeights,

    /// Discrete points granted/deducted per event type
    pub points: PointsConfig,

    /// Tier capability templates and delegation limits
    pub capabilities: CapabilityConfig,

    /// Confirmation matrix overrides and graduation thresholds
    pub confirmation: ConfirmationConfig,

    /// Inactivity decay parameters
    pub decay: DecayConfig,

    /// Circuit breaker thresholds and windows
    pub circuit_breaker: CircuitBreakerConfig,

    /// Profile cache TTL in seconds
    pub profile_cache_ttl_seconds: u64,

    /// In-memory event index cap; oldest 10% pruned on overflow
    pub event_index_max: usize,

    /// Signal bus per-channel ring capacity
    pub signal_capacity: usize,

    /// Retry/backoff for bus subscription and persistence retries
    pub retry: RetryConfig,

    /// Default timeout for external collaborator calls, milliseconds
    pub collaborator_timeout_ms: u64,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            tiers: TierConfig::default(),
            score_weights: ScoreWeights::default(),
            points: PointsConfig::default(),
            capabilities: CapabilityConfig::default(),
            confirmation: ConfirmationConfig::default(),
            decay: DecayConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            profile_cache_ttl_seconds: 3_600,
            event_index_max: 20_000,
            signal_capacity: 1_024,
            retry: RetryConfig::default(),
            collaborator_timeout_ms: 5_000,
        }
    }
}

impl ArborConfig {
    /// Load configuration: defaults, then an optional `arbor` config file,
    /// then `ARBOR_`-prefixed environment variables (`__` as separator).
    pub fn load() -> Result<Self> {
        let raw = Config::builder()
            .add_source(File::with_name("arbor").required(false))
            .add_source(Environment::with_prefix("ARBOR").separator("__"))
            .build()
            .map_err(|e| ArborError::Config(e.to_string()))?;

        let config: ArborConfig = raw
            .try_deserialize()
            .map_err(|e| ArborError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break core invariants
    pub fn validate(&self) -> Result<()> {
        self.score_weights.validate()?;
        self.tiers.validate()?;
        self.confirmation.validate()?;
        self.decay.validate()?;
        Ok(())
    }
}

/// Tier thresholds. Score thresholds map each tier to the minimum aggregate
/// score; points thresholds map each tier to the minimum discrete points.
/// Both must be monotone along the tier ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub score_thresholds: HashMap<TrustTier, u8>,
    pub points_thresholds: HashMap<TrustTier, u64>,

    /// Observed behavioral events (actions, tests, improvements,
    /// installations) required before the score-derived tier can promote
    /// past untrusted. Keeps zero-history agents from starting above the
    /// bottom tier on baseline component scores alone.
    pub promotion_evidence_min: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            score_thresholds: HashMap::from([
                (TrustTier::Untrusted, 0),
                (TrustTier::Probationary, 25),
                (TrustTier::Trusted, 50),
                (TrustTier::Veteran, 75),
                (TrustTier::Autonomous, 90),
            ]),
            points_thresholds: HashMap::from([
                (TrustTier::Untrusted, 0),
                (TrustTier::Probationary, 25),
                (TrustTier::Trusted, 100),
                (TrustTier::Veteran, 250),
                (TrustTier::Autonomous, 500),
            ]),
            promotion_evidence_min: 5,
        }
    }
}

impl TierConfig {
    pub fn validate(&self) -> Result<()> {
        let mut last_score = -1i16;
        let mut last_points = -1i128;
        for tier in ALL_TIERS {
            let score = *self.score_thresholds.get(&tier).ok_or_else(|| {
                ArborError::Config(format!("missing score threshold for tier {}", tier))
            })? as i16;
            if score <= last_score {
                return Err(ArborError::Config(format!(
                    "score thresholds not strictly increasing at {}",
                    tier
                )));
            }
            last_score = score;

            let points = *self.points_thresholds.get(&tier).ok_or_else(|| {
                ArborError::Config(format!("missing points threshold for tier {}", tier))
            })? as i128;
            if points < last_points {
                return Err(ArborError::Config(format!(
                    "points thresholds decreasing at {}",
                    tier
                )));
            }
            last_points = points;
        }
        if self.score_thresholds.get(&TrustTier::Untrusted) != Some(&0) {
            return Err(ArborError::Config(
                "untrusted score threshold must be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Component weights for the aggregate trust score; must sum to ~1.0
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub success_rate: f64,
    pub uptime: f64,
    pub security: f64,
    pub test_pass: f64,
    pub rollback: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            success_rate: 0.30,
            uptime: 0.15,
            security: 0.25,
            test_pass: 0.20,
            rollback: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.success_rate + self.uptime + self.security + self.test_pass + self.rollback
    }

    pub fn validate(&self) -> Result<()> {
        if (self.sum() - 1.0).abs() > 0.001 {
            return Err(ArborError::Config(format!(
                "score weights sum to {:.4}, expected 1.0",
                self.sum()
            )));
        }
        for (name, weight) in [
            ("success_rate", self.success_rate),
            ("uptime", self.uptime),
            ("security", self.security),
            ("test_pass", self.test_pass),
            ("rollback", self.rollback),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ArborError::Config(format!(
                    "weight {} = {} outside [0, 1]",
                    name, weight
                )));
            }
        }
        Ok(())
    }
}

/// Discrete trust points granted and deducted per event type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    pub earned: HashMap<TrustEventType, u64>,
    pub lost: HashMap<TrustEventType, u64>,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            earned: HashMap::from([
                (TrustEventType::ProposalApproved, 5),
                (TrustEventType::ImprovementApplied, 3),
                (TrustEventType::InstallationSuccess, 2),
                (TrustEventType::TestPassed, 1),
            ]),
            lost: HashMap::from([
                (TrustEventType::SecurityViolation, 10),
                (TrustEventType::InstallationRollback, 3),
                (TrustEventType::ProposalRejected, 2),
                (TrustEventType::RollbackExecuted, 2),
            ]),
        }
    }
}

impl PointsConfig {
    /// Points delta for an event type: positive for earned, negative for
    /// lost, zero when the event carries no points.
    pub fn delta(&self, event_type: TrustEventType) -> i64 {
        if let Some(earned) = self.earned.get(&event_type) {
            return *earned as i64;
        }
        if let Some(lost) = self.lost.get(&event_type) {
            return -(*lost as i64);
        }
        0
    }
}

/// One tier capability template entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityTemplate {
    /// Template URI; `/self/` or a trailing `/self` resolves to the agent id
    pub resource_uri: String,

    /// Constraints stamped onto grants from this template
    #[serde(default)]
    pub constraints: Constraints,
}

impl CapabilityTemplate {
    pub fn new(resource_uri: &str, constraints: Constraints) -> Self {
        Self {
            resource_uri: resource_uri.to_string(),
            constraints,
        }
    }

    fn open(resource_uri: &str) -> Self {
        Self::new(resource_uri, Constraints::none())
    }

    fn gated(resource_uri: &str) -> Self {
        Self::new(resource_uri, Constraints::approval_required())
    }
}

/// Capability store configuration: per-tier templates plus delegation caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Templates NEW to each tier. Effective templates for a tier are the
    /// union of its own entries and every lower tier's, with the highest
    /// tier's constraints winning on URI collision.
    pub templates: HashMap<TrustTier, Vec<CapabilityTemplate>>,

    /// Maximum delegation chain depth
    pub max_delegation_depth: u8,

    /// Cap on capabilities held per agent
    pub max_capabilities_per_agent: usize,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        // Shell execution is never unconstrained at any tier.
        let templates = HashMap::from([
            (
                TrustTier::Untrusted,
                vec![
                    CapabilityTemplate::open("arbor://code/read/self/*"),
                    CapabilityTemplate::open("arbor://roadmap/read/*"),
                    CapabilityTemplate::open("arbor://activity/emit/self/*"),
                    CapabilityTemplate::gated("arbor://ai/request/self/*"),
                ],
            ),
            (
                TrustTier::Probationary,
                vec![
                    CapabilityTemplate::open("arbor://git/read/*"),
                    CapabilityTemplate::gated("arbor://code/write/self/*"),
                    CapabilityTemplate::gated("arbor://test/write/self/*"),
                    CapabilityTemplate::gated("arbor://docs/write/self/*"),
                    CapabilityTemplate::open("arbor://signals/subscribe/self/*"),
                ],
            ),
            (
                TrustTier::Trusted,
                vec![
                    CapabilityTemplate::open("arbor://code/write/self/*"),
                    CapabilityTemplate::open("arbor://test/write/self/*"),
                    CapabilityTemplate::open("arbor://docs/write/self/*"),
                    CapabilityTemplate::open("arbor://code/compile/self/*"),
                    CapabilityTemplate::open("arbor://code/reload/self/*"),
                    CapabilityTemplate::gated("arbor://roadmap/write/*"),
                    CapabilityTemplate::gated("arbor://roadmap/move/*"),
                    CapabilityTemplate::gated("arbor://network/request/*"),
                    CapabilityTemplate::gated("arbor://extension/request/self/*"),
                    CapabilityTemplate::gated("arbor://shell/exec/self"),
                ],
            ),
            (
                TrustTier::Veteran,
                vec![
                    CapabilityTemplate::open("arbor://roadmap/write/*"),
                    CapabilityTemplate::open("arbor://roadmap/move/*"),
                    CapabilityTemplate::open("arbor://network/request/*"),
                    CapabilityTemplate::gated("arbor://shell/exec/*"),
                    CapabilityTemplate::gated("arbor://config/write/*"),
                    CapabilityTemplate::gated("arbor://install/execute/*"),
                    CapabilityTemplate::gated("arbor://capability/request/self/*"),
                ],
            ),
            (
                TrustTier::Autonomous,
                vec![
                    CapabilityTemplate::gated("arbor://capability/delegate/self/*"),
                    CapabilityTemplate::gated("arbor://governance/change/*"),
                    CapabilityTemplate::gated("arbor://consensus/propose/*"),
                ],
            ),
        ]);

        Self {
            templates,
            max_delegation_depth: 3,
            max_capabilities_per_agent: 256,
        }
    }
}

impl CapabilityConfig {
    /// Effective templates at a tier: union of this tier and all lower
    /// tiers, higher tier's constraints winning when a URI repeats.
    pub fn effective_templates(&self, tier: TrustTier) -> Vec<CapabilityTemplate> {
        let mut by_uri: HashMap<String, CapabilityTemplate> = HashMap::new();
        for candidate in ALL_TIERS.iter().filter(|t| t.index() <= tier.index()) {
            if let Some(entries) = self.templates.get(candidate) {
                for template in entries {
                    by_uri.insert(template.resource_uri.clone(), template.clone());
                }
            }
        }
        let mut templates: Vec<CapabilityTemplate> = by_uri.into_values().collect();
        templates.sort_by(|a, b| a.resource_uri.cmp(&b.resource_uri));
        templates
    }
}

/// Graduation threshold for one bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraduationThreshold {
    /// Graduate after this many consecutive approvals
    Count(u32),
    /// Graduation impossible; the bundle stays gated forever
    Never,
}

/// Confirmation matrix and graduation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Overrides on the default matrix, bundle -> policy tier -> mode
    pub matrix: HashMap<ResourceBundle, HashMap<PolicyTier, ConfirmationMode>>,

    /// Consecutive-approval counts required for graduation, per bundle
    pub graduation_thresholds: HashMap<ResourceBundle, GraduationThreshold>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            matrix: HashMap::new(),
            graduation_thresholds: HashMap::from([
                (ResourceBundle::CodebaseRead, GraduationThreshold::Count(0)),
                (ResourceBundle::AiGenerate, GraduationThreshold::Count(3)),
                (ResourceBundle::CodebaseWrite, GraduationThreshold::Count(3)),
                (ResourceBundle::Network, GraduationThreshold::Count(5)),
                (ResourceBundle::SystemConfig, GraduationThreshold::Count(10)),
                (ResourceBundle::Shell, GraduationThreshold::Never),
                (ResourceBundle::Governance, GraduationThreshold::Never),
            ]),
        }
    }
}

impl ConfirmationConfig {
    /// Threshold for a bundle; unknown bundles never graduate
    pub fn threshold(&self, bundle: ResourceBundle) -> GraduationThreshold {
        self.graduation_thresholds
            .get(&bundle)
            .copied()
            .unwrap_or(GraduationThreshold::Never)
    }

    pub fn validate(&self) -> Result<()> {
        // Shell and governance can never be auto-approved, even by override.
        for bundle in [ResourceBundle::Shell, ResourceBundle::Governance] {
            if let Some(rows) = self.matrix.get(&bundle) {
                for tier in ALL_POLICY_TIERS {
                    if rows.get(&tier) == Some(&ConfirmationMode::Auto) {
                        return Err(ArborError::Config(format!(
                            "matrix override maps {} to auto at {}",
                            bundle, tier
                        )));
                    }
                }
            }
            if matches!(self.threshold(bundle), GraduationThreshold::Count(_)) {
                return Err(ArborError::Config(format!(
                    "bundle {} must have graduation threshold never",
                    bundle
                )));
            }
        }
        Ok(())
    }
}

/// Inactivity decay configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Days of inactivity before decay starts
    pub grace_period_days: u32,

    /// Points removed per day beyond grace
    pub decay_rate: u32,

    /// Score never decays below this
    pub floor_score: u8,

    /// Daily run time, UTC hour [0, 23]
    pub run_hour_utc: u8,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 7,
            decay_rate: 1,
            floor_score: 10,
            run_hour_utc: 3,
        }
    }
}

impl DecayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.floor_score > 100 {
            return Err(ArborError::Config(format!(
                "decay floor_score {} > 100",
                self.floor_score
            )));
        }
        if self.run_hour_utc > 23 {
            return Err(ArborError::Config(format!(
                "decay run_hour_utc {} > 23",
                self.run_hour_utc
            )));
        }
        Ok(())
    }
}

/// Circuit breaker trigger thresholds, windows, and durations
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// `action_failure` events within the window that open the circuit
    pub failure_threshold: u32,
    pub failure_window_seconds: u64,

    /// `security_violation` events within the window that open the circuit
    pub violation_threshold: u32,
    pub violation_window_seconds: u64,

    /// `rollback_executed` events within the window that demote one tier
    pub rollback_threshold: u32,
    pub rollback_window_seconds: u64,

    /// `test_failed` events within the window that open the circuit
    pub test_failure_threshold: u32,
    pub test_failure_window_seconds: u64,

    /// Time frozen (open) before the circuit half-opens
    pub freeze_duration_seconds: u64,

    /// Time half-open without a re-trip before auto-close
    pub half_open_duration_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_seconds: 60,
            violation_threshold: 3,
            violation_window_seconds: 3_600,
            rollback_threshold: 3,
            rollback_window_seconds: 3_600,
            test_failure_threshold: 5,
            test_failure_window_seconds: 300,
            freeze_duration_seconds: 86_400,
            half_open_duration_seconds: 3_600,
        }
    }
}

impl CircuitBreakerConfig {
    /// Longest configured window; the sliding list is pruned to this
    pub fn max_window_seconds(&self) -> u64 {
        self.failure_window_seconds
            .max(self.violation_window_seconds)
            .max(self.rollback_window_seconds)
            .max(self.test_failure_window_seconds)
    }
}

/// Retry/backoff parameters for bus subscription and async persistence
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff delay for the given attempt (0-based), capped
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.min(30);
        (self.base_delay_ms.saturating_mul(1u64 << exp)).min(self.max_delay_ms)
    }
}
