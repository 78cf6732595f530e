//! Trust events - the append-only behavioral record
//!
//! Every trust-affecting observation becomes a `TrustEvent`. Events are
//! immutable once appended and keyed by `(timestamp, id)` so pagination
//! stays stable under concurrent appends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::types::tier::TrustTier;

/// Closed set of trust-affecting event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustEventType {
    ActionSuccess,
    ActionFailure,
    TestPassed,
    TestFailed,
    RollbackExecuted,
    ImprovementApplied,
    SecurityViolation,
    ProposalSubmitted,
    ProposalApproved,
    ProposalRejected,
    InstallationSuccess,
    InstallationRollback,
    TrustPointsAwarded,
    TrustPointsDeducted,
    TierChanged,
    TrustFrozen,
    TrustUnfrozen,
    TrustDecayed,
    ProfileCreated,
    ProfileDeleted,
}

impl TrustEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustEventType::ActionSuccess => "action_success",
            TrustEventType::ActionFailure => "action_failure",
            TrustEventType::TestPassed => "test_passed",
            TrustEventType::TestFailed => "test_failed",
            TrustEventType::RollbackExecuted => "rollback_executed",
            TrustEventType::ImprovementApplied => "improvement_applied",
            TrustEventType::SecurityViolation => "security_violation",
            TrustEventType::ProposalSubmitted => "proposal_submitted",
            TrustEventType::ProposalApproved => "proposal_approved",
            TrustEventType::ProposalRejected => "proposal_rejected",
            TrustEventType::InstallationSuccess => "installation_success",
            TrustEventType::InstallationRollback => "installation_rollback",
            TrustEventType::TrustPointsAwarded => "trust_points_awarded",
            TrustEventType::TrustPointsDeducted => "trust_points_deducted",
            TrustEventType::TierChanged => "tier_changed",
            TrustEventType::TrustFrozen => "trust_frozen",
            TrustEventType::TrustUnfrozen => "trust_unfrozen",
            TrustEventType::TrustDecayed => "trust_decayed",
            TrustEventType::ProfileCreated => "profile_created",
            TrustEventType::ProfileDeleted => "profile_deleted",
        }
    }

    /// Events that count as negative outcomes for timelines and the
    /// circuit breaker's relevant set
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            TrustEventType::ActionFailure
                | TrustEventType::TestFailed
                | TrustEventType::RollbackExecuted
                | TrustEventType::SecurityViolation
                | TrustEventType::ProposalRejected
                | TrustEventType::InstallationRollback
                | TrustEventType::TrustPointsDeducted
                | TrustEventType::TrustFrozen
                | TrustEventType::TrustDecayed
        )
    }

    /// Durable event-log type string, `arbor.trust.{event_type}`
    pub fn persisted_type(&self) -> String {
        format!("arbor.trust.{}", self.as_str())
    }
}

impl std::fmt::Display for TrustEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action_success" => Ok(TrustEventType::ActionSuccess),
            "action_failure" => Ok(TrustEventType::ActionFailure),
            "test_passed" => Ok(TrustEventType::TestPassed),
            "test_failed" => Ok(TrustEventType::TestFailed),
            "rollback_executed" => Ok(TrustEventType::RollbackExecuted),
            "improvement_applied" => Ok(TrustEventType::ImprovementApplied),
            "security_violation" => Ok(TrustEventType::SecurityViolation),
            "proposal_submitted" => Ok(TrustEventType::ProposalSubmitted),
            "proposal_approved" => Ok(TrustEventType::ProposalApproved),
            "proposal_rejected" => Ok(TrustEventType::ProposalRejected),
            "installation_success" => Ok(TrustEventType::InstallationSuccess),
            "installation_rollback" => Ok(TrustEventType::InstallationRollback),
            "trust_points_awarded" => Ok(TrustEventType::TrustPointsAwarded),
            "trust_points_deducted" => Ok(TrustEventType::TrustPointsDeducted),
            "tier_changed" => Ok(TrustEventType::TierChanged),
            "trust_frozen" => Ok(TrustEventType::TrustFrozen),
            "trust_unfrozen" => Ok(TrustEventType::TrustUnfrozen),
            "trust_decayed" => Ok(TrustEventType::TrustDecayed),
            "profile_created" => Ok(TrustEventType::ProfileCreated),
            "profile_deleted" => Ok(TrustEventType::ProfileDeleted),
            other => Err(format!("unknown trust event type: {}", other)),
        }
    }
}

/// A single immutable trust event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustEvent {
    /// Unique event id (UUIDv7, time-ordered)
    pub id: String,

    /// Agent the event concerns
    pub agent_id: String,

    /// What happened
    pub event_type: TrustEventType,

    /// When it happened (Unix milliseconds)
    pub timestamp: i64,

    /// Score before processing, when known
    pub previous_score: Option<u8>,

    /// Score after processing, when known
    pub new_score: Option<u8>,

    /// Signed score delta, when known
    pub delta: Option<i32>,

    /// Tier before processing, when known
    pub previous_tier: Option<TrustTier>,

    /// Tier after processing, when known
    pub new_tier: Option<TrustTier>,

    /// Human-readable context
    pub reason: Option<String>,

    /// Free-form attachment
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TrustEvent {
    /// Create a new event with a fresh UUIDv7 id
    pub fn new(agent_id: impl Into<String>, event_type: TrustEventType, timestamp: i64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            agent_id: agent_id.into(),
            event_type,
            timestamp,
            previous_score: None,
            new_score: None,
            delta: None,
            previous_tier: None,
            new_tier: None,
            reason: None,
            metadata: Map::new(),
        }
    }

    /// Attach the score transition
    pub fn with_scores(mut self, previous: u8, new: u8) -> Self {
        self.previous_score = Some(previous);
        self.new_score = Some(new);
        self.delta = Some(new as i32 - previous as i32);
        self
    }

    /// Attach the tier transition
    pub fn with_tiers(mut self, previous: TrustTier, new: TrustTier) -> Self {
        self.previous_tier = Some(previous);
        self.new_tier = Some(new);
        self
    }

    /// Attach a reason string
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Stream this event persists under, `trust:{agent_id}`
    pub fn stream_id(&self) -> String {
        format!("trust:{}", self.agent_id)
    }

    /// Stable pagination cursor, `timestamp_ms:event_id`
    pub fn cursor(&self) -> String {
        format!("{}:{}", self.timestamp, self.id)
    }

    /// Whether the event carried a tier promotion (vs demotion or none)
    pub fn is_promotion(&self) -> Option<bool> {
        match (self.previous_tier, self.new_tier) {
            (Some(prev), Some(new)) if prev != new => Some(new > prev),
            _ => None,
        }
    }
}
