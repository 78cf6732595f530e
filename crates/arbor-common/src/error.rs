//! Error types for the Arbor trust core
//!
//! Provides a unified error type, domain-specific error variants, and the
//! denial-reason taxonomy surfaced through authorization verdicts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using ArborError
pub type Result<T> = std::result::Result<T, ArborError>;

/// Unified error type for Arbor operations
#[derive(Debug, Error)]
pub enum ArborError {
    // Capability errors
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // Identity errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    // Profile / event lookups
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Signal bus errors
    #[error("Signal error: {0}")]
    Signal(String),

    // Core dependency unavailable; authorization fails closed
    #[error("Infrastructure unavailable: {0}")]
    InfrastructureUnavailable(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Capability-related errors
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Capability expired: {capability_id} at {expired_at}")]
    Expired { capability_id: String, expired_at: i64 },

    #[error("Capability revoked: {0}")]
    Revoked(String),

    #[error("Invalid resource URI: {0}")]
    InvalidUri(String),

    #[error("Delegation depth exceeded: {depth} > {max}")]
    DelegationDepthExceeded { depth: u8, max: u8 },

    #[error("Broken delegation chain at link {link}: {reason}")]
    BrokenChain { link: usize, reason: String },

    #[error("Invalid capability signature for {0}")]
    InvalidSignature(String),

    #[error("Constraint violated: {kind}: {context}")]
    ConstraintViolated { kind: String, context: String },
}

/// Identity / signed-request verification errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Public key not found for agent: {0}")]
    KeyNotFound(String),

    #[error("Request timestamp expired: {age_ms}ms > {max_age_ms}ms")]
    ExpiredTimestamp { age_ms: i64, max_age_ms: i64 },

    #[error("Replayed nonce: {0}")]
    ReplayedNonce(String),

    #[error("Identity verifier unavailable")]
    Unavailable,
}

/// Why an authorization request was denied.
///
/// Denials are values, never panics or raised errors; the authorize call
/// returns them inside [`AuthorizationDecision::Denied`].
///
/// [`AuthorizationDecision::Denied`]: crate::types::AuthorizationDecision::Denied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    /// No capability matches the requested resource
    Unauthorized,

    /// The agent's tier is below the required minimum
    InsufficientTrust { required: String, actual: String },

    /// The agent's trust profile is frozen
    TrustFrozen { detail: String },

    /// A matching capability exists but has expired
    CapabilityExpired { capability_id: String },

    /// The referenced capability does not exist
    CapabilityNotFound { capability_id: String },

    /// A capability constraint blocked the request
    ConstraintViolated { kind: String, context: String },

    /// A quota was exhausted
    QuotaExceeded { quota_type: String, context: String },

    /// The delegation chain failed verification
    BrokenDelegationChain { detail: String },

    /// The capability grant signature failed verification
    InvalidCapabilitySignature { capability_id: String },

    /// Signed-request signature failed verification
    InvalidSignature,

    /// Signed-request timestamp outside the accepted window
    ExpiredTimestamp,

    /// Signed-request nonce already seen
    ReplayedNonce,

    /// A core dependency is down; authorization fails closed
    InfrastructureUnavailable,

    /// The confirmation matrix maps this request to deny
    PolicyDenied { bundle: String, policy_tier: String },
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::Unauthorized => write!(f, "unauthorized"),
            DenyReason::InsufficientTrust { required, actual } => {
                write!(f, "insufficient_trust: need {}, have {}", required, actual)
            }
            DenyReason::TrustFrozen { detail } => write!(f, "trust_frozen: {}", detail),
            DenyReason::CapabilityExpired { capability_id } => {
                write!(f, "capability_expired: {}", capability_id)
            }
            DenyReason::CapabilityNotFound { capability_id } => {
                write!(f, "capability_not_found: {}", capability_id)
            }
            DenyReason::ConstraintViolated { kind, context } => {
                write!(f, "constraint_violated({}): {}", kind, context)
            }
            DenyReason::QuotaExceeded { quota_type, context } => {
                write!(f, "quota_exceeded({}): {}", quota_type, context)
            }
            DenyReason::BrokenDelegationChain { detail } => {
                write!(f, "broken_delegation_chain: {}", detail)
            }
            DenyReason::InvalidCapabilitySignature { capability_id } => {
                write!(f, "invalid_capability_signature: {}", capability_id)
            }
            DenyReason::InvalidSignature => write!(f, "invalid_signature"),
            DenyReason::ExpiredTimestamp => write!(f, "expired_timestamp"),
            DenyReason::ReplayedNonce => write!(f, "replayed_nonce"),
            DenyReason::InfrastructureUnavailable => write!(f, "infrastructure_unavailable"),
            DenyReason::PolicyDenied { bundle, policy_tier } => {
                write!(f, "policy_denied: {} at {}", bundle, policy_tier)
            }
        }
    }
}

impl From<IdentityError> for DenyReason {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidSignature => DenyReason::InvalidSignature,
            IdentityError::ExpiredTimestamp { .. } => DenyReason::ExpiredTimestamp,
            IdentityError::ReplayedNonce(_) => DenyReason::ReplayedNonce,
            IdentityError::KeyNotFound(_) => DenyReason::InvalidSignature,
            IdentityError::Unavailable => DenyReason::InfrastructureUnavailable,
        }
    }
}

// Implement From for common external error types
impl From<serde_json::Error> for ArborError {
    fn from(err: serde_json::Error) -> Self {
        ArborError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ArborError {
    fn from(err: std::io::Error) -> Self {
        ArborError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for ArborError {
    fn from(err: anyhow::Error) -> Self {
        ArborError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArborError::NotFound("profile agent-007".to_string());
        assert!(err.to_string().contains("agent-007"));
    }

    #[test]
    fn test_capability_error_nesting() {
        let err: ArborError = CapabilityError::DelegationDepthExceeded { depth: 4, max: 3 }.into();
        assert!(err.to_string().contains("4 > 3"));
    }

    #[test]
    fn test_deny_reason_display() {
        let reason = DenyReason::InsufficientTrust {
            required: "trusted".to_string(),
            actual: "untrusted".to_string(),
        };
        assert_eq!(
            reason.to_string(),
            "insufficient_trust: need trusted, have untrusted"
        );
    }

    #[test]
    fn test_deny_reason_serializes_tagged() {
        let json = serde_json::to_value(DenyReason::Unauthorized).unwrap();
        assert_eq!(json["reason"], "unauthorized");
    }

    #[test]
    fn test_identity_error_maps_to_deny() {
        let deny: DenyReason = IdentityError::ReplayedNonce("n-1".to_string()).into();
        assert_eq!(deny, DenyReason::ReplayedNonce);
    }
}
