//! Authorization verdicts and confirmation modes

use serde::{Deserialize, Serialize};

use crate::error::DenyReason;

/// Human-in-the-loop decision for a resource bundle at a policy tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    /// Proceed without confirmation
    Auto,
    /// File a human-approval proposal and wait
    Gated,
    /// Refuse outright
    Deny,
}

impl std::fmt::Display for ConfirmationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfirmationMode::Auto => "auto",
            ConfirmationMode::Gated => "gated",
            ConfirmationMode::Deny => "deny",
        };
        f.write_str(s)
    }
}

/// Result of the public authorize call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AuthorizationDecision {
    /// Proceed
    Authorized,

    /// A capability exists but the mode is gated; a human-approval proposal
    /// has been filed with the external consensus system
    PendingApproval { proposal_id: String },

    /// Refused, with the reason
    Denied { reason: DenyReason },
}

impl AuthorizationDecision {
    pub fn denied(reason: DenyReason) -> Self {
        AuthorizationDecision::Denied { reason }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationDecision::Authorized)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, AuthorizationDecision::Denied { .. })
    }
}

impl std::fmt::Display for AuthorizationDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorizationDecision::Authorized => write!(f, "authorized"),
            AuthorizationDecision::PendingApproval { proposal_id } => {
                write!(f, "pending_approval({})", proposal_id)
            }
            AuthorizationDecision::Denied { reason } => write!(f, "denied({})", reason),
        }
    }
}
