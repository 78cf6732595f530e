//! Authorization engine - the public authorize entry point
//!
//! Every agent action funnels through [`AuthorizationEngine::authorize`].
//! The decision pipeline, in order:
//!
//! 1. optional signed-request identity verification
//! 2. frozen profile check
//! 3. capability match (issued grant first, tier template as the implicit
//!    fallback) with signature, chain, and constraint enforcement
//! 4. confirmation mode (matrix + graduation), filing a human-approval
//!    proposal when gated
//!
//! Verdicts are values; nothing in this module panics or raises on a
//! denial. A missing collaborator fails closed.

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use arbor_common::identity::{IdentityVerifier, SignedRequest};
use arbor_common::signal::SignalBus;
use arbor_common::{
    ArborError, AuthorizationDecision, ConfirmationMode, DenyReason, ResourceBundle, TrustProfile,
};
use arbor_trust::ProfileStore;

use crate::graduation::ConfirmationOutcome;
use crate::matrix::resolve_bundle;
use crate::policy::CapabilityPolicy;
use crate::store::CapabilityStore;

/// Options for [`AuthorizationEngine::authorize_with`]
#[derive(Default)]
pub struct AuthorizeOptions {
    /// Require and verify a signed request before deciding
    pub verify_identity: bool,
    /// The signed material, when `verify_identity` is set
    pub signed_request: Option<SignedRequest>,
}

/// A gated request waiting on the external consensus system
#[derive(Debug, Clone)]
pub struct PendingProposal {
    pub proposal_id: String,
    pub agent_id: String,
    pub resource_uri: String,
    pub bundle: Option<ResourceBundle>,
    pub filed_at: i64,
}

/// The authorize front door
pub struct AuthorizationEngine {
    policy: Arc<CapabilityPolicy>,
    store: Arc<CapabilityStore>,
    profiles: Arc<ProfileStore>,
    identity: Arc<dyn IdentityVerifier>,
    bus: Arc<SignalBus>,
    pending: DashMap<String, PendingProposal>,
}

impl AuthorizationEngine {
    pub fn new(
        policy: Arc<CapabilityPolicy>,
        profiles: Arc<ProfileStore>,
        identity: Arc<dyn IdentityVerifier>,
        bus: Arc<SignalBus>,
    ) -> Self {
        let store = policy.store().clone();
        Self {
            policy,
            store,
            profiles,
            identity,
            bus,
            pending: DashMap::new(),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Authorize an action on a resource URI
    pub async fn authorize(&self, agent_id: &str, uri: &str) -> AuthorizationDecision {
        self.authorize_with(agent_id, uri, AuthorizeOptions::default())
            .await
    }

    /// Authorize with identity verification options
    #[instrument(skip(self, options))]
    pub async fn authorize_with(
        &self,
        agent_id: &str,
        uri: &str,
        options: AuthorizeOptions,
    ) -> AuthorizationDecision {
        if options.verify_identity {
            let Some(request) = &options.signed_request else {
                return AuthorizationDecision::denied(DenyReason::InvalidSignature);
            };
            match self.identity.verify_request(request).await {
                Ok(verified) if verified == agent_id => {}
                Ok(other) => {
                    warn!(agent_id, verified = %other, "signed request for a different agent");
                    return AuthorizationDecision::denied(DenyReason::InvalidSignature);
                }
                Err(e) => return AuthorizationDecision::denied(e.into()),
            }
        }

        // Load the profile (and warm the cache the sync path reads)
        let profile = match self.profiles.get(agent_id).await {
            Ok(profile) => profile,
            Err(ArborError::NotFound(_)) => {
                debug!(agent_id, "authorize for unknown agent");
                return AuthorizationDecision::denied(DenyReason::Unauthorized);
            }
            Err(e) => {
                warn!(agent_id, error = %e, "profile load failed; failing closed");
                return AuthorizationDecision::denied(DenyReason::InfrastructureUnavailable);
            }
        };

        self.decide(&profile, uri, Self::now_ms())
    }

    /// Synchronous decision core; reads only in-process state
    fn decide(&self, profile: &TrustProfile, uri: &str, now_ms: i64) -> AuthorizationDecision {
        let agent_id = &profile.agent_id;

        if profile.frozen {
            return AuthorizationDecision::denied(DenyReason::TrustFrozen {
                detail: profile
                    .frozen_reason
                    .clone()
                    .unwrap_or_else(|| "frozen".to_string()),
            });
        }

        let Some(effective_tier) = self.policy.effective_tier(agent_id) else {
            return AuthorizationDecision::denied(DenyReason::InfrastructureUnavailable);
        };

        // An issued capability wins; the agent's tier templates are the
        // implicit fallback right.
        let issued = self.store.find_matching(agent_id, uri, now_ms);
        let covered = issued.is_some() || self.policy.allowed(agent_id, uri);
        if !covered {
            return match self.policy.min_tier_for(agent_id, uri) {
                Some(required) if required > effective_tier => {
                    AuthorizationDecision::denied(DenyReason::InsufficientTrust {
                        required: required.to_string(),
                        actual: effective_tier.to_string(),
                    })
                }
                _ => AuthorizationDecision::denied(DenyReason::Unauthorized),
            };
        }

        if let Some(capability) = &issued {
            if let Err(reason) = self.store.verify(capability) {
                return AuthorizationDecision::denied(reason);
            }
            if let Err(reason) = self.store.check_constraints(capability, uri, now_ms) {
                return AuthorizationDecision::denied(reason);
            }
        }

        match self.policy.confirmation_mode(agent_id, uri) {
            ConfirmationMode::Auto => AuthorizationDecision::Authorized,
            ConfirmationMode::Gated => {
                let proposal_id = self.file_proposal(agent_id, uri, now_ms);
                AuthorizationDecision::PendingApproval { proposal_id }
            }
            ConfirmationMode::Deny => match self.policy.min_tier_for(agent_id, uri) {
                Some(required) if required > effective_tier => {
                    AuthorizationDecision::denied(DenyReason::InsufficientTrust {
                        required: required.to_string(),
                        actual: effective_tier.to_string(),
                    })
                }
                _ => {
                    let bundle = resolve_bundle(uri);
                    AuthorizationDecision::denied(DenyReason::PolicyDenied {
                        bundle: bundle.map(|b| b.to_string()).unwrap_or_else(|| "none".to_string()),
                        policy_tier: effective_tier.policy_tier().to_string(),
                    })
                }
            },
        }
    }

    /// File a human-approval proposal with the external consensus system
    /// (outbound signal; the council answers through
    /// [`Self::resolve_proposal`])
    fn file_proposal(&self, agent_id: &str, uri: &str, now_ms: i64) -> String {
        let proposal_id = uuid::Uuid::now_v7().to_string();
        let proposal = PendingProposal {
            proposal_id: proposal_id.clone(),
            agent_id: agent_id.to_string(),
            resource_uri: uri.to_string(),
            bundle: resolve_bundle(uri),
            filed_at: now_ms,
        };
        self.pending.insert(proposal_id.clone(), proposal);

        self.bus.emit_trust(
            agent_id,
            "approval_requested",
            json!({
                "agent_id": agent_id,
                "proposal_id": proposal_id,
                "resource_uri": uri,
            }),
        );
        debug!(agent_id, %proposal_id, uri, "approval proposal filed");
        proposal_id
    }

    /// Pending proposal lookup
    pub fn pending_proposal(&self, proposal_id: &str) -> Option<PendingProposal> {
        self.pending.get(proposal_id).map(|entry| entry.clone())
    }

    /// Council verdict on a filed proposal. Feeds the graduation tracker;
    /// returns the confirmation outcome when the proposal's URI belongs
    /// to a bundle.
    pub fn resolve_proposal(
        &self,
        proposal_id: &str,
        approved: bool,
    ) -> Option<ConfirmationOutcome> {
        let (_, proposal) = self.pending.remove(proposal_id)?;
        info!(
            agent_id = %proposal.agent_id,
            proposal_id,
            approved,
            "proposal resolved"
        );
        self.record_confirmation(&proposal.agent_id, &proposal.resource_uri, approved)
    }

    /// Record a human confirmation directly against a URI's bundle
    pub fn record_confirmation(
        &self,
        agent_id: &str,
        uri: &str,
        approved: bool,
    ) -> Option<ConfirmationOutcome> {
        let bundle = resolve_bundle(uri)?;
        let tracker = self.policy.tracker();
        if approved {
            Some(tracker.record_approval(agent_id, bundle))
        } else {
            tracker.record_rejection(agent_id, bundle);
            Some(ConfirmationOutcome::Recorded)
        }
    }
}
