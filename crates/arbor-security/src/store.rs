//! Capability store
//!
//! Owns every live capability. Grants and revocations serialize per
//! principal through the sharded map's entry locks; the lookup path
//! (`find_matching`) is read-concurrent and never awaits, which keeps the
//! hot authorization path allocation-light and lock-brief.

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use arbor_common::signal::{signal_types, SignalBus};
use arbor_common::{
    resolve_self, ArborError, Capability, CapabilityError, CapabilitySource, Constraints,
    DelegationLink, DenyReason, Result,
};

use crate::signing::CapabilitySigner;

/// Capability store with signed grants and mediated delegation
pub struct CapabilityStore {
    /// principal -> capabilities (live and revoked; revoked kept inert)
    by_principal: DashMap<String, Vec<Capability>>,
    /// capability id -> principal, for O(1) revocation by id
    owners: DashMap<String, String>,
    /// capability id -> recent use timestamps, for rate-limit constraints
    usage: DashMap<String, Vec<i64>>,
    signer: CapabilitySigner,
    bus: Arc<SignalBus>,
    max_delegation_depth: u8,
    max_capabilities_per_agent: usize,
}

impl CapabilityStore {
    pub fn new(
        signer: CapabilitySigner,
        bus: Arc<SignalBus>,
        max_delegation_depth: u8,
        max_capabilities_per_agent: usize,
    ) -> Self {
        Self {
            by_principal: DashMap::new(),
            owners: DashMap::new(),
            usage: DashMap::new(),
            signer,
            bus,
            max_delegation_depth,
            max_capabilities_per_agent,
        }
    }

    pub fn signer(&self) -> &CapabilitySigner {
        &self.signer
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    // ---- grants ----

    /// Issue a signed capability to a principal
    pub fn grant(
        &self,
        principal_id: &str,
        resource_uri: &str,
        constraints: Constraints,
        source: CapabilitySource,
        expires_at: Option<i64>,
    ) -> Result<Capability> {
        let mut entry = self.by_principal.entry(principal_id.to_string()).or_default();

        let live = entry.iter().filter(|c| !c.revoked).count();
        if live >= self.max_capabilities_per_agent {
            return Err(ArborError::Capability(CapabilityError::ConstraintViolated {
                kind: "capability_quota".to_string(),
                context: format!("{} live capabilities", live),
            }));
        }

        let mut capability = Capability {
            id: uuid::Uuid::now_v7().to_string(),
            principal_id: principal_id.to_string(),
            resource_uri: resource_uri.to_string(),
            constraints,
            issued_at: Self::now_ms(),
            expires_at,
            delegation_depth: self.max_delegation_depth,
            issuer_id: String::new(),
            delegation_chain: vec![],
            source,
            signature: String::new(),
            revoked: false,
        };
        self.signer.sign_capability(&mut capability);

        self.owners
            .insert(capability.id.clone(), principal_id.to_string());
        entry.push(capability.clone());
        debug!(principal_id, uri = resource_uri, %source, "capability granted");
        Ok(capability)
    }

    /// Delegate an existing capability to another principal. The new grant
    /// carries the extended, authority-signed chain and one less hop of
    /// remaining depth.
    pub fn delegate(
        &self,
        capability_id: &str,
        delegate_id: &str,
    ) -> Result<Capability> {
        let parent = self
            .get(capability_id)
            .ok_or_else(|| ArborError::Capability(CapabilityError::NotFound(capability_id.to_string())))?;
        let now = Self::now_ms();

        if !parent.is_active(now) {
            return Err(ArborError::Capability(CapabilityError::Revoked(
                capability_id.to_string(),
            )));
        }
        if parent.delegation_depth == 0 {
            return Err(ArborError::Capability(CapabilityError::DelegationDepthExceeded {
                depth: parent.delegation_chain.len() as u8 + 1,
                max: self.max_delegation_depth,
            }));
        }

        let parent_digest = parent
            .delegation_chain
            .last()
            .map(|link| hex::encode(link.digest()))
            .unwrap_or_default();

        let mut chain = parent.delegation_chain.clone();
        let mut link = DelegationLink {
            delegator_id: parent.principal_id.clone(),
            delegate_id: delegate_id.to_string(),
            capability_id: parent.id.clone(),
            delegated_at: now,
            parent_digest,
            signature: String::new(),
        };
        self.signer.sign_link(&mut link);
        chain.push(link);

        let mut capability = Capability {
            id: uuid::Uuid::now_v7().to_string(),
            principal_id: delegate_id.to_string(),
            resource_uri: parent.resource_uri.clone(),
            constraints: parent.constraints.clone(),
            issued_at: now,
            expires_at: parent.expires_at,
            delegation_depth: parent.delegation_depth - 1,
            issuer_id: String::new(),
            delegation_chain: chain,
            source: CapabilitySource::Delegation,
            signature: String::new(),
            revoked: false,
        };
        self.signer.sign_capability(&mut capability);

        self.owners
            .insert(capability.id.clone(), delegate_id.to_string());
        self.by_principal
            .entry(delegate_id.to_string())
            .or_default()
            .push(capability.clone());

        info!(
            from = %parent.principal_id,
            to = delegate_id,
            uri = %capability.resource_uri,
            "capability delegated"
        );
        Ok(capability)
    }

    // ---- revocation ----

    /// Revoke a capability by id; permanently inert afterward
    pub fn revoke(&self, capability_id: &str) -> Result<()> {
        let principal = self
            .owners
            .get(capability_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ArborError::Capability(CapabilityError::NotFound(capability_id.to_string()))
            })?;

        let mut entry = self.by_principal.entry(principal).or_default();
        match entry.iter_mut().find(|c| c.id == capability_id) {
            Some(capability) => {
                capability.revoked = true;
                self.usage.remove(capability_id);
                debug!(capability_id, "capability revoked");
                Ok(())
            }
            None => Err(ArborError::Capability(CapabilityError::NotFound(
                capability_id.to_string(),
            ))),
        }
    }

    /// Revoke every live capability a principal holds from the given
    /// sources; returns how many were revoked
    pub fn revoke_by_source(&self, principal_id: &str, sources: &[CapabilitySource]) -> usize {
        let Some(mut entry) = self.by_principal.get_mut(principal_id) else {
            return 0;
        };
        let mut revoked = 0;
        for capability in entry.iter_mut() {
            if !capability.revoked && sources.contains(&capability.source) {
                capability.revoked = true;
                self.usage.remove(&capability.id);
                revoked += 1;
            }
        }
        if revoked > 0 {
            self.bus.emit_trust(
                principal_id,
                signal_types::CAPABILITIES_REVOKED,
                json!({ "agent_id": principal_id, "count": revoked }),
            );
        }
        revoked
    }

    /// Revoke everything a principal holds
    pub fn revoke_all(&self, principal_id: &str) -> usize {
        self.revoke_by_source(
            principal_id,
            &[
                CapabilitySource::TrustTier,
                CapabilitySource::TierPromotion,
                CapabilitySource::ExplicitGrant,
                CapabilitySource::Delegation,
            ],
        )
    }

    // ---- lookup ----

    /// All capabilities a principal holds, live ones first
    pub fn list(&self, principal_id: &str) -> Vec<Capability> {
        self.by_principal
            .get(principal_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Live capabilities a principal holds
    pub fn list_active(&self, principal_id: &str) -> Vec<Capability> {
        let now = Self::now_ms();
        self.list(principal_id)
            .into_iter()
            .filter(|c| c.is_active(now))
            .collect()
    }

    /// Fetch one capability by id
    pub fn get(&self, capability_id: &str) -> Option<Capability> {
        let principal = self.owners.get(capability_id)?.value().clone();
        self.by_principal
            .get(&principal)?
            .iter()
            .find(|c| c.id == capability_id)
            .cloned()
    }

    /// Best active capability covering the URI: an unconstrained match
    /// beats one requiring approval. Never awaits.
    pub fn find_matching(&self, principal_id: &str, uri: &str, now_ms: i64) -> Option<Capability> {
        let entry = self.by_principal.get(principal_id)?;
        let mut best: Option<&Capability> = None;
        for capability in entry.iter() {
            if !capability.is_active(now_ms) || !capability.matches_uri(uri) {
                continue;
            }
            match best {
                None => best = Some(capability),
                Some(current)
                    if current.constraints.requires_approval
                        && !capability.constraints.requires_approval =>
                {
                    best = Some(capability)
                }
                _ => {}
            }
        }
        best.cloned()
    }

    // ---- constraint enforcement ----

    /// Enforce a capability's constraints for one use of `uri` at
    /// `now_ms`. Rate-limited capabilities record the use on success.
    pub fn check_constraints(
        &self,
        capability: &Capability,
        uri: &str,
        now_ms: i64,
    ) -> std::result::Result<(), DenyReason> {
        if capability.revoked {
            return Err(DenyReason::CapabilityNotFound {
                capability_id: capability.id.clone(),
            });
        }
        if capability.is_expired(now_ms) {
            return Err(DenyReason::CapabilityExpired {
                capability_id: capability.id.clone(),
            });
        }

        if let Some(window) = &capability.constraints.time_window {
            let hour = chrono::TimeZone::timestamp_millis_opt(&chrono::Utc, now_ms)
                .single()
                .map(|t| chrono::Timelike::hour(&t) as u8)
                .unwrap_or(0);
            if !window.contains_hour(hour) {
                return Err(DenyReason::ConstraintViolated {
                    kind: "time_window".to_string(),
                    context: format!("hour {} outside {}..{}", hour, window.start_hour, window.end_hour),
                });
            }
        }

        if !capability.constraints.allowed_paths.is_empty() {
            let target = uri
                .rsplit_once("://")
                .map(|(_, rest)| rest)
                .unwrap_or(uri);
            let path_ok = capability
                .constraints
                .allowed_paths
                .iter()
                .any(|allowed| target.starts_with(allowed.as_str()));
            if !path_ok {
                return Err(DenyReason::ConstraintViolated {
                    kind: "path".to_string(),
                    context: uri.to_string(),
                });
            }
        }

        if let Some(rate) = &capability.constraints.rate_limit {
            let cutoff = now_ms - (rate.window_seconds as i64) * 1_000;
            let mut window = self.usage.entry(capability.id.clone()).or_default();
            window.retain(|ts| *ts >= cutoff);
            if window.len() as u32 >= rate.max_requests {
                return Err(DenyReason::ConstraintViolated {
                    kind: "rate_limit".to_string(),
                    context: format!("{} uses in {}s", window.len(), rate.window_seconds),
                });
            }
            window.push(now_ms);
        }

        Ok(())
    }

    /// Verify a capability's grant signature and delegation chain
    pub fn verify(&self, capability: &Capability) -> std::result::Result<(), DenyReason> {
        if let Err(e) = self.signer.verify_capability(capability) {
            warn!(capability_id = %capability.id, error = %e, "grant signature invalid");
            return Err(DenyReason::InvalidCapabilitySignature {
                capability_id: capability.id.clone(),
            });
        }
        if let Err(e) = self
            .signer
            .verify_chain(capability, self.max_delegation_depth)
        {
            warn!(capability_id = %capability.id, error = %e, "delegation chain invalid");
            return Err(match e {
                CapabilityError::DelegationDepthExceeded { .. } => DenyReason::QuotaExceeded {
                    quota_type: "delegation_depth".to_string(),
                    context: capability.id.clone(),
                },
                other => DenyReason::BrokenDelegationChain {
                    detail: other.to_string(),
                },
            });
        }
        Ok(())
    }

    /// `agent_id` resolved variant of a template URI
    pub fn resolve_template_uri(template: &str, agent_id: &str) -> String {
        resolve_self(template, agent_id)
    }
}
