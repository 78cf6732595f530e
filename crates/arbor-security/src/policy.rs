//! Capability policy
//!
//! Binds tiers to capability templates, answers the authorization
//! questions (`allowed`, `requires_approval`, `confirmation_mode`), and
//! owns tier-driven capability issuance and synchronization.
//!
//! The question-answering surface reads only in-process state (profile
//! cache, template tables, capability index, tracker) and never awaits;
//! missing state fails closed.

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use arbor_common::config::{CapabilityConfig, CapabilityTemplate};
use arbor_common::signal::{signal_types, SignalBus};
use arbor_common::{
    resolve_self, uri_matches, CapabilitySource, ConfirmationMode, Result, TrustTier, ALL_TIERS,
};
use arbor_trust::ProfileStore;

use crate::graduation::ConfirmationTracker;
use crate::matrix::{resolve_bundle, ConfirmationMatrix};
use crate::store::CapabilityStore;

/// Result of a tier capability synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub granted: usize,
    pub revoked: usize,
    pub effective_tier: TrustTier,
}

/// Tier-template policy over the capability store
pub struct CapabilityPolicy {
    config: CapabilityConfig,
    store: Arc<CapabilityStore>,
    profiles: Arc<ProfileStore>,
    matrix: ConfirmationMatrix,
    tracker: Arc<ConfirmationTracker>,
    bus: Arc<SignalBus>,
    /// Reserved per-agent tier caps; absent means no ceiling
    ceilings: DashMap<String, TrustTier>,
}

impl CapabilityPolicy {
    pub fn new(
        config: CapabilityConfig,
        matrix: ConfirmationMatrix,
        store: Arc<CapabilityStore>,
        profiles: Arc<ProfileStore>,
        tracker: Arc<ConfirmationTracker>,
        bus: Arc<SignalBus>,
    ) -> Self {
        Self {
            config,
            store,
            profiles,
            matrix,
            tracker,
            bus,
            ceilings: DashMap::new(),
        }
    }

    pub fn matrix(&self) -> &ConfirmationMatrix {
        &self.matrix
    }

    pub fn config(&self) -> &CapabilityConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ConfirmationTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    // ---- tier questions ----

    /// Reserved future per-agent cap on authority
    pub fn set_policy_ceiling(&self, agent_id: &str, ceiling: TrustTier) {
        self.ceilings.insert(agent_id.to_string(), ceiling);
    }

    pub fn clear_policy_ceiling(&self, agent_id: &str) {
        self.ceilings.remove(agent_id);
    }

    /// `min(behavioral tier, policy ceiling)` from the profile cache;
    /// `None` when the profile is not resident (callers fail closed)
    pub fn effective_tier(&self, agent_id: &str) -> Option<TrustTier> {
        let profile = self.profiles.get_cached(agent_id)?;
        let ceiling = self
            .ceilings
            .get(agent_id)
            .map(|entry| *entry.value())
            .unwrap_or(TrustTier::Autonomous);
        Some(profile.tier.min(ceiling))
    }

    // ---- template questions ----

    fn template_for<'a>(
        &'a self,
        templates: &'a [CapabilityTemplate],
        agent_id: &str,
        uri: &str,
    ) -> Option<&'a CapabilityTemplate> {
        // An unconstrained template beats a gated one for the same URI
        let mut best: Option<&CapabilityTemplate> = None;
        for template in templates {
            let resolved = resolve_self(&template.resource_uri, agent_id);
            if !uri_matches(&resolved, uri) {
                continue;
            }
            match best {
                None => best = Some(template),
                Some(current)
                    if current.constraints.requires_approval
                        && !template.constraints.requires_approval =>
                {
                    best = Some(template)
                }
                _ => {}
            }
        }
        best
    }

    /// Whether any template at the agent's effective tier covers the URI
    pub fn allowed(&self, agent_id: &str, uri: &str) -> bool {
        let Some(tier) = self.effective_tier(agent_id) else {
            return false;
        };
        let templates = self.config.effective_templates(tier);
        self.template_for(&templates, agent_id, uri).is_some()
    }

    /// Whether the covering template requires human approval; `None` when
    /// nothing covers the URI at this tier
    pub fn requires_approval(&self, agent_id: &str, uri: &str) -> Option<bool> {
        let tier = self.effective_tier(agent_id)?;
        let templates = self.config.effective_templates(tier);
        self.template_for(&templates, agent_id, uri)
            .map(|template| template.constraints.requires_approval)
    }

    /// Lowest tier whose templates cover the URI; `None` if no tier ever
    /// grants it
    pub fn min_tier_for(&self, agent_id: &str, uri: &str) -> Option<TrustTier> {
        ALL_TIERS.into_iter().find(|tier| {
            let templates = self.config.effective_templates(*tier);
            self.template_for(&templates, agent_id, uri).is_some()
        })
    }

    // ---- confirmation mode ----

    /// The human-in-the-loop decision for this agent and URI. Bundled URIs
    /// go through the matrix with graduation applied; unbundled URIs fall
    /// back to the covering template's constraints. Unknown agents deny.
    pub fn confirmation_mode(&self, agent_id: &str, uri: &str) -> ConfirmationMode {
        let Some(tier) = self.effective_tier(agent_id) else {
            return ConfirmationMode::Deny;
        };

        if let Some(bundle) = resolve_bundle(uri) {
            let mode = self.matrix.mode(bundle, tier.policy_tier());
            if mode == ConfirmationMode::Gated && self.tracker.graduated(agent_id, bundle) {
                return ConfirmationMode::Auto;
            }
            return mode;
        }

        // Unbundled URI: template-derived mode
        let templates = self.config.effective_templates(tier);
        match self.template_for(&templates, agent_id, uri) {
            None => ConfirmationMode::Deny,
            Some(template) if template.constraints.requires_approval => ConfirmationMode::Gated,
            Some(_) => ConfirmationMode::Auto,
        }
    }

    // ---- tier capability issuance ----

    /// Issue every template capability for the tier, marked trust-sourced
    #[instrument(skip(self))]
    pub async fn grant_tier_capabilities(&self, agent_id: &str, tier: TrustTier) -> Result<usize> {
        let templates = self.config.effective_templates(tier);
        let mut granted = 0;
        for template in &templates {
            let uri = resolve_self(&template.resource_uri, agent_id);
            match self.store.grant(
                agent_id,
                &uri,
                template.constraints.clone(),
                CapabilitySource::TrustTier,
                None,
            ) {
                Ok(_) => granted += 1,
                Err(e) => warn!(agent_id, %uri, error = %e, "tier grant failed"),
            }
        }

        self.bus.emit_trust(
            agent_id,
            signal_types::CAPABILITIES_GRANTED,
            json!({ "agent_id": agent_id, "tier": tier, "count": granted }),
        );
        info!(agent_id, %tier, granted, "tier capabilities granted");
        Ok(granted)
    }

    /// Revoke-then-grant synchronization after a tier change. The ordering
    /// accepts a transient window with fewer capabilities (fail-closed).
    /// Idempotent: replaying the same sync converges on the same set.
    #[instrument(skip(self))]
    pub async fn sync_capabilities(
        &self,
        agent_id: &str,
        old_tier: TrustTier,
        new_tier: TrustTier,
    ) -> Result<SyncOutcome> {
        let revoked = self.store.revoke_by_source(
            agent_id,
            &[CapabilitySource::TrustTier, CapabilitySource::TierPromotion],
        );
        let granted = self.grant_tier_capabilities(agent_id, new_tier).await?;

        if new_tier < old_tier {
            // Demotion forfeits earned graduations
            self.tracker.reset(agent_id);
        }

        self.bus.emit_trust(
            agent_id,
            signal_types::TIER_CAPABILITIES_SYNCED,
            json!({
                "agent_id": agent_id,
                "old_tier": old_tier,
                "new_tier": new_tier,
                "granted": granted,
                "revoked": revoked,
            }),
        );

        Ok(SyncOutcome {
            granted,
            revoked,
            effective_tier: new_tier,
        })
    }

    /// Strip every capability the agent holds; returns the count
    pub fn revoke_agent_capabilities(&self, agent_id: &str) -> usize {
        self.store.revoke_all(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::config::{ArborConfig, ConfirmationConfig};
    use arbor_common::ResourceBundle;
    use arbor_trust::EventStore;

    use crate::signing::CapabilitySigner;

    struct Fixture {
        policy: CapabilityPolicy,
        profiles: Arc<ProfileStore>,
        store: Arc<CapabilityStore>,
        tracker: Arc<ConfirmationTracker>,
    }

    fn fixture() -> Fixture {
        let config = ArborConfig::default();
        let bus = Arc::new(SignalBus::default());
        let events = Arc::new(EventStore::in_memory(1000));
        let profiles = Arc::new(ProfileStore::new(&config, events, bus.clone(), None));
        let store = Arc::new(CapabilityStore::new(
            CapabilitySigner::generate("arbor-policy"),
            bus.clone(),
            config.capabilities.max_delegation_depth,
            config.capabilities.max_capabilities_per_agent,
        ));
        let tracker = Arc::new(ConfirmationTracker::new(
            ConfirmationConfig::default(),
            bus.clone(),
        ));
        let policy = CapabilityPolicy::new(
            config.capabilities.clone(),
            ConfirmationMatrix::default(),
            store.clone(),
            profiles.clone(),
            tracker.clone(),
            bus,
        );
        Fixture {
            policy,
            profiles,
            store,
            tracker,
        }
    }

    async fn agent_at(fixture: &Fixture, agent_id: &str, tier: TrustTier) {
        fixture.profiles.create(agent_id).await.unwrap();
        fixture
            .profiles
            .update_raw(agent_id, move |profile| profile.tier = tier)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_allowed_follows_templates() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Untrusted).await;

        assert!(fixture.policy.allowed("a", "arbor://code/read/a/lib.rs"));
        assert!(!fixture.policy.allowed("a", "arbor://code/write/a/lib.rs"));
        // Other agents' code is out of scope at any tier's self templates
        assert!(!fixture.policy.allowed("a", "arbor://code/read/b/lib.rs"));
    }

    #[tokio::test]
    async fn test_unknown_agent_fails_closed() {
        let fixture = fixture();
        assert!(!fixture.policy.allowed("ghost", "arbor://code/read/ghost/x"));
        assert_eq!(
            fixture.policy.confirmation_mode("ghost", "arbor://code/read/ghost/x"),
            ConfirmationMode::Deny
        );
    }

    #[tokio::test]
    async fn test_policy_ceiling_caps_tier() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Autonomous).await;
        assert_eq!(fixture.policy.effective_tier("a"), Some(TrustTier::Autonomous));

        fixture.policy.set_policy_ceiling("a", TrustTier::Trusted);
        assert_eq!(fixture.policy.effective_tier("a"), Some(TrustTier::Trusted));

        fixture.policy.clear_policy_ceiling("a");
        assert_eq!(fixture.policy.effective_tier("a"), Some(TrustTier::Autonomous));
    }

    #[tokio::test]
    async fn test_requires_approval_from_template() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Probationary).await;
        // Probationary write template is gated
        assert_eq!(
            fixture.policy.requires_approval("a", "arbor://code/write/a/x.rs"),
            Some(true)
        );
        assert_eq!(
            fixture.policy.requires_approval("a", "arbor://code/read/a/x.rs"),
            Some(false)
        );
        assert_eq!(
            fixture.policy.requires_approval("a", "arbor://governance/change/x"),
            None
        );
    }

    #[tokio::test]
    async fn test_min_tier_for() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Untrusted).await;
        assert_eq!(
            fixture.policy.min_tier_for("a", "arbor://code/read/a/x"),
            Some(TrustTier::Untrusted)
        );
        assert_eq!(
            fixture.policy.min_tier_for("a", "arbor://code/write/a/x"),
            Some(TrustTier::Probationary)
        );
        assert_eq!(
            fixture.policy.min_tier_for("a", "arbor://governance/change/x"),
            Some(TrustTier::Autonomous)
        );
        assert_eq!(fixture.policy.min_tier_for("a", "arbor://memory/read/x"), None);
    }

    #[tokio::test]
    async fn test_confirmation_mode_matrix_and_graduation() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Trusted).await;
        let uri = "arbor://code/write/a/x.rs";

        // standard × codebase_write = gated
        assert_eq!(fixture.policy.confirmation_mode("a", uri), ConfirmationMode::Gated);

        for _ in 0..3 {
            fixture.tracker.record_approval("a", ResourceBundle::CodebaseWrite);
        }
        assert_eq!(fixture.policy.confirmation_mode("a", uri), ConfirmationMode::Auto);

        fixture.tracker.record_rejection("a", ResourceBundle::CodebaseWrite);
        assert_eq!(fixture.policy.confirmation_mode("a", uri), ConfirmationMode::Gated);
    }

    #[tokio::test]
    async fn test_graduation_never_unlocks_shell() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Autonomous).await;
        for _ in 0..50 {
            fixture.tracker.record_approval("a", ResourceBundle::Shell);
        }
        assert_eq!(
            fixture.policy.confirmation_mode("a", "arbor://shell/exec/a/ls"),
            ConfirmationMode::Gated
        );
    }

    #[tokio::test]
    async fn test_unbundled_uri_falls_back_to_templates() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Untrusted).await;
        // signals/subscribe is bundled (network); pick a genuinely
        // unbundled URI that no template covers
        assert_eq!(
            fixture.policy.confirmation_mode("a", "arbor://memory/read/a/notes"),
            ConfirmationMode::Deny
        );
    }

    #[tokio::test]
    async fn test_grant_tier_capabilities() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Probationary).await;
        let granted = fixture
            .policy
            .grant_tier_capabilities("a", TrustTier::Probationary)
            .await
            .unwrap();
        assert!(granted > 0);

        let capabilities = fixture.store.list_active("a");
        assert_eq!(capabilities.len(), granted);
        assert!(capabilities
            .iter()
            .all(|c| c.source == CapabilitySource::TrustTier));
        // Self templates resolved to the agent id
        assert!(capabilities
            .iter()
            .any(|c| c.resource_uri == "arbor://code/read/a/*"));
    }

    #[tokio::test]
    async fn test_sync_revoke_then_grant_exact_set() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Probationary).await;
        fixture
            .policy
            .grant_tier_capabilities("a", TrustTier::Probationary)
            .await
            .unwrap();
        // An explicit grant survives the sync
        fixture
            .store
            .grant(
                "a",
                "arbor://network/request/special",
                arbor_common::Constraints::none(),
                CapabilitySource::ExplicitGrant,
                None,
            )
            .unwrap();

        let outcome = fixture
            .policy
            .sync_capabilities("a", TrustTier::Probationary, TrustTier::Trusted)
            .await
            .unwrap();
        assert!(outcome.revoked > 0);
        assert_eq!(outcome.effective_tier, TrustTier::Trusted);

        let active = fixture.store.list_active("a");
        let trust_sourced: Vec<_> = active
            .iter()
            .filter(|c| c.source == CapabilitySource::TrustTier)
            .collect();
        // Exactly the trusted template set, no stale probationary leftovers
        let expected = fixture
            .policy
            .config()
            .effective_templates(TrustTier::Trusted)
            .len();
        assert_eq!(trust_sourced.len(), expected);
        assert!(active
            .iter()
            .any(|c| c.source == CapabilitySource::ExplicitGrant));
    }

    #[tokio::test]
    async fn test_sync_demotion_resets_graduations() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Trusted).await;
        for _ in 0..3 {
            fixture.tracker.record_approval("a", ResourceBundle::CodebaseWrite);
        }
        assert!(fixture.tracker.graduated("a", ResourceBundle::CodebaseWrite));

        fixture
            .policy
            .sync_capabilities("a", TrustTier::Trusted, TrustTier::Probationary)
            .await
            .unwrap();
        assert!(!fixture.tracker.graduated("a", ResourceBundle::CodebaseWrite));
    }

    #[tokio::test]
    async fn test_sync_idempotent() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Trusted).await;

        fixture
            .policy
            .sync_capabilities("a", TrustTier::Probationary, TrustTier::Trusted)
            .await
            .unwrap();
        let first: usize = fixture
            .store
            .list_active("a")
            .iter()
            .filter(|c| c.source == CapabilitySource::TrustTier)
            .count();

        // Replaying the same sync converges on the same set size
        fixture
            .policy
            .sync_capabilities("a", TrustTier::Probationary, TrustTier::Trusted)
            .await
            .unwrap();
        let second: usize = fixture
            .store
            .list_active("a")
            .iter()
            .filter(|c| c.source == CapabilitySource::TrustTier)
            .count();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_revoke_agent_capabilities() {
        let fixture = fixture();
        agent_at(&fixture, "a", TrustTier::Trusted).await;
        fixture
            .policy
            .grant_tier_capabilities("a", TrustTier::Trusted)
            .await
            .unwrap();
        let revoked = fixture.policy.revoke_agent_capabilities("a");
        assert!(revoked > 0);
        assert!(fixture.store.list_active("a").is_empty());
    }
}
