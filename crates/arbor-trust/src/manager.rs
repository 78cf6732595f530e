//! Trust manager - the single writer turning events into state changes
//!
//! Every external observation enters through [`TrustManager::process_event`]:
//!
//! 1. load (or auto-create) the profile
//! 2. apply the mutation the event type implies
//! 3. recalculate score and tier
//! 4. append the fully-populated event
//! 5. mirror durably (event store's writer task)
//! 6. broadcast on `trust:events` and `trust:{agent_id}` (best-effort)
//! 7. feed the circuit breaker when the event is in its relevant set
//! 8. tier transitions broadcast for the capability-sync subscriber
//!
//! Durable write failures never roll back the in-memory mutation; the
//! event log is authoritative for replay after restart.

use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use arbor_common::config::{ArborConfig, PointsConfig};
use arbor_common::signal::{signal_types, SignalBus};
use arbor_common::{ArborError, Result, TrustEvent, TrustEventType, TrustProfile};

use crate::circuit_breaker::{BreakerAction, BreakerTransition, CircuitBreaker, CircuitState};
use crate::event_store::EventStore;
use crate::profile_store::ProfileStore;

/// Coordinates events into profile updates, event appends, breaker checks,
/// and outbound signals
pub struct TrustManager {
    profiles: Arc<ProfileStore>,
    events: Arc<EventStore>,
    bus: Arc<SignalBus>,
    breaker: Arc<CircuitBreaker>,
    points: PointsConfig,
}

impl TrustManager {
    pub fn new(
        config: &ArborConfig,
        profiles: Arc<ProfileStore>,
        events: Arc<EventStore>,
        bus: Arc<SignalBus>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            profiles,
            events,
            bus,
            breaker,
            points: config.points.clone(),
        }
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Process an event named by string; unknown types are ignored with a
    /// warning (never an error, never a coercion).
    pub async fn process_named(
        &self,
        agent_id: &str,
        event_type: &str,
        metadata: Map<String, Value>,
    ) -> Result<Option<TrustEvent>> {
        match TrustEventType::from_str(event_type) {
            Ok(parsed) => Ok(Some(self.process_event(agent_id, parsed, metadata).await?)),
            Err(_) => {
                warn!(agent_id, event_type, "ignoring unknown trust event type");
                Ok(None)
            }
        }
    }

    /// Full processing pipeline for one event
    #[instrument(skip(self, metadata))]
    pub async fn process_event(
        &self,
        agent_id: &str,
        event_type: TrustEventType,
        metadata: Map<String, Value>,
    ) -> Result<TrustEvent> {
        let before = self.profiles.get_or_create(agent_id).await?;
        let now = Self::now_ms();

        let after = self.apply_mutation(agent_id, event_type, &metadata).await?;

        let mut event = TrustEvent::new(agent_id, event_type, now)
            .with_scores(before.trust_score, after.trust_score)
            .with_tiers(before.tier, after.tier);
        event.metadata = metadata;
        if let Some(reason) = event.metadata.get("reason").and_then(Value::as_str) {
            event.reason = Some(reason.to_string());
        }

        if let Err(e) = self.events.append(event.clone()) {
            // Do not roll back the profile: the mutation already happened
            // and replay dedupes on event id.
            warn!(agent_id, error = %e, "event append failed");
        }

        self.bus.emit_trust(
            agent_id,
            event_type.as_str(),
            serde_json::json!({
                "agent_id": agent_id,
                "event_id": event.id,
                "event_type": event_type,
                "previous_score": before.trust_score,
                "new_score": after.trust_score,
                "previous_tier": before.tier,
                "new_tier": after.tier,
            }),
        );

        if CircuitBreaker::is_relevant(event_type) {
            if let Some(action) = self.breaker.record(agent_id, event_type, now) {
                self.apply_breaker_action(agent_id, action, now).await?;
            }
        }

        debug!(
            agent_id,
            score = after.trust_score,
            tier = %after.tier,
            "event processed"
        );
        Ok(event)
    }

    /// Step 2 of the pipeline: event type to profile mutation
    async fn apply_mutation(
        &self,
        agent_id: &str,
        event_type: TrustEventType,
        metadata: &Map<String, Value>,
    ) -> Result<TrustProfile> {
        match event_type {
            TrustEventType::TrustPointsAwarded => {
                let points = Self::points_from(metadata);
                self.profiles.award_trust_points(agent_id, points).await
            }
            TrustEventType::TrustPointsDeducted => {
                let points = Self::points_from(metadata);
                let reason = metadata
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified");
                self.profiles.deduct_trust_points(agent_id, points, reason).await
            }
            TrustEventType::TrustFrozen => {
                let reason = metadata
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("administrative");
                self.profiles.freeze(agent_id, reason).await
            }
            TrustEventType::TrustUnfrozen => self.profiles.unfreeze(agent_id).await,
            // Derived or engine-owned types carry no mutation here
            TrustEventType::TierChanged
            | TrustEventType::TrustDecayed
            | TrustEventType::ProfileCreated
            | TrustEventType::ProfileDeleted => self.profiles.get(agent_id).await,
            behavioral => {
                let delta = self.points.delta(behavioral);
                self.profiles
                    .apply_trust_event(agent_id, behavioral, delta)
                    .await
            }
        }
    }

    fn points_from(metadata: &Map<String, Value>) -> u64 {
        metadata
            .get("points")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                warn!("points event without a points field; defaulting to 1");
                1
            })
    }

    /// Apply a circuit breaker verdict: freeze or demote
    async fn apply_breaker_action(
        &self,
        agent_id: &str,
        action: BreakerAction,
        now: i64,
    ) -> Result<()> {
        match action {
            BreakerAction::Freeze { reason } => {
                // Serialize freeze -> event -> broadcast so a subsequent
                // authorize observes the denial no later than subscribers
                // observe the signal.
                let profile = self.profiles.freeze(agent_id, &reason).await?;
                info!(agent_id, %reason, "circuit breaker froze profile");

                let event = TrustEvent::new(agent_id, TrustEventType::TrustFrozen, now)
                    .with_scores(profile.trust_score, profile.trust_score)
                    .with_reason(reason.clone());
                if let Err(e) = self.events.append(event) {
                    warn!(agent_id, error = %e, "trust_frozen append failed");
                }

                let payload = serde_json::json!({
                    "agent_id": agent_id,
                    "reason": reason,
                    "tier": profile.tier,
                });
                self.bus.emit_trust(
                    agent_id,
                    signal_types::CIRCUIT_BREAKER_TRIGGERED,
                    payload.clone(),
                );
                self.bus
                    .emit_trust(agent_id, TrustEventType::TrustFrozen.as_str(), payload);
                Ok(())
            }
            BreakerAction::DemoteTier => self.demote_one_tier(agent_id).await,
        }
    }

    /// Drop an agent one tier by clamping both score and points below the
    /// current tier's floor; the profile store emits the transition.
    async fn demote_one_tier(&self, agent_id: &str) -> Result<()> {
        let resolver = self.profiles.resolver().clone();
        self.profiles
            .update_raw(agent_id, move |profile| {
                let Some(lower) = profile.tier.previous() else {
                    return;
                };
                profile.trust_score = profile.trust_score.min(resolver.max_score(lower));
                let current_floor = resolver.min_points(profile.tier);
                profile.trust_points =
                    profile.trust_points.min(current_floor.saturating_sub(1));
                profile.tier = lower;
            })
            .await?;
        Ok(())
    }

    // ---- administrative surface ----

    /// Freeze outside the breaker (operator action)
    pub async fn freeze_agent(&self, agent_id: &str, reason: &str) -> Result<TrustProfile> {
        let mut metadata = Map::new();
        metadata.insert("reason".to_string(), Value::String(reason.to_string()));
        self.process_event(agent_id, TrustEventType::TrustFrozen, metadata)
            .await?;
        self.profiles.get(agent_id).await
    }

    /// Unfreeze and close the breaker (operator action)
    pub async fn unfreeze_agent(&self, agent_id: &str) -> Result<TrustProfile> {
        self.breaker.reset(agent_id);
        self.process_event(agent_id, TrustEventType::TrustUnfrozen, Map::new())
            .await?;
        self.profiles.get(agent_id).await
    }

    /// Breaker state for an agent
    pub fn breaker_state(&self, agent_id: &str) -> CircuitState {
        self.breaker.state(agent_id)
    }

    /// Advance breaker timers; auto-close unfreezes the profile
    pub async fn tick_breakers(&self, now_ms: i64) -> Result<usize> {
        let transitions = self.breaker.tick_all(now_ms);
        let applied = transitions.len();
        for (agent_id, transition) in transitions {
            match transition {
                BreakerTransition::ToHalfOpen => {
                    debug!(agent_id, "circuit half-open; profile stays frozen");
                }
                BreakerTransition::AutoClosed => {
                    let profile = self.profiles.unfreeze(&agent_id).await?;
                    let event =
                        TrustEvent::new(&agent_id, TrustEventType::TrustUnfrozen, now_ms)
                            .with_scores(profile.trust_score, profile.trust_score)
                            .with_reason("circuit auto-close");
                    if let Err(e) = self.events.append(event) {
                        warn!(agent_id, error = %e, "trust_unfrozen append failed");
                    }
                    self.bus.emit_trust(
                        &agent_id,
                        TrustEventType::TrustUnfrozen.as_str(),
                        serde_json::json!({ "agent_id": agent_id, "reason": "circuit auto-close" }),
                    );
                }
            }
        }
        Ok(applied)
    }

    /// Spawn the periodic breaker timer task
    pub fn spawn_breaker_timer(self: Arc<Self>, period_ms: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(period_ms.max(100)));
            loop {
                interval.tick().await;
                if let Err(e) = self.tick_breakers(Self::now_ms()).await {
                    warn!(error = %e, "breaker tick failed");
                }
            }
        })
    }

    /// Delete an agent entirely: profile removed, deletion event appended
    pub async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let profile = self.profiles.get(agent_id).await?;
        self.profiles.delete(agent_id).await?;

        let event = TrustEvent::new(agent_id, TrustEventType::ProfileDeleted, Self::now_ms())
            .with_scores(profile.trust_score, profile.trust_score);
        if let Err(e) = self.events.append(event) {
            warn!(agent_id, error = %e, "profile_deleted append failed");
        }
        self.bus.emit_trust(
            agent_id,
            TrustEventType::ProfileDeleted.as_str(),
            serde_json::json!({ "agent_id": agent_id }),
        );
        Ok(())
    }

    /// Rehydrate profile state by replaying counters from the event log
    /// index after a restart. Events already present are deduplicated by
    /// the append path, so replay is idempotent.
    pub async fn replay_agent(&self, agent_id: &str) -> Result<TrustProfile> {
        match self.profiles.get(agent_id).await {
            Ok(profile) => Ok(profile),
            Err(ArborError::NotFound(_)) => {
                let events = self
                    .events
                    .get_events(&crate::event_store::EventFilter::for_agent(agent_id));
                self.profiles.create(agent_id).await?;
                for event in events {
                    let delta = self.points.delta(event.event_type);
                    let _ = self
                        .profiles
                        .apply_trust_event(agent_id, event.event_type, delta)
                        .await;
                }
                self.profiles.get(agent_id).await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::signal::TRUST_EVENTS_CHANNEL;
    use arbor_common::TrustTier;

    fn manager() -> (TrustManager, Arc<SignalBus>) {
        let config = ArborConfig::default();
        let events = Arc::new(EventStore::in_memory(5000));
        let bus = Arc::new(SignalBus::default());
        let profiles = Arc::new(ProfileStore::new(&config, events.clone(), bus.clone(), None));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        (
            TrustManager::new(&config, profiles, events, bus.clone(), breaker),
            bus,
        )
    }

    #[tokio::test]
    async fn test_auto_creates_missing_profile() {
        let (manager, _bus) = manager();
        let event = manager
            .process_event("new-agent", TrustEventType::ActionSuccess, Map::new())
            .await
            .unwrap();
        assert_eq!(event.agent_id, "new-agent");
        let profile = manager.profiles().get("new-agent").await.unwrap();
        assert_eq!(profile.total_actions, 1);
    }

    #[tokio::test]
    async fn test_event_fully_populated() {
        let (manager, _bus) = manager();
        let event = manager
            .process_event("agent-001", TrustEventType::ActionSuccess, Map::new())
            .await
            .unwrap();
        assert!(event.previous_score.is_some());
        assert!(event.new_score.is_some());
        assert!(event.previous_tier.is_some());
        assert!(event.new_tier.is_some());
        // Appended to the store too
        assert!(manager.events().get_event(&event.id).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_type_ignored() {
        let (manager, _bus) = manager();
        let result = manager
            .process_named("agent-001", "espresso_break", Map::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_points_promotion_scenario() {
        let (manager, _bus) = manager();
        // proposal_approved carries +5 points by default
        for i in 0..5u64 {
            manager
                .process_event("agent-b", TrustEventType::ProposalApproved, Map::new())
                .await
                .unwrap();
            let current = manager.profiles().get("agent-b").await.unwrap();
            assert_eq!(current.trust_points, (i + 1) * 5);
        }

        let profile = manager.profiles().get("agent-b").await.unwrap();
        assert_eq!(profile.trust_points, 25);
        assert_eq!(profile.tier, TrustTier::Probationary);

        let transitions = manager.events().tier_history("agent-b");
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, TrustTier::Untrusted);
        assert_eq!(transitions[0].to, TrustTier::Probationary);
    }

    #[tokio::test]
    async fn test_circuit_breaker_freeze_on_rapid_failures() {
        let (manager, bus) = manager();
        let mut rx = bus.subscribe(TRUST_EVENTS_CHANNEL);

        for _ in 0..5 {
            manager
                .process_event("agent-c", TrustEventType::ActionFailure, Map::new())
                .await
                .unwrap();
        }

        let profile = manager.profiles().get("agent-c").await.unwrap();
        assert!(profile.frozen);
        assert_eq!(profile.frozen_reason.as_deref(), Some("rapid_failures"));
        assert_eq!(manager.breaker_state("agent-c"), CircuitState::Open);

        // A trust_frozen signal went out among the event signals
        let mut saw_frozen = false;
        while let Ok(signal) = rx.try_recv() {
            if signal.signal_type == "trust_frozen" {
                saw_frozen = true;
            }
        }
        assert!(saw_frozen);
    }

    #[tokio::test]
    async fn test_rollback_burst_demotes_one_tier() {
        let (manager, _bus) = manager();
        // Build a trusted agent via points, with margin for the per-event
        // rollback deductions
        let mut metadata = Map::new();
        metadata.insert("points".to_string(), Value::from(150u64));
        manager
            .process_event("agent-r", TrustEventType::TrustPointsAwarded, metadata)
            .await
            .unwrap();
        assert_eq!(
            manager.profiles().get("agent-r").await.unwrap().tier,
            TrustTier::Trusted
        );

        for _ in 0..3 {
            manager
                .process_event("agent-r", TrustEventType::RollbackExecuted, Map::new())
                .await
                .unwrap();
        }

        let profile = manager.profiles().get("agent-r").await.unwrap();
        assert_eq!(profile.tier, TrustTier::Probationary);
        assert!(!profile.frozen);
        assert!(profile.trust_points < 100);
    }

    #[tokio::test]
    async fn test_auto_close_unfreezes() {
        let (manager, _bus) = manager();
        for _ in 0..5 {
            manager
                .process_event("agent-c", TrustEventType::ActionFailure, Map::new())
                .await
                .unwrap();
        }
        assert!(manager.profiles().get("agent-c").await.unwrap().frozen);

        let now = TrustManager::now_ms();
        manager.tick_breakers(now + 86_400_000 + 1_000).await.unwrap();
        assert_eq!(manager.breaker_state("agent-c"), CircuitState::HalfOpen);
        assert!(manager.profiles().get("agent-c").await.unwrap().frozen);

        manager
            .tick_breakers(now + 86_400_000 + 3_600_000 + 2_000)
            .await
            .unwrap();
        assert_eq!(manager.breaker_state("agent-c"), CircuitState::Closed);
        assert!(!manager.profiles().get("agent-c").await.unwrap().frozen);
    }

    #[tokio::test]
    async fn test_admin_unfreeze_resets_breaker() {
        let (manager, _bus) = manager();
        for _ in 0..5 {
            manager
                .process_event("agent-c", TrustEventType::ActionFailure, Map::new())
                .await
                .unwrap();
        }
        manager.unfreeze_agent("agent-c").await.unwrap();
        assert_eq!(manager.breaker_state("agent-c"), CircuitState::Closed);
        assert!(!manager.profiles().get("agent-c").await.unwrap().frozen);
    }

    #[tokio::test]
    async fn test_delete_agent() {
        let (manager, _bus) = manager();
        manager
            .process_event("agent-x", TrustEventType::ActionSuccess, Map::new())
            .await
            .unwrap();
        manager.delete_agent("agent-x").await.unwrap();
        assert!(manager.profiles().get("agent-x").await.is_err());
        // Deletion is recorded
        let events = manager.events().get_events(&crate::event_store::EventFilter {
            agent_id: Some("agent-x".to_string()),
            event_type: Some(TrustEventType::ProfileDeleted),
            ..Default::default()
        });
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_rebuilds_counters() {
        let (manager, _bus) = manager();
        manager
            .process_event("agent-z", TrustEventType::ActionSuccess, Map::new())
            .await
            .unwrap();
        manager
            .process_event("agent-z", TrustEventType::TestPassed, Map::new())
            .await
            .unwrap();
        // Simulate a restart losing the profile but keeping the event index
        manager.profiles().delete("agent-z").await.unwrap();

        let profile = manager.replay_agent("agent-z").await.unwrap();
        assert_eq!(profile.total_actions, 1);
        assert_eq!(profile.tests_passed, 1);
    }
}
