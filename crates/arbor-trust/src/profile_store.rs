//! Profile store - lifecycle and caching for trust profiles
//!
//! Owns every profile in the process. Reads go through a TTL cache over an
//! optional durable backend; writes advance the cache immediately and
//! flush to the backend asynchronously with retries (fail-forward, the
//! event log is authoritative for replay). Updates on one agent are
//! serialized; different agents update in parallel.
//!
//! The store owns exactly one event emission: a detected tier transition
//! appends a `tier_changed` event and broadcasts it. Everything else is
//! the manager's job.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use arbor_common::config::{ArborConfig, RetryConfig};
use arbor_common::persistence::KeyValueStore;
use arbor_common::signal::SignalBus;
use arbor_common::{
    ArborError, Result, TrustEvent, TrustEventType, TrustProfile, TrustTier,
};

use crate::event_store::EventStore;
use crate::score::ScoreCalculator;
use crate::tier::TierResolver;

/// Backend store name for profile records
const PROFILE_STORE_NAME: &str = "trust_profiles";

/// Sort key for [`ProfileStore::list`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileOrder {
    #[default]
    TrustScore,
    UpdatedAt,
    CreatedAt,
}

/// Filters for [`ProfileStore::list`]
#[derive(Debug, Clone, Default)]
pub struct ProfileFilter {
    pub tier: Option<TrustTier>,
    pub frozen: Option<bool>,
    pub limit: Option<usize>,
    pub order_by: ProfileOrder,
}

struct CacheEntry {
    profile: TrustProfile,
    cached_at: i64,
}

/// Cached, optionally write-through profile store
pub struct ProfileStore {
    cache: RwLock<HashMap<String, CacheEntry>>,
    /// Per-agent update serialization
    locks: DashMap<String, Arc<Mutex<()>>>,
    backend: Option<Arc<dyn KeyValueStore>>,
    events: Arc<EventStore>,
    bus: Arc<SignalBus>,
    calculator: ScoreCalculator,
    resolver: TierResolver,
    cache_ttl_ms: i64,
    promotion_evidence_min: u64,
    retry: RetryConfig,
    collaborator_timeout: std::time::Duration,
}

impl ProfileStore {
    pub fn new(
        config: &ArborConfig,
        events: Arc<EventStore>,
        bus: Arc<SignalBus>,
        backend: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            locks: DashMap::new(),
            backend,
            events,
            bus,
            calculator: ScoreCalculator::new(config.score_weights),
            resolver: TierResolver::new(config.tiers.clone()),
            cache_ttl_ms: (config.profile_cache_ttl_seconds as i64) * 1_000,
            promotion_evidence_min: config.tiers.promotion_evidence_min,
            retry: config.retry,
            collaborator_timeout: std::time::Duration::from_millis(
                config.collaborator_timeout_ms.max(1),
            ),
        }
    }

    pub fn resolver(&self) -> &TierResolver {
        &self.resolver
    }

    pub fn calculator(&self) -> &ScoreCalculator {
        &self.calculator
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn agent_lock(&self, agent_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Observed behavioral events backing the score-derived tier. Keeps a
    /// zero-history agent at the bottom tier until it has earned evidence.
    fn evidence(profile: &TrustProfile) -> u64 {
        profile.total_actions
            + profile.total_tests
            + profile.improvement_count
            + profile.installations_successful
    }

    /// Tier from both accountings, with the evidence gate on the score side
    fn assigned_tier(&self, profile: &TrustProfile) -> TrustTier {
        let score_tier = if Self::evidence(profile) >= self.promotion_evidence_min {
            self.resolver.resolve(profile.trust_score)
        } else {
            TrustTier::Untrusted
        };
        let points_tier = self.resolver.resolve_points(profile.trust_points);
        score_tier.max(points_tier)
    }

    // ---- lifecycle ----

    /// Create a fresh profile; errors if the agent already has one
    pub async fn create(&self, agent_id: &str) -> Result<TrustProfile> {
        let _guard = self.agent_lock(agent_id).lock_owned().await;
        if self.peek(agent_id).is_some() || self.load_backend(agent_id).await?.is_some() {
            return Err(ArborError::AlreadyExists(format!("profile {}", agent_id)));
        }

        let profile = TrustProfile::new(agent_id, Self::now_ms());
        self.store(profile.clone());
        self.persist(profile.clone());
        info!(agent_id, "trust profile created");
        Ok(profile)
    }

    /// Fetch a profile: cache first, then backend with write-through
    pub async fn get(&self, agent_id: &str) -> Result<TrustProfile> {
        if let Some(profile) = self.peek(agent_id) {
            return Ok(profile);
        }
        match self.load_backend(agent_id).await? {
            Some(profile) => {
                self.store(profile.clone());
                Ok(profile)
            }
            None => Err(ArborError::NotFound(format!("profile {}", agent_id))),
        }
    }

    /// Fetch, creating a default profile when absent
    pub async fn get_or_create(&self, agent_id: &str) -> Result<TrustProfile> {
        match self.get(agent_id).await {
            Ok(profile) => Ok(profile),
            Err(ArborError::NotFound(_)) => match self.create(agent_id).await {
                Ok(profile) => Ok(profile),
                // Lost a create race; the winner's profile is fine
                Err(ArborError::AlreadyExists(_)) => self.get(agent_id).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Remove a profile entirely
    pub async fn delete(&self, agent_id: &str) -> Result<()> {
        let _guard = self.agent_lock(agent_id).lock_owned().await;
        let existed = self.cache.write().remove(agent_id).is_some();
        if let Some(backend) = &self.backend {
            backend.delete(PROFILE_STORE_NAME, agent_id).await?;
        } else if !existed {
            return Err(ArborError::NotFound(format!("profile {}", agent_id)));
        }
        info!(agent_id, "trust profile deleted");
        Ok(())
    }

    // ---- updates ----

    /// Serialized per-agent update: apply `f`, recalculate scores and tier,
    /// detect and emit any tier transition. Returns the updated profile.
    pub async fn update<F>(&self, agent_id: &str, f: F) -> Result<TrustProfile>
    where
        F: FnOnce(&mut TrustProfile),
    {
        self.update_inner(agent_id, f, true, None).await
    }

    /// Serialized per-agent update without recalculation; used by freeze,
    /// unfreeze, and decay, which manage score and tier themselves.
    pub async fn update_raw<F>(&self, agent_id: &str, f: F) -> Result<TrustProfile>
    where
        F: FnOnce(&mut TrustProfile),
    {
        self.update_inner(agent_id, f, false, None).await
    }

    async fn update_inner<F>(
        &self,
        agent_id: &str,
        f: F,
        recalculate: bool,
        now_override: Option<i64>,
    ) -> Result<TrustProfile>
    where
        F: FnOnce(&mut TrustProfile),
    {
        let _guard = self.agent_lock(agent_id).lock_owned().await;

        let mut profile = match self.peek(agent_id) {
            Some(profile) => profile,
            None => self
                .load_backend(agent_id)
                .await?
                .ok_or_else(|| ArborError::NotFound(format!("profile {}", agent_id)))?,
        };

        let old_tier = profile.tier;
        let old_score = profile.trust_score;
        let now = now_override.unwrap_or_else(Self::now_ms);

        f(&mut profile);

        if recalculate {
            self.calculator.recalculate(&mut profile, &self.resolver, now);
            profile.tier = self.assigned_tier(&profile);
        }
        // Frozen preserves the current tier and blocks progression
        if profile.frozen && recalculate {
            profile.tier = old_tier;
        }
        profile.updated_at = now;

        if let Err(violation) = profile.check_invariants() {
            warn!(agent_id, %violation, "profile invariant violated; rejecting update");
            return Err(ArborError::Internal(format!(
                "profile invariant violated: {}",
                violation
            )));
        }

        self.store(profile.clone());
        self.persist(profile.clone());

        if profile.tier != old_tier {
            self.emit_tier_change(&profile, old_tier, old_score, now);
        }

        Ok(profile)
    }

    fn emit_tier_change(
        &self,
        profile: &TrustProfile,
        old_tier: TrustTier,
        old_score: u8,
        now: i64,
    ) {
        let direction = if profile.tier > old_tier { "promotion" } else { "demotion" };
        info!(
            agent_id = %profile.agent_id,
            from = %old_tier,
            to = %profile.tier,
            direction,
            "tier transition"
        );

        let event = TrustEvent::new(&profile.agent_id, TrustEventType::TierChanged, now)
            .with_scores(old_score, profile.trust_score)
            .with_tiers(old_tier, profile.tier)
            .with_reason(direction);
        if let Err(e) = self.events.append(event.clone()) {
            warn!(agent_id = %profile.agent_id, error = %e, "tier_changed append failed");
        }

        self.bus.emit_trust(
            &profile.agent_id,
            TrustEventType::TierChanged.as_str(),
            serde_json::json!({
                "agent_id": profile.agent_id,
                "previous_tier": old_tier,
                "new_tier": profile.tier,
                "trust_score": profile.trust_score,
                "trust_points": profile.trust_points,
            }),
        );
    }

    // ---- counter helpers ----

    /// Apply the profile mutation an event type implies, plus a points
    /// delta, in one serialized update.
    pub async fn apply_trust_event(
        &self,
        agent_id: &str,
        event_type: TrustEventType,
        points_delta: i64,
    ) -> Result<TrustProfile> {
        self.update(agent_id, |profile| {
            let now = Self::now_ms();
            match event_type {
                TrustEventType::ActionSuccess => {
                    profile.total_actions += 1;
                    profile.successful_actions += 1;
                    profile.touch(now);
                }
                TrustEventType::ActionFailure => {
                    profile.total_actions += 1;
                    profile.touch(now);
                }
                TrustEventType::TestPassed => {
                    profile.total_tests += 1;
                    profile.tests_passed += 1;
                    profile.touch(now);
                }
                TrustEventType::TestFailed => {
                    profile.total_tests += 1;
                    profile.touch(now);
                }
                TrustEventType::RollbackExecuted => {
                    profile.rollback_count += 1;
                    profile.touch(now);
                }
                TrustEventType::ImprovementApplied => {
                    profile.improvement_count += 1;
                    profile.touch(now);
                }
                TrustEventType::SecurityViolation => {
                    profile.security_violations += 1;
                }
                TrustEventType::ProposalSubmitted => {
                    profile.proposals_submitted += 1;
                    profile.touch(now);
                }
                TrustEventType::ProposalApproved => {
                    profile.proposals_approved += 1;
                    profile.touch(now);
                }
                TrustEventType::ProposalRejected => {
                    profile.touch(now);
                }
                TrustEventType::InstallationSuccess => {
                    profile.installations_successful += 1;
                    profile.touch(now);
                }
                TrustEventType::InstallationRollback => {
                    profile.installations_rolled_back += 1;
                    profile.touch(now);
                }
                // Administrative types carry no counter mutation here
                _ => {}
            }
            if points_delta >= 0 {
                profile.trust_points = profile.trust_points.saturating_add(points_delta as u64);
            } else {
                profile.trust_points =
                    profile.trust_points.saturating_sub((-points_delta) as u64);
            }
        })
        .await
    }

    pub async fn record_action_success(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::ActionSuccess, 0).await
    }

    pub async fn record_action_failure(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::ActionFailure, 0).await
    }

    pub async fn record_test_result(&self, agent_id: &str, passed: bool) -> Result<TrustProfile> {
        let event_type = if passed {
            TrustEventType::TestPassed
        } else {
            TrustEventType::TestFailed
        };
        self.apply_trust_event(agent_id, event_type, 0).await
    }

    pub async fn record_rollback(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::RollbackExecuted, 0).await
    }

    pub async fn record_improvement(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::ImprovementApplied, 0).await
    }

    pub async fn record_security_violation(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::SecurityViolation, 0).await
    }

    pub async fn record_proposal_submitted(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::ProposalSubmitted, 0).await
    }

    pub async fn record_proposal_approved(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::ProposalApproved, 0).await
    }

    pub async fn record_installation_success(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::InstallationSuccess, 0).await
    }

    pub async fn record_installation_rollback(&self, agent_id: &str) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::InstallationRollback, 0).await
    }

    pub async fn award_trust_points(&self, agent_id: &str, points: u64) -> Result<TrustProfile> {
        self.apply_trust_event(agent_id, TrustEventType::TrustPointsAwarded, points as i64)
            .await
    }

    pub async fn deduct_trust_points(
        &self,
        agent_id: &str,
        points: u64,
        reason: &str,
    ) -> Result<TrustProfile> {
        debug!(agent_id, points, reason, "deducting trust points");
        self.apply_trust_event(agent_id, TrustEventType::TrustPointsDeducted, -(points as i64))
            .await
    }

    // ---- freeze ----

    /// Freeze a profile. Counters and score are untouched; the tier is
    /// preserved and progression blocked. Idempotent: re-freezing only
    /// updates the reason.
    pub async fn freeze(&self, agent_id: &str, reason: &str) -> Result<TrustProfile> {
        let reason = reason.to_string();
        self.update_raw(agent_id, move |profile| {
            profile.frozen = true;
            profile.frozen_reason = Some(reason);
        })
        .await
    }

    /// Clear the frozen flag; the next recalculation may move the tier
    pub async fn unfreeze(&self, agent_id: &str) -> Result<TrustProfile> {
        self.update_raw(agent_id, |profile| {
            profile.frozen = false;
            profile.frozen_reason = None;
        })
        .await
    }

    // ---- queries ----

    /// Snapshot every cached profile id
    pub fn agent_ids(&self) -> Vec<String> {
        self.cache.read().keys().cloned().collect()
    }

    /// Filtered, ordered listing from the cache
    pub fn list(&self, filter: &ProfileFilter) -> Vec<TrustProfile> {
        let cache = self.cache.read();
        let mut profiles: Vec<TrustProfile> = cache
            .values()
            .map(|entry| entry.profile.clone())
            .filter(|profile| {
                filter.tier.map_or(true, |tier| profile.tier == tier)
                    && filter.frozen.map_or(true, |frozen| profile.frozen == frozen)
            })
            .collect();

        match filter.order_by {
            ProfileOrder::TrustScore => {
                profiles.sort_by(|a, b| b.trust_score.cmp(&a.trust_score))
            }
            ProfileOrder::UpdatedAt => profiles.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
            ProfileOrder::CreatedAt => profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        if let Some(limit) = filter.limit {
            profiles.truncate(limit);
        }
        profiles
    }

    /// Recalculate every cached profile against `now_ms`; returns the
    /// number refreshed. Used by maintenance sweeps.
    pub async fn recalculate_all(&self, now_ms: i64) -> Result<usize> {
        let ids = self.agent_ids();
        let mut refreshed = 0;
        for agent_id in ids {
            match self.update_inner(&agent_id, |_| {}, true, Some(now_ms)).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(agent_id, error = %e, "recalculate_all skipped profile"),
            }
        }
        Ok(refreshed)
    }

    /// Cache-only read for the hot authorization path: no TTL check, no
    /// backend, no await. Callers that need freshness use [`Self::get`].
    pub fn get_cached(&self, agent_id: &str) -> Option<TrustProfile> {
        self.cache
            .read()
            .get(agent_id)
            .map(|entry| entry.profile.clone())
    }

    // ---- cache & backend plumbing ----

    fn peek(&self, agent_id: &str) -> Option<TrustProfile> {
        let cache = self.cache.read();
        let entry = cache.get(agent_id)?;
        if self.backend.is_some()
            && Self::now_ms() - entry.cached_at > self.cache_ttl_ms
        {
            // Stale against a durable backend; force a re-read
            return None;
        }
        Some(entry.profile.clone())
    }

    fn store(&self, profile: TrustProfile) {
        self.cache.write().insert(
            profile.agent_id.clone(),
            CacheEntry {
                profile,
                cached_at: Self::now_ms(),
            },
        );
    }

    async fn load_backend(&self, agent_id: &str) -> Result<Option<TrustProfile>> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        let record = tokio::time::timeout(
            self.collaborator_timeout,
            backend.get(PROFILE_STORE_NAME, agent_id),
        )
        .await
        .map_err(|_| ArborError::Timeout(format!("profile read for {}", agent_id)))?;
        match record? {
            Some(value) => match serde_json::from_value::<TrustProfile>(value) {
                Ok(profile) => Ok(Some(profile)),
                Err(e) => {
                    warn!(agent_id, error = %e, "corrupt profile record; treating as missing");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Write-behind with bounded retries and a per-call timeout; never
    /// blocks or fails the caller
    fn persist(&self, profile: TrustProfile) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let retry = self.retry;
        let timeout = self.collaborator_timeout;
        tokio::spawn(async move {
            let value = match serde_json::to_value(&profile) {
                Ok(value) => value,
                Err(e) => {
                    warn!(agent_id = %profile.agent_id, error = %e, "profile serialize failed");
                    return;
                }
            };
            for attempt in 0..=retry.max_retries {
                let write = backend.put(PROFILE_STORE_NAME, &profile.agent_id, value.clone());
                match tokio::time::timeout(timeout, write).await {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => {
                        warn!(
                            agent_id = %profile.agent_id,
                            attempt,
                            error = %e,
                            "profile backend write failed"
                        );
                    }
                    Err(_) => {
                        warn!(
                            agent_id = %profile.agent_id,
                            attempt,
                            "profile backend write timed out"
                        );
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(retry.delay_ms(attempt)))
                    .await;
            }
        });
    }
}
