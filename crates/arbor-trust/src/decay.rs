//! Inactivity decay
//!
//! Once a day, every profile past the grace period loses score in
//! proportion to how long it has been idle, floored so an agent can
//! always come back. Tiers rebucket from the decayed score (the points
//! floor still applies); frozen profiles lose score but keep their tier.

use chrono::{Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use arbor_common::config::DecayConfig;
use arbor_common::signal::{signal_types, SignalBus};
use arbor_common::{Result, TrustEvent, TrustEventType};

use crate::event_store::EventStore;
use crate::profile_store::ProfileStore;
use crate::tier::TierResolver;

/// Outcome of decay applied to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayOutcome {
    pub agent_id: String,
    pub previous_score: u8,
    pub new_score: u8,
    pub days_inactive: i64,
}

/// Totals for one decay sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecaySummary {
    pub profiles_examined: usize,
    pub profiles_decayed: usize,
    pub total_points_removed: i64,
}

/// Daily decay engine
pub struct DecayEngine {
    config: DecayConfig,
    profiles: Arc<ProfileStore>,
    events: Arc<EventStore>,
    bus: Arc<SignalBus>,
    resolver: TierResolver,
}

impl DecayEngine {
    pub fn new(
        config: DecayConfig,
        profiles: Arc<ProfileStore>,
        events: Arc<EventStore>,
        bus: Arc<SignalBus>,
    ) -> Self {
        let resolver = profiles.resolver().clone();
        Self {
            config,
            profiles,
            events,
            bus,
            resolver,
        }
    }

    /// Apply decay to one agent. `None` when the agent is inside grace.
    pub async fn apply_to(&self, agent_id: &str, now_ms: i64) -> Result<Option<DecayOutcome>> {
        let profile = self.profiles.get(agent_id).await?;
        let days_inactive = profile.days_inactive(now_ms);
        let days_beyond_grace = days_inactive - self.config.grace_period_days as i64;
        if days_beyond_grace <= 0 {
            return Ok(None);
        }

        let decay = (days_beyond_grace as u64).saturating_mul(self.config.decay_rate as u64);
        let floor = self.config.floor_score;
        let previous_score = profile.trust_score;
        let new_score = previous_score
            .saturating_sub(decay.min(u8::MAX as u64) as u8)
            .max(floor.min(previous_score));
        if new_score == previous_score {
            return Ok(None);
        }

        let resolver = self.resolver.clone();
        let updated = self
            .profiles
            .update_raw(agent_id, move |profile| {
                profile.trust_score = new_score;
                let rebucketed = resolver.effective(new_score, profile.trust_points);
                if !profile.frozen {
                    profile.tier = rebucketed;
                }
            })
            .await?;

        let delta = new_score as i32 - previous_score as i32;
        let event = TrustEvent::new(agent_id, TrustEventType::TrustDecayed, now_ms)
            .with_scores(previous_score, new_score)
            .with_reason(format!("{} days inactive", days_inactive));
        if let Err(e) = self.events.append(event) {
            warn!(agent_id, error = %e, "trust_decayed append failed");
        }

        self.bus.emit_trust(
            agent_id,
            signal_types::DECAY_APPLIED,
            serde_json::json!({
                "agent_id": agent_id,
                "previous_score": previous_score,
                "new_score": new_score,
                "delta": delta,
                "days_inactive": days_inactive,
                "tier": updated.tier,
            }),
        );

        debug!(agent_id, previous_score, new_score, days_inactive, "decay applied");
        Ok(Some(DecayOutcome {
            agent_id: agent_id.to_string(),
            previous_score,
            new_score,
            days_inactive,
        }))
    }

    /// One sweep across every known profile
    pub async fn run_once(&self, now_ms: i64) -> DecaySummary {
        let agent_ids = self.profiles.agent_ids();
        let mut summary = DecaySummary {
            profiles_examined: agent_ids.len(),
            ..DecaySummary::default()
        };

        for agent_id in agent_ids {
            match self.apply_to(&agent_id, now_ms).await {
                Ok(Some(outcome)) => {
                    summary.profiles_decayed += 1;
                    summary.total_points_removed +=
                        outcome.previous_score as i64 - outcome.new_score as i64;
                }
                Ok(None) => {}
                Err(e) => warn!(agent_id, error = %e, "decay skipped profile"),
            }
        }

        info!(
            examined = summary.profiles_examined,
            decayed = summary.profiles_decayed,
            removed = summary.total_points_removed,
            "decay sweep complete"
        );
        summary
    }

    /// Milliseconds until the next configured run time (UTC)
    pub fn ms_until_next_run(&self, now_ms: i64) -> i64 {
        let now = Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(Utc::now);
        let today_run = now
            .with_hour(self.config.run_hour_utc as u32)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let next = if today_run > now {
            today_run
        } else {
            today_run + Duration::days(1)
        };
        (next.timestamp_millis() - now_ms).max(0)
    }

    /// Spawn the daily scheduler task
    pub fn spawn_daily(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait_ms = self.ms_until_next_run(Utc::now().timestamp_millis());
                tokio::time::sleep(std::time::Duration::from_millis(wait_ms as u64)).await;
                self.run_once(Utc::now().timestamp_millis()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::config::ArborConfig;
    use arbor_common::TrustTier;

    const DAY_MS: i64 = 86_400_000;

    struct Fixture {
        profiles: Arc<ProfileStore>,
        events: Arc<EventStore>,
        engine: DecayEngine,
    }

    fn fixture() -> Fixture {
        let config = ArborConfig::default();
        let events = Arc::new(EventStore::in_memory(1000));
        let bus = Arc::new(SignalBus::default());
        let profiles = Arc::new(ProfileStore::new(&config, events.clone(), bus.clone(), None));
        let engine = DecayEngine::new(config.decay, profiles.clone(), events.clone(), bus);
        Fixture {
            profiles,
            events,
            engine,
        }
    }

    /// Stamp a veteran profile that went idle `days` days before `now_ms`
    async fn idle_veteran(fixture: &Fixture, agent_id: &str, score: u8, idle_days: i64, now_ms: i64) {
        fixture.profiles.create(agent_id).await.unwrap();
        fixture
            .profiles
            .update_raw(agent_id, move |profile| {
                profile.trust_score = score;
                profile.tier = TrustTier::Veteran;
                profile.created_at = now_ms - (idle_days + 100) * DAY_MS;
                profile.last_activity_at = now_ms - idle_days * DAY_MS;
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_decay_after_37_days() {
        let fixture = fixture();
        let now = 200 * DAY_MS;
        idle_veteran(&fixture, "agent-d", 80, 37, now).await;

        let outcome = fixture.engine.apply_to("agent-d", now).await.unwrap().unwrap();
        // 30 days beyond grace at 1 point/day
        assert_eq!(outcome.previous_score, 80);
        assert_eq!(outcome.new_score, 50);
        assert_eq!(outcome.days_inactive, 37);

        let profile = fixture.profiles.get("agent-d").await.unwrap();
        assert_eq!(profile.trust_score, 50);
        assert_eq!(profile.tier, TrustTier::Trusted);

        // One trust_decayed with delta -30 and one tier_changed
        let decayed = fixture.events.get_events(&crate::event_store::EventFilter {
            agent_id: Some("agent-d".to_string()),
            event_type: Some(TrustEventType::TrustDecayed),
            ..Default::default()
        });
        assert_eq!(decayed.len(), 1);
        assert_eq!(decayed[0].delta, Some(-30));

        // The last transition is the decay demotion (setup produced the
        // initial promotion)
        let transitions = fixture.events.tier_history("agent-d");
        let demotion = transitions.last().unwrap();
        assert_eq!(demotion.from, TrustTier::Veteran);
        assert_eq!(demotion.to, TrustTier::Trusted);
        assert!(!demotion.promotion);
    }

    #[tokio::test]
    async fn test_no_decay_inside_grace() {
        let fixture = fixture();
        let now = 200 * DAY_MS;
        idle_veteran(&fixture, "agent-d", 80, 6, now).await;
        assert!(fixture.engine.apply_to("agent-d", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decay_floors() {
        let fixture = fixture();
        let now = 400 * DAY_MS;
        idle_veteran(&fixture, "agent-d", 80, 300, now).await;

        let outcome = fixture.engine.apply_to("agent-d", now).await.unwrap().unwrap();
        assert_eq!(outcome.new_score, 10);

        // A second sweep cannot push below the floor
        assert!(fixture.engine.apply_to("agent-d", now).await.unwrap().is_none());
        let profile = fixture.profiles.get("agent-d").await.unwrap();
        assert_eq!(profile.trust_score, 10);
    }

    #[tokio::test]
    async fn test_floor_does_not_raise_low_scores() {
        let fixture = fixture();
        let now = 200 * DAY_MS;
        idle_veteran(&fixture, "agent-d", 5, 37, now).await;
        // Score already below the floor: decay leaves it alone
        assert!(fixture.engine.apply_to("agent-d", now).await.unwrap().is_none());
        assert_eq!(fixture.profiles.get("agent-d").await.unwrap().trust_score, 5);
    }

    #[tokio::test]
    async fn test_points_floor_survives_decay() {
        let fixture = fixture();
        let now = 200 * DAY_MS;
        idle_veteran(&fixture, "agent-d", 80, 37, now).await;
        fixture
            .profiles
            .update_raw("agent-d", |profile| profile.trust_points = 250)
            .await
            .unwrap();

        fixture.engine.apply_to("agent-d", now).await.unwrap();
        let profile = fixture.profiles.get("agent-d").await.unwrap();
        // Score dropped, but 250 points keep the veteran floor
        assert_eq!(profile.trust_score, 50);
        assert_eq!(profile.tier, TrustTier::Veteran);
    }

    #[tokio::test]
    async fn test_frozen_profile_keeps_tier() {
        let fixture = fixture();
        let now = 200 * DAY_MS;
        idle_veteran(&fixture, "agent-d", 80, 37, now).await;
        fixture.profiles.freeze("agent-d", "held").await.unwrap();

        fixture.engine.apply_to("agent-d", now).await.unwrap();
        let profile = fixture.profiles.get("agent-d").await.unwrap();
        assert_eq!(profile.trust_score, 50);
        assert_eq!(profile.tier, TrustTier::Veteran);
    }

    #[tokio::test]
    async fn test_run_once_sweeps_all() {
        let fixture = fixture();
        let now = 200 * DAY_MS;
        idle_veteran(&fixture, "idle-1", 80, 37, now).await;
        idle_veteran(&fixture, "idle-2", 60, 20, now).await;
        fixture.profiles.create("active").await.unwrap();

        let summary = fixture.engine.run_once(now).await;
        assert_eq!(summary.profiles_examined, 3);
        assert_eq!(summary.profiles_decayed, 2);
        assert_eq!(summary.total_points_removed, 30 + 13);
    }

    #[test]
    fn test_ms_until_next_run() {
        let fixture = fixture();
        // 2023-01-01 00:00:00 UTC
        let midnight = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let wait = fixture.engine.ms_until_next_run(midnight.timestamp_millis());
        // Default run hour is 03:00 UTC
        assert_eq!(wait, 3 * 3_600 * 1_000);

        let after = Utc.with_ymd_and_hms(2023, 1, 1, 4, 0, 0).unwrap();
        let wait = fixture.engine.ms_until_next_run(after.timestamp_millis());
        assert_eq!(wait, 23 * 3_600 * 1_000);
    }
}
