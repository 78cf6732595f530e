//! Confirmation tracker and graduation
//!
//! Tracks human confirmations per `(agent, bundle)`. A run of consecutive
//! approvals meeting the bundle's threshold graduates the pair from gated
//! to auto. One rejection resets the streak and the graduation. Locked
//! bundles stay gated no matter what; shell and governance have `never`
//! thresholds and cannot graduate at all.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use arbor_common::config::{ConfirmationConfig, GraduationThreshold};
use arbor_common::signal::{signal_types, SignalBus};
use arbor_common::ResourceBundle;

/// Per-(agent, bundle) confirmation state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub approvals: u64,
    pub rejections: u64,
    pub streak: u32,
    pub graduated: bool,
    pub locked: bool,
    pub last_confirmation: Option<i64>,
    pub graduated_at: Option<i64>,
}

/// What one recorded approval produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Approval counted; not (yet) graduated
    Recorded,
    /// This approval crossed the threshold: the bundle is now auto
    Graduated(ResourceBundle),
}

/// Tracks confirmations and graduation state across all agents
pub struct ConfirmationTracker {
    entries: DashMap<(String, ResourceBundle), TrackerEntry>,
    config: ConfirmationConfig,
    bus: Arc<SignalBus>,
}

impl ConfirmationTracker {
    pub fn new(config: ConfirmationConfig, bus: Arc<SignalBus>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            bus,
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn key(agent_id: &str, bundle: ResourceBundle) -> (String, ResourceBundle) {
        (agent_id.to_string(), bundle)
    }

    /// Record a human approval; may graduate the bundle
    pub fn record_approval(&self, agent_id: &str, bundle: ResourceBundle) -> ConfirmationOutcome {
        let now = Self::now_ms();
        let mut entry = self.entries.entry(Self::key(agent_id, bundle)).or_default();
        entry.approvals += 1;
        entry.streak += 1;
        entry.last_confirmation = Some(now);

        self.bus.emit_trust(
            agent_id,
            signal_types::CONFIRMATION_RECORDED,
            json!({
                "agent_id": agent_id,
                "bundle": bundle,
                "approved": true,
                "streak": entry.streak,
            }),
        );

        let threshold = match self.config.threshold(bundle) {
            GraduationThreshold::Never => return ConfirmationOutcome::Recorded,
            GraduationThreshold::Count(n) => n,
        };

        if !entry.graduated && !entry.locked && entry.streak >= threshold {
            entry.graduated = true;
            entry.graduated_at = Some(now);
            info!(agent_id, %bundle, streak = entry.streak, "bundle graduated to auto");
            self.bus.emit_trust(
                agent_id,
                signal_types::BUNDLE_GRADUATED,
                json!({ "agent_id": agent_id, "bundle": bundle, "streak": entry.streak }),
            );
            return ConfirmationOutcome::Graduated(bundle);
        }
        ConfirmationOutcome::Recorded
    }

    /// Record a human rejection: streak and graduation both reset
    pub fn record_rejection(&self, agent_id: &str, bundle: ResourceBundle) {
        let now = Self::now_ms();
        let mut entry = self.entries.entry(Self::key(agent_id, bundle)).or_default();
        entry.rejections += 1;
        entry.streak = 0;
        entry.last_confirmation = Some(now);
        let was_graduated = entry.graduated;
        entry.graduated = false;
        entry.graduated_at = None;

        self.bus.emit_trust(
            agent_id,
            signal_types::CONFIRMATION_RECORDED,
            json!({
                "agent_id": agent_id,
                "bundle": bundle,
                "approved": false,
            }),
        );
        if was_graduated {
            debug!(agent_id, %bundle, "graduation reverted by rejection");
            self.bus.emit_trust(
                agent_id,
                signal_types::GRADUATION_REVERTED,
                json!({ "agent_id": agent_id, "bundle": bundle, "reason": "rejection" }),
            );
        }
    }

    /// Whether the pair has graduated (locked pairs never count)
    pub fn graduated(&self, agent_id: &str, bundle: ResourceBundle) -> bool {
        self.entries
            .get(&Self::key(agent_id, bundle))
            .map(|entry| entry.graduated && !entry.locked)
            .unwrap_or(false)
    }

    /// Snapshot of the pair's state
    pub fn entry(&self, agent_id: &str, bundle: ResourceBundle) -> Option<TrackerEntry> {
        self.entries
            .get(&Self::key(agent_id, bundle))
            .map(|entry| entry.clone())
    }

    /// Clear graduation and streak, keeping the confirmation history
    pub fn revert_to_gated(&self, agent_id: &str, bundle: ResourceBundle) {
        if let Some(mut entry) = self.entries.get_mut(&Self::key(agent_id, bundle)) {
            entry.graduated = false;
            entry.graduated_at = None;
            entry.streak = 0;
            self.bus.emit_trust(
                agent_id,
                signal_types::GRADUATION_REVERTED,
                json!({ "agent_id": agent_id, "bundle": bundle, "reason": "manual" }),
            );
        }
    }

    /// Pin the pair to gated until unlocked. Locking clears graduation.
    pub fn lock_gated(&self, agent_id: &str, bundle: ResourceBundle) {
        let mut entry = self.entries.entry(Self::key(agent_id, bundle)).or_default();
        entry.locked = true;
        entry.graduated = false;
        entry.graduated_at = None;
        self.bus.emit_trust(
            agent_id,
            signal_types::BUNDLE_LOCKED,
            json!({ "agent_id": agent_id, "bundle": bundle }),
        );
    }

    /// Remove the lock; graduation must be re-earned
    pub fn unlock(&self, agent_id: &str, bundle: ResourceBundle) {
        if let Some(mut entry) = self.entries.get_mut(&Self::key(agent_id, bundle)) {
            entry.locked = false;
            entry.streak = 0;
            self.bus.emit_trust(
                agent_id,
                signal_types::BUNDLE_UNLOCKED,
                json!({ "agent_id": agent_id, "bundle": bundle }),
            );
        }
    }

    /// Drop all per-bundle state for an agent (tier demotion)
    pub fn reset(&self, agent_id: &str) {
        self.entries.retain(|(agent, _), _| agent != agent_id);
        self.bus.emit_trust(
            agent_id,
            signal_types::CONFIRMATION_RESET,
            json!({ "agent_id": agent_id }),
        );
    }
}
