//! Outbound signal bus
//!
//! Best-effort, in-process fan-out of observational events. Channels are
//! named: the core emits every trust signal on the global `trust:events`
//! channel and again on the per-agent `trust:{agent_id}` channel.
//! Emission never blocks and never fails the caller; slow subscribers lag
//! and drop the oldest signals.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Global channel carrying every trust signal
pub const TRUST_EVENTS_CHANNEL: &str = "trust:events";

/// Signal type names emitted beyond the event taxonomy itself
pub mod signal_types {
    pub const CONFIRMATION_RECORDED: &str = "confirmation_recorded";
    pub const BUNDLE_GRADUATED: &str = "bundle_graduated";
    pub const GRADUATION_REVERTED: &str = "graduation_reverted";
    pub const BUNDLE_LOCKED: &str = "bundle_locked";
    pub const BUNDLE_UNLOCKED: &str = "bundle_unlocked";
    pub const CONFIRMATION_RESET: &str = "confirmation_reset";
    pub const CIRCUIT_BREAKER_TRIGGERED: &str = "circuit_breaker_triggered";
    pub const DECAY_APPLIED: &str = "decay_applied";
    pub const CAPABILITIES_GRANTED: &str = "capabilities_granted";
    pub const CAPABILITIES_REVOKED: &str = "capabilities_revoked";
    pub const TIER_CAPABILITIES_SYNCED: &str = "tier_capabilities_synced";
}

/// A single observational signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Channel the signal was published on
    pub channel: String,

    /// Signal type, e.g. `tier_changed` or `bundle_graduated`
    pub signal_type: String,

    /// Free-form payload
    pub payload: Value,

    /// Emission timestamp (Unix milliseconds)
    pub timestamp: i64,
}

/// Per-agent channel name, `trust:{agent_id}`
pub fn agent_channel(agent_id: &str) -> String {
    format!("trust:{}", agent_id)
}

/// In-process broadcast bus with named channels.
///
/// Channels are created lazily on first emit or subscribe. Each channel is
/// a bounded `tokio::sync::broadcast` ring; overflow drops the oldest
/// entries on the lagging receiver, never the sender.
pub struct SignalBus {
    channels: DashMap<String, broadcast::Sender<Signal>>,
    capacity: usize,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Signal> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish on a single channel. Best-effort: a channel with no
    /// subscribers silently drops the signal.
    pub fn emit(&self, channel: &str, signal_type: &str, payload: Value) {
        let signal = Signal {
            channel: channel.to_string(),
            signal_type: signal_type.to_string(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let receivers = self.sender(channel).send(signal).unwrap_or(0);
        trace!(channel, signal_type, receivers, "signal emitted");
    }

    /// Publish a trust signal on the global channel and the agent's channel
    pub fn emit_trust(&self, agent_id: &str, signal_type: &str, payload: Value) {
        self.emit(TRUST_EVENTS_CHANNEL, signal_type, payload.clone());
        self.emit(&agent_channel(agent_id), signal_type, payload);
    }

    /// Subscribe to a named channel
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Signal> {
        self.sender(channel).subscribe()
    }

    /// Number of live subscribers on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = SignalBus::default();
        // Must not panic or error
        bus.emit("trust:events", "action_success", json!({"agent_id": "a"}));
    }

    #[tokio::test]
    async fn test_emit_trust_reaches_both_channels() {
        let bus = SignalBus::default();
        let mut global = bus.subscribe(TRUST_EVENTS_CHANNEL);
        let mut personal = bus.subscribe(&agent_channel("agent-001"));

        bus.emit_trust("agent-001", "tier_changed", json!({"new_tier": "trusted"}));

        let g = global.recv().await.unwrap();
        assert_eq!(g.signal_type, "tier_changed");
        let p = personal.recv().await.unwrap();
        assert_eq!(p.channel, "trust:agent-001");
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let bus = SignalBus::new(2);
        let mut rx = bus.subscribe("trust:events");
        for i in 0..5 {
            bus.emit("trust:events", "action_success", json!({ "i": i }));
        }
        // The receiver lags; the first recv reports the loss, then newest
        // retained entries arrive.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed >= 1),
            Ok(signal) => assert!(signal.payload["i"].as_i64().unwrap() >= 3),
            Err(other) => panic!("unexpected recv error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let bus = SignalBus::default();
        assert_eq!(bus.subscriber_count("trust:events"), 0);
        let _rx = bus.subscribe("trust:events");
        assert_eq!(bus.subscriber_count("trust:events"), 1);
    }
}
