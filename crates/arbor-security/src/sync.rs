//! Capability synchronization subscriber
//!
//! A background task subscribed to the global trust channel. It is the
//! single owner of the tier-change capability path: the trust manager
//! only emits `tier_changed`; this task performs the revoke-then-grant.
//! Freezes revoke the agent's trust-sourced capabilities; unfreezes
//! restore the current tier's set.
//!
//! Subscription is registered on startup with exponential backoff, and a
//! lagged receiver logs and continues; observational signals are never
//! critical.

use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use arbor_common::config::RetryConfig;
use arbor_common::signal::{Signal, SignalBus, TRUST_EVENTS_CHANNEL};
use arbor_common::TrustTier;

use crate::policy::CapabilityPolicy;

/// Subscribes to trust events and keeps capabilities aligned with tiers
pub struct CapabilitySync {
    policy: Arc<CapabilityPolicy>,
    bus: Arc<SignalBus>,
    retry: RetryConfig,
}

impl CapabilitySync {
    pub fn new(policy: Arc<CapabilityPolicy>, bus: Arc<SignalBus>, retry: RetryConfig) -> Self {
        Self { policy, bus, retry }
    }

    /// Spawn the subscriber task
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                let mut rx = self.bus.subscribe(TRUST_EVENTS_CHANNEL);
                info!("capability sync subscribed to {}", TRUST_EVENTS_CHANNEL);

                loop {
                    match rx.recv().await {
                        Ok(signal) => self.handle(&signal).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "capability sync lagged; continuing");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                // Channel closed (bus rebuilt); re-subscribe with backoff
                if attempt >= self.retry.max_retries {
                    warn!("capability sync giving up after {} retries", attempt);
                    return;
                }
                let delay = self.retry.delay_ms(attempt);
                attempt += 1;
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
        })
    }

    fn tier_field(payload: &Value, field: &str) -> Option<TrustTier> {
        payload
            .get(field)
            .and_then(Value::as_str)
            .and_then(|s| TrustTier::from_str(s).ok())
    }

    /// React to one trust signal
    pub async fn handle(&self, signal: &Signal) {
        let Some(agent_id) = signal.payload.get("agent_id").and_then(Value::as_str) else {
            return;
        };

        match signal.signal_type.as_str() {
            "tier_changed" => {
                let Some(old_tier) = Self::tier_field(&signal.payload, "previous_tier") else {
                    warn!(agent_id, "tier_changed signal missing previous_tier");
                    return;
                };
                let Some(new_tier) = Self::tier_field(&signal.payload, "new_tier") else {
                    warn!(agent_id, "tier_changed signal missing new_tier");
                    return;
                };
                match self.policy.sync_capabilities(agent_id, old_tier, new_tier).await {
                    Ok(outcome) => debug!(
                        agent_id,
                        granted = outcome.granted,
                        revoked = outcome.revoked,
                        "capabilities synced"
                    ),
                    Err(e) => warn!(agent_id, error = %e, "capability sync failed"),
                }
            }
            "trust_frozen" => {
                let revoked = self.policy.revoke_agent_capabilities(agent_id);
                info!(agent_id, revoked, "capabilities revoked on freeze");
            }
            "trust_unfrozen" => {
                if let Some(tier) = Self::tier_field(&signal.payload, "new_tier")
                    .or_else(|| self.policy.effective_tier(agent_id))
                {
                    if let Err(e) = self.policy.grant_tier_capabilities(agent_id, tier).await {
                        warn!(agent_id, error = %e, "regrant after unfreeze failed");
                    }
                }
            }
            _ => {}
        }
    }
}
