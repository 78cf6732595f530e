//! # Arbor Trust
//!
//! Trust scoring core for the Arbor agent platform.
//!
//! ## Components
//!
//! - **Tier resolver**: pure score/points to tier mapping
//! - **Score calculator**: weighted multi-factor scoring
//! - **Profile store**: cached profile lifecycle with write-through backend
//! - **Event store**: append-only log, timelines, aggregates
//! - **Manager**: single-writer event pipeline
//! - **Circuit breaker**: per-agent anomaly freeze/demote
//! - **Decay**: daily inactivity score reduction
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TrustSystem                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌───────────────┐   ┌────────────────────┐  │
//! │  │ Manager  │──▶│ Profile Store │──▶│ Event Store        │  │
//! │  │ (+break- │   │ (cache + KV   │   │ (index + durable   │  │
//! │  │  er/decay)│  │  backend)     │   │  event log mirror) │  │
//! │  └──────────┘   └───────────────┘   └────────────────────┘  │
//! │        │                │                     │              │
//! │        └────────────────┴──────────┬──────────┘              │
//! │                             signal bus (best-effort)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod circuit_breaker;
pub mod decay;
pub mod event_store;
pub mod manager;
pub mod profile_store;
pub mod score;
pub mod tier;

pub use circuit_breaker::{BreakerAction, BreakerTransition, CircuitBreaker, CircuitState};
pub use decay::{DecayEngine, DecayOutcome, DecaySummary};
pub use event_store::{
    AgentStats, EventCursor, EventFilter, EventStore, QueryOrder, SystemStats, TierTransition,
    TimelineEntry, TrustProgression,
};
pub use manager::TrustManager;
pub use profile_store::{ProfileFilter, ProfileOrder, ProfileStore};
pub use score::ScoreCalculator;
pub use tier::TierResolver;

use std::sync::Arc;

use arbor_common::config::ArborConfig;
use arbor_common::persistence::{EventLog, KeyValueStore};
use arbor_common::signal::SignalBus;
use arbor_common::Result;

/// Wired trust subsystem: construct once, share handles
pub struct TrustSystem {
    config: ArborConfig,
    bus: Arc<SignalBus>,
    events: Arc<EventStore>,
    profiles: Arc<ProfileStore>,
    breaker: Arc<CircuitBreaker>,
    manager: Arc<TrustManager>,
    decay: Arc<DecayEngine>,
}

impl TrustSystem {
    /// Full deployment: durable profile backend and event log
    pub fn new(
        config: ArborConfig,
        kv: Arc<dyn KeyValueStore>,
        log: Arc<dyn EventLog>,
    ) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(SignalBus::new(config.signal_capacity));
        let events = Arc::new(EventStore::new(
            config.event_index_max,
            log,
            config.collaborator_timeout_ms,
        ));
        Ok(Self::wire(config, bus, events, Some(kv)))
    }

    /// Standalone deployment: everything in memory (tests, local tooling)
    pub fn standalone(config: ArborConfig) -> Self {
        let bus = Arc::new(SignalBus::new(config.signal_capacity));
        let events = Arc::new(EventStore::in_memory(config.event_index_max));
        Self::wire(config, bus, events, None)
    }

    fn wire(
        config: ArborConfig,
        bus: Arc<SignalBus>,
        events: Arc<EventStore>,
        kv: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let profiles = Arc::new(ProfileStore::new(&config, events.clone(), bus.clone(), kv));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        let manager = Arc::new(TrustManager::new(
            &config,
            profiles.clone(),
            events.clone(),
            bus.clone(),
            breaker.clone(),
        ));
        let decay = Arc::new(DecayEngine::new(
            config.decay,
            profiles.clone(),
            events.clone(),
            bus.clone(),
        ));
        Self {
            config,
            bus,
            events,
            profiles,
            breaker,
            manager,
            decay,
        }
    }

    /// Rebuild the event index from the durable log after a restart.
    /// Profiles come back lazily through the store's backend reads.
    pub async fn rehydrate(&self) -> Result<usize> {
        self.events.hydrate().await
    }

    /// Start the background timers (breaker ticks, daily decay)
    pub fn start_timers(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.manager.clone().spawn_breaker_timer(60_000),
            self.decay.clone().spawn_daily(),
        ]
    }

    pub fn config(&self) -> &ArborConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<SignalBus> {
        &self.bus
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn manager(&self) -> &Arc<TrustManager> {
        &self.manager
    }

    pub fn decay(&self) -> &Arc<DecayEngine> {
        &self.decay
    }
}
