//! # Arbor Security
//!
//! Capability-based authorization engine for the Arbor agent platform.
//!
//! ## Components
//!
//! - **Capability store**: signed grants, delegation chains, constraints
//! - **Policy**: tier capability templates, grant/sync/revoke
//! - **Confirmation matrix**: bundle × policy tier → auto/gated/deny
//! - **Graduation tracker**: confirm-then-automate per (agent, bundle)
//! - **Authorization engine**: the public authorize entry point
//! - **Capability sync**: tier-change subscriber owning the revoke path
//!
//! The authorize read path touches only in-process state and never
//! suspends; grants, revocations, and persistence are the async side.

pub mod authorize;
pub mod graduation;
pub mod matrix;
pub mod policy;
pub mod signing;
pub mod store;
pub mod sync;

pub use authorize::{AuthorizationEngine, AuthorizeOptions, PendingProposal};
pub use graduation::{ConfirmationOutcome, ConfirmationTracker, TrackerEntry};
pub use matrix::{resolve_bundle, ConfirmationMatrix};
pub use policy::{CapabilityPolicy, SyncOutcome};
pub use signing::CapabilitySigner;
pub use store::CapabilityStore;
pub use sync::CapabilitySync;

use std::sync::Arc;

use arbor_common::config::ArborConfig;
use arbor_common::identity::{IdentityVerifier, NullIdentityVerifier};
use arbor_common::signal::SignalBus;
use arbor_common::Result;
use arbor_trust::TrustSystem;

/// Wired security subsystem over a trust system
pub struct SecuritySystem {
    store: Arc<CapabilityStore>,
    tracker: Arc<ConfirmationTracker>,
    policy: Arc<CapabilityPolicy>,
    engine: Arc<AuthorizationEngine>,
    sync: Arc<CapabilitySync>,
}

impl SecuritySystem {
    /// Wire against an existing trust system. The signer is the issuing
    /// authority for every capability this process grants.
    pub fn new(
        config: &ArborConfig,
        trust: &TrustSystem,
        signer: CapabilitySigner,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Result<Self> {
        config.validate()?;
        let bus: Arc<SignalBus> = trust.bus().clone();

        let store = Arc::new(CapabilityStore::new(
            signer,
            bus.clone(),
            config.capabilities.max_delegation_depth,
            config.capabilities.max_capabilities_per_agent,
        ));
        let tracker = Arc::new(ConfirmationTracker::new(
            config.confirmation.clone(),
            bus.clone(),
        ));
        let policy = Arc::new(CapabilityPolicy::new(
            config.capabilities.clone(),
            ConfirmationMatrix::new(&config.confirmation),
            store.clone(),
            trust.profiles().clone(),
            tracker.clone(),
            bus.clone(),
        ));
        let engine = Arc::new(AuthorizationEngine::new(
            policy.clone(),
            trust.profiles().clone(),
            identity,
            bus.clone(),
        ));
        let sync = Arc::new(CapabilitySync::new(policy.clone(), bus, config.retry));

        Ok(Self {
            store,
            tracker,
            policy,
            engine,
            sync,
        })
    }

    /// Convenience constructor for tests and local tooling: generated
    /// authority key, no identity service
    pub fn standalone(config: &ArborConfig, trust: &TrustSystem) -> Result<Self> {
        Self::new(
            config,
            trust,
            CapabilitySigner::generate("arbor-policy"),
            Arc::new(NullIdentityVerifier),
        )
    }

    /// Start the capability-sync subscriber
    pub fn start_sync(&self) -> tokio::task::JoinHandle<()> {
        self.sync.clone().spawn()
    }

    pub fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<ConfirmationTracker> {
        &self.tracker
    }

    pub fn policy(&self) -> &Arc<CapabilityPolicy> {
        &self.policy
    }

    pub fn engine(&self) -> &Arc<AuthorizationEngine> {
        &self.engine
    }

    pub fn sync(&self) -> &Arc<CapabilitySync> {
        &self.sync
    }
}
