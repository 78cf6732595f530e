//! # Arbor Common
//!
//! Shared types, errors, and collaborator interfaces for the Arbor
//! progressive-trust core.
//!
//! ## Core Types
//!
//! - [`TrustProfile`]: per-agent behavioral record with counters, scores, and tier
//! - [`TrustEvent`]/[`TrustEventType`]: the append-only behavioral event taxonomy
//! - [`TrustTier`]/[`PolicyTier`]: behavioral and matrix tier ladders
//! - [`Capability`]: signed, time-bounded right on a URI-scoped resource
//! - [`AuthorizationDecision`]/[`ConfirmationMode`]: authorize verdict contract
//!
//! ## Collaborators
//!
//! - [`persistence`]: key-value store and append-only event log traits,
//!   with in-memory reference implementations
//! - [`identity`]: signed-request verification against registered keys
//! - [`signal`]: best-effort in-process broadcast bus
//!
//! ## Configuration
//!
//! - [`config::ArborConfig`]: every knob of the core, defaulted and validated

pub mod config;
pub mod error;
pub mod identity;
pub mod persistence;
pub mod signal;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ArborError, CapabilityError, DenyReason, IdentityError, Result};
pub use types::{
    bundle::{ResourceBundle, ALL_BUNDLES},
    capability::{
        resolve_self, uri_matches, Capability, CapabilitySource, Constraints, DelegationLink,
        RateLimit, TimeWindow,
    },
    decision::{AuthorizationDecision, ConfirmationMode},
    event::{TrustEvent, TrustEventType},
    profile::TrustProfile,
    tier::{PolicyTier, TrustTier, ALL_POLICY_TIERS, ALL_TIERS},
};

/// Arbor version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum aggregate trust score
pub const MAX_TRUST_SCORE: u8 = 100;

/// Minimum aggregate trust score
pub const MIN_TRUST_SCORE: u8 = 0;

/// Resource URI scheme prefix
pub const URI_SCHEME: &str = "arbor://";
