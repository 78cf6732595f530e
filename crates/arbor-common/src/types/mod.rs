//! Core domain types shared across the Arbor trust crates

pub mod bundle;
pub mod capability;
pub mod decision;
pub mod event;
pub mod profile;
pub mod tier;

pub use bundle::{ResourceBundle, ALL_BUNDLES};
pub use capability::{
    resolve_self, uri_matches, Capability, CapabilitySource, Constraints, DelegationLink,
    RateLimit, TimeWindow,
};
pub use decision::{AuthorizationDecision, ConfirmationMode};
pub use event::{TrustEvent, TrustEventType};
pub use profile::TrustProfile;
pub use tier::{PolicyTier, TrustTier, ALL_POLICY_TIERS, ALL_TIERS};
