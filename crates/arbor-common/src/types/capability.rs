//! Capabilities - signed, time-bounded rights on URI-scoped resources
//!
//! A capability binds a principal to a resource URI with optional
//! constraints, expiry, and a signed delegation chain. Grants are signed by
//! the issuing authority over a blake3 digest of the identifying fields;
//! verification lives in `arbor-security`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a capability came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    /// Granted automatically from the agent's tier templates
    TrustTier,
    /// Granted during a tier promotion sync
    TierPromotion,
    /// Granted by an explicit administrative call
    ExplicitGrant,
    /// Delegated from another principal
    Delegation,
}

impl std::fmt::Display for CapabilitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapabilitySource::TrustTier => "trust_tier",
            CapabilitySource::TierPromotion => "tier_promotion",
            CapabilitySource::ExplicitGrant => "explicit_grant",
            CapabilitySource::Delegation => "delegation",
        };
        f.write_str(s)
    }
}

/// Per-capability rate limit: at most `max_requests` per `window_seconds`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window_seconds: u64,
}

/// Wall-clock window (UTC hours, inclusive start, exclusive end) during
/// which the capability is usable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl TimeWindow {
    /// Whether the given UTC hour falls inside the window. Windows may wrap
    /// midnight (e.g. 22..6).
    pub fn contains_hour(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Constraints attached to a capability grant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// When true, use of the capability routes through human confirmation
    #[serde(default)]
    pub requires_approval: bool,

    /// Optional usage rate limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,

    /// Optional wall-clock usage window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,

    /// When non-empty, the target path must start with one of these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_paths: Vec<String>,

    /// Opaque extras (e.g. sandbox hints) passed through to the host
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Constraints {
    /// Unconstrained grant
    pub fn none() -> Self {
        Self::default()
    }

    /// Grant that requires human approval on every use
    pub fn approval_required() -> Self {
        Self {
            requires_approval: true,
            ..Self::default()
        }
    }
}

/// One link in a delegation chain. Each link is signed by the delegator
/// over the link's digest, which also covers the previous link's digest so
/// the chain cannot be reordered or spliced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationLink {
    /// Principal handing the right on
    pub delegator_id: String,

    /// Principal receiving the right
    pub delegate_id: String,

    /// Capability being delegated
    pub capability_id: String,

    /// When the delegation happened (Unix milliseconds)
    pub delegated_at: i64,

    /// blake3 digest of the previous link, hex; empty for the first link
    pub parent_digest: String,

    /// ed25519 signature by the delegator over this link's digest, hex
    pub signature: String,
}

impl DelegationLink {
    /// Canonical digest this link is signed over
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.delegator_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.delegate_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.capability_id.as_bytes());
        hasher.update(b"|");
        hasher.update(&self.delegated_at.to_le_bytes());
        hasher.update(b"|");
        hasher.update(self.parent_digest.as_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// A grant of rights on a resource URI to a principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Opaque capability id (UUIDv7)
    pub id: String,

    /// Principal holding the right
    pub principal_id: String,

    /// Resource the right covers; trailing `/*` matches any suffix
    pub resource_uri: String,

    /// Constraints on use
    #[serde(default)]
    pub constraints: Constraints,

    /// Issue timestamp (Unix milliseconds)
    pub issued_at: i64,

    /// Expiry (Unix milliseconds), `None` for no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Remaining delegation hops allowed
    pub delegation_depth: u8,

    /// Authority that issued the grant
    pub issuer_id: String,

    /// Signed chain, present on delegated capabilities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delegation_chain: Vec<DelegationLink>,

    /// Where the grant came from
    pub source: CapabilitySource,

    /// ed25519 signature by the issuer over [`Capability::digest`], hex
    pub signature: String,

    /// Permanently inert once set
    #[serde(default)]
    pub revoked: bool,
}

impl Capability {
    /// Canonical digest the issuer signs. Covers the identifying fields and
    /// the tail of the delegation chain so a chain cannot be swapped under
    /// an existing signature.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.principal_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.resource_uri.as_bytes());
        hasher.update(b"|");
        hasher.update(self.issuer_id.as_bytes());
        hasher.update(b"|");
        hasher.update(&self.issued_at.to_le_bytes());
        hasher.update(b"|");
        hasher.update(&self.expires_at.unwrap_or(0).to_le_bytes());
        hasher.update(b"|");
        hasher.update(&[self.delegation_depth]);
        hasher.update(b"|");
        if let Some(link) = self.delegation_chain.last() {
            hasher.update(&link.digest());
        }
        *hasher.finalize().as_bytes()
    }

    /// Whether the capability has expired at `now_ms`
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(expiry) if now_ms >= expiry)
    }

    /// Whether the capability is usable at `now_ms` (not revoked, not expired)
    pub fn is_active(&self, now_ms: i64) -> bool {
        !self.revoked && !self.is_expired(now_ms)
    }

    /// Whether this capability's URI covers the requested URI.
    ///
    /// A template ending in `/*` matches any suffix; otherwise the match is
    /// exact.
    pub fn matches_uri(&self, uri: &str) -> bool {
        uri_matches(&self.resource_uri, uri)
    }
}

/// Wildcard-aware URI match: `prefix/*` covers any suffix, everything else
/// is an exact comparison.
pub fn uri_matches(template: &str, uri: &str) -> bool {
    if let Some(prefix) = template.strip_suffix("/*") {
        uri.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    } else {
        template == uri
    }
}

/// Resolve `/self/` or a trailing `/self` in a template URI to the agent id
pub fn resolve_self(template: &str, agent_id: &str) -> String {
    if let Some(prefix) = template.strip_suffix("/self") {
        return format!("{}/{}", prefix, agent_id);
    }
    template.replace("/self/", &format!("/{}/", agent_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(uri: &str) -> Capability {
        Capability {
            id: uuid::Uuid::now_v7().to_string(),
            principal_id: "agent-001".to_string(),
            resource_uri: uri.to_string(),
            constraints: Constraints::none(),
            issued_at: 0,
            expires_at: None,
            delegation_depth: 3,
            issuer_id: "arbor-policy".to_string(),
            delegation_chain: vec![],
            source: CapabilitySource::TrustTier,
            signature: String::new(),
            revoked: false,
        }
    }

    #[test]
    fn test_uri_wildcard_match() {
        assert!(uri_matches("arbor://code/read/agent-001/*", "arbor://code/read/agent-001/x.rs"));
        assert!(uri_matches("arbor://code/read/agent-001/*", "arbor://code/read/agent-001"));
        assert!(!uri_matches("arbor://code/read/agent-001/*", "arbor://code/read/agent-002/x.rs"));
        assert!(!uri_matches(
            "arbor://code/read/agent-001/*",
            "arbor://code/read/agent-001abc/x.rs"
        ));
        assert!(uri_matches("arbor://shell/exec", "arbor://shell/exec"));
        assert!(!uri_matches("arbor://shell/exec", "arbor://shell/exec/rm"));
    }

    #[test]
    fn test_resolve_self() {
        assert_eq!(
            resolve_self("arbor://code/read/self/*", "agent-007"),
            "arbor://code/read/agent-007/*"
        );
        assert_eq!(
            resolve_self("arbor://shell/exec/self", "agent-007"),
            "arbor://shell/exec/agent-007"
        );
        assert_eq!(resolve_self("arbor://git/read/*", "agent-007"), "arbor://git/read/*");
    }

    #[test]
    fn test_expiry() {
        let mut cap = capability("arbor://code/read/agent-001/*");
        assert!(cap.is_active(1_000_000));
        cap.expires_at = Some(500);
        assert!(cap.is_expired(500));
        assert!(cap.is_expired(501));
        assert!(!cap.is_expired(499));
    }

    #[test]
    fn test_revoked_is_inert() {
        let mut cap = capability("arbor://code/read/agent-001/*");
        cap.revoked = true;
        assert!(!cap.is_active(0));
    }

    #[test]
    fn test_digest_covers_chain_tail() {
        let mut cap = capability("arbor://code/read/agent-001/*");
        let bare = cap.digest();
        cap.delegation_chain.push(DelegationLink {
            delegator_id: "agent-001".to_string(),
            delegate_id: "agent-002".to_string(),
            capability_id: cap.id.clone(),
            delegated_at: 42,
            parent_digest: String::new(),
            signature: String::new(),
        });
        assert_ne!(bare, cap.digest());
    }

    #[test]
    fn test_time_window_wrap() {
        let night = TimeWindow { start_hour: 22, end_hour: 6 };
        assert!(night.contains_hour(23));
        assert!(night.contains_hour(3));
        assert!(!night.contains_hour(12));

        let day = TimeWindow { start_hour: 9, end_hour: 17 };
        assert!(day.contains_hour(9));
        assert!(!day.contains_hour(17));
    }
}
