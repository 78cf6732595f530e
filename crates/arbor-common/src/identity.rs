//! Identity collaborator interface
//!
//! Identity issuance is external; the core only verifies. A caller passing
//! `verify_identity: true` to authorize supplies a [`SignedRequest`], which
//! the verifier checks against the agent's registered public key, a
//! timestamp freshness window, and a replayed-nonce cache.
//!
//! The "not loaded" deployment is the [`NullIdentityVerifier`], which
//! reports unavailable rather than crashing the caller.

use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

use crate::error::IdentityError;

/// Request material signed by the calling agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRequest {
    /// Claimed agent id
    pub agent_id: String,

    /// Resource URI being requested
    pub resource_uri: String,

    /// Request timestamp (Unix milliseconds)
    pub timestamp: i64,

    /// Single-use nonce
    pub nonce: String,

    /// ed25519 signature over [`SignedRequest::digest`], hex
    pub signature: String,
}

impl SignedRequest {
    /// Canonical digest covered by the signature
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.agent_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.resource_uri.as_bytes());
        hasher.update(b"|");
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(b"|");
        hasher.update(self.nonce.as_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// Identity collaborator consumed by the authorization engine
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a signed request; returns the verified agent id
    async fn verify_request(
        &self,
        request: &SignedRequest,
    ) -> std::result::Result<String, IdentityError>;

    /// Look up the registered public key for an agent
    async fn lookup_public_key(
        &self,
        agent_id: &str,
    ) -> std::result::Result<VerifyingKey, IdentityError>;
}

/// ed25519-backed verifier over an in-process key registry
pub struct Ed25519IdentityVerifier {
    keys: DashMap<String, VerifyingKey>,
    /// Recently seen nonces, bounded FIFO
    seen_nonces: Mutex<VecDeque<String>>,
    nonce_capacity: usize,
    /// Maximum accepted request age in milliseconds
    max_age_ms: i64,
}

impl Ed25519IdentityVerifier {
    pub fn new(max_age_ms: i64, nonce_capacity: usize) -> Self {
        Self {
            keys: DashMap::new(),
            seen_nonces: Mutex::new(VecDeque::new()),
            nonce_capacity: nonce_capacity.max(1),
            max_age_ms,
        }
    }

    /// Register (or replace) an agent's public key
    pub fn register_key(&self, agent_id: &str, key: VerifyingKey) {
        self.keys.insert(agent_id.to_string(), key);
    }

    fn check_and_record_nonce(&self, nonce: &str) -> std::result::Result<(), IdentityError> {
        let mut seen = self.seen_nonces.lock();
        if seen.iter().any(|n| n == nonce) {
            return Err(IdentityError::ReplayedNonce(nonce.to_string()));
        }
        if seen.len() >= self.nonce_capacity {
            seen.pop_front();
        }
        seen.push_back(nonce.to_string());
        Ok(())
    }
}

impl Default for Ed25519IdentityVerifier {
    fn default() -> Self {
        // 5 minute freshness window, 10k nonce history
        Self::new(300_000, 10_000)
    }
}

#[async_trait]
impl IdentityVerifier for Ed25519IdentityVerifier {
    async fn verify_request(
        &self,
        request: &SignedRequest,
    ) -> std::result::Result<String, IdentityError> {
        let age_ms = chrono::Utc::now().timestamp_millis() - request.timestamp;
        if age_ms.abs() > self.max_age_ms {
            return Err(IdentityError::ExpiredTimestamp {
                age_ms,
                max_age_ms: self.max_age_ms,
            });
        }

        let key = self.lookup_public_key(&request.agent_id).await?;

        let signature_bytes =
            hex::decode(&request.signature).map_err(|_| IdentityError::InvalidSignature)?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| IdentityError::InvalidSignature)?;

        key.verify(&request.digest(), &signature).map_err(|_| {
            warn!(agent_id = %request.agent_id, "signed request failed verification");
            IdentityError::InvalidSignature
        })?;

        // Only consume the nonce after the signature checks out, so a
        // forged request cannot burn a legitimate nonce.
        self.check_and_record_nonce(&request.nonce)?;

        Ok(request.agent_id.clone())
    }

    async fn lookup_public_key(
        &self,
        agent_id: &str,
    ) -> std::result::Result<VerifyingKey, IdentityError> {
        self.keys
            .get(agent_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| IdentityError::KeyNotFound(agent_id.to_string()))
    }
}

/// Null implementation for deployments without an identity service
#[derive(Default)]
pub struct NullIdentityVerifier;

#[async_trait]
impl IdentityVerifier for NullIdentityVerifier {
    async fn verify_request(
        &self,
        _request: &SignedRequest,
    ) -> std::result::Result<String, IdentityError> {
        Err(IdentityError::Unavailable)
    }

    async fn lookup_public_key(
        &self,
        _agent_id: &str,
    ) -> std::result::Result<VerifyingKey, IdentityError> {
        Err(IdentityError::Unavailable)
    }
}

/// Helper for tests and local tooling: sign a request with a signing key
pub fn sign_request(
    signing_key: &ed25519_dalek::SigningKey,
    agent_id: &str,
    resource_uri: &str,
    nonce: &str,
) -> SignedRequest {
    use ed25519_dalek::Signer;

    let mut request = SignedRequest {
        agent_id: agent_id.to_string(),
        resource_uri: resource_uri.to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
        nonce: nonce.to_string(),
        signature: String::new(),
    };
    let signature = signing_key.sign(&request.digest());
    request.signature = hex::encode(signature.to_bytes());
    request
}

// Re-export for downstream signing use
pub use ed25519_dalek::SigningKey;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    #[tokio::test]
    async fn test_valid_request_verifies() {
        let signing_key = keypair();
        let verifier = Ed25519IdentityVerifier::default();
        verifier.register_key("agent-001", signing_key.verifying_key());

        let request = sign_request(&signing_key, "agent-001", "arbor://code/read/x", "n-1");
        let agent_id = verifier.verify_request(&request).await.unwrap();
        assert_eq!(agent_id, "agent-001");
    }

    #[tokio::test]
    async fn test_replayed_nonce_rejected() {
        let signing_key = keypair();
        let verifier = Ed25519IdentityVerifier::default();
        verifier.register_key("agent-001", signing_key.verifying_key());

        let request = sign_request(&signing_key, "agent-001", "arbor://code/read/x", "n-1");
        verifier.verify_request(&request).await.unwrap();
        let err = verifier.verify_request(&request).await.unwrap_err();
        assert!(matches!(err, IdentityError::ReplayedNonce(_)));
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let signing_key = keypair();
        let verifier = Ed25519IdentityVerifier::new(1_000, 16);
        verifier.register_key("agent-001", signing_key.verifying_key());

        let mut request = sign_request(&signing_key, "agent-001", "arbor://code/read/x", "n-2");
        request.timestamp -= 10_000;
        // Re-sign with the stale timestamp so only freshness fails
        use ed25519_dalek::Signer;
        request.signature = hex::encode(signing_key.sign(&request.digest()).to_bytes());

        let err = verifier.verify_request(&request).await.unwrap_err();
        assert!(matches!(err, IdentityError::ExpiredTimestamp { .. }));
    }

    #[tokio::test]
    async fn test_tampered_request_rejected() {
        let signing_key = keypair();
        let verifier = Ed25519IdentityVerifier::default();
        verifier.register_key("agent-001", signing_key.verifying_key());

        let mut request = sign_request(&signing_key, "agent-001", "arbor://code/read/x", "n-3");
        request.resource_uri = "arbor://shell/exec/root".to_string();

        let err = verifier.verify_request(&request).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidSignature));
    }

    #[tokio::test]
    async fn test_unknown_agent_rejected() {
        let signing_key = keypair();
        let verifier = Ed25519IdentityVerifier::default();
        let request = sign_request(&signing_key, "agent-unknown", "arbor://code/read/x", "n-4");
        let err = verifier.verify_request(&request).await.unwrap_err();
        assert!(matches!(err, IdentityError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn test_null_verifier_unavailable() {
        let verifier = NullIdentityVerifier;
        let signing_key = keypair();
        let request = sign_request(&signing_key, "agent-001", "arbor://code/read/x", "n-5");
        assert!(matches!(
            verifier.verify_request(&request).await,
            Err(IdentityError::Unavailable)
        ));
    }
}
