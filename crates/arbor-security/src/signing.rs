//! Capability signing and chain verification
//!
//! Every grant is signed by the issuing authority over the capability's
//! blake3 digest. Delegation links are countersigned by the same authority
//! when the store mediates a delegation; each link's digest covers its
//! parent, so a chain cannot be spliced, reordered, or extended without
//! the authority's key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use arbor_common::{Capability, CapabilityError, DelegationLink};

/// Signs and verifies capability grants for one issuing authority
pub struct CapabilitySigner {
    issuer_id: String,
    signing_key: SigningKey,
}

impl CapabilitySigner {
    pub fn new(issuer_id: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            issuer_id: issuer_id.into(),
            signing_key,
        }
    }

    /// Fresh authority with a generated key
    pub fn generate(issuer_id: impl Into<String>) -> Self {
        Self::new(issuer_id, SigningKey::generate(&mut OsRng))
    }

    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Stamp the issuer and signature onto a capability
    pub fn sign_capability(&self, capability: &mut Capability) {
        capability.issuer_id = self.issuer_id.clone();
        let signature = self.signing_key.sign(&capability.digest());
        capability.signature = hex::encode(signature.to_bytes());
    }

    /// Sign one delegation link
    pub fn sign_link(&self, link: &mut DelegationLink) {
        let signature = self.signing_key.sign(&link.digest());
        link.signature = hex::encode(signature.to_bytes());
    }

    fn verify_bytes(
        &self,
        message: &[u8; 32],
        signature_hex: &str,
        subject: &str,
    ) -> Result<(), CapabilityError> {
        let bytes = hex::decode(signature_hex)
            .map_err(|_| CapabilityError::InvalidSignature(subject.to_string()))?;
        let signature = Signature::from_slice(&bytes)
            .map_err(|_| CapabilityError::InvalidSignature(subject.to_string()))?;
        self.verifying_key()
            .verify(message, &signature)
            .map_err(|_| CapabilityError::InvalidSignature(subject.to_string()))
    }

    /// Verify the grant signature
    pub fn verify_capability(&self, capability: &Capability) -> Result<(), CapabilityError> {
        self.verify_bytes(&capability.digest(), &capability.signature, &capability.id)
    }

    /// Walk and verify the delegation chain: every link signed, parent
    /// digests intact, chain length within the depth cap, and the chain
    /// terminating at the capability's principal.
    pub fn verify_chain(
        &self,
        capability: &Capability,
        max_depth: u8,
    ) -> Result<(), CapabilityError> {
        let chain = &capability.delegation_chain;
        if chain.is_empty() {
            return Ok(());
        }
        if chain.len() > max_depth as usize {
            return Err(CapabilityError::DelegationDepthExceeded {
                depth: chain.len() as u8,
                max: max_depth,
            });
        }

        let mut parent_digest = String::new();
        for (i, link) in chain.iter().enumerate() {
            if link.parent_digest != parent_digest {
                return Err(CapabilityError::BrokenChain {
                    link: i,
                    reason: "parent digest mismatch".to_string(),
                });
            }
            if i > 0 && chain[i - 1].delegate_id != link.delegator_id {
                return Err(CapabilityError::BrokenChain {
                    link: i,
                    reason: format!(
                        "delegator {} is not the previous delegate {}",
                        link.delegator_id,
                        chain[i - 1].delegate_id
                    ),
                });
            }
            self.verify_bytes(&link.digest(), &link.signature, &capability.id)?;
            parent_digest = hex::encode(link.digest());
        }

        if let Some(last) = chain.last() {
            if last.delegate_id != capability.principal_id {
                return Err(CapabilityError::BrokenChain {
                    link: chain.len() - 1,
                    reason: format!(
                        "chain ends at {}, capability held by {}",
                        last.delegate_id, capability.principal_id
                    ),
                });
            }
        }
        Ok(())
    }
}
