//! Link signing
//!
//! A signed reference is a file id plus the hex-encoded HMAC-SHA256 of that
//! id under the service key. Signatures carry no expiry; expiry is enforced
//! by the file record alone.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// HMAC type alias for SHA-256
type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("link signing key must not be empty")]
    EmptyKey,

    #[error("invalid link signing key: {0}")]
    InvalidKey(String),
}

#[derive(Clone)]
pub struct LinkSigner {
    mac: HmacSha256,
}

impl LinkSigner {
    pub fn new(key: &[u8]) -> Result<Self, SignerError> {
        if key.is_empty() {
            return Err(SignerError::EmptyKey);
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Hex-encoded HMAC of `id`. Deterministic for a given key.
    pub fn sign(&self, id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check `token` against `id` in constant time. Tokens that are not
    /// valid hex are rejected without touching the MAC.
    pub fn verify(&self, id: &str, token: &str) -> bool {
        let Ok(provided) = hex::decode(token) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac.verify_slice(&provided).is_ok()
    }
}

impl std::fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSigner").finish_non_exhaustive()
    }
}
