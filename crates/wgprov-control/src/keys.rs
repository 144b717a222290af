//! WireGuard-compatible keypair generation
//!
//! Thin glue over x25519: the tunnel protocol's cryptography itself is
//! not implemented here, only the key material it consumes. Keys are
//! carried base64-encoded, matching the `wg` tooling format.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key is not valid base64")]
    InvalidBase64,

    #[error("key must decode to 32 bytes")]
    InvalidLength,
}

/// A freshly generated client keypair, base64-encoded
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private_key: BASE64.encode(secret.to_bytes()),
            public_key: BASE64.encode(public.as_bytes()),
        }
    }
}

// Keep the private half out of logs.
impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[redacted]")
            .finish()
    }
}

/// Check that a base64 string is plausible 32-byte key material
pub fn validate_key(encoded: &str) -> Result<(), KeyError> {
    let bytes = BASE64.decode(encoded).map_err(|_| KeyError::InvalidBase64)?;
    if bytes.len() != 32 {
        return Err(KeyError::InvalidLength);
    }
    Ok(())
}
