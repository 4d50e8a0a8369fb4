//! Sticky-session cookie codec.
//!
//! # Wire layout
//! ```text
//! base64( nonce[12] ‖ AES-256-GCM(key, nonce, backend address) )
//! ```
//!
//! A fresh random nonce is drawn for every cookie. Decoding fails closed:
//! anything that does not authenticate under the process key, or names a
//! backend that is no longer live, is treated as "no preference".

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Name of the cookie carrying the sealed backend address.
pub const STICKY_COOKIE: &str = "_backend";

/// Size of the sticky key in bytes.
pub const KEY_LEN: usize = 32;

/// Size of the per-cookie nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Reasons a cookie was not honoured. Never surfaced to clients.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StickyError {
    #[error("cookie is not valid base64")]
    Encoding,
    #[error("cookie shorter than nonce")]
    Truncated,
    #[error("cookie failed authentication")]
    Authentication,
    #[error("cookie payload is not a valid address")]
    Payload,
    #[error("backend {0} is not live")]
    Stale(String),
}

/// Seals and opens sticky cookies under one process-wide key.
#[derive(Clone)]
pub struct StickyCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for StickyCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StickyCodec").finish_non_exhaustive()
    }
}

impl StickyCodec {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Seal `backend` into a cookie value.
    pub fn encode(&self, backend: &str) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut out = Vec::with_capacity(NONCE_LEN + backend.len() + 16);
        out.extend_from_slice(&nonce);
        // Encryption with a well-formed key and nonce only fails for inputs
        // larger than the GCM limit, which an address never is.
        if let Ok(sealed) = self.cipher.encrypt(Nonce::from_slice(&nonce), backend.as_bytes()) {
            out.extend_from_slice(&sealed);
        }
        base64::engine::general_purpose::STANDARD.encode(out)
    }

    /// Open a cookie value and check the address is still among `live`.
    pub fn decode(&self, value: &str, live: &[String]) -> Result<String, StickyError> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|_| StickyError::Encoding)?;
        if data.len() < NONCE_LEN {
            return Err(StickyError::Truncated);
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| StickyError::Authentication)?;
        let addr = String::from_utf8(plain).map_err(|_| StickyError::Payload)?;

        if live.iter().any(|a| *a == addr) {
            Ok(addr)
        } else {
            Err(StickyError::Stale(addr))
        }
    }

    /// Like [`decode`](Self::decode), collapsing every rejection to `None`.
    pub fn preferred(&self, value: &str, live: &[String]) -> Option<String> {
        match self.decode(value, live) {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::debug!(reason = %e, "Ignoring sticky cookie");
                None
            }
        }
    }
}

/// Decode a base64 sticky key from configuration.
pub fn parse_key(encoded: &str) -> Result<[u8; KEY_LEN], String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("sticky key is not valid base64: {}", e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("sticky key must be {} bytes, got {}", KEY_LEN, b.len()))
}
