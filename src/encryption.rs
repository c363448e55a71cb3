//! Payload-at-rest encryption (§4.E, §9).
//!
//! Template bodies and job payloads are sealed with an AEAD construction
//! before they reach the durable queue or template store, keyed by the
//! process's `ENCRYPTION_KEY`. Sealed payloads carry a 1-byte key-id
//! prefix ahead of the nonce and ciphertext so a future key rotation can
//! keep decrypting payloads written under an older key (§9 forward
//! compatibility requirement); rotation itself is out of scope.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

/// Errors sealing or opening a payload.
#[derive(Debug, Error)]
pub enum CloakError {
    /// The ciphertext failed authentication or the key-id was unrecognized.
    #[error("payload could not be decrypted")]
    Open,

    /// The sealed payload is too short to contain a key id and nonce.
    #[error("sealed payload is truncated")]
    Truncated,

    /// The configured key is not a valid length for AES-256-GCM.
    #[error("invalid encryption key length")]
    InvalidKey,
}

/// Seals and opens payloads with a single active key, identified by
/// `key_id` in the first byte of every sealed payload.
pub struct Cloak {
    key_id: u8,
    cipher: Aes256Gcm,
}

impl Cloak {
    /// Construct a cloak from a 32-byte key and the key-id to stamp on
    /// sealed payloads.
    ///
    /// # Errors
    ///
    /// Returns [`CloakError::InvalidKey`] if `key` is not 32 bytes.
    pub fn new(key: &[u8], key_id: u8) -> Result<Self, CloakError> {
        if key.len() != 32 {
            return Err(CloakError::InvalidKey);
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            key_id,
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Seal `plaintext`, returning `[key_id][nonce][ciphertext]`.
    ///
    /// # Errors
    ///
    /// Returns [`CloakError::Open`] if the underlying AEAD seal fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CloakError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CloakError::Open)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(self.key_id);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a payload previously produced by [`Cloak::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`CloakError::Truncated`] if the payload is too short to
    /// contain a key id and nonce, or [`CloakError::Open`] if the key id
    /// does not match this cloak or authentication fails.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CloakError> {
        if sealed.len() < 1 + NONCE_LEN {
            return Err(CloakError::Truncated);
        }
        if sealed[0] != self.key_id {
            return Err(CloakError::Open);
        }

        let nonce = Nonce::from_slice(&sealed[1..1 + NONCE_LEN]);
        let ciphertext = &sealed[1 + NONCE_LEN..];
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CloakError::Open)
    }
}
