//! AES-256-GCM cipher service with a lazily generated session key.
//!
//! The key lives only in memory and is never exposed as bytes. Clearing it
//! makes every payload sealed under it permanently unreadable, which is how
//! logout wipes session-bound secrets.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Length of the GCM nonce (96 bit).
pub const IV_LEN: usize = 12;

/// A ciphertext together with the IV it was sealed under, both base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub iv: String,
    pub data: String,
}

/// Opaque, non-exportable symmetric key.
///
/// Only the initialized cipher is retained; there is no accessor for the
/// underlying key material.
pub struct SessionKey {
    cipher: Aes256Gcm,
}

impl SessionKey {
    fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Cipher errors. Only encryption can fail outward; decryption reports
/// failure as `None`.
#[derive(Debug)]
pub enum CipherError {
    Encryption(String),
}

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherError::Encryption(e) => write!(f, "Encryption error: {e}"),
        }
    }
}

impl std::error::Error for CipherError {}

/// Holds the session key and performs all symmetric crypto for the crate.
///
/// One instance is shared by reference (see [`SharedCipher`]) between the
/// encrypted store and the fingerprint collector.
#[derive(Debug, Default)]
pub struct CipherService {
    key: Mutex<Option<Arc<SessionKey>>>,
}

impl CipherService {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<SessionKey>>> {
        self.key.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the current key, generating one if none exists.
    ///
    /// Generation happens under the slot lock, so concurrent first callers
    /// all receive the same key.
    pub fn key(&self) -> Arc<SessionKey> {
        let mut slot = self.slot();
        slot.get_or_insert_with(|| {
            debug!("Generating new session key");
            Arc::new(SessionKey::generate())
        })
        .clone()
    }

    /// Whether a key is currently held.
    pub fn has_key(&self) -> bool {
        self.slot().is_some()
    }

    /// Encrypt a UTF-8 string under the current key with a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload, CipherError> {
        let key = self.key();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = key
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        Ok(EncryptedPayload {
            iv: STANDARD.encode(nonce),
            data: STANDARD.encode(ciphertext),
        })
    }

    /// Decrypt a payload under the current key.
    ///
    /// Returns `None` for malformed base64, a wrong IV length, a failed tag
    /// check (tampering or a cleared key) or non-UTF-8 plaintext.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Option<String> {
        let iv = match STANDARD.decode(&payload.iv) {
            Ok(iv) if iv.len() == IV_LEN => iv,
            Ok(iv) => {
                debug!(len = iv.len(), "Rejecting payload with bad IV length");
                return None;
            }
            Err(e) => {
                debug!("Rejecting payload with malformed IV: {e}");
                return None;
            }
        };
        let ciphertext = STANDARD
            .decode(&payload.data)
            .map_err(|e| debug!("Rejecting payload with malformed data: {e}"))
            .ok()?;

        let key = self.key();
        let plaintext = key
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| debug!("Payload failed authentication"))
            .ok()?;

        String::from_utf8(plaintext).ok()
    }

    /// SHA-256 of the input as 64 lowercase hex characters.
    pub fn hash(&self, input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    /// Drop the current key. The next use generates a new, unrelated key.
    pub fn clear_key(&self) {
        if self.slot().take().is_some() {
            debug!("Session key cleared");
        }
    }
}

/// Cipher service shared between dependents.
pub type SharedCipher = Arc<CipherService>;

/// Create a new shared cipher service.
pub fn create_shared_cipher() -> SharedCipher {
    Arc::new(CipherService::new())
}
