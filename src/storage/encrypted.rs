//! Encrypted key/value store on top of any [`StorageBackend`].
//!
//! Values are serialized to JSON, sealed with the shared cipher service and
//! written as `{"iv": "...", "data": "..."}` under `prefix + key`. Reads never
//! fail outward: anything that cannot be decrypted or decoded reads as absent.

use crate::crypto::{CipherError, EncryptedPayload, SharedCipher};
use crate::storage::backend::{StorageBackend, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default key prefix for stores created without an explicit one.
pub const DEFAULT_PREFIX: &str = "sg_";

/// Errors surfaced by [`EncryptedStore`] writes.
#[derive(Debug)]
pub enum StoreError {
    Serialization(String),
    Encryption(CipherError),
    Backend(StorageError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Encryption(e) => write!(f, "{e}"),
            StoreError::Backend(e) => write!(f, "Storage backend error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        StoreError::Backend(e)
    }
}

impl From<CipherError> for StoreError {
    fn from(e: CipherError) -> Self {
        StoreError::Encryption(e)
    }
}

/// Encrypting wrapper around a storage backend.
pub struct EncryptedStore {
    backend: Arc<dyn StorageBackend>,
    cipher: SharedCipher,
    prefix: String,
}

impl EncryptedStore {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        cipher: SharedCipher,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            cipher,
            prefix: prefix.into(),
        }
    }

    /// Store using [`DEFAULT_PREFIX`].
    pub fn with_default_prefix(backend: Arc<dyn StorageBackend>, cipher: SharedCipher) -> Self {
        Self::new(backend, cipher, DEFAULT_PREFIX)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Serialize, encrypt and write `value` under `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let plaintext =
            serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let payload = self.cipher.encrypt(&plaintext)?;
        let stored =
            serde_json::to_string(&payload).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.backend.set_item(&self.full_key(key), &stored)?;
        Ok(())
    }

    /// Read and decrypt the value under `key`.
    ///
    /// Returns `None` when the key is absent, the stored payload is
    /// malformed, decryption fails (for instance after the key was cleared)
    /// or the plaintext does not decode as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.full_key(key);
        let stored = match self.backend.get_item(&full_key) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %full_key, "Storage read failed: {e}");
                return None;
            }
        };

        let payload: EncryptedPayload = match serde_json::from_str(&stored) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(key = %full_key, "Stored value is not an encrypted payload: {e}");
                return None;
            }
        };

        let plaintext = self.cipher.decrypt(&payload)?;
        serde_json::from_str(&plaintext)
            .map_err(|e| debug!(key = %full_key, "Decrypted value has unexpected shape: {e}"))
            .ok()
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove_item(&self.full_key(key))?;
        Ok(())
    }

    /// Whether a value exists under `key`, without decrypting it.
    pub fn has(&self, key: &str) -> bool {
        matches!(self.backend.get_item(&self.full_key(key)), Ok(Some(_)))
    }

    /// Remove every key carrying this store's prefix.
    ///
    /// Does nothing on backends that cannot enumerate their keys.
    pub fn clear(&self) -> Result<(), StoreError> {
        let Some(len) = self.backend.len() else {
            debug!("Backend is not enumerable; clear skipped");
            return Ok(());
        };

        let owned: Vec<String> = (0..len)
            .filter_map(|i| self.backend.key(i))
            .filter(|k| k.starts_with(&self.prefix))
            .collect();

        for key in &owned {
            self.backend.remove_item(key)?;
        }
        debug!(removed = owned.len(), prefix = %self.prefix, "Cleared encrypted store");
        Ok(())
    }
}
