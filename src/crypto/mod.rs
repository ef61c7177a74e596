//! Symmetric crypto for the session guardian.
//!
//! A single [`CipherService`] owns the session key. Share it with
//! [`SharedCipher`] rather than creating one per consumer, otherwise each
//! consumer ends up with its own key.

pub mod cipher;

// Re-export commonly used types
pub use cipher::{
    create_shared_cipher, CipherError, CipherService, EncryptedPayload, SessionKey, SharedCipher,
    IV_LEN,
};
