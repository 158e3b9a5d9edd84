//! Key material for a filesystem instance.

use super::utils::derive_key;
use super::{SecurePassphrase, KEY_SIZE};
use crate::error::CryptoError;
use crate::layout::SALT_SIZE;
use zeroize::Zeroize;

/// Holds the vault key and its salt for the lifetime of a filesystem
/// instance.
///
/// Both buffers are overwritten with zeros on drop and on explicit
/// teardown. Earlier copies made by the runtime or the allocator may
/// persist; the contract is best-effort reduction of the exposure window.
pub(crate) struct KeyManager {
    key: [u8; KEY_SIZE],
    salt: [u8; SALT_SIZE],
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("key", &"<redacted>")
            .field("salt", &self.salt)
            .finish()
    }
}

impl KeyManager {
    /// Derives the vault key from a passphrase and salt.
    pub fn from_passphrase(
        passphrase: &SecurePassphrase,
        salt: [u8; SALT_SIZE],
    ) -> Result<Self, CryptoError> {
        let key = derive_key(passphrase.as_bytes(), &salt)?;
        Ok(KeyManager { key, salt })
    }

    /// Wraps an externally derived key and the salt it was derived with.
    pub fn from_raw(key: [u8; KEY_SIZE], salt: [u8; SALT_SIZE]) -> Self {
        KeyManager { key, salt }
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    /// Explicit teardown zeroization. Idempotent.
    pub fn wipe(&mut self) {
        self.key.zeroize();
        self.salt.zeroize();
    }
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        self.wipe();
    }
}
