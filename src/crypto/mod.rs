//! Encryption subsystem: page codec, key material, and the verification
//! token that rejects a wrong passphrase before any user data is served.

pub mod cipher;
pub(crate) mod key_manager;
pub mod utils;
pub(crate) mod verifier;

pub use cipher::PageCipher;
pub(crate) use key_manager::KeyManager;
pub use utils::{derive_key, file_id_from_path};

use zeroize::ZeroizeOnDrop;

/// AES-256 key length.
pub const KEY_SIZE: usize = 32;
/// PBKDF2-HMAC-SHA-512 iteration count.
pub const KDF_ITERATIONS: u32 = 256_000;

/// Plaintext prefix of the verification token page.
pub(crate) const VERIFY_MAGIC: [u8; 16] = *b"PGLITE_ENC\0\0\0\0\0\0";

/// Relative path of the verification token inside the data directory.
pub(crate) const TOKEN_FILE_NAME: &str = ".encryption-verify";

/// Passphrase wrapper that zeroizes its bytes on drop.
///
/// Accepts arbitrary UTF-8, including empty and multi-kilobyte inputs.
#[derive(ZeroizeOnDrop)]
pub struct SecurePassphrase {
    data: Vec<u8>,
}

impl SecurePassphrase {
    pub fn new(passphrase: &str) -> Self {
        Self {
            data: passphrase.as_bytes().to_vec(),
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for SecurePassphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurePassphrase")
            .field("data", &"<redacted>")
            .finish()
    }
}
