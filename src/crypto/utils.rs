//! Random material and key derivation helpers.

use super::{KDF_ITERATIONS, KEY_SIZE};
use crate::error::CryptoError;
use crate::layout::{FILE_ID_SIZE, IV_SIZE, SALT_SIZE};
use getrandom::getrandom;
use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::{Digest, Sha256, Sha512};

pub(crate) fn random_salt() -> Result<[u8; SALT_SIZE], CryptoError> {
    let mut salt = [0u8; SALT_SIZE];
    getrandom(&mut salt).map_err(|_| CryptoError::Rng)?;
    Ok(salt)
}

pub(crate) fn random_file_id() -> Result<[u8; FILE_ID_SIZE], CryptoError> {
    let mut id = [0u8; FILE_ID_SIZE];
    getrandom(&mut id).map_err(|_| CryptoError::Rng)?;
    Ok(id)
}

pub(crate) fn generate_iv() -> Result<[u8; IV_SIZE], CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    getrandom(&mut iv).map_err(|_| CryptoError::Rng)?;
    Ok(iv)
}

/// PBKDF2-HMAC-SHA-512 key derivation.
///
/// Deterministic: identical (passphrase, salt) yields the identical key
/// across calls and processes.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
) -> Result<[u8; KEY_SIZE], CryptoError> {
    let mut key = [0u8; KEY_SIZE];

    pbkdf2::<Hmac<Sha512>>(passphrase, salt, KDF_ITERATIONS, &mut key)
        .map_err(|_| CryptoError::KeyDerivation)?;

    Ok(key)
}

/// Deterministic file identifier for a well-known relative path.
///
/// Only the verification token uses this; user files get random identifiers.
pub fn file_id_from_path(relative_path: &str) -> [u8; FILE_ID_SIZE] {
    let digest = Sha256::digest(relative_path.as_bytes());
    let mut id = [0u8; FILE_ID_SIZE];
    id.copy_from_slice(&digest);
    id
}
