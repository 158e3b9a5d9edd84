//! Verification token: proves the derived key is correct before any user
//! file is served.
//!
//! The token lives at a fixed relative path inside the data directory and
//! holds the instance salt followed by one encrypted page whose plaintext is
//! a well-known magic constant. Its page is bound to a deterministic file id
//! (the SHA-256 of the token's relative path) at page number 0, so a token
//! cannot be substituted from another directory's files.

use super::cipher::PageCipher;
use super::utils::file_id_from_path;
use super::{TOKEN_FILE_NAME, VERIFY_MAGIC};
use crate::error::{FsError, Result};
use crate::layout::{ENCRYPTED_PAGE_SIZE, PAGE_SIZE, SALT_SIZE};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Total on-disk size of the token: salt prefix plus one encrypted page.
pub(crate) const TOKEN_SIZE: usize = SALT_SIZE + ENCRYPTED_PAGE_SIZE;

pub(crate) fn token_path(dir: &Path) -> PathBuf {
    dir.join(TOKEN_FILE_NAME)
}

/// Reads the authoritative salt from an existing token, or `None` when the
/// directory has never been opened.
///
/// A token of the wrong length is treated exactly like a wrong key.
pub(crate) fn load_token_salt(dir: &Path) -> Result<Option<[u8; SALT_SIZE]>> {
    let bytes = match fs::read(token_path(dir)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if bytes.len() != TOKEN_SIZE {
        return Err(FsError::InvalidPassphrase);
    }
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&bytes[..SALT_SIZE]);
    Ok(Some(salt))
}

/// Creates the token on first open, or checks it against the derived key.
///
/// Every failure mode of an existing token (wrong length, authentication
/// failure, magic mismatch) collapses into the single constant-message
/// `InvalidPassphrase`; a caller must not be able to tell a wrong key from
/// a corrupted token.
pub(crate) fn verify_or_create_token(
    dir: &Path,
    cipher: &PageCipher,
    salt: &[u8; SALT_SIZE],
) -> Result<()> {
    let path = token_path(dir);
    let token_id = file_id_from_path(TOKEN_FILE_NAME);

    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return create_token(dir, &path, cipher, salt, &token_id);
        }
        Err(err) => return Err(err.into()),
    };

    if bytes.len() != TOKEN_SIZE {
        return Err(FsError::InvalidPassphrase);
    }
    let plaintext = cipher
        .decrypt_page(&bytes[SALT_SIZE..], 0, &token_id)
        .map_err(|_| FsError::InvalidPassphrase)?;
    if plaintext[..VERIFY_MAGIC.len()] != VERIFY_MAGIC {
        return Err(FsError::InvalidPassphrase);
    }
    Ok(())
}

fn create_token(
    dir: &Path,
    path: &Path,
    cipher: &PageCipher,
    salt: &[u8; SALT_SIZE],
    token_id: &[u8; 32],
) -> Result<()> {
    let mut plaintext = vec![0u8; PAGE_SIZE];
    plaintext[..VERIFY_MAGIC.len()].copy_from_slice(&VERIFY_MAGIC);

    let encrypted = cipher
        .encrypt_page(&plaintext, 0, token_id)
        .map_err(|err| FsError::eio(err.to_string()))?;

    let mut bytes = Vec::with_capacity(TOKEN_SIZE);
    bytes.extend_from_slice(salt);
    bytes.extend_from_slice(&encrypted);

    // Write-then-rename so a crash never leaves a truncated token behind.
    let tmp = dir.join(format!("{TOKEN_FILE_NAME}.tmp"));
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
