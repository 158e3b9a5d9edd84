//! AES-256-GCM page codec.
//!
//! Each logical page is encrypted independently. The page's identity, the
//! owning file's 32-byte id followed by the big-endian page number, rides
//! along as additional authenticated data, so a stored page cannot be
//! replayed at another page slot or inside another file without detection.

use super::utils::generate_iv;
use super::KEY_SIZE;
use crate::error::CryptoError;
use crate::layout::{
    AUTH_TAG_SIZE, ENCRYPTED_PAGE_SIZE, FILE_ID_SIZE, IV_SIZE, PAGE_SIZE,
};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

pub struct PageCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for PageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCipher")
            .field("cipher", &"<Aes256Gcm>")
            .finish()
    }
}

fn page_aad(file_id: &[u8; FILE_ID_SIZE], page_no: u32) -> [u8; FILE_ID_SIZE + 4] {
    let mut aad = [0u8; FILE_ID_SIZE + 4];
    aad[..FILE_ID_SIZE].copy_from_slice(file_id);
    aad[FILE_ID_SIZE..].copy_from_slice(&page_no.to_be_bytes());
    aad
}

impl PageCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        let cipher = Aes256Gcm::new(key);

        Self { cipher }
    }

    /// Encrypts one logical page into its stored form `iv || tag || ct`.
    ///
    /// Plaintext shorter than [`PAGE_SIZE`] is zero-padded before
    /// encryption; the caller's logical file size decides which trailing
    /// bytes are visible. A fresh IV is sampled on every call.
    pub fn encrypt_page(
        &self,
        plaintext: &[u8],
        page_no: u32,
        file_id: &[u8; FILE_ID_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > PAGE_SIZE {
            return Err(CryptoError::PageTooLarge(plaintext.len()));
        }

        let mut padded = vec![0u8; PAGE_SIZE];
        padded[..plaintext.len()].copy_from_slice(plaintext);

        let iv = generate_iv()?;
        let aad = page_aad(file_id, page_no);

        // Aes256Gcm yields ciphertext || tag; the stored layout wants the
        // tag between the IV and the ciphertext.
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &padded,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;
        debug_assert_eq!(sealed.len(), PAGE_SIZE + AUTH_TAG_SIZE);

        let mut out = Vec::with_capacity(ENCRYPTED_PAGE_SIZE);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&sealed[PAGE_SIZE..]);
        out.extend_from_slice(&sealed[..PAGE_SIZE]);
        Ok(out)
    }

    /// Decrypts and authenticates one stored page, returning the full
    /// [`PAGE_SIZE`] plaintext.
    ///
    /// Any tag, IV, ciphertext, AAD, or key mismatch yields the same
    /// cause-free [`CryptoError::Auth`].
    pub fn decrypt_page(
        &self,
        encrypted: &[u8],
        page_no: u32,
        file_id: &[u8; FILE_ID_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        if encrypted.len() != ENCRYPTED_PAGE_SIZE {
            return Err(CryptoError::WrongLength {
                expected: ENCRYPTED_PAGE_SIZE,
                actual: encrypted.len(),
            });
        }

        let iv = &encrypted[..IV_SIZE];
        let tag = &encrypted[IV_SIZE..IV_SIZE + AUTH_TAG_SIZE];
        let ciphertext = &encrypted[IV_SIZE + AUTH_TAG_SIZE..];

        let mut sealed = Vec::with_capacity(PAGE_SIZE + AUTH_TAG_SIZE);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let aad = page_aad(file_id, page_no);

        self.cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: &sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Auth)
    }
}
