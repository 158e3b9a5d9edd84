//! On-disk layout constants and the logical/physical size mapper.
//!
//! An encrypted file is `[salt(16)] [file_id(32)] [page_0] [page_1] ...`
//! where each stored page is `[iv(12)] [tag(16)] [ciphertext(8192)]`. All
//! arithmetic mapping the host database's byte-oriented view onto that
//! layout lives here.

use crate::error::CryptoError;

/// Logical page size of the host database.
pub const PAGE_SIZE: usize = 8192;
/// PBKDF2 salt length.
pub const SALT_SIZE: usize = 16;
/// AES-GCM IV length.
pub const IV_SIZE: usize = 12;
/// AES-GCM authentication tag length.
pub const AUTH_TAG_SIZE: usize = 16;
/// Per-file random identifier length.
pub const FILE_ID_SIZE: usize = 32;
/// Header prefix of every encrypted file: salt followed by file id.
pub const FILE_HEADER_SIZE: usize = SALT_SIZE + FILE_ID_SIZE;
/// Stored size of one page after encryption.
pub const ENCRYPTED_PAGE_SIZE: usize = PAGE_SIZE + IV_SIZE + AUTH_TAG_SIZE;

/// Logical size visible to the host database for a file of `physical` bytes.
///
/// Anything below the header maps to zero. A payload that is not a whole
/// number of encrypted pages violates the format.
pub(crate) fn logical_size(physical: u64) -> Result<u64, CryptoError> {
    if physical < FILE_HEADER_SIZE as u64 {
        return Ok(0);
    }
    let payload = physical - FILE_HEADER_SIZE as u64;
    if payload == 0 {
        return Ok(0);
    }
    if payload % ENCRYPTED_PAGE_SIZE as u64 != 0 {
        return Err(CryptoError::PartialPage(physical));
    }
    Ok(payload / ENCRYPTED_PAGE_SIZE as u64 * PAGE_SIZE as u64)
}

/// Number of whole encrypted pages stored in a file of `physical` bytes.
pub(crate) fn page_count(physical: u64) -> u64 {
    if physical < FILE_HEADER_SIZE as u64 {
        return 0;
    }
    (physical - FILE_HEADER_SIZE as u64) / ENCRYPTED_PAGE_SIZE as u64
}

/// Physical offset of encrypted page `index`.
pub(crate) fn page_offset(index: u64) -> u64 {
    FILE_HEADER_SIZE as u64 + index * ENCRYPTED_PAGE_SIZE as u64
}

/// Index of the page containing logical byte `pos`.
pub(crate) fn page_index_of(pos: u64) -> u64 {
    pos / PAGE_SIZE as u64
}

/// Number of pages needed to hold `len` logical bytes.
pub(crate) fn pages_for_len(len: u64) -> u64 {
    len.div_ceil(PAGE_SIZE as u64)
}

/// Physical file size for a whole number of pages.
pub(crate) fn physical_size(pages: u64) -> u64 {
    FILE_HEADER_SIZE as u64 + pages * ENCRYPTED_PAGE_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_bit_exact() {
        assert_eq!(PAGE_SIZE, 8192);
        assert_eq!(FILE_HEADER_SIZE, 48);
        assert_eq!(ENCRYPTED_PAGE_SIZE, 8220);
    }

    #[test]
    fn logical_size_below_header_is_zero() {
        assert_eq!(logical_size(0).unwrap(), 0);
        assert_eq!(logical_size(1).unwrap(), 0);
        assert_eq!(logical_size(47).unwrap(), 0);
        assert_eq!(logical_size(48).unwrap(), 0);
    }

    #[test]
    fn logical_size_counts_whole_pages() {
        assert_eq!(logical_size(48 + 8220).unwrap(), 8192);
        assert_eq!(logical_size(48 + 3 * 8220).unwrap(), 3 * 8192);
    }

    #[test]
    fn logical_size_rejects_partial_pages() {
        assert!(matches!(
            logical_size(48 + 8220 + 1),
            Err(CryptoError::PartialPage(_))
        ));
        assert!(matches!(
            logical_size(48 + 100),
            Err(CryptoError::PartialPage(_))
        ));
    }

    #[test]
    fn page_offsets() {
        assert_eq!(page_offset(0), 48);
        assert_eq!(page_offset(1), 48 + 8220);
        assert_eq!(page_offset(2), 48 + 2 * 8220);
    }

    #[test]
    fn page_index_of_position() {
        assert_eq!(page_index_of(0), 0);
        assert_eq!(page_index_of(8191), 0);
        assert_eq!(page_index_of(8192), 1);
        assert_eq!(page_index_of(16384), 2);
    }

    #[test]
    fn pages_for_len_rounds_up() {
        assert_eq!(pages_for_len(0), 0);
        assert_eq!(pages_for_len(1), 1);
        assert_eq!(pages_for_len(8192), 1);
        assert_eq!(pages_for_len(8193), 2);
        assert_eq!(pages_for_len(24576), 3);
    }

    #[test]
    fn physical_size_round_trips_page_count() {
        for pages in [0u64, 1, 2, 17] {
            assert_eq!(page_count(physical_size(pages)), pages);
        }
    }
}
