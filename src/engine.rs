//! Page-aligned I/O engine.
//!
//! Translates the caller's byte-granularity reads and writes into
//! page-granularity cryptographic operations against the stored layout.
//! Partial-page writes go through read-modify-write; pages created beyond
//! the current end of file start as zero plaintext.

use crate::crypto::utils::random_file_id;
use crate::crypto::PageCipher;
use crate::error::{CryptoError, Errno, FsError, Result};
use crate::layout::{
    self, ENCRYPTED_PAGE_SIZE, FILE_HEADER_SIZE, FILE_ID_SIZE, PAGE_SIZE, SALT_SIZE,
};
use std::fs::File;
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileExt;

fn page_no(index: u64) -> Result<u32> {
    u32::try_from(index)
        .map_err(|_| FsError::posix(Errno::EINVAL, CryptoError::PageOutOfRange(index).to_string()))
}

fn decrypt_failed(page_no: u32) -> FsError {
    FsError::eio(format!(
        "decryption failed for page {page_no}, file may be corrupt"
    ))
}

fn encrypt_failed(err: CryptoError) -> FsError {
    FsError::eio(err.to_string())
}

/// Reads as much of `out` as the file holds at `offset`. Returns the byte
/// count, which is zero at EOF and never partial mid-file unless the file
/// itself ends mid-page.
fn read_stored_page(file: &File, offset: u64, out: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < out.len() {
        match file.read_at(&mut out[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Logical byte length of an encrypted file.
pub(crate) fn logical_len(file: &File) -> Result<u64> {
    let physical = file.metadata()?.len();
    layout::logical_size(physical).map_err(|err| FsError::eio(err.to_string()))
}

/// Reads the file id from the header, or `None` when no header exists yet.
pub(crate) fn read_file_id(file: &File) -> Result<Option<[u8; FILE_ID_SIZE]>> {
    let physical = file.metadata()?.len();
    if physical < FILE_HEADER_SIZE as u64 {
        return Ok(None);
    }
    let mut id = [0u8; FILE_ID_SIZE];
    file.read_exact_at(&mut id, SALT_SIZE as u64)?;
    Ok(Some(id))
}

/// Writes a fresh header (salt followed by a new random file id) at the
/// start of the file and returns the id. Any previously stored pages are
/// conceptually discarded: they were bound to the old id.
pub(crate) fn init_header(file: &File, salt: &[u8; SALT_SIZE]) -> Result<[u8; FILE_ID_SIZE]> {
    let file_id = random_file_id().map_err(|err| FsError::eio(err.to_string()))?;
    let mut header = [0u8; FILE_HEADER_SIZE];
    header[..SALT_SIZE].copy_from_slice(salt);
    header[SALT_SIZE..].copy_from_slice(&file_id);
    file.write_all_at(&header, 0)?;
    Ok(file_id)
}

/// Reads up to `buf.len()` logical bytes starting at `pos`.
///
/// Returns the number of bytes copied; page-aligned EOF ends the read
/// early, a mid-page EOF is a format violation.
pub(crate) fn read_at(
    file: &File,
    cipher: &PageCipher,
    file_id: &[u8; FILE_ID_SIZE],
    pos: u64,
    buf: &mut [u8],
) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let len = buf.len() as u64;
    let first = layout::page_index_of(pos);
    let last = layout::page_index_of(pos + len - 1);

    let mut copied = 0usize;
    for index in first..=last {
        let page = page_no(index)?;
        let mut stored = vec![0u8; ENCRYPTED_PAGE_SIZE];
        let n = read_stored_page(file, layout::page_offset(index), &mut stored)?;
        if n == 0 {
            break;
        }
        if n != ENCRYPTED_PAGE_SIZE {
            return Err(FsError::eio("short encrypted page read"));
        }
        let plain = cipher
            .decrypt_page(&stored, page, file_id)
            .map_err(|_| decrypt_failed(page))?;

        let page_start = index * PAGE_SIZE as u64;
        let from = (pos.max(page_start) - page_start) as usize;
        let to = ((pos + len).min(page_start + PAGE_SIZE as u64) - page_start) as usize;
        buf[copied..copied + (to - from)].copy_from_slice(&plain[from..to]);
        copied += to - from;
    }
    Ok(copied)
}

/// Writes `data` at logical position `pos` through read-modify-write.
///
/// Bytes outside the written window keep their prior values. A write that
/// starts past the current end instantiates the intervening pages as
/// encrypted all-zero pages first, so every stored page stays decryptable.
pub(crate) fn write_at(
    file: &File,
    cipher: &PageCipher,
    file_id: &[u8; FILE_ID_SIZE],
    pos: u64,
    data: &[u8],
) -> Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let len = data.len() as u64;
    let first = layout::page_index_of(pos);
    let last = layout::page_index_of(pos + len - 1);

    let physical = file.metadata()?.len();
    let cur_pages = layout::page_count(physical);
    if first > cur_pages {
        fill_zero_pages(file, cipher, file_id, cur_pages, first)?;
    }

    let mut consumed = 0usize;
    for index in first..=last {
        let page = page_no(index)?;
        let offset = layout::page_offset(index);

        let mut plain = if index < cur_pages {
            let mut stored = vec![0u8; ENCRYPTED_PAGE_SIZE];
            let n = read_stored_page(file, offset, &mut stored)?;
            if n != ENCRYPTED_PAGE_SIZE {
                return Err(FsError::eio("short encrypted page read"));
            }
            cipher
                .decrypt_page(&stored, page, file_id)
                .map_err(|_| decrypt_failed(page))?
        } else {
            vec![0u8; PAGE_SIZE]
        };

        let page_start = index * PAGE_SIZE as u64;
        let from = (pos.max(page_start) - page_start) as usize;
        let to = ((pos + len).min(page_start + PAGE_SIZE as u64) - page_start) as usize;
        plain[from..to].copy_from_slice(&data[consumed..consumed + (to - from)]);
        consumed += to - from;

        let stored = cipher
            .encrypt_page(&plain, page, file_id)
            .map_err(encrypt_failed)?;
        file.write_all_at(&stored, offset)?;
    }
    Ok(consumed)
}

/// Sets the logical length to `new_len`.
///
/// Growing appends freshly encrypted all-zero pages; shrinking cuts the
/// physical file at a whole-page boundary. Either way the physical size
/// ends up header-plus-whole-pages exactly.
pub(crate) fn truncate(
    file: &File,
    cipher: &PageCipher,
    file_id: &[u8; FILE_ID_SIZE],
    new_len: u64,
) -> Result<()> {
    let physical = file.metadata()?.len();
    let cur_pages = layout::page_count(physical);
    let new_pages = layout::pages_for_len(new_len);

    if new_pages > cur_pages {
        fill_zero_pages(file, cipher, file_id, cur_pages, new_pages)?;
    } else {
        file.set_len(layout::physical_size(new_pages))?;
    }
    Ok(())
}

fn fill_zero_pages(
    file: &File,
    cipher: &PageCipher,
    file_id: &[u8; FILE_ID_SIZE],
    from: u64,
    to: u64,
) -> Result<()> {
    let zero = vec![0u8; PAGE_SIZE];
    for index in from..to {
        let page = page_no(index)?;
        let stored = cipher
            .encrypt_page(&zero, page, file_id)
            .map_err(encrypt_failed)?;
        file.write_all_at(&stored, layout::page_offset(index))?;
    }
    Ok(())
}
