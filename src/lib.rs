pub use crypto::{
    derive_key, file_id_from_path, PageCipher, SecurePassphrase, KDF_ITERATIONS, KEY_SIZE,
};
pub use error::{CryptoError, Errno, FsError, Result};
pub use fs::{FileStat, VaultFs, VaultFsBuilder};
pub use handle::{O_APPEND, O_CREAT, O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};
pub use layout::{
    AUTH_TAG_SIZE, ENCRYPTED_PAGE_SIZE, FILE_HEADER_SIZE, FILE_ID_SIZE, IV_SIZE, PAGE_SIZE,
    SALT_SIZE,
};
pub use vfs::VfsShim;

mod crypto;
mod engine;
mod error;
mod fs;
mod handle;
mod layout;
mod policy;
mod vfs;
