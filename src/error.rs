use std::fmt::{Display, Formatter};
use std::io;

/// POSIX error symbols surfaced across the VFS boundary.
///
/// The host database's shim translates these into its own error codes, so the
/// set is restricted to symbols the shim understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Errno {
    EPERM,
    ENOENT,
    EACCES,
    EBADF,
    EEXIST,
    ENOTDIR,
    EISDIR,
    EINVAL,
    EIO,
    ENOTEMPTY,
    ENOSYS,
}

impl Errno {
    pub fn as_str(&self) -> &'static str {
        match self {
            Errno::EPERM => "EPERM",
            Errno::ENOENT => "ENOENT",
            Errno::EACCES => "EACCES",
            Errno::EBADF => "EBADF",
            Errno::EEXIST => "EEXIST",
            Errno::ENOTDIR => "ENOTDIR",
            Errno::EISDIR => "EISDIR",
            Errno::EINVAL => "EINVAL",
            Errno::EIO => "EIO",
            Errno::ENOTEMPTY => "ENOTEMPTY",
            Errno::ENOSYS => "ENOSYS",
        }
    }

    /// The numeric errno value for the shim boundary.
    pub fn raw(&self) -> i32 {
        match self {
            Errno::EPERM => libc::EPERM,
            Errno::ENOENT => libc::ENOENT,
            Errno::EACCES => libc::EACCES,
            Errno::EBADF => libc::EBADF,
            Errno::EEXIST => libc::EEXIST,
            Errno::ENOTDIR => libc::ENOTDIR,
            Errno::EISDIR => libc::EISDIR,
            Errno::EINVAL => libc::EINVAL,
            Errno::EIO => libc::EIO,
            Errno::ENOTEMPTY => libc::ENOTEMPTY,
            Errno::ENOSYS => libc::ENOSYS,
        }
    }

    pub(crate) fn from_io_kind(kind: io::ErrorKind) -> Errno {
        match kind {
            io::ErrorKind::NotFound => Errno::ENOENT,
            io::ErrorKind::PermissionDenied => Errno::EACCES,
            io::ErrorKind::AlreadyExists => Errno::EEXIST,
            io::ErrorKind::IsADirectory => Errno::EISDIR,
            io::ErrorKind::NotADirectory => Errno::ENOTDIR,
            io::ErrorKind::DirectoryNotEmpty => Errno::ENOTEMPTY,
            io::ErrorKind::InvalidInput => Errno::EINVAL,
            _ => Errno::EIO,
        }
    }
}

impl Display for Errno {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures inside the page codec and layout mapper.
///
/// `Auth` is deliberately cause-free: the surface message must not reveal
/// whether the tag, IV, ciphertext, AAD, or key was at fault.
#[derive(Debug)]
#[non_exhaustive]
pub enum CryptoError {
    /// Encrypted page buffer is not exactly `ENCRYPTED_PAGE_SIZE` bytes
    WrongLength { expected: usize, actual: usize },
    /// Plaintext longer than `PAGE_SIZE` was passed to the codec
    PageTooLarge(usize),
    /// Authentication failure during decryption
    Auth,
    /// AEAD rejected the encryption request
    Encrypt,
    /// Byte offset maps to a page index that does not fit in 32 bits
    PageOutOfRange(u64),
    /// Encrypted payload is not a whole number of encrypted pages
    PartialPage(u64),
    /// PBKDF2 rejected its parameters
    KeyDerivation,
    /// The OS random source failed
    Rng,
}

impl Display for CryptoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::WrongLength { expected, actual } => {
                write!(
                    f,
                    "encrypted page has wrong length: expected {expected}, got {actual}"
                )
            }
            CryptoError::PageTooLarge(len) => {
                write!(f, "plaintext exceeds page size: {len}")
            }
            CryptoError::Auth => {
                write!(f, "page authentication failed")
            }
            CryptoError::Encrypt => {
                write!(f, "page encryption failed")
            }
            CryptoError::PageOutOfRange(index) => {
                write!(f, "page number out of range: {index}")
            }
            CryptoError::PartialPage(physical) => {
                write!(
                    f,
                    "encrypted payload is not a whole number of pages (physical size {physical})"
                )
            }
            CryptoError::KeyDerivation => {
                write!(f, "key derivation failed")
            }
            CryptoError::Rng => {
                write!(f, "random generator failure")
            }
        }
    }
}

impl std::error::Error for CryptoError {}

/// Errors surfaced by the filesystem facade.
#[derive(Debug)]
#[non_exhaustive]
pub enum FsError {
    /// The verification token is truncated, fails to decrypt, or decrypts to
    /// the wrong magic. Callers cannot distinguish a wrong key from a
    /// corrupted token.
    InvalidPassphrase,
    /// A failure tagged with the POSIX symbol the VFS shim should raise.
    Posix { errno: Errno, message: String },
}

impl FsError {
    pub(crate) fn posix(errno: Errno, message: impl Into<String>) -> FsError {
        FsError::Posix {
            errno,
            message: message.into(),
        }
    }

    pub(crate) fn eio(message: impl Into<String>) -> FsError {
        FsError::posix(Errno::EIO, message)
    }

    /// The POSIX symbol the shim should report for this error.
    pub fn errno(&self) -> Errno {
        match self {
            FsError::InvalidPassphrase => Errno::EACCES,
            FsError::Posix { errno, .. } => *errno,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> FsError {
        FsError::Posix {
            errno: Errno::from_io_kind(err.kind()),
            message: err.to_string(),
        }
    }
}

impl Display for FsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FsError::InvalidPassphrase => {
                write!(f, "Invalid passphrase or corrupted encryption keys")
            }
            FsError::Posix { errno, message } => {
                write!(f, "{errno}: {message}")
            }
        }
    }
}

impl std::error::Error for FsError {}

pub type Result<T, E = FsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_passphrase_message_is_constant() {
        assert_eq!(
            FsError::InvalidPassphrase.to_string(),
            "Invalid passphrase or corrupted encryption keys"
        );
    }

    #[test]
    fn auth_error_message_is_constant() {
        assert_eq!(CryptoError::Auth.to_string(), "page authentication failed");
    }

    #[test]
    fn errno_raw_values_match_libc() {
        assert_eq!(Errno::ENOENT.raw(), libc::ENOENT);
        assert_eq!(Errno::EBADF.raw(), libc::EBADF);
        assert_eq!(Errno::EIO.raw(), libc::EIO);
        assert_eq!(Errno::EISDIR.raw(), libc::EISDIR);
    }

    #[test]
    fn io_error_maps_to_tagged_posix() {
        let err: FsError = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.errno(), Errno::ENOENT);
        let err: FsError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.errno(), Errno::EACCES);
    }
}
