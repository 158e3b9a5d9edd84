//! Filesystem facade exposed to the host database's VFS shim.
//!
//! All caller paths are relative to a virtual root that maps onto the
//! configured data directory. Files that pass the encryption policy are
//! stored page-encrypted behind a 48-byte header; a handful of reserved
//! PostgreSQL control files stay plaintext. Opening an instance derives the
//! vault key and proves it against the verification token before any user
//! file is served.

use crate::crypto::utils::random_salt;
use crate::crypto::verifier::{load_token_salt, verify_or_create_token};
use crate::crypto::{KeyManager, PageCipher, SecurePassphrase, KEY_SIZE, TOKEN_FILE_NAME};
use crate::engine;
use crate::error::{Errno, FsError, Result};
use crate::handle::{FileHandle, OpenFlags, O_CREAT, O_RDWR, O_TRUNC};
use crate::layout::{self, SALT_SIZE};
use crate::policy;
#[cfg(feature = "logging")]
use log::debug;
use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{self, Metadata, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// First virtual descriptor handed out. Stays clear of anything the host
/// runtime could mistake for one of its own descriptors.
const FIRST_VIRTUAL_FD: u64 = 1000;

/// Stat fields reported to the VFS shim. Sizes of encrypted files are
/// logical; timestamps are whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_file(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }
}

struct Resolved {
    host: PathBuf,
    name: String,
    virt: String,
}

fn bad_fd(fd: u64) -> FsError {
    FsError::posix(Errno::EBADF, format!("unknown file descriptor {fd}"))
}

/// Configures and opens a [`VaultFs`].
pub struct VaultFsBuilder {
    debug: bool,
    salt: Option<[u8; SALT_SIZE]>,
}

impl VaultFsBuilder {
    pub fn new() -> Self {
        Self {
            debug: false,
            salt: None,
        }
    }

    /// Enables per-operation diagnostic logging.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Salt to use when initializing a fresh directory. Ignored on reopen:
    /// the verification token's salt is authoritative.
    pub fn salt(mut self, salt: [u8; SALT_SIZE]) -> Self {
        self.salt = Some(salt);
        self
    }

    /// Mounts `data_dir` with a passphrase, deriving the vault key.
    ///
    /// On first mount a salt is chosen (the configured one, or random) and
    /// the verification token is created. On remount the token's salt is
    /// read back, the key re-derived, and the token checked; a mismatch is
    /// an [`FsError::InvalidPassphrase`].
    pub fn mount(self, data_dir: impl AsRef<Path>, passphrase: &str) -> Result<VaultFs> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let salt = match load_token_salt(&data_dir)? {
            Some(salt) => salt,
            None => match self.salt {
                Some(salt) => salt,
                None => random_salt().map_err(|err| FsError::eio(err.to_string()))?,
            },
        };
        let passphrase = SecurePassphrase::new(passphrase);
        let keys = KeyManager::from_passphrase(&passphrase, salt)
            .map_err(|err| FsError::eio(err.to_string()))?;
        Self::finish(data_dir, keys, self.debug)
    }

    /// Mounts `data_dir` with an externally derived key and the salt it was
    /// derived with. No key derivation happens; verification still does.
    pub fn mount_with_key(
        self,
        data_dir: impl AsRef<Path>,
        key: [u8; KEY_SIZE],
        salt: [u8; SALT_SIZE],
    ) -> Result<VaultFs> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let salt = load_token_salt(&data_dir)?.unwrap_or(salt);
        let keys = KeyManager::from_raw(key, salt);
        Self::finish(data_dir, keys, self.debug)
    }

    fn finish(data_dir: PathBuf, keys: KeyManager, debug: bool) -> Result<VaultFs> {
        let cipher = PageCipher::new(keys.key());
        verify_or_create_token(&data_dir, &cipher, keys.salt())?;

        Ok(VaultFs {
            data_dir,
            cwd: "/".to_string(),
            cipher,
            keys,
            handles: HashMap::new(),
            next_fd: FIRST_VIRTUAL_FD,
            destroyed: false,
            debug,
        })
    }
}

impl Default for VaultFsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The encrypting filesystem over one data directory.
///
/// All operations are serial; the host database issues calls from a single
/// thread of control and the facade holds no internal locks. Multiple
/// instances in one process share no state.
pub struct VaultFs {
    data_dir: PathBuf,
    cwd: String,
    cipher: PageCipher,
    keys: KeyManager,
    handles: HashMap<u64, FileHandle>,
    next_fd: u64,
    destroyed: bool,
    #[cfg_attr(not(feature = "logging"), allow(dead_code))]
    debug: bool,
}

impl std::fmt::Debug for VaultFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultFs")
            .field("data_dir", &self.data_dir)
            .field("open_handles", &self.handles.len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl VaultFs {
    pub fn builder() -> VaultFsBuilder {
        VaultFsBuilder::new()
    }

    /// Mounts `data_dir` with a passphrase and default options.
    pub fn mount(data_dir: impl AsRef<Path>, passphrase: &str) -> Result<VaultFs> {
        VaultFsBuilder::new().mount(data_dir, passphrase)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            Err(FsError::eio("filesystem instance destroyed"))
        } else {
            Ok(())
        }
    }

    /// Normalizes a caller path against the virtual current directory and
    /// maps it onto the data directory. `..` never escapes the root.
    fn resolve(&self, path: &str) -> Resolved {
        let mut parts: Vec<&str> = Vec::new();
        let base = if path.starts_with('/') {
            None
        } else {
            Some(self.cwd.as_str())
        };
        for segment in base
            .into_iter()
            .flat_map(|b| b.split('/'))
            .chain(path.split('/'))
        {
            match segment {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }

        let virt = format!("/{}", parts.join("/"));
        let mut host = self.data_dir.clone();
        for part in &parts {
            host.push(part);
        }
        let name = parts.last().map(|s| (*s).to_string()).unwrap_or_default();
        Resolved { host, name, virt }
    }

    /// The verification token is owned by the verifier and is not a user
    /// file.
    fn guard_reserved(&self, resolved: &Resolved) -> Result<()> {
        if resolved.name == TOKEN_FILE_NAME {
            return Err(FsError::posix(
                Errno::EACCES,
                format!("{} is reserved", resolved.virt),
            ));
        }
        Ok(())
    }

    fn insert(&mut self, handle: FileHandle) -> u64 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.handles.insert(fd, handle);
        fd
    }

    /// Opens a file or directory and returns a virtual descriptor.
    pub fn open(&mut self, path: &str, flags: u32) -> Result<u64> {
        self.ensure_alive()?;
        let flags = OpenFlags::from_raw(flags);
        let resolved = self.resolve(path);
        self.guard_reserved(&resolved)?;

        let existing = match fs::metadata(&resolved.host) {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        if let Some(meta) = &existing {
            if meta.is_dir() {
                if flags.writable() || flags.create() {
                    return Err(FsError::posix(
                        Errno::EISDIR,
                        format!("{} is a directory", resolved.virt),
                    ));
                }
                let fd = self.insert(FileHandle {
                    file: None,
                    path: resolved.host,
                    flags,
                    position: 0,
                    encrypted: false,
                    file_id: None,
                });
                return Ok(fd);
            }
        } else if !flags.create() {
            return Err(FsError::posix(
                Errno::ENOENT,
                format!("no such file: {}", resolved.virt),
            ));
        }

        let encrypted = policy::is_encrypted_name(&resolved.name);
        let file = flags.to_open_options(encrypted).open(&resolved.host)?;

        let file_id = if encrypted {
            if flags.trunc() && flags.writable() {
                // Truncating discards every prior page along with its id.
                file.set_len(0)?;
                Some(engine::init_header(&file, self.keys.salt())?)
            } else {
                match engine::read_file_id(&file)? {
                    Some(id) => Some(id),
                    // A fresh or still-empty file gets its header on the
                    // first open that is allowed to write one.
                    None if flags.writable() || flags.create() => {
                        Some(engine::init_header(&file, self.keys.salt())?)
                    }
                    None => None,
                }
            }
        } else {
            None
        };

        let fd = self.insert(FileHandle {
            file: Some(file),
            path: resolved.host,
            flags,
            position: 0,
            encrypted,
            file_id,
        });
        #[cfg(feature = "logging")]
        if self.debug {
            debug!("open {} -> fd {fd} (encrypted: {encrypted})", resolved.virt);
        }
        Ok(fd)
    }

    /// Releases the descriptor and the underlying OS file.
    pub fn close(&mut self, fd: u64) -> Result<()> {
        self.ensure_alive()?;
        #[cfg(feature = "logging")]
        if self.debug {
            debug!("close fd {fd}");
        }
        self.handles.remove(&fd).map(|_| ()).ok_or_else(|| bad_fd(fd))
    }

    /// Reads into `buf` at `position`, or at the handle's logical position
    /// when absent. Returns the byte count and advances the position.
    pub fn read(&mut self, fd: u64, buf: &mut [u8], position: Option<u64>) -> Result<usize> {
        self.ensure_alive()?;
        let handle = self.handles.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        let Some(file) = handle.file.as_ref() else {
            return Err(FsError::posix(
                Errno::EISDIR,
                "cannot read a directory descriptor",
            ));
        };
        if !handle.flags.readable() {
            return Err(FsError::posix(
                Errno::EBADF,
                "descriptor not open for reading",
            ));
        }

        let pos = position.unwrap_or(handle.position);
        let count = if handle.encrypted {
            match &handle.file_id {
                Some(file_id) => engine::read_at(file, &self.cipher, file_id, pos, buf)?,
                // No header yet: the file is logically empty.
                None => 0,
            }
        } else {
            file.read_at(buf, pos).map_err(FsError::from)?
        };
        handle.position = pos + count as u64;
        Ok(count)
    }

    /// Writes `data` at `position`, or at the handle's logical position when
    /// absent; append-mode handles position at the current logical end.
    pub fn write(&mut self, fd: u64, data: &[u8], position: Option<u64>) -> Result<usize> {
        self.ensure_alive()?;
        let handle = self.handles.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        let Some(file) = handle.file.as_ref() else {
            return Err(FsError::posix(
                Errno::EISDIR,
                "cannot write a directory descriptor",
            ));
        };
        if !handle.flags.writable() {
            return Err(FsError::posix(
                Errno::EBADF,
                "descriptor not open for writing",
            ));
        }

        let count = if handle.encrypted {
            let Some(file_id) = &handle.file_id else {
                return Err(FsError::eio("encrypted file has no header"));
            };
            let pos = if handle.flags.append() {
                engine::logical_len(file)?
            } else {
                position.unwrap_or(handle.position)
            };
            let count = engine::write_at(file, &self.cipher, file_id, pos, data)?;
            handle.position = pos + count as u64;
            count
        } else {
            let pos = if handle.flags.append() {
                file.metadata().map_err(FsError::from)?.len()
            } else {
                position.unwrap_or(handle.position)
            };
            file.write_all_at(data, pos).map_err(FsError::from)?;
            handle.position = pos + data.len() as u64;
            data.len()
        };
        Ok(count)
    }

    /// Flushes file data and metadata. No cryptographic work happens here.
    pub fn fsync(&mut self, fd: u64) -> Result<()> {
        self.ensure_alive()?;
        let handle = self.handles.get(&fd).ok_or_else(|| bad_fd(fd))?;
        if let Some(file) = handle.file.as_ref() {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Flushes file data only.
    pub fn fdatasync(&mut self, fd: u64) -> Result<()> {
        self.ensure_alive()?;
        let handle = self.handles.get(&fd).ok_or_else(|| bad_fd(fd))?;
        if let Some(file) = handle.file.as_ref() {
            file.sync_data()?;
        }
        Ok(())
    }

    pub fn fstat(&mut self, fd: u64) -> Result<FileStat> {
        self.ensure_alive()?;
        let handle = self.handles.get(&fd).ok_or_else(|| bad_fd(fd))?;
        let meta = match handle.file.as_ref() {
            Some(file) => file.metadata()?,
            None => fs::metadata(&handle.path)?,
        };
        stat_from_meta(&meta, handle.encrypted)
    }

    /// Stats a path without following a trailing symlink.
    pub fn lstat(&mut self, path: &str) -> Result<FileStat> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        self.guard_reserved(&resolved)?;
        let meta = fs::symlink_metadata(&resolved.host)?;
        let encrypted = meta.is_file() && policy::is_encrypted_name(&resolved.name);
        stat_from_meta(&meta, encrypted)
    }

    /// Stats a path, following symlinks.
    pub fn stat(&mut self, path: &str) -> Result<FileStat> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        self.guard_reserved(&resolved)?;
        let meta = fs::metadata(&resolved.host)?;
        let encrypted = meta.is_file() && policy::is_encrypted_name(&resolved.name);
        stat_from_meta(&meta, encrypted)
    }

    pub fn mkdir(&mut self, path: &str, mode: Option<u32>) -> Result<()> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        self.guard_reserved(&resolved)?;
        fs::create_dir(&resolved.host)?;
        if let Some(mode) = mode {
            fs::set_permissions(&resolved.host, fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    /// Lists directory entry names. The verification token is not a user
    /// file and is omitted.
    pub fn readdir(&mut self, path: &str) -> Result<Vec<String>> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        let mut names = Vec::new();
        for entry in fs::read_dir(&resolved.host)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == TOKEN_FILE_NAME {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }

    /// Renames a file or directory. An encrypted file keeps its file id:
    /// page identity is bound to the id, not the path.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_alive()?;
        let from = self.resolve(from);
        self.guard_reserved(&from)?;
        let to = self.resolve(to);
        self.guard_reserved(&to)?;
        fs::rename(&from.host, &to.host)?;
        Ok(())
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        fs::remove_dir(&resolved.host)?;
        Ok(())
    }

    /// Sets the logical length of a file.
    pub fn truncate(&mut self, path: &str, len: u64) -> Result<()> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        self.guard_reserved(&resolved)?;

        let meta = fs::metadata(&resolved.host)?;
        if meta.is_dir() {
            return Err(FsError::posix(
                Errno::EISDIR,
                format!("{} is a directory", resolved.virt),
            ));
        }

        if !policy::is_encrypted_name(&resolved.name) {
            let file = OpenOptions::new().write(true).open(&resolved.host)?;
            file.set_len(len)?;
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&resolved.host)?;
        let file_id = match engine::read_file_id(&file)? {
            Some(id) => id,
            None => engine::init_header(&file, self.keys.salt())?,
        };
        engine::truncate(&file, &self.cipher, &file_id, len)
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        self.guard_reserved(&resolved)?;
        fs::remove_file(&resolved.host)?;
        Ok(())
    }

    /// Sets access and modification times, given as millisecond-epoch
    /// values.
    pub fn utimes(&mut self, path: &str, atime_ms: u64, mtime_ms: u64) -> Result<()> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        self.guard_reserved(&resolved)?;
        let c_path = CString::new(resolved.host.as_os_str().as_bytes())
            .map_err(|_| FsError::posix(Errno::EINVAL, "path contains a NUL byte"))?;
        let times = [
            libc::timeval {
                tv_sec: (atime_ms / 1000) as libc::time_t,
                tv_usec: ((atime_ms % 1000) * 1000) as libc::suseconds_t,
            },
            libc::timeval {
                tv_sec: (mtime_ms / 1000) as libc::time_t,
                tv_usec: ((mtime_ms % 1000) * 1000) as libc::suseconds_t,
            },
        ];
        if unsafe { libc::utimes(c_path.as_ptr(), times.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        self.guard_reserved(&resolved)?;
        fs::set_permissions(&resolved.host, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    /// Changes the virtual current directory used to resolve relative
    /// paths.
    pub fn chdir(&mut self, path: &str) -> Result<()> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        let meta = fs::metadata(&resolved.host)?;
        if !meta.is_dir() {
            return Err(FsError::posix(
                Errno::ENOTDIR,
                format!("{} is not a directory", resolved.virt),
            ));
        }
        self.cwd = resolved.virt;
        Ok(())
    }

    /// Creates or replaces a file with the given contents.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let fd = self.open(path, O_RDWR | O_CREAT | O_TRUNC)?;
        let result = self.write(fd, data, Some(0)).map(|_| ());
        let close_result = self.close(fd);
        result.and(close_result)
    }

    pub fn exists(&mut self, path: &str) -> Result<bool> {
        self.ensure_alive()?;
        let resolved = self.resolve(path);
        if resolved.name == TOKEN_FILE_NAME {
            return Ok(false);
        }
        Ok(resolved.host.exists())
    }

    /// File-control requests are accepted and ignored; the host database's
    /// locking assumes a single process.
    pub fn fcntl(&mut self, fd: u64, _cmd: i32) -> Result<i32> {
        self.ensure_alive()?;
        if !self.handles.contains_key(&fd) {
            return Err(bad_fd(fd));
        }
        Ok(0)
    }

    /// Advisory locks are accepted and ignored, as with [`Self::fcntl`].
    pub fn flock(&mut self, fd: u64, _operation: i32) -> Result<()> {
        self.ensure_alive()?;
        if !self.handles.contains_key(&fd) {
            return Err(bad_fd(fd));
        }
        Ok(())
    }

    /// Tears the instance down: closes every handle and zeroizes the key
    /// material. Idempotent; every subsequent operation fails with EIO.
    ///
    /// Zeroization is best effort. The AES key schedule and any copies made
    /// by the runtime or allocator may outlive this call.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.handles.clear();
        self.keys.wipe();
        self.cipher = PageCipher::new(&[0u8; KEY_SIZE]);
        self.destroyed = true;
        #[cfg(feature = "logging")]
        if self.debug {
            debug!("filesystem instance destroyed");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

fn stat_from_meta(meta: &Metadata, encrypted: bool) -> Result<FileStat> {
    let size = if encrypted && meta.is_file() {
        layout::logical_size(meta.len()).map_err(|err| FsError::eio(err.to_string()))?
    } else {
        meta.len()
    };
    Ok(FileStat {
        dev: meta.dev(),
        ino: meta.ino(),
        mode: meta.mode(),
        nlink: meta.nlink(),
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev(),
        size,
        blksize: meta.blksize(),
        blocks: meta.blocks(),
        atime: meta.atime(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
    })
}
