//! Adapter between the host database's VFS shim and a [`VaultFs`].
//!
//! The shim is constructed at mount time, owns the filesystem instance for
//! the duration of the mount, and forwards each callback as a plain method
//! call. Errors are flattened into negative errno values, which is what the
//! host runtime's error model speaks. mmap is a client-side facility: the
//! shim allocates a buffer and calls [`VfsShim::read`]; the core never maps
//! files.

use crate::error::FsError;
use crate::fs::{FileStat, VaultFs};

pub struct VfsShim {
    fs: VaultFs,
}

impl VfsShim {
    pub fn new(fs: VaultFs) -> Self {
        Self { fs }
    }

    pub fn into_inner(self) -> VaultFs {
        self.fs
    }

    fn errno(err: FsError) -> i32 {
        -err.errno().raw()
    }

    pub fn open(&mut self, path: &str, flags: u32) -> Result<u64, i32> {
        self.fs.open(path, flags).map_err(Self::errno)
    }

    pub fn close(&mut self, fd: u64) -> Result<(), i32> {
        self.fs.close(fd).map_err(Self::errno)
    }

    pub fn read(
        &mut self,
        fd: u64,
        buf: &mut [u8],
        position: Option<u64>,
    ) -> Result<usize, i32> {
        self.fs.read(fd, buf, position).map_err(Self::errno)
    }

    pub fn write(&mut self, fd: u64, data: &[u8], position: Option<u64>) -> Result<usize, i32> {
        self.fs.write(fd, data, position).map_err(Self::errno)
    }

    pub fn fsync(&mut self, fd: u64) -> Result<(), i32> {
        self.fs.fsync(fd).map_err(Self::errno)
    }

    pub fn fdatasync(&mut self, fd: u64) -> Result<(), i32> {
        self.fs.fdatasync(fd).map_err(Self::errno)
    }

    pub fn fstat(&mut self, fd: u64) -> Result<FileStat, i32> {
        self.fs.fstat(fd).map_err(Self::errno)
    }

    pub fn lstat(&mut self, path: &str) -> Result<FileStat, i32> {
        self.fs.lstat(path).map_err(Self::errno)
    }

    pub fn stat(&mut self, path: &str) -> Result<FileStat, i32> {
        self.fs.stat(path).map_err(Self::errno)
    }

    pub fn mkdir(&mut self, path: &str, mode: Option<u32>) -> Result<(), i32> {
        self.fs.mkdir(path, mode).map_err(Self::errno)
    }

    pub fn readdir(&mut self, path: &str) -> Result<Vec<String>, i32> {
        self.fs.readdir(path).map_err(Self::errno)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), i32> {
        self.fs.rename(from, to).map_err(Self::errno)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), i32> {
        self.fs.rmdir(path).map_err(Self::errno)
    }

    pub fn truncate(&mut self, path: &str, len: u64) -> Result<(), i32> {
        self.fs.truncate(path, len).map_err(Self::errno)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), i32> {
        self.fs.unlink(path).map_err(Self::errno)
    }

    pub fn utimes(&mut self, path: &str, atime_ms: u64, mtime_ms: u64) -> Result<(), i32> {
        self.fs.utimes(path, atime_ms, mtime_ms).map_err(Self::errno)
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<(), i32> {
        self.fs.chmod(path, mode).map_err(Self::errno)
    }

    pub fn chdir(&mut self, path: &str) -> Result<(), i32> {
        self.fs.chdir(path).map_err(Self::errno)
    }

    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), i32> {
        self.fs.write_file(path, data).map_err(Self::errno)
    }

    pub fn exists(&mut self, path: &str) -> Result<bool, i32> {
        self.fs.exists(path).map_err(Self::errno)
    }

    pub fn fcntl(&mut self, fd: u64, cmd: i32) -> Result<i32, i32> {
        self.fs.fcntl(fd, cmd).map_err(Self::errno)
    }

    pub fn flock(&mut self, fd: u64, operation: i32) -> Result<(), i32> {
        self.fs.flock(fd, operation).map_err(Self::errno)
    }

    /// Unmounts: tears down the filesystem instance.
    pub fn shutdown(&mut self) {
        self.fs.destroy();
    }
}
