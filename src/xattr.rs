//! Extended attributes of paths and open files
//!
//! Reads query the size first and allocate exactly what the store reports.
//! Oversized results are refused instead of truncated: `TooLarge` for the
//! name list, `InsufficientBuffer` for a value bigger than the caller's buffer.

use crate::entry::{Entry, Target};
use crate::error::{report, ErrnoContext, Result, VfsError};
use crate::vfs::Vfs;
use nix::errno::Errno;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use vfs_syscalls::xattr::split_names;
use vfs_syscalls::XattrSetMode;

/// Namespace of attributes owned by clients
pub const USER_PREFIX: &[u8] = b"user.";

fn attr_name(name: &str) -> nix::Result<CString> {
    if name.is_empty() {
        return Err(Errno::EINVAL);
    }
    vfs_syscalls::cstring(OsStr::new(name))
}

impl Vfs {
    /// The NUL-separated attribute name list of a target
    ///
    /// # Errors
    ///
    /// `TooLarge` when the list exceeds the configured maximum.
    pub fn list_xattrs(&self, target: Target<'_>) -> Result<Vec<u8>> {
        let entry = self.entry(target, "listxattr")?;
        self.list_on(&entry).map_err(report)
    }

    fn list_on(&self, entry: &Entry<'_>) -> Result<Vec<u8>> {
        let too_large = || VfsError::TooLarge { ctx: entry.ctx() };
        let len = entry.with_xattrs(|x| x.list(None)).or_ctx(|| entry.ctx())?;
        if len == 0 {
            return Ok(Vec::new());
        }
        if len > self.config.xattr_list_max {
            return Err(too_large());
        }
        let mut buf = vec![0u8; len];
        match entry.with_xattrs(|x| x.list(Some(&mut buf))) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            // The list grew between the size query and the read
            Err(Errno::ERANGE) => Err(too_large()),
            Err(errno) => Err(VfsError::from_errno(entry.ctx(), errno)),
        }
    }

    /// Read the value of `name`; the caller can accept at most `buf_len` bytes
    ///
    /// # Errors
    ///
    /// `NotFound` if the attribute is absent, `InsufficientBuffer` when the
    /// value is longer than `buf_len`.
    pub fn get_xattr(&self, target: Target<'_>, name: &str, buf_len: usize) -> Result<Vec<u8>> {
        let entry = self.entry(target, "getxattr")?;
        self.get_on(&entry, name, buf_len).map_err(report)
    }

    fn get_on(&self, entry: &Entry<'_>, name: &str, buf_len: usize) -> Result<Vec<u8>> {
        let ctx = || entry.ctx();
        let insufficient = || VfsError::InsufficientBuffer { ctx: entry.ctx() };
        let c_name = attr_name(name).or_ctx(ctx)?;
        let len = entry.with_xattrs(|x| x.get(&c_name, None)).or_ctx(ctx)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        if len > buf_len {
            return Err(insufficient());
        }
        let mut value = vec![0u8; len];
        match entry.with_xattrs(|x| x.get(&c_name, Some(&mut value))) {
            Ok(n) => {
                value.truncate(n);
                Ok(value)
            }
            Err(Errno::ERANGE) => Err(insufficient()),
            Err(errno) => Err(VfsError::from_errno(entry.ctx(), errno)),
        }
    }

    /// Write attribute `name`
    ///
    /// # Errors
    ///
    /// `AlreadyExists` / `NotFound` per `mode`, `InvalidArgument` for a bad name.
    pub fn set_xattr(
        &self,
        target: Target<'_>,
        name: &str,
        value: &[u8],
        mode: XattrSetMode,
    ) -> Result<()> {
        let entry = self.entry(target, "setxattr")?;
        let c_name = attr_name(name).or_ctx(|| entry.ctx()).map_err(report)?;
        entry
            .with_xattrs(|x| x.set(&c_name, value, mode))
            .or_ctx(|| entry.ctx())
            .map_err(report)?;
        tracing::debug!(target = %entry.ctx().target, name, len = value.len(), "xattr set");
        Ok(())
    }

    /// Remove attribute `name`
    ///
    /// # Errors
    ///
    /// `NotFound` if the attribute is absent.
    pub fn remove_xattr(&self, target: Target<'_>, name: &str) -> Result<()> {
        let entry = self.entry(target, "removexattr")?;
        let c_name = attr_name(name).or_ctx(|| entry.ctx()).map_err(report)?;
        entry
            .with_xattrs(|x| x.remove(&c_name))
            .or_ctx(|| entry.ctx())
            .map_err(report)
    }

    /// Remove every `user.` attribute, as when a file is overwritten
    ///
    /// Returns the number of attributes removed.
    ///
    /// # Errors
    ///
    /// As [`Vfs::list_xattrs`]; attributes removed concurrently are skipped.
    pub fn truncate_xattrs(&self, target: Target<'_>) -> Result<usize> {
        let entry = self.entry(target, "truncate-xattrs")?;
        let list = self.list_on(&entry).map_err(report)?;
        let mut removed = 0;
        for name in split_names(&list).filter(|name| name.starts_with(USER_PREFIX)) {
            let c_name = vfs_syscalls::cstring(OsStr::from_bytes(name))
                .or_ctx(|| entry.ctx())
                .map_err(report)?;
            match entry.with_xattrs(|x| x.remove(&c_name)) {
                Ok(()) => removed += 1,
                Err(Errno::ENODATA) => {}
                Err(errno) => return Err(report(VfsError::from_errno(entry.ctx(), errno))),
            }
        }
        if removed > 0 {
            tracing::debug!(target = %entry.ctx().target, removed, "dropped user xattrs");
        }
        Ok(removed)
    }
}
