//! Attribute reads and changes, truncation
//!
//! Every change request goes through [`sanitize`] before it is applied:
//! mode changes keep the file type, and an ownership change on a
//! non-directory revokes setuid (and setgid when group-executable).

use crate::entry::{Entry, Target};
use crate::error::{report, ErrnoContext, OpContext, Result, VfsError};
use crate::handle::{HandleId, OwnerId};
use crate::locks::{AccessIntent, ByteRange, RangeCheck};
use crate::namespace::PERMISSION_BITS;
use crate::vfs::Vfs;
use std::os::unix::io::AsRawFd;
use std::time::SystemTime;
use vfs_syscalls::{io, metadata, FileMetadata, FileType, InodeKey};

/// A set of attribute changes; absent fields are left alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrChange {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

impl AttrChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn owner(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    #[must_use]
    pub fn group(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn times(mut self, accessed: Option<SystemTime>, modified: Option<SystemTime>) -> Self {
        self.accessed = accessed;
        self.modified = modified;
        self
    }
}

/// The attributes a sanitizer decision depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentAttrs {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl From<&FileMetadata> for CurrentAttrs {
    fn from(meta: &FileMetadata) -> Self {
        Self {
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
        }
    }
}

/// Normalize a change request against the entry's current attributes
///
/// The returned mode, when present, is a full `st_mode` with the current
/// type bits.
#[must_use]
pub fn sanitize(current: CurrentAttrs, request: AttrChange) -> AttrChange {
    let mut change = request;
    let type_bits = current.mode & !PERMISSION_BITS;
    change.mode = request
        .mode
        .map(|mode| (mode & PERMISSION_BITS) | type_bits);

    let is_dir = current.mode & libc::S_IFMT == libc::S_IFDIR;
    let owner_changes = request.uid.is_some_and(|uid| uid != current.uid)
        || request.gid.is_some_and(|gid| gid != current.gid);
    if !is_dir && owner_changes {
        let base = change.mode.unwrap_or(current.mode);
        let mut mode = base & !libc::S_ISUID;
        if mode & libc::S_IXGRP != 0 {
            mode &= !libc::S_ISGID;
        }
        if request.mode.is_some() || mode != current.mode {
            change.mode = Some(mode);
        }
    }
    change
}

/// Only regular files have a size that can be changed
fn resizable(meta: &FileMetadata, ctx: &impl Fn() -> OpContext) -> Result<()> {
    match meta.file_type() {
        FileType::Regular => Ok(()),
        FileType::Directory => Err(VfsError::IsADirectory { ctx: ctx() }),
        _ => Err(VfsError::InvalidArgument { ctx: ctx() }),
    }
}

/// Bytes a size change from `old` to `new` discards or exposes
fn resize_range(old: u64, new: u64) -> Option<ByteRange> {
    match new.cmp(&old) {
        std::cmp::Ordering::Less => ByteRange::new(new, old - 1),
        std::cmp::Ordering::Greater => ByteRange::new(old, new - 1),
        std::cmp::Ordering::Equal => None,
    }
}

impl Vfs {
    /// Metadata of an open file
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown handle.
    pub fn get_attributes(&self, handle: HandleId) -> Result<FileMetadata> {
        let file = self.file(handle, "getattr")?;
        metadata::fstat(file.as_raw_fd())
            .or_ctx(|| OpContext::handle("getattr", handle))
            .map_err(report)
    }

    /// Apply attribute changes to a path (final symlink not followed) or an open file
    ///
    /// A mode change on a symlink is dropped. Size changes are refused with
    /// `WouldBlock` when a mandatory lock covers the affected range. After a
    /// successful change the inode is flushed; a failed flush is logged only.
    ///
    /// # Errors
    ///
    /// Resolution errors, `PermissionDenied` for ownership changes the
    /// process may not make, `WouldBlock` as described above.
    pub fn set_attributes(&self, target: Target<'_>, request: AttrChange) -> Result<()> {
        let entry = self.entry(target, "setattr")?;
        self.set_attributes_on(&entry, request).map_err(report)
    }

    fn set_attributes_on(&self, entry: &Entry<'_>, mut request: AttrChange) -> Result<()> {
        let ctx = || entry.ctx();
        let meta = entry.stat()?;
        if meta.is_symlink() {
            request.mode = None;
        }
        if request.is_empty() {
            return Ok(());
        }

        let change = sanitize(CurrentAttrs::from(&meta), request);
        let _inode = self.inodes.lock(meta.key());

        let writer = match change.size {
            Some(size) => {
                resizable(&meta, &ctx)?;
                let writer = entry.open_writer()?;
                self.check_resize(meta.key(), entry.owner(), meta.size, size, &ctx)?;
                Some((writer, size))
            }
            None => None,
        };

        if change.uid.is_some() || change.gid.is_some() {
            entry.chown(change.uid, change.gid)?;
        }
        if let Some(mode) = change.mode {
            entry.chmod(mode & PERMISSION_BITS)?;
        }
        if change.accessed.is_some() || change.modified.is_some() {
            entry.set_times(change.accessed, change.modified)?;
        }
        if let Some((writer, size)) = writer {
            io::ftruncate(writer.as_raw_fd(), size).or_ctx(ctx)?;
        }

        if let Err(errno) = entry.flush_metadata(&meta) {
            self.stats.increment_failed_flushes();
            let ctx = ctx();
            tracing::warn!(op = ctx.op, target = %ctx.target, %errno, "metadata flush after setattr failed");
        }
        tracing::debug!(target = %entry.ctx().target, ?change, "attributes changed");
        Ok(())
    }

    /// Set the size of a path or an open file
    ///
    /// For open files with oplocks enabled, other clients' read caching is
    /// broken first; otherwise the resized range is checked against
    /// mandatory locks.
    ///
    /// # Errors
    ///
    /// `WouldBlock` on a lock conflict, `IsADirectory` for directories,
    /// `InvalidArgument` for FIFOs, sockets and devices.
    pub fn truncate(&self, target: Target<'_>, size: u64) -> Result<()> {
        let entry = self.entry(target, "truncate")?;
        self.truncate_entry(&entry, size).map_err(report)
    }

    fn truncate_entry(&self, entry: &Entry<'_>, size: u64) -> Result<()> {
        let ctx = || entry.ctx();
        let meta = entry.stat()?;
        resizable(&meta, &ctx)?;
        match entry.file() {
            Some(file) if self.config.oplocks_enabled() => self.break_read_caching(file),
            _ => self.check_resize(meta.key(), entry.owner(), meta.size, size, &ctx)?,
        }
        let writer = entry.open_writer()?;
        io::ftruncate(writer.as_raw_fd(), size).or_ctx(ctx)?;
        tracing::debug!(target = %entry.ctx().target, from = meta.size, to = size, "truncated");
        Ok(())
    }

    fn check_resize(
        &self,
        key: InodeKey,
        owner: Option<OwnerId>,
        old: u64,
        new: u64,
        ctx: &impl Fn() -> OpContext,
    ) -> Result<()> {
        let Some(range) = resize_range(old, new) else {
            return Ok(());
        };
        match self.enforce(key, owner, range, AccessIntent::Write) {
            RangeCheck::Clear => Ok(()),
            RangeCheck::WouldBlock => Err(VfsError::WouldBlock { ctx: ctx() }),
        }
    }
}
