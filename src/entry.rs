//! Operation targets addressed either by path or by open handle
//!
//! Attribute, truncate and xattr operations accept both forms. [`Entry`]
//! hides the difference: descriptor calls for open files, `*at` calls on
//! the resolved parent for names.

use crate::error::{ErrnoContext, OpContext, Result};
use crate::handle::{FileRef, HandleId, OwnerId};
use crate::resolver::{LookupIntent, PathResolution};
use crate::vfs::Vfs;
use std::ffi::CString;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::SystemTime;
use vfs_syscalls::{io, metadata, FileMetadata, XattrTarget};

/// Path or open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'p> {
    Path(&'p Path),
    Handle(HandleId),
}

impl Target<'_> {
    pub(crate) fn context(&self, op: &'static str) -> OpContext {
        match self {
            Target::Path(path) => OpContext::path(op, path),
            Target::Handle(id) => OpContext::handle(op, *id),
        }
    }
}

enum Kind<'a> {
    Open(FileRef),
    Named(PathResolution<'a>),
}

/// A resolved target, holding its references until dropped
pub(crate) struct Entry<'a> {
    kind: Kind<'a>,
    ctx: OpContext,
}

impl Vfs {
    /// Resolve a target without following a final symlink
    pub(crate) fn entry(&self, target: Target<'_>, op: &'static str) -> Result<Entry<'_>> {
        let kind = match target {
            Target::Path(path) => Kind::Named(self.resolve(path, LookupIntent::entry())?),
            Target::Handle(id) => Kind::Open(self.file(id, op)?),
        };
        Ok(Entry {
            kind,
            ctx: target.context(op),
        })
    }
}

impl Entry<'_> {
    pub(crate) fn ctx(&self) -> OpContext {
        self.ctx.clone()
    }

    /// The open file, for handle targets
    pub(crate) fn file(&self) -> Option<&FileRef> {
        match &self.kind {
            Kind::Open(file) => Some(file),
            Kind::Named(_) => None,
        }
    }

    /// Lock identity used when checking byte-range locks
    pub(crate) fn owner(&self) -> Option<OwnerId> {
        self.file().map(|file| file.owner())
    }

    pub(crate) fn stat(&self) -> Result<FileMetadata> {
        match &self.kind {
            Kind::Open(file) => metadata::fstat(file.as_raw_fd()),
            Kind::Named(res) => res.parent().stat_at(res.name(), false),
        }
        .or_ctx(|| self.ctx())
    }

    pub(crate) fn chown(&self, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        match &self.kind {
            Kind::Open(file) => io::fchown(file.as_raw_fd(), uid, gid),
            Kind::Named(res) => res.parent().chown_at(res.name(), uid, gid),
        }
        .or_ctx(|| self.ctx())
    }

    pub(crate) fn chmod(&self, mode: u32) -> Result<()> {
        match &self.kind {
            Kind::Open(file) => io::fchmod(file.as_raw_fd(), mode),
            Kind::Named(res) => res.parent().chmod_at(res.name(), mode),
        }
        .or_ctx(|| self.ctx())
    }

    pub(crate) fn set_times(
        &self,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> Result<()> {
        match &self.kind {
            Kind::Open(file) => io::futimens(file.as_raw_fd(), accessed, modified),
            Kind::Named(res) => res.parent().utimens_at(res.name(), accessed, modified),
        }
        .or_ctx(|| self.ctx())
    }

    /// Open the target for writing: the write-access reservation a size change needs
    ///
    /// `O_NONBLOCK` keeps a FIFO that slipped past the caller's type check
    /// from waiting for a reader.
    pub(crate) fn open_writer(&self) -> Result<OwnedFd> {
        match &self.kind {
            Kind::Open(file) => io::reopen(file.as_raw_fd(), libc::O_WRONLY | libc::O_NONBLOCK),
            Kind::Named(res) => res.parent().open_at(
                res.name(),
                libc::O_WRONLY | libc::O_NOFOLLOW | libc::O_NONBLOCK,
                0,
            ),
        }
        .or_ctx(|| self.ctx())
    }

    /// Flush the target's inode
    ///
    /// Only regular files and directories are flushed. Opening a FIFO or a
    /// device by name has side effects, and symlinks cannot be opened.
    pub(crate) fn flush_metadata(&self, meta: &FileMetadata) -> nix::Result<()> {
        match &self.kind {
            Kind::Open(file) => io::fsync(file.as_raw_fd()),
            Kind::Named(_) if !meta.is_file() && !meta.is_dir() => Ok(()),
            Kind::Named(res) => {
                let fd = res.parent().open_at(
                    res.name(),
                    libc::O_RDONLY | libc::O_NOFOLLOW | libc::O_NONBLOCK,
                    0,
                )?;
                io::fsync(fd.as_raw_fd())
            }
        }
    }

    /// Run an xattr call against the target without following a final symlink
    pub(crate) fn with_xattrs<R>(
        &self,
        f: impl FnOnce(XattrTarget<'_>) -> nix::Result<R>,
    ) -> nix::Result<R> {
        match &self.kind {
            Kind::Open(file) => f(XattrTarget::Fd(file.as_raw_fd())),
            Kind::Named(res) => {
                let path = res.parent().proc_path(res.name());
                let c_path = CString::new(path.as_os_str().as_bytes())
                    .map_err(|_| nix::errno::Errno::EINVAL)?;
                f(XattrTarget::Path(&c_path))
            }
        }
    }
}
