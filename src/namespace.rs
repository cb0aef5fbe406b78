//! Single-entry namespace mutations: create, mkdir, symlink, link, unlink, rmdir
//!
//! Creating operations resolve with a create intent, so the parent stays
//! locked from the existence check until the entry is made. Removals lock
//! the parent around the final lookup and the removal itself.

use crate::error::{report, ErrnoContext, OpContext, Result, VfsError};
use crate::resolver::{LookupIntent, PathResolution};
use crate::vfs::Vfs;
use std::ffi::OsString;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use vfs_syscalls::{io, metadata};

/// Permission bits a caller controls, including setuid, setgid and sticky
pub const PERMISSION_BITS: u32 = 0o7777;

fn refuse_root(res: &PathResolution<'_>, ctx: impl FnOnce() -> OpContext) -> Result<()> {
    if res.is_root() {
        return Err(VfsError::InvalidArgument { ctx: ctx() });
    }
    Ok(())
}

impl Vfs {
    /// Create a regular file; any type bits in `mode` are replaced
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the name is taken, resolution errors for the parent.
    pub fn create(&self, path: &Path, mode: u32) -> Result<()> {
        let ctx = || OpContext::path("create", path);
        let res = self.resolve(path, LookupIntent::create())?;
        let mode = (mode & !libc::S_IFMT) | libc::S_IFREG;
        let fd = res
            .parent()
            .open_at(
                res.name(),
                libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY | libc::O_NOFOLLOW,
                mode & PERMISSION_BITS,
            )
            .or_ctx(ctx)
            .map_err(report)?;
        // The process umask applied at creation; the caller's bits are final
        io::fchmod(fd.as_raw_fd(), mode & PERMISSION_BITS)
            .or_ctx(ctx)
            .map_err(report)?;
        tracing::debug!(path = %res.path().display(), mode = format_args!("{mode:o}"), "created file");
        Ok(())
    }

    /// Create a directory; any type bits in `mode` are replaced
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the name is taken (logged at debug only).
    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let ctx = || OpContext::path("mkdir", path);
        let res = self.resolve(path, LookupIntent::create())?;
        let mode = (mode & !libc::S_IFMT) | libc::S_IFDIR;
        res.parent()
            .mkdir_at(res.name(), mode & PERMISSION_BITS)
            .or_ctx(ctx)
            .map_err(report)?;
        res.parent()
            .chmod_at(res.name(), mode)
            .or_ctx(ctx)
            .map_err(report)?;
        tracing::debug!(path = %res.path().display(), mode = format_args!("{mode:o}"), "created directory");
        Ok(())
    }

    /// Create a symlink at `link_path` pointing at `target`
    ///
    /// The target text is stored verbatim; it is confined to the share only
    /// when a later resolution follows it.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the name is taken, `StorageFault` when the volume is full.
    pub fn symlink(&self, target: &Path, link_path: &Path) -> Result<()> {
        let ctx = || OpContext::path("symlink", link_path);
        let res = self.resolve(link_path, LookupIntent::create())?;
        if let Err(errno) = res.parent().symlink_at(target.as_os_str(), res.name()) {
            let err = VfsError::from_errno(ctx(), errno);
            if matches!(errno, nix::errno::Errno::EEXIST | nix::errno::Errno::ENOSPC) {
                tracing::debug!(path = %link_path.display(), "{err}");
                return Err(err);
            }
            return Err(report(err));
        }
        tracing::debug!(path = %res.path().display(), target = %target.display(), "created symlink");
        Ok(())
    }

    /// Hard link `existing` as `new_path`
    ///
    /// A final symlink in `existing` is followed, so the link names the
    /// symlink's target.
    ///
    /// # Errors
    ///
    /// `CrossVolumeNotSupported` when the two names live on different
    /// filesystems, `AlreadyExists` if `new_path` is taken, `PermissionDenied`
    /// for directories.
    pub fn link(&self, existing: &Path, new_path: &Path) -> Result<()> {
        let ctx = || OpContext::path("link", new_path);
        let old = self.resolve(existing, LookupIntent::entry().follow())?;
        let new = self.resolve(new_path, LookupIntent::create())?;
        refuse_root(&old, ctx).map_err(report)?;

        let old_volume = old.target().map_or(old.volume(), |meta| meta.dev);
        if old_volume != new.volume() {
            return Err(report(VfsError::CrossVolumeNotSupported { ctx: ctx() }));
        }
        old.parent()
            .link_at(old.name(), new.parent(), new.name())
            .or_ctx(ctx)
            .map_err(report)?;
        tracing::debug!(from = %old.path().display(), to = %new.path().display(), "created hard link");
        Ok(())
    }

    /// Remove a non-directory
    ///
    /// An entry whose link count already dropped to zero counts as removed.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing, `IsADirectory` for directories.
    pub fn unlink(&self, path: &Path) -> Result<()> {
        let ctx = || OpContext::path("unlink", path);
        let res = self.resolve(path, LookupIntent::entry())?;
        refuse_root(&res, ctx).map_err(report)?;
        let _permit = self.namespace.lock_dir(res.parent().key());

        let entry = res.parent().entry_ref(res.name()).or_ctx(ctx).map_err(report)?;
        let meta = metadata::fstat(entry.as_raw_fd()).or_ctx(ctx).map_err(report)?;
        if meta.nlink == 0 {
            tracing::debug!(path = %path.display(), "already unlinked");
            return Ok(());
        }
        if meta.is_dir() {
            return Err(report(VfsError::IsADirectory { ctx: ctx() }));
        }
        res.parent()
            .unlink_at(res.name())
            .or_ctx(ctx)
            .map_err(report)?;
        tracing::debug!(path = %res.path().display(), "unlinked");
        Ok(())
    }

    /// Remove an empty directory
    ///
    /// # Errors
    ///
    /// `NotEmpty` when entries remain (logged at debug only), `NotADirectory`
    /// for non-directories, `InvalidArgument` for the share root.
    pub fn rmdir(&self, path: &Path) -> Result<()> {
        let ctx = || OpContext::path("rmdir", path);
        let res = self.resolve(path, LookupIntent::directory())?;
        refuse_root(&res, ctx).map_err(report)?;
        let _permit = self.namespace.lock_dir(res.parent().key());
        res.parent()
            .rmdir_at(res.name())
            .or_ctx(ctx)
            .map_err(report)?;
        tracing::debug!(path = %res.path().display(), "removed directory");
        Ok(())
    }

    /// Remove an entry of any type
    ///
    /// # Errors
    ///
    /// As [`Vfs::unlink`] or [`Vfs::rmdir`], depending on the entry's type.
    pub fn remove(&self, path: &Path) -> Result<()> {
        let res = self.resolve(path, LookupIntent::entry())?;
        let is_dir = res.target().is_some_and(|meta| meta.is_dir());
        drop(res);
        if is_dir {
            self.rmdir(path)
        } else {
            self.unlink(path)
        }
    }

    /// Read a symlink's target text
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the entry is not a symlink.
    pub fn readlink(&self, path: &Path) -> Result<OsString> {
        let ctx = || OpContext::path("readlink", path);
        let res = self.resolve(path, LookupIntent::entry())?;
        if !res.target().is_some_and(|meta| meta.is_symlink()) {
            return Err(report(VfsError::InvalidArgument { ctx: ctx() }));
        }
        res.parent()
            .readlink_at(res.name())
            .or_ctx(ctx)
            .map_err(report)
    }
}
