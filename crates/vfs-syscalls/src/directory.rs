//! Directory descriptors for TOCTOU-safe `*at` operations
//!
//! A [`DirFd`] is an `O_PATH | O_DIRECTORY` descriptor. Every operation takes
//! a single path component relative to it, so no operation ever walks a path
//! the kernel could resolve through a concurrently swapped symlink.

use crate::metadata::{self, FileMetadata, InodeKey};
use nix::errno::Errno;
use nix::fcntl::{self, AtFlags, FcntlArg, OFlag};
use nix::sys::stat::{self, FchmodatFlags, Mode, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::{self, Gid, Uid, UnlinkatFlags};
use std::ffi::{OsStr, OsString};
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const DIR_FLAGS: libc::c_int = libc::O_PATH | libc::O_DIRECTORY | libc::O_CLOEXEC;

/// Take ownership of a descriptor nix just returned
fn owned(raw: RawFd) -> OwnedFd {
    // SAFETY: raw was freshly returned by a successful open/dup and nothing else owns it.
    unsafe { OwnedFd::from_raw_fd(raw) }
}

/// A directory handle for secure directory-relative operations
///
/// # Example
///
/// ```rust,no_run
/// use std::ffi::OsStr;
/// use std::path::Path;
/// use vfs_syscalls::DirFd;
///
/// # fn example() -> nix::Result<()> {
/// let root = DirFd::open(Path::new("/srv/share"))?;
/// let docs = root.open_child(OsStr::new("docs"))?;
/// docs.unlink_at(OsStr::new("old.txt"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DirFd {
    fd: OwnedFd,
    key: InodeKey,
    /// Path used for debugging output only
    path: PathBuf,
}

impl DirFd {
    /// Open a directory by absolute or cwd-relative path
    ///
    /// Symlinks inside `path` are followed; use [`DirFd::open_child`] for
    /// component-wise traversal that refuses them.
    ///
    /// # Errors
    ///
    /// Returns the errno from `open(2)` or `fstat(2)`, e.g. `ENOTDIR` if the
    /// path is not a directory.
    pub fn open(path: &Path) -> nix::Result<Self> {
        let raw = fcntl::open(path, OFlag::from_bits_retain(DIR_FLAGS), Mode::empty())?;
        Self::from_owned(owned(raw), path.to_path_buf())
    }

    fn from_owned(fd: OwnedFd, path: PathBuf) -> nix::Result<Self> {
        let key = metadata::fstat(fd.as_raw_fd())?.key();
        Ok(Self { fd, key, path })
    }

    /// Open the child directory `name` without following a symlink
    ///
    /// # Errors
    ///
    /// `ENOTDIR` if `name` is not a directory, `ELOOP` if it is a symlink,
    /// `ENOENT` if it does not exist.
    pub fn open_child(&self, name: &OsStr) -> nix::Result<Self> {
        let fd = self.open_at(name, DIR_FLAGS | libc::O_NOFOLLOW, 0)?;
        Self::from_owned(fd, self.path.join(name))
    }

    /// Open this directory's parent through `..`
    ///
    /// # Errors
    ///
    /// Returns the errno from `openat(2)`.
    pub fn open_parent(&self) -> nix::Result<Self> {
        let fd = self.open_at(OsStr::new(".."), DIR_FLAGS, 0)?;
        let path = self.path.join("..");
        Self::from_owned(fd, path)
    }

    /// Duplicate the descriptor
    ///
    /// # Errors
    ///
    /// Returns the errno from `fcntl(F_DUPFD_CLOEXEC)`.
    pub fn try_clone(&self) -> nix::Result<Self> {
        let raw = fcntl::fcntl(self.fd.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(0))?;
        Ok(Self {
            fd: owned(raw),
            key: self.key,
            path: self.path.clone(),
        })
    }

    /// Identity of this directory
    #[must_use]
    pub fn key(&self) -> InodeKey {
        self.key
    }

    /// Path this directory was reached by (debugging only)
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata of the directory itself
    ///
    /// # Errors
    ///
    /// Returns the errno from `fstat(2)`.
    pub fn stat(&self) -> nix::Result<FileMetadata> {
        metadata::fstat(self.fd.as_raw_fd())
    }

    /// Metadata of `name` inside this directory
    ///
    /// # Errors
    ///
    /// Returns the errno from `fstatat(2)`.
    pub fn stat_at(&self, name: &OsStr, follow: bool) -> nix::Result<FileMetadata> {
        metadata::fstatat(self.fd.as_raw_fd(), name, follow)
    }

    /// Like [`DirFd::stat_at`] without following symlinks, mapping `ENOENT` to `None`
    ///
    /// # Errors
    ///
    /// Any errno other than `ENOENT`.
    pub fn lookup(&self, name: &OsStr) -> nix::Result<Option<FileMetadata>> {
        match self.stat_at(name, false) {
            Ok(meta) => Ok(Some(meta)),
            Err(Errno::ENOENT) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `openat(2)` relative to this directory
    ///
    /// `O_CLOEXEC` is always added.
    ///
    /// # Errors
    ///
    /// Returns the errno from `openat(2)`.
    pub fn open_at(&self, name: &OsStr, flags: libc::c_int, mode: u32) -> nix::Result<OwnedFd> {
        let raw = fcntl::openat(
            Some(self.fd.as_raw_fd()),
            name,
            OFlag::from_bits_retain(flags | libc::O_CLOEXEC),
            Mode::from_bits_truncate(mode),
        )?;
        Ok(owned(raw))
    }

    /// Take a reference to the entry `name` itself (`O_PATH | O_NOFOLLOW`)
    ///
    /// The returned descriptor pins the inode for the lifetime of the caller's
    /// operation, even if the name is unlinked meanwhile.
    ///
    /// # Errors
    ///
    /// Returns the errno from `openat(2)`.
    pub fn entry_ref(&self, name: &OsStr) -> nix::Result<OwnedFd> {
        self.open_at(name, libc::O_PATH | libc::O_NOFOLLOW, 0)
    }

    /// `mkdirat(2)`
    ///
    /// # Errors
    ///
    /// `EEXIST` if the name is taken.
    pub fn mkdir_at(&self, name: &OsStr, mode: u32) -> nix::Result<()> {
        stat::mkdirat(Some(self.fd.as_raw_fd()), name, Mode::from_bits_truncate(mode))
    }

    /// `symlinkat(2)`: create `name` pointing at `target`
    ///
    /// # Errors
    ///
    /// `EEXIST` if the name is taken.
    pub fn symlink_at(&self, target: &OsStr, name: &OsStr) -> nix::Result<()> {
        unistd::symlinkat(target, Some(self.fd.as_raw_fd()), name)
    }

    /// `linkat(2)`: hard link `name` as `new_name` inside `new_dir`
    ///
    /// # Errors
    ///
    /// `EXDEV` across filesystems, `EEXIST` if the new name is taken.
    pub fn link_at(&self, name: &OsStr, new_dir: &DirFd, new_name: &OsStr) -> nix::Result<()> {
        unistd::linkat(
            Some(self.fd.as_raw_fd()),
            name,
            Some(new_dir.fd.as_raw_fd()),
            new_name,
            AtFlags::empty(),
        )
    }

    /// `unlinkat(2)` for a non-directory
    ///
    /// # Errors
    ///
    /// `EISDIR` if `name` is a directory.
    pub fn unlink_at(&self, name: &OsStr) -> nix::Result<()> {
        self.unlink_with(name, UnlinkatFlags::NoRemoveDir)
    }

    /// `unlinkat(2)` with `AT_REMOVEDIR`
    ///
    /// # Errors
    ///
    /// `ENOTEMPTY` if the directory still has entries.
    pub fn rmdir_at(&self, name: &OsStr) -> nix::Result<()> {
        self.unlink_with(name, UnlinkatFlags::RemoveDir)
    }

    fn unlink_with(&self, name: &OsStr, flags: UnlinkatFlags) -> nix::Result<()> {
        unistd::unlinkat(Some(self.fd.as_raw_fd()), name, flags)
    }

    /// `renameat(2)`
    ///
    /// # Errors
    ///
    /// Returns the errno from `renameat(2)`.
    pub fn rename_at(&self, name: &OsStr, new_dir: &DirFd, new_name: &OsStr) -> nix::Result<()> {
        fcntl::renameat(
            Some(self.fd.as_raw_fd()),
            name,
            Some(new_dir.fd.as_raw_fd()),
            new_name,
        )
    }

    /// `readlinkat(2)`
    ///
    /// # Errors
    ///
    /// `EINVAL` if `name` is not a symlink.
    pub fn readlink_at(&self, name: &OsStr) -> nix::Result<OsString> {
        fcntl::readlinkat(Some(self.fd.as_raw_fd()), name)
    }

    /// `fchmodat(2)`: change permission bits of `name`
    ///
    /// # Errors
    ///
    /// Returns the errno from `fchmodat(2)`.
    pub fn chmod_at(&self, name: &OsStr, mode: u32) -> nix::Result<()> {
        stat::fchmodat(
            Some(self.fd.as_raw_fd()),
            name,
            Mode::from_bits_truncate(mode & 0o7777),
            FchmodatFlags::FollowSymlink,
        )
    }

    /// `fchownat(2)` without following a final symlink; `None` leaves an id unchanged
    ///
    /// # Errors
    ///
    /// `EPERM` when the caller may not change ownership.
    pub fn chown_at(&self, name: &OsStr, uid: Option<u32>, gid: Option<u32>) -> nix::Result<()> {
        unistd::fchownat(
            Some(self.fd.as_raw_fd()),
            name,
            uid.map(Uid::from_raw),
            gid.map(Gid::from_raw),
            AtFlags::AT_SYMLINK_NOFOLLOW,
        )
    }

    /// `utimensat(2)` without following a final symlink; `None` leaves a time unchanged
    ///
    /// # Errors
    ///
    /// Returns the errno from `utimensat(2)`.
    pub fn utimens_at(
        &self,
        name: &OsStr,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> nix::Result<()> {
        stat::utimensat(
            Some(self.fd.as_raw_fd()),
            name,
            &to_timespec(accessed),
            &to_timespec(modified),
            UtimensatFlags::NoFollowSymlink,
        )
    }

    /// Path of `name` through `/proc/self/fd`, for the `l*xattr` family
    ///
    /// The kernel resolves the directory part through this descriptor, so the
    /// result is as race-free as an `*at` call. Pass `"."` for the directory
    /// itself; the magic link is then never the final component.
    #[must_use]
    pub fn proc_path(&self, name: &OsStr) -> PathBuf {
        PathBuf::from(format!("/proc/self/fd/{}", self.fd.as_raw_fd())).join(name)
    }
}

impl AsFd for DirFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for DirFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Convert an optional `SystemTime` to a timespec, `UTIME_OMIT` when absent
pub(crate) fn to_timespec(time: Option<SystemTime>) -> TimeSpec {
    let Some(time) = time else {
        return TimeSpec::UTIME_OMIT;
    };
    TimeSpec::from_timespec(raw_timespec(time))
}

fn raw_timespec(time: SystemTime) -> libc::timespec {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => libc::timespec {
            tv_sec: libc::time_t::try_from(d.as_secs()).unwrap_or(libc::time_t::MAX),
            tv_nsec: libc::c_long::from(d.subsec_nanos()),
        },
        Err(e) => {
            // Before the epoch: floor the seconds and keep nanoseconds positive
            let d = e.duration();
            let mut secs = -libc::time_t::try_from(d.as_secs()).unwrap_or(libc::time_t::MAX);
            let mut nanos = libc::c_long::from(d.subsec_nanos());
            if nanos > 0 {
                secs -= 1;
                nanos = 1_000_000_000 - nanos;
            }
            libc::timespec {
                tv_sec: secs,
                tv_nsec: nanos,
            }
        }
    }
}
