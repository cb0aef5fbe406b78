//! Resumable directory streams over `fdopendir(3)`
//!
//! Each entry carries the `d_off` cookie of the position after it, so a
//! caller can drop the stream and later continue from that entry with
//! [`DirStream::seek`].

use crate::metadata::FileType;
use nix::errno::Errno;
use std::ffi::{CStr, OsString};
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

/// One raw directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDirEntry {
    pub name: OsString,
    pub ino: u64,
    pub file_type: FileType,
    /// Cookie of the position after this entry
    pub next_cookie: i64,
}

/// An open directory stream
#[derive(Debug)]
pub struct DirStream {
    dir: NonNull<libc::DIR>,
}

// SAFETY: the DIR* is owned exclusively by this value and only used through
// &mut self, so moving it to another thread is sound.
unsafe impl Send for DirStream {}

impl DirStream {
    /// Take ownership of a directory descriptor opened with `O_RDONLY | O_DIRECTORY`
    ///
    /// # Errors
    ///
    /// Returns the errno from `fdopendir(3)`; the descriptor is closed on failure.
    pub fn from_fd(fd: OwnedFd) -> nix::Result<Self> {
        let raw = fd.into_raw_fd();
        // SAFETY: raw is a valid open directory descriptor.
        let dir = unsafe { libc::fdopendir(raw) };
        match NonNull::new(dir) {
            Some(dir) => Ok(Self { dir }),
            None => {
                let err = Errno::last();
                // SAFETY: fdopendir failed, so we still own raw.
                drop(unsafe { OwnedFd::from_raw_fd(raw) });
                Err(err)
            }
        }
    }

    /// Descriptor of the directory, for `fstatat` on entries
    #[must_use]
    pub fn fd(&self) -> RawFd {
        // SAFETY: dir is a valid DIR* until drop.
        unsafe { libc::dirfd(self.dir.as_ptr()) }
    }

    /// Continue from a cookie previously returned in [`RawDirEntry::next_cookie`]
    pub fn seek(&mut self, cookie: i64) {
        log::trace!("seekdir to cookie {cookie}");
        // SAFETY: dir is valid; any cookie value is accepted by seekdir.
        unsafe { libc::seekdir(self.dir.as_ptr(), cookie as libc::c_long) };
    }

    /// Current position cookie
    #[must_use]
    pub fn tell(&self) -> i64 {
        // SAFETY: dir is a valid DIR* until drop.
        i64::from(unsafe { libc::telldir(self.dir.as_ptr()) })
    }

    /// Read the next entry, `None` at the end of the directory
    ///
    /// # Errors
    ///
    /// Returns the errno from `readdir64(3)`.
    pub fn next_entry(&mut self) -> Option<nix::Result<RawDirEntry>> {
        Errno::clear();
        // SAFETY: dir is valid and used exclusively through &mut self.
        let entry = unsafe { libc::readdir64(self.dir.as_ptr()) };
        if entry.is_null() {
            return match Errno::last() {
                Errno::UnknownErrno => None,
                err => Some(Err(err)),
            };
        }
        // SAFETY: readdir64 returned a valid entry that lives until the next call.
        let entry = unsafe { &*entry };
        // SAFETY: d_name is NUL-terminated by the kernel.
        let name = unsafe { CStr::from_ptr(entry.d_name.as_ptr()) };
        Some(Ok(RawDirEntry {
            name: OsString::from_vec(name.to_bytes().to_vec()),
            ino: entry.d_ino,
            file_type: FileType::from_dirent(entry.d_type),
            next_cookie: entry.d_off,
        }))
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        // SAFETY: dir was opened by fdopendir and is closed exactly once.
        unsafe { libc::closedir(self.dir.as_ptr()) };
    }
}
