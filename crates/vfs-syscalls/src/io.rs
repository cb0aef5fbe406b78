//! Descriptor-level I/O control: direct I/O, range flushes, truncation

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, OFlag};
use nix::sys::stat::{self, Mode};
use nix::unistd::{self, Gid, Uid};
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::time::SystemTime;

use crate::directory::to_timespec;

/// Clear `O_DIRECT` from the open file description
///
/// Returns whether the flag was set.
///
/// # Errors
///
/// Returns the errno from `fcntl(2)`.
pub fn clear_direct_io(fd: RawFd) -> nix::Result<bool> {
    let flags = OFlag::from_bits_retain(fcntl::fcntl(fd, FcntlArg::F_GETFL)?);
    if !flags.contains(OFlag::O_DIRECT) {
        return Ok(false);
    }
    fcntl::fcntl(fd, FcntlArg::F_SETFL(flags - OFlag::O_DIRECT))?;
    Ok(true)
}

/// Write back and wait for `[offset, offset + len)`
///
/// # Errors
///
/// `EIO` when writeback of the range failed.
pub fn sync_range(fd: RawFd, offset: u64, len: u64) -> nix::Result<()> {
    let offset = libc::off64_t::try_from(offset).map_err(|_| Errno::EINVAL)?;
    let len = libc::off64_t::try_from(len).map_err(|_| Errno::EINVAL)?;
    let flags = libc::SYNC_FILE_RANGE_WAIT_BEFORE
        | libc::SYNC_FILE_RANGE_WRITE
        | libc::SYNC_FILE_RANGE_WAIT_AFTER;
    // SAFETY: plain syscall on a caller-provided descriptor.
    let rc = unsafe { libc::sync_file_range(fd, offset, len, flags) };
    Errno::result(rc).map(drop)
}

/// `fsync(2)`
///
/// # Errors
///
/// `EIO` on writeback failure.
pub fn fsync(fd: RawFd) -> nix::Result<()> {
    unistd::fsync(fd)
}

/// `ftruncate(2)`
///
/// # Errors
///
/// `EINVAL` if the descriptor is not open for writing, `EFBIG` past the size limit.
pub fn ftruncate(fd: RawFd, size: u64) -> nix::Result<()> {
    let size = libc::off_t::try_from(size).map_err(|_| Errno::EFBIG)?;
    // SAFETY: the caller keeps fd open for the duration of the call.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    unistd::ftruncate(fd, size)
}

/// `fchmod(2)` with the permission bits of `mode`
///
/// # Errors
///
/// `EPERM` when the caller does not own the file.
pub fn fchmod(fd: RawFd, mode: u32) -> nix::Result<()> {
    stat::fchmod(fd, Mode::from_bits_truncate(mode & 0o7777))
}

/// `fchown(2)`; `None` leaves an id unchanged
///
/// # Errors
///
/// `EPERM` when the caller may not change ownership.
pub fn fchown(fd: RawFd, uid: Option<u32>, gid: Option<u32>) -> nix::Result<()> {
    unistd::fchown(fd, uid.map(Uid::from_raw), gid.map(Gid::from_raw))
}

/// `futimens(2)`; `None` leaves a time unchanged
///
/// # Errors
///
/// `EPERM` when the caller may not set explicit times.
pub fn futimens(fd: RawFd, accessed: Option<SystemTime>, modified: Option<SystemTime>) -> nix::Result<()> {
    stat::futimens(fd, &to_timespec(accessed), &to_timespec(modified))
}

/// Open the object behind `fd` again with new access flags
///
/// Goes through `/proc/self/fd`, so access is checked against the inode
/// just like a fresh open by name.
///
/// # Errors
///
/// `EACCES` when the new access mode is not permitted, `EISDIR` when asking
/// for write access to a directory.
pub fn reopen(fd: RawFd, flags: libc::c_int) -> nix::Result<OwnedFd> {
    let path = format!("/proc/self/fd/{fd}");
    let raw = fcntl::open(
        path.as_str(),
        OFlag::from_bits_retain(flags | libc::O_CLOEXEC),
        Mode::empty(),
    )?;
    // SAFETY: raw is a freshly opened descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}
