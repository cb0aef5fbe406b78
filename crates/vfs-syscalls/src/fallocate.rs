//! `fallocate(2)` space reservation

use nix::errno::Errno;
use nix::fcntl::{self, FallocateFlags};
use std::os::unix::io::RawFd;

/// Reserve `[offset, offset + len)` with the given mode
///
/// # Errors
///
/// `EOPNOTSUPP` on filesystems without preallocation, `ENOSPC` when the
/// reservation does not fit.
pub fn fallocate(fd: RawFd, offset: u64, len: u64, mode: FallocateFlags) -> nix::Result<()> {
    let offset = libc::off_t::try_from(offset).map_err(|_| Errno::EFBIG)?;
    let len = libc::off_t::try_from(len).map_err(|_| Errno::EFBIG)?;
    fcntl::fallocate(fd, mode, offset, len)
}

/// Reserve space for `len` bytes from `offset` without changing the visible size
///
/// # Errors
///
/// See [`fallocate`].
pub fn preallocate_keep_size(fd: RawFd, offset: u64, len: u64) -> nix::Result<()> {
    fallocate(fd, offset, len, FallocateFlags::FALLOC_FL_KEEP_SIZE)
}
