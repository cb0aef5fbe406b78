//! `posix_fadvise(2)` access-pattern hints

use nix::fcntl::{posix_fadvise, PosixFadviseAdvice};
use std::os::unix::io::RawFd;

/// Access pattern advice for a file region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadviseAdvice {
    /// Data will be accessed sequentially
    Sequential,
    /// Data will be accessed randomly
    Random,
    /// Data will not be accessed again soon
    DontNeed,
    /// Data will be accessed again soon
    WillNeed,
    /// Data will not be accessed again
    NoReuse,
    /// Normal access pattern (default)
    Normal,
}

impl FadviseAdvice {
    fn to_posix(self) -> PosixFadviseAdvice {
        match self {
            FadviseAdvice::Sequential => PosixFadviseAdvice::POSIX_FADV_SEQUENTIAL,
            FadviseAdvice::Random => PosixFadviseAdvice::POSIX_FADV_RANDOM,
            FadviseAdvice::DontNeed => PosixFadviseAdvice::POSIX_FADV_DONTNEED,
            FadviseAdvice::WillNeed => PosixFadviseAdvice::POSIX_FADV_WILLNEED,
            FadviseAdvice::NoReuse => PosixFadviseAdvice::POSIX_FADV_NOREUSE,
            FadviseAdvice::Normal => PosixFadviseAdvice::POSIX_FADV_NORMAL,
        }
    }
}

/// Give the kernel advice about the access pattern of `[offset, offset + len)`
///
/// A `len` of zero covers everything from `offset` to the end of the file.
/// For `Sequential` the kernel doubles the readahead window; `Random`
/// disables readahead.
///
/// # Errors
///
/// `EBADF` for an invalid descriptor, `ESPIPE` for pipes.
pub fn fadvise(fd: RawFd, advice: FadviseAdvice, offset: u64, len: u64) -> nix::Result<()> {
    let offset = libc::off_t::try_from(offset).map_err(|_| nix::errno::Errno::EINVAL)?;
    let len = libc::off_t::try_from(len).map_err(|_| nix::errno::Errno::EINVAL)?;
    posix_fadvise(fd, offset, len, advice.to_posix())
}
