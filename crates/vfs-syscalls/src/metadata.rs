//! File metadata using `fstat(2)` and `fstatat(2)`
//!
//! [`FileMetadata`] is a plain copy of the fields of `struct stat` that the
//! mediation layer reasons about, with timestamps converted to `SystemTime`.
//! [`InodeKey`] is the `(dev, ino)` pair used to identify an object across
//! different names and descriptors.

use nix::fcntl::AtFlags;
use nix::sys::stat::{self, FileStat};
use std::ffi::OsStr;
use std::os::unix::io::RawFd;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Inode identity: device and inode number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeKey {
    /// Device ID
    pub dev: u64,
    /// Inode number
    pub ino: u64,
}

/// Object type as reported by `st_mode` or `d_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Fifo,
    Socket,
    CharDevice,
    BlockDevice,
    /// `DT_UNKNOWN` from a filesystem that does not fill `d_type`
    Unknown,
}

impl FileType {
    /// Decode the type bits of a mode value
    #[must_use]
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT {
            libc::S_IFREG => Self::Regular,
            libc::S_IFDIR => Self::Directory,
            libc::S_IFLNK => Self::Symlink,
            libc::S_IFIFO => Self::Fifo,
            libc::S_IFSOCK => Self::Socket,
            libc::S_IFCHR => Self::CharDevice,
            libc::S_IFBLK => Self::BlockDevice,
            _ => Self::Unknown,
        }
    }

    /// Decode a `d_type` value from a directory entry
    #[must_use]
    pub fn from_dirent(d_type: u8) -> Self {
        match d_type {
            libc::DT_REG => Self::Regular,
            libc::DT_DIR => Self::Directory,
            libc::DT_LNK => Self::Symlink,
            libc::DT_FIFO => Self::Fifo,
            libc::DT_SOCK => Self::Socket,
            libc::DT_CHR => Self::CharDevice,
            libc::DT_BLK => Self::BlockDevice,
            _ => Self::Unknown,
        }
    }
}

/// File metadata captured from a single `stat` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,
    /// Full mode including the type bits
    pub mode: u32,
    /// User ID
    pub uid: u32,
    /// Group ID
    pub gid: u32,
    /// Number of hard links
    pub nlink: u64,
    /// Inode number
    pub ino: u64,
    /// Device ID
    pub dev: u64,
    /// Allocated 512-byte blocks
    pub blocks: u64,
    /// Last access time
    pub accessed: SystemTime,
    /// Last modification time
    pub modified: SystemTime,
    /// Last status change time
    pub changed: SystemTime,
}

impl FileMetadata {
    #[allow(clippy::unnecessary_cast)]
    fn from_stat(st: &FileStat) -> Self {
        Self {
            size: st.st_size as u64,
            mode: st.st_mode as u32,
            uid: st.st_uid,
            gid: st.st_gid,
            nlink: st.st_nlink as u64,
            ino: st.st_ino as u64,
            dev: st.st_dev as u64,
            blocks: st.st_blocks as u64,
            accessed: timestamp(st.st_atime as i64, st.st_atime_nsec as i64),
            modified: timestamp(st.st_mtime as i64, st.st_mtime_nsec as i64),
            changed: timestamp(st.st_ctime as i64, st.st_ctime_nsec as i64),
        }
    }

    /// Identity of the underlying inode
    #[must_use]
    pub fn key(&self) -> InodeKey {
        InodeKey {
            dev: self.dev,
            ino: self.ino,
        }
    }

    #[must_use]
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::Regular
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }

    /// Permission bits including setuid, setgid and sticky
    #[must_use]
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Convert a `(seconds, nanoseconds)` pair to `SystemTime`, handling pre-epoch values
fn timestamp(secs: i64, nsec: i64) -> SystemTime {
    let nanos = u32::try_from(nsec.clamp(0, 999_999_999)).unwrap_or(0);
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs.unsigned_abs(), nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(u64::from(nanos))
    }
}

/// Get metadata for an open descriptor (works on `O_PATH` descriptors)
///
/// # Errors
///
/// Returns the errno reported by `fstat(2)`.
pub fn fstat(fd: RawFd) -> nix::Result<FileMetadata> {
    stat::fstat(fd).map(|st| FileMetadata::from_stat(&st))
}

/// Get metadata for `name` relative to `dirfd`
///
/// With `follow == false` the final component is not dereferenced, so a
/// symlink reports its own metadata.
///
/// # Errors
///
/// Returns the errno reported by `fstatat(2)`.
pub fn fstatat(dirfd: RawFd, name: &OsStr, follow: bool) -> nix::Result<FileMetadata> {
    let flags = if follow {
        AtFlags::empty()
    } else {
        AtFlags::AT_SYMLINK_NOFOLLOW
    };
    stat::fstatat(Some(dirfd), name, flags).map(|st| FileMetadata::from_stat(&st))
}
