//! # vfs-syscalls
//!
//! Synchronous wrappers around the Linux `*at` syscall family used by the
//! smb-vfs mediation layer:
//! - Directory handles (`O_PATH` descriptors) with TOCTOU-safe `*at` operations
//! - `fstat`/`fstatat` metadata with nanosecond timestamps
//! - Extended attributes through descriptors or `/proc/self/fd` paths
//! - `fadvise`, `fallocate`, `sync_file_range` and `O_DIRECT` control
//! - Resumable directory streams with stable cookies
//!
//! Every call returns [`nix::Result`], so callers keep the raw errno and can
//! classify it themselves.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::ffi::OsStr;
//! use std::path::Path;
//! use vfs_syscalls::DirFd;
//!
//! # fn example() -> nix::Result<()> {
//! let share = DirFd::open(Path::new("/srv/share"))?;
//! share.mkdir_at(OsStr::new("docs"), 0o755)?;
//! let meta = share.stat_at(OsStr::new("docs"), false)?;
//! assert!(meta.is_dir());
//! # Ok(())
//! # }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("vfs-syscalls only supports Linux");

pub mod dir_stream;
pub mod directory;
pub mod fadvise;
pub mod fallocate;
pub mod io;
pub mod metadata;
pub mod xattr;

pub use dir_stream::{DirStream, RawDirEntry};
pub use directory::DirFd;
pub use fadvise::FadviseAdvice;
pub use metadata::{FileMetadata, FileType, InodeKey};
pub use xattr::{XattrSetMode, XattrTarget};

use nix::errno::Errno;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convert a name into a C string, rejecting interior NUL bytes with `EINVAL`
pub fn cstring(name: &OsStr) -> nix::Result<CString> {
    CString::new(name.as_bytes()).map_err(|_| Errno::EINVAL)
}
