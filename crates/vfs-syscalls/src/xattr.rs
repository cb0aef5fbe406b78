//! Extended attributes through descriptors or no-follow paths
//!
//! [`XattrTarget`] selects between the `f*xattr` family (an open descriptor)
//! and the `l*xattr` family (a path whose final symlink is not followed).
//! Every read takes an optional buffer: `None` queries the required size.

use nix::errno::Errno;
use std::ffi::CStr;
use std::os::unix::io::RawFd;

/// Where extended attributes are read from or written to
#[derive(Debug, Clone, Copy)]
pub enum XattrTarget<'a> {
    /// An open descriptor (must not be `O_PATH`)
    Fd(RawFd),
    /// A path; a final symlink is operated on itself
    Path(&'a CStr),
}

/// Create/replace semantics for [`XattrTarget::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XattrSetMode {
    /// Create or replace
    #[default]
    Any,
    /// Fail with `EEXIST` if the attribute exists
    CreateOnly,
    /// Fail with `ENODATA` if the attribute does not exist
    ReplaceOnly,
}

impl XattrSetMode {
    fn flags(self) -> libc::c_int {
        match self {
            XattrSetMode::Any => 0,
            XattrSetMode::CreateOnly => libc::XATTR_CREATE,
            XattrSetMode::ReplaceOnly => libc::XATTR_REPLACE,
        }
    }
}

fn byte_count(rc: libc::ssize_t) -> nix::Result<usize> {
    let n = Errno::result(rc)?;
    usize::try_from(n).map_err(|_| Errno::EOVERFLOW)
}

fn out_buf(buf: Option<&mut [u8]>) -> (*mut libc::c_void, usize) {
    match buf {
        Some(b) => (b.as_mut_ptr().cast(), b.len()),
        None => (std::ptr::null_mut(), 0),
    }
}

impl XattrTarget<'_> {
    /// Read attribute `name` into `buf`, or query its size with `None`
    ///
    /// # Errors
    ///
    /// `ENODATA` if absent, `ERANGE` if `buf` is too small.
    pub fn get(&self, name: &CStr, buf: Option<&mut [u8]>) -> nix::Result<usize> {
        let (ptr, len) = out_buf(buf);
        // SAFETY: ptr is null with len 0 or points at len writable bytes.
        let rc = unsafe {
            match self {
                XattrTarget::Fd(fd) => libc::fgetxattr(*fd, name.as_ptr(), ptr, len),
                XattrTarget::Path(p) => libc::lgetxattr(p.as_ptr(), name.as_ptr(), ptr, len),
            }
        };
        byte_count(rc)
    }

    /// Write attribute `name`
    ///
    /// # Errors
    ///
    /// `EEXIST`/`ENODATA` per `mode`, `ENOTSUP` without xattr support,
    /// `EPERM` for user attributes on symlinks.
    pub fn set(&self, name: &CStr, value: &[u8], mode: XattrSetMode) -> nix::Result<()> {
        let ptr = value.as_ptr().cast::<libc::c_void>();
        // SAFETY: value is readable for value.len() bytes.
        let rc = unsafe {
            match self {
                XattrTarget::Fd(fd) => {
                    libc::fsetxattr(*fd, name.as_ptr(), ptr, value.len(), mode.flags())
                }
                XattrTarget::Path(p) => {
                    libc::lsetxattr(p.as_ptr(), name.as_ptr(), ptr, value.len(), mode.flags())
                }
            }
        };
        Errno::result(rc).map(drop)
    }

    /// Read the NUL-separated name list into `buf`, or query its size with `None`
    ///
    /// # Errors
    ///
    /// `ERANGE` if `buf` is too small.
    pub fn list(&self, buf: Option<&mut [u8]>) -> nix::Result<usize> {
        let (ptr, len) = out_buf(buf);
        let ptr = ptr.cast::<libc::c_char>();
        // SAFETY: ptr is null with len 0 or points at len writable bytes.
        let rc = unsafe {
            match self {
                XattrTarget::Fd(fd) => libc::flistxattr(*fd, ptr, len),
                XattrTarget::Path(p) => libc::llistxattr(p.as_ptr(), ptr, len),
            }
        };
        byte_count(rc)
    }

    /// Remove attribute `name`
    ///
    /// # Errors
    ///
    /// `ENODATA` if absent.
    pub fn remove(&self, name: &CStr) -> nix::Result<()> {
        // SAFETY: name is a valid C string.
        let rc = unsafe {
            match self {
                XattrTarget::Fd(fd) => libc::fremovexattr(*fd, name.as_ptr()),
                XattrTarget::Path(p) => libc::lremovexattr(p.as_ptr(), name.as_ptr()),
            }
        };
        Errno::result(rc).map(drop)
    }
}

/// Split a NUL-separated name list into names, skipping empty segments
pub fn split_names(list: &[u8]) -> impl Iterator<Item = &[u8]> {
    list.split(|b| *b == 0).filter(|name| !name.is_empty())
}
