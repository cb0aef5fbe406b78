//! Error handling for filesystem mediation
//!
//! Every operation reports a [`VfsError`] that carries an [`OpContext`]:
//! the operation name, the path or handle it targeted and, when the failure
//! came from the kernel, the raw errno. Callers map the variants onto their
//! protocol status codes; the context is there for diagnostics only.

use crate::handle::HandleId;
use nix::errno::Errno;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// What an operation was doing when it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpContext {
    /// Operation name, e.g. `"rename"`
    pub op: &'static str,
    /// Share-relative path or `handle#N`
    pub target: String,
    /// Raw errno, when the failure came from a syscall
    pub errno: Option<i32>,
}

impl OpContext {
    /// Context for an operation addressed by path
    #[must_use]
    pub fn path(op: &'static str, path: &Path) -> Self {
        Self {
            op,
            target: path.display().to_string(),
            errno: None,
        }
    }

    /// Context for an operation addressed by open handle
    #[must_use]
    pub fn handle(op: &'static str, handle: HandleId) -> Self {
        Self {
            op,
            target: format!("handle#{handle}"),
            errno: None,
        }
    }

    #[must_use]
    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }
}

impl fmt::Display for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.target)?;
        if let Some(errno) = self.errno {
            write!(f, " (errno {errno})")?;
        }
        Ok(())
    }
}

/// Result type for mediation operations
pub type Result<T> = std::result::Result<T, VfsError>;

/// Error kinds surfaced to the protocol layer
#[derive(Error, Debug)]
pub enum VfsError {
    #[error("{ctx}: no such file or directory")]
    NotFound { ctx: OpContext },

    #[error("{ctx}: already exists")]
    AlreadyExists { ctx: OpContext },

    #[error("{ctx}: directory not empty")]
    NotEmpty { ctx: OpContext },

    #[error("{ctx}: not a directory")]
    NotADirectory { ctx: OpContext },

    #[error("{ctx}: is a directory")]
    IsADirectory { ctx: OpContext },

    #[error("{ctx}: name too long")]
    NameTooLong { ctx: OpContext },

    #[error("{ctx}: too many levels of symbolic links")]
    SymlinkLoop { ctx: OpContext },

    #[error("{ctx}: cannot link across volumes")]
    CrossVolumeNotSupported { ctx: OpContext },

    /// A byte-range lock held through another handle conflicts
    #[error("{ctx}: conflicting byte-range lock")]
    WouldBlock { ctx: OpContext },

    /// The caller's buffer cannot hold the value
    #[error("{ctx}: buffer too small for value")]
    InsufficientBuffer { ctx: OpContext },

    /// The result exceeds a configured maximum
    #[error("{ctx}: result too large")]
    TooLarge { ctx: OpContext },

    #[error("{ctx}: permission denied")]
    PermissionDenied { ctx: OpContext },

    #[error("{ctx}: invalid argument")]
    InvalidArgument { ctx: OpContext },

    /// Rename source is an ancestor of the destination directory
    #[error("{ctx}: source is an ancestor of the destination")]
    InvalidSameEntry { ctx: OpContext },

    /// Rename destination is an ancestor of the source directory
    #[error("{ctx}: destination is an ancestor of the source")]
    DestinationNotEmpty { ctx: OpContext },

    /// Data reached the page cache but the requested flush failed
    #[error("{ctx}: wrote {written} bytes but flushing them failed: {source}")]
    FlushFailed {
        ctx: OpContext,
        written: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("{ctx}: storage fault: {source}")]
    StorageFault {
        ctx: OpContext,
        #[source]
        source: std::io::Error,
    },
}

impl VfsError {
    /// Classify a raw errno
    #[must_use]
    pub fn from_code(ctx: OpContext, code: i32) -> Self {
        let ctx = ctx.with_errno(code);
        match code {
            libc::ENOENT | libc::ENODATA => Self::NotFound { ctx },
            libc::EEXIST => Self::AlreadyExists { ctx },
            libc::ENOTEMPTY => Self::NotEmpty { ctx },
            libc::ENOTDIR => Self::NotADirectory { ctx },
            libc::EISDIR => Self::IsADirectory { ctx },
            libc::ENAMETOOLONG => Self::NameTooLong { ctx },
            libc::ELOOP => Self::SymlinkLoop { ctx },
            libc::EXDEV => Self::CrossVolumeNotSupported { ctx },
            libc::EAGAIN => Self::WouldBlock { ctx },
            libc::ERANGE => Self::InsufficientBuffer { ctx },
            libc::E2BIG => Self::TooLarge { ctx },
            libc::EACCES | libc::EPERM | libc::EROFS | libc::ETXTBSY => {
                Self::PermissionDenied { ctx }
            }
            libc::EINVAL => Self::InvalidArgument { ctx },
            _ => Self::StorageFault {
                ctx,
                source: std::io::Error::from_raw_os_error(code),
            },
        }
    }

    /// Classify a nix errno
    #[must_use]
    pub fn from_errno(ctx: OpContext, errno: Errno) -> Self {
        Self::from_code(ctx, errno as i32)
    }

    /// Classify an I/O error from the async runtime
    #[must_use]
    pub fn from_io(ctx: OpContext, err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::from_code(ctx, code),
            None => Self::StorageFault { ctx, source: err },
        }
    }

    /// Context of the failed operation
    #[must_use]
    pub fn context(&self) -> &OpContext {
        match self {
            Self::NotFound { ctx }
            | Self::AlreadyExists { ctx }
            | Self::NotEmpty { ctx }
            | Self::NotADirectory { ctx }
            | Self::IsADirectory { ctx }
            | Self::NameTooLong { ctx }
            | Self::SymlinkLoop { ctx }
            | Self::CrossVolumeNotSupported { ctx }
            | Self::WouldBlock { ctx }
            | Self::InsufficientBuffer { ctx }
            | Self::TooLarge { ctx }
            | Self::PermissionDenied { ctx }
            | Self::InvalidArgument { ctx }
            | Self::InvalidSameEntry { ctx }
            | Self::DestinationNotEmpty { ctx }
            | Self::FlushFailed { ctx, .. }
            | Self::StorageFault { ctx, .. } => ctx,
        }
    }

    /// Raw errno, when the failure came from a syscall
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        self.context().errno
    }

    /// Outcomes a client provokes routinely; logged at debug, not error
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AlreadyExists { .. }
                | Self::NotEmpty { .. }
                | Self::WouldBlock { .. }
        )
    }
}

/// Attach an [`OpContext`] to a syscall result
pub(crate) trait ErrnoContext<T> {
    fn or_ctx(self, ctx: impl FnOnce() -> OpContext) -> Result<T>;
}

impl<T> ErrnoContext<T> for nix::Result<T> {
    fn or_ctx(self, ctx: impl FnOnce() -> OpContext) -> Result<T> {
        self.map_err(|e| VfsError::from_errno(ctx(), e))
    }
}

impl<T> ErrnoContext<T> for std::io::Result<T> {
    fn or_ctx(self, ctx: impl FnOnce() -> OpContext) -> Result<T> {
        self.map_err(|e| VfsError::from_io(ctx(), e))
    }
}

/// Log a failure at the level its kind deserves and hand it back
pub(crate) fn report(err: VfsError) -> VfsError {
    let ctx = err.context();
    if err.is_expected() {
        tracing::debug!(op = ctx.op, target = %ctx.target, errno = ?ctx.errno, "{err}");
    } else {
        tracing::error!(op = ctx.op, target = %ctx.target, errno = ?ctx.errno, "{err}");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OpContext {
        OpContext::path("test", Path::new("a/b"))
    }

    #[test]
    fn test_errno_classification() {
        assert!(matches!(
            VfsError::from_code(ctx(), libc::ENOENT),
            VfsError::NotFound { .. }
        ));
        assert!(matches!(
            VfsError::from_code(ctx(), libc::ENODATA),
            VfsError::NotFound { .. }
        ));
        assert!(matches!(
            VfsError::from_errno(ctx(), Errno::EXDEV),
            VfsError::CrossVolumeNotSupported { .. }
        ));
        assert!(matches!(
            VfsError::from_code(ctx(), libc::EIO),
            VfsError::StorageFault { .. }
        ));
    }

    #[test]
    fn test_context_keeps_errno() {
        let err = VfsError::from_code(ctx(), libc::ENOTEMPTY);
        assert_eq!(err.errno(), Some(libc::ENOTEMPTY));
        assert!(err.is_expected());
        assert_eq!(err.to_string(), "test a/b (errno 39): directory not empty");
    }

    #[test]
    fn test_io_error_without_errno_is_storage_fault() {
        let err = VfsError::from_io(ctx(), std::io::Error::other("boom"));
        assert!(matches!(err, VfsError::StorageFault { .. }));
        assert!(!err.is_expected());
        assert_eq!(err.errno(), None);
    }
}
