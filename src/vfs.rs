//! The mediation layer for one share
//!
//! A [`Vfs`] owns the share root descriptor, the namespace and byte-range
//! lock tables and the counters, and borrows the two external
//! collaborators: the handle table and the oplock breaker. Operations are
//! implemented as `impl Vfs` blocks in their own modules.

use crate::config::VfsConfig;
use crate::dirlock::{KeyedLocks, NamespaceLocks};
use crate::error::{report, ErrnoContext, OpContext, Result, VfsError};
use crate::handle::{Access, FileRef, HandleId, HandleTable, OpenFile, OpenFiles};
use crate::locks::RangeLocks;
use crate::oplock::{BreakGate, NoopBreaker, OplockBreaker};
use crate::resolver::LookupIntent;
use crate::stats::VfsStats;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vfs_syscalls::{metadata, DirFd, InodeKey};

/// Filesystem mediation for one share root
pub struct Vfs {
    pub(crate) root: DirFd,
    root_path: PathBuf,
    pub(crate) config: VfsConfig,
    handles: Arc<dyn HandleTable>,
    pub(crate) breaker: Arc<dyn OplockBreaker>,
    pub(crate) gate: Arc<BreakGate>,
    pub(crate) namespace: NamespaceLocks,
    /// Per-inode locks for attribute changes
    pub(crate) inodes: KeyedLocks,
    pub(crate) ranges: Arc<RangeLocks>,
    pub(crate) stats: VfsStats,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("root", &self.root_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Vfs`]
///
/// # Example
///
/// ```rust,no_run
/// use smb_vfs::{OpenFiles, Vfs};
/// use std::sync::Arc;
///
/// # fn example() -> smb_vfs::Result<()> {
/// let handles = Arc::new(OpenFiles::new());
/// let vfs = Vfs::builder("/srv/share").handles(handles.clone()).build()?;
/// vfs.mkdir("docs".as_ref(), 0o755)?;
/// # Ok(())
/// # }
/// ```
pub struct VfsBuilder {
    root: PathBuf,
    config: VfsConfig,
    handles: Option<Arc<dyn HandleTable>>,
    breaker: Option<Arc<dyn OplockBreaker>>,
    gate: Option<Arc<BreakGate>>,
}

impl VfsBuilder {
    #[must_use]
    pub fn config(mut self, config: VfsConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn handles(mut self, handles: Arc<dyn HandleTable>) -> Self {
        self.handles = Some(handles);
        self
    }

    #[must_use]
    pub fn breaker(mut self, breaker: Arc<dyn OplockBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Share a write-serialization gate with other components
    #[must_use]
    pub fn gate(mut self, gate: Arc<BreakGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Open the share root
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The root does not exist or is not a directory
    /// - The root cannot be canonicalized
    pub fn build(self) -> Result<Vfs> {
        let ctx = || OpContext::path("open-share", &self.root);
        let root_path = std::fs::canonicalize(&self.root).or_ctx(ctx)?;
        let root = DirFd::open(&root_path).or_ctx(ctx)?;
        tracing::info!(root = %root_path.display(), "share opened");
        Ok(Vfs {
            root,
            root_path,
            config: self.config,
            handles: self.handles.unwrap_or_else(|| Arc::new(OpenFiles::new())),
            breaker: self.breaker.unwrap_or_else(|| Arc::new(NoopBreaker)),
            gate: self.gate.unwrap_or_default(),
            namespace: NamespaceLocks::new(),
            inodes: KeyedLocks::new(),
            ranges: Arc::new(RangeLocks::new()),
            stats: VfsStats::new(),
        })
    }
}

impl Vfs {
    pub fn builder(root: impl Into<PathBuf>) -> VfsBuilder {
        VfsBuilder {
            root: root.into(),
            config: VfsConfig::default(),
            handles: None,
            breaker: None,
            gate: None,
        }
    }

    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    #[must_use]
    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> &VfsStats {
        &self.stats
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<BreakGate> {
        &self.gate
    }

    pub(crate) fn root_key(&self) -> InodeKey {
        self.root.key()
    }

    /// Resolve a handle through the external handle table
    pub(crate) fn file(&self, handle: HandleId, op: &'static str) -> Result<FileRef> {
        self.handles.resolve(handle).ok_or_else(|| {
            report(VfsError::NotFound {
                ctx: OpContext::handle(op, handle),
            })
        })
    }

    /// Open the entry at `path`, following a final symlink inside the share
    ///
    /// The returned open file is not registered anywhere; callers hand it
    /// to their handle table.
    ///
    /// # Errors
    ///
    /// Resolution errors, `IsADirectory` when asking for write access to a
    /// directory, `NotFound` if the entry was replaced while opening.
    pub async fn open(&self, path: &Path, access: Access) -> Result<FileRef> {
        let ctx = || OpContext::path("open", path);
        let resolution = self.resolve(path, LookupIntent::entry().follow())?;
        let expected = resolution.target().map(|meta| meta.key());
        let relative = resolution.path().to_path_buf();
        drop(resolution);

        let file = compio::fs::OpenOptions::new()
            .read(true)
            .write(access.writable())
            .open(self.root_path.join(&relative))
            .await
            .or_ctx(ctx)
            .map_err(report)?;
        let meta = metadata::fstat(file.as_raw_fd()).or_ctx(ctx)?;
        if Some(meta.key()) != expected {
            // The name was swapped between resolution and open
            return Err(report(VfsError::NotFound { ctx: ctx() }));
        }
        tracing::debug!(path = %relative.display(), ?access, "opened");
        Ok(Arc::new(OpenFile::new(file, relative, &meta)))
    }
}
