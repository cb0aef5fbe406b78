//! Open files and the handle table seam
//!
//! The protocol engine owns the mapping from client handle ids to open
//! files. The mediation layer only needs [`HandleTable::resolve`]; the
//! [`OpenFiles`] table here is the in-process implementation used by the
//! binary and tests.

use crate::locks::RangeLocks;
use compio::fs::File;
use dashmap::DashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, Weak};
use vfs_syscalls::{FileMetadata, InodeKey};

/// Client-visible handle id
pub type HandleId = u64;

/// Shared reference to an open file
pub type FileRef = Arc<OpenFile>;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Lock identity of an open file
///
/// Byte-range locks are owned per open, so two opens of the same inode
/// conflict with each other while one open never conflicts with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    fn next() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

/// Requested access when opening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

impl Access {
    #[must_use]
    pub const fn writable(self) -> bool {
        matches!(self, Access::ReadWrite)
    }
}

/// Caching options a client attaches at create time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Every write is flushed before it completes
    pub write_through: bool,
    /// The client promises no intermediate buffering
    pub no_buffering: bool,
    /// Access will be sequential
    pub sequential: bool,
    /// Access will be random
    pub random_access: bool,
}

/// An open file plus the state the mediation layer keeps for it
#[derive(Debug)]
pub struct OpenFile {
    file: File,
    owner: OwnerId,
    key: InodeKey,
    is_dir: bool,
    /// Share-relative path, updated when the file is renamed through this open
    path: RwLock<PathBuf>,
    write_through: AtomicBool,
    no_buffering: AtomicBool,
    /// Registry holding this open's byte-range locks, set by the first lock
    locks: OnceLock<Weak<RangeLocks>>,
}

impl OpenFile {
    /// Wrap an open file; `meta` must describe the opened descriptor
    #[must_use]
    pub fn new(file: File, path: PathBuf, meta: &FileMetadata) -> Self {
        Self {
            file,
            owner: OwnerId::next(),
            key: meta.key(),
            is_dir: meta.is_dir(),
            path: RwLock::new(path),
            write_through: AtomicBool::new(false),
            no_buffering: AtomicBool::new(false),
            locks: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    #[must_use]
    pub fn key(&self) -> InodeKey {
        self.key
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Share-relative path this open currently refers to
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_path(&self, path: PathBuf) {
        *self.path.write().unwrap_or_else(PoisonError::into_inner) = path;
    }

    #[must_use]
    pub fn write_through(&self) -> bool {
        self.write_through.load(Ordering::Relaxed)
    }

    /// Whether the client asked for unbuffered I/O (recorded, never honored)
    #[must_use]
    pub fn no_buffering(&self) -> bool {
        self.no_buffering.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hints(&self, options: CreateOptions) {
        self.write_through
            .store(options.write_through, Ordering::Relaxed);
        self.no_buffering
            .store(options.no_buffering, Ordering::Relaxed);
    }
}

impl OpenFile {
    pub(crate) fn track_locks(&self, registry: &Arc<RangeLocks>) {
        self.locks.get_or_init(|| Arc::downgrade(registry));
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        let Some(registry) = self.locks.get().and_then(Weak::upgrade) else {
            return;
        };
        let released = registry.release_owner(self.key, self.owner);
        if released > 0 {
            tracing::debug!(path = %self.path().display(), released, "released byte-range locks on close");
        }
    }
}

impl AsRawFd for OpenFile {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Lookup from handle id to open file
///
/// Closing a handle means dropping the table's [`FileRef`]. Byte-range
/// locks of the open are released once the last reference is gone; call
/// [`Vfs::release_locks`](crate::Vfs::release_locks) first to release them
/// while operations may still hold the file.
pub trait HandleTable: Send + Sync {
    /// The open file behind `id`, or `None` if the handle is unknown
    fn resolve(&self, id: HandleId) -> Option<FileRef>;
}

/// In-process handle table
#[derive(Debug, Default)]
pub struct OpenFiles {
    files: DashMap<HandleId, FileRef>,
    next_id: AtomicU64,
}

impl OpenFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open file and return its handle id
    pub fn insert(&self, file: FileRef) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.files.insert(id, file);
        id
    }

    /// Forget a handle, returning the open file if it was registered
    pub fn remove(&self, id: HandleId) -> Option<FileRef> {
        self.files.remove(&id).map(|(_, file)| file)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl HandleTable for OpenFiles {
    fn resolve(&self, id: HandleId) -> Option<FileRef> {
        self.files.get(&id).map(|entry| Arc::clone(entry.value()))
    }
}
