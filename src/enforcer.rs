//! Mandatory byte-range lock enforcement and the lock operations that feed it
//!
//! The enforcer never waits: it builds a candidate lock for the caller's
//! identity, range and intent and tests it against the registry, answering
//! [`RangeCheck::Clear`] or [`RangeCheck::WouldBlock`].

use crate::error::{report, OpContext, Result, VfsError};
use crate::handle::{HandleId, OwnerId};
use crate::locks::{AccessIntent, ByteRange, LockKind, RangeCheck, RangeLock};
use crate::vfs::Vfs;
use vfs_syscalls::InodeKey;

impl Vfs {
    /// Check `[start, end]` on an open file against other owners' locks
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown handle, `InvalidArgument` when `end < start`.
    pub fn check_range(
        &self,
        handle: HandleId,
        start: u64,
        end: u64,
        intent: AccessIntent,
    ) -> Result<RangeCheck> {
        let file = self.file(handle, "check-range")?;
        let range = ByteRange::new(start, end).ok_or_else(|| {
            report(VfsError::InvalidArgument {
                ctx: OpContext::handle("check-range", handle),
            })
        })?;
        Ok(self.enforce(file.key(), Some(file.owner()), range, intent))
    }

    /// Test the registry; `owner == None` conflicts with every registered lock
    pub(crate) fn enforce(
        &self,
        key: InodeKey,
        owner: Option<OwnerId>,
        range: ByteRange,
        intent: AccessIntent,
    ) -> RangeCheck {
        self.stats.increment_lock_checks();
        let candidate = RangeLock {
            owner,
            range,
            kind: intent.into(),
        };
        let check = self.ranges.test(key, &candidate);
        if check == RangeCheck::WouldBlock {
            self.stats.increment_lock_conflicts();
            tracing::debug!(
                ino = key.ino,
                start = range.start,
                end = range.end,
                ?intent,
                "range blocked by mandatory lock"
            );
        }
        check
    }

    /// Register a byte-range lock for an open file
    ///
    /// # Errors
    ///
    /// `WouldBlock` if another open holds a conflicting lock, `InvalidArgument`
    /// when `end < start`, `NotFound` for an unknown handle.
    pub fn lock(&self, handle: HandleId, start: u64, end: u64, kind: LockKind) -> Result<()> {
        let ctx = || OpContext::handle("lock", handle);
        let file = self.file(handle, "lock")?;
        let range = ByteRange::new(start, end)
            .ok_or_else(|| report(VfsError::InvalidArgument { ctx: ctx() }))?;
        let lock = RangeLock {
            owner: Some(file.owner()),
            range,
            kind,
        };
        match self.ranges.lock(file.key(), lock) {
            RangeCheck::Clear => {
                file.track_locks(&self.ranges);
                tracing::debug!(handle, start, end, ?kind, "lock granted");
                Ok(())
            }
            RangeCheck::WouldBlock => {
                self.stats.increment_lock_conflicts();
                Err(report(VfsError::WouldBlock { ctx: ctx() }))
            }
        }
    }

    /// Release the lock an open file holds on exactly `[start, end]`
    ///
    /// # Errors
    ///
    /// `NotFound` if no such lock is held or the handle is unknown.
    pub fn unlock(&self, handle: HandleId, start: u64, end: u64) -> Result<()> {
        let ctx = || OpContext::handle("unlock", handle);
        let file = self.file(handle, "unlock")?;
        let range = ByteRange::new(start, end)
            .ok_or_else(|| report(VfsError::InvalidArgument { ctx: ctx() }))?;
        if self.ranges.unlock(file.key(), file.owner(), range) {
            Ok(())
        } else {
            Err(report(VfsError::NotFound { ctx: ctx() }))
        }
    }

    /// Drop every lock an open file holds
    ///
    /// Dropping the last reference to the open file does the same.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown handle.
    pub fn release_locks(&self, handle: HandleId) -> Result<usize> {
        let file = self.file(handle, "release-locks")?;
        let released = self.ranges.release_owner(file.key(), file.owner());
        if released > 0 {
            tracing::debug!(handle, released, "released byte-range locks");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Access, OpenFiles};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn two_opens() -> (TempDir, Vfs, HandleId, HandleId) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f"), vec![0u8; 64]).unwrap();
        let handles = Arc::new(OpenFiles::new());
        let vfs = Vfs::builder(temp.path())
            .handles(handles.clone())
            .build()
            .unwrap();
        let a = handles.insert(vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
        let b = handles.insert(vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
        (temp, vfs, a, b)
    }

    #[compio::test]
    async fn test_shared_lock_blocks_writes_not_reads() {
        let (_temp, vfs, a, b) = two_opens().await;
        vfs.lock(a, 10, 19, LockKind::Shared).unwrap();

        assert_eq!(
            vfs.check_range(b, 15, 30, AccessIntent::Read).unwrap(),
            RangeCheck::Clear
        );
        assert_eq!(
            vfs.check_range(b, 15, 30, AccessIntent::Write).unwrap(),
            RangeCheck::WouldBlock
        );
        assert_eq!(
            vfs.check_range(b, 20, 30, AccessIntent::Write).unwrap(),
            RangeCheck::Clear
        );
        assert_eq!(
            vfs.check_range(a, 10, 19, AccessIntent::Write).unwrap(),
            RangeCheck::Clear
        );
        let stats = vfs.stats().snapshot();
        assert_eq!(stats.lock_checks, 4);
        assert_eq!(stats.lock_conflicts, 1);
    }

    #[compio::test]
    async fn test_lock_unlock_semantics() {
        let (_temp, vfs, a, b) = two_opens().await;
        vfs.lock(a, 0, 9, LockKind::Exclusive).unwrap();
        assert!(matches!(
            vfs.lock(b, 5, 5, LockKind::Shared),
            Err(VfsError::WouldBlock { .. })
        ));
        assert!(matches!(
            vfs.unlock(b, 0, 9),
            Err(VfsError::NotFound { .. })
        ));
        assert!(matches!(
            vfs.lock(a, 9, 0, LockKind::Shared),
            Err(VfsError::InvalidArgument { .. })
        ));
        vfs.unlock(a, 0, 9).unwrap();
        vfs.lock(b, 5, 5, LockKind::Shared).unwrap();
        assert_eq!(vfs.release_locks(b).unwrap(), 1);
        assert_eq!(vfs.release_locks(b).unwrap(), 0);
    }

    #[compio::test]
    async fn test_closing_handle_releases_its_locks() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f"), vec![0u8; 64]).unwrap();
        let handles = Arc::new(OpenFiles::new());
        let vfs = Vfs::builder(temp.path())
            .handles(handles.clone())
            .build()
            .unwrap();
        let a = handles.insert(vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
        let b = handles.insert(vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
        vfs.lock(a, 0, 63, LockKind::Exclusive).unwrap();
        assert_eq!(
            vfs.check_range(b, 0, 0, AccessIntent::Write).unwrap(),
            RangeCheck::WouldBlock
        );

        // Closed without release_locks
        drop(handles.remove(a));

        assert_eq!(
            vfs.check_range(b, 0, 63, AccessIntent::Write).unwrap(),
            RangeCheck::Clear
        );
        assert_eq!(vfs.ranges.locked_inodes(), 0);
        vfs.lock(b, 0, 63, LockKind::Exclusive).unwrap();
    }
}
