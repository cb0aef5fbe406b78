//! Byte-range lock registry
//!
//! Locks are registered per inode and owned by an open file. Registration
//! is non-blocking: a conflicting request is refused with
//! [`RangeCheck::WouldBlock`] and the caller decides whether to retry.
//! The mandatory lock enforcer (`enforcer.rs`) only reads this registry.

use crate::handle::OwnerId;
use dashmap::DashMap;
use vfs_syscalls::InodeKey;

/// Inclusive byte range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// `None` when `end < start`
    #[must_use]
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The range covering `len` bytes from `offset`, `None` for `len == 0`
    /// or when it would run past `u64::MAX`
    #[must_use]
    pub fn from_len(offset: u64, len: u64) -> Option<Self> {
        let end = offset.checked_add(len.checked_sub(1)?)?;
        Some(Self { start: offset, end })
    }

    #[must_use]
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Lock strength
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Read lock; compatible with other shared locks
    Shared,
    /// Write lock; excludes everything from other owners
    Exclusive,
}

/// What an I/O request intends to do with a range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    Read,
    Write,
}

impl From<AccessIntent> for LockKind {
    fn from(intent: AccessIntent) -> Self {
        match intent {
            AccessIntent::Read => LockKind::Shared,
            AccessIntent::Write => LockKind::Exclusive,
        }
    }
}

/// Answer of a conflict check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeCheck {
    Clear,
    WouldBlock,
}

/// One registered lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeLock {
    /// `None` only for candidates that represent no open file at all
    pub owner: Option<OwnerId>,
    pub range: ByteRange,
    pub kind: LockKind,
}

impl RangeLock {
    /// POSIX conflict rule: different owners, overlapping ranges, at least one exclusive
    #[must_use]
    pub fn conflicts_with(&self, other: &RangeLock) -> bool {
        if self.owner.is_some() && self.owner == other.owner {
            return false;
        }
        if !self.range.overlaps(&other.range) {
            return false;
        }
        self.kind == LockKind::Exclusive || other.kind == LockKind::Exclusive
    }
}

/// Registered locks for every inode of a share
#[derive(Debug, Default)]
pub struct RangeLocks {
    by_inode: DashMap<InodeKey, Vec<RangeLock>>,
}

impl RangeLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `candidate` conflicts with anything registered on `key`
    ///
    /// Returns without allocating when the inode has no locks.
    #[must_use]
    pub fn test(&self, key: InodeKey, candidate: &RangeLock) -> RangeCheck {
        let Some(held) = self.by_inode.get(&key) else {
            return RangeCheck::Clear;
        };
        if held.iter().any(|lock| lock.conflicts_with(candidate)) {
            RangeCheck::WouldBlock
        } else {
            RangeCheck::Clear
        }
    }

    /// Register a lock unless it conflicts with another owner's lock
    pub fn lock(&self, key: InodeKey, lock: RangeLock) -> RangeCheck {
        let mut held = self.by_inode.entry(key).or_default();
        if held.iter().any(|existing| existing.conflicts_with(&lock)) {
            return RangeCheck::WouldBlock;
        }
        held.push(lock);
        RangeCheck::Clear
    }

    /// Remove the lock `owner` holds on exactly `range`; `false` if there is none
    pub fn unlock(&self, key: InodeKey, owner: OwnerId, range: ByteRange) -> bool {
        let removed = match self.by_inode.get_mut(&key) {
            Some(mut held) => {
                let position = held
                    .iter()
                    .position(|lock| lock.owner == Some(owner) && lock.range == range);
                position.map(|i| held.remove(i)).is_some()
            }
            None => false,
        };
        self.by_inode.remove_if(&key, |_, locks| locks.is_empty());
        removed
    }

    /// Drop every lock `owner` holds on `key`, returning how many were released
    pub fn release_owner(&self, key: InodeKey, owner: OwnerId) -> usize {
        let released = match self.by_inode.get_mut(&key) {
            Some(mut held) => {
                let before = held.len();
                held.retain(|lock| lock.owner != Some(owner));
                before - held.len()
            }
            None => 0,
        };
        self.by_inode.remove_if(&key, |_, locks| locks.is_empty());
        released
    }

    /// Number of inodes with at least one lock
    #[must_use]
    pub fn locked_inodes(&self) -> usize {
        self.by_inode.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rstest::rstest;

    const KEY: InodeKey = InodeKey { dev: 1, ino: 42 };

    fn owner(n: u64) -> Option<OwnerId> {
        Some(OwnerId::from_raw(n))
    }

    fn lock(o: u64, start: u64, end: u64, kind: LockKind) -> RangeLock {
        RangeLock {
            owner: owner(o),
            range: ByteRange::new(start, end).unwrap(),
            kind,
        }
    }

    #[test]
    fn test_byte_range_from_len() {
        assert_eq!(ByteRange::from_len(0, 10), ByteRange::new(0, 9));
        assert_eq!(ByteRange::from_len(5, 0), None);
        assert_eq!(ByteRange::from_len(u64::MAX, 2), None);
        assert!(ByteRange::new(3, 2).is_none());
    }

    #[rstest]
    #[case(LockKind::Shared, LockKind::Shared, false)]
    #[case(LockKind::Shared, LockKind::Exclusive, true)]
    #[case(LockKind::Exclusive, LockKind::Shared, true)]
    #[case(LockKind::Exclusive, LockKind::Exclusive, true)]
    fn test_conflict_matrix(#[case] held: LockKind, #[case] requested: LockKind, #[case] conflict: bool) {
        let a = lock(1, 0, 9, held);
        let b = lock(2, 5, 14, requested);
        assert_eq!(a.conflicts_with(&b), conflict);
        // Same owner never conflicts
        let c = lock(1, 5, 14, requested);
        assert!(!a.conflicts_with(&c));
    }

    #[test]
    fn test_ownerless_lock_conflicts_with_everyone() {
        let held = lock(1, 0, 9, LockKind::Shared);
        let candidate = RangeLock {
            owner: None,
            range: ByteRange::new(0, 0).unwrap(),
            kind: LockKind::Exclusive,
        };
        assert!(held.conflicts_with(&candidate));
    }

    #[test]
    fn test_lock_unlock_cycle_cleans_up() {
        let locks = RangeLocks::new();
        assert_eq!(locks.lock(KEY, lock(1, 5, 14, LockKind::Exclusive)), RangeCheck::Clear);
        assert_eq!(locks.lock(KEY, lock(2, 0, 9, LockKind::Shared)), RangeCheck::WouldBlock);
        assert_eq!(locks.lock(KEY, lock(2, 20, 29, LockKind::Shared)), RangeCheck::Clear);
        assert_eq!(locks.locked_inodes(), 1);

        let o1 = owner(1).unwrap();
        assert!(!locks.unlock(KEY, o1, ByteRange::new(5, 13).unwrap()));
        assert!(locks.unlock(KEY, o1, ByteRange::new(5, 14).unwrap()));
        assert_eq!(locks.release_owner(KEY, owner(2).unwrap()), 1);
        assert_eq!(locks.locked_inodes(), 0);
    }

    #[test]
    fn test_refused_lock_leaves_no_entry() {
        let locks = RangeLocks::new();
        let candidate = lock(1, 0, 0, LockKind::Exclusive);
        assert_eq!(locks.test(KEY, &candidate), RangeCheck::Clear);
        assert_eq!(locks.locked_inodes(), 0);
    }
}
