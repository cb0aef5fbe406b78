//! Directory locks for namespace mutations
//!
//! [`KeyedLocks`] is a set of held inode keys with a condition variable:
//! acquiring a key waits until no one else holds it, and the returned guard
//! releases it on drop. [`NamespaceLocks`] adds the cross-directory rename
//! protocol on top: renames between different parents are serialized, the
//! ancestry of both parents is walked, and the two parents are locked in an
//! order derived from the tree so opposite-direction renames cannot deadlock.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use vfs_syscalls::{DirFd, InodeKey};

/// Depth limit for ancestry walks; a directory moved out of the share
/// would otherwise never reach the root
const MAX_ANCESTRY_DEPTH: usize = 4096;

/// Mutual exclusion keyed by inode
#[derive(Debug, Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<InodeKey>>,
    released: Condvar,
}

/// A held key, released on drop
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: InodeKey,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it
    pub fn lock(&self, key: InodeKey) -> KeyGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key);
        KeyGuard { locks: self, key }
    }

    /// Whether `key` is currently held
    #[must_use]
    pub fn is_locked(&self, key: InodeKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    fn unlock(&self, key: InodeKey) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&key);
        drop(held);
        self.released.notify_all();
    }
}

impl KeyGuard<'_> {
    #[must_use]
    pub fn key(&self) -> InodeKey {
        self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.unlock(self.key);
    }
}

/// Lock order and trap for a rename between two parents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPlan {
    /// Parents in acquisition order (one entry when both are the same)
    pub order: Vec<InodeKey>,
    /// Child of the ancestor parent on the path to the other parent
    pub trap: Option<InodeKey>,
}

/// Compute the lock order for a rename from two ancestry chains
///
/// Each chain starts with the parent itself and ends at the share root.
/// When one parent is an ancestor of the other it is locked first and the
/// trap is its child on the way down to the other parent: renaming the trap
/// would move a directory into its own subtree, and replacing it would
/// remove a non-empty ancestor. Unrelated parents are locked in key order.
#[must_use]
pub fn plan_rename(old_chain: &[InodeKey], new_chain: &[InodeKey]) -> LockPlan {
    let (Some(&old), Some(&new)) = (old_chain.first(), new_chain.first()) else {
        return LockPlan {
            order: Vec::new(),
            trap: None,
        };
    };
    if old == new {
        return LockPlan {
            order: vec![old],
            trap: None,
        };
    }
    if let Some(i) = new_chain.iter().position(|k| *k == old) {
        return LockPlan {
            order: vec![old, new],
            trap: i.checked_sub(1).map(|j| new_chain[j]),
        };
    }
    if let Some(i) = old_chain.iter().position(|k| *k == new) {
        return LockPlan {
            order: vec![new, old],
            trap: i.checked_sub(1).map(|j| old_chain[j]),
        };
    }
    LockPlan {
        order: vec![old.min(new), old.max(new)],
        trap: None,
    }
}

/// Keys from `dir` up to and including `root`, walking `..`
///
/// # Errors
///
/// Returns the errno of a failed `openat`, or `ELOOP` if the walk exceeds
/// the depth limit without reaching `root`.
pub fn ancestry(dir: &DirFd, root: InodeKey) -> nix::Result<Vec<InodeKey>> {
    let mut chain = vec![dir.key()];
    if dir.key() == root {
        return Ok(chain);
    }
    let mut current = dir.open_parent()?;
    loop {
        let key = current.key();
        chain.push(key);
        if key == root {
            return Ok(chain);
        }
        if chain.len() > MAX_ANCESTRY_DEPTH {
            return Err(nix::errno::Errno::ELOOP);
        }
        let parent = current.open_parent()?;
        if parent.key() == key {
            // Reached the filesystem root without meeting the share root
            return Err(nix::errno::Errno::EXDEV);
        }
        current = parent;
    }
}

/// Directory locks shared by every namespace operation of a share
#[derive(Debug, Default)]
pub struct NamespaceLocks {
    dirs: KeyedLocks,
    rename: Mutex<()>,
}

/// Both parents of a rename, locked; released in reverse order on drop
#[derive(Debug)]
pub struct RenameLock<'a> {
    guards: Vec<KeyGuard<'a>>,
    trap: Option<InodeKey>,
    _serial: Option<MutexGuard<'a, ()>>,
}

impl RenameLock<'_> {
    /// The entry neither the source nor the destination may be
    #[must_use]
    pub fn trap(&self) -> Option<InodeKey> {
        self.trap
    }
}

impl Drop for RenameLock<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl NamespaceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a single directory for a create, unlink or rmdir inside it
    pub fn lock_dir(&self, key: InodeKey) -> KeyGuard<'_> {
        self.dirs.lock(key)
    }

    #[must_use]
    pub fn is_locked(&self, key: InodeKey) -> bool {
        self.dirs.is_locked(key)
    }

    /// Lock both parents of a rename
    ///
    /// Same-directory renames take one lock. Otherwise renames are
    /// serialized first, so the tree shape used to order the two locks
    /// cannot change underneath.
    ///
    /// # Errors
    ///
    /// Returns the errno of a failed ancestry walk.
    pub fn lock_rename(
        &self,
        old_parent: &DirFd,
        new_parent: &DirFd,
        root: InodeKey,
    ) -> nix::Result<RenameLock<'_>> {
        if old_parent.key() == new_parent.key() {
            return Ok(RenameLock {
                guards: vec![self.dirs.lock(old_parent.key())],
                trap: None,
                _serial: None,
            });
        }

        let serial = self.rename.lock().unwrap_or_else(PoisonError::into_inner);
        let plan = plan_rename(&ancestry(old_parent, root)?, &ancestry(new_parent, root)?);
        tracing::trace!(order = ?plan.order, trap = ?plan.trap, "rename lock plan");
        let guards = plan.order.iter().map(|key| self.dirs.lock(*key)).collect();
        Ok(RenameLock {
            guards,
            trap: plan.trap,
            _serial: Some(serial),
        })
    }
}
