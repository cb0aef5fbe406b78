//! Operation counters for the mediation layer
//!
//! Lock-free atomic counters shared by every operation on a `Vfs`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics tracking with interior mutability via atomics
///
/// Atomic operations use `Ordering::Relaxed`; counters are only read for
/// reporting, never for synchronization.
#[derive(Debug, Default)]
pub struct VfsStats {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    lock_checks: AtomicU64,
    lock_conflicts: AtomicU64,
    oplock_breaks: AtomicU64,
    failed_flushes: AtomicU64,
}

/// Point-in-time copy of [`VfsStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Times the mandatory lock enforcer was consulted
    pub lock_checks: u64,
    /// Enforcer answers of `WouldBlock`
    pub lock_conflicts: u64,
    pub oplock_breaks: u64,
    /// Range or metadata flushes that failed after the main operation succeeded
    pub failed_flushes: u64,
}

impl VfsStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_lock_checks(&self) {
        self.lock_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lock_conflicts(&self) {
        self.lock_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_oplock_breaks(&self) {
        self.oplock_breaks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed_flushes(&self) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            lock_checks: self.lock_checks.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
            oplock_breaks: self.oplock_breaks.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(VfsStats::new());
        std::thread::scope(|s| {
            for _ in 0..8 {
                let stats = Arc::clone(&stats);
                s.spawn(move || {
                    for _ in 0..1000 {
                        stats.add_bytes_written(2);
                        stats.increment_lock_checks();
                    }
                });
            }
        });
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_written, 16_000);
        assert_eq!(snap.lock_checks, 8000);
        assert_eq!(snap.oplock_breaks, 0);
    }
}
