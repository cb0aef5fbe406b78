//! Oplock break coordination
//!
//! Before a write, clients caching reads of the file must be told to drop
//! their cache. The break protocol itself lives in the protocol engine
//! behind [`OplockBreaker`]; the layer only guarantees that every
//! break-then-write sequence runs under one [`BreakGate`].

use crate::handle::FileRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Downgrades read-caching leases held by other clients
pub trait OplockBreaker: Send + Sync {
    /// Break read caching on `file`; returns once every lease holder acknowledged
    fn break_read_caching(&self, file: &FileRef);
}

/// Breaker for servers that never grant oplocks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBreaker;

impl OplockBreaker for NoopBreaker {
    fn break_read_caching(&self, _file: &FileRef) {}
}

/// The global write-serialization lock
#[derive(Debug)]
pub struct BreakGate {
    name: &'static str,
    lock: Mutex<()>,
    held: AtomicBool,
}

impl Default for BreakGate {
    fn default() -> Self {
        Self::new("open-file-list")
    }
}

struct HeldFlag<'a>(&'a AtomicBool);

impl Drop for HeldFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BreakGate {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            lock: Mutex::new(()),
            held: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether some thread is inside [`BreakGate::run`]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Run `f` while holding the gate
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.held.store(true, Ordering::Release);
        let _held = HeldFlag(&self.held);
        f()
    }
}
