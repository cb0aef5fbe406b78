use smb_vfs::{FileRef, OpenFiles, OplockBreaker, Vfs, VfsConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::TempDir;

/// Breaker that records every break and whether it ran under the share's gate
#[derive(Default)]
pub struct RecordingBreaker {
    pub breaks: AtomicUsize,
    pub outside_gate: AtomicUsize,
    gate: Mutex<Option<Arc<smb_vfs::BreakGate>>>,
}

impl RecordingBreaker {
    fn watch(&self, gate: Arc<smb_vfs::BreakGate>) {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(gate);
    }
}

impl OplockBreaker for RecordingBreaker {
    fn break_read_caching(&self, _file: &FileRef) {
        self.breaks.fetch_add(1, Ordering::SeqCst);
        let held = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|gate| gate.is_held());
        if !held {
            self.outside_gate.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A temporary share root with its layer, handle table and breaker
#[allow(dead_code)]
pub struct Share {
    pub dir: TempDir,
    pub handles: Arc<OpenFiles>,
    pub breaker: Arc<RecordingBreaker>,
    pub vfs: Vfs,
}

impl Share {
    #[allow(dead_code)]
    pub fn path(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }
}

#[allow(dead_code)]
pub fn share() -> Share {
    share_with(VfsConfig::default())
}

#[allow(dead_code)]
pub fn share_with(config: VfsConfig) -> Share {
    let dir = TempDir::new().unwrap();
    let handles = Arc::new(OpenFiles::new());
    let breaker = Arc::new(RecordingBreaker::default());
    let gate = Arc::new(smb_vfs::BreakGate::new("test-gate"));
    breaker.watch(gate.clone());
    let vfs = Vfs::builder(dir.path())
        .config(config)
        .handles(handles.clone())
        .breaker(breaker.clone())
        .gate(gate)
        .build()
        .unwrap();
    Share {
        dir,
        handles,
        breaker,
        vfs,
    }
}

/// Whether user xattrs work on the filesystem backing `dir`
#[allow(dead_code)]
pub fn xattrs_supported(dir: &std::path::Path) -> bool {
    let marker = dir.join(".xattr-check");
    std::fs::write(&marker, b"").unwrap();
    let ok = xattr::set(&marker, "user.check", b"1").is_ok();
    std::fs::remove_file(&marker).unwrap();
    ok
}

#[allow(dead_code)]
pub struct TestTimeoutGuard {
    cancelled: Arc<AtomicBool>,
}

impl Drop for TestTimeoutGuard {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Abort the test binary if the guard is still alive after `duration`
#[allow(dead_code)]
pub fn test_timeout_guard(duration: Duration) -> TestTimeoutGuard {
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = Arc::clone(&cancelled);
    std::thread::spawn(move || {
        std::thread::sleep(duration);
        if !cancelled_clone.load(Ordering::SeqCst) {
            eprintln!("Test timeout exceeded ({}s). Aborting.", duration.as_secs());
            std::process::abort();
        }
    });
    TestTimeoutGuard { cancelled }
}
