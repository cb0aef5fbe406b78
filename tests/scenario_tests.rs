//! End-to-end scenarios through the public API
//!
//! Each test builds a temporary share and drives the layer the way a
//! protocol engine would: open, register the handle, then operate by id.

use smb_vfs::{
    Access, AccessIntent, LockKind, RangeCheck, RenameSource, Target, VfsConfig, VfsError,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use walkdir::WalkDir;

mod common;
use common::share;

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(Result::unwrap)
        .map(|entry| {
            let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let data = if entry.file_type().is_file() {
                std::fs::read(entry.path()).unwrap()
            } else {
                Vec::new()
            };
            (rel, data)
        })
        .collect()
}

#[compio::test]
async fn test_create_write_read_rename_read() {
    let s = share();
    s.vfs.mkdir(Path::new("/a"), 0o755).unwrap();
    s.vfs.create(Path::new("/a/f"), 0o644).unwrap();

    let id = s
        .handles
        .insert(s.vfs.open(Path::new("/a/f"), Access::ReadWrite).await.unwrap());
    let payload: Vec<u8> = (0..100u8).collect();
    assert_eq!(s.vfs.write(id, &payload, 0, true).await.unwrap(), 100);
    assert_eq!(s.vfs.read(id, 100, 0).await.unwrap(), payload);

    s.vfs
        .rename(RenameSource::Path(Path::new("/a/f")), Path::new("/a/g"))
        .unwrap();
    assert!(!s.path("a/f").exists());
    assert_eq!(s.vfs.read(id, 100, 0).await.unwrap(), payload);
    assert_eq!(std::fs::read(s.path("a/g")).unwrap(), payload);

    let stats = s.vfs.stats().snapshot();
    assert_eq!(stats.bytes_written, 100);
    assert_eq!(stats.bytes_read, 200);
}

#[compio::test]
async fn test_rename_by_handle_tracks_new_name() {
    let s = share();
    s.vfs.create(Path::new("f"), 0o644).unwrap();
    let file = s.vfs.open(Path::new("f"), Access::Read).await.unwrap();
    let id = s.handles.insert(file.clone());

    s.vfs.mkdir(Path::new("d"), 0o755).unwrap();
    s.vfs
        .rename(RenameSource::Handle(id), Path::new("d/moved"))
        .unwrap();
    assert_eq!(file.path(), Path::new("d/moved"));

    // A second rename by handle starts from the recorded name
    s.vfs
        .rename(RenameSource::Handle(id), Path::new("back"))
        .unwrap();
    assert!(s.path("back").is_file());
}

#[compio::test]
async fn test_rename_by_handle_after_name_reused() {
    let s = share();
    s.vfs.create(Path::new("f"), 0o644).unwrap();
    let id = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::Read).await.unwrap());
    std::fs::rename(s.path("f"), s.path("elsewhere")).unwrap();
    std::fs::write(s.path("f"), b"impostor").unwrap();

    assert!(matches!(
        s.vfs.rename(RenameSource::Handle(id), Path::new("g")),
        Err(VfsError::NotFound { .. })
    ));
    assert_eq!(std::fs::read(s.path("f")).unwrap(), b"impostor");
}

#[test]
fn test_rmdir_non_empty_is_distinct_and_harmless() {
    let s = share();
    s.vfs.mkdir(Path::new("d"), 0o755).unwrap();
    s.vfs.mkdir(Path::new("d/inner"), 0o700).unwrap();
    std::fs::write(s.path("d/inner/file"), b"keep me").unwrap();
    let before = snapshot(s.dir.path());

    let err = s.vfs.rmdir(Path::new("d")).unwrap_err();
    assert!(matches!(err, VfsError::NotEmpty { .. }), "got {err:?}");
    assert!(err.is_expected());
    assert_eq!(err.errno(), Some(libc::ENOTEMPTY));
    assert_eq!(snapshot(s.dir.path()), before);
}

#[compio::test]
async fn test_overlapping_lock_blocks_second_writer() {
    let s = share();
    std::fs::write(s.path("f"), vec![b'.'; 20]).unwrap();
    let first = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
    let second = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());

    s.vfs.lock(first, 5, 14, LockKind::Exclusive).unwrap();
    assert_eq!(
        s.vfs.check_range(second, 0, 9, AccessIntent::Write).unwrap(),
        RangeCheck::WouldBlock
    );
    assert!(matches!(
        s.vfs.write(second, &[b'x'; 10], 0, false).await,
        Err(VfsError::WouldBlock { .. })
    ));
    assert_eq!(std::fs::read(s.path("f")).unwrap(), vec![b'.'; 20]);
    assert_eq!(s.breaker.breaks.load(Ordering::SeqCst), 0);

    // The holder writes freely, and the range clears once released
    s.vfs.write(first, b"LOCK", 5, false).await.unwrap();
    assert_eq!(s.vfs.release_locks(first).unwrap(), 1);
    assert_eq!(s.vfs.write(second, b"0123456789", 0, false).await.unwrap(), 10);
}

#[compio::test]
async fn test_zero_length_read_touches_nothing() {
    let s = share();
    assert!(s.vfs.read(424_242, 0, 0).await.unwrap().is_empty());
    let stats = s.vfs.stats().snapshot();
    assert_eq!(stats.lock_checks, 0);
    assert_eq!(stats.bytes_read, 0);
}

#[compio::test]
async fn test_writes_break_oplocks_under_the_gate() {
    let s = share();
    s.vfs.create(Path::new("f"), 0o644).unwrap();
    let id = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
    for i in 0..5u64 {
        s.vfs.write(id, b"ab", i * 2, false).await.unwrap();
    }
    s.vfs.truncate(Target::Handle(id), 4).unwrap();

    assert_eq!(s.breaker.breaks.load(Ordering::SeqCst), 6);
    assert_eq!(s.breaker.outside_gate.load(Ordering::SeqCst), 0);
    assert!(!s.vfs.gate().is_held());
    assert_eq!(s.vfs.stats().snapshot().oplock_breaks, 6);
}

#[compio::test]
async fn test_disabled_oplocks_fall_back_to_range_checks() {
    let s = common::share_with(VfsConfig {
        disable_oplocks: true,
        ..VfsConfig::default()
    });
    std::fs::write(s.path("f"), vec![0u8; 10]).unwrap();
    let holder = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
    let other = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
    s.vfs.lock(holder, 8, 9, LockKind::Shared).unwrap();

    assert!(matches!(
        s.vfs.truncate(Target::Handle(other), 4),
        Err(VfsError::WouldBlock { .. })
    ));
    s.vfs.truncate(Target::Handle(other), 20).unwrap();
    s.vfs.write(other, b"x", 0, false).await.unwrap();
    assert_eq!(s.breaker.breaks.load(Ordering::SeqCst), 0);
}

#[compio::test]
async fn test_fsync_allocate_and_hints() {
    let s = share();
    s.vfs.create(Path::new("f"), 0o644).unwrap();
    let id = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
    s.vfs.write(id, b"data", 0, false).await.unwrap();
    s.vfs.fsync(id).await.unwrap();

    match s.vfs.allocate(id, 1 << 20) {
        Ok(()) => assert_eq!(s.vfs.get_attributes(id).unwrap().size, 4),
        // tmpfs and some overlay setups refuse fallocate
        Err(VfsError::StorageFault { .. }) => {}
        Err(e) => panic!("unexpected allocate error: {e}"),
    }

    s.vfs
        .set_io_hints(
            id,
            smb_vfs::CreateOptions {
                write_through: true,
                ..Default::default()
            },
        )
        .unwrap();
    s.vfs.write(id, b"more", 4, false).await.unwrap();
    assert_eq!(std::fs::read(s.path("f")).unwrap(), b"datamore");
}

#[test]
fn test_unknown_handle_everywhere() {
    let s = share();
    assert!(matches!(
        s.vfs.get_attributes(7),
        Err(VfsError::NotFound { .. })
    ));
    assert!(matches!(
        s.vfs.truncate(Target::Handle(7), 0),
        Err(VfsError::NotFound { .. })
    ));
    assert!(matches!(
        s.vfs.lock(7, 0, 1, LockKind::Shared),
        Err(VfsError::NotFound { .. })
    ));
}

#[test]
fn test_link_across_filesystems_is_refused() {
    use std::os::unix::fs::MetadataExt;

    let shm = Path::new("/dev/shm");
    if !shm.is_dir() {
        eprintln!("skipping: /dev/shm is not available");
        return;
    }
    let src_dir = tempfile::TempDir::new().unwrap();
    let dst_dir = tempfile::TempDir::new_in(shm).unwrap();
    let src_root = src_dir.path().canonicalize().unwrap();
    let dst_root = dst_dir.path().canonicalize().unwrap();
    let src_dev = std::fs::metadata(&src_root).unwrap().dev();
    let dst_dev = std::fs::metadata(&dst_root).unwrap().dev();
    if src_dev == dst_dev {
        eprintln!("skipping: temp dir and /dev/shm share a filesystem");
        return;
    }
    std::fs::write(src_root.join("f"), b"data").unwrap();

    let vfs = smb_vfs::Vfs::builder("/").build().unwrap();
    let existing = src_root.join("f");
    let new_path = dst_root.join("f");
    let err = vfs
        .link(
            existing.strip_prefix("/").unwrap(),
            new_path.strip_prefix("/").unwrap(),
        )
        .unwrap_err();

    assert!(matches!(err, VfsError::CrossVolumeNotSupported { .. }));
    assert!(!new_path.exists());
    assert_eq!(std::fs::metadata(&existing).unwrap().nlink(), 1);
}
