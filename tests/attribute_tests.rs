//! Entry types, attribute sanitizing and extended attributes on real files

use rstest::rstest;
use smb_vfs::{Access, AttrChange, Target, VfsError, XattrSetMode};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

mod common;
use common::{share, test_timeout_guard, xattrs_supported};

fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

#[rstest]
#[case::none(0)]
#[case::directory(libc::S_IFDIR)]
#[case::symlink(libc::S_IFLNK)]
#[case::fifo(libc::S_IFIFO)]
#[case::socket(libc::S_IFSOCK)]
#[case::block(libc::S_IFBLK)]
#[case::all_type_bits(libc::S_IFMT)]
fn test_stray_type_bits_never_leak(#[case] type_bits: u32) {
    let s = share();
    s.vfs.create(Path::new("file"), type_bits | 0o640).unwrap();
    s.vfs.mkdir(Path::new("dir"), type_bits | 0o750).unwrap();

    let file = std::fs::symlink_metadata(s.path("file")).unwrap();
    let dir = std::fs::symlink_metadata(s.path("dir")).unwrap();
    assert!(file.file_type().is_file());
    assert!(dir.file_type().is_dir());
    assert_eq!(file.permissions().mode() & 0o7777, 0o640);
    assert_eq!(dir.permissions().mode() & 0o7777, 0o750);
}

#[rstest]
#[case::setuid_only(0o4755, 0o0755)]
#[case::setgid_group_exec(0o6750, 0o0750)]
#[case::setgid_without_group_exec(0o6740, 0o2740)]
fn test_chown_revokes_set_id_bits(#[case] before: u32, #[case] after: u32) {
    if !running_as_root() {
        eprintln!("skipping: changing owners needs root");
        return;
    }
    let s = share();
    s.vfs.create(Path::new("f"), before).unwrap();
    assert_eq!(
        std::fs::metadata(s.path("f")).unwrap().permissions().mode() & 0o7777,
        before
    );

    s.vfs
        .set_attributes(Target::Path(Path::new("f")), AttrChange::default().owner(4242))
        .unwrap();
    let meta = std::fs::metadata(s.path("f")).unwrap();
    assert_eq!(meta.uid(), 4242);
    assert_eq!(meta.permissions().mode() & 0o7777, after);
}

#[test]
fn test_chown_keeps_directory_set_id_bits() {
    if !running_as_root() {
        eprintln!("skipping: changing owners needs root");
        return;
    }
    let s = share();
    s.vfs.mkdir(Path::new("d"), 0o2775).unwrap();
    s.vfs
        .set_attributes(Target::Path(Path::new("d")), AttrChange::default().group(4242))
        .unwrap();
    let meta = std::fs::metadata(s.path("d")).unwrap();
    assert_eq!(meta.gid(), 4242);
    assert_eq!(meta.permissions().mode() & 0o7777, 0o2775);
}

#[compio::test]
async fn test_xattr_exact_buffer_by_handle() {
    let s = share();
    if !xattrs_supported(s.dir.path()) {
        eprintln!("skipping: extended attributes unsupported here");
        return;
    }
    s.vfs.create(Path::new("f"), 0o644).unwrap();
    let id = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::ReadWrite).await.unwrap());
    let value = vec![0xA5u8; 300];
    s.vfs
        .set_xattr(Target::Handle(id), "user.blob", &value, XattrSetMode::Any)
        .unwrap();

    let read = s.vfs.get_xattr(Target::Handle(id), "user.blob", 300).unwrap();
    assert_eq!(read, value);
    assert!(matches!(
        s.vfs.get_xattr(Target::Handle(id), "user.blob", 299),
        Err(VfsError::InsufficientBuffer { .. })
    ));
    assert_eq!(
        xattr::get(s.path("f"), "user.blob").unwrap(),
        Some(value.clone())
    );

    s.vfs.remove_xattr(Target::Path(Path::new("f")), "user.blob").unwrap();
    assert!(matches!(
        s.vfs.remove_xattr(Target::Handle(id), "user.blob"),
        Err(VfsError::NotFound { .. })
    ));
}

#[test]
fn test_xattr_on_symlink_targets_the_link() {
    let s = share();
    if !xattrs_supported(s.dir.path()) {
        eprintln!("skipping: extended attributes unsupported here");
        return;
    }
    s.vfs.create(Path::new("f"), 0o644).unwrap();
    s.vfs.symlink(Path::new("f"), Path::new("s")).unwrap();
    s.vfs
        .set_xattr(Target::Path(Path::new("f")), "user.k", b"v", XattrSetMode::Any)
        .unwrap();
    // The link itself carries no user attributes
    assert!(matches!(
        s.vfs.get_xattr(Target::Path(Path::new("s")), "user.k", 16),
        Err(VfsError::NotFound { .. })
    ));
}

#[compio::test]
async fn test_get_attributes_matches_fs() {
    let s = share();
    std::fs::write(s.path("f"), b"12345").unwrap();
    let id = s
        .handles
        .insert(s.vfs.open(Path::new("f"), Access::Read).await.unwrap());
    let meta = s.vfs.get_attributes(id).unwrap();
    let fs_meta = std::fs::metadata(s.path("f")).unwrap();
    assert_eq!(meta.size, 5);
    assert_eq!(meta.ino, fs_meta.ino());
    assert_eq!(meta.mode, fs_meta.mode());
    assert!(meta.is_file());
}

#[test]
fn test_set_times_by_path() {
    let s = share();
    std::fs::write(s.path("f"), b"x").unwrap();
    let atime = filetime::FileTime::from_unix_time(1_000, 0);
    let mtime = filetime::FileTime::from_unix_time(2_000_000, 500);
    let change = AttrChange::default().times(
        Some(std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_000)),
        Some(std::time::UNIX_EPOCH + std::time::Duration::new(2_000_000, 500)),
    );
    s.vfs.set_attributes(Target::Path(Path::new("f")), change).unwrap();

    let meta = std::fs::metadata(s.path("f")).unwrap();
    assert_eq!(filetime::FileTime::from_last_access_time(&meta), atime);
    assert_eq!(filetime::FileTime::from_last_modification_time(&meta), mtime);
}

#[test]
fn test_fifo_attributes_without_reader() {
    let _timeout = test_timeout_guard(std::time::Duration::from_secs(10));
    let s = share();
    nix::unistd::mkfifo(&s.path("pipe"), nix::sys::stat::Mode::from_bits_truncate(0o644))
        .unwrap();
    let pipe = Target::Path(Path::new("pipe"));

    s.vfs
        .set_attributes(pipe, AttrChange::default().mode(0o600))
        .unwrap();
    let when = std::time::UNIX_EPOCH + std::time::Duration::from_secs(5_000);
    s.vfs
        .set_attributes(pipe, AttrChange::default().times(None, Some(when)))
        .unwrap();

    let meta = std::fs::symlink_metadata(s.path("pipe")).unwrap();
    assert_eq!(meta.permissions().mode() & 0o7777, 0o600);
    assert_eq!(meta.mtime(), 5_000);

    assert!(matches!(
        s.vfs.truncate(pipe, 0),
        Err(VfsError::InvalidArgument { .. })
    ));
    assert!(matches!(
        s.vfs.set_attributes(pipe, AttrChange::default().size(0)),
        Err(VfsError::InvalidArgument { .. })
    ));
}
