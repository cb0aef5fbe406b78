//! Rename by path or by open handle
//!
//! Both parents are resolved first, then locked through
//! [`NamespaceLocks::lock_rename`](crate::dirlock::NamespaceLocks::lock_rename).
//! The names are looked up again under the locks, since either may have
//! changed after the unlocked resolution, and checked against the trap.

use crate::error::{report, ErrnoContext, OpContext, Result, VfsError};
use crate::handle::{FileRef, HandleId};
use crate::resolver::LookupIntent;
use crate::vfs::Vfs;
use std::path::{Path, PathBuf};

/// What is being renamed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameSource<'p> {
    Path(&'p Path),
    /// An open file; its recorded path follows the rename
    Handle(HandleId),
}

impl Vfs {
    /// Move an entry to `new_path`, replacing a compatible existing entry
    ///
    /// # Errors
    ///
    /// - `NotFound` when the source vanished or a handle's name no longer
    ///   refers to its file
    /// - `InvalidSameEntry` when moving a directory into its own subtree
    /// - `DestinationNotEmpty` when the destination is an ancestor of the source
    /// - `NotEmpty` when replacing a non-empty directory
    /// - `InvalidArgument` when either side is the share root
    pub fn rename(&self, source: RenameSource<'_>, new_path: &Path) -> Result<()> {
        let (old_path, file) = match source {
            RenameSource::Path(path) => (path.to_path_buf(), None),
            RenameSource::Handle(id) => {
                let file = self.file(id, "rename")?;
                (file.path(), Some(file))
            }
        };
        let ctx = || match source {
            RenameSource::Path(path) => OpContext::path("rename", path),
            RenameSource::Handle(id) => OpContext::handle("rename", id),
        };
        self.rename_inner(&old_path, file.as_ref(), new_path, &ctx)
            .map_err(report)
    }

    fn rename_inner(
        &self,
        old_path: &Path,
        file: Option<&FileRef>,
        new_path: &Path,
        ctx: &impl Fn() -> OpContext,
    ) -> Result<()> {
        let old = self.resolve(old_path, LookupIntent::parent())?;
        let new = self.resolve(new_path, LookupIntent::parent())?;
        if old.is_root() || new.is_root() {
            return Err(VfsError::InvalidArgument { ctx: ctx() });
        }

        let lock = self
            .namespace
            .lock_rename(old.parent(), new.parent(), self.root_key())
            .or_ctx(ctx)?;

        let source = old
            .parent()
            .lookup(old.name())
            .or_ctx(ctx)?
            .ok_or_else(|| VfsError::NotFound { ctx: ctx() })?;
        if file.is_some_and(|file| file.key() != source.key()) {
            // The handle's name now belongs to another file
            return Err(VfsError::NotFound { ctx: ctx() });
        }
        let destination = new.parent().lookup(new.name()).or_ctx(ctx)?;

        if let Some(trap) = lock.trap() {
            if source.key() == trap {
                return Err(VfsError::InvalidSameEntry { ctx: ctx() });
            }
            if destination.is_some_and(|meta| meta.key() == trap) {
                return Err(VfsError::DestinationNotEmpty { ctx: ctx() });
            }
        }

        old.parent()
            .rename_at(old.name(), new.parent(), new.name())
            .or_ctx(ctx)?;
        drop(lock);

        let moved: PathBuf = new.path().to_path_buf();
        if let Some(file) = file {
            file.set_path(moved.clone());
        }
        tracing::debug!(from = %old.path().display(), to = %moved.display(), "renamed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tempfile::TempDir;

    fn share() -> (TempDir, Vfs) {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("a/b/c")).unwrap();
        std::fs::create_dir_all(temp.path().join("x")).unwrap();
        std::fs::write(temp.path().join("a/f"), b"data").unwrap();
        let vfs = Vfs::builder(temp.path()).build().unwrap();
        (temp, vfs)
    }

    #[test]
    fn test_rename_within_directory() {
        let (t, vfs) = share();
        vfs.rename(RenameSource::Path(Path::new("a/f")), Path::new("a/g"))
            .unwrap();
        assert!(!t.path().join("a/f").exists());
        assert_eq!(std::fs::read(t.path().join("a/g")).unwrap(), b"data");
    }

    #[test]
    fn test_rename_across_directories() {
        let (t, vfs) = share();
        vfs.rename(RenameSource::Path(Path::new("a/f")), Path::new("x/f"))
            .unwrap();
        assert!(t.path().join("x/f").is_file());
    }

    #[test]
    fn test_rename_into_own_subtree() {
        let (t, vfs) = share();
        let err = vfs
            .rename(RenameSource::Path(Path::new("a")), Path::new("a/b/c/a"))
            .unwrap_err();
        assert!(matches!(err, VfsError::InvalidSameEntry { .. }));
        assert!(t.path().join("a/b/c").is_dir());
    }

    #[test]
    fn test_rename_over_ancestor() {
        let (_t, vfs) = share();
        let err = vfs
            .rename(RenameSource::Path(Path::new("a/b/c")), Path::new("a"))
            .unwrap_err();
        assert!(matches!(err, VfsError::DestinationNotEmpty { .. }));
    }

    #[test]
    fn test_rename_missing_and_root() {
        let (_t, vfs) = share();
        assert!(matches!(
            vfs.rename(RenameSource::Path(Path::new("a/nope")), Path::new("a/g")),
            Err(VfsError::NotFound { .. })
        ));
        assert!(matches!(
            vfs.rename(RenameSource::Path(Path::new("a")), Path::new("/")),
            Err(VfsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_rename_unknown_handle() {
        let (_t, vfs) = share();
        assert!(matches!(
            vfs.rename(RenameSource::Handle(999), Path::new("a/g")),
            Err(VfsError::NotFound { .. })
        ));
    }
}
