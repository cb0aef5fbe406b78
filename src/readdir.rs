//! Lazy, resumable directory listings
//!
//! [`DirEntries`] reads one entry at a time from its own directory stream.
//! Each record carries the position after it; passing that position to a
//! later [`Vfs::read_dir`] continues the listing from there.

use crate::entry::Target;
use crate::error::{report, ErrnoContext, OpContext, Result, VfsError};
use crate::resolver::LookupIntent;
use crate::vfs::Vfs;
use nix::errno::Errno;
use std::ffi::OsString;
use std::os::unix::io::AsRawFd;
use vfs_syscalls::{io, metadata, DirStream, FileMetadata, FileType, RawDirEntry};

/// Where a listing continues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResumePosition(i64);

impl ResumePosition {
    /// The beginning of the directory
    pub const START: Self = Self(0);

    #[must_use]
    pub const fn cookie(self) -> i64 {
        self.0
    }
}

/// One listed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryRecord {
    pub name: OsString,
    pub file_type: FileType,
    pub ino: u64,
    /// `None` when the entry disappeared before it could be stat'ed
    pub metadata: Option<FileMetadata>,
    /// Position after this entry
    pub resume: ResumePosition,
}

/// Iterator over a directory's entries
#[derive(Debug)]
pub struct DirEntries {
    stream: DirStream,
    include_dots: bool,
    ctx: OpContext,
}

impl DirEntries {
    /// Also yield `.` and `..`
    #[must_use]
    pub fn include_dots(mut self, include: bool) -> Self {
        self.include_dots = include;
        self
    }

    /// Position of the next entry to be read
    #[must_use]
    pub fn position(&self) -> ResumePosition {
        ResumePosition(self.stream.tell())
    }

    fn record(&self, raw: RawDirEntry) -> Result<DirEntryRecord> {
        let metadata = match metadata::fstatat(self.stream.fd(), &raw.name, false) {
            Ok(meta) => Some(meta),
            Err(Errno::ENOENT) => None,
            Err(errno) => return Err(VfsError::from_errno(self.ctx.clone(), errno)),
        };
        let file_type = match (&metadata, raw.file_type) {
            (Some(meta), FileType::Unknown) => meta.file_type(),
            (_, file_type) => file_type,
        };
        Ok(DirEntryRecord {
            name: raw.name,
            file_type,
            ino: raw.ino,
            metadata,
            resume: ResumePosition(raw.next_cookie),
        })
    }
}

impl Iterator for DirEntries {
    type Item = Result<DirEntryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.stream.next_entry()? {
                Ok(raw) => raw,
                Err(errno) => return Some(Err(report(VfsError::from_errno(self.ctx.clone(), errno)))),
            };
            if !self.include_dots && (raw.name == "." || raw.name == "..") {
                continue;
            }
            return Some(self.record(raw).map_err(report));
        }
    }
}

impl Vfs {
    /// List a directory by path or open handle, optionally resuming
    ///
    /// # Errors
    ///
    /// `NotADirectory` when the target is not a directory, resolution errors
    /// for paths.
    pub fn read_dir(
        &self,
        target: Target<'_>,
        resume: Option<ResumePosition>,
    ) -> Result<DirEntries> {
        let ctx = || target.context("readdir");
        let fd = match target {
            Target::Handle(id) => {
                let file = self.file(id, "readdir")?;
                io::reopen(file.as_raw_fd(), libc::O_RDONLY | libc::O_DIRECTORY)
            }
            Target::Path(path) => {
                let res = self.resolve(path, LookupIntent::directory())?;
                res.parent().open_at(
                    res.name(),
                    libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW,
                    0,
                )
            }
        }
        .or_ctx(ctx)
        .map_err(report)?;

        let mut stream = DirStream::from_fd(fd).or_ctx(ctx).map_err(report)?;
        if let Some(position) = resume.filter(|p| *p != ResumePosition::START) {
            stream.seek(position.cookie());
        }
        Ok(DirEntries {
            stream,
            include_dots: false,
            ctx: ctx(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::collections::BTreeSet;
    use std::path::Path;
    use tempfile::TempDir;

    fn share() -> (TempDir, Vfs) {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("d")).unwrap();
        for name in ["a", "b", "c", "e"] {
            std::fs::write(temp.path().join("d").join(name), name).unwrap();
        }
        std::fs::create_dir(temp.path().join("d/sub")).unwrap();
        let vfs = Vfs::builder(temp.path()).build().unwrap();
        (temp, vfs)
    }

    #[test]
    fn test_lists_with_metadata() {
        let (_t, vfs) = share();
        let records: Vec<_> = vfs
            .read_dir(Target::Path(Path::new("d")), None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 5);
        let sub = records.iter().find(|r| r.name == "sub").unwrap();
        assert_eq!(sub.file_type, FileType::Directory);
        let a = records.iter().find(|r| r.name == "a").unwrap();
        assert_eq!(a.metadata.as_ref().unwrap().size, 1);
    }

    #[test]
    fn test_dots_only_on_request() {
        let (_t, vfs) = share();
        let names: BTreeSet<OsString> = vfs
            .read_dir(Target::Path(Path::new("d")), None)
            .unwrap()
            .include_dots(true)
            .map(|r| r.unwrap().name)
            .collect();
        assert!(names.contains(&OsString::from(".")));
        assert!(names.contains(&OsString::from("..")));
    }

    #[test]
    fn test_resume_continues_without_repeats() {
        let (_t, vfs) = share();
        let mut first = vfs.read_dir(Target::Path(Path::new("d")), None).unwrap();
        let head: Vec<_> = first.by_ref().take(2).map(|r| r.unwrap()).collect();
        let resume = head.last().unwrap().resume;
        drop(first);

        let tail: Vec<_> = vfs
            .read_dir(Target::Path(Path::new("d")), Some(resume))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let all: BTreeSet<_> = head.iter().chain(&tail).map(|r| r.name.clone()).collect();
        assert_eq!(head.len() + tail.len(), 5);
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_not_a_directory() {
        let (_t, vfs) = share();
        assert!(matches!(
            vfs.read_dir(Target::Path(Path::new("d/a")), None),
            Err(VfsError::NotADirectory { .. })
        ));
    }
}
