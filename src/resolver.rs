//! Share-confined path resolution
//!
//! Paths are walked one component at a time from the share root with
//! `O_NOFOLLOW` directory opens, so the kernel never resolves more than a
//! single name on our behalf. `..` is handled against the walked stack and
//! cannot climb above the root; symlinks met along the way are read and
//! spliced into the remaining components, with absolute targets re-rooted
//! at the share root.
//!
//! The result is a [`PathResolution`]: the parent directory, the final name
//! and the target's metadata if it exists. With a create intent the parent
//! is locked before the final lookup and stays locked until the resolution
//! is dropped.

use crate::dirlock::KeyGuard;
use crate::error::{report, ErrnoContext, OpContext, Result, VfsError};
use crate::vfs::Vfs;
use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};
use vfs_syscalls::{DirFd, FileMetadata};

/// Longest single name the layer accepts
pub const NAME_MAX: usize = 255;

/// How the final component should be resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupIntent {
    /// The target must be a directory
    pub want_directory: bool,
    /// Only the parent is needed; the final name is not looked up
    pub parent_only: bool,
    /// Dereference a final symlink
    pub follow_symlink: bool,
    /// The caller is about to create the final name
    pub create: bool,
}

impl LookupIntent {
    /// An existing entry, final symlink not followed
    #[must_use]
    pub const fn entry() -> Self {
        Self {
            want_directory: false,
            parent_only: false,
            follow_symlink: false,
            create: false,
        }
    }

    #[must_use]
    pub const fn directory() -> Self {
        Self {
            want_directory: true,
            ..Self::entry()
        }
    }

    #[must_use]
    pub const fn parent() -> Self {
        Self {
            parent_only: true,
            ..Self::entry()
        }
    }

    /// A name that must not exist yet; locks the parent
    #[must_use]
    pub const fn create() -> Self {
        Self {
            create: true,
            ..Self::entry()
        }
    }

    #[must_use]
    pub const fn follow(mut self) -> Self {
        self.follow_symlink = true;
        self
    }
}

/// A resolved name inside the share
///
/// Dropping it releases the parent lock (if any) and then the parent descriptor.
#[derive(Debug)]
pub struct PathResolution<'a> {
    permit: Option<KeyGuard<'a>>,
    parent: DirFd,
    name: OsString,
    target: Option<FileMetadata>,
    path: PathBuf,
}

impl PathResolution<'_> {
    #[must_use]
    pub fn parent(&self) -> &DirFd {
        &self.parent
    }

    /// Final component, `"."` for the share root itself
    #[must_use]
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    #[must_use]
    pub fn target(&self) -> Option<&FileMetadata> {
        self.target.as_ref()
    }

    /// Normalized share-relative path of the entry
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Device the parent lives on
    #[must_use]
    pub fn volume(&self) -> u64 {
        self.parent.key().dev
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.name.as_bytes() == b"."
    }

    /// Whether the parent is locked for creation
    #[must_use]
    pub fn holds_permit(&self) -> bool {
        self.permit.is_some()
    }
}

enum Part {
    Up,
    Name(OsString),
}

fn split(path: &Path) -> (VecDeque<Part>, bool) {
    let trailing_slash = path.as_os_str().as_bytes().ends_with(b"/");
    let parts = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(Part::Name(name.to_os_string())),
            Component::ParentDir => Some(Part::Up),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect();
    (parts, trailing_slash)
}

struct Walk {
    dirs: Vec<DirFd>,
    names: Vec<OsString>,
    queue: VecDeque<Part>,
    links: usize,
}

impl Vfs {
    /// Resolve `path` relative to the share root
    ///
    /// A trailing slash implies `want_directory`.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` when `..` would leave the share
    /// - `NameTooLong` for a component over 255 bytes
    /// - `NotADirectory` when an intermediate component is not a directory
    /// - `SymlinkLoop` past the configured symlink limit
    /// - `NotFound` when the target is missing (unless creating)
    /// - `AlreadyExists` when creating over an existing name
    pub fn resolve(&self, path: &Path, intent: LookupIntent) -> Result<PathResolution<'_>> {
        self.resolve_inner(path, intent).map_err(report)
    }

    fn resolve_inner(&self, path: &Path, mut intent: LookupIntent) -> Result<PathResolution<'_>> {
        let ctx = || OpContext::path("resolve", path);
        let (queue, trailing_slash) = split(path);
        intent.want_directory |= trailing_slash;

        let mut walk = Walk {
            dirs: vec![self.root.try_clone().or_ctx(ctx)?],
            names: Vec::new(),
            queue,
            links: 0,
        };

        loop {
            let name = self.walk_to_last(&mut walk, &ctx)?;
            let Some(name) = name else {
                // Path named an already-walked directory (root, "a/..", ...)
                return self.finish_at_directory(walk, intent, &ctx);
            };
            let Some(parent) = walk.dirs.pop() else {
                return Err(VfsError::InvalidArgument { ctx: ctx() });
            };

            let permit = intent.create.then(|| self.namespace.lock_dir(parent.key()));
            if intent.parent_only {
                let path = joined(&walk.names, &name);
                return Ok(PathResolution {
                    permit,
                    parent,
                    name,
                    target: None,
                    path,
                });
            }

            let target = parent.lookup(&name).or_ctx(ctx)?;
            match target {
                Some(meta) if meta.is_symlink() && intent.follow_symlink && !intent.create => {
                    drop(permit);
                    let link = parent.readlink_at(&name).or_ctx(ctx)?;
                    walk.dirs.push(parent);
                    self.splice_symlink(&mut walk, link, &ctx)?;
                }
                Some(_) if intent.create => {
                    return Err(VfsError::AlreadyExists { ctx: ctx() });
                }
                Some(meta) if intent.want_directory && !meta.is_dir() => {
                    return Err(VfsError::NotADirectory { ctx: ctx() });
                }
                None if !intent.create => {
                    return Err(VfsError::NotFound { ctx: ctx() });
                }
                target => {
                    let path = joined(&walk.names, &name);
                    return Ok(PathResolution {
                        permit,
                        parent,
                        name,
                        target,
                        path,
                    });
                }
            }
        }
    }

    /// Walk every component but the last; `None` when nothing is left to look up
    fn walk_to_last(
        &self,
        walk: &mut Walk,
        ctx: &impl Fn() -> OpContext,
    ) -> Result<Option<OsString>> {
        while let Some(part) = walk.queue.pop_front() {
            let name = match part {
                Part::Up => {
                    if walk.names.pop().is_none() {
                        return Err(VfsError::PermissionDenied { ctx: ctx() });
                    }
                    walk.dirs.pop();
                    continue;
                }
                Part::Name(name) => name,
            };
            if name.len() > NAME_MAX {
                return Err(VfsError::NameTooLong { ctx: ctx() });
            }
            if walk.queue.is_empty() {
                return Ok(Some(name));
            }

            let Some(current) = walk.dirs.last() else {
                return Err(VfsError::InvalidArgument { ctx: ctx() });
            };
            let meta = current.stat_at(&name, false).or_ctx(ctx)?;
            if meta.is_symlink() {
                let link = current.readlink_at(&name).or_ctx(ctx)?;
                self.splice_symlink(walk, link, ctx)?;
                continue;
            }
            if !meta.is_dir() {
                return Err(VfsError::NotADirectory { ctx: ctx() });
            }
            let child = current.open_child(&name).or_ctx(ctx)?;
            walk.dirs.push(child);
            walk.names.push(name);
        }
        Ok(None)
    }

    /// Replace a symlink component by its target's components
    fn splice_symlink(
        &self,
        walk: &mut Walk,
        link: OsString,
        ctx: &impl Fn() -> OpContext,
    ) -> Result<()> {
        walk.links += 1;
        if walk.links > self.config.max_symlink_depth {
            return Err(VfsError::SymlinkLoop { ctx: ctx() });
        }
        let target = PathBuf::from(link);
        if target.is_absolute() {
            walk.dirs.truncate(1);
            walk.names.clear();
        }
        let (parts, _) = split(&target);
        for part in parts.into_iter().rev() {
            walk.queue.push_front(part);
        }
        Ok(())
    }

    /// Turn a walk that ended on a directory into a parent/name resolution
    fn finish_at_directory(
        &self,
        mut walk: Walk,
        intent: LookupIntent,
        ctx: &impl Fn() -> OpContext,
    ) -> Result<PathResolution<'_>> {
        if intent.create {
            return Err(VfsError::AlreadyExists { ctx: ctx() });
        }
        let (parent, name) = match walk.names.pop() {
            Some(name) => {
                walk.dirs.pop();
                let parent = walk
                    .dirs
                    .pop()
                    .ok_or_else(|| VfsError::InvalidArgument { ctx: ctx() })?;
                (parent, name)
            }
            None => {
                if intent.parent_only {
                    return Err(VfsError::InvalidArgument { ctx: ctx() });
                }
                let root = walk
                    .dirs
                    .pop()
                    .ok_or_else(|| VfsError::InvalidArgument { ctx: ctx() })?;
                (root, OsString::from("."))
            }
        };
        let target = if intent.parent_only {
            None
        } else {
            Some(parent.stat_at(&name, false).or_ctx(ctx)?)
        };
        let path = joined(&walk.names, &name);
        Ok(PathResolution {
            permit: None,
            parent,
            name,
            target,
            path,
        })
    }
}

fn joined(names: &[OsString], last: &OsStr) -> PathBuf {
    let mut path: PathBuf = names.iter().collect();
    if last.as_bytes() != b"." {
        path.push(last);
    }
    path
}
