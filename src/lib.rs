//! smb-vfs: the filesystem mediation layer of an SMB file server
//!
//! Every request a protocol engine has already parsed and authorized ends
//! up here: path lookups confined to the share root, namespace changes
//! under directory locks, reads and writes gated by mandatory byte-range
//! locks and oplock breaks, attribute and extended-attribute access, and
//! resumable directory listings.
//!
//! The entry point is [`Vfs`], built once per share:
//!
//! ```rust,no_run
//! use smb_vfs::{Access, OpenFiles, Vfs};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> smb_vfs::Result<()> {
//! let handles = Arc::new(OpenFiles::new());
//! let vfs = Vfs::builder("/srv/share").handles(handles.clone()).build()?;
//!
//! vfs.create(Path::new("report.txt"), 0o644)?;
//! let id = handles.insert(vfs.open(Path::new("report.txt"), Access::ReadWrite).await?);
//! vfs.write(id, b"hello", 0, true).await?;
//! # Ok(())
//! # }
//! ```

pub mod attrs;
pub mod cli;
pub mod config;
pub mod data;
pub mod dirlock;
mod enforcer;
mod entry;
pub mod error;
pub mod handle;
pub mod locks;
pub mod namespace;
pub mod oplock;
pub mod readdir;
pub mod rename;
pub mod resolver;
pub mod stats;
pub mod vfs;
pub mod xattr;

pub use attrs::{sanitize, AttrChange, CurrentAttrs};
pub use config::VfsConfig;
pub use entry::Target;
pub use error::{OpContext, Result, VfsError};
pub use handle::{Access, CreateOptions, FileRef, HandleId, HandleTable, OpenFile, OpenFiles, OwnerId};
pub use locks::{AccessIntent, ByteRange, LockKind, RangeCheck};
pub use oplock::{BreakGate, NoopBreaker, OplockBreaker};
pub use readdir::{DirEntries, DirEntryRecord, ResumePosition};
pub use rename::RenameSource;
pub use resolver::{LookupIntent, PathResolution};
pub use stats::{StatsSnapshot, VfsStats};
pub use vfs::{Vfs, VfsBuilder};
pub use vfs_syscalls::{FileMetadata, FileType, InodeKey, XattrSetMode};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
