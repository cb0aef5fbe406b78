//! smb-vfs - run one filesystem mediation operation against a share root

use anyhow::{Context, Result};
use clap::Parser;
use smb_vfs::cli::{Args, Command};
use smb_vfs::{
    Access, AttrChange, FileMetadata, FileType, LookupIntent, OpenFiles, RenameSource, Target,
    Vfs, XattrSetMode,
};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;

#[compio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;

    tracing_subscriber::fmt()
        .with_max_level(args.output.level())
        .with_writer(std::io::stderr)
        .init();

    let handles = Arc::new(OpenFiles::new());
    let vfs = Vfs::builder(&args.root)
        .config(args.vfs.clone())
        .handles(handles.clone())
        .build()
        .with_context(|| format!("Failed to open share {}", args.root.display()))?;

    run(&vfs, &handles, args.command).await?;

    let stats = vfs.stats().snapshot();
    tracing::info!(
        bytes_read = stats.bytes_read,
        bytes_written = stats.bytes_written,
        lock_checks = stats.lock_checks,
        "done"
    );
    Ok(())
}

async fn run(vfs: &Vfs, handles: &OpenFiles, command: Command) -> Result<()> {
    let mut out = std::io::stdout().lock();
    match command {
        Command::Stat { path } => {
            let res = vfs.resolve(&path, LookupIntent::entry())?;
            let meta = res
                .target()
                .context("resolved entry has no metadata")?
                .clone();
            print_stat(&mut out, &meta)?;
        }
        Command::Ls { path, all } => {
            for record in vfs.read_dir(Target::Path(&path), None)?.include_dots(all) {
                let record = record?;
                let size = record.metadata.as_ref().map_or(0, |meta| meta.size);
                out.write_all(record.name.as_bytes())?;
                writeln!(out, "\t{}\t{size}", type_name(record.file_type))?;
            }
        }
        Command::Mkdir { path, mode } => vfs.mkdir(&path, mode)?,
        Command::Create { path, mode } => vfs.create(&path, mode)?,
        Command::Write {
            path,
            data,
            offset,
            sync,
        } => {
            let id = handles.insert(vfs.open(&path, Access::ReadWrite).await?);
            let written = vfs.write(id, data.as_bytes(), offset, sync).await;
            vfs.release_locks(id)?;
            handles.remove(id);
            writeln!(out, "{}", written?)?;
        }
        Command::Cat {
            path,
            offset,
            length,
        } => {
            let id = handles.insert(vfs.open(&path, Access::Read).await?);
            let size = vfs.get_attributes(id)?.size;
            let len = match length {
                Some(len) => len,
                None => usize::try_from(size.saturating_sub(offset))?,
            };
            let data = vfs.read(id, len, offset).await;
            handles.remove(id);
            out.write_all(&data?)?;
        }
        Command::Mv { from, to } => vfs.rename(RenameSource::Path(&from), &to)?,
        Command::Ln { existing, new } => vfs.link(&existing, &new)?,
        Command::Symlink { target, link } => vfs.symlink(&target, &link)?,
        Command::Rm { path } => vfs.remove(&path)?,
        Command::Rmdir { path } => vfs.rmdir(&path)?,
        Command::Truncate { path, size } => vfs.truncate(Target::Path(&path), size)?,
        Command::Chmod { mode, path } => {
            vfs.set_attributes(Target::Path(&path), AttrChange::default().mode(mode))?;
        }
        Command::Chown { path, uid, gid } => {
            let change = AttrChange {
                uid,
                gid,
                ..AttrChange::default()
            };
            vfs.set_attributes(Target::Path(&path), change)?;
        }
        Command::Getxattr {
            path,
            name,
            max_len,
        } => {
            let value = vfs.get_xattr(Target::Path(&path), &name, max_len)?;
            out.write_all(&value)?;
            writeln!(out)?;
        }
        Command::Setxattr {
            path,
            name,
            value,
            create,
            replace,
        } => {
            let mode = if create {
                XattrSetMode::CreateOnly
            } else if replace {
                XattrSetMode::ReplaceOnly
            } else {
                XattrSetMode::Any
            };
            vfs.set_xattr(Target::Path(&path), &name, value.as_bytes(), mode)?;
        }
        Command::Listxattr { path } => {
            let list = vfs.list_xattrs(Target::Path(&path))?;
            for name in list.split(|b| *b == 0).filter(|name| !name.is_empty()) {
                out.write_all(name)?;
                writeln!(out)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn print_stat(out: &mut impl Write, meta: &FileMetadata) -> Result<()> {
    writeln!(out, "type: {}", type_name(meta.file_type()))?;
    writeln!(out, "size: {}", meta.size)?;
    writeln!(out, "mode: {:04o}", meta.permissions())?;
    writeln!(out, "uid: {}", meta.uid)?;
    writeln!(out, "gid: {}", meta.gid)?;
    writeln!(out, "links: {}", meta.nlink)?;
    writeln!(out, "inode: {}", meta.ino)?;
    Ok(())
}

const fn type_name(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Regular => "file",
        FileType::Directory => "directory",
        FileType::Symlink => "symlink",
        FileType::Fifo => "fifo",
        FileType::Socket => "socket",
        FileType::CharDevice => "char-device",
        FileType::BlockDevice => "block-device",
        FileType::Unknown => "unknown",
    }
}
