//! Buffered reads and writes on open files
//!
//! Every transfer consults the mandatory lock enforcer first. Writes also
//! break other clients' read caching under the [`BreakGate`](crate::oplock::BreakGate)
//! before touching the file. `O_DIRECT` is cleared on the descriptor before
//! each transfer, so data always goes through the page cache.

use crate::error::{report, ErrnoContext, OpContext, Result, VfsError};
use crate::handle::{CreateOptions, FileRef, HandleId};
use crate::locks::{AccessIntent, ByteRange, RangeCheck};
use crate::vfs::Vfs;
use compio::io::{AsyncReadAt, AsyncWriteAt};
use std::os::unix::io::AsRawFd;
use vfs_syscalls::{fadvise, fallocate, io, FadviseAdvice};

impl Vfs {
    /// Read up to `len` bytes at `offset`; fewer are returned at end of file
    ///
    /// # Errors
    ///
    /// `WouldBlock` when another open holds a conflicting lock on the range,
    /// `IsADirectory` for directory handles, `InvalidArgument` when the range
    /// overflows, `StorageFault` with `ENOMEM` when the buffer cannot be
    /// allocated.
    pub async fn read(&self, handle: HandleId, len: usize, offset: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let ctx = || OpContext::handle("read", handle);
        let file = self.file(handle, "read")?;
        if file.is_dir() {
            return Err(report(VfsError::IsADirectory { ctx: ctx() }));
        }
        self.check_transfer(&file, offset, len, AccessIntent::Read, &ctx)?;
        self.buffered(&file, &ctx)?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| report(VfsError::from_code(ctx(), libc::ENOMEM)))?;
        buf.resize(len, 0);
        let result = file.file().read_at(buf, offset).await;
        let n = result.0.or_ctx(ctx).map_err(report)?;
        let mut buf = result.1;
        buf.truncate(n);
        self.stats.add_bytes_read(n as u64);
        tracing::trace!(handle, offset, requested = len, read = n, "read");
        Ok(buf)
    }

    /// Write `data` at `offset`, returning the number of bytes written
    ///
    /// With `sync_after`, or when the handle was opened write-through, the
    /// written range is flushed before returning.
    ///
    /// # Errors
    ///
    /// `WouldBlock` on a lock conflict (nothing is written). `FlushFailed`
    /// when the data was written but the range flush failed; it carries the
    /// byte count.
    pub async fn write(
        &self,
        handle: HandleId,
        data: &[u8],
        offset: u64,
        sync_after: bool,
    ) -> Result<usize> {
        let ctx = || OpContext::handle("write", handle);
        let file = self.file(handle, "write")?;
        if data.is_empty() {
            return Ok(0);
        }
        if file.is_dir() {
            return Err(report(VfsError::IsADirectory { ctx: ctx() }));
        }
        self.check_transfer(&file, offset, data.len(), AccessIntent::Write, &ctx)?;
        self.break_read_caching(&file);
        self.buffered(&file, &ctx)?;

        let mut writer = file.file().clone();
        let mut written = 0usize;
        let mut buf = data.to_vec();
        while written < data.len() {
            let result = writer.write_at(buf, offset + written as u64).await;
            let n = result.0.or_ctx(ctx).map_err(report)?;
            if n == 0 {
                return Err(report(VfsError::StorageFault {
                    ctx: ctx(),
                    source: std::io::ErrorKind::WriteZero.into(),
                }));
            }
            written += n;
            buf = result.1;
            buf.drain(..n);
        }
        self.stats.add_bytes_written(written as u64);

        if sync_after || file.write_through() {
            if let Err(errno) = io::sync_range(file.as_raw_fd(), offset, written as u64) {
                self.stats.increment_failed_flushes();
                return Err(report(VfsError::FlushFailed {
                    ctx: ctx().with_errno(errno as i32),
                    written,
                    source: errno.into(),
                }));
            }
        }
        tracing::trace!(handle, offset, written, sync_after, "write");
        Ok(written)
    }

    /// Flush an open file's data and metadata
    ///
    /// # Errors
    ///
    /// `StorageFault` when the flush fails.
    pub async fn fsync(&self, handle: HandleId) -> Result<()> {
        let file = self.file(handle, "fsync")?;
        file.file()
            .sync_all()
            .await
            .or_ctx(|| OpContext::handle("fsync", handle))
            .map_err(report)
    }

    /// Reserve space for `size` bytes without changing the file size
    ///
    /// # Errors
    ///
    /// `StorageFault` when the volume is full or does not support allocation.
    pub fn allocate(&self, handle: HandleId, size: u64) -> Result<()> {
        let file = self.file(handle, "allocate")?;
        if size == 0 {
            return Ok(());
        }
        fallocate::preallocate_keep_size(file.as_raw_fd(), 0, size)
            .or_ctx(|| OpContext::handle("allocate", handle))
            .map_err(report)
    }

    /// Apply the caching options a client attached at create time
    ///
    /// Sequential and random access become read-ahead advice. Write-through
    /// makes every later write flush its range. Unbuffered I/O is recorded
    /// only: transfers always go through the page cache.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown handle.
    pub fn set_io_hints(&self, handle: HandleId, options: CreateOptions) -> Result<()> {
        let file = self.file(handle, "set-io-hints")?;
        file.record_hints(options);
        let advice = if options.sequential {
            Some(FadviseAdvice::Sequential)
        } else if options.random_access {
            Some(FadviseAdvice::Random)
        } else {
            None
        };
        if let Some(advice) = advice {
            // Advice is best effort; some filesystems reject it
            if let Err(errno) = fadvise::fadvise(file.as_raw_fd(), advice, 0, 0) {
                tracing::debug!(handle, ?advice, %errno, "fadvise rejected");
            }
        }
        if options.no_buffering {
            tracing::debug!(handle, "unbuffered I/O requested, serving buffered");
        }
        Ok(())
    }

    fn check_transfer(
        &self,
        file: &FileRef,
        offset: u64,
        len: usize,
        intent: AccessIntent,
        ctx: &impl Fn() -> OpContext,
    ) -> Result<()> {
        let range = ByteRange::from_len(offset, len as u64)
            .ok_or_else(|| report(VfsError::InvalidArgument { ctx: ctx() }))?;
        match self.enforce(file.key(), Some(file.owner()), range, intent) {
            RangeCheck::Clear => Ok(()),
            RangeCheck::WouldBlock => Err(report(VfsError::WouldBlock { ctx: ctx() })),
        }
    }

    /// Break read caching on `file` under the gate, when oplocks are enabled
    pub(crate) fn break_read_caching(&self, file: &FileRef) {
        if !self.config.oplocks_enabled() {
            return;
        }
        self.gate.run(|| self.breaker.break_read_caching(file));
        self.stats.increment_oplock_breaks();
    }

    fn buffered(&self, file: &FileRef, ctx: &impl Fn() -> OpContext) -> Result<()> {
        if io::clear_direct_io(file.as_raw_fd()).or_ctx(ctx).map_err(report)? {
            tracing::debug!(path = %file.path().display(), "cleared O_DIRECT for buffered transfer");
        }
        Ok(())
    }
}
