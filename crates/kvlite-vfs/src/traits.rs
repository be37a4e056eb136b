//! The VFS trait surface the embedded engine drives.
//!
//! Offsets are `i64` because the engine's I/O interface is; negative
//! offsets are representable and every implementation must reject them.
//! There are no shared-memory methods here: WAL mode is unsupported by
//! this VFS, so the engine never asks for them. Nothing blocks for
//! cancellation either; operations run to completion or fail.

use std::path::{Path, PathBuf};

use kvlite_error::Result;
use kvlite_types::flags::{AccessMode, SyncFlags, VfsOpenFlags};
use kvlite_types::{LockLevel, SECTOR_SIZE};

/// A virtual filesystem implementation.
pub trait Vfs: Send + Sync {
    /// The file handle type produced by this VFS.
    type File: VfsFile;

    /// The name of this VFS.
    fn name(&self) -> &'static str;

    /// Open a file.
    ///
    /// `path` is `None` for anonymous temporary files. Returns the opened
    /// file and the flags actually honored.
    fn open(&self, path: Option<&Path>, flags: VfsOpenFlags) -> Result<(Self::File, VfsOpenFlags)>;

    /// Delete a file. `sync_dir` asks for the directory entry removal to
    /// be made durable.
    fn delete(&self, path: &Path, sync_dir: bool) -> Result<()>;

    /// Check file accessibility.
    fn access(&self, path: &Path, mode: AccessMode) -> Result<bool>;

    /// Resolve a potentially relative path into a stable absolute path.
    fn full_pathname(&self, path: &Path) -> Result<PathBuf>;
}

/// A file handle opened through a [`Vfs`].
pub trait VfsFile: Send {
    /// Close the file. The handle must not be used afterwards.
    fn close(&mut self) -> Result<()>;

    /// Read `buf.len()` bytes starting at byte `offset`.
    ///
    /// Returns the number of bytes read; on a short read the remainder of
    /// `buf` is left zeroed.
    fn read_at(&mut self, buf: &mut [u8], offset: i64) -> Result<usize>;

    /// Write `buf` starting at byte `offset`.
    fn write_at(&mut self, buf: &[u8], offset: i64) -> Result<()>;

    /// Truncate the file to `size` bytes.
    fn truncate(&mut self, size: i64) -> Result<()>;

    /// Flush file contents to stable storage.
    fn sync(&mut self, flags: SyncFlags) -> Result<()>;

    /// Current file size in bytes.
    fn file_size(&mut self) -> Result<i64>;

    /// Acquire the file lock at `level`.
    ///
    /// Five-level locking: None < Shared < Reserved < Pending < Exclusive.
    /// Requests never move down through this method.
    fn lock(&mut self, level: LockLevel) -> Result<()>;

    /// Release the file lock down to `level`.
    fn unlock(&mut self, level: LockLevel) -> Result<()>;

    /// Whether this connection holds any lock on the file.
    fn check_reserved_lock(&self) -> Result<bool>;

    /// The write granularity of the underlying storage.
    #[allow(clippy::cast_possible_truncation)]
    fn sector_size(&self) -> u32 {
        SECTOR_SIZE as u32
    }

    /// Device capability flags. Zero claims nothing special.
    fn device_characteristics(&self) -> u32 {
        0
    }

    /// The engine's signal that the pending write transaction should be
    /// committed (rather than rolled back) by the next downward unlock.
    ///
    /// Meaningful only for transactional files; pass-through files accept
    /// and ignore it.
    fn confirm_commit(&mut self) -> Result<()> {
        Ok(())
    }
}
