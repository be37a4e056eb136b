//! The kvlite front door.
//!
//! Open policy: write-ahead-log files are refused outright (this VFS does
//! not support journaling mode), main database files become transactional
//! [`PagesFile`] objects registered in the process-wide open-file
//! registry, and everything else (journals, temp databases) falls through
//! to the [`ScratchVfs`]. The page-store file for database `name` lives
//! inside the scratch directory, one store file per logical database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use kvlite_error::{KvliteError, Result};
use kvlite_store::Registry;
use kvlite_types::flags::{AccessMode, SyncFlags, VfsOpenFlags};
use kvlite_types::LockLevel;

use crate::file::PagesFile;
use crate::scratch::{ScratchFile, ScratchVfs};
use crate::traits::{Vfs, VfsFile};

/// The VFS the embedded engine registers under the name `kvlite`.
pub struct KvliteVfs {
    scratch: ScratchVfs,
    registry: Arc<Registry>,
}

impl KvliteVfs {
    /// Create a VFS bound to the process-wide registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::global())
    }

    /// Create a VFS bound to a specific registry.
    ///
    /// Production code wants [`KvliteVfs::new`]; tests use this to keep
    /// their databases out of the global namespace.
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        Ok(Self {
            scratch: ScratchVfs::new()?,
            registry,
        })
    }
}

/// A file opened through [`KvliteVfs`]: either a transactional pages file
/// or a plain scratch file.
pub enum KvliteFile {
    Pages(PagesFile),
    Scratch(ScratchFile),
}

impl Vfs for KvliteVfs {
    type File = KvliteFile;

    fn name(&self) -> &'static str {
        "kvlite"
    }

    fn open(&self, path: Option<&Path>, flags: VfsOpenFlags) -> Result<(Self::File, VfsOpenFlags)> {
        if flags.contains(VfsOpenFlags::WAL) {
            error!("refusing to open a write-ahead log file");
            return Err(KvliteError::Unsupported {
                feature: "write-ahead journaling",
            });
        }

        if !flags.contains(VfsOpenFlags::MAIN_DB) {
            let (file, out_flags) = self.scratch.open(path, flags)?;
            return Ok((KvliteFile::Scratch(file), out_flags));
        }

        let Some(path) = path else {
            error!("main database open without a name");
            return Err(KvliteError::CannotOpen {
                path: PathBuf::new(),
            });
        };
        let name = path.to_string_lossy();
        let name = name.strip_prefix('/').unwrap_or(&name);

        let store = self.registry.acquire(name, self.scratch.root())?;
        debug!(name, "opened database file");
        let file = PagesFile::new(name.to_owned(), store, Arc::clone(&self.registry));
        Ok((KvliteFile::Pages(file), flags))
    }

    fn delete(&self, path: &Path, sync_dir: bool) -> Result<()> {
        self.scratch.delete(path, sync_dir)
    }

    fn access(&self, path: &Path, mode: AccessMode) -> Result<bool> {
        self.scratch.access(path, mode)
    }

    fn full_pathname(&self, path: &Path) -> Result<PathBuf> {
        self.scratch.full_pathname(path)
    }
}

impl VfsFile for KvliteFile {
    fn close(&mut self) -> Result<()> {
        match self {
            Self::Pages(f) => f.close(),
            Self::Scratch(f) => f.close(),
        }
    }

    fn read_at(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
        match self {
            Self::Pages(f) => f.read_at(buf, offset),
            Self::Scratch(f) => f.read_at(buf, offset),
        }
    }

    fn write_at(&mut self, buf: &[u8], offset: i64) -> Result<()> {
        match self {
            Self::Pages(f) => f.write_at(buf, offset),
            Self::Scratch(f) => f.write_at(buf, offset),
        }
    }

    fn truncate(&mut self, size: i64) -> Result<()> {
        match self {
            Self::Pages(f) => f.truncate(size),
            Self::Scratch(f) => f.truncate(size),
        }
    }

    fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        match self {
            Self::Pages(f) => f.sync(flags),
            Self::Scratch(f) => f.sync(flags),
        }
    }

    fn file_size(&mut self) -> Result<i64> {
        match self {
            Self::Pages(f) => f.file_size(),
            Self::Scratch(f) => f.file_size(),
        }
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        match self {
            Self::Pages(f) => f.lock(level),
            Self::Scratch(f) => f.lock(level),
        }
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        match self {
            Self::Pages(f) => f.unlock(level),
            Self::Scratch(f) => f.unlock(level),
        }
    }

    fn check_reserved_lock(&self) -> Result<bool> {
        match self {
            Self::Pages(f) => f.check_reserved_lock(),
            Self::Scratch(f) => f.check_reserved_lock(),
        }
    }

    fn sector_size(&self) -> u32 {
        match self {
            Self::Pages(f) => f.sector_size(),
            Self::Scratch(f) => f.sector_size(),
        }
    }

    fn device_characteristics(&self) -> u32 {
        match self {
            Self::Pages(f) => f.device_characteristics(),
            Self::Scratch(f) => f.device_characteristics(),
        }
    }

    fn confirm_commit(&mut self) -> Result<()> {
        match self {
            Self::Pages(f) => f.confirm_commit(),
            Self::Scratch(f) => f.confirm_commit(),
        }
    }
}
