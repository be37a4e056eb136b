//! The scratch VFS: plain files in one temp directory.
//!
//! Rollback journals, statement subjournals, and temporary databases do
//! not go through the page store; they are ordinary files living in a
//! private scratch directory. The directory is created under the
//! platform temp location (honoring `TMPDIR`) and removed when the VFS
//! is dropped. Paths are confined to the directory; anything that
//! resolves outside it is a permission error.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use kvlite_error::{KvliteError, Result};
use kvlite_types::flags::{AccessMode, SyncFlags, VfsOpenFlags};
use kvlite_types::LockLevel;

use crate::traits::{Vfs, VfsFile};

/// A pass-through VFS rooted in a private temp directory.
pub struct ScratchVfs {
    root: TempDir,
}

impl ScratchVfs {
    /// Create the scratch directory.
    pub fn new() -> Result<Self> {
        let root = tempfile::Builder::new()
            .prefix("kvlite-scratch-")
            .tempdir()?;
        debug!(root = %root.path().display(), "scratch directory created");
        Ok(Self { root })
    }

    /// The scratch directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Join `name` onto the scratch root, refusing escapes.
    fn resolve(&self, name: &Path) -> Result<PathBuf> {
        let name = name.strip_prefix("/").unwrap_or(name);
        let resolved = self.root.path().join(name);
        if !resolved.starts_with(self.root.path())
            || name
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(KvliteError::Perm {
                path: name.to_path_buf(),
            });
        }
        Ok(resolved)
    }
}

impl Vfs for ScratchVfs {
    type File = ScratchFile;

    fn name(&self) -> &'static str {
        "scratch"
    }

    fn open(&self, path: Option<&Path>, flags: VfsOpenFlags) -> Result<(Self::File, VfsOpenFlags)> {
        let (file, resolved) = match path {
            None => {
                let file = tempfile::tempfile_in(self.root.path()).map_err(|_| {
                    KvliteError::CannotOpen {
                        path: self.root.path().to_path_buf(),
                    }
                })?;
                (file, None)
            }
            Some(name) => {
                let resolved = self.resolve(name)?;
                let mut options = OpenOptions::new();
                options.read(true);
                options.write(!flags.contains(VfsOpenFlags::READONLY));
                if flags.contains(VfsOpenFlags::CREATE) {
                    options.create(true);
                }
                if flags.contains(VfsOpenFlags::EXCLUSIVE) {
                    options.create_new(true);
                }
                let file = options.open(&resolved).map_err(|_| KvliteError::CannotOpen {
                    path: name.to_path_buf(),
                })?;
                (file, Some(resolved))
            }
        };

        let scratch = ScratchFile {
            file,
            path: resolved,
            lock_level: LockLevel::None,
            delete_on_close: flags.contains(VfsOpenFlags::DELETEONCLOSE),
        };
        Ok((scratch, flags))
    }

    fn delete(&self, path: &Path, sync_dir: bool) -> Result<()> {
        let resolved = self.resolve(path)?;
        fs::remove_file(&resolved)?;
        if sync_dir {
            File::open(self.root.path())?.sync_all()?;
        }
        Ok(())
    }

    fn access(&self, path: &Path, mode: AccessMode) -> Result<bool> {
        let resolved = self.resolve(path)?;
        let exists = match fs::metadata(&resolved) {
            Ok(_) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        match mode {
            AccessMode::Exists => Ok(exists),
            // Everything inside the scratch directory is ours to read and
            // write.
            AccessMode::Read | AccessMode::ReadWrite => Ok(true),
        }
    }

    fn full_pathname(&self, path: &Path) -> Result<PathBuf> {
        self.resolve(path)
    }
}

/// A plain file inside the scratch directory.
pub struct ScratchFile {
    file: File,
    path: Option<PathBuf>,
    lock_level: LockLevel,
    delete_on_close: bool,
}

impl VfsFile for ScratchFile {
    fn close(&mut self) -> Result<()> {
        self.lock_level = LockLevel::None;
        if self.delete_on_close {
            if let Some(path) = self.path.take() {
                let _ = fs::remove_file(&path);
            }
        }
        Ok(())
    }

    fn read_at(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
        if offset < 0 {
            return Err(KvliteError::Misaligned {
                offset,
                len: buf.len(),
            });
        }
        #[allow(clippy::cast_sign_loss)]
        let n = self.file.read_at(buf, offset as u64)?;
        // Short reads hand back zeroes for the remainder.
        if n < buf.len() {
            buf[n..].fill(0);
        }
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: i64) -> Result<()> {
        if offset < 0 {
            return Err(KvliteError::Misaligned {
                offset,
                len: buf.len(),
            });
        }
        #[allow(clippy::cast_sign_loss)]
        self.file.write_all_at(buf, offset as u64)?;
        Ok(())
    }

    fn truncate(&mut self, size: i64) -> Result<()> {
        #[allow(clippy::cast_sign_loss)]
        self.file.set_len(size.max(0) as u64)?;
        Ok(())
    }

    fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        if flags.contains(SyncFlags::DATAONLY) {
            self.file.sync_data()?;
        } else {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn file_size(&mut self) -> Result<i64> {
        let len = self.file.metadata()?.len();
        i64::try_from(len).map_err(|_| KvliteError::internal("file size exceeds i64"))
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        if level > self.lock_level {
            self.lock_level = level;
        }
        Ok(())
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        if level < self.lock_level {
            self.lock_level = level;
        }
        Ok(())
    }

    fn check_reserved_lock(&self) -> Result<bool> {
        Ok(self.lock_level > LockLevel::None)
    }
}
