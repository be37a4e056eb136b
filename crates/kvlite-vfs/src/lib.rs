//! The kvlite virtual file system.
//!
//! [`KvliteVfs`] is the front door the embedded engine opens files
//! through. Main database files become [`PagesFile`] objects whose reads
//! and writes are transactions against a per-database page store;
//! journals and temp files fall through to [`ScratchVfs`], a plain
//! pass-through over one temp directory.

mod file;
mod revisions;
mod scratch;
mod traits;
mod vfs;

pub use file::PagesFile;
pub use scratch::{ScratchFile, ScratchVfs};
pub use traits::{Vfs, VfsFile};
pub use vfs::{KvliteFile, KvliteVfs};
