//! Open, sync, and access flags exchanged with the embedded engine.
//!
//! Numeric values match the engine's C-level constants so a shim layer can
//! pass them through unchanged.

bitflags::bitflags! {
    /// Flags describing what kind of file is being opened and how.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VfsOpenFlags: u32 {
        /// Open read-only.
        const READONLY = 0x0000_0001;
        /// Open read-write.
        const READWRITE = 0x0000_0002;
        /// Create the file if it does not exist.
        const CREATE = 0x0000_0004;
        /// Delete the file when the handle closes.
        const DELETEONCLOSE = 0x0000_0008;
        /// Fail if the file already exists.
        const EXCLUSIVE = 0x0000_0010;
        /// The main database file.
        const MAIN_DB = 0x0000_0100;
        /// A temporary database.
        const TEMP_DB = 0x0000_0200;
        /// A transient database.
        const TRANSIENT_DB = 0x0000_0400;
        /// The main rollback journal.
        const MAIN_JOURNAL = 0x0000_0800;
        /// A temporary journal.
        const TEMP_JOURNAL = 0x0000_1000;
        /// A statement subjournal.
        const SUBJOURNAL = 0x0000_2000;
        /// The super-journal used by multi-database commits.
        const SUPER_JOURNAL = 0x0000_4000;
        /// A write-ahead log file. kvlite refuses these opens outright.
        const WAL = 0x0008_0000;
    }
}

bitflags::bitflags! {
    /// Sync variants passed to `VfsFile::sync`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncFlags: u32 {
        /// Normal sync.
        const NORMAL = 0x0000_0002;
        /// Full sync (barrier semantics).
        const FULL = 0x0000_0003;
        /// Only the file data, not its metadata.
        const DATAONLY = 0x0000_0010;
    }
}

/// Access check requested through `Vfs::access`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AccessMode {
    /// Does the file exist?
    Exists = 0,
    /// Is the file readable and writable?
    ReadWrite = 1,
    /// Is the file readable?
    Read = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_db_and_wal_are_distinct() {
        let flags = VfsOpenFlags::MAIN_DB | VfsOpenFlags::READWRITE | VfsOpenFlags::CREATE;
        assert!(flags.contains(VfsOpenFlags::MAIN_DB));
        assert!(!flags.contains(VfsOpenFlags::WAL));
    }

    #[test]
    fn numeric_values_match_engine_constants() {
        assert_eq!(VfsOpenFlags::MAIN_DB.bits(), 0x100);
        assert_eq!(VfsOpenFlags::MAIN_JOURNAL.bits(), 0x800);
        assert_eq!(VfsOpenFlags::WAL.bits(), 0x8_0000);
        assert_eq!(AccessMode::Exists as u32, 0);
    }
}
