//! Core types shared across the kvlite workspace.
//!
//! This crate is dependency-light on purpose: it holds the lock-level
//! enumeration the engine drives the VFS with, the open/sync/access flags,
//! the well-known database header fields kvlite reads and rewrites, and
//! the versioned page-record codec.

pub mod flags;
pub mod header;
pub mod record;

pub use record::{PagePayload, PageRecord, RecordError};

/// The fixed sector size of a kvlite database, in bytes.
///
/// Every `read_at`/`write_at` except the initial pre-lock header probe is
/// aligned to this unit, and every stored `Real` payload is exactly this
/// long. Changing it at runtime is not supported.
pub const SECTOR_SIZE: usize = 4096;

/// Length of the pre-lock header probe the engine performs at offset 0.
pub const HEADER_PROBE_LEN: usize = 100;

/// Lock level for database file locking (the engine's five-state lock).
///
/// The progression is strictly monotone upward (`Lock`) and may drop to
/// any lower level (`Unlock`). Ordering is part of the contract.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LockLevel {
    /// No lock held.
    #[default]
    None = 0,
    /// Shared lock (reading).
    Shared = 1,
    /// Reserved lock (intending to write).
    Reserved = 2,
    /// Pending lock (waiting for shared locks to clear).
    Pending = 3,
    /// Exclusive lock (writing).
    Exclusive = 4,
}

impl std::fmt::Display for LockLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Shared => "shared",
            Self::Reserved => "reserved",
            Self::Pending => "pending",
            Self::Exclusive => "exclusive",
        };
        f.write_str(name)
    }
}
