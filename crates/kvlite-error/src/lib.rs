use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for kvlite operations.
///
/// The variants are the conditions the VFS itself can produce; the upper
/// engine only ever sees the numeric [`ErrorCode`] each one maps to.
#[derive(Error, Debug)]
pub enum KvliteError {
    /// File I/O error from the scratch filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside the backing key-value store.
    #[error("page store error: {detail}")]
    Store { detail: String },

    /// A stored page record could not be decoded.
    #[error("page record is malformed: {detail}")]
    Corrupt { detail: String },

    /// A page the caller asked for does not exist in the current snapshot.
    #[error("page not found at offset {offset}")]
    PageNotFound { offset: u64 },

    /// Page-0 header content the VFS refuses to persist.
    #[error("invalid header write: {detail}")]
    HeaderViolation { detail: String },

    /// Read or write request violating the sector discipline.
    #[error("misaligned page access: offset {offset}, len {len}")]
    Misaligned { offset: i64, len: usize },

    /// Lock request that moves down, or arrives in a state that cannot
    /// accept it.
    #[error("illegal lock transition: {detail}")]
    LockProtocol { detail: String },

    /// Conflict detected while upgrading a reader to a writer.
    #[error("database is busy")]
    Busy,

    /// Internal logic error (registry inconsistency, refcount underflow).
    #[error("internal error: {0}")]
    Internal(String),

    /// Cannot open a file.
    #[error("unable to open database file: '{path}'")]
    CannotOpen { path: PathBuf },

    /// Path escapes the scratch directory.
    #[error("access denied: '{path}'")]
    Perm { path: PathBuf },

    /// Operation this VFS refuses permanently (e.g. WAL-mode opens).
    #[error("unsupported: {feature}")]
    Unsupported { feature: &'static str },
}

/// Numeric result codes of the embedded engine's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Internal logic error.
    Internal = 2,
    /// Access permission denied.
    Perm = 3,
    /// Database file is locked.
    Busy = 5,
    /// Disk I/O error.
    IoErr = 10,
    /// Database disk image is malformed.
    Corrupt = 11,
    /// Unable to open database file.
    CantOpen = 14,
}

impl KvliteError {
    /// Map this error onto the engine's error taxonomy.
    ///
    /// Decoder failures are deliberately reported as I/O errors: the engine
    /// treats a malformed page record the same as a failed read, and the
    /// `Corrupt` distinction only matters to kvlite's own logs.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Io(_)
            | Self::Store { .. }
            | Self::Corrupt { .. }
            | Self::PageNotFound { .. }
            | Self::HeaderViolation { .. }
            | Self::Misaligned { .. }
            | Self::LockProtocol { .. } => ErrorCode::IoErr,
            Self::Busy => ErrorCode::Busy,
            Self::Internal(_) => ErrorCode::Internal,
            Self::CannotOpen { .. } | Self::Unsupported { .. } => ErrorCode::CantOpen,
            Self::Perm { .. } => ErrorCode::Perm,
        }
    }

    /// Whether retrying the enclosing statement may succeed.
    ///
    /// `Busy` is the one condition the engine is expected to recover from
    /// by retrying; everything else is surfaced as-is.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// Create a store error from any displayable backend failure.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store {
            detail: err.to_string(),
        }
    }

    /// Create a corrupt-record error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a lock-protocol error.
    pub fn lock_protocol(detail: impl Into<String>) -> Self {
        Self::LockProtocol {
            detail: detail.into(),
        }
    }

    /// Create a header-violation error.
    pub fn header_violation(detail: impl Into<String>) -> Self {
        Self::HeaderViolation {
            detail: detail.into(),
        }
    }
}

/// Result type alias using [`KvliteError`].
pub type Result<T> = std::result::Result<T, KvliteError>;
