//! The versioned page-record envelope.
//!
//! Every stored page is a [`PageRecord`]: a 64-bit revision plus a tagged
//! payload. The envelope is a deterministic hand-rolled wire format so the
//! engine's page cache can rely on byte-identical reads within a snapshot:
//!
//! ```text
//! magic[4]="KVPG" | version[1] | revision[8 LE] | tag[1] | payload
//! ```
//!
//! Payloads by tag: `None` (0) carries nothing, `Real` (1) carries
//! `len[4 LE] | bytes` where `len` must equal the sector size, and `Ref`
//! (2) carries a 32-byte content hash naming a page held elsewhere. The
//! tag space is extensible; decoders reject tags they do not know rather
//! than guessing at a layout.

use std::fmt;

/// Magic bytes identifying a page record: `"KVPG"`.
pub const RECORD_MAGIC: [u8; 4] = *b"KVPG";

/// Current envelope version.
pub const RECORD_VERSION: u8 = 1;

const TAG_NONE: u8 = 0;
const TAG_REAL: u8 = 1;
const TAG_REF: u8 = 2;

/// Fixed prefix before the payload: magic(4) + version(1) + revision(8) + tag(1).
const PREFIX_LEN: usize = 4 + 1 + 8 + 1;

/// Length of a `Ref` payload's content hash.
pub const REF_HASH_LEN: usize = 32;

/// The payload arm of a page record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePayload {
    /// No page content.
    None,
    /// Inline page bytes, exactly one sector long.
    Real(Vec<u8>),
    /// A content-addressed reference to a page stored elsewhere.
    Ref([u8; REF_HASH_LEN]),
}

impl PagePayload {
    const fn tag(&self) -> u8 {
        match self {
            Self::None => TAG_NONE,
            Self::Real(_) => TAG_REAL,
            Self::Ref(_) => TAG_REF,
        }
    }
}

/// A decoded page record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// Monotonic per-page write counter, local to the stored record.
    pub revision: i64,
    /// The page content.
    pub payload: PagePayload,
}

/// Validation error when decoding a [`PageRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Input too short to contain a complete record.
    TooShort { expected_min: usize, actual: usize },
    /// Magic bytes do not match `"KVPG"`.
    BadMagic([u8; 4]),
    /// Envelope version is unsupported.
    UnsupportedVersion(u8),
    /// Payload tag is not one this decoder knows.
    UnknownTag(u8),
    /// A `Real` payload's declared length does not match the sector size.
    LengthMismatch { declared: usize, sector_size: usize },
    /// Bytes left over after the declared payload.
    TrailingBytes { extra: usize },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort {
                expected_min,
                actual,
            } => write!(f, "record too short: need {expected_min}, got {actual}"),
            Self::BadMagic(m) => write!(f, "bad record magic: {m:02x?}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported record version: {v}"),
            Self::UnknownTag(t) => write!(f, "unknown payload tag: {t}"),
            Self::LengthMismatch {
                declared,
                sector_size,
            } => write!(
                f,
                "real payload length {declared} does not match sector size {sector_size}"
            ),
            Self::TrailingBytes { extra } => write!(f, "{extra} trailing bytes after payload"),
        }
    }
}

impl std::error::Error for RecordError {}

impl PageRecord {
    /// Create a record holding inline page bytes.
    #[must_use]
    pub fn real(revision: i64, bytes: Vec<u8>) -> Self {
        Self {
            revision,
            payload: PagePayload::Real(bytes),
        }
    }

    /// Serialize to canonical wire bytes.
    ///
    /// Deterministic: the same `(revision, payload)` always produces the
    /// same bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = match &self.payload {
            PagePayload::None => 0,
            PagePayload::Real(bytes) => 4 + bytes.len(),
            PagePayload::Ref(_) => REF_HASH_LEN,
        };
        let mut buf = Vec::with_capacity(PREFIX_LEN + payload_len);
        buf.extend_from_slice(&RECORD_MAGIC);
        buf.push(RECORD_VERSION);
        buf.extend_from_slice(&self.revision.to_le_bytes());
        buf.push(self.payload.tag());
        match &self.payload {
            PagePayload::None => {}
            PagePayload::Real(bytes) => {
                #[allow(clippy::cast_possible_truncation)]
                let len = bytes.len() as u32;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            PagePayload::Ref(hash) => buf.extend_from_slice(hash),
        }
        buf
    }

    /// Parse a record from wire bytes.
    ///
    /// `sector_size` is the configured sector size; a `Real` payload whose
    /// declared length differs is rejected.
    pub fn decode(buf: &[u8], sector_size: usize) -> Result<Self, RecordError> {
        if buf.len() < PREFIX_LEN {
            return Err(RecordError::TooShort {
                expected_min: PREFIX_LEN,
                actual: buf.len(),
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != RECORD_MAGIC {
            return Err(RecordError::BadMagic(magic));
        }
        if buf[4] != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(buf[4]));
        }

        let mut rev = [0u8; 8];
        rev.copy_from_slice(&buf[5..13]);
        let revision = i64::from_le_bytes(rev);

        let tag = buf[13];
        let rest = &buf[PREFIX_LEN..];
        let payload = match tag {
            TAG_NONE => {
                if !rest.is_empty() {
                    return Err(RecordError::TrailingBytes { extra: rest.len() });
                }
                PagePayload::None
            }
            TAG_REAL => {
                if rest.len() < 4 {
                    return Err(RecordError::TooShort {
                        expected_min: PREFIX_LEN + 4,
                        actual: buf.len(),
                    });
                }
                let mut len_raw = [0u8; 4];
                len_raw.copy_from_slice(&rest[0..4]);
                let declared = u32::from_le_bytes(len_raw) as usize;
                if declared != sector_size {
                    return Err(RecordError::LengthMismatch {
                        declared,
                        sector_size,
                    });
                }
                let data = &rest[4..];
                if data.len() < declared {
                    return Err(RecordError::TooShort {
                        expected_min: PREFIX_LEN + 4 + declared,
                        actual: buf.len(),
                    });
                }
                if data.len() > declared {
                    return Err(RecordError::TrailingBytes {
                        extra: data.len() - declared,
                    });
                }
                PagePayload::Real(data.to_vec())
            }
            TAG_REF => {
                if rest.len() < REF_HASH_LEN {
                    return Err(RecordError::TooShort {
                        expected_min: PREFIX_LEN + REF_HASH_LEN,
                        actual: buf.len(),
                    });
                }
                if rest.len() > REF_HASH_LEN {
                    return Err(RecordError::TrailingBytes {
                        extra: rest.len() - REF_HASH_LEN,
                    });
                }
                let mut hash = [0u8; REF_HASH_LEN];
                hash.copy_from_slice(rest);
                PagePayload::Ref(hash)
            }
            unknown => return Err(RecordError::UnknownTag(unknown)),
        };

        Ok(Self { revision, payload })
    }
}
