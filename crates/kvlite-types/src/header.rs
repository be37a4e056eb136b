//! The well-known database header fields kvlite reads and rewrites.
//!
//! The first 100 bytes of page 0 are the engine's own file header. kvlite
//! does not interpret most of it; the fields below are the ones the VFS
//! validates on write, reads for sizing, or splices on read:
//!
//! | bytes | field |
//! |---|---|
//! | `0..16`  | magic string |
//! | `16..18` | page size, big-endian |
//! | `18..20` | file format write/read versions (journal-mode markers) |
//! | `24..28` | file change counter |
//! | `28..32` | page count |
//! | `92..96` | version-valid-for counter |
//!
//! The two counter ranges are the splice points of the version-counter
//! contract: stored page-0 records keep them zeroed, and the per-open
//! counter is written into them on every read of page 0.

use crate::SECTOR_SIZE;

/// The magic string at the start of every database file.
pub const MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Byte range of the big-endian page size field.
pub const PAGE_SIZE_RANGE: std::ops::Range<usize> = 16..18;

/// Offset of the file format write version byte.
pub const WRITE_VERSION_OFFSET: usize = 18;

/// Offset of the file format read version byte.
pub const READ_VERSION_OFFSET: usize = 19;

/// Format version byte value that marks a WAL-mode database.
pub const WAL_VERSION_MARKER: u8 = 2;

/// Byte range of the file change counter.
pub const CHANGE_COUNTER_RANGE: std::ops::Range<usize> = 24..28;

/// Byte range of the page count field.
pub const PAGE_COUNT_RANGE: std::ops::Range<usize> = 28..32;

/// Byte range of the version-valid-for counter.
pub const VERSION_VALID_FOR_RANGE: std::ops::Range<usize> = 92..96;

/// Read the big-endian page size declared in a header page.
///
/// # Panics
///
/// Panics if `page` is shorter than the header. Callers hold full sectors.
#[must_use]
pub fn declared_page_size(page: &[u8]) -> u16 {
    u16::from_be_bytes([page[PAGE_SIZE_RANGE.start], page[PAGE_SIZE_RANGE.start + 1]])
}

/// True if either format version byte carries the WAL marker.
#[must_use]
pub fn is_wal_marked(page: &[u8]) -> bool {
    page[WRITE_VERSION_OFFSET] == WAL_VERSION_MARKER
        || page[READ_VERSION_OFFSET] == WAL_VERSION_MARKER
}

/// Read the big-endian page count from a header page.
#[must_use]
pub fn page_count(page: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&page[PAGE_COUNT_RANGE]);
    u32::from_be_bytes(raw)
}

/// Overwrite both change-counter slots with `counter`, big-endian.
///
/// Used in both directions of the splicing contract: reads of page 0
/// splice the live per-open counter in, and writes of page 0 splice zero
/// back so the stored record depends only on engine-level content.
pub fn splice_change_counters(page: &mut [u8], counter: u32) {
    let be = counter.to_be_bytes();
    page[CHANGE_COUNTER_RANGE].copy_from_slice(&be);
    page[VERSION_VALID_FOR_RANGE].copy_from_slice(&be);
}

/// Engine version number stamped into synthesized template headers.
const TEMPLATE_VERSION_NUMBER: u32 = 3_045_000;

/// Build the one-sector blank-database template.
///
/// This is the page served for the pre-lock header probe and seeded at
/// offset 0 when a database is created: a 100-byte header describing an
/// empty one-page database, followed by an empty leaf table b-tree page.
/// Both counter slots are zero, page count is 1, and the format version
/// bytes are the legacy (non-WAL) value.
#[must_use]
pub fn blank_database_template() -> Vec<u8> {
    let mut page = vec![0u8; SECTOR_SIZE];

    page[0..16].copy_from_slice(MAGIC);
    #[allow(clippy::cast_possible_truncation)]
    let page_size = SECTOR_SIZE as u16;
    page[PAGE_SIZE_RANGE].copy_from_slice(&page_size.to_be_bytes());
    page[WRITE_VERSION_OFFSET] = 1;
    page[READ_VERSION_OFFSET] = 1;
    // Payload fractions are fixed by the file format: max 64, min 32, leaf 32.
    page[21] = 64;
    page[22] = 32;
    page[23] = 32;
    page[PAGE_COUNT_RANGE].copy_from_slice(&1u32.to_be_bytes());
    // Schema format 4, text encoding UTF-8.
    page[44..48].copy_from_slice(&4u32.to_be_bytes());
    page[56..60].copy_from_slice(&1u32.to_be_bytes());
    page[96..100].copy_from_slice(&TEMPLATE_VERSION_NUMBER.to_be_bytes());

    // Page 0 doubles as the schema table root: an empty leaf table b-tree
    // page whose cell content area starts at the end of the page.
    page[100] = 0x0D;
    page[105..107].copy_from_slice(&page_size.to_be_bytes());

    page
}
