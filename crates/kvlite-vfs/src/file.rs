//! The transactional page file.
//!
//! A [`PagesFile`] is one open handle over one logical database. It owns
//! at most one store transaction at a time and walks the engine's
//! five-level lock ladder:
//!
//! - `Lock(Shared)` begins a snapshot reader and resets the
//!   observed-revisions index.
//! - `Lock(Reserved)` acquires the store's single writer and revalidates
//!   every observed revision against it. A page that changed or vanished
//!   since the snapshot fails the upgrade with `Busy`; the original
//!   reader is kept, so the file keeps reading the snapshot it had.
//! - `Unlock` below `Reserved` finalizes the writer: commit if the engine
//!   confirmed the commit, roll back otherwise, then resume reading on a
//!   fresh snapshot.
//! - `Unlock(None)` drops whatever transaction remains.
//!
//! Page 0 is special in both directions: reads splice the per-open
//! version counter into the header's change-counter slots, and writes
//! splice zero back so the stored record depends only on engine content.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use kvlite_error::{KvliteError, Result};
use kvlite_store::{PageReader, PageStore, PageWriter, Registry};
use kvlite_types::flags::SyncFlags;
use kvlite_types::{header, LockLevel, PagePayload, PageRecord, HEADER_PROBE_LEN, SECTOR_SIZE};

use crate::revisions::ObservedRevisions;
use crate::traits::VfsFile;

/// The store transaction a file currently holds.
enum StoreTxn {
    Read(PageReader),
    Write(PageWriter),
}

impl StoreTxn {
    fn get(&self, offset: u64) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Read(reader) => reader.get(offset),
            Self::Write(writer) => writer.get(offset),
        }
    }

    /// Tear the transaction down outside the commit path.
    ///
    /// Errors here mean an earlier finalize already closed the underlying
    /// transaction or the store is in a bad way; neither is actionable by
    /// the caller at this point, so they go to the log only.
    fn dispose(self) {
        match self {
            Self::Read(reader) => {
                if let Err(err) = reader.close() {
                    warn!(error = %err, "closing read transaction failed");
                }
            }
            Self::Write(writer) => {
                if let Err(err) = writer.rollback() {
                    warn!(error = %err, "rolling back write transaction failed");
                }
            }
        }
    }
}

#[derive(Default, Clone, Copy)]
struct ReadPageOpts {
    /// Skip the observed-revisions record. Used by internal size probes
    /// that must not participate in phantom detection.
    skip_record: bool,
    /// Serve the blank-database template when page 0 is absent.
    default_first_page: bool,
}

/// One open handle over a logical database stored as versioned pages.
pub struct PagesFile {
    name: String,
    /// `None` once the file is closed. Close must actually let go of the
    /// store so the last closer tears the store file down before the
    /// engine can reopen it.
    store: Option<Arc<PageStore>>,
    registry: Arc<Registry>,
    lock_level: LockLevel,
    txn: Option<StoreTxn>,
    revisions: ObservedRevisions,
    /// Spliced into header reads; bumped by 2 on every read→write upgrade
    /// so the engine's page cache keys change whenever our snapshot may
    /// have. Odd values are reserved to the engine.
    version_counter: u32,
    first_page: Vec<u8>,
    commit_confirmed: bool,
}

impl PagesFile {
    pub(crate) fn new(name: String, store: Arc<PageStore>, registry: Arc<Registry>) -> Self {
        Self {
            name,
            store: Some(store),
            registry,
            lock_level: LockLevel::None,
            txn: None,
            revisions: ObservedRevisions::new(),
            version_counter: 0,
            first_page: header::blank_database_template(),
            commit_confirmed: false,
        }
    }

    fn has_writer(&self) -> bool {
        matches!(self.txn, Some(StoreTxn::Write(_)))
    }

    fn store(&self) -> Result<&PageStore> {
        self.store
            .as_deref()
            .ok_or_else(|| KvliteError::internal("file already closed"))
    }

    /// Replace the reader with a validated writer, or report why not.
    ///
    /// The reader is kept alive until the phantom check passes: the store
    /// lets one connection hold its own snapshot while acquiring the
    /// writer token, and a failed upgrade must leave this file reading
    /// the exact snapshot it had.
    fn upgrade_to_writer(&mut self) -> Result<()> {
        let writer = self.store()?.begin_write().inspect_err(|err| {
            error!(error = %err, "could not begin write transaction");
        })?;
        self.version_counter = self.version_counter.wrapping_add(2);

        for (offset, revision) in self.revisions.iter() {
            let current = match writer.get(offset) {
                Ok(Some(raw)) => match PageRecord::decode(&raw, SECTOR_SIZE) {
                    Ok(record) => Some(record.revision),
                    Err(err) => {
                        error!(offset, error = %err, "undecodable record during revalidation");
                        rollback_writer(writer);
                        return Err(KvliteError::corrupt(err.to_string()));
                    }
                },
                Ok(None) => None,
                Err(err) => {
                    error!(offset, error = %err, "store error during revalidation");
                    rollback_writer(writer);
                    return Err(err);
                }
            };
            if current != Some(revision) {
                warn!(offset, "page changed under the snapshot; upgrade is busy");
                rollback_writer(writer);
                return Err(KvliteError::Busy);
            }
        }

        if let Some(StoreTxn::Read(reader)) = self.txn.take() {
            if let Err(err) = reader.close() {
                warn!(error = %err, "closing superseded reader failed");
            }
        }
        self.txn = Some(StoreTxn::Write(writer));
        Ok(())
    }

    fn read_page(&mut self, offset: u64, opts: ReadPageOpts) -> Result<Vec<u8>> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.read_page_inner(offset, opts))) {
            Ok(result) => result,
            Err(payload) => {
                error!(
                    offset,
                    panic = panic_detail(payload.as_ref()),
                    "panic caught during page read"
                );
                Err(KvliteError::store("panic during page read"))
            }
        }
    }

    fn read_page_inner(&mut self, offset: u64, opts: ReadPageOpts) -> Result<Vec<u8>> {
        let Some(txn) = &self.txn else {
            error!(offset, "page read without a transaction");
            return Err(KvliteError::lock_protocol("page read without a transaction"));
        };

        let Some(raw) = txn.get(offset)? else {
            if offset == 0 && opts.default_first_page {
                return Ok(self.first_page.clone());
            }
            error!(offset, "page not found");
            return Err(KvliteError::PageNotFound { offset });
        };

        let record = PageRecord::decode(&raw, SECTOR_SIZE).map_err(|err| {
            error!(offset, error = %err, "stored page record is malformed");
            KvliteError::corrupt(err.to_string())
        })?;

        if !opts.skip_record {
            self.revisions.record(offset, record.revision);
        }

        let PagePayload::Real(mut bytes) = record.payload else {
            error!(offset, "page payload is not inline data");
            return Err(KvliteError::corrupt(
                "page payload is a reference or empty",
            ));
        };

        if offset == 0 {
            header::splice_change_counters(&mut bytes, self.version_counter);
        }
        Ok(bytes)
    }

    fn write_page(&mut self, page: &[u8], offset: u64) -> Result<()> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.write_page_inner(page, offset))) {
            Ok(result) => result,
            Err(payload) => {
                error!(
                    offset,
                    panic = panic_detail(payload.as_ref()),
                    "panic caught during page write"
                );
                Err(KvliteError::store("panic during page write"))
            }
        }
    }

    fn write_page_inner(&mut self, page: &[u8], offset: u64) -> Result<()> {
        let record = PageRecord::real(i64::from(self.version_counter), page.to_vec());
        let encoded = record.encode();
        let Some(StoreTxn::Write(writer)) = &mut self.txn else {
            error!(offset, "page write without a writable transaction");
            return Err(KvliteError::lock_protocol(
                "page write without a writable transaction",
            ));
        };
        writer.put(offset, &encoded).inspect_err(|err| {
            error!(offset, error = %err, "error writing page");
        })
    }
}

impl VfsFile for PagesFile {
    fn close(&mut self) -> Result<()> {
        let Some(store) = self.store.take() else {
            error!(name = %self.name, "close of an already-closed file");
            return Err(KvliteError::internal("file already closed"));
        };
        if let Some(txn) = self.txn.take() {
            txn.dispose();
        }
        self.lock_level = LockLevel::None;
        // Release the registry reference, then drop our own handle: when
        // both are gone the last closer's drop tears down the store file.
        self.registry.release(&self.name, &store)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
        debug!(offset, len = buf.len(), "read_at");
        let len = buf.len();

        // Before any lock is taken the engine probes the first 100 header
        // bytes; serve those from the template without starting a
        // transaction.
        if self.txn.is_none() {
            if offset != 0 {
                error!(offset, "pre-transaction read away from the header");
                return Err(KvliteError::Misaligned { offset, len });
            }
            if len != HEADER_PROBE_LEN {
                warn!(len, "pre-lock header probe with non-standard size");
            }
            let n = len.min(self.first_page.len());
            buf[..n].copy_from_slice(&self.first_page[..n]);
            buf[n..].fill(0);
            return Ok(n);
        }

        if offset < 0 {
            error!(offset, "negative read offset");
            return Err(KvliteError::Misaligned { offset, len });
        }

        #[allow(clippy::cast_possible_wrap)]
        let sector = SECTOR_SIZE as i64;
        #[allow(clippy::cast_possible_wrap)]
        let len_i64 = len as i64;

        if offset % sector != 0 || len % SECTOR_SIZE != 0 {
            // A sub-sector read is only ever a slice of the header page.
            if offset >= sector || len >= SECTOR_SIZE || offset + len_i64 > sector {
                error!(offset, len, "read not aligned to a sector");
                return Err(KvliteError::Misaligned { offset, len });
            }
            let page = self.read_page(0, ReadPageOpts::default())?;
            #[allow(clippy::cast_sign_loss)]
            let start = offset as usize;
            buf.copy_from_slice(&page[start..start + len]);
            return Ok(len);
        }

        let mut copied = 0;
        #[allow(clippy::cast_sign_loss)]
        let mut page_offset = offset as u64;
        while copied < len {
            let page = self.read_page(page_offset, ReadPageOpts::default())?;
            buf[copied..copied + SECTOR_SIZE].copy_from_slice(&page);
            copied += SECTOR_SIZE;
            page_offset += SECTOR_SIZE as u64;
        }
        Ok(copied)
    }

    fn write_at(&mut self, buf: &[u8], offset: i64) -> Result<()> {
        debug!(offset, len = buf.len(), "write_at");

        #[allow(clippy::cast_possible_wrap)]
        let sector = SECTOR_SIZE as i64;
        if offset < 0 || offset % sector != 0 {
            error!(offset, "write not aligned to a sector");
            return Err(KvliteError::Misaligned {
                offset,
                len: buf.len(),
            });
        }
        if buf.len() != SECTOR_SIZE {
            error!(len = buf.len(), "write is not exactly one sector");
            return Err(KvliteError::Misaligned {
                offset,
                len: buf.len(),
            });
        }
        if !self.has_writer() {
            error!(offset, "write without a writable transaction");
            return Err(KvliteError::lock_protocol(
                "write without a writable transaction",
            ));
        }

        if offset == 0 {
            // The engine must not change the page size out from under the
            // store, nor flip the header into write-ahead journaling.
            let declared = header::declared_page_size(buf);
            if usize::from(declared) != SECTOR_SIZE {
                error!(declared, "header write declares a different page size");
                return Err(KvliteError::header_violation(format!(
                    "page size {declared} does not match sector size {SECTOR_SIZE}"
                )));
            }
            if header::is_wal_marked(buf) {
                error!("header write enables write-ahead journaling");
                return Err(KvliteError::header_violation(
                    "write-ahead journal mode is not supported",
                ));
            }
            let mut page = buf.to_vec();
            header::splice_change_counters(&mut page, 0);
            return self.write_page(&page, 0);
        }

        #[allow(clippy::cast_sign_loss)]
        let page_offset = offset as u64;
        self.write_page(buf, page_offset)
    }

    fn truncate(&mut self, size: i64) -> Result<()> {
        // Pages past the header's page count are tolerated; the engine
        // never depends on the file shrinking.
        debug!(size, "truncate ignored");
        Ok(())
    }

    fn sync(&mut self, _flags: SyncFlags) -> Result<()> {
        // Durability comes from transaction commit.
        Ok(())
    }

    fn file_size(&mut self) -> Result<i64> {
        if self.txn.is_none() {
            warn!("file size requested before any transaction");
            #[allow(clippy::cast_possible_wrap)]
            return Ok(SECTOR_SIZE as i64);
        }
        let page = self.read_page(
            0,
            ReadPageOpts {
                skip_record: true,
                default_first_page: true,
            },
        )?;
        let pages = i64::from(header::page_count(&page));
        #[allow(clippy::cast_possible_wrap)]
        let sector = SECTOR_SIZE as i64;
        Ok(pages * sector)
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        debug!(to = %level, current = %self.lock_level, "lock");
        if level == LockLevel::None {
            error!("lock(none) is not a valid request");
            return Err(KvliteError::internal("lock(none) is not a valid request"));
        }
        if level == self.lock_level {
            return Ok(());
        }
        if level < self.lock_level {
            error!(to = %level, current = %self.lock_level, "lock moved down");
            return Err(KvliteError::lock_protocol(format!(
                "lock may not move down ({} -> {level})",
                self.lock_level
            )));
        }

        if self.txn.is_none() {
            if level != LockLevel::Shared {
                error!(to = %level, "first lock must be shared");
                return Err(KvliteError::lock_protocol(format!(
                    "cannot take {level} lock with no transaction"
                )));
            }
            let reader = self.store()?.begin_read().inspect_err(|err| {
                error!(error = %err, "could not begin read transaction");
            })?;
            self.txn = Some(StoreTxn::Read(reader));
            self.revisions.clear();
        } else if level == LockLevel::Reserved {
            self.upgrade_to_writer()?;
        } else if !self.has_writer() {
            error!(to = %level, "lock past reserved without a writer");
            return Err(KvliteError::lock_protocol(format!(
                "cannot take {level} lock without a write transaction"
            )));
        }

        self.lock_level = level;
        Ok(())
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        debug!(to = %level, current = %self.lock_level, "unlock");
        if level == self.lock_level {
            return Ok(());
        }
        let prev = self.lock_level;
        self.lock_level = level;

        if prev >= LockLevel::Reserved && level < LockLevel::Reserved {
            let confirmed = self.commit_confirmed;
            self.commit_confirmed = false;
            let mut first_err: Option<KvliteError> = None;

            match self.txn.take() {
                Some(StoreTxn::Write(writer)) => {
                    if confirmed {
                        if let Err(err) = writer.commit() {
                            error!(error = %err, "commit failed");
                            first_err = Some(err);
                        }
                    } else if let Err(err) = writer.rollback() {
                        error!(error = %err, "rollback failed");
                        first_err = Some(err);
                    }
                }
                other => {
                    self.txn = other;
                    error!("downward unlock without a writable transaction");
                    return Err(KvliteError::lock_protocol(
                        "unlock below reserved without a write transaction",
                    ));
                }
            }

            // Stay readable while the lock level says we are.
            if level > LockLevel::None {
                match self.store().and_then(PageStore::begin_read) {
                    Ok(reader) => self.txn = Some(StoreTxn::Read(reader)),
                    Err(err) => {
                        error!(error = %err, "could not reopen a reader after finalize");
                        first_err.get_or_insert(err);
                    }
                }
            }

            if let Some(err) = first_err {
                return Err(err);
            }
        }

        if level == LockLevel::None {
            if let Some(txn) = self.txn.take() {
                txn.dispose();
            }
        }
        Ok(())
    }

    fn check_reserved_lock(&self) -> Result<bool> {
        Ok(self.lock_level > LockLevel::None)
    }

    fn confirm_commit(&mut self) -> Result<()> {
        if !self.has_writer() || self.lock_level < LockLevel::Reserved {
            error!(current = %self.lock_level, "commit confirmation without a write transaction");
            return Err(KvliteError::lock_protocol(
                "commit confirmation without a write transaction",
            ));
        }
        if self.commit_confirmed {
            error!("commit already confirmed");
            return Err(KvliteError::lock_protocol("commit already confirmed"));
        }
        self.commit_confirmed = true;
        Ok(())
    }
}

fn rollback_writer(writer: PageWriter) {
    if let Err(err) = writer.rollback() {
        error!(error = %err, "writer rollback failed");
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload")
}
