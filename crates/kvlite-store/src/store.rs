//! Thin transactional wrapper over the embedded key-value store.
//!
//! One [`PageStore`] is one single-file redb database holding one `pages`
//! table: key = byte offset of the page (`page_index × sector_size`),
//! value = encoded page record. redb gives us exactly the transaction
//! shape the file layer is built on: copy-on-write B+tree, at most one
//! writer at a time (later `begin_write` calls block on the writer token),
//! snapshot isolation for any number of concurrent readers.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use tracing::debug;

use kvlite_error::{KvliteError, Result};
use kvlite_types::{header, PageRecord};

/// The single table holding every page record of one logical database.
const PAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("pages");

/// Store-level cache size.
///
/// The backing store pages values internally; a roomy cache keeps the hot
/// B+tree interior and recently used sectors resident. Tuning, not
/// correctness.
const CACHE_SIZE_BYTES: usize = 1 << 24;

/// A single-file page store.
///
/// Created through [`PageStore::open`] and torn down by dropping the last
/// handle; the registry owns the refcounting.
pub struct PageStore {
    db: Database,
}

impl PageStore {
    /// Open (or create) the store file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::builder()
            .set_cache_size(CACHE_SIZE_BYTES)
            .create(path)
            .map_err(KvliteError::store)?;
        Ok(Self { db })
    }

    /// Create the pages table and seed the blank-database header at
    /// offset 0 if it is absent.
    ///
    /// Idempotent; called once per store by the registry before any file
    /// handle sees it.
    pub fn init_pages(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(KvliteError::store)?;
        {
            let mut table = txn.open_table(PAGES).map_err(KvliteError::store)?;
            let missing = table.get(0u64).map_err(KvliteError::store)?.is_none();
            if missing {
                let record = PageRecord::real(0, header::blank_database_template());
                table
                    .insert(0u64, record.encode().as_slice())
                    .map_err(KvliteError::store)?;
                debug!("seeded blank header page");
            }
        }
        txn.commit().map_err(KvliteError::store)?;
        Ok(())
    }

    /// Begin a snapshot-reading transaction.
    pub fn begin_read(&self) -> Result<PageReader> {
        let txn = self.db.begin_read().map_err(KvliteError::store)?;
        Ok(PageReader { txn })
    }

    /// Begin the (at most one) writable transaction.
    ///
    /// Blocks until any other writer commits or rolls back.
    pub fn begin_write(&self) -> Result<PageWriter> {
        let txn = self.db.begin_write().map_err(KvliteError::store)?;
        Ok(PageWriter { txn })
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore").finish_non_exhaustive()
    }
}

/// A snapshot view of the pages table.
pub struct PageReader {
    txn: ReadTransaction,
}

impl PageReader {
    /// Fetch the raw record bytes stored at `offset`, if any.
    pub fn get(&self, offset: u64) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(PAGES).map_err(KvliteError::store)?;
        let value = table.get(offset).map_err(KvliteError::store)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// Release the snapshot.
    pub fn close(self) -> Result<()> {
        self.txn.close().map_err(KvliteError::store)
    }
}

/// The writable transaction over the pages table.
///
/// Reads through a writer observe the writer's own uncommitted puts.
/// Dropping a writer without calling [`commit`](Self::commit) rolls it
/// back, so an early-return error path cannot leak a held writer token.
pub struct PageWriter {
    txn: WriteTransaction,
}

impl PageWriter {
    /// Fetch the raw record bytes at `offset` as seen by this writer.
    pub fn get(&self, offset: u64) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(PAGES).map_err(KvliteError::store)?;
        let value = table.get(offset).map_err(KvliteError::store)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// Store raw record bytes at `offset`.
    pub fn put(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut table = self.txn.open_table(PAGES).map_err(KvliteError::store)?;
        table.insert(offset, bytes).map_err(KvliteError::store)?;
        Ok(())
    }

    /// Durably commit every put.
    pub fn commit(self) -> Result<()> {
        self.txn.commit().map_err(KvliteError::store)
    }

    /// Discard every put.
    pub fn rollback(self) -> Result<()> {
        self.txn.abort().map_err(KvliteError::store)
    }
}
