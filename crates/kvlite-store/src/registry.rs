//! Process-wide registry of open logical databases.
//!
//! The embedded engine opens one file per connection, but many connections
//! may name the same database. All of them must share one underlying
//! store, so the registry maps logical name to a reference-counted
//! [`PageStore`] handle. A single mutex covers lookup, insertion, and the
//! refcounts; the store is created (and its pages table seeded) on first
//! acquisition and torn down when the last file releases it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, error};

use kvlite_error::{KvliteError, Result};

use crate::store::PageStore;

struct Entry {
    store: Arc<PageStore>,
    refcount: u32,
}

/// Name → reference-counted store map.
///
/// [`Registry::global`] is the process-wide instance the VFS front door
/// uses; tests construct private registries via [`Registry::new`].
#[derive(Default)]
pub struct Registry {
    inner: Mutex<HashMap<String, Entry>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    ///
    /// Handed out as an `Arc` so file objects can carry the same handle
    /// whether they were opened against the global registry or a private
    /// one in tests.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Registry::new())))
    }

    /// Acquire a handle to the store for `name`, creating the store file
    /// under `dir` and seeding its pages table on the first acquisition.
    ///
    /// Two concurrent acquisitions of the same name return the same
    /// underlying store.
    pub fn acquire(&self, name: &str, dir: &Path) -> Result<Arc<PageStore>> {
        let mut map = self.inner.lock();
        if let Some(entry) = map.get_mut(name) {
            entry.refcount += 1;
            return Ok(Arc::clone(&entry.store));
        }

        let store = PageStore::open(&dir.join(name))?;
        store.init_pages()?;
        let store = Arc::new(store);
        map.insert(
            name.to_owned(),
            Entry {
                store: Arc::clone(&store),
                refcount: 1,
            },
        );
        debug!(name, "opened page store");
        Ok(store)
    }

    /// Release one reference to the store for `name`.
    ///
    /// `store` must be the handle returned by the matching
    /// [`acquire`](Self::acquire); a name or identity mismatch means the
    /// registry and the file disagree about what is open, which is an
    /// internal invariant violation, not an I/O condition. The entry is
    /// removed when the last reference goes; the store file itself closes
    /// once every outstanding handle is dropped.
    pub fn release(&self, name: &str, store: &Arc<PageStore>) -> Result<()> {
        let mut map = self.inner.lock();
        let Some(entry) = map.get_mut(name) else {
            error!(name, "release of a database the registry does not know");
            return Err(KvliteError::internal(format!(
                "no registry entry for '{name}'"
            )));
        };
        if !Arc::ptr_eq(&entry.store, store) {
            error!(name, "release with a stale store handle");
            return Err(KvliteError::internal(format!(
                "store handle mismatch for '{name}'"
            )));
        }
        if entry.refcount == 0 {
            error!(name, "registry refcount underflow");
            return Err(KvliteError::internal(format!(
                "refcount underflow for '{name}'"
            )));
        }

        entry.refcount -= 1;
        if entry.refcount == 0 {
            map.remove(name);
            debug!(name, "closed page store");
        }
        Ok(())
    }
}
