//! Store Module
//!
//! The handle the host process opens: one data file, the caches shared by
//! all transactions on it, and the registry of open transactions.
//!
//! ## Responsibilities
//! - Open/close the object storage (at most one handle per file)
//! - Bootstrap the root mapping on a fresh file
//! - Hand out transactions
//! - Own the data and object caches and sweep them on request

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{const_mutex, Mutex, MutexGuard};

use crate::config::Config;
use crate::error::{Result, TroveError};
use crate::objects::{ObjectStorage, StorageStats};
use crate::txn::{
    context, decode, encode, CachedObject, ConflictLog, Roots, SweepCache, Transaction, ROOTS_ID,
};

/// Files currently held open by a `Store` in this process
static OPEN_PATHS: Mutex<BTreeSet<PathBuf>> = const_mutex(BTreeSet::new());

/// Handle to an open store
///
/// Cheap to clone; all clones share one storage handle. Transactions keep
/// the shared state alive but fail with `NotInitialized` once the store is
/// closed.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

/// State shared between a store and its transactions
pub(crate) struct Shared {
    pub(crate) config: Config,

    /// Key under which the file is registered in `OPEN_PATHS`
    registered_path: PathBuf,

    /// Everything mutable, behind one lock: commits are atomic with respect
    /// to each other because check, broadcast and apply happen under it
    pub(crate) state: Mutex<StoreState>,

    next_txn_id: AtomicU64,
}

/// Mutable store state
pub(crate) struct StoreState {
    /// `None` once the store is closed
    pub(crate) storage: Option<ObjectStorage>,

    /// Raw blobs keyed by ID
    pub(crate) data_cache: SweepCache<Bytes>,

    /// Restored objects keyed by ID
    pub(crate) object_cache: SweepCache<CachedObject>,

    /// Conflict log of every open transaction, keyed by transaction ID
    pub(crate) open_txns: HashMap<u64, ConflictLog>,
}

impl StoreState {
    pub(crate) fn storage(&mut self) -> Result<&mut ObjectStorage> {
        self.storage.as_mut().ok_or(TroveError::NotInitialized)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.storage.is_none() {
            return Err(TroveError::NotInitialized);
        }
        Ok(())
    }
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock()
    }

    pub(crate) fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Close the storage and release the path; `false` if already closed
    fn shut_down(&self) -> Result<bool> {
        let mut state = self.lock();
        let Some(mut storage) = state.storage.take() else {
            return Ok(false);
        };

        state.data_cache.clear();
        state.object_cache.clear();
        let open = state.open_txns.len();
        drop(state);

        OPEN_PATHS.lock().remove(&self.registered_path);
        storage.close()?;

        if open > 0 {
            tracing::warn!(
                "Closed {} with {} transactions still open",
                self.registered_path.display(),
                open
            );
        }
        Ok(true)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(e) = self.shut_down() {
            tracing::error!("Failed to close {}: {}", self.registered_path.display(), e);
        }
    }
}

impl Store {
    /// Open or create the store described by `config`
    ///
    /// On startup:
    /// 1. Refuse a file this process already holds open
    /// 2. Open the object storage (heap + ID table)
    /// 3. Create the root mapping as object 0 on a fresh file
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let registered_path =
            std::path::absolute(&config.path).unwrap_or_else(|_| config.path.clone());
        if !OPEN_PATHS.lock().insert(registered_path.clone()) {
            return Err(TroveError::AlreadyInitialized(registered_path));
        }

        let storage = match Self::open_storage(&config) {
            Ok(storage) => storage,
            Err(e) => {
                OPEN_PATHS.lock().remove(&registered_path);
                return Err(e);
            }
        };

        tracing::info!(
            "Opened store {} with {} objects",
            registered_path.display(),
            storage.len()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                registered_path,
                state: Mutex::new(StoreState {
                    storage: Some(storage),
                    data_cache: SweepCache::new(),
                    object_cache: SweepCache::new(),
                    open_txns: HashMap::new(),
                }),
                next_txn_id: AtomicU64::new(1),
            }),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data file
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().path(path).build())
    }

    fn open_storage(config: &Config) -> Result<ObjectStorage> {
        let mut storage = ObjectStorage::open(config)?;

        if storage.is_empty() {
            let id = storage.new(&encode(&Roots::new())?)?;
            if id != ROOTS_ID {
                return Err(TroveError::Corruption(format!(
                    "root mapping landed on id {} instead of {}",
                    id, ROOTS_ID
                )));
            }
            storage.flush()?;
        } else if !storage.contains(ROOTS_ID)? {
            return Err(TroveError::Corruption(
                "store has objects but no root mapping".to_string(),
            ));
        }

        Ok(storage)
    }

    /// Flush and release the file
    ///
    /// Open transactions stay valid objects but every further storage access
    /// through them fails with `NotInitialized`.
    pub fn close(&self) -> Result<()> {
        if !self.shared.shut_down()? {
            return Err(TroveError::NotInitialized);
        }
        tracing::info!("Closed store {}", self.shared.registered_path.display());
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().storage.is_some()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a new transaction
    pub fn begin(&self) -> Result<Transaction> {
        Transaction::begin(Arc::clone(&self.shared))
    }

    /// Run `f` with the transaction entered on this thread
    ///
    /// With `auto_transaction` enabled a transaction is begun and entered
    /// when none is; it stays entered until `context::commit_current` or
    /// `context::exit`.
    pub fn with_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction) -> Result<R>,
    {
        if !context::is_entered() {
            if !self.shared.config.auto_transaction {
                return Err(TroveError::NoTransaction);
            }
            context::enter(self.begin()?)?;
        }

        context::with_current(|txn| {
            if !txn.belongs_to(self) {
                return Err(TroveError::Transaction(
                    "entered transaction belongs to another store".to_string(),
                ));
            }
            f(txn)
        })
    }

    /// Number of transactions begun and not yet terminated
    pub fn open_transactions(&self) -> usize {
        self.shared.lock().open_txns.len()
    }

    pub(crate) fn shares(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    // =========================================================================
    // Caches
    // =========================================================================

    /// Evict cache entries not touched within `max_age`
    ///
    /// Returns `(data entries, object entries)` evicted.
    pub fn sweep_caches(&self, max_age: Duration) -> (usize, usize) {
        let mut state = self.shared.lock();
        let data = state.data_cache.evict_older_than(max_age);
        let objects = state.object_cache.evict_older_than(max_age);
        if data + objects > 0 {
            tracing::debug!("Swept {} cached blobs and {} cached objects", data, objects);
        }
        (data, objects)
    }

    /// Sweep with the configured `cache_max_age`
    pub fn sweep_caches_default(&self) -> (usize, usize) {
        self.sweep_caches(self.shared.config.cache_max_age)
    }

    /// Current `(data cache, object cache)` sizes
    pub fn cache_sizes(&self) -> (usize, usize) {
        let state = self.shared.lock();
        (state.data_cache.len(), state.object_cache.len())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> Result<StorageStats> {
        self.shared.lock().storage()?.stats()
    }

    pub fn check_integrity(&self) -> Result<bool> {
        Ok(self.shared.lock().storage()?.check_integrity())
    }

    /// Committed root names and their object IDs
    pub fn roots(&self) -> Result<Roots> {
        let bytes = self.shared.lock().storage()?.get(ROOTS_ID)?;
        decode(ROOTS_ID, &bytes)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn path(&self) -> &Path {
        &self.shared.config.path
    }
}
