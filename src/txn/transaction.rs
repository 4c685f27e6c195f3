//! Transaction implementation
//!
//! Stages object and root changes privately and publishes them atomically
//! on commit.

use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, TroveError};
use crate::objects::ObjectId;
use crate::store::{Shared, Store};

use super::{
    decode, encode, CachedObject, ConflictLog, ObjectRef, Outcome, Persisted, Persistent, Ref,
    Roots, TransactionState, ROOTS_ID,
};

/// Sets gathered at commit time
#[derive(Debug, Default)]
struct CommitSets {
    /// Live objects whose encoding did not change
    read: BTreeSet<ObjectId>,

    /// Changed or created objects with their new encoding
    writes: BTreeMap<ObjectId, Vec<u8>>,

    /// Objects to remove from storage
    deletes: BTreeSet<ObjectId>,

    /// Root changes (`None` removes the root)
    roots: BTreeMap<String, Option<ObjectId>>,
}

impl CommitSets {
    /// Every ID this commit changes
    fn written(&self) -> BTreeSet<ObjectId> {
        self.writes.keys().chain(self.deletes.iter()).copied().collect()
    }
}

/// Concurrent activity seen by a transaction since it began
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    /// Commits by other transactions
    pub commits: u64,

    /// Distinct objects those commits wrote
    pub written: usize,

    /// Distinct objects those commits read
    pub read: usize,

    /// Distinct roots those commits wrote
    pub roots: usize,
}

/// A unit of work against a [`Store`]
///
/// ## Lifecycle
/// ```text
/// Active ──commit()──▶ Committing ──▶ Terminated(Committed)
///   │                       └───────▶ Terminated(Aborted)   (conflict, I/O)
///   └────abort()───────────────────▶ Terminated(Aborted)
///
/// restart(): any state ──▶ Active (staged changes discarded)
/// ```
///
/// Objects are restored lazily: the cache holds proxies until an object is
/// first accessed. Commit and abort turn every live object back into a
/// proxy, so a restarted transaction sees fresh committed state.
///
/// Dropping an active transaction aborts it.
pub struct Transaction {
    /// Registry key in the store
    id: u64,

    shared: Arc<Shared>,

    state: TransactionState,

    /// Objects this transaction has touched
    cache: HashMap<ObjectId, ObjectRef<dyn Persisted>>,

    /// Encoding of each live object right after it was restored
    loaded: HashMap<ObjectId, Bytes>,

    /// IDs reserved for objects created here
    created: BTreeSet<ObjectId>,

    /// Committed objects to delete
    deleted: BTreeSet<ObjectId>,

    /// Root changes not yet committed (`None` removes the root)
    staged_roots: BTreeMap<String, Option<ObjectId>>,

    /// Committed root mapping, read on first use
    committed_roots: Option<Roots>,
}

impl Transaction {
    /// Register a new transaction with the store
    pub(crate) fn begin(shared: Arc<Shared>) -> Result<Self> {
        let id = shared.next_txn_id();
        {
            let mut state = shared.lock();
            state.ensure_open()?;
            state.open_txns.insert(id, ConflictLog::new());
        }
        tracing::trace!("Transaction {} begun", id);

        Ok(Self {
            id,
            shared,
            state: TransactionState::Active,
            cache: HashMap::new(),
            loaded: HashMap::new(),
            created: BTreeSet::new(),
            deleted: BTreeSet::new(),
            staged_roots: BTreeMap::new(),
            committed_roots: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// True if this transaction was begun on `store` (or a clone of it)
    pub fn belongs_to(&self, store: &Store) -> bool {
        store.shares(&self.shared)
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(TroveError::Transaction(format!(
                "transaction {} is {:?}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn ensure_user_id(&self, id: ObjectId) -> Result<()> {
        if id == ROOTS_ID {
            return Err(TroveError::InvalidObject(format!(
                "id {} is reserved for the root mapping",
                ROOTS_ID
            )));
        }
        if self.deleted.contains(&id) {
            return Err(TroveError::InvalidObject(format!(
                "object {} was deleted in this transaction",
                id
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Stage a new object; its ID is reserved immediately
    pub fn new<T: Persistent>(&mut self, value: T) -> Result<ObjectId> {
        self.ensure_active()?;
        let id = self.shared.lock().storage()?.reserve_id()?;
        self.created.insert(id);
        self.cache
            .insert(id, ObjectRef::Live(id, Box::new(value) as Box<dyn Persisted>));
        Ok(id)
    }

    /// Stage a new object and return a typed link to it
    pub fn new_ref<T: Persistent>(&mut self, value: T) -> Result<Ref<T>> {
        self.new(value).map(Ref::new)
    }

    /// Restore object `id` into this transaction (if it is still a proxy)
    /// and return the live value
    pub fn wake<T: Persistent>(&mut self, id: ObjectId) -> Result<&mut T> {
        self.ensure_active()?;
        self.ensure_user_id(id)?;

        let shared = &self.shared;
        let loaded = &mut self.loaded;
        let entry = self.cache.entry(id).or_insert(ObjectRef::Proxy(id));

        let live = entry.resolve(|id| {
            let (value, bytes) = restore::<T>(shared, id)?;
            loaded.insert(id, bytes);
            Ok(value as Box<dyn Persisted>)
        })?;

        let shape = live.shape();
        live.as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| TroveError::Restore {
                id,
                reason: format!("live object is a {}, not a {}", shape, type_name::<T>()),
            })
    }

    pub fn get<T: Persistent>(&mut self, id: ObjectId) -> Result<&T> {
        self.wake(id).map(|value| &*value)
    }

    /// Mutable access; changes are detected and written on commit
    pub fn get_mut<T: Persistent>(&mut self, id: ObjectId) -> Result<&mut T> {
        self.wake(id)
    }

    /// Replace the value of an existing object without restoring it first
    pub fn set<T: Persistent>(&mut self, id: ObjectId, value: T) -> Result<()> {
        self.ensure_active()?;
        self.ensure_user_id(id)?;
        if !self.created.contains(&id) && !self.shared.lock().storage()?.contains(id)? {
            return Err(TroveError::InvalidObject(format!("no object stored under id {}", id)));
        }

        self.cache
            .insert(id, ObjectRef::Live(id, Box::new(value) as Box<dyn Persisted>));
        Ok(())
    }

    /// Mark an object deleted; storage is freed on commit
    pub fn delete(&mut self, id: ObjectId) -> Result<()> {
        self.ensure_active()?;
        self.ensure_user_id(id)?;

        if self.created.remove(&id) {
            self.cache.remove(&id);
            return self.shared.lock().storage()?.release_id(id);
        }

        if !self.shared.lock().storage()?.contains(id)? {
            return Err(TroveError::InvalidObject(format!("no object stored under id {}", id)));
        }
        self.cache.remove(&id);
        self.loaded.remove(&id);
        self.deleted.insert(id);
        Ok(())
    }

    /// True if `id` refers to an object visible to this transaction
    pub fn contains(&mut self, id: ObjectId) -> Result<bool> {
        self.ensure_active()?;
        if id == ROOTS_ID || self.deleted.contains(&id) {
            return Ok(false);
        }
        if self.created.contains(&id) {
            return Ok(true);
        }
        self.shared.lock().storage()?.contains(id)
    }

    // =========================================================================
    // Roots
    // =========================================================================

    fn committed_roots(&mut self) -> Result<&Roots> {
        let roots = match self.committed_roots.take() {
            Some(roots) => roots,
            None => {
                let bytes = self.shared.lock().storage()?.get(ROOTS_ID)?;
                decode::<Roots>(ROOTS_ID, &bytes)?
            }
        };
        Ok(&*self.committed_roots.insert(roots))
    }

    /// ID the root `name` points to, staged changes included
    pub fn root_id(&mut self, name: &str) -> Result<Option<ObjectId>> {
        self.ensure_active()?;
        if let Some(staged) = self.staged_roots.get(name) {
            return Ok(*staged);
        }
        Ok(self.committed_roots()?.get(name).copied())
    }

    pub fn get_root<T: Persistent>(&mut self, name: &str) -> Result<Option<&T>> {
        match self.root_id(name)? {
            Some(id) => self.get(id).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_root_mut<T: Persistent>(&mut self, name: &str) -> Result<Option<&mut T>> {
        match self.root_id(name)? {
            Some(id) => self.get_mut(id).map(Some),
            None => Ok(None),
        }
    }

    /// Store `value` as a new object and point root `name` at it
    pub fn set_root<T: Persistent>(&mut self, name: impl Into<String>, value: T) -> Result<ObjectId> {
        let id = self.new(value)?;
        self.staged_roots.insert(name.into(), Some(id));
        Ok(id)
    }

    /// Point root `name` at an existing object
    pub fn link_root(&mut self, name: impl Into<String>, id: ObjectId) -> Result<()> {
        if !self.contains(id)? {
            return Err(TroveError::InvalidObject(format!("no object stored under id {}", id)));
        }
        self.staged_roots.insert(name.into(), Some(id));
        Ok(())
    }

    /// Remove root `name`; the object it pointed to is left alone
    pub fn remove_root(&mut self, name: &str) -> Result<Option<ObjectId>> {
        let previous = self.root_id(name)?;
        if previous.is_some() {
            self.staged_roots.insert(name.to_string(), None);
        }
        Ok(previous)
    }

    /// Names of all roots, staged changes included
    pub fn root_names(&mut self) -> Result<Vec<String>> {
        self.ensure_active()?;
        let mut names: BTreeSet<String> = self.committed_roots()?.keys().cloned().collect();
        for (name, target) in &self.staged_roots {
            match target {
                Some(_) => names.insert(name.clone()),
                None => names.remove(name),
            };
        }
        Ok(names.into_iter().collect())
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Publish all staged changes atomically
    ///
    /// Steps:
    /// 1. Classify live objects as reads or writes (encoding every one)
    /// 2. Check for conflicts with commits made since this transaction began
    /// 3. Apply deletions, writes and root changes as one batch; flush
    /// 4. Broadcast this commit's sets to the other open transactions
    ///
    /// Returns the number of objects written. On `CommitConflict` nothing
    /// was persisted and the transaction is aborted; retry with a fresh one
    /// (or `restart`). An encoding failure leaves the transaction active.
    /// A storage failure aborts it too, with the batch rolled back (or the
    /// store `Poisoned` if even that fails).
    pub fn commit(&mut self) -> Result<usize> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;

        let sets = match self.classify() {
            Ok(sets) => sets,
            Err(e) => {
                self.state = TransactionState::Active;
                return Err(e);
            }
        };

        match self.apply(sets) {
            Ok(written) => {
                self.finish(Outcome::Committed);
                tracing::debug!("Transaction {} committed {} objects", self.id, written);
                Ok(written)
            }
            Err(e) => {
                if e.is_conflict() {
                    tracing::warn!("Transaction {} aborted: {}", self.id, e);
                } else {
                    tracing::error!("Transaction {} failed to commit: {}", self.id, e);
                }
                self.finish(Outcome::Aborted);
                Err(e)
            }
        }
    }

    /// Discard all staged changes and terminate
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.finish(Outcome::Aborted);
        tracing::debug!("Transaction {} aborted", self.id);
        Ok(())
    }

    /// Discard all staged changes and start over as a fresh transaction
    pub fn restart(&mut self) -> Result<()> {
        if self.is_active() {
            self.finish(Outcome::Aborted);
        }

        let mut state = self.shared.lock();
        state.ensure_open()?;
        state.open_txns.insert(self.id, ConflictLog::new());
        drop(state);

        self.state = TransactionState::Active;
        tracing::trace!("Transaction {} restarted", self.id);
        Ok(())
    }

    /// Activity of other transactions since this one began
    pub fn observed(&self) -> Observed {
        let state = self.shared.lock();
        match state.open_txns.get(&self.id) {
            Some(log) => Observed {
                commits: log.commits(),
                written: log.written().len(),
                read: log.read().len(),
                roots: log.roots().len(),
            },
            None => Observed {
                commits: 0,
                written: 0,
                read: 0,
                roots: 0,
            },
        }
    }

    fn classify(&self) -> Result<CommitSets> {
        let mut sets = CommitSets {
            deletes: self.deleted.clone(),
            roots: self.staged_roots.clone(),
            ..CommitSets::default()
        };

        for (id, entry) in &self.cache {
            let ObjectRef::Live(_, value) = entry else {
                continue;
            };
            let bytes = value.encode()?;
            let unchanged = !self.created.contains(id)
                && self
                    .loaded
                    .get(id)
                    .is_some_and(|original| original.as_ref() == bytes.as_slice());

            if unchanged {
                sets.read.insert(*id);
            } else {
                sets.writes.insert(*id, bytes);
            }
        }
        Ok(sets)
    }

    fn apply(&mut self, sets: CommitSets) -> Result<usize> {
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.lock();
        let state = &mut *guard;
        let written = sets.written();

        let log = state.open_txns.get(&self.id).ok_or_else(|| {
            TroveError::Transaction(format!("transaction {} is not registered", self.id))
        })?;
        log.check(&sets.read, &written, sets.roots.keys())?;

        let storage = state.storage.as_mut().ok_or(TroveError::NotInitialized)?;

        let count = sets.writes.len();
        let mut writes = sets.writes;
        if !sets.roots.is_empty() {
            let mut roots: Roots = decode(ROOTS_ID, &storage.get(ROOTS_ID)?)?;
            for (name, target) in &sets.roots {
                match target {
                    Some(id) => roots.insert(name.clone(), *id),
                    None => roots.remove(name),
                };
            }
            writes.insert(ROOTS_ID, encode(&roots)?);
        }

        // All or nothing: a failed batch leaves storage as it was
        storage.commit_batch(&writes, &sets.deletes)?;

        for (other, log) in state.open_txns.iter_mut() {
            if *other != self.id {
                log.record(&sets.read, &written, sets.roots.keys());
            }
        }

        for id in &sets.deletes {
            state.data_cache.remove(*id);
            state.object_cache.remove(*id);
        }
        for (id, bytes) in writes {
            state.data_cache.insert(id, Bytes::from(bytes));
            state.object_cache.remove(id);
        }

        // Written values become the cached committed state
        for (id, entry) in self.cache.iter_mut() {
            if let Some(value) = entry.downgrade() {
                if written.contains(id) {
                    state.object_cache.insert(*id, CachedObject::from_box(value));
                }
            }
        }

        Ok(count)
    }

    /// Leave the registry and drop staged state
    fn finish(&mut self, outcome: Outcome) {
        {
            let mut state = self.shared.lock();
            state.open_txns.remove(&self.id);

            if outcome == Outcome::Aborted && !self.created.is_empty() {
                if let Some(storage) = state.storage.as_mut() {
                    for id in &self.created {
                        if let Err(e) = storage.release_id(*id) {
                            tracing::warn!("Failed to release reserved id {}: {}", id, e);
                        }
                    }
                }
            }
        }

        for entry in self.cache.values_mut() {
            entry.downgrade();
        }
        self.loaded.clear();
        self.created.clear();
        self.deleted.clear();
        self.staged_roots.clear();
        self.committed_roots = None;
        self.state = TransactionState::Terminated(outcome);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(
            self.state,
            TransactionState::Active | TransactionState::Committing
        ) {
            self.finish(Outcome::Aborted);
        }
    }
}

/// Restore object `id` as a `T`, trying the object cache, then the data
/// cache, then storage
///
/// Also returns the encoding of the restored instance itself, which is the
/// baseline commit compares against. Stored bytes cannot serve: a decoded
/// `HashMap` re-encodes in its own iteration order.
///
/// Runs under the store lock so a concurrent commit cannot slip a stale
/// value into the caches.
fn restore<T: Persistent>(shared: &Shared, id: ObjectId) -> Result<(Box<T>, Bytes)> {
    let mut state = shared.lock();
    state.ensure_open()?;

    if let Some(cached) = state.object_cache.get(id) {
        if let Some(value) = cached.value.as_any().downcast_ref::<T>() {
            let value = value.clone();
            let baseline = Bytes::from(encode(&value)?);
            return Ok((Box::new(value), baseline));
        }
    }

    let bytes = match state.data_cache.get(id) {
        Some(bytes) => bytes,
        None => {
            let raw = Bytes::from(state.storage()?.get(id)?);
            state.data_cache.insert(id, raw.clone());
            raw
        }
    };

    let value: T = decode(id, &bytes)?;
    let baseline = Bytes::from(encode(&value)?);
    state
        .object_cache
        .insert(id, CachedObject::new(Arc::new(value.clone())));
    Ok((Box::new(value), baseline))
}
