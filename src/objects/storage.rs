//! Object storage
//!
//! Byte blobs keyed by integer ID, on top of the heap and the ID table.

use std::collections::{BTreeMap, BTreeSet};

use crate::alloc::{AllocTab, Interval};
use crate::config::Config;
use crate::error::{Result, TroveError};
use crate::heap::FileMem;

use super::{IdTable, IdTableState, ObjectId, Pointer};

/// Every allocation starts with the blob length
pub const LENGTH_PREFIX_SIZE: u64 = 8;

/// Point-in-time figures about a storage file
#[derive(Debug, Clone, PartialEq)]
pub struct StorageStats {
    /// Claimed IDs (stored objects plus pending reservations)
    pub objects: u64,

    /// Slots in the ID table
    pub id_capacity: u64,

    /// Length of the data file in bytes
    pub file_len: u64,

    /// Bytes in allocated regions
    pub allocated_bytes: u64,

    /// Bytes in free regions
    pub free_bytes: u64,

    /// Number of free regions
    pub fragments: usize,
}

/// One change `commit_batch` knows how to take back
enum Undo {
    /// The slot of an ID held this pointer
    Slot(ObjectId, Pointer),

    /// These bytes were overwritten in place
    Bytes(u64, Vec<u8>),
}

/// Blob store keyed by object ID
///
/// ## Resize Policy (`set`)
/// - grows past the allocation → move to a fresh one with headroom
/// - shrinks below `shrink_threshold` of the allocation → move to a fresh,
///   smaller one with headroom
/// - otherwise → overwrite in place
///
/// A batch that fails halfway and cannot be rolled back poisons the
/// storage: every later write or flush fails with `Poisoned`, so the
/// partial state never reaches the header.
pub struct ObjectStorage {
    heap: FileMem,
    ids: IdTable,
    shrink_threshold: f64,
    object_growth: f64,
    poisoned: Option<String>,
}

impl ObjectStorage {
    /// Open or create the storage file described by `config`
    ///
    /// On open:
    /// 1. Open the heap (reads the header)
    /// 2. Create the ID table, or rebuild it from the header metadata
    /// 3. Release IDs that were reserved but never written
    pub fn open(config: &Config) -> Result<Self> {
        let mut heap = FileMem::open(config)?;

        let ids = if heap.metadata().is_empty() {
            IdTable::create(&mut heap, config.id_table_capacity, config.id_table_growth)?
        } else {
            let state: IdTableState = bincode::deserialize(heap.metadata()).map_err(|e| {
                TroveError::Corruption(format!("Failed to decode ID table state: {}", e))
            })?;
            IdTable::from_state(state, config.id_table_growth)?
        };

        let mut storage = Self {
            heap,
            ids,
            shrink_threshold: config.shrink_threshold,
            object_growth: config.object_growth,
            poisoned: None,
        };

        let reclaimed = storage.reclaim_reservations()?;
        if reclaimed > 0 {
            tracing::warn!("Released {} IDs reserved by an unfinished session", reclaimed);
        }
        storage.flush()?;

        Ok(storage)
    }

    /// Free every claimed ID whose slot still holds the sentinel
    fn reclaim_reservations(&mut self) -> Result<usize> {
        let claimed: Vec<ObjectId> = self.ids.iter_ids().collect();
        let mut reclaimed = 0;
        for id in claimed {
            if self.ids.get(&mut self.heap, id)?.is_sentinel() {
                self.ids.delete(&mut self.heap, id)?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    // =========================================================================
    // Object Operations
    // =========================================================================

    /// Store `blob` under a fresh ID
    pub fn new(&mut self, blob: &[u8]) -> Result<ObjectId> {
        self.ensure_writable()?;
        let id = self.ids.new_id(&mut self.heap)?;
        if let Err(e) = self.write_fresh(id, blob, 1.0) {
            if let Err(cleanup) = self.ids.delete(&mut self.heap, id) {
                tracing::warn!("Failed to release id {} after a failed write: {}", id, cleanup);
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Claim an ID without storing anything under it yet
    ///
    /// The slot holds the sentinel until the first `set`; `get` on it fails.
    pub fn reserve_id(&mut self) -> Result<ObjectId> {
        self.ensure_writable()?;
        self.ids.new_id(&mut self.heap)
    }

    /// Give back an ID from `reserve_id` that was never written
    pub fn release_id(&mut self, id: ObjectId) -> Result<()> {
        self.ensure_writable()?;
        if !self.ids.get(&mut self.heap, id)?.is_sentinel() {
            return Err(TroveError::InvalidObject(format!(
                "id {} holds an object and cannot be released",
                id
            )));
        }
        self.ids.delete(&mut self.heap, id)
    }

    /// Fetch the blob stored under `id`
    pub fn get(&mut self, id: ObjectId) -> Result<Vec<u8>> {
        let pointer = self.stored_pointer(id)?;
        let capacity = pointer.size.checked_sub(LENGTH_PREFIX_SIZE).ok_or_else(|| {
            TroveError::Corruption(format!(
                "object {} has a {} byte allocation, too small for its length prefix",
                id, pointer.size
            ))
        })?;

        let prefix = self.heap.read(pointer.addr, LENGTH_PREFIX_SIZE)?;
        let mut len = [0u8; 8];
        len.copy_from_slice(&prefix);
        let len = u64::from_le_bytes(len);

        if len > capacity {
            return Err(TroveError::Corruption(format!(
                "object {} claims {} bytes in a {} byte allocation",
                id, len, pointer.size
            )));
        }
        self.heap.read(pointer.addr + LENGTH_PREFIX_SIZE, len)
    }

    /// Replace the blob stored under `id`
    pub fn set(&mut self, id: ObjectId, blob: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let pointer = self.ids.get(&mut self.heap, id)?;
        if pointer.is_sentinel() {
            return self.write_fresh(id, blob, 1.0);
        }

        if self.fits_in_place(pointer, blob) {
            return self.write_blob(pointer.addr, blob);
        }

        // Old region stays referenced until the new one is written
        self.write_fresh(id, blob, self.object_growth)?;
        self.heap.free(pointer.addr, pointer.size)
    }

    /// Free the blob and the ID
    pub fn delete(&mut self, id: ObjectId) -> Result<()> {
        self.ensure_writable()?;
        let pointer = self.ids.get(&mut self.heap, id)?;
        if !pointer.is_sentinel() {
            self.heap.free(pointer.addr, pointer.size)?;
        }
        self.ids.delete(&mut self.heap, id)
    }

    /// True if an object is stored under `id`
    pub fn contains(&mut self, id: ObjectId) -> Result<bool> {
        if !self.ids.is_allocated(id) {
            return Ok(false);
        }
        Ok(!self.ids.get(&mut self.heap, id)?.is_sentinel())
    }

    /// Number of claimed IDs
    pub fn len(&self) -> u64 {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Claimed IDs in ascending order
    pub fn iter_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.ids.iter_ids()
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Store every blob in `writes` and delete every ID in `deletes` as one
    /// unit, then flush
    ///
    /// Regions given up by the batch are released only after all new blobs
    /// and slots are written, so no new blob lands on data the batch may
    /// still have to restore. A failure before the flush puts the tables,
    /// the slots and any bytes overwritten in place back as they were.
    /// A failed flush, or a failed rollback, poisons the storage.
    pub fn commit_batch(
        &mut self,
        writes: &BTreeMap<ObjectId, Vec<u8>>,
        deletes: &BTreeSet<ObjectId>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let table = self.heap.alloc_table().clone();
        let ids = self.ids.state();
        let mut undo = Vec::new();

        if let Err(e) = self.stage_batch(writes, deletes, &mut undo) {
            match self.roll_back(table, ids, undo) {
                Ok(()) => tracing::warn!("Rolled back batch after: {}", e),
                Err(rollback) => {
                    self.poison(format!("rollback after \"{}\" failed: {}", e, rollback))
                }
            }
            return Err(e);
        }

        if let Err(e) = self.flush() {
            self.poison(format!("flush of a committed batch failed: {}", e));
            return Err(e);
        }
        tracing::debug!(
            "Committed batch of {} writes and {} deletes",
            writes.len(),
            deletes.len()
        );
        Ok(())
    }

    fn stage_batch(
        &mut self,
        writes: &BTreeMap<ObjectId, Vec<u8>>,
        deletes: &BTreeSet<ObjectId>,
        undo: &mut Vec<Undo>,
    ) -> Result<()> {
        let mut released = Vec::new();

        for (&id, blob) in writes {
            let pointer = self.ids.get(&mut self.heap, id)?;
            if !pointer.is_sentinel() && self.fits_in_place(pointer, blob) {
                let framed = LENGTH_PREFIX_SIZE + blob.len() as u64;
                undo.push(Undo::Bytes(pointer.addr, self.heap.read(pointer.addr, framed)?));
                self.write_blob(pointer.addr, blob)?;
                continue;
            }

            let headroom = if pointer.is_sentinel() {
                1.0
            } else {
                released.push(pointer);
                self.object_growth
            };
            let region = self.place(blob, headroom)?;
            undo.push(Undo::Slot(id, pointer));
            self.ids
                .set(&mut self.heap, id, Pointer::new(region.addr, region.size))?;
        }

        for &id in deletes {
            let pointer = self.ids.get(&mut self.heap, id)?;
            undo.push(Undo::Slot(id, pointer));
            self.ids.delete(&mut self.heap, id)?;
            if !pointer.is_sentinel() {
                released.push(pointer);
            }
        }

        for pointer in released {
            self.heap.free(pointer.addr, pointer.size)?;
        }
        Ok(())
    }

    /// Undo a staged batch, newest change first
    fn roll_back(&mut self, table: AllocTab, ids: IdTableState, undo: Vec<Undo>) -> Result<()> {
        self.heap.restore_table(table);
        self.ids.restore(ids);

        for change in undo.into_iter().rev() {
            match change {
                Undo::Slot(id, pointer) => self.ids.set(&mut self.heap, id, pointer)?,
                Undo::Bytes(addr, bytes) => self.heap.write(addr, &bytes)?,
            }
        }
        Ok(())
    }

    fn poison(&mut self, reason: String) {
        tracing::error!("Object storage poisoned: {}", reason);
        self.poisoned = Some(reason);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    fn ensure_writable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(TroveError::Poisoned(reason.clone())),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Persist the ID table bookkeeping and the heap header, then sync
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let state = bincode::serialize(&self.ids.state()).map_err(|e| {
            TroveError::Serialization(format!("Failed to encode ID table state: {}", e))
        })?;
        self.heap.set_metadata(state);
        self.heap.flush()
    }

    /// Flush and release the file handle
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.heap.close()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn stats(&mut self) -> Result<StorageStats> {
        let table = self.heap.alloc_table();
        let (allocated_bytes, free_bytes, fragments) =
            (table.total_allocated(), table.total_free(), table.fragments());

        Ok(StorageStats {
            objects: self.ids.len(),
            id_capacity: self.ids.capacity(),
            file_len: self.heap.file_len()?,
            allocated_bytes,
            free_bytes,
            fragments,
        })
    }

    /// Check both allocation tables
    pub fn check_integrity(&self) -> bool {
        self.heap.alloc_table().check_integrity() && self.ids.check_integrity()
    }

    pub fn heap(&self) -> &FileMem {
        &self.heap
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Pointer of a stored object; the sentinel is an error here
    fn stored_pointer(&mut self, id: ObjectId) -> Result<Pointer> {
        let pointer = self.ids.get(&mut self.heap, id)?;
        if pointer.is_sentinel() {
            return Err(TroveError::InvalidObject(format!(
                "id {} has no stored object",
                id
            )));
        }
        Ok(pointer)
    }

    /// Allocate `headroom * framed size`, write the blob, record the pointer
    fn write_fresh(&mut self, id: ObjectId, blob: &[u8], headroom: f64) -> Result<()> {
        let region = self.place(blob, headroom)?;
        self.ids.set(&mut self.heap, id, Pointer::new(region.addr, region.size))
    }

    /// Allocate `headroom * framed size` and write the blob there
    fn place(&mut self, blob: &[u8], headroom: f64) -> Result<Interval> {
        let needed = LENGTH_PREFIX_SIZE + blob.len() as u64;
        let size = ((needed as f64 * headroom).ceil() as u64).max(needed);
        let region = self.heap.alloc(size)?;

        if let Err(e) = self.write_blob(region.addr, blob) {
            if let Err(cleanup) = self.heap.free(region.addr, region.size) {
                tracing::warn!(
                    "Failed to free [{}, +{}) after a failed write: {}",
                    region.addr,
                    region.size,
                    cleanup
                );
            }
            return Err(e);
        }
        Ok(region)
    }

    /// True if a rewrite of `blob` stays in `pointer`'s allocation
    fn fits_in_place(&self, pointer: Pointer, blob: &[u8]) -> bool {
        let needed = LENGTH_PREFIX_SIZE + blob.len() as u64;
        let shrunk = (needed as f64) < self.shrink_threshold * pointer.size as f64;
        needed <= pointer.size && !shrunk
    }

    fn write_blob(&mut self, addr: u64, blob: &[u8]) -> Result<()> {
        self.heap.write(addr, &(blob.len() as u64).to_le_bytes())?;
        self.heap.write(addr + LENGTH_PREFIX_SIZE, blob)
    }
}
