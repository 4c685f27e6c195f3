//! ID table
//!
//! A growable array of pointers stored as one heap allocation.

use serde::{Deserialize, Serialize};

use crate::alloc::{AllocTab, Interval};
use crate::error::{Result, TroveError};
use crate::heap::FileMem;

use super::{ObjectId, Pointer};

/// Bytes per slot: `(address: u64, size: u64)`
pub const SLOT_WIDTH: u64 = 16;

/// Persisted bookkeeping of an [`IdTable`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTableState {
    /// Heap region holding the slot array
    pub region: Interval,

    /// Number of slots in the array
    pub capacity: u64,

    /// Index-space allocation table over `[0, capacity)`
    pub slots: AllocTab,
}

/// Maps object IDs to heap pointers
///
/// A second [`AllocTab`] tracks which indices are in use, so deleted IDs
/// are handed out again (lowest first) instead of growing the array.
pub struct IdTable {
    region: Interval,
    capacity: u64,
    slots: AllocTab,
    growth: f64,
}

impl IdTable {
    /// Allocate a fresh table with `capacity` empty slots
    pub fn create(heap: &mut FileMem, capacity: u64, growth: f64) -> Result<Self> {
        let region = heap.alloc(capacity * SLOT_WIDTH)?;
        heap.fill(region.addr, capacity, &Pointer::SENTINEL.to_bytes())?;
        tracing::debug!(
            "Created ID table with {} slots at [{}, {})",
            capacity,
            region.addr,
            region.end()
        );

        Ok(Self {
            region,
            capacity,
            slots: AllocTab::with_free(capacity),
            growth,
        })
    }

    /// Rebuild a table from its persisted bookkeeping
    pub fn from_state(state: IdTableState, growth: f64) -> Result<Self> {
        if state.slots.end() != state.capacity
            || state.region.size < state.capacity * SLOT_WIDTH
        {
            return Err(TroveError::Corruption(format!(
                "ID table state inconsistent: capacity {}, index space {}, region {} bytes",
                state.capacity,
                state.slots.end(),
                state.region.size
            )));
        }

        Ok(Self {
            region: state.region,
            capacity: state.capacity,
            slots: state.slots,
            growth,
        })
    }

    /// Snapshot of the bookkeeping to persist
    pub fn state(&self) -> IdTableState {
        IdTableState {
            region: self.region,
            capacity: self.capacity,
            slots: self.slots.clone(),
        }
    }

    /// Put back bookkeeping captured by `state` on this same table
    pub fn restore(&mut self, state: IdTableState) {
        self.region = state.region;
        self.capacity = state.capacity;
        self.slots = state.slots;
    }

    // =========================================================================
    // Slot Lifecycle
    // =========================================================================

    /// Claim the lowest free ID; its slot starts out as the sentinel
    pub fn new_id(&mut self, heap: &mut FileMem) -> Result<ObjectId> {
        if self.slots.total_free() == 0 {
            self.grow(heap)?;
        }

        let id = self.slots.alloc_free(1)?;
        self.write_slot(heap, id, Pointer::SENTINEL)?;
        Ok(id)
    }

    /// Read the pointer stored for `id`
    pub fn get(&self, heap: &mut FileMem, id: ObjectId) -> Result<Pointer> {
        self.check_id(id)?;
        let raw = heap.read(self.slot_addr(id), SLOT_WIDTH)?;
        let mut slot = [0u8; SLOT_WIDTH as usize];
        slot.copy_from_slice(&raw);
        Ok(Pointer::from_bytes(&slot))
    }

    /// Store a pointer for `id`
    pub fn set(&mut self, heap: &mut FileMem, id: ObjectId, pointer: Pointer) -> Result<()> {
        self.check_id(id)?;
        self.write_slot(heap, id, pointer)
    }

    /// Reset the slot to the sentinel and return the index to the free pool
    pub fn delete(&mut self, heap: &mut FileMem, id: ObjectId) -> Result<()> {
        self.check_id(id)?;
        self.write_slot(heap, id, Pointer::SENTINEL)?;
        self.slots.free(id, 1)
    }

    fn grow(&mut self, heap: &mut FileMem) -> Result<()> {
        let wanted = (self.capacity as f64 * self.growth).ceil() as u64;
        let new_capacity = wanted.max(self.capacity + 1);

        let region = heap.realloc(self.region.addr, self.region.size, new_capacity * SLOT_WIDTH)?;
        heap.fill(
            region.addr + self.capacity * SLOT_WIDTH,
            new_capacity - self.capacity,
            &Pointer::SENTINEL.to_bytes(),
        )?;
        self.slots.extend(new_capacity)?;

        tracing::info!(
            "ID table grew from {} to {} slots, now at [{}, {})",
            self.capacity,
            new_capacity,
            region.addr,
            region.end()
        );
        self.region = region;
        self.capacity = new_capacity;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// True if `id` is a claimed index
    pub fn is_allocated(&self, id: ObjectId) -> bool {
        id < self.capacity && self.slots.is_allocated(id, 1)
    }

    /// Number of claimed IDs
    pub fn len(&self) -> u64 {
        self.slots.total_allocated()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn region(&self) -> Interval {
        self.region
    }

    /// Claimed IDs in ascending order
    pub fn iter_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots
            .allocated()
            .iter()
            .flat_map(|iv| iv.addr..iv.end())
    }

    pub fn check_integrity(&self) -> bool {
        self.slots.end() == self.capacity && self.slots.check_integrity()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_id(&self, id: ObjectId) -> Result<()> {
        if id >= self.capacity {
            return Err(TroveError::InvalidObject(format!(
                "id {} out of range (capacity {})",
                id, self.capacity
            )));
        }
        if !self.slots.is_allocated(id, 1) {
            return Err(TroveError::InvalidObject(format!("id {} is not allocated", id)));
        }
        Ok(())
    }

    fn slot_addr(&self, id: ObjectId) -> u64 {
        self.region.addr + id * SLOT_WIDTH
    }

    fn write_slot(&self, heap: &mut FileMem, id: ObjectId, pointer: Pointer) -> Result<()> {
        heap.write(self.slot_addr(id), &pointer.to_bytes())
    }
}
