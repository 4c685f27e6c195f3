//! Objects Module
//!
//! Opaque byte blobs keyed by small integer IDs.
//!
//! ## Responsibilities
//! - Map IDs to heap pointers through a growable, persisted ID table
//! - Recycle the indices of deleted IDs
//! - Store, resize and free object blobs inside the heap
//!
//! ## ID Table Slot
//! ```text
//! ┌──────────────┬──────────────┐
//! │ Address (8)  │   Size (8)   │   (0, 0) = no object stored
//! └──────────────┴──────────────┘
//! ```
//!
//! ## Object Allocation
//! ```text
//! ┌──────────────┬─────────────────────────┬───────────┐
//! │ Blob Len (8) │          Blob           │  slack    │
//! └──────────────┴─────────────────────────┴───────────┘
//! ```

mod id_table;
mod storage;

pub use id_table::{IdTable, IdTableState, SLOT_WIDTH};
pub use storage::{ObjectStorage, StorageStats, LENGTH_PREFIX_SIZE};

/// Identifier of a stored object
pub type ObjectId = u64;

/// Location of an object's allocation inside the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub addr: u64,
    pub size: u64,
}

impl Pointer {
    /// Marks an ID whose slot holds no object
    pub const SENTINEL: Pointer = Pointer { addr: 0, size: 0 };

    pub fn new(addr: u64, size: u64) -> Self {
        Self { addr, size }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    pub fn to_bytes(self) -> [u8; SLOT_WIDTH as usize] {
        let mut slot = [0u8; SLOT_WIDTH as usize];
        slot[0..8].copy_from_slice(&self.addr.to_le_bytes());
        slot[8..16].copy_from_slice(&self.size.to_le_bytes());
        slot
    }

    pub fn from_bytes(slot: &[u8; SLOT_WIDTH as usize]) -> Self {
        let mut addr = [0u8; 8];
        let mut size = [0u8; 8];
        addr.copy_from_slice(&slot[0..8]);
        size.copy_from_slice(&slot[8..16]);
        Self::new(u64::from_le_bytes(addr), u64::from_le_bytes(size))
    }
}
