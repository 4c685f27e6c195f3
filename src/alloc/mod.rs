//! Allocation Table Module
//!
//! In-memory bookkeeping of which ranges of a flat address space are in use.
//!
//! ## Responsibilities
//! - Track allocated and free intervals over `[0, end)`
//! - Find and hand out free space (first fit, with a greedy variant)
//! - Keep same-kind neighbours merged so the table stays small
//!
//! ## Layout
//! ```text
//!  0                                                          end
//!  ├──────────┬─────────┬──────────────────┬──────┬────────────┤
//!  │ allocated│  free   │    allocated     │ free │ allocated  │
//!  └──────────┴─────────┴──────────────────┴──────┴────────────┘
//! ```
//!
//! The table does no I/O. The heap uses it over byte offsets of the data
//! file; the ID table uses a second instance over slot indices.

mod table;

use serde::{Deserialize, Serialize};

pub use table::{AllocTab, DEFAULT_SLACK};

/// A half-open range `[addr, addr + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// First address of the range
    pub addr: u64,

    /// Number of addresses in the range
    pub size: u64,
}

impl Interval {
    pub fn new(addr: u64, size: u64) -> Self {
        Self { addr, size }
    }

    /// One past the last address
    pub fn end(&self) -> u64 {
        self.addr + self.size
    }

    /// True if `[addr, addr + size)` lies entirely inside this interval
    pub fn contains(&self, addr: u64, size: u64) -> bool {
        match addr.checked_add(size) {
            Some(end) => addr >= self.addr && end <= self.end(),
            None => false,
        }
    }
}
