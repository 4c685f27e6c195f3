//! Allocation table implementation
//!
//! Two address-sorted interval lists whose union is exactly `[0, end)`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TroveError};

use super::Interval;

/// Default greedy slack factor
pub const DEFAULT_SLACK: f64 = 1.3;

/// Free/used interval tracker over a flat address space
///
/// ## Invariants
/// - `allocated` and `free` are sorted by address and disjoint
/// - together they cover `[0, end)` with no gap
/// - no two touching intervals belong to the same list
///
/// Every mutating operation validates its arguments before touching either
/// list, so a rejected call leaves the table exactly as it was.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocTab {
    allocated: Vec<Interval>,
    free: Vec<Interval>,
}

impl AllocTab {
    /// Create an empty table (`end() == 0`)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table whose whole space `[0, end)` is free
    pub fn with_free(end: u64) -> Self {
        let mut table = Self::new();
        if end > 0 {
            table.free.push(Interval::new(0, end));
        }
        table
    }

    /// One past the highest tracked address
    pub fn end(&self) -> u64 {
        let a = self.allocated.last().map(Interval::end).unwrap_or(0);
        let f = self.free.last().map(Interval::end).unwrap_or(0);
        a.max(f)
    }

    /// Grow the tracked space to `new_end`, adding the new tail as free
    pub fn extend(&mut self, new_end: u64) -> Result<()> {
        let end = self.end();
        if new_end < end {
            return Err(TroveError::Allocator(format!(
                "cannot shrink table from {} to {}",
                end, new_end
            )));
        }
        if new_end > end {
            insert_merged(&mut self.free, Interval::new(end, new_end - end));
        }
        Ok(())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Mark `[addr, addr + size)` as allocated
    ///
    /// The part of the range below `end()` must be free. The range may run
    /// past `end()` as long as it starts at or before it, which grows the
    /// table.
    pub fn allocate(&mut self, addr: u64, size: u64) -> Result<()> {
        let requested = checked_range(addr, size)?;
        let end = self.end();

        if addr > end {
            return Err(TroveError::Allocator(format!(
                "allocation at {} leaves a gap after end {}",
                addr, end
            )));
        }

        let covered_end = requested.end().min(end);
        if addr < covered_end && containing(&self.free, addr, covered_end - addr).is_none() {
            return Err(TroveError::Allocator(format!(
                "range [{}, {}) is not free",
                addr,
                requested.end()
            )));
        }

        if requested.end() > end {
            insert_merged(&mut self.free, Interval::new(end, requested.end() - end));
        }
        carve(&mut self.free, requested);
        insert_merged(&mut self.allocated, requested);
        Ok(())
    }

    /// Mark `[addr, addr + size)` as free; the range must be allocated
    pub fn free(&mut self, addr: u64, size: u64) -> Result<()> {
        let released = checked_range(addr, size)?;
        if containing(&self.allocated, addr, size).is_none() {
            return Err(TroveError::Allocator(format!(
                "range [{}, {}) is not allocated",
                addr,
                released.end()
            )));
        }

        carve(&mut self.allocated, released);
        insert_merged(&mut self.free, released);
        Ok(())
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// First free interval able to hold `size`, as `(addr, interval size)`
    ///
    /// When nothing fits, the answer is `(end(), size)`: allocate past the
    /// current end.
    pub fn find_free(&self, size: u64) -> Result<(u64, u64)> {
        if size == 0 {
            return Err(TroveError::Allocator("zero-sized request".to_string()));
        }

        Ok(self
            .free
            .iter()
            .find(|iv| iv.size >= size)
            .map(|iv| (iv.addr, iv.size))
            .unwrap_or((self.end(), size)))
    }

    /// Allocate `size` units, taking the whole located interval when the
    /// leftover would be smaller than the slack threshold
    ///
    /// Returns the address and the size actually allocated.
    pub fn alloc_greedy(&mut self, size: u64, slack: f64) -> Result<(u64, u64)> {
        let (addr, available) = self.find_free(size)?;
        let take = if (available as f64) < size as f64 * slack {
            available
        } else {
            size
        };
        self.allocate(addr, take)?;
        Ok((addr, take))
    }

    /// Allocate exactly `size` units at the first fitting address
    pub fn alloc_free(&mut self, size: u64) -> Result<u64> {
        let (addr, _) = self.find_free(size)?;
        self.allocate(addr, size)?;
        Ok(addr)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn is_allocated(&self, addr: u64, size: u64) -> bool {
        size > 0 && containing(&self.allocated, addr, size).is_some()
    }

    pub fn is_free(&self, addr: u64, size: u64) -> bool {
        size > 0 && containing(&self.free, addr, size).is_some()
    }

    pub fn total_allocated(&self) -> u64 {
        self.allocated.iter().map(|iv| iv.size).sum()
    }

    pub fn total_free(&self) -> u64 {
        self.free.iter().map(|iv| iv.size).sum()
    }

    /// Number of free intervals
    pub fn fragments(&self) -> usize {
        self.free.len()
    }

    pub fn allocated(&self) -> &[Interval] {
        &self.allocated
    }

    pub fn free_intervals(&self) -> &[Interval] {
        &self.free
    }

    /// Verify the partition invariants (debugging aid, O(n log n))
    pub fn check_integrity(&self) -> bool {
        let sorted = |list: &[Interval]| list.windows(2).all(|w| w[0].end() < w[1].addr);
        if !sorted(&self.allocated) || !sorted(&self.free) {
            return false;
        }

        let mut all: Vec<(Interval, bool)> = self
            .allocated
            .iter()
            .map(|iv| (*iv, true))
            .chain(self.free.iter().map(|iv| (*iv, false)))
            .collect();
        all.sort_by_key(|(iv, _)| iv.addr);

        let mut cursor = 0;
        let mut previous: Option<bool> = None;
        for (iv, used) in all {
            if iv.size == 0 || iv.addr != cursor || previous == Some(used) {
                return false;
            }
            cursor = iv.end();
            previous = Some(used);
        }
        true
    }
}

// =============================================================================
// Interval List Helpers
// =============================================================================

fn checked_range(addr: u64, size: u64) -> Result<Interval> {
    if size == 0 {
        return Err(TroveError::Allocator(format!("zero-sized range at {}", addr)));
    }
    if addr.checked_add(size).is_none() {
        return Err(TroveError::Allocator(format!(
            "range at {} of size {} overflows the address space",
            addr, size
        )));
    }
    Ok(Interval::new(addr, size))
}

/// Index of the interval holding all of `[addr, addr + size)`
fn containing(list: &[Interval], addr: u64, size: u64) -> Option<usize> {
    let idx = list.partition_point(|iv| iv.addr <= addr);
    if idx == 0 {
        return None;
    }
    list[idx - 1].contains(addr, size).then_some(idx - 1)
}

/// Cut `range` out of the interval containing it (caller validated)
fn carve(list: &mut Vec<Interval>, range: Interval) {
    let Some(idx) = containing(list, range.addr, range.size) else {
        return;
    };
    let host = list[idx];
    let left = Interval::new(host.addr, range.addr - host.addr);
    let right = Interval::new(range.end(), host.end() - range.end());

    match (left.size > 0, right.size > 0) {
        (true, true) => {
            list[idx] = left;
            list.insert(idx + 1, right);
        }
        (true, false) => list[idx] = left,
        (false, true) => list[idx] = right,
        (false, false) => {
            list.remove(idx);
        }
    }
}

/// Insert keeping order, merging with touching neighbours
fn insert_merged(list: &mut Vec<Interval>, mut iv: Interval) {
    let pos = list.partition_point(|x| x.addr < iv.addr);
    if pos < list.len() && list[pos].addr == iv.end() {
        iv.size += list[pos].size;
        list.remove(pos);
    }
    if pos > 0 && list[pos - 1].end() == iv.addr {
        list[pos - 1].size += iv.size;
    } else {
        list.insert(pos, iv);
    }
}
