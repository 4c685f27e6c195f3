//! Persistent heap
//!
//! `malloc`/`free` for byte ranges of the data file. The allocation table
//! itself lives in the file, inside a header slot referenced by the pointer
//! record at offset 0.

use crate::alloc::{AllocTab, Interval};
use crate::config::Config;
use crate::error::{Result, TroveError};

use super::header::{
    decode_frame_prefix, decode_header, decode_pointer, encode_header, encode_pointer,
    FRAME_PREFIX_SIZE, POINTER_RECORD_SIZE,
};
use super::RandomAccessFile;

/// Allocator over the byte space of one file
pub struct FileMem {
    /// Backing file
    raf: RandomAccessFile,

    /// Byte-space allocation table (persisted in the header)
    alloc: AllocTab,

    /// Opaque bookkeeping of the layer above (persisted in the header)
    metadata: Vec<u8>,

    /// Region currently reserved for the header frame, empty before the
    /// first flush of a fresh file
    header_slot: Interval,

    /// Allocation granularity
    block_size: u64,

    /// Greedy allocation slack
    slack: f64,

    /// Header slot growth factor
    header_growth: f64,
}

impl FileMem {
    /// Open the heap in `config.path`, initializing a fresh file if it is
    /// missing or empty
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let raf = RandomAccessFile::open(&config.path)?;

        let mut heap = Self {
            raf,
            alloc: AllocTab::new(),
            metadata: Vec::new(),
            header_slot: Interval::new(0, 0),
            block_size: config.block_size,
            slack: config.greedy_slack,
            header_growth: config.header_growth,
        };

        if heap.raf.is_empty()? {
            heap.alloc.allocate(0, POINTER_RECORD_SIZE)?;
            heap.flush()?;
            tracing::info!("Initialized heap in {}", config.path.display());
        } else {
            heap.load_header()?;
            tracing::info!(
                "Opened heap {} ({} bytes allocated, {} free in {} fragments)",
                config.path.display(),
                heap.alloc.total_allocated(),
                heap.alloc.total_free(),
                heap.alloc.fragments()
            );
        }

        Ok(heap)
    }

    /// Read pointer record, then the header frame it references
    fn load_header(&mut self) -> Result<()> {
        let slot = decode_pointer(&self.raf.get(0, POINTER_RECORD_SIZE)?)?;
        if slot.size < FRAME_PREFIX_SIZE {
            return Err(TroveError::Corruption(format!(
                "Header slot at {} is too small ({} bytes)",
                slot.addr, slot.size
            )));
        }

        let prefix = self.raf.get(slot.addr, FRAME_PREFIX_SIZE)?;
        let (len, crc) = decode_frame_prefix(&prefix)?;
        if len > slot.size - FRAME_PREFIX_SIZE {
            return Err(TroveError::Corruption(format!(
                "Header frame of {} payload bytes overruns its {} byte slot",
                len, slot.size
            )));
        }

        let payload = self.raf.get(slot.addr + FRAME_PREFIX_SIZE, len)?;
        let header = decode_header(&payload, crc)?;

        if !header.alloc.is_allocated(slot.addr, slot.size) {
            return Err(TroveError::Corruption(format!(
                "Header slot [{}, {}) is not allocated in its own table",
                slot.addr,
                slot.end()
            )));
        }

        self.alloc = header.alloc;
        self.metadata = header.metadata;
        self.header_slot = slot;
        Ok(())
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate at least `size` bytes, returning the region handed out
    pub fn alloc(&mut self, size: u64) -> Result<Interval> {
        let rounded = self.round_up(size)?;
        let (addr, taken) = self.alloc.alloc_greedy(rounded, self.slack)?;
        tracing::trace!("alloc {} -> [{}, {})", size, addr, addr + taken);
        Ok(Interval::new(addr, taken))
    }

    /// Release a region previously returned by `alloc`/`realloc`
    pub fn free(&mut self, addr: u64, size: u64) -> Result<()> {
        self.alloc.free(addr, size)?;
        tracing::trace!("free [{}, {})", addr, addr + size);
        Ok(())
    }

    /// Move the region `[addr, addr + size)` to one of at least `new_size`
    /// bytes, keeping the live prefix
    pub fn realloc(&mut self, addr: u64, size: u64, new_size: u64) -> Result<Interval> {
        self.alloc.free(addr, size)?;
        let target = match self.alloc(new_size) {
            Ok(target) => target,
            Err(e) => {
                self.alloc.allocate(addr, size)?;
                return Err(e);
            }
        };

        if target.addr != addr {
            // Bytes past the file end were never written; nothing to carry
            let written = self.raf.len()?.saturating_sub(addr);
            let live = size.min(target.size).min(written);
            self.raf.copy(addr, target.addr, live)?;
            tracing::debug!(
                "realloc [{}, {}) -> [{}, {}), moved {} bytes",
                addr,
                addr + size,
                target.addr,
                target.end(),
                live
            );
        }
        Ok(target)
    }

    fn round_up(&self, size: u64) -> Result<u64> {
        let blocks = size.div_ceil(self.block_size).max(1);
        blocks.checked_mul(self.block_size).ok_or_else(|| {
            TroveError::Allocator(format!("allocation of {} bytes is too large", size))
        })
    }

    // =========================================================================
    // Data Access
    // =========================================================================

    /// Read `size` bytes from inside an allocation
    pub fn read(&mut self, addr: u64, size: u64) -> Result<Vec<u8>> {
        self.check_allocated(addr, size)?;
        self.raf.get(addr, size)
    }

    /// Write `data` inside an allocation
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.check_allocated(addr, data.len() as u64)?;
        self.raf.put(addr, data)
    }

    /// Write `repeats` copies of `pattern` inside an allocation
    pub fn fill(&mut self, addr: u64, repeats: u64, pattern: &[u8]) -> Result<()> {
        let size = repeats.checked_mul(pattern.len() as u64).ok_or_else(|| {
            TroveError::Allocator(format!("fill of {} repeats overflows", repeats))
        })?;
        self.check_allocated(addr, size)?;
        self.raf.fill(addr, repeats, pattern)
    }

    fn check_allocated(&self, addr: u64, size: u64) -> Result<()> {
        if size > 0 && !self.alloc.is_allocated(addr, size) {
            return Err(TroveError::Allocator(format!(
                "access to [{}, {}) outside any allocation",
                addr,
                addr.saturating_add(size)
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Persist the header and sync the file
    ///
    /// The frame is overwritten in place while it fits its slot. Otherwise a
    /// larger slot is allocated (while the old one is still held, so the two
    /// never overlap), the frame is written there, and only then is the
    /// pointer record switched over.
    pub fn flush(&mut self) -> Result<()> {
        let mut relocated = false;
        loop {
            let frame = encode_header(&self.alloc, &self.metadata)?;
            let needed = frame.len() as u64;

            if needed <= self.header_slot.size {
                self.raf.put(self.header_slot.addr, &frame)?;
                if relocated {
                    self.raf.put(0, &encode_pointer(self.header_slot))?;
                }
                break;
            }

            let target_size = (needed as f64 * self.header_growth).ceil() as u64;
            let target = self.alloc(target_size)?;
            let old = std::mem::replace(&mut self.header_slot, target);
            if old.size > 0 {
                self.alloc.free(old.addr, old.size)?;
            }
            relocated = true;
            tracing::info!(
                "Header moved from [{}, {}) to [{}, {}) for a {} byte frame",
                old.addr,
                old.end(),
                target.addr,
                target.end(),
                needed
            );
        }

        self.raf.flush()
    }

    /// Flush and release the file handle
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.raf.close()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    /// Replace the bookkeeping stored alongside the table (persisted on the
    /// next flush)
    pub fn set_metadata(&mut self, metadata: Vec<u8>) {
        self.metadata = metadata;
    }

    pub fn alloc_table(&self) -> &AllocTab {
        &self.alloc
    }

    /// Put back a table snapshot taken since the last flush
    pub fn restore_table(&mut self, alloc: AllocTab) {
        self.alloc = alloc;
    }

    pub fn header_slot(&self) -> Interval {
        self.header_slot
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn file_len(&mut self) -> Result<u64> {
        self.raf.len()
    }

    pub fn path(&self) -> &std::path::Path {
        self.raf.path()
    }
}
