//! Heap Module
//!
//! Persistent `alloc`/`realloc`/`free` of byte ranges inside one file.
//!
//! ## Responsibilities
//! - Positioned file I/O (`RandomAccessFile`)
//! - Block-rounded, greedy allocation over the file's byte space
//! - Persisting the allocation table (plus the caller's bookkeeping) in a
//!   checksummed header that relocates itself when it outgrows its slot
//!
//! ## File Layout
//! ```text
//! ┌───────────────────┬──────────────────────────────────────────────┐
//! │ Pointer (16)      │ allocated / free regions ...                 │
//! │ (addr, size) ─────┼──▶ header slot: [frame][slack]               │
//! └───────────────────┴──────────────────────────────────────────────┘
//! ```

mod filemem;
mod header;
mod raf;

pub use filemem::FileMem;
pub use header::{FORMAT_VERSION, FRAME_PREFIX_SIZE, MAGIC, POINTER_RECORD_SIZE};
pub use raf::{RandomAccessFile, CHUNK_SIZE};
