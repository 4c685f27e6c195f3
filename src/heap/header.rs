//! Heap header encoding
//!
//! ## Pointer Record (file offset 0)
//! ```text
//! ┌──────────────────┬──────────────────┐
//! │ Slot Address (8) │  Slot Size (8)   │
//! └──────────────────┴──────────────────┘
//! ```
//!
//! ## Header Frame (inside the slot)
//! ```text
//! ┌──────────┬──────────┬─────────┬─────────┬──────────────────────┐
//! │Magic (4) │Version(2)│ Len (8) │ CRC (4) │ bincode(Header)      │
//! └──────────┴──────────┴─────────┴─────────┴──────────────────────┘
//! ```
//! The slot may be larger than the frame; bytes after the payload are
//! undefined.

use serde::{Deserialize, Serialize};

use crate::alloc::{AllocTab, Interval};
use crate::error::{Result, TroveError};

/// Magic bytes identifying a Trove header frame
pub const MAGIC: &[u8; 4] = b"TROV";

/// Current header format version
pub const FORMAT_VERSION: u16 = 1;

/// Size of the fixed pointer record at offset 0
pub const POINTER_RECORD_SIZE: u64 = 16;

/// Magic + version + length + CRC
pub const FRAME_PREFIX_SIZE: u64 = 4 + 2 + 8 + 4;

/// Decoded header contents
#[derive(Debug, Deserialize)]
pub struct Header {
    /// Byte-space allocation table of the file
    pub alloc: AllocTab,

    /// Opaque bookkeeping owned by the layer above the heap
    pub metadata: Vec<u8>,
}

/// Borrowed view used for encoding without cloning the table
#[derive(Serialize)]
struct HeaderRef<'a> {
    alloc: &'a AllocTab,
    metadata: &'a [u8],
}

/// Encode a header frame
pub fn encode_header(alloc: &AllocTab, metadata: &[u8]) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&HeaderRef { alloc, metadata })
        .map_err(|e| TroveError::Serialization(format!("Failed to encode header: {}", e)))?;

    let mut frame = Vec::with_capacity(FRAME_PREFIX_SIZE as usize + payload.len());
    frame.extend_from_slice(MAGIC);
    frame.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Parse the fixed frame prefix, returning the payload length and CRC
pub fn decode_frame_prefix(prefix: &[u8]) -> Result<(u64, u32)> {
    if (prefix.len() as u64) < FRAME_PREFIX_SIZE {
        return Err(TroveError::Corruption(format!(
            "Header prefix too short: {} bytes",
            prefix.len()
        )));
    }
    if &prefix[0..4] != MAGIC {
        return Err(TroveError::Corruption(format!(
            "Invalid header magic: expected TROV, got {:?}",
            &prefix[0..4]
        )));
    }

    let version = u16::from_le_bytes([prefix[4], prefix[5]]);
    if version != FORMAT_VERSION {
        return Err(TroveError::Corruption(format!(
            "Unsupported header version: {}",
            version
        )));
    }

    let len = read_u64(&prefix[6..14]);
    let crc = u32::from_le_bytes([prefix[14], prefix[15], prefix[16], prefix[17]]);
    Ok((len, crc))
}

/// Verify and decode a header payload
pub fn decode_header(payload: &[u8], expected_crc: u32) -> Result<Header> {
    let actual = crc32fast::hash(payload);
    if actual != expected_crc {
        return Err(TroveError::Corruption(format!(
            "Header checksum mismatch: expected {:#010x}, got {:#010x}",
            expected_crc, actual
        )));
    }
    bincode::deserialize(payload)
        .map_err(|e| TroveError::Corruption(format!("Failed to decode header: {}", e)))
}

/// Encode the pointer record for a header slot
pub fn encode_pointer(slot: Interval) -> [u8; POINTER_RECORD_SIZE as usize] {
    let mut record = [0u8; POINTER_RECORD_SIZE as usize];
    record[0..8].copy_from_slice(&slot.addr.to_le_bytes());
    record[8..16].copy_from_slice(&slot.size.to_le_bytes());
    record
}

/// Decode the pointer record at offset 0
pub fn decode_pointer(record: &[u8]) -> Result<Interval> {
    if (record.len() as u64) < POINTER_RECORD_SIZE {
        return Err(TroveError::Corruption(format!(
            "Pointer record too short: {} bytes",
            record.len()
        )));
    }
    Ok(Interval::new(read_u64(&record[0..8]), read_u64(&record[8..16])))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
