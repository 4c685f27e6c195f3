//! Tests for RandomAccessFile
//!
//! These tests verify:
//! - Positioned reads and writes, short reads past the end
//! - Append, fill and streamed writes
//! - Overlap-safe copy and swap
//! - Transparent reopen after close

use std::io::Cursor;
use std::path::PathBuf;

use tempfile::TempDir;
use trove::heap::{RandomAccessFile, CHUNK_SIZE};
use trove::TroveError;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_file() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.raf");
    (temp_dir, path)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Read / Write Tests
// =============================================================================

#[test]
fn test_open_creates_empty_file() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();

    assert!(path.exists());
    assert!(raf.is_empty().unwrap());
    assert_eq!(raf.path(), path.as_path());
}

#[test]
fn test_put_get() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();

    raf.put(10, b"hello").unwrap();

    assert_eq!(raf.get(10, 5).unwrap(), b"hello");
    assert_eq!(raf.get(0, 10).unwrap(), vec![0u8; 10]);
    assert_eq!(raf.len().unwrap(), 15);
}

#[test]
fn test_get_past_end_is_short_read() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    raf.put(0, b"abc").unwrap();

    match raf.get(1, 10) {
        Err(TroveError::ShortRead {
            addr,
            expected,
            actual,
        }) => {
            assert_eq!(addr, 1);
            assert_eq!(expected, 10);
            assert_eq!(actual, 2);
        }
        other => panic!("expected ShortRead, got {:?}", other),
    }
}

#[test]
fn test_get_oversized_request_is_short_read() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    raf.put(0, b"abc").unwrap();

    match raf.get(0, u64::MAX) {
        Err(TroveError::ShortRead { actual, .. }) => assert_eq!(actual, 3),
        other => panic!("expected ShortRead, got {:?}", other),
    }
    assert!(matches!(
        raf.get(100, u64::MAX),
        Err(TroveError::ShortRead { actual: 0, .. })
    ));
}

#[test]
fn test_append_returns_address() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();

    assert_eq!(raf.append(b"first").unwrap(), 0);
    assert_eq!(raf.append(b"second").unwrap(), 5);
    assert_eq!(raf.get(5, 6).unwrap(), b"second");
}

#[test]
fn test_put_streamed() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    let data = pattern(1000);

    raf.put_streamed(4, &mut Cursor::new(&data), 600).unwrap();

    assert_eq!(raf.get(4, 600).unwrap(), &data[..600]);
    assert_eq!(raf.len().unwrap(), 604);
}

#[test]
fn test_put_streamed_short_source() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();

    let result = raf.put_streamed(0, &mut Cursor::new(b"tiny".to_vec()), 10);

    assert!(matches!(
        result,
        Err(TroveError::ShortRead {
            expected: 10,
            actual: 4,
            ..
        })
    ));
}

// =============================================================================
// Fill Tests
// =============================================================================

#[test]
fn test_fill_repeats_pattern() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();

    raf.fill(3, 100, b"ab").unwrap();

    assert_eq!(raf.get(3, 200).unwrap(), b"ab".repeat(100));
}

#[test]
fn test_fill_larger_than_chunk() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    let repeats = CHUNK_SIZE * 2 + 3;

    raf.fill(0, repeats, &[7]).unwrap();

    assert_eq!(raf.len().unwrap(), repeats);
    assert!(raf.get(CHUNK_SIZE - 2, 8).unwrap().iter().all(|b| *b == 7));
    assert_eq!(raf.get(repeats - 1, 1).unwrap(), vec![7]);
}

#[test]
fn test_fill_nothing() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();

    raf.fill(100, 0, b"xyz").unwrap();
    raf.fill(100, 5, b"").unwrap();

    assert!(raf.is_empty().unwrap());
}

// =============================================================================
// Copy / Swap Tests
// =============================================================================

#[test]
fn test_copy_disjoint() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    raf.put(0, b"0123456789").unwrap();

    raf.copy(0, 20, 10).unwrap();

    assert_eq!(raf.get(20, 10).unwrap(), b"0123456789");
}

#[test]
fn test_copy_overlapping_forward() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    let data = pattern(3 * CHUNK_SIZE as usize);
    raf.put(0, &data).unwrap();

    // Destination starts inside the source
    raf.copy(0, 1000, data.len() as u64).unwrap();

    assert_eq!(raf.get(1000, data.len() as u64).unwrap(), data);
}

#[test]
fn test_copy_overlapping_backward() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    let data = pattern(2 * CHUNK_SIZE as usize + 17);
    raf.put(500, &data).unwrap();

    raf.copy(500, 0, data.len() as u64).unwrap();

    assert_eq!(raf.get(0, data.len() as u64).unwrap(), data);
}

#[test]
fn test_swap() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    raf.put(0, b"aaaa").unwrap();
    raf.put(8, b"bbbb").unwrap();

    raf.swap(0, 8, 4).unwrap();

    assert_eq!(raf.get(0, 4).unwrap(), b"bbbb");
    assert_eq!(raf.get(8, 4).unwrap(), b"aaaa");
}

#[test]
fn test_swap_overlapping_fails() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    raf.put(0, b"abcdefgh").unwrap();

    assert!(raf.swap(0, 2, 4).is_err());
    assert_eq!(raf.get(0, 8).unwrap(), b"abcdefgh");
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_close_then_reopen_on_access() {
    let (_temp, path) = setup_temp_file();
    let mut raf = RandomAccessFile::open(&path).unwrap();
    raf.put(0, b"persisted").unwrap();

    raf.close().unwrap();
    assert!(!raf.is_open());

    assert_eq!(raf.get(0, 9).unwrap(), b"persisted");
    assert!(raf.is_open());
}

#[test]
fn test_data_survives_new_handle() {
    let (_temp, path) = setup_temp_file();
    {
        let mut raf = RandomAccessFile::open(&path).unwrap();
        raf.put(0, b"durable").unwrap();
        raf.flush().unwrap();
    }

    let mut raf = RandomAccessFile::open(&path).unwrap();
    assert_eq!(raf.get(0, 7).unwrap(), b"durable");
}
