//! Tests for file space and drivers
//!
//! These tests verify:
//! - Best-fit reuse of freed extents and end-of-file growth
//! - Coalescing and tail release on free
//! - Rejection of bad frees, zero-length and over-limit allocations
//! - In-memory and filesystem drivers

use metacache::io::{FileDriver, FreeSpace, FsDriver, MemoryImage};
use metacache::CacheError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// a=512+64, b=576+128, c=704+64, d=768+32
fn four_allocations() -> (FreeSpace, [u64; 4]) {
    let mut space = FreeSpace::new(512, 512);
    let a = space.allocate(64).unwrap();
    let b = space.allocate(128).unwrap();
    let c = space.allocate(64).unwrap();
    let d = space.allocate(32).unwrap();
    (space, [a, b, c, d])
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_allocations_grow_end_of_file() {
    let (space, addrs) = four_allocations();
    assert_eq!(addrs, [512, 576, 704, 768]);
    assert_eq!(space.eoa(), 800);
    assert_eq!(space.free_bytes(), 0);
}

#[test]
fn test_freed_extent_is_reused_best_fit() {
    let (mut space, [a, b, _c, _d]) = four_allocations();
    space.free(b, 128).unwrap();

    assert_eq!(space.allocate(100).unwrap(), b);
    assert_eq!(space.free_extents().collect::<Vec<_>>(), vec![(b + 100, 28)]);

    space.free(a, 64).unwrap();
    // 28-byte extent is the tighter fit
    assert_eq!(space.allocate(20).unwrap(), b + 100);
    assert_eq!(space.eoa(), 800);
}

#[test]
fn test_free_coalesces_neighbours() {
    let (mut space, [a, b, _c, _d]) = four_allocations();
    space.free(a, 64).unwrap();
    space.free(b, 128).unwrap();

    assert_eq!(space.free_extents().collect::<Vec<_>>(), vec![(512, 192)]);
    assert_eq!(space.free_bytes(), 192);
}

#[test]
fn test_free_at_end_lowers_eoa() {
    let (mut space, [_a, b, c, d]) = four_allocations();
    space.free(b, 128).unwrap();
    space.free(d, 32).unwrap();
    assert_eq!(space.eoa(), 768);

    // c joins b and the merged extent ends at eoa
    space.free(c, 64).unwrap();
    assert_eq!(space.eoa(), 576);
    assert_eq!(space.free_bytes(), 0);
}

#[test]
fn test_bad_frees_are_rejected() {
    let (mut space, [a, ..]) = four_allocations();

    space.free(a, 64).unwrap();
    assert!(matches!(space.free(a, 64), Err(CacheError::AllocationFailure(_))));
    assert!(matches!(space.free(a + 16, 8), Err(CacheError::AllocationFailure(_))));
    assert!(matches!(space.free(0, 64), Err(CacheError::AllocationFailure(_))));
    assert!(matches!(space.free(790, 64), Err(CacheError::AllocationFailure(_))));
}

#[test]
fn test_zero_length_allocation() {
    let mut space = FreeSpace::new(512, 512);
    assert!(matches!(space.allocate(0), Err(CacheError::AllocationFailure(_))));
}

#[test]
fn test_size_limit() {
    let mut space = FreeSpace::new(512, 512).with_limit(Some(1024));

    assert!(matches!(space.allocate(600), Err(CacheError::AllocationFailure(_))));
    assert_eq!(space.allocate(512).unwrap(), 512);
    assert_eq!(space.eoa(), 1024);
    assert!(space.allocate(1).is_err());
}

// =============================================================================
// Driver Tests
// =============================================================================

#[test]
fn test_memory_driver_read_write() {
    let image = MemoryImage::new();
    let mut driver = image.driver(false);

    driver.write_at(10, b"hello").unwrap();
    assert_eq!(driver.size().unwrap(), 15);

    let mut buf = [0u8; 5];
    driver.read_at(10, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    // shared with other drivers over the same image
    let mut reader = image.driver(true);
    reader.read_at(10, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
    assert_eq!(&image.snapshot()[10..], b"hello");
}

#[test]
fn test_memory_driver_read_past_end() {
    let image = MemoryImage::new();
    let mut driver = image.driver(false);
    driver.write_at(0, &[1, 2, 3]).unwrap();

    let mut buf = [0u8; 4];
    assert!(matches!(driver.read_at(0, &mut buf), Err(CacheError::Io(_))));
}

#[test]
fn test_memory_driver_read_only() {
    let image = MemoryImage::new();
    let mut driver = image.driver(true);

    assert!(driver.is_read_only());
    assert!(matches!(driver.write_at(0, b"x"), Err(CacheError::ReadOnly)));
    assert!(image.is_empty());
}

#[test]
fn test_fs_driver_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("space.mdc");

    let mut driver = FsDriver::create(&path).unwrap();
    driver.write_at(0, b"header").unwrap();
    driver.write_at(100, b"tail").unwrap();
    driver.sync().unwrap();
    assert_eq!(driver.size().unwrap(), 104);
    drop(driver);

    let mut reader = FsDriver::open(&path, true).unwrap();
    assert_eq!(reader.path(), path.as_path());
    let mut buf = [0u8; 4];
    reader.read_at(100, &mut buf).unwrap();
    assert_eq!(&buf, b"tail");
    assert!(matches!(reader.write_at(0, b"x"), Err(CacheError::ReadOnly)));
}

#[test]
fn test_fs_driver_open_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = FsDriver::open(temp_dir.path().join("missing.mdc"), false);
    assert!(matches!(result, Err(CacheError::Io(_))));
}
