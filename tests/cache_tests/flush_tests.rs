//! Tests for cache write-back
//!
//! These tests verify:
//! - Flushing is idempotent for clean entries
//! - Whole-cache flushes visit entries in address order with one barrier
//! - A failing entry does not stop the others from being written
//! - A whole flush fails exactly when a checkout is outstanding, and a
//!   single-address flush fails when that address is checked out
//! - Kind / address filters, destroying flushes and teardown

#[path = "../common/mod.rs"]
mod common;

use common::MockClient;
use metacache::cache::{AddrFilter, CacheStore, EntryKind};
use metacache::CacheError;

const KIND: EntryKind = EntryKind::BTreeNode;

// =============================================================================
// Helper Functions
// =============================================================================

fn cache_with_dirty(client: &mut MockClient, nslots: usize, addrs: &[u64]) -> CacheStore<Vec<u8>> {
    let mut cache = CacheStore::new(nslots);
    for &addr in addrs {
        cache.insert(client, KIND, addr, vec![addr as u8]).unwrap();
    }
    cache
}

// =============================================================================
// Idempotence Tests
// =============================================================================

#[test]
fn test_flush_single_entry_twice_writes_once() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1]);

    cache.flush(&mut client, None, AddrFilter::Only(0x1), false).unwrap();
    cache.flush(&mut client, None, AddrFilter::Only(0x1), false).unwrap();

    assert_eq!(client.flushed_addrs(), vec![0x1]);
    assert!(cache.contains(0x1));
    assert_eq!(cache.dirty_count(), 0);
}

#[test]
fn test_whole_flush_twice_writes_once() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1, 0x2, 0x3]);

    cache.flush(&mut client, None, AddrFilter::All, false).unwrap();
    cache.flush(&mut client, None, AddrFilter::All, false).unwrap();

    assert_eq!(client.flushes.len(), 3);
    assert_eq!(cache.len(), 3);
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_whole_flush_in_address_order() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 64, &[40, 3, 17, 9]);

    cache.flush(&mut client, None, AddrFilter::All, false).unwrap();

    assert_eq!(client.flushed_addrs(), vec![3, 9, 17, 40]);
    let barriers: Vec<bool> = client.flushes.iter().map(|(_, b)| *b).collect();
    assert_eq!(barriers, vec![true, false, false, false]);
}

#[test]
fn test_unsorted_flush_follows_bucket_order() {
    let mut client = MockClient::new();
    let mut cache = CacheStore::new(8).with_sorted_flush(false);
    for addr in [9u64, 3, 16] {
        cache.insert(&mut client, KIND, addr, vec![1]).unwrap();
    }

    cache.flush(&mut client, None, AddrFilter::All, false).unwrap();

    // buckets 0, 1, 3
    assert_eq!(client.flushed_addrs(), vec![16, 9, 3]);
}

#[test]
fn test_barrier_goes_to_first_actual_write() {
    let mut client = MockClient::with_objects(&[(0x1, b"clean")]);
    let mut cache = CacheStore::new(64);
    cache.find_or_load(&mut client, KIND, 0x1, &()).unwrap();
    cache.insert(&mut client, KIND, 0x5, vec![5]).unwrap();
    cache.insert(&mut client, KIND, 0x7, vec![7]).unwrap();

    cache.flush(&mut client, None, AddrFilter::All, false).unwrap();

    assert_eq!(client.flushes, vec![(0x5, true), (0x7, false)]);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_flush_continues_after_failure() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1, 0x2, 0x3]);
    client.fail_flush.insert(0x2);

    let err = cache.flush(&mut client, None, AddrFilter::All, false).unwrap_err();
    assert!(matches!(err, CacheError::FlushFailure { addr: 0x2, .. }));
    assert_eq!(client.flushed_addrs(), vec![0x1, 0x3]);
    assert!(cache.entry_info(0x2).unwrap().dirty);
    assert_eq!(cache.dirty_count(), 1);

    client.fail_flush.clear();
    cache.flush(&mut client, None, AddrFilter::All, false).unwrap();
    assert_eq!(client.flushed_addrs(), vec![0x1, 0x3, 0x2]);
    assert_eq!(cache.dirty_count(), 0);
}

#[test]
fn test_destroying_flush_keeps_failed_entry() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1, 0x2]);
    client.fail_flush.insert(0x1);

    assert!(cache.flush(&mut client, None, AddrFilter::All, true).is_err());

    assert!(cache.contains(0x1));
    assert!(!cache.contains(0x2));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_whole_flush_fails_while_checked_out() {
    let mut client = MockClient::with_objects(&[(0x3, b"c")]);
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1, 0x2]);
    let handle = cache.protect(&mut client, KIND, 0x3, &()).unwrap();

    let err = cache.flush(&mut client, None, AddrFilter::All, false).unwrap_err();
    assert!(err.is_protect_violation());
    // everything else was still written
    assert_eq!(client.flushed_addrs(), vec![0x1, 0x2]);

    // still failing on a clean cache
    let err = cache.flush(&mut client, None, AddrFilter::All, false).unwrap_err();
    assert!(err.is_protect_violation());

    cache.unprotect(&mut client, handle, false).unwrap();
    cache.flush(&mut client, None, AddrFilter::All, false).unwrap();
}

#[test]
fn test_single_address_flush_rejects_checked_out_entry() {
    let mut client = MockClient::with_objects(&[(0x40, b"x")]);
    let mut cache = CacheStore::new(16);
    let handle = cache.protect(&mut client, KIND, 0x40, &()).unwrap();

    for destroy in [false, true] {
        let err = cache
            .flush(&mut client, None, AddrFilter::Only(0x40), destroy)
            .unwrap_err();
        assert!(err.is_protect_violation());
    }
    let err = cache
        .flush(&mut client, Some(EntryKind::LocalHeap), AddrFilter::Only(0x40), true)
        .unwrap_err();
    assert!(err.is_protect_violation());
    assert!(client.flushes.is_empty());

    cache.unprotect(&mut client, handle, true).unwrap();
    cache.flush(&mut client, None, AddrFilter::Only(0x40), true).unwrap();
    assert_eq!(client.flushed_addrs(), vec![0x40]);
    assert!(cache.entry(0x40).is_none());
}

#[test]
fn test_kind_filtered_flush_still_checks_checkouts() {
    let mut client = MockClient::with_objects(&[(0x3, b"c")]);
    let mut cache = CacheStore::new(16);
    let handle = cache.protect(&mut client, EntryKind::LocalHeap, 0x3, &()).unwrap();

    let err = cache
        .flush(&mut client, Some(EntryKind::BTreeNode), AddrFilter::All, false)
        .unwrap_err();
    assert!(err.is_protect_violation());

    cache.unprotect(&mut client, handle, false).unwrap();
}

// =============================================================================
// Filter Tests
// =============================================================================

#[test]
fn test_kind_filter_limits_writes() {
    let mut client = MockClient::new();
    let mut cache = CacheStore::new(16);
    cache.insert(&mut client, EntryKind::BTreeNode, 0x1, vec![1]).unwrap();
    cache.insert(&mut client, EntryKind::LocalHeap, 0x2, vec![2]).unwrap();

    cache
        .flush(&mut client, Some(EntryKind::LocalHeap), AddrFilter::All, false)
        .unwrap();

    assert_eq!(client.flushed_addrs(), vec![0x2]);
    assert!(cache.entry_info(0x1).unwrap().dirty);
}

#[test]
fn test_single_address_with_other_kind_is_skipped() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1]);

    cache
        .flush(&mut client, Some(EntryKind::LocalHeap), AddrFilter::Only(0x1), true)
        .unwrap();

    assert!(client.flushes.is_empty());
    assert!(cache.contains(0x1));
}

// =============================================================================
// Destroy / Teardown Tests
// =============================================================================

#[test]
fn test_destroying_flush_empties_cache() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1, 0x2]);

    cache.flush(&mut client, None, AddrFilter::All, true).unwrap();

    assert!(cache.is_empty());
    assert_eq!(cache.dirty_count(), 0);
    assert_eq!(client.frees.len(), 2);
    assert_eq!(client.disk.len(), 2);
}

#[test]
fn test_destroying_flush_keeps_pinned_entries() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1, 0x2]);
    cache.pin(0x1).unwrap();

    cache.flush(&mut client, None, AddrFilter::All, true).unwrap();
    cache.flush(&mut client, None, AddrFilter::Only(0x1), true).unwrap();

    assert!(cache.contains(0x1));
    assert!(!cache.contains(0x2));
    assert!(!cache.entry_info(0x1).unwrap().dirty);
    assert_eq!(client.flushes.len(), 2);
}

#[test]
fn test_teardown_unpins_and_empties() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1, 0x2]);
    cache.pin(0x1).unwrap();

    cache.teardown(&mut client).unwrap();

    assert!(cache.is_empty());
    assert_eq!(client.flushes.len(), 2);
}

#[test]
fn test_teardown_reports_outstanding_checkout() {
    let mut client = MockClient::new();
    let mut cache = cache_with_dirty(&mut client, 16, &[0x1, 0x2]);
    let _handle = cache.protect(&mut client, KIND, 0x2, &()).unwrap();

    let err = cache.teardown(&mut client).unwrap_err();
    assert!(err.is_protect_violation());
    assert!(cache.is_empty());
    assert!(cache.is_protected(0x2));
}
