//! Tests for building and consuming cache images against a mock client
//!
//! These tests verify:
//! - An image written at close repopulates a fresh cache without loads
//! - Eligibility (prefetched entries, inclusion flags, predicate)
//! - Size limits, message-only mode and allocation / write failures
//! - Lazy loading, corruption handling and close-time finish
//! - Live entries always win over image records

#[path = "../common/mod.rs"]
mod common;

use common::{MockClient, Payload};
use metacache::cache::{Addr, CacheStore, EntryKind, KindSet};
use metacache::image::{release_retired_image, ImageBlock, ImageBuilder, ImageLoader, ImageState};
use metacache::superblock::ImageMessage;
use metacache::{CacheError, CacheImageConfig, ImageFlags};

const ENTRIES: usize = 6;

// =============================================================================
// Helper Functions
// =============================================================================

fn entry_kind(i: usize) -> EntryKind {
    [EntryKind::BTreeNode, EntryKind::LocalHeap, EntryKind::ObjectHeader][i % 3]
}

fn entry_addr(i: usize) -> Addr {
    // distinct buckets in a 64-slot cache
    0x1000 + (i as Addr) * 8
}

fn entry_bytes(i: usize) -> Vec<u8> {
    vec![i as u8; i + 1]
}

fn populated_cache(client: &mut MockClient) -> CacheStore<Payload> {
    let mut cache = CacheStore::new(64);
    for i in 0..ENTRIES {
        cache.insert(client, entry_kind(i), entry_addr(i), entry_bytes(i)).unwrap();
    }
    cache
}

fn image_config() -> CacheImageConfig {
    CacheImageConfig {
        generate_image: true,
        ..Default::default()
    }
}

/// Build an image from a populated cache and tear the cache down
fn write_image(client: &mut MockClient) -> ImageMessage {
    let mut cache = populated_cache(client);
    let message = ImageBuilder::new(&image_config())
        .build(&mut cache, client)
        .unwrap()
        .expect("image should be written");
    cache.teardown(client).unwrap();
    message
}

fn reopened(client: &MockClient, read_only: bool) -> CacheStore<Payload> {
    let mut cache = CacheStore::new(64);
    cache.attach_image(ImageLoader::on_open(client, read_only));
    cache
}

fn written_block(client: &MockClient, message: ImageMessage) -> ImageBlock {
    ImageBlock::decode(&client.blocks[&message.addr]).unwrap()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_image_repopulates_cache_without_loads() {
    let mut client = MockClient::new();
    let message = write_image(&mut client);
    assert!(message.has_block());
    assert_eq!(client.message, Some(message));
    assert_eq!(written_block(&client, message).len(), ENTRIES);

    let mut cache = reopened(&client, false);
    assert_eq!(cache.image().state(), ImageState::ImagePending);

    for i in 0..ENTRIES {
        let handle = cache.protect(&mut client, entry_kind(i), entry_addr(i), &()).unwrap();
        assert_eq!(handle.payload(), &entry_bytes(i));
        cache.unprotect(&mut client, handle, false).unwrap();
    }

    assert_eq!(client.loads, 0);
    assert_eq!(client.deserializes, ENTRIES);
    assert_eq!(cache.image().state(), ImageState::ImageConsuming);
    assert_eq!(cache.stats().prefetch_hits, ENTRIES as u64);
}

#[test]
fn test_build_writes_back_dirty_entries_first() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);

    ImageBuilder::new(&image_config())
        .build(&mut cache, &mut client)
        .unwrap();

    assert_eq!(client.flushes.len(), ENTRIES);
    assert_eq!(cache.dirty_count(), 0);
    assert_eq!(cache.len(), ENTRIES);
    assert!(cache.entries().all(|e| !e.is_pinned()));
}

#[test]
fn test_disabled_generation_writes_nothing() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);

    let result = ImageBuilder::new(&CacheImageConfig::default())
        .build(&mut cache, &mut client)
        .unwrap();

    assert!(result.is_none());
    assert!(client.allocations.is_empty());
    assert!(client.flushes.is_empty());
}

#[test]
fn test_empty_cache_writes_no_image() {
    let mut client = MockClient::new();
    let mut cache: CacheStore<Payload> = CacheStore::new(64);

    let result = ImageBuilder::new(&image_config())
        .build(&mut cache, &mut client)
        .unwrap();

    assert!(result.is_none());
    assert!(client.allocations.is_empty());
    assert!(client.message.is_none());
}

// =============================================================================
// Eligibility Tests
// =============================================================================

#[test]
fn test_untouched_prefetched_entries_are_not_eligible() {
    let mut client = MockClient::new();
    let first = write_image(&mut client);

    let mut cache = reopened(&client, false);
    cache.find_or_load(&mut client, entry_kind(2), entry_addr(2), &()).unwrap();
    assert_eq!(cache.finish_image(&mut client).unwrap(), Some(first));
    assert!(client.message.is_none());
    // the retired block is still allocated, so the next one cannot reuse it
    assert!(client.released.is_empty());

    let second = ImageBuilder::new(&image_config())
        .build(&mut cache, &mut client)
        .unwrap()
        .unwrap();

    let block = written_block(&client, second);
    assert_eq!(block.len(), 1);
    assert_eq!(block.manifest()[0].addr, entry_addr(2));
}

#[test]
fn test_inclusion_flags_exclude_kinds() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);
    let config = CacheImageConfig {
        inclusion_flags: KindSet::all().without(EntryKind::LocalHeap),
        ..image_config()
    };

    let message = ImageBuilder::new(&config)
        .build(&mut cache, &mut client)
        .unwrap()
        .unwrap();

    let block = written_block(&client, message);
    assert_eq!(block.len(), ENTRIES - ENTRIES / 3);
    assert!(block.manifest().iter().all(|r| r.kind != EntryKind::LocalHeap));
}

#[test]
fn test_predicate_excludes_entries() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);
    let excluded = entry_addr(0);

    let message = ImageBuilder::new(&image_config())
        .with_predicate(move |info| info.addr != excluded)
        .build(&mut cache, &mut client)
        .unwrap()
        .unwrap();

    let block = written_block(&client, message);
    assert_eq!(block.len(), ENTRIES - 1);
    assert!(block.manifest().iter().all(|r| r.addr != excluded));
}

// =============================================================================
// Limits and Failure Tests
// =============================================================================

#[test]
fn test_oversized_image_is_skipped() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);
    let config = CacheImageConfig {
        max_image_size: Some(16),
        ..image_config()
    };

    let result = ImageBuilder::new(&config).build(&mut cache, &mut client).unwrap();

    assert!(result.is_none());
    assert!(client.allocations.is_empty());
    assert!(client.message.is_none());
}

#[test]
fn test_message_only_mode() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);
    let config = CacheImageConfig {
        flags: ImageFlags::GENERATE_MESSAGE,
        ..image_config()
    };

    let message = ImageBuilder::new(&config)
        .build(&mut cache, &mut client)
        .unwrap()
        .unwrap();
    cache.teardown(&mut client).unwrap();

    assert!(!message.has_block());
    assert!(client.allocations.is_empty());
    assert_eq!(client.message, Some(ImageMessage::empty()));

    // the next open finds the message but loads objects normally
    let mut cache = reopened(&client, false);
    assert!(cache.image().load_image());
    cache.find_or_load(&mut client, entry_kind(0), entry_addr(0), &()).unwrap();
    assert_eq!(client.loads, 1);
    assert_eq!(client.deserializes, 0);

    let retired = cache.finish_image(&mut client).unwrap().unwrap();
    assert!(client.message.is_none());
    release_retired_image(&mut client, retired).unwrap();
    assert!(client.released.is_empty());
}

#[test]
fn test_allocation_failure_aborts_build() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);
    client.fail_alloc = true;

    let err = ImageBuilder::new(&image_config())
        .build(&mut cache, &mut client)
        .unwrap_err();

    assert!(matches!(err, CacheError::AllocationFailure(_)));
    assert!(client.message.is_none());
    assert!(cache.entries().all(|e| !e.is_pinned()));
}

#[test]
fn test_write_failure_releases_block() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);
    client.fail_write = true;

    let err = ImageBuilder::new(&image_config())
        .build(&mut cache, &mut client)
        .unwrap_err();

    assert!(matches!(err, CacheError::FlushFailure { .. }));
    assert!(client.message.is_none());
    assert_eq!(client.allocations.len(), 1);
    assert_eq!(client.released, client.allocations);
}

#[test]
fn test_message_failure_releases_block() {
    let mut client = MockClient::new();
    let mut cache = populated_cache(&mut client);
    client.fail_set_message = true;

    let err = ImageBuilder::new(&image_config())
        .build(&mut cache, &mut client)
        .unwrap_err();

    assert!(matches!(err, CacheError::Format(_)));
    assert!(client.message.is_none());
    assert_eq!(client.allocations.len(), 1);
    assert_eq!(client.released, client.allocations);
    assert!(cache.entries().all(|e| !e.is_pinned()));
}

// =============================================================================
// Loading Tests
// =============================================================================

#[test]
fn test_image_is_read_lazily() {
    let mut client = MockClient::new();
    write_image(&mut client);
    let saved = std::mem::take(&mut client.blocks);

    // nothing is read at open
    let mut cache = reopened(&client, false);
    assert_eq!(cache.image().state(), ImageState::ImagePending);
    assert_eq!(client.deserializes, 0);

    client.blocks = saved;
    cache.find_or_load(&mut client, entry_kind(1), entry_addr(1), &()).unwrap();
    assert_eq!(cache.stats().prefetched, ENTRIES as u64);
}

#[test]
fn test_corrupt_image_fails_every_access() {
    let mut client = MockClient::new();
    let message = write_image(&mut client);
    let block = client.blocks.get_mut(&message.addr).unwrap();
    let mid = block.len() / 2;
    block[mid] ^= 0xFF;

    let mut cache = reopened(&client, false);
    for _ in 0..2 {
        let err = cache
            .find_or_load(&mut client, entry_kind(0), entry_addr(0), &())
            .unwrap_err();
        assert!(matches!(err, CacheError::CorruptImage(_)));
    }
    assert!(cache.image().is_poisoned());
    assert_eq!(client.loads, 0);
}

#[test]
fn test_unreadable_image_block() {
    let mut client = MockClient::new();
    write_image(&mut client);
    client.blocks.clear();

    let mut cache = reopened(&client, false);
    let err = cache
        .protect(&mut client, entry_kind(0), entry_addr(0), &())
        .unwrap_err();
    assert!(matches!(err, CacheError::CorruptImage(_)));
}

#[test]
fn test_finish_deletes_image_on_read_write_open() {
    let mut client = MockClient::new();
    let message = write_image(&mut client);

    let mut cache = reopened(&client, false);
    assert!(cache.image().delete_image());
    cache.find_or_load(&mut client, entry_kind(0), entry_addr(0), &()).unwrap();
    let retired = cache.finish_image(&mut client).unwrap();

    assert_eq!(retired, Some(message));
    assert!(client.message.is_none());
    assert!(client.released.is_empty());
    assert_eq!(cache.image().state(), ImageState::NoImage);

    release_retired_image(&mut client, message).unwrap();
    assert_eq!(client.released, vec![(message.addr, message.len)]);
}

#[test]
fn test_finish_keeps_image_on_read_only_open() {
    let mut client = MockClient::new();
    let message = write_image(&mut client);

    let mut cache = reopened(&client, true);
    assert!(cache.image().load_image());
    assert!(!cache.image().delete_image());
    cache.find_or_load(&mut client, entry_kind(0), entry_addr(0), &()).unwrap();
    assert_eq!(cache.finish_image(&mut client).unwrap(), None);

    assert_eq!(client.message, Some(message));
    assert!(client.released.is_empty());
    assert_eq!(cache.image().state(), ImageState::ImageConsumed);
}

#[test]
fn test_unaccessed_prefetched_entries_dropped_at_teardown() {
    let mut client = MockClient::new();
    write_image(&mut client);
    client.flushes.clear();

    let mut cache = reopened(&client, false);
    cache.find_or_load(&mut client, entry_kind(3), entry_addr(3), &()).unwrap();
    cache.teardown(&mut client).unwrap();

    assert!(cache.is_empty());
    assert!(client.flushes.is_empty());
    assert_eq!(client.deserializes, 1);
    assert_eq!(cache.stats().prefetch_dropped, (ENTRIES - 1) as u64);
}

#[test]
fn test_live_entry_wins_over_image_record() {
    let mut client = MockClient::new();
    write_image(&mut client);

    let mut cache = reopened(&client, false);
    cache
        .insert(&mut client, entry_kind(0), entry_addr(0), b"live".to_vec())
        .unwrap();
    // first lookup materialises the image
    cache.find_or_load(&mut client, entry_kind(1), entry_addr(1), &()).unwrap();

    let payload = cache
        .find_or_load(&mut client, entry_kind(0), entry_addr(0), &())
        .unwrap();
    assert_eq!(payload, b"live");
    assert_eq!(cache.stats().prefetched, (ENTRIES - 1) as u64);
    assert_eq!(cache.stats().prefetch_dropped, 1);
}
