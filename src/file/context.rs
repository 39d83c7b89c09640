//! Per-file collaborator state
//!
//! `FileContext` is what the cache talks to: it reads and writes object
//! frames, hands out file space and owns the in-memory superblock.

use std::collections::HashMap;

use tracing::trace;

use crate::cache::{Addr, BlockIo, CacheClient, EntryKind, SpaceAllocator};
use crate::error::{CacheError, Result};
use crate::io::{FileDriver, FreeSpace};
use crate::objects::{
    capacity_for, decode_frame, encode_frame, FrameHeader, MetadataObject, FRAME_HEADER_SIZE,
};
use crate::superblock::{ImageMessage, Superblock, SuperblockExtensionBridge};

/// Counters describing how the file was accessed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    /// Objects read from their own location
    pub loads: u64,
    /// Objects decoded from cache image bytes
    pub image_decodes: u64,
    /// Object frames written back
    pub object_writes: u64,
}

pub struct FileContext {
    driver: Box<dyn FileDriver>,
    pub(crate) superblock: Superblock,
    pub(crate) space: FreeSpace,
    read_only: bool,
    /// Allocation size of every object frame seen this open
    capacities: HashMap<Addr, u32>,
    pub(crate) counters: IoCounters,
}

impl FileContext {
    pub(crate) fn new(
        driver: Box<dyn FileDriver>,
        superblock: Superblock,
        space: FreeSpace,
    ) -> Self {
        let read_only = driver.is_read_only();
        Self {
            driver,
            superblock,
            space,
            read_only,
            capacities: HashMap::new(),
            counters: IoCounters::default(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(CacheError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Frame length of `object` without slack
    pub(crate) fn frame_len(&self, object: &MetadataObject) -> Result<usize> {
        Ok(FRAME_HEADER_SIZE + bincode::serialized_size(object)? as usize)
    }

    /// Allocation size recorded for the object at `addr`
    pub(crate) fn capacity(&self, addr: Addr) -> Result<u32> {
        self.capacities
            .get(&addr)
            .copied()
            .ok_or_else(|| CacheError::NotFound(format!("no object allocation at {addr:#x}")))
    }

    /// Reserve space for a new object frame of `frame_len` bytes
    pub(crate) fn allocate_object(&mut self, frame_len: usize) -> Result<(Addr, u32)> {
        self.ensure_writable()?;
        let capacity = capacity_for(frame_len);
        let addr = self.space.allocate(capacity as u64)?;
        self.capacities.insert(addr, capacity);
        Ok((addr, capacity))
    }

    /// Give an object's allocation back
    pub(crate) fn release_object(&mut self, addr: Addr) -> Result<()> {
        let capacity = self.capacity(addr)?;
        self.space.free(addr, capacity as u64)?;
        self.capacities.remove(&addr);
        Ok(())
    }

    /// Persist the superblock with the current end of allocation
    pub(crate) fn write_superblock(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.superblock.eoa = self.space.eoa();
        self.superblock.write_to(self.driver.as_mut())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.driver.sync()
    }
}

impl BlockIo for FileContext {
    fn read_block(&mut self, addr: Addr, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.driver.read_at(addr, &mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, addr: Addr, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.driver.write_at(addr, data)
    }
}

impl SpaceAllocator for FileContext {
    fn allocate(&mut self, nbytes: u64) -> Result<Addr> {
        self.ensure_writable()?;
        self.space.allocate(nbytes)
    }

    fn free(&mut self, addr: Addr, nbytes: u64) -> Result<()> {
        self.ensure_writable()?;
        self.space.free(addr, nbytes)
    }
}

impl SuperblockExtensionBridge for FileContext {
    fn get_image_message(&self) -> Option<ImageMessage> {
        self.superblock.get_image_message()
    }

    fn set_image_message(&mut self, message: ImageMessage) -> Result<()> {
        self.ensure_writable()?;
        self.superblock.set_image_message(message)
    }

    fn delete_image_message(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.superblock.delete_image_message()
    }
}

impl CacheClient for FileContext {
    type Payload = MetadataObject;
    type Aux = ();

    fn load(&mut self, kind: EntryKind, addr: Addr, _aux: &()) -> Result<MetadataObject> {
        let prefix = self.read_block(addr, FRAME_HEADER_SIZE)?;
        let header = FrameHeader::parse(&prefix)?;
        let raw = self.read_block(addr, header.frame_len())?;

        let (object, header) = decode_frame(kind, &raw)?;
        self.capacities.insert(addr, header.capacity);
        self.counters.loads += 1;
        Ok(object)
    }

    fn deserialize(&mut self, kind: EntryKind, addr: Addr, image: &[u8]) -> Result<MetadataObject> {
        let (object, header) = decode_frame(kind, image)?;
        self.capacities.insert(addr, header.capacity);
        self.counters.image_decodes += 1;
        Ok(object)
    }

    fn serialize(&mut self, _kind: EntryKind, addr: Addr, payload: &MetadataObject) -> Result<Vec<u8>> {
        encode_frame(payload, self.capacity(addr)?)
    }

    fn flush(
        &mut self,
        kind: EntryKind,
        addr: Addr,
        payload: &MetadataObject,
        _destroy: bool,
        is_barrier: bool,
    ) -> Result<usize> {
        self.ensure_writable()?;
        let frame = self.serialize(kind, addr, payload)?;
        self.driver.write_at(addr, &frame)?;
        self.counters.object_writes += 1;
        trace!(addr, %kind, bytes = frame.len(), is_barrier, "wrote object frame");
        Ok(frame.len())
    }

    fn size(&self, _kind: EntryKind, payload: &MetadataObject) -> usize {
        self.frame_len(payload).unwrap_or(FRAME_HEADER_SIZE)
    }

    fn on_rename(&mut self, kind: EntryKind, _payload: &mut MetadataObject, old: Addr, new: Addr) {
        trace!(old, new, %kind, "object relocated");
    }
}
