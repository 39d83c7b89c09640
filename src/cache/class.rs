//! Collaborator contracts
//!
//! The cache never interprets payloads itself. Everything kind-specific
//! (decoding, write-back, sizing) is delegated to the file-format layer
//! through [`CacheClient`], which dispatches on [`EntryKind`].

use crate::error::Result;

use super::{Addr, EntryKind};

/// Raw block I/O against the container file
pub trait BlockIo {
    /// Read exactly `len` bytes starting at `addr`
    fn read_block(&mut self, addr: Addr, len: usize) -> Result<Vec<u8>>;

    /// Write `data` starting at `addr`
    fn write_block(&mut self, addr: Addr, data: &[u8]) -> Result<()>;
}

/// File-space allocation
pub trait SpaceAllocator {
    /// Reserve `nbytes` of file space, returning its address
    fn allocate(&mut self, nbytes: u64) -> Result<Addr>;

    /// Return space previously handed out by `allocate`
    fn free(&mut self, addr: Addr, nbytes: u64) -> Result<()>;
}

/// Per-kind behaviour the cache relies on
///
/// One implementation covers the whole closed set of kinds; methods receive
/// the kind and match on it.
pub trait CacheClient: BlockIo {
    /// Decoded in-memory representation of every kind
    type Payload;

    /// Extra input needed to load an object from its own location
    type Aux;

    /// Read and decode the object stored at `addr`
    fn load(&mut self, kind: EntryKind, addr: Addr, aux: &Self::Aux) -> Result<Self::Payload>;

    /// Decode an object from bytes previously produced by `serialize`
    fn deserialize(&mut self, kind: EntryKind, addr: Addr, image: &[u8]) -> Result<Self::Payload>;

    /// Produce the on-disk image of `payload`, as written by `flush`
    fn serialize(&mut self, kind: EntryKind, addr: Addr, payload: &Self::Payload) -> Result<Vec<u8>>;

    /// Write `payload` back to `addr`, returning the number of bytes written
    ///
    /// `is_barrier` marks the first write of a whole-cache flush; it only
    /// matters to callers coordinating several processes.
    fn flush(
        &mut self,
        kind: EntryKind,
        addr: Addr,
        payload: &Self::Payload,
        destroy: bool,
        is_barrier: bool,
    ) -> Result<usize>;

    /// Size of the on-disk image of `payload`
    fn size(&self, kind: EntryKind, payload: &Self::Payload) -> usize;

    /// Release a payload leaving the cache for good
    fn free(&mut self, _kind: EntryKind, _addr: Addr, payload: Self::Payload) {
        drop(payload);
    }

    /// The object moved from `old` to `new`
    fn on_rename(&mut self, _kind: EntryKind, _payload: &mut Self::Payload, _old: Addr, _new: Addr) {}
}
