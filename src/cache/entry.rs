//! Cache entry definitions
//!
//! Defines the address type, the closed set of object kinds and the
//! resident representation of one cached metadata object.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A byte offset within the container file
pub type Addr = u64;

/// Sentinel for "no address"
pub const UNDEF_ADDR: Addr = u64::MAX;

// =============================================================================
// Entry Kinds
// =============================================================================

/// Object kinds stored in the metadata cache
///
/// The discriminant is the `type_id` written into cache image manifests, so
/// existing values must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum EntryKind {
    /// Index (B-tree) node
    BTreeNode = 0x01,
    /// Directory (symbol table) node of a group
    SymbolTableNode = 0x02,
    /// Local heap holding names and small values
    LocalHeap = 0x03,
    /// Object header of a group or dataset
    ObjectHeader = 0x04,
    /// Free-space section record
    FreeSpaceSection = 0x05,
    /// Attribute index of an object
    AttributeIndex = 0x06,
}

impl EntryKind {
    /// Every kind, in tag order
    pub const ALL: [EntryKind; 6] = [
        EntryKind::BTreeNode,
        EntryKind::SymbolTableNode,
        EntryKind::LocalHeap,
        EntryKind::ObjectHeader,
        EntryKind::FreeSpaceSection,
        EntryKind::AttributeIndex,
    ];

    /// Number of kinds
    pub const COUNT: usize = Self::ALL.len();

    /// Tag written into image manifests
    pub fn type_id(self) -> u16 {
        self as u16
    }

    /// Parse a manifest tag; unknown tags return `None`
    pub fn from_type_id(id: u16) -> Option<Self> {
        match id {
            0x01 => Some(Self::BTreeNode),
            0x02 => Some(Self::SymbolTableNode),
            0x03 => Some(Self::LocalHeap),
            0x04 => Some(Self::ObjectHeader),
            0x05 => Some(Self::FreeSpaceSection),
            0x06 => Some(Self::AttributeIndex),
            _ => None,
        }
    }

    /// Dense index (0-based), used for per-kind counters
    pub(crate) fn index(self) -> usize {
        self as usize - 1
    }

    /// Human readable name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::BTreeNode => "B-tree nodes",
            Self::SymbolTableNode => "symbol table nodes",
            Self::LocalHeap => "local heaps",
            Self::ObjectHeader => "object headers",
            Self::FreeSpaceSection => "free-space sections",
            Self::AttributeIndex => "attribute indices",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Kind Sets
// =============================================================================

/// A small bitset of entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KindSet(u32);

impl KindSet {
    /// The empty set
    pub const fn empty() -> Self {
        KindSet(0)
    }

    /// Every kind
    pub fn all() -> Self {
        EntryKind::ALL.iter().copied().collect()
    }

    pub fn with(mut self, kind: EntryKind) -> Self {
        self.insert(kind);
        self
    }

    pub fn without(mut self, kind: EntryKind) -> Self {
        self.remove(kind);
        self
    }

    pub fn insert(&mut self, kind: EntryKind) {
        self.0 |= 1 << kind.index();
    }

    pub fn remove(&mut self, kind: EntryKind) {
        self.0 &= !(1 << kind.index());
    }

    pub fn contains(&self, kind: EntryKind) -> bool {
        self.0 & (1 << kind.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw bit representation
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl FromIterator<EntryKind> for KindSet {
    fn from_iter<I: IntoIterator<Item = EntryKind>>(iter: I) -> Self {
        let mut set = KindSet::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

// =============================================================================
// Cache Entries
// =============================================================================

/// In-memory state of a resident entry
#[derive(Debug)]
pub enum EntryBody<P> {
    /// Decoded payload, owned by the cache
    Decoded(P),

    /// Raw bytes taken from a cache image, not yet decoded
    Prefetched(Vec<u8>),
}

/// One resident metadata object
#[derive(Debug)]
pub struct CacheEntry<P> {
    /// File address (unique key while resident)
    pub(crate) addr: Addr,

    /// Object kind
    pub(crate) kind: EntryKind,

    /// Decoded payload or prefetched bytes
    pub(crate) body: EntryBody<P>,

    /// Size of the object's on-disk image in bytes
    pub(crate) size_on_disk: usize,

    /// Needs write-back before eviction
    pub(crate) dirty: bool,

    /// Kept resident regardless of bucket pressure
    pub(crate) pinned: bool,
}

impl<P> CacheEntry<P> {
    pub(crate) fn decoded(addr: Addr, kind: EntryKind, payload: P, size: usize, dirty: bool) -> Self {
        Self {
            addr,
            kind,
            body: EntryBody::Decoded(payload),
            size_on_disk: size,
            dirty,
            pinned: false,
        }
    }

    pub(crate) fn prefetched(addr: Addr, kind: EntryKind, raw: Vec<u8>) -> Self {
        Self {
            addr,
            kind,
            size_on_disk: raw.len(),
            body: EntryBody::Prefetched(raw),
            dirty: false,
            pinned: false,
        }
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn size_on_disk(&self) -> usize {
        self.size_on_disk
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// True while the entry still holds undecoded image bytes
    pub fn is_prefetched(&self) -> bool {
        matches!(self.body, EntryBody::Prefetched(_))
    }

    /// Decoded payload, if any
    pub fn payload(&self) -> Option<&P> {
        match &self.body {
            EntryBody::Decoded(p) => Some(p),
            EntryBody::Prefetched(_) => None,
        }
    }

    /// Summary used by image eligibility predicates
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            addr: self.addr,
            kind: self.kind,
            size_on_disk: self.size_on_disk,
            dirty: self.dirty,
            prefetched: self.is_prefetched(),
        }
    }
}

/// Read-only description of a resident entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub addr: Addr,
    pub kind: EntryKind,
    pub size_on_disk: usize,
    pub dirty: bool,
    pub prefetched: bool,
}
