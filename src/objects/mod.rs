//! Metadata Objects Module
//!
//! The decoded payloads the file layer keeps in the cache.
//!
//! ## Object Graph
//! ```text
//!  superblock.root_group
//!          │
//!          ▼
//!  ObjectHeader(group) ──table──▶ GroupNode { name → ObjectHeader addr }
//!          │                              │
//!     attributes                          ▼
//!          │                  ObjectHeader(dataset) ──▶ raw data extent
//!          ▼
//!  AttributeIndex { name → bytes }
//! ```

mod frame;

pub use frame::{capacity_for, decode_frame, encode_frame, FrameHeader, FRAME_HEADER_SIZE};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::{Addr, EntryKind, UNDEF_ADDR};

/// Every payload kind the file layer stores in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataObject {
    Group(GroupNode),
    Header(ObjectHeader),
    Attributes(AttributeIndex),
}

impl MetadataObject {
    /// Cache kind of this payload
    pub fn kind(&self) -> EntryKind {
        match self {
            MetadataObject::Group(_) => EntryKind::SymbolTableNode,
            MetadataObject::Header(_) => EntryKind::ObjectHeader,
            MetadataObject::Attributes(_) => EntryKind::AttributeIndex,
        }
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            MetadataObject::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupNode> {
        match self {
            MetadataObject::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_header(&self) -> Option<&ObjectHeader> {
        match self {
            MetadataObject::Header(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_header_mut(&mut self) -> Option<&mut ObjectHeader> {
        match self {
            MetadataObject::Header(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_attributes(&self) -> Option<&AttributeIndex> {
        match self {
            MetadataObject::Attributes(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_attributes_mut(&mut self) -> Option<&mut AttributeIndex> {
        match self {
            MetadataObject::Attributes(a) => Some(a),
            _ => None,
        }
    }
}

/// Directory of one group: link name → object header address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupNode {
    pub links: BTreeMap<String, Addr>,
}

/// Header shared by groups and datasets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub body: HeaderBody,

    /// Attribute index, `UNDEF_ADDR` until the first attribute is set
    pub attributes: Addr,
}

impl ObjectHeader {
    pub fn group(table: Addr) -> Self {
        Self {
            body: HeaderBody::Group { table },
            attributes: UNDEF_ADDR,
        }
    }

    pub fn dataset(layout: DatasetLayout) -> Self {
        Self {
            body: HeaderBody::Dataset(layout),
            attributes: UNDEF_ADDR,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.body, HeaderBody::Group { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderBody {
    /// Group whose links live in the `GroupNode` at `table`
    Group { table: Addr },
    Dataset(DatasetLayout),
}

/// Shape and storage of a dataset's raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    /// Extent of each dimension
    pub shape: Vec<u64>,
    /// Raw data extent, `UNDEF_ADDR` when empty
    pub data_addr: Addr,
    pub data_len: u64,
}

/// Named attribute values of one object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeIndex {
    pub attrs: BTreeMap<String, Vec<u8>>,
}
