//! On-disk framing of metadata objects
//!
//! ```text
//! ┌──────────┬──────────────┬──────────────┬─────────┬────────────────┬─────────┐
//! │ Kind (2) │ Capacity (4) │ Body Len (4) │ CRC (4) │ Body (bincode) │ (slack) │
//! └──────────┴──────────────┴──────────────┴─────────┴────────────────┴─────────┘
//! │◀────────────────────────────── capacity ───────────────────────────────────▶│
//! ```
//!
//! `capacity` is the size of the allocation the object lives in. An object
//! that outgrows it has to be moved to a larger allocation.

use crate::cache::EntryKind;
use crate::error::{CacheError, Result};

use super::MetadataObject;

/// Kind (2) + capacity (4) + body length (4) + CRC (4)
pub const FRAME_HEADER_SIZE: usize = 2 + 4 + 4 + 4;

/// Smallest allocation handed to an object
const MIN_CAPACITY: u32 = 64;

/// Parsed frame prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: EntryKind,
    pub capacity: u32,
    pub body_len: u32,
    pub crc: u32,
}

impl FrameHeader {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < FRAME_HEADER_SIZE {
            return Err(CacheError::Format("object frame truncated".into()));
        }
        let tag = u16::from_le_bytes([raw[0], raw[1]]);
        let kind = EntryKind::from_type_id(tag)
            .ok_or_else(|| CacheError::Format(format!("unknown object kind tag {tag:#x}")))?;
        let capacity = u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]);
        let body_len = u32::from_le_bytes([raw[6], raw[7], raw[8], raw[9]]);
        let crc = u32::from_le_bytes([raw[10], raw[11], raw[12], raw[13]]);

        if FRAME_HEADER_SIZE as u64 + body_len as u64 > capacity as u64 {
            return Err(CacheError::Format(format!(
                "object body of {body_len} bytes exceeds capacity {capacity}"
            )));
        }

        Ok(Self {
            kind,
            capacity,
            body_len,
            crc,
        })
    }

    /// Frame length without slack
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.body_len as usize
    }
}

/// Allocation size for an object whose frame is `frame_len` bytes
pub fn capacity_for(frame_len: usize) -> u32 {
    let len = u32::try_from(frame_len).unwrap_or(u32::MAX);
    len.checked_next_power_of_two()
        .unwrap_or(u32::MAX)
        .max(MIN_CAPACITY)
}

/// Frame `object` for an allocation of `capacity` bytes
pub fn encode_frame(object: &MetadataObject, capacity: u32) -> Result<Vec<u8>> {
    let body = bincode::serialize(object)?;
    let frame_len = FRAME_HEADER_SIZE + body.len();
    if frame_len > capacity as usize {
        return Err(CacheError::Format(format!(
            "{} frame of {frame_len} bytes exceeds capacity {capacity}",
            object.kind()
        )));
    }

    let mut out = Vec::with_capacity(frame_len);
    out.extend_from_slice(&object.kind().type_id().to_le_bytes());
    out.extend_from_slice(&capacity.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a frame, checking it holds an object of `expected` kind
///
/// Trailing bytes past the body are ignored.
pub fn decode_frame(expected: EntryKind, raw: &[u8]) -> Result<(MetadataObject, FrameHeader)> {
    let header = FrameHeader::parse(raw)?;
    if header.kind != expected {
        return Err(CacheError::Format(format!(
            "frame holds {}, expected {expected}",
            header.kind
        )));
    }

    let body = raw
        .get(FRAME_HEADER_SIZE..header.frame_len())
        .ok_or_else(|| CacheError::Format("object body truncated".into()))?;
    if crc32fast::hash(body) != header.crc {
        return Err(CacheError::Format(format!("{expected} CRC mismatch")));
    }

    let object: MetadataObject = bincode::deserialize(body)?;
    if object.kind() != expected {
        return Err(CacheError::Format(format!(
            "body decodes to {}, expected {expected}",
            object.kind()
        )));
    }
    Ok((object, header))
}
