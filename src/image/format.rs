//! Cache image block codec

use std::collections::HashSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::cache::{Addr, EntryKind, UNDEF_ADDR};
use crate::error::{CacheError, Result};

/// Magic bytes at the start of every image block
pub const IMAGE_MAGIC: &[u8; 4] = b"MDCI";

/// Block format version
pub const IMAGE_VERSION: u16 = 1;

/// Magic (4) + version (2) + entry count (4)
pub const HEADER_SIZE: usize = 4 + 2 + 4;

/// Address (8) + kind (2) + length (4)
pub const RECORD_SIZE: usize = 8 + 2 + 4;

/// CRC32 (4)
pub const FOOTER_SIZE: usize = 4;

/// One manifest record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestRecord {
    pub addr: Addr,
    pub kind: EntryKind,
    pub len: u32,
}

/// A decoded or in-construction image block
#[derive(Debug, Clone, Default)]
pub struct ImageBlock {
    manifest: Vec<ManifestRecord>,
    payload: BytesMut,
}

impl ImageBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry's serialized bytes
    pub fn push(&mut self, addr: Addr, kind: EntryKind, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            CacheError::Format(format!("entry at {addr:#x} is too large for an image"))
        })?;
        self.manifest.push(ManifestRecord { addr, kind, len });
        self.payload.put_slice(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    pub fn manifest(&self) -> &[ManifestRecord] {
        &self.manifest
    }

    /// Size of the encoded block
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.manifest.len() * RECORD_SIZE + self.payload.len() + FOOTER_SIZE
    }

    /// Records paired with their bytes, in manifest order
    pub fn records(&self) -> impl Iterator<Item = (ManifestRecord, &[u8])> + '_ {
        let mut offset = 0usize;
        self.manifest.iter().map(move |rec| {
            let start = offset;
            offset += rec.len as usize;
            (*rec, &self.payload[start..offset])
        })
    }

    /// Encode as header, manifest, payload and CRC footer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(IMAGE_MAGIC);
        buf.put_u16_le(IMAGE_VERSION);
        buf.put_u32_le(self.manifest.len() as u32);
        for rec in &self.manifest {
            buf.put_u64_le(rec.addr);
            buf.put_u16_le(rec.kind.type_id());
            buf.put_u32_le(rec.len);
        }
        buf.put_slice(&self.payload);

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf.freeze()
    }

    /// Parse and validate an encoded block
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(format!("block of {} bytes is truncated", raw.len())));
        }

        let (body, footer) = raw.split_at(raw.len() - FOOTER_SIZE);
        let mut footer = footer;
        let stored_crc = footer.get_u32_le();
        if crc32fast::hash(body) != stored_crc {
            return Err(corrupt("checksum mismatch"));
        }

        let mut cur = body;
        if &cur[..4] != IMAGE_MAGIC {
            return Err(corrupt("bad magic"));
        }
        cur.advance(4);

        let version = cur.get_u16_le();
        if version != IMAGE_VERSION {
            return Err(corrupt(format!("unrecognized version tag {version}")));
        }

        let count = cur.get_u32_le() as usize;
        count
            .checked_mul(RECORD_SIZE)
            .filter(|&n| n <= cur.remaining())
            .ok_or_else(|| corrupt(format!("manifest of {count} records overruns the block")))?;

        let mut manifest = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        let mut total = 0usize;
        for _ in 0..count {
            let addr = cur.get_u64_le();
            let tag = cur.get_u16_le();
            let len = cur.get_u32_le();

            if addr == UNDEF_ADDR {
                return Err(corrupt("record with undefined address"));
            }
            let kind = EntryKind::from_type_id(tag)
                .ok_or_else(|| corrupt(format!("unknown kind tag {tag:#x} at {addr:#x}")))?;
            if !seen.insert(addr) {
                return Err(corrupt(format!("duplicate record for {addr:#x}")));
            }

            total += len as usize;
            manifest.push(ManifestRecord { addr, kind, len });
        }

        if total != cur.remaining() {
            return Err(corrupt(format!(
                "manifest describes {total} payload bytes, block holds {}",
                cur.remaining()
            )));
        }

        Ok(Self {
            manifest,
            payload: BytesMut::from(cur),
        })
    }
}

fn corrupt(msg: impl Into<String>) -> CacheError {
    CacheError::CorruptImage(msg.into())
}
