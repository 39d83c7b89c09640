//! Superblock Module
//!
//! The file's root metadata, stored in a fixed region at address 0.
//!
//! ## Responsibilities
//! - Persist the end-of-allocation mark and the root group's address
//! - Carry the extension messages, including the cache image pointer
//! - Detect torn or foreign superblocks via magic and CRC
//!
//! ## Layout
//! ```text
//! ┌───────────┬─────────────┬──────────────┬─────────┬──────────────────┐
//! │ Magic (4) │ Version (2) │ Body Len (4) │ CRC (4) │ Body (bincode)   │
//! └───────────┴─────────────┴──────────────┴─────────┴──────────────────┘
//! │◀──────────────────────── SUPERBLOCK_SIZE (zero padded) ───────────▶│
//! ```

mod extension;

pub use extension::{ImageMessage, SuperblockExtension, SuperblockExtensionBridge};

use serde::{Deserialize, Serialize};

use crate::cache::{Addr, UNDEF_ADDR};
use crate::error::{CacheError, Result};
use crate::io::FileDriver;

/// Magic bytes identifying a container file
pub const MAGIC: &[u8; 4] = b"MDCF";

/// Superblock format version
pub const VERSION: u16 = 1;

/// Bytes reserved for the superblock at the start of the file
pub const SUPERBLOCK_SIZE: u64 = 512;

/// Fixed part before the body: magic + version + body length + crc
pub const PREFIX_SIZE: usize = 4 + 2 + 4 + 4;

/// Root metadata of a container file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    /// End of allocated space
    pub eoa: u64,

    /// Object header of the root group
    pub root_group: Addr,

    /// Optional extension messages
    pub extension: SuperblockExtension,
}

impl Superblock {
    /// Superblock of an empty file
    pub fn new() -> Self {
        Self {
            eoa: SUPERBLOCK_SIZE,
            root_group: UNDEF_ADDR,
            extension: SuperblockExtension::default(),
        }
    }

    /// Serialize to exactly `SUPERBLOCK_SIZE` bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        if PREFIX_SIZE + body.len() > SUPERBLOCK_SIZE as usize {
            return Err(CacheError::Format(format!(
                "superblock body of {} bytes does not fit",
                body.len()
            )));
        }

        let mut out = Vec::with_capacity(SUPERBLOCK_SIZE as usize);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        out.resize(SUPERBLOCK_SIZE as usize, 0);
        Ok(out)
    }

    /// Parse and validate a superblock region
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < PREFIX_SIZE {
            return Err(CacheError::Format("superblock truncated".into()));
        }
        if &raw[0..4] != MAGIC {
            return Err(CacheError::Format("not a container file (bad magic)".into()));
        }

        let version = u16::from_le_bytes(
            raw[4..6]
                .try_into()
                .map_err(|_| CacheError::Format("invalid version bytes".into()))?,
        );
        if version != VERSION {
            return Err(CacheError::Format(format!(
                "unsupported superblock version {version}"
            )));
        }

        let body_len = u32::from_le_bytes(
            raw[6..10]
                .try_into()
                .map_err(|_| CacheError::Format("invalid length bytes".into()))?,
        ) as usize;
        let stored_crc = u32::from_le_bytes(
            raw[10..14]
                .try_into()
                .map_err(|_| CacheError::Format("invalid CRC bytes".into()))?,
        );

        let body = raw
            .get(PREFIX_SIZE..PREFIX_SIZE + body_len)
            .ok_or_else(|| CacheError::Format("superblock body truncated".into()))?;
        if crc32fast::hash(body) != stored_crc {
            return Err(CacheError::Format("superblock CRC mismatch".into()));
        }

        Ok(bincode::deserialize(body)?)
    }

    /// Read the superblock region of `driver`
    pub fn read_from(driver: &mut dyn FileDriver) -> Result<Self> {
        let mut raw = vec![0u8; SUPERBLOCK_SIZE as usize];
        driver.read_at(0, &mut raw)?;
        Self::decode(&raw)
    }

    /// Overwrite the superblock region of `driver`
    pub fn write_to(&self, driver: &mut dyn FileDriver) -> Result<()> {
        driver.write_at(0, &self.encode()?)
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

impl SuperblockExtensionBridge for Superblock {
    fn get_image_message(&self) -> Option<ImageMessage> {
        self.extension.image
    }

    fn set_image_message(&mut self, message: ImageMessage) -> Result<()> {
        self.extension.image = Some(message);
        Ok(())
    }

    fn delete_image_message(&mut self) -> Result<()> {
        self.extension.image = None;
        Ok(())
    }
}
