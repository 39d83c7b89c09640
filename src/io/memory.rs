//! In-memory driver
//!
//! A [`MemoryImage`] is a shared byte buffer standing in for a file. Cloning
//! the image shares the buffer, so a file can be closed and reopened (also
//! read-only) without touching the filesystem.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CacheError, Result};

use super::FileDriver;

/// Shared backing store for [`MemDriver`]
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver over this image
    pub fn driver(&self, read_only: bool) -> MemDriver {
        MemDriver {
            image: self.clone(),
            read_only,
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.read().is_empty()
    }

    /// Overwrite bytes in place (tests use this to simulate corruption)
    pub fn patch(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.write();
        if bytes.len() < offset + data.len() {
            bytes.resize(offset + data.len(), 0);
        }
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// Driver over a [`MemoryImage`]
#[derive(Debug, Clone)]
pub struct MemDriver {
    image: MemoryImage,
    read_only: bool,
}

impl MemDriver {
    pub fn image(&self) -> &MemoryImage {
        &self.image
    }
}

impl FileDriver for MemDriver {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.image.bytes.read();
        let start = usize::try_from(offset)
            .map_err(|_| CacheError::Format(format!("offset {offset:#x} out of range")))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                CacheError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("read of {} bytes at {offset:#x} past end of file", buf.len()),
                ))
            })?;
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let start = usize::try_from(offset)
            .map_err(|_| CacheError::Format(format!("offset {offset:#x} out of range")))?;
        self.image.patch(start, data);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.image.len() as u64)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
