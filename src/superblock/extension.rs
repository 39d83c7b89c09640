//! Superblock extension messages

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::{Addr, UNDEF_ADDR};
use crate::error::Result;

/// Location of a cache image block
///
/// A message with `addr == UNDEF_ADDR` and `len == 0` records that an image
/// was requested without writing a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMessage {
    pub addr: Addr,
    pub len: u64,
}

impl ImageMessage {
    pub fn new(addr: Addr, len: u64) -> Self {
        Self { addr, len }
    }

    /// Message that points at no block
    pub fn empty() -> Self {
        Self {
            addr: UNDEF_ADDR,
            len: 0,
        }
    }

    /// True when the message references an actual block
    pub fn has_block(&self) -> bool {
        self.addr != UNDEF_ADDR && self.len > 0
    }
}

impl fmt::Display for ImageMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addr == UNDEF_ADDR {
            writeln!(f, "{:<30} {}", "Metadata Cache Image Block address:", "UNDEF")?;
        } else {
            writeln!(f, "{:<30} {:#x}", "Metadata Cache Image Block address:", self.addr)?;
        }
        write!(f, "{:<30} {}", "Metadata Cache Image Block size in bytes:", self.len)
    }
}

/// Extension messages carried by the superblock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockExtension {
    /// Cache image pointer, present between a close that wrote an image
    /// and the read-write open that consumed it
    pub image: Option<ImageMessage>,
}

/// Access to the image message in the file's root metadata
pub trait SuperblockExtensionBridge {
    fn get_image_message(&self) -> Option<ImageMessage>;

    fn set_image_message(&mut self, message: ImageMessage) -> Result<()>;

    fn delete_image_message(&mut self) -> Result<()>;
}
