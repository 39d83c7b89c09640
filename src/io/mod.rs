//! I/O Module
//!
//! Raw byte access to the container file plus file-space allocation.
//!
//! ## Responsibilities
//! - Positioned reads and writes through a [`FileDriver`]
//! - An on-disk driver ([`FsDriver`]) and an in-memory one ([`MemDriver`])
//! - End-of-allocation tracking and free-extent reuse ([`FreeSpace`])
//!
//! ## File Layout
//! ```text
//! 0                 SUPERBLOCK_SIZE                               eoa
//! ┌─────────────────┬────────┬──────┬────────┬──── ... ────┬───────┐
//! │   Superblock    │ object │ data │ object │             │ image │
//! └─────────────────┴────────┴──────┴────────┴──── ... ────┴───────┘
//! ```

mod allocator;
mod driver;
mod memory;

pub use allocator::FreeSpace;
pub use driver::FsDriver;
pub use memory::{MemDriver, MemoryImage};

use crate::error::Result;

/// Positioned byte access to one container file
pub trait FileDriver: Send {
    /// Fill `buf` from `offset`; reading past the end is an error
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`, extending the file as needed
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current physical size in bytes
    fn size(&self) -> Result<u64>;

    /// Make previous writes durable
    fn sync(&mut self) -> Result<()>;

    /// True when the driver refuses writes
    fn is_read_only(&self) -> bool;
}
