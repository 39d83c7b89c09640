//! Cache Image Module
//!
//! Serializes the live cache into one contiguous block at close and feeds
//! it back as prefetched entries after the next open.
//!
//! ## Responsibilities
//! - Select eligible entries, write them as a single block, register it
//! - Detect the block at open and materialise it lazily on first access
//! - Delete the block at close unless the file is read-only
//!
//! ## Block Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Header                                 │
//! │ ┌──────────┬──────────┬──────────────┐ │
//! │ │Magic (4) │Version(2)│ Entry Count  │ │
//! │ └──────────┴──────────┴──────────────┘ │
//! ├────────────────────────────────────────┤
//! │ Manifest                               │
//! │ ┌────────────┬──────────┬───────────┐  │
//! │ │Address (8) │ Kind (2) │ Length(4) │  │
//! │ └────────────┴──────────┴───────────┘  │
//! │ ... (repeated for each entry)          │
//! ├────────────────────────────────────────┤
//! │ Payload: entry bytes in manifest order │
//! ├────────────────────────────────────────┤
//! │ Footer: CRC32 of everything above      │
//! └────────────────────────────────────────┘
//! ```

mod builder;
mod format;
mod loader;

pub use builder::{ImageBuilder, ImageHost, InclusionPredicate};
pub use format::{
    ImageBlock, ManifestRecord, FOOTER_SIZE, HEADER_SIZE, IMAGE_MAGIC, IMAGE_VERSION, RECORD_SIZE,
};
pub use loader::{release_retired_image, ImageLoader, ImageState};
