//! # metacache
//!
//! The metadata layer of a hierarchical binary container format:
//! - Direct-mapped cache of decoded metadata objects keyed by file address
//! - Exclusive checkout discipline (`protect` / `unprotect`) without locks
//! - Address-ordered, partial-failure-tolerant write-back
//! - Optional cache image: the live cache serialized into one block at
//!   close and materialised lazily after the next open
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MetadataFile                          │
//! │          (groups, datasets, attributes, close)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       CacheStore                            │
//! │        (find_or_load / protect / unprotect / flush)         │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌─────────────┐       ┌──────────────┐        ┌─────────────┐
//! │ ImageLoader │       │ ImageBuilder │        │ FileContext │
//! │   (open)    │       │   (close)    │        │ (callbacks) │
//! └──────┬──────┘       └──────┬───────┘        └──────┬──────┘
//!        │                     │                       │
//!        ▼                     ▼                       ▼
//!  ┌────────────────────────────────┐          ┌─────────────┐
//!  │ Superblock extension message   │          │ FileDriver  │
//!  │      (image address / len)     │          │ + FreeSpace │
//!  └────────────────────────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cache;
pub mod image;
pub mod superblock;
pub mod io;
pub mod objects;
pub mod file;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CacheError, Result};
pub use config::{CacheImageConfig, Config, ImageFlags};
pub use cache::{Addr, CacheStore, EntryKind, KindSet, UNDEF_ADDR};
pub use file::{Dataset, MetadataFile, OpenMode};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of metacache
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
