//! Metadata Cache Module
//!
//! Address-keyed, direct-mapped cache of decoded metadata objects.
//!
//! ## Responsibilities
//! - Load objects on first access and keep them resident
//! - Hand out exclusive checkouts (`protect` / `unprotect`)
//! - Write back dirty objects when displaced or flushed
//! - Hold prefetched image records until they are first touched
//!
//! ## Entry Lifecycle
//! ```text
//!            insert / load                 protect
//!   (absent) ─────────────▶ RESIDENT ───────────────▶ CHECKED OUT
//!      ▲                     │    ▲                         │
//!      │  displace / flush   │    └─────────────────────────┘
//!      └─────────────────────┘            unprotect
//!
//!   image record ──▶ PREFETCHED ──(first access)──▶ RESIDENT
//! ```

mod class;
mod entry;
mod flush;
mod handle;
mod stats;
mod store;

pub use class::{BlockIo, CacheClient, SpaceAllocator};
pub use entry::{Addr, CacheEntry, EntryBody, EntryInfo, EntryKind, KindSet, UNDEF_ADDR};
pub use flush::AddrFilter;
pub use handle::{Protected, UnprotectError};
pub use stats::{CacheStats, KindStats};
pub use store::CacheStore;
