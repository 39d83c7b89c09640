//! Error types for metacache
//!
//! Provides a unified error type for all cache, image and file operations.

use thiserror::Error;

use crate::cache::{Addr, EntryKind};

/// Result type alias using CacheError
pub type Result<T> = std::result::Result<T, CacheError>;

/// Unified error type for metacache operations
#[derive(Debug, Error)]
pub enum CacheError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File is open read-only")]
    ReadOnly,

    // -------------------------------------------------------------------------
    // Entry Callback Errors
    // -------------------------------------------------------------------------
    #[error("Unable to load {kind} at address {addr:#x}: {source}")]
    LoadFailure {
        addr: Addr,
        kind: EntryKind,
        #[source]
        source: Box<CacheError>,
    },

    #[error("Unable to flush {target} at address {addr:#x}: {source}")]
    FlushFailure {
        addr: Addr,
        target: String,
        #[source]
        source: Box<CacheError>,
    },

    // -------------------------------------------------------------------------
    // Checkout Discipline Errors
    // -------------------------------------------------------------------------
    #[error("Protect violation at address {addr:#x}: {reason}")]
    ProtectViolation { addr: Addr, reason: String },

    #[error("Entry at address {addr:#x} is a {found}, expected {expected}")]
    TypeMismatch {
        addr: Addr,
        expected: EntryKind,
        found: EntryKind,
    },

    #[error("Entry at address {0:#x} is pinned")]
    Pinned(Addr),

    // -------------------------------------------------------------------------
    // File Space Errors
    // -------------------------------------------------------------------------
    #[error("Allocation failed: {0}")]
    AllocationFailure(String),

    // -------------------------------------------------------------------------
    // Cache Image Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt cache image: {0}")]
    CorruptImage(String),

    // -------------------------------------------------------------------------
    // Format / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Format error: {0}")]
    Format(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Wrap a load callback failure with the address and kind it was for
    pub(crate) fn load(addr: Addr, kind: EntryKind, source: CacheError) -> Self {
        CacheError::LoadFailure {
            addr,
            kind,
            source: Box::new(source),
        }
    }

    /// Wrap a flush callback failure with the address and kind it was for
    pub(crate) fn flush(addr: Addr, target: impl Into<String>, source: CacheError) -> Self {
        CacheError::FlushFailure {
            addr,
            target: target.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn protect(addr: Addr, reason: impl Into<String>) -> Self {
        CacheError::ProtectViolation {
            addr,
            reason: reason.into(),
        }
    }

    /// True for `ProtectViolation`
    pub fn is_protect_violation(&self) -> bool {
        matches!(self, CacheError::ProtectViolation { .. })
    }
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
