//! Checkout handles
//!
//! `protect` moves a payload out of the cache into a [`Protected`] handle;
//! `unprotect` consumes the handle and moves the payload back. The handle is
//! neither `Clone` nor `Copy`, so a single protect can be matched by at most
//! one unprotect.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::CacheError;

use super::{Addr, EntryKind};

/// Exclusive ownership of one checked-out payload
#[must_use = "a protected entry must be handed back with `unprotect`"]
pub struct Protected<P> {
    pub(crate) addr: Addr,
    pub(crate) kind: EntryKind,
    pub(crate) payload: P,
    /// Dirty state carried over from the resident entry
    pub(crate) was_dirty: bool,
}

impl<P> Protected<P> {
    pub(crate) fn new(addr: Addr, kind: EntryKind, payload: P, was_dirty: bool) -> Self {
        Self {
            addr,
            kind,
            payload,
            was_dirty,
        }
    }

    /// Address the payload was checked out from
    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Whether the entry was already dirty when it was protected
    pub fn was_dirty(&self) -> bool {
        self.was_dirty
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }
}

impl<P> Deref for Protected<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.payload
    }
}

impl<P> DerefMut for Protected<P> {
    fn deref_mut(&mut self) -> &mut P {
        &mut self.payload
    }
}

impl<P> fmt::Debug for Protected<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protected")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("kind", &self.kind)
            .field("was_dirty", &self.was_dirty)
            .finish_non_exhaustive()
    }
}

/// A failed `unprotect`; the handle comes back so the payload is not lost
pub struct UnprotectError<P> {
    pub error: CacheError,
    pub handle: Protected<P>,
}

impl<P> UnprotectError<P> {
    /// Split into the error and the still-checked-out handle
    pub fn into_parts(self) -> (CacheError, Protected<P>) {
        (self.error, self.handle)
    }
}

impl<P> fmt::Debug for UnprotectError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnprotectError")
            .field("error", &self.error)
            .field("handle", &self.handle)
            .finish()
    }
}

impl<P> fmt::Display for UnprotectError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to unprotect entry at {:#x}: {}", self.handle.addr, self.error)
    }
}

/// Dropping the handle leaves the address checked out; later whole-cache
/// flushes then report `ProtectViolation`.
impl<P> From<UnprotectError<P>> for CacheError {
    fn from(e: UnprotectError<P>) -> Self {
        e.error
    }
}
