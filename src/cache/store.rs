//! Direct-mapped metadata cache
//!
//! Entries live in a fixed array of buckets indexed by `addr % slots`. A
//! bucket holds at most one resident entry; bringing a different address
//! into an occupied bucket writes back (if dirty) and destroys the occupant.
//!
//! ```text
//!   bucket 0      bucket 1      bucket 2            bucket n-1
//! ┌───────────┬───────────┬───────────┬─ ... ─┬───────────┐
//! │ entry @a  │   empty   │ entry @c  │       │ entry @z  │
//! │ [@b out]  │           │           │       │           │
//! └───────────┴───────────┴───────────┴─ ... ─┴───────────┘
//! ```
//!
//! A checked-out entry is not resident: its payload lives in the caller's
//! [`Protected`] handle and only the `(addr, kind)` record stays behind in
//! the bucket's checkout list. The checkout list is what makes every other
//! access to that address fail with `ProtectViolation`.

use tracing::{debug, trace, warn};

use crate::error::{CacheError, Result};
use crate::image::ImageLoader;

use super::{
    Addr, CacheClient, CacheEntry, CacheStats, EntryBody, EntryInfo, EntryKind, Protected,
    UnprotectError, UNDEF_ADDR,
};
use super::stats::Diagnostics;

// =============================================================================
// Buckets
// =============================================================================

/// Record of an outstanding checkout
#[derive(Debug, Clone, Copy)]
pub(crate) struct Checkout {
    pub(crate) addr: Addr,
    pub(crate) kind: EntryKind,
    pub(crate) pinned: bool,
}

/// One bucket of the table
#[derive(Debug)]
pub(crate) struct Slot<P> {
    pub(crate) entry: Option<CacheEntry<P>>,
    pub(crate) checkouts: Vec<Checkout>,
}

impl<P> Slot<P> {
    fn new() -> Self {
        Self {
            entry: None,
            checkouts: Vec::new(),
        }
    }
}

// =============================================================================
// CacheStore
// =============================================================================

/// Fixed-size, address-keyed cache of decoded metadata objects
///
/// The store never touches the file itself: every load, decode and
/// write-back goes through the [`CacheClient`] passed to each call.
#[derive(Debug)]
pub struct CacheStore<P> {
    pub(crate) slots: Vec<Slot<P>>,
    pub(crate) protected_count: usize,
    pub(crate) dirty_count: usize,
    pub(crate) sort_by_addr: bool,
    pub(crate) diag: Diagnostics,
    pub(crate) image: ImageLoader,
}

impl<P> CacheStore<P> {
    /// Create a store with `nslots` buckets (at least one)
    pub fn new(nslots: usize) -> Self {
        let nslots = nslots.max(1);
        let mut slots = Vec::with_capacity(nslots);
        slots.resize_with(nslots, Slot::new);

        Self {
            slots,
            protected_count: 0,
            dirty_count: 0,
            sort_by_addr: true,
            diag: Diagnostics::default(),
            image: ImageLoader::none(),
        }
    }

    /// Whether whole-cache flushes write entries in ascending address order
    pub fn with_sorted_flush(mut self, sorted: bool) -> Self {
        self.sort_by_addr = sorted;
        self
    }

    /// Install the image loader created when the file was opened
    pub fn attach_image(&mut self, loader: ImageLoader) {
        self.image = loader;
    }

    pub fn image(&self) -> &ImageLoader {
        &self.image
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Return the decoded payload at `addr`, loading it on a miss
    ///
    /// The returned reference is valid until the next call on the store.
    pub fn find_or_load<C>(
        &mut self,
        client: &mut C,
        kind: EntryKind,
        addr: Addr,
        aux: &C::Aux,
    ) -> Result<&P>
    where
        C: CacheClient<Payload = P>,
    {
        check_addr(addr)?;
        self.resolve_pending_image(client)?;
        if self.is_protected(addr) {
            return Err(CacheError::protect(addr, "entry is checked out"));
        }

        let idx = self.bucket(addr);
        match self.resident_kind(idx, addr) {
            Some(found) if found != kind => {
                Err(CacheError::TypeMismatch {
                    addr,
                    expected: kind,
                    found,
                })
            }
            Some(_) => {
                self.diag.kind(kind).hits += 1;
                self.decode_in_place(client, idx)
            }
            None => {
                self.diag.kind(kind).misses += 1;
                let payload = client
                    .load(kind, addr, aux)
                    .map_err(|e| CacheError::load(addr, kind, e))?;
                let size = client.size(kind, &payload);

                // the occupant goes only after the new object is in hand
                if let Err(e) = self.displace(client, idx) {
                    client.free(kind, addr, payload);
                    return Err(e);
                }
                trace!(addr, %kind, size, "loaded entry");
                self.slots[idx].entry = Some(CacheEntry::decoded(addr, kind, payload, size, false));
                self.decode_in_place(client, idx)
            }
        }
    }

    /// Check out the payload at `addr` for exclusive use
    ///
    /// The entry leaves the table until the handle is passed to
    /// [`unprotect`](Self::unprotect).
    pub fn protect<C>(
        &mut self,
        client: &mut C,
        kind: EntryKind,
        addr: Addr,
        aux: &C::Aux,
    ) -> Result<Protected<P>>
    where
        C: CacheClient<Payload = P>,
    {
        check_addr(addr)?;
        self.resolve_pending_image(client)?;
        if self.is_protected(addr) {
            return Err(CacheError::protect(addr, "entry is already checked out"));
        }

        let idx = self.bucket(addr);
        let (payload, was_dirty, pinned) = match self.resident_kind(idx, addr) {
            Some(found) if found != kind => {
                return Err(CacheError::TypeMismatch {
                    addr,
                    expected: kind,
                    found,
                })
            }
            Some(_) => self.take_resident(client, idx)?,
            None => {
                self.diag.kind(kind).misses += 1;
                let payload = client
                    .load(kind, addr, aux)
                    .map_err(|e| CacheError::load(addr, kind, e))?;
                (payload, false, false)
            }
        };

        self.slots[idx].checkouts.push(Checkout { addr, kind, pinned });
        self.protected_count += 1;
        trace!(addr, %kind, "protected entry");

        Ok(Protected::new(addr, kind, payload, was_dirty))
    }

    /// Return a checked-out payload to the cache
    ///
    /// The entry is dirty afterwards if `dirty` is set or it was dirty when it
    /// was protected. On failure the handle is handed back untouched and the
    /// address stays checked out.
    pub fn unprotect<C>(
        &mut self,
        client: &mut C,
        handle: Protected<P>,
        dirty: bool,
    ) -> std::result::Result<(), UnprotectError<P>>
    where
        C: CacheClient<Payload = P>,
    {
        let addr = handle.addr;
        let idx = self.bucket(addr);

        let pos = match self.slots[idx].checkouts.iter().position(|c| c.addr == addr) {
            Some(pos) => pos,
            None => {
                return Err(UnprotectError {
                    error: CacheError::protect(addr, "entry is not checked out"),
                    handle,
                })
            }
        };
        let checkout = self.slots[idx].checkouts[pos];
        if checkout.kind != handle.kind {
            return Err(UnprotectError {
                error: CacheError::TypeMismatch {
                    addr,
                    expected: checkout.kind,
                    found: handle.kind,
                },
                handle,
            });
        }

        if let Err(error) = self.displace(client, idx) {
            return Err(UnprotectError { error, handle });
        }

        self.slots[idx].checkouts.swap_remove(pos);
        self.protected_count -= 1;

        let dirty = dirty || handle.was_dirty;
        let size = client.size(handle.kind, &handle.payload);
        let mut entry = CacheEntry::decoded(addr, handle.kind, handle.payload, size, dirty);
        entry.pinned = checkout.pinned;
        if dirty {
            self.dirty_count += 1;
        }
        self.slots[idx].entry = Some(entry);
        trace!(addr, dirty, "unprotected entry");

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Register a freshly created object at `addr`
    ///
    /// New entries are dirty. Whatever occupies the bucket, including an
    /// older copy of the same address, is written back and destroyed first.
    pub fn insert<C>(&mut self, client: &mut C, kind: EntryKind, addr: Addr, payload: P) -> Result<()>
    where
        C: CacheClient<Payload = P>,
    {
        check_addr(addr)?;
        if self.is_protected(addr) {
            return Err(CacheError::protect(addr, "cannot insert over a checked-out entry"));
        }

        let idx = self.bucket(addr);
        if let Err(e) = self.displace(client, idx) {
            client.free(kind, addr, payload);
            return Err(e);
        }

        let size = client.size(kind, &payload);
        self.slots[idx].entry = Some(CacheEntry::decoded(addr, kind, payload, size, true));
        self.dirty_count += 1;
        self.diag.kind(kind).inserts += 1;
        trace!(addr, %kind, size, "inserted entry");

        Ok(())
    }

    /// Re-key a resident entry from `old` to `new`
    ///
    /// Does nothing when no entry of `kind` is resident at `old`.
    pub fn rename<C>(&mut self, client: &mut C, kind: EntryKind, old: Addr, new: Addr) -> Result<()>
    where
        C: CacheClient<Payload = P>,
    {
        check_addr(old)?;
        check_addr(new)?;
        if self.is_protected(old) || self.is_protected(new) {
            return Err(CacheError::protect(old, "cannot rename a checked-out entry"));
        }

        let old_idx = self.bucket(old);
        if self.resident_kind(old_idx, old) != Some(kind) || old == new {
            return Ok(());
        }

        let new_idx = self.bucket(new);
        if new_idx != old_idx {
            self.displace(client, new_idx)?;
        }

        let mut entry = match self.slots[old_idx].entry.take() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        entry.addr = new;
        if let EntryBody::Decoded(payload) = &mut entry.body {
            client.on_rename(kind, payload, old, new);
        }
        self.slots[new_idx].entry = Some(entry);
        debug!(old, new, %kind, "renamed entry");

        Ok(())
    }

    /// Write back the entry at `addr` if dirty; remove it when `destroy`
    ///
    /// Does nothing when the address is not resident. A pinned entry is
    /// written but never removed; asking to destroy it fails with `Pinned`.
    pub fn evict<C>(&mut self, client: &mut C, addr: Addr, destroy: bool) -> Result<()>
    where
        C: CacheClient<Payload = P>,
    {
        check_addr(addr)?;
        if self.is_protected(addr) {
            return Err(CacheError::protect(addr, "cannot flush a checked-out entry"));
        }

        let idx = self.bucket(addr);
        if self.resident_kind(idx, addr).is_none() {
            return Ok(());
        }

        self.write_back_at(client, idx, destroy, false)?;
        if destroy {
            if self.slots[idx].entry.as_ref().is_some_and(|e| e.pinned) {
                return Err(CacheError::Pinned(addr));
            }
            self.discard_at(client, idx);
        }
        Ok(())
    }

    /// Keep the entry at `addr` resident until unpinned
    pub fn pin(&mut self, addr: Addr) -> Result<()> {
        self.set_pinned(addr, true)
    }

    pub fn unpin(&mut self, addr: Addr) -> Result<()> {
        self.set_pinned(addr, false)
    }

    fn set_pinned(&mut self, addr: Addr, pinned: bool) -> Result<()> {
        check_addr(addr)?;
        let idx = self.bucket(addr);
        let slot = &mut self.slots[idx];

        if let Some(entry) = slot.entry.as_mut().filter(|e| e.addr == addr) {
            entry.pinned = pinned;
            return Ok(());
        }
        if let Some(checkout) = slot.checkouts.iter_mut().find(|c| c.addr == addr) {
            checkout.pinned = pinned;
            return Ok(());
        }
        Err(CacheError::NotFound(format!("no cached entry at {addr:#x}")))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Number of buckets
    pub fn nslots(&self) -> usize {
        self.slots.len()
    }

    /// Resident entries (decoded or prefetched)
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn protected_count(&self) -> usize {
        self.protected_count
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_count
    }

    /// True while `addr` is resident (checked-out entries are not)
    pub fn contains(&self, addr: Addr) -> bool {
        self.entry(addr).is_some()
    }

    /// True while `addr` is checked out
    pub fn is_protected(&self, addr: Addr) -> bool {
        if addr == UNDEF_ADDR {
            return false;
        }
        self.slots[self.bucket(addr)]
            .checkouts
            .iter()
            .any(|c| c.addr == addr)
    }

    /// The resident entry at `addr`, if any
    pub fn entry(&self, addr: Addr) -> Option<&CacheEntry<P>> {
        if addr == UNDEF_ADDR {
            return None;
        }
        self.slots[self.bucket(addr)]
            .entry
            .as_ref()
            .filter(|e| e.addr == addr)
    }

    pub fn entry_info(&self, addr: Addr) -> Option<EntryInfo> {
        self.entry(addr).map(CacheEntry::info)
    }

    /// Resident entries in bucket order
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry<P>> {
        self.slots.iter().filter_map(|s| s.entry.as_ref())
    }

    /// Snapshot of the cache's counters
    pub fn stats(&self) -> CacheStats {
        let mut resident = 0;
        let mut pinned = 0;
        for entry in self.entries() {
            resident += 1;
            if entry.pinned {
                pinned += 1;
            }
        }
        CacheStats::new(
            self.slots.len(),
            resident,
            self.protected_count,
            self.dirty_count,
            pinned,
            &self.diag,
        )
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    pub(crate) fn bucket(&self, addr: Addr) -> usize {
        (addr % self.slots.len() as u64) as usize
    }

    /// Kind of the entry resident at `addr` in bucket `idx`
    fn resident_kind(&self, idx: usize, addr: Addr) -> Option<EntryKind> {
        self.slots[idx]
            .entry
            .as_ref()
            .filter(|e| e.addr == addr)
            .map(|e| e.kind)
    }

    /// Payload of the resident entry in bucket `idx`, decoding prefetched
    /// image bytes first
    fn decode_in_place<C>(&mut self, client: &mut C, idx: usize) -> Result<&P>
    where
        C: CacheClient<Payload = P>,
    {
        let entry = self.slots[idx]
            .entry
            .as_mut()
            .ok_or_else(|| CacheError::NotFound(format!("bucket {idx} is empty")))?;

        if let EntryBody::Prefetched(raw) = &entry.body {
            let (addr, kind) = (entry.addr, entry.kind);
            let payload = client
                .deserialize(kind, addr, raw)
                .map_err(|e| CacheError::load(addr, kind, e))?;
            entry.size_on_disk = client.size(kind, &payload);
            entry.body = EntryBody::Decoded(payload);
            self.diag.prefetch_hits += 1;
            trace!(addr, %kind, "decoded prefetched entry");
        }

        match &entry.body {
            EntryBody::Decoded(payload) => Ok(payload),
            EntryBody::Prefetched(_) => unreachable!("prefetched body is decoded above"),
        }
    }

    /// Move the resident entry of bucket `idx` out of the table for a checkout
    fn take_resident<C>(&mut self, client: &mut C, idx: usize) -> Result<(P, bool, bool)>
    where
        C: CacheClient<Payload = P>,
    {
        let entry = match self.slots[idx].entry.take() {
            Some(entry) => entry,
            None => return Err(CacheError::NotFound(format!("bucket {idx} is empty"))),
        };
        let (addr, kind, dirty, pinned) = (entry.addr, entry.kind, entry.dirty, entry.pinned);

        let payload = match entry.body {
            EntryBody::Decoded(payload) => payload,
            EntryBody::Prefetched(raw) => match client.deserialize(kind, addr, &raw) {
                Ok(payload) => {
                    self.diag.prefetch_hits += 1;
                    payload
                }
                Err(e) => {
                    let mut restored = CacheEntry::prefetched(addr, kind, raw);
                    restored.pinned = pinned;
                    self.slots[idx].entry = Some(restored);
                    return Err(CacheError::load(addr, kind, e));
                }
            },
        };

        self.diag.kind(kind).hits += 1;
        if dirty {
            self.dirty_count -= 1;
        }
        Ok((payload, dirty, pinned))
    }

    /// Write back the entry in bucket `idx` if it is dirty
    ///
    /// Returns whether a write happened. On failure the entry stays resident
    /// and dirty.
    pub(crate) fn write_back_at<C>(
        &mut self,
        client: &mut C,
        idx: usize,
        destroy: bool,
        is_barrier: bool,
    ) -> Result<bool>
    where
        C: CacheClient<Payload = P>,
    {
        let entry = match self.slots[idx].entry.as_mut() {
            Some(entry) if entry.dirty => entry,
            _ => return Ok(false),
        };
        let payload = match &entry.body {
            EntryBody::Decoded(payload) => payload,
            EntryBody::Prefetched(_) => return Ok(false),
        };

        let written = client
            .flush(entry.kind, entry.addr, payload, destroy, is_barrier)
            .map_err(|e| CacheError::flush(entry.addr, entry.kind.name(), e))?;

        entry.dirty = false;
        entry.size_on_disk = written;
        self.dirty_count -= 1;
        self.diag.kind(entry.kind).flushes += 1;
        Ok(true)
    }

    /// Remove the entry in bucket `idx` without writing it
    pub(crate) fn discard_at<C>(&mut self, client: &mut C, idx: usize)
    where
        C: CacheClient<Payload = P>,
    {
        let entry = match self.slots[idx].entry.take() {
            Some(entry) => entry,
            None => return,
        };
        if entry.dirty {
            self.dirty_count -= 1;
        }
        self.diag.kind(entry.kind).evictions += 1;

        match entry.body {
            EntryBody::Decoded(payload) => client.free(entry.kind, entry.addr, payload),
            EntryBody::Prefetched(_) => self.diag.prefetch_dropped += 1,
        }
    }

    /// Clear bucket `idx` for a new entry, writing back the occupant
    fn displace<C>(&mut self, client: &mut C, idx: usize) -> Result<()>
    where
        C: CacheClient<Payload = P>,
    {
        let addr = match self.slots[idx].entry.as_ref() {
            None => return Ok(()),
            Some(entry) if entry.pinned => return Err(CacheError::Pinned(entry.addr)),
            Some(entry) => entry.addr,
        };

        self.write_back_at(client, idx, true, false)?;
        self.discard_at(client, idx);
        trace!(addr, bucket = idx, "displaced entry");
        Ok(())
    }

    /// Install a placeholder from a cache image
    ///
    /// Live state always wins: a resident entry at the same address, a
    /// decoded occupant of the bucket and an outstanding checkout all cause
    /// the record to be dropped. Returns whether the record was installed.
    pub(crate) fn install_prefetched(&mut self, addr: Addr, kind: EntryKind, raw: Vec<u8>) -> bool {
        let idx = self.bucket(addr);
        let slot = &mut self.slots[idx];

        if slot.checkouts.iter().any(|c| c.addr == addr) {
            self.diag.prefetch_dropped += 1;
            return false;
        }
        match slot.entry.as_ref() {
            None => {}
            Some(entry) if entry.is_prefetched() && entry.addr != addr => {
                warn!(addr, occupant = entry.addr, "image records collide in one bucket");
                self.diag.prefetch_dropped += 1;
            }
            Some(_) => {
                self.diag.prefetch_dropped += 1;
                return false;
            }
        }

        slot.entry = Some(CacheEntry::prefetched(addr, kind, raw));
        self.diag.prefetched += 1;
        true
    }
}

fn check_addr(addr: Addr) -> Result<()> {
    if addr == UNDEF_ADDR {
        Err(CacheError::Format("undefined address".into()))
    } else {
        Ok(())
    }
}
