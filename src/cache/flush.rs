//! Write-back of dirty entries
//!
//! A whole-cache flush visits every resident entry (optionally in ascending
//! address order), writes back the dirty ones and, when destroying, empties
//! the table. One failing entry does not stop the rest from being written;
//! the first failure is reported once the pass completes.

use tracing::{debug, warn};

use crate::error::{CacheError, Result};

use super::{Addr, CacheClient, CacheStore, EntryKind};

/// Which addresses a flush covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFilter {
    /// Every resident entry
    All,
    /// A single address
    Only(Addr),
}

impl<P> CacheStore<P> {
    /// Write back dirty entries, optionally removing them
    ///
    /// With [`AddrFilter::All`] the flush fails with `ProtectViolation` when
    /// any address is still checked out, after everything else has been
    /// written. Pinned entries are written but survive a destroying flush.
    pub fn flush<C>(
        &mut self,
        client: &mut C,
        kind: Option<EntryKind>,
        addrs: AddrFilter,
        destroy: bool,
    ) -> Result<()>
    where
        C: CacheClient<Payload = P>,
    {
        match addrs {
            AddrFilter::Only(addr) => {
                // checked out counts regardless of the kind filter, as for a whole flush
                if self.is_protected(addr) {
                    return Err(CacheError::protect(addr, "cannot flush a checked-out entry"));
                }
                let matches = self
                    .entry(addr)
                    .is_some_and(|e| kind.map_or(true, |k| e.kind == k));
                if !matches {
                    return Ok(());
                }
                match self.evict(client, addr, destroy) {
                    Err(CacheError::Pinned(_)) => Ok(()),
                    other => other,
                }
            }
            AddrFilter::All => self.flush_all(client, kind, destroy),
        }
    }

    fn flush_all<C>(&mut self, client: &mut C, kind: Option<EntryKind>, destroy: bool) -> Result<()>
    where
        C: CacheClient<Payload = P>,
    {
        let mut order: Vec<(Addr, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.entry.as_ref().map(|e| (e, idx)))
            .filter(|(e, _)| kind.map_or(true, |k| e.kind == k))
            .map(|(e, idx)| (e.addr, idx))
            .collect();
        if self.sort_by_addr {
            order.sort_unstable_by_key(|&(addr, _)| addr);
        }

        let mut is_barrier = true;
        let mut written = 0usize;
        let mut first_error: Option<CacheError> = None;

        for (addr, idx) in order {
            let was_dirty = self.slots[idx].entry.as_ref().is_some_and(|e| e.dirty);

            match self.write_back_at(client, idx, destroy, is_barrier) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    if first_error.is_some() {
                        warn!(addr, error = %e, "additional flush failure");
                    } else {
                        first_error = Some(e);
                    }
                    is_barrier = false;
                    continue;
                }
            }
            if was_dirty {
                is_barrier = false;
            }

            let pinned = self.slots[idx].entry.as_ref().is_some_and(|e| e.pinned);
            if destroy && !pinned {
                self.discard_at(client, idx);
            }
        }

        debug!(written, destroy, "flushed cache");

        if let Some(e) = first_error {
            return Err(e);
        }
        if self.protected_count > 0 {
            let addr = self
                .slots
                .iter()
                .flat_map(|s| s.checkouts.iter())
                .map(|c| c.addr)
                .min()
                .unwrap_or_default();
            return Err(CacheError::protect(
                addr,
                format!("{} entries still checked out", self.protected_count),
            ));
        }
        Ok(())
    }

    /// Unpin everything and flush the whole cache with destroy
    ///
    /// Used when the file is closed; the table is empty afterwards unless
    /// some write-back failed or an address is still checked out.
    pub fn teardown<C>(&mut self, client: &mut C) -> Result<()>
    where
        C: CacheClient<Payload = P>,
    {
        for slot in &mut self.slots {
            if let Some(entry) = slot.entry.as_mut() {
                entry.pinned = false;
            }
            for checkout in &mut slot.checkouts {
                checkout.pinned = false;
            }
        }
        self.flush(client, None, AddrFilter::All, true)
    }
}
