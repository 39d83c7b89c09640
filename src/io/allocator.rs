//! File-space allocator
//!
//! Space is handed out from a free-extent map (best fit) or, failing that,
//! by moving the end-of-allocation (`eoa`) mark. Freed extents coalesce with
//! their neighbours; an extent that ends at `eoa` is given back by lowering
//! the mark instead of being tracked.
//!
//! The free map lives only in memory. Space freed during one open and not
//! reused before close is leaked in the file, which is harmless.

use std::collections::BTreeMap;

use tracing::trace;

use crate::cache::Addr;
use crate::error::{CacheError, Result};

/// End-of-allocation plus free extents
#[derive(Debug, Clone)]
pub struct FreeSpace {
    /// First byte past the highest allocation
    eoa: u64,
    /// Free extents: start → length
    free: BTreeMap<u64, u64>,
    /// Lowest address the allocator may hand out
    base: u64,
    /// Upper bound for `eoa`, if any
    limit: Option<u64>,
}

impl FreeSpace {
    /// Allocator whose space starts at `base` and currently ends at `eoa`
    pub fn new(base: u64, eoa: u64) -> Self {
        Self {
            eoa: eoa.max(base),
            free: BTreeMap::new(),
            base,
            limit: None,
        }
    }

    /// Refuse allocations that would push `eoa` past `limit`
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn eoa(&self) -> u64 {
        self.eoa
    }

    /// Total bytes in tracked free extents
    pub fn free_bytes(&self) -> u64 {
        self.free.values().sum()
    }

    /// Free extents in address order
    pub fn free_extents(&self) -> impl Iterator<Item = (Addr, u64)> + '_ {
        self.free.iter().map(|(&start, &len)| (start, len))
    }

    /// Reserve `nbytes` and return the address
    pub fn allocate(&mut self, nbytes: u64) -> Result<Addr> {
        if nbytes == 0 {
            return Err(CacheError::AllocationFailure(
                "zero-length allocation".into(),
            ));
        }

        // best fit among free extents
        let best = self
            .free
            .iter()
            .filter(|(_, &len)| len >= nbytes)
            .min_by_key(|(_, &len)| len)
            .map(|(&start, &len)| (start, len));

        if let Some((start, len)) = best {
            self.free.remove(&start);
            if len > nbytes {
                self.free.insert(start + nbytes, len - nbytes);
            }
            trace!(addr = start, nbytes, "allocated from free extent");
            return Ok(start);
        }

        let addr = self.eoa;
        let end = addr.checked_add(nbytes).ok_or_else(|| {
            CacheError::AllocationFailure(format!("{nbytes} bytes overflow the address space"))
        })?;
        if let Some(limit) = self.limit {
            if end > limit {
                return Err(CacheError::AllocationFailure(format!(
                    "{nbytes} bytes at {addr:#x} exceed the file size limit of {limit} bytes"
                )));
            }
        }

        self.eoa = end;
        trace!(addr, nbytes, eoa = end, "allocated at end of file");
        Ok(addr)
    }

    /// Return `nbytes` at `addr` to the allocator
    pub fn free(&mut self, addr: Addr, nbytes: u64) -> Result<()> {
        if nbytes == 0 {
            return Ok(());
        }
        let end = addr
            .checked_add(nbytes)
            .filter(|&end| addr >= self.base && end <= self.eoa)
            .ok_or_else(|| {
                CacheError::AllocationFailure(format!(
                    "free of {nbytes} bytes at {addr:#x} outside allocated space"
                ))
            })?;

        let overlaps_prev = self
            .free
            .range(..=addr)
            .next_back()
            .is_some_and(|(&start, &len)| start + len > addr);
        let overlaps_next = self.free.range(addr..end).next().is_some();
        if overlaps_prev || overlaps_next {
            return Err(CacheError::AllocationFailure(format!(
                "double free of {nbytes} bytes at {addr:#x}"
            )));
        }

        let mut start = addr;
        let mut len = nbytes;

        if let Some((&prev, &prev_len)) = self.free.range(..addr).next_back() {
            if prev + prev_len == addr {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&end) {
            len += next_len;
        }

        if start + len == self.eoa {
            self.eoa = start;
            trace!(addr, nbytes, eoa = self.eoa, "released tail space");
        } else {
            self.free.insert(start, len);
            trace!(addr, nbytes, "freed extent");
        }
        Ok(())
    }
}
