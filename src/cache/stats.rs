//! Cache diagnostics
//!
//! Per-kind counters plus a snapshot type with a printable report.

use std::fmt::Write as _;

use super::EntryKind;

/// Counters for one entry kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    /// Lookups satisfied by a resident entry
    pub hits: u64,
    /// Lookups that had to load from the file
    pub misses: u64,
    /// Fresh objects registered with `insert`
    pub inserts: u64,
    /// Write-backs performed
    pub flushes: u64,
    /// Entries removed from the cache
    pub evictions: u64,
}

impl KindStats {
    /// Miss rate as a percentage of all lookups
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.misses as f64 / total as f64) * 100.0
        }
    }
}

/// Mutable counters kept by the store
#[derive(Debug, Clone, Default)]
pub(crate) struct Diagnostics {
    pub(crate) kinds: [KindStats; EntryKind::COUNT],
    pub(crate) prefetched: u64,
    pub(crate) prefetch_hits: u64,
    pub(crate) prefetch_dropped: u64,
}

impl Diagnostics {
    pub(crate) fn kind(&mut self, kind: EntryKind) -> &mut KindStats {
        &mut self.kinds[kind.index()]
    }
}

/// Point-in-time view of the cache
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of buckets
    pub slots: usize,
    /// Entries currently resident (decoded or prefetched)
    pub resident: usize,
    /// Outstanding checkouts
    pub protected: usize,
    /// Resident entries needing write-back
    pub dirty: usize,
    /// Resident pinned entries
    pub pinned: usize,
    /// Placeholders created from a cache image
    pub prefetched: u64,
    /// Placeholders later decoded on access
    pub prefetch_hits: u64,
    /// Placeholders discarded without ever being decoded
    pub prefetch_dropped: u64,
    per_kind: [KindStats; EntryKind::COUNT],
}

impl CacheStats {
    pub(crate) fn new(
        slots: usize,
        resident: usize,
        protected: usize,
        dirty: usize,
        pinned: usize,
        diag: &Diagnostics,
    ) -> Self {
        Self {
            slots,
            resident,
            protected,
            dirty,
            pinned,
            prefetched: diag.prefetched,
            prefetch_hits: diag.prefetch_hits,
            prefetch_dropped: diag.prefetch_dropped,
            per_kind: diag.kinds,
        }
    }

    /// Counters for one kind
    pub fn kind(&self, kind: EntryKind) -> KindStats {
        self.per_kind[kind.index()]
    }

    /// Sum of counters across kinds
    pub fn total(&self) -> KindStats {
        self.per_kind.iter().fold(KindStats::default(), |acc, k| KindStats {
            hits: acc.hits + k.hits,
            misses: acc.misses + k.misses,
            inserts: acc.inserts + k.inserts,
            flushes: acc.flushes + k.flushes,
            evictions: acc.evictions + k.evictions,
        })
    }

    /// Overall hit rate as a fraction in [0.0, 1.0]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        let lookups = total.hits + total.misses;
        if lookups == 0 {
            0.0
        } else {
            total.hits as f64 / lookups as f64
        }
    }

    /// Render a per-kind diagnostics table
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "   {:>20}  {:>8} {:>8} {:>8} {:>8} {:>8} {:>9}",
            "", "Hits", "Misses", "MissRate", "Inserts", "Flushes", "Evictions"
        );
        for kind in EntryKind::ALL {
            let k = self.kind(kind);
            let _ = writeln!(
                out,
                "   {:>20}: {:>8} {:>8} {:>7.2}% {:>8} {:>8} {:>9}",
                kind.name(),
                k.hits,
                k.misses,
                k.miss_rate(),
                k.inserts,
                k.flushes,
                k.evictions
            );
        }
        let _ = writeln!(
            out,
            "   resident={} protected={} dirty={} pinned={} slots={}",
            self.resident, self.protected, self.dirty, self.pinned, self.slots
        );
        let _ = writeln!(
            out,
            "   image: prefetched={} decoded={} dropped={}",
            self.prefetched, self.prefetch_hits, self.prefetch_dropped
        );
        out
    }
}
