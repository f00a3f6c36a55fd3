//! Recency/budget bookkeeping for the texture cache.
//!
//! Kept separate from the wgpu objects so the admission and eviction rules
//! can be exercised without a device.

use lru::LruCache;

/// Tracks fingerprints in most-recently-used order with a byte budget and an
/// entry-count ceiling.
pub struct RecencyIndex {
    entries: LruCache<u32, u64>,
    resident_bytes: u64,
    budget_bytes: u64,
    entry_ceiling: usize,
}

impl RecencyIndex {
    pub fn new(budget_bytes: u64, entry_ceiling: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            resident_bytes: 0,
            budget_bytes,
            entry_ceiling: entry_ceiling.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    pub fn contains(&self, fingerprint: u32) -> bool {
        self.entries.contains(&fingerprint)
    }

    /// Promotes `fingerprint` to most-recently-used. Returns false on miss.
    pub fn touch(&mut self, fingerprint: u32) -> bool {
        self.entries.get(&fingerprint).is_some()
    }

    /// Admits a new entry at most-recently-used and returns the fingerprints
    /// evicted to honor the ceiling (checked before insertion) and the byte
    /// budget (drained from the least-recently-used tail afterwards). The
    /// entry being admitted is never evicted by its own admission.
    pub fn admit(&mut self, fingerprint: u32, bytes: u64) -> Vec<u32> {
        let mut evicted = Vec::new();

        while self.entries.len() >= self.entry_ceiling {
            match self.pop_lru() {
                Some(fp) => evicted.push(fp),
                None => break,
            }
        }

        self.entries.push(fingerprint, bytes);
        self.resident_bytes += bytes;

        while self.resident_bytes > self.budget_bytes && self.entries.len() > 1 {
            match self.pop_lru() {
                Some(fp) => evicted.push(fp),
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, fingerprint: u32) -> bool {
        match self.entries.pop(&fingerprint) {
            Some(bytes) => {
                self.resident_bytes -= bytes;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.resident_bytes = 0;
    }

    fn pop_lru(&mut self) -> Option<u32> {
        let (fp, bytes) = self.entries.pop_lru()?;
        self.resident_bytes -= bytes;
        Some(fp)
    }
}
