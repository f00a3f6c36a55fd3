//! Address-range bookkeeping for render-target regions.
//!
//! Device-free so the overlap rules can be tested directly.

use crate::formats::FbFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionState {
    /// Just created, nothing rendered yet.
    Building,
    /// Current render target.
    Active,
    /// Exists but is not current.
    Inactive,
}

/// Geometry of one region of RDRAM owned by a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionDesc {
    pub address: u32,
    /// Width in guest pixels; also the row stride (targets are packed).
    pub width: u32,
    pub height: u32,
    pub format: FbFormat,
    /// Host resolution multiplier over native.
    pub scale: u32,
}

impl RegionDesc {
    pub fn stride_bytes(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }

    pub fn byte_len(&self) -> u32 {
        self.stride_bytes() * self.height
    }

    pub fn end(&self) -> u32 {
        self.address + self.byte_len()
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.address && address < self.end()
    }

    pub fn intersects(&self, start: u32, end: u32) -> bool {
        self.address < end && start < self.end()
    }

    /// Host pixel dimensions of the backing texture.
    pub fn scaled_size(&self) -> (u32, u32) {
        (self.width * self.scale, self.height * self.scale)
    }
}

/// What to do with an existing region when a new one is declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapAction {
    /// Ranges are disjoint; both live on.
    Keep,
    /// Same address and parameters; the existing target can be reused.
    Identical,
    /// The new region starts inside the existing one's trailing rows;
    /// truncate the existing region to end where the new one starts.
    Truncate { new_height: u32 },
    /// Anything else. Guessing at a split is worse than rebuilding from
    /// RDRAM, so the older region is removed.
    Remove,
}

/// How many trailing rows may overlap before the regions are treated as
/// unrelated. Incremental redraw reuses the tail of a taller buffer; a
/// deeper overlap means the old region is stale.
pub const MAX_TRAILING_OVERLAP_ROWS: u32 = 5;

/// Decides the fate of `older` when `newer` is declared.
pub fn resolve_overlap(older: &RegionDesc, newer: &RegionDesc) -> OverlapAction {
    if !older.intersects(newer.address, newer.end()) {
        return OverlapAction::Keep;
    }
    if older == newer {
        return OverlapAction::Identical;
    }
    if newer.address == older.address {
        // Same base, different parameters: recreate.
        return OverlapAction::Remove;
    }

    let compatible = newer.address > older.address
        && older.width == newer.width
        && older.format == newer.format
        && (newer.address - older.address) % older.stride_bytes() == 0;
    if compatible {
        let overlap_bytes = older.end() - newer.address;
        let overlap_rows = overlap_bytes.div_ceil(older.stride_bytes());
        if overlap_rows < MAX_TRAILING_OVERLAP_ROWS {
            return OverlapAction::Truncate {
                new_height: (newer.address - older.address) / older.stride_bytes(),
            };
        }
    }
    OverlapAction::Remove
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(address: u32, width: u32, height: u32) -> RegionDesc {
        RegionDesc {
            address,
            width,
            height,
            format: FbFormat::Rgba16,
            scale: 1,
        }
    }

    #[test]
    fn disjoint_regions_are_kept() {
        let a = desc(0x1000, 320, 240);
        let b = desc(a.end(), 320, 240);
        assert_eq!(resolve_overlap(&a, &b), OverlapAction::Keep);
    }

    #[test]
    fn identical_regions_are_reused() {
        let a = desc(0x1000, 320, 240);
        assert_eq!(resolve_overlap(&a, &a), OverlapAction::Identical);
    }

    #[test]
    fn same_address_new_parameters_recreates() {
        let a = desc(0x1000, 320, 240);
        let b = desc(0x1000, 640, 240);
        assert_eq!(resolve_overlap(&a, &b), OverlapAction::Remove);
    }

    #[test]
    fn small_trailing_overlap_truncates() {
        let a = desc(0x1000, 320, 240);
        // New region starts 3 rows before the end of `a`.
        let b_start = a.end() - 3 * a.stride_bytes();
        let b = desc(b_start, 320, 240);
        assert_eq!(
            resolve_overlap(&a, &b),
            OverlapAction::Truncate { new_height: 237 }
        );
    }

    #[test]
    fn deep_overlap_removes_older_region() {
        let a = desc(0x1000, 320, 240);
        let b_start = a.address + 100 * a.stride_bytes();
        let b = desc(b_start, 320, 240);
        assert_eq!(resolve_overlap(&a, &b), OverlapAction::Remove);
    }

    #[test]
    fn unaligned_overlap_removes_older_region() {
        let a = desc(0x1000, 320, 240);
        let b = desc(a.end() - 2 * a.stride_bytes() + 2, 320, 240);
        assert_eq!(resolve_overlap(&a, &b), OverlapAction::Remove);
    }

    #[test]
    fn mismatched_width_removes_older_region() {
        let a = desc(0x1000, 320, 240);
        let b_start = a.end() - 2 * a.stride_bytes();
        let b = desc(b_start, 640, 240);
        assert_eq!(resolve_overlap(&a, &b), OverlapAction::Remove);
    }
}
