use std::path::PathBuf;

use bitflags::bitflags;

bitflags! {
    /// Feature switches that change what the combiner compiler emits.
    ///
    /// These participate in the on-disk cache fingerprint: flipping any of
    /// them invalidates previously persisted programs wholesale.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CombinerFeatures: u32 {
        /// Emit the noise input as a per-draw uniform instead of constant 0.5.
        const NOISE_UNIFORM = 1 << 0;
        /// Clamp each cycle result to [0, 1] (hardware behavior). Disabling
        /// trades accuracy for fewer ALU ops on weak hosts.
        const CLAMP_CYCLES = 1 << 1;
    }
}

impl Default for CombinerFeatures {
    fn default() -> Self {
        CombinerFeatures::NOISE_UNIFORM | CombinerFeatures::CLAMP_CYCLES
    }
}

/// Per-title draw behavior, selected once at load from static content
/// identification. The set is closed on purpose; see `draw.rs` for the
/// behavior each variant changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TitleTweak {
    #[default]
    Standard,
    /// Always snapshot render targets, even large auxiliary ones. For titles
    /// that stream over aux buffers in patterns the marker witness misses.
    ForceTargetSnapshot,
    /// Skip auxiliary (sub-frame) render targets entirely; draws into them
    /// render nothing. For titles that declare throwaway scratch buffers
    /// every frame.
    IgnoreAuxTargets,
}

/// Options for the persistent combiner program cache.
#[derive(Clone, Debug)]
pub struct DiskCacheOptions {
    pub path: PathBuf,
    pub features: CombinerFeatures,
}

/// Session configuration. One instance per [`crate::RdpContext`]; nothing in
/// the core reads global state.
#[derive(Clone, Debug)]
pub struct RdpConfig {
    /// Total bytes of decoded texture data kept resident before LRU eviction.
    pub texture_budget_bytes: u64,
    /// Hard ceiling on cached texture entries, enforced before insertion.
    pub texture_entry_ceiling: usize,
    /// Fraction of sampled bytes allowed to differ before a render target's
    /// validity witness fails. Tuned, not derived; see `framebuffer::validity`.
    pub validity_tolerance: f64,
    /// Sample one position every this many bytes when checking witnesses.
    pub validity_sample_stride: usize,
    /// Regions larger than this get a planted marker witness instead of a
    /// full snapshot.
    pub snapshot_limit_bytes: usize,
    /// Render target resolution multiplier over native.
    pub resolution_scale: u32,
    pub combiner_features: CombinerFeatures,
    pub disk_cache: Option<DiskCacheOptions>,
    pub title_tweak: TitleTweak,
}

impl Default for RdpConfig {
    fn default() -> Self {
        Self {
            texture_budget_bytes: 64 << 20,
            texture_entry_ceiling: 4096,
            validity_tolerance: 0.01,
            validity_sample_stride: 64,
            snapshot_limit_bytes: 640 * 480 * 4,
            resolution_scale: 1,
            combiner_features: CombinerFeatures::default(),
            disk_cache: None,
            title_tweak: TitleTweak::Standard,
        }
    }
}
