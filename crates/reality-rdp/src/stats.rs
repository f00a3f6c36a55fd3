//! Counters surfaced to the frontend's debug/perf displays.

use crate::framebuffer::FrameBufferStats;
use crate::texture::TextureStats;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RdpStats {
    pub combiner_hits: u64,
    pub combiner_misses: u64,
    pub compiled_programs: u64,
    pub pipelines: u64,
    pub texture: TextureStats,
    pub texture_resident_bytes: u64,
    pub framebuffer: FrameBufferStats,
}
