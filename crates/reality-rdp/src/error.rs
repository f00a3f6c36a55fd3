use reality_rdram::RdramError;
use thiserror::Error;

/// Errors surfaced by the video core.
///
/// Nothing here is fatal to the host process: resource failures skip the
/// current draw, RDRAM bounds failures drop the affected copy, and cache
/// layers degrade to a cold start.
#[derive(Debug, Error)]
pub enum RdpError {
    #[error("RDRAM access failed: {0}")]
    Rdram(#[from] RdramError),

    #[error("texture allocation failed ({width}x{height}, {bytes} bytes)")]
    TextureAllocation {
        width: u32,
        height: u32,
        bytes: u64,
    },

    #[error("draw issued without a declared render target")]
    MissingRenderTarget,

    #[error("render target readback only supported for RGBA8 host targets, got {0:?}")]
    UnsupportedReadbackFormat(wgpu::TextureFormat),

    #[error("map_async callback dropped unexpectedly")]
    MapAsyncDropped,

    #[error("map_async failed: {0}")]
    MapAsync(String),
}
