//! `reality-rdp` emulates an N64-class rasterizer pipeline on top of wgpu.
//!
//! The guest programs its GPU with immediate-mode register words that
//! implicitly select a blend/combine pipeline per draw; the host wants
//! compiled pipelines and bound textures. This crate bridges the two:
//!
//! - [`combine`] decodes combine words into simplified per-channel op
//!   sequences, generates WGSL, and memoizes one compiled program per
//!   distinct [`CombinerKey`], with an optional persistent cache on disk.
//! - [`texture`] maps fingerprints of sampled RDRAM bytes to host textures,
//!   with byte-budgeted LRU eviction and a disjoint pool for textures backed
//!   by live render targets.
//! - [`framebuffer`] tracks host render targets addressed by RDRAM ranges,
//!   resolves overlapping declarations, detects CPU writes into a target's
//!   backing memory through cheap validity witnesses, and copies pixels both
//!   ways on demand.
//!
//! All state hangs off one [`RdpContext`] per emulation session; there are
//! no process-wide caches.

pub mod combine;
pub mod config;
pub mod context;
pub mod draw;
pub mod error;
pub mod formats;
pub mod framebuffer;
pub mod pipeline;
pub mod stats;
pub mod texture;

pub use combine::key::{CombinerKey, CycleMode, FilterMode, PrimitiveKind};
pub use combine::{CombinerCache, CombinerParams, CompiledCombiner};
pub use config::{CombinerFeatures, DiskCacheOptions, RdpConfig, TitleTweak};
pub use context::RdpContext;
pub use draw::{DrawCall, Vertex};
pub use error::RdpError;
pub use formats::{FbFormat, PaletteFormat, TexFormat};
pub use framebuffer::{DeclareParams, FrameBufferRegistry};
pub use pipeline::{BlendMode, DepthState};
pub use stats::RdpStats;
pub use texture::{TextureCache, TileDescriptor, WrapFlags};
