//! Content-addressed cache of host textures.
//!
//! Textures have no stable guest identity: the rasterizer just points a
//! sampling unit at bytes in RDRAM. Admission is therefore keyed by a
//! fingerprint of the sampled content (see [`fingerprint`]), with
//! least-recently-used eviction against a byte budget. Render-target-backed
//! bindings live in a disjoint pool: they are never fingerprinted or
//! evicted, and disappear only when the owning target does.

pub mod decode;
pub mod fingerprint;
mod index;

use std::sync::Arc;

use hashbrown::HashMap;
use reality_rdram::Rdram;
use tracing::debug;

use crate::combine::shader_gen::MAX_TEXTURE_UNITS;
use crate::error::RdpError;

pub use self::fingerprint::{tile_fingerprint, TileDescriptor, WrapFlags};
use self::index::RecencyIndex;

/// One decoded-from-RDRAM host texture.
pub struct CachedTexture {
    pub fingerprint: u32,
    /// Sampled texel dimensions.
    pub logical_size: (u32, u32),
    /// Host allocation dimensions; equals `logical_size` unless snapped to a
    /// power of two for mip-mapping.
    pub backing_size: (u32, u32),
    pub byte_size: u64,
    pub wrap: WrapFlags,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl CachedTexture {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Texcoord-to-normalized scale for the backing allocation.
    pub fn uv_scale(&self) -> [f32; 2] {
        [
            1.0 / self.backing_size.0 as f32,
            1.0 / self.backing_size.1 as f32,
        ]
    }
}

/// A live render-target view registered as a sampling source.
struct TargetEntry {
    view: wgpu::TextureView,
    native_size: (u32, u32),
}

#[derive(Clone, Copy)]
enum BoundUnit {
    Decoded { fingerprint: u32 },
    Target { address: u32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureStats {
    /// Fingerprint matched the unit's current binding; nothing moved.
    pub cheap_hits: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// What the draw path needs to bind one sampling unit.
pub struct UnitBinding<'a> {
    pub view: &'a wgpu::TextureView,
    pub uv_scale: [f32; 2],
    pub wrap: WrapFlags,
}

pub struct TextureCache {
    index: RecencyIndex,
    entries: HashMap<u32, Arc<CachedTexture>>,
    targets: HashMap<u32, TargetEntry>,
    bound: [Option<BoundUnit>; MAX_TEXTURE_UNITS],
    stats: TextureStats,
}

impl TextureCache {
    pub fn new(budget_bytes: u64, entry_ceiling: usize) -> Self {
        Self {
            index: RecencyIndex::new(budget_bytes, entry_ceiling),
            entries: HashMap::new(),
            targets: HashMap::new(),
            bound: [None; MAX_TEXTURE_UNITS],
            stats: TextureStats::default(),
        }
    }

    pub fn stats(&self) -> TextureStats {
        self.stats
    }

    pub fn resident_bytes(&self) -> u64 {
        self.index.resident_bytes()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Refreshes the binding for one sampling unit from the tile descriptor.
    ///
    /// Called once per draw call per unit whose inputs might have changed.
    pub fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        unit: usize,
        tile: &TileDescriptor,
        rdram: &dyn Rdram,
    ) -> Result<(), RdpError> {
        let fingerprint = tile_fingerprint(rdram, tile)?;

        if let Some(BoundUnit::Decoded { fingerprint: bound }) = self.bound[unit] {
            if bound == fingerprint && self.entries.contains_key(&fingerprint) {
                self.stats.cheap_hits += 1;
                return Ok(());
            }
        }

        if self.index.touch(fingerprint) {
            self.stats.hits += 1;
            self.bound[unit] = Some(BoundUnit::Decoded { fingerprint });
            return Ok(());
        }

        self.stats.misses += 1;
        let entry = Arc::new(self.upload(device, queue, fingerprint, tile, rdram)?);
        for evicted in self.index.admit(fingerprint, entry.byte_size) {
            self.entries.remove(&evicted);
            self.stats.evictions += 1;
        }
        self.entries.insert(fingerprint, entry);
        self.bound[unit] = Some(BoundUnit::Decoded { fingerprint });
        Ok(())
    }

    fn upload(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        fingerprint: u32,
        tile: &TileDescriptor,
        rdram: &dyn Rdram,
    ) -> Result<CachedTexture, RdpError> {
        let rgba = decode::decode_tile(rdram, tile)?;
        let logical = (tile.width, tile.height);
        let backing = if tile.mipmapped {
            (
                tile.width.next_power_of_two(),
                tile.height.next_power_of_two(),
            )
        } else {
            logical
        };
        let byte_size = backing.0 as u64 * backing.1 as u64 * 4;

        // Oversized tiles skip the draw instead of tripping device validation.
        let max_dimension = device.limits().max_texture_dimension_2d;
        if backing.0 > max_dimension || backing.1 > max_dimension {
            return Err(RdpError::TextureAllocation {
                width: backing.0,
                height: backing.1,
                bytes: byte_size,
            });
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("reality-rdp.texture"),
            size: wgpu::Extent3d {
                width: backing.0,
                height: backing.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(logical.0 * 4),
                rows_per_image: Some(logical.1),
            },
            wgpu::Extent3d {
                width: logical.0,
                height: logical.1,
                depth_or_array_layers: 1,
            },
        );

        debug!(
            fingerprint = format_args!("0x{:08x}", fingerprint),
            width = logical.0,
            height = logical.1,
            format = ?tile.format,
            "uploaded texture"
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(CachedTexture {
            fingerprint,
            logical_size: logical,
            backing_size: backing,
            byte_size,
            wrap: tile.wrap,
            texture,
            view,
        })
    }

    /// Binds a live render target as the unit's sampling source. No
    /// fingerprint or eviction applies; the caller is responsible for the
    /// read-after-write hazard check when `address` is the current target.
    pub fn bind_target(&mut self, unit: usize, address: u32) -> bool {
        if !self.targets.contains_key(&address) {
            return false;
        }
        self.bound[unit] = Some(BoundUnit::Target { address });
        true
    }

    /// Registers a render target's texture in the target-backed pool.
    /// Called by the frame buffer registry when a target is (re)created.
    pub fn attach_target(
        &mut self,
        address: u32,
        texture: &wgpu::Texture,
        native_size: (u32, u32),
    ) {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.targets.insert(
            address,
            TargetEntry {
                view,
                native_size,
            },
        );
    }

    /// Drops a target-backed entry. Called when the owning target dies.
    pub fn detach_target(&mut self, address: u32) {
        self.targets.remove(&address);
        for unit in &mut self.bound {
            if matches!(unit, Some(BoundUnit::Target { address: a }) if *a == address) {
                *unit = None;
            }
        }
    }

    pub fn binding(&self, unit: usize) -> Option<UnitBinding<'_>> {
        match self.bound[unit]? {
            BoundUnit::Decoded { fingerprint } => {
                let entry = self.entries.get(&fingerprint)?;
                Some(UnitBinding {
                    view: &entry.view,
                    uv_scale: entry.uv_scale(),
                    wrap: entry.wrap,
                })
            }
            BoundUnit::Target { address } => {
                let entry = self.targets.get(&address)?;
                Some(UnitBinding {
                    view: &entry.view,
                    uv_scale: [
                        1.0 / entry.native_size.0 as f32,
                        1.0 / entry.native_size.1 as f32,
                    ],
                    wrap: WrapFlags::CLAMP_S | WrapFlags::CLAMP_T,
                })
            }
        }
    }

    /// Drops every decoded entry (cache-clear command, texture pack reload).
    /// Target-backed entries survive; their lifetime belongs to the targets.
    pub fn invalidate_decoded(&mut self) {
        self.entries.clear();
        self.index.clear();
        for unit in &mut self.bound {
            if matches!(unit, Some(BoundUnit::Decoded { .. })) {
                *unit = None;
            }
        }
    }

    /// Full teardown, including target-backed entries.
    pub fn clear(&mut self) {
        self.invalidate_decoded();
        self.targets.clear();
        self.bound = [None; MAX_TEXTURE_UNITS];
    }
}
