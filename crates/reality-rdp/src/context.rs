//! The per-session context owning every cache.
//!
//! One `RdpContext` exists per active emulation session; nothing in this
//! crate reads process-wide state. Lifecycle is explicit: construct with a
//! device, call [`RdpContext::shutdown`] (or drop) to tear down in
//! dependency order.

use hashbrown::HashMap;
use reality_rdram::{Rdram, WriteLog};
use tracing::debug;

use crate::combine::disk_cache::CombinerDiskCache;
use crate::combine::shader_gen::CombinerGlobals;
use crate::combine::{CombinerCache, CombinerParams};
use crate::config::RdpConfig;
use crate::error::RdpError;
use crate::framebuffer::{DeclareParams, FrameBufferRegistry, TargetEvent};
use crate::pipeline::PipelineCache;
use crate::stats::RdpStats;
use crate::texture::{TextureCache, TileDescriptor};

pub struct RdpContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) config: RdpConfig,
    pub(crate) combiner: CombinerCache,
    pub(crate) pipelines: PipelineCache,
    pub(crate) textures: TextureCache,
    pub(crate) framebuffers: FrameBufferRegistry,
    pub(crate) globals_buffer: wgpu::Buffer,
    pub(crate) samplers: HashMap<(bool, u8), wgpu::Sampler>,
    pub(crate) white_view: wgpu::TextureView,
    // Keeps the 1x1 fallback texture alive for `white_view`.
    _white_texture: wgpu::Texture,
    shut_down: bool,
}

impl RdpContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, config: RdpConfig) -> Self {
        let disk = config
            .disk_cache
            .as_ref()
            .map(|opts| CombinerDiskCache::open(opts.path.clone(), opts.features));
        let combiner = CombinerCache::new(config.combiner_features, disk);
        let pipelines = PipelineCache::new(&device);
        let textures = TextureCache::new(config.texture_budget_bytes, config.texture_entry_ceiling);
        let framebuffers = FrameBufferRegistry::new(&config);

        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("reality-rdp.globals"),
            size: std::mem::size_of::<CombinerGlobals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let (white_texture, white_view) = create_white_texture(&device, &queue);

        Self {
            device,
            queue,
            config,
            combiner,
            pipelines,
            textures,
            framebuffers,
            globals_buffer,
            samplers: HashMap::new(),
            white_view,
            _white_texture: white_texture,
            shut_down: false,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn config(&self) -> &RdpConfig {
        &self.config
    }

    /// Read-only view of the render-target registry.
    pub fn framebuffers(&self) -> &FrameBufferRegistry {
        &self.framebuffers
    }

    /// Read-only view of the texture cache.
    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    /// Re-runs the validity witness of the region based at `address`.
    pub fn revalidate_target(
        &mut self,
        rdram: &dyn Rdram,
        address: u32,
    ) -> Result<bool, RdpError> {
        self.framebuffers.revalidate(address, rdram)
    }

    pub fn stats(&self) -> RdpStats {
        RdpStats {
            combiner_hits: self.combiner.hits(),
            combiner_misses: self.combiner.misses(),
            compiled_programs: self.combiner.len() as u64,
            pipelines: self.pipelines.len() as u64,
            texture: self.textures.stats(),
            texture_resident_bytes: self.textures.resident_bytes(),
            framebuffer: self.framebuffers.stats(),
        }
    }

    /// Latest env/prim colors and friends from the control plane.
    pub fn set_combiner_parameters(&mut self, params: CombinerParams) {
        self.combiner.set_parameters(params);
    }

    /// Declares the current render target; see
    /// [`FrameBufferRegistry::declare_target`] for the reuse/overlap rules.
    pub fn declare_target(
        &mut self,
        rdram: &dyn Rdram,
        params: DeclareParams,
    ) -> Result<(), RdpError> {
        let events = self
            .framebuffers
            .declare_target(&self.device, rdram, params)?;
        self.apply_target_events(&events);

        if let Some(address) = self.framebuffers.current_address() {
            // A reused target's pool entry may still point at a self-sample
            // snapshot; re-point it at the live texture.
            if let Some(region) = self.framebuffers.region(address) {
                self.textures.attach_target(
                    address,
                    region.texture(),
                    (region.desc.width, region.desc.height),
                );
            }
            // A reused target whose witness failed must reload from RDRAM
            // before this frame draws over it.
            if self
                .framebuffers
                .region(address)
                .is_some_and(|r| r.needs_resync)
            {
                self.framebuffers
                    .copy_from_rdram(&self.queue, rdram, address)?;
            }
        }
        Ok(())
    }

    /// Declares the depth plane's RDRAM address.
    pub fn set_depth_plane(&mut self, address: u32) {
        self.framebuffers.set_depth_address(address);
    }

    /// Refreshes one texture sampling unit from its tile descriptor.
    pub fn update_texture(
        &mut self,
        rdram: &dyn Rdram,
        unit: usize,
        tile: &TileDescriptor,
    ) -> Result<(), RdpError> {
        self.textures
            .update(&self.device, &self.queue, unit, tile, rdram)
    }

    /// Serializes a render target's pixels back into RDRAM.
    pub fn copy_to_rdram(&mut self, rdram: &dyn Rdram, address: u32) -> Result<bool, RdpError> {
        self.framebuffers
            .copy_to_rdram(&self.device, &self.queue, rdram, address)
    }

    /// Reloads the target owning `address` from RDRAM after direct CPU pixel
    /// writes. No owner is a legitimate no-op.
    pub fn copy_from_rdram(&mut self, rdram: &dyn Rdram, address: u32) -> Result<bool, RdpError> {
        self.framebuffers.copy_from_rdram(&self.queue, rdram, address)
    }

    pub fn copy_depth_to_rdram(
        &mut self,
        rdram: &dyn Rdram,
        address: u32,
    ) -> Result<bool, RdpError> {
        self.framebuffers
            .copy_depth_to_rdram(&self.device, &self.queue, rdram, address)
    }

    /// Host pixels per guest pixel for declared render targets.
    pub fn target_scale(&self) -> u32 {
        self.framebuffers.scale()
    }

    /// Texcoord-to-normalized scale of the texture bound to `unit`, if any.
    /// The geometry stage uses this to map guest coordinates to host space.
    pub fn texture_scale(&self, unit: usize) -> Option<[f32; 2]> {
        Some(self.textures.binding(unit)?.uv_scale)
    }

    /// Frame-boundary rendezvous with the emulated CPU.
    ///
    /// Drains the write log, re-checks the witness of every region the CPU
    /// touched, and reloads regions whose witness failed. Must run before
    /// this frame trusts any target's cached pixels.
    pub fn frame_begin(&mut self, rdram: &dyn Rdram, writes: &WriteLog) -> Result<(), RdpError> {
        let mut touched = Vec::new();
        for span in writes.drain() {
            touched.extend(
                self.framebuffers
                    .regions_intersecting(span.address, span.end()),
            );
        }
        touched.sort_unstable();
        touched.dedup();
        for address in touched {
            self.framebuffers.revalidate(address, rdram)?;
        }

        for address in self.framebuffers.regions_needing_resync() {
            self.framebuffers
                .copy_from_rdram(&self.queue, rdram, address)?;
        }
        Ok(())
    }

    /// Drops every decoded texture (the guest's cache-clear command or a
    /// texture pack reload).
    pub fn invalidate_textures(&mut self) {
        self.textures.invalidate_decoded();
    }

    /// Persists newly compiled combiner programs, if a disk cache is
    /// configured.
    pub fn flush_disk_cache(&mut self) -> Result<(), crate::combine::disk_cache::DiskCacheError> {
        self.combiner.flush_disk_cache()
    }

    /// Replaces the device after loss. Everything tied to the old device is
    /// dropped; combiner WGSL survives because it is device-independent.
    pub fn replace_device(&mut self, device: wgpu::Device, queue: wgpu::Queue) {
        self.pipelines = PipelineCache::new(&device);
        self.textures.clear();
        let events = self.framebuffers.clear();
        self.apply_target_events(&events);
        self.samplers.clear();

        self.globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("reality-rdp.globals"),
            size: std::mem::size_of::<CombinerGlobals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let (white_texture, white_view) = create_white_texture(&device, &queue);
        self.white_view = white_view;
        self._white_texture = white_texture;
        self.device = device;
        self.queue = queue;
    }

    /// Tears down caches in dependency order: compiled programs, then the
    /// texture cache, then frame buffers. Safe to call more than once; a
    /// drop after an explicit shutdown does nothing further.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(err) = self.combiner.flush_disk_cache() {
            tracing::warn!(%err, "failed to flush combiner disk cache");
        }
        self.combiner.clear();
        self.pipelines.clear();
        self.textures.clear();
        self.framebuffers.clear();
        debug!("rdp context shut down");
    }

    pub(crate) fn apply_target_events(&mut self, events: &[TargetEvent]) {
        for event in events {
            match *event {
                TargetEvent::Created { address } => {
                    let region = self
                        .framebuffers
                        .region(address)
                        .expect("created region exists");
                    self.textures.attach_target(
                        address,
                        region.texture(),
                        (region.desc.width, region.desc.height),
                    );
                }
                TargetEvent::Removed { address } => {
                    self.textures.detach_target(address);
                }
            }
        }
    }
}

impl Drop for RdpContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn create_white_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("reality-rdp.white"),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
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
        &[0xFF, 0xFF, 0xFF, 0xFF],
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}
