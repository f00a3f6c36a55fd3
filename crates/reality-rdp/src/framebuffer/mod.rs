//! Render-target registry: host textures backing regions of RDRAM.
//!
//! Each region owns a byte range of guest memory. Declaring a new target
//! revalidates an exact match, rebuilds a mismatched one, and resolves
//! overlaps in favor of the most recent declaration. Every region carries a
//! validity witness so CPU writes into its range are detected without full
//! comparisons (see [`validity`]).

pub mod depth;
pub mod region;
pub mod sync;
pub mod validity;

use hashbrown::HashMap;
use reality_rdram::Rdram;
use tracing::{debug, warn};

use crate::config::RdpConfig;
use crate::error::RdpError;
use crate::formats::FbFormat;

use self::depth::DepthTarget;
use self::region::{resolve_overlap, OverlapAction, RegionDesc, RegionState};
use self::validity::{plant_marker, Witness, WitnessConfig};

/// Pool-maintenance notification for the texture cache's target-backed pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetEvent {
    Created { address: u32 },
    Removed { address: u32 },
}

pub struct FrameBufferRegion {
    pub desc: RegionDesc,
    pub state: RegionState,
    /// Rendered-to since the last synchronization to RDRAM.
    pub dirty: bool,
    /// Witness failed; pixels must be reloaded from RDRAM before reuse.
    pub needs_resync: bool,
    /// Bound as a texture source for a draw that targets it (self-sampling).
    pub read_hazard: bool,
    witness: Option<Witness>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    pub depth: Option<DepthTarget>,
    /// Multisampled color attachment; resolves into `texture`.
    msaa: Option<(wgpu::Texture, wgpu::TextureView)>,
}

impl FrameBufferRegion {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// The attachment to render into, plus the resolve target when
    /// multisampling is on.
    pub fn attachment(&self) -> (&wgpu::TextureView, Option<&wgpu::TextureView>) {
        match &self.msaa {
            Some((_, msaa_view)) => (msaa_view, Some(&self.view)),
            None => (&self.view, None),
        }
    }

    pub fn witness(&self) -> Option<&Witness> {
        self.witness.as_ref()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameBufferStats {
    pub declared: u64,
    pub reused: u64,
    pub truncations: u64,
    pub removals: u64,
    pub validations: u64,
    pub invalidations: u64,
    pub copies_to_rdram: u64,
    pub copies_from_rdram: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct DeclareParams {
    pub address: u32,
    pub width: u32,
    pub height: u32,
    pub format: FbFormat,
}

/// Targets narrower than this are considered auxiliary (sub-frame) buffers
/// by the [`crate::config::TitleTweak::IgnoreAuxTargets`] tweak.
const AUX_WIDTH_CUTOFF: u32 = 256;

pub struct FrameBufferRegistry {
    regions: HashMap<u32, FrameBufferRegion>,
    current: Option<u32>,
    /// The last declaration was an ignored auxiliary target; draws render
    /// nothing until the next declaration.
    current_ignored: bool,
    depth_address: Option<u32>,
    scale: u32,
    sample_count: u32,
    witness_cfg: WitnessConfig,
    snapshot_limit: usize,
    force_snapshot: bool,
    ignore_aux: bool,
    stats: FrameBufferStats,
}

impl FrameBufferRegistry {
    pub fn new(config: &RdpConfig) -> Self {
        Self {
            regions: HashMap::new(),
            current: None,
            current_ignored: false,
            depth_address: None,
            scale: config.resolution_scale.max(1),
            sample_count: 1,
            witness_cfg: WitnessConfig {
                tolerance: config.validity_tolerance,
                sample_stride: config.validity_sample_stride,
            },
            snapshot_limit: config.snapshot_limit_bytes,
            force_snapshot: matches!(
                config.title_tweak,
                crate::config::TitleTweak::ForceTargetSnapshot
            ),
            ignore_aux: matches!(
                config.title_tweak,
                crate::config::TitleTweak::IgnoreAuxTargets
            ),
            stats: FrameBufferStats::default(),
        }
    }

    /// True when the last declared target was skipped by the
    /// `IgnoreAuxTargets` tweak; draws should silently render nothing.
    pub fn current_is_ignored(&self) -> bool {
        self.current_ignored
    }

    pub fn stats(&self) -> FrameBufferStats {
        self.stats
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn current_address(&self) -> Option<u32> {
        self.current
    }

    pub fn current(&self) -> Option<&FrameBufferRegion> {
        self.regions.get(&self.current?)
    }

    pub fn current_mut(&mut self) -> Option<&mut FrameBufferRegion> {
        self.regions.get_mut(&self.current?)
    }

    pub fn region(&self, address: u32) -> Option<&FrameBufferRegion> {
        self.regions.get(&address)
    }

    pub fn region_mut(&mut self, address: u32) -> Option<&mut FrameBufferRegion> {
        self.regions.get_mut(&address)
    }

    /// Base address of the region whose byte range contains `address`.
    pub fn owner_of(&self, address: u32) -> Option<u32> {
        self.regions
            .values()
            .find(|r| r.desc.contains(address))
            .map(|r| r.desc.address)
    }

    /// Base addresses of regions whose ranges intersect `[start, end)`.
    pub fn regions_intersecting(&self, start: u32, end: u32) -> Vec<u32> {
        self.regions
            .values()
            .filter(|r| r.desc.intersects(start, end))
            .map(|r| r.desc.address)
            .collect()
    }

    /// Regions whose witness failed and which must reload from RDRAM before
    /// their pixels can be trusted again.
    pub fn regions_needing_resync(&self) -> Vec<u32> {
        self.regions
            .values()
            .filter(|r| r.needs_resync)
            .map(|r| r.desc.address)
            .collect()
    }

    /// Declares the depth plane's base address. Subsequent target
    /// declarations attach a depth target bound to this plane.
    pub fn set_depth_address(&mut self, address: u32) {
        self.depth_address = Some(address);
    }

    pub fn depth_address(&self) -> Option<u32> {
        self.depth_address
    }

    /// Declares `params` as the current render target.
    ///
    /// Returned events keep the texture cache's target-backed pool in sync;
    /// the session context forwards them.
    pub fn declare_target(
        &mut self,
        device: &wgpu::Device,
        rdram: &dyn Rdram,
        params: DeclareParams,
    ) -> Result<Vec<TargetEvent>, RdpError> {
        let desc = RegionDesc {
            address: params.address,
            width: params.width,
            height: params.height,
            format: params.format,
            scale: self.scale,
        };

        let mut events = Vec::new();

        if self.ignore_aux && params.width < AUX_WIDTH_CUTOFF {
            debug!(
                address = format_args!("0x{:x}", params.address),
                width = params.width,
                "skipping auxiliary render target"
            );
            self.deactivate_current();
            self.current_ignored = true;
            return Ok(events);
        }
        self.current_ignored = false;

        if let Some(existing) = self.regions.get(&params.address) {
            if existing.desc == desc {
                self.revalidate(params.address, rdram)?;
                self.activate(params.address);
                self.stats.reused += 1;
                return Ok(events);
            }
        }

        // Resolve every overlap before creating the new region; the newest
        // declaration always wins.
        let mut removals = Vec::new();
        for region in self.regions.values_mut() {
            match resolve_overlap(&region.desc, &desc) {
                OverlapAction::Keep => {}
                OverlapAction::Identical => unreachable!("exact match handled above"),
                OverlapAction::Truncate { new_height } => {
                    debug!(
                        address = format_args!("0x{:x}", region.desc.address),
                        new_height, "truncating overlapped render target"
                    );
                    // The host texture keeps its allocation; only the owned
                    // byte range shrinks.
                    region.desc.height = new_height;
                    self.stats.truncations += 1;
                }
                OverlapAction::Remove => removals.push(region.desc.address),
            }
        }
        for address in removals {
            self.remove_region(address, &mut events);
        }

        let region = self.create_region(device, rdram, desc)?;
        self.deactivate_current();
        self.regions.insert(desc.address, region);
        self.current = Some(desc.address);
        self.stats.declared += 1;
        events.push(TargetEvent::Created {
            address: desc.address,
        });
        Ok(events)
    }

    fn create_region(
        &mut self,
        device: &wgpu::Device,
        rdram: &dyn Rdram,
        desc: RegionDesc,
    ) -> Result<FrameBufferRegion, RdpError> {
        let (width, height) = desc.scaled_size();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("reality-rdp.render_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let msaa = (self.sample_count > 1).then(|| {
            let msaa_texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("reality-rdp.render_target_msaa"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: self.sample_count,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let msaa_view = msaa_texture.create_view(&wgpu::TextureViewDescriptor::default());
            (msaa_texture, msaa_view)
        });

        // Large auxiliary regions are too expensive to snapshot every sync;
        // plant a short marker instead so CPU overwrites are still caught.
        let witness = if desc.byte_len() as usize > self.snapshot_limit && !self.force_snapshot {
            match plant_marker(rdram, &desc) {
                Ok(w) => Some(w),
                Err(err) => {
                    warn!(%err, "failed to plant auxiliary buffer marker");
                    None
                }
            }
        } else {
            None
        };

        let depth = self
            .depth_address
            .map(|address| DepthTarget::new(device, address, &desc));

        Ok(FrameBufferRegion {
            desc,
            state: RegionState::Building,
            dirty: false,
            needs_resync: false,
            read_hazard: false,
            witness,
            texture,
            view,
            depth,
            msaa,
        })
    }

    fn activate(&mut self, address: u32) {
        self.deactivate_current();
        if let Some(region) = self.regions.get_mut(&address) {
            region.state = RegionState::Active;
        }
        self.current = Some(address);
    }

    fn deactivate_current(&mut self) {
        if let Some(current) = self.current.take() {
            if let Some(region) = self.regions.get_mut(&current) {
                if region.state == RegionState::Active {
                    region.state = RegionState::Inactive;
                }
                region.read_hazard = false;
            }
        }
    }

    fn remove_region(&mut self, address: u32, events: &mut Vec<TargetEvent>) {
        if self.regions.remove(&address).is_some() {
            debug!(
                address = format_args!("0x{:x}", address),
                "removing render target"
            );
            if self.current == Some(address) {
                self.current = None;
            }
            self.stats.removals += 1;
            events.push(TargetEvent::Removed { address });
        }
    }

    /// Runs the region's validity witness. `Ok(false)` marks the region for
    /// resynchronization from RDRAM; a region with no witness yet is trusted.
    pub fn revalidate(&mut self, address: u32, rdram: &dyn Rdram) -> Result<bool, RdpError> {
        let witness_cfg = self.witness_cfg;
        let Some(region) = self.regions.get_mut(&address) else {
            return Ok(false);
        };
        let Some(witness) = region.witness.as_ref() else {
            return Ok(true);
        };
        self.stats.validations += 1;
        let valid = validity::check(witness, rdram, &region.desc, &witness_cfg)?;
        if !valid {
            debug!(
                address = format_args!("0x{:x}", address),
                "render target failed validity witness"
            );
            region.needs_resync = true;
            self.stats.invalidations += 1;
        }
        Ok(valid)
    }

    /// Records that the current target was cleared to a repeating pixel
    /// pattern, making the cheap fill witness available.
    pub fn record_clear(&mut self, pattern: Vec<u8>) {
        if let Some(region) = self.current_mut() {
            region.witness = Some(Witness::ClearFill { pattern });
            region.dirty = true;
            region.state = RegionState::Active;
        }
    }

    pub fn mark_current_dirty(&mut self) {
        if let Some(region) = self.current_mut() {
            region.dirty = true;
            region.state = RegionState::Active;
        }
    }

    /// Explicitly invalidates (removes) a region.
    pub fn invalidate(&mut self, address: u32) -> Vec<TargetEvent> {
        let mut events = Vec::new();
        self.remove_region(address, &mut events);
        events
    }

    /// Tears down every region. Safe to call more than once.
    pub fn clear(&mut self) -> Vec<TargetEvent> {
        let mut events = Vec::new();
        let addresses: Vec<u32> = self.regions.keys().copied().collect();
        for address in addresses {
            self.remove_region(address, &mut events);
        }
        self.current = None;
        events
    }
}
