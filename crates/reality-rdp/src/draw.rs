//! Per-draw orchestration: combiner lookup, texture binding, hazard
//! handling, pipeline fetch and render pass recording.

use bytemuck::{Pod, Zeroable};
use hashbrown::HashMap;
use reality_rdram::Rdram;
use wgpu::util::DeviceExt;

use crate::combine::key::{CombinerKey, FilterMode};
use crate::combine::shader_gen::MAX_TEXTURE_UNITS;
use crate::context::RdpContext;
use crate::error::RdpError;
use crate::pipeline::{BlendMode, DepthState, PipelineKey};
use crate::texture::{TileDescriptor, WrapFlags};

/// One rasterizer vertex, already post-projection: screen-space x/y in guest
/// pixels, z in [0, 1], 1/w for perspective correction.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
    pub shade: [u8; 4],
    pub texcoord: [f32; 2],
}

/// Everything one draw batch carries.
pub struct DrawCall<'a> {
    pub key: CombinerKey,
    /// Triangle list; rectangles arrive pre-split by the control plane.
    pub vertices: &'a [Vertex],
    pub tiles: [Option<TileDescriptor>; MAX_TEXTURE_UNITS],
    pub blend: BlendMode,
    pub depth: DepthState,
    /// Scissor in guest pixels, (x, y, width, height).
    pub scissor: Option<(u32, u32, u32, u32)>,
}

impl RdpContext {
    /// Executes one draw call against the current render target.
    ///
    /// Resource-allocation failures abort only this draw; the session stays
    /// usable.
    pub fn draw(&mut self, rdram: &dyn Rdram, call: &DrawCall<'_>) -> Result<(), RdpError> {
        if call.vertices.is_empty() {
            return Ok(());
        }
        if self.framebuffers.current_is_ignored() {
            return Ok(());
        }
        let Some(current) = self.framebuffers.current_address() else {
            return Err(RdpError::MissingRenderTarget);
        };

        let program = self.combiner.lookup_or_compile(call.key);

        for unit in 0..MAX_TEXTURE_UNITS {
            let used = match unit {
                0 => program.shaders.uses_texel0,
                _ => program.shaders.uses_texel1,
            };
            let Some(tile) = call.tiles[unit].as_ref() else {
                continue;
            };
            if !used {
                continue;
            }
            match self.framebuffers.owner_of(tile.address) {
                Some(owner) if owner == current => self.bind_self_sample(unit, current)?,
                Some(owner) => {
                    self.textures.bind_target(unit, owner);
                }
                None => self
                    .textures
                    .update(&self.device, &self.queue, unit, tile, rdram)?,
            }
        }

        let bilinear = !matches!(call.key.filter(), FilterMode::Point);
        let mut wraps = [WrapFlags::empty(); MAX_TEXTURE_UNITS];
        for (unit, wrap) in wraps.iter_mut().enumerate() {
            if let Some(binding) = self.textures.binding(unit) {
                program.set_uv_scale(unit, binding.uv_scale, [0.0, 0.0]);
                *wrap = binding.wrap;
            }
        }
        for wrap in wraps {
            ensure_sampler(&mut self.samplers, &self.device, bilinear, wrap);
        }

        let (desc, has_depth) = {
            let region = self.framebuffers.current().expect("address checked above");
            (region.desc, region.depth.is_some())
        };
        program.set_screen(desc.width, desc.height, desc.scale);
        self.queue
            .write_buffer(&self.globals_buffer, 0, program.globals().as_bytes());

        let pipeline = self.pipelines.get_or_create(
            &self.device,
            PipelineKey {
                combiner: call.key,
                target_format: wgpu::TextureFormat::Rgba8Unorm,
                blend: call.blend,
                depth: call.depth,
                has_depth_attachment: has_depth,
                sample_count: 1,
            },
            &program,
        );

        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("reality-rdp.vertices"),
                contents: bytemuck::cast_slice(call.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let globals_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reality-rdp.globals-group"),
            layout: self.pipelines.globals_layout(),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.globals_buffer.as_entire_binding(),
            }],
        });

        let mut texture_entries = Vec::with_capacity(MAX_TEXTURE_UNITS * 2);
        for (unit, wrap) in wraps.iter().enumerate() {
            let view = self
                .textures
                .binding(unit)
                .map(|b| b.view)
                .unwrap_or(&self.white_view);
            let sampler = &self.samplers[&(bilinear, wrap.bits())];
            texture_entries.push(wgpu::BindGroupEntry {
                binding: (unit * 2) as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: (unit * 2 + 1) as u32,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reality-rdp.texture-group"),
            layout: self.pipelines.texture_layout(),
            entries: &texture_entries,
        });

        let region = self.framebuffers.current().expect("address checked above");
        let (view, resolve_target) = region.attachment();
        let depth_attachment =
            region
                .depth
                .as_ref()
                .map(|depth| wgpu::RenderPassDepthStencilAttachment {
                    view: depth.view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reality-rdp.draw-encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("reality-rdp.draw-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some(rect) = call.scissor {
                let (w, h) = desc.scaled_size();
                if let Some((x, y, sw, sh)) = clamp_scissor(rect, desc.scale, w, h) {
                    pass.set_scissor_rect(x, y, sw, sh);
                }
            }
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &globals_group, &[]);
            pass.set_bind_group(1, &texture_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..call.vertices.len() as u32, 0..1);
        }
        self.queue.submit([encoder.finish()]);

        self.framebuffers.mark_current_dirty();
        Ok(())
    }

    /// Clears the current target and records the fill witness. `pattern` is
    /// the repeating guest pixel pattern the clear writes (used by the cheap
    /// validity check).
    pub fn clear_target(
        &mut self,
        color: wgpu::Color,
        pattern: Vec<u8>,
        clear_depth: bool,
    ) -> Result<(), RdpError> {
        if self.framebuffers.current_is_ignored() {
            return Ok(());
        }
        let Some(region) = self.framebuffers.current() else {
            return Err(RdpError::MissingRenderTarget);
        };
        let (view, resolve_target) = region.attachment();
        let depth_attachment = clear_depth
            .then(|| region.depth.as_ref())
            .flatten()
            .map(|depth| wgpu::RenderPassDepthStencilAttachment {
                view: depth.view(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reality-rdp.clear-encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("reality-rdp.clear-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit([encoder.finish()]);

        self.framebuffers.record_clear(pattern);
        Ok(())
    }

    /// Self-sampling: the draw reads the target it writes. The hazard is
    /// explicit — the target is snapshotted into a copy and the copy is
    /// bound, so the draw samples pre-draw pixels instead of tripping the
    /// host API's attachment/binding aliasing rules.
    fn bind_self_sample(&mut self, unit: usize, address: u32) -> Result<(), RdpError> {
        let region = self
            .framebuffers
            .region_mut(address)
            .expect("current region exists");
        region.read_hazard = true;
        let desc = region.desc;
        let (width, height) = desc.scaled_size();

        let copy = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("reality-rdp.self-sample-copy"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("reality-rdp.self-sample-encoder"),
            });
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: region.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &copy,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit([encoder.finish()]);

        // The pool entry now points at the snapshot; the next target
        // declaration re-attaches the live texture. The view keeps the copy
        // alive after this handle drops.
        self.textures
            .attach_target(address, &copy, (desc.width, desc.height));
        self.textures.bind_target(unit, address);
        Ok(())
    }
}

fn ensure_sampler(
    samplers: &mut HashMap<(bool, u8), wgpu::Sampler>,
    device: &wgpu::Device,
    bilinear: bool,
    wrap: WrapFlags,
) {
    samplers.entry((bilinear, wrap.bits())).or_insert_with(|| {
        let mode = |clamp: bool, mirror: bool| {
            if clamp {
                wgpu::AddressMode::ClampToEdge
            } else if mirror {
                wgpu::AddressMode::MirrorRepeat
            } else {
                wgpu::AddressMode::Repeat
            }
        };
        let filter = if bilinear {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("reality-rdp.sampler"),
            address_mode_u: mode(
                wrap.contains(WrapFlags::CLAMP_S),
                wrap.contains(WrapFlags::MIRROR_S),
            ),
            address_mode_v: mode(
                wrap.contains(WrapFlags::CLAMP_T),
                wrap.contains(WrapFlags::MIRROR_T),
            ),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    });
}

/// Scales a guest-pixel scissor to host pixels and clamps it to the target.
/// Degenerate rectangles drop the scissor entirely.
fn clamp_scissor(
    rect: (u32, u32, u32, u32),
    scale: u32,
    target_width: u32,
    target_height: u32,
) -> Option<(u32, u32, u32, u32)> {
    let (x, y, w, h) = rect;
    let (x, y, w, h) = (x * scale, y * scale, w * scale, h * scale);
    if w == 0 || h == 0 || x >= target_width || y >= target_height {
        return None;
    }
    let w = w.min(target_width - x);
    let h = h.min(target_height - y);
    Some((x, y, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_pipeline_stride() {
        assert_eq!(
            std::mem::size_of::<Vertex>() as u64,
            crate::pipeline::VERTEX_STRIDE
        );
    }

    #[test]
    fn scissor_clamps_to_target() {
        assert_eq!(clamp_scissor((0, 0, 320, 240), 1, 320, 240), Some((0, 0, 320, 240)));
        assert_eq!(clamp_scissor((300, 0, 100, 240), 1, 320, 240), Some((300, 0, 20, 240)));
        assert_eq!(clamp_scissor((0, 0, 0, 240), 1, 320, 240), None);
        assert_eq!(clamp_scissor((400, 0, 10, 10), 1, 320, 240), None);
        assert_eq!(clamp_scissor((10, 10, 20, 20), 2, 640, 480), Some((20, 20, 40, 40)));
    }
}
