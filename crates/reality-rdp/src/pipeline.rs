//! wgpu render pipeline construction and caching.
//!
//! A combiner program is device-independent WGSL; the actual
//! `wgpu::RenderPipeline` also depends on target format, blending, depth
//! state and sample count. Pipelines are cached on the full tuple so a
//! combiner reused across blend modes compiles each host pipeline once.

use std::borrow::Cow;
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::combine::key::CombinerKey;
use crate::combine::CompiledCombiner;

/// Host blend equation for the draw, reduced from the guest's blender word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    AlphaBlend,
    Additive,
}

impl BlendMode {
    fn to_wgpu(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Opaque => None,
            BlendMode::AlphaBlend => Some(wgpu::BlendState::ALPHA_BLENDING),
            BlendMode::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::OVER,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
}

impl DepthState {
    pub const DISABLED: DepthState = DepthState {
        test: false,
        write: false,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub combiner: CombinerKey,
    pub target_format: wgpu::TextureFormat,
    pub blend: BlendMode,
    pub depth: DepthState,
    pub has_depth_attachment: bool,
    pub sample_count: u32,
}

/// Fixed vertex layout shared by every combiner pipeline: screen-space
/// position, shade color, one texcoord set.
pub const VERTEX_STRIDE: u64 = 28;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] = [
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x4,
        offset: 0,
        shader_location: 0,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Unorm8x4,
        offset: 16,
        shader_location: 1,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: 20,
        shader_location: 2,
    },
];

pub struct PipelineCache {
    globals_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    modules: HashMap<CombinerKey, (wgpu::ShaderModule, wgpu::ShaderModule)>,
    pipelines: HashMap<PipelineKey, Arc<wgpu::RenderPipeline>>,
}

impl PipelineCache {
    pub fn new(device: &wgpu::Device) -> Self {
        let globals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reality-rdp.globals-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let mut entries = Vec::new();
        for unit in 0..crate::combine::shader_gen::MAX_TEXTURE_UNITS as u32 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: unit * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: unit * 2 + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reality-rdp.texture-layout"),
            entries: &entries,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("reality-rdp.pipeline-layout"),
            bind_group_layouts: &[&globals_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        Self {
            globals_layout,
            texture_layout,
            layout,
            modules: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn globals_layout(&self) -> &wgpu::BindGroupLayout {
        &self.globals_layout
    }

    pub fn texture_layout(&self) -> &wgpu::BindGroupLayout {
        &self.texture_layout
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        key: PipelineKey,
        program: &CompiledCombiner,
    ) -> Arc<wgpu::RenderPipeline> {
        if let Some(existing) = self.pipelines.get(&key) {
            return Arc::clone(existing);
        }

        let (vs_module, fs_module) =
            self.modules.entry(program.key).or_insert_with(|| {
                let vs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("reality-rdp.combiner-vs"),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&program.shaders.vertex_wgsl)),
                });
                let fs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("reality-rdp.combiner-fs"),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(
                        &program.shaders.fragment_wgsl,
                    )),
                });
                (vs, fs)
            });

        let depth_stencil = key.has_depth_attachment.then(|| wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth32Float,
            depth_write_enabled: key.depth.write,
            depth_compare: if key.depth.test {
                wgpu::CompareFunction::LessEqual
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("reality-rdp.pipeline"),
            layout: Some(&self.layout),
            vertex: wgpu::VertexState {
                module: vs_module,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: VERTEX_STRIDE,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: fs_module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.target_format,
                    blend: key.blend.to_wgpu(),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: key.sample_count,
                ..Default::default()
            },
            multiview: None,
        });

        debug!(
            mux = format_args!("0x{:016x}", key.combiner.mux()),
            blend = ?key.blend,
            "created render pipeline"
        );

        let pipeline = Arc::new(pipeline);
        self.pipelines.insert(key, Arc::clone(&pipeline));
        pipeline
    }

    /// Drops all pipelines and shader modules. Required on device loss; they
    /// are tied to the device that created them.
    pub fn clear(&mut self) {
        self.pipelines.clear();
        self.modules.clear();
    }
}
