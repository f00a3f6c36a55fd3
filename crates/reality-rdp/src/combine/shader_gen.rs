//! WGSL generation for compiled combiner programs.
//!
//! Generation is pure string emission: no device is required, so the output
//! can be validated and snapshot-tested without a GPU. Pipeline objects are
//! built separately in [`crate::pipeline`].

use std::fmt::Write;

use crate::config::CombinerFeatures;

use super::simplify::{reads, Op, Operand};
use super::CombinerEquations;

pub const MAX_TEXTURE_UNITS: usize = 2;

/// Uniform block shared by every combiner program.
///
/// Contents are per-draw parameters; updating them never changes a program's
/// identity or cache key.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CombinerGlobals {
    /// (2/target_width, 2/target_height, resolution scale, unused) for the
    /// guest-pixel-space to NDC transform.
    pub screen: [f32; 4],
    pub env_color: [f32; 4],
    pub prim_color: [f32; 4],
    /// (prim_lod_frac, noise, unused, unused).
    pub misc: [f32; 4],
    /// Per-unit (scale_s, scale_t, offset_s, offset_t) mapping guest
    /// texcoords into the backing texture, supplied by the texture cache.
    pub uv_scale: [[f32; 4]; MAX_TEXTURE_UNITS],
}

impl CombinerGlobals {
    pub fn identity() -> Self {
        Self {
            screen: [2.0 / 320.0, 2.0 / 240.0, 1.0, 0.0],
            env_color: [1.0, 1.0, 1.0, 1.0],
            prim_color: [1.0, 1.0, 1.0, 1.0],
            misc: [0.0, 0.5, 0.0, 0.0],
            uv_scale: [[1.0, 1.0, 0.0, 0.0]; MAX_TEXTURE_UNITS],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

pub struct GeneratedCombiner {
    pub vertex_wgsl: String,
    pub fragment_wgsl: String,
    pub uses_texel0: bool,
    pub uses_texel1: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Channel {
    Rgb,
    Alpha,
}

pub fn generate_combiner_shaders(
    eq: &CombinerEquations,
    features: CombinerFeatures,
) -> GeneratedCombiner {
    let uses_texel0 = eq.cycles.iter().any(|c| {
        reads(&c.rgb, Operand::Texel0) || reads(&c.alpha, Operand::Texel0)
    });
    let uses_texel1 = eq.cycles.iter().any(|c| {
        reads(&c.rgb, Operand::Texel1) || reads(&c.alpha, Operand::Texel1)
    });

    GeneratedCombiner {
        vertex_wgsl: generate_vertex_wgsl(),
        fragment_wgsl: generate_fragment_wgsl(eq, features, uses_texel0, uses_texel1),
        uses_texel0,
        uses_texel1,
    }
}

fn generate_vertex_wgsl() -> String {
    let mut wgsl = String::new();
    wgsl.push_str(WGSL_SHARED);
    wgsl.push_str(
        "struct VertexIn {\n  @location(0) position: vec4<f32>,\n  @location(1) shade: vec4<f32>,\n  @location(2) texcoord: vec2<f32>,\n}\n\n",
    );
    wgsl.push_str(
        "struct VertexOut {\n  @builtin(position) position: vec4<f32>,\n  @location(0) shade: vec4<f32>,\n  @location(1) tc0: vec2<f32>,\n  @location(2) tc1: vec2<f32>,\n}\n\n",
    );
    wgsl.push_str("@vertex\nfn vs_main(input: VertexIn) -> VertexOut {\n  var out: VertexOut;\n");
    // Guest positions arrive in screen pixels with 1/w in .w (the rasterizer
    // works post-projection). Rebuild clip space so the host interpolates
    // perspective-correctly.
    wgsl.push_str("  let w = select(1.0, 1.0 / input.position.w, input.position.w != 0.0);\n");
    wgsl.push_str("  let ndc_x = input.position.x * globals.screen.x - 1.0;\n");
    wgsl.push_str("  let ndc_y = 1.0 - input.position.y * globals.screen.y;\n");
    wgsl.push_str("  out.position = vec4<f32>(ndc_x * w, ndc_y * w, input.position.z * w, w);\n");
    wgsl.push_str("  out.shade = input.shade;\n");
    wgsl.push_str(
        "  out.tc0 = input.texcoord * globals.uv_scale[0].xy + globals.uv_scale[0].zw;\n",
    );
    wgsl.push_str(
        "  out.tc1 = input.texcoord * globals.uv_scale[1].xy + globals.uv_scale[1].zw;\n",
    );
    wgsl.push_str("  return out;\n}\n");
    wgsl
}

fn generate_fragment_wgsl(
    eq: &CombinerEquations,
    features: CombinerFeatures,
    uses_texel0: bool,
    uses_texel1: bool,
) -> String {
    let mut wgsl = String::new();
    wgsl.push_str(WGSL_SHARED);

    for unit in 0..MAX_TEXTURE_UNITS {
        let _ = writeln!(
            wgsl,
            "@group(1) @binding({}) var tex{}: texture_2d<f32>;\n@group(1) @binding({}) var samp{}: sampler;\n",
            unit * 2,
            unit,
            unit * 2 + 1,
            unit,
        );
    }

    wgsl.push_str(
        "struct FragmentIn {\n  @location(0) shade: vec4<f32>,\n  @location(1) tc0: vec2<f32>,\n  @location(2) tc1: vec2<f32>,\n}\n\n",
    );
    wgsl.push_str("@fragment\nfn fs_main(input: FragmentIn) -> @location(0) vec4<f32> {\n");

    if uses_texel0 {
        wgsl.push_str("  let tex0_color = textureSample(tex0, samp0, input.tc0);\n");
    }
    if uses_texel1 {
        wgsl.push_str("  let tex1_color = textureSample(tex1, samp1, input.tc1);\n");
    }

    wgsl.push_str("  var combined = vec4<f32>(0.0, 0.0, 0.0, 0.0);\n");

    for cycle in &eq.cycles {
        let rgb_raw = chain_expr(&cycle.rgb, Channel::Rgb, features);
        let a_raw = chain_expr(&cycle.alpha, Channel::Alpha, features);
        wgsl.push_str("  {\n");
        let _ = writeln!(wgsl, "    let rgb_raw = {};", rgb_raw);
        let _ = writeln!(wgsl, "    let a_raw = {};", a_raw);
        if features.contains(CombinerFeatures::CLAMP_CYCLES) {
            wgsl.push_str("    let rgb = clamp(rgb_raw, vec3<f32>(0.0), vec3<f32>(1.0));\n");
            wgsl.push_str("    let a = clamp(a_raw, 0.0, 1.0);\n");
        } else {
            wgsl.push_str("    let rgb = rgb_raw;\n    let a = a_raw;\n");
        }
        wgsl.push_str("    combined = vec4<f32>(rgb, a);\n");
        wgsl.push_str("  }\n");
    }

    wgsl.push_str("  return combined;\n}\n");
    wgsl
}

fn chain_expr(ops: &[Op], channel: Channel, features: CombinerFeatures) -> String {
    let mut expr = String::new();
    for op in ops {
        expr = match *op {
            Op::Load(x) => operand_expr(x, channel, features),
            Op::Sub(x) => format!("(({}) - {})", expr, operand_expr(x, channel, features)),
            Op::Mul(x) => format!("(({}) * {})", expr, operand_expr(x, channel, features)),
            Op::Add(x) => format!("(({}) + {})", expr, operand_expr(x, channel, features)),
            Op::Lerp { a, b, weight } => format!(
                "mix({}, {}, {})",
                operand_expr(b, channel, features),
                operand_expr(a, channel, features),
                operand_expr(weight, channel, features),
            ),
        };
    }
    expr
}

fn operand_expr(operand: Operand, channel: Channel, features: CombinerFeatures) -> String {
    let noise = if features.contains(CombinerFeatures::NOISE_UNIFORM) {
        "globals.misc.y"
    } else {
        "0.5"
    };
    match channel {
        Channel::Rgb => match operand {
            Operand::Combined => "combined.rgb".to_string(),
            Operand::Texel0 => "tex0_color.rgb".to_string(),
            Operand::Texel1 => "tex1_color.rgb".to_string(),
            Operand::Shade => "input.shade.rgb".to_string(),
            Operand::Env => "globals.env_color.rgb".to_string(),
            Operand::Prim => "globals.prim_color.rgb".to_string(),
            Operand::PrimLodFrac => "vec3<f32>(globals.misc.x)".to_string(),
            Operand::Noise => format!("vec3<f32>({})", noise),
            Operand::One => "vec3<f32>(1.0)".to_string(),
            Operand::Zero => "vec3<f32>(0.0)".to_string(),
        },
        Channel::Alpha => match operand {
            Operand::Combined => "combined.a".to_string(),
            Operand::Texel0 => "tex0_color.a".to_string(),
            Operand::Texel1 => "tex1_color.a".to_string(),
            Operand::Shade => "input.shade.a".to_string(),
            Operand::Env => "globals.env_color.a".to_string(),
            Operand::Prim => "globals.prim_color.a".to_string(),
            Operand::PrimLodFrac => "globals.misc.x".to_string(),
            Operand::Noise => noise.to_string(),
            Operand::One => "1.0".to_string(),
            Operand::Zero => "0.0".to_string(),
        },
    }
}

const WGSL_SHARED: &str = r#"
struct Globals {
  screen: vec4<f32>,
  env_color: vec4<f32>,
  prim_color: vec4<f32>,
  misc: vec4<f32>,
  uv_scale: array<vec4<f32>, 2>,
};

@group(0) @binding(0) var<uniform> globals: Globals;

"#;
