//! Device-backed integration tests. Environments without a usable wgpu
//! adapter (e.g. CI without software rasterizers) skip these; the pure
//! layers are covered by unit tests.

use reality_rdp::combine::decode::{encode_cycle, encode_mux};
use reality_rdp::framebuffer::DeclareParams;
use reality_rdp::texture::{TileDescriptor, WrapFlags};
use reality_rdp::{
    BlendMode, CombinerKey, CycleMode, DepthState, DrawCall, FbFormat, FilterMode, PaletteFormat,
    PrimitiveKind, RdpConfig, RdpContext, TexFormat, Vertex,
};
use reality_rdram::{VecRdram, WriteLog};

fn create_test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let needs_runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .ok()
            .map(|v| v.is_empty())
            .unwrap_or(true);

        if needs_runtime_dir {
            let dir = std::env::temp_dir().join(format!(
                "reality-rdp-xdg-runtime-{}-gpu-session",
                std::process::id()
            ));
            let _ = std::fs::create_dir_all(&dir);
            let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
            std::env::set_var("XDG_RUNTIME_DIR", &dir);
        }
    }

    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::LowPower,
        compatible_surface: None,
        force_fallback_adapter: true,
    }))?;

    pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("reality-rdp integration test device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
        },
        None,
    ))
    .ok()
}

fn rgba16_tile(address: u32, width: u32, height: u32) -> TileDescriptor {
    TileDescriptor {
        address,
        format: TexFormat::Rgba16,
        width,
        height,
        line_bytes: TexFormat::Rgba16.row_bytes(width),
        wrap: WrapFlags::empty(),
        palette_address: 0,
        palette_format: PaletteFormat::Rgba16,
        palette_id: 0,
        mipmapped: false,
    }
}

fn textured_triangle() -> Vec<Vertex> {
    let vertex = |x: f32, y: f32, s: f32, t: f32| Vertex {
        position: [x, y, 0.5, 1.0],
        shade: [0xFF; 4],
        texcoord: [s, t],
    };
    vec![
        vertex(0.0, 0.0, 0.0, 0.0),
        vertex(64.0, 0.0, 16.0, 0.0),
        vertex(0.0, 64.0, 0.0, 16.0),
    ]
}

/// The load-texel0 combine word: `(tex0 - 0) * 1 + 0` on both channels.
fn texture_copy_key() -> CombinerKey {
    let cycle = encode_cycle(1, 9, 8, 9);
    CombinerKey::new(
        encode_mux(cycle, cycle, 0, 0),
        CycleMode::One,
        FilterMode::Point,
        PrimitiveKind::Triangle,
    )
}

#[test]
fn declared_target_draw_texture_and_witness_scenario() {
    let Some((device, queue)) = create_test_device() else {
        return;
    };
    let rdram = VecRdram::new(0x100000);
    let mut ctx = RdpContext::new(device, queue, RdpConfig::default());

    ctx.declare_target(
        &rdram,
        DeclareParams {
            address: 0x1000,
            width: 320,
            height: 240,
            format: FbFormat::Rgba16,
        },
    )
    .unwrap();
    assert_eq!(ctx.framebuffers().current_address(), Some(0x1000));

    // Seed a 16x16 RGBA16 texture.
    let tile = rgba16_tile(0x80000, 16, 16);
    let texels: Vec<u8> = (0..16 * 16)
        .flat_map(|i: u32| ((i as u16) << 1 | 1).to_be_bytes())
        .collect();
    rdram.write(tile.address, &texels).unwrap();

    let vertices = textured_triangle();
    let call = DrawCall {
        key: texture_copy_key(),
        vertices: &vertices,
        tiles: [Some(tile), None],
        blend: BlendMode::Opaque,
        depth: DepthState::DISABLED,
        scissor: None,
    };
    ctx.draw(&rdram, &call).unwrap();

    // One program compiled; repeating the draw must not recompile.
    ctx.draw(&rdram, &call).unwrap();
    let stats = ctx.stats();
    assert_eq!(stats.combiner_misses, 1);
    assert_eq!(stats.combiner_hits, 1);
    assert_eq!(stats.compiled_programs, 1);
    assert_eq!(stats.pipelines, 1);

    // Unchanged bytes: one upload total, cheap hits afterwards.
    assert_eq!(stats.texture.misses, 1);
    ctx.update_texture(&rdram, 0, &tile).unwrap();
    ctx.update_texture(&rdram, 0, &tile).unwrap();
    let stats = ctx.stats();
    assert_eq!(stats.texture.misses, 1);
    assert!(stats.texture.cheap_hits >= 2);

    // Establish the snapshot witness by syncing to RDRAM.
    assert!(ctx.copy_to_rdram(&rdram, 0x1000).unwrap());
    assert!(ctx.revalidate_target(&rdram, 0x1000).unwrap());

    // A single mutated byte is far under the tolerance.
    rdram.write(0x1100, &[0xFF]).unwrap();
    assert!(ctx.revalidate_target(&rdram, 0x1000).unwrap());

    // Rewriting more than half the region must invalidate and trigger a
    // reload at the frame boundary.
    let region_bytes = 320 * 240 * 2;
    let rewrite = vec![0x5A; region_bytes * 3 / 5];
    rdram.write(0x1000, &rewrite).unwrap();
    let log = WriteLog::new();
    log.record(0x1000, rewrite.len() as u32);
    ctx.frame_begin(&rdram, &log).unwrap();

    let stats = ctx.stats();
    assert!(stats.framebuffer.invalidations >= 1);
    assert!(stats.framebuffer.copies_from_rdram >= 1);
}

#[test]
fn texture_cache_evicts_by_byte_budget_in_lru_order() {
    let Some((device, queue)) = create_test_device() else {
        return;
    };
    let rdram = VecRdram::new(0x100000);
    // Each 16x16 RGBA8 upload is 1 KiB; budget fits two.
    let config = RdpConfig {
        texture_budget_bytes: 2048,
        ..RdpConfig::default()
    };
    let mut ctx = RdpContext::new(device, queue, config);

    let mut tiles = Vec::new();
    for i in 0..3u32 {
        let tile = rgba16_tile(0x10000 + i * 0x1000, 16, 16);
        let texels = vec![i as u8 + 1; 16 * 16 * 2];
        rdram.write(tile.address, &texels).unwrap();
        tiles.push(tile);
    }

    ctx.update_texture(&rdram, 0, &tiles[0]).unwrap();
    ctx.update_texture(&rdram, 0, &tiles[1]).unwrap();
    assert_eq!(ctx.textures().len(), 2);

    // Touch the first so the second is least recently used.
    ctx.update_texture(&rdram, 0, &tiles[0]).unwrap();
    ctx.update_texture(&rdram, 0, &tiles[2]).unwrap();

    let stats = ctx.textures().stats();
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.evictions, 1);
    assert_eq!(ctx.textures().len(), 2);
    assert!(ctx.textures().resident_bytes() <= 2048);

    // The survivor must be tile 0; binding it is a hit, not an upload.
    ctx.update_texture(&rdram, 0, &tiles[0]).unwrap();
    assert_eq!(ctx.textures().stats().misses, 3);
}

#[test]
fn overlapping_declarations_truncate_and_remove() {
    let Some((device, queue)) = create_test_device() else {
        return;
    };
    let rdram = VecRdram::new(0x100000);
    let mut ctx = RdpContext::new(device, queue, RdpConfig::default());

    let base = DeclareParams {
        address: 0x1000,
        width: 320,
        height: 240,
        format: FbFormat::Rgba16,
    };
    ctx.declare_target(&rdram, base).unwrap();

    // Declare a second target starting 2 rows before the first one ends.
    let stride = 320 * 2;
    ctx.declare_target(
        &rdram,
        DeclareParams {
            address: 0x1000 + (240 - 2) * stride,
            ..base
        },
    )
    .unwrap();

    let registry = ctx.framebuffers();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.region(0x1000).unwrap().desc.height, 238);

    // A deep overlap removes the older region outright.
    ctx.declare_target(
        &rdram,
        DeclareParams {
            address: 0x1000 + 100 * stride,
            ..base
        },
    )
    .unwrap();
    assert!(ctx.framebuffers().region(0x1000).is_none());
}

#[test]
fn copy_from_rdram_without_owner_is_a_no_op() {
    let Some((device, queue)) = create_test_device() else {
        return;
    };
    let rdram = VecRdram::new(0x100000);
    let mut ctx = RdpContext::new(device, queue, RdpConfig::default());
    assert!(!ctx.copy_from_rdram(&rdram, 0x9000).unwrap());
}

#[test]
fn round_trip_through_rdram_preserves_cleared_color() {
    let Some((device, queue)) = create_test_device() else {
        return;
    };
    let rdram = VecRdram::new(0x100000);
    let mut ctx = RdpContext::new(device, queue, RdpConfig::default());

    ctx.declare_target(
        &rdram,
        DeclareParams {
            address: 0x2000,
            width: 64,
            height: 32,
            format: FbFormat::Rgba16,
        },
    )
    .unwrap();

    // Clear to opaque green: RGBA16 0b00000_11111_00000_1.
    let pattern = 0x07C1u16.to_be_bytes().to_vec();
    ctx.clear_target(
        wgpu::Color {
            r: 0.0,
            g: 1.0,
            b: 0.0,
            a: 1.0,
        },
        pattern,
        false,
    )
    .unwrap();

    assert!(ctx.copy_to_rdram(&rdram, 0x2000).unwrap());
    let mut first_pixel = [0u8; 2];
    rdram.read(0x2000, &mut first_pixel).unwrap();
    assert_eq!(u16::from_be_bytes(first_pixel), 0x07C1);

    // The clear-fill witness sees exactly what the clear wrote.
    assert!(ctx.revalidate_target(&rdram, 0x2000).unwrap());
}
