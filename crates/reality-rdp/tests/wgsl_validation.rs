//! Generated WGSL must parse and validate without a device.

use reality_rdp::combine::decode::{encode_cycle, encode_mux};
use reality_rdp::combine::shader_gen::generate_combiner_shaders;
use reality_rdp::combine::build_equations;
use reality_rdp::{CombinerFeatures, CombinerKey, CycleMode, FilterMode, PrimitiveKind};

fn validate(wgsl: &str) {
    let module = naga::front::wgsl::parse_str(wgsl)
        .unwrap_or_else(|err| panic!("WGSL failed to parse: {err}\n---\n{wgsl}"));
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .unwrap_or_else(|err| panic!("WGSL failed validation: {err:?}\n---\n{wgsl}"));
}

fn check_mux(mux: u64, cycle: CycleMode, features: CombinerFeatures) {
    let key = CombinerKey::new(mux, cycle, FilterMode::Bilinear, PrimitiveKind::Triangle);
    let generated = generate_combiner_shaders(&build_equations(&key), features);
    validate(&generated.vertex_wgsl);
    validate(&generated.fragment_wgsl);
}

#[test]
fn representative_one_cycle_programs_validate() {
    let cases = [
        // Plain texture copy.
        encode_mux(encode_cycle(1, 9, 8, 9), encode_cycle(1, 9, 8, 9), 0, 0),
        // Texture modulated by shade.
        encode_mux(encode_cycle(1, 9, 3, 9), encode_cycle(1, 9, 3, 9), 0, 0),
        // Lerp between texel and shade by env.
        encode_mux(encode_cycle(1, 3, 4, 3), encode_cycle(1, 9, 8, 9), 0, 0),
        // Flat shade, no textures.
        encode_mux(encode_cycle(3, 9, 8, 9), encode_cycle(3, 9, 8, 9), 0, 0),
        // Noise and prim LOD fraction inputs.
        encode_mux(encode_cycle(7, 9, 6, 5), encode_cycle(6, 9, 8, 9), 0, 0),
    ];
    for mux in cases {
        check_mux(mux, CycleMode::One, CombinerFeatures::default());
    }
}

#[test]
fn two_cycle_programs_validate() {
    // Cycle 1 consumes the previous cycle through the Combined input.
    let mux = encode_mux(
        encode_cycle(1, 9, 3, 9),
        encode_cycle(1, 9, 3, 9),
        encode_cycle(0, 9, 4, 5),
        encode_cycle(0, 9, 4, 9),
    );
    check_mux(mux, CycleMode::Two, CombinerFeatures::default());
}

#[test]
fn both_texel_units_validate() {
    let mux = encode_mux(
        encode_cycle(1, 2, 3, 2),
        encode_cycle(1, 2, 3, 2),
        0,
        0,
    );
    check_mux(mux, CycleMode::One, CombinerFeatures::default());
}

#[test]
fn every_feature_combination_validates() {
    let mux = encode_mux(encode_cycle(7, 3, 4, 3), encode_cycle(3, 9, 6, 9), 0, 0);
    for bits in 0..=CombinerFeatures::all().bits() {
        let Some(features) = CombinerFeatures::from_bits(bits) else {
            continue;
        };
        check_mux(mux, CycleMode::One, features);
    }
}

#[test]
fn degenerate_all_zero_word_validates() {
    // Selector 0 everywhere is Combined-of-nothing on cycle 0; the program
    // must still be well-formed.
    check_mux(0, CycleMode::One, CombinerFeatures::default());
}
