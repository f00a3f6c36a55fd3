use std::sync::Arc;

use pretty_assertions::assert_eq;
use reality_rdp::combine::decode::{encode_cycle, encode_mux};
use reality_rdp::combine::simplify::{simplify, Op, Operand};
use reality_rdp::combine::{build_equations, CombinerCache};
use reality_rdp::{CombinerFeatures, CombinerKey, CycleMode, FilterMode, PrimitiveKind};

// Selector values from the combine-word encoding.
const SEL_COMBINED: u8 = 0;
const SEL_TEXEL0: u8 = 1;
const SEL_SHADE: u8 = 3;
const SEL_ENV: u8 = 4;
const SEL_ONE: u8 = 8;
const SEL_ZERO: u8 = 9;

fn key(mux: u64, cycle: CycleMode) -> CombinerKey {
    CombinerKey::new(mux, cycle, FilterMode::Bilinear, PrimitiveKind::Triangle)
}

/// "load texture0, no subtract, multiply by one, add zero" must compile to a
/// single LOAD op per channel.
#[test]
fn plain_texture_copy_is_a_one_op_load() {
    let cycle = encode_cycle(SEL_TEXEL0, SEL_ZERO, SEL_ONE, SEL_ZERO);
    let eq = build_equations(&key(encode_mux(cycle, cycle, 0, 0), CycleMode::One));
    assert_eq!(eq.cycles.len(), 1);
    assert_eq!(eq.cycles[0].rgb, vec![Op::Load(Operand::Texel0)]);
    assert_eq!(eq.cycles[0].alpha, vec![Op::Load(Operand::Texel0)]);
}

#[test]
fn simplification_laws_hold() {
    // subtract(x, x) == load(zero)
    let sub_self = encode_cycle(SEL_SHADE, SEL_SHADE, SEL_ONE, SEL_ZERO);
    let eq = build_equations(&key(encode_mux(sub_self, sub_self, 0, 0), CycleMode::One));
    assert_eq!(eq.cycles[0].rgb, vec![Op::Load(Operand::Zero)]);

    // multiply(anything, zero) == load(zero)
    let mul_zero = encode_cycle(SEL_TEXEL0, SEL_ENV, SEL_ZERO, SEL_ZERO);
    let eq = build_equations(&key(encode_mux(mul_zero, mul_zero, 0, 0), CycleMode::One));
    assert_eq!(eq.cycles[0].rgb, vec![Op::Load(Operand::Zero)]);

    // add(x, zero) == x
    let add_zero = encode_cycle(SEL_ENV, SEL_ZERO, SEL_ONE, SEL_ZERO);
    let eq = build_equations(&key(encode_mux(add_zero, add_zero, 0, 0), CycleMode::One));
    assert_eq!(eq.cycles[0].rgb, vec![Op::Load(Operand::Env)]);
}

#[test]
fn interpolation_fuses_only_on_matching_operands() {
    let lerp = encode_cycle(SEL_TEXEL0, SEL_SHADE, SEL_ENV, SEL_SHADE);
    let eq = build_equations(&key(encode_mux(lerp, lerp, 0, 0), CycleMode::One));
    assert_eq!(
        eq.cycles[0].rgb,
        vec![Op::Lerp {
            a: Operand::Texel0,
            b: Operand::Shade,
            weight: Operand::Env,
        }]
    );

    let no_lerp = encode_cycle(SEL_TEXEL0, SEL_SHADE, SEL_ENV, SEL_ENV);
    let eq = build_equations(&key(encode_mux(no_lerp, no_lerp, 0, 0), CycleMode::One));
    assert!(eq.cycles[0].rgb.len() == 4);
}

#[test]
fn simplify_twice_is_identity() {
    let cases = [
        encode_cycle(SEL_TEXEL0, SEL_ZERO, SEL_ONE, SEL_ZERO),
        encode_cycle(SEL_SHADE, SEL_SHADE, SEL_ENV, SEL_ZERO),
        encode_cycle(SEL_TEXEL0, SEL_SHADE, SEL_ENV, SEL_SHADE),
        encode_cycle(SEL_COMBINED, SEL_ENV, SEL_SHADE, SEL_TEXEL0),
    ];
    for cycle in cases {
        let eq = build_equations(&key(encode_mux(cycle, cycle, 0, 0), CycleMode::One));
        for ops in [&eq.cycles[0].rgb, &eq.cycles[0].alpha] {
            assert_eq!(&simplify(ops), ops);
        }
    }
}

#[test]
fn same_key_compiles_exactly_once_and_shares_the_program() {
    let mut cache = CombinerCache::new(CombinerFeatures::default(), None);
    let cycle = encode_cycle(SEL_TEXEL0, SEL_ZERO, SEL_ONE, SEL_ZERO);
    let k = key(encode_mux(cycle, cycle, 0, 0), CycleMode::One);

    let first = cache.lookup_or_compile(k);
    let second = cache.lookup_or_compile(k);
    let third = cache.lookup_or_compile(k);

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &third));
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 2);
}

#[test]
fn distinct_mode_bits_are_distinct_programs() {
    let mut cache = CombinerCache::new(CombinerFeatures::default(), None);
    let cycle = encode_cycle(SEL_TEXEL0, SEL_ZERO, SEL_ONE, SEL_ZERO);
    let mux = encode_mux(cycle, cycle, cycle, cycle);

    let one = cache.lookup_or_compile(key(mux, CycleMode::One));
    let two = cache.lookup_or_compile(key(mux, CycleMode::Two));
    assert!(!Arc::ptr_eq(&one, &two));
    assert_eq!(cache.len(), 2);
}

#[test]
fn copy_mode_two_cycle_emits_single_cycle_program() {
    let cycle = encode_cycle(SEL_TEXEL0, SEL_ZERO, SEL_ONE, SEL_ZERO);
    let mux = encode_mux(cycle, cycle, cycle, cycle);
    let eq = build_equations(&key(mux, CycleMode::Two));
    assert_eq!(eq.cycles.len(), 1);
}

#[test]
fn disk_cache_round_trips_programs_across_sessions() {
    use reality_rdp::combine::disk_cache::CombinerDiskCache;

    let path = std::env::temp_dir().join(format!(
        "reality-rdp-combiner-session-{}.bin",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);

    let cycle = encode_cycle(SEL_TEXEL0, SEL_SHADE, SEL_ENV, SEL_SHADE);
    let k = key(encode_mux(cycle, cycle, 0, 0), CycleMode::One);

    let disk = CombinerDiskCache::open(path.clone(), CombinerFeatures::default());
    let mut cache = CombinerCache::new(CombinerFeatures::default(), Some(disk));
    let fresh = cache.lookup_or_compile(k);
    cache.flush_disk_cache().unwrap();

    let disk = CombinerDiskCache::open(path.clone(), CombinerFeatures::default());
    assert_eq!(disk.len(), 1);
    let mut warm_cache = CombinerCache::new(CombinerFeatures::default(), Some(disk));
    let warm = warm_cache.lookup_or_compile(k);

    assert_eq!(warm.shaders.vertex_wgsl, fresh.shaders.vertex_wgsl);
    assert_eq!(warm.shaders.fragment_wgsl, fresh.shaders.fragment_wgsl);
    assert_eq!(warm.equations, fresh.equations);

    let _ = std::fs::remove_file(&path);
}
