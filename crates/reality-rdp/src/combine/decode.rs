//! Combine-word field extraction.
//!
//! The 64-bit combine word packs two cycles of four input selectors per
//! channel, four bits each:
//!
//! ```text
//! bits  0..16   cycle 0 color  a/b/c/d
//! bits 16..32   cycle 0 alpha  a/b/c/d
//! bits 32..48   cycle 1 color  a/b/c/d
//! bits 48..64   cycle 1 alpha  a/b/c/d
//! ```
//!
//! Every bit pattern is a legal hardware state; selectors outside the
//! enumerated range fold to [`Operand::Zero`] rather than erroring.

use tracing::debug;

use super::simplify::Operand;

/// One cycle's worth of input selectors: result = `(a - b) * c + d`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleFields {
    pub a: Operand,
    pub b: Operand,
    pub c: Operand,
    pub d: Operand,
}

/// Color and alpha selectors for both cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedMux {
    pub color: [CycleFields; 2],
    pub alpha: [CycleFields; 2],
}

fn color_operand(bits: u8) -> Operand {
    match bits & 0xF {
        0 => Operand::Combined,
        1 => Operand::Texel0,
        2 => Operand::Texel1,
        3 => Operand::Shade,
        4 => Operand::Env,
        5 => Operand::Prim,
        6 => Operand::PrimLodFrac,
        7 => Operand::Noise,
        8 => Operand::One,
        9 => Operand::Zero,
        other => {
            debug!(selector = other, "unmapped color combiner selector");
            Operand::Zero
        }
    }
}

fn alpha_operand(bits: u8) -> Operand {
    match bits & 0xF {
        0 => Operand::Combined,
        1 => Operand::Texel0,
        2 => Operand::Texel1,
        3 => Operand::Shade,
        4 => Operand::Env,
        5 => Operand::Prim,
        6 => Operand::PrimLodFrac,
        // Noise has no alpha channel on hardware.
        8 => Operand::One,
        9 => Operand::Zero,
        other => {
            debug!(selector = other, "unmapped alpha combiner selector");
            Operand::Zero
        }
    }
}

fn fields(word: u16, map: fn(u8) -> Operand) -> CycleFields {
    CycleFields {
        a: map((word & 0xF) as u8),
        b: map(((word >> 4) & 0xF) as u8),
        c: map(((word >> 8) & 0xF) as u8),
        d: map(((word >> 12) & 0xF) as u8),
    }
}

pub fn decode_mux(mux: u64) -> DecodedMux {
    DecodedMux {
        color: [
            fields(mux as u16, color_operand),
            fields((mux >> 32) as u16, color_operand),
        ],
        alpha: [
            fields((mux >> 16) as u16, alpha_operand),
            fields((mux >> 48) as u16, alpha_operand),
        ],
    }
}

/// Builds a combine word from selectors; the inverse of [`decode_mux`].
/// Used by tests and by the control plane when synthesizing fill/copy draws.
pub fn encode_cycle(a: u8, b: u8, c: u8, d: u8) -> u16 {
    (a as u16 & 0xF) | ((b as u16 & 0xF) << 4) | ((c as u16 & 0xF) << 8) | ((d as u16 & 0xF) << 12)
}

pub fn encode_mux(color0: u16, alpha0: u16, color1: u16, alpha1: u16) -> u64 {
    color0 as u64 | ((alpha0 as u64) << 16) | ((color1 as u64) << 32) | ((alpha1 as u64) << 48)
}
