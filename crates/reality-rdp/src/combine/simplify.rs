//! Lowering of combiner cycles to op sequences, and algebraic simplification.
//!
//! A hardware cycle computes `(a - b) * c + d`. Lowering produces the
//! canonical sequence `[Load a, Sub b, Mul c, Add d]`; [`simplify`] then
//! applies a fixed rule list so the generated shader does no work the inputs
//! cannot observe. Simplification is idempotent: running it on an
//! already-simplified sequence returns the same sequence.

/// One combiner input. Color and alpha channels share the selector space;
/// selectors that do not exist for a channel decode to `Zero` upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Previous cycle's combined result.
    Combined,
    Texel0,
    Texel1,
    /// Interpolated vertex color.
    Shade,
    Env,
    Prim,
    PrimLodFrac,
    Noise,
    One,
    Zero,
}

/// A single lowered combiner operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Load(Operand),
    Sub(Operand),
    Mul(Operand),
    Add(Operand),
    /// `mix(b, a, weight)` — the fused form of `(a - b) * weight + b`.
    Lerp {
        a: Operand,
        b: Operand,
        weight: Operand,
    },
}

/// Canonical un-simplified lowering of one cycle.
pub fn lower(a: Operand, b: Operand, c: Operand, d: Operand) -> Vec<Op> {
    vec![Op::Load(a), Op::Sub(b), Op::Mul(c), Op::Add(d)]
}

/// Applies the simplification rules, in order:
///
/// 1. `Sub(Zero)` is dropped.
/// 2. `Load(x)` directly followed by `Sub(x)` folds to `Load(Zero)`.
/// 3. `Mul(Zero)` collapses everything before it to `Load(Zero)`.
/// 4. `Mul(One)` is dropped when no subtraction survives before it.
/// 5. `Add(Zero)` is dropped.
/// 6. A surviving full `[Load a, Sub b, Mul c, Add b]` fuses to
///    `Lerp { a, b, weight: c }`.
pub fn simplify(ops: &[Op]) -> Vec<Op> {
    let mut out: Vec<Op> = Vec::with_capacity(ops.len());
    for &op in ops {
        match op {
            Op::Sub(Operand::Zero) => {}
            Op::Sub(x) if matches!(out.last(), Some(&Op::Load(y)) if y == x) => {
                out.pop();
                out.push(Op::Load(Operand::Zero));
            }
            Op::Mul(Operand::Zero) => {
                out.clear();
                out.push(Op::Load(Operand::Zero));
            }
            Op::Mul(Operand::One) if !out.iter().any(|o| matches!(o, Op::Sub(_))) => {}
            Op::Add(Operand::Zero) => {}
            other => out.push(other),
        }
    }

    if let [Op::Load(a), Op::Sub(b), Op::Mul(c), Op::Add(d)] = out[..] {
        if b == d {
            return vec![Op::Lerp { a, b, weight: c }];
        }
    }
    out
}

pub fn compile_cycle(a: Operand, b: Operand, c: Operand, d: Operand) -> Vec<Op> {
    simplify(&lower(a, b, c, d))
}

/// True if any op in the sequence reads `operand`.
pub fn reads(ops: &[Op], operand: Operand) -> bool {
    ops.iter().any(|op| match *op {
        Op::Load(x) | Op::Sub(x) | Op::Mul(x) | Op::Add(x) => x == operand,
        Op::Lerp { a, b, weight } => a == operand || b == operand || weight == operand,
    })
}
