//! Validity witnesses: cheap evidence that a cached render target still
//! matches its backing RDRAM.
//!
//! The CPU may write into a target's byte range at any time. Re-reading and
//! comparing the whole range every frame would dominate the frame budget, so
//! each region carries the cheapest witness available:
//!
//! - a recorded fill value, when the last operation was a full clear;
//! - a short marker planted at creation, for auxiliary regions too large to
//!   snapshot;
//! - a full snapshot taken at the last synchronization point.
//!
//! Fill and snapshot checks compare a strided sample of the range and
//! tolerate a small fraction of mismatches; low-bit noise from the CPU side
//! (dither, decompression jitter) must not thrash targets.

use reality_rdram::{Rdram, RdramError};

use super::region::RegionDesc;

/// Bytes planted at the base of auxiliary regions.
pub const AUX_MARKER: [u8; 8] = *b"RLTYFBUF";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Witness {
    /// Region was last cleared to this repeating pixel pattern.
    ClearFill { pattern: Vec<u8> },
    /// Marker bytes written at `offset` from the region base at creation.
    Marker { offset: u32 },
    /// Full copy of the backing bytes at the last synchronization.
    Snapshot { bytes: Vec<u8> },
}

#[derive(Clone, Copy, Debug)]
pub struct WitnessConfig {
    /// Fraction of sampled positions allowed to differ.
    pub tolerance: f64,
    /// Distance in bytes between sampled positions.
    pub sample_stride: usize,
}

/// Plants the auxiliary marker into RDRAM and returns its witness.
pub fn plant_marker(rdram: &dyn Rdram, desc: &RegionDesc) -> Result<Witness, RdramError> {
    rdram.write(desc.address, &AUX_MARKER)?;
    Ok(Witness::Marker { offset: 0 })
}

/// Snapshots the region's current backing bytes.
pub fn take_snapshot(rdram: &dyn Rdram, desc: &RegionDesc) -> Result<Witness, RdramError> {
    let mut bytes = vec![0u8; desc.byte_len() as usize];
    rdram.read(desc.address, &mut bytes)?;
    Ok(Witness::Snapshot { bytes })
}

/// Checks a witness against RDRAM. `Ok(false)` means the backing memory no
/// longer matches what was last rendered and the region must resynchronize.
pub fn check(
    witness: &Witness,
    rdram: &dyn Rdram,
    desc: &RegionDesc,
    cfg: &WitnessConfig,
) -> Result<bool, RdramError> {
    match witness {
        Witness::Marker { offset } => {
            let mut current = [0u8; AUX_MARKER.len()];
            rdram.read(desc.address + offset, &mut current)?;
            Ok(current == AUX_MARKER)
        }
        Witness::ClearFill { pattern } => {
            let mut current = vec![0u8; desc.byte_len() as usize];
            rdram.read(desc.address, &mut current)?;
            Ok(sampled_match(&current, cfg, |pos| {
                pattern[pos % pattern.len()]
            }))
        }
        Witness::Snapshot { bytes } => {
            if bytes.len() != desc.byte_len() as usize {
                // Region geometry changed since the snapshot was taken.
                return Ok(false);
            }
            let mut current = vec![0u8; bytes.len()];
            rdram.read(desc.address, &mut current)?;
            Ok(sampled_match(&current, cfg, |pos| bytes[pos]))
        }
    }
}

fn sampled_match(current: &[u8], cfg: &WitnessConfig, expected: impl Fn(usize) -> u8) -> bool {
    let stride = cfg.sample_stride.max(1);
    let mut samples = 0usize;
    let mut mismatches = 0usize;
    let mut pos = 0usize;
    while pos < current.len() {
        samples += 1;
        if current[pos] != expected(pos) {
            mismatches += 1;
        }
        pos += stride;
    }
    samples == 0 || (mismatches as f64) <= cfg.tolerance * samples as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FbFormat;
    use reality_rdram::VecRdram;

    const CFG: WitnessConfig = WitnessConfig {
        tolerance: 0.01,
        sample_stride: 4,
    };

    fn desc() -> RegionDesc {
        RegionDesc {
            address: 0x1000,
            width: 64,
            height: 32,
            format: FbFormat::Rgba16,
            scale: 1,
        }
    }

    #[test]
    fn snapshot_matches_untouched_memory() {
        let ram = VecRdram::new(0x10000);
        let d = desc();
        let witness = take_snapshot(&ram, &d).unwrap();
        assert!(check(&witness, &ram, &d, &CFG).unwrap());
    }

    #[test]
    fn small_mutation_is_tolerated() {
        let ram = VecRdram::new(0x10000);
        let d = desc();
        let witness = take_snapshot(&ram, &d).unwrap();
        // One sampled byte out of byte_len/stride = 1024: well under 1%.
        ram.write(d.address, &[0xFF]).unwrap();
        assert!(check(&witness, &ram, &d, &CFG).unwrap());
    }

    #[test]
    fn bulk_rewrite_fails_the_witness() {
        let ram = VecRdram::new(0x10000);
        let d = desc();
        let witness = take_snapshot(&ram, &d).unwrap();
        let rewrite = vec![0xEE; d.byte_len() as usize / 2];
        ram.write(d.address, &rewrite).unwrap();
        assert!(!check(&witness, &ram, &d, &CFG).unwrap());
    }

    #[test]
    fn mutation_just_over_tolerance_fails() {
        let ram = VecRdram::new(0x10000);
        let d = desc();
        let witness = take_snapshot(&ram, &d).unwrap();
        let samples = d.byte_len() as usize / CFG.sample_stride;
        let bad = samples / 50; // 2% of sampled positions
        for i in 0..bad {
            ram.write(d.address + (i * CFG.sample_stride * 50) as u32, &[0xAA])
                .unwrap();
        }
        assert!(!check(&witness, &ram, &d, &CFG).unwrap());
    }

    #[test]
    fn clear_fill_witness_checks_fill_pattern() {
        let ram = VecRdram::new(0x10000);
        let d = desc();
        let fill = vec![0x12, 0x34];
        let mut contents = Vec::with_capacity(d.byte_len() as usize);
        while contents.len() < d.byte_len() as usize {
            contents.extend_from_slice(&fill);
        }
        ram.write(d.address, &contents).unwrap();

        let witness = Witness::ClearFill {
            pattern: fill.clone(),
        };
        assert!(check(&witness, &ram, &d, &CFG).unwrap());

        let rewrite = vec![0u8; d.byte_len() as usize];
        ram.write(d.address, &rewrite).unwrap();
        assert!(!check(&witness, &ram, &d, &CFG).unwrap());
    }

    #[test]
    fn marker_witness_reads_only_marker_bytes() {
        let ram = VecRdram::new(0x10000);
        let d = desc();
        let witness = plant_marker(&ram, &d).unwrap();
        // Scribbling elsewhere in the region does not disturb the marker.
        ram.write(d.address + 0x100, &[0xFF; 64]).unwrap();
        assert!(check(&witness, &ram, &d, &CFG).unwrap());
        // Overwriting the marker does.
        ram.write(d.address, &[0u8; 8]).unwrap();
        assert!(!check(&witness, &ram, &d, &CFG).unwrap());
    }

    #[test]
    fn stale_snapshot_length_is_invalid() {
        let ram = VecRdram::new(0x10000);
        let d = desc();
        let witness = Witness::Snapshot { bytes: vec![0; 16] };
        assert!(!check(&witness, &ram, &d, &CFG).unwrap());
    }
}
