//! Guest texel decode into the host's RGBA8 upload format.
//!
//! Texel words are big-endian in RDRAM. Intensity formats replicate
//! intensity into alpha, matching how the sampler feeds the combiner.

use reality_rdram::{Rdram, RdramError};

use crate::formats::{PaletteFormat, TexFormat};

use super::fingerprint::TileDescriptor;

#[inline]
fn expand5(v: u8) -> u8 {
    (v << 3) | (v >> 2)
}

#[inline]
fn expand4(v: u8) -> u8 {
    v * 17
}

#[inline]
fn expand3(v: u8) -> u8 {
    (v << 5) | (v << 2) | (v >> 1)
}

pub(crate) fn rgba16_texel(hi: u8, lo: u8) -> [u8; 4] {
    let value = u16::from_be_bytes([hi, lo]);
    [
        expand5(((value >> 11) & 0x1F) as u8),
        expand5(((value >> 6) & 0x1F) as u8),
        expand5(((value >> 1) & 0x1F) as u8),
        if value & 1 != 0 { 0xFF } else { 0 },
    ]
}

fn ia16_texel(hi: u8, lo: u8) -> [u8; 4] {
    [hi, hi, hi, lo]
}

fn palette_lut(
    rdram: &dyn Rdram,
    tile: &TileDescriptor,
) -> Result<Vec<[u8; 4]>, RdramError> {
    let mut raw = vec![0u8; tile.palette_bytes() as usize];
    rdram.read(tile.palette_address, &mut raw)?;
    Ok(raw
        .chunks_exact(2)
        .map(|pair| match tile.palette_format {
            PaletteFormat::Rgba16 => rgba16_texel(pair[0], pair[1]),
            PaletteFormat::Ia16 => ia16_texel(pair[0], pair[1]),
        })
        .collect())
}

/// Decodes the sampled tile region to tightly packed RGBA8 rows.
pub fn decode_tile(rdram: &dyn Rdram, tile: &TileDescriptor) -> Result<Vec<u8>, RdramError> {
    let width = tile.width as usize;
    let height = tile.height as usize;
    let mut out = Vec::with_capacity(width * height * 4);

    let lut = if tile.format.is_color_indexed() {
        Some(palette_lut(rdram, tile)?)
    } else {
        None
    };

    let row_bytes = tile.row_bytes() as usize;
    let mut row = vec![0u8; row_bytes];
    for y in 0..tile.height {
        rdram.read(tile.address + y * tile.line_bytes, &mut row)?;
        decode_row(tile.format, &row, width, lut.as_deref(), &mut out);
    }
    Ok(out)
}

fn decode_row(
    format: TexFormat,
    row: &[u8],
    width: usize,
    lut: Option<&[[u8; 4]]>,
    out: &mut Vec<u8>,
) {
    match format {
        TexFormat::Rgba32 => {
            for x in 0..width {
                out.extend_from_slice(&row[x * 4..x * 4 + 4]);
            }
        }
        TexFormat::Rgba16 => {
            for x in 0..width {
                out.extend_from_slice(&rgba16_texel(row[x * 2], row[x * 2 + 1]));
            }
        }
        TexFormat::Ia16 => {
            for x in 0..width {
                out.extend_from_slice(&ia16_texel(row[x * 2], row[x * 2 + 1]));
            }
        }
        TexFormat::Ia8 => {
            for x in 0..width {
                let i = expand4(row[x] >> 4);
                let a = expand4(row[x] & 0xF);
                out.extend_from_slice(&[i, i, i, a]);
            }
        }
        TexFormat::Ia4 => {
            for x in 0..width {
                let nibble = nibble_at(row, x);
                let i = expand3(nibble >> 1);
                let a = if nibble & 1 != 0 { 0xFF } else { 0 };
                out.extend_from_slice(&[i, i, i, a]);
            }
        }
        TexFormat::I8 => {
            for x in 0..width {
                let i = row[x];
                out.extend_from_slice(&[i, i, i, i]);
            }
        }
        TexFormat::I4 => {
            for x in 0..width {
                let i = expand4(nibble_at(row, x));
                out.extend_from_slice(&[i, i, i, i]);
            }
        }
        TexFormat::Ci8 => {
            let lut = lut.expect("palette decoded for CI formats");
            for x in 0..width {
                out.extend_from_slice(&lut[row[x] as usize]);
            }
        }
        TexFormat::Ci4 => {
            let lut = lut.expect("palette decoded for CI formats");
            for x in 0..width {
                out.extend_from_slice(&lut[nibble_at(row, x) as usize]);
            }
        }
    }
}

#[inline]
fn nibble_at(row: &[u8], x: usize) -> u8 {
    let byte = row[x / 2];
    if x % 2 == 0 {
        byte >> 4
    } else {
        byte & 0xF
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::fingerprint::WrapFlags;
    use reality_rdram::VecRdram;

    fn tile(format: TexFormat, width: u32, height: u32) -> TileDescriptor {
        TileDescriptor {
            address: 0x100,
            format,
            width,
            height,
            line_bytes: format.row_bytes(width),
            wrap: WrapFlags::empty(),
            palette_address: 0x800,
            palette_format: PaletteFormat::Rgba16,
            palette_id: 0,
            mipmapped: false,
        }
    }

    #[test]
    fn rgba16_opaque_red() {
        let ram = VecRdram::new(0x1000);
        // r=31 g=0 b=0 a=1 -> 1111 1000 0000 0001
        ram.write(0x100, &[0xF8, 0x01]).unwrap();
        let out = decode_tile(&ram, &tile(TexFormat::Rgba16, 1, 1)).unwrap();
        assert_eq!(out, vec![0xFF, 0, 0, 0xFF]);
    }

    #[test]
    fn i4_replicates_intensity_into_alpha() {
        let ram = VecRdram::new(0x1000);
        ram.write(0x100, &[0xF0]).unwrap();
        let out = decode_tile(&ram, &tile(TexFormat::I4, 2, 1)).unwrap();
        assert_eq!(out, vec![0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);
    }

    #[test]
    fn ci8_goes_through_palette() {
        let ram = VecRdram::new(0x1000);
        ram.write(0x100, &[0x01]).unwrap();
        // Palette entry 1: g=31 a=1 -> 0000 0111 1100 0001
        ram.write(0x800 + 2, &[0x07, 0xC1]).unwrap();
        let out = decode_tile(&ram, &tile(TexFormat::Ci8, 1, 1)).unwrap();
        assert_eq!(out, vec![0, 0xFF, 0, 0xFF]);
    }

    #[test]
    fn ia8_splits_nibbles() {
        let ram = VecRdram::new(0x1000);
        ram.write(0x100, &[0xF3]).unwrap();
        let out = decode_tile(&ram, &tile(TexFormat::Ia8, 1, 1)).unwrap();
        assert_eq!(out, vec![0xFF, 0xFF, 0xFF, 0x33]);
    }

    #[test]
    fn stride_skips_dead_tail() {
        let ram = VecRdram::new(0x1000);
        let mut t = tile(TexFormat::I8, 2, 2);
        t.line_bytes = 8;
        ram.write(0x100, &[1, 2]).unwrap();
        ram.write(0x108, &[3, 4]).unwrap();
        let out = decode_tile(&ram, &t).unwrap();
        assert_eq!(out[0], 1);
        assert_eq!(out[4], 2);
        assert_eq!(out[8], 3);
        assert_eq!(out[12], 4);
    }
}
