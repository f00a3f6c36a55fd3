//! Content fingerprints for sampled texture data.
//!
//! Cache admission is decided by a 32-bit checksum over exactly the bytes a
//! draw will sample (bounded by the tile's clamp/mask dimensions, not the
//! full backing image), the palette when one is referenced, and the metadata
//! that changes decode output. Texels with equal fingerprints share one host
//! texture.

use bitflags::bitflags;
use reality_rdram::{Rdram, RdramError};
use xxhash_rust::xxh32::Xxh32;

use crate::formats::{PaletteFormat, TexFormat};

bitflags! {
    /// Per-axis addressing behavior for a tile.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct WrapFlags: u8 {
        const CLAMP_S = 1 << 0;
        const MIRROR_S = 1 << 1;
        const CLAMP_T = 1 << 2;
        const MIRROR_T = 1 << 3;
    }
}

/// Everything a draw call says about one texture sampling unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileDescriptor {
    /// Base of the texel data in RDRAM.
    pub address: u32,
    pub format: TexFormat,
    /// Sampled width/height in texels, after clamp/mask bounding.
    pub width: u32,
    pub height: u32,
    /// Row stride in RDRAM bytes; at least `format.row_bytes(width)`.
    pub line_bytes: u32,
    pub wrap: WrapFlags,
    /// Palette location and layout; only read for color-indexed formats.
    pub palette_address: u32,
    pub palette_format: PaletteFormat,
    pub palette_id: u8,
    pub mipmapped: bool,
}

impl TileDescriptor {
    pub fn row_bytes(&self) -> u32 {
        self.format.row_bytes(self.width)
    }

    pub fn palette_bytes(&self) -> u32 {
        self.format.palette_entries() as u32 * 2
    }
}

const FINGERPRINT_SEED: u32 = 0x524c5459;

/// Checksums the sampled byte range plus decode-relevant metadata.
pub fn tile_fingerprint(rdram: &dyn Rdram, tile: &TileDescriptor) -> Result<u32, RdramError> {
    let mut hasher = Xxh32::new(FINGERPRINT_SEED);

    let row_bytes = tile.row_bytes() as usize;
    let mut row = vec![0u8; row_bytes];
    for y in 0..tile.height {
        rdram.read(tile.address + y * tile.line_bytes, &mut row)?;
        hasher.update(&row);
    }

    if tile.format.is_color_indexed() {
        let mut palette = vec![0u8; tile.palette_bytes() as usize];
        rdram.read(tile.palette_address, &mut palette)?;
        hasher.update(&palette);
    }

    let meta = [
        tile.width.to_le_bytes(),
        tile.height.to_le_bytes(),
        tile.line_bytes.to_le_bytes(),
        (tile.format.bits_per_texel()).to_le_bytes(),
    ];
    for word in meta {
        hasher.update(&word);
    }
    hasher.update(&[
        format_tag(tile.format),
        tile.wrap.bits(),
        tile.palette_id,
        tile.mipmapped as u8,
    ]);

    Ok(hasher.digest())
}

fn format_tag(format: TexFormat) -> u8 {
    match format {
        TexFormat::Rgba16 => 0,
        TexFormat::Rgba32 => 1,
        TexFormat::Ia16 => 2,
        TexFormat::Ia8 => 3,
        TexFormat::Ia4 => 4,
        TexFormat::I8 => 5,
        TexFormat::I4 => 6,
        TexFormat::Ci8 => 7,
        TexFormat::Ci4 => 8,
    }
}
