//! Bidirectional copies between host render targets and RDRAM.
//!
//! `copy_to_rdram` serializes a target's visible pixels back into guest
//! memory; it runs on demand, not per frame, because the readback stall is
//! the dominant cost of this subsystem. `copy_from_rdram` is the inverse,
//! used when the CPU writes pixels directly and expects them on screen
//! without a draw.

use futures_intrusive::channel::shared::oneshot_channel;
use reality_rdram::Rdram;
use tracing::debug;

use crate::error::RdpError;
use crate::formats::FbFormat;
use crate::texture::decode::rgba16_texel;

use super::depth::depth_to_guest;
use super::validity::Witness;
use super::FrameBufferRegistry;

impl FrameBufferRegistry {
    /// Copies the region based at `address` back into RDRAM. Returns false
    /// when no region with that base exists.
    pub fn copy_to_rdram(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        rdram: &dyn Rdram,
        address: u32,
    ) -> Result<bool, RdpError> {
        let Some(region) = self.region(address) else {
            return Ok(false);
        };
        let desc = region.desc;
        let (scaled_w, scaled_h) = desc.scaled_size();
        let rgba = readback_texture(
            device,
            queue,
            region.texture(),
            scaled_w,
            scaled_h,
            4,
            wgpu::TextureAspect::All,
        )?;

        let native = downsample_rgba(&rgba, desc.width, desc.height, desc.scale);
        let packed = pack_pixels(&native, desc.format);
        rdram.write(desc.address, &packed)?;

        // Memory now matches the target exactly; retake the witness from
        // what was just written. Large auxiliary regions keep the planted
        // marker instead of a snapshot.
        let witness = if packed.len() > self.snapshot_limit {
            super::validity::plant_marker(rdram, &desc)?
        } else {
            Witness::Snapshot { bytes: packed }
        };
        let region = self.region_mut(address).expect("region checked above");
        region.witness = Some(witness);
        region.dirty = false;
        region.needs_resync = false;
        self.stats.copies_to_rdram += 1;
        debug!(
            address = format_args!("0x{:x}", address),
            "synchronized render target to RDRAM"
        );
        Ok(true)
    }

    /// Reloads the region owning `address` from RDRAM. A miss is a
    /// legitimate no-op: the CPU may write to pixel memory the rasterizer
    /// never declared.
    pub fn copy_from_rdram(
        &mut self,
        queue: &wgpu::Queue,
        rdram: &dyn Rdram,
        address: u32,
    ) -> Result<bool, RdpError> {
        let Some(base) = self.owner_of(address) else {
            return Ok(false);
        };
        let desc = self.region(base).expect("owner_of returned a region").desc;

        let mut packed = vec![0u8; desc.byte_len() as usize];
        rdram.read(desc.address, &mut packed)?;
        let native = unpack_pixels(&packed, desc.format);
        let scaled = upscale_rgba(&native, desc.width, desc.height, desc.scale);
        let (scaled_w, scaled_h) = desc.scaled_size();

        let region = self.region_mut(base).expect("owner_of returned a region");
        // With multisampling the resolve texture is refreshed here; the
        // multisampled attachment catches up on the next pass.
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: region.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &scaled,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(scaled_w * 4),
                rows_per_image: Some(scaled_h),
            },
            wgpu::Extent3d {
                width: scaled_w,
                height: scaled_h,
                depth_or_array_layers: 1,
            },
        );
        region.witness = Some(Witness::Snapshot { bytes: packed });
        region.dirty = false;
        region.needs_resync = false;
        self.stats.copies_from_rdram += 1;
        debug!(
            address = format_args!("0x{:x}", address),
            base = format_args!("0x{:x}", base),
            "reloaded render target from RDRAM"
        );
        Ok(true)
    }

    /// Resolves the depth target attached to the region based at `address`
    /// into the guest's 16-bit depth plane.
    pub fn copy_depth_to_rdram(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        rdram: &dyn Rdram,
        address: u32,
    ) -> Result<bool, RdpError> {
        let Some(region) = self.region(address) else {
            return Ok(false);
        };
        let Some(depth) = region.depth.as_ref() else {
            return Ok(false);
        };
        let desc = region.desc;
        let raw = readback_texture(
            device,
            queue,
            depth.texture(),
            depth.size.0,
            depth.size.1,
            4,
            wgpu::TextureAspect::DepthOnly,
        )?;

        let mut packed = Vec::with_capacity((desc.width * desc.height * 2) as usize);
        for y in 0..desc.height {
            for x in 0..desc.width {
                let src = ((y * desc.scale * depth.size.0 + x * desc.scale) * 4) as usize;
                let value = f32::from_le_bytes(raw[src..src + 4].try_into().unwrap());
                packed.extend_from_slice(&depth_to_guest(value).to_be_bytes());
            }
        }
        rdram.write(depth.address, &packed)?;
        self.stats.copies_to_rdram += 1;
        Ok(true)
    }
}

/// Blocking texture readback through a staging buffer.
///
/// Rows come back padded to `COPY_BYTES_PER_ROW_ALIGNMENT`; the result is
/// repacked tight before returning.
pub(crate) fn readback_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    aspect: wgpu::TextureAspect,
) -> Result<Vec<u8>, RdpError> {
    if aspect == wgpu::TextureAspect::All
        && !matches!(
            texture.format(),
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb
        )
    {
        return Err(RdpError::UnsupportedReadbackFormat(texture.format()));
    }

    let unpadded_bytes_per_row = width * bytes_per_pixel;
    let padded_bytes_per_row = unpadded_bytes_per_row
        .div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let buffer_size = padded_bytes_per_row as u64 * height as u64;

    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("reality-rdp.readback"),
        size: buffer_size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("reality-rdp.readback-encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect,
        },
        wgpu::ImageCopyBuffer {
            buffer: &readback,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit([encoder.finish()]);

    let slice = readback.slice(..);
    let (sender, receiver) = oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result.map_err(|e| e.to_string()));
    });
    device.poll(wgpu::Maintain::Wait);

    let mapped = pollster::block_on(receiver.receive()).ok_or(RdpError::MapAsyncDropped)?;
    mapped.map_err(RdpError::MapAsync)?;

    let data = slice.get_mapped_range();
    let mut pixels = vec![0u8; (width * height * bytes_per_pixel) as usize];
    for y in 0..height as usize {
        let src = y * padded_bytes_per_row as usize;
        let dst = y * unpadded_bytes_per_row as usize;
        pixels[dst..dst + unpadded_bytes_per_row as usize]
            .copy_from_slice(&data[src..src + unpadded_bytes_per_row as usize]);
    }
    drop(data);
    readback.unmap();
    Ok(pixels)
}

/// Nearest-sample reduction of a scaled RGBA8 image back to native size.
fn downsample_rgba(rgba: &[u8], width: u32, height: u32, scale: u32) -> Vec<u8> {
    if scale <= 1 {
        return rgba.to_vec();
    }
    let scaled_w = width * scale;
    let mut out = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let src = ((y * scale * scaled_w + x * scale) * 4) as usize;
            out.extend_from_slice(&rgba[src..src + 4]);
        }
    }
    out
}

/// Nearest-neighbor expansion of a native RGBA8 image to the scaled size.
fn upscale_rgba(rgba: &[u8], width: u32, height: u32, scale: u32) -> Vec<u8> {
    if scale <= 1 {
        return rgba.to_vec();
    }
    let scaled_w = width * scale;
    let scaled_h = height * scale;
    let mut out = vec![0u8; (scaled_w * scaled_h * 4) as usize];
    for y in 0..scaled_h {
        let src_y = y / scale;
        for x in 0..scaled_w {
            let src = ((src_y * width + x / scale) * 4) as usize;
            let dst = ((y * scaled_w + x) * 4) as usize;
            out[dst..dst + 4].copy_from_slice(&rgba[src..src + 4]);
        }
    }
    out
}

fn pack_pixels(rgba: &[u8], format: FbFormat) -> Vec<u8> {
    match format {
        FbFormat::Rgba32 => rgba.to_vec(),
        FbFormat::Rgba16 => {
            let mut out = Vec::with_capacity(rgba.len() / 2);
            for px in rgba.chunks_exact(4) {
                let value = (u16::from(px[0] >> 3) << 11)
                    | (u16::from(px[1] >> 3) << 6)
                    | (u16::from(px[2] >> 3) << 1)
                    | u16::from(px[3] >= 0x80);
                out.extend_from_slice(&value.to_be_bytes());
            }
            out
        }
        FbFormat::I8 => rgba.chunks_exact(4).map(|px| px[0]).collect(),
    }
}

fn unpack_pixels(bytes: &[u8], format: FbFormat) -> Vec<u8> {
    match format {
        FbFormat::Rgba32 => bytes.to_vec(),
        FbFormat::Rgba16 => {
            let mut out = Vec::with_capacity(bytes.len() * 2);
            for px in bytes.chunks_exact(2) {
                out.extend_from_slice(&rgba16_texel(px[0], px[1]));
            }
            out
        }
        FbFormat::I8 => {
            let mut out = Vec::with_capacity(bytes.len() * 4);
            for &i in bytes {
                out.extend_from_slice(&[i, i, i, 0xFF]);
            }
            out
        }
    }
}
