//! Depth-plane specialization of the render-target concept.
//!
//! The guest stores depth as 16-bit values in its own RDRAM plane; the host
//! renders into a `Depth32Float` attachment at the region's scale and
//! converts on resolve.

use super::region::RegionDesc;

pub struct DepthTarget {
    /// Base of the depth plane in RDRAM.
    pub address: u32,
    pub size: (u32, u32),
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthTarget {
    pub fn new(device: &wgpu::Device, address: u32, desc: &RegionDesc) -> Self {
        let (width, height) = desc.scaled_size();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("reality-rdp.depth_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            address,
            size: (width, height),
            texture,
            view,
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

/// Guest depth values are 16-bit; the host attachment is normalized f32.
pub fn depth_to_guest(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * f32::from(u16::MAX)) as u16
}

pub fn depth_from_guest(value: u16) -> f32 {
    f32::from(value) / f32::from(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_conversion_round_trips_endpoints() {
        assert_eq!(depth_to_guest(0.0), 0);
        assert_eq!(depth_to_guest(1.0), u16::MAX);
        assert_eq!(depth_from_guest(0), 0.0);
        assert_eq!(depth_from_guest(u16::MAX), 1.0);
        assert_eq!(depth_to_guest(depth_from_guest(0x8000)), 0x8000);
    }

    #[test]
    fn out_of_range_depth_saturates() {
        assert_eq!(depth_to_guest(-1.0), 0);
        assert_eq!(depth_to_guest(2.0), u16::MAX);
    }
}
