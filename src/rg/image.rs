//! GPU images, views, and samplers.

use ash::vk;
use bitflags::bitflags;

use crate::rg::allocator::{Allocation, AllocationKind, Allocator};
use crate::rg::error::RgResult;

bitflags! {
    /// Subset of Vulkan image usages the RG layer exposes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImageUsage: u32 {
        /// `SAMPLED`
        const SAMPLED = 1 << 0;
        /// `COLOR_ATTACHMENT`
        const COLOR_ATTACHMENT = 1 << 1;
        /// `DEPTH_STENCIL_ATTACHMENT`
        const DEPTH_STENCIL_ATTACHMENT = 1 << 2;
        /// `TRANSFER_SRC`
        const TRANSFER_SRC = 1 << 3;
        /// `TRANSFER_DST`
        const TRANSFER_DST = 1 << 4;
        /// `STORAGE`
        const STORAGE = 1 << 5;
    }
}

impl ImageUsage {
    fn to_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(ImageUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(ImageUsage::COLOR_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(ImageUsage::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(ImageUsage::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.contains(ImageUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        flags
    }
}

/// 3D extent; `depth == 1` for a 2D image.
#[derive(Debug, Clone, Copy)]
pub struct Extent3d {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels (1 for 2D images).
    pub depth: u32,
}

fn stencil_carrying(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// A Vulkan image, its backing allocation, and its default view.
pub struct Image {
    device: ash::Device,
    vk_image: vk::Image,
    vk_view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: Extent3d,
    format: vk::Format,
    usage: ImageUsage,
    mip_count: u32,
    layer_count: u32,
}

impl Image {
    /// Create an image of `extent`/`format`/`usage`, with `mip_count`
    /// mips and `layer_count` array layers (6 marks a cube view).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: ash::Device,
        allocator: &mut Allocator,
        extent: Extent3d,
        format: vk::Format,
        usage: ImageUsage,
        mip_count: u32,
        layer_count: u32,
        sample_count: vk::SampleCountFlags,
    ) -> RgResult<Self> {
        let image_type = if extent.depth > 1 { vk::ImageType::TYPE_3D } else { vk::ImageType::TYPE_2D };
        let create_flags = if layer_count == 6 {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let create_info = vk::ImageCreateInfo::builder()
            .flags(create_flags)
            .image_type(image_type)
            .format(format)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: extent.depth })
            .mip_levels(mip_count)
            .array_layers(layer_count)
            .samples(sample_count)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let vk_image = unsafe { device.create_image(&create_info, None)? };

        let requirements = unsafe { device.get_image_memory_requirements(vk_image) };
        // Dedicated path: large images (>=1/4 of the device-local block
        // default) skip the buddy tree.
        let dedicated = requirements.size >= (256 * 1024 * 1024) / 4;
        let allocation = allocator.allocate(requirements, AllocationKind::DeviceLocal, dedicated)?;
        let (memory, offset) = allocator.bind_target(&allocation);
        unsafe { device.bind_image_memory(vk_image, memory, offset)? };

        let mut aspect = vk::ImageAspectFlags::empty();
        if depth_format(format) {
            aspect |= vk::ImageAspectFlags::DEPTH;
            if stencil_carrying(format) {
                aspect |= vk::ImageAspectFlags::STENCIL;
            }
        } else {
            aspect |= vk::ImageAspectFlags::COLOR;
        }

        let view_type = if layer_count == 6 {
            vk::ImageViewType::CUBE
        } else if extent.depth > 1 {
            vk::ImageViewType::TYPE_3D
        } else if layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };

        let subresource_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(aspect)
            .base_mip_level(0)
            .level_count(mip_count)
            .base_array_layer(0)
            .layer_count(layer_count)
            .build();

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(vk_image)
            .view_type(view_type)
            .format(format)
            .subresource_range(subresource_range);
        let vk_view = unsafe { device.create_image_view(&view_info, None)? };

        Ok(Self {
            device,
            vk_image,
            vk_view,
            allocation: Some(allocation),
            extent,
            format,
            usage,
            mip_count,
            layer_count,
        })
    }

    /// Raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.vk_image
    }

    /// Default full-resource view.
    pub fn view(&self) -> vk::ImageView {
        self.vk_view
    }

    /// Image extent.
    pub fn extent(&self) -> Extent3d {
        self.extent
    }

    /// Image format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Declared usage flags.
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    /// Mip level count.
    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// Array layer count.
    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    /// Release the image's memory back to `allocator`; see
    /// [`Buffer::destroy`](crate::rg::buffer::Buffer::destroy) for why
    /// this is a separate step from `Drop`.
    pub fn destroy(mut self, allocator: &mut Allocator) {
        if let Some(allocation) = self.allocation.take() {
            allocator.free(allocation);
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.vk_view, None);
            self.device.destroy_image(self.vk_image, None);
        }
        if self.allocation.is_some() {
            log::warn!("Image dropped without destroy(): allocation leaked in the device allocator");
        }
    }
}

/// Texture filtering / addressing modes: `max_lod = 1.0` when both
/// bounds are zero, `max_anisotropy = 1.0` when zero.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    /// Minification filter.
    pub min_filter: vk::Filter,
    /// Magnification filter.
    pub mag_filter: vk::Filter,
    /// Addressing mode applied to all three axes.
    pub address_mode: vk::SamplerAddressMode,
    /// Border color used with `CLAMP_TO_BORDER`.
    pub border_color: vk::BorderColor,
    /// Whether anisotropic filtering is requested.
    pub anisotropy_enable: bool,
    /// Requested max anisotropy (0 => default of 1.0).
    pub max_anisotropy: f32,
    /// Minimum LOD.
    pub min_lod: f32,
    /// Maximum LOD (0 with `min_lod == 0` => default of 1.0).
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: vk::Filter::LINEAR,
            mag_filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
            anisotropy_enable: false,
            max_anisotropy: 0.0,
            min_lod: 0.0,
            max_lod: 0.0,
        }
    }
}

/// A `VkSampler`.
pub struct Sampler {
    device: ash::Device,
    vk_sampler: vk::Sampler,
}

/// Resolves `SamplerDesc`'s zero-means-default rules: `max_lod` becomes
/// 1.0 when both LOD bounds are zero, `max_anisotropy` becomes 1.0 when
/// zero. Returns `(max_lod, max_anisotropy)`.
fn resolve_lod_and_anisotropy(desc: &SamplerDesc) -> (f32, f32) {
    let max_lod = if desc.min_lod == 0.0 && desc.max_lod == 0.0 { 1.0 } else { desc.max_lod };
    let max_anisotropy = if desc.max_anisotropy == 0.0 { 1.0 } else { desc.max_anisotropy };
    (max_lod, max_anisotropy)
}

impl Sampler {
    /// Create a sampler from `desc`, applying the zero-means-default
    /// rules.
    pub fn new(device: ash::Device, desc: SamplerDesc) -> RgResult<Self> {
        let (max_lod, max_anisotropy) = resolve_lod_and_anisotropy(&desc);

        let create_info = vk::SamplerCreateInfo::builder()
            .min_filter(desc.min_filter)
            .mag_filter(desc.mag_filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .border_color(desc.border_color)
            .anisotropy_enable(desc.anisotropy_enable)
            .max_anisotropy(max_anisotropy)
            .min_lod(desc.min_lod)
            .max_lod(max_lod);
        let vk_sampler = unsafe { device.create_sampler(&create_info, None)? };

        Ok(Self { device, vk_sampler })
    }

    /// Raw sampler handle.
    pub fn handle(&self) -> vk::Sampler {
        self.vk_sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.vk_sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_default_lod_and_anisotropy() {
        let desc = SamplerDesc { min_lod: 0.0, max_lod: 0.0, max_anisotropy: 0.0, ..Default::default() };
        let (max_lod, max_aniso) = resolve_lod_and_anisotropy(&desc);
        assert_eq!(max_lod, 1.0);
        assert_eq!(max_aniso, 1.0);
    }

    #[test]
    fn sampler_honors_explicit_lod_and_anisotropy() {
        let desc = SamplerDesc { min_lod: 0.0, max_lod: 4.0, max_anisotropy: 8.0, ..Default::default() };
        let (max_lod, max_aniso) = resolve_lod_and_anisotropy(&desc);
        assert_eq!(max_lod, 4.0);
        assert_eq!(max_aniso, 8.0);
    }
}
