//! The bindless global-descriptor resource model.
//!
//! One global [`DescriptorSetLayout`] with three 4096-slot array
//! bindings (storage buffers, sampled images, samplers), each backed by
//! its own [`SlotPool`] driving real descriptor-array updates.

use ash::vk;

use crate::engine::slot_pool::{SlotPool, INVALID_SLOT};
use crate::rg::buffer::Buffer;
use crate::rg::descriptor::{DescriptorSet, DescriptorSetLayout, DescriptorWrite, LayoutEntry, WritePayload};
use crate::rg::error::{RgError, RgResult};
use crate::rg::image::{Image, Sampler};
use crate::rg::reflect::BindingKind;

/// Array length of each bindless binding.
pub const SLOTS_PER_ARRAY: u32 = 4096;

const STORAGE_BUFFER_BINDING: u32 = 0;
const SAMPLED_IMAGE_BINDING: u32 = 1;
const SAMPLER_BINDING: u32 = 2;

/// A handle to a bindless-allocated resource: the descriptor-array
/// slot index carried in push constants, paired with the Vulkan object
/// it names. Valid only while the owning [`BindlessEngine`] lives.
#[derive(Debug, Clone, Copy)]
pub struct Handle<T> {
    /// Descriptor-array slot index.
    pub index: u32,
    object: T,
}

impl<T> Handle<T> {
    /// The underlying Vulkan object this handle names.
    pub fn object(&self) -> &T {
        &self.object
    }
}

/// Owns the single global descriptor set and the three slot pools
/// backing its array bindings.
pub struct BindlessEngine {
    device: ash::Device,
    layout: DescriptorSetLayout,
    set: DescriptorSet,
    storage_buffers: SlotPool,
    sampled_images: SlotPool,
    samplers: SlotPool,
}

impl BindlessEngine {
    /// Build the global descriptor set layout and allocate its single
    /// set.
    pub fn new(device: ash::Device) -> RgResult<Self> {
        let entries = vec![
            LayoutEntry {
                binding_index: STORAGE_BUFFER_BINDING,
                kind: BindingKind::StorageBuffer { dynamic: false },
                stage_mask: vk::ShaderStageFlags::ALL,
                array_count: SLOTS_PER_ARRAY,
            },
            LayoutEntry {
                binding_index: SAMPLED_IMAGE_BINDING,
                kind: BindingKind::SampledImage,
                stage_mask: vk::ShaderStageFlags::ALL,
                array_count: SLOTS_PER_ARRAY,
            },
            LayoutEntry {
                binding_index: SAMPLER_BINDING,
                kind: BindingKind::Sampler,
                stage_mask: vk::ShaderStageFlags::ALL,
                array_count: SLOTS_PER_ARRAY,
            },
        ];
        let mut layout = DescriptorSetLayout::new(device.clone(), entries)?;
        let set = layout.allocate()?;

        Ok(Self {
            device,
            layout,
            set,
            storage_buffers: SlotPool::new(SLOTS_PER_ARRAY),
            sampled_images: SlotPool::new(SLOTS_PER_ARRAY),
            samplers: SlotPool::new(SLOTS_PER_ARRAY),
        })
    }

    /// The global descriptor set layout (shared by every pipeline's set
    /// 0).
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// The single global descriptor set.
    pub fn set(&self) -> vk::DescriptorSet {
        self.set.handle()
    }

    /// Register `buffer` as a whole-range storage-buffer slot, writing
    /// the descriptor update immediately.
    pub fn allocate_storage_buffer(&mut self, buffer: Buffer) -> RgResult<Handle<Buffer>> {
        let index = self.storage_buffers.allocate();
        if index == INVALID_SLOT {
            return Err(RgError::SlotPoolExhausted { resource: "storage buffer" });
        }
        self.layout.update(
            &self.set,
            &[DescriptorWrite {
                binding: STORAGE_BUFFER_BINDING,
                array_element: index,
                payload: WritePayload::Buffer { buffer: buffer.handle(), offset: 0, size: 0 },
            }],
        );
        Ok(Handle { index, object: buffer })
    }

    /// Release a storage-buffer handle: free its slot, then destroy the
    /// buffer via `allocator`.
    pub fn free_storage_buffer(&mut self, handle: Handle<Buffer>, allocator: &mut crate::rg::allocator::Allocator) {
        self.storage_buffers.free(handle.index);
        handle.object.destroy(allocator);
    }

    /// Register `image`'s default view as a sampled-image slot.
    pub fn allocate_sampled_image(&mut self, image: Image) -> RgResult<Handle<Image>> {
        let index = self.sampled_images.allocate();
        if index == INVALID_SLOT {
            return Err(RgError::SlotPoolExhausted { resource: "sampled image" });
        }
        self.layout.update(
            &self.set,
            &[DescriptorWrite {
                binding: SAMPLED_IMAGE_BINDING,
                array_element: index,
                payload: WritePayload::Image { view: image.view(), sampler: None, layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL },
            }],
        );
        Ok(Handle { index, object: image })
    }

    /// Release a sampled-image handle.
    pub fn free_sampled_image(&mut self, handle: Handle<Image>, allocator: &mut crate::rg::allocator::Allocator) {
        self.sampled_images.free(handle.index);
        handle.object.destroy(allocator);
    }

    /// Register `sampler` as a sampler slot.
    pub fn allocate_sampler(&mut self, sampler: Sampler) -> RgResult<Handle<Sampler>> {
        let index = self.samplers.allocate();
        if index == INVALID_SLOT {
            return Err(RgError::SlotPoolExhausted { resource: "sampler" });
        }
        self.layout.update(
            &self.set,
            &[DescriptorWrite {
                binding: SAMPLER_BINDING,
                array_element: index,
                payload: WritePayload::Image { view: vk::ImageView::null(), sampler: Some(sampler.handle()), layout: vk::ImageLayout::UNDEFINED },
            }],
        );
        Ok(Handle { index, object: sampler })
    }

    /// Release a sampler handle. The underlying `Sampler` is dropped
    /// (destroying the `VkSampler`) once the slot is freed.
    pub fn free_sampler(&mut self, handle: Handle<Sampler>) {
        self.samplers.free(handle.index);
    }

    /// Wait for the device to go idle, then release every slot pool.
    /// Must be called before the engine itself drops.
    pub fn shutdown(&mut self) -> RgResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_carries_slot_index() {
        let h = Handle { index: 7, object: 42u32 };
        assert_eq!(h.index, 7);
        assert_eq!(*h.object(), 42);
    }
}
