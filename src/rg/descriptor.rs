//! Descriptor set layouts and the manually-pooled descriptor sets they
//! grow on demand.

use ash::vk;

use crate::rg::error::RgResult;
use crate::rg::reflect::BindingKind;

/// One binding entry in a [`DescriptorSetLayout`].
#[derive(Debug, Clone, Copy)]
pub struct LayoutEntry {
    /// Binding index within the set.
    pub binding_index: u32,
    /// Descriptor kind, usually taken from SPIR-V reflection.
    pub kind: BindingKind,
    /// Which shader stages see this binding.
    pub stage_mask: vk::ShaderStageFlags,
    /// Array length (1 for a scalar binding, 4096 for a bindless array).
    pub array_count: u32,
}

struct Pool {
    vk_pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    free_list: Vec<usize>,
}

/// Owns the Vulkan layout object and the ordered list of
/// [`Pool`]s it has grown to satisfy `allocate` calls.
pub struct DescriptorSetLayout {
    device: ash::Device,
    vk_layout: vk::DescriptorSetLayout,
    entries: Vec<LayoutEntry>,
    pools: Vec<Pool>,
}

/// A handle into a [`DescriptorSetLayout`]'s pool list. Destruction
/// returns the set to its owning pool's free list -- the underlying
/// `VkDescriptorSet` is freed only when the layout itself is destroyed.
pub struct DescriptorSet {
    pool_index: usize,
    slot_index: usize,
    vk_set: vk::DescriptorSet,
}

impl DescriptorSet {
    /// Raw Vulkan handle.
    pub fn handle(&self) -> vk::DescriptorSet {
        self.vk_set
    }
}

impl DescriptorSetLayout {
    /// Create a layout from a fixed binding array.
    pub fn new(device: ash::Device, entries: Vec<LayoutEntry>) -> RgResult<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|e| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(e.binding_index)
                    .descriptor_type(e.kind.to_vk())
                    .descriptor_count(e.array_count)
                    .stage_flags(e.stage_mask)
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let vk_layout = unsafe { device.create_descriptor_set_layout(&create_info, None)? };

        Ok(Self { device, vk_layout, entries, pools: Vec::new() })
    }

    /// Raw layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.vk_layout
    }

    /// The fixed binding array this layout was created with.
    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// Capacity of the next pool to grow to, given the previous pool's
    /// size (`None` before the first pool exists): doubles, starting at
    /// 8, capped at 128.
    fn next_pool_size(prev_set_count: Option<u32>) -> u32 {
        let prev = prev_set_count.unwrap_or(4);
        (prev * 2).min(128).max(8)
    }

    fn grow(&mut self) -> RgResult<usize> {
        let prev_set_count = self.pools.last().map(|p| p.sets.len() as u32);
        let set_count = Self::next_pool_size(prev_set_count);

        let pool_sizes: Vec<vk::DescriptorPoolSize> = self
            .entries
            .iter()
            .map(|e| {
                vk::DescriptorPoolSize::builder()
                    .ty(e.kind.to_vk())
                    .descriptor_count(e.array_count * set_count)
                    .build()
            })
            .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(set_count)
            .pool_sizes(&pool_sizes);
        let vk_pool = unsafe { self.device.create_descriptor_pool(&pool_info, None)? };

        let layouts = vec![self.vk_layout; set_count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(vk_pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };

        let free_list = (0..sets.len()).rev().collect();
        self.pools.push(Pool { vk_pool, sets, free_list });
        Ok(self.pools.len() - 1)
    }

    /// Allocate a set: consult the pool list in reverse order for a free
    /// slot, else grow (doubling the previous pool's capacity, starting
    /// at 8, capped at 128).
    pub fn allocate(&mut self) -> RgResult<DescriptorSet> {
        for (pool_index, pool) in self.pools.iter_mut().enumerate().rev() {
            if let Some(slot_index) = pool.free_list.pop() {
                return Ok(DescriptorSet { pool_index, slot_index, vk_set: pool.sets[slot_index] });
            }
        }
        let pool_index = self.grow()?;
        let pool = &mut self.pools[pool_index];
        let slot_index = pool.free_list.pop().expect("freshly grown pool is non-empty");
        Ok(DescriptorSet { pool_index, slot_index, vk_set: pool.sets[slot_index] })
    }

    /// Return `set` to its owning pool's free list.
    pub fn free(&mut self, set: DescriptorSet) {
        self.pools[set.pool_index].free_list.push(set.slot_index);
    }

    /// Successive pool capacities, for testing the `8, 16, 32, 64, 128,
    /// 128, ...` growth sequence.
    pub fn pool_capacities(&self) -> Vec<usize> {
        self.pools.iter().map(|p| p.sets.len()).collect()
    }

    /// Write `set`'s bindings. `size == 0` for a buffer entry means
    /// `WHOLE_SIZE`.
    pub fn update(&self, set: &DescriptorSet, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<Vec<vk::DescriptorBufferInfo>> = writes
            .iter()
            .map(|w| match &w.payload {
                WritePayload::Buffer { buffer, offset, size } => vec![vk::DescriptorBufferInfo {
                    buffer: *buffer,
                    offset: *offset,
                    range: if *size == 0 { vk::WHOLE_SIZE } else { *size },
                }],
                _ => Vec::new(),
            })
            .collect();
        let image_infos: Vec<Vec<vk::DescriptorImageInfo>> = writes
            .iter()
            .map(|w| match &w.payload {
                WritePayload::Image { view, sampler, layout } => vec![vk::DescriptorImageInfo {
                    sampler: sampler.unwrap_or(vk::Sampler::null()),
                    image_view: *view,
                    image_layout: *layout,
                }],
                _ => Vec::new(),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let entry = self
                    .entries
                    .iter()
                    .find(|e| e.binding_index == w.binding)
                    .expect("write targets a declared binding");
                let mut builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set.vk_set)
                    .dst_binding(w.binding)
                    .dst_array_element(w.array_element)
                    .descriptor_type(entry.kind.to_vk());
                builder = match &w.payload {
                    WritePayload::Buffer { .. } => builder.buffer_info(&buffer_infos[i]),
                    WritePayload::Image { .. } => builder.image_info(&image_infos[i]),
                };
                builder.build()
            })
            .collect();

        unsafe {
            self.device.update_descriptor_sets(&vk_writes, &[]);
        }
    }
}

/// One descriptor update, keyed by binding.
pub struct DescriptorWrite {
    /// Binding index within the layout.
    pub binding: u32,
    /// Array element within that binding (0 for non-array bindings).
    pub array_element: u32,
    /// The buffer or image payload.
    pub payload: WritePayload,
}

/// What to write into a descriptor slot.
pub enum WritePayload {
    /// A buffer range; `size == 0` means `WHOLE_SIZE`.
    Buffer {
        /// The buffer handle.
        buffer: vk::Buffer,
        /// Byte offset into the buffer.
        offset: vk::DeviceSize,
        /// Byte range, or 0 for `WHOLE_SIZE`.
        size: vk::DeviceSize,
    },
    /// A sampled image or combined image/sampler.
    Image {
        /// The image view.
        view: vk::ImageView,
        /// The sampler, if this is a combined or sampler-only binding.
        sampler: Option<vk::Sampler>,
        /// Layout the image will be in when sampled.
        layout: vk::ImageLayout,
    },
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            for pool in &self.pools {
                self.device.destroy_descriptor_pool(pool.vk_pool, None);
            }
            self.device.destroy_descriptor_set_layout(self.vk_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_growth_sequence() {
        let mut prev = None;
        let mut sizes = Vec::new();
        for _ in 0..6 {
            let size = DescriptorSetLayout::next_pool_size(prev);
            sizes.push(size);
            prev = Some(size);
        }
        assert_eq!(sizes, vec![8, 16, 32, 64, 128, 128]);
    }
}
