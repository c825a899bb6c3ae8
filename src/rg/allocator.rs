//! Device-memory allocator: a buddy allocator over two pools of
//! power-of-two-sized [`MemoryBlock`]s (host-visible, device-local),
//! with a dedicated-allocation fast path for large or flagged resources.
//!
//! The block list and the dedicated allocations both live on the same
//! allocator type, so a caller never needs to know which path served a
//! given request.

use ash::vk;

use crate::rg::error::{RgError, RgResult};

const HOST_VISIBLE_BLOCK_SIZE: vk::DeviceSize = 64 * 1024 * 1024;
const DEVICE_LOCAL_BLOCK_SIZE: vk::DeviceSize = 256 * 1024 * 1024;
/// Fixed-depth chunk tree: at most 2*256-1 nodes, further capped by
/// `2*block_size - 1` for tiny blocks.
const MAX_CHUNKS: usize = 2 * 256 - 1;

/// Which pool an allocation was carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    /// `HOST_VISIBLE | HOST_COHERENT[ | HOST_CACHED]`.
    Host,
    /// `DEVICE_LOCAL`.
    Device,
}

/// Why an allocation is being requested; selects the memory-type
/// candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    /// Device-local only, no host access.
    DeviceLocal,
    /// Host-visible, uploaded to the GPU (vertex/index/uniform staging).
    Upload,
    /// Host-visible, GPU writes read back by the CPU.
    Readback,
}

struct Chunk {
    used_bytes: vk::DeviceSize,
    split: bool,
}

/// One `VkDeviceMemory` allocation subdivided by a buddy tree.
pub struct MemoryBlock {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    memory_type_index: u32,
    class: MemoryClass,
    mapping: Option<*mut u8>,
    chunks: Vec<Chunk>,
}

impl MemoryBlock {
    fn tree_level(index: usize) -> u32 {
        ((index + 1) as f64).log2().floor() as u32
    }

    fn chunk_size(&self, index: usize) -> vk::DeviceSize {
        self.size >> Self::tree_level(index)
    }

    fn chunk_offset(&self, index: usize) -> vk::DeviceSize {
        if index == 0 {
            return 0;
        }
        let parent = (index - 1) / 2;
        let parent_offset = self.chunk_offset(parent);
        if index == 2 * parent + 2 {
            // right child
            parent_offset + self.chunk_size(index)
        } else {
            parent_offset
        }
    }

    fn try_split_and_claim(
        &mut self,
        index: usize,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
    ) -> Option<vk::DeviceSize> {
        if index >= self.chunks.len() {
            return None;
        }
        let chunk_size = self.chunk_size(index);
        let chunk_offset = self.chunk_offset(index);

        if self.chunks[index].split {
            let left = 2 * index + 1;
            let right = 2 * index + 2;
            if let Some(off) = self.try_split_and_claim(left, size, alignment) {
                self.chunks[index].used_bytes =
                    self.chunks[left].used_bytes + self.chunks[right].used_bytes;
                return Some(off);
            }
            if let Some(off) = self.try_split_and_claim(right, size, alignment) {
                self.chunks[index].used_bytes =
                    self.chunks[left].used_bytes + self.chunks[right].used_bytes;
                return Some(off);
            }
            return None;
        }

        // Unsplit: try splitting deeper first, so a small request doesn't
        // eat a whole large chunk while finer-grained children are free.
        let left = 2 * index + 1;
        let right = 2 * index + 2;
        if left < self.chunks.len() {
            let half = chunk_size / 2;
            let used = self.chunks[index].used_bytes;
            let left_offset = chunk_offset;
            let right_offset = chunk_offset + half;
            let splittable = size <= half
                && used <= half
                && (left_offset % alignment == 0 || right_offset % alignment == 0);
            if splittable {
                self.chunks[index].split = true;
                self.chunks[left].used_bytes = used;
                self.chunks[right].used_bytes = 0;

                if let Some(off) = self.try_split_and_claim(left, size, alignment) {
                    self.chunks[index].used_bytes =
                        self.chunks[left].used_bytes + self.chunks[right].used_bytes;
                    return Some(off);
                }
                if let Some(off) = self.try_split_and_claim(right, size, alignment) {
                    self.chunks[index].used_bytes =
                        self.chunks[left].used_bytes + self.chunks[right].used_bytes;
                    return Some(off);
                }
                // Splitting didn't actually help (shouldn't happen given
                // the `splittable` check above); undo and fall through to
                // the direct-claim fallback.
                self.chunks[index].split = false;
            }
        }

        // Fallback: chunk can't be split further (it's at the minimum
        // size, or the split attempt above didn't pan out) -- claim it
        // directly if free.
        if self.chunks[index].used_bytes == 0
            && size <= chunk_size
            && chunk_offset % alignment == 0
        {
            self.chunks[index].used_bytes = size;
            return Some(chunk_offset);
        }

        None
    }

    fn find_chunk_index(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> usize {
        fn go(block: &MemoryBlock, index: usize, offset: vk::DeviceSize, size: vk::DeviceSize) -> Option<usize> {
            if index >= block.chunks.len() {
                return None;
            }
            let o = block.chunk_offset(index);
            let s = block.chunk_size(index);
            if o == offset && s >= size && !block.chunks[index].split && block.chunks[index].used_bytes == size {
                return Some(index);
            }
            if block.chunks[index].split {
                if let Some(i) = go(block, 2 * index + 1, offset, size) {
                    return Some(i);
                }
                if let Some(i) = go(block, 2 * index + 2, offset, size) {
                    return Some(i);
                }
            }
            None
        }
        go(self, 0, offset, size).expect("offset/size must correspond to a live allocation")
    }

    fn free_at(&mut self, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let index = self.find_chunk_index(offset, size);
        self.chunks[index].used_bytes = 0;
        self.propagate_and_merge(index);
    }

    fn propagate_and_merge(&mut self, index: usize) {
        if index == 0 {
            return;
        }
        let parent = (index - 1) / 2;
        let left = 2 * parent + 1;
        let right = 2 * parent + 2;
        self.chunks[parent].used_bytes = self.chunks[left].used_bytes + self.chunks[right].used_bytes;
        if !self.chunks[left].split
            && !self.chunks[right].split
            && self.chunks[left].used_bytes == 0
            && self.chunks[right].used_bytes == 0
        {
            self.chunks[parent].split = false;
        }
        self.propagate_and_merge(parent);
    }

    /// Sum of `used_bytes` at the root; 0 iff the block is fully free.
    pub fn root_used(&self) -> vk::DeviceSize {
        self.chunks[0].used_bytes
    }

    /// Whether any chunk is currently split (used by tests to assert the
    /// block has returned to its pristine state after free).
    pub fn any_split(&self) -> bool {
        self.chunks.iter().any(|c| c.split)
    }
}

/// Either an in-block (buddy) allocation or a dedicated one.
pub enum Allocation {
    /// Carved out of a [`MemoryBlock`]'s chunk tree.
    Block {
        /// Index into `Allocator::blocks` of the owning class.
        block_index: usize,
        /// Which pool (`Host`/`Device`) owns `block_index`.
        class: MemoryClass,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    /// A direct `vkAllocateMemory` call, bypassing the tree.
    Dedicated {
        memory: vk::DeviceMemory,
        mapping: Option<*mut u8>,
        size: vk::DeviceSize,
    },
}

impl Allocation {
    /// Underlying device size of the allocation.
    pub fn size(&self) -> vk::DeviceSize {
        match self {
            Allocation::Block { size, .. } => *size,
            Allocation::Dedicated { size, .. } => *size,
        }
    }
}

/// Owns the ordered sequence of host-visible and device-local
/// [`MemoryBlock`]s and performs buddy allocation/free and the
/// dedicated-allocation fast path.
pub struct Allocator {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    host_blocks: Vec<MemoryBlock>,
    device_blocks: Vec<MemoryBlock>,
}

impl Allocator {
    /// Create an allocator bound to `device`, using `memory_properties`
    /// queried once from the physical device.
    pub fn new(device: ash::Device, memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            device,
            memory_properties,
            host_blocks: Vec::new(),
            device_blocks: Vec::new(),
        }
    }

    fn candidate_property_sets(kind: AllocationKind) -> Vec<vk::MemoryPropertyFlags> {
        use vk::MemoryPropertyFlags as F;
        match kind {
            AllocationKind::DeviceLocal => vec![F::DEVICE_LOCAL],
            AllocationKind::Upload => vec![
                F::HOST_VISIBLE | F::HOST_COHERENT | F::DEVICE_LOCAL,
                F::HOST_VISIBLE | F::HOST_COHERENT,
            ],
            AllocationKind::Readback => vec![
                F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED,
                F::HOST_VISIBLE | F::HOST_COHERENT,
            ],
        }
    }

    fn find_memory_type(
        &self,
        type_filter: u32,
        kind: AllocationKind,
    ) -> RgResult<(u32, MemoryClass)> {
        let candidates = Self::candidate_property_sets(kind);
        for properties in &candidates {
            for i in 0..self.memory_properties.memory_type_count {
                let ty = self.memory_properties.memory_types[i as usize];
                if (type_filter & (1 << i)) != 0 && ty.property_flags.contains(*properties) {
                    let class = if matches!(kind, AllocationKind::DeviceLocal) {
                        MemoryClass::Device
                    } else {
                        MemoryClass::Host
                    };
                    return Ok((i, class));
                }
            }
        }
        Err(RgError::NoSuitableMemoryType {
            requirements: vk::MemoryRequirements {
                size: 0,
                alignment: 0,
                memory_type_bits: type_filter,
            },
            properties: candidates[0],
        })
    }

    fn default_block_size(class: MemoryClass) -> vk::DeviceSize {
        match class {
            MemoryClass::Host => HOST_VISIBLE_BLOCK_SIZE,
            MemoryClass::Device => DEVICE_LOCAL_BLOCK_SIZE,
        }
    }

    fn new_block(&self, memory_type_index: u32, class: MemoryClass, min_size: vk::DeviceSize) -> RgResult<MemoryBlock> {
        let size = min_size
            .max(Self::default_block_size(class))
            .next_power_of_two();
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None)? };

        let mapping = if matches!(class, MemoryClass::Host) {
            let ptr = unsafe {
                self.device
                    .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?
            };
            Some(ptr as *mut u8)
        } else {
            None
        };

        let chunk_count = MAX_CHUNKS.min((2 * size - 1) as usize);
        let mut chunks = Vec::with_capacity(chunk_count);
        chunks.resize_with(chunk_count, || Chunk { used_bytes: 0, split: false });

        Ok(MemoryBlock {
            memory,
            size,
            memory_type_index,
            class,
            mapping,
            chunks,
        })
    }

    fn blocks_mut(&mut self, class: MemoryClass) -> &mut Vec<MemoryBlock> {
        match class {
            MemoryClass::Host => &mut self.host_blocks,
            MemoryClass::Device => &mut self.device_blocks,
        }
    }

    /// Allocate device memory for `requirements`, selecting a memory
    /// type for `kind`. If `dedicated_hint` is set (large/flagged
    /// resources, or Vulkan's own dedicated-allocation preference), skip
    /// the block machinery and allocate directly.
    pub fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        kind: AllocationKind,
        dedicated_hint: bool,
    ) -> RgResult<Allocation> {
        let (memory_type_index, class) = self.find_memory_type(requirements.memory_type_bits, kind)?;

        if dedicated_hint {
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type_index);
            let memory = unsafe { self.device.allocate_memory(&alloc_info, None)? };
            let mapping = if matches!(class, MemoryClass::Host) {
                let ptr = unsafe {
                    self.device
                        .map_memory(memory, 0, requirements.size, vk::MemoryMapFlags::empty())?
                };
                Some(ptr as *mut u8)
            } else {
                None
            };
            return Ok(Allocation::Dedicated {
                memory,
                mapping,
                size: requirements.size,
            });
        }

        let blocks = self.blocks_mut(class);
        for (i, block) in blocks.iter_mut().enumerate() {
            if block.memory_type_index != memory_type_index {
                continue;
            }
            if let Some(offset) = block.try_split_and_claim(0, requirements.size, requirements.alignment.max(1)) {
                return Ok(Allocation::Block {
                    block_index: i,
                    class,
                    offset,
                    size: requirements.size,
                });
            }
        }

        // No existing block could satisfy it: grow.
        let mut block = self.new_block(memory_type_index, class, requirements.size)?;
        let offset = block
            .try_split_and_claim(0, requirements.size, requirements.alignment.max(1))
            .ok_or(RgError::OutOfDeviceMemory {
                size: requirements.size,
                alignment: requirements.alignment,
            })?;
        let blocks = self.blocks_mut(class);
        blocks.push(block);
        Ok(Allocation::Block {
            block_index: blocks.len() - 1,
            class,
            offset,
            size: requirements.size,
        })
    }

    /// Free a previously returned allocation.
    pub fn free(&mut self, allocation: Allocation) {
        match allocation {
            Allocation::Block { block_index, class, offset, size } => {
                let blocks = self.blocks_mut(class);
                blocks[block_index].free_at(offset, size);
            }
            Allocation::Dedicated { memory, .. } => unsafe {
                self.device.free_memory(memory, None);
            },
        }
    }

    /// Returns `block.mapping + offset` (in-block) or the dedicated
    /// mapping. Unmap is a no-op -- mappings are persistent.
    pub fn map(&self, allocation: &Allocation) -> Option<*mut u8> {
        match allocation {
            Allocation::Block { block_index, class, offset, .. } => {
                let blocks = match class {
                    MemoryClass::Host => &self.host_blocks,
                    MemoryClass::Device => &self.device_blocks,
                };
                blocks[*block_index].mapping.map(|p| unsafe { p.add(*offset as usize) })
            }
            Allocation::Dedicated { mapping, .. } => *mapping,
        }
    }

    /// The `VkDeviceMemory` and byte offset an allocation is bound at,
    /// for `vkBindBufferMemory`/`vkBindImageMemory`.
    pub fn bind_target(&self, allocation: &Allocation) -> (vk::DeviceMemory, vk::DeviceSize) {
        match allocation {
            Allocation::Block { block_index, class, offset, .. } => {
                let blocks = match class {
                    MemoryClass::Host => &self.host_blocks,
                    MemoryClass::Device => &self.device_blocks,
                };
                (blocks[*block_index].memory, *offset)
            }
            Allocation::Dedicated { memory, .. } => (*memory, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_block(size: vk::DeviceSize) -> MemoryBlock {
        let chunk_count = MAX_CHUNKS.min((2 * size - 1) as usize);
        let mut chunks = Vec::with_capacity(chunk_count);
        chunks.resize_with(chunk_count, || Chunk { used_bytes: 0, split: false });
        MemoryBlock {
            memory: vk::DeviceMemory::null(),
            size,
            memory_type_index: 0,
            class: MemoryClass::Device,
            mapping: None,
            chunks,
        }
    }

    #[test]
    fn buddy_two_halves() {
        let mut block = test_block(64);
        let a = block.try_split_and_claim(0, 32, 1).expect("first half");
        let b = block.try_split_and_claim(0, 32, 1).expect("second half");
        assert_ne!(a, b);
        assert!(block.try_split_and_claim(0, 1, 1).is_none());
        assert_eq!(block.root_used(), 64);

        block.free_at(a, 32);
        let c = block.try_split_and_claim(0, 32, 1).expect("reuse first half");
        assert_eq!(c, a);
        assert_eq!(block.root_used(), 64);
    }

    #[test]
    fn free_returns_block_to_pristine_state() {
        let mut block = test_block(64);
        let a = block.try_split_and_claim(0, 16, 1).unwrap();
        let b = block.try_split_and_claim(0, 16, 1).unwrap();
        let c = block.try_split_and_claim(0, 16, 1).unwrap();
        block.free_at(a, 16);
        block.free_at(b, 16);
        block.free_at(c, 16);
        assert_eq!(block.root_used(), 0);
        assert!(!block.any_split());
    }

    #[test]
    fn offsets_respect_alignment() {
        let mut block = test_block(256);
        let off = block.try_split_and_claim(0, 10, 16).unwrap();
        assert_eq!(off % 16, 0);
    }
}
