//! GPU buffers backed by the [`Allocator`](crate::rg::allocator::Allocator).

use ash::vk;
use bitflags::bitflags;

use crate::rg::allocator::{Allocation, AllocationKind, Allocator, MemoryClass};
use crate::rg::error::RgResult;

bitflags! {
    /// Subset of Vulkan buffer usages the RG layer exposes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        /// `VERTEX_BUFFER`
        const VERTEX = 1 << 0;
        /// `INDEX_BUFFER`
        const INDEX = 1 << 1;
        /// `UNIFORM_BUFFER`
        const UNIFORM = 1 << 2;
        /// `STORAGE_BUFFER`
        const STORAGE = 1 << 3;
        /// `TRANSFER_SRC`
        const TRANSFER_SRC = 1 << 4;
        /// `TRANSFER_DST`
        const TRANSFER_DST = 1 << 5;
    }
}

impl BufferUsage {
    fn to_vk(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if self.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(BufferUsage::TRANSFER_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(BufferUsage::TRANSFER_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        flags
    }
}

/// A Vulkan buffer plus its backing allocation.
pub struct Buffer {
    device: ash::Device,
    vk_buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
    memory_class: MemoryClass,
}

impl Buffer {
    /// Create a buffer of `size` bytes with `usage`, backed by `class`
    /// memory (`Host` for upload/readback, `Device` for device-local).
    pub fn new(
        device: ash::Device,
        allocator: &mut Allocator,
        size: vk::DeviceSize,
        usage: BufferUsage,
        class: MemoryClass,
    ) -> RgResult<Self> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let vk_buffer = unsafe { device.create_buffer(&create_info, None)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(vk_buffer) };
        let kind = match class {
            MemoryClass::Host => AllocationKind::Upload,
            MemoryClass::Device => AllocationKind::DeviceLocal,
        };
        // Dedicated allocation fast path for large buffers (>= 1/4 the
        // default block size).
        let dedicated = requirements.size >= (64 * 1024 * 1024) / 4;
        let allocation = allocator.allocate(requirements, kind, dedicated)?;

        let (memory, offset) = allocator.bind_target(&allocation);
        unsafe { device.bind_buffer_memory(vk_buffer, memory, offset)? };

        Ok(Self {
            device,
            vk_buffer,
            allocation: Some(allocation),
            size,
            usage,
            memory_class: class,
        })
    }

    /// Raw Vulkan handle.
    pub fn handle(&self) -> vk::Buffer {
        self.vk_buffer
    }

    /// Size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Declared usage flags.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Which memory pool backs this buffer.
    pub fn memory_class(&self) -> MemoryClass {
        self.memory_class
    }

    /// Persistent host mapping, if this is a host-visible buffer.
    pub fn map(&self, allocator: &Allocator) -> Option<*mut u8> {
        self.allocation.as_ref().and_then(|a| allocator.map(a))
    }

    /// Release the buffer's memory back to `allocator`. Must be called
    /// before drop if the allocation should be reclaimed by the buddy
    /// tree rather than leaked at `Drop` time (RG resources don't carry
    /// an `&mut Allocator` reference, so destruction is two-step: free
    /// then drop).
    pub fn destroy(mut self, allocator: &mut Allocator) {
        if let Some(allocation) = self.allocation.take() {
            allocator.free(allocation);
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.vk_buffer, None);
        }
        if self.allocation.is_some() {
            log::warn!("Buffer dropped without destroy(): allocation leaked in the device allocator");
        }
    }
}
