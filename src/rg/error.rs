//! Error types for the RG graphics layer.
//!
//! Construction failures are returned via `Result`/nullable handles;
//! the default handling for a raw `VkResult < 0` bubbling up from a
//! wrapped call is to log and propagate as [`RgError::Api`], which a
//! thin application layer may choose to treat as fatal.

use ash::vk;
use thiserror::Error;

/// Errors produced by the RG layer.
#[derive(Error, Debug)]
pub enum RgError {
    /// A Vulkan call returned a negative `VkResult`.
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// No memory type satisfies the requested properties.
    #[error("no suitable memory type for requirements {requirements:?} properties {properties:?}")]
    NoSuitableMemoryType {
        /// The `VkMemoryRequirements` that could not be satisfied.
        requirements: vk::MemoryRequirements,
        /// The desired `VkMemoryPropertyFlags`.
        properties: vk::MemoryPropertyFlags,
    },

    /// The buddy allocator could not satisfy a request from any existing
    /// or newly grown block.
    #[error("device allocator out of memory for {size} bytes (align {alignment})")]
    OutOfDeviceMemory {
        /// Requested allocation size in bytes.
        size: vk::DeviceSize,
        /// Requested alignment in bytes.
        alignment: vk::DeviceSize,
    },

    /// Vulkan instance/device/surface initialization failed.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// `vkAcquireNextImageKHR`/`vkQueuePresentKHR` reported the surface
    /// is out of date; internally recovered by a swapchain rebuild.
    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    /// A fence wait exceeded its timeout (1s on present).
    #[error("fence wait timed out")]
    FenceTimeout,

    /// A bindless slot pool has no free indices left to hand out.
    #[error("bindless slot pool exhausted for {resource}")]
    SlotPoolExhausted {
        /// Which array binding ran out (`"storage buffer"`, `"sampled image"`, `"sampler"`).
        resource: &'static str,
    },
}

impl From<vk::Result> for RgError {
    fn from(result: vk::Result) -> Self {
        RgError::Api(result)
    }
}

/// Result type used throughout the RG layer.
pub type RgResult<T> = Result<T, RgError>;
