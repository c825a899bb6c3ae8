//! The RG layer: a thin, explicit Vulkan abstraction over devices,
//! memory, resources, pipelines, and command recording.
//!
//! Every type here assumes single-threaded, cooperative ownership --
//! nothing in this module is `Sync`, and callers must serialize access
//! themselves.

pub mod allocator;
pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod hashmap;
pub mod image;
pub mod pipeline;
pub mod reflect;
pub mod render_pass;
pub mod swapchain;
pub mod upload;
pub mod window;

pub use allocator::{Allocation, AllocationKind, Allocator, MemoryClass};
pub use buffer::{Buffer, BufferUsage};
pub use commands::{CmdBuffer, CmdState};
pub use descriptor::{DescriptorSet, DescriptorSetLayout, DescriptorWrite, LayoutEntry, WritePayload};
pub use device::{Device, PhysicalLimits, Queues};
pub use error::{RgError, RgResult};
pub use image::{Extent3d, Image, ImageUsage, Sampler, SamplerDesc};
pub use pipeline::{parse_pragmas, ComputePipeline, GraphicsPipeline, GraphicsState, ShaderModule, VertexLayout};
pub use reflect::{combine, reflect, BindingKind, ReflectError, ReflectedModule, RgFormat, VertexAttribute};
pub use render_pass::{AttachmentTarget, RenderPass};
pub use swapchain::{PresentOutcome, Swapchain};
pub use window::{Window, WindowError};
