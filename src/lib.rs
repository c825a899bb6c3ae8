//! `rg_core`: a thin, explicit Vulkan graphics abstraction (the RG
//! layer), a bindless global-descriptor resource manager, and a PBR
//! model renderer built on top of it.
//!
//! All core types assume single-threaded, cooperative ownership --
//! nothing here is `Sync`, and callers must serialize access
//! themselves.

pub mod brdf;
pub mod config;
pub mod engine;
pub mod events;
pub mod model;
pub mod rg;

/// Re-exports of the most commonly used types, mirroring the flat
/// import surface applications reach for.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{BindlessEngine, FrameBufferPool, Handle, SlotPool};
    pub use crate::events::{Event, EventQueue};
    pub use crate::model::{ModelAsset, ModelRenderer};
    pub use crate::rg::{
        Buffer, BufferUsage, CmdBuffer, Device, DescriptorSetLayout, GraphicsPipeline, Image, ImageUsage,
        RenderPass, RgError, RgResult, Sampler, Swapchain, Window,
    };
}
