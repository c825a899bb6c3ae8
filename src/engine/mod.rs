//! Engine-level conveniences built on top of the RG layer: the bindless
//! resource model, its slot allocator, and per-frame staging.

pub mod bindless;
pub mod frame_pool;
pub mod slot_pool;

pub use bindless::{BindlessEngine, Handle, SLOTS_PER_ARRAY};
pub use frame_pool::FrameBufferPool;
pub use slot_pool::{SlotPool, INVALID_SLOT};
