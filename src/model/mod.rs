//! Model data and the frame-pool-driven renderer that walks it.

pub mod asset;
pub mod renderer;

pub use asset::{Material, Mesh, ModelAsset, ModelError, Node, Origin, Primitive, Trs};
pub use renderer::{CameraUniform, ModelRenderer};
