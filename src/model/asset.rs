//! The model data model: a flat arena of nodes/meshes/materials with
//! pre-resolved local transforms.
//!
//! Nodes are stored as a flat, indexed arena rather than an owning
//! tree of boxed nodes, so traversal and validation can walk parent
//! and child links by plain index.

use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3};
use thiserror::Error;

use crate::engine::bindless::Handle;
use crate::rg::buffer::Buffer;
use crate::rg::image::{Image, Sampler};

/// Errors building or resolving a [`ModelAsset`].
#[derive(Debug, Error)]
pub enum ModelError {
    /// A node referenced a parent index outside the arena.
    #[error("node {node} references out-of-range parent {parent}")]
    BadParentIndex {
        /// The node doing the referencing.
        node: usize,
        /// The out-of-range parent index.
        parent: usize,
    },
    /// A primitive referenced a material index outside the arena.
    #[error("primitive references out-of-range material {material}")]
    BadMaterialIndex {
        /// The out-of-range material index.
        material: usize,
    },
    /// An image payload was neither PNG nor JPEG.
    #[error("unsupported image payload (only image/png and image/jpeg are accepted)")]
    UnsupportedImagePayload,
    /// An index accessor used a component type other than u8/u16/u32.
    #[error("unsupported index component type")]
    UnsupportedIndexComponentType,
}

/// Where a [`ModelAsset`] was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Built programmatically from raw mesh data.
    FromMesh,
    /// Parsed from a glTF/GLB byte buffer.
    FromGltf,
}

/// Translation/rotation/scale triplet plus an authored matrix, as
/// stored per glTF node.
#[derive(Debug, Clone, Copy)]
pub struct Trs {
    /// Node translation.
    pub translation: Vector3<f32>,
    /// Node rotation.
    pub rotation: UnitQuaternion<f32>,
    /// Node scale.
    pub scale: Vector3<f32>,
    /// The node's own authored matrix (identity unless the source
    /// asset embeds one directly instead of TRS).
    pub authored_matrix: Matrix4<f32>,
}

impl Default for Trs {
    fn default() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::from_quaternion(Quaternion::identity()),
            scale: Vector3::new(1.0, 1.0, 1.0),
            authored_matrix: Matrix4::identity(),
        }
    }
}

impl Trs {
    /// `translation × rotation × scale × authored_matrix`.
    pub fn resolve(&self) -> Matrix4<f32> {
        let t = Matrix4::new_translation(&self.translation);
        let r = self.rotation.to_homogeneous();
        let s = Matrix4::new_nonuniform_scaling(&self.scale);
        t * r * s * self.authored_matrix
    }
}

/// One node in a [`ModelAsset`]'s flat arena.
pub struct Node {
    /// Index of the parent node, if any.
    pub parent: Option<usize>,
    /// Indices of child nodes.
    pub children: Vec<usize>,
    /// The node's authored TRS.
    pub trs: Trs,
    /// `trs.resolve()`, cached at load time.
    pub resolved_local_matrix: Matrix4<f32>,
    /// Index into `ModelAsset::meshes`, if this node has geometry.
    pub mesh_index: Option<usize>,
}

/// One drawable span within a [`Mesh`].
#[derive(Debug, Clone, Copy)]
pub struct Primitive {
    /// First index (or vertex, if `!has_indices`) in the shared buffers.
    pub first_index: u32,
    /// Index count, if `has_indices`.
    pub index_count: u32,
    /// Vertex count, used when `!has_indices`.
    pub vertex_count: u32,
    /// Index into `ModelAsset::materials`.
    pub material_index: usize,
    /// Whether this primitive draws via `draw_indexed` or `draw`.
    pub has_indices: bool,
    /// Whether the material supplies a normal map.
    pub is_normal_mapped: bool,
}

/// A list of [`Primitive`]s sharing the model's vertex/index buffers.
pub struct Mesh {
    /// The mesh's primitives.
    pub primitives: Vec<Primitive>,
}

/// Material factors plus the five image + one sampler bindless handles.
pub struct Material {
    /// Base color factor (RGBA).
    pub base_color_factor: [f32; 4],
    /// Emissive factor (RGB).
    pub emissive_factor: [f32; 3],
    /// Metallic factor.
    pub metallic_factor: f32,
    /// Roughness factor.
    pub roughness_factor: f32,
    /// Base color image slot.
    pub base_color_image: Handle<Image>,
    /// Metallic-roughness image slot.
    pub metallic_roughness_image: Handle<Image>,
    /// Normal map image slot.
    pub normal_image: Handle<Image>,
    /// Occlusion image slot.
    pub occlusion_image: Handle<Image>,
    /// Emissive image slot.
    pub emissive_image: Handle<Image>,
    /// Shared sampler slot.
    pub sampler: Handle<Sampler>,
}

/// A flat arena of nodes/meshes/materials sharing one vertex and one
/// index buffer.
pub struct ModelAsset {
    /// All nodes, flat.
    pub nodes: Vec<Node>,
    /// Indices into `nodes` that have no parent.
    pub root_node_indices: Vec<usize>,
    /// All meshes, flat.
    pub meshes: Vec<Mesh>,
    /// All materials, flat.
    pub materials: Vec<Material>,
    /// The shared vertex buffer.
    pub vertex_buffer: Buffer,
    /// The shared index buffer.
    pub index_buffer: Buffer,
    /// Where this asset came from.
    pub origin: Origin,
}

impl ModelAsset {
    /// Walk `node`'s parent chain, composing local matrices root-first
    /// (i.e. `parent.world * node.local`).
    pub fn world_matrix(&self, node_index: usize) -> Matrix4<f32> {
        let mut chain = Vec::new();
        let mut current = Some(node_index);
        while let Some(idx) = current {
            chain.push(idx);
            current = self.nodes[idx].parent;
        }
        chain
            .iter()
            .rev()
            .fold(Matrix4::identity(), |acc, &idx| acc * self.nodes[idx].resolved_local_matrix)
    }

    /// Validate that every node's parent index and every primitive's
    /// material index is in range.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(p) = node.parent {
                if p >= self.nodes.len() {
                    return Err(ModelError::BadParentIndex { node: i, parent: p });
                }
            }
        }
        for mesh in &self.meshes {
            for prim in &mesh.primitives {
                if prim.material_index >= self.materials.len() {
                    return Err(ModelError::BadMaterialIndex { material: prim.material_index });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_trs_resolves_to_identity() {
        let trs = Trs::default();
        assert_relative_eq!(trs.resolve(), Matrix4::identity(), epsilon = 1e-6);
    }

    #[test]
    fn translation_then_scale_composition_order() {
        let mut trs = Trs::default();
        trs.translation = Vector3::new(1.0, 0.0, 0.0);
        trs.scale = Vector3::new(2.0, 2.0, 2.0);
        let resolved = trs.resolve();
        // translation * scale means a unit point at the origin scales
        // first, then translates -- (0,0,0) -> (0,0,0) -> (1,0,0).
        let p = resolved.transform_point(&nalgebra::Point3::origin());
        assert_relative_eq!(p, nalgebra::Point3::new(1.0, 0.0, 0.0), epsilon = 1e-6);
    }
}
