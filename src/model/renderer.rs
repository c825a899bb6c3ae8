//! Drives the per-frame render pass over a [`ModelAsset`]: reset the
//! frame pools, stage one camera record, then pre-order-walk nodes
//! writing model/material uniforms and issuing draws.

use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix4;

use crate::model::asset::ModelAsset;
use crate::rg::commands::CmdBuffer;
use crate::rg::pipeline::GraphicsPipeline;
use crate::rg::render_pass::RenderPass;
use crate::engine::frame_pool::FrameBufferPool;

/// View+projection+eye-position uniform, staged once per frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    /// Combined view-projection matrix.
    pub view_projection: [[f32; 4]; 4],
    /// World-space eye position (w unused, padding).
    pub eye_position: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ModelUniform {
    transform: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MaterialUniform {
    base_color_factor: [f32; 4],
    emissive_factor: [f32; 4],
    metallic_roughness_normal_mapped: [f32; 4],
    image_slots: [u32; 6],
    sampler_slot: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawPushConstants {
    cam_buf: u32,
    cam_idx: u32,
    model_buf: u32,
    model_idx: u32,
    mat_buf: u32,
    mat_idx: u32,
}

fn to_cols(m: Matrix4<f32>) -> [[f32; 4]; 4] {
    let mut cols = [[0.0f32; 4]; 4];
    for c in 0..4 {
        for r in 0..4 {
            cols[c][r] = m[(r, c)];
        }
    }
    cols
}

/// Drives per-frame uniform staging and draw submission for
/// [`ModelAsset`]s.
pub struct ModelRenderer {
    camera_pool: FrameBufferPool,
    model_pool: FrameBufferPool,
    material_pool: FrameBufferPool,
    camera_buf_slot: u32,
    model_buf_slot: u32,
    mat_buf_slot: u32,
    global_brdf_slot: u32,
    camera_index: u64,
}

impl ModelRenderer {
    /// Wrap already-bindless-registered frame pools and the global BRDF
    /// LUT's slot index.
    pub fn new(
        camera_pool: FrameBufferPool,
        model_pool: FrameBufferPool,
        material_pool: FrameBufferPool,
        camera_buf_slot: u32,
        model_buf_slot: u32,
        mat_buf_slot: u32,
        global_brdf_slot: u32,
    ) -> Self {
        Self {
            camera_pool,
            model_pool,
            material_pool,
            camera_buf_slot,
            model_buf_slot,
            mat_buf_slot,
            global_brdf_slot,
            camera_index: 0,
        }
    }

    /// Reset all three frame pools and stage one camera record.
    pub fn begin_frame(&mut self, cam_uniform: CameraUniform) {
        self.camera_pool.reset();
        self.model_pool.reset();
        self.material_pool.reset();
        self.camera_index = self.camera_pool.allocate_item(bytemuck::bytes_of(&cam_uniform));
    }

    /// Render `model`'s node graph under `world_transform`, recording
    /// draws into `cmd`.
    pub fn render(
        &mut self,
        model: &ModelAsset,
        cmd: &mut CmdBuffer,
        pipeline: &mut GraphicsPipeline,
        render_pass: &RenderPass,
        global_set: ash::vk::DescriptorSet,
        world_transform: Matrix4<f32>,
    ) {
        cmd.bind_graphics_pipeline(pipeline, render_pass).expect("pipeline instance for active render pass");
        cmd.bind_descriptor_set(ash::vk::PipelineBindPoint::GRAPHICS, pipeline.layout(), 0, global_set);
        cmd.bind_vertex_buffer(model.vertex_buffer.handle(), 0);
        cmd.bind_index_buffer(model.index_buffer.handle(), 0, ash::vk::IndexType::UINT32);

        for &root in &model.root_node_indices {
            self.render_node(model, cmd, pipeline, root, world_transform);
        }
    }

    fn render_node(
        &mut self,
        model: &ModelAsset,
        cmd: &mut CmdBuffer,
        pipeline: &GraphicsPipeline,
        node_index: usize,
        world_transform: Matrix4<f32>,
    ) {
        let node = &model.nodes[node_index];
        let node_world = world_transform * node.resolved_local_matrix;

        if let Some(mesh_index) = node.mesh_index {
            for primitive in &model.meshes[mesh_index].primitives {
                let material = &model.materials[primitive.material_index];

                let model_uniform = ModelUniform { transform: to_cols(node_world) };
                let m_idx = self.model_pool.allocate_item(bytemuck::bytes_of(&model_uniform));

                let material_uniform = MaterialUniform {
                    base_color_factor: material.base_color_factor,
                    emissive_factor: [material.emissive_factor[0], material.emissive_factor[1], material.emissive_factor[2], 0.0],
                    metallic_roughness_normal_mapped: [
                        material.metallic_factor,
                        material.roughness_factor,
                        if primitive.is_normal_mapped { 1.0 } else { 0.0 },
                        0.0,
                    ],
                    image_slots: [
                        material.base_color_image.index,
                        material.metallic_roughness_image.index,
                        material.normal_image.index,
                        material.occlusion_image.index,
                        material.emissive_image.index,
                        self.global_brdf_slot,
                    ],
                    sampler_slot: material.sampler.index,
                    _pad: [0; 3],
                };
                let mt_idx = self.material_pool.allocate_item(bytemuck::bytes_of(&material_uniform));

                let push = DrawPushConstants {
                    cam_buf: self.camera_buf_slot,
                    cam_idx: self.camera_index as u32,
                    model_buf: self.model_buf_slot,
                    model_idx: m_idx as u32,
                    mat_buf: self.mat_buf_slot,
                    mat_idx: mt_idx as u32,
                };
                cmd.push_constants(pipeline.layout(), ash::vk::ShaderStageFlags::ALL, 0, bytemuck::bytes_of(&push));

                if primitive.has_indices {
                    cmd.draw_indexed(primitive.index_count, 1, primitive.first_index, 0, 0);
                } else {
                    cmd.draw(primitive.vertex_count, 1, 0, 0);
                }
            }
        }

        for &child in &node.children {
            self.render_node(model, cmd, pipeline, child, node_world);
        }
    }
}
