//! BRDF LUT baker: a one-off full-screen triangle render pass writing a
//! 2-channel floating-point image, sampled later by PBR shading via its
//! bindless slot.
//!
//! This is the only place in the crate that renders without a bound
//! vertex buffer, emitting the full-screen triangle from
//! `gl_VertexIndex` in the vertex shader instead.

use ash::vk;

use crate::rg::allocator::Allocator;
use crate::rg::commands::CmdBuffer;
use crate::rg::error::RgResult;
use crate::rg::image::{Extent3d, Image, ImageUsage};
use crate::rg::pipeline::{GraphicsPipeline, GraphicsState, VertexLayout};
use crate::rg::render_pass::{AttachmentTarget, RenderPass};

/// Format of the baked LUT: two 16-bit float channels (scale, bias).
pub const BRDF_LUT_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;

/// Bake a `resolution x resolution` BRDF LUT using `pipeline` (a
/// full-screen-triangle graphics pipeline with no vertex input, bound
/// to the BRDF shader pair), returning the resulting image.
pub fn bake(
    device: ash::Device,
    allocator: &mut Allocator,
    queue: vk::Queue,
    queue_family_index: u32,
    pipeline: &mut GraphicsPipeline,
    resolution: u32,
) -> RgResult<Image> {
    let image = Image::new(
        device.clone(),
        allocator,
        Extent3d { width: resolution, height: resolution, depth: 1 },
        BRDF_LUT_FORMAT,
        ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
        1,
        1,
        vk::SampleCountFlags::TYPE_1,
    )?;

    let target = AttachmentTarget { image: &image, is_swapchain_color: false };
    let render_pass = RenderPass::new(device.clone(), &[target], None, &[vec![image.view()]])?;

    let mut cmd = CmdBuffer::new(device.clone(), queue_family_index)?;
    cmd.begin()?;
    let clear_values = [vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 0.0] } }];
    cmd.set_render_pass(&render_pass, &clear_values);
    cmd.bind_graphics_pipeline(pipeline, &render_pass)?;
    cmd.draw(3, 1, 0, 0);
    cmd.end_render_pass();
    cmd.end()?;
    cmd.submit(queue)?;
    cmd.wait_and_reset(1_000_000_000)?;

    Ok(image)
}

/// Vertex-input-free pipeline state for the BRDF bake pass (no vertex
/// buffer is bound; the vertex shader derives its position from
/// `gl_VertexIndex`).
pub fn full_screen_triangle_layout() -> VertexLayout {
    VertexLayout { stride: 0, attributes: Vec::new() }
}

/// Graphics state for the bake pass: no depth test, no culling, no
/// blending -- it's a pure compute-like full-screen write.
pub fn bake_pipeline_state() -> GraphicsState {
    GraphicsState {
        blend_enable: false,
        depth_test: false,
        depth_write: false,
        depth_bias: false,
        cull_mode: crate::rg::pipeline::CullMode::None,
        ..GraphicsState::default()
    }
}
