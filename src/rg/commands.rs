//! Command buffers and their `Ready -> Recording -> Pending -> Ready`
//! state machine, guarding each transition with a debug assertion so
//! misuse (recording twice, submitting unrecorded work) fails loudly
//! in debug builds instead of producing invalid command streams.

use ash::vk;

use crate::rg::error::{RgError, RgResult};
use crate::rg::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::rg::render_pass::RenderPass;
use crate::rg::swapchain::Swapchain;

/// Lifecycle state a [`CmdBuffer`] moves through once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdState {
    /// Not recording; safe to begin or to check/wait on its fence.
    Ready,
    /// Between `begin` and `end`.
    Recording,
    /// Submitted; waiting on its fence before reuse.
    Pending,
}

/// A command pool plus one buffer allocated from it, tracking its own
/// completion fence.
pub struct CmdBuffer {
    device: ash::Device,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    fence: vk::Fence,
    signal_semaphore: vk::Semaphore,
    state: CmdState,
    queue_family_index: u32,
    current_render_pass_hash: Option<u64>,
    pending_wait_semaphores: Vec<vk::Semaphore>,
    pending_wait_stages: Vec<vk::PipelineStageFlags>,
}

impl CmdBuffer {
    /// Allocate a command buffer from a freshly created pool on
    /// `queue_family_index`.
    pub fn new(device: ash::Device, queue_family_index: u32) -> RgResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        let pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = unsafe { device.allocate_command_buffers(&alloc_info)?[0] };

        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = unsafe { device.create_fence(&fence_info, None)? };

        let sem_info = vk::SemaphoreCreateInfo::builder();
        let signal_semaphore = unsafe { device.create_semaphore(&sem_info, None)? };

        Ok(Self {
            device,
            pool,
            buffer,
            fence,
            signal_semaphore,
            state: CmdState::Ready,
            queue_family_index,
            current_render_pass_hash: None,
            pending_wait_semaphores: Vec::new(),
            pending_wait_stages: Vec::new(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CmdState {
        self.state
    }

    /// Raw command buffer handle.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Queue family this buffer's pool was created against.
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// The semaphore this buffer signals on `submit`, for other
    /// buffers to chain off of via [`Self::wait_for_commands`].
    pub fn signal_semaphore(&self) -> vk::Semaphore {
        self.signal_semaphore
    }

    /// This buffer's completion fence, signalled alongside
    /// `signal_semaphore` on `submit`.
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Block on this buffer's fence, then reset pool+fence back to
    /// `Ready`. Must be called before `begin` if currently `Pending`.
    pub fn wait_and_reset(&mut self, timeout_ns: u64) -> RgResult<()> {
        if self.state != CmdState::Pending {
            return Ok(());
        }
        let fences = [self.fence];
        let result = unsafe { self.device.wait_for_fences(&fences, true, timeout_ns) };
        match result {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => return Err(RgError::FenceTimeout),
            Err(e) => return Err(e.into()),
        }
        unsafe {
            self.device.reset_fences(&fences)?;
            self.device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        self.state = CmdState::Ready;
        self.current_render_pass_hash = None;
        Ok(())
    }

    /// Queue the swapchain's current present-complete semaphore as a
    /// color-attachment-output wait for the next `submit`.
    pub fn wait_for_present(&mut self, swapchain: &Swapchain) {
        self.pending_wait_semaphores.push(swapchain.present_complete_semaphore());
        self.pending_wait_stages.push(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    /// Queue `other`'s signal semaphore as an all-commands wait for the
    /// next `submit`, chaining this buffer's work after `other`'s.
    pub fn wait_for_commands(&mut self, other: &CmdBuffer) {
        self.pending_wait_semaphores.push(other.signal_semaphore);
        self.pending_wait_stages.push(vk::PipelineStageFlags::ALL_COMMANDS);
    }

    /// Begin recording. Requires `Ready` state.
    pub fn begin(&mut self) -> RgResult<()> {
        debug_assert_eq!(self.state, CmdState::Ready, "begin() called while not Ready");
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.buffer, &begin_info)? };
        self.state = CmdState::Recording;
        Ok(())
    }

    /// Begin a render pass using its current framebuffer, with a
    /// `clear_values` entry per attachment in declaration order.
    pub fn set_render_pass(&mut self, render_pass: &RenderPass, clear_values: &[vk::ClearValue]) {
        debug_assert_eq!(self.state, CmdState::Recording);
        if self.current_render_pass_hash.is_some() {
            self.end_render_pass();
        }
        let (width, height) = render_pass.extent();
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.handle())
            .framebuffer(render_pass.current_framebuffer())
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width, height } })
            .clear_values(clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(self.buffer, &begin_info, vk::SubpassContents::INLINE);
            self.device.cmd_set_viewport(
                self.buffer,
                0,
                &[vk::Viewport { x: 0.0, y: 0.0, width: width as f32, height: height as f32, min_depth: 0.0, max_depth: 1.0 }],
            );
            self.device.cmd_set_scissor(
                self.buffer,
                0,
                &[vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width, height } }],
            );
        }
        self.current_render_pass_hash = Some(render_pass.hash());
    }

    /// End the active render pass.
    pub fn end_render_pass(&mut self) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe { self.device.cmd_end_render_pass(self.buffer) };
        self.current_render_pass_hash = None;
    }

    /// Bind a graphics pipeline's instance for the currently active
    /// render pass.
    pub fn bind_graphics_pipeline(&mut self, pipeline: &mut GraphicsPipeline, render_pass: &RenderPass) -> RgResult<()> {
        debug_assert_eq!(self.state, CmdState::Recording);
        let hash = self.current_render_pass_hash.expect("bind_graphics_pipeline requires an active render pass");
        debug_assert_eq!(hash, render_pass.hash());
        let instance = pipeline.instance_for(hash, render_pass.handle(), render_pass.color_attachment_count())?;
        unsafe { self.device.cmd_bind_pipeline(self.buffer, vk::PipelineBindPoint::GRAPHICS, instance) };
        Ok(())
    }

    /// Bind a compute pipeline.
    pub fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe { self.device.cmd_bind_pipeline(self.buffer, vk::PipelineBindPoint::COMPUTE, pipeline.handle()) };
    }

    /// Bind one descriptor set at `set_index`.
    pub fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe {
            self.device.cmd_bind_descriptor_sets(self.buffer, bind_point, layout, set_index, &[set], &[]);
        }
    }

    /// Bind a vertex buffer at binding 0.
    pub fn bind_vertex_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe { self.device.cmd_bind_vertex_buffers(self.buffer, 0, &[buffer], &[offset]) };
    }

    /// Bind an index buffer.
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe { self.device.cmd_bind_index_buffer(self.buffer, buffer, offset, index_type) };
    }

    /// Push constants visible to `stages`, starting at `offset`.
    pub fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe { self.device.cmd_push_constants(self.buffer, layout, stages, offset, data) };
    }

    /// Non-indexed draw.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe { self.device.cmd_draw(self.buffer, vertex_count, instance_count, first_vertex, first_instance) };
    }

    /// Indexed draw.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe {
            self.device.cmd_draw_indexed(self.buffer, index_count, instance_count, first_index, vertex_offset, first_instance);
        }
    }

    /// Compute dispatch.
    pub fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) {
        debug_assert_eq!(self.state, CmdState::Recording);
        unsafe { self.device.cmd_dispatch(self.buffer, group_x, group_y, group_z) };
    }

    /// Record a pipeline barrier transitioning `image` between layouts.
    pub fn image_barrier(
        &mut self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        debug_assert_eq!(self.state, CmdState::Recording);
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);
        unsafe {
            self.device.cmd_pipeline_barrier(self.buffer, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], &[], &[barrier.build()]);
        }
    }

    /// Finish recording. Requires `Recording` state.
    pub fn end(&mut self) -> RgResult<()> {
        debug_assert_eq!(self.state, CmdState::Recording, "end() called while not Recording");
        if self.current_render_pass_hash.is_some() {
            self.end_render_pass();
        }
        unsafe { self.device.end_command_buffer(self.buffer)? };
        self.state = CmdState::Ready;
        Ok(())
    }

    /// Submit to `queue`, consuming the wait semaphores/stages queued
    /// by [`Self::wait_for_present`]/[`Self::wait_for_commands`],
    /// signalling `self.signal_semaphore` and this buffer's own fence.
    /// Moves the buffer to `Pending`.
    pub fn submit(&mut self, queue: vk::Queue) -> RgResult<()> {
        debug_assert_ne!(self.state, CmdState::Recording, "submit() called while still Recording");
        debug_assert_ne!(self.state, CmdState::Pending, "submit() called while already Pending");
        let buffers = [self.buffer];
        let signal_semaphores = [self.signal_semaphore];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&self.pending_wait_semaphores)
            .wait_dst_stage_mask(&self.pending_wait_stages)
            .command_buffers(&buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe { self.device.queue_submit(queue, &[submit_info.build()], self.fence)? };
        self.pending_wait_semaphores.clear();
        self.pending_wait_stages.clear();
        self.state = CmdState::Pending;
        Ok(())
    }
}

impl Drop for CmdBuffer {
    fn drop(&mut self) {
        unsafe {
            // A pending submission must outlive this buffer's owner;
            // callers are expected to have drained it via
            // wait_and_reset before drop.
            if self.state == CmdState::Pending {
                log::warn!("CmdBuffer dropped while Pending: fence wait skipped");
            }
            self.device.destroy_semaphore(self.signal_semaphore, None);
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_are_distinct() {
        assert_ne!(CmdState::Ready, CmdState::Recording);
        assert_ne!(CmdState::Recording, CmdState::Pending);
        assert_ne!(CmdState::Pending, CmdState::Ready);
    }
}
