//! Render passes, and the FNV-1a hash that identifies pipeline-compatible
//! render passes.

use ash::vk;

use crate::rg::error::RgResult;
use crate::rg::image::Image;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// FNV-1a over an arbitrary byte slice.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn fnv1a_fold(acc: u64, bytes: &[u8]) -> u64 {
    let mut hash = acc;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// One colour or depth-stencil attachment target.
pub struct AttachmentTarget<'a> {
    /// The image the attachment renders into.
    pub image: &'a Image,
    /// Whether this is the swapchain's own colour attachment (changes
    /// the final layout to `PRESENT_SRC_KHR`).
    pub is_swapchain_color: bool,
}

/// A Vulkan render pass with one subpass, its pre-created framebuffer(s),
/// and its stable compatibility [`hash`](RenderPass::hash).
pub struct RenderPass {
    device: ash::Device,
    vk_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    current_framebuffer_index: usize,
    color_attachment_count: u32,
    width: u32,
    height: u32,
    hash: u64,
}

impl RenderPass {
    /// Build a render pass from resolved colour attachments and an
    /// optional depth-stencil attachment. `framebuffer_views` supplies
    /// one set of views per framebuffer to pre-create (swapchain render
    /// passes pass one set per swapchain image).
    pub fn new(
        device: ash::Device,
        colors: &[AttachmentTarget],
        depth: Option<&AttachmentTarget>,
        framebuffer_views: &[Vec<vk::ImageView>],
    ) -> RgResult<Self> {
        let width = colors.first().map(|c| c.image.extent().width).unwrap_or(0);
        let height = colors.first().map(|c| c.image.extent().height).unwrap_or(0);
        for c in colors {
            assert_eq!(c.image.extent().width, width);
            assert_eq!(c.image.extent().height, height);
        }
        if let Some(d) = depth {
            assert_eq!(d.image.extent().width, width);
            assert_eq!(d.image.extent().height, height);
        }

        let color_descs: Vec<(vk::Format, bool)> = colors.iter().map(|c| (c.image.format(), c.is_swapchain_color)).collect();
        let depth_format = depth.map(|d| d.image.format());
        Self::build(device, &color_descs, depth_format, width, height, framebuffer_views)
    }

    /// Build a render pass whose colour attachment is the swapchain's
    /// own presentable image (identified by format alone, since
    /// swapchain images are owned by the presentation engine rather
    /// than an [`Image`]).
    pub fn for_swapchain(
        device: ash::Device,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
        width: u32,
        height: u32,
        framebuffer_views: &[Vec<vk::ImageView>],
    ) -> RgResult<Self> {
        Self::build(device, &[(color_format, true)], depth_format, width, height, framebuffer_views)
    }

    fn build(
        device: ash::Device,
        color_descs: &[(vk::Format, bool)],
        depth_format: Option<vk::Format>,
        width: u32,
        height: u32,
        framebuffer_views: &[Vec<vk::ImageView>],
    ) -> RgResult<Self> {
        assert!(!framebuffer_views.is_empty());

        let mut attachments: Vec<vk::AttachmentDescription> = Vec::new();
        let mut color_refs: Vec<vk::AttachmentReference> = Vec::new();

        for &(format, is_swapchain_color) in color_descs {
            let final_layout = if is_swapchain_color {
                vk::ImageLayout::PRESENT_SRC_KHR
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            };
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(final_layout)
                    .build(),
            );
            color_refs.push(
                vk::AttachmentReference::builder()
                    .attachment((attachments.len() - 1) as u32)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .build(),
            );
        }

        let depth_ref = depth_format.map(|format| {
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            vk::AttachmentReference::builder()
                .attachment((attachments.len() - 1) as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build()
        });

        let mut subpass_builder = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(ref d) = depth_ref {
            subpass_builder = subpass_builder.depth_stencil_attachment(d);
        }
        let subpass = subpass_builder.build();
        let subpasses = [subpass];

        let dependencies = [
            vk::SubpassDependency::builder()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .src_access_mask(vk::AccessFlags::MEMORY_READ)
                .dst_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                )
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION)
                .build(),
            vk::SubpassDependency::builder()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dst_stage_mask(vk::PipelineStageFlags::TOP_OF_PIPE)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION)
                .build(),
        ];

        let hash = Self::compute_hash(&attachments, subpass, &color_refs, depth_ref.as_ref(), &dependencies);

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let vk_pass = unsafe { device.create_render_pass(&create_info, None)? };

        let mut framebuffers = Vec::with_capacity(framebuffer_views.len());
        for views in framebuffer_views {
            let fb_info = vk::FramebufferCreateInfo::builder()
                .render_pass(vk_pass)
                .attachments(views)
                .width(width)
                .height(height)
                .layers(1);
            framebuffers.push(unsafe { device.create_framebuffer(&fb_info, None)? });
        }

        Ok(Self {
            device,
            vk_pass,
            framebuffers,
            current_framebuffer_index: 0,
            color_attachment_count: color_descs.len() as u32,
            width,
            height,
            hash,
        })
    }

    fn compute_hash(
        attachments: &[vk::AttachmentDescription],
        subpass: vk::SubpassDescription,
        color_refs: &[vk::AttachmentReference],
        depth_ref: Option<&vk::AttachmentReference>,
        dependencies: &[vk::SubpassDependency],
    ) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        for a in attachments {
            hash = fnv1a_fold(hash, bytemuck::bytes_of(&AttachmentBits::from(*a)));
        }
        hash = fnv1a_fold(
            hash,
            &[
                subpass.flags.as_raw() as u8,
                subpass.pipeline_bind_point.as_raw() as u8,
            ],
        );
        for r in color_refs {
            hash = fnv1a_fold(hash, bytemuck::bytes_of(&RefBits::from(*r)));
        }
        if let Some(d) = depth_ref {
            hash = fnv1a_fold(hash, bytemuck::bytes_of(&RefBits::from(*d)));
        }
        for d in dependencies {
            hash = fnv1a_fold(hash, bytemuck::bytes_of(&DependencyBits::from(*d)));
        }
        hash
    }

    /// The stable compatibility hash: two render passes with identical
    /// attachment/subpass/dependency descriptions hash equal and are
    /// pipeline-compatible.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Raw render pass handle.
    pub fn handle(&self) -> vk::RenderPass {
        self.vk_pass
    }

    /// Number of colour attachments (drives blend-attachment count in
    /// pipeline creation).
    pub fn color_attachment_count(&self) -> u32 {
        self.color_attachment_count
    }

    /// `(width, height)` of every attachment.
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The framebuffer for the current (or only) framebuffer index.
    pub fn current_framebuffer(&self) -> vk::Framebuffer {
        self.framebuffers[self.current_framebuffer_index]
    }

    /// Advance to framebuffer `index` (called on swapchain acquire).
    pub fn set_current_framebuffer(&mut self, index: usize) {
        self.current_framebuffer_index = index;
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            for fb in &self.framebuffers {
                self.device.destroy_framebuffer(*fb, None);
            }
            self.device.destroy_render_pass(self.vk_pass, None);
        }
    }
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct AttachmentBits {
    format: i32,
    samples: u32,
    load_op: i32,
    store_op: i32,
    stencil_load_op: i32,
    stencil_store_op: i32,
    initial_layout: i32,
    final_layout: i32,
}

impl From<vk::AttachmentDescription> for AttachmentBits {
    fn from(a: vk::AttachmentDescription) -> Self {
        Self {
            format: a.format.as_raw(),
            samples: a.samples.as_raw(),
            load_op: a.load_op.as_raw(),
            store_op: a.store_op.as_raw(),
            stencil_load_op: a.stencil_load_op.as_raw(),
            stencil_store_op: a.stencil_store_op.as_raw(),
            initial_layout: a.initial_layout.as_raw(),
            final_layout: a.final_layout.as_raw(),
        }
    }
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct RefBits {
    attachment: u32,
    layout: i32,
}

impl From<vk::AttachmentReference> for RefBits {
    fn from(r: vk::AttachmentReference) -> Self {
        Self { attachment: r.attachment, layout: r.layout.as_raw() }
    }
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct DependencyBits {
    src_subpass: u32,
    dst_subpass: u32,
    src_stage_mask: u32,
    dst_stage_mask: u32,
    src_access_mask: u32,
    dst_access_mask: u32,
    dependency_flags: u32,
}

impl From<vk::SubpassDependency> for DependencyBits {
    fn from(d: vk::SubpassDependency) -> Self {
        Self {
            src_subpass: d.src_subpass,
            dst_subpass: d.dst_subpass,
            src_stage_mask: d.src_stage_mask.as_raw(),
            dst_stage_mask: d.dst_stage_mask.as_raw(),
            src_access_mask: d.src_access_mask.as_raw(),
            dst_access_mask: d.dst_access_mask.as_raw(),
            dependency_flags: d.dependency_flags.as_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_descriptions_hash_equal() {
        let a = AttachmentBits {
            format: vk::Format::B8G8R8A8_UNORM.as_raw(),
            samples: vk::SampleCountFlags::TYPE_1.as_raw(),
            load_op: vk::AttachmentLoadOp::CLEAR.as_raw(),
            store_op: vk::AttachmentStoreOp::STORE.as_raw(),
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE.as_raw(),
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE.as_raw(),
            initial_layout: vk::ImageLayout::UNDEFINED.as_raw(),
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR.as_raw(),
        };
        let b = a;
        let h1 = fnv1a(bytemuck::bytes_of(&a));
        let h2 = fnv1a(bytemuck::bytes_of(&b));
        assert_eq!(h1, h2);
    }

    #[test]
    fn fnv1a_empty_sentinel_never_hit_by_nonempty_input() {
        assert_ne!(fnv1a(b"x"), 0);
        assert_ne!(fnv1a(b""), 0); // offset basis itself is non-zero
    }
}
