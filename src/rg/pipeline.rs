//! Graphics/compute pipelines, their state-only description, and the
//! per-render-pass instance cache.
//!
//! A pipeline's state is declared once and instantiated lazily per
//! render pass it's used against, keyed by the render pass's
//! compatibility hash; a `#pragma` directive scanner lets shader
//! source carry its own state defaults inline.

use std::ffi::CString;

use ash::vk;

use crate::rg::error::RgResult;
use crate::rg::hashmap::HashMap as RgHashMap;
use crate::rg::reflect::{RgFormat, VertexAttribute};

/// A compiled SPIR-V module.
pub struct ShaderModule {
    device: ash::Device,
    vk_module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V words.
    pub fn from_words(device: ash::Device, words: &[u32]) -> RgResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let vk_module = unsafe { device.create_shader_module(&create_info, None)? };
        Ok(Self { device, vk_module })
    }

    /// Raw handle.
    pub fn handle(&self) -> vk::ShaderModule {
        self.vk_module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vk_module, None);
        }
    }
}

/// Topology options recognised by the `#pragma topology` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// `triangle_list`
    TriangleList,
    /// `line_list`
    LineList,
}

impl Topology {
    fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        }
    }
}

/// `#pragma polygon_mode` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    /// `fill`
    Fill,
    /// `line`
    Line,
    /// `point`
    Point,
}

impl PolygonMode {
    fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
            PolygonMode::Point => vk::PolygonMode::POINT,
        }
    }
}

/// `#pragma cull_mode` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    /// `none`
    None,
    /// `front`
    Front,
    /// `back`
    Back,
    /// `front_and_back`
    FrontAndBack,
}

impl CullMode {
    fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
            CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
        }
    }
}

/// `#pragma front_face` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    /// `clockwise`
    Clockwise,
    /// `counter_clockwise`
    CounterClockwise,
}

impl FrontFace {
    fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

/// `#pragma depth_compare_op` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `never`
    Never,
    /// `less`
    Less,
    /// `equal`
    Equal,
    /// `less_or_equal`
    LessOrEqual,
    /// `greater`
    Greater,
    /// `not_equal`
    NotEqual,
    /// `greater_or_equal`
    GreaterOrEqual,
    /// `always`
    Always,
}

impl CompareOp {
    fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// The state a `#pragma`-scanned HLSL shader can configure, with the
/// reverse-Z defaults (`GREATER` compare, `depth_write = true`).
#[derive(Debug, Clone, Copy)]
pub struct GraphicsState {
    /// Whether alpha blending is enabled.
    pub blend_enable: bool,
    /// Whether depth testing is enabled.
    pub depth_test: bool,
    /// Whether depth writes are enabled.
    pub depth_write: bool,
    /// Whether a depth bias is applied (the bias value itself is set
    /// dynamically, not baked into the pipeline).
    pub depth_bias: bool,
    /// The depth comparison function.
    pub depth_compare_op: CompareOp,
    /// Primitive topology.
    pub topology: Topology,
    /// Rasterizer polygon mode.
    pub polygon_mode: PolygonMode,
    /// Face-culling mode.
    pub cull_mode: CullMode,
    /// Winding order treated as front-facing.
    pub front_face: FrontFace,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            blend_enable: false,
            depth_test: true,
            depth_write: true,
            depth_bias: false,
            depth_compare_op: CompareOp::Greater,
            topology: Topology::TriangleList,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
        }
    }
}

/// Scan HLSL source for `#pragma <key> <value>` lines and apply them to
/// a default [`GraphicsState`]. Unknown keys or invalid values are
/// logged as a diagnostic and skipped -- they never abort compilation.
pub fn parse_pragmas(source: &str) -> GraphicsState {
    let mut state = GraphicsState::default();
    for line in source.lines() {
        let line = line.trim();
        if !line.starts_with("#pragma") {
            continue;
        }
        let rest = line["#pragma".len()..].trim();
        let mut parts = rest.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        apply_pragma(&mut state, key, value);
    }
    state
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn apply_pragma(state: &mut GraphicsState, key: &str, value: &str) {
    match key {
        "blend" => match parse_bool(value) {
            Some(v) => state.blend_enable = v,
            None => log::warn!("#pragma blend: invalid value {value:?}"),
        },
        "depth_test" => match parse_bool(value) {
            Some(v) => state.depth_test = v,
            None => log::warn!("#pragma depth_test: invalid value {value:?}"),
        },
        "depth_write" => match parse_bool(value) {
            Some(v) => state.depth_write = v,
            None => log::warn!("#pragma depth_write: invalid value {value:?}"),
        },
        "depth_bias" => match parse_bool(value) {
            Some(v) => state.depth_bias = v,
            None => log::warn!("#pragma depth_bias: invalid value {value:?}"),
        },
        "depth_compare_op" => {
            let op = match value {
                "never" => Some(CompareOp::Never),
                "less" => Some(CompareOp::Less),
                "equal" => Some(CompareOp::Equal),
                "less_or_equal" => Some(CompareOp::LessOrEqual),
                "greater" => Some(CompareOp::Greater),
                "not_equal" => Some(CompareOp::NotEqual),
                "greater_or_equal" => Some(CompareOp::GreaterOrEqual),
                "always" => Some(CompareOp::Always),
                _ => None,
            };
            match op {
                Some(op) => state.depth_compare_op = op,
                None => log::warn!("#pragma depth_compare_op: invalid value {value:?}"),
            }
        }
        "topology" => {
            let t = match value {
                "triangle_list" => Some(Topology::TriangleList),
                "line_list" => Some(Topology::LineList),
                _ => None,
            };
            match t {
                Some(t) => state.topology = t,
                None => log::warn!("#pragma topology: invalid value {value:?}"),
            }
        }
        "polygon_mode" => {
            let m = match value {
                "fill" => Some(PolygonMode::Fill),
                "line" => Some(PolygonMode::Line),
                "point" => Some(PolygonMode::Point),
                _ => None,
            };
            match m {
                Some(m) => state.polygon_mode = m,
                None => log::warn!("#pragma polygon_mode: invalid value {value:?}"),
            }
        }
        "cull_mode" => {
            let m = match value {
                "none" => Some(CullMode::None),
                "front" => Some(CullMode::Front),
                "back" => Some(CullMode::Back),
                "front_and_back" => Some(CullMode::FrontAndBack),
                _ => None,
            };
            match m {
                Some(m) => state.cull_mode = m,
                None => log::warn!("#pragma cull_mode: invalid value {value:?}"),
            }
        }
        "front_face" => {
            let f = match value {
                "clockwise" => Some(FrontFace::Clockwise),
                "counter_clockwise" => Some(FrontFace::CounterClockwise),
                _ => None,
            };
            match f {
                Some(f) => state.front_face = f,
                None => log::warn!("#pragma front_face: invalid value {value:?}"),
            }
        }
        other => log::warn!("unrecognized #pragma key {other:?}"),
    }
}

/// Vertex-input layout: stride plus attribute format/offset pairs, in
/// location order.
#[derive(Debug, Clone)]
pub struct VertexLayout {
    /// Byte stride of one vertex.
    pub stride: u32,
    /// `(location, attribute)` pairs.
    pub attributes: Vec<(u32, VertexAttribute)>,
}

/// A graphics pipeline's state-only description (render-pass
/// independent); concrete `VkPipeline`s are materialized per
/// render-pass hash on first `bind`.
pub struct GraphicsPipeline {
    device: ash::Device,
    vertex_shader: ShaderModule,
    fragment_shader: ShaderModule,
    vertex_entry: CString,
    fragment_entry: CString,
    vertex_layout: VertexLayout,
    state: GraphicsState,
    layout: vk::PipelineLayout,
    instances: RgHashMap<vk::Pipeline>,
}

impl GraphicsPipeline {
    /// Create a pipeline description. Shader modules are created
    /// immediately; no `VkPipeline` exists until the first `bind`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: ash::Device,
        vertex_words: &[u32],
        fragment_words: &[u32],
        vertex_layout: VertexLayout,
        state: GraphicsState,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RgResult<Self> {
        let vertex_shader = ShaderModule::from_words(device.clone(), vertex_words)?;
        let fragment_shader = ShaderModule::from_words(device.clone(), fragment_words)?;

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

        Ok(Self {
            device,
            vertex_shader,
            fragment_shader,
            vertex_entry: CString::new("vertex").unwrap(),
            fragment_entry: CString::new("pixel").unwrap(),
            vertex_layout,
            state,
            layout,
            instances: RgHashMap::with_capacity(4),
        })
    }

    /// The pipeline layout, shared by every render-pass instance.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    fn blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let write_mask = vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A;
        if self.state.blend_enable {
            vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(write_mask)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(false)
                .color_write_mask(write_mask)
                .build()
        }
    }

    fn build_instance(&self, render_pass: vk::RenderPass, color_attachment_count: u32) -> RgResult<vk::Pipeline> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vertex_shader.handle())
                .name(&self.vertex_entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.fragment_shader.handle())
                .name(&self.fragment_entry)
                .build(),
        ];

        let attribute_descs: Vec<vk::VertexInputAttributeDescription> = self
            .vertex_layout
            .attributes
            .iter()
            .map(|(location, attr)| vk::VertexInputAttributeDescription {
                location: *location,
                binding: 0,
                format: attr.format.to_vk(),
                offset: attr.offset,
            })
            .collect();
        let binding_descs = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.vertex_layout.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descs)
            .vertex_attribute_descriptions(&attribute_descs);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.state.topology.to_vk())
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(self.state.polygon_mode.to_vk())
            .cull_mode(self.state.cull_mode.to_vk())
            .front_face(self.state.front_face.to_vk())
            .line_width(1.0)
            .depth_bias_enable(self.state.depth_bias);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.state.depth_test)
            .depth_write_enable(self.state.depth_write)
            .depth_compare_op(self.state.depth_compare_op.to_vk());

        let blend_attachments = vec![self.blend_attachment(); color_attachment_count.max(1) as usize];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        if self.state.depth_bias {
            dynamic_states.push(vk::DynamicState::DEPTH_BIAS);
        }
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .map_err(|(_, e)| e)?
        };
        Ok(pipelines[0])
    }

    /// Resolve (building on first use) the `VkPipeline` instance
    /// compatible with `render_pass`, keyed by its hash.
    pub fn instance_for(&mut self, render_pass_hash: u64, render_pass: vk::RenderPass, color_attachment_count: u32) -> RgResult<vk::Pipeline> {
        if let Some(existing) = self.instances.get(render_pass_hash) {
            return Ok(*existing);
        }
        let pipeline = self.build_instance(render_pass, color_attachment_count)?;
        self.instances.insert(render_pass_hash, pipeline);
        Ok(pipeline)
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            for instance in self.instances.values() {
                self.device.destroy_pipeline(*instance, None);
            }
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// A compute pipeline: one shader module, one layout, one materialized
/// `VkPipeline` (no per-render-pass variants since compute dispatches
/// don't target a render pass).
pub struct ComputePipeline {
    device: ash::Device,
    shader: ShaderModule,
    layout: vk::PipelineLayout,
    vk_pipeline: vk::Pipeline,
}

impl ComputePipeline {
    /// Create and immediately materialize a compute pipeline.
    pub fn new(
        device: ash::Device,
        words: &[u32],
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RgResult<Self> {
        let shader = ShaderModule::from_words(device.clone(), words)?;
        let entry = CString::new("main").unwrap();

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(&entry)
            .build();
        let create_info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout);
        let pipelines = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .map_err(|(_, e)| e)?
        };

        Ok(Self { device, shader, layout, vk_pipeline: pipelines[0] })
    }

    /// Pipeline layout.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// The single materialized pipeline.
    pub fn handle(&self) -> vk::Pipeline {
        self.vk_pipeline
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.vk_pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pragma_scan_applies_recognized_keys() {
        let src = "\
            #pragma blend true\n\
            #pragma topology line_list\n\
            #pragma cull_mode none\n\
            #pragma depth_compare_op always\n\
            #pragma nonsense wat\n";
        let state = parse_pragmas(src);
        assert!(state.blend_enable);
        assert_eq!(state.topology, Topology::LineList);
        assert_eq!(state.cull_mode, CullMode::None);
        assert_eq!(state.depth_compare_op, CompareOp::Always);
    }

    #[test]
    fn pragma_scan_ignores_invalid_value_without_aborting() {
        let src = "#pragma blend maybe\n#pragma topology triangle_list\n";
        let state = parse_pragmas(src);
        assert!(!state.blend_enable); // default, invalid value was rejected
        assert_eq!(state.topology, Topology::TriangleList);
    }

    #[test]
    fn reverse_z_defaults() {
        let state = GraphicsState::default();
        assert_eq!(state.depth_compare_op, CompareOp::Greater);
        assert!(state.depth_write);
    }
}
