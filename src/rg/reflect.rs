//! SPIR-V reflection: a single-pass decoder that recovers descriptor-set
//! binding kinds and vertex-input layout from a compiled shader module.

use std::collections::HashMap as StdHashMap;

use ash::vk;
use thiserror::Error;

const SPIRV_MAGIC: u32 = 0x0723_0203;

const OP_TYPE_VOID: u16 = 19;
const OP_TYPE_BOOL: u16 = 20;
const OP_TYPE_INT: u16 = 21;
const OP_TYPE_FLOAT: u16 = 22;
const OP_TYPE_VECTOR: u16 = 23;
const OP_TYPE_IMAGE: u16 = 25;
const OP_TYPE_SAMPLER: u16 = 26;
const OP_TYPE_SAMPLED_IMAGE: u16 = 27;
const OP_TYPE_STRUCT: u16 = 30;
const OP_TYPE_POINTER: u16 = 32;
const OP_VARIABLE: u16 = 59;
const OP_DECORATE: u16 = 71;

const DECORATION_BUILT_IN: u32 = 11;
const DECORATION_LOCATION: u32 = 30;
const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;
const DECORATION_BUFFER_BLOCK: u32 = 3;

const STORAGE_CLASS_UNIFORM_CONSTANT: u32 = 0;
const STORAGE_CLASS_INPUT: u32 = 1;
const STORAGE_CLASS_UNIFORM: u32 = 2;
const STORAGE_CLASS_STORAGE_BUFFER: u32 = 12;

/// Errors raised while decoding a SPIR-V module.
#[derive(Error, Debug)]
pub enum ReflectError {
    /// The word stream didn't open with the SPIR-V magic number.
    #[error("not a valid SPIR-V module")]
    BadMagic,
    /// A vertex input's type couldn't be mapped to an [`RgFormat`].
    #[error("unsupported vertex input type at location {location}")]
    UnsupportedVertexInput {
        /// The `Location` decoration of the offending input.
        location: u32,
    },
    /// Two reflected modules disagree about a shared (set, binding).
    #[error("binding ({set}, {binding}) kind mismatch between shader stages")]
    BindingKindMismatch {
        /// Descriptor set index.
        set: u32,
        /// Binding index within the set.
        binding: u32,
    },
}

type ReflectResult<T> = Result<T, ReflectError>;

/// A Vulkan format selected for a vertex attribute, named by its
/// `(vector_width, element_type)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgFormat {
    /// `R32_SFLOAT`
    R32Sfloat,
    /// `R32G32_SFLOAT`
    Rg32Sfloat,
    /// `R32G32B32_SFLOAT`
    Rgb32Sfloat,
    /// `R32G32B32A32_SFLOAT`
    Rgba32Sfloat,
    /// `R32_UINT`
    R32Uint,
}

impl RgFormat {
    /// Byte size of one value of this format.
    pub fn byte_size(self) -> u32 {
        match self {
            RgFormat::R32Sfloat | RgFormat::R32Uint => 4,
            RgFormat::Rg32Sfloat => 8,
            RgFormat::Rgb32Sfloat => 12,
            RgFormat::Rgba32Sfloat => 16,
        }
    }

    /// The corresponding `ash::vk::Format`.
    pub fn to_vk(self) -> vk::Format {
        match self {
            RgFormat::R32Sfloat => vk::Format::R32_SFLOAT,
            RgFormat::Rg32Sfloat => vk::Format::R32G32_SFLOAT,
            RgFormat::Rgb32Sfloat => vk::Format::R32G32B32_SFLOAT,
            RgFormat::Rgba32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
            RgFormat::R32Uint => vk::Format::R32_UINT,
        }
    }

    fn from_vector(width: u32, is_float: bool, signed: bool) -> Option<Self> {
        match (width, is_float, signed) {
            (1, true, _) => Some(RgFormat::R32Sfloat),
            (2, true, _) => Some(RgFormat::Rg32Sfloat),
            (3, true, _) => Some(RgFormat::Rgb32Sfloat),
            (4, true, _) => Some(RgFormat::Rgba32Sfloat),
            (1, false, false) => Some(RgFormat::R32Uint),
            _ => None,
        }
    }
}

/// A resolved vertex input attribute.
#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    /// The attribute's Vulkan format.
    pub format: RgFormat,
    /// Byte offset within the vertex, assigned by folding over attributes
    /// in ascending location order.
    pub offset: u32,
}

/// Kind of a reflected descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// `OpTypeImage` behind `UniformConstant`.
    SampledImage,
    /// `OpTypeSampler`.
    Sampler,
    /// `OpTypeSampledImage` (combined image+sampler).
    CombinedImageSampler,
    /// `OpTypeStruct` decorated `BufferBlock`, under `StorageBuffer`.
    StorageBuffer {
        /// Whether the layout should bind this dynamically.
        dynamic: bool,
    },
    /// `OpTypeStruct` under `Uniform` (no `BufferBlock`).
    UniformBuffer {
        /// Whether the layout should bind this dynamically.
        dynamic: bool,
    },
}

impl BindingKind {
    /// The equivalent `VkDescriptorType`.
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            BindingKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            BindingKind::Sampler => vk::DescriptorType::SAMPLER,
            BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingKind::StorageBuffer { dynamic: false } => vk::DescriptorType::STORAGE_BUFFER,
            BindingKind::StorageBuffer { dynamic: true } => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            BindingKind::UniformBuffer { dynamic: false } => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::UniformBuffer { dynamic: true } => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        }
    }
}

/// Reflection output for one shader module (or the merge of a
/// vertex+fragment pair).
#[derive(Debug, Default)]
pub struct ReflectedModule {
    /// `(set, binding) -> kind`.
    pub bindings: StdHashMap<(u32, u32), BindingKind>,
    /// Byte stride of one vertex, the sum of all attribute sizes.
    pub vertex_stride: u32,
    /// `location -> attribute`.
    pub vertex_attributes: StdHashMap<u32, VertexAttribute>,
}

#[derive(Default, Clone)]
struct IdInfo {
    opcode: u16,
    subtype: u32,
    storage_class: Option<u32>,
    vector_width: u32,
    element_type: u32,
    type_size: u32,
    is_float: bool,
    signed: bool,
    has_buffer_block: bool,
    is_builtin: bool,
    location: Option<u32>,
    descriptor_set: Option<u32>,
    binding: Option<u32>,
}

/// Decode a SPIR-V word stream (`words[0]` must be the magic number).
/// `dynamic_buffers` controls whether storage/uniform buffer bindings
/// are reflected as the `*_DYNAMIC` descriptor types.
pub fn reflect(words: &[u32], is_vertex_stage: bool, dynamic_buffers: bool) -> ReflectResult<ReflectedModule> {
    if words.is_empty() || words[0] != SPIRV_MAGIC {
        return Err(ReflectError::BadMagic);
    }
    let id_bound = words[3] as usize;
    let mut ids: Vec<IdInfo> = vec![IdInfo::default(); id_bound];

    let mut i = 5usize;
    while i < words.len() {
        let word0 = words[i];
        let opcode = (word0 & 0xFFFF) as u16;
        let word_count = (word0 >> 16) as usize;
        if word_count == 0 {
            break;
        }
        let operands = &words[i + 1..(i + word_count).min(words.len())];

        match opcode {
            OP_DECORATE => {
                if operands.len() >= 2 {
                    let target = operands[0] as usize;
                    let decoration = operands[1];
                    if target < ids.len() {
                        match decoration {
                            DECORATION_DESCRIPTOR_SET if operands.len() >= 3 => {
                                ids[target].descriptor_set = Some(operands[2]);
                            }
                            DECORATION_BINDING if operands.len() >= 3 => {
                                ids[target].binding = Some(operands[2]);
                            }
                            DECORATION_BUILT_IN => {
                                ids[target].is_builtin = true;
                            }
                            DECORATION_LOCATION if operands.len() >= 3 => {
                                ids[target].location = Some(operands[2]);
                            }
                            DECORATION_BUFFER_BLOCK => {
                                ids[target].has_buffer_block = true;
                            }
                            _ => {}
                        }
                    }
                }
            }
            OP_TYPE_FLOAT => {
                let result = operands[0] as usize;
                ids[result].opcode = opcode;
                ids[result].is_float = true;
                ids[result].type_size = operands.get(1).copied().unwrap_or(32) / 8;
            }
            OP_TYPE_INT => {
                let result = operands[0] as usize;
                ids[result].opcode = opcode;
                ids[result].is_float = false;
                ids[result].type_size = operands.get(1).copied().unwrap_or(32) / 8;
                ids[result].signed = operands.get(2).copied().unwrap_or(0) != 0;
            }
            OP_TYPE_VECTOR => {
                let result = operands[0] as usize;
                let component_type = operands[1] as usize;
                let width = operands[2];
                ids[result].opcode = opcode;
                ids[result].element_type = operands[1];
                ids[result].vector_width = width;
                if component_type < ids.len() {
                    ids[result].is_float = ids[component_type].is_float;
                    ids[result].signed = ids[component_type].signed;
                    ids[result].type_size = ids[component_type].type_size * width;
                }
            }
            OP_TYPE_STRUCT => {
                let result = operands[0] as usize;
                ids[result].opcode = opcode;
            }
            OP_TYPE_IMAGE => {
                let result = operands[0] as usize;
                ids[result].opcode = opcode;
            }
            OP_TYPE_SAMPLER => {
                let result = operands[0] as usize;
                ids[result].opcode = opcode;
            }
            OP_TYPE_SAMPLED_IMAGE => {
                let result = operands[0] as usize;
                ids[result].opcode = opcode;
                ids[result].subtype = operands[1];
            }
            OP_TYPE_POINTER => {
                let result = operands[0] as usize;
                let storage_class = operands[1];
                let pointee = operands[2];
                ids[result].opcode = opcode;
                ids[result].storage_class = Some(storage_class);
                ids[result].subtype = pointee;
            }
            OP_VARIABLE => {
                // OpVariable: result type, result id, storage class, [initializer]
                let result_type = operands[0] as usize;
                let result = operands[1] as usize;
                let storage_class = operands[2];
                ids[result].opcode = opcode;
                ids[result].subtype = result_type;
                ids[result].storage_class = Some(storage_class);
            }
            OP_TYPE_VOID | OP_TYPE_BOOL => {
                let result = operands[0] as usize;
                ids[result].opcode = opcode;
            }
            _ => {}
        }

        i += word_count;
    }

    let mut module = ReflectedModule::default();
    let mut attr_formats: Vec<(u32, RgFormat)> = Vec::new();

    for (id, info) in ids.iter().enumerate() {
        if info.opcode != OP_VARIABLE {
            continue;
        }
        let storage_class = match info.storage_class {
            Some(sc) => sc,
            None => continue,
        };

        match storage_class {
            STORAGE_CLASS_UNIFORM_CONSTANT | STORAGE_CLASS_UNIFORM | STORAGE_CLASS_STORAGE_BUFFER => {
                let set = info.descriptor_set.unwrap_or(0);
                let binding = match info.binding {
                    Some(b) => b,
                    None => continue,
                };
                // Resolve pointee type through the pointer type id.
                let ptr_type = &ids[info.subtype as usize];
                let pointee_id = ptr_type.subtype as usize;
                let pointee = &ids[pointee_id];

                let kind = match pointee.opcode {
                    OP_TYPE_IMAGE => BindingKind::SampledImage,
                    OP_TYPE_SAMPLER => BindingKind::Sampler,
                    OP_TYPE_SAMPLED_IMAGE => BindingKind::CombinedImageSampler,
                    OP_TYPE_STRUCT if pointee.has_buffer_block || storage_class == STORAGE_CLASS_STORAGE_BUFFER => {
                        BindingKind::StorageBuffer { dynamic: dynamic_buffers }
                    }
                    OP_TYPE_STRUCT => BindingKind::UniformBuffer { dynamic: dynamic_buffers },
                    _ => continue,
                };
                module.bindings.insert((set, binding), kind);
            }
            STORAGE_CLASS_INPUT if is_vertex_stage => {
                if info.is_builtin {
                    continue;
                }
                let location = match info.location {
                    Some(l) => l,
                    None => continue,
                };
                let ptr_type = &ids[info.subtype as usize];
                let value_type = &ids[ptr_type.subtype as usize];
                let format = if value_type.opcode == OP_TYPE_VECTOR {
                    RgFormat::from_vector(value_type.vector_width, value_type.is_float, value_type.signed)
                } else if value_type.opcode == OP_TYPE_FLOAT {
                    RgFormat::from_vector(1, true, false)
                } else if value_type.opcode == OP_TYPE_INT {
                    RgFormat::from_vector(1, false, value_type.signed)
                } else {
                    None
                };
                let format = format.ok_or(ReflectError::UnsupportedVertexInput { location })?;
                attr_formats.push((location, format));
            }
            _ => {}
        }
    }

    // Left-fold over attributes in location order assigning offsets,
    // each attribute taking its format's byte size.
    attr_formats.sort_by_key(|(loc, _)| *loc);
    let mut offset = 0u32;
    for (location, format) in attr_formats {
        module.vertex_attributes.insert(location, VertexAttribute { format, offset });
        offset += format.byte_size();
    }
    module.vertex_stride = offset;

    Ok(module)
}

/// Combine a vertex-stage and fragment-stage reflection: per-(set,
/// binding), adopt whichever side is non-empty; if both define the same
/// binding they must agree on kind.
pub fn combine(vertex: ReflectedModule, fragment: ReflectedModule) -> ReflectResult<ReflectedModule> {
    let mut combined = vertex;
    for (key, kind) in fragment.bindings {
        match combined.bindings.get(&key) {
            Some(existing) if *existing != kind => {
                return Err(ReflectError::BindingKindMismatch { set: key.0, binding: key.1 });
            }
            Some(_) => {}
            None => {
                combined.bindings.insert(key, kind);
            }
        }
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembles the minimal SPIR-V needed to exercise the decoder
    /// without a real compiler: a vertex shader with a `vec3` position
    /// at location 0 and a `vec2` UV at location 1.
    fn build_vertex_layout_module() -> Vec<u32> {
        // Ids: 1=void 2=float 3=vec3 4=vec2 5=ptr(Input,vec3) 6=ptr(Input,vec2)
        //      7=pos var 8=uv var
        let mut w = vec![SPIRV_MAGIC, 0x00010000, 0, 9, 0];

        fn push_op(w: &mut Vec<u32>, opcode: u16, operands: &[u32]) {
            let word_count = (operands.len() + 1) as u32;
            w.push((word_count << 16) | opcode as u32);
            w.extend_from_slice(operands);
        }

        push_op(&mut w, OP_TYPE_VOID, &[1]);
        push_op(&mut w, OP_TYPE_FLOAT, &[2, 32]);
        push_op(&mut w, OP_TYPE_VECTOR, &[3, 2, 3]);
        push_op(&mut w, OP_TYPE_VECTOR, &[4, 2, 2]);
        push_op(&mut w, OP_TYPE_POINTER, &[5, STORAGE_CLASS_INPUT, 3]);
        push_op(&mut w, OP_TYPE_POINTER, &[6, STORAGE_CLASS_INPUT, 4]);
        push_op(&mut w, OP_VARIABLE, &[5, 7, STORAGE_CLASS_INPUT]);
        push_op(&mut w, OP_VARIABLE, &[6, 8, STORAGE_CLASS_INPUT]);
        push_op(&mut w, OP_DECORATE, &[7, DECORATION_LOCATION, 0]);
        push_op(&mut w, OP_DECORATE, &[8, DECORATION_LOCATION, 1]);

        w
    }

    #[test]
    fn vertex_layout_reflection() {
        let words = build_vertex_layout_module();
        let module = reflect(&words, true, false).expect("reflects");
        assert_eq!(module.vertex_stride, 20);
        assert_eq!(module.vertex_attributes[&0].format, RgFormat::Rgb32Sfloat);
        assert_eq!(module.vertex_attributes[&0].offset, 0);
        assert_eq!(module.vertex_attributes[&1].format, RgFormat::Rg32Sfloat);
        assert_eq!(module.vertex_attributes[&1].offset, 12);
    }

    #[test]
    fn rejects_bad_magic() {
        let words = [0u32; 8];
        assert!(matches!(reflect(&words, true, false), Err(ReflectError::BadMagic)));
    }

    #[test]
    fn combine_merges_disjoint_bindings() {
        let mut a = ReflectedModule::default();
        a.bindings.insert((0, 0), BindingKind::UniformBuffer { dynamic: false });
        let mut b = ReflectedModule::default();
        b.bindings.insert((0, 1), BindingKind::SampledImage);
        let combined = combine(a, b).unwrap();
        assert_eq!(combined.bindings.len(), 2);
    }

    #[test]
    fn combine_rejects_conflicting_kinds() {
        let mut a = ReflectedModule::default();
        a.bindings.insert((0, 0), BindingKind::UniformBuffer { dynamic: false });
        let mut b = ReflectedModule::default();
        b.bindings.insert((0, 0), BindingKind::SampledImage);
        assert!(combine(a, b).is_err());
    }
}
