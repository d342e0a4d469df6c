/// Shader - SPIR-V module with its reflected register bindings
///
/// Shaders are compiled from HLSL with one window of `STAGE_BINDING_STRIDE`
/// bindings per stage in descriptor set 0. Inside a window, register `b#`
/// maps to binding #, `t#` to 16+#, `u#` to 32+# and `s#` to 48+#, so every
/// D3D-style register slot has exactly one Vulkan binding.

use ash::vk;
use ember_3d_engine::ember3d::Result;
use ember_3d_engine::ember3d::device::ShaderStage;
use ember_3d_engine::engine_bail;
use std::ffi::CString;

const SOURCE: &str = "ember3d::vulkan";

/// Bindings reserved per stage
pub const STAGE_BINDING_STRIDE: u32 = 64;
/// Register slots per class
pub const SLOTS_PER_CLASS: u32 = 16;
/// Prefix DXC gives the hidden counter of an append/consume/counter UAV
pub const COUNTER_VARIABLE_PREFIX: &str = "counter.var.";

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// D3D-style register class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// `b#`
    ConstantBuffer,
    /// `t#`
    ShaderResource,
    /// `u#`
    UnorderedAccess,
    /// `s#`
    Sampler,
}

impl RegisterClass {
    fn base(self) -> u32 {
        match self {
            RegisterClass::ConstantBuffer => 0,
            RegisterClass::ShaderResource => SLOTS_PER_CLASS,
            RegisterClass::UnorderedAccess => 2 * SLOTS_PER_CLASS,
            RegisterClass::Sampler => 3 * SLOTS_PER_CLASS,
        }
    }
}

/// One register slot of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub stage: ShaderStage,
    pub class: RegisterClass,
    pub slot: u32,
}

/// Vulkan binding of a register
pub fn binding_for(register: Register) -> u32 {
    register.stage.index() as u32 * STAGE_BINDING_STRIDE + register.class.base() + register.slot
}

/// Register a Vulkan binding stands for, None outside `stage`'s window
pub fn register_for(stage: ShaderStage, binding: u32) -> Option<Register> {
    let window = stage.index() as u32 * STAGE_BINDING_STRIDE;
    if binding < window || binding >= window + STAGE_BINDING_STRIDE {
        return None;
    }
    let local = binding - window;
    let class = match local / SLOTS_PER_CLASS {
        0 => RegisterClass::ConstantBuffer,
        1 => RegisterClass::ShaderResource,
        2 => RegisterClass::UnorderedAccess,
        _ => RegisterClass::Sampler,
    };
    Some(Register { stage, class, slot: local % SLOTS_PER_CLASS })
}

/// Register shift arguments for DXC's `-fvk-*-shift` options, in (b, t, u, s) order
pub fn register_shifts(stage: ShaderStage) -> [u32; 4] {
    let window = stage.index() as u32 * STAGE_BINDING_STRIDE;
    [
        window + RegisterClass::ConstantBuffer.base(),
        window + RegisterClass::ShaderResource.base(),
        window + RegisterClass::UnorderedAccess.base(),
        window + RegisterClass::Sampler.base(),
    ]
}

/// Resource variable name a counter variable belongs to
pub fn counter_owner(variable_name: &str) -> Option<&str> {
    variable_name.strip_prefix(COUNTER_VARIABLE_PREFIX)
}

/// A descriptor used by a shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub register: Register,
    /// Binds the hidden counter of the UAV in `register`
    pub counter: bool,
}

/// A vertex shader input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInput {
    /// Reflected name, e.g. `in.var.TEXCOORD1`
    pub name: String,
    pub location: u32,
}

impl ShaderInput {
    /// Whether this input is fed by semantic `name` / `index`
    pub fn matches(&self, name: &str, index: u32) -> bool {
        let Some(semantic) = self.name.strip_prefix("in.var.") else {
            return false;
        };
        let indexed = format!("{}{}", name, index);
        semantic.eq_ignore_ascii_case(&indexed) || (index == 0 && semantic.eq_ignore_ascii_case(name))
    }
}

pub struct VulkanShader {
    pub module: vk::ShaderModule,
    pub stage: ShaderStage,
    pub entry_point: CString,
    pub name: String,
    pub bindings: Vec<ShaderBinding>,
    pub inputs: Vec<ShaderInput>,
}

pub fn stage_to_vk(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// SPIR-V words of `code`
pub fn spirv_words(code: &[u8]) -> Result<Vec<u32>> {
    if code.len() % 4 != 0 || code.len() < 20 {
        engine_bail!(SOURCE, "SPIR-V code size {} is not a whole module", code.len());
    }
    let words: Vec<u32> = bytemuck::pod_collect_to_vec(code);
    if words[0] != SPIRV_MAGIC {
        engine_bail!(SOURCE, "Not a SPIR-V module (magic {:#010x})", words[0]);
    }
    Ok(words)
}

fn descriptor_type(desc_ty: &spirq::ty::DescriptorType) -> Option<vk::DescriptorType> {
    use spirq::ty::DescriptorType;
    Some(match desc_ty {
        DescriptorType::UniformBuffer() => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer(..) => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::UniformTexelBuffer() => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer(..) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::SampledImage() => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::StorageImage(..) => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::Sampler() => vk::DescriptorType::SAMPLER,
        _ => return None,
    })
}

/// Reflect the bindings and inputs of `entry_point` in `words`
pub fn reflect(words: &[u32], stage: ShaderStage, entry_point: &str) -> Result<(Vec<ShaderBinding>, Vec<ShaderInput>)> {
    let entry_points = match spirq::ReflectConfig::new().spv(words).ref_all_rscs(true).reflect() {
        Ok(entry_points) => entry_points,
        Err(e) => engine_bail!(SOURCE, "SPIR-V reflection failed: {:?}", e),
    };
    let Some(entry) = entry_points.iter().find(|ep| ep.name == entry_point) else {
        engine_bail!(SOURCE, "Entry point '{}' not found in SPIR-V module", entry_point);
    };

    let mut named = Vec::new();
    let mut counters = Vec::new();
    let mut inputs = Vec::new();

    for var in &entry.vars {
        match var {
            spirq::var::Variable::Descriptor { name, desc_bind, desc_ty, .. } => {
                if desc_bind.set() != 0 {
                    engine_bail!(SOURCE, "'{}' uses descriptor set {}; only set 0 is supported", entry_point, desc_bind.set());
                }
                let Some(descriptor_type) = descriptor_type(desc_ty) else {
                    engine_bail!(SOURCE, "Unsupported descriptor type {:?} in '{}'", desc_ty, entry_point);
                };
                let name = name.clone().unwrap_or_default();
                if counter_owner(&name).is_some() {
                    counters.push((name, desc_bind.bind(), descriptor_type));
                    continue;
                }
                let Some(register) = register_for(stage, desc_bind.bind()) else {
                    engine_bail!(SOURCE, "Binding {} of '{}' is outside the {:?} register window", desc_bind.bind(), name, stage);
                };
                named.push((name, ShaderBinding { binding: desc_bind.bind(), descriptor_type, register, counter: false }));
            }
            spirq::var::Variable::Input { name, location, .. } if stage == ShaderStage::Vertex => {
                inputs.push(ShaderInput { name: name.clone().unwrap_or_default(), location: location.loc() });
            }
            _ => {}
        }
    }

    let mut bindings: Vec<ShaderBinding> = Vec::with_capacity(named.len() + counters.len());
    for (name, binding, descriptor_type) in counters {
        let owner = counter_owner(&name).unwrap_or_default();
        let Some((_, resource)) = named.iter().find(|(resource_name, _)| resource_name == owner) else {
            engine_bail!(SOURCE, "Counter '{}' has no matching UAV in '{}'", name, entry_point);
        };
        bindings.push(ShaderBinding { binding, descriptor_type, register: resource.register, counter: true });
    }
    bindings.extend(named.into_iter().map(|(_, binding)| binding));
    bindings.sort_by_key(|b| b.binding);
    Ok((bindings, inputs))
}

#[cfg(test)]
#[path = "vulkan_shader_tests.rs"]
mod tests;
