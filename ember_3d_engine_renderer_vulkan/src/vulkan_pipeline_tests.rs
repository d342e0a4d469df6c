//! Unit tests for input layout resolution and binding merging

use super::*;
use crate::vulkan_shader::{Register, RegisterClass, binding_for};
use ember_3d_engine::ember3d::device::{Format, InputElementDesc};
use std::ffi::CString;

fn element(semantic: &str, index: u32, format: Format, slot: u32, offset: u32, step: u32) -> InputElementDesc {
    InputElementDesc {
        semantic_name: semantic.to_string(),
        semantic_index: index,
        format,
        input_slot: slot,
        aligned_byte_offset: offset,
        instance_step_rate: step,
    }
}

fn input(name: &str, location: u32) -> ShaderInput {
    ShaderInput { name: name.to_string(), location }
}

fn shader(stage: ShaderStage, bindings: Vec<ShaderBinding>) -> VulkanShader {
    VulkanShader {
        module: vk::ShaderModule::null(),
        stage,
        entry_point: CString::new("main").unwrap(),
        name: "test".to_string(),
        bindings,
        inputs: Vec::new(),
    }
}

fn binding(stage: ShaderStage, class: RegisterClass, slot: u32, descriptor_type: vk::DescriptorType) -> ShaderBinding {
    let register = Register { stage, class, slot };
    ShaderBinding { binding: binding_for(register), descriptor_type, register, counter: false }
}

// ============================================================================
// INPUT LAYOUT
// ============================================================================

#[test]
fn test_append_aligned_offsets() {
    let desc = InputLayoutDesc {
        elements: vec![
            element("POSITION", 0, Format::R32G32B32_FLOAT, 0, 0, 0),
            element("TEXCOORD", 0, Format::R32G32_FLOAT, 0, APPEND_ALIGNED_ELEMENT, 0),
            element("COLOR", 0, Format::R8G8B8A8_UNORM, 0, APPEND_ALIGNED_ELEMENT, 0),
        ],
    };
    let inputs = [input("in.var.POSITION", 0), input("in.var.TEXCOORD0", 1), input("in.var.COLOR", 2)];
    let layout = resolve_input_layout(&desc, &inputs).unwrap();

    let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
    assert_eq!(offsets, vec![0, 12, 20]);
    assert_eq!(layout.bindings.len(), 1);
    assert_eq!(layout.attributes[1].format, vk::Format::R32G32_SFLOAT);
}

#[test]
fn test_instance_slots() {
    let desc = InputLayoutDesc {
        elements: vec![
            element("POSITION", 0, Format::R32G32B32_FLOAT, 0, 0, 0),
            element("TEXCOORD", 1, Format::R32G32B32A32_FLOAT, 1, 0, 1),
        ],
    };
    let inputs = [input("in.var.POSITION", 0), input("in.var.TEXCOORD1", 3)];
    let layout = resolve_input_layout(&desc, &inputs).unwrap();

    assert_eq!(layout.bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
    assert_eq!(layout.attributes[1].location, 3);
    assert_eq!(layout.attributes[1].binding, 1);
}

#[test]
fn test_unused_elements_are_dropped() {
    let desc = InputLayoutDesc {
        elements: vec![
            element("POSITION", 0, Format::R32G32B32_FLOAT, 0, 0, 0),
            element("NORMAL", 0, Format::R32G32B32_FLOAT, 0, 12, 0),
        ],
    };
    let layout = resolve_input_layout(&desc, &[input("in.var.POSITION", 0)]).unwrap();
    assert_eq!(layout.attributes.len(), 1);
}

#[test]
fn test_unfed_shader_input_fails() {
    let desc = InputLayoutDesc { elements: vec![element("POSITION", 0, Format::R32G32B32_FLOAT, 0, 0, 0)] };
    let inputs = [input("in.var.POSITION", 0), input("in.var.NORMAL", 1)];
    assert!(resolve_input_layout(&desc, &inputs).is_err());
}

#[test]
fn test_mixed_step_rates_on_one_slot_fail() {
    let desc = InputLayoutDesc {
        elements: vec![
            element("POSITION", 0, Format::R32G32B32_FLOAT, 0, 0, 0),
            element("TEXCOORD", 0, Format::R32G32_FLOAT, 0, 12, 1),
        ],
    };
    assert!(resolve_input_layout(&desc, &[]).is_err());
}

// ============================================================================
// BINDINGS
// ============================================================================

#[test]
fn test_merge_keeps_stage_windows_apart() {
    let vs = shader(ShaderStage::Vertex, vec![
        binding(ShaderStage::Vertex, RegisterClass::ShaderResource, 0, vk::DescriptorType::STORAGE_BUFFER),
        binding(ShaderStage::Vertex, RegisterClass::ConstantBuffer, 0, vk::DescriptorType::UNIFORM_BUFFER),
    ]);
    let ps = shader(ShaderStage::Pixel, vec![
        binding(ShaderStage::Pixel, RegisterClass::ShaderResource, 0, vk::DescriptorType::SAMPLED_IMAGE),
        binding(ShaderStage::Pixel, RegisterClass::Sampler, 0, vk::DescriptorType::SAMPLER),
    ]);
    let merged = merge_layout_bindings([&vs, &ps]).unwrap();

    let numbers: Vec<u32> = merged.iter().map(|b| b.binding.binding).collect();
    assert_eq!(numbers, vec![0, 16, 80, 112]);
    assert_eq!(merged[0].stage_flags, vk::ShaderStageFlags::VERTEX);
    assert_eq!(merged[3].stage_flags, vk::ShaderStageFlags::FRAGMENT);
}

#[test]
fn test_merge_shares_identical_bindings() {
    let shared = binding(ShaderStage::Vertex, RegisterClass::ConstantBuffer, 1, vk::DescriptorType::UNIFORM_BUFFER);
    let vs = shader(ShaderStage::Vertex, vec![shared.clone()]);
    let gs = shader(ShaderStage::Geometry, vec![shared]);
    let merged = merge_layout_bindings([&vs, &gs]).unwrap();

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::GEOMETRY);
}

#[test]
fn test_merge_rejects_conflicting_types() {
    let a = binding(ShaderStage::Vertex, RegisterClass::ShaderResource, 0, vk::DescriptorType::STORAGE_BUFFER);
    let b = ShaderBinding { descriptor_type: vk::DescriptorType::SAMPLED_IMAGE, ..a.clone() };
    let vs = shader(ShaderStage::Vertex, vec![a]);
    let gs = shader(ShaderStage::Geometry, vec![b]);
    assert!(merge_layout_bindings([&vs, &gs]).is_err());
}

#[test]
fn test_empty_cache() {
    let mut cache = PipelineCache::default();
    assert!(cache.is_empty());
    assert!(cache.drain().is_empty());
    assert!(cache.evict(PipelineDependency::Shader(ShaderHandle::default())).is_empty());
}
