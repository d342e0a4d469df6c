use super::*;
use std::collections::HashSet;

#[repr(C)]
struct Particle {
    position: [f32; 3],
    age: f32,
}

// ============================================================================
// Preset tests
// ============================================================================

#[test]
fn test_vertex_buffer_preset() {
    let desc = BufferDesc::vertex_buffer(100, 32);
    assert_eq!(desc.size, 3200);
    assert_eq!(desc.stride, 32);
    assert_eq!(desc.usage, ResourceUsage::Immutable);
    assert_eq!(desc.bind_flags, BindFlags::VERTEX_BUFFER);
}

#[test]
fn test_index_buffer_preset_small_and_large() {
    let small = BufferDesc::index_buffer(6, true);
    assert_eq!(small.stride, 2);
    assert_eq!(small.size, 12);
    assert_eq!(small.format, Format::R16_UINT);

    let large = BufferDesc::index_buffer(6, false);
    assert_eq!(large.stride, 4);
    assert_eq!(large.size, 24);
    assert_eq!(large.format, Format::R32_UINT);
}

#[test]
fn test_structured_preset() {
    let desc = BufferDesc::structured::<Particle>(10, true, false);
    assert_eq!(desc.stride, 16);
    assert_eq!(desc.size, 160);
    assert!(desc.bind_flags.contains(BindFlags::UNORDERED_ACCESS | BindFlags::SHADER_RESOURCE));
    assert!(desc.misc_flags.contains(BufferMiscFlags::STRUCTURED));
    assert_eq!(desc.usage, ResourceUsage::Default);
}

#[test]
fn test_structured_dynamic_preset_without_uav() {
    let desc = BufferDesc::structured::<Particle>(4, false, true);
    assert_eq!(desc.usage, ResourceUsage::Dynamic);
    assert_eq!(desc.cpu_access, CpuAccess::WRITE);
    assert!(!desc.bind_flags.contains(BindFlags::UNORDERED_ACCESS));
}

#[test]
fn test_structured_uav_ignores_dynamic() {
    let desc = BufferDesc::structured::<Particle>(4, true, true);
    assert_eq!(desc.usage, ResourceUsage::Default);
    assert!(desc.cpu_access.is_empty());
}

#[test]
fn test_indirect_args_and_constant_presets() {
    let args = BufferDesc::indirect_args(20);
    assert_eq!(args.size, 20);
    assert!(args.misc_flags.contains(BufferMiscFlags::INDIRECT_ARGS));

    let cb = BufferDesc::constant_buffer(20);
    assert_eq!(cb.size, 32);
    assert_eq!(cb.usage, ResourceUsage::Dynamic);
}

#[test]
fn test_descriptors_hash_and_compare() {
    let mut set = HashSet::new();
    set.insert(BufferDesc::vertex_buffer(4, 16));
    set.insert(BufferDesc::vertex_buffer(4, 16));
    set.insert(BufferDesc::index_buffer(4, true));
    assert_eq!(set.len(), 2);
    assert!(BufferDesc::vertex_buffer(1, 4) < BufferDesc::vertex_buffer(2, 4));
}

// ============================================================================
// View derivation tests
// ============================================================================

#[test]
fn test_structured_view_uses_stride() {
    let desc = BufferDesc::structured::<Particle>(10, true, false);
    let view = BufferViewDesc::derive(&desc, &BufferSubresourceDesc::default(), ViewKind::ReadWrite).unwrap();
    assert_eq!(view.format, Format::Unknown);
    assert_eq!(view.element_size, 16);
    assert_eq!(view.num_elements, 10);
}

#[test]
fn test_raw_view_uses_typeless_dwords() {
    let desc = BufferDesc {
        size: 64,
        bind_flags: BindFlags::UNORDERED_ACCESS,
        misc_flags: BufferMiscFlags::RAW,
        ..Default::default()
    };
    let view = BufferViewDesc::derive(&desc, &BufferSubresourceDesc::default(), ViewKind::ReadOnly).unwrap();
    assert_eq!(view.format, Format::R32_TYPELESS);
    assert_eq!(view.num_elements, 16);
}

#[test]
fn test_indirect_args_read_write_view_is_r32_uint() {
    let desc = BufferDesc::indirect_args(20);
    let view = BufferViewDesc::derive(&desc, &BufferSubresourceDesc::default(), ViewKind::ReadWrite).unwrap();
    assert_eq!(view.format, Format::R32_UINT);
    assert_eq!(view.num_elements, 5);
}

#[test]
fn test_typed_view_with_offset_and_size() {
    let desc = BufferDesc::index_buffer(100, false);
    let sub = BufferSubresourceDesc { offset: 40, size: 80, uav_flags: UavFlags::empty() };
    let view = BufferViewDesc::derive(&desc, &sub, ViewKind::ReadOnly).unwrap();
    assert_eq!(view.first_element, 10);
    assert_eq!(view.num_elements, 20);
    assert_eq!(view.byte_offset(), 40);
    assert_eq!(view.byte_size(), 80);
}

#[test]
fn test_view_size_clamped_to_rest_of_buffer() {
    let desc = BufferDesc::index_buffer(10, false);
    let sub = BufferSubresourceDesc { offset: 8, ..Default::default() };
    let view = BufferViewDesc::derive(&desc, &sub, ViewKind::ReadOnly).unwrap();
    assert_eq!(view.num_elements, 8);
}

#[test]
fn test_read_only_view_drops_uav_flags() {
    let desc = BufferDesc::append(8, 8);
    let sub = BufferSubresourceDesc::with_uav_flags(UavFlags::APPEND);
    let ro = BufferViewDesc::derive(&desc, &sub, ViewKind::ReadOnly).unwrap();
    let rw = BufferViewDesc::derive(&desc, &sub, ViewKind::ReadWrite).unwrap();
    assert!(ro.uav_flags.is_empty());
    assert!(rw.uav_flags.has_counter());
}

#[test]
fn test_view_derivation_fails_without_element_size() {
    let desc = BufferDesc { size: 64, bind_flags: BindFlags::SHADER_RESOURCE, ..Default::default() };
    assert!(BufferViewDesc::derive(&desc, &BufferSubresourceDesc::default(), ViewKind::ReadOnly).is_none());
}

#[test]
fn test_view_derivation_fails_with_offset_past_end() {
    let desc = BufferDesc::index_buffer(4, false);
    let sub = BufferSubresourceDesc { offset: 32, ..Default::default() };
    assert!(BufferViewDesc::derive(&desc, &sub, ViewKind::ReadOnly).is_none());
}

// ============================================================================
// Texture tests
// ============================================================================

#[test]
fn test_texture_presets() {
    let depth = TextureDesc::depth_target(64, 32);
    assert!(depth.bind_flags.contains(BindFlags::DEPTH_STENCIL));
    assert_eq!(depth.format, Format::D32_FLOAT);

    let random = TextureDesc::texture_2d(16, 16, Format::R32G32B32A32_FLOAT);
    assert_eq!(random.top_mip_size(), 16 * 16 * 16);
}
