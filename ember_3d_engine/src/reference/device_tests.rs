use super::*;
use crate::graphics_device::{
    BufferSubresourceDesc, TextureViewDesc, TextureSubresourceDesc, InputLayoutDesc, UavFlags, Format,
};

fn view_desc(buffer: &BufferDesc, sub: BufferSubresourceDesc, kind: ViewKind) -> BufferViewDesc {
    BufferViewDesc::derive(buffer, &sub, kind).unwrap()
}

// ============================================================================
// BUFFER VALIDATION
// ============================================================================

#[test]
fn test_buffer_descriptor_validation() {
    let device = ReferenceDevice::new();

    assert!(device.create_buffer(&BufferDesc { size: 0, ..Default::default() }, None).is_err());
    assert!(device.create_buffer(&BufferDesc::vertex_buffer(4, 12), None).is_err());
    assert!(device.create_buffer(&BufferDesc::vertex_buffer(4, 12), Some(&[0; 48])).is_ok());
    assert!(device.create_buffer(&BufferDesc::constant_buffer(16), Some(&[0; 17])).is_err());

    let dynamic_without_write = BufferDesc { cpu_access: CpuAccess::empty(), ..BufferDesc::constant_buffer(16) };
    assert!(device.create_buffer(&dynamic_without_write, None).is_err());

    let bound_staging = BufferDesc { bind_flags: BindFlags::SHADER_RESOURCE, ..BufferDesc::readback(16) };
    assert!(device.create_buffer(&bound_staging, None).is_err());

    let ragged = BufferDesc { size: 30, ..BufferDesc::structured::<[u32; 2]>(4, false, false) };
    assert!(device.create_buffer(&ragged, None).is_err());
}

#[test]
fn test_initial_data_is_copied() {
    let device = ReferenceDevice::new();
    let buffer = device.create_buffer(&BufferDesc::indirect_args(8), Some(&[1, 2, 3])).unwrap();
    assert_eq!(device.buffer_contents(buffer).unwrap(), vec![1, 2, 3, 0, 0, 0, 0, 0]);
}

// ============================================================================
// VIEWS
// ============================================================================

#[test]
fn test_buffer_view_validation() {
    let device = ReferenceDevice::new();
    let read_only_desc = BufferDesc::structured::<u32>(16, false, false);
    let read_only = device.create_buffer(&read_only_desc, None).unwrap();

    let srv = view_desc(&read_only_desc, BufferSubresourceDesc::default(), ViewKind::ReadOnly);
    assert!(device.create_buffer_view(read_only, &srv).is_ok());

    let uav = view_desc(&read_only_desc, BufferSubresourceDesc::default(), ViewKind::ReadWrite);
    assert!(device.create_buffer_view(read_only, &uav).is_err());

    let past_end = BufferViewDesc { first_element: 10, num_elements: 10, ..srv };
    assert!(device.create_buffer_view(read_only, &past_end).is_err());

    let empty = BufferViewDesc { num_elements: 0, ..srv };
    assert!(device.create_buffer_view(read_only, &empty).is_err());
}

#[test]
fn test_counter_starts_at_zero() {
    let device = ReferenceDevice::new();
    let desc = BufferDesc::append(8, 4);
    let buffer = device.create_buffer(&desc, None).unwrap();
    let append = view_desc(&desc, BufferSubresourceDesc::with_uav_flags(UavFlags::APPEND), ViewKind::ReadWrite);

    let view = device.create_buffer_view(buffer, &append).unwrap();
    assert_eq!(device.view_counter(view), Some(0));
}

#[test]
fn test_texture_view_requires_bind_flag() {
    let device = ReferenceDevice::new();
    let texture = device.create_texture(&TextureDesc::texture_2d(4, 4, Format::R8G8B8A8_UNORM), None).unwrap();

    let desc = |kind| TextureViewDesc { kind, format: Format::R8G8B8A8_UNORM, subresource: TextureSubresourceDesc::default() };
    assert!(device.create_texture_view(texture, &desc(TextureViewKind::ReadOnly)).is_ok());
    assert!(device.create_texture_view(texture, &desc(TextureViewKind::RenderTarget)).is_err());
}

#[test]
fn test_texture_validation() {
    let device = ReferenceDevice::new();
    assert!(device.create_texture(&TextureDesc::texture_2d(0, 4, Format::R8G8B8A8_UNORM), None).is_err());

    let immutable = TextureDesc { usage: ResourceUsage::Immutable, ..TextureDesc::texture_2d(2, 2, Format::R8G8B8A8_UNORM) };
    assert!(device.create_texture(&immutable, None).is_err());
    assert!(device.create_texture(&immutable, Some(&[0; 17])).is_err());
    assert!(device.create_texture(&immutable, Some(&[0; 16])).is_ok());
}

#[test]
fn test_depth_only_clear_keeps_stencil() {
    let device = ReferenceDevice::new();
    let desc = TextureDesc {
        format: Format::D24_UNORM_S8_UINT,
        bind_flags: BindFlags::DEPTH_STENCIL,
        ..TextureDesc::texture_2d(2, 2, Format::D24_UNORM_S8_UINT)
    };
    let texture = device.create_texture(&desc, None).unwrap();
    let dsv_desc = TextureViewDesc {
        kind: TextureViewKind::DepthStencil,
        format: Format::D24_UNORM_S8_UINT,
        subresource: TextureSubresourceDesc::default(),
    };
    let dsv = device.create_texture_view(texture, &dsv_desc).unwrap();

    let mut stream = device.create_command_stream().unwrap();
    stream.clear_depth_stencil(dsv, 1.0, 0x7f, true);
    stream.clear_depth_stencil(dsv, 0.5, 0, false);
    stream.flush().unwrap();

    let texels: Vec<u32> = device
        .texture_contents(texture)
        .unwrap()
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    assert_eq!(texels.len(), 4);
    for texel in texels {
        assert_eq!(texel >> 24, 0x7f);
        assert_eq!(texel & 0x00ff_ffff, (0.5f32 * 16_777_215.0).round() as u32);
    }

    stream.clear_depth_stencil(dsv, 0.0, 3, true);
    let texel = &device.texture_contents(texture).unwrap()[..4];
    assert_eq!(u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]), 3 << 24);
}

#[test]
fn test_copy_structure_count_requires_counter() {
    let device = ReferenceDevice::new();
    let desc = BufferDesc::append(8, 4);
    let buffer = device.create_buffer(&desc, None).unwrap();
    let plain = view_desc(&desc, BufferSubresourceDesc::default(), ViewKind::ReadWrite);
    let view = device.create_buffer_view(buffer, &plain).unwrap();
    let args = device.create_buffer(&BufferDesc::indirect_args(16), Some(&[0xaa; 16])).unwrap();

    let mut stream = device.create_command_stream().unwrap();
    stream.copy_structure_count(args, 0, view);

    assert!(matches!(stream.flush(), Err(Error::InvalidResource(_))));
    assert_eq!(device.buffer_contents(args).unwrap(), vec![0xaa; 16]);
}

// ============================================================================
// SHADERS / INPUT LAYOUTS
// ============================================================================

#[test]
fn test_input_layout_requires_vertex_shader() {
    let device = ReferenceDevice::new();
    let shader = |stage, entry_point| device.create_shader(&ShaderDesc { stage, code: &[], entry_point, name: entry_point });
    let vs = shader(ShaderStage::Vertex, "MainVS").unwrap();
    let ps = shader(ShaderStage::Pixel, "MainPS").unwrap();

    let layout = InputLayoutDesc::default();
    assert!(device.create_input_layout(&layout, vs).is_ok());
    assert!(device.create_input_layout(&layout, ps).is_err());
    assert!(shader(ShaderStage::Compute, "").is_err());
}

// ============================================================================
// CPU ACCESS
// ============================================================================

#[test]
fn test_map_modes_follow_cpu_access() {
    let device = ReferenceDevice::new();
    let dynamic = device.create_buffer(&BufferDesc::constant_buffer(16), None).unwrap();
    let readback = device.create_buffer(&BufferDesc::readback(16), None).unwrap();

    assert!(device.map_buffer(dynamic, MapMode::Read).is_err());
    assert!(device.map_buffer(readback, MapMode::WriteDiscard).is_err());

    assert!(device.map_buffer(dynamic, MapMode::WriteDiscard).is_ok());
    assert!(device.map_buffer(dynamic, MapMode::WriteDiscard).is_err());
    device.unmap_buffer(dynamic);
    assert!(device.map_buffer(dynamic, MapMode::WriteDiscard).is_ok());
}

#[test]
fn test_update_subresource_requires_default_usage() {
    let device = ReferenceDevice::new();
    let gpu = device.create_buffer(&BufferDesc::gpu_constant_buffer(16), None).unwrap();
    let dynamic = device.create_buffer(&BufferDesc::constant_buffer(16), None).unwrap();

    device.update_subresource(gpu, 4, &[9, 9]).unwrap();
    assert_eq!(&device.buffer_contents(gpu).unwrap()[..8], &[0, 0, 0, 0, 9, 9, 0, 0]);
    assert!(device.update_subresource(gpu, 15, &[1, 2]).is_err());
    assert!(device.update_subresource(dynamic, 0, &[1]).is_err());
}

// ============================================================================
// QUERIES / BOOKKEEPING
// ============================================================================

#[test]
fn test_timestamp_query_resolves_after_end() {
    let device = ReferenceDevice::new();
    let query = device.create_query(QueryKind::Timestamp).unwrap();
    assert_eq!(device.query_data(query).unwrap(), None);

    let mut stream = device.create_command_stream().unwrap();
    stream.end_query(query);
    assert!(device.query_data(query).unwrap().is_some());
    assert_eq!(device.timestamp_frequency(), REFERENCE_TIMESTAMP_FREQUENCY);

    device.destroy_query(query);
    assert!(device.query_data(query).is_err());
}

#[test]
fn test_call_counts_and_live_objects() {
    let device = ReferenceDevice::new();
    let a = device.create_buffer(&BufferDesc::readback(4), None).unwrap();
    let b = device.create_buffer(&BufferDesc::readback(4), None).unwrap();
    assert_eq!(device.call_count("create_buffer"), 2);
    assert_eq!(device.live_object_count(), 2);

    device.destroy_buffer(a);
    device.destroy_buffer(b);
    assert_eq!(device.live_object_count(), 0);

    device.reset_call_counts();
    assert_eq!(device.call_count("create_buffer"), 0);
}
