//! GPU tests for the Vulkan GraphicsDevice / CommandStream backend
//!
//! These tests verify the Vulkan device behaves like the reference device for
//! resources, views, counters, copies and queries.
//! All tests require a GPU and are marked with #[ignore].
//!
//! Run with: cargo test --test vulkan_device_tests -- --ignored

mod gpu_test_utils;

use gpu_test_utils::{get_test_graphics_device, test_context, test_device, read_back};
use ember_3d_engine::ember3d::{Error, GraphicsDevice};
use ember_3d_engine::ember3d::device::{
    BufferDesc, BufferSubresourceDesc, BufferViewDesc, UavFlags, ViewKind, ResourceUsage, CpuAccess, BindFlags,
    TextureDesc, TextureViewDesc, TextureViewKind, TextureSubresourceDesc, Format, MapMode, QueryKind,
    ResourceView, ShaderDesc, ShaderStage, SamplerDesc, Filter, TextureAddressMode, RenderPassDesc, ColorLoadOp,
    DepthLoadOp, KEEP_COUNTER,
};
use ember_3d_engine::ember3d::render::{Buffer, Texture, Sampler};
use serial_test::serial;

fn words(bytes: &[u8]) -> Vec<u32> {
    bytemuck::pod_collect_to_vec(bytes)
}

// ============================================================================
// BUFFER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_buffer_initial_data_reaches_gpu() {
    let mut ctx = test_context();
    let data: Vec<u32> = (0..64).collect();
    let buffer = Buffer::with_data(test_device(), BufferDesc::structured::<u32>(64, true, false), &data);

    let contents = read_back(&mut ctx, &buffer, 256);
    assert_eq!(words(&contents), data);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_buffer_validation_matches_reference() {
    let device = get_test_graphics_device();

    assert!(device.create_buffer(&BufferDesc { size: 0, ..Default::default() }, None).is_err());
    assert!(device.create_buffer(&BufferDesc::vertex_buffer(4, 12), None).is_err());
    assert!(device.create_buffer(&BufferDesc::constant_buffer(16), Some(&[0; 17])).is_err());

    let dynamic_without_write = BufferDesc { cpu_access: CpuAccess::empty(), ..BufferDesc::constant_buffer(16) };
    assert!(matches!(device.create_buffer(&dynamic_without_write, None), Err(Error::InvalidResource(_))));

    let bound_staging = BufferDesc { bind_flags: BindFlags::SHADER_RESOURCE, ..BufferDesc::readback(16) };
    assert!(device.create_buffer(&bound_staging, None).is_err());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_dynamic_buffer_keeps_recorded_versions() {
    let mut ctx = test_context();
    let dynamic = Buffer::new(test_device(), BufferDesc::constant_buffer(16), None);
    let first = Buffer::new(test_device(), BufferDesc::structured::<u32>(4, true, false), None);
    let second = Buffer::new(test_device(), BufferDesc::structured::<u32>(4, true, false), None);

    // Each copy must see the contents written before it was recorded
    dynamic.update(bytemuck::cast_slice(&[1u32, 2, 3, 4])).unwrap();
    ctx.copy_buffer_region(&first, 0, &dynamic, 0, 16);
    dynamic.update(bytemuck::cast_slice(&[5u32, 6, 7, 8])).unwrap();
    ctx.copy_buffer_region(&second, 0, &dynamic, 0, 16);

    assert_eq!(words(&read_back(&mut ctx, &first, 16)), vec![1, 2, 3, 4]);
    assert_eq!(words(&read_back(&mut ctx, &second, 16)), vec![5, 6, 7, 8]);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_update_subresource_partial() {
    let mut ctx = test_context();
    let device = test_device();
    let buffer = Buffer::with_data(device.clone(), BufferDesc::structured::<u32>(4, true, false), &[9u32; 4]);

    device.update_subresource(buffer.handle(), 4, bytemuck::cast_slice(&[1u32, 2])).unwrap();
    assert_eq!(words(&read_back(&mut ctx, &buffer, 16)), vec![9, 1, 2, 9]);

    assert!(device.update_subresource(buffer.handle(), 12, &[0; 8]).is_err());
    let dynamic = Buffer::new(device.clone(), BufferDesc::constant_buffer(16), None);
    assert!(device.update_subresource(dynamic.handle(), 0, &[0; 4]).is_err());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_map_modes_follow_cpu_access() {
    let device = get_test_graphics_device();
    let immutable = device
        .create_buffer(&BufferDesc { usage: ResourceUsage::Immutable, ..BufferDesc::structured::<u32>(4, false, false) }, Some(&[0; 16]))
        .unwrap();
    assert!(device.map_buffer(immutable, MapMode::WriteDiscard).is_err());
    assert!(device.map_buffer(immutable, MapMode::Read).is_err());

    let readback = device.create_buffer(&BufferDesc::readback(16), None).unwrap();
    assert!(device.map_buffer(readback, MapMode::WriteDiscard).is_err());
    assert!(device.map_buffer(readback, MapMode::Read).is_ok());
    device.unmap_buffer(readback);

    device.destroy_buffer(immutable);
    device.destroy_buffer(readback);
}

// ============================================================================
// VIEW AND COUNTER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_buffer_view_validation() {
    let device = get_test_graphics_device();
    let desc = BufferDesc::structured::<u32>(16, false, false);
    let buffer = device.create_buffer(&desc, None).unwrap();

    let srv = BufferViewDesc::derive(&desc, &BufferSubresourceDesc::default(), ViewKind::ReadOnly).unwrap();
    let view = device.create_buffer_view(buffer, &srv).unwrap();

    let uav = BufferViewDesc::derive(&desc, &BufferSubresourceDesc::default(), ViewKind::ReadWrite).unwrap();
    assert!(device.create_buffer_view(buffer, &uav).is_err());

    let past_end = BufferViewDesc { first_element: 10, num_elements: 10, ..srv };
    assert!(device.create_buffer_view(buffer, &past_end).is_err());

    device.destroy_buffer_view(view);
    device.destroy_buffer(buffer);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_initial_count_and_copy_structure_count() {
    let mut ctx = test_context();
    let append = Buffer::new(test_device(), BufferDesc::append(32, 4), None);
    append.create_read_write_view(Some(&BufferSubresourceDesc::with_uav_flags(UavFlags::APPEND)));
    let view = append.uav().unwrap();
    let counts = Buffer::new(test_device(), BufferDesc::indirect_args(16), None);

    // A fresh counter reads zero
    ctx.copy_structure_count(&counts, 0, view);

    ctx.set_shader_resources_rw(0, &[Some(ResourceView::Buffer(view))], Some(&[7]));
    ctx.copy_structure_count(&counts, 4, view);

    // Keeping the counter leaves it untouched
    ctx.set_shader_resources_rw(0, &[Some(ResourceView::Buffer(view))], Some(&[KEEP_COUNTER]));
    ctx.copy_structure_count(&counts, 8, view);
    ctx.unset_shader_resources_rw(0, 1);

    assert_eq!(&words(&read_back(&mut ctx, &counts, 16))[..3], &[0, 7, 7]);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_clear_read_write_uint() {
    let mut ctx = test_context();
    let buffer = Buffer::with_data(test_device(), BufferDesc::structured::<u32>(8, true, false), &[1u32; 8]);
    let view = buffer.uav().unwrap();

    ctx.clear_read_write_uint(ResourceView::Buffer(view), [0xabcd; 4]);
    assert_eq!(words(&read_back(&mut ctx, &buffer, 32)), vec![0xabcd; 8]);
}

// ============================================================================
// TEXTURE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_texture_views_require_bind_flags() {
    let device = get_test_graphics_device();
    let texture = device.create_texture(&TextureDesc::texture_2d(4, 4, Format::R8G8B8A8_UNORM), Some(&[0x7f; 64])).unwrap();

    let desc = |kind| TextureViewDesc { kind, format: Format::R8G8B8A8_UNORM, subresource: TextureSubresourceDesc::default() };
    let srv = device.create_texture_view(texture, &desc(TextureViewKind::ReadOnly)).unwrap();
    assert!(device.create_texture_view(texture, &desc(TextureViewKind::RenderTarget)).is_err());
    assert!(device.create_texture_view(texture, &desc(TextureViewKind::ReadWrite)).is_err());

    device.destroy_texture_view(srv);
    device.destroy_texture(texture);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_texture_rejects_oversized_data() {
    let device = get_test_graphics_device();
    let desc = TextureDesc::texture_2d(2, 2, Format::R8G8B8A8_UNORM);
    assert!(device.create_texture(&desc, Some(&[0; 17])).is_err());

    // Short data is zero padded
    let texture = device.create_texture(&desc, Some(&[0xff; 4])).unwrap();
    device.destroy_texture(texture);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_clear_and_copy_texture() {
    let mut ctx = test_context();
    let desc = TextureDesc::render_target(8, 8, Format::R8G8B8A8_UNORM);
    let src = Texture::new(test_device(), desc, None);
    let dst = Texture::new(test_device(), desc, None);

    ctx.clear_render_target(src.rtv().unwrap(), [1.0, 0.0, 0.0, 1.0]);
    ctx.copy_texture(&dst, &src);
    ctx.wait_for_gpu().unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_render_pass_with_read_only_depth() {
    let mut ctx = test_context();
    let color = Texture::new(test_device(), TextureDesc::render_target(16, 16, Format::R8G8B8A8_UNORM), None);
    let depth = Texture::new(test_device(), TextureDesc::depth_target(16, 16), None);

    ctx.clear_depth(depth.dsv().unwrap(), 1.0, 0, false);
    let pass = RenderPassDesc::new(16, 16)
        .with_color(color.rtv().unwrap(), ColorLoadOp::Clear([0.0, 0.0, 0.0, 1.0]))
        .with_depth(depth.dsv().unwrap(), DepthLoadOp::Load, true);
    ctx.begin_render_pass(&pass);
    assert!(ctx.is_in_render_pass());
    ctx.end_render_pass();
    ctx.wait_for_gpu().unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_generate_mips() {
    let mut ctx = test_context();
    let desc = TextureDesc { mip_levels: 4, ..TextureDesc::render_target(16, 16, Format::R8G8B8A8_UNORM) };
    let texture = Texture::new(test_device(), desc, None);

    ctx.clear_render_target(texture.rtv().unwrap(), [0.5; 4]);
    ctx.generate_mips(texture.srv().unwrap());
    ctx.wait_for_gpu().unwrap();
}

// ============================================================================
// STATE, SHADER AND QUERY TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_create_sampler() {
    let sampler = Sampler::new(test_device(), SamplerDesc::new(Filter::Anisotropic, TextureAddressMode::Clamp));
    assert!(sampler.is_ok());
    let sampler = Sampler::new(test_device(), SamplerDesc { max_lod: f32::MAX, ..SamplerDesc::new(Filter::MinMagMipPoint, TextureAddressMode::Border) });
    assert!(sampler.is_ok());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_invalid_spirv_is_rejected() {
    let device = get_test_graphics_device();
    let desc = ShaderDesc { stage: ShaderStage::Compute, code: &[1, 2, 3, 4, 5, 6, 7, 8], entry_point: "main", name: "garbage" };
    assert!(device.create_shader(&desc).is_err());

    let unaligned = ShaderDesc { code: &[0x03, 0x02, 0x23, 0x07, 0x00], ..desc };
    assert!(device.create_shader(&unaligned).is_err());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_timestamp_queries() {
    let mut ctx = test_context();
    let device = test_device();
    assert!(device.timestamp_frequency() > 0);

    let start = device.create_query(QueryKind::Timestamp).unwrap();
    let end = device.create_query(QueryKind::Timestamp).unwrap();

    // Not written yet
    assert_eq!(ctx.query_data(start).unwrap(), None);

    ctx.end_query(start);
    let buffer = Buffer::new(test_device(), BufferDesc::structured::<u32>(1024, true, false), None);
    ctx.clear_read_write_uint(ResourceView::Buffer(buffer.uav().unwrap()), [3; 4]);
    ctx.end_query(end);
    ctx.wait_for_gpu().unwrap();

    let start_ticks = ctx.query_data(start).unwrap().unwrap();
    let end_ticks = ctx.query_data(end).unwrap().unwrap();
    assert!(end_ticks >= start_ticks);

    device.destroy_query(start);
    device.destroy_query(end);
}
