//! Unit tests for Vulkan conversion functions
//!
//! Pure mappings between engine descriptors and Vulkan enums; no GPU needed.

use super::*;

// ============================================================================
// FORMATS
// ============================================================================

#[test]
fn test_float_formats() {
    assert_eq!(format_to_vk(Format::R32_FLOAT), vk::Format::R32_SFLOAT);
    assert_eq!(format_to_vk(Format::R32G32_FLOAT), vk::Format::R32G32_SFLOAT);
    assert_eq!(format_to_vk(Format::R32G32B32_FLOAT), vk::Format::R32G32B32_SFLOAT);
    assert_eq!(format_to_vk(Format::R32G32B32A32_FLOAT), vk::Format::R32G32B32A32_SFLOAT);
    assert_eq!(format_to_vk(Format::R16G16B16A16_FLOAT), vk::Format::R16G16B16A16_SFLOAT);
}

#[test]
fn test_typeless_raw_views_read_as_uint() {
    assert_eq!(format_to_vk(Format::R32_TYPELESS), vk::Format::R32_UINT);
    assert_eq!(format_to_vk(Format::R32_UINT), vk::Format::R32_UINT);
}

#[test]
fn test_packed_formats_swap_component_order() {
    assert_eq!(format_to_vk(Format::R10G10B10A2_UNORM), vk::Format::A2B10G10R10_UNORM_PACK32);
    assert_eq!(format_to_vk(Format::R11G11B10_FLOAT), vk::Format::B10G11R11_UFLOAT_PACK32);
    assert_eq!(format_to_vk(Format::R8G8B8A8_UNORM_SRGB), vk::Format::R8G8B8A8_SRGB);
}

#[test]
fn test_depth_formats_and_aspects() {
    assert_eq!(format_to_vk(Format::D32_FLOAT), vk::Format::D32_SFLOAT);
    assert_eq!(aspect_flags(Format::D32_FLOAT), vk::ImageAspectFlags::DEPTH);
    assert_eq!(
        aspect_flags(Format::D24_UNORM_S8_UINT),
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    );
    assert_eq!(aspect_flags(Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
}

#[test]
fn test_index_types() {
    assert_eq!(index_type(Format::R16_UINT), vk::IndexType::UINT16);
    assert_eq!(index_type(Format::R32_UINT), vk::IndexType::UINT32);
}

// ============================================================================
// PIPELINE STATE
// ============================================================================

#[test]
fn test_topology_with_patch_points() {
    assert_eq!(topology_to_vk(PrimitiveTopology::TriangleList), (vk::PrimitiveTopology::TRIANGLE_LIST, 0));
    assert_eq!(topology_to_vk(PrimitiveTopology::patch_list(3)), (vk::PrimitiveTopology::PATCH_LIST, 3));
}

#[test]
fn test_compare_and_stencil_ops() {
    assert_eq!(compare_op_to_vk(ComparisonFunc::LessEqual), vk::CompareOp::LESS_OR_EQUAL);
    assert_eq!(compare_op_to_vk(ComparisonFunc::GreaterEqual), vk::CompareOp::GREATER_OR_EQUAL);
    assert_eq!(stencil_op_to_vk(StencilOp::IncrSat), vk::StencilOp::INCREMENT_AND_CLAMP);
    assert_eq!(stencil_op_to_vk(StencilOp::Incr), vk::StencilOp::INCREMENT_AND_WRAP);

    let face = stencil_face_to_vk(&StencilFaceDesc::default(), 0x0f, 0xf0);
    assert_eq!(face.compare_op, vk::CompareOp::ALWAYS);
    assert_eq!((face.compare_mask, face.write_mask), (0x0f, 0xf0));
}

#[test]
fn test_blend_factors() {
    assert_eq!(blend_factor_to_vk(Blend::InvSrcAlpha), vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    assert_eq!(blend_factor_to_vk(Blend::BlendFactor), vk::BlendFactor::CONSTANT_COLOR);
    assert_eq!(blend_op_to_vk(BlendOp::RevSubtract), vk::BlendOp::REVERSE_SUBTRACT);
}

#[test]
fn test_color_write_mask() {
    assert_eq!(color_write_to_vk(ColorWrite::ALL), vk::ColorComponentFlags::RGBA);
    assert_eq!(
        color_write_to_vk(ColorWrite::RED | ColorWrite::ALPHA),
        vk::ColorComponentFlags::R | vk::ColorComponentFlags::A
    );
}

#[test]
fn test_rasterizer_modes() {
    assert_eq!(cull_mode_to_vk(CullMode::None), vk::CullModeFlags::NONE);
    assert_eq!(polygon_mode_to_vk(FillMode::Wireframe), vk::PolygonMode::LINE);
    assert_eq!(front_face_to_vk(false), vk::FrontFace::CLOCKWISE);
}

// ============================================================================
// SAMPLERS / ATTACHMENTS
// ============================================================================

#[test]
fn test_sampler_filters() {
    let (mag, min, mip, anisotropic) = filter_to_vk(Filter::MinMagLinearMipPoint);
    assert_eq!((mag, min, mip, anisotropic), (vk::Filter::LINEAR, vk::Filter::LINEAR, vk::SamplerMipmapMode::NEAREST, false));
    assert!(filter_to_vk(Filter::ComparisonAnisotropic).3);
    assert_eq!(address_mode_to_vk(TextureAddressMode::MirrorOnce), vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE);
}

#[test]
fn test_border_colors() {
    assert_eq!(border_color_to_vk([0.0; 4]), vk::BorderColor::FLOAT_TRANSPARENT_BLACK);
    assert_eq!(border_color_to_vk([0.0, 0.0, 0.0, 1.0]), vk::BorderColor::FLOAT_OPAQUE_BLACK);
    assert_eq!(border_color_to_vk([1.0; 4]), vk::BorderColor::FLOAT_OPAQUE_WHITE);
}

#[test]
fn test_load_ops() {
    let (op, clear) = color_load_op_to_vk(ColorLoadOp::Clear([0.25, 0.5, 0.75, 1.0]));
    assert_eq!(op, vk::AttachmentLoadOp::CLEAR);
    assert_eq!(unsafe { clear.color.float32 }, [0.25, 0.5, 0.75, 1.0]);

    let (op, clear) = depth_load_op_to_vk(DepthLoadOp::Clear { depth: 1.0, stencil: 7 });
    assert_eq!(op, vk::AttachmentLoadOp::CLEAR);
    assert_eq!(unsafe { clear.depth_stencil.stencil }, 7);

    assert_eq!(depth_load_op_to_vk(DepthLoadOp::Load).0, vk::AttachmentLoadOp::LOAD);
    assert_eq!(store_op_to_vk(StoreOp::DontCare), vk::AttachmentStoreOp::DONT_CARE);
}
