/// Conversions from engine descriptors to Vulkan enums and flags

use ash::vk;
use ember_3d_engine::ember3d::device::{
    Format, PrimitiveTopology, ComparisonFunc, StencilOp, StencilFaceDesc, Blend, BlendOp,
    FillMode, CullMode, ColorWrite, Filter, TextureAddressMode, ColorLoadOp, DepthLoadOp, StoreOp,
};

pub fn format_to_vk(format: Format) -> vk::Format {
    match format {
        Format::Unknown => vk::Format::UNDEFINED,
        Format::R32_TYPELESS | Format::R32_UINT => vk::Format::R32_UINT,
        Format::R32_SINT => vk::Format::R32_SINT,
        Format::R32_FLOAT => vk::Format::R32_SFLOAT,
        Format::R16_UINT => vk::Format::R16_UINT,
        Format::R16_FLOAT => vk::Format::R16_SFLOAT,
        Format::R32G32_FLOAT => vk::Format::R32G32_SFLOAT,
        Format::R32G32_UINT => vk::Format::R32G32_UINT,
        Format::R16G16_FLOAT => vk::Format::R16G16_SFLOAT,
        Format::R32G32B32_FLOAT => vk::Format::R32G32B32_SFLOAT,
        Format::R32G32B32_UINT => vk::Format::R32G32B32_UINT,
        Format::R32G32B32A32_FLOAT => vk::Format::R32G32B32A32_SFLOAT,
        Format::R32G32B32A32_UINT => vk::Format::R32G32B32A32_UINT,
        Format::R16G16B16A16_FLOAT => vk::Format::R16G16B16A16_SFLOAT,
        Format::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8_UNORM_SRGB => vk::Format::R8G8B8A8_SRGB,
        Format::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
        Format::R10G10B10A2_UNORM => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::R11G11B10_FLOAT => vk::Format::B10G11R11_UFLOAT_PACK32,
        Format::D16_UNORM => vk::Format::D16_UNORM,
        Format::D32_FLOAT => vk::Format::D32_SFLOAT,
        Format::D24_UNORM_S8_UINT => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Aspects of an image of `format`
pub fn aspect_flags(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn index_type(format: Format) -> vk::IndexType {
    match format {
        Format::R16_UINT => vk::IndexType::UINT16,
        _ => vk::IndexType::UINT32,
    }
}

/// Primitive topology and patch control point count
pub fn topology_to_vk(topology: PrimitiveTopology) -> (vk::PrimitiveTopology, u32) {
    match topology {
        PrimitiveTopology::Undefined | PrimitiveTopology::TriangleList => (vk::PrimitiveTopology::TRIANGLE_LIST, 0),
        PrimitiveTopology::TriangleStrip => (vk::PrimitiveTopology::TRIANGLE_STRIP, 0),
        PrimitiveTopology::PointList => (vk::PrimitiveTopology::POINT_LIST, 0),
        PrimitiveTopology::LineList => (vk::PrimitiveTopology::LINE_LIST, 0),
        PrimitiveTopology::LineStrip => (vk::PrimitiveTopology::LINE_STRIP, 0),
        PrimitiveTopology::PatchList(points) => (vk::PrimitiveTopology::PATCH_LIST, points as u32),
    }
}

pub fn compare_op_to_vk(func: ComparisonFunc) -> vk::CompareOp {
    match func {
        ComparisonFunc::Never => vk::CompareOp::NEVER,
        ComparisonFunc::Less => vk::CompareOp::LESS,
        ComparisonFunc::Equal => vk::CompareOp::EQUAL,
        ComparisonFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        ComparisonFunc::Greater => vk::CompareOp::GREATER,
        ComparisonFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
        ComparisonFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        ComparisonFunc::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn stencil_op_to_vk(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrSat => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrSat => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::Incr => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::Decr => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub fn stencil_face_to_vk(face: &StencilFaceDesc, read_mask: u8, write_mask: u8) -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: stencil_op_to_vk(face.fail_op),
        pass_op: stencil_op_to_vk(face.pass_op),
        depth_fail_op: stencil_op_to_vk(face.depth_fail_op),
        compare_op: compare_op_to_vk(face.func),
        compare_mask: read_mask as u32,
        write_mask: write_mask as u32,
        reference: 0,
    }
}

pub fn blend_factor_to_vk(blend: Blend) -> vk::BlendFactor {
    match blend {
        Blend::Zero => vk::BlendFactor::ZERO,
        Blend::One => vk::BlendFactor::ONE,
        Blend::SrcColor => vk::BlendFactor::SRC_COLOR,
        Blend::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        Blend::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        Blend::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        Blend::DestAlpha => vk::BlendFactor::DST_ALPHA,
        Blend::InvDestAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        Blend::DestColor => vk::BlendFactor::DST_COLOR,
        Blend::InvDestColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        Blend::SrcAlphaSat => vk::BlendFactor::SRC_ALPHA_SATURATE,
        Blend::BlendFactor => vk::BlendFactor::CONSTANT_COLOR,
        Blend::InvBlendFactor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
    }
}

pub fn blend_op_to_vk(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::RevSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn color_write_to_vk(mask: ColorWrite) -> vk::ColorComponentFlags {
    let mut flags = vk::ColorComponentFlags::empty();
    if mask.contains(ColorWrite::RED) {
        flags |= vk::ColorComponentFlags::R;
    }
    if mask.contains(ColorWrite::GREEN) {
        flags |= vk::ColorComponentFlags::G;
    }
    if mask.contains(ColorWrite::BLUE) {
        flags |= vk::ColorComponentFlags::B;
    }
    if mask.contains(ColorWrite::ALPHA) {
        flags |= vk::ColorComponentFlags::A;
    }
    flags
}

pub fn polygon_mode_to_vk(mode: FillMode) -> vk::PolygonMode {
    match mode {
        FillMode::Wireframe => vk::PolygonMode::LINE,
        FillMode::Solid => vk::PolygonMode::FILL,
    }
}

pub fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

/// Front face as seen after the Y flip applied by the viewport
pub fn front_face_to_vk(front_counter_clockwise: bool) -> vk::FrontFace {
    if front_counter_clockwise {
        vk::FrontFace::COUNTER_CLOCKWISE
    } else {
        vk::FrontFace::CLOCKWISE
    }
}

pub fn address_mode_to_vk(mode: TextureAddressMode) -> vk::SamplerAddressMode {
    match mode {
        TextureAddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
        TextureAddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
        TextureAddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        TextureAddressMode::Border => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        TextureAddressMode::MirrorOnce => vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE,
    }
}

/// Filter split into (mag, min, mip mode, anisotropic)
pub fn filter_to_vk(filter: Filter) -> (vk::Filter, vk::Filter, vk::SamplerMipmapMode, bool) {
    use vk::Filter as F;
    use vk::SamplerMipmapMode as M;
    match filter {
        Filter::MinMagMipPoint | Filter::ComparisonMinMagMipPoint => (F::NEAREST, F::NEAREST, M::NEAREST, false),
        Filter::MinMagPointMipLinear => (F::NEAREST, F::NEAREST, M::LINEAR, false),
        Filter::MinMagLinearMipPoint => (F::LINEAR, F::LINEAR, M::NEAREST, false),
        Filter::MinMagMipLinear | Filter::ComparisonMinMagMipLinear => (F::LINEAR, F::LINEAR, M::LINEAR, false),
        Filter::Anisotropic | Filter::ComparisonAnisotropic => (F::LINEAR, F::LINEAR, M::LINEAR, true),
    }
}

/// Border color closest to an RGBA value (Vulkan only has three fixed borders)
pub fn border_color_to_vk(color: [f32; 4]) -> vk::BorderColor {
    if color[3] < 0.5 {
        vk::BorderColor::FLOAT_TRANSPARENT_BLACK
    } else if color[0] + color[1] + color[2] < 1.5 {
        vk::BorderColor::FLOAT_OPAQUE_BLACK
    } else {
        vk::BorderColor::FLOAT_OPAQUE_WHITE
    }
}

pub fn color_load_op_to_vk(op: ColorLoadOp) -> (vk::AttachmentLoadOp, vk::ClearValue) {
    match op {
        ColorLoadOp::Load => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
        ColorLoadOp::Clear(color) => (
            vk::AttachmentLoadOp::CLEAR,
            vk::ClearValue { color: vk::ClearColorValue { float32: color } },
        ),
        ColorLoadOp::DontCare => (vk::AttachmentLoadOp::DONT_CARE, vk::ClearValue::default()),
    }
}

pub fn depth_load_op_to_vk(op: DepthLoadOp) -> (vk::AttachmentLoadOp, vk::ClearValue) {
    match op {
        DepthLoadOp::Load => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
        DepthLoadOp::Clear { depth, stencil } => (
            vk::AttachmentLoadOp::CLEAR,
            vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth, stencil: stencil as u32 } },
        ),
        DepthLoadOp::DontCare => (vk::AttachmentLoadOp::DONT_CARE, vk::ClearValue::default()),
    }
}

pub fn store_op_to_vk(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

#[cfg(test)]
#[path = "vulkan_format_tests.rs"]
mod tests;
