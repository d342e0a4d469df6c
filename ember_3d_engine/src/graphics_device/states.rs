/// Fixed-function pipeline state descriptors and well-known presets

use bitflags::bitflags;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use crate::graphics_device::Format;

// ===== ENUMS =====

/// Primitive topology for draw calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    Undefined,
    TriangleList,
    TriangleStrip,
    PointList,
    LineList,
    LineStrip,
    /// Tessellation patch list with 1..=32 control points
    PatchList(u8),
}

impl PrimitiveTopology {
    /// Patch list with `control_points` control points
    pub fn patch_list(control_points: u8) -> Self {
        debug_assert!((1..=32).contains(&control_points), "invalid patch control point count {}", control_points);
        PrimitiveTopology::PatchList(control_points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ComparisonFunc {
    #[default]
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DepthWriteMask {
    Zero,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Blend {
    Zero,
    #[default]
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    SrcAlphaSat,
    BlendFactor,
    InvBlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FillMode {
    Wireframe,
    #[default]
    Solid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

bitflags! {
    /// Render target channels written by the output merger
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ColorWrite: u8 {
        const RED = 0x1;
        const GREEN = 0x2;
        const BLUE = 0x4;
        const ALPHA = 0x8;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

impl Default for ColorWrite {
    fn default() -> Self {
        ColorWrite::ALL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TextureAddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
    MirrorOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Filter {
    MinMagMipPoint,
    MinMagPointMipLinear,
    MinMagLinearMipPoint,
    #[default]
    MinMagMipLinear,
    Anisotropic,
    ComparisonMinMagMipPoint,
    ComparisonMinMagMipLinear,
    ComparisonAnisotropic,
}

impl Filter {
    /// True for comparison (shadow) filters
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Filter::ComparisonMinMagMipPoint | Filter::ComparisonMinMagMipLinear | Filter::ComparisonAnisotropic
        )
    }
}

// Float fields are compared and hashed through their bit patterns so every
// state descriptor can key a hash map and be totally ordered.
macro_rules! impl_bitwise_key {
    ($ty:ty) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.key() == other.key()
            }
        }
        impl Eq for $ty {}
        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> Ordering {
                self.key().cmp(&other.key())
            }
        }
        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.key().hash(state);
            }
        }
    };
}

// ===== RASTERIZER =====

#[derive(Debug, Clone, Copy)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
    pub multisample_enable: bool,
    pub antialiased_line_enable: bool,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: true,
            scissor_enable: false,
            multisample_enable: false,
            antialiased_line_enable: false,
        }
    }
}

impl RasterizerDesc {
    #[allow(clippy::type_complexity)]
    fn key(&self) -> (FillMode, CullMode, bool, i32, u32, u32, bool, bool, bool, bool) {
        (
            self.fill_mode,
            self.cull_mode,
            self.front_counter_clockwise,
            self.depth_bias,
            self.depth_bias_clamp.to_bits(),
            self.slope_scaled_depth_bias.to_bits(),
            self.depth_clip_enable,
            self.scissor_enable,
            self.multisample_enable,
            self.antialiased_line_enable,
        )
    }

    /// No culling
    pub fn cull_none() -> Self {
        Self { cull_mode: CullMode::None, multisample_enable: true, ..Default::default() }
    }

    /// Cull clockwise (front) faces
    pub fn cull_clockwise() -> Self {
        Self { cull_mode: CullMode::Front, multisample_enable: true, ..Default::default() }
    }

    /// Cull counter-clockwise (back) faces
    pub fn cull_counter_clockwise() -> Self {
        Self { cull_mode: CullMode::Back, multisample_enable: true, ..Default::default() }
    }

    /// Wireframe, no culling
    pub fn wireframe() -> Self {
        Self {
            fill_mode: FillMode::Wireframe,
            cull_mode: CullMode::None,
            multisample_enable: true,
            ..Default::default()
        }
    }
}

impl_bitwise_key!(RasterizerDesc);

// ===== DEPTH STENCIL =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StencilFaceDesc {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub func: ComparisonFunc,
}

impl Default for StencilFaceDesc {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            func: ComparisonFunc::Always,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write_mask: DepthWriteMask,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_face: StencilFaceDesc,
    pub back_face: StencilFaceDesc,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write_mask: DepthWriteMask::All,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            front_face: StencilFaceDesc::default(),
            back_face: StencilFaceDesc::default(),
        }
    }
}

impl DepthStencilDesc {
    /// Depth test and write disabled
    pub fn no_depth() -> Self {
        Self {
            depth_enable: false,
            depth_write_mask: DepthWriteMask::Zero,
            depth_func: ComparisonFunc::LessEqual,
            ..Default::default()
        }
    }

    /// Depth test and write enabled
    pub fn default_depth() -> Self {
        Self {
            depth_enable: true,
            depth_write_mask: DepthWriteMask::All,
            depth_func: ComparisonFunc::LessEqual,
            ..Default::default()
        }
    }

    /// Depth test enabled, write disabled
    pub fn read_only_depth() -> Self {
        Self {
            depth_enable: true,
            depth_write_mask: DepthWriteMask::Zero,
            depth_func: ComparisonFunc::LessEqual,
            ..Default::default()
        }
    }
}

// ===== BLEND =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderTargetBlendDesc {
    pub blend_enable: bool,
    pub src_blend: Blend,
    pub dest_blend: Blend,
    pub blend_op: BlendOp,
    pub src_blend_alpha: Blend,
    pub dest_blend_alpha: Blend,
    pub blend_op_alpha: BlendOp,
    pub write_mask: ColorWrite,
}

impl Default for RenderTargetBlendDesc {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_blend: Blend::One,
            dest_blend: Blend::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: Blend::One,
            dest_blend_alpha: Blend::Zero,
            blend_op_alpha: BlendOp::Add,
            write_mask: ColorWrite::ALL,
        }
    }
}

/// Maximum number of simultaneously bound render targets
pub const MAX_RENDER_TARGETS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlendDesc {
    pub alpha_to_coverage_enable: bool,
    pub independent_blend_enable: bool,
    pub render_target: [RenderTargetBlendDesc; MAX_RENDER_TARGETS],
}

impl BlendDesc {
    fn with_target0(target: RenderTargetBlendDesc) -> Self {
        let mut desc = Self::default();
        desc.render_target[0] = target;
        desc
    }

    /// Blending disabled
    pub fn opaque() -> Self {
        Self::default()
    }

    /// Classic alpha blending (src_alpha, 1 - src_alpha)
    pub fn alpha_blend() -> Self {
        Self::with_target0(RenderTargetBlendDesc {
            blend_enable: true,
            src_blend: Blend::SrcAlpha,
            dest_blend: Blend::InvSrcAlpha,
            blend_op: BlendOp::Add,
            src_blend_alpha: Blend::One,
            dest_blend_alpha: Blend::InvSrcAlpha,
            blend_op_alpha: BlendOp::Add,
            write_mask: ColorWrite::ALL,
        })
    }

    /// Additive blending (one, one)
    pub fn additive() -> Self {
        Self::with_target0(RenderTargetBlendDesc {
            blend_enable: true,
            src_blend: Blend::One,
            dest_blend: Blend::One,
            blend_op: BlendOp::Add,
            src_blend_alpha: Blend::One,
            dest_blend_alpha: Blend::One,
            blend_op_alpha: BlendOp::Add,
            write_mask: ColorWrite::ALL,
        })
    }
}

// ===== SAMPLER =====

#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address_u: TextureAddressMode,
    pub address_v: TextureAddressMode,
    pub address_w: TextureAddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: ComparisonFunc,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self::new(Filter::MinMagMipLinear, TextureAddressMode::Wrap)
    }
}

impl SamplerDesc {
    /// Sampler with one filter and the same address mode on every axis
    pub fn new(filter: Filter, address_mode: TextureAddressMode) -> Self {
        Self {
            filter,
            address_u: address_mode,
            address_v: address_mode,
            address_w: address_mode,
            mip_lod_bias: 0.0,
            max_anisotropy: 16,
            comparison_func: ComparisonFunc::Never,
            border_color: [0.0; 4],
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }

    #[allow(clippy::type_complexity)]
    fn key(&self) -> (Filter, [TextureAddressMode; 3], u32, u32, ComparisonFunc, [u32; 4], u32, u32) {
        (
            self.filter,
            [self.address_u, self.address_v, self.address_w],
            self.mip_lod_bias.to_bits(),
            self.max_anisotropy,
            self.comparison_func,
            self.border_color.map(f32::to_bits),
            self.min_lod.to_bits(),
            self.max_lod.to_bits(),
        )
    }
}

impl_bitwise_key!(SamplerDesc);

// ===== INPUT LAYOUT =====

/// One vertex attribute of an input layout
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputElementDesc {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: Format,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    /// 0 for per-vertex data, otherwise per-instance step rate
    pub instance_step_rate: u32,
}

/// Vertex input layout
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct InputLayoutDesc {
    pub elements: Vec<InputElementDesc>,
}

#[cfg(test)]
#[path = "states_tests.rs"]
mod tests;
