/// Element and texel formats shared by buffers, views and textures

/// Data format of a buffer element, texel or vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[allow(non_camel_case_types)]
pub enum Format {
    #[default]
    Unknown,
    // 32-bit single channel
    R32_TYPELESS,
    R32_UINT,
    R32_SINT,
    R32_FLOAT,
    // 16-bit single channel
    R16_UINT,
    R16_FLOAT,
    // Two channels
    R32G32_FLOAT,
    R32G32_UINT,
    R16G16_FLOAT,
    // Three channels
    R32G32B32_FLOAT,
    R32G32B32_UINT,
    // Four channels
    R32G32B32A32_FLOAT,
    R32G32B32A32_UINT,
    R16G16B16A16_FLOAT,
    R8G8B8A8_UNORM,
    R8G8B8A8_UNORM_SRGB,
    B8G8R8A8_UNORM,
    R10G10B10A2_UNORM,
    R11G11B10_FLOAT,
    // Depth
    D16_UNORM,
    D32_FLOAT,
    D24_UNORM_S8_UINT,
}

impl Format {
    /// Size in bytes of one element/texel, or 0 for `Unknown`
    pub fn stride(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R16_UINT | Format::R16_FLOAT | Format::D16_UNORM => 2,
            Format::R32_TYPELESS
            | Format::R32_UINT
            | Format::R32_SINT
            | Format::R32_FLOAT
            | Format::R16G16_FLOAT
            | Format::R8G8B8A8_UNORM
            | Format::R8G8B8A8_UNORM_SRGB
            | Format::B8G8R8A8_UNORM
            | Format::R10G10B10A2_UNORM
            | Format::R11G11B10_FLOAT
            | Format::D32_FLOAT
            | Format::D24_UNORM_S8_UINT => 4,
            Format::R32G32_FLOAT | Format::R32G32_UINT | Format::R16G16B16A16_FLOAT => 8,
            Format::R32G32B32_FLOAT | Format::R32G32B32_UINT => 12,
            Format::R32G32B32A32_FLOAT | Format::R32G32B32A32_UINT => 16,
        }
    }

    /// True for depth (and depth/stencil) formats
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D16_UNORM | Format::D32_FLOAT | Format::D24_UNORM_S8_UINT)
    }

    /// True if the format carries a stencil aspect
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24_UNORM_S8_UINT)
    }

    /// Number of channels
    pub fn channel_count(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R32G32_FLOAT | Format::R32G32_UINT | Format::R16G16_FLOAT => 2,
            Format::R32G32B32_FLOAT | Format::R32G32B32_UINT | Format::R11G11B10_FLOAT => 3,
            Format::R32G32B32A32_FLOAT
            | Format::R32G32B32A32_UINT
            | Format::R16G16B16A16_FLOAT
            | Format::R8G8B8A8_UNORM
            | Format::R8G8B8A8_UNORM_SRGB
            | Format::B8G8R8A8_UNORM
            | Format::R10G10B10A2_UNORM => 4,
            Format::D24_UNORM_S8_UINT => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
#[path = "format_tests.rs"]
mod tests;
