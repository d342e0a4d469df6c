/// Resource descriptors - value types describing buffers, textures and their views
///
/// Every descriptor is plain data with equality, ordering and hashing so it can
/// key caches and deduplicate creation requests.

use bitflags::bitflags;
use crate::graphics_device::Format;

// ===== USAGE / ACCESS / BIND FLAGS =====

/// How a resource's memory is used by CPU and GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ResourceUsage {
    /// GPU read/write, CPU updates through subresource updates
    #[default]
    Default,
    /// GPU read-only, contents fixed at creation
    Immutable,
    /// CPU write-discard every frame, GPU read
    Dynamic,
    /// CPU readback / upload staging
    Staging,
}

bitflags! {
    /// CPU access to a resource
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct CpuAccess: u8 {
        const READ = 0x1;
        const WRITE = 0x2;
    }
}

bitflags! {
    /// Pipeline stages/roles a resource can be bound to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct BindFlags: u16 {
        const VERTEX_BUFFER = 0x001;
        const INDEX_BUFFER = 0x002;
        const CONSTANT_BUFFER = 0x004;
        const SHADER_RESOURCE = 0x008;
        const UNORDERED_ACCESS = 0x010;
        const RENDER_TARGET = 0x020;
        const DEPTH_STENCIL = 0x040;
    }
}

bitflags! {
    /// Buffer layout flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct BufferMiscFlags: u8 {
        const STRUCTURED = 0x1;
        const RAW = 0x2;
        const INDIRECT_ARGS = 0x4;
    }
}

bitflags! {
    /// Flags of a read-write buffer view
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct UavFlags: u8 {
        const RAW = 0x1;
        const APPEND = 0x2;
        const COUNTER = 0x4;
    }
}

impl UavFlags {
    /// True if the view carries a hidden append/consume counter
    pub fn has_counter(self) -> bool {
        self.intersects(UavFlags::APPEND | UavFlags::COUNTER)
    }
}

// ===== BUFFER DESC =====

/// Description of a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    pub usage: ResourceUsage,
    pub cpu_access: CpuAccess,
    pub bind_flags: BindFlags,
    pub misc_flags: BufferMiscFlags,
    /// Element size in bytes (0 if the buffer has no element structure)
    pub stride: u32,
    /// Element format for typed buffers
    pub format: Format,
}

impl BufferDesc {
    /// Immutable vertex buffer of `vertex_count` elements of `stride` bytes
    pub fn vertex_buffer(vertex_count: u64, stride: u32) -> Self {
        Self {
            size: vertex_count * stride as u64,
            usage: ResourceUsage::Immutable,
            bind_flags: BindFlags::VERTEX_BUFFER,
            stride,
            ..Default::default()
        }
    }

    /// Immutable index buffer with 16-bit (`small_indices`) or 32-bit indices
    pub fn index_buffer(index_count: u64, small_indices: bool) -> Self {
        let stride = if small_indices { 2 } else { 4 };
        Self {
            size: index_count * stride as u64,
            usage: ResourceUsage::Immutable,
            bind_flags: BindFlags::INDEX_BUFFER,
            stride,
            format: if small_indices { Format::R16_UINT } else { Format::R32_UINT },
            ..Default::default()
        }
    }

    /// Structured buffer of `count` elements of `T`
    ///
    /// # Arguments
    ///
    /// * `count` - Number of elements
    /// * `uav` - Also bindable as a read-write view
    /// * `dynamic` - CPU write-discard buffer (ignored when `uav` is set)
    pub fn structured<T>(count: u64, uav: bool, dynamic: bool) -> Self {
        let stride = std::mem::size_of::<T>() as u32;
        let mut bind_flags = BindFlags::SHADER_RESOURCE;
        if uav {
            bind_flags |= BindFlags::UNORDERED_ACCESS;
        }
        let dynamic = dynamic && !uav;
        Self {
            size: count * stride as u64,
            usage: if dynamic { ResourceUsage::Dynamic } else { ResourceUsage::Default },
            cpu_access: if dynamic { CpuAccess::WRITE } else { CpuAccess::empty() },
            bind_flags,
            misc_flags: BufferMiscFlags::STRUCTURED,
            stride,
            format: Format::Unknown,
        }
    }

    /// Structured buffer meant for append/consume views
    pub fn append(count: u64, stride: u32) -> Self {
        Self {
            size: count * stride as u64,
            usage: ResourceUsage::Default,
            bind_flags: BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS,
            misc_flags: BufferMiscFlags::STRUCTURED,
            stride,
            ..Default::default()
        }
    }

    /// Buffer holding indirect draw/dispatch arguments, `size` bytes
    pub fn indirect_args(size: u64) -> Self {
        Self {
            size,
            usage: ResourceUsage::Default,
            bind_flags: BindFlags::UNORDERED_ACCESS,
            misc_flags: BufferMiscFlags::INDIRECT_ARGS,
            stride: 4,
            format: Format::R32_UINT,
            ..Default::default()
        }
    }

    /// CPU-writable constant buffer, size rounded up to 16 bytes
    pub fn constant_buffer(size: u64) -> Self {
        Self {
            size: (size + 15) & !15,
            usage: ResourceUsage::Dynamic,
            cpu_access: CpuAccess::WRITE,
            bind_flags: BindFlags::CONSTANT_BUFFER,
            ..Default::default()
        }
    }

    /// Constant buffer updated from the GPU (e.g. through CopyStructureCount)
    pub fn gpu_constant_buffer(size: u64) -> Self {
        Self {
            size: (size + 15) & !15,
            usage: ResourceUsage::Default,
            bind_flags: BindFlags::CONSTANT_BUFFER,
            ..Default::default()
        }
    }

    /// Staging buffer the CPU reads back
    pub fn readback(size: u64) -> Self {
        Self {
            size,
            usage: ResourceUsage::Staging,
            cpu_access: CpuAccess::READ,
            ..Default::default()
        }
    }
}

// ===== VIEWS =====

/// Kind of view: read-only (shader resource) or read-write (unordered access)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViewKind {
    ReadOnly,
    ReadWrite,
}

/// Byte range and flags of a buffer view, as requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferSubresourceDesc {
    pub offset: u64,
    /// Size in bytes, `u64::MAX` for "rest of buffer"
    pub size: u64,
    pub uav_flags: UavFlags,
}

impl Default for BufferSubresourceDesc {
    fn default() -> Self {
        Self { offset: 0, size: u64::MAX, uav_flags: UavFlags::empty() }
    }
}

impl BufferSubresourceDesc {
    /// Whole buffer with the given read-write flags
    pub fn with_uav_flags(uav_flags: UavFlags) -> Self {
        Self { uav_flags, ..Default::default() }
    }
}

/// Native view description derived from a buffer and a subresource request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferViewDesc {
    pub kind: ViewKind,
    /// Element format; `R32_TYPELESS` for raw views, `Unknown` for structured views
    pub format: Format,
    pub first_element: u64,
    pub num_elements: u64,
    /// Size of one element in bytes
    pub element_size: u32,
    pub uav_flags: UavFlags,
}

impl BufferViewDesc {
    /// Derive the native view description
    ///
    /// - raw buffers: typeless 32-bit elements
    /// - structured buffers: elements of `stride` bytes
    /// - indirect-args read-write views: R32_UINT
    /// - otherwise: typed by the buffer format
    ///
    /// # Returns
    ///
    /// None if the element size resolves to zero (unknown format, no stride)
    pub fn derive(buffer: &BufferDesc, sub: &BufferSubresourceDesc, kind: ViewKind) -> Option<Self> {
        let is_raw = buffer.misc_flags.contains(BufferMiscFlags::RAW)
            || (kind == ViewKind::ReadWrite && sub.uav_flags.contains(UavFlags::RAW));

        let (format, element_size) = if is_raw {
            (Format::R32_TYPELESS, 4)
        } else if buffer.misc_flags.contains(BufferMiscFlags::STRUCTURED) {
            (Format::Unknown, buffer.stride)
        } else if kind == ViewKind::ReadWrite && buffer.misc_flags.contains(BufferMiscFlags::INDIRECT_ARGS) {
            (Format::R32_UINT, 4)
        } else {
            (buffer.format, buffer.format.stride())
        };

        if element_size == 0 || sub.offset > buffer.size {
            return None;
        }

        let bytes = sub.size.min(buffer.size - sub.offset);
        let uav_flags = match kind {
            ViewKind::ReadOnly => UavFlags::empty(),
            ViewKind::ReadWrite => sub.uav_flags,
        };

        Some(Self {
            kind,
            format,
            first_element: sub.offset / element_size as u64,
            num_elements: bytes / element_size as u64,
            element_size,
            uav_flags,
        })
    }

    /// Byte offset of the first element
    pub fn byte_offset(&self) -> u64 {
        self.first_element * self.element_size as u64
    }

    /// Byte size covered by the view
    pub fn byte_size(&self) -> u64 {
        self.num_elements * self.element_size as u64
    }
}

// ===== TEXTURES =====

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TextureType {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
}

bitflags! {
    /// Texture creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct TextureMiscFlags: u8 {
        const GENERATE_MIPS = 0x1;
        const TEXTURE_CUBE = 0x2;
    }
}

/// Description of a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureDesc {
    pub texture_type: TextureType,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_size: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub usage: ResourceUsage,
    pub bind_flags: BindFlags,
    pub cpu_access: CpuAccess,
    pub misc_flags: TextureMiscFlags,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            texture_type: TextureType::Texture2D,
            width: 1,
            height: 1,
            depth: 1,
            array_size: 1,
            mip_levels: 1,
            format: Format::R8G8B8A8_UNORM,
            usage: ResourceUsage::Default,
            bind_flags: BindFlags::SHADER_RESOURCE,
            cpu_access: CpuAccess::empty(),
            misc_flags: TextureMiscFlags::empty(),
        }
    }
}

impl TextureDesc {
    /// 2D shader-resource texture
    pub fn texture_2d(width: u32, height: u32, format: Format) -> Self {
        Self { width, height, format, ..Default::default() }
    }

    /// 2D depth target also readable as a shader resource
    pub fn depth_target(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: Format::D32_FLOAT,
            bind_flags: BindFlags::DEPTH_STENCIL | BindFlags::SHADER_RESOURCE,
            ..Default::default()
        }
    }

    /// 2D color target also readable as a shader resource
    pub fn render_target(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            format,
            bind_flags: BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
            ..Default::default()
        }
    }

    /// Size in bytes of mip 0 of one slice
    pub fn top_mip_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth.max(1) as u64 * self.format.stride() as u64
    }
}

/// Kind of texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TextureViewKind {
    ReadOnly,
    ReadWrite,
    RenderTarget,
    DepthStencil,
}

/// Subresource range of a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureSubresourceDesc {
    pub first_mip: u32,
    /// Mip count, `u32::MAX` for "all remaining mips"
    pub mip_count: u32,
    pub first_slice: u32,
    /// Slice count, `u32::MAX` for "all remaining slices"
    pub slice_count: u32,
}

impl Default for TextureSubresourceDesc {
    fn default() -> Self {
        Self { first_mip: 0, mip_count: u32::MAX, first_slice: 0, slice_count: u32::MAX }
    }
}

/// Native texture view description
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureViewDesc {
    pub kind: TextureViewKind,
    pub format: Format,
    pub subresource: TextureSubresourceDesc,
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
