/// Buffer - Vulkan buffer with usage-dependent memory placement
///
/// - Default / Immutable: GPU-only memory, filled through staging copies
/// - Dynamic: a ring of host-visible versions; each write-discard map moves to
///   the next version so the GPU keeps reading the previous ones
/// - Staging: host-visible memory mapped for the buffer's whole lifetime

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use ember_3d_engine::ember3d::{Error, Result};
use ember_3d_engine::ember3d::device::{
    BufferDesc, BufferViewDesc, BufferHandle, ResourceUsage, CpuAccess, BindFlags, BufferMiscFlags, Format,
};
use ember_3d_engine::{engine_err, engine_error};
use crate::vulkan_context::GpuContext;
use crate::vulkan_format::format_to_vk;

const SOURCE: &str = "ember3d::vulkan";

/// Versions of a dynamic buffer usable before the device must wait for the GPU
pub const DYNAMIC_BUFFER_VERSIONS: u32 = 64;

/// Create a buffer and bind freshly allocated memory to it
pub fn allocate_buffer(
    ctx: &GpuContext,
    size: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    name: &str,
) -> Result<(vk::Buffer, Allocation)> {
    unsafe {
        let buffer_create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = ctx.device.create_buffer(&buffer_create_info, None)
            .map_err(|e| engine_err!(SOURCE, "Failed to create buffer of size {} bytes: {:?}", size, e))?;

        let requirements = ctx.device.get_buffer_memory_requirements(buffer);
        let allocation = match ctx.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(_) => {
                ctx.device.destroy_buffer(buffer, None);
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                engine_error!(SOURCE, "Out of GPU memory for buffer '{}' (required: {:.2} MB)", name, size_mb);
                return Err(Error::OutOfMemory);
            }
        };

        if let Err(e) = ctx.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
            ctx.device.destroy_buffer(buffer, None);
            ctx.allocator().free(allocation).ok();
            return Err(engine_err!(SOURCE, "Failed to bind buffer memory: {:?}", e));
        }

        Ok((buffer, allocation))
    }
}

/// Vulkan usage flags for a buffer description
pub fn buffer_usage(desc: &BufferDesc) -> vk::BufferUsageFlags {
    let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    let bind = desc.bind_flags;
    if bind.contains(BindFlags::VERTEX_BUFFER) {
        usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if bind.contains(BindFlags::INDEX_BUFFER) {
        usage |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if bind.contains(BindFlags::CONSTANT_BUFFER) {
        usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if bind.contains(BindFlags::SHADER_RESOURCE) {
        usage |= vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER;
    }
    if bind.contains(BindFlags::UNORDERED_ACCESS) {
        usage |= vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
    }
    if desc.misc_flags.contains(BufferMiscFlags::INDIRECT_ARGS) {
        usage |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    usage
}

/// Memory location for a buffer description
pub fn memory_location(desc: &BufferDesc) -> MemoryLocation {
    match desc.usage {
        ResourceUsage::Default | ResourceUsage::Immutable => MemoryLocation::GpuOnly,
        ResourceUsage::Dynamic => MemoryLocation::CpuToGpu,
        ResourceUsage::Staging if desc.cpu_access.contains(CpuAccess::READ) => MemoryLocation::GpuToCpu,
        ResourceUsage::Staging => MemoryLocation::CpuToGpu,
    }
}

/// Whether a view of `format` needs a texel buffer view (typed buffer)
pub fn is_typed_view(format: Format) -> bool {
    !matches!(format, Format::Unknown | Format::R32_TYPELESS)
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

pub struct VulkanBuffer {
    pub desc: BufferDesc,
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    /// Distance between versions (the buffer size unless dynamic)
    pub version_stride: u64,
    pub version_count: u32,
    pub current_version: u32,
    /// Versions handed out during submission `renamed_in`
    pub renames: u32,
    pub renamed_in: u64,
    pub mapped: bool,
}

impl VulkanBuffer {
    pub fn new(ctx: &GpuContext, desc: &BufferDesc) -> Result<Self> {
        let (version_stride, version_count) = if desc.usage == ResourceUsage::Dynamic {
            (align_up(desc.size, ctx.dynamic_offset_alignment), DYNAMIC_BUFFER_VERSIONS)
        } else {
            (desc.size, 1)
        };
        let (buffer, allocation) = allocate_buffer(
            ctx,
            version_stride * version_count as u64,
            buffer_usage(desc),
            memory_location(desc),
            "buffer",
        )?;
        Ok(Self {
            desc: *desc,
            buffer,
            allocation: Some(allocation),
            version_stride,
            version_count,
            current_version: 0,
            renames: 0,
            renamed_in: 0,
            mapped: false,
        })
    }

    /// Byte offset of the version the GPU reads now
    pub fn base_offset(&self) -> u64 {
        self.current_version as u64 * self.version_stride
    }

    pub fn is_host_visible(&self) -> bool {
        self.desc.usage == ResourceUsage::Dynamic || self.desc.usage == ResourceUsage::Staging
    }

    /// Host pointer to the current version
    pub fn mapped_ptr(&self) -> Option<std::ptr::NonNull<u8>> {
        let base = self.allocation.as_ref()?.mapped_ptr()?.cast::<u8>();
        // Every version lies inside the allocation.
        std::ptr::NonNull::new(unsafe { base.as_ptr().add(self.base_offset() as usize) })
    }

    /// Move to a fresh version for a write-discard map
    ///
    /// # Returns
    ///
    /// false when every version was already handed out in `pending_submission`;
    /// the caller must wait for the GPU and call again.
    pub fn rename(&mut self, pending_submission: u64) -> bool {
        if self.renamed_in != pending_submission {
            self.renamed_in = pending_submission;
            self.renames = 0;
        }
        if self.renames + 1 >= self.version_count {
            return false;
        }
        self.renames += 1;
        self.current_version = (self.current_version + 1) % self.version_count;
        true
    }
}

/// Hidden append/consume counter of a read-write view
pub struct HiddenCounter {
    pub buffer: vk::Buffer,
    pub allocation: Allocation,
}

pub struct VulkanBufferView {
    pub buffer: BufferHandle,
    pub desc: BufferViewDesc,
    /// One texel view per buffer version, empty for structured and raw views
    pub texel_views: Vec<vk::BufferView>,
    pub counter: Option<HiddenCounter>,
}

impl VulkanBufferView {
    /// Create the texel views of a typed view over `buffer`
    pub fn create_texel_views(ctx: &GpuContext, buffer: &VulkanBuffer, desc: &BufferViewDesc) -> Result<Vec<vk::BufferView>> {
        if !is_typed_view(desc.format) {
            return Ok(Vec::new());
        }
        let mut views = Vec::with_capacity(buffer.version_count as usize);
        for version in 0..buffer.version_count {
            let info = vk::BufferViewCreateInfo::default()
                .buffer(buffer.buffer)
                .format(format_to_vk(desc.format))
                .offset(version as u64 * buffer.version_stride + desc.byte_offset())
                .range(desc.byte_size());
            match unsafe { ctx.device.create_buffer_view(&info, None) } {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views {
                        unsafe { ctx.device.destroy_buffer_view(view, None) };
                    }
                    return Err(engine_err!(SOURCE, "Failed to create {:?} texel view: {:?}", desc.format, e));
                }
            }
        }
        Ok(views)
    }

    /// Texel view matching the buffer's current version
    pub fn texel_view(&self, buffer: &VulkanBuffer) -> Option<vk::BufferView> {
        self.texel_views.get(buffer.current_version as usize).copied()
    }
}

#[cfg(test)]
#[path = "vulkan_buffer_tests.rs"]
mod tests;
