/// Texture - Vulkan image and its views
///
/// Images live in GENERAL layout for their whole lifetime: they are moved out
/// of UNDEFINED right after creation and every later access (sampling, storage,
/// attachment, transfer) uses GENERAL, so no per-use layout tracking is needed.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use ember_3d_engine::ember3d::{Error, Result};
use ember_3d_engine::ember3d::device::{
    TextureDesc, TextureViewDesc, TextureHandle, TextureType, TextureViewKind, TextureMiscFlags, BindFlags,
};
use ember_3d_engine::{engine_err, engine_error};
use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{format_to_vk, aspect_flags};

const SOURCE: &str = "ember3d::vulkan";

/// Mip levels of a texture; 0 requests the full chain
pub fn mip_count(desc: &TextureDesc) -> u32 {
    if desc.mip_levels > 0 {
        return desc.mip_levels;
    }
    let largest = desc.width.max(desc.height).max(if desc.texture_type == TextureType::Texture3D { desc.depth } else { 1 });
    32 - largest.max(1).leading_zeros()
}

/// Array layers of a texture (1 for volume textures)
pub fn layer_count(desc: &TextureDesc) -> u32 {
    match desc.texture_type {
        TextureType::Texture3D => 1,
        _ => desc.array_size.max(1),
    }
}

pub fn image_usage(desc: &TextureDesc) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    let bind = desc.bind_flags;
    if bind.contains(BindFlags::SHADER_RESOURCE) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if bind.contains(BindFlags::UNORDERED_ACCESS) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    if bind.contains(BindFlags::RENDER_TARGET) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if bind.contains(BindFlags::DEPTH_STENCIL) {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    usage
}

fn image_type(texture_type: TextureType) -> vk::ImageType {
    match texture_type {
        TextureType::Texture1D => vk::ImageType::TYPE_1D,
        TextureType::Texture2D => vk::ImageType::TYPE_2D,
        TextureType::Texture3D => vk::ImageType::TYPE_3D,
    }
}

/// Subresource range a view covers, with "remaining" counts resolved
pub fn view_range(texture: &TextureDesc, view: &TextureViewDesc) -> vk::ImageSubresourceRange {
    let mips = mip_count(texture);
    let layers = layer_count(texture);
    let sub = view.subresource;
    let first_mip = sub.first_mip.min(mips - 1);
    let first_layer = sub.first_slice.min(layers - 1);
    let mut level_count = sub.mip_count.min(mips - first_mip);
    if matches!(view.kind, TextureViewKind::RenderTarget | TextureViewKind::DepthStencil | TextureViewKind::ReadWrite) {
        level_count = 1;
    }
    let mut aspect_mask = aspect_flags(texture.format);
    if view.kind != TextureViewKind::DepthStencil && texture.format.is_depth() {
        // Shaders read the depth aspect only
        aspect_mask = vk::ImageAspectFlags::DEPTH;
    }
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: first_mip,
        level_count,
        base_array_layer: first_layer,
        layer_count: sub.slice_count.min(layers - first_layer),
    }
}

/// Image view type for a view over `texture` covering `layers` slices
pub fn view_type(texture: &TextureDesc, kind: TextureViewKind, layers: u32) -> vk::ImageViewType {
    match texture.texture_type {
        TextureType::Texture1D if layers > 1 => vk::ImageViewType::TYPE_1D_ARRAY,
        TextureType::Texture1D => vk::ImageViewType::TYPE_1D,
        TextureType::Texture3D => vk::ImageViewType::TYPE_3D,
        TextureType::Texture2D => {
            let cube = texture.misc_flags.contains(TextureMiscFlags::TEXTURE_CUBE)
                && kind == TextureViewKind::ReadOnly
                && layers % 6 == 0;
            match (cube, layers) {
                (true, 6) => vk::ImageViewType::CUBE,
                (true, _) => vk::ImageViewType::CUBE_ARRAY,
                (false, 1) => vk::ImageViewType::TYPE_2D,
                (false, _) => vk::ImageViewType::TYPE_2D_ARRAY,
            }
        }
    }
}

pub struct VulkanTexture {
    pub desc: TextureDesc,
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub mip_levels: u32,
    pub layers: u32,
}

impl VulkanTexture {
    pub fn new(ctx: &GpuContext, desc: &TextureDesc) -> Result<Self> {
        let mip_levels = mip_count(desc);
        let layers = layer_count(desc);
        let mut flags = vk::ImageCreateFlags::empty();
        if desc.misc_flags.contains(TextureMiscFlags::TEXTURE_CUBE) {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        unsafe {
            let image_create_info = vk::ImageCreateInfo::default()
                .flags(flags)
                .image_type(image_type(desc.texture_type))
                .format(format_to_vk(desc.format))
                .extent(vk::Extent3D {
                    width: desc.width,
                    height: desc.height.max(1),
                    depth: if desc.texture_type == TextureType::Texture3D { desc.depth.max(1) } else { 1 },
                })
                .mip_levels(mip_levels)
                .array_layers(layers)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(image_usage(desc))
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = ctx.device.create_image(&image_create_info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create {}x{} {:?} image: {:?}", desc.width, desc.height, desc.format, e))?;

            let requirements = ctx.device.get_image_memory_requirements(image);
            let allocation = match ctx.allocator().allocate(&AllocationCreateDesc {
                name: "texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(_) => {
                    ctx.device.destroy_image(image, None);
                    let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                    engine_error!(SOURCE, "Out of GPU memory for texture {}x{} (required: {:.2} MB)",
                        desc.width, desc.height, size_mb);
                    return Err(Error::OutOfMemory);
                }
            };

            if let Err(e) = ctx.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                ctx.device.destroy_image(image, None);
                ctx.allocator().free(allocation).ok();
                return Err(engine_err!(SOURCE, "Failed to bind image memory: {:?}", e));
            }

            Ok(Self { desc: *desc, image, allocation: Some(allocation), mip_levels, layers })
        }
    }

    /// Every subresource of the image
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: aspect_flags(self.desc.format),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.layers,
        }
    }

    /// Record the move of the whole image from UNDEFINED to GENERAL
    pub fn record_initial_transition(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::NONE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::GENERAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.full_range());
        let dependency = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    /// Mip 0 of every layer as copy regions from a tightly packed buffer
    pub fn top_mip_copy(&self) -> vk::BufferImageCopy {
        let aspect_mask = if self.desc.format.is_depth() { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
        vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: self.layers,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: self.extent(0),
        }
    }

    /// Extent of mip `level`
    pub fn extent(&self, level: u32) -> vk::Extent3D {
        vk::Extent3D {
            width: (self.desc.width >> level).max(1),
            height: (self.desc.height.max(1) >> level).max(1),
            depth: if self.desc.texture_type == TextureType::Texture3D { (self.desc.depth >> level).max(1) } else { 1 },
        }
    }
}

pub struct VulkanTextureView {
    pub texture: TextureHandle,
    pub desc: TextureViewDesc,
    pub view: vk::ImageView,
    pub range: vk::ImageSubresourceRange,
    pub format: vk::Format,
}

impl VulkanTextureView {
    pub fn new(ctx: &GpuContext, handle: TextureHandle, texture: &VulkanTexture, desc: &TextureViewDesc) -> Result<Self> {
        let range = view_range(&texture.desc, desc);
        // Depth images are viewed with their own format; the color alias is a D3D notion
        let format = if texture.desc.format.is_depth() {
            format_to_vk(texture.desc.format)
        } else {
            format_to_vk(desc.format)
        };
        let info = vk::ImageViewCreateInfo::default()
            .image(texture.image)
            .view_type(view_type(&texture.desc, desc.kind, range.layer_count))
            .format(format)
            .subresource_range(range);
        let view = unsafe { ctx.device.create_image_view(&info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create {:?} image view: {:?}", desc.kind, e))?;
        Ok(Self { texture: handle, desc: *desc, view, range, format })
    }
}

#[cfg(test)]
#[path = "vulkan_texture_tests.rs"]
mod tests;
