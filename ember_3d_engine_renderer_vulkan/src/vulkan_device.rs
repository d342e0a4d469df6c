/// VulkanGraphicsDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Native objects live in slotmap tables behind one mutex; command streams
/// share the device state through an `Arc` and record into the device's
/// immediate recorder. Lock order: resources, then pipelines, then recorder.

use ash::vk;
use gpu_allocator::MemoryLocation;
use slotmap::SlotMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use ember_3d_engine::ember3d::{Error, Result};
use ember_3d_engine::ember3d::device::{
    Config, GraphicsDevice, CommandStream, BufferDesc, BufferViewDesc, TextureDesc, TextureViewDesc,
    BlendDesc, DepthStencilDesc, RasterizerDesc, SamplerDesc, InputLayoutDesc, ShaderDesc,
    BufferHandle, BufferViewHandle, TextureHandle, TextureViewHandle, ShaderHandle,
    InputLayoutHandle, BlendStateHandle, RasterizerStateHandle, DepthStencilStateHandle,
    SamplerHandle, QueryHandle, QueryKind, MapMode, ShaderStage, ViewKind, TextureViewKind,
    ResourceUsage, CpuAccess, BindFlags, BufferMiscFlags,
};
use ember_3d_engine::{engine_bail, engine_err, engine_info};
use crate::vulkan_buffer::{allocate_buffer, VulkanBuffer, VulkanBufferView, HiddenCounter};
use crate::vulkan_command_stream::VulkanCommandStream;
use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{address_mode_to_vk, border_color_to_vk, compare_op_to_vk, filter_to_vk};
use crate::vulkan_pipeline::{resolve_input_layout, PipelineCache, PipelineDependency, VulkanInputLayout};
use crate::vulkan_recorder::{Recorder, Retired};
use crate::vulkan_shader::{reflect, spirv_words, VulkanShader};
use crate::vulkan_texture::{VulkanTexture, VulkanTextureView};

const SOURCE: &str = "ember3d::vulkan";

/// Timestamp queries available to the profiler
pub const MAX_TIMESTAMP_QUERIES: u32 = 512;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn missing(kind: &str) -> Error {
    Error::InvalidResource(format!("unknown {} handle", kind))
}

// ===== RESOURCE TABLES =====

pub(crate) struct QuerySlot {
    pub index: u32,
    /// Submission the latest timestamp write belongs to
    pub written_in: Option<u64>,
}

#[derive(Default)]
pub(crate) struct Resources {
    pub buffers: SlotMap<BufferHandle, VulkanBuffer>,
    pub buffer_views: SlotMap<BufferViewHandle, VulkanBufferView>,
    pub textures: SlotMap<TextureHandle, VulkanTexture>,
    pub texture_views: SlotMap<TextureViewHandle, VulkanTextureView>,
    pub shaders: SlotMap<ShaderHandle, VulkanShader>,
    pub input_layouts: SlotMap<InputLayoutHandle, VulkanInputLayout>,
    pub blend_states: SlotMap<BlendStateHandle, BlendDesc>,
    pub rasterizer_states: SlotMap<RasterizerStateHandle, RasterizerDesc>,
    pub depth_stencil_states: SlotMap<DepthStencilStateHandle, DepthStencilDesc>,
    pub samplers: SlotMap<SamplerHandle, vk::Sampler>,
    pub queries: SlotMap<QueryHandle, QuerySlot>,
    pub free_query_indices: Vec<u32>,
}

impl Resources {
    pub fn buffer(&self, handle: BufferHandle) -> Result<&VulkanBuffer> {
        self.buffers.get(handle).ok_or_else(|| missing("buffer"))
    }

    pub fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut VulkanBuffer> {
        self.buffers.get_mut(handle).ok_or_else(|| missing("buffer"))
    }

    pub fn buffer_view(&self, handle: BufferViewHandle) -> Result<&VulkanBufferView> {
        self.buffer_views.get(handle).ok_or_else(|| missing("buffer view"))
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&VulkanTexture> {
        self.textures.get(handle).ok_or_else(|| missing("texture"))
    }

    pub fn texture_view(&self, handle: TextureViewHandle) -> Result<&VulkanTextureView> {
        self.texture_views.get(handle).ok_or_else(|| missing("texture view"))
    }

    pub fn shader(&self, handle: ShaderHandle) -> Result<&VulkanShader> {
        self.shaders.get(handle).ok_or_else(|| missing("shader"))
    }

    /// Every native object, for destruction at device teardown
    fn drain(&mut self) -> Vec<Retired> {
        let mut retired = Vec::new();
        for (_, view) in self.buffer_views.drain() {
            retired.extend(buffer_view_objects(view));
        }
        for (_, buffer) in self.buffers.drain() {
            retired.extend(buffer_objects(buffer));
        }
        for (_, view) in self.texture_views.drain() {
            retired.push(Retired::ImageView(view.view));
        }
        for (_, texture) in self.textures.drain() {
            retired.extend(texture_objects(texture));
        }
        for (_, shader) in self.shaders.drain() {
            retired.push(Retired::ShaderModule(shader.module));
        }
        for (_, sampler) in self.samplers.drain() {
            retired.push(Retired::Sampler(sampler));
        }
        retired
    }
}

fn buffer_objects(mut buffer: VulkanBuffer) -> Option<Retired> {
    buffer.allocation.take().map(|allocation| Retired::Buffer(buffer.buffer, allocation))
}

fn buffer_view_objects(view: VulkanBufferView) -> Vec<Retired> {
    let mut retired: Vec<Retired> = view.texel_views.into_iter().map(Retired::BufferView).collect();
    if let Some(counter) = view.counter {
        retired.push(Retired::Buffer(counter.buffer, counter.allocation));
    }
    retired
}

fn texture_objects(mut texture: VulkanTexture) -> Option<Retired> {
    texture.allocation.take().map(|allocation| Retired::Image(texture.image, allocation))
}

// ===== SHARED STATE =====

pub(crate) struct DeviceState {
    pub ctx: Arc<GpuContext>,
    pub resources: Mutex<Resources>,
    pub pipelines: Mutex<PipelineCache>,
    pub recorder: Mutex<Recorder>,
    pub query_pool: vk::QueryPool,
}

impl DeviceState {
    pub fn resources(&self) -> MutexGuard<'_, Resources> {
        lock(&self.resources)
    }

    pub fn pipelines(&self) -> MutexGuard<'_, PipelineCache> {
        lock(&self.pipelines)
    }

    pub fn recorder(&self) -> MutexGuard<'_, Recorder> {
        lock(&self.recorder)
    }

    /// Record a copy of `data` into `dst` at `offset` through a staging buffer
    fn upload(&self, recorder: &mut Recorder, dst: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let (staging, allocation) = allocate_buffer(
            &self.ctx,
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging",
        )?;
        let Some(ptr) = allocation.mapped_ptr() else {
            recorder.retire(Retired::Buffer(staging, allocation));
            engine_bail!(SOURCE, "Staging buffer is not host visible");
        };
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().cast::<u8>(), data.len()) };

        let cmd = match recorder.outside_pass() {
            Ok(cmd) => cmd,
            Err(e) => {
                recorder.retire(Retired::Buffer(staging, allocation));
                return Err(e);
            }
        };
        let region = vk::BufferCopy { src_offset: 0, dst_offset: offset, size: data.len() as u64 };
        unsafe { self.ctx.device.cmd_copy_buffer(cmd, staging, dst, &[region]) };
        recorder.retire(Retired::Buffer(staging, allocation));
        Ok(())
    }

    fn evict_pipelines(&self, dependency: PipelineDependency) {
        let retired = self.pipelines().evict(dependency);
        let mut recorder = self.recorder();
        for object in retired {
            recorder.retire(object);
        }
    }
}

impl Drop for DeviceState {
    fn drop(&mut self) {
        let mut recorder = lock(&self.recorder);
        recorder.submit_and_wait().ok();
        unsafe { self.ctx.device.device_wait_idle().ok() };

        let mut retired = lock(&self.pipelines).drain();
        retired.extend(lock(&self.resources).drain());
        for object in retired {
            unsafe { object.destroy(&self.ctx) };
        }
        if self.query_pool != vk::QueryPool::null() {
            unsafe { self.ctx.device.destroy_query_pool(self.query_pool, None) };
        }
    }
}

// ===== DEVICE =====

pub struct VulkanGraphicsDevice {
    state: Arc<DeviceState>,
}

impl VulkanGraphicsDevice {
    /// Create a headless Vulkan device
    pub fn new(config: Config) -> Result<Self> {
        let ctx = Arc::new(GpuContext::new(&config)?);
        let recorder = Recorder::new(Arc::clone(&ctx))?;

        let mut resources = Resources::default();
        let query_pool = if config.enable_profiling {
            let info = vk::QueryPoolCreateInfo::default()
                .query_type(vk::QueryType::TIMESTAMP)
                .query_count(MAX_TIMESTAMP_QUERIES);
            let pool = unsafe { ctx.device.create_query_pool(&info, None) }
                .map_err(|e| engine_err!(SOURCE, "Failed to create timestamp query pool: {:?}", e))?;
            resources.free_query_indices = (0..MAX_TIMESTAMP_QUERIES).rev().collect();
            pool
        } else {
            vk::QueryPool::null()
        };

        engine_info!(SOURCE, "Vulkan graphics device ready (profiling {})",
            if config.enable_profiling { "on" } else { "off" });

        Ok(Self {
            state: Arc::new(DeviceState {
                ctx,
                resources: Mutex::new(resources),
                pipelines: Mutex::new(PipelineCache::default()),
                recorder: Mutex::new(recorder),
                query_pool,
            }),
        })
    }

    /// Number of pipelines built so far and still cached
    pub fn cached_pipeline_count(&self) -> usize {
        self.state.pipelines().len()
    }

    fn retire(&self, objects: impl IntoIterator<Item = Retired>) {
        let mut recorder = self.state.recorder();
        for object in objects {
            recorder.retire(object);
        }
    }
}

fn validate_buffer_desc(desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<()> {
    if desc.size == 0 {
        engine_bail!(SOURCE, "Buffer size is zero");
    }
    if let Some(data) = initial_data {
        if data.len() as u64 > desc.size {
            engine_bail!(SOURCE, "Initial data ({} bytes) larger than the buffer ({} bytes)", data.len(), desc.size);
        }
    }
    match desc.usage {
        ResourceUsage::Immutable if initial_data.is_none() => engine_bail!(SOURCE, "Immutable buffer without initial data"),
        ResourceUsage::Dynamic if !desc.cpu_access.contains(CpuAccess::WRITE) => {
            engine_bail!(SOURCE, "Dynamic buffer without Write access")
        }
        ResourceUsage::Staging if !desc.bind_flags.is_empty() => {
            engine_bail!(SOURCE, "Staging buffer with bind flags {:?}", desc.bind_flags)
        }
        _ => {}
    }
    if desc.misc_flags.contains(BufferMiscFlags::STRUCTURED)
        && (desc.stride == 0 || desc.size % desc.stride as u64 != 0)
    {
        engine_bail!(SOURCE, "Structured buffer size {} is not a multiple of stride {}", desc.size, desc.stride);
    }
    Ok(())
}

impl GraphicsDevice for VulkanGraphicsDevice {
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<BufferHandle> {
        validate_buffer_desc(desc, initial_data)?;
        let state = &self.state;
        let buffer = VulkanBuffer::new(&state.ctx, desc)?;

        let filled = if buffer.is_host_visible() {
            match (initial_data, buffer.mapped_ptr()) {
                (Some(data), Some(ptr)) => {
                    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
                    Ok(())
                }
                (Some(_), None) => Err(engine_err!(SOURCE, "Host-visible buffer is not mapped")),
                (None, _) => Ok(()),
            }
        } else {
            let mut recorder = state.recorder();
            recorder.outside_pass().map(|cmd| unsafe {
                state.ctx.device.cmd_fill_buffer(cmd, buffer.buffer, 0, vk::WHOLE_SIZE, 0);
            }).and_then(|_| match initial_data {
                Some(data) if !data.is_empty() => state.upload(&mut recorder, buffer.buffer, 0, data),
                _ => Ok(()),
            })
        };

        if let Err(e) = filled {
            self.retire(buffer_objects(buffer));
            return Err(e);
        }
        Ok(state.resources().buffers.insert(buffer))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let removed = self.state.resources().buffers.remove(buffer);
        if let Some(buffer) = removed {
            self.retire(buffer_objects(buffer));
        }
    }

    fn create_buffer_view(&self, buffer: BufferHandle, desc: &BufferViewDesc) -> Result<BufferViewHandle> {
        let state = &self.state;
        let mut resources = state.resources();
        let vk_buffer = resources.buffer(buffer)?;
        let buffer_desc = vk_buffer.desc;

        let required = match desc.kind {
            ViewKind::ReadOnly => BindFlags::SHADER_RESOURCE,
            ViewKind::ReadWrite => BindFlags::UNORDERED_ACCESS,
        };
        if !buffer_desc.bind_flags.contains(required) {
            engine_bail!(SOURCE, "{:?} view on a buffer without {:?}", desc.kind, required);
        }
        if desc.uav_flags.has_counter() && !buffer_desc.misc_flags.contains(BufferMiscFlags::STRUCTURED) {
            engine_bail!(SOURCE, "Append/counter view on a non-structured buffer");
        }
        if desc.num_elements == 0 || desc.byte_offset() + desc.byte_size() > buffer_desc.size {
            engine_bail!(SOURCE, "View range ({} elements at {}) outside the buffer", desc.num_elements, desc.first_element);
        }

        let texel_views = VulkanBufferView::create_texel_views(&state.ctx, vk_buffer, desc)?;
        let mut view = VulkanBufferView { buffer, desc: *desc, texel_views, counter: None };

        if desc.uav_flags.has_counter() {
            let counter = allocate_buffer(
                &state.ctx,
                4,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
                "counter",
            )
            .and_then(|(counter_buffer, allocation)| {
                let mut recorder = state.recorder();
                match recorder.outside_pass() {
                    Ok(cmd) => {
                        unsafe { state.ctx.device.cmd_fill_buffer(cmd, counter_buffer, 0, 4, 0) };
                        Ok(HiddenCounter { buffer: counter_buffer, allocation })
                    }
                    Err(e) => {
                        recorder.retire(Retired::Buffer(counter_buffer, allocation));
                        Err(e)
                    }
                }
            });
            match counter {
                Ok(counter) => view.counter = Some(counter),
                Err(e) => {
                    drop(resources);
                    self.retire(buffer_view_objects(view));
                    return Err(e);
                }
            }
        }

        Ok(resources.buffer_views.insert(view))
    }

    fn destroy_buffer_view(&self, view: BufferViewHandle) {
        let removed = self.state.resources().buffer_views.remove(view);
        if let Some(view) = removed {
            self.retire(buffer_view_objects(view));
        }
    }

    fn create_texture(&self, desc: &TextureDesc, initial_data: Option<&[u8]>) -> Result<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.format.stride() == 0 {
            engine_bail!(SOURCE, "Invalid texture {}x{} {:?}", desc.width, desc.height, desc.format);
        }
        if desc.usage == ResourceUsage::Immutable && initial_data.is_none() {
            engine_bail!(SOURCE, "Immutable texture without initial data");
        }
        let top_size = (desc.top_mip_size() * desc.array_size.max(1) as u64) as usize;
        let padded;
        let initial_data = match initial_data {
            Some(data) if data.len() > top_size => engine_bail!(SOURCE, "Initial texture data larger than mip 0"),
            Some(data) if data.len() < top_size => {
                padded = [data, &vec![0u8; top_size - data.len()]].concat();
                Some(padded.as_slice())
            }
            other => other,
        };

        let state = &self.state;
        let texture = VulkanTexture::new(&state.ctx, desc)?;
        let uploaded = {
            let mut recorder = state.recorder();
            recorder.outside_pass().and_then(|cmd| {
                texture.record_initial_transition(&state.ctx.device, cmd);
                let Some(data) = initial_data else {
                    return Ok(());
                };
                let (staging, allocation) = allocate_buffer(
                    &state.ctx, data.len() as u64, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, "staging",
                )?;
                if let Some(ptr) = allocation.mapped_ptr() {
                    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().cast::<u8>(), data.len()) };
                }
                let cmd = recorder.outside_pass();
                if let Ok(cmd) = cmd {
                    unsafe {
                        state.ctx.device.cmd_copy_buffer_to_image(
                            cmd, staging, texture.image, vk::ImageLayout::GENERAL, &[texture.top_mip_copy()],
                        );
                    }
                }
                recorder.retire(Retired::Buffer(staging, allocation));
                cmd.map(|_| ())
            })
        };

        if let Err(e) = uploaded {
            self.retire(texture_objects(texture));
            return Err(e);
        }
        Ok(state.resources().textures.insert(texture))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let removed = self.state.resources().textures.remove(texture);
        if let Some(texture) = removed {
            self.retire(texture_objects(texture));
        }
    }

    fn create_texture_view(&self, texture: TextureHandle, desc: &TextureViewDesc) -> Result<TextureViewHandle> {
        let mut resources = self.state.resources();
        let vk_texture = resources.texture(texture)?;
        let required = match desc.kind {
            TextureViewKind::ReadOnly => BindFlags::SHADER_RESOURCE,
            TextureViewKind::ReadWrite => BindFlags::UNORDERED_ACCESS,
            TextureViewKind::RenderTarget => BindFlags::RENDER_TARGET,
            TextureViewKind::DepthStencil => BindFlags::DEPTH_STENCIL,
        };
        if !vk_texture.desc.bind_flags.contains(required) {
            engine_bail!(SOURCE, "{:?} view on a texture without {:?}", desc.kind, required);
        }
        let view = VulkanTextureView::new(&self.state.ctx, texture, vk_texture, desc)?;
        Ok(resources.texture_views.insert(view))
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) {
        let removed = self.state.resources().texture_views.remove(view);
        if let Some(view) = removed {
            self.retire([Retired::ImageView(view.view)]);
        }
    }

    fn create_shader(&self, desc: &ShaderDesc<'_>) -> Result<ShaderHandle> {
        if desc.entry_point.is_empty() {
            engine_bail!(SOURCE, "Shader '{}' has no entry point", desc.name);
        }
        match desc.stage {
            ShaderStage::Geometry if !self.state.ctx.geometry_shader => {
                engine_bail!(SOURCE, "Geometry shader '{}' not supported by this GPU", desc.name)
            }
            ShaderStage::Hull | ShaderStage::Domain if !self.state.ctx.tessellation_shader => {
                engine_bail!(SOURCE, "Tessellation shader '{}' not supported by this GPU", desc.name)
            }
            _ => {}
        }

        let words = spirv_words(desc.code)?;
        let (bindings, inputs) = reflect(&words, desc.stage, desc.entry_point)?;
        let entry_point = std::ffi::CString::new(desc.entry_point)
            .map_err(|_| engine_err!(SOURCE, "Entry point '{}' contains a NUL byte", desc.entry_point))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { self.state.ctx.device.create_shader_module(&create_info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create shader module '{}': {:?}", desc.name, e))?;

        Ok(self.state.resources().shaders.insert(VulkanShader {
            module,
            stage: desc.stage,
            entry_point,
            name: desc.name.to_string(),
            bindings,
            inputs,
        }))
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        let removed = self.state.resources().shaders.remove(shader);
        if let Some(removed) = removed {
            self.state.evict_pipelines(PipelineDependency::Shader(shader));
            self.retire([Retired::ShaderModule(removed.module)]);
        }
    }

    fn create_input_layout(&self, desc: &InputLayoutDesc, vertex_shader: ShaderHandle) -> Result<InputLayoutHandle> {
        let mut resources = self.state.resources();
        let layout = match resources.shaders.get(vertex_shader) {
            Some(shader) if shader.stage == ShaderStage::Vertex => resolve_input_layout(desc, &shader.inputs)?,
            _ => engine_bail!(SOURCE, "Input layout needs a vertex shader"),
        };
        Ok(resources.input_layouts.insert(layout))
    }

    fn destroy_input_layout(&self, layout: InputLayoutHandle) {
        if self.state.resources().input_layouts.remove(layout).is_some() {
            self.state.evict_pipelines(PipelineDependency::InputLayout(layout));
        }
    }

    fn create_blend_state(&self, desc: &BlendDesc) -> Result<BlendStateHandle> {
        Ok(self.state.resources().blend_states.insert(*desc))
    }

    fn create_rasterizer_state(&self, desc: &RasterizerDesc) -> Result<RasterizerStateHandle> {
        Ok(self.state.resources().rasterizer_states.insert(*desc))
    }

    fn create_depth_stencil_state(&self, desc: &DepthStencilDesc) -> Result<DepthStencilStateHandle> {
        Ok(self.state.resources().depth_stencil_states.insert(*desc))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        let (mag, min, mip, anisotropic) = filter_to_vk(desc.filter);
        let anisotropic = anisotropic && self.state.ctx.sampler_anisotropy && desc.max_anisotropy > 1;
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(mag)
            .min_filter(min)
            .mipmap_mode(mip)
            .address_mode_u(address_mode_to_vk(desc.address_u))
            .address_mode_v(address_mode_to_vk(desc.address_v))
            .address_mode_w(address_mode_to_vk(desc.address_w))
            .mip_lod_bias(desc.mip_lod_bias)
            .anisotropy_enable(anisotropic)
            .max_anisotropy(desc.max_anisotropy.clamp(1, 16) as f32)
            .compare_enable(desc.filter.is_comparison())
            .compare_op(compare_op_to_vk(desc.comparison_func))
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod.min(vk::LOD_CLAMP_NONE))
            .border_color(border_color_to_vk(desc.border_color));
        let sampler = unsafe { self.state.ctx.device.create_sampler(&info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create sampler: {:?}", e))?;
        Ok(self.state.resources().samplers.insert(sampler))
    }

    fn destroy_blend_state(&self, state: BlendStateHandle) {
        if self.state.resources().blend_states.remove(state).is_some() {
            self.state.evict_pipelines(PipelineDependency::Blend(state));
        }
    }

    fn destroy_rasterizer_state(&self, state: RasterizerStateHandle) {
        if self.state.resources().rasterizer_states.remove(state).is_some() {
            self.state.evict_pipelines(PipelineDependency::Rasterizer(state));
        }
    }

    fn destroy_depth_stencil_state(&self, state: DepthStencilStateHandle) {
        if self.state.resources().depth_stencil_states.remove(state).is_some() {
            self.state.evict_pipelines(PipelineDependency::DepthStencil(state));
        }
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        let removed = self.state.resources().samplers.remove(sampler);
        if let Some(sampler) = removed {
            self.retire([Retired::Sampler(sampler)]);
        }
    }

    fn map_buffer(&self, buffer: BufferHandle, mode: MapMode) -> Result<NonNull<u8>> {
        let mut resources = self.state.resources();
        let slot = resources.buffer_mut(buffer)?;
        let allowed = match mode {
            MapMode::WriteDiscard => slot.desc.usage == ResourceUsage::Dynamic
                && slot.desc.cpu_access.contains(CpuAccess::WRITE),
            MapMode::Read => slot.desc.cpu_access.contains(CpuAccess::READ),
        };
        if !allowed {
            engine_bail!(SOURCE, "{:?} map of a {:?} buffer with {:?} access", mode, slot.desc.usage, slot.desc.cpu_access);
        }
        if slot.mapped {
            engine_bail!(SOURCE, "Buffer is already mapped");
        }

        {
            let mut recorder = self.state.recorder();
            match mode {
                MapMode::WriteDiscard => {
                    if !slot.rename(recorder.pending_submission()) {
                        recorder.submit_and_wait()?;
                        slot.rename(recorder.pending_submission());
                    }
                }
                MapMode::Read => recorder.submit_and_wait()?,
            }
        }

        let ptr = slot.mapped_ptr().ok_or_else(|| engine_err!(SOURCE, "Buffer memory is not host visible"))?;
        slot.mapped = true;
        Ok(ptr)
    }

    fn unmap_buffer(&self, buffer: BufferHandle) {
        if let Some(slot) = self.state.resources().buffers.get_mut(buffer) {
            slot.mapped = false;
        }
    }

    fn update_subresource(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let resources = self.state.resources();
        let slot = resources.buffer(buffer)?;
        if slot.desc.usage != ResourceUsage::Default {
            engine_bail!(SOURCE, "update_subresource on a {:?} buffer", slot.desc.usage);
        }
        if offset + data.len() as u64 > slot.desc.size {
            engine_bail!(SOURCE, "update_subresource range {}..{} outside the buffer", offset, offset + data.len() as u64);
        }
        if data.is_empty() {
            return Ok(());
        }
        let mut recorder = self.state.recorder();
        self.state.upload(&mut recorder, slot.buffer, offset, data)
    }

    fn create_query(&self, kind: QueryKind) -> Result<QueryHandle> {
        match kind {
            QueryKind::Timestamp => {
                let mut resources = self.state.resources();
                let Some(index) = resources.free_query_indices.pop() else {
                    engine_bail!(SOURCE, "No timestamp query available (profiling disabled or {} in use)", MAX_TIMESTAMP_QUERIES);
                };
                Ok(resources.queries.insert(QuerySlot { index, written_in: None }))
            }
        }
    }

    fn destroy_query(&self, query: QueryHandle) {
        let mut resources = self.state.resources();
        if let Some(slot) = resources.queries.remove(query) {
            resources.free_query_indices.push(slot.index);
        }
    }

    fn query_data(&self, query: QueryHandle) -> Result<Option<u64>> {
        let resources = self.state.resources();
        let slot = resources.queries.get(query).ok_or_else(|| missing("query"))?;
        let Some(written_in) = slot.written_in else {
            return Ok(None);
        };
        if written_in > self.state.recorder().completed_submissions() {
            return Ok(None);
        }

        let mut data = [[0u64; 2]; 1];
        let result = unsafe {
            self.state.ctx.device.get_query_pool_results(
                self.state.query_pool,
                slot.index,
                &mut data,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
            )
        };
        match result {
            Ok(()) if data[0][1] != 0 => Ok(Some(data[0][0])),
            Ok(()) | Err(vk::Result::NOT_READY) => Ok(None),
            Err(e) => Err(engine_err!(SOURCE, "Failed to read timestamp query: {:?}", e)),
        }
    }

    fn timestamp_frequency(&self) -> u64 {
        let period = self.state.ctx.timestamp_period as f64;
        if period > 0.0 {
            (1.0e9 / period) as u64
        } else {
            1_000_000_000
        }
    }

    fn create_command_stream(&self) -> Result<Box<dyn CommandStream>> {
        Ok(Box::new(VulkanCommandStream::new(Arc::clone(&self.state))))
    }

    fn wait_idle(&self) -> Result<()> {
        self.state.recorder().submit_and_wait()?;
        unsafe { self.state.ctx.device.device_wait_idle() }
            .map_err(|e| engine_err!(SOURCE, "Failed to wait for device idle: {:?}", e))
    }
}
