/// Reference device - deterministic CPU implementation of the native seam
///
/// Buffers and textures are byte arrays in slotmap tables; compute dispatches
/// run registered `ReferenceKernel`s synchronously at record time; draws are
/// not rasterized but recorded as `DrawRecord`s. Every seam method bumps a
/// per-method call counter so tests can observe native call counts.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use crate::error::{Error, Result};
use crate::engine_bail;
use crate::graphics_device::{
    GraphicsDevice, CommandStream, BufferDesc, BufferViewDesc, TextureDesc, TextureViewDesc,
    BlendDesc, DepthStencilDesc, RasterizerDesc, SamplerDesc, InputLayoutDesc, ShaderDesc,
    BufferHandle, BufferViewHandle, TextureHandle, TextureViewHandle, ShaderHandle,
    InputLayoutHandle, BlendStateHandle, RasterizerStateHandle, DepthStencilStateHandle,
    SamplerHandle, QueryHandle, QueryKind, MapMode, ShaderStage, ViewKind, TextureViewKind,
    ResourceUsage, CpuAccess, BindFlags, BufferMiscFlags, PrimitiveTopology,
};
use crate::reference::{ReferenceKernel, ReferenceCommandStream};

const SOURCE: &str = "ember3d::ReferenceDevice";

/// Timestamp ticks per second (one tick per recorded command)
pub const REFERENCE_TIMESTAMP_FREQUENCY: u64 = 1_000_000;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ===== RESOURCE TABLES =====

pub(crate) struct BufferSlot {
    pub desc: BufferDesc,
    pub data: Vec<u8>,
    pub mapped: bool,
}

pub(crate) struct BufferViewSlot {
    pub buffer: BufferHandle,
    pub desc: BufferViewDesc,
    /// Hidden append/consume counter
    pub counter: u32,
}

pub(crate) struct TextureSlot {
    pub desc: TextureDesc,
    /// Mip 0 of every array slice
    pub data: Vec<u8>,
}

pub(crate) struct TextureViewSlot {
    pub texture: TextureHandle,
    pub desc: TextureViewDesc,
}

pub(crate) struct ShaderSlot {
    pub stage: ShaderStage,
    pub entry_point: String,
}

#[derive(Default)]
pub(crate) struct Resources {
    pub buffers: SlotMap<BufferHandle, BufferSlot>,
    pub buffer_views: SlotMap<BufferViewHandle, BufferViewSlot>,
    pub textures: SlotMap<TextureHandle, TextureSlot>,
    pub texture_views: SlotMap<TextureViewHandle, TextureViewSlot>,
    pub shaders: SlotMap<ShaderHandle, ShaderSlot>,
    pub input_layouts: SlotMap<InputLayoutHandle, InputLayoutDesc>,
    pub blend_states: SlotMap<BlendStateHandle, BlendDesc>,
    pub rasterizer_states: SlotMap<RasterizerStateHandle, RasterizerDesc>,
    pub depth_stencil_states: SlotMap<DepthStencilStateHandle, DepthStencilDesc>,
    pub samplers: SlotMap<SamplerHandle, SamplerDesc>,
    pub queries: SlotMap<QueryHandle, Option<u64>>,
}

fn missing(kind: &str) -> Error {
    Error::InvalidResource(format!("unknown {} handle", kind))
}

impl Resources {
    pub fn buffer(&self, handle: BufferHandle) -> Result<&BufferSlot> {
        self.buffers.get(handle).ok_or_else(|| missing("buffer"))
    }

    pub fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut BufferSlot> {
        self.buffers.get_mut(handle).ok_or_else(|| missing("buffer"))
    }

    pub fn buffer_view(&self, handle: BufferViewHandle) -> Result<&BufferViewSlot> {
        self.buffer_views.get(handle).ok_or_else(|| missing("buffer view"))
    }

    pub fn buffer_view_mut(&mut self, handle: BufferViewHandle) -> Result<&mut BufferViewSlot> {
        self.buffer_views.get_mut(handle).ok_or_else(|| missing("buffer view"))
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&TextureSlot> {
        self.textures.get(handle).ok_or_else(|| missing("texture"))
    }

    pub fn texture_mut(&mut self, handle: TextureHandle) -> Result<&mut TextureSlot> {
        self.textures.get_mut(handle).ok_or_else(|| missing("texture"))
    }

    pub fn texture_view(&self, handle: TextureViewHandle) -> Result<&TextureViewSlot> {
        self.texture_views.get(handle).ok_or_else(|| missing("texture view"))
    }

    /// Read `count` u32 values at a byte offset of a buffer
    pub fn read_u32s(&self, handle: BufferHandle, offset: u64, count: usize) -> Result<Vec<u32>> {
        let data = &self.buffer(handle)?.data;
        let start = offset as usize;
        let end = start + count * 4;
        if end > data.len() {
            return Err(Error::InvalidResource(format!("reading {} bytes at {} past the end of a {}-byte buffer",
                count * 4, offset, data.len())));
        }
        Ok(data[start..end].chunks_exact(4).map(bytemuck::pod_read_unaligned).collect())
    }

    fn object_count(&self) -> usize {
        self.buffers.len() + self.buffer_views.len() + self.textures.len() + self.texture_views.len()
            + self.shaders.len() + self.input_layouts.len() + self.blend_states.len()
            + self.rasterizer_states.len() + self.depth_stencil_states.len() + self.samplers.len()
            + self.queries.len()
    }
}

// ===== DRAW RECORDS =====

/// A draw call as the reference device saw it, with indirect counts resolved
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub indexed: bool,
    pub indirect: bool,
    /// Vertex count, or index count for indexed draws
    pub element_count: u32,
    pub instance_count: u32,
    /// Start vertex, or start index for indexed draws
    pub start_element: u32,
    pub base_vertex: i32,
    pub start_instance: u32,
    pub topology: PrimitiveTopology,
    pub vertex_shader: Option<String>,
    pub pixel_shader: Option<String>,
    pub index_buffer: Option<BufferHandle>,
}

// ===== SHARED STATE =====

pub(crate) struct Shared {
    pub resources: Mutex<Resources>,
    pub kernels: RwLock<FxHashMap<String, Arc<dyn ReferenceKernel>>>,
    pub calls: Mutex<FxHashMap<&'static str, u64>>,
    pub draws: Mutex<Vec<DrawRecord>>,
    pub clock: AtomicU64,
}

impl Shared {
    /// Count one native call and advance the timestamp clock
    pub fn record(&self, method: &'static str) {
        *lock(&self.calls).entry(method).or_insert(0) += 1;
        self.clock.fetch_add(1, Ordering::Relaxed);
    }

    pub fn kernel(&self, entry_point: &str) -> Option<Arc<dyn ReferenceKernel>> {
        self.kernels.read().unwrap_or_else(PoisonError::into_inner).get(entry_point).cloned()
    }
}

// ===== DEVICE =====

pub struct ReferenceDevice {
    shared: Arc<Shared>,
}

impl Default for ReferenceDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceDevice {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                resources: Mutex::new(Resources::default()),
                kernels: RwLock::new(FxHashMap::default()),
                calls: Mutex::new(FxHashMap::default()),
                draws: Mutex::new(Vec::new()),
                clock: AtomicU64::new(0),
            }),
        }
    }

    /// Make compute shaders with entry point `entry_point` run `kernel`
    pub fn register_kernel(&self, entry_point: &str, kernel: impl ReferenceKernel + 'static) {
        self.shared.kernels.write().unwrap_or_else(PoisonError::into_inner)
            .insert(entry_point.to_string(), Arc::new(kernel));
    }

    /// Number of times the seam method `method` was called
    pub fn call_count(&self, method: &str) -> u64 {
        lock(&self.shared.calls).get(method).copied().unwrap_or(0)
    }

    pub fn reset_call_counts(&self) {
        lock(&self.shared.calls).clear();
    }

    /// Draws recorded so far
    pub fn draws(&self) -> Vec<DrawRecord> {
        lock(&self.shared.draws).clone()
    }

    /// Current contents of a buffer
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        lock(&self.shared.resources).buffers.get(buffer).map(|slot| slot.data.clone())
    }

    /// Current contents of a texture's top mip
    pub fn texture_contents(&self, texture: TextureHandle) -> Option<Vec<u8>> {
        lock(&self.shared.resources).textures.get(texture).map(|slot| slot.data.clone())
    }

    /// Current hidden counter of a buffer view
    pub fn view_counter(&self, view: BufferViewHandle) -> Option<u32> {
        lock(&self.shared.resources).buffer_views.get(view).map(|slot| slot.counter)
    }

    /// Number of live native objects of every kind
    pub fn live_object_count(&self) -> usize {
        lock(&self.shared.resources).object_count()
    }

    fn resources(&self) -> MutexGuard<'_, Resources> {
        lock(&self.shared.resources)
    }
}

fn validate_buffer_desc(desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<()> {
    if desc.size == 0 {
        engine_bail!(SOURCE, "Buffer size is zero");
    }
    if let Some(data) = initial_data {
        if data.len() as u64 > desc.size {
            engine_bail!(SOURCE, "Initial data larger than the buffer");
        }
    }
    match desc.usage {
        ResourceUsage::Immutable if initial_data.is_none() => {
            engine_bail!(SOURCE, "Immutable buffer without initial data");
        }
        ResourceUsage::Dynamic if !desc.cpu_access.contains(CpuAccess::WRITE) => {
            engine_bail!(SOURCE, "Dynamic buffer without Write access");
        }
        ResourceUsage::Staging if !desc.bind_flags.is_empty() => {
            engine_bail!(SOURCE, "Staging buffer with bind flags {:?}", desc.bind_flags);
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

impl GraphicsDevice for ReferenceDevice {
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<BufferHandle> {
        self.shared.record("create_buffer");
        validate_buffer_desc(desc, initial_data)?;

        let mut data = vec![0u8; desc.size as usize];
        if let Some(initial) = initial_data {
            data[..initial.len()].copy_from_slice(initial);
        }
        Ok(self.resources().buffers.insert(BufferSlot { desc: *desc, data, mapped: false }))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.shared.record("destroy_buffer");
        self.resources().buffers.remove(buffer);
    }

    fn create_buffer_view(&self, buffer: BufferHandle, desc: &BufferViewDesc) -> Result<BufferViewHandle> {
        self.shared.record("create_buffer_view");
        let mut resources = self.resources();
        let buffer_desc = resources.buffer(buffer)?.desc;

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
        Ok(resources.buffer_views.insert(BufferViewSlot { buffer, desc: *desc, counter: 0 }))
    }

    fn destroy_buffer_view(&self, view: BufferViewHandle) {
        self.shared.record("destroy_buffer_view");
        self.resources().buffer_views.remove(view);
    }

    fn create_texture(&self, desc: &TextureDesc, initial_data: Option<&[u8]>) -> Result<TextureHandle> {
        self.shared.record("create_texture");
        if desc.width == 0 || desc.height == 0 || desc.format.stride() == 0 {
            engine_bail!(SOURCE, "Invalid texture {}x{} {:?}", desc.width, desc.height, desc.format);
        }
        if desc.usage == ResourceUsage::Immutable && initial_data.is_none() {
            engine_bail!(SOURCE, "Immutable texture without initial data");
        }
        let size = (desc.top_mip_size() * desc.array_size.max(1) as u64) as usize;
        let mut data = vec![0u8; size];
        if let Some(initial) = initial_data {
            if initial.len() > size {
                engine_bail!(SOURCE, "Initial texture data larger than mip 0");
            }
            data[..initial.len()].copy_from_slice(initial);
        }
        Ok(self.resources().textures.insert(TextureSlot { desc: *desc, data }))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.shared.record("destroy_texture");
        self.resources().textures.remove(texture);
    }

    fn create_texture_view(&self, texture: TextureHandle, desc: &TextureViewDesc) -> Result<TextureViewHandle> {
        self.shared.record("create_texture_view");
        let mut resources = self.resources();
        let bind_flags = resources.texture(texture)?.desc.bind_flags;
        let required = match desc.kind {
            TextureViewKind::ReadOnly => BindFlags::SHADER_RESOURCE,
            TextureViewKind::ReadWrite => BindFlags::UNORDERED_ACCESS,
            TextureViewKind::RenderTarget => BindFlags::RENDER_TARGET,
            TextureViewKind::DepthStencil => BindFlags::DEPTH_STENCIL,
        };
        if !bind_flags.contains(required) {
            engine_bail!(SOURCE, "{:?} view on a texture without {:?}", desc.kind, required);
        }
        Ok(resources.texture_views.insert(TextureViewSlot { texture, desc: *desc }))
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) {
        self.shared.record("destroy_texture_view");
        self.resources().texture_views.remove(view);
    }

    fn create_shader(&self, desc: &ShaderDesc<'_>) -> Result<ShaderHandle> {
        self.shared.record("create_shader");
        if desc.entry_point.is_empty() {
            engine_bail!(SOURCE, "Shader '{}' has no entry point", desc.name);
        }
        Ok(self.resources().shaders.insert(ShaderSlot {
            stage: desc.stage,
            entry_point: desc.entry_point.to_string(),
        }))
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        self.shared.record("destroy_shader");
        self.resources().shaders.remove(shader);
    }

    fn create_input_layout(&self, desc: &InputLayoutDesc, vertex_shader: ShaderHandle) -> Result<InputLayoutHandle> {
        self.shared.record("create_input_layout");
        let mut resources = self.resources();
        match resources.shaders.get(vertex_shader) {
            Some(shader) if shader.stage == ShaderStage::Vertex => {}
            _ => engine_bail!(SOURCE, "Input layout needs a vertex shader"),
        }
        Ok(resources.input_layouts.insert(desc.clone()))
    }

    fn destroy_input_layout(&self, layout: InputLayoutHandle) {
        self.shared.record("destroy_input_layout");
        self.resources().input_layouts.remove(layout);
    }

    fn create_blend_state(&self, desc: &BlendDesc) -> Result<BlendStateHandle> {
        self.shared.record("create_blend_state");
        Ok(self.resources().blend_states.insert(*desc))
    }

    fn create_rasterizer_state(&self, desc: &RasterizerDesc) -> Result<RasterizerStateHandle> {
        self.shared.record("create_rasterizer_state");
        Ok(self.resources().rasterizer_states.insert(*desc))
    }

    fn create_depth_stencil_state(&self, desc: &DepthStencilDesc) -> Result<DepthStencilStateHandle> {
        self.shared.record("create_depth_stencil_state");
        Ok(self.resources().depth_stencil_states.insert(*desc))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        self.shared.record("create_sampler");
        Ok(self.resources().samplers.insert(*desc))
    }

    fn destroy_blend_state(&self, state: BlendStateHandle) {
        self.shared.record("destroy_blend_state");
        self.resources().blend_states.remove(state);
    }

    fn destroy_rasterizer_state(&self, state: RasterizerStateHandle) {
        self.shared.record("destroy_rasterizer_state");
        self.resources().rasterizer_states.remove(state);
    }

    fn destroy_depth_stencil_state(&self, state: DepthStencilStateHandle) {
        self.shared.record("destroy_depth_stencil_state");
        self.resources().depth_stencil_states.remove(state);
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.shared.record("destroy_sampler");
        self.resources().samplers.remove(sampler);
    }

    fn map_buffer(&self, buffer: BufferHandle, mode: MapMode) -> Result<NonNull<u8>> {
        self.shared.record("map_buffer");
        let mut resources = self.resources();
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
        slot.mapped = true;
        // The byte vector is never resized, so the pointer stays valid until the buffer is destroyed.
        NonNull::new(slot.data.as_mut_ptr()).ok_or_else(|| Error::BackendError("null mapping".to_string()))
    }

    fn unmap_buffer(&self, buffer: BufferHandle) {
        self.shared.record("unmap_buffer");
        if let Some(slot) = self.resources().buffers.get_mut(buffer) {
            slot.mapped = false;
        }
    }

    fn update_subresource(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.shared.record("update_subresource");
        let mut resources = self.resources();
        let slot = resources.buffer_mut(buffer)?;
        if slot.desc.usage != ResourceUsage::Default {
            engine_bail!(SOURCE, "update_subresource on a {:?} buffer", slot.desc.usage);
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > slot.data.len() {
            engine_bail!(SOURCE, "update_subresource range {}..{} outside the buffer", start, end);
        }
        slot.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_query(&self, kind: QueryKind) -> Result<QueryHandle> {
        self.shared.record("create_query");
        match kind {
            QueryKind::Timestamp => Ok(self.resources().queries.insert(None)),
        }
    }

    fn destroy_query(&self, query: QueryHandle) {
        self.shared.record("destroy_query");
        self.resources().queries.remove(query);
    }

    fn query_data(&self, query: QueryHandle) -> Result<Option<u64>> {
        self.shared.record("query_data");
        self.resources().queries.get(query).copied().ok_or_else(|| missing("query"))
    }

    fn timestamp_frequency(&self) -> u64 {
        REFERENCE_TIMESTAMP_FREQUENCY
    }

    fn create_command_stream(&self) -> Result<Box<dyn CommandStream>> {
        self.shared.record("create_command_stream");
        Ok(Box::new(ReferenceCommandStream::new(Arc::clone(&self.shared))))
    }

    fn wait_idle(&self) -> Result<()> {
        self.shared.record("wait_idle");
        Ok(())
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
