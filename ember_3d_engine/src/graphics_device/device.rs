/// Native graphics API seam
///
/// `GraphicsDevice` creates and destroys native objects, `CommandStream` records
/// native commands. Both are implemented by a backend (the Vulkan crate) and by
/// the CPU reference device. Every method maps to exactly one native call, so
/// call counts observed on an implementation are the native call counts.

use std::ptr::NonNull;
use slotmap::new_key_type;
use crate::error::Result;
use crate::graphics_device::{
    BufferDesc, BufferViewDesc, TextureDesc, TextureViewDesc, Format,
    BlendDesc, DepthStencilDesc, RasterizerDesc, SamplerDesc, InputLayoutDesc,
    PrimitiveTopology, RenderPassDesc,
};

// ===== HANDLES =====

new_key_type! {
    /// Native buffer
    pub struct BufferHandle;
    /// Native buffer view (read-only or read-write)
    pub struct BufferViewHandle;
    /// Native texture
    pub struct TextureHandle;
    /// Native texture view
    pub struct TextureViewHandle;
    /// Native shader object for one stage
    pub struct ShaderHandle;
    pub struct InputLayoutHandle;
    pub struct BlendStateHandle;
    pub struct RasterizerStateHandle;
    pub struct DepthStencilStateHandle;
    pub struct SamplerHandle;
    pub struct QueryHandle;
}

/// A bindable shader view over a buffer or a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceView {
    Buffer(BufferViewHandle),
    Texture(TextureViewHandle),
}

impl From<BufferViewHandle> for ResourceView {
    fn from(view: BufferViewHandle) -> Self {
        ResourceView::Buffer(view)
    }
}

impl From<TextureViewHandle> for ResourceView {
    fn from(view: TextureViewHandle) -> Self {
        ResourceView::Texture(view)
    }
}

// ===== SHADERS =====

/// Programmable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Hull,
    Domain,
    Geometry,
    Compute,
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::Pixel,
        ShaderStage::Hull,
        ShaderStage::Domain,
        ShaderStage::Geometry,
        ShaderStage::Compute,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Compiled shader bytecode for one stage
#[derive(Debug, Clone, Copy)]
pub struct ShaderDesc<'a> {
    pub stage: ShaderStage,
    /// Backend bytecode (SPIR-V words as bytes for Vulkan)
    pub code: &'a [u8],
    pub entry_point: &'a str,
    /// Debug name
    pub name: &'a str,
}

// ===== MISC =====

/// CPU mapping mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Previous contents are discarded; the CPU writes the whole buffer
    WriteDiscard,
    /// Blocking read of GPU-written data
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// GPU timestamp written at `end_query`
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { x: 0.0, y: 0.0, width, height, min_depth: 0.0, max_depth: 1.0 }
    }
}

/// Scissor rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Initial count meaning "keep the current hidden counter value"
pub const KEEP_COUNTER: u32 = u32::MAX;

// ===== DEVICE =====

/// Native object factory
///
/// All methods take `&self`; implementations synchronize internally.
pub trait GraphicsDevice: Send + Sync {
    /// Create a buffer, optionally uploading `initial_data` (at most `desc.size` bytes)
    fn create_buffer(&self, desc: &BufferDesc, initial_data: Option<&[u8]>) -> Result<BufferHandle>;
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Create a read-only or read-write view over a byte range of a buffer
    fn create_buffer_view(&self, buffer: BufferHandle, desc: &BufferViewDesc) -> Result<BufferViewHandle>;
    fn destroy_buffer_view(&self, view: BufferViewHandle);

    fn create_texture(&self, desc: &TextureDesc, initial_data: Option<&[u8]>) -> Result<TextureHandle>;
    fn destroy_texture(&self, texture: TextureHandle);

    fn create_texture_view(&self, texture: TextureHandle, desc: &TextureViewDesc) -> Result<TextureViewHandle>;
    fn destroy_texture_view(&self, view: TextureViewHandle);

    fn create_shader(&self, desc: &ShaderDesc<'_>) -> Result<ShaderHandle>;
    fn destroy_shader(&self, shader: ShaderHandle);

    /// Create a vertex input layout validated against a vertex shader
    fn create_input_layout(&self, desc: &InputLayoutDesc, vertex_shader: ShaderHandle) -> Result<InputLayoutHandle>;
    fn destroy_input_layout(&self, layout: InputLayoutHandle);

    fn create_blend_state(&self, desc: &BlendDesc) -> Result<BlendStateHandle>;
    fn create_rasterizer_state(&self, desc: &RasterizerDesc) -> Result<RasterizerStateHandle>;
    fn create_depth_stencil_state(&self, desc: &DepthStencilDesc) -> Result<DepthStencilStateHandle>;
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerHandle>;
    fn destroy_blend_state(&self, state: BlendStateHandle);
    fn destroy_rasterizer_state(&self, state: RasterizerStateHandle);
    fn destroy_depth_stencil_state(&self, state: DepthStencilStateHandle);
    fn destroy_sampler(&self, sampler: SamplerHandle);

    /// Map a buffer for CPU access
    ///
    /// `Read` blocks until the GPU finished writing the buffer.
    /// The pointer stays valid until `unmap_buffer` and covers the whole buffer.
    fn map_buffer(&self, buffer: BufferHandle, mode: MapMode) -> Result<NonNull<u8>>;
    fn unmap_buffer(&self, buffer: BufferHandle);

    /// Driver-managed partial update of a Default-usage buffer
    fn update_subresource(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;

    fn create_query(&self, kind: QueryKind) -> Result<QueryHandle>;
    fn destroy_query(&self, query: QueryHandle);

    /// Resolved query value, None while the GPU has not reached it
    fn query_data(&self, query: QueryHandle) -> Result<Option<u64>>;

    /// Timestamp ticks per second
    fn timestamp_frequency(&self) -> u64;

    /// Create a command stream recording into the device's execution queue
    fn create_command_stream(&self) -> Result<Box<dyn CommandStream>>;

    /// Block until all submitted work has completed
    fn wait_idle(&self) -> Result<()>;
}

// ===== COMMAND STREAM =====

/// Native command recorder
///
/// Commands execute in recording order. Binding calls replace the bound objects
/// in the given slot range; `None` unbinds a slot.
pub trait CommandStream: Send {
    fn begin_event(&mut self, name: &str);
    fn end_event(&mut self);

    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>);
    fn set_input_layout(&mut self, layout: Option<InputLayoutHandle>);
    fn set_blend_state(&mut self, state: Option<BlendStateHandle>, blend_factor: [f32; 4], sample_mask: u32);
    fn set_rasterizer_state(&mut self, state: Option<RasterizerStateHandle>);
    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateHandle>, stencil_ref: u32);
    fn set_topology(&mut self, topology: PrimitiveTopology);
    fn set_viewport(&mut self, viewport: &Viewport);
    fn set_scissor_rect(&mut self, rect: &Rect);

    /// Bind vertex buffers; `strides` and `offsets` are parallel to `buffers`
    fn set_vertex_buffers(&mut self, start_slot: u32, buffers: &[Option<BufferHandle>], strides: &[u32], offsets: &[u32]);
    fn set_index_buffer(&mut self, buffer: Option<BufferHandle>, format: Format, offset: u32);

    fn set_constant_buffers(&mut self, stage: ShaderStage, start_slot: u32, buffers: &[Option<BufferHandle>]);
    fn set_samplers(&mut self, stage: ShaderStage, start_slot: u32, samplers: &[Option<SamplerHandle>]);
    fn set_shader_resources(&mut self, stage: ShaderStage, start_slot: u32, views: &[Option<ResourceView>]);

    /// Bind compute read-write views
    ///
    /// `initial_counts` is parallel to `views`; each entry resets the view's
    /// hidden counter unless it is `KEEP_COUNTER`.
    fn set_unordered_access_views(&mut self, start_slot: u32, views: &[Option<ResourceView>], initial_counts: &[u32]);

    fn begin_render_pass(&mut self, desc: &RenderPassDesc);
    fn end_render_pass(&mut self);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32);
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, start_index: u32, base_vertex: i32, start_instance: u32);
    /// Arguments `{vertex_count, instance_count, start_vertex, start_instance}` at `offset`
    fn draw_instanced_indirect(&mut self, args: BufferHandle, offset: u32);
    /// Arguments `{index_count, instance_count, start_index, base_vertex, start_instance}` at `offset`
    fn draw_indexed_instanced_indirect(&mut self, args: BufferHandle, offset: u32);
    fn dispatch(&mut self, x: u32, y: u32, z: u32);
    /// Arguments `{x, y, z}` at `offset`
    fn dispatch_indirect(&mut self, args: BufferHandle, offset: u32);

    fn copy_buffer(&mut self, dst: BufferHandle, dst_offset: u64, src: BufferHandle, src_offset: u64, size: u64);
    fn copy_texture(&mut self, dst: TextureHandle, src: TextureHandle);
    /// Write the hidden counter of `src_view` as a u32 at `dst_offset`
    fn copy_structure_count(&mut self, dst: BufferHandle, dst_offset: u32, src_view: BufferViewHandle);

    fn clear_read_write_float(&mut self, view: ResourceView, values: [f32; 4]);
    fn clear_read_write_uint(&mut self, view: ResourceView, values: [u32; 4]);
    fn clear_render_target(&mut self, view: TextureViewHandle, color: [f32; 4]);
    fn clear_depth_stencil(&mut self, view: TextureViewHandle, depth: f32, stencil: u8, clear_stencil: bool);
    fn generate_mips(&mut self, view: TextureViewHandle);

    fn begin_query(&mut self, query: QueryHandle);
    fn end_query(&mut self, query: QueryHandle);

    /// Submit everything recorded so far
    fn flush(&mut self) -> Result<()>;
}
