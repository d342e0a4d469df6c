/// Command context - stateful recorder over a native command stream
///
/// The context remembers the shaders, fixed-function states, topology and input
/// layout it last bound and skips the native call when the same value is bound
/// again. The cache starts empty (everything unknown) and can be emptied again
/// with `invalidate_state_cache()` whenever the native state is changed behind
/// the context's back.
///
/// One thread records per context; commands execute in recording order.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use bytemuck::Pod;
use crate::error::Result;
use crate::graphics_device::{
    GraphicsDevice, CommandStream, ShaderStage, ShaderHandle, InputLayoutHandle,
    BlendStateHandle, RasterizerStateHandle, DepthStencilStateHandle, BufferHandle,
    BufferViewHandle, TextureViewHandle, QueryHandle, ResourceView, PrimitiveTopology,
    RenderPassDesc, Viewport, Rect, Format, BindFlags, BufferMiscFlags, KEEP_COUNTER,
};
use crate::renderer::{Buffer, Texture, BlendState, RasterizerState, DepthStencilState, Sampler};
use crate::shader::{Shader, InputLayout, GraphicsProgram, ComputeProgram};

// ===== STATE CACHE =====

/// Last bound values; `None` means unknown
#[derive(Default)]
struct StateCache {
    shaders: [Option<Option<ShaderHandle>>; ShaderStage::COUNT],
    input_layout: Option<Option<InputLayoutHandle>>,
    blend_state: Option<(Option<BlendStateHandle>, [u32; 4], u32)>,
    rasterizer_state: Option<Option<RasterizerStateHandle>>,
    depth_stencil_state: Option<(Option<DepthStencilStateHandle>, u32)>,
    topology: Option<PrimitiveTopology>,
}

/// Store `value` in `slot`; false if it was already there
fn replace_cached<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}

// ===== COMMAND CONTEXT =====

pub struct CommandContext {
    device: Arc<dyn GraphicsDevice>,
    stream: Box<dyn CommandStream>,
    cache: StateCache,
    in_render_pass: bool,
    recording: bool,
}

impl CommandContext {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Result<Self> {
        let stream = device.create_command_stream()?;
        Ok(Self {
            device,
            stream,
            cache: StateCache::default(),
            in_render_pass: false,
            recording: false,
        })
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> { &self.device }

    pub fn is_in_render_pass(&self) -> bool { self.in_render_pass }

    // ===== FRAME CONTROL =====

    /// Start recording a frame
    pub fn begin(&mut self) {
        debug_assert!(!self.recording, "begin() called twice without end()");
        self.recording = true;
    }

    /// Finish recording a frame
    ///
    /// # Panics
    ///
    /// Panics if a render pass is still active.
    pub fn end(&mut self) {
        assert!(!self.in_render_pass, "end() called inside an active render pass");
        self.recording = false;
    }

    /// Submit everything recorded so far
    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()
    }

    /// Submit and block until the GPU is idle
    pub fn wait_for_gpu(&mut self) -> Result<()> {
        self.stream.flush()?;
        self.device.wait_idle()
    }

    /// Forget every cached binding
    ///
    /// Call after anything changed native state outside this context
    /// (device recreation, swapchain resize, foreign command recording).
    pub fn invalidate_state_cache(&mut self) {
        self.cache = StateCache::default();
    }

    // ===== DRAW / DISPATCH =====

    pub fn draw(&mut self, vertex_count: u32) {
        self.stream.draw(vertex_count, 1, 0, 0);
    }

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        self.stream.draw(vertex_count, instance_count, start_vertex, start_instance);
    }

    pub fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        self.stream.draw_indexed(index_count, 1, start_index, base_vertex, 0);
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.stream.draw_indexed(index_count, instance_count, start_index, base_vertex, start_instance);
    }

    /// Instanced draw with `{vertex_count, instance_count, start_vertex, start_instance}` read from `args`
    pub fn draw_indirect(&mut self, args: &Buffer, offset: u32) {
        debug_assert_indirect(args, offset, 16);
        self.stream.draw_instanced_indirect(args.handle(), offset);
    }

    /// Indexed instanced draw with
    /// `{index_count, instance_count, start_index, base_vertex, start_instance}` read from `args`
    pub fn draw_indexed_indirect(&mut self, args: &Buffer, offset: u32) {
        debug_assert_indirect(args, offset, 20);
        self.stream.draw_indexed_instanced_indirect(args.handle(), offset);
    }

    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.stream.dispatch(group_count_x, group_count_y, group_count_z);
    }

    /// Dispatch with `{x, y, z}` group counts read from `args`
    pub fn dispatch_indirect(&mut self, args: &Buffer, offset: u32) {
        debug_assert_indirect(args, offset, 12);
        self.stream.dispatch_indirect(args.handle(), offset);
    }

    // ===== COPIES / UPDATES =====

    /// Copy the whole of `src` into `dst`
    ///
    /// # Panics
    ///
    /// Panics if the buffers differ in size.
    pub fn copy_buffer(&mut self, dst: &Buffer, src: &Buffer) {
        assert_eq!(dst.size(), src.size(), "copy_buffer() between buffers of different sizes");
        self.stream.copy_buffer(dst.handle(), 0, src.handle(), 0, src.size());
    }

    /// Copy `size` bytes between byte ranges
    pub fn copy_buffer_region(&mut self, dst: &Buffer, dst_offset: u64, src: &Buffer, src_offset: u64, size: u64) {
        assert!(src_offset + size <= src.size(), "copy source range out of bounds");
        assert!(dst_offset + size <= dst.size(), "copy destination range out of bounds");
        self.stream.copy_buffer(dst.handle(), dst_offset, src.handle(), src_offset, size);
    }

    pub fn copy_texture(&mut self, dst: &Texture, src: &Texture) {
        debug_assert_eq!(dst.desc().format, src.desc().format);
        self.stream.copy_texture(dst.handle(), src.handle());
    }

    /// Write the hidden counter of `src_view` into `dst` at `dst_offset` as a u32
    pub fn copy_structure_count(&mut self, dst: &Buffer, dst_offset: u32, src_view: BufferViewHandle) {
        debug_assert!(dst_offset as u64 + 4 <= dst.size(), "structure count written out of bounds");
        self.stream.copy_structure_count(dst.handle(), dst_offset, src_view);
    }

    /// Usage-dependent buffer update (see `Buffer::update`)
    pub fn update_buffer(&mut self, buffer: &Buffer, data: &[u8]) -> Result<()> {
        buffer.update(data)
    }

    pub fn update_buffer_value<T: Pod>(&mut self, buffer: &Buffer, value: &T) -> Result<()> {
        buffer.update_value(value)
    }

    // ===== RENDER PASS =====

    /// # Panics
    ///
    /// Panics if a render pass is already active.
    pub fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        assert!(!self.in_render_pass, "begin_render_pass() while another render pass is active");
        self.in_render_pass = true;
        self.stream.begin_render_pass(desc);
    }

    /// # Panics
    ///
    /// Panics if no render pass is active.
    pub fn end_render_pass(&mut self) {
        assert!(self.in_render_pass, "end_render_pass() without begin_render_pass()");
        self.in_render_pass = false;
        self.stream.end_render_pass();
    }

    // ===== INPUT ASSEMBLER / RASTERIZER =====

    pub fn set_topology(&mut self, topology: PrimitiveTopology) {
        if replace_cached(&mut self.cache.topology, topology) {
            self.stream.set_topology(topology);
        }
    }

    /// Bind an index buffer; the index format comes from the buffer descriptor
    pub fn set_index_buffer(&mut self, buffer: Option<&Buffer>, offset: u32) {
        let format = buffer.map_or(Format::Unknown, |b| b.format());
        debug_assert!(buffer.map_or(true, |b| b.desc().bind_flags.contains(BindFlags::INDEX_BUFFER)));
        self.stream.set_index_buffer(buffer.map(Buffer::handle), format, offset);
    }

    pub fn set_vertex_buffer(&mut self, buffer: Option<&Buffer>, slot: u32) {
        self.set_vertex_buffers(slot, &[buffer]);
    }

    /// Bind vertex buffers; strides come from the buffer descriptors
    pub fn set_vertex_buffers(&mut self, start_slot: u32, buffers: &[Option<&Buffer>]) {
        let handles: Vec<Option<BufferHandle>> = buffers.iter().map(|b| b.map(Buffer::handle)).collect();
        let strides: Vec<u32> = buffers.iter().map(|b| b.map_or(0, Buffer::stride)).collect();
        let offsets = vec![0u32; buffers.len()];
        self.stream.set_vertex_buffers(start_slot, &handles, &strides, &offsets);
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.stream.set_viewport(viewport);
    }

    pub fn set_scissor_rect(&mut self, rect: &Rect) {
        self.stream.set_scissor_rect(rect);
    }

    pub fn set_input_layout(&mut self, layout: Option<&InputLayout>) {
        let handle = layout.map(InputLayout::handle);
        if replace_cached(&mut self.cache.input_layout, handle) {
            self.stream.set_input_layout(handle);
        }
    }

    pub fn set_depth_stencil_state(&mut self, state: Option<&DepthStencilState>, stencil_ref: u32) {
        let handle = state.map(DepthStencilState::handle);
        if replace_cached(&mut self.cache.depth_stencil_state, (handle, stencil_ref)) {
            self.stream.set_depth_stencil_state(handle, stencil_ref);
        }
    }

    pub fn set_rasterizer_state(&mut self, state: Option<&RasterizerState>) {
        let handle = state.map(RasterizerState::handle);
        if replace_cached(&mut self.cache.rasterizer_state, handle) {
            self.stream.set_rasterizer_state(handle);
        }
    }

    /// Bind a blend state; `blend_factor` defaults to opaque white
    pub fn set_blend_state(&mut self, state: Option<&BlendState>, blend_factor: Option<[f32; 4]>, sample_mask: u32) {
        let handle = state.map(BlendState::handle);
        let factor = blend_factor.unwrap_or([1.0; 4]);
        if replace_cached(&mut self.cache.blend_state, (handle, factor.map(f32::to_bits), sample_mask)) {
            self.stream.set_blend_state(handle, factor, sample_mask);
        }
    }

    // ===== CLEARS =====

    pub fn clear_read_write_float(&mut self, view: ResourceView, values: [f32; 4]) {
        self.stream.clear_read_write_float(view, values);
    }

    pub fn clear_read_write_uint(&mut self, view: ResourceView, values: [u32; 4]) {
        self.stream.clear_read_write_uint(view, values);
    }

    pub fn clear_render_target(&mut self, view: TextureViewHandle, color: [f32; 4]) {
        self.stream.clear_render_target(view, color);
    }

    pub fn clear_depth(&mut self, view: TextureViewHandle, depth: f32, stencil: u8, clear_stencil: bool) {
        self.stream.clear_depth_stencil(view, depth, stencil, clear_stencil);
    }

    // ===== SHADERS =====

    /// Bind a shader to `stage`; None unbinds the stage
    pub fn set_shader(&mut self, stage: ShaderStage, shader: Option<&Shader>) {
        debug_assert!(shader.map_or(true, |s| s.stage() == stage),
            "shader bound to the wrong stage");
        let handle = shader.map(Shader::handle);
        if replace_cached(&mut self.cache.shaders[stage.index()], handle) {
            self.stream.set_shader(stage, handle);
        }
    }

    /// Bind every graphics stage and the input layout of `program`
    ///
    /// Stages the program leaves empty are unbound.
    pub fn set_graphics_program(&mut self, program: &GraphicsProgram) {
        for stage in ShaderStage::ALL {
            if stage != ShaderStage::Compute {
                self.set_shader(stage, program.shader(stage).map(|s| s.as_ref()));
            }
        }
        self.set_input_layout(program.input_layout.as_deref());
    }

    pub fn set_compute_program(&mut self, program: &ComputeProgram) {
        self.set_shader(ShaderStage::Compute, Some(program.cs.as_ref()));
    }

    // ===== RESOURCE BINDING =====

    pub fn set_constant_buffer(&mut self, stage: ShaderStage, slot: u32, buffer: Option<&Buffer>) {
        self.set_constant_buffers(stage, slot, &[buffer]);
    }

    pub fn set_constant_buffers(&mut self, stage: ShaderStage, start_slot: u32, buffers: &[Option<&Buffer>]) {
        debug_assert!(buffers.iter().flatten().all(|b| b.desc().bind_flags.contains(BindFlags::CONSTANT_BUFFER)),
            "set_constant_buffers() with a buffer lacking the constant buffer bind flag");
        let handles: Vec<Option<BufferHandle>> = buffers.iter().map(|b| b.map(Buffer::handle)).collect();
        self.stream.set_constant_buffers(stage, start_slot, &handles);
    }

    pub fn set_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: Option<&Sampler>) {
        self.set_samplers(stage, slot, &[sampler]);
    }

    pub fn set_samplers(&mut self, stage: ShaderStage, start_slot: u32, samplers: &[Option<&Sampler>]) {
        let handles: Vec<_> = samplers.iter().map(|s| s.map(Sampler::handle)).collect();
        self.stream.set_samplers(stage, start_slot, &handles);
    }

    pub fn set_shader_resource_ro(&mut self, stage: ShaderStage, slot: u32, view: impl Into<ResourceView>) {
        self.stream.set_shader_resources(stage, slot, &[Some(view.into())]);
    }

    pub fn set_shader_resources_ro(&mut self, stage: ShaderStage, start_slot: u32, views: &[Option<ResourceView>]) {
        self.stream.set_shader_resources(stage, start_slot, views);
    }

    pub fn unset_shader_resources_ro(&mut self, stage: ShaderStage, start_slot: u32, count: u32) {
        let views = vec![None; count as usize];
        self.stream.set_shader_resources(stage, start_slot, &views);
    }

    /// Bind one read-write view, keeping its counter
    pub fn set_shader_resource_rw(&mut self, slot: u32, view: impl Into<ResourceView>) {
        self.stream.set_unordered_access_views(slot, &[Some(view.into())], &[KEEP_COUNTER]);
    }

    /// Bind read-write views
    ///
    /// `initial_counts` is parallel to `views`; `KEEP_COUNTER` (u32::MAX) keeps a
    /// view's hidden counter. Without counts every counter is kept.
    pub fn set_shader_resources_rw(&mut self, start_slot: u32, views: &[Option<ResourceView>], initial_counts: Option<&[u32]>) {
        match initial_counts {
            Some(counts) => {
                debug_assert_eq!(counts.len(), views.len(), "one initial count per read-write view");
                self.stream.set_unordered_access_views(start_slot, views, counts);
            }
            None => {
                let counts = vec![KEEP_COUNTER; views.len()];
                self.stream.set_unordered_access_views(start_slot, views, &counts);
            }
        }
    }

    pub fn unset_shader_resources_rw(&mut self, start_slot: u32, count: u32) {
        let views = vec![None; count as usize];
        let counts = vec![KEEP_COUNTER; count as usize];
        self.stream.set_unordered_access_views(start_slot, &views, &counts);
    }

    pub fn generate_mips(&mut self, view: TextureViewHandle) {
        self.stream.generate_mips(view);
    }

    // ===== QUERIES =====

    pub fn begin_query(&mut self, query: QueryHandle) {
        self.stream.begin_query(query);
    }

    pub fn end_query(&mut self, query: QueryHandle) {
        self.stream.end_query(query);
    }

    /// Resolved value of `query`, None if the GPU has not reached it yet
    pub fn query_data(&self, query: QueryHandle) -> Result<Option<u64>> {
        self.device.query_data(query)
    }

    // ===== EVENTS =====

    pub fn begin_event(&mut self, name: &str) {
        self.stream.begin_event(name);
    }

    pub fn end_event(&mut self) {
        self.stream.end_event();
    }

    /// Open a debug event that closes when the returned guard is dropped
    ///
    /// The guard dereferences to the context so recording continues through it.
    pub fn scoped_event(&mut self, name: &str) -> ScopedEvent<'_> {
        self.begin_event(name);
        ScopedEvent { ctx: self }
    }
}

fn debug_assert_indirect(args: &Buffer, offset: u32, arg_size: u64) {
    debug_assert!(args.desc().misc_flags.contains(BufferMiscFlags::INDIRECT_ARGS),
        "indirect arguments from a buffer without the indirect-args flag");
    debug_assert!(offset as u64 + arg_size <= args.size(), "indirect arguments out of bounds");
}

// ===== SCOPED EVENT =====

/// Debug event guard returned by `CommandContext::scoped_event`
pub struct ScopedEvent<'a> {
    ctx: &'a mut CommandContext,
}

impl Deref for ScopedEvent<'_> {
    type Target = CommandContext;

    fn deref(&self) -> &CommandContext {
        self.ctx
    }
}

impl DerefMut for ScopedEvent<'_> {
    fn deref_mut(&mut self) -> &mut CommandContext {
        self.ctx
    }
}

impl Drop for ScopedEvent<'_> {
    fn drop(&mut self) {
        self.ctx.end_event();
    }
}

#[cfg(test)]
#[path = "command_context_tests.rs"]
mod tests;
