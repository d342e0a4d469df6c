/// Reference command stream - executes commands as they are recorded

use std::sync::Arc;
use std::sync::atomic::Ordering;
use crate::error::{Error, Result};
use crate::engine_error;
use crate::graphics_device::{
    CommandStream, BufferHandle, BufferViewHandle, TextureHandle, TextureViewHandle, ShaderHandle,
    InputLayoutHandle, BlendStateHandle, RasterizerStateHandle, DepthStencilStateHandle,
    SamplerHandle, QueryHandle, ResourceView, ShaderStage, PrimitiveTopology, Format,
    Viewport, Rect, RenderPassDesc, ColorLoadOp, DepthLoadOp, KEEP_COUNTER,
};
use crate::reference::device::{lock, Resources, Shared, DrawRecord};
use crate::reference::kernel::{KernelContext, encode_texel};

const SOURCE: &str = "ember3d::ReferenceCommandStream";

#[derive(Default)]
struct StageBindings {
    shader: Option<ShaderHandle>,
    constant_buffers: Vec<Option<BufferHandle>>,
    shader_resources: Vec<Option<ResourceView>>,
}

#[derive(Default)]
struct Bindings {
    stages: [StageBindings; ShaderStage::COUNT],
    unordered_access: Vec<Option<ResourceView>>,
    index_buffer: Option<BufferHandle>,
    topology: PrimitiveTopology,
}

fn assign<T: Copy>(slots: &mut Vec<Option<T>>, start_slot: u32, values: &[Option<T>]) {
    let start = start_slot as usize;
    if slots.len() < start + values.len() {
        slots.resize(start + values.len(), None);
    }
    slots[start..start + values.len()].copy_from_slice(values);
}

/// Fill every 32-bit word of a byte range, cycling through `words`
fn fill_words(bytes: &mut [u8], words: &[u32]) {
    for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
        chunk.copy_from_slice(&words[i % words.len()].to_le_bytes());
    }
}

fn fill_texels(bytes: &mut [u8], texel: &[u8]) {
    if texel.is_empty() {
        return;
    }
    for chunk in bytes.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(texel);
    }
}

const DEPTH24_MASK: u32 = 0x00ff_ffff;

fn encode_depth(format: Format, depth: f32, stencil: u8) -> Vec<u8> {
    let depth = depth.clamp(0.0, 1.0);
    match format {
        Format::D16_UNORM => ((depth * 65535.0).round() as u16).to_le_bytes().to_vec(),
        Format::D24_UNORM_S8_UINT => {
            let packed = ((depth * 16_777_215.0).round() as u32 & DEPTH24_MASK) | ((stencil as u32) << 24);
            packed.to_le_bytes().to_vec()
        }
        other => encode_texel(other, [depth, 0.0, 0.0, 0.0]),
    }
}

pub struct ReferenceCommandStream {
    shared: Arc<Shared>,
    bindings: Bindings,
    in_render_pass: bool,
    event_depth: u32,
    pending_error: Option<Error>,
}

impl ReferenceCommandStream {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            bindings: Bindings::default(),
            in_render_pass: false,
            event_depth: 0,
            pending_error: None,
        }
    }

    /// Log a failed command; the first failure is reported by the next `flush`
    fn fail(&mut self, command: &str, err: Error) {
        engine_error!(SOURCE, "{} failed: {}", command, err);
        if self.pending_error.is_none() {
            self.pending_error = Some(err);
        }
    }

    fn check(&mut self, command: &str, result: Result<()>) {
        if let Err(err) = result {
            self.fail(command, err);
        }
    }

    fn entry_point(resources: &Resources, shader: Option<ShaderHandle>) -> Option<String> {
        shader.and_then(|handle| resources.shaders.get(handle)).map(|slot| slot.entry_point.clone())
    }

    fn run_dispatch(&self, groups: [u32; 3]) -> Result<()> {
        let compute = &self.bindings.stages[ShaderStage::Compute.index()];
        let shader = compute.shader
            .ok_or_else(|| Error::InvalidResource("dispatch without a compute shader".to_string()))?;

        let entry_point = {
            let resources = lock(&self.shared.resources);
            Self::entry_point(&resources, Some(shader))
                .ok_or_else(|| Error::InvalidResource("compute shader was destroyed".to_string()))?
        };
        let kernel = self.shared.kernel(&entry_point)
            .ok_or_else(|| Error::InvalidResource(format!("no reference kernel for '{}'", entry_point)))?;

        let mut resources = lock(&self.shared.resources);
        let mut ctx = KernelContext {
            resources: &mut *resources,
            constant_buffers: &compute.constant_buffers,
            shader_resources: &compute.shader_resources,
            unordered_access: &self.bindings.unordered_access,
        };
        for z in 0..groups[2] {
            for y in 0..groups[1] {
                for x in 0..groups[0] {
                    kernel.run_group(&mut ctx, [x, y, z])?;
                }
            }
        }
        Ok(())
    }

    fn read_args(&self, args: BufferHandle, offset: u32, count: usize) -> Result<Vec<u32>> {
        lock(&self.shared.resources).read_u32s(args, offset as u64, count)
    }

    fn record_draw(&mut self, indexed: bool, indirect: bool, counts: [u32; 4], base_vertex: i32) {
        let [element_count, instance_count, start_element, start_instance] = counts;
        let (vertex_shader, pixel_shader) = {
            let resources = lock(&self.shared.resources);
            (
                Self::entry_point(&resources, self.bindings.stages[ShaderStage::Vertex.index()].shader),
                Self::entry_point(&resources, self.bindings.stages[ShaderStage::Pixel.index()].shader),
            )
        };
        lock(&self.shared.draws).push(DrawRecord {
            indexed,
            indirect,
            element_count,
            instance_count,
            start_element,
            base_vertex,
            start_instance,
            topology: self.bindings.topology,
            vertex_shader,
            pixel_shader,
            index_buffer: if indexed { self.bindings.index_buffer } else { None },
        });
    }

    fn clear_view(&mut self, view: ResourceView, words: [u32; 4], float_values: Option<[f32; 4]>) -> Result<()> {
        let mut resources = lock(&self.shared.resources);
        match view {
            ResourceView::Buffer(view) => {
                let view = resources.buffer_view(view)?;
                let (buffer, start, len) = (view.buffer, view.desc.byte_offset() as usize, view.desc.byte_size() as usize);
                let channels = view.desc.format.channel_count().max(1) as usize;
                let data = &mut resources.buffer_mut(buffer)?.data;
                fill_words(&mut data[start..start + len], &words[..channels.min(4)]);
            }
            ResourceView::Texture(view) => {
                let texture = resources.texture_view(view)?.texture;
                let slot = resources.texture_mut(texture)?;
                let texel = match float_values {
                    Some(values) => encode_texel(slot.desc.format, values),
                    None => encode_texel(slot.desc.format, words.map(|w| w as f32)),
                };
                fill_texels(&mut slot.data, &texel);
            }
        }
        Ok(())
    }

    fn clear_color(&mut self, view: TextureViewHandle, color: [f32; 4]) -> Result<()> {
        let mut resources = lock(&self.shared.resources);
        let texture = resources.texture_view(view)?.texture;
        let slot = resources.texture_mut(texture)?;
        let texel = encode_texel(slot.desc.format, color);
        fill_texels(&mut slot.data, &texel);
        Ok(())
    }

    fn clear_depth(&mut self, view: TextureViewHandle, depth: f32, stencil: u8, clear_stencil: bool) -> Result<()> {
        let mut resources = lock(&self.shared.resources);
        let texture = resources.texture_view(view)?.texture;
        let slot = resources.texture_mut(texture)?;
        let texel = encode_depth(slot.desc.format, depth, stencil);
        if clear_stencil || !slot.desc.format.has_stencil() {
            fill_texels(&mut slot.data, &texel);
        } else {
            // Depth bits only, the stencil byte of each texel is kept
            let depth_bits = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]) & DEPTH24_MASK;
            for chunk in slot.data.chunks_exact_mut(4) {
                let old = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                chunk.copy_from_slice(&((old & !DEPTH24_MASK) | depth_bits).to_le_bytes());
            }
        }
        Ok(())
    }

    fn copy_bytes(&mut self, dst: BufferHandle, dst_offset: u64, src: BufferHandle, src_offset: u64, size: u64) -> Result<()> {
        let mut resources = lock(&self.shared.resources);
        let (src_start, dst_start, size) = (src_offset as usize, dst_offset as usize, size as usize);
        let bytes = {
            let data = &resources.buffer(src)?.data;
            if src_start + size > data.len() {
                return Err(Error::InvalidResource("copy source range outside the buffer".to_string()));
            }
            data[src_start..src_start + size].to_vec()
        };
        let data = &mut resources.buffer_mut(dst)?.data;
        if dst_start + size > data.len() {
            return Err(Error::InvalidResource("copy destination range outside the buffer".to_string()));
        }
        data[dst_start..dst_start + size].copy_from_slice(&bytes);
        Ok(())
    }
}

impl CommandStream for ReferenceCommandStream {
    fn begin_event(&mut self, _name: &str) {
        self.shared.record("begin_event");
        self.event_depth += 1;
    }

    fn end_event(&mut self) {
        self.shared.record("end_event");
        if self.event_depth == 0 {
            self.fail("end_event", Error::BackendError("end_event without begin_event".to_string()));
            return;
        }
        self.event_depth -= 1;
    }

    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>) {
        self.shared.record("set_shader");
        self.bindings.stages[stage.index()].shader = shader;
    }

    // Fixed-function state has no effect on recorded draws

    fn set_input_layout(&mut self, _layout: Option<InputLayoutHandle>) {
        self.shared.record("set_input_layout");
    }

    fn set_blend_state(&mut self, _state: Option<BlendStateHandle>, _blend_factor: [f32; 4], _sample_mask: u32) {
        self.shared.record("set_blend_state");
    }

    fn set_rasterizer_state(&mut self, _state: Option<RasterizerStateHandle>) {
        self.shared.record("set_rasterizer_state");
    }

    fn set_depth_stencil_state(&mut self, _state: Option<DepthStencilStateHandle>, _stencil_ref: u32) {
        self.shared.record("set_depth_stencil_state");
    }

    fn set_topology(&mut self, topology: PrimitiveTopology) {
        self.shared.record("set_topology");
        self.bindings.topology = topology;
    }

    fn set_viewport(&mut self, _viewport: &Viewport) {
        self.shared.record("set_viewport");
    }

    fn set_scissor_rect(&mut self, _rect: &Rect) {
        self.shared.record("set_scissor_rect");
    }

    fn set_vertex_buffers(&mut self, _start_slot: u32, _buffers: &[Option<BufferHandle>], _strides: &[u32], _offsets: &[u32]) {
        self.shared.record("set_vertex_buffers");
    }

    fn set_index_buffer(&mut self, buffer: Option<BufferHandle>, _format: Format, _offset: u32) {
        self.shared.record("set_index_buffer");
        self.bindings.index_buffer = buffer;
    }

    fn set_constant_buffers(&mut self, stage: ShaderStage, start_slot: u32, buffers: &[Option<BufferHandle>]) {
        self.shared.record("set_constant_buffers");
        assign(&mut self.bindings.stages[stage.index()].constant_buffers, start_slot, buffers);
    }

    fn set_samplers(&mut self, _stage: ShaderStage, _start_slot: u32, _samplers: &[Option<SamplerHandle>]) {
        self.shared.record("set_samplers");
    }

    fn set_shader_resources(&mut self, stage: ShaderStage, start_slot: u32, views: &[Option<ResourceView>]) {
        self.shared.record("set_shader_resources");
        assign(&mut self.bindings.stages[stage.index()].shader_resources, start_slot, views);
    }

    fn set_unordered_access_views(&mut self, start_slot: u32, views: &[Option<ResourceView>], initial_counts: &[u32]) {
        self.shared.record("set_unordered_access_views");
        assign(&mut self.bindings.unordered_access, start_slot, views);

        let mut resources = lock(&self.shared.resources);
        for (view, &count) in views.iter().zip(initial_counts) {
            if count == KEEP_COUNTER {
                continue;
            }
            if let Some(ResourceView::Buffer(view)) = view {
                if let Some(slot) = resources.buffer_views.get_mut(*view) {
                    if slot.desc.uav_flags.has_counter() {
                        slot.counter = count;
                    }
                }
            }
        }
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        self.shared.record("begin_render_pass");
        if self.in_render_pass {
            self.fail("begin_render_pass", Error::BackendError("render pass already active".to_string()));
            return;
        }
        self.in_render_pass = true;
        for attachment in &desc.color_attachments {
            if let ColorLoadOp::Clear(color) = attachment.load_op {
                let result = self.clear_color(attachment.view, color);
                self.check("begin_render_pass", result);
            }
        }
        if let Some(depth) = &desc.depth_attachment {
            if let DepthLoadOp::Clear { depth: value, stencil } = depth.load_op {
                let result = self.clear_depth(depth.view, value, stencil, true);
                self.check("begin_render_pass", result);
            }
        }
    }

    fn end_render_pass(&mut self) {
        self.shared.record("end_render_pass");
        self.in_render_pass = false;
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        self.shared.record("draw");
        self.record_draw(false, false, [vertex_count, instance_count, start_vertex, start_instance], 0);
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, start_index: u32, base_vertex: i32, start_instance: u32) {
        self.shared.record("draw_indexed");
        self.record_draw(true, false, [index_count, instance_count, start_index, start_instance], base_vertex);
    }

    fn draw_instanced_indirect(&mut self, args: BufferHandle, offset: u32) {
        self.shared.record("draw_instanced_indirect");
        match self.read_args(args, offset, 4) {
            Ok(a) => self.record_draw(false, true, [a[0], a[1], a[2], a[3]], 0),
            Err(err) => self.fail("draw_instanced_indirect", err),
        }
    }

    fn draw_indexed_instanced_indirect(&mut self, args: BufferHandle, offset: u32) {
        self.shared.record("draw_indexed_instanced_indirect");
        match self.read_args(args, offset, 5) {
            Ok(a) => self.record_draw(true, true, [a[0], a[1], a[2], a[4]], a[3] as i32),
            Err(err) => self.fail("draw_indexed_instanced_indirect", err),
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.shared.record("dispatch");
        let result = self.run_dispatch([x, y, z]);
        self.check("dispatch", result);
    }

    fn dispatch_indirect(&mut self, args: BufferHandle, offset: u32) {
        self.shared.record("dispatch_indirect");
        let result = self.read_args(args, offset, 3)
            .and_then(|a| self.run_dispatch([a[0], a[1], a[2]]));
        self.check("dispatch_indirect", result);
    }

    fn copy_buffer(&mut self, dst: BufferHandle, dst_offset: u64, src: BufferHandle, src_offset: u64, size: u64) {
        self.shared.record("copy_buffer");
        let result = self.copy_bytes(dst, dst_offset, src, src_offset, size);
        self.check("copy_buffer", result);
    }

    fn copy_texture(&mut self, dst: TextureHandle, src: TextureHandle) {
        self.shared.record("copy_texture");
        let result = (|| -> Result<()> {
            let mut resources = lock(&self.shared.resources);
            let bytes = resources.texture(src)?.data.clone();
            let target = &mut resources.texture_mut(dst)?.data;
            if target.len() != bytes.len() {
                return Err(Error::InvalidResource("copy_texture between textures of different sizes".to_string()));
            }
            target.copy_from_slice(&bytes);
            Ok(())
        })();
        self.check("copy_texture", result);
    }

    fn copy_structure_count(&mut self, dst: BufferHandle, dst_offset: u32, src_view: BufferViewHandle) {
        self.shared.record("copy_structure_count");
        let result = (|| -> Result<()> {
            let mut resources = lock(&self.shared.resources);
            let view = resources.buffer_view(src_view)?;
            if !view.desc.uav_flags.has_counter() {
                return Err(Error::InvalidResource("copy_structure_count from a view without a counter".to_string()));
            }
            let counter = view.counter;
            let data = &mut resources.buffer_mut(dst)?.data;
            let start = dst_offset as usize;
            if start + 4 > data.len() {
                return Err(Error::InvalidResource("copy_structure_count offset outside the buffer".to_string()));
            }
            data[start..start + 4].copy_from_slice(&counter.to_le_bytes());
            Ok(())
        })();
        self.check("copy_structure_count", result);
    }

    fn clear_read_write_float(&mut self, view: ResourceView, values: [f32; 4]) {
        self.shared.record("clear_read_write_float");
        let result = self.clear_view(view, values.map(f32::to_bits), Some(values));
        self.check("clear_read_write_float", result);
    }

    fn clear_read_write_uint(&mut self, view: ResourceView, values: [u32; 4]) {
        self.shared.record("clear_read_write_uint");
        let result = self.clear_view(view, values, None);
        self.check("clear_read_write_uint", result);
    }

    fn clear_render_target(&mut self, view: TextureViewHandle, color: [f32; 4]) {
        self.shared.record("clear_render_target");
        let result = self.clear_color(view, color);
        self.check("clear_render_target", result);
    }

    fn clear_depth_stencil(&mut self, view: TextureViewHandle, depth: f32, stencil: u8, clear_stencil: bool) {
        self.shared.record("clear_depth_stencil");
        let result = self.clear_depth(view, depth, stencil, clear_stencil);
        self.check("clear_depth_stencil", result);
    }

    fn generate_mips(&mut self, _view: TextureViewHandle) {
        // Only mip 0 is stored
        self.shared.record("generate_mips");
    }

    fn begin_query(&mut self, _query: QueryHandle) {
        self.shared.record("begin_query");
    }

    fn end_query(&mut self, query: QueryHandle) {
        self.shared.record("end_query");
        let now = self.shared.clock.load(Ordering::Relaxed);
        match lock(&self.shared.resources).queries.get_mut(query) {
            Some(value) => *value = Some(now),
            None => engine_error!(SOURCE, "end_query on an unknown query"),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.shared.record("flush");
        match self.pending_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
