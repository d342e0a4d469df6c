/// VulkanCommandStream - D3D-style binding state on top of the device recorder
///
/// Bindings are plain state until a draw or dispatch; the pipeline and the
/// push descriptors are resolved from whatever is bound at that moment.
/// A failing command is logged and skipped; the first failure is returned by
/// the next `flush`.

use ash::vk;
use std::sync::Arc;
use ember_3d_engine::ember3d::{Error, Result};
use ember_3d_engine::ember3d::device::{
    CommandStream, BufferHandle, BufferViewHandle, TextureHandle, TextureViewHandle, ShaderHandle,
    InputLayoutHandle, BlendStateHandle, RasterizerStateHandle, DepthStencilStateHandle,
    SamplerHandle, QueryHandle, ResourceView, ShaderStage, PrimitiveTopology, Format,
    Viewport, Rect, RenderPassDesc, TextureViewKind, BlendDesc, RasterizerDesc, DepthStencilDesc,
    KEEP_COUNTER, MAX_RENDER_TARGETS,
};
use ember_3d_engine::{engine_error, engine_warn};
use crate::vulkan_device::{missing, DeviceState, Resources};
use crate::vulkan_format::{
    color_load_op_to_vk, depth_load_op_to_vk, store_op_to_vk, index_type, aspect_flags,
};
use crate::vulkan_pipeline::{CachedPipeline, GraphicsPipelineKey, GraphicsPipelineState};
use crate::vulkan_recorder::{AttachmentTarget, PassAttachments};
use crate::vulkan_shader::{RegisterClass, ShaderBinding};

const SOURCE: &str = "ember3d::VulkanCommandStream";

/// Stages of a graphics pipeline, in key order
const GRAPHICS_STAGES: [ShaderStage; 5] = [
    ShaderStage::Vertex,
    ShaderStage::Pixel,
    ShaderStage::Hull,
    ShaderStage::Domain,
    ShaderStage::Geometry,
];

#[derive(Default)]
struct StageBindings {
    shader: Option<ShaderHandle>,
    constant_buffers: Vec<Option<BufferHandle>>,
    samplers: Vec<Option<SamplerHandle>>,
    shader_resources: Vec<Option<ResourceView>>,
}

#[derive(Clone, Copy)]
struct VertexBinding {
    buffer: BufferHandle,
    stride: u32,
    offset: u32,
}

/// Attachment formats of the open render pass
struct PassFormats {
    color_formats: Vec<vk::Format>,
    depth_format: vk::Format,
    stencil: bool,
    depth_read_only: bool,
    extent: vk::Extent2D,
}

/// A resolved descriptor, written as one push-descriptor entry
enum Descriptor {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
    Texel(vk::BufferView),
}

fn assign<T: Copy>(slots: &mut Vec<Option<T>>, start_slot: u32, values: &[Option<T>]) {
    let start = start_slot as usize;
    if slots.len() < start + values.len() {
        slots.resize(start + values.len(), None);
    }
    slots[start..start + values.len()].copy_from_slice(values);
}

fn bound<T: Copy>(slots: &[Option<T>], binding: &ShaderBinding) -> Result<T> {
    slots.get(binding.register.slot as usize).copied().flatten().ok_or_else(|| {
        Error::InvalidResource(format!(
            "nothing bound to {:?} slot {} of the {:?} stage",
            binding.register.class, binding.register.slot, binding.register.stage
        ))
    })
}

/// D3D viewports grow downward; flip through a negative height
fn viewport_to_vk(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y + viewport.height,
        width: viewport.width,
        height: -viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

fn scissor_to_vk(rect: &Rect) -> vk::Rect2D {
    let left = rect.left.max(0);
    let top = rect.top.max(0);
    vk::Rect2D {
        offset: vk::Offset2D { x: left, y: top },
        extent: vk::Extent2D {
            width: (rect.right - left).max(0) as u32,
            height: (rect.bottom - top).max(0) as u32,
        },
    }
}

pub struct VulkanCommandStream {
    state: Arc<DeviceState>,
    stages: [StageBindings; ShaderStage::COUNT],
    unordered_access: Vec<Option<ResourceView>>,
    input_layout: Option<InputLayoutHandle>,
    blend: Option<BlendStateHandle>,
    blend_factor: [f32; 4],
    sample_mask: u32,
    rasterizer: Option<RasterizerStateHandle>,
    depth_stencil: Option<DepthStencilStateHandle>,
    stencil_ref: u32,
    topology: PrimitiveTopology,
    viewport: Option<Viewport>,
    scissor: Option<Rect>,
    vertex_buffers: Vec<Option<VertexBinding>>,
    index_buffer: Option<(BufferHandle, vk::IndexType, u32)>,
    pass: Option<PassFormats>,
    event_depth: u32,
    pending_error: Option<Error>,
}

impl VulkanCommandStream {
    pub(crate) fn new(state: Arc<DeviceState>) -> Self {
        Self {
            state,
            stages: Default::default(),
            unordered_access: Vec::new(),
            input_layout: None,
            blend: None,
            blend_factor: [1.0; 4],
            sample_mask: u32::MAX,
            rasterizer: None,
            depth_stencil: None,
            stencil_ref: 0,
            topology: PrimitiveTopology::default(),
            viewport: None,
            scissor: None,
            vertex_buffers: Vec::new(),
            index_buffer: None,
            pass: None,
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

    // ===== DESCRIPTORS =====

    fn view_descriptor(resources: &Resources, view: ResourceView, binding: &ShaderBinding) -> Result<Descriptor> {
        let ty = binding.descriptor_type;
        match view {
            ResourceView::Buffer(handle) => {
                let view = resources.buffer_view(handle)?;
                let buffer = resources.buffer(view.buffer)?;
                match ty {
                    vk::DescriptorType::STORAGE_BUFFER => Ok(Descriptor::Buffer(vk::DescriptorBufferInfo {
                        buffer: buffer.buffer,
                        offset: buffer.base_offset() + view.desc.byte_offset(),
                        range: view.desc.byte_size(),
                    })),
                    vk::DescriptorType::UNIFORM_TEXEL_BUFFER | vk::DescriptorType::STORAGE_TEXEL_BUFFER => view
                        .texel_view(buffer)
                        .map(Descriptor::Texel)
                        .ok_or_else(|| Error::InvalidResource(format!("{:?} view bound to a typed buffer slot", view.desc.format))),
                    other => Err(Error::InvalidResource(format!("Buffer view bound to a {:?} slot", other))),
                }
            }
            ResourceView::Texture(handle) => {
                let view = resources.texture_view(handle)?;
                match ty {
                    vk::DescriptorType::SAMPLED_IMAGE | vk::DescriptorType::STORAGE_IMAGE => Ok(Descriptor::Image(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view.view,
                        image_layout: vk::ImageLayout::GENERAL,
                    })),
                    other => Err(Error::InvalidResource(format!("Texture view bound to a {:?} slot", other))),
                }
            }
        }
    }

    fn resolve_descriptor(&self, resources: &Resources, binding: &ShaderBinding) -> Result<Descriptor> {
        let stage = &self.stages[binding.register.stage.index()];
        match binding.register.class {
            RegisterClass::ConstantBuffer => {
                let buffer = resources.buffer(bound(&stage.constant_buffers, binding)?)?;
                Ok(Descriptor::Buffer(vk::DescriptorBufferInfo {
                    buffer: buffer.buffer,
                    offset: buffer.base_offset(),
                    range: buffer.desc.size,
                }))
            }
            RegisterClass::Sampler => {
                let sampler = *resources.samplers.get(bound(&stage.samplers, binding)?).ok_or_else(|| missing("sampler"))?;
                Ok(Descriptor::Image(vk::DescriptorImageInfo {
                    sampler,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }))
            }
            RegisterClass::ShaderResource => Self::view_descriptor(resources, bound(&stage.shader_resources, binding)?, binding),
            RegisterClass::UnorderedAccess => {
                let view = bound(&self.unordered_access, binding)?;
                if !binding.counter {
                    return Self::view_descriptor(resources, view, binding);
                }
                let counter = match view {
                    ResourceView::Buffer(handle) => resources.buffer_view(handle)?.counter.as_ref(),
                    ResourceView::Texture(_) => None,
                };
                let counter = counter.ok_or_else(|| {
                    Error::InvalidResource(format!("u{} needs an append/counter view", binding.register.slot))
                })?;
                Ok(Descriptor::Buffer(vk::DescriptorBufferInfo { buffer: counter.buffer, offset: 0, range: 4 }))
            }
        }
    }

    fn resolve_descriptors(&self, resources: &Resources, pipeline: &CachedPipeline) -> Result<Vec<(u32, vk::DescriptorType, Descriptor)>> {
        pipeline
            .bindings
            .iter()
            .map(|layout| {
                let descriptor = self.resolve_descriptor(resources, &layout.binding)?;
                Ok((layout.binding.binding, layout.binding.descriptor_type, descriptor))
            })
            .collect()
    }

    fn push_descriptors(&self, cmd: vk::CommandBuffer, pipeline: &CachedPipeline, descriptors: &[(u32, vk::DescriptorType, Descriptor)]) {
        if descriptors.is_empty() {
            return;
        }
        let writes: Vec<vk::WriteDescriptorSet> = descriptors
            .iter()
            .map(|(binding, ty, descriptor)| {
                let write = vk::WriteDescriptorSet::default().dst_binding(*binding).descriptor_type(*ty);
                match descriptor {
                    Descriptor::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    Descriptor::Image(info) => write.image_info(std::slice::from_ref(info)),
                    Descriptor::Texel(view) => write.texel_buffer_view(std::slice::from_ref(view)),
                }
            })
            .collect();
        unsafe {
            self.state.ctx.push_descriptor.cmd_push_descriptor_set(cmd, pipeline.bind_point, pipeline.layout, 0, &writes);
        }
    }

    // ===== PIPELINES =====

    fn graphics_pipeline(&self, resources: &Resources, pass: &PassFormats) -> Result<Arc<CachedPipeline>> {
        let key = GraphicsPipelineKey {
            shaders: GRAPHICS_STAGES.map(|stage| self.stages[stage.index()].shader),
            input_layout: self.input_layout,
            blend: self.blend,
            sample_mask: self.sample_mask,
            rasterizer: self.rasterizer,
            depth_stencil: self.depth_stencil,
            topology: self.topology,
            color_formats: pass.color_formats.clone(),
            depth_format: pass.depth_format,
            stencil: pass.stencil,
            depth_read_only: pass.depth_read_only,
        };

        self.state.pipelines().graphics(&self.state.ctx, &key, || {
            let shaders = key.shaders.iter().flatten().map(|&handle| resources.shader(handle)).collect::<Result<Vec<_>>>()?;
            let input_layout = match key.input_layout {
                Some(handle) => Some(resources.input_layouts.get(handle).ok_or_else(|| missing("input layout"))?),
                None => None,
            };
            let vertex_inputs = shaders.iter().any(|shader| shader.stage == ShaderStage::Vertex && !shader.inputs.is_empty());
            if vertex_inputs && input_layout.is_none() {
                return Err(Error::InvalidResource("Vertex shader reads inputs but no input layout is bound".to_string()));
            }
            let blend = match key.blend {
                Some(handle) => *resources.blend_states.get(handle).ok_or_else(|| missing("blend state"))?,
                None => BlendDesc::default(),
            };
            let rasterizer = match key.rasterizer {
                Some(handle) => *resources.rasterizer_states.get(handle).ok_or_else(|| missing("rasterizer state"))?,
                None => RasterizerDesc::default(),
            };
            let depth_stencil = match key.depth_stencil {
                Some(handle) => *resources.depth_stencil_states.get(handle).ok_or_else(|| missing("depth-stencil state"))?,
                None => DepthStencilDesc::default(),
            };
            Ok(GraphicsPipelineState { shaders, input_layout, blend, rasterizer, depth_stencil })
        })
    }

    /// Bind the graphics pipeline and every draw-time state, then record `command`
    fn draw_with(
        &mut self,
        command: &str,
        indexed: bool,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer, &Resources) -> Result<()>,
    ) {
        let result = self.record_draw(indexed, record);
        self.check(command, result);
    }

    fn record_draw(
        &self,
        indexed: bool,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer, &Resources) -> Result<()>,
    ) -> Result<()> {
        let Some(pass) = self.pass.as_ref() else {
            return Err(Error::InvalidResource("Draw outside a render pass".to_string()));
        };
        let state = &self.state;
        let resources = state.resources();
        let pipeline = self.graphics_pipeline(&resources, pass)?;
        let descriptors = self.resolve_descriptors(&resources, &pipeline)?;

        let mut vertex_buffers = Vec::new();
        if let Some(handle) = self.input_layout {
            let layout = resources.input_layouts.get(handle).ok_or_else(|| missing("input layout"))?;
            for binding in &layout.bindings {
                let Some(Some(vertex)) = self.vertex_buffers.get(binding.binding as usize) else {
                    return Err(Error::InvalidResource(format!("No vertex buffer bound to slot {}", binding.binding)));
                };
                let buffer = resources.buffer(vertex.buffer)?;
                vertex_buffers.push((binding.binding, buffer.buffer, buffer.base_offset() + vertex.offset as u64, vertex.stride as u64));
            }
        }

        let index_buffer = match (indexed, self.index_buffer) {
            (false, _) => None,
            (true, Some((handle, ty, offset))) => {
                let buffer = resources.buffer(handle)?;
                Some((buffer.buffer, buffer.base_offset() + offset as u64, ty))
            }
            (true, None) => return Err(Error::InvalidResource("Indexed draw without an index buffer".to_string())),
        };

        let rasterizer = match self.rasterizer {
            Some(handle) => resources.rasterizer_states.get(handle).copied().unwrap_or_default(),
            None => RasterizerDesc::default(),
        };
        let viewport = self.viewport.unwrap_or_else(|| Viewport::new(pass.extent.width as f32, pass.extent.height as f32));
        let scissor = match (rasterizer.scissor_enable, self.scissor.as_ref()) {
            (true, Some(rect)) => scissor_to_vk(rect),
            _ => vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: pass.extent },
        };

        let mut recorder = state.recorder();
        let cmd = recorder.inside_pass()?;
        let device = &state.ctx.device;
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            self.push_descriptors(cmd, &pipeline, &descriptors);
            device.cmd_set_viewport(cmd, 0, &[viewport_to_vk(&viewport)]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_set_blend_constants(cmd, &self.blend_factor);
            device.cmd_set_stencil_reference(cmd, vk::StencilFaceFlags::FRONT_AND_BACK, self.stencil_ref);
            for (binding, buffer, offset, stride) in vertex_buffers {
                device.cmd_bind_vertex_buffers2(cmd, binding, &[buffer], &[offset], None, Some(&[stride]));
            }
            if let Some((buffer, offset, ty)) = index_buffer {
                device.cmd_bind_index_buffer(cmd, buffer, offset, ty);
            }
        }
        record(device, cmd, &resources)
    }

    /// Bind the compute pipeline and its descriptors, then record `command`
    fn dispatch_with(
        &mut self,
        command: &str,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer, &Resources) -> Result<()>,
    ) {
        let result = (|| -> Result<()> {
            let Some(handle) = self.stages[ShaderStage::Compute.index()].shader else {
                return Err(Error::InvalidResource("Dispatch without a compute shader".to_string()));
            };
            let state = &self.state;
            let resources = state.resources();
            let pipeline = state.pipelines().compute(&state.ctx, handle, resources.shader(handle)?)?;
            let descriptors = self.resolve_descriptors(&resources, &pipeline)?;

            let mut recorder = state.recorder();
            let cmd = recorder.outside_pass()?;
            unsafe { state.ctx.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.pipeline) };
            self.push_descriptors(cmd, &pipeline, &descriptors);
            record(&state.ctx.device, cmd, &resources)
        })();
        self.check(command, result);
    }

    /// Record a transfer or clear outside any render pass instance
    fn transfer_with(
        &mut self,
        command: &str,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer, &Resources) -> Result<()>,
    ) {
        let result = (|| -> Result<()> {
            let resources = self.state.resources();
            let mut recorder = self.state.recorder();
            let cmd = recorder.outside_pass()?;
            record(&self.state.ctx.device, cmd, &resources)
        })();
        self.check(command, result);
    }

    fn reset_counters(&self, views: &[Option<ResourceView>], initial_counts: &[u32]) -> Result<()> {
        let resources = self.state.resources();
        let mut recorder = None;
        for (view, &count) in views.iter().zip(initial_counts) {
            if count == KEEP_COUNTER {
                continue;
            }
            let Some(ResourceView::Buffer(handle)) = view else {
                continue;
            };
            let Some(counter) = resources.buffer_view(*handle)?.counter.as_ref() else {
                continue;
            };
            let recorder = recorder.get_or_insert_with(|| self.state.recorder());
            let cmd = recorder.outside_pass()?;
            unsafe { self.state.ctx.device.cmd_update_buffer(cmd, counter.buffer, 0, &count.to_le_bytes()) };
        }
        Ok(())
    }

    fn open_pass(&mut self, desc: &RenderPassDesc) -> Result<()> {
        if self.pass.is_some() {
            return Err(Error::InvalidResource("Render pass already active".to_string()));
        }
        if desc.color_attachments.len() > MAX_RENDER_TARGETS {
            return Err(Error::InvalidResource(format!("{} color attachments, at most {}", desc.color_attachments.len(), MAX_RENDER_TARGETS)));
        }
        let resources = self.state.resources();

        let mut colors = Vec::with_capacity(desc.color_attachments.len());
        let mut color_formats = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let view = resources.texture_view(attachment.view)?;
            if view.desc.kind != TextureViewKind::RenderTarget {
                return Err(Error::InvalidResource(format!("{:?} view used as a color attachment", view.desc.kind)));
            }
            let (load_op, clear) = color_load_op_to_vk(attachment.load_op);
            colors.push(AttachmentTarget { view: view.view, load_op, store_op: store_op_to_vk(attachment.store_op), clear });
            color_formats.push(view.format);
        }

        let mut depth = None;
        let mut depth_format = vk::Format::UNDEFINED;
        let mut stencil = false;
        let mut depth_read_only = false;
        if let Some(attachment) = &desc.depth_attachment {
            let view = resources.texture_view(attachment.view)?;
            if view.desc.kind != TextureViewKind::DepthStencil {
                return Err(Error::InvalidResource(format!("{:?} view used as a depth attachment", view.desc.kind)));
            }
            let (load_op, clear) = depth_load_op_to_vk(attachment.load_op);
            // A read-only attachment keeps its contents for later sampling
            let store_op = if attachment.read_only { vk::AttachmentStoreOp::NONE } else { store_op_to_vk(attachment.store_op) };
            depth = Some(AttachmentTarget { view: view.view, load_op, store_op, clear });
            depth_format = view.format;
            stencil = view.range.aspect_mask.contains(vk::ImageAspectFlags::STENCIL);
            depth_read_only = attachment.read_only;
        }

        let extent = vk::Extent2D { width: desc.width, height: desc.height };
        self.state.recorder().begin_pass(PassAttachments { colors, depth, stencil, extent })?;
        self.pass = Some(PassFormats { color_formats, depth_format, stencil, depth_read_only, extent });
        Ok(())
    }

    fn clear_view(&mut self, command: &str, view: ResourceView, float_values: Option<[f32; 4]>, uint_values: [u32; 4]) {
        self.transfer_with(command, |device, cmd, resources| {
            match view {
                ResourceView::Buffer(handle) => {
                    let view = resources.buffer_view(handle)?;
                    let buffer = resources.buffer(view.buffer)?;
                    let channels = view.desc.format.channel_count().max(1) as usize;
                    if uint_values[..channels.min(4)].iter().any(|&v| v != uint_values[0]) {
                        engine_warn!(SOURCE, "Buffer clears fill one 32-bit value; using channel 0 of {:?}", uint_values);
                    }
                    unsafe {
                        device.cmd_fill_buffer(
                            cmd,
                            buffer.buffer,
                            buffer.base_offset() + view.desc.byte_offset(),
                            view.desc.byte_size() & !3,
                            uint_values[0],
                        );
                    }
                }
                ResourceView::Texture(handle) => {
                    let view = resources.texture_view(handle)?;
                    let texture = resources.texture(view.texture)?;
                    let color = match float_values {
                        Some(values) => vk::ClearColorValue { float32: values },
                        None => vk::ClearColorValue { uint32: uint_values },
                    };
                    unsafe { device.cmd_clear_color_image(cmd, texture.image, vk::ImageLayout::GENERAL, &color, &[view.range]) };
                }
            }
            Ok(())
        });
    }
}

impl CommandStream for VulkanCommandStream {
    fn begin_event(&mut self, name: &str) {
        let result = self.state.recorder().push_label(name);
        self.event_depth += 1;
        self.check("begin_event", result);
    }

    fn end_event(&mut self) {
        if self.event_depth == 0 {
            self.fail("end_event", Error::BackendError("end_event without begin_event".to_string()));
            return;
        }
        self.event_depth -= 1;
        self.state.recorder().pop_label();
    }

    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>) {
        self.stages[stage.index()].shader = shader;
    }

    fn set_input_layout(&mut self, layout: Option<InputLayoutHandle>) {
        self.input_layout = layout;
    }

    fn set_blend_state(&mut self, state: Option<BlendStateHandle>, blend_factor: [f32; 4], sample_mask: u32) {
        self.blend = state;
        self.blend_factor = blend_factor;
        self.sample_mask = sample_mask;
    }

    fn set_rasterizer_state(&mut self, state: Option<RasterizerStateHandle>) {
        self.rasterizer = state;
    }

    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateHandle>, stencil_ref: u32) {
        self.depth_stencil = state;
        self.stencil_ref = stencil_ref;
    }

    fn set_topology(&mut self, topology: PrimitiveTopology) {
        self.topology = topology;
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.viewport = Some(*viewport);
    }

    fn set_scissor_rect(&mut self, rect: &Rect) {
        self.scissor = Some(*rect);
    }

    fn set_vertex_buffers(&mut self, start_slot: u32, buffers: &[Option<BufferHandle>], strides: &[u32], offsets: &[u32]) {
        let bindings: Vec<Option<VertexBinding>> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| buffer.map(|buffer| VertexBinding {
                buffer,
                stride: strides.get(i).copied().unwrap_or(0),
                offset: offsets.get(i).copied().unwrap_or(0),
            }))
            .collect();
        assign(&mut self.vertex_buffers, start_slot, &bindings);
    }

    fn set_index_buffer(&mut self, buffer: Option<BufferHandle>, format: Format, offset: u32) {
        self.index_buffer = buffer.map(|buffer| (buffer, index_type(format), offset));
    }

    fn set_constant_buffers(&mut self, stage: ShaderStage, start_slot: u32, buffers: &[Option<BufferHandle>]) {
        assign(&mut self.stages[stage.index()].constant_buffers, start_slot, buffers);
    }

    fn set_samplers(&mut self, stage: ShaderStage, start_slot: u32, samplers: &[Option<SamplerHandle>]) {
        assign(&mut self.stages[stage.index()].samplers, start_slot, samplers);
    }

    fn set_shader_resources(&mut self, stage: ShaderStage, start_slot: u32, views: &[Option<ResourceView>]) {
        assign(&mut self.stages[stage.index()].shader_resources, start_slot, views);
    }

    fn set_unordered_access_views(&mut self, start_slot: u32, views: &[Option<ResourceView>], initial_counts: &[u32]) {
        assign(&mut self.unordered_access, start_slot, views);
        let result = self.reset_counters(views, initial_counts);
        self.check("set_unordered_access_views", result);
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        let result = self.open_pass(desc);
        self.check("begin_render_pass", result);
    }

    fn end_render_pass(&mut self) {
        if self.pass.take().is_some() {
            self.state.recorder().end_pass();
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        self.draw_with("draw", false, |device, cmd, _| {
            unsafe { device.cmd_draw(cmd, vertex_count, instance_count, start_vertex, start_instance) };
            Ok(())
        });
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, start_index: u32, base_vertex: i32, start_instance: u32) {
        self.draw_with("draw_indexed", true, |device, cmd, _| {
            unsafe { device.cmd_draw_indexed(cmd, index_count, instance_count, start_index, base_vertex, start_instance) };
            Ok(())
        });
    }

    fn draw_instanced_indirect(&mut self, args: BufferHandle, offset: u32) {
        self.draw_with("draw_instanced_indirect", false, |device, cmd, resources| {
            let buffer = resources.buffer(args)?;
            let stride = std::mem::size_of::<vk::DrawIndirectCommand>() as u32;
            unsafe { device.cmd_draw_indirect(cmd, buffer.buffer, buffer.base_offset() + offset as u64, 1, stride) };
            Ok(())
        });
    }

    fn draw_indexed_instanced_indirect(&mut self, args: BufferHandle, offset: u32) {
        self.draw_with("draw_indexed_instanced_indirect", true, |device, cmd, resources| {
            let buffer = resources.buffer(args)?;
            let stride = std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32;
            unsafe { device.cmd_draw_indexed_indirect(cmd, buffer.buffer, buffer.base_offset() + offset as u64, 1, stride) };
            Ok(())
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.dispatch_with("dispatch", |device, cmd, _| {
            unsafe { device.cmd_dispatch(cmd, x, y, z) };
            Ok(())
        });
    }

    fn dispatch_indirect(&mut self, args: BufferHandle, offset: u32) {
        self.dispatch_with("dispatch_indirect", |device, cmd, resources| {
            let buffer = resources.buffer(args)?;
            unsafe { device.cmd_dispatch_indirect(cmd, buffer.buffer, buffer.base_offset() + offset as u64) };
            Ok(())
        });
    }

    fn copy_buffer(&mut self, dst: BufferHandle, dst_offset: u64, src: BufferHandle, src_offset: u64, size: u64) {
        self.transfer_with("copy_buffer", |device, cmd, resources| {
            let (dst, src) = (resources.buffer(dst)?, resources.buffer(src)?);
            if dst_offset + size > dst.desc.size || src_offset + size > src.desc.size {
                return Err(Error::InvalidResource("copy_buffer range outside the buffers".to_string()));
            }
            let region = vk::BufferCopy {
                src_offset: src.base_offset() + src_offset,
                dst_offset: dst.base_offset() + dst_offset,
                size,
            };
            unsafe { device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]) };
            Ok(())
        });
    }

    fn copy_texture(&mut self, dst: TextureHandle, src: TextureHandle) {
        self.transfer_with("copy_texture", |device, cmd, resources| {
            let (dst, src) = (resources.texture(dst)?, resources.texture(src)?);
            if (dst.desc.width, dst.desc.height, dst.desc.format) != (src.desc.width, src.desc.height, src.desc.format)
                || dst.mip_levels != src.mip_levels
                || dst.layers != src.layers
            {
                return Err(Error::InvalidResource("copy_texture between textures of different shapes".to_string()));
            }
            let aspect_mask = aspect_flags(src.desc.format);
            let regions: Vec<vk::ImageCopy> = (0..src.mip_levels)
                .map(|level| {
                    let subresource = vk::ImageSubresourceLayers {
                        aspect_mask,
                        mip_level: level,
                        base_array_layer: 0,
                        layer_count: src.layers,
                    };
                    vk::ImageCopy {
                        src_subresource: subresource,
                        src_offset: vk::Offset3D::default(),
                        dst_subresource: subresource,
                        dst_offset: vk::Offset3D::default(),
                        extent: src.extent(level),
                    }
                })
                .collect();
            unsafe {
                device.cmd_copy_image(cmd, src.image, vk::ImageLayout::GENERAL, dst.image, vk::ImageLayout::GENERAL, &regions);
            }
            Ok(())
        });
    }

    fn copy_structure_count(&mut self, dst: BufferHandle, dst_offset: u32, src_view: BufferViewHandle) {
        self.transfer_with("copy_structure_count", |device, cmd, resources| {
            let counter = resources.buffer_view(src_view)?.counter.as_ref()
                .ok_or_else(|| Error::InvalidResource("copy_structure_count from a view without a counter".to_string()))?;
            let dst = resources.buffer(dst)?;
            if dst_offset as u64 + 4 > dst.desc.size {
                return Err(Error::InvalidResource("copy_structure_count offset outside the buffer".to_string()));
            }
            let region = vk::BufferCopy { src_offset: 0, dst_offset: dst.base_offset() + dst_offset as u64, size: 4 };
            unsafe { device.cmd_copy_buffer(cmd, counter.buffer, dst.buffer, &[region]) };
            Ok(())
        });
    }

    fn clear_read_write_float(&mut self, view: ResourceView, values: [f32; 4]) {
        self.clear_view("clear_read_write_float", view, Some(values), values.map(f32::to_bits));
    }

    fn clear_read_write_uint(&mut self, view: ResourceView, values: [u32; 4]) {
        self.clear_view("clear_read_write_uint", view, None, values);
    }

    fn clear_render_target(&mut self, view: TextureViewHandle, color: [f32; 4]) {
        self.transfer_with("clear_render_target", |device, cmd, resources| {
            let view = resources.texture_view(view)?;
            let texture = resources.texture(view.texture)?;
            let color = vk::ClearColorValue { float32: color };
            unsafe { device.cmd_clear_color_image(cmd, texture.image, vk::ImageLayout::GENERAL, &color, &[view.range]) };
            Ok(())
        });
    }

    fn clear_depth_stencil(&mut self, view: TextureViewHandle, depth: f32, stencil: u8, clear_stencil: bool) {
        self.transfer_with("clear_depth_stencil", |device, cmd, resources| {
            let view = resources.texture_view(view)?;
            let texture = resources.texture(view.texture)?;
            let mut range = view.range;
            range.aspect_mask = vk::ImageAspectFlags::DEPTH;
            if clear_stencil && texture.desc.format.has_stencil() {
                range.aspect_mask |= vk::ImageAspectFlags::STENCIL;
            }
            let value = vk::ClearDepthStencilValue { depth, stencil: stencil as u32 };
            unsafe { device.cmd_clear_depth_stencil_image(cmd, texture.image, vk::ImageLayout::GENERAL, &value, &[range]) };
            Ok(())
        });
    }

    fn generate_mips(&mut self, view: TextureViewHandle) {
        let result = (|| -> Result<()> {
            let resources = self.state.resources();
            let view = resources.texture_view(view)?;
            let texture = resources.texture(view.texture)?;
            let range = view.range;
            let mut recorder = self.state.recorder();
            for level in range.base_mip_level + 1..range.base_mip_level + range.level_count {
                // Each level reads the one written just before it
                let cmd = recorder.outside_pass()?;
                let layers = |mip_level| vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level,
                    base_array_layer: range.base_array_layer,
                    layer_count: range.layer_count,
                };
                let corner = |extent: vk::Extent3D| vk::Offset3D {
                    x: extent.width as i32,
                    y: extent.height as i32,
                    z: extent.depth as i32,
                };
                let blit = vk::ImageBlit {
                    src_subresource: layers(level - 1),
                    src_offsets: [vk::Offset3D::default(), corner(texture.extent(level - 1))],
                    dst_subresource: layers(level),
                    dst_offsets: [vk::Offset3D::default(), corner(texture.extent(level))],
                };
                unsafe {
                    self.state.ctx.device.cmd_blit_image(
                        cmd,
                        texture.image,
                        vk::ImageLayout::GENERAL,
                        texture.image,
                        vk::ImageLayout::GENERAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );
                }
            }
            Ok(())
        })();
        self.check("generate_mips", result);
    }

    fn begin_query(&mut self, _query: QueryHandle) {}

    fn end_query(&mut self, query: QueryHandle) {
        let result = (|| -> Result<()> {
            let mut resources = self.state.resources();
            let slot = resources.queries.get_mut(query).ok_or_else(|| missing("query"))?;
            let mut recorder = self.state.recorder();
            let cmd = recorder.outside_pass()?;
            unsafe {
                self.state.ctx.device.cmd_reset_query_pool(cmd, self.state.query_pool, slot.index, 1);
                self.state.ctx.device.cmd_write_timestamp2(
                    cmd,
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                    self.state.query_pool,
                    slot.index,
                );
            }
            slot.written_in = Some(recorder.pending_submission());
            Ok(())
        })();
        self.check("end_query", result);
    }

    fn flush(&mut self) -> Result<()> {
        let submitted = self.state.recorder().submit_and_wait();
        match self.pending_error.take() {
            Some(err) => Err(err),
            None => submitted,
        }
    }
}
