/// Pipeline - lazily built Vulkan pipelines for the bound state
///
/// D3D-style state objects are separate; Vulkan bakes them into one pipeline.
/// Command streams key the cache with the bound shaders, state objects,
/// topology and attachment formats, and pipelines are created on first use.
/// Every pipeline has a push-descriptor set 0 holding the union of its stages'
/// bindings.

use ash::vk;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use ember_3d_engine::ember3d::Result;
use ember_3d_engine::ember3d::device::{
    ShaderHandle, InputLayoutHandle, BlendStateHandle, RasterizerStateHandle, DepthStencilStateHandle,
    ShaderStage, PrimitiveTopology, BlendDesc, RasterizerDesc, DepthStencilDesc, DepthWriteMask,
    InputLayoutDesc,
};
use ember_3d_engine::{engine_bail, engine_err, engine_debug, engine_warn};
use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{
    format_to_vk, topology_to_vk, compare_op_to_vk, stencil_face_to_vk, blend_factor_to_vk, blend_op_to_vk,
    color_write_to_vk, polygon_mode_to_vk, cull_mode_to_vk, front_face_to_vk,
};
use crate::vulkan_recorder::Retired;
use crate::vulkan_shader::{ShaderBinding, ShaderInput, VulkanShader, stage_to_vk};

const SOURCE: &str = "ember3d::vulkan";

/// Byte offset meaning "right after the previous element"
pub const APPEND_ALIGNED_ELEMENT: u32 = u32::MAX;

// ===== INPUT LAYOUT =====

/// Vertex input state resolved against a vertex shader
#[derive(Debug, Clone)]
pub struct VulkanInputLayout {
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    /// One entry per vertex buffer slot; strides are dynamic state
    pub bindings: Vec<vk::VertexInputBindingDescription>,
}

/// Resolve `desc` against the vertex shader inputs
///
/// Elements the shader does not read are dropped; shader inputs no element
/// feeds are an error.
pub fn resolve_input_layout(desc: &InputLayoutDesc, inputs: &[ShaderInput]) -> Result<VulkanInputLayout> {
    let mut attributes = Vec::new();
    let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
    let mut next_offset: FxHashMap<u32, u32> = FxHashMap::default();

    for element in &desc.elements {
        let running = next_offset.entry(element.input_slot).or_insert(0);
        let offset = if element.aligned_byte_offset == APPEND_ALIGNED_ELEMENT { *running } else { element.aligned_byte_offset };
        *running = offset + element.format.stride();

        let rate = if element.instance_step_rate > 0 { vk::VertexInputRate::INSTANCE } else { vk::VertexInputRate::VERTEX };
        if element.instance_step_rate > 1 {
            engine_warn!(SOURCE, "Instance step rate {} of '{}' treated as 1", element.instance_step_rate, element.semantic_name);
        }
        match bindings.iter().find(|b| b.binding == element.input_slot) {
            Some(existing) if existing.input_rate != rate => {
                engine_bail!(SOURCE, "Input slot {} mixes per-vertex and per-instance elements", element.input_slot);
            }
            Some(_) => {}
            None => bindings.push(vk::VertexInputBindingDescription {
                binding: element.input_slot,
                stride: 0,
                input_rate: rate,
            }),
        }

        if let Some(input) = inputs.iter().find(|input| input.matches(&element.semantic_name, element.semantic_index)) {
            attributes.push(vk::VertexInputAttributeDescription {
                location: input.location,
                binding: element.input_slot,
                format: format_to_vk(element.format),
                offset,
            });
        }
    }

    for input in inputs {
        if !attributes.iter().any(|attribute| attribute.location == input.location) {
            engine_bail!(SOURCE, "Vertex shader input '{}' is not fed by the input layout", input.name);
        }
    }

    bindings.sort_by_key(|b| b.binding);
    Ok(VulkanInputLayout { attributes, bindings })
}

// ===== LAYOUT =====

/// A binding of the merged set 0 layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: ShaderBinding,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Union of the bindings of every stage of a pipeline
pub fn merge_layout_bindings<'a>(shaders: impl IntoIterator<Item = &'a VulkanShader>) -> Result<Vec<LayoutBinding>> {
    let mut merged: Vec<LayoutBinding> = Vec::new();
    for shader in shaders {
        let stage_flags = stage_to_vk(shader.stage);
        for binding in &shader.bindings {
            match merged.iter_mut().find(|existing| existing.binding.binding == binding.binding) {
                Some(existing) if existing.binding == *binding => existing.stage_flags |= stage_flags,
                Some(existing) => engine_bail!(SOURCE,
                    "Binding {} declared as {:?} and {:?} by different stages",
                    binding.binding, existing.binding.descriptor_type, binding.descriptor_type),
                None => merged.push(LayoutBinding { binding: binding.clone(), stage_flags }),
            }
        }
    }
    merged.sort_by_key(|b| b.binding.binding);
    Ok(merged)
}

// ===== CACHE =====

pub struct CachedPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layout: vk::DescriptorSetLayout,
    pub bind_point: vk::PipelineBindPoint,
    pub bindings: Vec<LayoutBinding>,
}

impl CachedPipeline {
    fn retired(&self) -> [Retired; 2] {
        [Retired::Pipeline(self.pipeline), Retired::PipelineLayout(self.layout, self.set_layout)]
    }
}

/// Everything a graphics pipeline depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineKey {
    /// Vertex, pixel, hull, domain and geometry shaders
    pub shaders: [Option<ShaderHandle>; 5],
    pub input_layout: Option<InputLayoutHandle>,
    pub blend: Option<BlendStateHandle>,
    pub sample_mask: u32,
    pub rasterizer: Option<RasterizerStateHandle>,
    pub depth_stencil: Option<DepthStencilStateHandle>,
    pub topology: PrimitiveTopology,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: vk::Format,
    pub stencil: bool,
    /// Depth is attached read-only; depth and stencil writes are disabled
    pub depth_read_only: bool,
}

impl GraphicsPipelineKey {
    fn uses_shader(&self, shader: ShaderHandle) -> bool {
        self.shaders.contains(&Some(shader))
    }
}

/// Resolved state objects of a graphics pipeline key
pub struct GraphicsPipelineState<'a> {
    pub shaders: Vec<&'a VulkanShader>,
    pub input_layout: Option<&'a VulkanInputLayout>,
    pub blend: BlendDesc,
    pub rasterizer: RasterizerDesc,
    pub depth_stencil: DepthStencilDesc,
}

/// A state object a pipeline can depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineDependency {
    Shader(ShaderHandle),
    InputLayout(InputLayoutHandle),
    Blend(BlendStateHandle),
    Rasterizer(RasterizerStateHandle),
    DepthStencil(DepthStencilStateHandle),
}

#[derive(Default)]
pub struct PipelineCache {
    graphics: FxHashMap<GraphicsPipelineKey, Arc<CachedPipeline>>,
    compute: FxHashMap<ShaderHandle, Arc<CachedPipeline>>,
}

impl PipelineCache {
    pub fn len(&self) -> usize {
        self.graphics.len() + self.compute.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn compute(&mut self, ctx: &GpuContext, handle: ShaderHandle, shader: &VulkanShader) -> Result<Arc<CachedPipeline>> {
        if let Some(pipeline) = self.compute.get(&handle) {
            return Ok(Arc::clone(pipeline));
        }
        let pipeline = Arc::new(create_compute_pipeline(ctx, shader)?);
        engine_debug!(SOURCE, "Created compute pipeline for '{}'", shader.name);
        self.compute.insert(handle, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    pub fn graphics<'s>(
        &mut self,
        ctx: &GpuContext,
        key: &GraphicsPipelineKey,
        state: impl FnOnce() -> Result<GraphicsPipelineState<'s>>,
    ) -> Result<Arc<CachedPipeline>> {
        if let Some(pipeline) = self.graphics.get(key) {
            return Ok(Arc::clone(pipeline));
        }
        let pipeline = Arc::new(create_graphics_pipeline(ctx, key, &state()?)?);
        engine_debug!(SOURCE, "Created graphics pipeline ({} cached)", self.graphics.len() + 1);
        self.graphics.insert(key.clone(), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Remove every pipeline built from `dependency`
    pub fn evict(&mut self, dependency: PipelineDependency) -> Vec<Retired> {
        let mut retired = Vec::new();
        if let PipelineDependency::Shader(shader) = dependency {
            if let Some(pipeline) = self.compute.remove(&shader) {
                retired.extend(pipeline.retired());
            }
        }
        self.graphics.retain(|key, pipeline| {
            let used = match dependency {
                PipelineDependency::Shader(shader) => key.uses_shader(shader),
                PipelineDependency::InputLayout(layout) => key.input_layout == Some(layout),
                PipelineDependency::Blend(state) => key.blend == Some(state),
                PipelineDependency::Rasterizer(state) => key.rasterizer == Some(state),
                PipelineDependency::DepthStencil(state) => key.depth_stencil == Some(state),
            };
            if used {
                retired.extend(pipeline.retired());
            }
            !used
        });
        retired
    }

    /// Remove every pipeline
    pub fn drain(&mut self) -> Vec<Retired> {
        self.compute
            .drain()
            .map(|(_, pipeline)| pipeline)
            .chain(self.graphics.drain().map(|(_, pipeline)| pipeline))
            .flat_map(|pipeline| pipeline.retired())
            .collect()
    }
}

// ===== CREATION =====

fn create_layout(ctx: &GpuContext, bindings: &[LayoutBinding]) -> Result<(vk::DescriptorSetLayout, vk::PipelineLayout)> {
    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|b| vk::DescriptorSetLayoutBinding::default()
            .binding(b.binding.binding)
            .descriptor_type(b.binding.descriptor_type)
            .descriptor_count(1)
            .stage_flags(b.stage_flags))
        .collect();

    unsafe {
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&vk_bindings);
        let set_layout = ctx.device.create_descriptor_set_layout(&set_layout_info, None)
            .map_err(|e| engine_err!(SOURCE, "Failed to create descriptor set layout: {:?}", e))?;

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        match ctx.device.create_pipeline_layout(&layout_info, None) {
            Ok(layout) => Ok((set_layout, layout)),
            Err(e) => {
                ctx.device.destroy_descriptor_set_layout(set_layout, None);
                Err(engine_err!(SOURCE, "Failed to create pipeline layout: {:?}", e))
            }
        }
    }
}

fn create_compute_pipeline(ctx: &GpuContext, shader: &VulkanShader) -> Result<CachedPipeline> {
    if shader.stage != ShaderStage::Compute {
        engine_bail!(SOURCE, "'{}' is not a compute shader", shader.name);
    }
    let bindings = merge_layout_bindings([shader])?;
    let (set_layout, layout) = create_layout(ctx, &bindings)?;

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader.module)
        .name(&shader.entry_point);
    let create_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

    unsafe {
        match ctx.device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None) {
            Ok(pipelines) => Ok(CachedPipeline {
                pipeline: pipelines[0],
                layout,
                set_layout,
                bind_point: vk::PipelineBindPoint::COMPUTE,
                bindings,
            }),
            Err((_, e)) => {
                ctx.device.destroy_pipeline_layout(layout, None);
                ctx.device.destroy_descriptor_set_layout(set_layout, None);
                Err(engine_err!(SOURCE, "Failed to create compute pipeline '{}': {:?}", shader.name, e))
            }
        }
    }
}

fn create_graphics_pipeline(ctx: &GpuContext, key: &GraphicsPipelineKey, state: &GraphicsPipelineState<'_>) -> Result<CachedPipeline> {
    if !state.shaders.iter().any(|shader| shader.stage == ShaderStage::Vertex) {
        engine_bail!(SOURCE, "Draw without a vertex shader");
    }
    let bindings = merge_layout_bindings(state.shaders.iter().copied())?;

    let stages: Vec<vk::PipelineShaderStageCreateInfo> = state
        .shaders
        .iter()
        .map(|shader| vk::PipelineShaderStageCreateInfo::default()
            .stage(stage_to_vk(shader.stage))
            .module(shader.module)
            .name(&shader.entry_point))
        .collect();

    // Vertex input
    let (attributes, vertex_bindings) = match state.input_layout {
        Some(layout) => (layout.attributes.as_slice(), layout.bindings.as_slice()),
        None => (&[][..], &[][..]),
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(vertex_bindings)
        .vertex_attribute_descriptions(attributes);

    let (topology, patch_points) = topology_to_vk(key.topology);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default().topology(topology);
    let tessellation = vk::PipelineTessellationStateCreateInfo::default().patch_control_points(patch_points.max(1));

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    // Rasterizer
    let rasterizer = &state.rasterizer;
    let depth_bias = rasterizer.depth_bias != 0 || rasterizer.slope_scaled_depth_bias != 0.0;
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(polygon_mode_to_vk(rasterizer.fill_mode))
        .cull_mode(cull_mode_to_vk(rasterizer.cull_mode))
        .front_face(front_face_to_vk(rasterizer.front_counter_clockwise))
        .depth_bias_enable(depth_bias)
        .depth_bias_constant_factor(rasterizer.depth_bias as f32)
        .depth_bias_clamp(rasterizer.depth_bias_clamp)
        .depth_bias_slope_factor(rasterizer.slope_scaled_depth_bias)
        .line_width(1.0);

    let sample_mask = [key.sample_mask];
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_mask(&sample_mask)
        .alpha_to_coverage_enable(state.blend.alpha_to_coverage_enable);

    // Depth / stencil
    let ds = &state.depth_stencil;
    let has_depth = key.depth_format != vk::Format::UNDEFINED;
    let stencil_write_mask = if key.depth_read_only { 0 } else { ds.stencil_write_mask };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(has_depth && ds.depth_enable)
        .depth_write_enable(has_depth && !key.depth_read_only && ds.depth_enable && ds.depth_write_mask == DepthWriteMask::All)
        .depth_compare_op(compare_op_to_vk(ds.depth_func))
        .stencil_test_enable(key.stencil && ds.stencil_enable)
        .front(stencil_face_to_vk(&ds.front_face, ds.stencil_read_mask, stencil_write_mask))
        .back(stencil_face_to_vk(&ds.back_face, ds.stencil_read_mask, stencil_write_mask));

    // Blend
    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..key.color_formats.len())
        .map(|index| {
            let target = if state.blend.independent_blend_enable {
                state.blend.render_target[index.min(state.blend.render_target.len() - 1)]
            } else {
                state.blend.render_target[0]
            };
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(target.blend_enable)
                .src_color_blend_factor(blend_factor_to_vk(target.src_blend))
                .dst_color_blend_factor(blend_factor_to_vk(target.dest_blend))
                .color_blend_op(blend_op_to_vk(target.blend_op))
                .src_alpha_blend_factor(blend_factor_to_vk(target.src_blend_alpha))
                .dst_alpha_blend_factor(blend_factor_to_vk(target.dest_blend_alpha))
                .alpha_blend_op(blend_op_to_vk(target.blend_op_alpha))
                .color_write_mask(color_write_to_vk(target.write_mask))
        })
        .collect();
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::BLEND_CONSTANTS,
        vk::DynamicState::STENCIL_REFERENCE,
        vk::DynamicState::VERTEX_INPUT_BINDING_STRIDE,
    ];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let mut rendering = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&key.color_formats)
        .depth_attachment_format(key.depth_format)
        .stencil_attachment_format(if key.stencil { key.depth_format } else { vk::Format::UNDEFINED });

    let (set_layout, layout) = create_layout(ctx, &bindings)?;

    let mut create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering);
    if patch_points > 0 {
        create_info = create_info.tessellation_state(&tessellation);
    }

    unsafe {
        match ctx.device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None) {
            Ok(pipelines) => Ok(CachedPipeline {
                pipeline: pipelines[0],
                layout,
                set_layout,
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                bindings,
            }),
            Err((_, e)) => {
                ctx.device.destroy_pipeline_layout(layout, None);
                ctx.device.destroy_descriptor_set_layout(set_layout, None);
                Err(engine_err!(SOURCE, "Failed to create graphics pipeline: {:?}", e))
            }
        }
    }
}

#[cfg(test)]
#[path = "vulkan_pipeline_tests.rs"]
mod tests;
