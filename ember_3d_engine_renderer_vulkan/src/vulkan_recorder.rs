/// Recorder - the device's immediate command buffer
///
/// Every command stream, upload and counter reset records into one primary
/// command buffer, so commands execute in the order they were issued. A submit
/// ends the buffer, waits for the GPU and frees the objects retired meanwhile.
///
/// Render pass instances can be suspended: commands that are illegal inside
/// dynamic rendering end the instance, and the next draw resumes it with load
/// operations.

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use std::ffi::CString;
use std::sync::Arc;
use ember_3d_engine::ember3d::Result;
use ember_3d_engine::{engine_err, engine_bail, engine_warn};
use crate::vulkan_context::GpuContext;

const SOURCE: &str = "ember3d::vulkan";

/// A native object whose destruction waits for the next submit
pub enum Retired {
    Buffer(vk::Buffer, Allocation),
    BufferView(vk::BufferView),
    Image(vk::Image, Allocation),
    ImageView(vk::ImageView),
    ShaderModule(vk::ShaderModule),
    Sampler(vk::Sampler),
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout, vk::DescriptorSetLayout),
}

impl Retired {
    /// # Safety
    ///
    /// The GPU must no longer use the object.
    pub unsafe fn destroy(self, ctx: &GpuContext) {
        let device = &ctx.device;
        match self {
            Retired::Buffer(buffer, allocation) => {
                device.destroy_buffer(buffer, None);
                if ctx.allocator().free(allocation).is_err() {
                    engine_warn!(SOURCE, "Failed to free buffer allocation");
                }
            }
            Retired::BufferView(view) => device.destroy_buffer_view(view, None),
            Retired::Image(image, allocation) => {
                device.destroy_image(image, None);
                if ctx.allocator().free(allocation).is_err() {
                    engine_warn!(SOURCE, "Failed to free image allocation");
                }
            }
            Retired::ImageView(view) => device.destroy_image_view(view, None),
            Retired::ShaderModule(module) => device.destroy_shader_module(module, None),
            Retired::Sampler(sampler) => device.destroy_sampler(sampler, None),
            Retired::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
            Retired::PipelineLayout(layout, set_layout) => {
                device.destroy_pipeline_layout(layout, None);
                device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }
}

/// One attachment of a render pass instance
#[derive(Clone, Copy)]
pub struct AttachmentTarget {
    pub view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear: vk::ClearValue,
}

/// Attachments of the current render pass instance
#[derive(Clone)]
pub struct PassAttachments {
    pub colors: Vec<AttachmentTarget>,
    pub depth: Option<AttachmentTarget>,
    /// The depth attachment also has a stencil aspect
    pub stencil: bool,
    pub extent: vk::Extent2D,
}

impl PassAttachments {
    /// Same attachments, loading what the suspended instance stored
    fn resumed(&self) -> Self {
        let load = |target: &AttachmentTarget| AttachmentTarget { load_op: vk::AttachmentLoadOp::LOAD, ..*target };
        Self {
            colors: self.colors.iter().map(load).collect(),
            depth: self.depth.as_ref().map(load),
            stencil: self.stencil,
            extent: self.extent,
        }
    }
}

enum PassState {
    None,
    Active(PassAttachments),
    Suspended(PassAttachments),
}

pub struct Recorder {
    ctx: Arc<GpuContext>,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    recording: bool,
    pass: PassState,
    labels: Vec<CString>,
    retired: Vec<Retired>,
    completed_submissions: u64,
}

impl Recorder {
    pub fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        unsafe {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(ctx.queue_family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            let pool = ctx.device.create_command_pool(&pool_info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create command pool: {:?}", e))?;

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let cmd = match ctx.device.allocate_command_buffers(&allocate_info) {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    ctx.device.destroy_command_pool(pool, None);
                    engine_bail!(SOURCE, "Failed to allocate command buffer: {:?}", e);
                }
            };

            let fence = match ctx.device.create_fence(&vk::FenceCreateInfo::default(), None) {
                Ok(fence) => fence,
                Err(e) => {
                    ctx.device.destroy_command_pool(pool, None);
                    engine_bail!(SOURCE, "Failed to create submit fence: {:?}", e);
                }
            };

            Ok(Self {
                ctx,
                pool,
                cmd,
                fence,
                recording: false,
                pass: PassState::None,
                labels: Vec::new(),
                retired: Vec::new(),
                completed_submissions: 0,
            })
        }
    }

    /// Submissions the GPU has finished
    pub fn completed_submissions(&self) -> u64 {
        self.completed_submissions
    }

    /// Submission the commands recorded now belong to
    pub fn pending_submission(&self) -> u64 {
        self.completed_submissions + 1
    }

    pub fn in_pass(&self) -> bool {
        !matches!(self.pass, PassState::None)
    }

    /// Destroy `object` once the GPU finished the commands recorded so far
    pub fn retire(&mut self, object: Retired) {
        if self.recording {
            self.retired.push(object);
        } else {
            unsafe { object.destroy(&self.ctx) };
        }
    }

    fn ensure_recording(&mut self) -> Result<vk::CommandBuffer> {
        if self.recording {
            return Ok(self.cmd);
        }
        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.ctx.device.begin_command_buffer(self.cmd, &begin_info)
                .map_err(|e| engine_err!(SOURCE, "Failed to begin command buffer: {:?}", e))?;
        }
        self.recording = true;
        if let Some(labels) = &self.ctx.debug_labels {
            for name in &self.labels {
                let label = vk::DebugUtilsLabelEXT::default().label_name(name);
                unsafe { labels.cmd_begin_debug_utils_label(self.cmd, &label) };
            }
        }
        Ok(self.cmd)
    }

    /// Make prior writes of every command visible to later commands
    fn barrier(&self, cmd: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE);
        let dependency = vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.ctx.device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    fn begin_rendering(&self, cmd: vk::CommandBuffer, attachments: &PassAttachments) {
        let color_infos: Vec<vk::RenderingAttachmentInfo> = attachments
            .colors
            .iter()
            .map(|target| attachment_info(target))
            .collect();
        let depth_info = attachments.depth.as_ref().map(attachment_info);

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: attachments.extent })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth) = depth_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
            if attachments.stencil {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }
        unsafe { self.ctx.device.cmd_begin_rendering(cmd, &rendering_info) };
    }

    fn suspend_pass(&mut self, cmd: vk::CommandBuffer) {
        if let PassState::Active(attachments) = std::mem::replace(&mut self.pass, PassState::None) {
            unsafe { self.ctx.device.cmd_end_rendering(cmd) };
            self.pass = PassState::Suspended(attachments);
        } else if let PassState::Suspended(attachments) = std::mem::replace(&mut self.pass, PassState::None) {
            self.pass = PassState::Suspended(attachments);
        }
    }

    /// Command buffer for a transfer, dispatch or clear
    ///
    /// Suspends an active render pass instance and orders the command after
    /// everything recorded before.
    pub fn outside_pass(&mut self) -> Result<vk::CommandBuffer> {
        let cmd = self.ensure_recording()?;
        self.suspend_pass(cmd);
        self.barrier(cmd);
        Ok(cmd)
    }

    /// Command buffer for a draw, resuming a suspended render pass instance
    pub fn inside_pass(&mut self) -> Result<vk::CommandBuffer> {
        let cmd = self.ensure_recording()?;
        match std::mem::replace(&mut self.pass, PassState::None) {
            PassState::Active(attachments) => self.pass = PassState::Active(attachments),
            PassState::Suspended(attachments) => {
                let resumed = attachments.resumed();
                self.barrier(cmd);
                self.begin_rendering(cmd, &resumed);
                self.pass = PassState::Active(resumed);
            }
            PassState::None => engine_bail!(SOURCE, "Draw recorded outside a render pass"),
        }
        Ok(cmd)
    }

    /// Command buffer for commands legal anywhere (labels)
    pub fn any(&mut self) -> Result<vk::CommandBuffer> {
        self.ensure_recording()
    }

    pub fn begin_pass(&mut self, attachments: PassAttachments) -> Result<()> {
        self.end_pass();
        let cmd = self.outside_pass()?;
        self.begin_rendering(cmd, &attachments);
        self.pass = PassState::Active(attachments);
        Ok(())
    }

    pub fn end_pass(&mut self) {
        if let PassState::Active(_) = std::mem::replace(&mut self.pass, PassState::None) {
            unsafe { self.ctx.device.cmd_end_rendering(self.cmd) };
        }
    }

    pub fn push_label(&mut self, name: &str) -> Result<()> {
        let name = CString::new(name).unwrap_or_default();
        let cmd = self.ensure_recording()?;
        if let Some(labels) = &self.ctx.debug_labels {
            let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
            unsafe { labels.cmd_begin_debug_utils_label(cmd, &label) };
        }
        self.labels.push(name);
        Ok(())
    }

    pub fn pop_label(&mut self) {
        if self.labels.pop().is_none() {
            return;
        }
        if let (true, Some(labels)) = (self.recording, &self.ctx.debug_labels) {
            unsafe { labels.cmd_end_debug_utils_label(self.cmd) };
        }
    }

    /// Submit everything recorded and wait for the GPU
    pub fn submit_and_wait(&mut self) -> Result<()> {
        if !self.recording {
            self.free_retired();
            return Ok(());
        }
        let ctx = Arc::clone(&self.ctx);
        let device = &ctx.device;
        unsafe {
            self.suspend_pass(self.cmd);
            if let Some(labels) = &self.ctx.debug_labels {
                for _ in &self.labels {
                    labels.cmd_end_debug_utils_label(self.cmd);
                }
            }
            self.recording = false;

            device.end_command_buffer(self.cmd)
                .map_err(|e| engine_err!(SOURCE, "Failed to end command buffer: {:?}", e))?;

            let command_buffers = [self.cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            device.queue_submit(self.ctx.queue, &[submit_info], self.fence)
                .map_err(|e| engine_err!(SOURCE, "Failed to submit commands to GPU queue: {:?}", e))?;
            device.wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(|e| engine_err!(SOURCE, "Failed to wait for submit fence: {:?}", e))?;
            device.reset_fences(&[self.fence])
                .map_err(|e| engine_err!(SOURCE, "Failed to reset submit fence: {:?}", e))?;
            device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| engine_err!(SOURCE, "Failed to reset command pool: {:?}", e))?;
        }
        self.completed_submissions += 1;
        self.free_retired();
        Ok(())
    }

    fn free_retired(&mut self) {
        for object in self.retired.drain(..) {
            unsafe { object.destroy(&self.ctx) };
        }
    }
}

fn attachment_info(target: &AttachmentTarget) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(target.view)
        .image_layout(vk::ImageLayout::GENERAL)
        .load_op(target.load_op)
        .store_op(target.store_op)
        .clear_value(target.clear)
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.submit_and_wait().is_err() {
            unsafe { self.ctx.device.device_wait_idle().ok() };
            self.free_retired();
        }
        unsafe {
            self.ctx.device.destroy_fence(self.fence, None);
            self.ctx.device.destroy_command_pool(self.pool, None);
        }
    }
}
