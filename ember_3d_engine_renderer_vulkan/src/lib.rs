/*!
# Ember 3D Engine - Vulkan Backend

Vulkan implementation of the `GraphicsDevice` / `CommandStream` seam of
ember_3d_engine, using Ash for the Vulkan bindings, gpu-allocator for memory
and spirq for SPIR-V reflection.

The device is headless: it records into one immediate command buffer and
submits on `flush`. HLSL is compiled to SPIR-V by `DxcShaderCompiler`.

```no_run
use std::sync::Arc;
use ember_3d_engine::ember3d::device::Config;
use ember_3d_engine_renderer_vulkan::ember3d::{VulkanGraphicsDevice, DxcShaderCompiler};

let device = Arc::new(VulkanGraphicsDevice::new(Config::default())?);
let compiler = Arc::new(DxcShaderCompiler::new());
# Ok::<(), ember_3d_engine::ember3d::Error>(())
```
*/

mod debug;
mod vulkan_context;
mod vulkan_format;
mod vulkan_shader;
mod vulkan_recorder;
mod vulkan_buffer;
mod vulkan_texture;
mod vulkan_pipeline;
mod vulkan_device;
mod vulkan_command_stream;
mod vulkan_compiler;

pub mod ember3d {
    pub use crate::vulkan_device::{VulkanGraphicsDevice, MAX_TIMESTAMP_QUERIES};
    pub use crate::vulkan_command_stream::VulkanCommandStream;
    pub use crate::vulkan_compiler::{DxcShaderCompiler, DEFAULT_DXC};

    // Validation layer statistics
    pub use crate::debug::{get_validation_stats, print_validation_stats_report};
}
