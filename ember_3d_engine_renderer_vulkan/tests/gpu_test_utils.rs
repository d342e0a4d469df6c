#![allow(dead_code)]
//! GPU test utilities - one shared VulkanGraphicsDevice for every GPU test
//!
//! Creating a Vulkan instance per test is slow and some drivers limit how many
//! devices a process may open, so tests share a single lazily created device.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use ember_3d_engine::ember3d::GraphicsDevice;
use ember_3d_engine::ember3d::device::Config;
use ember_3d_engine::ember3d::render::{Buffer, CommandContext};
use ember_3d_engine::ember3d::device::BufferDesc;
use ember_3d_engine_renderer_vulkan::ember3d::VulkanGraphicsDevice;

static GPU_GRAPHICS_DEVICE: OnceLock<Arc<VulkanGraphicsDevice>> = OnceLock::new();

/// Get the shared VulkanGraphicsDevice for GPU tests
///
/// Lazily initializes the device on first call. Validation follows the build
/// profile, profiling is always enabled so timestamp queries work.
pub fn get_test_graphics_device() -> Arc<VulkanGraphicsDevice> {
    Arc::clone(GPU_GRAPHICS_DEVICE.get_or_init(|| {
        let config = Config {
            app_name: "Ember3D GPU Tests".to_string(),
            enable_profiling: true,
            ..Default::default()
        };
        Arc::new(VulkanGraphicsDevice::new(config).expect("Failed to create VulkanGraphicsDevice for tests"))
    }))
}

/// The shared device behind the trait object the engine works with
pub fn test_device() -> Arc<dyn GraphicsDevice> {
    get_test_graphics_device()
}

pub fn test_context() -> CommandContext {
    CommandContext::new(test_device()).expect("Failed to create CommandContext")
}

/// Copy `size` bytes of `src` into a fresh readback buffer and return them
pub fn read_back(ctx: &mut CommandContext, src: &Buffer, size: u64) -> Vec<u8> {
    let staging = Buffer::new(test_device(), BufferDesc::readback(size), None);
    ctx.copy_buffer_region(&staging, 0, src, 0, size);
    ctx.wait_for_gpu().expect("GPU wait failed");
    let mapping = staging.map_for_read().expect("map_for_read failed");
    mapping.to_vec()
}

/// Directory holding the engine's HLSL sources
pub fn shader_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../ember_3d_engine/shaders")
}
