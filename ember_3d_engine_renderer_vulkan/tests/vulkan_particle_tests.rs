//! End-to-end particle pipeline on the Vulkan device
//!
//! Compiles the engine's HLSL with dxc, then emits, simulates, sorts and
//! draws particles, checking the counters the GPU produces.
//!
//! Run with: cargo test --test vulkan_particle_tests -- --ignored
//! (needs a GPU and `dxc` on PATH or in EMBER_DXC)

mod gpu_test_utils;

use std::sync::Arc;
use gpu_test_utils::{test_context, test_device, shader_root};
use ember_3d_engine::glam::{Mat4, Vec3};
use ember_3d_engine::ember3d::device::{TextureDesc, Format, RenderPassDesc, ColorLoadOp, DepthLoadOp};
use ember_3d_engine::ember3d::render::{Texture, CommandContext};
use ember_3d_engine::ember3d::shader::{ShaderRegistry, ShaderRegistryConfig};
use ember_3d_engine::ember3d::particles::{Emitter, FrameConstants, ParticleRenderer, ParticleSystemConfig};
use ember_3d_engine_renderer_vulkan::ember3d::DxcShaderCompiler;
use serial_test::serial;

const SIZE: u32 = 64;

struct Scene {
    ctx: CommandContext,
    registry: ShaderRegistry,
    renderer: ParticleRenderer,
    color: Texture,
    depth: Texture,
    sprite: Texture,
}

fn scene(capacity: u32) -> Scene {
    let device = test_device();
    let registry = ShaderRegistry::new(
        Arc::clone(&device),
        Arc::new(DxcShaderCompiler::new()),
        ShaderRegistryConfig { shader_root: shader_root(), ..Default::default() },
    )
    .expect("particle shaders must compile");
    let config = ParticleSystemConfig { capacity, random_texture_size: 64, ..Default::default() };
    let renderer = ParticleRenderer::new(Arc::clone(&device), &registry, config).unwrap();

    Scene {
        ctx: test_context(),
        registry,
        renderer,
        color: Texture::new(Arc::clone(&device), TextureDesc::render_target(SIZE, SIZE, Format::R8G8B8A8_UNORM), None),
        depth: Texture::new(Arc::clone(&device), TextureDesc::depth_target(SIZE, SIZE), None),
        sprite: Texture::new(device, TextureDesc::texture_2d(4, 4, Format::R8G8B8A8_UNORM), Some(&[0xff; 64])),
    }
}

fn frame(delta_time: f32) -> FrameConstants {
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
    FrameConstants {
        view,
        projection,
        camera_position: Vec3::new(0.0, 0.0, 10.0).extend(1.0),
        delta_time,
        screen_size: [SIZE as f32; 2],
        ..Default::default()
    }
}

impl Scene {
    fn render(&mut self, emitter: &mut Emitter, delta_time: f32) {
        emitter.texture = self.sprite.srv();
        let depth_srv = self.depth.srv();
        self.ctx.clear_depth(self.depth.dsv().unwrap(), 1.0, 0, false);

        let pass = RenderPassDesc::new(SIZE, SIZE)
            .with_color(self.color.rtv().unwrap(), ColorLoadOp::Clear([0.0, 0.0, 0.0, 1.0]))
            .with_depth(self.depth.dsv().unwrap(), DepthLoadOp::Load, true);
        self.ctx.begin_render_pass(&pass);
        self.renderer.render(&mut self.ctx, &self.registry, emitter, &frame(delta_time), depth_srv).unwrap();
        self.ctx.end_render_pass();
        self.ctx.flush().unwrap();
    }
}

#[test]
#[ignore] // Requires GPU and dxc
#[serial]
fn test_vulkan_particles_emit_and_count() {
    let mut scene = scene(1000);
    let mut emitter = Emitter { particles_per_second: 0.0, number_to_emit: 100, ..Default::default() };

    scene.render(&mut emitter, 0.016);
    let counters = scene.renderer.read_debug_counters(&mut scene.ctx).unwrap();

    assert_eq!(counters.alive_count, 100);
    assert_eq!(counters.dead_count, 900);
    assert_eq!(counters.render_args, [6, 100, 0, 0, 0]);
    assert!(!emitter.reset);
    assert_eq!(emitter.number_to_emit, 0);
}

#[test]
#[ignore] // Requires GPU and dxc
#[serial]
fn test_vulkan_particles_expire() {
    let mut scene = scene(256);
    let mut emitter = Emitter { particles_per_second: 0.0, number_to_emit: 50, lifespan: 0.5, ..Default::default() };

    scene.render(&mut emitter, 0.1);
    scene.render(&mut emitter, 1.0);
    let counters = scene.renderer.read_debug_counters(&mut scene.ctx).unwrap();

    assert_eq!(counters.alive_count, 0);
    assert_eq!(counters.dead_count, 256);
}

#[test]
#[ignore] // Requires GPU and dxc
#[serial]
fn test_vulkan_particles_sorted_back_to_front() {
    // Large enough for incremental merge passes
    let mut scene = scene(2048);
    let mut emitter = Emitter {
        particles_per_second: 0.0,
        number_to_emit: 1500,
        position_variance: Vec3::splat(4.0),
        sort: true,
        ..Default::default()
    };

    scene.render(&mut emitter, 0.016);
    let alive = scene.renderer.read_alive_indices(&mut scene.ctx).unwrap();

    assert_eq!(alive.len(), 1500);
    assert!(alive.windows(2).all(|pair| pair[0].sort_key <= pair[1].sort_key));
}
