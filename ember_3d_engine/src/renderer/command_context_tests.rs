//! Unit tests for CommandContext
//!
//! The reference device counts every seam call, which makes the state cache
//! observable, and runs compute kernels so bindings can be checked end to end.

use super::*;
use crate::error::Error;
use crate::graphics_device::{
    BufferDesc, BufferSubresourceDesc, UavFlags, ShaderDesc, TextureDesc, ColorLoadOp,
    BlendDesc, RasterizerDesc,
};
use crate::reference::{ReferenceDevice, KernelContext};

struct Fixture {
    reference: Arc<ReferenceDevice>,
    device: Arc<dyn GraphicsDevice>,
    ctx: CommandContext,
}

fn fixture() -> Fixture {
    let reference = Arc::new(ReferenceDevice::new());
    reference.register_kernel("FillIdsCS", fill_ids);
    reference.register_kernel("CountGroupsCS", count_groups);
    let device: Arc<dyn GraphicsDevice> = reference.clone();
    let ctx = CommandContext::new(Arc::clone(&device)).unwrap();
    Fixture { reference, device, ctx }
}

const FILL_GROUP_SIZE: u32 = 16;

fn fill_ids(ctx: &mut KernelContext<'_>, group: [u32; 3]) -> Result<()> {
    for thread in 0..FILL_GROUP_SIZE {
        let id = group[0] * FILL_GROUP_SIZE + thread;
        ctx.store(0, id, &id)?;
    }
    Ok(())
}

fn count_groups(ctx: &mut KernelContext<'_>, _group: [u32; 3]) -> Result<()> {
    ctx.increment_counter(0)?;
    Ok(())
}

fn shader(device: &Arc<dyn GraphicsDevice>, stage: ShaderStage, entry_point: &str) -> Arc<Shader> {
    Arc::new(Shader::new(Arc::clone(device), &ShaderDesc {
        stage,
        code: entry_point.as_bytes(),
        entry_point,
        name: entry_point,
    }).unwrap())
}

fn compute(device: &Arc<dyn GraphicsDevice>, entry_point: &str) -> ComputeProgram {
    ComputeProgram { cs: shader(device, ShaderStage::Compute, entry_point) }
}

fn words(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks_exact(4).map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])).collect()
}

// ============================================================================
// STATE CACHE
// ============================================================================

#[test]
fn test_same_shader_is_bound_once() {
    let mut f = fixture();
    let vs = shader(&f.device, ShaderStage::Vertex, "MainVS");

    f.ctx.set_shader(ShaderStage::Vertex, Some(&vs));
    f.ctx.set_shader(ShaderStage::Vertex, Some(&vs));
    assert_eq!(f.reference.call_count("set_shader"), 1);

    f.ctx.set_shader(ShaderStage::Vertex, None);
    assert_eq!(f.reference.call_count("set_shader"), 2);
}

#[test]
fn test_invalidate_forgets_cached_state() {
    let mut f = fixture();
    f.ctx.set_topology(PrimitiveTopology::TriangleList);
    f.ctx.set_topology(PrimitiveTopology::TriangleList);
    assert_eq!(f.reference.call_count("set_topology"), 1);

    f.ctx.invalidate_state_cache();
    f.ctx.set_topology(PrimitiveTopology::TriangleList);
    assert_eq!(f.reference.call_count("set_topology"), 2);
}

#[test]
fn test_graphics_program_binds_every_graphics_stage() {
    let mut f = fixture();
    let program = GraphicsProgram {
        vs: Some(shader(&f.device, ShaderStage::Vertex, "MainVS")),
        ps: Some(shader(&f.device, ShaderStage::Pixel, "MainPS")),
        ..Default::default()
    };

    f.ctx.set_graphics_program(&program);
    assert_eq!(f.reference.call_count("set_shader"), 5);
    assert_eq!(f.reference.call_count("set_input_layout"), 1);

    f.ctx.set_graphics_program(&program);
    assert_eq!(f.reference.call_count("set_shader"), 5);
    assert_eq!(f.reference.call_count("set_input_layout"), 1);
}

#[test]
fn test_blend_factor_is_part_of_cached_state() {
    let mut f = fixture();
    let blend = BlendState::new(Arc::clone(&f.device), BlendDesc::alpha_blend()).unwrap();

    f.ctx.set_blend_state(Some(&blend), None, u32::MAX);
    f.ctx.set_blend_state(Some(&blend), Some([1.0; 4]), u32::MAX);
    assert_eq!(f.reference.call_count("set_blend_state"), 1);

    f.ctx.set_blend_state(Some(&blend), Some([0.5; 4]), u32::MAX);
    assert_eq!(f.reference.call_count("set_blend_state"), 2);
}

#[test]
fn test_rasterizer_and_depth_states_are_cached() {
    let mut f = fixture();
    let rasterizer = RasterizerState::new(Arc::clone(&f.device), RasterizerDesc::cull_none()).unwrap();

    f.ctx.set_rasterizer_state(Some(&rasterizer));
    f.ctx.set_rasterizer_state(Some(&rasterizer));
    f.ctx.set_depth_stencil_state(None, 0);
    f.ctx.set_depth_stencil_state(None, 1);

    assert_eq!(f.reference.call_count("set_rasterizer_state"), 1);
    assert_eq!(f.reference.call_count("set_depth_stencil_state"), 2);
}

// ============================================================================
// COMPUTE
// ============================================================================

#[test]
fn test_dispatch_runs_bound_kernel() {
    let mut f = fixture();
    let program = compute(&f.device, "FillIdsCS");
    let output = Buffer::new(Arc::clone(&f.device), BufferDesc::structured::<u32>(64, true, false), None);

    f.ctx.set_compute_program(&program);
    f.ctx.set_shader_resource_rw(0, output.uav().unwrap());
    f.ctx.dispatch(4, 1, 1);
    f.ctx.flush().unwrap();

    let expected: Vec<u32> = (0..64).collect();
    assert_eq!(words(&f.reference.buffer_contents(output.handle()).unwrap()), expected);
}

#[test]
fn test_dispatch_without_compute_shader_fails_on_flush() {
    let mut f = fixture();
    f.ctx.dispatch(1, 1, 1);
    assert!(matches!(f.ctx.flush(), Err(Error::InvalidResource(_))));
    assert!(f.ctx.flush().is_ok());
}

#[test]
fn test_dispatch_indirect_reads_group_count() {
    let mut f = fixture();
    let program = compute(&f.device, "CountGroupsCS");
    let counted = Buffer::new(Arc::clone(&f.device), BufferDesc::append(4, 4), None);
    counted.create_read_write_view(Some(&BufferSubresourceDesc::with_uav_flags(UavFlags::COUNTER)));
    let args = Buffer::with_data(Arc::clone(&f.device), BufferDesc::indirect_args(16), &[3u32, 2, 1, 0]);

    f.ctx.set_compute_program(&program);
    f.ctx.set_shader_resources_rw(0, &[Some(counted.uav().unwrap().into())], Some(&[0]));
    f.ctx.dispatch_indirect(&args, 0);
    f.ctx.flush().unwrap();

    assert_eq!(f.reference.view_counter(counted.uav().unwrap()), Some(6));
}

// ============================================================================
// HIDDEN COUNTERS
// ============================================================================

#[test]
fn test_initial_counts_set_or_keep_counters() {
    let mut f = fixture();
    let list = Buffer::new(Arc::clone(&f.device), BufferDesc::append(16, 4), None);
    list.create_read_write_view(Some(&BufferSubresourceDesc::with_uav_flags(UavFlags::APPEND)));
    let view = list.uav().unwrap();

    f.ctx.set_shader_resources_rw(0, &[Some(view.into())], Some(&[5]));
    assert_eq!(f.reference.view_counter(view), Some(5));

    f.ctx.set_shader_resources_rw(0, &[Some(view.into())], None);
    f.ctx.set_shader_resource_rw(1, view);
    f.ctx.set_shader_resources_rw(0, &[Some(view.into())], Some(&[KEEP_COUNTER]));
    assert_eq!(f.reference.view_counter(view), Some(5));

    f.ctx.unset_shader_resources_rw(0, 2);
    assert_eq!(f.reference.view_counter(view), Some(5));
}

#[test]
fn test_copy_structure_count_writes_counter() {
    let mut f = fixture();
    let list = Buffer::new(Arc::clone(&f.device), BufferDesc::append(16, 4), None);
    list.create_read_write_view(Some(&BufferSubresourceDesc::with_uav_flags(UavFlags::APPEND)));
    let counts = Buffer::new(Arc::clone(&f.device), BufferDesc::gpu_constant_buffer(16), None);

    f.ctx.set_shader_resources_rw(0, &[Some(list.uav().unwrap().into())], Some(&[11]));
    f.ctx.copy_structure_count(&counts, 8, list.uav().unwrap());
    f.ctx.flush().unwrap();

    assert_eq!(words(&f.reference.buffer_contents(counts.handle()).unwrap()), vec![0, 0, 11, 0]);
}

// ============================================================================
// DRAWS
// ============================================================================

#[test]
fn test_indexed_indirect_draw_resolves_arguments() {
    let mut f = fixture();
    let indices = Buffer::with_data(Arc::clone(&f.device), BufferDesc::index_buffer(6, false), &[0u32, 1, 2, 2, 1, 3]);
    let args = Buffer::with_data(Arc::clone(&f.device), BufferDesc::indirect_args(20), &[6u32, 42, 0, 0, 0]);

    f.ctx.set_topology(PrimitiveTopology::TriangleList);
    f.ctx.set_index_buffer(Some(&indices), 0);
    f.ctx.draw_indexed_indirect(&args, 0);

    let draws = f.reference.draws();
    assert_eq!(draws.len(), 1);
    assert!(draws[0].indexed && draws[0].indirect);
    assert_eq!((draws[0].element_count, draws[0].instance_count), (6, 42));
    assert_eq!(draws[0].index_buffer, Some(indices.handle()));
}

#[test]
fn test_direct_draws_are_recorded() {
    let mut f = fixture();
    f.ctx.draw(3);
    f.ctx.draw_instanced(4, 10, 0, 2);

    let draws = f.reference.draws();
    assert_eq!(draws.len(), 2);
    assert!(!draws[0].indexed && !draws[0].indirect);
    assert_eq!((draws[1].element_count, draws[1].instance_count, draws[1].start_instance), (4, 10, 2));
}

// ============================================================================
// COPIES / CLEARS
// ============================================================================

#[test]
fn test_copy_buffer_region() {
    let mut f = fixture();
    let src = Buffer::with_data(Arc::clone(&f.device), BufferDesc::indirect_args(16), &[1u32, 2, 3, 4]);
    let dst = Buffer::new(Arc::clone(&f.device), BufferDesc::readback(16), None);

    f.ctx.copy_buffer_region(&dst, 4, &src, 8, 8);
    f.ctx.wait_for_gpu().unwrap();

    assert_eq!(dst.map_for_read().unwrap().read_slice::<u32>(0, 4), vec![0, 3, 4, 0]);
}

#[test]
#[should_panic(expected = "different sizes")]
fn test_copy_buffer_size_mismatch_panics() {
    let mut f = fixture();
    let a = Buffer::new(Arc::clone(&f.device), BufferDesc::readback(16), None);
    let b = Buffer::new(Arc::clone(&f.device), BufferDesc::readback(32), None);
    f.ctx.copy_buffer(&a, &b);
}

#[test]
fn test_clear_read_write_uint_fills_view() {
    let mut f = fixture();
    let buffer = Buffer::new(Arc::clone(&f.device), BufferDesc::structured::<u32>(8, true, false), None);

    f.ctx.clear_read_write_uint(buffer.uav().unwrap().into(), [7; 4]);
    f.ctx.flush().unwrap();

    assert_eq!(words(&f.reference.buffer_contents(buffer.handle()).unwrap()), vec![7; 8]);
}

#[test]
fn test_update_buffer_through_context() {
    let mut f = fixture();
    let buffer = Buffer::new(Arc::clone(&f.device), BufferDesc::constant_buffer(16), None);

    f.ctx.update_buffer_value(&buffer, &[4u32, 3, 2, 1]).unwrap();
    assert_eq!(words(&f.reference.buffer_contents(buffer.handle()).unwrap()), vec![4, 3, 2, 1]);
}

// ============================================================================
// RENDER PASSES / EVENTS
// ============================================================================

#[test]
fn test_render_pass_state() {
    let mut f = fixture();
    let target = Texture::new(Arc::clone(&f.device), TextureDesc::render_target(4, 4, Format::R8G8B8A8_UNORM), None);
    let desc = RenderPassDesc::new(4, 4).with_color(target.rtv().unwrap(), ColorLoadOp::Clear([0.0; 4]));

    f.ctx.begin();
    f.ctx.begin_render_pass(&desc);
    assert!(f.ctx.is_in_render_pass());
    f.ctx.end_render_pass();
    assert!(!f.ctx.is_in_render_pass());
    f.ctx.end();
    assert!(f.ctx.flush().is_ok());
}

#[test]
#[should_panic(expected = "another render pass is active")]
fn test_nested_render_pass_panics() {
    let mut f = fixture();
    let desc = RenderPassDesc::new(4, 4);
    f.ctx.begin_render_pass(&desc);
    f.ctx.begin_render_pass(&desc);
}

#[test]
#[should_panic(expected = "inside an active render pass")]
fn test_end_inside_render_pass_panics() {
    let mut f = fixture();
    f.ctx.begin();
    f.ctx.begin_render_pass(&RenderPassDesc::new(4, 4));
    f.ctx.end();
}

#[test]
fn test_scoped_event_closes_on_drop() {
    let mut f = fixture();
    {
        let mut scope = f.ctx.scoped_event("Outer");
        let mut inner = scope.scoped_event("Inner");
        inner.draw(3);
    }
    assert_eq!(f.reference.call_count("begin_event"), 2);
    assert_eq!(f.reference.call_count("end_event"), 2);
    assert!(f.ctx.flush().is_ok());
}
