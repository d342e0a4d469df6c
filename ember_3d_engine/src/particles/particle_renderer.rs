/// GPU-driven particle pipeline for one emitter
///
/// Every frame runs, in order:
///
/// 1. reset (when requested): refill the dead list, zero the particle buffers
/// 2. emit: pop free slots from the dead list and initialize new particles
/// 3. simulate: age and move particles, rebuild the alive list and the draw arguments
/// 4. sort (optional): bitonic sort of the alive list, back-to-front
/// 5. rasterize: one indexed indirect draw of camera-facing quads
///
/// Counts never travel back to the CPU: the dead-list and alive counts reach
/// the shaders through `copy_structure_count` into constant buffers and into
/// the indirect argument buffers.

use std::sync::Arc;
use crate::error::{Error, Result};
use crate::{engine_error, engine_info};
use crate::graphics_device::{
    GraphicsDevice, BufferDesc, BufferSubresourceDesc, BufferViewHandle, TextureDesc, TextureViewHandle,
    UavFlags, Format, ResourceUsage, BindFlags, ResourceView, ShaderStage, PrimitiveTopology,
    BlendDesc, DepthStencilDesc, RasterizerDesc, KEEP_COUNTER,
};
use crate::renderer::{Buffer, Texture, CommandContext, BlendState, DepthStencilState, RasterizerState};
use crate::shader::{ShaderRegistry, ProgramId, ComputeProgram, GraphicsProgram};
use crate::particles::{
    Emitter, ParticleA, ParticleB, ViewSpacePosition, AliveEntry, EmitterConstants, FrameConstants,
    CountConstants, SortConstants, bitonic_sort, bitonic_sort::IncrementalPass,
    DEFAULT_CAPACITY, RENDER_ARGS_COUNT, DISPATCH_ARGS_COUNT, RENDER_ARGS_INSTANCE_COUNT_OFFSET,
    INDICES_PER_PARTICLE, INIT_GROUP_SIZE, EMIT_GROUP_SIZE, SIMULATE_GROUP_SIZE,
    FRAME_CB_SLOT, DEAD_LIST_COUNT_CB_SLOT, SORT_ACTIVE_COUNT_CB_SLOT, SORT_INFO_CB_SLOT,
    RASTERIZE_ACTIVE_COUNT_CB_SLOT, EMITTER_CB_SLOT,
};

const SOURCE: &str = "ember3d::ParticleRenderer";

// ===== CONFIGURATION =====

#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSystemConfig {
    /// Particle slots, fixed for the renderer's lifetime
    pub capacity: u32,
    /// Width and height of the random texture
    pub random_texture_size: u32,
    /// Seed of the random texture contents
    pub random_seed: u64,
    /// Allow sorting for emitters that request it
    pub sort_enabled: bool,
}

impl Default for ParticleSystemConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            random_texture_size: 1024,
            random_seed: 0x5eed_0f_9a27,
            sort_enabled: true,
        }
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// RGBA texels of the random texture, uniformly distributed in [-1, 1]
pub fn random_texture_data(size: u32, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..size as usize * size as usize * 4)
        .map(|_| {
            let unit = (splitmix64(&mut state) >> 40) as f32 / (1u64 << 24) as f32;
            2.0 * unit - 1.0
        })
        .collect()
}

/// Quad indices for `capacity` particles: `b, b+1, b+2, b+2, b+1, b+3`
pub fn quad_indices(capacity: u32) -> Vec<u32> {
    (0..capacity)
        .flat_map(|particle| {
            let b = particle * 4;
            [b, b + 1, b + 2, b + 2, b + 1, b + 3]
        })
        .collect()
}

/// Counters read back for debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleDebugCounters {
    pub dead_count: u32,
    pub alive_count: u32,
    pub render_args: [u32; RENDER_ARGS_COUNT],
}

// ===== PROGRAMS =====

struct Programs {
    init_dead_list: Arc<ComputeProgram>,
    reset: Arc<ComputeProgram>,
    emit: Arc<ComputeProgram>,
    simulate: Arc<ComputeProgram>,
    init_sort_args: Arc<ComputeProgram>,
    sort_512: Arc<ComputeProgram>,
    sort_step: Arc<ComputeProgram>,
    sort_inner_512: Arc<ComputeProgram>,
    particles: Arc<GraphicsProgram>,
}

impl Programs {
    fn fetch(registry: &ShaderRegistry) -> Result<Self> {
        let compute = |id: ProgramId| {
            registry.compute_program(id)
                .ok_or_else(|| Error::InitializationFailed(format!("compute program {:?} is missing", id)))
        };
        Ok(Self {
            init_dead_list: compute(ProgramId::ParticleInitDeadList)?,
            reset: compute(ProgramId::ParticleReset)?,
            emit: compute(ProgramId::ParticleEmit)?,
            simulate: compute(ProgramId::ParticleSimulate)?,
            init_sort_args: compute(ProgramId::ParticleInitSortArgs)?,
            sort_512: compute(ProgramId::ParticleSort512)?,
            sort_step: compute(ProgramId::ParticleBitonicSortStep)?,
            sort_inner_512: compute(ProgramId::ParticleSortInner512)?,
            particles: registry.graphics_program(ProgramId::Particles)
                .ok_or_else(|| Error::InitializationFailed("graphics program Particles is missing".to_string()))?,
        })
    }
}

/// View handles resolved once at creation
struct Views {
    dead_list_uav: BufferViewHandle,
    particles_a_uav: BufferViewHandle,
    particles_b_uav: BufferViewHandle,
    view_positions_uav: BufferViewHandle,
    alive_list_uav: BufferViewHandle,
    render_args_uav: BufferViewHandle,
    sort_args_uav: BufferViewHandle,
    particles_a_srv: BufferViewHandle,
    view_positions_srv: BufferViewHandle,
    alive_list_srv: BufferViewHandle,
    random_srv: TextureViewHandle,
}

fn required<T>(view: Option<T>, what: &str) -> Result<T> {
    view.ok_or_else(|| Error::InitializationFailed(format!("cannot create the {} view", what)))
}

// ===== RENDERER =====

pub struct ParticleRenderer {
    device: Arc<dyn GraphicsDevice>,
    config: ParticleSystemConfig,

    dead_list: Buffer,
    particles_a: Buffer,
    particles_b: Buffer,
    view_positions: Buffer,
    alive_list: Buffer,
    render_args: Buffer,
    sort_args: Buffer,
    index_buffer: Buffer,
    random_texture: Texture,

    frame_cb: Buffer,
    emitter_cb: Buffer,
    dead_list_count_cb: Buffer,
    active_count_cb: Buffer,
    sort_info_cb: Buffer,
    debug_readback: Buffer,

    blend_state: BlendState,
    depth_state: DepthStencilState,
    rasterizer_state: RasterizerState,

    views: Views,
    programs: Programs,
    program_generation: u64,
    sort_passes: Vec<IncrementalPass>,
}

impl ParticleRenderer {
    /// Create every particle buffer at full capacity and fetch the programs
    ///
    /// # Errors
    ///
    /// `InitializationFailed` when a particle program or a view is missing, or
    /// the device error when a pipeline state cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if a particle buffer cannot be created.
    pub fn new(device: Arc<dyn GraphicsDevice>, registry: &ShaderRegistry, config: ParticleSystemConfig) -> Result<Self> {
        if config.capacity == 0 || config.random_texture_size == 0 {
            return Err(Error::InitializationFailed(format!("invalid particle configuration {:?}", config)));
        }
        let capacity = config.capacity as u64;
        let programs = Programs::fetch(registry)?;

        let dead_list = Buffer::new(Arc::clone(&device), BufferDesc::append(capacity, 4), None);
        let particles_a = Buffer::new(Arc::clone(&device), BufferDesc::structured::<ParticleA>(capacity, true, false), None);
        let particles_b = Buffer::new(Arc::clone(&device), BufferDesc::structured::<ParticleB>(capacity, true, false), None);
        let view_positions = Buffer::new(Arc::clone(&device), BufferDesc::structured::<ViewSpacePosition>(capacity, true, false), None);
        let alive_list = Buffer::new(Arc::clone(&device), BufferDesc::append(capacity, std::mem::size_of::<AliveEntry>() as u32), None);
        let render_args = Buffer::new(Arc::clone(&device), BufferDesc::indirect_args((RENDER_ARGS_COUNT * 4) as u64), None);
        let sort_args = Buffer::new(Arc::clone(&device), BufferDesc::indirect_args((DISPATCH_ARGS_COUNT * 4) as u64), None);

        let indices = quad_indices(config.capacity);
        let index_buffer = Buffer::with_data(Arc::clone(&device), BufferDesc::index_buffer(capacity * INDICES_PER_PARTICLE as u64, false), &indices);

        let size = config.random_texture_size;
        let random_texture = Texture::new(
            Arc::clone(&device),
            TextureDesc {
                usage: ResourceUsage::Immutable,
                bind_flags: BindFlags::SHADER_RESOURCE,
                ..TextureDesc::texture_2d(size, size, Format::R32G32B32A32_FLOAT)
            },
            Some(bytemuck::cast_slice(&random_texture_data(size, config.random_seed))),
        );

        let cb = |size: usize| Buffer::new(Arc::clone(&device), BufferDesc::constant_buffer(size as u64), None);
        let frame_cb = cb(std::mem::size_of::<FrameConstants>());
        let emitter_cb = cb(std::mem::size_of::<EmitterConstants>());
        let sort_info_cb = cb(std::mem::size_of::<SortConstants>());
        let count_cb = || Buffer::new(Arc::clone(&device), BufferDesc::gpu_constant_buffer(std::mem::size_of::<CountConstants>() as u64), None);
        let dead_list_count_cb = count_cb();
        let active_count_cb = count_cb();
        let debug_readback = Buffer::new(Arc::clone(&device), BufferDesc::readback(((2 + RENDER_ARGS_COUNT) * 4) as u64), None);

        // Counter views must be created first so they are the default read-write views
        let append = BufferSubresourceDesc::with_uav_flags(UavFlags::APPEND);
        dead_list.create_read_write_view(Some(&append));
        alive_list.create_read_write_view(Some(&append));

        let views = Views {
            dead_list_uav: required(dead_list.uav(), "dead list")?,
            particles_a_uav: required(particles_a.uav(), "particle A")?,
            particles_b_uav: required(particles_b.uav(), "particle B")?,
            view_positions_uav: required(view_positions.uav(), "view position")?,
            alive_list_uav: required(alive_list.uav(), "alive list")?,
            render_args_uav: required(render_args.uav(), "render argument")?,
            sort_args_uav: required(sort_args.uav(), "sort argument")?,
            particles_a_srv: required(particles_a.srv(), "particle A")?,
            view_positions_srv: required(view_positions.srv(), "view position")?,
            alive_list_srv: required(alive_list.srv(), "alive list")?,
            random_srv: required(random_texture.srv(), "random texture")?,
        };

        let blend_state = BlendState::new(Arc::clone(&device), BlendDesc::alpha_blend())?;
        let depth_state = DepthStencilState::new(Arc::clone(&device), DepthStencilDesc::read_only_depth())?;
        let rasterizer_state = RasterizerState::new(Arc::clone(&device), RasterizerDesc::cull_none())?;

        engine_info!(SOURCE, "Particle buffers created for {} particles", config.capacity);

        Ok(Self {
            device,
            sort_passes: bitonic_sort::plan_full_sort(config.capacity),
            config,
            dead_list,
            particles_a,
            particles_b,
            view_positions,
            alive_list,
            render_args,
            sort_args,
            index_buffer,
            random_texture,
            frame_cb,
            emitter_cb,
            dead_list_count_cb,
            active_count_cb,
            sort_info_cb,
            debug_readback,
            blend_state,
            depth_state,
            rasterizer_state,
            views,
            programs,
            program_generation: registry.generation(),
        })
    }

    pub fn config(&self) -> &ParticleSystemConfig { &self.config }

    pub fn capacity(&self) -> u32 { self.config.capacity }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> { &self.device }

    pub fn random_texture(&self) -> &Texture { &self.random_texture }

    /// Incremental sort passes run after the initial 512-block pass
    pub fn sort_passes(&self) -> &[IncrementalPass] { &self.sort_passes }

    /// Run the whole pipeline for `emitter`
    ///
    /// Clears `emitter.reset` once the particles are reset, and consumes
    /// `emitter.number_to_emit`. The caller binds the render targets before
    /// calling; `depth` is sampled for collisions and soft particles.
    pub fn render(
        &mut self,
        ctx: &mut CommandContext,
        registry: &ShaderRegistry,
        emitter: &mut Emitter,
        frame: &FrameConstants,
        depth: Option<TextureViewHandle>,
    ) -> Result<()> {
        self.refresh_programs(registry);
        self.frame_cb.update_value(frame)?;

        if emitter.reset {
            self.initialize_dead_list(ctx);
            self.reset_particles(ctx);
            emitter.reset = false;
        }

        self.emitter_cb.update_value(&emitter.constants())?;
        if emitter.number_to_emit > 0 && !emitter.pause {
            self.emit(ctx, emitter.number_to_emit);
            emitter.number_to_emit = 0;
        }

        self.simulate(ctx, depth);
        if emitter.sort && self.config.sort_enabled {
            self.sort(ctx)?;
        }
        self.rasterize(ctx, emitter.texture, depth);
        Ok(())
    }

    /// Fetch the programs again after the registry rebuilt them
    fn refresh_programs(&mut self, registry: &ShaderRegistry) {
        if registry.generation() == self.program_generation {
            return;
        }
        match Programs::fetch(registry) {
            Ok(programs) => self.programs = programs,
            Err(err) => engine_error!(SOURCE, "Keeping previous particle programs: {}", err),
        }
        self.program_generation = registry.generation();
    }

    fn group_count(items: u32, group_size: u32) -> u32 {
        items.div_ceil(group_size)
    }

    fn initialize_dead_list(&self, ctx: &mut CommandContext) {
        let mut ctx = ctx.scoped_event("Particles Init Dead List");
        ctx.set_shader_resources_rw(0, &[Some(ResourceView::Buffer(self.views.dead_list_uav))], Some(&[0]));
        ctx.set_compute_program(&self.programs.init_dead_list);
        ctx.dispatch(Self::group_count(self.config.capacity, INIT_GROUP_SIZE), 1, 1);
        ctx.unset_shader_resources_rw(0, 1);
    }

    fn reset_particles(&self, ctx: &mut CommandContext) {
        let mut ctx = ctx.scoped_event("Particles Reset");
        let uavs: [Option<ResourceView>; 2] = [Some(self.views.particles_a_uav.into()), Some(self.views.particles_b_uav.into())];
        ctx.set_shader_resources_rw(0, &uavs, Some(&[KEEP_COUNTER; 2]));
        ctx.set_compute_program(&self.programs.reset);
        ctx.dispatch(Self::group_count(self.config.capacity, INIT_GROUP_SIZE), 1, 1);
        ctx.unset_shader_resources_rw(0, 2);
    }

    fn emit(&self, ctx: &mut CommandContext, count: u32) {
        let mut ctx = ctx.scoped_event("Particles Emit Pass");
        ctx.set_compute_program(&self.programs.emit);

        let uavs: [Option<ResourceView>; 3] = [
            Some(self.views.particles_a_uav.into()),
            Some(self.views.particles_b_uav.into()),
            Some(self.views.dead_list_uav.into()),
        ];
        ctx.set_shader_resources_rw(0, &uavs, Some(&[KEEP_COUNTER; 3]));
        ctx.set_shader_resource_ro(ShaderStage::Compute, 0, self.views.random_srv);
        ctx.set_constant_buffer(ShaderStage::Compute, DEAD_LIST_COUNT_CB_SLOT, Some(&self.dead_list_count_cb));
        ctx.set_constant_buffer(ShaderStage::Compute, EMITTER_CB_SLOT, Some(&self.emitter_cb));

        ctx.copy_structure_count(&self.dead_list_count_cb, 0, self.views.dead_list_uav);
        ctx.dispatch(Self::group_count(count, EMIT_GROUP_SIZE), 1, 1);

        ctx.unset_shader_resources_ro(ShaderStage::Compute, 0, 1);
        ctx.unset_shader_resources_rw(0, 3);
    }

    fn simulate(&self, ctx: &mut CommandContext, depth: Option<TextureViewHandle>) {
        let mut ctx = ctx.scoped_event("Particles Simulate Pass");

        let uavs: [Option<ResourceView>; 6] = [
            Some(self.views.particles_a_uav.into()),
            Some(self.views.particles_b_uav.into()),
            Some(self.views.dead_list_uav.into()),
            Some(self.views.alive_list_uav.into()),
            Some(self.views.view_positions_uav.into()),
            Some(self.views.render_args_uav.into()),
        ];
        let counts = [KEEP_COUNTER, KEEP_COUNTER, KEEP_COUNTER, 0, KEEP_COUNTER, KEEP_COUNTER];
        ctx.set_shader_resources_rw(0, &uavs, Some(&counts));
        ctx.set_shader_resources_ro(ShaderStage::Compute, 0, &[depth.map(ResourceView::Texture)]);
        ctx.set_constant_buffer(ShaderStage::Compute, FRAME_CB_SLOT, Some(&self.frame_cb));
        ctx.set_constant_buffer(ShaderStage::Compute, EMITTER_CB_SLOT, Some(&self.emitter_cb));

        ctx.set_compute_program(&self.programs.simulate);
        ctx.dispatch(Self::group_count(self.config.capacity, SIMULATE_GROUP_SIZE), 1, 1);

        ctx.unset_shader_resources_rw(0, 6);
        ctx.unset_shader_resources_ro(ShaderStage::Compute, 0, 1);

        ctx.copy_structure_count(&self.active_count_cb, 0, self.views.alive_list_uav);
        ctx.copy_structure_count(&self.render_args, RENDER_ARGS_INSTANCE_COUNT_OFFSET, self.views.alive_list_uav);
    }

    fn sort(&self, ctx: &mut CommandContext) -> Result<()> {
        let mut ctx = ctx.scoped_event("Particles Sort Pass");
        ctx.set_constant_buffer(ShaderStage::Compute, SORT_ACTIVE_COUNT_CB_SLOT, Some(&self.active_count_cb));
        ctx.set_constant_buffer(ShaderStage::Compute, SORT_INFO_CB_SLOT, Some(&self.sort_info_cb));

        ctx.set_shader_resources_rw(0, &[Some(ResourceView::Buffer(self.views.sort_args_uav))], None);
        ctx.set_compute_program(&self.programs.init_sort_args);
        ctx.dispatch(1, 1, 1);
        ctx.unset_shader_resources_rw(0, 1);

        ctx.set_shader_resources_rw(0, &[Some(ResourceView::Buffer(self.views.alive_list_uav))], None);

        ctx.set_compute_program(&self.programs.sort_512);
        ctx.dispatch_indirect(&self.sort_args, 0);

        for pass in &self.sort_passes {
            ctx.set_compute_program(&self.programs.sort_step);
            for step in &pass.steps {
                ctx.update_buffer_value(&self.sort_info_cb, step)?;
                ctx.dispatch(pass.group_count, 1, 1);
            }
            ctx.set_compute_program(&self.programs.sort_inner_512);
            ctx.dispatch(pass.group_count, 1, 1);
        }

        ctx.unset_shader_resources_rw(0, 1);
        Ok(())
    }

    fn rasterize(&self, ctx: &mut CommandContext, texture: Option<TextureViewHandle>, depth: Option<TextureViewHandle>) {
        let mut ctx = ctx.scoped_event("Particles Rasterize Pass");

        ctx.set_graphics_program(&self.programs.particles);
        ctx.set_constant_buffer(ShaderStage::Vertex, FRAME_CB_SLOT, Some(&self.frame_cb));
        ctx.set_constant_buffer(ShaderStage::Vertex, RASTERIZE_ACTIVE_COUNT_CB_SLOT, Some(&self.active_count_cb));
        ctx.set_vertex_buffer(None, 0);
        ctx.set_index_buffer(Some(&self.index_buffer), 0);
        ctx.set_topology(PrimitiveTopology::TriangleList);
        ctx.set_blend_state(Some(&self.blend_state), None, u32::MAX);
        ctx.set_depth_stencil_state(Some(&self.depth_state), 0);
        ctx.set_rasterizer_state(Some(&self.rasterizer_state));

        let vs_views: [Option<ResourceView>; 3] = [
            Some(self.views.particles_a_srv.into()),
            Some(self.views.view_positions_srv.into()),
            Some(self.views.alive_list_srv.into()),
        ];
        let ps_views = [texture.map(ResourceView::Texture), depth.map(ResourceView::Texture)];
        ctx.set_shader_resources_ro(ShaderStage::Vertex, 0, &vs_views);
        ctx.set_shader_resources_ro(ShaderStage::Pixel, 0, &ps_views);

        ctx.draw_indexed_indirect(&self.render_args, 0);

        ctx.unset_shader_resources_ro(ShaderStage::Vertex, 0, 3);
        ctx.unset_shader_resources_ro(ShaderStage::Pixel, 0, 2);
    }

    // ===== DEBUG READBACK =====

    /// Read the dead-list count, the alive count and the draw arguments
    ///
    /// Waits for the GPU.
    pub fn read_debug_counters(&self, ctx: &mut CommandContext) -> Result<ParticleDebugCounters> {
        ctx.copy_structure_count(&self.debug_readback, 0, self.views.dead_list_uav);
        ctx.copy_structure_count(&self.debug_readback, 4, self.views.alive_list_uav);
        ctx.copy_buffer_region(&self.debug_readback, 8, &self.render_args, 0, (RENDER_ARGS_COUNT * 4) as u64);
        ctx.wait_for_gpu()?;

        let mapping = self.debug_readback.map_for_read()?;
        let words: Vec<u32> = mapping.read_slice(0, 2 + RENDER_ARGS_COUNT);
        let mut render_args = [0; RENDER_ARGS_COUNT];
        render_args.copy_from_slice(&words[2..]);
        Ok(ParticleDebugCounters { dead_count: words[0], alive_count: words[1], render_args })
    }

    /// Read the alive list in its current order
    ///
    /// Waits for the GPU.
    pub fn read_alive_indices(&self, ctx: &mut CommandContext) -> Result<Vec<AliveEntry>> {
        let alive_count = self.read_debug_counters(ctx)?.alive_count.min(self.config.capacity);
        if alive_count == 0 {
            return Ok(Vec::new());
        }
        let size = alive_count as u64 * std::mem::size_of::<AliveEntry>() as u64;
        let staging = Buffer::try_new(Arc::clone(&self.device), BufferDesc::readback(size), None)?;
        ctx.copy_buffer_region(&staging, 0, &self.alive_list, 0, size);
        ctx.wait_for_gpu()?;

        let mapping = staging.map_for_read()?;
        Ok(mapping.read_slice(0, alive_count as usize))
    }

    /// Read one particle's attributes
    ///
    /// Waits for the GPU. `index` must be below the capacity.
    pub fn read_particle(&self, ctx: &mut CommandContext, index: u32) -> Result<(ParticleA, ParticleB)> {
        if index >= self.config.capacity {
            return Err(Error::InvalidResource(format!(
                "particle index {} outside capacity {}",
                index, self.config.capacity
            )));
        }
        let a_size = std::mem::size_of::<ParticleA>() as u64;
        let b_size = std::mem::size_of::<ParticleB>() as u64;
        let staging = Buffer::try_new(Arc::clone(&self.device), BufferDesc::readback(a_size + b_size), None)?;
        ctx.copy_buffer_region(&staging, 0, &self.particles_a, index as u64 * a_size, a_size);
        ctx.copy_buffer_region(&staging, a_size, &self.particles_b, index as u64 * b_size, b_size);
        ctx.wait_for_gpu()?;

        let mapping = staging.map_for_read()?;
        Ok((mapping.read(0), mapping.read(a_size as usize)))
    }
}

#[cfg(test)]
#[path = "particle_renderer_tests.rs"]
mod tests;
