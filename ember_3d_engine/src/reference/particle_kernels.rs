/// CPU versions of the particle compute programs
///
/// Register layout (shared with the particle shaders):
///
/// | program | UAVs | SRVs | constants |
/// |---|---|---|---|
/// | init dead list | u0 dead list | | |
/// | reset | u0 A, u1 B | | |
/// | emit | u0 A, u1 B, u2 dead list | t0 random | b11 dead count, b13 emitter |
/// | simulate | u0 A, u1 B, u2 dead list, u3 alive, u4 view positions, u5 draw args | t0 depth | b0 frame, b13 emitter |
/// | init sort args | u0 dispatch args | | b11 alive count |
/// | sort passes | u0 alive | | b11 alive count, b12 sort step |

use glam::Vec3;
use crate::error::Result;
use crate::particles::{
    ParticleA, ParticleB, ViewSpacePosition, AliveEntry, EmitterConstants, FrameConstants,
    CountConstants, SortConstants, bitonic_sort,
    INIT_GROUP_SIZE, EMIT_GROUP_SIZE, SIMULATE_GROUP_SIZE, SORT_GROUP_SIZE, INDICES_PER_PARTICLE,
    FRAME_CB_SLOT, DEAD_LIST_COUNT_CB_SLOT, SORT_ACTIVE_COUNT_CB_SLOT, SORT_INFO_CB_SLOT, EMITTER_CB_SLOT,
    GRAVITY, MAX_COLLISIONS, RESTITUTION,
};
use crate::reference::{KernelContext, ReferenceDevice};
use crate::shader::ShaderId;

const PARTICLE_A: u32 = 0;
const PARTICLE_B: u32 = 1;
const DEAD_LIST: u32 = 2;
const ALIVE_LIST: u32 = 3;
const VIEW_POSITIONS: u32 = 4;
const DRAW_ARGS: u32 = 5;

/// Install every particle compute program on `device`
pub fn register(device: &ReferenceDevice) {
    let entry = |id: ShaderId| id.source().entry_point;
    device.register_kernel(entry(ShaderId::ParticleInitDeadListCS), init_dead_list);
    device.register_kernel(entry(ShaderId::ParticleResetCS), reset);
    device.register_kernel(entry(ShaderId::ParticleEmitCS), emit);
    device.register_kernel(entry(ShaderId::ParticleSimulateCS), simulate);
    device.register_kernel(entry(ShaderId::ParticleInitSortArgsCS), init_sort_args);
    device.register_kernel(entry(ShaderId::ParticleSort512CS), sort_512);
    device.register_kernel(entry(ShaderId::ParticleBitonicSortStepCS), bitonic_sort_step);
    device.register_kernel(entry(ShaderId::ParticleSortInner512CS), sort_inner_512);
}

/// Push every slot index on the dead list
pub fn init_dead_list(ctx: &mut KernelContext<'_>, group: [u32; 3]) -> Result<()> {
    let capacity = ctx.uav_len(0)?;
    for thread in 0..INIT_GROUP_SIZE {
        let id = group[0] * INIT_GROUP_SIZE + thread;
        if id >= capacity {
            break;
        }
        ctx.append(0, &id)?;
    }
    Ok(())
}

/// Zero both attribute buffers
pub fn reset(ctx: &mut KernelContext<'_>, group: [u32; 3]) -> Result<()> {
    let capacity = ctx.uav_len(PARTICLE_A)?;
    for thread in 0..INIT_GROUP_SIZE {
        let id = group[0] * INIT_GROUP_SIZE + thread;
        if id >= capacity {
            break;
        }
        ctx.store(PARTICLE_A, id, &ParticleA::default())?;
        ctx.store(PARTICLE_B, id, &ParticleB::default())?;
    }
    Ok(())
}

/// Pop free slots and write randomized new particles
pub fn emit(ctx: &mut KernelContext<'_>, group: [u32; 3]) -> Result<()> {
    let emitter: EmitterConstants = ctx.constants(EMITTER_CB_SLOT)?;
    let dead: CountConstants = ctx.constants(DEAD_LIST_COUNT_CB_SLOT)?;
    let (width, height) = ctx.texture_dimensions(0)?;
    let row = (emitter.elapsed_time * height as f32) as u32;

    for thread in 0..EMIT_GROUP_SIZE {
        let id = group[0] * EMIT_GROUP_SIZE + thread;
        if id >= dead.count || id >= emitter.max_particles_this_frame {
            break;
        }

        let x = id % width;
        let y = row.wrapping_add(id / width) % height;
        let random = ctx.texture_load(0, x, y)?;
        let random_position = ctx.texture_load(0, (x + width / 2) % width, y)?;

        let variance = Vec3::from_slice(&emitter.position_variance[..3]);
        let position = Vec3::from_slice(&emitter.position[..3])
            + Vec3::from_slice(&random_position[..3]) * variance;
        let velocity = Vec3::from_slice(&emitter.velocity[..3])
            + Vec3::from_slice(&random[..3]) * emitter.velocity_variance;

        let index: u32 = ctx.consume(DEAD_LIST)?;
        ctx.store(PARTICLE_A, index, &ParticleA {
            position: position.to_array(),
            mass: emitter.mass,
            velocity: velocity.to_array(),
            lifespan: emitter.lifespan,
        })?;
        ctx.store(PARTICLE_B, index, &ParticleB {
            age: emitter.lifespan,
            start_size: emitter.start_size,
            end_size: emitter.end_size,
            size: emitter.start_size,
            rotation: random[3] * std::f32::consts::PI,
            collision_count: 0,
            sleeping: 0,
            alpha: 1.0,
        })?;
    }
    Ok(())
}

/// View-space Z of the depth buffer surface under `view_position`, if any
fn surface_view_z(ctx: &KernelContext<'_>, frame: &FrameConstants, view_position: Vec3) -> Result<Option<f32>> {
    if !ctx.is_srv_bound(0) {
        return Ok(None);
    }
    let clip = frame.projection * view_position.extend(1.0);
    if clip.w <= 0.0 {
        return Ok(None);
    }
    let ndc = clip.truncate() / clip.w;
    if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 {
        return Ok(None);
    }

    let (width, height) = ctx.texture_dimensions(0)?;
    let x = (((ndc.x * 0.5 + 0.5) * width as f32) as u32).min(width - 1);
    let y = (((0.5 - ndc.y * 0.5) * height as f32) as u32).min(height - 1);
    let depth = ctx.texture_load(0, x, y)?[0];

    // Inverse of the projection's depth mapping
    let projection = frame.projection;
    let denominator = depth * projection.z_axis.w - projection.z_axis.z;
    if denominator.abs() < f32::EPSILON {
        return Ok(None);
    }
    Ok(Some(projection.w_axis.z / denominator))
}

/// Age, move and cull every particle; rebuild the alive list
pub fn simulate(ctx: &mut KernelContext<'_>, group: [u32; 3]) -> Result<()> {
    let frame: FrameConstants = ctx.constants(FRAME_CB_SLOT)?;
    let emitter: EmitterConstants = ctx.constants(EMITTER_CB_SLOT)?;
    let capacity = ctx.uav_len(PARTICLE_A)?;
    let gravity = Vec3::from(GRAVITY);
    let dt = frame.delta_time;

    for thread in 0..SIMULATE_GROUP_SIZE {
        let id = group[0] * SIMULATE_GROUP_SIZE + thread;
        if id == 0 {
            for (i, value) in [INDICES_PER_PARTICLE, 0, 0, 0, 0].iter().enumerate() {
                ctx.store(DRAW_ARGS, i as u32, value)?;
            }
        }
        if id >= capacity {
            break;
        }

        let mut a: ParticleA = ctx.load_rw(PARTICLE_A, id)?;
        let mut b: ParticleB = ctx.load_rw(PARTICLE_B, id)?;
        if !b.is_alive() {
            continue;
        }

        b.age -= dt;
        let mut position = Vec3::from(a.position);
        let mut velocity = Vec3::from(a.velocity);
        if b.sleeping == 0 {
            velocity += gravity * a.mass * dt;
            position += velocity * dt;
        }

        let life = if a.lifespan > 0.0 { (1.0 - b.age / a.lifespan).clamp(0.0, 1.0) } else { 1.0 };
        b.size = b.start_size + (b.end_size - b.start_size) * life;
        b.alpha = 1.0 - life;

        let view_position = frame.view.transform_point3(position);
        if emitter.collisions != 0 && b.sleeping == 0 {
            if let Some(surface_z) = surface_view_z(ctx, &frame, view_position)? {
                let behind = view_position.z < surface_z && surface_z - view_position.z < emitter.collision_thickness;
                let normal = (frame.camera_position.truncate() - position).normalize_or_zero();
                if behind && velocity.dot(normal) < 0.0 {
                    velocity = (velocity - 2.0 * velocity.dot(normal) * normal) * RESTITUTION;
                    b.collision_count += 1;
                    if b.collision_count >= MAX_COLLISIONS {
                        b.sleeping = 1;
                        velocity = Vec3::ZERO;
                    }
                }
            }
        }

        a.position = position.to_array();
        a.velocity = velocity.to_array();
        ctx.store(PARTICLE_A, id, &a)?;
        ctx.store(PARTICLE_B, id, &b)?;

        if b.is_alive() {
            let record = ViewSpacePosition { position: view_position.to_array(), radius: b.size };
            ctx.store(VIEW_POSITIONS, id, &record)?;
            ctx.append(ALIVE_LIST, &AliveEntry::new(record.view_depth(), id))?;
        } else {
            ctx.store(VIEW_POSITIONS, id, &ViewSpacePosition::DEAD)?;
            ctx.append(DEAD_LIST, &id)?;
        }
    }
    Ok(())
}

/// Group count of the initial sort pass from the alive count
pub fn init_sort_args(ctx: &mut KernelContext<'_>, _group: [u32; 3]) -> Result<()> {
    let alive: CountConstants = ctx.constants(SORT_ACTIVE_COUNT_CB_SLOT)?;
    for (i, value) in bitonic_sort::sort_dispatch_args(alive.count).iter().enumerate() {
        ctx.store(0, i as u32, value)?;
    }
    Ok(())
}

fn load_block(ctx: &KernelContext<'_>, group: u32, count: u32) -> Result<Vec<AliveEntry>> {
    let base = group * SORT_GROUP_SIZE;
    (0..SORT_GROUP_SIZE)
        .map(|i| if base + i < count { ctx.load_rw(0, base + i) } else { Ok(AliveEntry::SENTINEL) })
        .collect()
}

fn store_block(ctx: &mut KernelContext<'_>, group: u32, count: u32, block: &[AliveEntry]) -> Result<()> {
    let base = group * SORT_GROUP_SIZE;
    for (i, entry) in block.iter().enumerate() {
        let index = base + i as u32;
        if index < count {
            ctx.store(0, index, entry)?;
        }
    }
    Ok(())
}

/// Sort one 512-element block of the alive list
pub fn sort_512(ctx: &mut KernelContext<'_>, group: [u32; 3]) -> Result<()> {
    let alive: CountConstants = ctx.constants(SORT_ACTIVE_COUNT_CB_SLOT)?;
    let mut block = load_block(ctx, group[0], alive.count)?;
    bitonic_sort::sort_block(&mut block);
    store_block(ctx, group[0], alive.count, &block)
}

/// One global merge step across blocks
pub fn bitonic_sort_step(ctx: &mut KernelContext<'_>, group: [u32; 3]) -> Result<()> {
    let alive: CountConstants = ctx.constants(SORT_ACTIVE_COUNT_CB_SLOT)?;
    let step: SortConstants = ctx.constants(SORT_INFO_CB_SLOT)?;
    for thread in 0..bitonic_sort::PAIRS_PER_GROUP {
        let id = group[0] * bitonic_sort::PAIRS_PER_GROUP + thread;
        let (index, swap) = bitonic_sort::step_pair(id, &step);
        if swap >= alive.count {
            continue;
        }
        let a: AliveEntry = ctx.load_rw(0, index)?;
        let b: AliveEntry = ctx.load_rw(0, swap)?;
        if a.sort_key > b.sort_key {
            ctx.store(0, index, &b)?;
            ctx.store(0, swap, &a)?;
        }
    }
    Ok(())
}

/// Finish the merge inside one 512-element block
pub fn sort_inner_512(ctx: &mut KernelContext<'_>, group: [u32; 3]) -> Result<()> {
    let alive: CountConstants = ctx.constants(SORT_ACTIVE_COUNT_CB_SLOT)?;
    let mut block = load_block(ctx, group[0], alive.count)?;
    bitonic_sort::merge_block(&mut block);
    store_block(ctx, group[0], alive.count, &block)
}

#[cfg(test)]
#[path = "particle_kernels_tests.rs"]
mod tests;
