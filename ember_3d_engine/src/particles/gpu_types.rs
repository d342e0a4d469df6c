/// GPU-visible particle structures and pipeline constants
///
/// Layouts match the particle shaders (std430 / HLSL structured buffers and
/// 16-byte aligned constant buffers).

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

// ===== CAPACITY AND ARGUMENTS =====

/// Default number of particle slots
pub const DEFAULT_CAPACITY: u32 = 400 * 1024;

/// `{index_count_per_instance, instance_count, start_index, base_vertex, start_instance}`
pub const RENDER_ARGS_COUNT: usize = 5;
/// `{groups_x, groups_y, groups_z, padding}`
pub const DISPATCH_ARGS_COUNT: usize = 4;
/// Byte offset of the instance count in the render arguments
pub const RENDER_ARGS_INSTANCE_COUNT_OFFSET: u32 = 4;
/// Indices of one particle quad
pub const INDICES_PER_PARTICLE: u32 = 6;

// ===== THREAD GROUPS =====

pub const INIT_GROUP_SIZE: u32 = 256;
pub const EMIT_GROUP_SIZE: u32 = 1024;
pub const SIMULATE_GROUP_SIZE: u32 = 256;
/// Elements sorted by one sort thread group
pub const SORT_GROUP_SIZE: u32 = 512;

// ===== CONSTANT BUFFER SLOTS =====

pub const FRAME_CB_SLOT: u32 = 0;
pub const DEAD_LIST_COUNT_CB_SLOT: u32 = 11;
pub const SORT_ACTIVE_COUNT_CB_SLOT: u32 = 11;
pub const SORT_INFO_CB_SLOT: u32 = 12;
pub const RASTERIZE_ACTIVE_COUNT_CB_SLOT: u32 = 12;
pub const EMITTER_CB_SLOT: u32 = 13;

/// Gravity applied by the simulation, in world units per second squared
pub const GRAVITY: [f32; 3] = [0.0, -9.81, 0.0];
/// Collisions after which a particle comes to rest
pub const MAX_COLLISIONS: u32 = 8;
/// Fraction of the velocity kept after a collision
pub const RESTITUTION: f32 = 0.4;

// ===== PARTICLE BUFFERS =====

/// Particle attributes A: position, velocity, life
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleA {
    pub position: [f32; 3],
    pub mass: f32,
    pub velocity: [f32; 3],
    /// Total life in seconds
    pub lifespan: f32,
}

/// Particle attributes B: size and age-derived attributes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleB {
    /// Remaining life in seconds; the slot is free when not positive
    pub age: f32,
    pub start_size: f32,
    pub end_size: f32,
    pub size: f32,
    pub rotation: f32,
    pub collision_count: u32,
    pub sleeping: u32,
    pub alpha: f32,
}

impl ParticleB {
    pub fn is_alive(&self) -> bool {
        self.age > 0.0
    }
}

/// View-space position and radius of one particle slot
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ViewSpacePosition {
    pub position: [f32; 3],
    pub radius: f32,
}

impl ViewSpacePosition {
    /// Record of a free slot: infinitely far from the camera
    pub const DEAD: Self = Self { position: [0.0, 0.0, f32::NEG_INFINITY], radius: 0.0 };

    /// Distance along the view direction (the camera looks down -Z)
    pub fn view_depth(&self) -> f32 {
        -self.position[2]
    }
}

/// Entry of the alive list
///
/// Ascending `sort_key` order is back-to-front.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct AliveEntry {
    /// Negated view depth
    pub sort_key: f32,
    /// Particle slot
    pub index: u32,
}

impl AliveEntry {
    /// Padding value of the sort: orders after every live entry
    pub const SENTINEL: Self = Self { sort_key: f32::INFINITY, index: u32::MAX };

    pub fn new(view_depth: f32, index: u32) -> Self {
        Self { sort_key: -view_depth, index }
    }
}

// ===== CONSTANT BUFFERS =====

/// Emitter parameters for emission and collisions (`b13`)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct EmitterConstants {
    pub position: [f32; 4],
    pub velocity: [f32; 4],
    pub position_variance: [f32; 4],
    pub max_particles_this_frame: u32,
    pub lifespan: f32,
    pub start_size: f32,
    pub end_size: f32,
    pub velocity_variance: f32,
    pub mass: f32,
    pub elapsed_time: f32,
    pub collisions: u32,
    pub collision_thickness: f32,
    pub _padding: [u32; 3],
}

/// Per-frame camera and timing data (`b0`)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameConstants {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec4,
    pub delta_time: f32,
    pub elapsed_time: f32,
    pub screen_size: [f32; 2],
}

impl Default for FrameConstants {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec4::W,
            delta_time: 0.0,
            elapsed_time: 0.0,
            screen_size: [1.0, 1.0],
        }
    }
}

/// A GPU-written element count (`b11`, `b12`), filled by `copy_structure_count`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CountConstants {
    pub count: u32,
    pub _padding: [u32; 3],
}

/// One bitonic merge step (`b12`)
///
/// Thread `t` compares element `index = high + low` with
/// `high + swap_offset + swap_sign * low`, where `low = t & (block_size - 1)`
/// and `high = 2 * (t - low)`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortConstants {
    pub block_size: i32,
    pub swap_offset: i32,
    pub swap_sign: i32,
    pub _padding: i32,
}

const _: () = assert!(std::mem::size_of::<ParticleA>() == 32);
const _: () = assert!(std::mem::size_of::<ParticleB>() == 32);
const _: () = assert!(std::mem::size_of::<EmitterConstants>() == 96);
const _: () = assert!(std::mem::size_of::<FrameConstants>() == 160);
