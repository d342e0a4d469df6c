/// Particles module - GPU-driven particle system
///
/// `Emitter` is the CPU-side description, `ParticleRenderer` owns the GPU
/// buffers and records the passes, `bitonic_sort` plans the sort dispatches.

pub mod gpu_types;
pub mod bitonic_sort;
pub mod emitter;
pub mod particle_renderer;

pub use gpu_types::*;
pub use emitter::Emitter;
pub use particle_renderer::{
    ParticleRenderer, ParticleSystemConfig, ParticleDebugCounters, random_texture_data, quad_indices,
};
