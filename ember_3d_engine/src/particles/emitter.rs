/// Particle emitter parameters and per-frame emission accounting

use glam::Vec3;
use crate::graphics_device::TextureViewHandle;
use crate::particles::EmitterConstants;

/// A single particle emitter
///
/// Plain value type updated by the caller once per frame; `update` turns the
/// emission rate into a whole number of particles to emit this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitter {
    pub position: Vec3,
    pub position_variance: Vec3,
    pub velocity: Vec3,
    pub velocity_variance: f32,
    pub start_size: f32,
    pub end_size: f32,
    pub mass: f32,
    pub particles_per_second: f32,
    /// Life of a new particle in seconds
    pub lifespan: f32,
    /// Sort particles back-to-front before drawing
    pub sort: bool,
    /// Bounce particles off the depth buffer
    pub collisions: bool,
    /// View-space thickness assigned to depth buffer surfaces
    pub collision_thickness: f32,
    /// Fractional particles carried over between frames
    pub accumulation: f32,
    /// Particles emitted by the next render
    pub number_to_emit: u32,
    /// Seconds since creation
    pub elapsed_time: f32,
    /// Clear every particle before the next render
    pub reset: bool,
    /// Skip emission and rate accounting
    pub pause: bool,
    /// Color source sampled by the particle pixel shader
    pub texture: Option<TextureViewHandle>,
}

impl Default for Emitter {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            position_variance: Vec3::splat(0.5),
            velocity: Vec3::new(0.0, 5.0, 0.0),
            velocity_variance: 0.6,
            start_size: 0.2,
            end_size: 0.05,
            mass: 1.0,
            particles_per_second: 100.0,
            lifespan: 2.0,
            sort: false,
            collisions: false,
            collision_thickness: 40.0,
            accumulation: 0.0,
            number_to_emit: 0,
            elapsed_time: 0.0,
            reset: true,
            pause: false,
            texture: None,
        }
    }
}

impl Emitter {
    /// Advance time and compute `number_to_emit`
    ///
    /// The integer part of the accumulated rate is emitted once it exceeds
    /// one particle; the fraction carries over.
    pub fn update(&mut self, delta_time: f32) {
        if self.pause {
            return;
        }
        self.elapsed_time += delta_time;
        if self.particles_per_second > 0.0 {
            self.accumulation += self.particles_per_second * delta_time;
            if self.accumulation > 1.0 {
                let whole = self.accumulation.trunc();
                self.number_to_emit = whole as u32;
                self.accumulation -= whole;
            }
        }
    }

    /// Constant buffer contents for emission and collisions
    pub fn constants(&self) -> EmitterConstants {
        EmitterConstants {
            position: self.position.extend(1.0).to_array(),
            velocity: self.velocity.extend(0.0).to_array(),
            position_variance: self.position_variance.extend(0.0).to_array(),
            max_particles_this_frame: self.number_to_emit,
            lifespan: self.lifespan,
            start_size: self.start_size,
            end_size: self.end_size,
            velocity_variance: self.velocity_variance,
            mass: self.mass,
            elapsed_time: self.elapsed_time,
            collisions: self.collisions as u32,
            collision_thickness: self.collision_thickness,
            _padding: [0; 3],
        }
    }
}

#[cfg(test)]
#[path = "emitter_tests.rs"]
mod tests;
