/*!
# Ember 3D Engine

Core types for the Ember 3D rendering engine.

This crate provides a platform-agnostic, D3D11-style resource and command
model, and a GPU-driven particle system built on it. Native backends (Vulkan)
implement the `GraphicsDevice` / `CommandStream` seam in their own crates; a
CPU reference device ships with the core for tests and headless runs.

## Architecture

- **GraphicsDevice**: Native seam creating GPU objects
- **CommandStream**: Native seam recording commands
- **Buffer / Texture**: Owned resources with lazily created views
- **CommandContext**: Binding state machine over a command stream
- **ShaderRegistry**: Compiled shaders and programs, with hot reload
- **ParticleRenderer**: Emit, simulate, sort and draw particles on the GPU
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod graphics_device;
pub mod renderer;
pub mod shader;
pub mod particles;
pub mod reference;

// Main ember3d namespace module
pub mod ember3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Logger slot
    pub use crate::engine::Engine;

    // Native API seam
    pub use crate::graphics_device::{GraphicsDevice, CommandStream};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger, LOG_LEVEL_VAR};
    }

    // Device-level descriptors and handles
    pub mod device {
        pub use crate::graphics_device::*;
    }

    // Owned GPU objects and the command context
    pub mod render {
        pub use crate::renderer::*;
    }

    pub mod shader {
        pub use crate::shader::*;
    }

    pub mod particles {
        pub use crate::particles::*;
    }

    // CPU reference device
    pub mod reference {
        pub use crate::reference::*;
    }
}

// Re-export math library at crate root
pub use glam;
