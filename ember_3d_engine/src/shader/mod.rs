/// Shader module - compiled shaders, programs and the registry owning them

pub mod program;
pub mod shader_id;
pub mod compiler;
pub mod registry;

pub use program::*;
pub use shader_id::*;
pub use compiler::*;
pub use registry::*;
