/// Renderer module - owned GPU objects and the command context

pub mod buffer;
pub mod texture;
pub mod pipeline_state;
pub mod command_context;
pub mod profiler;

pub use buffer::*;
pub use texture::*;
pub use pipeline_state::*;
pub use command_context::*;
pub use profiler::{GpuProfiler, ProfileScope, Timestamp};
