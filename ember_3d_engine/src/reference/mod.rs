/// Reference device - CPU implementation of the graphics device seam
///
/// Used by the test suites and for headless runs without a GPU. It executes
/// compute programs as Rust kernels and records draws instead of rasterizing.

pub mod device;
pub mod command_stream;
pub mod kernel;
pub mod compiler;
pub mod particle_kernels;

pub use device::{ReferenceDevice, DrawRecord, REFERENCE_TIMESTAMP_FREQUENCY};
pub use command_stream::ReferenceCommandStream;
pub use kernel::{ReferenceKernel, KernelContext};
pub use compiler::ReferenceShaderCompiler;
