/// Graphics device module - descriptors, state objects and the native API seam

pub mod config;
pub mod format;
pub mod descriptor;
pub mod states;
pub mod render_pass;
pub mod device;

pub use config::*;
pub use format::*;
pub use descriptor::*;
pub use states::*;
pub use render_pass::*;
pub use device::*;
