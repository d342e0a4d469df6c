/// Owned fixed-function state objects
///
/// Each wrapper creates its native object from a descriptor and destroys it on
/// drop. The descriptor is kept so equal states can be recognized.

use std::sync::Arc;
use crate::error::Result;
use crate::engine_error;
use crate::graphics_device::{
    GraphicsDevice, BlendDesc, RasterizerDesc, DepthStencilDesc, SamplerDesc,
    BlendStateHandle, RasterizerStateHandle, DepthStencilStateHandle, SamplerHandle,
};

macro_rules! state_object {
    ($(#[$meta:meta])* $name:ident, $desc:ty, $handle:ty, $create:ident, $destroy:ident) => {
        $(#[$meta])*
        pub struct $name {
            device: Arc<dyn GraphicsDevice>,
            handle: $handle,
            desc: $desc,
        }

        impl $name {
            pub fn new(device: Arc<dyn GraphicsDevice>, desc: $desc) -> Result<Self> {
                let handle = device.$create(&desc).map_err(|err| {
                    engine_error!("ember3d::PipelineState", "{} creation failed: {}", stringify!($name), err);
                    err
                })?;
                Ok(Self { device, handle, desc })
            }

            pub fn handle(&self) -> $handle { self.handle }

            pub fn desc(&self) -> &$desc { &self.desc }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.device.$destroy(self.handle);
            }
        }
    };
}

state_object!(
    /// Output-merger blend state
    BlendState, BlendDesc, BlendStateHandle, create_blend_state, destroy_blend_state
);
state_object!(
    RasterizerState, RasterizerDesc, RasterizerStateHandle, create_rasterizer_state, destroy_rasterizer_state
);
state_object!(
    /// Depth/stencil test state
    DepthStencilState, DepthStencilDesc, DepthStencilStateHandle, create_depth_stencil_state, destroy_depth_stencil_state
);
state_object!(
    Sampler, SamplerDesc, SamplerHandle, create_sampler, destroy_sampler
);
