/// Shader objects and the programs assembled from them

use std::sync::Arc;
use crate::error::Result;
use crate::engine_error;
use crate::graphics_device::{
    GraphicsDevice, ShaderDesc, ShaderHandle, ShaderStage, InputLayoutDesc, InputLayoutHandle,
};

// ===== SHADER =====

/// Native shader object for one stage, destroyed on drop
pub struct Shader {
    device: Arc<dyn GraphicsDevice>,
    handle: ShaderHandle,
    stage: ShaderStage,
    name: String,
}

impl Shader {
    pub fn new(device: Arc<dyn GraphicsDevice>, desc: &ShaderDesc<'_>) -> Result<Self> {
        let handle = device.create_shader(desc).map_err(|err| {
            engine_error!("ember3d::Shader", "Shader '{}' creation failed: {}", desc.name, err);
            err
        })?;
        Ok(Self {
            device,
            handle,
            stage: desc.stage,
            name: desc.name.to_string(),
        })
    }

    pub fn handle(&self) -> ShaderHandle { self.handle }

    pub fn stage(&self) -> ShaderStage { self.stage }

    pub fn name(&self) -> &str { &self.name }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.device.destroy_shader(self.handle);
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .finish()
    }
}

// ===== INPUT LAYOUT =====

pub struct InputLayout {
    device: Arc<dyn GraphicsDevice>,
    handle: InputLayoutHandle,
}

impl InputLayout {
    pub fn new(device: Arc<dyn GraphicsDevice>, desc: &InputLayoutDesc, vertex_shader: &Shader) -> Result<Self> {
        let handle = device.create_input_layout(desc, vertex_shader.handle())?;
        Ok(Self { device, handle })
    }

    pub fn handle(&self) -> InputLayoutHandle { self.handle }
}

impl Drop for InputLayout {
    fn drop(&mut self) {
        self.device.destroy_input_layout(self.handle);
    }
}

// ===== PROGRAMS =====

/// Shaders bound together for a draw
#[derive(Default)]
pub struct GraphicsProgram {
    pub vs: Option<Arc<Shader>>,
    pub ps: Option<Arc<Shader>>,
    pub hs: Option<Arc<Shader>>,
    pub ds: Option<Arc<Shader>>,
    pub gs: Option<Arc<Shader>>,
    pub input_layout: Option<Arc<InputLayout>>,
}

impl GraphicsProgram {
    /// Shader bound to `stage`, None for stages the program leaves empty
    pub fn shader(&self, stage: ShaderStage) -> Option<&Arc<Shader>> {
        match stage {
            ShaderStage::Vertex => self.vs.as_ref(),
            ShaderStage::Pixel => self.ps.as_ref(),
            ShaderStage::Hull => self.hs.as_ref(),
            ShaderStage::Domain => self.ds.as_ref(),
            ShaderStage::Geometry => self.gs.as_ref(),
            ShaderStage::Compute => None,
        }
    }
}

/// A single compute shader
pub struct ComputeProgram {
    pub cs: Arc<Shader>,
}
