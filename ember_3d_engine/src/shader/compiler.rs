/// Shader compiler seam
///
/// The registry does not compile shaders itself. A backend supplies a
/// `ShaderCompiler` producing bytecode its `GraphicsDevice` accepts, and
/// reports the files each shader was built from so edits can be tracked.

use std::path::{Path, PathBuf};
use crate::error::Result;
use crate::graphics_device::ShaderStage;

/// A preprocessor define
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderMacro {
    pub name: String,
    pub value: String,
}

impl ShaderMacro {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderCompileRequest<'a> {
    pub source_file: &'a Path,
    pub entry_point: &'a str,
    pub stage: ShaderStage,
    pub macros: &'a [ShaderMacro],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledShader {
    /// Backend bytecode
    pub code: Vec<u8>,
    /// Every file read while compiling, the source file included
    pub dependencies: Vec<PathBuf>,
}

pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, request: &ShaderCompileRequest<'_>) -> Result<CompiledShader>;
}
