/// Shader compiler for the reference device
///
/// Reference shaders are identified by entry point only, so "compiling" emits
/// the entry point as the bytecode and reports the source file as the only
/// dependency. Individual entry points can be made to fail, which simulates a
/// broken shader edit.

use std::sync::Mutex;
use rustc_hash::FxHashSet;
use crate::error::{Error, Result};
use crate::reference::device::lock;
use crate::shader::{ShaderCompiler, ShaderCompileRequest, CompiledShader};

#[derive(Default)]
pub struct ReferenceShaderCompiler {
    failing: Mutex<FxHashSet<String>>,
}

impl ReferenceShaderCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make compiles of `entry_point` fail (or succeed again)
    pub fn set_failing(&self, entry_point: &str, failing: bool) {
        let mut set = lock(&self.failing);
        if failing {
            set.insert(entry_point.to_string());
        } else {
            set.remove(entry_point);
        }
    }
}

impl ShaderCompiler for ReferenceShaderCompiler {
    fn compile(&self, request: &ShaderCompileRequest<'_>) -> Result<CompiledShader> {
        if lock(&self.failing).contains(request.entry_point) {
            return Err(Error::ShaderCompilationFailed(format!(
                "{}: error in entry point '{}'", request.source_file.display(), request.entry_point)));
        }
        Ok(CompiledShader {
            code: request.entry_point.as_bytes().to_vec(),
            dependencies: vec![request.source_file.to_path_buf()],
        })
    }
}
