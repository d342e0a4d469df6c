/// DxcShaderCompiler - HLSL to SPIR-V through the `dxc` executable
///
/// Register spaces are shifted per stage so the SPIR-V bindings land in the
/// stage windows the device expects. Dependencies are found by scanning
/// `#include` directives, since dxc does not report them.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use rustc_hash::FxHashSet;
use ember_3d_engine::ember3d::{Error, Result};
use ember_3d_engine::ember3d::device::ShaderStage;
use ember_3d_engine::ember3d::shader::{ShaderCompiler, ShaderCompileRequest, CompiledShader};
use ember_3d_engine::{engine_debug, engine_warn};
use crate::vulkan_shader::register_shifts;

const SOURCE: &str = "ember3d::DxcShaderCompiler";

/// Executable used when `EMBER_DXC` is not set
pub const DEFAULT_DXC: &str = "dxc";

static OUTPUT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Shader model 6.0 profile of a stage
pub fn target_profile(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vs_6_0",
        ShaderStage::Pixel => "ps_6_0",
        ShaderStage::Hull => "hs_6_0",
        ShaderStage::Domain => "ds_6_0",
        ShaderStage::Geometry => "gs_6_0",
        ShaderStage::Compute => "cs_6_0",
    }
}

/// Path named by an `#include` line, if the line is one
fn parse_include(line: &str) -> Option<(&str, bool)> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start().strip_prefix("include")?.trim();
    if let Some(name) = rest.strip_prefix('"') {
        return name.split('"').next().map(|name| (name, true));
    }
    rest.strip_prefix('<')?.split('>').next().map(|name| (name, false))
}

pub struct DxcShaderCompiler {
    executable: PathBuf,
    include_dirs: Vec<PathBuf>,
}

impl Default for DxcShaderCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl DxcShaderCompiler {
    /// Compiler running `$EMBER_DXC`, or `dxc` from `PATH`
    pub fn new() -> Self {
        let executable = std::env::var_os("EMBER_DXC").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_DXC));
        Self { executable, include_dirs: Vec::new() }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Add a directory searched for `#include <...>` files
    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Command line for one compile, writing SPIR-V to `output`
    pub fn arguments(&self, request: &ShaderCompileRequest<'_>, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-spirv".to_string(),
            "-fspv-target-env=vulkan1.3".to_string(),
            "-fvk-use-dx-layout".to_string(),
            "-T".to_string(),
            target_profile(request.stage).to_string(),
            "-E".to_string(),
            request.entry_point.to_string(),
        ];
        let [b, t, u, s] = register_shifts(request.stage);
        for (class, shift) in [("b", b), ("t", t), ("u", u), ("s", s)] {
            args.extend([format!("-fvk-{}-shift", class), shift.to_string(), "0".to_string()]);
        }
        for dir in &self.include_dirs {
            args.extend(["-I".to_string(), dir.display().to_string()]);
        }
        for define in request.macros {
            args.extend(["-D".to_string(), format!("{}={}", define.name, define.value)]);
        }
        args.extend(["-Fo".to_string(), output.display().to_string()]);
        args.push(request.source_file.display().to_string());
        args
    }

    fn resolve_include(&self, including: &Path, name: &str, quoted: bool) -> Option<PathBuf> {
        let local = including.parent().map(|dir| dir.join(name)).filter(|_| quoted);
        local
            .into_iter()
            .chain(self.include_dirs.iter().map(|dir| dir.join(name)))
            .find(|path| path.is_file())
    }

    /// The source file and every file it includes, transitively
    pub fn dependencies(&self, source_file: &Path) -> Vec<PathBuf> {
        let mut seen = FxHashSet::default();
        let mut files = Vec::new();
        let mut pending = vec![source_file.to_path_buf()];
        while let Some(file) = pending.pop() {
            if !seen.insert(file.clone()) {
                continue;
            }
            match std::fs::read_to_string(&file) {
                Ok(text) => {
                    for (name, quoted) in text.lines().filter_map(parse_include) {
                        match self.resolve_include(&file, name, quoted) {
                            Some(path) => pending.push(path),
                            None => engine_warn!(SOURCE, "{}: include '{}' not found", file.display(), name),
                        }
                    }
                }
                Err(e) => engine_warn!(SOURCE, "Cannot scan {} for includes: {}", file.display(), e),
            }
            files.push(file);
        }
        files
    }
}

impl ShaderCompiler for DxcShaderCompiler {
    fn compile(&self, request: &ShaderCompileRequest<'_>) -> Result<CompiledShader> {
        let output = std::env::temp_dir().join(format!(
            "ember3d-{}-{}.spv",
            std::process::id(),
            OUTPUT_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let result = Command::new(&self.executable)
            .args(self.arguments(request, &output))
            .output()
            .map_err(|e| Error::ShaderCompilationFailed(format!("cannot run {}: {}", self.executable.display(), e)))
            .and_then(|run| {
                if run.status.success() {
                    std::fs::read(&output).map_err(|e| Error::ShaderCompilationFailed(format!("cannot read dxc output: {}", e)))
                } else {
                    Err(Error::ShaderCompilationFailed(format!(
                        "{} ({}):\n{}",
                        request.source_file.display(),
                        request.entry_point,
                        String::from_utf8_lossy(&run.stderr).trim_end()
                    )))
                }
            });
        std::fs::remove_file(&output).ok();

        let code = result?;
        engine_debug!(SOURCE, "Compiled {}:{} ({} bytes)", request.source_file.display(), request.entry_point, code.len());
        Ok(CompiledShader { code, dependencies: self.dependencies(request.source_file) })
    }
}

#[cfg(test)]
#[path = "vulkan_compiler_tests.rs"]
mod tests;
