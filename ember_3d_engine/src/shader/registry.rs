/// Shader registry - owns every compiled shader and the programs built from them
///
/// All shaders are compiled up front; a failure there is fatal for the caller.
/// Edits to shader sources are reported with `on_shader_file_changed`, which
/// recompiles the affected shaders, rebuilds the programs using them and bumps
/// `generation()`. Holders of programs compare the generation and fetch again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use rustc_hash::FxHashMap;
use crate::error::{Error, Result};
use crate::{engine_error, engine_info, engine_debug};
use crate::graphics_device::{GraphicsDevice, ShaderDesc};
use crate::shader::{
    Shader, GraphicsProgram, ComputeProgram, ShaderId, ProgramId, ProgramLayout,
    ShaderCompiler, ShaderCompileRequest, ShaderMacro,
};

const SOURCE: &str = "ember3d::ShaderRegistry";

#[derive(Debug, Clone)]
pub struct ShaderRegistryConfig {
    /// Directory shader source paths are relative to
    pub shader_root: PathBuf,
    /// Defines added to every shader
    pub macros: Vec<ShaderMacro>,
}

impl Default for ShaderRegistryConfig {
    fn default() -> Self {
        Self { shader_root: PathBuf::from("shaders"), macros: Vec::new() }
    }
}

#[derive(Clone)]
enum Program {
    Graphics(Arc<GraphicsProgram>),
    Compute(Arc<ComputeProgram>),
}

pub struct ShaderRegistry {
    device: Arc<dyn GraphicsDevice>,
    compiler: Arc<dyn ShaderCompiler>,
    config: ShaderRegistryConfig,
    shaders: FxHashMap<ShaderId, Arc<Shader>>,
    dependencies: FxHashMap<ShaderId, Vec<PathBuf>>,
    programs: FxHashMap<ProgramId, Program>,
    generation: u64,
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || a.ends_with(b) || b.ends_with(a)
}

impl ShaderRegistry {
    /// Compile every shader and build every program
    ///
    /// # Errors
    ///
    /// `ShaderCompilationFailed` for the first shader that does not compile,
    /// or the device error if a native shader cannot be created.
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        compiler: Arc<dyn ShaderCompiler>,
        config: ShaderRegistryConfig,
    ) -> Result<Self> {
        let mut registry = Self {
            device,
            compiler,
            config,
            shaders: FxHashMap::default(),
            dependencies: FxHashMap::default(),
            programs: FxHashMap::default(),
            generation: 0,
        };

        for id in ShaderId::ALL {
            let (shader, dependencies) = registry.compile_shader(id)?;
            registry.shaders.insert(id, shader);
            registry.dependencies.insert(id, dependencies);
        }
        for id in ProgramId::ALL {
            let program = registry.build_program(id)?;
            registry.programs.insert(id, program);
        }

        engine_info!(SOURCE, "{} shaders compiled, {} programs built", registry.shaders.len(), registry.programs.len());
        Ok(registry)
    }

    fn compile_shader(&self, id: ShaderId) -> Result<(Arc<Shader>, Vec<PathBuf>)> {
        let source = id.source();
        let path = self.config.shader_root.join(source.file);
        let mut macros = self.config.macros.clone();
        macros.extend(source.macros.iter().map(|&(name, value)| ShaderMacro::new(name, value)));

        let request = ShaderCompileRequest {
            source_file: &path,
            entry_point: source.entry_point,
            stage: source.stage,
            macros: &macros,
        };
        let compiled = self.compiler.compile(&request).map_err(|err| {
            engine_error!(SOURCE, "Compiling {} ({}) failed: {}", id.name(), path.display(), err);
            Error::ShaderCompilationFailed(format!("{}: {}", id.name(), err))
        })?;

        let shader = Shader::new(Arc::clone(&self.device), &ShaderDesc {
            stage: source.stage,
            code: &compiled.code,
            entry_point: source.entry_point,
            name: id.name(),
        })?;

        let dependencies = if compiled.dependencies.is_empty() { vec![path] } else { compiled.dependencies };
        Ok((Arc::new(shader), dependencies))
    }

    fn shader_arc(&self, id: ShaderId) -> Result<Arc<Shader>> {
        self.shaders.get(&id).cloned()
            .ok_or_else(|| Error::InvalidResource(format!("shader {} is not compiled", id.name())))
    }

    fn optional_shader(&self, id: Option<ShaderId>) -> Result<Option<Arc<Shader>>> {
        id.map(|id| self.shader_arc(id)).transpose()
    }

    fn build_program(&self, id: ProgramId) -> Result<Program> {
        Ok(match id.layout() {
            ProgramLayout::Graphics { vs, ps, hs, ds, gs } => Program::Graphics(Arc::new(GraphicsProgram {
                vs: Some(self.shader_arc(vs)?),
                ps: self.optional_shader(ps)?,
                hs: self.optional_shader(hs)?,
                ds: self.optional_shader(ds)?,
                gs: self.optional_shader(gs)?,
                input_layout: None,
            })),
            ProgramLayout::Compute { cs } => Program::Compute(Arc::new(ComputeProgram { cs: self.shader_arc(cs)? })),
        })
    }

    /// Graphics program `id`, None if `id` names a compute program
    pub fn graphics_program(&self, id: ProgramId) -> Option<Arc<GraphicsProgram>> {
        match self.programs.get(&id) {
            Some(Program::Graphics(program)) => Some(Arc::clone(program)),
            _ => None,
        }
    }

    /// Compute program `id`, None if `id` names a graphics program
    pub fn compute_program(&self, id: ProgramId) -> Option<Arc<ComputeProgram>> {
        match self.programs.get(&id) {
            Some(Program::Compute(program)) => Some(Arc::clone(program)),
            _ => None,
        }
    }

    pub fn shader(&self, id: ShaderId) -> Option<&Arc<Shader>> {
        self.shaders.get(&id)
    }

    /// Files shader `id` was compiled from
    pub fn dependencies(&self, id: ShaderId) -> &[PathBuf] {
        self.dependencies.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incremented every time programs are rebuilt
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &ShaderRegistryConfig {
        &self.config
    }

    /// Recompile the shaders depending on `path` and rebuild their programs
    ///
    /// A shader that fails to recompile keeps its previous version.
    ///
    /// # Returns
    ///
    /// Number of shaders successfully recompiled
    pub fn on_shader_file_changed(&mut self, path: &Path) -> usize {
        let affected: Vec<ShaderId> = ShaderId::ALL
            .into_iter()
            .filter(|id| self.dependencies(*id).iter().any(|dep| same_file(dep, path)))
            .collect();
        if affected.is_empty() {
            engine_debug!(SOURCE, "No shader depends on {}", path.display());
            return 0;
        }

        let mut recompiled = Vec::new();
        for id in affected {
            match self.compile_shader(id) {
                Ok((shader, dependencies)) => {
                    self.shaders.insert(id, shader);
                    self.dependencies.insert(id, dependencies);
                    recompiled.push(id);
                }
                Err(err) => {
                    engine_error!(SOURCE, "Keeping previous {} after failed recompile: {}", id.name(), err);
                }
            }
        }
        if recompiled.is_empty() {
            return 0;
        }

        for id in ProgramId::ALL {
            let layout = id.layout();
            if !recompiled.iter().any(|&shader| layout.uses(shader)) {
                continue;
            }
            match self.build_program(id) {
                Ok(program) => {
                    self.programs.insert(id, program);
                }
                Err(err) => engine_error!(SOURCE, "Rebuilding program {:?} failed: {}", id, err),
            }
        }

        self.generation += 1;
        engine_info!(SOURCE, "{} shader(s) reloaded after {} changed", recompiled.len(), path.display());
        recompiled.len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
