/// Shader and program identifiers with their source descriptions

use crate::graphics_device::ShaderStage;

/// A compiled shader of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderId {
    ParticleInitDeadListCS,
    ParticleResetCS,
    ParticleEmitCS,
    ParticleSimulateCS,
    ParticleInitSortArgsCS,
    ParticleSort512CS,
    ParticleBitonicSortStepCS,
    ParticleSortInner512CS,
    ParticleVS,
    ParticlePS,
}

/// Where a shader comes from and how it is compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSource {
    /// Path relative to the registry's shader root
    pub file: &'static str,
    pub entry_point: &'static str,
    pub stage: ShaderStage,
    /// Extra `(name, value)` defines
    pub macros: &'static [(&'static str, &'static str)],
}

impl ShaderId {
    pub const ALL: [ShaderId; 10] = [
        ShaderId::ParticleInitDeadListCS,
        ShaderId::ParticleResetCS,
        ShaderId::ParticleEmitCS,
        ShaderId::ParticleSimulateCS,
        ShaderId::ParticleInitSortArgsCS,
        ShaderId::ParticleSort512CS,
        ShaderId::ParticleBitonicSortStepCS,
        ShaderId::ParticleSortInner512CS,
        ShaderId::ParticleVS,
        ShaderId::ParticlePS,
    ];

    pub fn source(self) -> ShaderSource {
        let (file, entry_point, stage) = match self {
            ShaderId::ParticleInitDeadListCS => ("Particles/InitDeadListCS.hlsl", "InitDeadListCS", ShaderStage::Compute),
            ShaderId::ParticleResetCS => ("Particles/ParticleResetCS.hlsl", "ParticleResetCS", ShaderStage::Compute),
            ShaderId::ParticleEmitCS => ("Particles/ParticleEmitCS.hlsl", "ParticleEmitCS", ShaderStage::Compute),
            ShaderId::ParticleSimulateCS => ("Particles/ParticleSimulateCS.hlsl", "ParticleSimulateCS", ShaderStage::Compute),
            ShaderId::ParticleInitSortArgsCS => ("Particles/InitSortDispatchArgsCS.hlsl", "InitSortDispatchArgsCS", ShaderStage::Compute),
            ShaderId::ParticleSort512CS => ("Particles/Sort512CS.hlsl", "Sort512CS", ShaderStage::Compute),
            ShaderId::ParticleBitonicSortStepCS => ("Particles/BitonicSortStepCS.hlsl", "BitonicSortStepCS", ShaderStage::Compute),
            ShaderId::ParticleSortInner512CS => ("Particles/SortInner512CS.hlsl", "SortInner512CS", ShaderStage::Compute),
            ShaderId::ParticleVS => ("Particles/ParticleVS.hlsl", "ParticleVS", ShaderStage::Vertex),
            ShaderId::ParticlePS => ("Particles/ParticlePS.hlsl", "ParticlePS", ShaderStage::Pixel),
        };
        ShaderSource { file, entry_point, stage, macros: &[] }
    }

    /// Debug name
    pub fn name(self) -> &'static str {
        self.source().entry_point
    }
}

/// A program handed out by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProgramId {
    ParticleInitDeadList,
    ParticleReset,
    ParticleEmit,
    ParticleSimulate,
    ParticleInitSortArgs,
    ParticleSort512,
    ParticleBitonicSortStep,
    ParticleSortInner512,
    Particles,
}

/// Shaders making up a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramLayout {
    Graphics {
        vs: ShaderId,
        ps: Option<ShaderId>,
        hs: Option<ShaderId>,
        ds: Option<ShaderId>,
        gs: Option<ShaderId>,
    },
    Compute {
        cs: ShaderId,
    },
}

impl ProgramLayout {
    /// Whether the program uses `shader`
    pub fn uses(&self, shader: ShaderId) -> bool {
        match *self {
            ProgramLayout::Graphics { vs, ps, hs, ds, gs } => {
                vs == shader || [ps, hs, ds, gs].contains(&Some(shader))
            }
            ProgramLayout::Compute { cs } => cs == shader,
        }
    }
}

impl ProgramId {
    pub const ALL: [ProgramId; 9] = [
        ProgramId::ParticleInitDeadList,
        ProgramId::ParticleReset,
        ProgramId::ParticleEmit,
        ProgramId::ParticleSimulate,
        ProgramId::ParticleInitSortArgs,
        ProgramId::ParticleSort512,
        ProgramId::ParticleBitonicSortStep,
        ProgramId::ParticleSortInner512,
        ProgramId::Particles,
    ];

    pub fn layout(self) -> ProgramLayout {
        let cs = match self {
            ProgramId::ParticleInitDeadList => ShaderId::ParticleInitDeadListCS,
            ProgramId::ParticleReset => ShaderId::ParticleResetCS,
            ProgramId::ParticleEmit => ShaderId::ParticleEmitCS,
            ProgramId::ParticleSimulate => ShaderId::ParticleSimulateCS,
            ProgramId::ParticleInitSortArgs => ShaderId::ParticleInitSortArgsCS,
            ProgramId::ParticleSort512 => ShaderId::ParticleSort512CS,
            ProgramId::ParticleBitonicSortStep => ShaderId::ParticleBitonicSortStepCS,
            ProgramId::ParticleSortInner512 => ShaderId::ParticleSortInner512CS,
            ProgramId::Particles => {
                return ProgramLayout::Graphics {
                    vs: ShaderId::ParticleVS,
                    ps: Some(ShaderId::ParticlePS),
                    hs: None,
                    ds: None,
                    gs: None,
                };
            }
        };
        ProgramLayout::Compute { cs }
    }
}
