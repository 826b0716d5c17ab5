//! One compilation's view of a frontend.
//!
//! An [AbiInstance] is created when translation of a shader starts and dropped when it ends.
//! It holds the values the frontend preloaded ([ShaderAbi]) and routes every callback to the
//! frontend after checking it is legal at this point of the compilation.

use log::{debug, trace, warn};

use super::{
    AbiCall, AbiFrontend, AbiSetup, Callback, InputLoad, InputsTable, OutputSlot, SamplerDescLoad,
    TcsOutputStore, TessVaryingLoad, MAX_STREAMS,
};
use crate::error::AbiError;
use crate::ir::{Builder, SessionId, ValueRef, ValueType};
use crate::shader::ShaderInfo;
use crate::stage::{ShaderStage, StageInput, StageInputs};

/// The read-only data of an ABI instance. Callbacks get this alongside the builder.
#[derive(Debug, Clone)]
pub struct ShaderAbi {
    session: SessionId,
    info: ShaderInfo,
    stage_inputs: StageInputs,
    inputs: InputsTable,
    clamp_shadow_reference: bool,
}
impl ShaderAbi {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn stage(&self) -> ShaderStage {
        self.info.stage
    }

    pub fn info(&self) -> &ShaderInfo {
        &self.info
    }

    pub fn stage_inputs(&self) -> &StageInputs {
        &self.stage_inputs
    }

    pub fn stage_input(&self, input: StageInput) -> Result<ValueRef, AbiError> {
        self.stage_inputs.get(input)
    }

    pub fn inputs(&self) -> &InputsTable {
        &self.inputs
    }

    pub fn clamp_shadow_reference(&self) -> bool {
        self.clamp_shadow_reference
    }
}

/// Geometry emission counters for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub vertices: u32,
    pub primitives: u32,
    /// Vertices emitted since the last primitive ended
    pub open_vertices: u32,
}

pub struct AbiInstance<F: AbiFrontend> {
    abi: ShaderAbi,
    frontend: F,
    history: Vec<AbiCall>,
    streams: [StreamStats; MAX_STREAMS as usize],
    finished: bool,
}
impl<F: AbiFrontend> AbiInstance<F> {
    /// Lets `frontend` preload its values for `info` and checks what it produced
    pub fn new(b: &mut Builder, mut frontend: F, info: &ShaderInfo) -> Result<Self, AbiError> {
        info.check_declarations()?;
        let AbiSetup { stage_inputs, inputs } = frontend.setup(b, info)?;
        if stage_inputs.stage() != info.stage {
            return Err(AbiError::SetupMismatch {
                expected: info.stage,
                found: stage_inputs.stage(),
            });
        }
        let expected = info.input_slots();
        if inputs.len() != expected {
            return Err(AbiError::InputsTableSize {
                expected,
                found: inputs.len(),
            });
        }
        for (_, v) in stage_inputs.iter() {
            b.check(v)?;
        }
        for v in inputs.iter().flatten() {
            b.check(*v)?;
        }

        let clamp_shadow_reference = frontend.clamp_shadow_reference();
        debug!(
            "{} ABI instance for {} shader: {} stage inputs, {} input slots, clamp_shadow_reference={}",
            frontend.name(),
            info.stage,
            stage_inputs.iter().count(),
            inputs.len(),
            clamp_shadow_reference
        );
        Ok(Self {
            abi: ShaderAbi {
                session: b.session(),
                info: info.clone(),
                stage_inputs,
                inputs,
                clamp_shadow_reference,
            },
            frontend,
            history: vec![],
            streams: [StreamStats::default(); MAX_STREAMS as usize],
            finished: false,
        })
    }

    pub fn abi(&self) -> &ShaderAbi {
        &self.abi
    }

    pub fn stage(&self) -> ShaderStage {
        self.abi.stage()
    }

    pub fn stage_inputs(&self) -> &StageInputs {
        self.abi.stage_inputs()
    }

    pub fn stage_input(&self, input: StageInput) -> Result<ValueRef, AbiError> {
        self.abi.stage_input(input)
    }

    pub fn inputs(&self) -> &InputsTable {
        self.abi.inputs()
    }

    pub fn clamp_shadow_reference(&self) -> bool {
        self.abi.clamp_shadow_reference()
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    /// Every callback dispatched so far, in order
    pub fn history(&self) -> &[AbiCall] {
        &self.history
    }

    pub fn stream_stats(&self, stream: u32) -> Option<StreamStats> {
        self.streams.get(stream as usize).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_parts(self) -> (F, Vec<AbiCall>) {
        (self.frontend, self.history)
    }

    /// Checks shared by every dispatch: lifecycle, stage applicability, handle provenance
    fn check(&self, b: &Builder, callback: Callback, handles: &[ValueRef]) -> Result<(), AbiError> {
        if self.finished {
            return Err(AbiError::AfterFinish(callback));
        }
        if !self.stage().allows(callback) {
            return Err(AbiError::StageMismatch {
                callback,
                stage: self.stage(),
            });
        }
        for h in handles {
            b.check(*h)?;
        }
        Ok(())
    }

    fn record(&mut self, call: AbiCall) {
        trace!("{}: {}", self.frontend.name(), call);
        self.history.push(call);
    }

    fn missing(&self, callback: Callback) -> AbiError {
        AbiError::MissingCallback {
            frontend: self.frontend.name(),
            callback,
        }
    }

    fn check_geometry(&mut self, b: &Builder, callback: Callback, stream: u32) -> Result<(), AbiError> {
        self.check(b, callback, &[])?;
        if self.frontend.geometry().is_none() {
            return Err(self.missing(callback));
        }
        if stream >= MAX_STREAMS {
            return Err(AbiError::InvalidStream(stream));
        }
        Ok(())
    }

    fn check_tess(&mut self, b: &Builder, callback: Callback, handles: &[ValueRef]) -> Result<(), AbiError> {
        self.check(b, callback, handles)?;
        if self.frontend.tessellation().is_none() {
            return Err(self.missing(callback));
        }
        Ok(())
    }

    /// Stores the final outputs. No callback may be dispatched afterwards.
    pub fn emit_outputs(&mut self, b: &mut Builder, outputs: &[OutputSlot]) -> Result<(), AbiError> {
        let handles: Vec<ValueRef> = outputs.iter().flat_map(|o| o.values.iter().flatten().copied()).collect();
        self.check(b, Callback::EmitOutputs, &handles)?;
        self.record(AbiCall::EmitOutputs {
            max_outputs: outputs.len(),
        });
        self.finished = true;
        self.frontend.emit_outputs(&self.abi, b, outputs.len(), outputs)
    }

    pub fn emit_vertex(&mut self, b: &mut Builder, stream: u32, outputs: &[OutputSlot]) -> Result<(), AbiError> {
        self.check_geometry(b, Callback::EmitVertex, stream)?;
        for v in outputs.iter().flat_map(|o| o.values.iter().flatten()) {
            b.check(*v)?;
        }
        self.record(AbiCall::EmitVertex { stream });

        let max_vertices = self.abi.info.max_vertices;
        let stats = &mut self.streams[stream as usize];
        stats.vertices += 1;
        stats.open_vertices += 1;
        if max_vertices > 0 && stats.vertices > max_vertices {
            warn!(
                "stream {} emitted {} vertices, more than the declared max of {}",
                stream, stats.vertices, max_vertices
            );
        }

        match self.frontend.geometry() {
            Some(g) => g.emit_vertex(&self.abi, b, stream, outputs),
            None => Err(self.missing(Callback::EmitVertex)),
        }
    }

    pub fn emit_primitive(&mut self, b: &mut Builder, stream: u32) -> Result<(), AbiError> {
        self.check_geometry(b, Callback::EmitPrimitive, stream)?;
        self.record(AbiCall::EmitPrimitive { stream });

        let stats = &mut self.streams[stream as usize];
        if stats.open_vertices == 0 {
            warn!("stream {} ended a primitive with no vertices", stream);
        }
        stats.primitives += 1;
        stats.open_vertices = 0;

        match self.frontend.geometry() {
            Some(g) => g.emit_primitive(&self.abi, b, stream),
            None => Err(self.missing(Callback::EmitPrimitive)),
        }
    }

    pub fn load_inputs(&mut self, b: &mut Builder, req: &InputLoad) -> Result<ValueRef, AbiError> {
        self.check(b, Callback::LoadInputs, &[])?;
        check_components(req.component, req.n_components)?;
        self.record(AbiCall::LoadInputs {
            driver_location: req.driver_location,
            component: req.component,
            n_components: req.n_components,
        });
        self.frontend.load_inputs(&self.abi, b, req)
    }

    pub fn load_tess_varyings(&mut self, b: &mut Builder, req: &TessVaryingLoad) -> Result<ValueRef, AbiError> {
        let handles: Vec<ValueRef> = req.vertex_index.iter().chain(req.param_index.iter()).copied().collect();
        self.check_tess(b, Callback::LoadTessVaryings, &handles)?;
        if req.is_compact {
            // compact elements may span slots, only the count is bounded
            check_components(0, req.n_components)?;
        } else {
            check_components(req.component, req.n_components)?;
        }
        self.record(AbiCall::LoadTessVaryings {
            driver_location: req.driver_location,
            is_patch: req.is_patch,
            load_inputs: req.load_inputs,
        });
        match self.frontend.tessellation() {
            Some(t) => t.load_tess_varyings(&self.abi, b, req),
            None => Err(self.missing(Callback::LoadTessVaryings)),
        }
    }

    pub fn store_tcs_outputs(&mut self, b: &mut Builder, req: &TcsOutputStore) -> Result<(), AbiError> {
        let handles: Vec<ValueRef> = std::iter::once(req.src)
            .chain(req.vertex_index)
            .chain(req.param_index)
            .collect();
        self.check_tess(b, Callback::StoreTcsOutputs, &handles)?;
        self.record(AbiCall::StoreTcsOutputs {
            driver_location: req.var.driver_location,
            writemask: req.writemask,
        });
        match self.frontend.tessellation() {
            Some(t) => t.store_tcs_outputs(&self.abi, b, req),
            None => Err(self.missing(Callback::StoreTcsOutputs)),
        }
    }

    pub fn load_tess_coord(&mut self, b: &mut Builder, ty: ValueType, n_components: u8) -> Result<ValueRef, AbiError> {
        self.check_tess(b, Callback::LoadTessCoord, &[])?;
        check_components(0, n_components)?;
        self.record(AbiCall::LoadTessCoord { n_components });
        match self.frontend.tessellation() {
            Some(t) => t.load_tess_coord(&self.abi, b, ty, n_components),
            None => Err(self.missing(Callback::LoadTessCoord)),
        }
    }

    pub fn load_patch_vertices_in(&mut self, b: &mut Builder) -> Result<ValueRef, AbiError> {
        self.check_tess(b, Callback::LoadPatchVerticesIn, &[])?;
        self.record(AbiCall::LoadPatchVerticesIn);
        match self.frontend.tessellation() {
            Some(t) => t.load_patch_vertices_in(&self.abi, b),
            None => Err(self.missing(Callback::LoadPatchVerticesIn)),
        }
    }

    pub fn load_tess_level(&mut self, b: &mut Builder, varying_id: u32) -> Result<ValueRef, AbiError> {
        self.check_tess(b, Callback::LoadTessLevel, &[])?;
        self.record(AbiCall::LoadTessLevel { varying_id });
        match self.frontend.tessellation() {
            Some(t) => t.load_tess_level(&self.abi, b, varying_id),
            None => Err(self.missing(Callback::LoadTessLevel)),
        }
    }

    pub fn load_resource(
        &mut self,
        b: &mut Builder,
        set: Option<u32>,
        binding: u32,
        index: ValueRef,
    ) -> Result<ValueRef, AbiError> {
        self.check(b, Callback::LoadResource, &[index])?;
        self.record(AbiCall::LoadResource { set, binding });
        self.frontend.load_resource(&self.abi, b, set, binding, index)
    }

    pub fn load_ubo(&mut self, b: &mut Builder, index: ValueRef) -> Result<ValueRef, AbiError> {
        self.check(b, Callback::LoadUbo, &[index])?;
        self.record(AbiCall::LoadUbo);
        self.frontend.load_ubo(&self.abi, b, index)
    }

    pub fn load_ssbo(&mut self, b: &mut Builder, buffer: ValueRef, write: bool) -> Result<ValueRef, AbiError> {
        self.check(b, Callback::LoadSsbo, &[buffer])?;
        self.record(AbiCall::LoadSsbo { write });
        self.frontend.load_ssbo(&self.abi, b, buffer, write)
    }

    pub fn load_sampler_desc(&mut self, b: &mut Builder, req: &SamplerDescLoad) -> Result<ValueRef, AbiError> {
        let handles: Vec<ValueRef> = req.index.iter().copied().collect();
        self.check(b, Callback::LoadSamplerDesc, &handles)?;
        self.record(AbiCall::LoadSamplerDesc {
            kind: req.kind,
            base_index: req.base_index,
            dynamic: req.index.is_some(),
        });
        self.frontend.load_sampler_desc(&self.abi, b, req)
    }
}

fn check_components(component: u8, n_components: u8) -> Result<(), AbiError> {
    let end = component.saturating_add(n_components);
    if n_components == 0 || end > 4 {
        return Err(AbiError::ComponentRange { component, end });
    }
    Ok(())
}
