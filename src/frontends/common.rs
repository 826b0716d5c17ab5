//! Hardware lowering shared by every binding model.
//!
//! Everything that does not depend on how resources are bound lives here: preloading stage
//! inputs and the inputs table, per-stage input reads, the LDS layout of tessellation
//! varyings, tessellation coordinates and levels, and output export.

use arrayvec::ArrayVec;
use log::{debug, warn};

use crate::abi::{
    AbiSetup, GeometryCallbacks, InputLoad, InputsTable, OutputSlot, Semantic, ShaderAbi, TcsOutputStore,
    TessCallbacks, TessLevel, TessVaryingLoad, VaryingSlot,
};
use crate::error::AbiError;
use crate::ir::{ArgSlot, Builder, ExportTarget, Offset, ValueRef, ValueType};
use crate::shader::{InterpMode, ShaderInfo};
use crate::stage::{ShaderStage, StageInput, StageInputs};

/// Dword offset of a table entry, folded to an immediate when `index` is a known constant
pub fn table_offset(b: &mut Builder, index: ValueRef, stride: u32, extra: u32) -> Offset {
    if let Some(i) = b.as_const_u32(index) {
        return Offset::Imm(i.wrapping_mul(stride).wrapping_add(extra));
    }
    let scaled = b.imul_imm(index, stride);
    Offset::Dyn(b.iadd_imm(scaled, extra))
}

fn input_arg(input: StageInput) -> ArgSlot {
    match input {
        StageInput::BaseVertex => ArgSlot::BaseVertex,
        StageInput::StartInstance => ArgSlot::StartInstance,
        StageInput::DrawId => ArgSlot::DrawId,
        StageInput::VertexId => ArgSlot::VertexId,
        StageInput::InstanceId => ArgSlot::InstanceId,
        StageInput::TcsPatchId => ArgSlot::TcsPatchId,
        StageInput::TcsRelIds => ArgSlot::TcsRelIds,
        StageInput::TesPatchId => ArgSlot::TesPatchId,
        StageInput::GsPrimitiveId => ArgSlot::GsPrimitiveId,
        StageInput::GsInvocationId => ArgSlot::GsInvocationId,
        StageInput::FragPos(c) => ArgSlot::FragPos(c),
        StageInput::FrontFace => ArgSlot::FrontFace,
        StageInput::Ancillary => ArgSlot::Ancillary,
        StageInput::SampleCoverage => ArgSlot::SampleCoverage,
    }
}

/// Preloads the stage inputs the shader asked for. The rest stay unset.
pub fn preload_stage_inputs(b: &mut Builder, info: &ShaderInfo) -> Result<StageInputs, AbiError> {
    let mut inputs = StageInputs::empty(info.stage);
    for input in info.system_values.iter().copied() {
        if input.stage() != info.stage {
            return Err(AbiError::StageInputNotApplicable {
                input,
                stage: info.stage,
            });
        }
        let v = Some(b.arg(input_arg(input)));
        match &mut inputs {
            StageInputs::Vertex(vs) => match input {
                StageInput::BaseVertex => vs.base_vertex = v,
                StageInput::StartInstance => vs.start_instance = v,
                StageInput::DrawId => vs.draw_id = v,
                StageInput::VertexId => vs.vertex_id = v,
                _ => vs.instance_id = v,
            },
            StageInputs::TessControl(tcs) => match input {
                StageInput::TcsPatchId => tcs.patch_id = v,
                _ => tcs.rel_ids = v,
            },
            StageInputs::TessEval(tes) => tes.patch_id = v,
            StageInputs::Geometry(gs) => match input {
                StageInput::GsPrimitiveId => gs.primitive_id = v,
                _ => gs.invocation_id = v,
            },
            StageInputs::Fragment(fs) => match input {
                StageInput::FragPos(c) => fs.frag_pos[c as usize & 3] = v,
                StageInput::FrontFace => fs.front_face = v,
                StageInput::Ancillary => fs.ancillary = v,
                _ => fs.sample_coverage = v,
            },
        }
    }
    Ok(inputs)
}

/// Builds the inputs table. Vertex inputs come from vertex fetch and fragment inputs from
/// interpolation; the other stages read their inputs from memory on demand.
pub fn preload_inputs(b: &mut Builder, info: &ShaderInfo) -> InputsTable {
    let mut table = InputsTable::new(info.input_slots());
    for decl in &info.inputs {
        for s in 0..decl.slots() {
            let slot = decl.driver_location + s;
            let v = match info.stage {
                ShaderStage::Vertex => b.arg(ArgSlot::VertexInput(slot)),
                ShaderStage::Fragment => b.interp(slot, decl.interp == InterpMode::Flat),
                _ => continue,
            };
            table.set(slot, v);
        }
    }
    table
}

pub fn setup(b: &mut Builder, info: &ShaderInfo) -> Result<AbiSetup, AbiError> {
    Ok(AbiSetup {
        stage_inputs: preload_stage_inputs(b, info)?,
        inputs: preload_inputs(b, info),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TessDomain {
    Triangles,
    Quads,
    Isolines,
}
impl TessDomain {
    pub fn outer_levels(self) -> u8 {
        match self {
            TessDomain::Triangles => 3,
            TessDomain::Quads => 4,
            TessDomain::Isolines => 2,
        }
    }
    pub fn inner_levels(self) -> u8 {
        match self {
            TessDomain::Triangles => 1,
            TessDomain::Quads => 2,
            TessDomain::Isolines => 0,
        }
    }
}

/// Where tessellation varyings live in LDS.
///
/// Inputs of all patches of a workgroup come first, packed per patch then per vertex.
/// Outputs start at `output_base`: each patch holds its per-vertex outputs followed by its
/// per-patch outputs. The first two per-patch slots are the outer and inner tessellation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TessLayout {
    pub domain: TessDomain,
    pub input_vertices: u32,
    pub output_vertices: u32,
    /// vec4 slots per input vertex
    pub input_slots: u32,
    /// vec4 slots per output vertex
    pub output_slots: u32,
    /// vec4 slots per patch, tessellation levels included
    pub patch_slots: u32,
    /// First dword of the output region
    pub output_base: u32,
}
impl Default for TessLayout {
    fn default() -> Self {
        Self {
            domain: TessDomain::Triangles,
            input_vertices: 3,
            output_vertices: 3,
            input_slots: 8,
            output_slots: 8,
            patch_slots: 8,
            output_base: 0x1000,
        }
    }
}
impl TessLayout {
    pub fn input_vertex_stride(&self) -> u32 {
        self.input_slots * 4
    }
    pub fn input_patch_stride(&self) -> u32 {
        self.input_vertices * self.input_vertex_stride()
    }
    pub fn output_vertex_stride(&self) -> u32 {
        self.output_slots * 4
    }
    /// Offset of the per-patch outputs within a patch's output block
    pub fn patch_data_offset(&self) -> u32 {
        self.output_vertices * self.output_vertex_stride()
    }
    pub fn output_patch_stride(&self) -> u32 {
        self.patch_data_offset() + self.patch_slots * 4
    }
}

/// Index of a per-patch varying within the per-patch slots
fn patch_slot(location: u32, driver_location: u32) -> u32 {
    match Semantic::decode(location) {
        Some(Semantic::Builtin(VaryingSlot::TessLevelOuter)) => 0,
        Some(Semantic::Builtin(VaryingSlot::TessLevelInner)) => 1,
        Some(Semantic::PatchGeneric(n)) => 2 + n,
        _ => driver_location.saturating_add(2),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Inputs,
    Outputs,
}

/// The addressing-relevant part of a varying access
struct VaryingAccess {
    vertex_index: Option<ValueRef>,
    param_index: Option<ValueRef>,
    const_index: u32,
    location: u32,
    driver_location: u32,
    component: u8,
    is_patch: bool,
    is_compact: bool,
}
impl From<&TessVaryingLoad> for VaryingAccess {
    fn from(r: &TessVaryingLoad) -> Self {
        Self {
            vertex_index: r.vertex_index,
            param_index: r.param_index,
            const_index: r.const_index,
            location: r.location,
            driver_location: r.driver_location,
            component: r.component,
            is_patch: r.is_patch,
            is_compact: r.is_compact,
        }
    }
}
impl From<&TcsOutputStore> for VaryingAccess {
    fn from(r: &TcsOutputStore) -> Self {
        Self {
            vertex_index: r.vertex_index,
            param_index: r.param_index,
            const_index: r.const_index,
            location: r.var.location,
            driver_location: r.var.driver_location,
            component: r.var.component,
            is_patch: r.var.is_patch,
            is_compact: r.var.is_compact,
        }
    }
}

/// Lowering of the stage-specific callbacks, parameterized by the tessellation layout.
/// Frontends hand this out as their geometry and tessellation callbacks.
#[derive(Debug, Clone, Default)]
pub struct HwLowering {
    pub tess: TessLayout,
}
impl HwLowering {
    pub fn new(tess: TessLayout) -> Self {
        Self { tess }
    }

    /// Patch of the current invocation: the relative patch id in tess-control
    /// (bits 0..8 of the packed ids), the patch id in tess-eval
    fn patch_index(&self, b: &mut Builder, stage: ShaderStage) -> ValueRef {
        match stage {
            ShaderStage::TessControl => {
                let rel_ids = b.arg(ArgSlot::TcsRelIds);
                b.bfe(rel_ids, 0, 8)
            }
            _ => b.arg(ArgSlot::TesPatchId),
        }
    }

    fn patch_data_base(&self, b: &mut Builder, stage: ShaderStage) -> ValueRef {
        let patch = self.patch_index(b, stage);
        let base = b.imul_imm(patch, self.tess.output_patch_stride());
        b.iadd_imm(base, self.tess.output_base + self.tess.patch_data_offset())
    }

    fn lds_address(
        &self,
        b: &mut Builder,
        stage: ShaderStage,
        region: Region,
        v: &VaryingAccess,
    ) -> Result<ValueRef, AbiError> {
        let range = AbiError::ConstIndexRange {
            driver_location: v.driver_location,
            const_index: v.const_index,
        };
        let (slot, comp) = if v.is_compact {
            let element = v.const_index.checked_add(v.component as u32).ok_or_else(|| range.clone())?;
            (element >> 2, element & 3)
        } else {
            (v.const_index, v.component as u32)
        };
        // dword offset of the slot within its vertex or patch
        let slot_dwords = |first: u32| {
            first
                .checked_add(slot)
                .and_then(|s| s.checked_mul(4))
                .and_then(|d| d.checked_add(comp))
                .ok_or_else(|| range.clone())
        };

        let mut addr = if v.is_patch {
            if v.vertex_index.is_some() {
                return Err(AbiError::UnexpectedVertexIndex);
            }
            let base = self.patch_data_base(b, stage);
            let offset = slot_dwords(patch_slot(v.location, v.driver_location))?;
            b.iadd_imm(base, offset)
        } else {
            let vertex = v.vertex_index.ok_or(AbiError::MissingVertexIndex(stage))?;
            let (region_base, patch_stride, vertex_stride) = match region {
                Region::Inputs => (0, self.tess.input_patch_stride(), self.tess.input_vertex_stride()),
                Region::Outputs => (
                    self.tess.output_base,
                    self.tess.output_patch_stride(),
                    self.tess.output_vertex_stride(),
                ),
            };
            let patch = self.patch_index(b, stage);
            let patch_offset = b.imul_imm(patch, patch_stride);
            let vertex_offset = b.imul_imm(vertex, vertex_stride);
            let addr = b.iadd(patch_offset, vertex_offset);
            let offset = slot_dwords(v.driver_location)?;
            b.iadd_imm(addr, region_base.wrapping_add(offset))
        };

        if let Some(param) = v.param_index {
            let step = if v.is_compact { param } else { b.imul_imm(param, 4) };
            addr = b.iadd(addr, step);
        }
        Ok(addr)
    }

    /// Writes the tessellation levels of the current patch to the tessellator
    pub fn write_tess_factors(&self, b: &mut Builder) {
        let base = self.patch_data_base(b, ShaderStage::TessControl);
        let outer = b.lds_load(base, ValueType::float(self.tess.domain.outer_levels()));
        let inner = match self.tess.domain.inner_levels() {
            0 => None,
            n => {
                let addr = b.iadd_imm(base, 4);
                Some(b.lds_load(addr, ValueType::float(n)))
            }
        };
        b.tess_factors(outer, inner);
    }
}

impl GeometryCallbacks for HwLowering {
    fn emit_vertex(
        &mut self,
        _abi: &ShaderAbi,
        b: &mut Builder,
        stream: u32,
        outputs: &[OutputSlot],
    ) -> Result<(), AbiError> {
        let values: Vec<Option<ValueRef>> = outputs.iter().flat_map(|o| o.values).collect();
        b.gs_emit(stream as u8, values);
        Ok(())
    }

    fn emit_primitive(&mut self, _abi: &ShaderAbi, b: &mut Builder, stream: u32) -> Result<(), AbiError> {
        b.gs_cut(stream as u8);
        Ok(())
    }
}

impl TessCallbacks for HwLowering {
    fn load_tess_varyings(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        req: &TessVaryingLoad,
    ) -> Result<ValueRef, AbiError> {
        let region = if abi.stage() == ShaderStage::TessControl && req.load_inputs {
            Region::Inputs
        } else {
            Region::Outputs
        };
        let addr = self.lds_address(b, abi.stage(), region, &VaryingAccess::from(req))?;
        Ok(b.lds_load(addr, ValueType::float(req.n_components)))
    }

    fn store_tcs_outputs(&mut self, abi: &ShaderAbi, b: &mut Builder, req: &TcsOutputStore) -> Result<(), AbiError> {
        let base = self.lds_address(b, abi.stage(), Region::Outputs, &VaryingAccess::from(req))?;
        let n = b.ty(req.src).n_components;
        for c in req.writemask.components().filter(|c| *c < n) {
            let value = b.extract(req.src, c);
            let addr = b.iadd_imm(base, c as u32);
            b.lds_store(addr, value);
        }
        Ok(())
    }

    fn load_tess_coord(
        &mut self,
        _abi: &ShaderAbi,
        b: &mut Builder,
        ty: ValueType,
        n_components: u8,
    ) -> Result<ValueRef, AbiError> {
        let u = b.arg(ArgSlot::TesU);
        let v = b.arg(ArgSlot::TesV);
        let w = match self.tess.domain {
            TessDomain::Triangles => {
                let one = b.const_f32(1.0);
                let one_minus_u = b.fsub(one, u);
                b.fsub(one_minus_u, v)
            }
            _ => b.const_f32(0.0),
        };
        let zero = b.const_f32(0.0);
        let comps: ArrayVec<ValueRef, 4> = [u, v, w, zero].into_iter().take(n_components as usize).collect();
        let coord = b.vector(&comps);
        Ok(b.bitcast(coord, ty))
    }

    fn load_patch_vertices_in(&mut self, abi: &ShaderAbi, b: &mut Builder) -> Result<ValueRef, AbiError> {
        let n = match abi.stage() {
            ShaderStage::TessControl => self.tess.input_vertices,
            _ => self.tess.output_vertices,
        };
        Ok(b.const_u32(n))
    }

    fn load_tess_level(&mut self, abi: &ShaderAbi, b: &mut Builder, varying_id: u32) -> Result<ValueRef, AbiError> {
        let level = TessLevel::from_varying_id(varying_id)?;
        let (slot, n) = match level {
            TessLevel::Outer => (0, 4),
            TessLevel::Inner => (1, 2),
        };
        let base = self.patch_data_base(b, abi.stage());
        let addr = b.iadd_imm(base, slot * 4);
        Ok(b.lds_load(addr, ValueType::float(n)))
    }
}

/// Reads an input of a vertex or fragment shader from the inputs table, or of a geometry
/// shader from the ESGS ring
pub fn load_inputs(abi: &ShaderAbi, b: &mut Builder, req: &InputLoad) -> Result<ValueRef, AbiError> {
    let unknown = AbiError::UnknownInput {
        driver_location: req.driver_location,
        const_index: req.const_index,
    };
    let slot = req.driver_location.checked_add(req.const_index).ok_or_else(|| unknown.clone())?;
    if abi.info().find_input(slot).is_none() {
        return Err(unknown);
    }
    match abi.stage() {
        ShaderStage::Geometry => {
            let vertex = req.vertex_index.ok_or(AbiError::MissingVertexIndex(ShaderStage::Geometry))?;
            let max = abi.info().vertices_in;
            if vertex >= max || vertex > u8::MAX as u32 {
                return Err(AbiError::VertexOutOfRange { vertex, max });
            }
            let ring_offset = b.arg(ArgSlot::EsgsVertexOffset(vertex as u8));
            let addr = b.iadd_imm(ring_offset, slot * 4 + req.component as u32);
            Ok(b.lds_load(addr, req.ty.with_components(req.n_components)))
        }
        _ => {
            if req.vertex_index.is_some() {
                warn!("ignoring vertex index on a {} input", abi.stage());
            }
            let full = abi.inputs().get(slot).ok_or(AbiError::InputNotPreloaded(slot))?;
            let v = b.extract_range(full, req.component, req.n_components);
            Ok(b.bitcast(v, req.ty))
        }
    }
}

/// Exports the final outputs of a vertex, tess-eval or fragment shader.
/// Tess-control shaders write their tessellation levels, geometry shaders have already
/// emitted every vertex.
pub fn emit_outputs(hw: &HwLowering, abi: &ShaderAbi, b: &mut Builder, outputs: &[OutputSlot]) {
    match abi.stage() {
        ShaderStage::Vertex | ShaderStage::TessEval => export_vertex(b, outputs),
        ShaderStage::Fragment => export_fragment(b, outputs),
        ShaderStage::TessControl => hw.write_tess_factors(b),
        ShaderStage::Geometry => debug!("geometry outputs were emitted per vertex"),
    }
}

fn export_vertex(b: &mut Builder, outputs: &[OutputSlot]) {
    let mut misc = [None; 4];
    let mut param = 0u8;
    for o in outputs {
        match Semantic::decode(o.semantic) {
            Some(Semantic::Builtin(VaryingSlot::Position)) => b.export(ExportTarget::Position(0), o.values),
            Some(Semantic::Builtin(VaryingSlot::PointSize)) => misc[0] = o.values[0],
            Some(Semantic::Builtin(VaryingSlot::Layer)) => misc[2] = o.values[0],
            Some(Semantic::Builtin(VaryingSlot::ViewportIndex)) => misc[3] = o.values[0],
            Some(Semantic::Builtin(VaryingSlot::ClipDist0)) => b.export(ExportTarget::Position(2), o.values),
            Some(Semantic::Builtin(VaryingSlot::ClipDist1)) => b.export(ExportTarget::Position(3), o.values),
            Some(Semantic::Builtin(VaryingSlot::PrimitiveId)) | Some(Semantic::Generic(_)) => {
                b.export(ExportTarget::Param(param), o.values);
                param += 1;
            }
            _ => warn!("output semantic {} has no vertex export", o.semantic),
        }
    }
    if misc.iter().any(|v| v.is_some()) {
        b.export(ExportTarget::Position(1), misc);
    }
}

fn export_fragment(b: &mut Builder, outputs: &[OutputSlot]) {
    let mut mrtz = [None; 4];
    for o in outputs {
        match Semantic::decode(o.semantic) {
            Some(Semantic::Generic(n)) if n < 8 => b.export(ExportTarget::Mrt(n as u8), o.values),
            Some(Semantic::Builtin(VaryingSlot::FragDepth)) => mrtz[0] = o.values[0],
            Some(Semantic::Builtin(VaryingSlot::SampleMask)) => mrtz[2] = o.values[0],
            _ => warn!("output semantic {} has no fragment export", o.semantic),
        }
    }
    if mrtz.iter().any(|v| v.is_some()) {
        b.export(ExportTarget::MrtZ, mrtz);
    }
}
