//! The callback contract between the shared backend and a driver frontend.
//!
//! A frontend plugs into the backend by implementing [AbiFrontend], and optionally
//! [GeometryCallbacks] and [TessCallbacks] for the stages it supports.
//! The backend never calls a frontend directly: every call goes through an
//! [instance::AbiInstance], which checks that the callback applies to the stage being compiled,
//! that every handle passed belongs to this compilation, and that the slot is implemented.
//!
//! All callbacks are synchronous. They may emit instructions into the [Builder] they are given
//! and return a handle to the result. Errors are fatal to the compilation.

use std::fmt::{Display, Formatter};

use num_traits::FromPrimitive;

use crate::descriptor::DescriptorKind;
use crate::error::AbiError;
use crate::ir::{Builder, ValueRef, ValueType, WriteMask};
use crate::shader::ShaderInfo;
use crate::stage::{ShaderStage, StageInputs};

pub mod instance;
pub use instance::{AbiInstance, ShaderAbi, StreamStats};

/// Number of geometry output streams
pub const MAX_STREAMS: u32 = 4;

/// First semantic location of generic varyings
pub const VARYING_SLOT_VAR0: u32 = 32;
/// First semantic location of generic per-patch varyings
pub const VARYING_SLOT_PATCH0: u32 = 64;
const VARYING_SLOT_MAX: u32 = 96;

/// Builtin semantic locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive)]
pub enum VaryingSlot {
    Position = 0,
    PointSize = 1,
    ClipDist0 = 2,
    ClipDist1 = 3,
    Layer = 4,
    ViewportIndex = 5,
    PrimitiveId = 6,
    TessLevelOuter = 7,
    TessLevelInner = 8,
    FragDepth = 9,
    SampleMask = 10,
}

/// A decoded semantic location
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Semantic {
    Builtin(VaryingSlot),
    Generic(u32),
    PatchGeneric(u32),
}
impl Semantic {
    pub fn decode(location: u32) -> Option<Self> {
        match location {
            l if l < VARYING_SLOT_VAR0 => VaryingSlot::from_u32(l).map(Self::Builtin),
            l if l < VARYING_SLOT_PATCH0 => Some(Self::Generic(l - VARYING_SLOT_VAR0)),
            l if l < VARYING_SLOT_MAX => Some(Self::PatchGeneric(l - VARYING_SLOT_PATCH0)),
            _ => None,
        }
    }

    pub fn encode(self) -> u32 {
        match self {
            Semantic::Builtin(slot) => slot as u32,
            Semantic::Generic(n) => VARYING_SLOT_VAR0 + n,
            Semantic::PatchGeneric(n) => VARYING_SLOT_PATCH0 + n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TessLevel {
    Outer,
    Inner,
}
impl TessLevel {
    pub fn varying_id(self) -> u32 {
        match self {
            TessLevel::Outer => VaryingSlot::TessLevelOuter as u32,
            TessLevel::Inner => VaryingSlot::TessLevelInner as u32,
        }
    }

    pub fn from_varying_id(varying_id: u32) -> Result<Self, AbiError> {
        match Semantic::decode(varying_id) {
            Some(Semantic::Builtin(VaryingSlot::TessLevelOuter)) => Ok(TessLevel::Outer),
            Some(Semantic::Builtin(VaryingSlot::TessLevelInner)) => Ok(TessLevel::Inner),
            _ => Err(AbiError::NotATessLevel(varying_id)),
        }
    }
}

/// The callback slots of the ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Callback {
    EmitOutputs,
    EmitVertex,
    EmitPrimitive,
    LoadInputs,
    LoadTessVaryings,
    StoreTcsOutputs,
    LoadTessCoord,
    LoadPatchVerticesIn,
    LoadTessLevel,
    LoadResource,
    LoadUbo,
    LoadSsbo,
    LoadSamplerDesc,
}
impl Callback {
    pub const ALL: [Callback; 13] = [
        Callback::EmitOutputs,
        Callback::EmitVertex,
        Callback::EmitPrimitive,
        Callback::LoadInputs,
        Callback::LoadTessVaryings,
        Callback::StoreTcsOutputs,
        Callback::LoadTessCoord,
        Callback::LoadPatchVerticesIn,
        Callback::LoadTessLevel,
        Callback::LoadResource,
        Callback::LoadUbo,
        Callback::LoadSsbo,
        Callback::LoadSamplerDesc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Callback::EmitOutputs => "emit_outputs",
            Callback::EmitVertex => "emit_vertex",
            Callback::EmitPrimitive => "emit_primitive",
            Callback::LoadInputs => "load_inputs",
            Callback::LoadTessVaryings => "load_tess_varyings",
            Callback::StoreTcsOutputs => "store_tcs_outputs",
            Callback::LoadTessCoord => "load_tess_coord",
            Callback::LoadPatchVerticesIn => "load_patch_vertices_in",
            Callback::LoadTessLevel => "load_tess_level",
            Callback::LoadResource => "load_resource",
            Callback::LoadUbo => "load_ubo",
            Callback::LoadSsbo => "load_ssbo",
            Callback::LoadSamplerDesc => "load_sampler_desc",
        }
    }

    /// Whether the backend may invoke this callback while compiling a `stage` shader
    pub fn applies_to(self, stage: ShaderStage) -> bool {
        use ShaderStage::*;
        match self {
            Callback::EmitOutputs
            | Callback::LoadResource
            | Callback::LoadUbo
            | Callback::LoadSsbo
            | Callback::LoadSamplerDesc => true,
            Callback::LoadInputs => matches!(stage, Vertex | Geometry | Fragment),
            Callback::EmitVertex | Callback::EmitPrimitive => stage == Geometry,
            Callback::LoadTessVaryings | Callback::LoadPatchVerticesIn => {
                matches!(stage, TessControl | TessEval)
            }
            Callback::StoreTcsOutputs => stage == TessControl,
            Callback::LoadTessCoord | Callback::LoadTessLevel => stage == TessEval,
        }
    }
}
impl Display for Callback {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A shader input read, as passed to [AbiFrontend::load_inputs]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputLoad {
    /// Semantic location of the input variable
    pub location: u32,
    pub driver_location: u32,
    /// First component read within the vec4 slot
    pub component: u8,
    pub n_components: u8,
    /// Input vertex, for stages whose inputs are per-vertex arrays
    pub vertex_index: Option<u32>,
    /// Constant array index into the input variable
    pub const_index: u32,
    pub ty: ValueType,
}

/// A tessellation varying read, as passed to [TessCallbacks::load_tess_varyings]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TessVaryingLoad {
    /// Control point; `None` for per-patch varyings
    pub vertex_index: Option<ValueRef>,
    /// Dynamic array index into the varying
    pub param_index: Option<ValueRef>,
    pub const_index: u32,
    pub location: u32,
    pub driver_location: u32,
    pub component: u8,
    pub n_components: u8,
    pub is_patch: bool,
    /// Scalar array packed four elements per vec4 slot
    pub is_compact: bool,
    /// Read this stage's inputs rather than its own outputs
    pub load_inputs: bool,
}

/// The declaration of a tessellation-control output variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputVar {
    pub location: u32,
    pub driver_location: u32,
    pub component: u8,
    pub n_components: u8,
    pub is_patch: bool,
    pub is_compact: bool,
}

/// A tessellation-control output write, as passed to [TessCallbacks::store_tcs_outputs]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcsOutputStore {
    pub var: OutputVar,
    pub vertex_index: Option<ValueRef>,
    pub param_index: Option<ValueRef>,
    pub const_index: u32,
    pub src: ValueRef,
    /// Components of `src` to write. Unlisted components keep their previous value.
    pub writemask: WriteMask,
}

/// A descriptor request, as passed to [AbiFrontend::load_sampler_desc]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDescLoad {
    /// Only meaningful in the descriptor-set binding model
    pub descriptor_set: Option<u32>,
    pub base_index: u32,
    /// Compile-time part of the array index
    pub constant_index: u32,
    /// Runtime part of the array index; `None` when the access is not dynamically indexed
    pub index: Option<ValueRef>,
    pub kind: DescriptorKind,
    /// The descriptor is for an image (storage) operation rather than sampling
    pub image: bool,
    pub write: bool,
}

/// Final values of one output slot, one handle per written component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSlot {
    pub semantic: u32,
    pub values: [Option<ValueRef>; 4],
}
impl OutputSlot {
    pub fn new(semantic: u32) -> Self {
        Self {
            semantic,
            values: [None; 4],
        }
    }
}

/// Values preloaded for the shader's declared inputs, indexed by driver location.
///
/// Stages whose inputs are read from memory keep their slots empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputsTable {
    slots: Vec<Option<ValueRef>>,
}
impl InputsTable {
    pub fn new(n_slots: usize) -> Self {
        Self {
            slots: vec![None; n_slots],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn set(&mut self, slot: u32, v: ValueRef) {
        if let Some(s) = self.slots.get_mut(slot as usize) {
            *s = Some(v);
        }
    }

    pub fn get(&self, slot: u32) -> Option<ValueRef> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Option<ValueRef>> {
        self.slots.iter()
    }
}

/// What a frontend hands back from [AbiFrontend::setup]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiSetup {
    pub stage_inputs: StageInputs,
    pub inputs: InputsTable,
}

/// A record of one dispatched callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiCall {
    EmitOutputs { max_outputs: usize },
    EmitVertex { stream: u32 },
    EmitPrimitive { stream: u32 },
    LoadInputs { driver_location: u32, component: u8, n_components: u8 },
    LoadTessVaryings { driver_location: u32, is_patch: bool, load_inputs: bool },
    StoreTcsOutputs { driver_location: u32, writemask: WriteMask },
    LoadTessCoord { n_components: u8 },
    LoadPatchVerticesIn,
    LoadTessLevel { varying_id: u32 },
    LoadResource { set: Option<u32>, binding: u32 },
    LoadUbo,
    LoadSsbo { write: bool },
    LoadSamplerDesc { kind: DescriptorKind, base_index: u32, dynamic: bool },
}
impl AbiCall {
    pub fn callback(&self) -> Callback {
        match self {
            AbiCall::EmitOutputs { .. } => Callback::EmitOutputs,
            AbiCall::EmitVertex { .. } => Callback::EmitVertex,
            AbiCall::EmitPrimitive { .. } => Callback::EmitPrimitive,
            AbiCall::LoadInputs { .. } => Callback::LoadInputs,
            AbiCall::LoadTessVaryings { .. } => Callback::LoadTessVaryings,
            AbiCall::StoreTcsOutputs { .. } => Callback::StoreTcsOutputs,
            AbiCall::LoadTessCoord { .. } => Callback::LoadTessCoord,
            AbiCall::LoadPatchVerticesIn => Callback::LoadPatchVerticesIn,
            AbiCall::LoadTessLevel { .. } => Callback::LoadTessLevel,
            AbiCall::LoadResource { .. } => Callback::LoadResource,
            AbiCall::LoadUbo => Callback::LoadUbo,
            AbiCall::LoadSsbo { .. } => Callback::LoadSsbo,
            AbiCall::LoadSamplerDesc { .. } => Callback::LoadSamplerDesc,
        }
    }
}
impl Display for AbiCall {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.callback())?;
        match self {
            AbiCall::EmitOutputs { max_outputs } => write!(f, "(max_outputs={})", max_outputs),
            AbiCall::EmitVertex { stream } | AbiCall::EmitPrimitive { stream } => {
                write!(f, "(stream={})", stream)
            }
            AbiCall::LoadInputs {
                driver_location,
                component,
                n_components,
            } => write!(
                f,
                "(driver_location={}, component={}, n={})",
                driver_location, component, n_components
            ),
            AbiCall::LoadTessVaryings {
                driver_location,
                is_patch,
                load_inputs,
            } => write!(
                f,
                "(driver_location={}, patch={}, inputs={})",
                driver_location, is_patch, load_inputs
            ),
            AbiCall::StoreTcsOutputs {
                driver_location,
                writemask,
            } => write!(f, "(driver_location={}, mask={:?})", driver_location, writemask),
            AbiCall::LoadTessCoord { n_components } => write!(f, "(n={})", n_components),
            AbiCall::LoadTessLevel { varying_id } => write!(f, "(varying={})", varying_id),
            AbiCall::LoadResource { set, binding } => write!(f, "(set={:?}, binding={})", set, binding),
            AbiCall::LoadSsbo { write } => write!(f, "(write={})", write),
            AbiCall::LoadSamplerDesc {
                kind,
                base_index,
                dynamic,
            } => write!(f, "({}, base={}, dynamic={})", kind, base_index, dynamic),
            AbiCall::LoadPatchVerticesIn | AbiCall::LoadUbo => Ok(()),
        }
    }
}

/// Callbacks every frontend provides, regardless of stage
pub trait AbiFrontend {
    fn name(&self) -> &'static str;

    /// Whether shadow comparison references are clamped to [0, 1] before sampling
    fn clamp_shadow_reference(&self) -> bool;

    /// Create the stage input handles and the inputs table for `info`.
    /// Called once, before translation starts.
    fn setup(&mut self, b: &mut Builder, info: &ShaderInfo) -> Result<AbiSetup, AbiError>;

    /// Store the final shader outputs. Called once, after everything else.
    fn emit_outputs(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        max_outputs: usize,
        outputs: &[OutputSlot],
    ) -> Result<(), AbiError>;

    fn load_inputs(&mut self, abi: &ShaderAbi, b: &mut Builder, req: &InputLoad) -> Result<ValueRef, AbiError>;

    /// Resolve a buffer binding into the reference [AbiFrontend::load_ubo] and
    /// [AbiFrontend::load_ssbo] take: a flat index or a descriptor address, depending on the binding model.
    fn load_resource(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        set: Option<u32>,
        binding: u32,
        index: ValueRef,
    ) -> Result<ValueRef, AbiError>;

    fn load_ubo(&mut self, abi: &ShaderAbi, b: &mut Builder, index: ValueRef) -> Result<ValueRef, AbiError>;

    fn load_ssbo(&mut self, abi: &ShaderAbi, b: &mut Builder, buffer: ValueRef, write: bool) -> Result<ValueRef, AbiError>;

    fn load_sampler_desc(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        req: &SamplerDescLoad,
    ) -> Result<ValueRef, AbiError>;

    /// Geometry callbacks, if this frontend supports geometry shaders
    fn geometry(&mut self) -> Option<&mut dyn GeometryCallbacks> {
        None
    }

    /// Tessellation callbacks, if this frontend supports tessellation
    fn tessellation(&mut self) -> Option<&mut dyn TessCallbacks> {
        None
    }
}

pub trait GeometryCallbacks {
    /// Flush one vertex made of the current `outputs` to `stream`
    fn emit_vertex(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        stream: u32,
        outputs: &[OutputSlot],
    ) -> Result<(), AbiError>;

    /// End the current primitive on `stream`
    fn emit_primitive(&mut self, abi: &ShaderAbi, b: &mut Builder, stream: u32) -> Result<(), AbiError>;
}

pub trait TessCallbacks {
    fn load_tess_varyings(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        req: &TessVaryingLoad,
    ) -> Result<ValueRef, AbiError>;

    fn store_tcs_outputs(&mut self, abi: &ShaderAbi, b: &mut Builder, req: &TcsOutputStore) -> Result<(), AbiError>;

    fn load_tess_coord(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        ty: ValueType,
        n_components: u8,
    ) -> Result<ValueRef, AbiError>;

    fn load_patch_vertices_in(&mut self, abi: &ShaderAbi, b: &mut Builder) -> Result<ValueRef, AbiError>;

    fn load_tess_level(&mut self, abi: &ShaderAbi, b: &mut Builder, varying_id: u32) -> Result<ValueRef, AbiError>;
}
