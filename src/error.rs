use thiserror::Error;

use crate::abi::Callback;
use crate::descriptor::DescriptorKind;
use crate::ir::ValueRef;
use crate::shader::Ssa;
use crate::stage::{ShaderStage, StageInput};

/// Fatal errors raised while a backend talks to a frontend through the ABI.
///
/// None of these are recoverable: the compilation that raised one is abandoned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("callback `{callback}` is not applicable to {stage} shaders")]
    StageMismatch {
        callback: Callback,
        stage: ShaderStage,
    },
    #[error("frontend `{frontend}` does not implement `{callback}`")]
    MissingCallback {
        frontend: &'static str,
        callback: Callback,
    },
    #[error("callback `{0}` invoked after emit_outputs")]
    AfterFinish(Callback),
    #[error("stage input `{input}` does not exist in {stage} shaders")]
    StageInputNotApplicable { input: StageInput, stage: ShaderStage },
    #[error("stage input `{0}` was not requested for this compilation")]
    StageInputUnset(StageInput),
    #[error("frontend set up {found} stage inputs for a {expected} shader")]
    SetupMismatch {
        expected: ShaderStage,
        found: ShaderStage,
    },
    #[error("inputs table has {found} slots but the shader declares {expected}")]
    InputsTableSize { expected: usize, found: usize },
    #[error("value {0:?} belongs to a different compilation")]
    ForeignValue(ValueRef),
    #[error("no input is declared at driver location {driver_location} (const index {const_index})")]
    UnknownInput {
        driver_location: u32,
        const_index: u32,
    },
    #[error("{slots} slots at driver location {driver_location} exceed the available driver locations")]
    DriverLocationRange { driver_location: u32, slots: u32 },
    #[error("constant index {const_index} is out of range for the varying at driver location {driver_location}")]
    ConstIndexRange { driver_location: u32, const_index: u32 },
    #[error("input at driver location {0} has no preloaded value")]
    InputNotPreloaded(u32),
    #[error("components {component}..{end} do not fit in a vec4 slot")]
    ComponentRange { component: u8, end: u8 },
    #[error("a vertex index is required for {0} inputs")]
    MissingVertexIndex(ShaderStage),
    #[error("a vertex index was given for a per-patch varying")]
    UnexpectedVertexIndex,
    #[error("geometry input vertex {vertex} is out of range ({max} vertices per primitive)")]
    VertexOutOfRange { vertex: u32, max: u32 },
    #[error("stream {0} is out of range")]
    InvalidStream(u32),
    #[error("varying slot {0} is not a tessellation level")]
    NotATessLevel(u32),
    #[error("{kind} descriptor is not available for {resource}")]
    UnsupportedDescriptor {
        kind: DescriptorKind,
        resource: String,
    },
    #[error("the descriptor-set binding model requires a descriptor set index")]
    MissingDescriptorSet,
    #[error("set {set} binding {binding} is not part of the pipeline layout")]
    UnknownBinding { set: u32, binding: u32 },
    #[error("array index {index} is out of range for set {set} binding {binding}")]
    IndexOutOfRange { set: u32, binding: u32, index: u32 },
}

/// Errors from [crate::translate::compile]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("ABI error: {0}")]
    Abi(#[from] AbiError),
    #[error("{0} is used before it is defined")]
    UndefinedValue(Ssa),
    #[error("{0} is defined twice")]
    Redefined(Ssa),
    #[error("no output is declared at driver location {0}")]
    UnknownOutput(u32),
}
