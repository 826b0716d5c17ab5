//! Shader stages and the values the hardware makes available at shader entry.
//!
//! [StageInputs] is keyed by stage: each variant only carries the fields its stage defines,
//! so a vertex shader cannot even name the fragment position.
//! Within a stage, a field the shader did not ask for is left unset, and reading it is an error
//! rather than a zero.

use std::fmt::{Display, Formatter};

use crate::abi::Callback;
use crate::error::AbiError;
use crate::ir::ValueRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
}
impl ShaderStage {
    pub const ALL: [ShaderStage; 5] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessControl => "tess_control",
            ShaderStage::TessEval => "tess_eval",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Whether the backend may invoke `callback` while compiling a shader of this stage
    pub fn allows(self, callback: Callback) -> bool {
        callback.applies_to(self)
    }
}
impl Display for ShaderStage {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Name of a value preloaded at shader entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageInput {
    BaseVertex,
    StartInstance,
    DrawId,
    VertexId,
    InstanceId,
    TcsPatchId,
    TcsRelIds,
    TesPatchId,
    GsPrimitiveId,
    GsInvocationId,
    /// One component (0..4) of the window-space fragment position
    FragPos(u8),
    FrontFace,
    Ancillary,
    SampleCoverage,
}
impl StageInput {
    pub const ALL: [StageInput; 17] = [
        StageInput::BaseVertex,
        StageInput::StartInstance,
        StageInput::DrawId,
        StageInput::VertexId,
        StageInput::InstanceId,
        StageInput::TcsPatchId,
        StageInput::TcsRelIds,
        StageInput::TesPatchId,
        StageInput::GsPrimitiveId,
        StageInput::GsInvocationId,
        StageInput::FragPos(0),
        StageInput::FragPos(1),
        StageInput::FragPos(2),
        StageInput::FragPos(3),
        StageInput::FrontFace,
        StageInput::Ancillary,
        StageInput::SampleCoverage,
    ];

    /// The only stage this input is defined for
    pub fn stage(self) -> ShaderStage {
        match self {
            StageInput::BaseVertex
            | StageInput::StartInstance
            | StageInput::DrawId
            | StageInput::VertexId
            | StageInput::InstanceId => ShaderStage::Vertex,
            StageInput::TcsPatchId | StageInput::TcsRelIds => ShaderStage::TessControl,
            StageInput::TesPatchId => ShaderStage::TessEval,
            StageInput::GsPrimitiveId | StageInput::GsInvocationId => ShaderStage::Geometry,
            StageInput::FragPos(_)
            | StageInput::FrontFace
            | StageInput::Ancillary
            | StageInput::SampleCoverage => ShaderStage::Fragment,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StageInput::BaseVertex => "base_vertex",
            StageInput::StartInstance => "start_instance",
            StageInput::DrawId => "draw_id",
            StageInput::VertexId => "vertex_id",
            StageInput::InstanceId => "instance_id",
            StageInput::TcsPatchId => "tcs_patch_id",
            StageInput::TcsRelIds => "tcs_rel_ids",
            StageInput::TesPatchId => "tes_patch_id",
            StageInput::GsPrimitiveId => "gs_prim_id",
            StageInput::GsInvocationId => "gs_invocation_id",
            StageInput::FragPos(0) => "frag_pos_x",
            StageInput::FragPos(1) => "frag_pos_y",
            StageInput::FragPos(2) => "frag_pos_z",
            StageInput::FragPos(_) => "frag_pos_w",
            StageInput::FrontFace => "front_face",
            StageInput::Ancillary => "ancillary",
            StageInput::SampleCoverage => "sample_coverage",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|i| i.name() == name)
    }
}
impl Display for StageInput {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexInputs {
    pub base_vertex: Option<ValueRef>,
    pub start_instance: Option<ValueRef>,
    pub draw_id: Option<ValueRef>,
    pub vertex_id: Option<ValueRef>,
    pub instance_id: Option<ValueRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TessControlInputs {
    pub patch_id: Option<ValueRef>,
    /// Packed relative patch id and invocation id
    pub rel_ids: Option<ValueRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TessEvalInputs {
    pub patch_id: Option<ValueRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeometryInputs {
    pub primitive_id: Option<ValueRef>,
    pub invocation_id: Option<ValueRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentInputs {
    pub frag_pos: [Option<ValueRef>; 4],
    pub front_face: Option<ValueRef>,
    pub ancillary: Option<ValueRef>,
    pub sample_coverage: Option<ValueRef>,
}

/// Values preloaded by the frontend before translation, keyed by the stage being compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInputs {
    Vertex(VertexInputs),
    TessControl(TessControlInputs),
    TessEval(TessEvalInputs),
    Geometry(GeometryInputs),
    Fragment(FragmentInputs),
}
impl StageInputs {
    /// Inputs for `stage` with every field unset
    pub fn empty(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::Vertex(Default::default()),
            ShaderStage::TessControl => Self::TessControl(Default::default()),
            ShaderStage::TessEval => Self::TessEval(Default::default()),
            ShaderStage::Geometry => Self::Geometry(Default::default()),
            ShaderStage::Fragment => Self::Fragment(Default::default()),
        }
    }

    pub fn stage(&self) -> ShaderStage {
        match self {
            StageInputs::Vertex(_) => ShaderStage::Vertex,
            StageInputs::TessControl(_) => ShaderStage::TessControl,
            StageInputs::TessEval(_) => ShaderStage::TessEval,
            StageInputs::Geometry(_) => ShaderStage::Geometry,
            StageInputs::Fragment(_) => ShaderStage::Fragment,
        }
    }

    fn slot(&self, input: StageInput) -> Option<&Option<ValueRef>> {
        match (self, input) {
            (StageInputs::Vertex(v), StageInput::BaseVertex) => Some(&v.base_vertex),
            (StageInputs::Vertex(v), StageInput::StartInstance) => Some(&v.start_instance),
            (StageInputs::Vertex(v), StageInput::DrawId) => Some(&v.draw_id),
            (StageInputs::Vertex(v), StageInput::VertexId) => Some(&v.vertex_id),
            (StageInputs::Vertex(v), StageInput::InstanceId) => Some(&v.instance_id),
            (StageInputs::TessControl(t), StageInput::TcsPatchId) => Some(&t.patch_id),
            (StageInputs::TessControl(t), StageInput::TcsRelIds) => Some(&t.rel_ids),
            (StageInputs::TessEval(t), StageInput::TesPatchId) => Some(&t.patch_id),
            (StageInputs::Geometry(g), StageInput::GsPrimitiveId) => Some(&g.primitive_id),
            (StageInputs::Geometry(g), StageInput::GsInvocationId) => Some(&g.invocation_id),
            (StageInputs::Fragment(f), StageInput::FragPos(c)) => f.frag_pos.get(c as usize),
            (StageInputs::Fragment(f), StageInput::FrontFace) => Some(&f.front_face),
            (StageInputs::Fragment(f), StageInput::Ancillary) => Some(&f.ancillary),
            (StageInputs::Fragment(f), StageInput::SampleCoverage) => Some(&f.sample_coverage),
            _ => None,
        }
    }

    /// Reads one preloaded value.
    ///
    /// Inputs belonging to another stage and inputs that were not requested are both errors.
    pub fn get(&self, input: StageInput) -> Result<ValueRef, AbiError> {
        match self.slot(input) {
            None => Err(AbiError::StageInputNotApplicable {
                input,
                stage: self.stage(),
            }),
            Some(None) => Err(AbiError::StageInputUnset(input)),
            Some(Some(v)) => Ok(*v),
        }
    }

    pub fn is_set(&self, input: StageInput) -> bool {
        matches!(self.slot(input), Some(Some(_)))
    }

    /// Every handle that is set, with its name
    pub fn iter(&self) -> impl Iterator<Item = (StageInput, ValueRef)> + '_ {
        StageInput::ALL
            .iter()
            .filter_map(move |i| self.get(*i).ok().map(|v| (*i, v)))
    }

    fn mismatch(&self, expected: ShaderStage) -> AbiError {
        AbiError::SetupMismatch {
            expected,
            found: self.stage(),
        }
    }

    pub fn as_vertex(&self) -> Result<&VertexInputs, AbiError> {
        match self {
            StageInputs::Vertex(v) => Ok(v),
            _ => Err(self.mismatch(ShaderStage::Vertex)),
        }
    }

    pub fn as_tess_control(&self) -> Result<&TessControlInputs, AbiError> {
        match self {
            StageInputs::TessControl(t) => Ok(t),
            _ => Err(self.mismatch(ShaderStage::TessControl)),
        }
    }

    pub fn as_tess_eval(&self) -> Result<&TessEvalInputs, AbiError> {
        match self {
            StageInputs::TessEval(t) => Ok(t),
            _ => Err(self.mismatch(ShaderStage::TessEval)),
        }
    }

    pub fn as_geometry(&self) -> Result<&GeometryInputs, AbiError> {
        match self {
            StageInputs::Geometry(g) => Ok(g),
            _ => Err(self.mismatch(ShaderStage::Geometry)),
        }
    }

    pub fn as_fragment(&self) -> Result<&FragmentInputs, AbiError> {
        match self {
            StageInputs::Fragment(f) => Ok(f),
            _ => Err(self.mismatch(ShaderStage::Fragment)),
        }
    }
}
