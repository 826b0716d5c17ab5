//! The upstream program the backend translates: declarations plus a flat list of intrinsics.
//!
//! Values are named by [Ssa] numbers local to the program. The backend maps each one to a
//! [crate::ir::ValueRef] as it lowers the body.

use std::fmt::{Display, Formatter};

use crate::abi::TessLevel;
use crate::descriptor::BindingType;
use crate::error::AbiError;
use crate::ir::{ValueType, WriteMask};
use crate::stage::{ShaderStage, StageInput};

pub mod text;

/// Driver locations available to the declarations of one stage
pub const MAX_DRIVER_LOCATIONS: u32 = 256;

/// A program-local value name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ssa(pub u32);
impl Display for Ssa {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterpMode {
    #[default]
    Smooth,
    Flat,
}

/// An input or output variable declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarDecl {
    /// Semantic location, see [crate::abi::Semantic]
    pub location: u32,
    pub driver_location: u32,
    pub component: u8,
    pub n_components: u8,
    /// Number of array elements, or 0 for a non-array variable
    pub array_len: u32,
    pub interp: InterpMode,
    pub patch: bool,
    /// Scalar array packed four elements per slot
    pub compact: bool,
}
impl VarDecl {
    pub fn new(location: u32, driver_location: u32, n_components: u8) -> Self {
        Self {
            location,
            driver_location,
            component: 0,
            n_components,
            array_len: 0,
            interp: InterpMode::Smooth,
            patch: false,
            compact: false,
        }
    }

    /// Number of consecutive driver locations the variable occupies
    pub fn slots(&self) -> u32 {
        if self.compact {
            ((self.component as u64 + self.array_len.max(1) as u64 + 3) / 4) as u32
        } else {
            self.array_len.max(1)
        }
    }

    /// One past the last driver location, if it fits in a u32
    pub fn end(&self) -> Option<u32> {
        self.driver_location.checked_add(self.slots())
    }

    pub fn covers(&self, driver_location: u32) -> bool {
        driver_location
            .checked_sub(self.driver_location)
            .map_or(false, |d| d < self.slots())
    }

    /// Rejects components past the end of a vec4 and ranges past [MAX_DRIVER_LOCATIONS]
    pub fn check(&self) -> Result<(), AbiError> {
        let end = self.component.saturating_add(self.n_components);
        if self.n_components == 0 || end > 4 {
            return Err(AbiError::ComponentRange {
                component: self.component,
                end,
            });
        }
        match self.end() {
            Some(end) if end <= MAX_DRIVER_LOCATIONS => Ok(()),
            _ => Err(AbiError::DriverLocationRange {
                driver_location: self.driver_location,
                slots: self.slots(),
            }),
        }
    }
}

/// A resource binding used by the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingDecl {
    pub set: u32,
    pub binding: u32,
    pub ty: BindingType,
    /// Array size
    pub count: u32,
}

/// Everything about a program the frontend needs before translation starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInfo {
    pub stage: ShaderStage,
    pub inputs: Vec<VarDecl>,
    pub outputs: Vec<VarDecl>,
    /// Stage inputs the program reads
    pub system_values: Vec<StageInput>,
    pub bindings: Vec<BindingDecl>,
    /// Geometry only: the most vertices one invocation may emit
    pub max_vertices: u32,
    /// Geometry only: vertices per input primitive
    pub vertices_in: u32,
}
impl ShaderInfo {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            inputs: vec![],
            outputs: vec![],
            system_values: vec![],
            bindings: vec![],
            max_vertices: 0,
            vertices_in: 3,
        }
    }

    /// Length of the inputs table: one entry per driver location covered by an input
    pub fn input_slots(&self) -> usize {
        self.inputs
            .iter()
            .map(|d| d.end().unwrap_or(u32::MAX) as usize)
            .max()
            .unwrap_or(0)
    }

    pub fn check_declarations(&self) -> Result<(), AbiError> {
        self.inputs.iter().chain(self.outputs.iter()).try_for_each(VarDecl::check)
    }

    pub fn find_input(&self, driver_location: u32) -> Option<&VarDecl> {
        self.inputs.iter().find(|d| d.covers(driver_location))
    }

    pub fn find_output(&self, driver_location: u32) -> Option<&VarDecl> {
        self.outputs.iter().find(|d| d.covers(driver_location))
    }
}

/// A texture, sampler or image operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRef {
    /// Descriptor set, in the descriptor-set binding model
    pub set: Option<u32>,
    /// Binding number, or flat slot index
    pub binding: u32,
    pub const_index: u32,
    pub index: Option<Ssa>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intrinsic {
    Const {
        dst: Ssa,
        ty: ValueType,
        value: Vec<u32>,
    },
    IAdd {
        dst: Ssa,
        a: Ssa,
        b: Ssa,
    },
    FAdd {
        dst: Ssa,
        a: Ssa,
        b: Ssa,
    },
    LoadSysval {
        dst: Ssa,
        input: StageInput,
    },
    LoadInput {
        dst: Ssa,
        driver_location: u32,
        component: u8,
        n_components: u8,
        vertex: Option<u32>,
        const_index: u32,
    },
    /// Write `src` into the output at `driver_location`; `mask` selects components of `src`
    StoreOutput {
        driver_location: u32,
        const_index: u32,
        src: Ssa,
        mask: WriteMask,
    },
    LoadTessVarying {
        dst: Ssa,
        driver_location: u32,
        component: u8,
        n_components: u8,
        vertex: Option<Ssa>,
        param: Option<Ssa>,
        const_index: u32,
        /// Read the stage's own outputs instead of its inputs
        output: bool,
    },
    StoreTcsOutput {
        driver_location: u32,
        vertex: Option<Ssa>,
        param: Option<Ssa>,
        const_index: u32,
        src: Ssa,
        mask: WriteMask,
    },
    LoadTessCoord {
        dst: Ssa,
        n_components: u8,
    },
    LoadPatchVerticesIn {
        dst: Ssa,
    },
    LoadTessLevel {
        dst: Ssa,
        level: TessLevel,
    },
    LoadResource {
        dst: Ssa,
        set: Option<u32>,
        binding: u32,
        index: Option<Ssa>,
    },
    LoadUbo {
        dst: Ssa,
        block: Ssa,
        offset: u32,
        n_components: u8,
    },
    LoadSsbo {
        dst: Ssa,
        buffer: Ssa,
        offset: u32,
        n_components: u8,
    },
    StoreSsbo {
        buffer: Ssa,
        offset: u32,
        src: Ssa,
        mask: WriteMask,
    },
    Tex {
        dst: Ssa,
        texture: TextureRef,
        /// Defaults to `texture` when the sampler lives in the same slot
        sampler: Option<TextureRef>,
        coord: Ssa,
        comparator: Option<Ssa>,
    },
    TexFetchMs {
        dst: Ssa,
        texture: TextureRef,
        coord: Ssa,
        sample: Ssa,
    },
    TexFetchBuffer {
        dst: Ssa,
        texture: TextureRef,
        coord: Ssa,
    },
    ImageLoad {
        dst: Ssa,
        image: TextureRef,
        coord: Ssa,
    },
    ImageStore {
        image: TextureRef,
        coord: Ssa,
        src: Ssa,
    },
    EmitVertex {
        stream: u32,
    },
    EndPrimitive {
        stream: u32,
    },
}
impl Intrinsic {
    /// The value this intrinsic defines, if any
    pub fn dst(&self) -> Option<Ssa> {
        match self {
            Intrinsic::Const { dst, .. }
            | Intrinsic::IAdd { dst, .. }
            | Intrinsic::FAdd { dst, .. }
            | Intrinsic::LoadSysval { dst, .. }
            | Intrinsic::LoadInput { dst, .. }
            | Intrinsic::LoadTessVarying { dst, .. }
            | Intrinsic::LoadTessCoord { dst, .. }
            | Intrinsic::LoadPatchVerticesIn { dst }
            | Intrinsic::LoadTessLevel { dst, .. }
            | Intrinsic::LoadResource { dst, .. }
            | Intrinsic::LoadUbo { dst, .. }
            | Intrinsic::LoadSsbo { dst, .. }
            | Intrinsic::Tex { dst, .. }
            | Intrinsic::TexFetchMs { dst, .. }
            | Intrinsic::TexFetchBuffer { dst, .. }
            | Intrinsic::ImageLoad { dst, .. } => Some(*dst),
            Intrinsic::StoreOutput { .. }
            | Intrinsic::StoreTcsOutput { .. }
            | Intrinsic::StoreSsbo { .. }
            | Intrinsic::ImageStore { .. }
            | Intrinsic::EmitVertex { .. }
            | Intrinsic::EndPrimitive { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgram {
    pub info: ShaderInfo,
    pub body: Vec<Intrinsic>,
}
