//! The contract between a shared shader-compiler backend and the driver frontends that use it.
//!
//! Two drivers can share one backend while binding resources differently: the backend never
//! decides where inputs, outputs or resources live, it asks the driver through the callbacks
//! of [abi::AbiFrontend]. For each compilation the driver also preloads a set of stage
//! inputs ([stage::StageInputs]) and a table of input values, which the backend reads
//! through an [abi::AbiInstance].
//!
//! Values flow through the backend's value pool ([ir::Builder]) as opaque [ir::ValueRef] handles.
//!
//! Included frontends:
//! - [frontends::FlatFrontend] - flat-index binding model, one table per resource class
//! - [frontends::DescriptorSetFrontend] - descriptor-set binding model
//!
//! [translate::compile] drives a frontend over a [shader::ShaderProgram], which can be written
//! by hand in the format of [shader::text].

#[macro_use]
extern crate num_derive;

pub mod abi;
pub mod descriptor;
pub mod error;
pub mod frontends;
pub mod ir;
pub mod shader;
pub mod stage;
pub mod translate;

pub use abi::{AbiFrontend, AbiInstance, Callback, ShaderAbi};
pub use descriptor::DescriptorKind;
pub use error::{AbiError, CompileError};
pub use ir::{Builder, ValueRef};
pub use stage::{ShaderStage, StageInput, StageInputs};
pub use translate::{compile, CompiledShader};
