//! Driver frontends implementing the ABI for the two binding models

pub mod common;
pub mod descriptor_set;
pub mod flat;

pub use common::{HwLowering, TessDomain, TessLayout};
pub use descriptor_set::{BindingLayout, DescriptorSetConfig, DescriptorSetFrontend, PipelineLayout, SetLayout};
pub use flat::{FlatConfig, FlatFrontend};
