//! Resource descriptor classes a backend can ask a frontend to resolve.
//!
//! The set mirrors the fixed set of GPU resource-view types, so it is closed:
//! adding a member means extending every `load_sampler_desc` implementation.

use std::fmt::{Display, Formatter};

use num_traits::FromPrimitive;

/// Which hardware descriptor layout the backend expects back from
/// [crate::abi::AbiFrontend::load_sampler_desc].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive)]
pub enum DescriptorKind {
    /// Image resource descriptor
    Image = 0,
    /// Multisample compression metadata that accompanies an MSAA image
    Fmask = 1,
    /// Sampler state
    Sampler = 2,
    /// Buffer resource descriptor, used for texel buffers
    Buffer = 3,
}
impl DescriptorKind {
    pub const ALL: [DescriptorKind; 4] = [
        DescriptorKind::Image,
        DescriptorKind::Fmask,
        DescriptorKind::Sampler,
        DescriptorKind::Buffer,
    ];

    /// Size of the hardware descriptor in dwords
    pub fn dwords(self) -> u8 {
        match self {
            DescriptorKind::Image | DescriptorKind::Fmask => 8,
            DescriptorKind::Sampler | DescriptorKind::Buffer => 4,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::from_u32(raw)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "image" => Some(Self::Image),
            "fmask" => Some(Self::Fmask),
            "sampler" => Some(Self::Sampler),
            "buffer" => Some(Self::Buffer),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DescriptorKind::Image => "image",
            DescriptorKind::Fmask => "fmask",
            DescriptorKind::Sampler => "sampler",
            DescriptorKind::Buffer => "buffer",
        }
    }
}
impl Display for DescriptorKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The API-level type of a resource binding in the descriptor-set binding model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BindingType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
}

/// Descriptor sets a pipeline layout may bind
pub const MAX_DESCRIPTOR_SETS: u32 = 32;

impl BindingType {
    pub const ALL: [BindingType; 8] = [
        BindingType::Sampler,
        BindingType::CombinedImageSampler,
        BindingType::SampledImage,
        BindingType::StorageImage,
        BindingType::UniformTexelBuffer,
        BindingType::StorageTexelBuffer,
        BindingType::UniformBuffer,
        BindingType::StorageBuffer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BindingType::Sampler => "sampler",
            BindingType::CombinedImageSampler => "combined_image_sampler",
            BindingType::SampledImage => "sampled_image",
            BindingType::StorageImage => "storage_image",
            BindingType::UniformTexelBuffer => "uniform_texel_buffer",
            BindingType::StorageTexelBuffer => "storage_texel_buffer",
            BindingType::UniformBuffer => "uniform_buffer",
            BindingType::StorageBuffer => "storage_buffer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Dword offset of the `kind` descriptor within one array element of this binding,
    /// or None if the binding does not carry that kind
    pub fn kind_offset(self, kind: DescriptorKind) -> Option<u32> {
        use DescriptorKind::*;
        match (self, kind) {
            (BindingType::CombinedImageSampler, Image) => Some(0),
            (BindingType::CombinedImageSampler, Fmask) => Some(8),
            (BindingType::CombinedImageSampler, Sampler) => Some(16),
            (BindingType::SampledImage | BindingType::StorageImage, Image) => Some(0),
            (BindingType::SampledImage | BindingType::StorageImage, Fmask) => Some(8),
            (BindingType::Sampler, Sampler) => Some(0),
            (BindingType::UniformTexelBuffer | BindingType::StorageTexelBuffer, Buffer) => Some(0),
            _ => None,
        }
    }

    /// Size of one array element of this binding in its set's table, in dwords
    pub fn stride(self) -> u32 {
        match self {
            BindingType::CombinedImageSampler => 24,
            BindingType::SampledImage | BindingType::StorageImage => 16,
            BindingType::Sampler
            | BindingType::UniformTexelBuffer
            | BindingType::StorageTexelBuffer
            | BindingType::UniformBuffer
            | BindingType::StorageBuffer => 4,
        }
    }

    pub fn is_buffer(self) -> bool {
        matches!(self, BindingType::UniformBuffer | BindingType::StorageBuffer)
    }
}
impl Display for BindingType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
