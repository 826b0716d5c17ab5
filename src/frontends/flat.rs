//! The flat-index binding model.
//!
//! Every resource class has one table, handed to the shader as a hardware argument, and a
//! resource is named by its index into that table. Sampler slots are 16 dwords: the image
//! descriptor at 0 (or a buffer descriptor at 4 for texel buffers), the FMASK descriptor at 8
//! and the sampler state at 12. Image slots are 8 dwords: the image descriptor at 0 or a buffer
//! descriptor at 4.

use log::trace;

use super::common::{self, table_offset, HwLowering, TessLayout};
use crate::abi::{
    AbiFrontend, AbiSetup, GeometryCallbacks, InputLoad, OutputSlot, SamplerDescLoad, ShaderAbi, TessCallbacks,
};
use crate::descriptor::DescriptorKind;
use crate::error::AbiError;
use crate::ir::{ArgSlot, Builder, Offset, ValueRef};
use crate::shader::ShaderInfo;

const SAMPLER_SLOT_DWORDS: u32 = 16;
const IMAGE_SLOT_DWORDS: u32 = 8;
const BUFFER_DESC_DWORDS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatConfig {
    pub clamp_shadow_reference: bool,
    pub const_buffers: u32,
    pub shader_buffers: u32,
    pub sampler_slots: u32,
    pub image_slots: u32,
    pub tess: TessLayout,
}
impl Default for FlatConfig {
    fn default() -> Self {
        Self {
            clamp_shadow_reference: true,
            const_buffers: 16,
            shader_buffers: 16,
            sampler_slots: 32,
            image_slots: 16,
            tess: TessLayout::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlatFrontend {
    config: FlatConfig,
    hw: HwLowering,
}
impl FlatFrontend {
    pub fn new(config: FlatConfig) -> Self {
        let hw = HwLowering::new(config.tess);
        Self { config, hw }
    }

    pub fn config(&self) -> &FlatConfig {
        &self.config
    }

    /// Offset of `kind` within a sampler or image slot
    fn kind_offset(image: bool, kind: DescriptorKind) -> Result<u32, AbiError> {
        match (image, kind) {
            (_, DescriptorKind::Image) => Ok(0),
            (_, DescriptorKind::Buffer) => Ok(4),
            (false, DescriptorKind::Fmask) => Ok(8),
            (false, DescriptorKind::Sampler) => Ok(12),
            (true, kind) => Err(AbiError::UnsupportedDescriptor {
                kind,
                resource: "an image slot".into(),
            }),
        }
    }

    /// Loads one buffer descriptor from `table`, bounds-checking constant indices against `count`
    fn load_buffer_desc(
        &self,
        b: &mut Builder,
        table: ArgSlot,
        count: u32,
        index: ValueRef,
        write: bool,
    ) -> Result<ValueRef, AbiError> {
        if let Some(i) = b.as_const_u32(index) {
            if i >= count {
                return Err(AbiError::IndexOutOfRange {
                    set: 0,
                    binding: 0,
                    index: i,
                });
            }
        }
        let table = b.arg(table);
        let offset = table_offset(b, index, BUFFER_DESC_DWORDS, 0);
        Ok(b.load_desc(table, offset, BUFFER_DESC_DWORDS as u8, !write))
    }
}
impl Default for FlatFrontend {
    fn default() -> Self {
        Self::new(FlatConfig::default())
    }
}

impl AbiFrontend for FlatFrontend {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn clamp_shadow_reference(&self) -> bool {
        self.config.clamp_shadow_reference
    }

    fn setup(&mut self, b: &mut Builder, info: &ShaderInfo) -> Result<AbiSetup, AbiError> {
        common::setup(b, info)
    }

    fn emit_outputs(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        _max_outputs: usize,
        outputs: &[OutputSlot],
    ) -> Result<(), AbiError> {
        common::emit_outputs(&self.hw, abi, b, outputs);
        Ok(())
    }

    fn load_inputs(&mut self, abi: &ShaderAbi, b: &mut Builder, req: &InputLoad) -> Result<ValueRef, AbiError> {
        common::load_inputs(abi, b, req)
    }

    fn load_resource(
        &mut self,
        _abi: &ShaderAbi,
        b: &mut Builder,
        set: Option<u32>,
        binding: u32,
        index: ValueRef,
    ) -> Result<ValueRef, AbiError> {
        if let Some(set) = set {
            trace!("flat binding model ignores descriptor set {}", set);
        }
        Ok(b.iadd_imm(index, binding))
    }

    fn load_ubo(&mut self, _abi: &ShaderAbi, b: &mut Builder, index: ValueRef) -> Result<ValueRef, AbiError> {
        self.load_buffer_desc(b, ArgSlot::ConstBufferTable, self.config.const_buffers, index, false)
    }

    fn load_ssbo(&mut self, _abi: &ShaderAbi, b: &mut Builder, buffer: ValueRef, write: bool) -> Result<ValueRef, AbiError> {
        self.load_buffer_desc(b, ArgSlot::ShaderBufferTable, self.config.shader_buffers, buffer, write)
    }

    fn load_sampler_desc(
        &mut self,
        _abi: &ShaderAbi,
        b: &mut Builder,
        req: &SamplerDescLoad,
    ) -> Result<ValueRef, AbiError> {
        let (table, slot_dwords, count) = if req.image {
            (ArgSlot::ImageTable, IMAGE_SLOT_DWORDS, self.config.image_slots)
        } else {
            (ArgSlot::SamplerTable, SAMPLER_SLOT_DWORDS, self.config.sampler_slots)
        };
        let kind_offset = Self::kind_offset(req.image, req.kind)?;
        let first = req.base_index.checked_add(req.constant_index).ok_or(AbiError::IndexOutOfRange {
            set: 0,
            binding: req.base_index,
            index: req.constant_index,
        })?;

        let offset = match req.index {
            None => {
                if first >= count {
                    return Err(AbiError::IndexOutOfRange {
                        set: 0,
                        binding: req.base_index,
                        index: req.constant_index,
                    });
                }
                Offset::Imm(first * slot_dwords + kind_offset)
            }
            Some(index) => {
                let slot = b.iadd_imm(index, first);
                table_offset(b, slot, slot_dwords, kind_offset)
            }
        };
        let table = b.arg(table);
        Ok(b.load_desc(table, offset, req.kind.dwords(), !req.write))
    }

    fn geometry(&mut self) -> Option<&mut dyn GeometryCallbacks> {
        Some(&mut self.hw)
    }

    fn tessellation(&mut self) -> Option<&mut dyn TessCallbacks> {
        Some(&mut self.hw)
    }
}
