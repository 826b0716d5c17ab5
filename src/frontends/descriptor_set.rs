//! The descriptor-set binding model.
//!
//! Resources are grouped into descriptor sets. Each set is one table in memory whose address
//! the shader gets as a hardware argument, and each binding occupies `count` consecutive
//! elements of its type's stride, in declaration order.
//! Buffer bindings resolve to the address of their descriptor, which
//! `load_ubo`/`load_ssbo` then dereference.

use std::collections::BTreeMap;

use log::{debug, warn};

use super::common::{self, table_offset, HwLowering, TessLayout};
use crate::abi::{
    AbiFrontend, AbiSetup, GeometryCallbacks, InputLoad, OutputSlot, SamplerDescLoad, ShaderAbi, TessCallbacks,
};
use crate::descriptor::{BindingType, DescriptorKind, MAX_DESCRIPTOR_SETS};
use crate::error::AbiError;
use crate::ir::{ArgSlot, Builder, Offset, ValueRef};
use crate::shader::{BindingDecl, ShaderInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingLayout {
    pub binding: u32,
    pub ty: BindingType,
    /// Array size
    pub count: u32,
    /// Sampler states baked into the layout, one per array element
    pub immutable_samplers: Option<Vec<[u32; 4]>>,
}
impl BindingLayout {
    pub fn new(binding: u32, ty: BindingType, count: u32) -> Self {
        Self {
            binding,
            ty,
            count,
            immutable_samplers: None,
        }
    }

    pub fn with_immutable_samplers(mut self, samplers: Vec<[u32; 4]>) -> Self {
        self.immutable_samplers = Some(samplers);
        self
    }

    pub fn size(&self) -> u32 {
        self.ty.stride().saturating_mul(self.count)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetLayout {
    pub bindings: Vec<BindingLayout>,
}
impl SetLayout {
    /// The binding numbered `binding`, with its dword offset in the set's table
    pub fn find(&self, binding: u32) -> Option<(u32, &BindingLayout)> {
        let mut offset = 0;
        for b in &self.bindings {
            if b.binding == binding {
                return Some((offset, b));
            }
            offset = offset.saturating_add(b.size());
        }
        None
    }

    pub fn size(&self) -> u32 {
        self.bindings.iter().fold(0, |acc, b| acc.saturating_add(b.size()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineLayout {
    pub sets: Vec<SetLayout>,
}
impl PipelineLayout {
    /// Lays out the bindings a shader declares, sets and bindings in ascending order.
    /// Sets from [MAX_DESCRIPTOR_SETS] up are left out.
    pub fn from_bindings(decls: &[BindingDecl]) -> Self {
        let mut sets: BTreeMap<u32, BTreeMap<u32, BindingLayout>> = BTreeMap::new();
        for d in decls {
            sets.entry(d.set)
                .or_default()
                .insert(d.binding, BindingLayout::new(d.binding, d.ty, d.count.max(1)));
        }
        let n_sets = sets
            .keys()
            .next_back()
            .map(|s| s.saturating_add(1).min(MAX_DESCRIPTOR_SETS))
            .unwrap_or(0);
        let sets = (0..n_sets)
            .map(|i| SetLayout {
                bindings: sets.get(&i).map(|b| b.values().cloned().collect()).unwrap_or_default(),
            })
            .collect();
        Self { sets }
    }

    fn find(&self, set: u32, binding: u32) -> Result<(u32, &BindingLayout), AbiError> {
        self.sets
            .get(set as usize)
            .and_then(|s| s.find(binding))
            .ok_or(AbiError::UnknownBinding { set, binding })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetConfig {
    pub layout: PipelineLayout,
    pub clamp_shadow_reference: bool,
    pub tess: TessLayout,
}
impl Default for DescriptorSetConfig {
    fn default() -> Self {
        Self {
            layout: PipelineLayout::default(),
            clamp_shadow_reference: false,
            tess: TessLayout::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorSetFrontend {
    config: DescriptorSetConfig,
    hw: HwLowering,
}
impl DescriptorSetFrontend {
    pub fn new(config: DescriptorSetConfig) -> Self {
        let hw = HwLowering::new(config.tess);
        Self { config, hw }
    }

    pub fn with_layout(layout: PipelineLayout) -> Self {
        Self::new(DescriptorSetConfig {
            layout,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &DescriptorSetConfig {
        &self.config
    }

    fn check_index(set: u32, layout: &BindingLayout, index: u32) -> Result<(), AbiError> {
        if index >= layout.count {
            return Err(AbiError::IndexOutOfRange {
                set,
                binding: layout.binding,
                index,
            });
        }
        Ok(())
    }

    /// Dereferences a buffer descriptor address produced by `load_resource`
    fn load_buffer_desc(b: &mut Builder, addr: ValueRef, write: bool) -> ValueRef {
        b.load_desc(addr, Offset::Imm(0), 4, !write)
    }
}

impl AbiFrontend for DescriptorSetFrontend {
    fn name(&self) -> &'static str {
        "descriptor_set"
    }

    fn clamp_shadow_reference(&self) -> bool {
        self.config.clamp_shadow_reference
    }

    fn setup(&mut self, b: &mut Builder, info: &ShaderInfo) -> Result<AbiSetup, AbiError> {
        for decl in &info.bindings {
            match self.config.layout.find(decl.set, decl.binding) {
                Ok((_, l)) if l.ty != decl.ty => warn!(
                    "set {} binding {} is declared {} but laid out as {}",
                    decl.set, decl.binding, decl.ty, l.ty
                ),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
        debug!("{} descriptor sets in layout", self.config.layout.sets.len());
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
        let set = set.ok_or(AbiError::MissingDescriptorSet)?;
        let (base, layout) = self.config.layout.find(set, binding)?;
        if !layout.ty.is_buffer() {
            return Err(AbiError::UnsupportedDescriptor {
                kind: DescriptorKind::Buffer,
                resource: format!("set {} binding {} ({})", set, binding, layout.ty),
            });
        }
        if let Some(i) = b.as_const_u32(index) {
            Self::check_index(set, layout, i)?;
        }
        let stride = layout.ty.stride();
        let table = b.arg(ArgSlot::DescriptorSet(set));
        let offset = match table_offset(b, index, stride, base) {
            Offset::Imm(imm) => b.const_u32(imm),
            Offset::Dyn(v) => v,
        };
        Ok(b.iadd(table, offset))
    }

    fn load_ubo(&mut self, _abi: &ShaderAbi, b: &mut Builder, index: ValueRef) -> Result<ValueRef, AbiError> {
        Ok(Self::load_buffer_desc(b, index, false))
    }

    fn load_ssbo(&mut self, _abi: &ShaderAbi, b: &mut Builder, buffer: ValueRef, write: bool) -> Result<ValueRef, AbiError> {
        Ok(Self::load_buffer_desc(b, buffer, write))
    }

    fn load_sampler_desc(
        &mut self,
        _abi: &ShaderAbi,
        b: &mut Builder,
        req: &SamplerDescLoad,
    ) -> Result<ValueRef, AbiError> {
        let set = req.descriptor_set.ok_or(AbiError::MissingDescriptorSet)?;
        let (base, layout) = self.config.layout.find(set, req.base_index)?;
        let kind_offset = layout.ty.kind_offset(req.kind).ok_or_else(|| AbiError::UnsupportedDescriptor {
            kind: req.kind,
            resource: format!("set {} binding {} ({})", set, req.base_index, layout.ty),
        })?;

        let offset = match req.index {
            None => {
                Self::check_index(set, layout, req.constant_index)?;
                if req.kind == DescriptorKind::Sampler {
                    if let Some(samplers) = &layout.immutable_samplers {
                        if let Some(state) = samplers.get(req.constant_index as usize) {
                            return Ok(b.immutable_desc(set, req.base_index, req.constant_index, *state));
                        }
                    }
                }
                let offset = req
                    .constant_index
                    .checked_mul(layout.ty.stride())
                    .and_then(|o| o.checked_add(base))
                    .and_then(|o| o.checked_add(kind_offset))
                    .ok_or(AbiError::IndexOutOfRange {
                        set,
                        binding: layout.binding,
                        index: req.constant_index,
                    })?;
                Offset::Imm(offset)
            }
            Some(index) => {
                let element = b.iadd_imm(index, req.constant_index);
                table_offset(b, element, layout.ty.stride(), base.wrapping_add(kind_offset))
            }
        };
        let table = b.arg(ArgSlot::DescriptorSet(set));
        Ok(b.load_desc(table, offset, req.kind.dwords(), !req.write))
    }

    fn geometry(&mut self) -> Option<&mut dyn GeometryCallbacks> {
        Some(&mut self.hw)
    }

    fn tessellation(&mut self) -> Option<&mut dyn TessCallbacks> {
        Some(&mut self.hw)
    }
}
