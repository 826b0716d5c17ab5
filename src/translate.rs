//! The backend translation pass.
//!
//! Lowers a [ShaderProgram] into a [Builder], consulting the frontend through an
//! [AbiInstance] wherever the program touches inputs, outputs or resources.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::abi::{
    AbiCall, AbiFrontend, AbiInstance, InputLoad, OutputSlot, OutputVar, SamplerDescLoad, TcsOutputStore,
    TessVaryingLoad,
};
use crate::descriptor::DescriptorKind;
use crate::error::{AbiError, CompileError};
use crate::ir::{Builder, ValueRef, ValueType};
use crate::shader::{Intrinsic, ShaderInfo, ShaderProgram, Ssa, TextureRef};
use crate::stage::ShaderStage;

/// The result of a successful compilation
#[derive(Debug)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub ir: Builder,
    /// The callbacks the frontend received, in order
    pub calls: Vec<AbiCall>,
}

struct Translator<'a> {
    info: &'a ShaderInfo,
    values: HashMap<Ssa, ValueRef>,
    /// Current value of every written output, by driver location
    outputs: BTreeMap<u32, OutputSlot>,
}
impl<'a> Translator<'a> {
    fn get(&self, ssa: Ssa) -> Result<ValueRef, CompileError> {
        self.values.get(&ssa).copied().ok_or(CompileError::UndefinedValue(ssa))
    }

    fn get_opt(&self, ssa: Option<Ssa>) -> Result<Option<ValueRef>, CompileError> {
        ssa.map(|s| self.get(s)).transpose()
    }

    fn def(&mut self, ssa: Ssa, v: ValueRef) -> Result<(), CompileError> {
        if self.values.insert(ssa, v).is_some() {
            return Err(CompileError::Redefined(ssa));
        }
        Ok(())
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        self.outputs.values().copied().collect()
    }

    fn desc<F: AbiFrontend>(
        &self,
        abi: &mut AbiInstance<F>,
        b: &mut Builder,
        r: &TextureRef,
        kind: DescriptorKind,
        image: bool,
        write: bool,
    ) -> Result<ValueRef, CompileError> {
        let req = SamplerDescLoad {
            descriptor_set: r.set,
            base_index: r.binding,
            constant_index: r.const_index,
            index: self.get_opt(r.index)?,
            kind,
            image,
            write,
        };
        Ok(abi.load_sampler_desc(b, &req)?)
    }

    /// Lowers one intrinsic, returning the value it defines
    fn lower<F: AbiFrontend>(
        &mut self,
        abi: &mut AbiInstance<F>,
        b: &mut Builder,
        intr: &Intrinsic,
    ) -> Result<Option<ValueRef>, CompileError> {
        let v = match intr {
            Intrinsic::Const { ty, value, .. } => b.const_vec(value, *ty),
            Intrinsic::IAdd { a, b: c, .. } => {
                let (x, y) = (self.get(*a)?, self.get(*c)?);
                b.iadd(x, y)
            }
            Intrinsic::FAdd { a, b: c, .. } => {
                let (x, y) = (self.get(*a)?, self.get(*c)?);
                b.fadd(x, y)
            }
            Intrinsic::LoadSysval { input, .. } => abi.stage_input(*input)?,
            Intrinsic::LoadInput {
                driver_location,
                component,
                n_components,
                vertex,
                const_index,
                ..
            } => {
                let unknown = AbiError::UnknownInput {
                    driver_location: *driver_location,
                    const_index: *const_index,
                };
                let slot = driver_location.checked_add(*const_index).ok_or_else(|| unknown.clone())?;
                let decl = self.info.find_input(slot).ok_or_else(|| unknown.clone())?;
                let location = decl
                    .location
                    .checked_add(slot - decl.driver_location)
                    .ok_or(unknown)?;
                let req = InputLoad {
                    location,
                    driver_location: *driver_location,
                    component: *component,
                    n_components: *n_components,
                    vertex_index: *vertex,
                    const_index: *const_index,
                    ty: ValueType::float(*n_components),
                };
                abi.load_inputs(b, &req)?
            }
            Intrinsic::StoreOutput {
                driver_location,
                const_index,
                src,
                mask,
            } => {
                let slot = driver_location
                    .checked_add(*const_index)
                    .ok_or(CompileError::UnknownOutput(*driver_location))?;
                let decl = *self.info.find_output(slot).ok_or(CompileError::UnknownOutput(slot))?;
                let src = self.get(*src)?;
                let n = b.ty(src).n_components;
                let mut values = [None; 4];
                for c in mask.components().filter(|c| *c < n) {
                    let dst = decl.component as usize + c as usize;
                    if dst < 4 {
                        values[dst] = Some(b.extract(src, c));
                    }
                }
                let semantic = decl
                    .location
                    .checked_add(slot - decl.driver_location)
                    .ok_or(CompileError::UnknownOutput(slot))?;
                let out = self.outputs.entry(slot).or_insert_with(|| OutputSlot::new(semantic));
                for (o, v) in out.values.iter_mut().zip(values) {
                    if v.is_some() {
                        *o = v;
                    }
                }
                return Ok(None);
            }
            Intrinsic::LoadTessVarying {
                driver_location,
                component,
                n_components,
                vertex,
                param,
                const_index,
                output,
                ..
            } => {
                let decl = if *output {
                    self.info.find_output(*driver_location)
                } else {
                    self.info.find_input(*driver_location)
                };
                let decl = *decl.ok_or(AbiError::UnknownInput {
                    driver_location: *driver_location,
                    const_index: *const_index,
                })?;
                let req = TessVaryingLoad {
                    vertex_index: self.get_opt(*vertex)?,
                    param_index: self.get_opt(*param)?,
                    const_index: *const_index,
                    location: decl.location,
                    driver_location: *driver_location,
                    component: *component,
                    n_components: *n_components,
                    is_patch: decl.patch,
                    is_compact: decl.compact,
                    load_inputs: !*output,
                };
                abi.load_tess_varyings(b, &req)?
            }
            Intrinsic::StoreTcsOutput {
                driver_location,
                vertex,
                param,
                const_index,
                src,
                mask,
            } => {
                let decl = *self
                    .info
                    .find_output(*driver_location)
                    .ok_or(CompileError::UnknownOutput(*driver_location))?;
                let req = TcsOutputStore {
                    var: OutputVar {
                        location: decl.location,
                        driver_location: *driver_location,
                        component: decl.component,
                        n_components: decl.n_components,
                        is_patch: decl.patch,
                        is_compact: decl.compact,
                    },
                    vertex_index: self.get_opt(*vertex)?,
                    param_index: self.get_opt(*param)?,
                    const_index: *const_index,
                    src: self.get(*src)?,
                    writemask: *mask,
                };
                abi.store_tcs_outputs(b, &req)?;
                return Ok(None);
            }
            Intrinsic::LoadTessCoord { n_components, .. } => abi.load_tess_coord(b, ValueType::F32, *n_components)?,
            Intrinsic::LoadPatchVerticesIn { .. } => abi.load_patch_vertices_in(b)?,
            Intrinsic::LoadTessLevel { level, .. } => abi.load_tess_level(b, level.varying_id())?,
            Intrinsic::LoadResource {
                set, binding, index, ..
            } => {
                let index = match index {
                    Some(i) => self.get(*i)?,
                    None => b.const_u32(0),
                };
                abi.load_resource(b, *set, *binding, index)?
            }
            Intrinsic::LoadUbo {
                block,
                offset,
                n_components,
                ..
            } => {
                let desc = abi.load_ubo(b, self.get(*block)?)?;
                b.buffer_load(desc, *offset, ValueType::float(*n_components))
            }
            Intrinsic::LoadSsbo {
                buffer,
                offset,
                n_components,
                ..
            } => {
                let desc = abi.load_ssbo(b, self.get(*buffer)?, false)?;
                b.buffer_load(desc, *offset, ValueType::float(*n_components))
            }
            Intrinsic::StoreSsbo {
                buffer,
                offset,
                src,
                mask,
            } => {
                let desc = abi.load_ssbo(b, self.get(*buffer)?, true)?;
                let src = self.get(*src)?;
                b.buffer_store(desc, *offset, src, *mask);
                return Ok(None);
            }
            Intrinsic::Tex {
                texture,
                sampler,
                coord,
                comparator,
                ..
            } => {
                let image = self.desc(abi, b, texture, DescriptorKind::Image, false, false)?;
                let sampler = self.desc(abi, b, sampler.as_ref().unwrap_or(texture), DescriptorKind::Sampler, false, false)?;
                let coord = self.get(*coord)?;
                let comparator = match self.get_opt(*comparator)? {
                    Some(c) if abi.clamp_shadow_reference() => Some(b.clamp01(c)),
                    c => c,
                };
                b.sample(image, sampler, coord, comparator)
            }
            Intrinsic::TexFetchMs {
                texture, coord, sample, ..
            } => {
                let image = self.desc(abi, b, texture, DescriptorKind::Image, false, false)?;
                let fmask = self.desc(abi, b, texture, DescriptorKind::Fmask, false, false)?;
                let (coord, sample) = (self.get(*coord)?, self.get(*sample)?);
                b.fetch_ms(image, fmask, coord, sample)
            }
            Intrinsic::TexFetchBuffer { texture, coord, .. } => {
                let buffer = self.desc(abi, b, texture, DescriptorKind::Buffer, false, false)?;
                let coord = self.get(*coord)?;
                b.texel_fetch(buffer, coord)
            }
            Intrinsic::ImageLoad { image, coord, .. } => {
                let desc = self.desc(abi, b, image, DescriptorKind::Image, true, false)?;
                let coord = self.get(*coord)?;
                b.image_load(desc, coord)
            }
            Intrinsic::ImageStore { image, coord, src } => {
                let desc = self.desc(abi, b, image, DescriptorKind::Image, true, true)?;
                let (coord, src) = (self.get(*coord)?, self.get(*src)?);
                b.image_store(desc, coord, src);
                return Ok(None);
            }
            Intrinsic::EmitVertex { stream } => {
                abi.emit_vertex(b, *stream, &self.outputs())?;
                return Ok(None);
            }
            Intrinsic::EndPrimitive { stream } => {
                abi.emit_primitive(b, *stream)?;
                return Ok(None);
            }
        };
        Ok(Some(v))
    }
}

/// Translates `program`, letting `frontend` supply everything stage- and binding-specific.
/// `emit_outputs` is called once, after the whole body.
pub fn compile<F: AbiFrontend>(program: &ShaderProgram, frontend: F) -> Result<CompiledShader, CompileError> {
    let info = &program.info;
    debug!(
        "compiling {} shader ({} intrinsics) with the {} frontend",
        info.stage,
        program.body.len(),
        frontend.name()
    );
    let mut b = Builder::new();
    let mut abi = AbiInstance::new(&mut b, frontend, info)?;
    let mut t = Translator {
        info,
        values: HashMap::new(),
        outputs: BTreeMap::new(),
    };

    for intr in &program.body {
        let v = t.lower(&mut abi, &mut b, intr)?;
        if let (Some(dst), Some(v)) = (intr.dst(), v) {
            t.def(dst, v)?;
        }
    }
    let outputs = t.outputs();
    abi.emit_outputs(&mut b, &outputs)?;

    let (_, calls) = abi.into_parts();
    debug!("{} instructions, {} callbacks", b.len(), calls.len());
    Ok(CompiledShader {
        stage: info.stage,
        ir: b,
        calls,
    })
}
