//! Reference interpreter for a [Builder]'s instructions.
//!
//! Runs a single invocation. Hardware arguments, fragment inputs, global memory and LDS are
//! supplied up front; side effects (exports, geometry emits, texture accesses) are recorded
//! so tests can check what a frontend asked the hardware to do.
//! Memory and LDS are addressed in dwords.

use std::collections::HashMap;

use thiserror::Error;

use super::{extract_bits, ArgSlot, Builder, DataWidth, ExportTarget, Offset, Op, ValueRef, WriteMask};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpError {
    #[error("argument {0:?} was not provided")]
    MissingArg(ArgSlot),
    #[error("fragment input at driver location {0} was not provided")]
    MissingInput(u32),
    #[error("read of unmapped memory at dword {0}")]
    UnmappedMemory(u32),
    #[error("read of unwritten LDS at dword {0}")]
    UnmappedLds(u32),
    #[error("value {0} is not from the interpreted compilation")]
    ForeignValue(ValueRef),
    #[error("value {value} has no component {component}")]
    MissingComponent { value: ValueRef, component: u8 },
}

/// A texture or image access, with its descriptors resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureAccess {
    pub op: &'static str,
    pub descriptors: Vec<Vec<u32>>,
    pub coord: Vec<u32>,
    pub extra: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Default)]
pub struct Machine {
    pub args: HashMap<ArgSlot, Vec<u32>>,
    pub inputs: HashMap<u32, Vec<u32>>,
    pub memory: HashMap<u32, u32>,
    pub lds: HashMap<u32, u32>,
    pub exports: Vec<(ExportTarget, [Option<u32>; 4])>,
    pub gs_emits: Vec<(u8, Vec<Option<u32>>)>,
    pub gs_cuts: Vec<u8>,
    pub tess_factors: Vec<(Vec<u32>, Option<Vec<u32>>)>,
    pub texture_accesses: Vec<TextureAccess>,
}
impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, slot: ArgSlot, data: &[u32]) -> Self {
        self.args.insert(slot, data.to_vec());
        self
    }

    pub fn with_input(mut self, driver_location: u32, data: &[u32]) -> Self {
        self.inputs.insert(driver_location, data.to_vec());
        self
    }

    /// Writes `data` to consecutive dwords of memory starting at `addr`
    pub fn write_memory(&mut self, addr: u32, data: &[u32]) {
        for (i, d) in data.iter().enumerate() {
            self.memory.insert(addr.wrapping_add(i as u32), *d);
        }
    }

    fn read_memory(&self, addr: u32, dwords: u8) -> Result<Vec<u32>, InterpError> {
        (0..dwords as u32)
            .map(|i| {
                self.memory
                    .get(&addr.wrapping_add(i))
                    .copied()
                    .ok_or(InterpError::UnmappedMemory(addr.wrapping_add(i)))
            })
            .collect()
    }

    fn read_lds(&self, addr: u32, dwords: u8) -> Result<Vec<u32>, InterpError> {
        (0..dwords as u32)
            .map(|i| {
                self.lds
                    .get(&addr.wrapping_add(i))
                    .copied()
                    .ok_or(InterpError::UnmappedLds(addr.wrapping_add(i)))
            })
            .collect()
    }

    /// Executes every instruction of `b` in order, returning the value of each one.
    /// Instructions without a result produce an empty vector.
    pub fn run(&mut self, b: &Builder) -> Result<Vec<Vec<u32>>, InterpError> {
        let mut values: Vec<Vec<u32>> = Vec::with_capacity(b.len());
        for instr in b.instrs() {
            let get = |v: &ValueRef| lookup(&values, b, v);
            let component = |v: &ValueRef, c: u8| -> Result<u32, InterpError> {
                lookup(&values, b, v)?
                    .get(c as usize)
                    .copied()
                    .ok_or(InterpError::MissingComponent { value: *v, component: c })
            };
            let scalar = |v: &ValueRef| component(v, 0);
            let result = match &instr.op {
                Op::Arg(slot) => self
                    .args
                    .get(slot)
                    .cloned()
                    .ok_or(InterpError::MissingArg(*slot))?,
                Op::Const(data) => data.clone(),
                Op::ImmutableDesc { state, .. } => state.to_vec(),
                Op::Vector(elems) => elems.iter().map(scalar).collect::<Result<_, _>>()?,
                Op::Extract(v, c) => vec![component(v, *c)?],
                Op::Bitcast(v) => match instr.ty.width {
                    DataWidth::E16 => get(v)?.iter().map(|x| x & 0xffff).collect(),
                    DataWidth::E32 => get(v)?.to_vec(),
                },
                Op::IAdd(a, c) => vec![scalar(a)?.wrapping_add(scalar(c)?)],
                Op::IMul(a, c) => vec![scalar(a)?.wrapping_mul(scalar(c)?)],
                Op::FAdd(a, c) => float_binop(get(a)?, get(c)?, |x, y| x + y),
                Op::FSub(a, c) => float_binop(get(a)?, get(c)?, |x, y| x - y),
                Op::Bfe { src, offset, bits } => vec![extract_bits(scalar(src)?, *offset, *bits)],
                Op::Clamp01(v) => get(v)?
                    .iter()
                    .map(|x| f32::from_bits(*x).clamp(0.0, 1.0).to_bits())
                    .collect(),
                Op::Interp {
                    driver_location, ..
                } => self
                    .inputs
                    .get(driver_location)
                    .cloned()
                    .ok_or(InterpError::MissingInput(*driver_location))?,
                Op::LoadDesc {
                    table,
                    offset,
                    dwords,
                    ..
                } => {
                    let offset = match offset {
                        Offset::Imm(imm) => *imm,
                        Offset::Dyn(v) => scalar(v)?,
                    };
                    self.read_memory(scalar(table)?.wrapping_add(offset), *dwords)?
                }
                Op::BufferLoad {
                    desc,
                    offset,
                    dwords,
                } => self.read_memory(scalar(desc)?.wrapping_add(*offset), *dwords)?,
                Op::BufferStore {
                    desc,
                    offset,
                    value,
                    mask,
                } => {
                    let base = scalar(desc)?.wrapping_add(*offset);
                    let value = get(value)?.to_vec();
                    store_masked(&mut self.memory, base, &value, *mask);
                    vec![]
                }
                Op::LdsLoad { addr, dwords } => self.read_lds(scalar(addr)?, *dwords)?,
                Op::LdsStore { addr, value } => {
                    let addr = scalar(addr)?;
                    let value = scalar(value)?;
                    self.lds.insert(addr, value);
                    vec![]
                }
                Op::Sample {
                    image,
                    sampler,
                    coord,
                    comparator,
                } => {
                    let comparator = match comparator {
                        Some(c) => Some(get(c)?.to_vec()),
                        None => None,
                    };
                    self.texture_accesses.push(TextureAccess {
                        op: "sample",
                        descriptors: vec![get(image)?.to_vec(), get(sampler)?.to_vec()],
                        coord: get(coord)?.to_vec(),
                        extra: comparator,
                    });
                    vec![0; 4]
                }
                Op::FetchMs {
                    image,
                    fmask,
                    coord,
                    sample,
                } => {
                    self.texture_accesses.push(TextureAccess {
                        op: "fetch_ms",
                        descriptors: vec![get(image)?.to_vec(), get(fmask)?.to_vec()],
                        coord: get(coord)?.to_vec(),
                        extra: Some(get(sample)?.to_vec()),
                    });
                    vec![0; 4]
                }
                Op::TexelFetch { buffer, coord } => {
                    self.texture_accesses.push(TextureAccess {
                        op: "texel_fetch",
                        descriptors: vec![get(buffer)?.to_vec()],
                        coord: get(coord)?.to_vec(),
                        extra: None,
                    });
                    vec![0; 4]
                }
                Op::ImageLoad { image, coord } => {
                    self.texture_accesses.push(TextureAccess {
                        op: "image_load",
                        descriptors: vec![get(image)?.to_vec()],
                        coord: get(coord)?.to_vec(),
                        extra: None,
                    });
                    vec![0; 4]
                }
                Op::ImageStore {
                    image,
                    coord,
                    value,
                } => {
                    self.texture_accesses.push(TextureAccess {
                        op: "image_store",
                        descriptors: vec![get(image)?.to_vec()],
                        coord: get(coord)?.to_vec(),
                        extra: Some(get(value)?.to_vec()),
                    });
                    vec![]
                }
                Op::Export { target, values } => {
                    let mut out = [None; 4];
                    for (o, v) in out.iter_mut().zip(values.iter()) {
                        if let Some(v) = v {
                            *o = Some(scalar(v)?);
                        }
                    }
                    self.exports.push((*target, out));
                    vec![]
                }
                Op::GsEmit { stream, values } => {
                    let out = values
                        .iter()
                        .map(|v| v.as_ref().map(scalar).transpose())
                        .collect::<Result<Vec<_>, _>>()?;
                    self.gs_emits.push((*stream, out));
                    vec![]
                }
                Op::GsCut { stream } => {
                    self.gs_cuts.push(*stream);
                    vec![]
                }
                Op::TessFactors { outer, inner } => {
                    let inner = match inner {
                        Some(i) => Some(get(i)?.to_vec()),
                        None => None,
                    };
                    self.tess_factors.push((get(outer)?.to_vec(), inner));
                    vec![]
                }
            };
            values.push(result);
        }
        Ok(values)
    }
}

fn lookup<'a>(values: &'a [Vec<u32>], b: &Builder, v: &ValueRef) -> Result<&'a [u32], InterpError> {
    if v.session() != b.session() {
        return Err(InterpError::ForeignValue(*v));
    }
    values
        .get(v.index())
        .map(|d| d.as_slice())
        .ok_or(InterpError::ForeignValue(*v))
}

fn float_binop(a: &[u32], b: &[u32], f: impl Fn(f32, f32) -> f32) -> Vec<u32> {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f(f32::from_bits(*x), f32::from_bits(*y)).to_bits())
        .collect()
}

fn store_masked(memory: &mut HashMap<u32, u32>, base: u32, value: &[u32], mask: WriteMask) {
    for c in mask.components() {
        if let Some(v) = value.get(c as usize) {
            memory.insert(base.wrapping_add(c as u32), *v);
        }
    }
}
