//! The backend's value pool.
//!
//! Every value the backend or a frontend creates during one compilation lives in a
//! [Builder] and is referred to by an opaque [ValueRef].
//! Handles carry the [SessionId] of the builder that created them, so a handle leaking
//! from one compilation into another is caught instead of silently aliasing a different value.
//!
//! Pure operations are value-numbered: asking for the same pure operation twice gives back
//! the same handle. Memory and side-effecting operations are always appended.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::error::AbiError;

pub mod display;
pub mod interp;

static NEXT_SESSION: AtomicU32 = AtomicU32::new(1);

/// Identifies one compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u32);
impl SessionId {
    fn fresh() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Opaque handle to a value in a [Builder]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueRef {
    session: SessionId,
    index: u32,
}
impl ValueRef {
    pub fn session(&self) -> SessionId {
        self.session
    }
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// The width in bits of a single scalar component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataWidth {
    E16,
    E32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    Float,
    Int,
}

/// Type of a value: 1 to 8 components of the same scalar kind.
///
/// Each component occupies one dword regardless of width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueType {
    pub kind: ScalarKind,
    pub width: DataWidth,
    pub n_components: u8,
}
impl ValueType {
    pub const F32: Self = Self::new(ScalarKind::Float, DataWidth::E32, 1);
    pub const I32: Self = Self::new(ScalarKind::Int, DataWidth::E32, 1);
    pub const F16: Self = Self::new(ScalarKind::Float, DataWidth::E16, 1);
    pub const I16: Self = Self::new(ScalarKind::Int, DataWidth::E16, 1);

    pub const fn new(kind: ScalarKind, width: DataWidth, n_components: u8) -> Self {
        Self {
            kind,
            width,
            n_components,
        }
    }
    pub const fn float(n_components: u8) -> Self {
        Self::new(ScalarKind::Float, DataWidth::E32, n_components)
    }
    pub const fn int(n_components: u8) -> Self {
        Self::new(ScalarKind::Int, DataWidth::E32, n_components)
    }
    /// Descriptors are untyped dword vectors
    pub const fn descriptor(dwords: u8) -> Self {
        Self::int(dwords)
    }
    pub fn with_components(self, n_components: u8) -> Self {
        Self {
            n_components,
            ..self
        }
    }
    pub fn scalar(self) -> Self {
        self.with_components(1)
    }
}

bitflags! {
    /// Components of a vec4 slot touched by a store
    pub struct WriteMask: u8 {
        const X = 0b0001;
        const Y = 0b0010;
        const Z = 0b0100;
        const W = 0b1000;

        const XYZW = Self::X.bits | Self::Y.bits | Self::Z.bits | Self::W.bits;
    }
}
impl WriteMask {
    pub fn contains_component(&self, comp: u8) -> bool {
        comp < 4 && self.bits & (1 << comp) != 0
    }
    /// Indices of the written components, in order
    pub fn components(&self) -> impl Iterator<Item = u8> + '_ {
        (0..4).filter(move |c| self.contains_component(*c))
    }
}

/// Values the hardware preloads into registers at shader entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArgSlot {
    VertexId,
    InstanceId,
    BaseVertex,
    StartInstance,
    DrawId,
    /// Attribute fetched for the vertex input at the given driver location
    VertexInput(u32),
    TcsPatchId,
    /// Packed relative patch id (bits 0..8) and invocation id (bits 8..13)
    TcsRelIds,
    TesPatchId,
    TesU,
    TesV,
    GsPrimitiveId,
    GsInvocationId,
    /// ESGS ring offset of the given input vertex, in dwords
    EsgsVertexOffset(u8),
    FragPos(u8),
    FrontFace,
    Ancillary,
    SampleCoverage,
    ConstBufferTable,
    ShaderBufferTable,
    SamplerTable,
    ImageTable,
    DescriptorSet(u32),
}
impl ArgSlot {
    pub fn ty(&self) -> ValueType {
        match self {
            ArgSlot::VertexInput(_) => ValueType::float(4),
            ArgSlot::TesU | ArgSlot::TesV | ArgSlot::FragPos(_) => ValueType::F32,
            _ => ValueType::I32,
        }
    }
}

/// Offset of a descriptor within its table, in dwords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    /// Fully known at compile time
    Imm(u32),
    /// Computed at runtime
    Dyn(ValueRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExportTarget {
    Position(u8),
    Param(u8),
    Mrt(u8),
    /// Depth, stencil and sample mask
    MrtZ,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    Arg(ArgSlot),
    Const(Vec<u32>),
    Vector(Vec<ValueRef>),
    Extract(ValueRef, u8),
    Bitcast(ValueRef),
    IAdd(ValueRef, ValueRef),
    IMul(ValueRef, ValueRef),
    FAdd(ValueRef, ValueRef),
    FSub(ValueRef, ValueRef),
    /// Unsigned bitfield extract
    Bfe { src: ValueRef, offset: u8, bits: u8 },
    Clamp01(ValueRef),
    /// Interpolated (or flat) fragment input
    Interp { driver_location: u32, flat: bool },
    LoadDesc {
        table: ValueRef,
        offset: Offset,
        dwords: u8,
        invariant: bool,
    },
    /// Descriptor whose contents are fixed by the pipeline layout.
    /// Each binding element gets its own value even when the contents match.
    ImmutableDesc {
        set: u32,
        binding: u32,
        element: u32,
        state: [u32; 4],
    },
    BufferLoad { desc: ValueRef, offset: u32, dwords: u8 },
    BufferStore {
        desc: ValueRef,
        offset: u32,
        value: ValueRef,
        mask: WriteMask,
    },
    LdsLoad { addr: ValueRef, dwords: u8 },
    LdsStore { addr: ValueRef, value: ValueRef },
    Sample {
        image: ValueRef,
        sampler: ValueRef,
        coord: ValueRef,
        comparator: Option<ValueRef>,
    },
    FetchMs {
        image: ValueRef,
        fmask: ValueRef,
        coord: ValueRef,
        sample: ValueRef,
    },
    TexelFetch { buffer: ValueRef, coord: ValueRef },
    ImageLoad { image: ValueRef, coord: ValueRef },
    ImageStore {
        image: ValueRef,
        coord: ValueRef,
        value: ValueRef,
    },
    Export {
        target: ExportTarget,
        values: [Option<ValueRef>; 4],
    },
    GsEmit {
        stream: u8,
        values: Vec<Option<ValueRef>>,
    },
    GsCut { stream: u8 },
    TessFactors {
        outer: ValueRef,
        inner: Option<ValueRef>,
    },
}
impl Op {
    /// Pure ops only depend on their operands and can be value-numbered
    pub fn is_pure(&self) -> bool {
        match self {
            Op::Arg(_)
            | Op::Const(_)
            | Op::Vector(_)
            | Op::Extract(..)
            | Op::Bitcast(_)
            | Op::IAdd(..)
            | Op::IMul(..)
            | Op::FAdd(..)
            | Op::FSub(..)
            | Op::Bfe { .. }
            | Op::Clamp01(_)
            | Op::Interp { .. }
            | Op::ImmutableDesc { .. } => true,
            Op::LoadDesc { invariant, .. } => *invariant,
            _ => false,
        }
    }

    /// Ops computing addresses at runtime
    pub fn is_address_arith(&self) -> bool {
        matches!(self, Op::IAdd(..) | Op::IMul(..))
    }

    pub fn operands(&self) -> Vec<ValueRef> {
        match self {
            Op::Arg(_) | Op::Const(_) | Op::Interp { .. } | Op::ImmutableDesc { .. } | Op::GsCut { .. } => vec![],
            Op::Vector(vs) => vs.clone(),
            Op::Extract(v, _) | Op::Bitcast(v) | Op::Clamp01(v) => vec![*v],
            Op::Bfe { src, .. } => vec![*src],
            Op::IAdd(a, b) | Op::IMul(a, b) | Op::FAdd(a, b) | Op::FSub(a, b) => vec![*a, *b],
            Op::LoadDesc { table, offset, .. } => match offset {
                Offset::Imm(_) => vec![*table],
                Offset::Dyn(off) => vec![*table, *off],
            },
            Op::BufferLoad { desc, .. } => vec![*desc],
            Op::BufferStore { desc, value, .. } => vec![*desc, *value],
            Op::LdsLoad { addr, .. } => vec![*addr],
            Op::LdsStore { addr, value } => vec![*addr, *value],
            Op::Sample {
                image,
                sampler,
                coord,
                comparator,
            } => {
                let mut v = vec![*image, *sampler, *coord];
                v.extend(comparator.iter());
                v
            }
            Op::FetchMs {
                image,
                fmask,
                coord,
                sample,
            } => vec![*image, *fmask, *coord, *sample],
            Op::TexelFetch { buffer, coord } => vec![*buffer, *coord],
            Op::ImageLoad { image, coord } => vec![*image, *coord],
            Op::ImageStore {
                image,
                coord,
                value,
            } => vec![*image, *coord, *value],
            Op::Export { values, .. } => values.iter().flatten().copied().collect(),
            Op::GsEmit { values, .. } => values.iter().flatten().copied().collect(),
            Op::TessFactors { outer, inner } => {
                let mut v = vec![*outer];
                v.extend(inner.iter());
                v
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub op: Op,
    pub ty: ValueType,
}

/// Value pool for a single compilation
#[derive(Debug)]
pub struct Builder {
    session: SessionId,
    instrs: Vec<Instr>,
    numbering: HashMap<(Op, ValueType), u32>,
}
impl Builder {
    pub fn new() -> Self {
        Self {
            session: SessionId::fresh(),
            instrs: vec![],
            numbering: HashMap::new(),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Returns the instruction behind `v`, or None if `v` is not from this builder
    pub fn get(&self, v: ValueRef) -> Option<&Instr> {
        if v.session != self.session {
            return None;
        }
        self.instrs.get(v.index())
    }

    /// Fails if `v` was created by a different compilation
    pub fn check(&self, v: ValueRef) -> Result<(), AbiError> {
        match self.get(v) {
            Some(_) => Ok(()),
            None => Err(AbiError::ForeignValue(v)),
        }
    }

    pub fn ty(&self, v: ValueRef) -> ValueType {
        self.instrs[v.index()].ty
    }

    /// Number of instructions matching `pred`
    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.instrs.iter().filter(|i| pred(&i.op)).count()
    }

    pub fn push(&mut self, op: Op, ty: ValueType) -> ValueRef {
        if op.is_pure() {
            if let Some(idx) = self.numbering.get(&(op.clone(), ty)) {
                return ValueRef {
                    session: self.session,
                    index: *idx,
                };
            }
        }
        let index = self.instrs.len() as u32;
        if op.is_pure() {
            self.numbering.insert((op.clone(), ty), index);
        }
        self.instrs.push(Instr { op, ty });
        ValueRef {
            session: self.session,
            index,
        }
    }

    pub fn as_const(&self, v: ValueRef) -> Option<&[u32]> {
        match &self.get(v)?.op {
            Op::Const(data) => Some(data.as_slice()),
            Op::ImmutableDesc { state, .. } => Some(state.as_slice()),
            _ => None,
        }
    }

    pub fn as_const_u32(&self, v: ValueRef) -> Option<u32> {
        match self.as_const(v)? {
            [x] => Some(*x),
            _ => None,
        }
    }

    pub fn arg(&mut self, slot: ArgSlot) -> ValueRef {
        self.push(Op::Arg(slot), slot.ty())
    }

    pub fn const_vec(&mut self, data: &[u32], ty: ValueType) -> ValueRef {
        self.push(Op::Const(data.to_vec()), ty.with_components(data.len() as u8))
    }

    pub fn const_u32(&mut self, x: u32) -> ValueRef {
        self.const_vec(&[x], ValueType::I32)
    }

    pub fn const_f32(&mut self, x: f32) -> ValueRef {
        self.const_vec(&[x.to_bits()], ValueType::F32)
    }

    /// Builds a vector out of the components of `elems`.
    /// A single element is returned unchanged.
    pub fn vector(&mut self, elems: &[ValueRef]) -> ValueRef {
        if let [single] = elems {
            return *single;
        }
        let mut scalars = vec![];
        for e in elems {
            let n = self.ty(*e).n_components;
            for c in 0..n {
                scalars.push(self.extract(*e, c));
            }
        }
        let kind = self.ty(scalars[0]);
        if let Some(data) = scalars
            .iter()
            .map(|s| self.as_const_u32(*s))
            .collect::<Option<Vec<u32>>>()
        {
            return self.const_vec(&data, kind);
        }
        let ty = kind.with_components(scalars.len() as u8);
        self.push(Op::Vector(scalars), ty)
    }

    pub fn extract(&mut self, v: ValueRef, comp: u8) -> ValueRef {
        let ty = self.ty(v);
        if ty.n_components == 1 && comp == 0 {
            return v;
        }
        match self.get(v).map(|i| &i.op) {
            Some(Op::Vector(elems)) if (comp as usize) < elems.len() => return elems[comp as usize],
            Some(Op::Const(data)) if (comp as usize) < data.len() => {
                let x = data[comp as usize];
                return self.const_vec(&[x], ty.scalar());
            }
            _ => {}
        }
        self.push(Op::Extract(v, comp), ty.scalar())
    }

    /// Components `first..first + n` of `v`
    pub fn extract_range(&mut self, v: ValueRef, first: u8, n: u8) -> ValueRef {
        if first == 0 && n == self.ty(v).n_components {
            return v;
        }
        let comps: Vec<ValueRef> = (first..first + n).map(|c| self.extract(v, c)).collect();
        self.vector(&comps)
    }

    /// Reinterprets `v` with the scalar kind and width of `ty`, keeping its component count
    pub fn bitcast(&mut self, v: ValueRef, ty: ValueType) -> ValueRef {
        let from = self.ty(v);
        let to = ty.with_components(from.n_components);
        if from == to {
            return v;
        }
        if let Some(data) = self.as_const(v).map(|d| d.to_vec()) {
            let data: Vec<u32> = match to.width {
                DataWidth::E16 => data.iter().map(|x| x & 0xffff).collect(),
                DataWidth::E32 => data,
            };
            return self.const_vec(&data, to);
        }
        self.push(Op::Bitcast(v), to)
    }

    pub fn iadd(&mut self, a: ValueRef, b: ValueRef) -> ValueRef {
        match (self.as_const_u32(a), self.as_const_u32(b)) {
            (Some(x), Some(y)) => return self.const_u32(x.wrapping_add(y)),
            (Some(0), None) => return b,
            (None, Some(0)) => return a,
            _ => {}
        }
        self.push(Op::IAdd(a, b), ValueType::I32)
    }

    pub fn iadd_imm(&mut self, a: ValueRef, imm: u32) -> ValueRef {
        let b = self.const_u32(imm);
        self.iadd(a, b)
    }

    pub fn imul(&mut self, a: ValueRef, b: ValueRef) -> ValueRef {
        match (self.as_const_u32(a), self.as_const_u32(b)) {
            (Some(x), Some(y)) => return self.const_u32(x.wrapping_mul(y)),
            (Some(1), None) => return b,
            (None, Some(1)) => return a,
            _ => {}
        }
        self.push(Op::IMul(a, b), ValueType::I32)
    }

    pub fn imul_imm(&mut self, a: ValueRef, imm: u32) -> ValueRef {
        let b = self.const_u32(imm);
        self.imul(a, b)
    }

    pub fn fadd(&mut self, a: ValueRef, b: ValueRef) -> ValueRef {
        let ty = self.ty(a);
        self.push(Op::FAdd(a, b), ty)
    }

    pub fn fsub(&mut self, a: ValueRef, b: ValueRef) -> ValueRef {
        let ty = self.ty(a);
        self.push(Op::FSub(a, b), ty)
    }

    pub fn bfe(&mut self, src: ValueRef, offset: u8, bits: u8) -> ValueRef {
        if let Some(x) = self.as_const_u32(src) {
            return self.const_u32(extract_bits(x, offset, bits));
        }
        self.push(Op::Bfe { src, offset, bits }, ValueType::I32)
    }

    pub fn clamp01(&mut self, v: ValueRef) -> ValueRef {
        let ty = self.ty(v);
        self.push(Op::Clamp01(v), ty)
    }

    pub fn interp(&mut self, driver_location: u32, flat: bool) -> ValueRef {
        self.push(
            Op::Interp {
                driver_location,
                flat,
            },
            ValueType::float(4),
        )
    }

    pub fn load_desc(&mut self, table: ValueRef, offset: Offset, dwords: u8, invariant: bool) -> ValueRef {
        self.push(
            Op::LoadDesc {
                table,
                offset,
                dwords,
                invariant,
            },
            ValueType::descriptor(dwords),
        )
    }

    pub fn immutable_desc(&mut self, set: u32, binding: u32, element: u32, state: [u32; 4]) -> ValueRef {
        self.push(
            Op::ImmutableDesc {
                set,
                binding,
                element,
                state,
            },
            ValueType::descriptor(4),
        )
    }

    pub fn buffer_load(&mut self, desc: ValueRef, offset: u32, ty: ValueType) -> ValueRef {
        self.push(
            Op::BufferLoad {
                desc,
                offset,
                dwords: ty.n_components,
            },
            ty,
        )
    }

    pub fn buffer_store(&mut self, desc: ValueRef, offset: u32, value: ValueRef, mask: WriteMask) {
        self.push(
            Op::BufferStore {
                desc,
                offset,
                value,
                mask,
            },
            ValueType::int(0),
        );
    }

    pub fn lds_load(&mut self, addr: ValueRef, ty: ValueType) -> ValueRef {
        self.push(
            Op::LdsLoad {
                addr,
                dwords: ty.n_components,
            },
            ty,
        )
    }

    pub fn lds_store(&mut self, addr: ValueRef, value: ValueRef) {
        self.push(Op::LdsStore { addr, value }, ValueType::int(0));
    }

    pub fn sample(
        &mut self,
        image: ValueRef,
        sampler: ValueRef,
        coord: ValueRef,
        comparator: Option<ValueRef>,
    ) -> ValueRef {
        self.push(
            Op::Sample {
                image,
                sampler,
                coord,
                comparator,
            },
            ValueType::float(4),
        )
    }

    pub fn fetch_ms(&mut self, image: ValueRef, fmask: ValueRef, coord: ValueRef, sample: ValueRef) -> ValueRef {
        self.push(
            Op::FetchMs {
                image,
                fmask,
                coord,
                sample,
            },
            ValueType::float(4),
        )
    }

    pub fn texel_fetch(&mut self, buffer: ValueRef, coord: ValueRef) -> ValueRef {
        self.push(Op::TexelFetch { buffer, coord }, ValueType::float(4))
    }

    pub fn image_load(&mut self, image: ValueRef, coord: ValueRef) -> ValueRef {
        self.push(Op::ImageLoad { image, coord }, ValueType::float(4))
    }

    pub fn image_store(&mut self, image: ValueRef, coord: ValueRef, value: ValueRef) {
        self.push(
            Op::ImageStore {
                image,
                coord,
                value,
            },
            ValueType::int(0),
        );
    }

    pub fn export(&mut self, target: ExportTarget, values: [Option<ValueRef>; 4]) {
        self.push(Op::Export { target, values }, ValueType::int(0));
    }

    pub fn gs_emit(&mut self, stream: u8, values: Vec<Option<ValueRef>>) {
        self.push(Op::GsEmit { stream, values }, ValueType::int(0));
    }

    pub fn gs_cut(&mut self, stream: u8) {
        self.push(Op::GsCut { stream }, ValueType::int(0));
    }

    pub fn tess_factors(&mut self, outer: ValueRef, inner: Option<ValueRef>) {
        self.push(Op::TessFactors { outer, inner }, ValueType::int(0));
    }
}
impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsigned extract of `bits` bits starting at `offset`
pub fn extract_bits(x: u32, offset: u8, bits: u8) -> u32 {
    if bits == 0 || offset >= 32 {
        return 0;
    }
    let shifted = x >> offset;
    if bits >= 32 {
        shifted
    } else {
        shifted & ((1u32 << bits) - 1)
    }
}
