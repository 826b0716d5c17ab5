use std::fmt::{Display, Formatter, Result};

use super::{ArgSlot, Builder, DataWidth, ExportTarget, Offset, Op, ScalarKind, ValueRef, ValueType};

impl Display for ValueRef {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "%{}", self.index)
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter) -> Result {
        let kind = match self.kind {
            ScalarKind::Float => "f",
            ScalarKind::Int => "i",
        };
        let width = match self.width {
            DataWidth::E16 => 16,
            DataWidth::E32 => 32,
        };
        write!(f, "{}{}x{}", kind, width, self.n_components)
    }
}

impl Display for ArgSlot {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            ArgSlot::VertexInput(loc) => write!(f, "vertex_input[{}]", loc),
            ArgSlot::EsgsVertexOffset(v) => write!(f, "esgs_vertex_offset[{}]", v),
            ArgSlot::FragPos(c) => write!(f, "frag_pos[{}]", c),
            ArgSlot::DescriptorSet(set) => write!(f, "descriptor_set[{}]", set),
            other => write!(f, "{:?}", other),
        }
    }
}

impl Display for Offset {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            Offset::Imm(imm) => write!(f, "{}", imm),
            Offset::Dyn(v) => write!(f, "{}", v),
        }
    }
}

impl Display for ExportTarget {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            ExportTarget::Position(i) => write!(f, "pos{}", i),
            ExportTarget::Param(i) => write!(f, "param{}", i),
            ExportTarget::Mrt(i) => write!(f, "mrt{}", i),
            ExportTarget::MrtZ => write!(f, "mrtz"),
        }
    }
}

/// Prints a list of optional values, with `_` for holes
pub struct DisplayHoley<'a>(pub &'a [Option<ValueRef>]);
impl<'a> Display for DisplayHoley<'a> {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "[")?;
        let mut first = true;
        for v in self.0 {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match v {
                Some(v) => write!(f, "{}", v)?,
                None => write!(f, "_")?,
            }
        }
        write!(f, "]")
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            Op::Arg(slot) => write!(f, "arg {}", slot),
            Op::Const(data) => {
                write!(f, "const")?;
                for d in data {
                    write!(f, " 0x{:08x}", d)?;
                }
                Ok(())
            }
            Op::Vector(elems) => {
                let elems: Vec<_> = elems.iter().map(|e| Some(*e)).collect();
                write!(f, "vec {}", DisplayHoley(&elems))
            }
            Op::Extract(v, c) => write!(f, "extract {}, {}", v, c),
            Op::Bitcast(v) => write!(f, "bitcast {}", v),
            Op::IAdd(a, b) => write!(f, "iadd {}, {}", a, b),
            Op::IMul(a, b) => write!(f, "imul {}, {}", a, b),
            Op::FAdd(a, b) => write!(f, "fadd {}, {}", a, b),
            Op::FSub(a, b) => write!(f, "fsub {}, {}", a, b),
            Op::Bfe { src, offset, bits } => write!(f, "bfe {}, {}, {}", src, offset, bits),
            Op::Clamp01(v) => write!(f, "clamp01 {}", v),
            Op::Interp {
                driver_location,
                flat,
            } => write!(
                f,
                "interp{} [{}]",
                if *flat { "_flat" } else { "" },
                driver_location
            ),
            Op::LoadDesc {
                table,
                offset,
                dwords,
                invariant,
            } => write!(
                f,
                "load_desc{} {}[{}], {}",
                if *invariant { "_invariant" } else { "" },
                table,
                offset,
                dwords
            ),
            Op::ImmutableDesc {
                set,
                binding,
                element,
                state,
            } => write!(
                f,
                "immutable_desc s{}b{}[{}] 0x{:08x} 0x{:08x} 0x{:08x} 0x{:08x}",
                set, binding, element, state[0], state[1], state[2], state[3]
            ),
            Op::BufferLoad {
                desc,
                offset,
                dwords,
            } => write!(f, "buffer_load {}[{}], {}", desc, offset, dwords),
            Op::BufferStore {
                desc,
                offset,
                value,
                mask,
            } => write!(f, "buffer_store {}[{}], {}, {:?}", desc, offset, value, mask),
            Op::LdsLoad { addr, dwords } => write!(f, "lds_load [{}], {}", addr, dwords),
            Op::LdsStore { addr, value } => write!(f, "lds_store [{}], {}", addr, value),
            Op::Sample {
                image,
                sampler,
                coord,
                comparator,
            } => {
                write!(f, "sample {}, {}, {}", image, sampler, coord)?;
                if let Some(c) = comparator {
                    write!(f, ", cmp {}", c)?;
                }
                Ok(())
            }
            Op::FetchMs {
                image,
                fmask,
                coord,
                sample,
            } => write!(f, "fetch_ms {}, {}, {}, {}", image, fmask, coord, sample),
            Op::TexelFetch { buffer, coord } => write!(f, "texel_fetch {}, {}", buffer, coord),
            Op::ImageLoad { image, coord } => write!(f, "image_load {}, {}", image, coord),
            Op::ImageStore {
                image,
                coord,
                value,
            } => write!(f, "image_store {}, {}, {}", image, coord, value),
            Op::Export { target, values } => write!(f, "export {} {}", target, DisplayHoley(values)),
            Op::GsEmit { stream, values } => write!(f, "gs_emit {} {}", stream, DisplayHoley(values)),
            Op::GsCut { stream } => write!(f, "gs_cut {}", stream),
            Op::TessFactors { outer, inner } => match inner {
                Some(inner) => write!(f, "tess_factors {}, {}", outer, inner),
                None => write!(f, "tess_factors {}", outer),
            },
        }
    }
}

impl Display for Builder {
    fn fmt(&self, f: &mut Formatter) -> Result {
        for (i, instr) in self.instrs.iter().enumerate() {
            if instr.ty.n_components == 0 {
                writeln!(f, "      {}", instr.op)?;
            } else {
                writeln!(f, "%{}:{} = {}", i, instr.ty, instr.op)?;
            }
        }
        Ok(())
    }
}
