//! A line-based textual form of [ShaderProgram].
//!
//! ```text
//! stage fragment
//! dcl_input loc(32) dl(0) n(4) flat
//! dcl_output loc(32) dl(0) n(4)
//! %0 = load_input dl(0) n(4)
//! store_output dl(0) mask(xyzw) %0
//! ```
//!
//! Each statement is `[%N = ]mnemonic` followed by space-separated arguments, each one of
//! `name(value)`, a value `%M`, a hex literal `0x...` or a bare flag word.
//! `;` starts a comment.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, hex_digit1, space0, space1},
    combinator::{eof, map, map_res, opt},
    multi::many0,
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use phf::phf_map;
use thiserror::Error;

use super::{BindingDecl, InterpMode, Intrinsic, ShaderInfo, ShaderProgram, Ssa, TextureRef, VarDecl};
use crate::abi::TessLevel;
use crate::descriptor::{BindingType, MAX_DESCRIPTOR_SETS};
use crate::error::AbiError;
use crate::ir::{ValueType, WriteMask};
use crate::stage::{ShaderStage, StageInput};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatementError {
    #[error("syntax error at '{0}'")]
    Syntax(String),
    #[error("unknown mnemonic '{0}'")]
    UnknownMnemonic(String),
    #[error("the first statement must be 'stage'")]
    NoStage,
    #[error("stage declared twice")]
    DuplicateStage,
    #[error("'{0}' needs a destination value")]
    MissingDst(&'static str),
    #[error("'{0}' does not produce a value")]
    UnexpectedDst(&'static str),
    #[error("missing argument '{0}'")]
    MissingArg(&'static str),
    #[error("missing operand {0}")]
    MissingOperand(usize),
    #[error("bad value '{value}' for '{name}'")]
    BadValue { name: String, value: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {error}")]
pub struct TextError {
    pub line: usize,
    pub error: StatementError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// `name(value)`
    Named(String, String),
    /// `%N`
    Value(Ssa),
    /// `0x[0-9a-fA-F]+`
    Hex(u32),
    /// A bare word
    Flag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub dst: Option<Ssa>,
    pub mnemonic: String,
    pub args: Vec<Arg>,
}

fn parse_ssa(data: &str) -> IResult<&str, Ssa> {
    map(preceded(char('%'), map_res(digit1, str::parse::<u32>)), Ssa)(data)
}

fn parse_hex(data: &str) -> IResult<&str, u32> {
    preceded(tag("0x"), map_res(hex_digit1, |s| u32::from_str_radix(s, 16)))(data)
}

fn parse_word(data: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(data)
}

fn parse_named(data: &str) -> IResult<&str, Arg> {
    let (data, (name, value)) = tuple((
        parse_word,
        delimited(char('('), take_while1(|c: char| c != ')'), char(')')),
    ))(data)?;
    Ok((data, Arg::Named(name.to_owned(), value.to_owned())))
}

fn parse_arg(data: &str) -> IResult<&str, Arg> {
    alt((
        map(parse_ssa, Arg::Value),
        map(parse_hex, Arg::Hex),
        parse_named,
        map(parse_word, |w| Arg::Flag(w.to_owned())),
    ))(data)
}

/// Parses one non-empty, comment-free line
pub fn parse_statement(line: &str) -> IResult<&str, Statement> {
    let (data, _) = space0(line)?;
    let (data, dst) = opt(terminated(parse_ssa, tuple((space0, char('='), space0))))(data)?;
    let (data, mnemonic) = parse_word(data)?;
    let (data, args) = many0(preceded(space1, parse_arg))(data)?;
    let (data, _) = tuple((space0, eof))(data)?;
    Ok((
        data,
        Statement {
            dst,
            mnemonic: mnemonic.to_owned(),
            args,
        },
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mnemonic {
    Stage,
    DclInput,
    DclOutput,
    DclSysval,
    DclBinding,
    DclGs,
    Const,
    IAdd,
    FAdd,
    LoadSysval,
    LoadInput,
    StoreOutput,
    LoadTessVarying,
    StoreTcsOutput,
    LoadTessCoord,
    LoadPatchVerticesIn,
    LoadTessLevel,
    Resource,
    LoadUbo,
    LoadSsbo,
    StoreSsbo,
    Tex,
    TxfMs,
    TxfBuffer,
    ImageLoad,
    ImageStore,
    EmitVertex,
    EndPrimitive,
}

struct MnemonicDef {
    mnemonic: Mnemonic,
    has_dst: bool,
}

const MNEMONICS: phf::Map<&'static str, MnemonicDef> = phf_map! {
    "stage" => MnemonicDef { mnemonic: Mnemonic::Stage, has_dst: false },
    "dcl_input" => MnemonicDef { mnemonic: Mnemonic::DclInput, has_dst: false },
    "dcl_output" => MnemonicDef { mnemonic: Mnemonic::DclOutput, has_dst: false },
    "dcl_sysval" => MnemonicDef { mnemonic: Mnemonic::DclSysval, has_dst: false },
    "dcl_binding" => MnemonicDef { mnemonic: Mnemonic::DclBinding, has_dst: false },
    "dcl_gs" => MnemonicDef { mnemonic: Mnemonic::DclGs, has_dst: false },
    "const" => MnemonicDef { mnemonic: Mnemonic::Const, has_dst: true },
    "iadd" => MnemonicDef { mnemonic: Mnemonic::IAdd, has_dst: true },
    "fadd" => MnemonicDef { mnemonic: Mnemonic::FAdd, has_dst: true },
    "load_sysval" => MnemonicDef { mnemonic: Mnemonic::LoadSysval, has_dst: true },
    "load_input" => MnemonicDef { mnemonic: Mnemonic::LoadInput, has_dst: true },
    "store_output" => MnemonicDef { mnemonic: Mnemonic::StoreOutput, has_dst: false },
    "load_tess_varying" => MnemonicDef { mnemonic: Mnemonic::LoadTessVarying, has_dst: true },
    "store_tcs_output" => MnemonicDef { mnemonic: Mnemonic::StoreTcsOutput, has_dst: false },
    "load_tess_coord" => MnemonicDef { mnemonic: Mnemonic::LoadTessCoord, has_dst: true },
    "load_patch_vertices_in" => MnemonicDef { mnemonic: Mnemonic::LoadPatchVerticesIn, has_dst: true },
    "load_tess_level" => MnemonicDef { mnemonic: Mnemonic::LoadTessLevel, has_dst: true },
    "resource" => MnemonicDef { mnemonic: Mnemonic::Resource, has_dst: true },
    "load_ubo" => MnemonicDef { mnemonic: Mnemonic::LoadUbo, has_dst: true },
    "load_ssbo" => MnemonicDef { mnemonic: Mnemonic::LoadSsbo, has_dst: true },
    "store_ssbo" => MnemonicDef { mnemonic: Mnemonic::StoreSsbo, has_dst: false },
    "tex" => MnemonicDef { mnemonic: Mnemonic::Tex, has_dst: true },
    "txf_ms" => MnemonicDef { mnemonic: Mnemonic::TxfMs, has_dst: true },
    "txf_buffer" => MnemonicDef { mnemonic: Mnemonic::TxfBuffer, has_dst: true },
    "image_load" => MnemonicDef { mnemonic: Mnemonic::ImageLoad, has_dst: true },
    "image_store" => MnemonicDef { mnemonic: Mnemonic::ImageStore, has_dst: false },
    "emit_vertex" => MnemonicDef { mnemonic: Mnemonic::EmitVertex, has_dst: false },
    "end_primitive" => MnemonicDef { mnemonic: Mnemonic::EndPrimitive, has_dst: false },
};

fn bad_value(name: &str, value: &str) -> StatementError {
    StatementError::BadValue {
        name: name.to_owned(),
        value: value.to_owned(),
    }
}

fn parse_number(name: &str, value: &str) -> Result<u32, StatementError> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|_| bad_value(name, value))
}

fn parse_mask(value: &str) -> Result<WriteMask, StatementError> {
    let mut mask = WriteMask::empty();
    for c in value.chars() {
        mask |= match c {
            'x' => WriteMask::X,
            'y' => WriteMask::Y,
            'z' => WriteMask::Z,
            'w' => WriteMask::W,
            _ => return Err(bad_value("mask", value)),
        };
    }
    Ok(mask)
}

fn parse_type(value: &str) -> Result<ValueType, StatementError> {
    match value {
        "f32" => Ok(ValueType::F32),
        "i32" => Ok(ValueType::I32),
        "f16" => Ok(ValueType::F16),
        "i16" => Ok(ValueType::I16),
        _ => Err(bad_value("type", value)),
    }
}

/// Typed access to a statement's arguments
struct Args<'a> {
    args: &'a [Arg],
}
impl<'a> Args<'a> {
    fn named(&self, name: &str) -> Option<&'a str> {
        self.args.iter().find_map(|a| match a {
            Arg::Named(n, v) if n == name => Some(v.as_str()),
            _ => None,
        })
    }

    fn num(&self, name: &str) -> Result<Option<u32>, StatementError> {
        self.named(name).map(|v| parse_number(name, v)).transpose()
    }

    fn req_num(&self, name: &'static str) -> Result<u32, StatementError> {
        self.num(name)?.ok_or(StatementError::MissingArg(name))
    }

    fn small(&self, name: &'static str, default: u8) -> Result<u8, StatementError> {
        match self.named(name) {
            Some(v) => u8::try_from(parse_number(name, v)?).map_err(|_| bad_value(name, v)),
            None => Ok(default),
        }
    }

    fn ssa(&self, name: &str) -> Result<Option<Ssa>, StatementError> {
        match self.named(name) {
            Some(v) => match parse_ssa(v) {
                Ok(("", ssa)) => Ok(Some(ssa)),
                _ => Err(bad_value(name, v)),
            },
            None => Ok(None),
        }
    }

    fn mask(&self, default: WriteMask) -> Result<WriteMask, StatementError> {
        self.named("mask").map(parse_mask).unwrap_or(Ok(default))
    }

    fn flag(&self, name: &str) -> bool {
        self.args.iter().any(|a| matches!(a, Arg::Flag(f) if f == name))
    }

    fn flags(&self) -> impl Iterator<Item = &'a str> {
        self.args.iter().filter_map(|a| match a {
            Arg::Flag(f) => Some(f.as_str()),
            _ => None,
        })
    }

    fn first_flag(&self) -> Result<&'a str, StatementError> {
        self.flags().next().ok_or(StatementError::MissingOperand(0))
    }

    fn operand(&self, i: usize) -> Result<Ssa, StatementError> {
        self.args
            .iter()
            .filter_map(|a| match a {
                Arg::Value(v) => Some(*v),
                _ => None,
            })
            .nth(i)
            .ok_or(StatementError::MissingOperand(i))
    }

    fn hex(&self) -> Vec<u32> {
        self.args
            .iter()
            .filter_map(|a| match a {
                Arg::Hex(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    fn var_decl(&self) -> Result<VarDecl, StatementError> {
        let mut decl = VarDecl::new(self.req_num("loc")?, self.req_num("dl")?, self.small("n", 4)?);
        decl.component = self.small("comp", 0)?;
        decl.array_len = self.num("array")?.unwrap_or(0);
        if self.flag("flat") {
            decl.interp = InterpMode::Flat;
        }
        decl.patch = self.flag("patch");
        decl.compact = self.flag("compact");
        match decl.check() {
            Ok(()) => Ok(decl),
            Err(AbiError::ComponentRange { .. }) if decl.n_components == 0 => Err(bad_value("n", "0")),
            Err(AbiError::ComponentRange { .. }) => Err(bad_value("comp", self.named("comp").unwrap_or("0"))),
            Err(_) => Err(bad_value("dl", self.named("dl").unwrap_or_default())),
        }
    }

    /// `<prefix>(binding) [set(s)] [const_index(n)] [index(%v)]`
    fn texture(&self, prefix: &'static str) -> Result<TextureRef, StatementError> {
        Ok(TextureRef {
            set: self.num("set")?,
            binding: self.req_num(prefix)?,
            const_index: self.num("const_index")?.unwrap_or(0),
            index: self.ssa("index")?,
        })
    }
}

fn decode_statement(
    info: &mut Option<ShaderInfo>,
    body: &mut Vec<Intrinsic>,
    stmt: &Statement,
) -> Result<(), StatementError> {
    let def = MNEMONICS
        .get(stmt.mnemonic.as_str())
        .ok_or_else(|| StatementError::UnknownMnemonic(stmt.mnemonic.clone()))?;
    let name = MNEMONICS.get_key(stmt.mnemonic.as_str()).copied().unwrap_or("");
    let dst = match (def.has_dst, stmt.dst) {
        (true, Some(d)) => d,
        (true, None) => return Err(StatementError::MissingDst(name)),
        (false, Some(_)) => return Err(StatementError::UnexpectedDst(name)),
        (false, None) => Ssa(0),
    };
    let a = Args { args: &stmt.args };

    if def.mnemonic == Mnemonic::Stage {
        if info.is_some() {
            return Err(StatementError::DuplicateStage);
        }
        let stage_name = a.first_flag()?;
        let stage = ShaderStage::from_name(stage_name).ok_or_else(|| bad_value("stage", stage_name))?;
        *info = Some(ShaderInfo::new(stage));
        return Ok(());
    }
    let info = info.as_mut().ok_or(StatementError::NoStage)?;

    let intr = match def.mnemonic {
        Mnemonic::Stage => return Ok(()),
        Mnemonic::DclInput => {
            info.inputs.push(a.var_decl()?);
            return Ok(());
        }
        Mnemonic::DclOutput => {
            info.outputs.push(a.var_decl()?);
            return Ok(());
        }
        Mnemonic::DclSysval => {
            for f in a.flags() {
                let input = StageInput::from_name(f).ok_or_else(|| bad_value("sysval", f))?;
                info.system_values.push(input);
            }
            return Ok(());
        }
        Mnemonic::DclBinding => {
            let ty_name = a.named("type").ok_or(StatementError::MissingArg("type"))?;
            let set = a.num("set")?.unwrap_or(0);
            if set >= MAX_DESCRIPTOR_SETS {
                return Err(bad_value("set", a.named("set").unwrap_or_default()));
            }
            info.bindings.push(BindingDecl {
                set,
                binding: a.req_num("binding")?,
                ty: BindingType::from_name(ty_name).ok_or_else(|| bad_value("type", ty_name))?,
                count: a.num("count")?.unwrap_or(1),
            });
            return Ok(());
        }
        Mnemonic::DclGs => {
            info.max_vertices = a.num("max_vertices")?.unwrap_or(info.max_vertices);
            info.vertices_in = a.num("vertices_in")?.unwrap_or(info.vertices_in);
            return Ok(());
        }
        Mnemonic::Const => {
            let ty = match a.first_flag() {
                Ok(t) => parse_type(t)?,
                Err(_) => ValueType::I32,
            };
            let value = a.hex();
            if value.is_empty() {
                return Err(StatementError::MissingOperand(0));
            }
            Intrinsic::Const { dst, ty, value }
        }
        Mnemonic::IAdd => Intrinsic::IAdd {
            dst,
            a: a.operand(0)?,
            b: a.operand(1)?,
        },
        Mnemonic::FAdd => Intrinsic::FAdd {
            dst,
            a: a.operand(0)?,
            b: a.operand(1)?,
        },
        Mnemonic::LoadSysval => {
            let f = a.first_flag()?;
            Intrinsic::LoadSysval {
                dst,
                input: StageInput::from_name(f).ok_or_else(|| bad_value("sysval", f))?,
            }
        }
        Mnemonic::LoadInput => Intrinsic::LoadInput {
            dst,
            driver_location: a.req_num("dl")?,
            component: a.small("comp", 0)?,
            n_components: a.small("n", 4)?,
            vertex: a.num("vertex")?,
            const_index: a.num("const_index")?.unwrap_or(0),
        },
        Mnemonic::StoreOutput => Intrinsic::StoreOutput {
            driver_location: a.req_num("dl")?,
            const_index: a.num("const_index")?.unwrap_or(0),
            src: a.operand(0)?,
            mask: a.mask(WriteMask::XYZW)?,
        },
        Mnemonic::LoadTessVarying => Intrinsic::LoadTessVarying {
            dst,
            driver_location: a.req_num("dl")?,
            component: a.small("comp", 0)?,
            n_components: a.small("n", 4)?,
            vertex: a.ssa("vertex")?,
            param: a.ssa("param")?,
            const_index: a.num("const_index")?.unwrap_or(0),
            output: a.flag("output"),
        },
        Mnemonic::StoreTcsOutput => Intrinsic::StoreTcsOutput {
            driver_location: a.req_num("dl")?,
            vertex: a.ssa("vertex")?,
            param: a.ssa("param")?,
            const_index: a.num("const_index")?.unwrap_or(0),
            src: a.operand(0)?,
            mask: a.mask(WriteMask::XYZW)?,
        },
        Mnemonic::LoadTessCoord => Intrinsic::LoadTessCoord {
            dst,
            n_components: a.small("n", 3)?,
        },
        Mnemonic::LoadPatchVerticesIn => Intrinsic::LoadPatchVerticesIn { dst },
        Mnemonic::LoadTessLevel => {
            let level = match a.first_flag()? {
                "outer" => TessLevel::Outer,
                "inner" => TessLevel::Inner,
                other => return Err(bad_value("level", other)),
            };
            Intrinsic::LoadTessLevel { dst, level }
        }
        Mnemonic::Resource => Intrinsic::LoadResource {
            dst,
            set: a.num("set")?,
            binding: a.req_num("binding")?,
            index: a.ssa("index")?,
        },
        Mnemonic::LoadUbo => Intrinsic::LoadUbo {
            dst,
            block: a.operand(0)?,
            offset: a.num("offset")?.unwrap_or(0),
            n_components: a.small("n", 4)?,
        },
        Mnemonic::LoadSsbo => Intrinsic::LoadSsbo {
            dst,
            buffer: a.operand(0)?,
            offset: a.num("offset")?.unwrap_or(0),
            n_components: a.small("n", 4)?,
        },
        Mnemonic::StoreSsbo => Intrinsic::StoreSsbo {
            buffer: a.operand(0)?,
            offset: a.num("offset")?.unwrap_or(0),
            src: a.operand(1)?,
            mask: a.mask(WriteMask::XYZW)?,
        },
        Mnemonic::Tex => {
            let texture = a.texture("texture")?;
            let sampler = match a.num("sampler")? {
                Some(binding) => Some(TextureRef {
                    set: texture.set,
                    binding,
                    const_index: 0,
                    index: None,
                }),
                None => None,
            };
            Intrinsic::Tex {
                dst,
                texture,
                sampler,
                coord: a.operand(0)?,
                comparator: a.ssa("cmp")?,
            }
        }
        Mnemonic::TxfMs => Intrinsic::TexFetchMs {
            dst,
            texture: a.texture("texture")?,
            coord: a.operand(0)?,
            sample: a.operand(1)?,
        },
        Mnemonic::TxfBuffer => Intrinsic::TexFetchBuffer {
            dst,
            texture: a.texture("texture")?,
            coord: a.operand(0)?,
        },
        Mnemonic::ImageLoad => Intrinsic::ImageLoad {
            dst,
            image: a.texture("image")?,
            coord: a.operand(0)?,
        },
        Mnemonic::ImageStore => Intrinsic::ImageStore {
            image: a.texture("image")?,
            coord: a.operand(0)?,
            src: a.operand(1)?,
        },
        Mnemonic::EmitVertex => Intrinsic::EmitVertex {
            stream: a.num("stream")?.unwrap_or(0),
        },
        Mnemonic::EndPrimitive => Intrinsic::EndPrimitive {
            stream: a.num("stream")?.unwrap_or(0),
        },
    };
    body.push(intr);
    Ok(())
}

/// Parses a whole program. Line numbers in errors start at 1.
pub fn parse_program(text: &str) -> Result<ShaderProgram, TextError> {
    let mut info = None;
    let mut body = vec![];
    for (i, raw) in text.lines().enumerate() {
        let line = raw.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let at = |error| TextError { line: i + 1, error };
        let stmt = match parse_statement(line) {
            Ok((_, stmt)) => stmt,
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                return Err(at(StatementError::Syntax(e.input.to_owned())))
            }
            Err(nom::Err::Incomplete(_)) => return Err(at(StatementError::Syntax(line.to_owned()))),
        };
        decode_statement(&mut info, &mut body, &stmt).map_err(at)?;
    }
    let info = info.ok_or(TextError {
        line: 0,
        error: StatementError::NoStage,
    })?;
    Ok(ShaderProgram { info, body })
}
