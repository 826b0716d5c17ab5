use turnip_shader_abi::abi::{
    AbiCall, AbiFrontend, AbiInstance, AbiSetup, InputLoad, OutputSlot, SamplerDescLoad, ShaderAbi, StreamStats,
};
use turnip_shader_abi::frontends::{DescriptorSetFrontend, FlatFrontend, PipelineLayout};
use turnip_shader_abi::ir::interp::{InterpError, Machine};
use turnip_shader_abi::ir::{ArgSlot, Builder, ExportTarget, Offset, Op, ValueRef, ValueType};
use turnip_shader_abi::shader::text::parse_program;
use turnip_shader_abi::shader::{ShaderInfo, ShaderProgram, Ssa};
use turnip_shader_abi::{compile, AbiError, Callback, CompileError, CompiledShader, ShaderStage};

fn program(text: &str) -> ShaderProgram {
    match parse_program(text) {
        Ok(p) => p,
        Err(e) => panic!("{}", e),
    }
}

fn flat(text: &str) -> CompiledShader {
    compile(&program(text), FlatFrontend::default()).unwrap()
}

fn with_sets(text: &str) -> CompiledShader {
    let p = program(text);
    let layout = PipelineLayout::from_bindings(&p.info.bindings);
    compile(&p, DescriptorSetFrontend::with_layout(layout)).unwrap()
}

fn callbacks(shader: &CompiledShader) -> Vec<Callback> {
    shader.calls.iter().map(|c| c.callback()).collect()
}

fn bits(xs: &[f32]) -> Vec<u32> {
    xs.iter().map(|x| x.to_bits()).collect()
}

const FRAGMENT_ADD: &str = "
stage fragment
dcl_input loc(32) dl(0) n(4) flat
dcl_input loc(33) dl(1) n(4) flat
dcl_output loc(32) dl(0) n(4)
%0 = load_input dl(0)
%1 = load_input dl(1)
%2 = fadd %0 %1
store_output dl(0) %2
";

#[test]
fn test_fragment_shader_end_to_end() {
    let shader = flat(FRAGMENT_ADD);
    assert_eq!(shader.stage, ShaderStage::Fragment);
    assert_eq!(
        callbacks(&shader),
        vec![Callback::LoadInputs, Callback::LoadInputs, Callback::EmitOutputs]
    );
    assert_eq!(shader.calls[2], AbiCall::EmitOutputs { max_outputs: 1 });

    let mut m = Machine::new()
        .with_input(0, &bits(&[1.0, 2.0, 3.0, 4.0]))
        .with_input(1, &bits(&[0.5, 0.5, 0.5, 0.5]));
    m.run(&shader.ir).unwrap();
    let expected: Vec<Option<u32>> = bits(&[1.5, 2.5, 3.5, 4.5]).into_iter().map(Some).collect();
    assert_eq!(m.exports.len(), 1);
    assert_eq!(m.exports[0].0, ExportTarget::Mrt(0));
    assert_eq!(m.exports[0].1.to_vec(), expected);
}

const GEOMETRY_TRIANGLE: &str = "
stage geometry
dcl_gs max_vertices(3) vertices_in(3)
dcl_input loc(32) dl(0) n(4)
dcl_output loc(0) dl(0) n(4)
%0 = load_input dl(0) vertex(0)
store_output dl(0) %0
emit_vertex stream(0)
%1 = load_input dl(0) vertex(1)
store_output dl(0) %1
emit_vertex
%2 = load_input dl(0) vertex(2)
store_output dl(0) %2
emit_vertex
end_primitive stream(0)
";

#[test]
fn test_geometry_shader_end_to_end() {
    let shader = flat(GEOMETRY_TRIANGLE);
    use Callback::*;
    assert_eq!(
        callbacks(&shader),
        vec![LoadInputs, EmitVertex, LoadInputs, EmitVertex, LoadInputs, EmitVertex, EmitPrimitive, EmitOutputs]
    );

    let mut m = Machine::new();
    for v in 0..3u32 {
        m = m.with_arg(ArgSlot::EsgsVertexOffset(v as u8), &[v * 16]);
        for c in 0..4 {
            m.lds.insert(v * 16 + c, 10 * v + c);
        }
    }
    m.run(&shader.ir).unwrap();
    assert_eq!(m.gs_emits.len(), 3);
    for (v, (stream, values)) in m.gs_emits.iter().enumerate() {
        let v = v as u32;
        assert_eq!(*stream, 0);
        assert_eq!(values, &vec![Some(10 * v), Some(10 * v + 1), Some(10 * v + 2), Some(10 * v + 3)]);
    }
    assert_eq!(m.gs_cuts, vec![0]);
    assert!(m.exports.is_empty());
}

fn geometry_instance<F: AbiFrontend>(b: &mut Builder, frontend: F) -> AbiInstance<F> {
    match AbiInstance::new(b, frontend, &ShaderInfo::new(ShaderStage::Geometry)) {
        Ok(abi) => abi,
        Err(e) => panic!("setup failed: {}", e),
    }
}

#[test]
fn test_stream_bookkeeping() {
    let mut b = Builder::new();
    let mut abi = geometry_instance(&mut b, FlatFrontend::default());

    for _ in 0..3 {
        abi.emit_vertex(&mut b, 0, &[]).unwrap();
    }
    abi.emit_primitive(&mut b, 0).unwrap();
    abi.emit_vertex(&mut b, 1, &[]).unwrap();

    assert_eq!(
        abi.stream_stats(0),
        Some(StreamStats {
            vertices: 3,
            primitives: 1,
            open_vertices: 0
        })
    );
    assert_eq!(
        abi.stream_stats(1),
        Some(StreamStats {
            vertices: 1,
            primitives: 0,
            open_vertices: 1
        })
    );
    assert_eq!(abi.emit_vertex(&mut b, 4, &[]), Err(AbiError::InvalidStream(4)));
    assert_eq!(abi.emit_primitive(&mut b, 4), Err(AbiError::InvalidStream(4)));
    assert_eq!(abi.history().len(), 5);
}

/// Delegates to the flat frontend but has no geometry or tessellation callbacks
struct VertexOnly(FlatFrontend);
impl AbiFrontend for VertexOnly {
    fn name(&self) -> &'static str {
        "vertex_only"
    }
    fn clamp_shadow_reference(&self) -> bool {
        self.0.clamp_shadow_reference()
    }
    fn setup(&mut self, b: &mut Builder, info: &ShaderInfo) -> Result<AbiSetup, AbiError> {
        self.0.setup(b, info)
    }
    fn emit_outputs(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        max_outputs: usize,
        outputs: &[OutputSlot],
    ) -> Result<(), AbiError> {
        self.0.emit_outputs(abi, b, max_outputs, outputs)
    }
    fn load_inputs(&mut self, abi: &ShaderAbi, b: &mut Builder, req: &InputLoad) -> Result<ValueRef, AbiError> {
        self.0.load_inputs(abi, b, req)
    }
    fn load_resource(
        &mut self,
        abi: &ShaderAbi,
        b: &mut Builder,
        set: Option<u32>,
        binding: u32,
        index: ValueRef,
    ) -> Result<ValueRef, AbiError> {
        self.0.load_resource(abi, b, set, binding, index)
    }
    fn load_ubo(&mut self, abi: &ShaderAbi, b: &mut Builder, index: ValueRef) -> Result<ValueRef, AbiError> {
        self.0.load_ubo(abi, b, index)
    }
    fn load_ssbo(&mut self, abi: &ShaderAbi, b: &mut Builder, buffer: ValueRef, write: bool) -> Result<ValueRef, AbiError> {
        self.0.load_ssbo(abi, b, buffer, write)
    }
    fn load_sampler_desc(&mut self, abi: &ShaderAbi, b: &mut Builder, req: &SamplerDescLoad) -> Result<ValueRef, AbiError> {
        self.0.load_sampler_desc(abi, b, req)
    }
}

#[test]
fn test_missing_callbacks_are_reported() {
    let mut b = Builder::new();
    let mut abi = geometry_instance(&mut b, VertexOnly(FlatFrontend::default()));
    assert_eq!(
        abi.emit_vertex(&mut b, 0, &[]),
        Err(AbiError::MissingCallback {
            frontend: "vertex_only",
            callback: Callback::EmitVertex
        })
    );
    assert!(abi.history().is_empty());

    let result = compile(&program(GEOMETRY_TRIANGLE), VertexOnly(FlatFrontend::default()));
    assert!(matches!(
        result,
        Err(CompileError::Abi(AbiError::MissingCallback {
            callback: Callback::EmitVertex,
            ..
        }))
    ));
}

#[test]
fn test_lifecycle_and_stage_checks() {
    let mut b = Builder::new();
    let mut abi = AbiInstance::new(&mut b, FlatFrontend::default(), &ShaderInfo::new(ShaderStage::Fragment)).unwrap();
    assert_eq!(
        abi.emit_vertex(&mut b, 0, &[]),
        Err(AbiError::StageMismatch {
            callback: Callback::EmitVertex,
            stage: ShaderStage::Fragment
        })
    );

    abi.emit_outputs(&mut b, &[]).unwrap();
    assert!(abi.is_finished());
    let index = b.const_u32(0);
    assert_eq!(abi.load_ubo(&mut b, index), Err(AbiError::AfterFinish(Callback::LoadUbo)));
    assert_eq!(abi.emit_outputs(&mut b, &[]), Err(AbiError::AfterFinish(Callback::EmitOutputs)));
    assert_eq!(abi.history().len(), 1);
}

const SHADOW_SAMPLE: &str = "
stage fragment
dcl_binding set(0) binding(0) type(combined_image_sampler)
dcl_output loc(32) dl(0) n(4)
%0 = const f32 0x3f000000
%1 = const f32 0x3fc00000
%2 = tex texture(0) set(0) %0 cmp(%1)
store_output dl(0) %2
";

#[test]
fn test_shadow_reference_clamp_follows_the_frontend() {
    let is_clamp = |op: &Op| matches!(op, Op::Clamp01(_));

    let clamped = flat(SHADOW_SAMPLE);
    assert_eq!(clamped.ir.count(is_clamp), 1);
    let unclamped = with_sets(SHADOW_SAMPLE);
    assert_eq!(unclamped.ir.count(is_clamp), 0);

    for shader in [&clamped, &unclamped] {
        let kinds: Vec<AbiCall> = shader
            .calls
            .iter()
            .copied()
            .filter(|c| c.callback() == Callback::LoadSamplerDesc)
            .collect();
        assert_eq!(kinds.len(), 2);
    }
}

const UBO_READ: &str = "
stage vertex
dcl_binding set(0) binding(0) type(uniform_buffer)
dcl_output loc(0) dl(0) n(4)
%0 = resource set(0) binding(0)
%1 = load_ubo %0 offset(4) n(4)
store_output dl(0) %1
";

#[test]
fn test_uniform_buffer_through_descriptor_sets() {
    let shader = with_sets(UBO_READ);
    assert_eq!(
        callbacks(&shader),
        vec![Callback::LoadResource, Callback::LoadUbo, Callback::EmitOutputs]
    );

    let mut m = Machine::new().with_arg(ArgSlot::DescriptorSet(0), &[500]);
    m.write_memory(500, &[2000, 0, 0, 0]);
    m.write_memory(2004, &[1, 2, 3, 4]);
    m.run(&shader.ir).unwrap();
    assert_eq!(
        m.exports,
        vec![(ExportTarget::Position(0), [Some(1), Some(2), Some(3), Some(4)])]
    );
}

#[test]
fn test_uniform_buffer_through_flat_tables() {
    let shader = flat(
        "
stage vertex
dcl_output loc(0) dl(0) n(4)
%0 = const 0x2
%1 = load_ubo %0
store_output dl(0) %1
",
    );
    let offsets: Vec<Offset> = shader
        .ir
        .instrs()
        .iter()
        .filter_map(|i| match &i.op {
            Op::LoadDesc { offset, .. } => Some(*offset),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![Offset::Imm(8)]);
}

#[test]
fn test_undefined_value() {
    let p = program(
        "
stage fragment
dcl_output loc(32) dl(0) n(4)
store_output dl(0) %5
",
    );
    assert_eq!(
        compile(&p, FlatFrontend::default()).err(),
        Some(CompileError::UndefinedValue(Ssa(5)))
    );
}

#[test]
fn test_interpreter_reports_missing_components() {
    let mut b = Builder::new();
    let pair = b.const_vec(&[1, 2], ValueType::int(2));
    b.extract(pair, 2);
    assert_eq!(
        Machine::new().run(&b),
        Err(InterpError::MissingComponent {
            value: pair,
            component: 2
        })
    );

    let mut b = Builder::new();
    let void = b.push(Op::GsCut { stream: 0 }, ValueType::int(0));
    let one = b.const_u32(1);
    b.iadd(void, one);
    assert_eq!(
        Machine::new().run(&b),
        Err(InterpError::MissingComponent {
            value: void,
            component: 0
        })
    );

    // an argument supplied with too few dwords
    let mut b = Builder::new();
    let u = b.arg(ArgSlot::TesU);
    let v = b.arg(ArgSlot::TesV);
    b.vector(&[u, v]);
    let mut m = Machine::new()
        .with_arg(ArgSlot::TesU, &[])
        .with_arg(ArgSlot::TesV, &[0]);
    assert_eq!(
        m.run(&b),
        Err(InterpError::MissingComponent {
            value: u,
            component: 0
        })
    );
}
