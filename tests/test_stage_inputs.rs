use turnip_shader_abi::abi::{
    AbiFrontend, AbiInstance, AbiSetup, Callback, InputLoad, InputsTable, OutputSlot, SamplerDescLoad, ShaderAbi,
};
use turnip_shader_abi::frontends::FlatFrontend;
use turnip_shader_abi::ir::{ArgSlot, Builder, Op, ValueRef};
use turnip_shader_abi::shader::{ShaderInfo, VarDecl};
use turnip_shader_abi::{AbiError, ShaderStage, StageInput, StageInputs};

#[test]
fn test_inputs_of_other_stages_are_not_applicable() {
    for stage in ShaderStage::ALL {
        let inputs = StageInputs::empty(stage);
        assert_eq!(inputs.stage(), stage);
        for input in StageInput::ALL {
            match inputs.get(input) {
                Err(AbiError::StageInputNotApplicable { input: i, stage: s }) => {
                    assert_eq!((i, s), (input, stage));
                    assert_ne!(input.stage(), stage);
                }
                Err(AbiError::StageInputUnset(i)) => {
                    assert_eq!(i, input);
                    assert_eq!(input.stage(), stage);
                }
                other => panic!("{} in {} shader: unexpected {:?}", input, stage, other),
            }
        }
    }
}

#[test]
fn test_input_names_roundtrip() {
    for input in StageInput::ALL {
        assert_eq!(StageInput::from_name(input.name()), Some(input));
    }
    for stage in ShaderStage::ALL {
        assert_eq!(ShaderStage::from_name(stage.name()), Some(stage));
    }
}

#[test]
fn test_requested_inputs_are_preloaded() {
    let mut info = ShaderInfo::new(ShaderStage::Vertex);
    info.system_values = vec![StageInput::VertexId, StageInput::InstanceId];

    let mut b = Builder::new();
    let abi = AbiInstance::new(&mut b, FlatFrontend::default(), &info).unwrap();

    let vertex_id = abi.stage_input(StageInput::VertexId).unwrap();
    let instance_id = abi.stage_input(StageInput::InstanceId).unwrap();
    assert_ne!(vertex_id, instance_id);
    assert_eq!(b.get(vertex_id).unwrap().op, Op::Arg(ArgSlot::VertexId));

    assert_eq!(
        abi.stage_input(StageInput::BaseVertex),
        Err(AbiError::StageInputUnset(StageInput::BaseVertex))
    );
    assert_eq!(
        abi.stage_input(StageInput::FragPos(0)),
        Err(AbiError::StageInputNotApplicable {
            input: StageInput::FragPos(0),
            stage: ShaderStage::Vertex
        })
    );
    assert_eq!(abi.stage_inputs().iter().count(), 2);

    let vs = abi.stage_inputs().as_vertex().unwrap();
    assert_eq!(vs.vertex_id, Some(vertex_id));
    assert_eq!(
        abi.stage_inputs().as_fragment(),
        Err(AbiError::SetupMismatch {
            expected: ShaderStage::Fragment,
            found: ShaderStage::Vertex
        })
    );
}

#[test]
fn test_fragment_position_components() {
    let mut info = ShaderInfo::new(ShaderStage::Fragment);
    info.system_values = vec![StageInput::FragPos(0), StageInput::FragPos(3), StageInput::FrontFace];

    let mut b = Builder::new();
    let abi = AbiInstance::new(&mut b, FlatFrontend::default(), &info).unwrap();
    let fs = abi.stage_inputs().as_fragment().unwrap();
    assert!(fs.frag_pos[0].is_some());
    assert!(fs.frag_pos[1].is_none());
    assert!(fs.frag_pos[3].is_some());
    assert!(fs.front_face.is_some());
    assert!(fs.sample_coverage.is_none());
}

#[test]
fn test_requesting_another_stages_input_fails() {
    let mut info = ShaderInfo::new(ShaderStage::Vertex);
    info.system_values = vec![StageInput::FrontFace];

    let mut b = Builder::new();
    let result = AbiInstance::new(&mut b, FlatFrontend::default(), &info);
    assert_eq!(
        result.err(),
        Some(AbiError::StageInputNotApplicable {
            input: StageInput::FrontFace,
            stage: ShaderStage::Vertex
        })
    );
}

#[test]
fn test_callback_applicability() {
    use Callback::*;
    use ShaderStage::*;

    for cb in [EmitOutputs, LoadUbo, LoadSsbo, LoadSamplerDesc, LoadResource] {
        assert!(ShaderStage::ALL.iter().all(|s| s.allows(cb)), "{}", cb);
    }
    let only = |cb: Callback, stages: &[ShaderStage]| {
        for s in ShaderStage::ALL {
            assert_eq!(s.allows(cb), stages.contains(&s), "{} in {}", cb, s);
        }
    };
    only(LoadInputs, &[Vertex, Geometry, Fragment]);
    only(EmitVertex, &[Geometry]);
    only(EmitPrimitive, &[Geometry]);
    only(LoadTessVaryings, &[TessControl, TessEval]);
    only(LoadPatchVerticesIn, &[TessControl, TessEval]);
    only(StoreTcsOutputs, &[TessControl]);
    only(LoadTessCoord, &[TessEval]);
    only(LoadTessLevel, &[TessEval]);
    assert_eq!(Callback::ALL.len(), 13);
}

/// Hands back whatever setup it was built with
struct CannedSetup {
    setup: Option<AbiSetup>,
}
impl AbiFrontend for CannedSetup {
    fn name(&self) -> &'static str {
        "canned"
    }
    fn clamp_shadow_reference(&self) -> bool {
        false
    }
    fn setup(&mut self, _b: &mut Builder, _info: &ShaderInfo) -> Result<AbiSetup, AbiError> {
        Ok(self.setup.take().expect("setup called once"))
    }
    fn emit_outputs(&mut self, _: &ShaderAbi, _: &mut Builder, _: usize, _: &[OutputSlot]) -> Result<(), AbiError> {
        Ok(())
    }
    fn load_inputs(&mut self, _: &ShaderAbi, b: &mut Builder, _: &InputLoad) -> Result<ValueRef, AbiError> {
        Ok(b.const_u32(0))
    }
    fn load_resource(
        &mut self,
        _: &ShaderAbi,
        _: &mut Builder,
        _: Option<u32>,
        _: u32,
        index: ValueRef,
    ) -> Result<ValueRef, AbiError> {
        Ok(index)
    }
    fn load_ubo(&mut self, _: &ShaderAbi, _: &mut Builder, index: ValueRef) -> Result<ValueRef, AbiError> {
        Ok(index)
    }
    fn load_ssbo(&mut self, _: &ShaderAbi, _: &mut Builder, buffer: ValueRef, _: bool) -> Result<ValueRef, AbiError> {
        Ok(buffer)
    }
    fn load_sampler_desc(&mut self, _: &ShaderAbi, b: &mut Builder, _: &SamplerDescLoad) -> Result<ValueRef, AbiError> {
        Ok(b.const_u32(0))
    }
}

#[test]
fn test_setup_is_checked() {
    let info = ShaderInfo::new(ShaderStage::Geometry);
    let mut b = Builder::new();
    let frontend = CannedSetup {
        setup: Some(AbiSetup {
            stage_inputs: StageInputs::empty(ShaderStage::Vertex),
            inputs: InputsTable::new(0),
        }),
    };
    assert_eq!(
        AbiInstance::new(&mut b, frontend, &info).err(),
        Some(AbiError::SetupMismatch {
            expected: ShaderStage::Geometry,
            found: ShaderStage::Vertex
        })
    );

    let mut info = ShaderInfo::new(ShaderStage::Vertex);
    let mut array = VarDecl::new(32, 0, 4);
    array.array_len = 3;
    info.inputs = vec![array];
    let frontend = CannedSetup {
        setup: Some(AbiSetup {
            stage_inputs: StageInputs::empty(ShaderStage::Vertex),
            inputs: InputsTable::new(1),
        }),
    };
    assert_eq!(
        AbiInstance::new(&mut b, frontend, &info).err(),
        Some(AbiError::InputsTableSize { expected: 3, found: 1 })
    );
}

#[test]
fn test_setup_handles_must_belong_to_the_compilation() {
    let mut other = Builder::new();
    let foreign = other.arg(ArgSlot::VertexId);

    let mut info = ShaderInfo::new(ShaderStage::Vertex);
    info.inputs = vec![VarDecl::new(32, 0, 4)];
    let mut inputs = InputsTable::new(1);
    inputs.set(0, foreign);
    let frontend = CannedSetup {
        setup: Some(AbiSetup {
            stage_inputs: StageInputs::empty(ShaderStage::Vertex),
            inputs,
        }),
    };
    let mut b = Builder::new();
    assert_eq!(
        AbiInstance::new(&mut b, frontend, &info).err(),
        Some(AbiError::ForeignValue(foreign))
    );
}
