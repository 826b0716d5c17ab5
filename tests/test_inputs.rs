use turnip_shader_abi::abi::{AbiInstance, InputLoad};
use turnip_shader_abi::frontends::FlatFrontend;
use turnip_shader_abi::ir::interp::Machine;
use turnip_shader_abi::ir::{ArgSlot, Builder, Op, ValueType};
use turnip_shader_abi::shader::{InterpMode, ShaderInfo, VarDecl, MAX_DRIVER_LOCATIONS};
use turnip_shader_abi::{AbiError, Callback, ShaderStage};

fn input(driver_location: u32, component: u8, n_components: u8) -> InputLoad {
    InputLoad {
        location: 32 + driver_location,
        driver_location,
        component,
        n_components,
        vertex_index: None,
        const_index: 0,
        ty: ValueType::float(n_components),
    }
}

fn vertex_info() -> ShaderInfo {
    let mut info = ShaderInfo::new(ShaderStage::Vertex);
    let mut array = VarDecl::new(33, 1, 4);
    array.array_len = 2;
    info.inputs = vec![VarDecl::new(32, 0, 4), array];
    info
}

#[test]
fn test_vertex_inputs_table() {
    let mut b = Builder::new();
    let abi = AbiInstance::new(&mut b, FlatFrontend::default(), &vertex_info()).unwrap();

    assert_eq!(abi.inputs().len(), 3);
    for slot in 0..3 {
        let v = abi.inputs().get(slot).unwrap();
        assert_eq!(b.get(v).unwrap().op, Op::Arg(ArgSlot::VertexInput(slot)));
    }
}

#[test]
fn test_load_inputs_is_idempotent() {
    let mut b = Builder::new();
    let mut abi = AbiInstance::new(&mut b, FlatFrontend::default(), &vertex_info()).unwrap();

    let first = abi.load_inputs(&mut b, &input(0, 0, 4)).unwrap();
    let len = b.len();
    let second = abi.load_inputs(&mut b, &input(0, 0, 4)).unwrap();
    assert_eq!(first, second);
    assert_eq!(b.len(), len);
    assert_eq!(Some(first), abi.inputs().get(0));

    let other = abi.load_inputs(&mut b, &input(1, 0, 4)).unwrap();
    assert_ne!(first, other);
    assert_eq!(abi.history().len(), 3);
}

#[test]
fn test_load_inputs_components() {
    let mut b = Builder::new();
    let mut abi = AbiInstance::new(&mut b, FlatFrontend::default(), &vertex_info()).unwrap();

    let yz = abi.load_inputs(&mut b, &input(0, 1, 2)).unwrap();
    let mut element = input(1, 0, 4);
    element.const_index = 1;
    let second_element = abi.load_inputs(&mut b, &element).unwrap();

    let mut m = Machine::new()
        .with_arg(ArgSlot::VertexInput(0), &[10, 11, 12, 13])
        .with_arg(ArgSlot::VertexInput(1), &[20, 21, 22, 23])
        .with_arg(ArgSlot::VertexInput(2), &[30, 31, 32, 33]);
    let values = m.run(&b).unwrap();
    assert_eq!(values[yz.index()], vec![11, 12]);
    assert_eq!(values[second_element.index()], vec![30, 31, 32, 33]);
}

#[test]
fn test_load_inputs_errors() {
    let mut b = Builder::new();
    let mut abi = AbiInstance::new(&mut b, FlatFrontend::default(), &vertex_info()).unwrap();

    assert_eq!(
        abi.load_inputs(&mut b, &input(5, 0, 4)),
        Err(AbiError::UnknownInput {
            driver_location: 5,
            const_index: 0
        })
    );
    assert_eq!(
        abi.load_inputs(&mut b, &input(0, 3, 2)),
        Err(AbiError::ComponentRange { component: 3, end: 5 })
    );
}

#[test]
fn test_fragment_inputs_are_interpolated() {
    let mut info = ShaderInfo::new(ShaderStage::Fragment);
    let mut flat = VarDecl::new(32, 0, 4);
    flat.interp = InterpMode::Flat;
    info.inputs = vec![flat, VarDecl::new(33, 1, 4)];

    let mut b = Builder::new();
    let mut abi = AbiInstance::new(&mut b, FlatFrontend::default(), &info).unwrap();
    let a = abi.load_inputs(&mut b, &input(0, 0, 4)).unwrap();
    let c = abi.load_inputs(&mut b, &input(1, 0, 4)).unwrap();
    assert_ne!(a, c);
    assert_eq!(
        b.get(a).unwrap().op,
        Op::Interp {
            driver_location: 0,
            flat: true
        }
    );
    assert_eq!(
        b.get(c).unwrap().op,
        Op::Interp {
            driver_location: 1,
            flat: false
        }
    );
}

fn geometry_info() -> ShaderInfo {
    let mut info = ShaderInfo::new(ShaderStage::Geometry);
    info.inputs = vec![VarDecl::new(32, 0, 4), VarDecl::new(33, 1, 4)];
    info.vertices_in = 3;
    info
}

#[test]
fn test_geometry_inputs_read_the_ring() {
    let mut b = Builder::new();
    let mut abi = AbiInstance::new(&mut b, FlatFrontend::default(), &geometry_info()).unwrap();
    // nothing is preloaded for geometry inputs
    assert!(abi.inputs().iter().all(|v| v.is_none()));

    let mut req = input(1, 2, 2);
    req.vertex_index = Some(1);
    let v = abi.load_inputs(&mut b, &req).unwrap();

    let mut m = Machine::new().with_arg(ArgSlot::EsgsVertexOffset(1), &[100]);
    // driver location 1, component 2
    m.lds.insert(100 + 4 + 2, 7);
    m.lds.insert(100 + 4 + 3, 8);
    let values = m.run(&b).unwrap();
    assert_eq!(values[v.index()], vec![7, 8]);
}

#[test]
fn test_geometry_input_vertex_checks() {
    let mut b = Builder::new();
    let mut abi = AbiInstance::new(&mut b, FlatFrontend::default(), &geometry_info()).unwrap();

    assert_eq!(
        abi.load_inputs(&mut b, &input(0, 0, 4)),
        Err(AbiError::MissingVertexIndex(ShaderStage::Geometry))
    );
    let mut req = input(0, 0, 4);
    req.vertex_index = Some(3);
    assert_eq!(
        abi.load_inputs(&mut b, &req),
        Err(AbiError::VertexOutOfRange { vertex: 3, max: 3 })
    );
}

#[test]
fn test_tess_stages_have_no_load_inputs() {
    let mut b = Builder::new();
    let info = ShaderInfo::new(ShaderStage::TessControl);
    let mut abi = AbiInstance::new(&mut b, FlatFrontend::default(), &info).unwrap();
    assert_eq!(
        abi.load_inputs(&mut b, &input(0, 0, 4)),
        Err(AbiError::StageMismatch {
            callback: Callback::LoadInputs,
            stage: ShaderStage::TessControl
        })
    );
}

#[test]
fn test_setup_rejects_bad_declarations() {
    let setup = |decl: VarDecl| {
        let mut info = ShaderInfo::new(ShaderStage::Vertex);
        info.inputs = vec![decl];
        let mut b = Builder::new();
        AbiInstance::new(&mut b, FlatFrontend::default(), &info).err()
    };

    let mut wide = VarDecl::new(32, 0, 4);
    wide.component = 255;
    assert_eq!(setup(wide), Some(AbiError::ComponentRange { component: 255, end: 255 }));

    assert_eq!(
        setup(VarDecl::new(32, u32::MAX, 4)),
        Some(AbiError::DriverLocationRange {
            driver_location: u32::MAX,
            slots: 1
        })
    );
    assert_eq!(
        setup(VarDecl::new(32, MAX_DRIVER_LOCATIONS, 4)),
        Some(AbiError::DriverLocationRange {
            driver_location: MAX_DRIVER_LOCATIONS,
            slots: 1
        })
    );
    assert_eq!(setup(VarDecl::new(32, MAX_DRIVER_LOCATIONS - 1, 4)), None);
}
