use std::collections::HashSet;

use turnip_shader_abi::abi::{AbiFrontend, AbiInstance, SamplerDescLoad};
use turnip_shader_abi::descriptor::BindingType;
use turnip_shader_abi::frontends::{BindingLayout, DescriptorSetFrontend, FlatFrontend, PipelineLayout, SetLayout};
use turnip_shader_abi::ir::interp::Machine;
use turnip_shader_abi::ir::{ArgSlot, Builder, Offset, Op, ValueRef};
use turnip_shader_abi::shader::ShaderInfo;
use turnip_shader_abi::{AbiError, DescriptorKind, ShaderStage};

fn fragment<F: AbiFrontend>(b: &mut Builder, frontend: F) -> AbiInstance<F> {
    match AbiInstance::new(b, frontend, &ShaderInfo::new(ShaderStage::Fragment)) {
        Ok(abi) => abi,
        Err(e) => panic!("setup failed: {}", e),
    }
}

fn sampler_req(kind: DescriptorKind, index: Option<ValueRef>) -> SamplerDescLoad {
    SamplerDescLoad {
        descriptor_set: None,
        base_index: 2,
        constant_index: 1,
        index,
        kind,
        image: false,
        write: false,
    }
}

fn address_arith(b: &Builder) -> usize {
    b.count(Op::is_address_arith)
}

fn desc_offset(b: &Builder, v: ValueRef) -> Offset {
    match &b.get(v).expect("handle from this builder").op {
        Op::LoadDesc { offset, .. } => *offset,
        other => panic!("expected a descriptor load, got {}", other),
    }
}

#[test]
fn test_kind_taxonomy() {
    assert_eq!(DescriptorKind::ALL.len(), 4);
    for (i, kind) in DescriptorKind::ALL.iter().enumerate() {
        assert_eq!(DescriptorKind::from_raw(i as u32), Some(*kind));
        assert_eq!(DescriptorKind::from_name(kind.name()), Some(*kind));
    }
    assert_eq!(DescriptorKind::from_raw(4), None);
}

#[test]
fn test_flat_kinds_give_distinct_handles() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, FlatFrontend::default());

    let mut handles = HashSet::new();
    for kind in DescriptorKind::ALL {
        let h = abi.load_sampler_desc(&mut b, &sampler_req(kind, None)).unwrap();
        assert_eq!(b.ty(h).n_components, kind.dwords());
        handles.insert(h);
    }
    assert_eq!(handles.len(), 4);
}

#[test]
fn test_flat_constant_index_is_immediate() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, FlatFrontend::default());

    let before = address_arith(&b);
    let h = abi
        .load_sampler_desc(&mut b, &sampler_req(DescriptorKind::Sampler, None))
        .unwrap();
    assert_eq!(address_arith(&b), before);
    // slot 3, sampler state at dword 12 of the slot
    assert_eq!(desc_offset(&b, h), Offset::Imm(3 * 16 + 12));
}

#[test]
fn test_flat_dynamic_index_combines_offsets() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, FlatFrontend::default());

    let index = b.arg(ArgSlot::DrawId);
    let before = address_arith(&b);
    let h = abi
        .load_sampler_desc(&mut b, &sampler_req(DescriptorKind::Sampler, Some(index)))
        .unwrap();
    assert!(address_arith(&b) > before);

    let mut m = Machine::new()
        .with_arg(ArgSlot::DrawId, &[2])
        .with_arg(ArgSlot::SamplerTable, &[1000]);
    // (dynamic 2 + base 2 + constant 1) * 16 + 12
    m.write_memory(1000 + 5 * 16 + 12, &[0xa, 0xb, 0xc, 0xd]);
    let values = m.run(&b).unwrap();
    assert_eq!(values[h.index()], vec![0xa, 0xb, 0xc, 0xd]);
}

#[test]
fn test_flat_image_slot_has_no_sampler() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, FlatFrontend::default());

    let mut req = sampler_req(DescriptorKind::Sampler, None);
    req.image = true;
    assert!(matches!(
        abi.load_sampler_desc(&mut b, &req),
        Err(AbiError::UnsupportedDescriptor {
            kind: DescriptorKind::Sampler,
            ..
        })
    ));

    req.kind = DescriptorKind::Image;
    let h = abi.load_sampler_desc(&mut b, &req).unwrap();
    assert_eq!(desc_offset(&b, h), Offset::Imm(3 * 8));
}

#[test]
fn test_flat_writable_descriptors_are_not_merged() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, FlatFrontend::default());

    let mut req = sampler_req(DescriptorKind::Image, None);
    req.image = true;
    let ro_a = abi.load_sampler_desc(&mut b, &req).unwrap();
    let ro_b = abi.load_sampler_desc(&mut b, &req).unwrap();
    assert_eq!(ro_a, ro_b);

    req.write = true;
    let rw_a = abi.load_sampler_desc(&mut b, &req).unwrap();
    let rw_b = abi.load_sampler_desc(&mut b, &req).unwrap();
    assert_ne!(rw_a, rw_b);
}

#[test]
fn test_foreign_index_is_rejected() {
    let mut other = Builder::new();
    let foreign = other.arg(ArgSlot::DrawId);

    let mut b = Builder::new();
    let mut abi = fragment(&mut b, FlatFrontend::default());
    assert_eq!(
        abi.load_sampler_desc(&mut b, &sampler_req(DescriptorKind::Image, Some(foreign))),
        Err(AbiError::ForeignValue(foreign))
    );
    // a rejected call is not part of the history
    assert!(abi.history().is_empty());
}

fn test_layout() -> PipelineLayout {
    PipelineLayout {
        sets: vec![SetLayout {
            bindings: vec![
                BindingLayout::new(0, BindingType::UniformBuffer, 1),
                BindingLayout::new(1, BindingType::CombinedImageSampler, 4),
                BindingLayout::new(2, BindingType::Sampler, 2)
                    .with_immutable_samplers(vec![[1, 2, 3, 4], [5, 6, 7, 8]]),
                BindingLayout::new(3, BindingType::StorageImage, 1),
            ],
        }],
    }
}

fn set_req(binding: u32, constant_index: u32, kind: DescriptorKind, index: Option<ValueRef>) -> SamplerDescLoad {
    SamplerDescLoad {
        descriptor_set: Some(0),
        base_index: binding,
        constant_index,
        index,
        kind,
        image: false,
        write: false,
    }
}

#[test]
fn test_descriptor_set_layout_offsets() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, DescriptorSetFrontend::with_layout(test_layout()));

    // binding 1 starts after the 4-dword uniform buffer
    let fmask = abi
        .load_sampler_desc(&mut b, &set_req(1, 2, DescriptorKind::Fmask, None))
        .unwrap();
    assert_eq!(desc_offset(&b, fmask), Offset::Imm(4 + 2 * 24 + 8));
    let sampler = abi
        .load_sampler_desc(&mut b, &set_req(1, 0, DescriptorKind::Sampler, None))
        .unwrap();
    assert_eq!(desc_offset(&b, sampler), Offset::Imm(4 + 16));
}

#[test]
fn test_descriptor_set_dynamic_index() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, DescriptorSetFrontend::with_layout(test_layout()));

    let index = b.arg(ArgSlot::DrawId);
    let h = abi
        .load_sampler_desc(&mut b, &set_req(1, 1, DescriptorKind::Image, Some(index)))
        .unwrap();

    let mut m = Machine::new()
        .with_arg(ArgSlot::DrawId, &[1])
        .with_arg(ArgSlot::DescriptorSet(0), &[400]);
    // binding base 4, element (1 + 1) * 24
    m.write_memory(400 + 4 + 2 * 24, &[1, 2, 3, 4, 5, 6, 7, 8]);
    let values = m.run(&b).unwrap();
    assert_eq!(values[h.index()], vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_immutable_sampler_is_constant() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, DescriptorSetFrontend::with_layout(test_layout()));

    let h = abi
        .load_sampler_desc(&mut b, &set_req(2, 1, DescriptorKind::Sampler, None))
        .unwrap();
    assert_eq!(b.as_const(h), Some(&[5, 6, 7, 8][..]));
    assert_eq!(b.count(|op| matches!(op, Op::LoadDesc { .. })), 0);
}

#[test]
fn test_descriptor_set_errors() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, DescriptorSetFrontend::with_layout(test_layout()));

    let mut req = set_req(1, 0, DescriptorKind::Image, None);
    req.descriptor_set = None;
    assert_eq!(abi.load_sampler_desc(&mut b, &req), Err(AbiError::MissingDescriptorSet));

    assert_eq!(
        abi.load_sampler_desc(&mut b, &set_req(7, 0, DescriptorKind::Image, None)),
        Err(AbiError::UnknownBinding { set: 0, binding: 7 })
    );
    assert_eq!(
        abi.load_sampler_desc(&mut b, &set_req(1, 4, DescriptorKind::Image, None)),
        Err(AbiError::IndexOutOfRange {
            set: 0,
            binding: 1,
            index: 4
        })
    );
    assert!(matches!(
        abi.load_sampler_desc(&mut b, &set_req(3, 0, DescriptorKind::Sampler, None)),
        Err(AbiError::UnsupportedDescriptor {
            kind: DescriptorKind::Sampler,
            ..
        })
    ));
}

#[test]
fn test_clamp_defaults() {
    let mut b = Builder::new();
    assert!(fragment(&mut b, FlatFrontend::default()).clamp_shadow_reference());
    let mut b = Builder::new();
    assert!(!fragment(&mut b, DescriptorSetFrontend::with_layout(test_layout())).clamp_shadow_reference());
}

#[test]
fn test_flat_handles_distinct_across_kinds_and_indices() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, FlatFrontend::default());

    let mut handles = HashSet::new();
    for kind in DescriptorKind::ALL {
        for constant_index in 0..4 {
            let mut req = sampler_req(kind, None);
            req.constant_index = constant_index;
            handles.insert(abi.load_sampler_desc(&mut b, &req).unwrap());
        }
    }
    assert_eq!(handles.len(), 16);
}

#[test]
fn test_set_handles_distinct_across_kinds_and_indices() {
    let layout = PipelineLayout {
        sets: vec![SetLayout {
            bindings: vec![
                BindingLayout::new(0, BindingType::CombinedImageSampler, 3),
                BindingLayout::new(1, BindingType::Sampler, 3)
                    .with_immutable_samplers(vec![[1, 2, 3, 4], [1, 2, 3, 4], [1, 2, 3, 4]]),
                BindingLayout::new(2, BindingType::UniformTexelBuffer, 3),
            ],
        }],
    };
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, DescriptorSetFrontend::with_layout(layout));

    let loads = [
        (0, DescriptorKind::Image),
        (0, DescriptorKind::Fmask),
        (0, DescriptorKind::Sampler),
        (1, DescriptorKind::Sampler),
        (2, DescriptorKind::Buffer),
    ];
    let mut handles = HashSet::new();
    for (binding, kind) in loads {
        for constant_index in 0..3 {
            handles.insert(
                abi.load_sampler_desc(&mut b, &set_req(binding, constant_index, kind, None))
                    .unwrap(),
            );
        }
    }
    assert_eq!(handles.len(), loads.len() * 3);
}

#[test]
fn test_identical_immutable_samplers_stay_distinct() {
    let layout = PipelineLayout {
        sets: vec![SetLayout {
            bindings: vec![BindingLayout::new(0, BindingType::Sampler, 2)
                .with_immutable_samplers(vec![[1, 2, 3, 4], [1, 2, 3, 4]])],
        }],
    };
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, DescriptorSetFrontend::with_layout(layout));

    let first = abi
        .load_sampler_desc(&mut b, &set_req(0, 0, DescriptorKind::Sampler, None))
        .unwrap();
    let second = abi
        .load_sampler_desc(&mut b, &set_req(0, 1, DescriptorKind::Sampler, None))
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(b.as_const(first), b.as_const(second));
    // the same element resolves to the same handle
    let again = abi
        .load_sampler_desc(&mut b, &set_req(0, 1, DescriptorKind::Sampler, None))
        .unwrap();
    assert_eq!(again, second);

    let values = Machine::new().run(&b).unwrap();
    assert_eq!(values[first.index()], vec![1, 2, 3, 4]);
    assert_eq!(values[second.index()], vec![1, 2, 3, 4]);
}

#[test]
fn test_flat_index_overflow_is_out_of_range() {
    let mut b = Builder::new();
    let mut abi = fragment(&mut b, FlatFrontend::default());

    let mut req = sampler_req(DescriptorKind::Sampler, None);
    req.constant_index = u32::MAX;
    assert_eq!(
        abi.load_sampler_desc(&mut b, &req),
        Err(AbiError::IndexOutOfRange {
            set: 0,
            binding: 2,
            index: u32::MAX
        })
    );
}
