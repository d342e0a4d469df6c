//! Unit tests for the register/binding mapping and SPIR-V helpers

use super::*;

#[test]
fn test_binding_windows_per_class() {
    let register = |class, slot| Register { stage: ShaderStage::Vertex, class, slot };
    assert_eq!(binding_for(register(RegisterClass::ConstantBuffer, 0)), 0);
    assert_eq!(binding_for(register(RegisterClass::ShaderResource, 2)), 18);
    assert_eq!(binding_for(register(RegisterClass::UnorderedAccess, 5)), 37);
    assert_eq!(binding_for(register(RegisterClass::Sampler, 1)), 49);
}

#[test]
fn test_stage_windows_do_not_overlap() {
    let vs_t0 = Register { stage: ShaderStage::Vertex, class: RegisterClass::ShaderResource, slot: 0 };
    let ps_t0 = Register { stage: ShaderStage::Pixel, ..vs_t0 };
    assert_ne!(binding_for(vs_t0), binding_for(ps_t0));
    assert_eq!(binding_for(ps_t0), STAGE_BINDING_STRIDE + 16);
}

#[test]
fn test_register_for_inverts_binding_for() {
    for stage in ShaderStage::ALL {
        for class in [RegisterClass::ConstantBuffer, RegisterClass::ShaderResource, RegisterClass::UnorderedAccess, RegisterClass::Sampler] {
            for slot in [0, 7, SLOTS_PER_CLASS - 1] {
                let register = Register { stage, class, slot };
                assert_eq!(register_for(stage, binding_for(register)), Some(register));
            }
        }
    }
}

#[test]
fn test_register_for_rejects_other_windows() {
    let ps_b13 = binding_for(Register { stage: ShaderStage::Pixel, class: RegisterClass::ConstantBuffer, slot: 13 });
    assert_eq!(register_for(ShaderStage::Vertex, ps_b13), None);
    assert_eq!(register_for(ShaderStage::Compute, 0), None);
}

#[test]
fn test_register_shifts_for_compiler() {
    assert_eq!(register_shifts(ShaderStage::Vertex), [0, 16, 32, 48]);
    assert_eq!(register_shifts(ShaderStage::Compute), [320, 336, 352, 368]);
}

#[test]
fn test_counter_owner() {
    assert_eq!(counter_owner("counter.var.DeadList"), Some("DeadList"));
    assert_eq!(counter_owner("DeadList"), None);
}

#[test]
fn test_input_semantic_matching() {
    let input = ShaderInput { name: "in.var.TEXCOORD1".to_string(), location: 2 };
    assert!(input.matches("TEXCOORD", 1));
    assert!(input.matches("texcoord", 1));
    assert!(!input.matches("TEXCOORD", 0));

    let position = ShaderInput { name: "in.var.POSITION".to_string(), location: 0 };
    assert!(position.matches("POSITION", 0));
    assert!(!position.matches("POSITION", 1));
}

#[test]
fn test_spirv_words_validation() {
    assert!(spirv_words(&[0; 6]).is_err());
    assert!(spirv_words(&[0; 20]).is_err());

    let mut module = SPIRV_MAGIC.to_le_bytes().to_vec();
    module.extend_from_slice(&[0; 16]);
    let words = spirv_words(&module).unwrap();
    assert_eq!(words.len(), 5);
    assert_eq!(words[0], SPIRV_MAGIC);
}

#[test]
fn test_stage_flags() {
    assert_eq!(stage_to_vk(ShaderStage::Pixel), vk::ShaderStageFlags::FRAGMENT);
    assert_eq!(stage_to_vk(ShaderStage::Hull), vk::ShaderStageFlags::TESSELLATION_CONTROL);
    assert_eq!(stage_to_vk(ShaderStage::Compute), vk::ShaderStageFlags::COMPUTE);
}
