use test_case::test_case;

use crate::layout::{layout_from_signature, ArgSlot};

#[test_case("ptr", Some(ArgSlot::Pointer))]
#[test_case("pointer", Some(ArgSlot::Pointer))]
#[test_case("i32", Some(ArgSlot::I32))]
#[test_case("u32", Some(ArgSlot::I32))]
#[test_case("i64", Some(ArgSlot::I64))]
#[test_case("u64", Some(ArgSlot::I64))]
#[test_case("f32", Some(ArgSlot::F32))]
#[test_case("fp32", Some(ArgSlot::F32))]
#[test_case("f64", Some(ArgSlot::F64))]
#[test_case("fp64", Some(ArgSlot::F64))]
#[test_case("constexpr", None)]
#[test_case("half", None)]
fn parse_metadata_type(kind: &str, expected: Option<ArgSlot>) {
    assert_eq!(ArgSlot::parse(kind), expected);
}

#[test]
fn signature_pointer_and_scalar_tokens() {
    let layout = layout_from_signature("*fp32:16,*fp32,i64,1024,nullopt");
    assert_eq!(layout, vec![ArgSlot::Pointer, ArgSlot::Pointer, ArgSlot::I64]);
}

#[test]
fn signature_skips_constexpr_literals() {
    let layout = layout_from_signature("*fp16,4,512,2");
    assert_eq!(layout, vec![ArgSlot::Pointer]);

    let layout = layout_from_signature("-8,i32");
    assert_eq!(layout, vec![ArgSlot::I32]);
}

#[test]
fn signature_strips_specialization_suffixes() {
    let layout = layout_from_signature("i64:i32,u32:i32,*i8:16");
    assert_eq!(layout, vec![ArgSlot::I64, ArgSlot::I32, ArgSlot::Pointer]);
}

#[test]
fn signature_skips_value_one_elided_integers() {
    // A `<int>:1` token has no payload entry, so it must produce no slot.
    let layout = layout_from_signature("*fp32,i64:1,i64");
    assert_eq!(layout, vec![ArgSlot::Pointer, ArgSlot::I64]);
}

#[test]
fn signature_promotes_half_scalars() {
    let layout = layout_from_signature("fp16,bf16,f16");
    assert_eq!(layout, vec![ArgSlot::F32, ArgSlot::F32, ArgSlot::F32]);
}

#[test]
fn signature_unknown_token_defaults_to_i64() {
    let layout = layout_from_signature("mystery");
    assert_eq!(layout, vec![ArgSlot::I64]);
}

#[test]
fn empty_signature_is_empty_layout() {
    assert!(layout_from_signature("").is_empty());
}
