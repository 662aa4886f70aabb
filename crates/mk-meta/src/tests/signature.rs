use crate::registry::TypeRegistry;
use crate::{Descriptor, Signature};

fn sig(descriptors: &[Descriptor]) -> Signature {
    Signature::new(descriptors.to_vec())
}

#[test]
fn shorter_formal_is_invocable() {
    let registry = TypeRegistry::with_builtins();
    let actual = sig(&[Descriptor::of::<i32>(), Descriptor::of::<String>()]);
    assert!(registry.invocable_with(&sig(&[]), &actual));
    assert!(registry.invocable_with(&sig(&[Descriptor::of::<i32>()]), &actual));
    assert!(!registry.invocable_with(
        &sig(&[
            Descriptor::of::<i32>(),
            Descriptor::of::<String>(),
            Descriptor::of::<bool>()
        ]),
        &actual
    ));
}

#[test]
fn convertible_arguments_are_invocable() {
    let registry = TypeRegistry::with_builtins();
    let actual = sig(&[Descriptor::of::<i32>()]);
    assert!(registry.invocable_with(&sig(&[Descriptor::of::<f64>()]), &actual));
    assert!(!registry.invocable_with(&sig(&[Descriptor::of::<Vec<u8>>()]), &actual));
}

#[test]
fn mutable_reference_needs_exact_mutable_reference() {
    let registry = TypeRegistry::with_builtins();
    let formal = sig(&[Descriptor::reference_to::<i32>()]);
    assert!(registry.invocable_with(&formal, &sig(&[Descriptor::reference_to::<i32>()])));
    assert!(!registry.invocable_with(&formal, &sig(&[Descriptor::const_reference_to::<i32>()])));
    assert!(!registry.invocable_with(&formal, &sig(&[Descriptor::of::<i32>()])));
    assert!(!registry.invocable_with(&formal, &sig(&[Descriptor::reference_to::<i16>()])));
}

#[test]
fn const_reference_accepts_values() {
    let registry = TypeRegistry::with_builtins();
    let formal = sig(&[Descriptor::const_reference_to::<String>()]);
    assert!(registry.invocable_with(&formal, &sig(&[Descriptor::of::<String>()])));
    assert!(registry.invocable_with(&formal, &sig(&[Descriptor::reference_to::<String>()])));
}

#[test]
fn signature_display() {
    let signature = sig(&[Descriptor::of::<i32>(), Descriptor::const_reference_to::<bool>()]);
    assert_eq!(signature.to_string(), "(i32, &bool)");
}
