use std::sync::Arc;

use mk_meta::Value;
use parking_lot::Mutex;

use crate::binding::{Binding, BindingPolicy};
use crate::property::Property;
use crate::Error;

fn watch<T: mk_meta::MetaValue>(property: &Property<T>) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    property
        .changed()
        .connect(move |value: T| sink.lock().push(value))
        .unwrap();
    seen
}

#[test]
fn set_fires_change_once_per_distinct_value() {
    let property = Property::new(0_i32);
    let seen = watch(&property);

    property.set(5).unwrap();
    property.set(5).unwrap();
    property.set(6).unwrap();

    assert_eq!(property.get(), 6);
    assert_eq!(*seen.lock(), vec![5, 6]);
}

#[test]
fn read_only_property_takes_writes_from_its_writer() {
    let (property, writer) = Property::read_only(1_u8);
    let seen = watch(&property);

    assert!(matches!(property.set(2), Err(Error::WriteReadOnly(id)) if id == property.id()));
    assert!(matches!(property.reset(), Err(Error::WriteReadOnly(_))));
    writer.set(3).unwrap();

    assert_eq!(property.get(), 3);
    assert_eq!(*seen.lock(), vec![3]);
    assert_eq!(writer.property_id(), property.id());
}

#[test]
fn set_value_converts_to_declared_type() {
    let property = Property::new(0_i64);
    property.set_value(Value::new(12_i32)).unwrap();
    assert_eq!(property.get(), 12);

    let err = property.set_value(Value::new(vec![1_u8])).unwrap_err();
    assert!(err.is_bad_conversion());
    assert_eq!(property.get(), 12);
}

#[test]
fn reset_restores_default_and_drops_bindings() {
    let source = Property::new(4_i32);
    let target = Property::new(1_i32);
    let binding = target.bind_to(&source).unwrap();
    assert_eq!(target.get(), 4);

    target.reset().unwrap();
    assert_eq!(target.get(), 1);
    assert_eq!(target.default_value(), 1);
    assert!(!binding.is_attached());
    assert!(target.bindings().is_empty());

    source.set(8).unwrap();
    assert_eq!(target.get(), 1);
}

#[test]
fn change_signal_fires_after_subscribers_updated() {
    let a = Property::new(1_i32);
    let b = Property::new(0_i32);
    b.bind_to(&a).unwrap();

    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    let follower = b.clone();
    a.changed()
        .connect(move |_: i32| *sink.lock() = Some(follower.get()))
        .unwrap();

    a.set(9).unwrap();
    assert_eq!(*observed.lock(), Some(9));
}

#[test]
fn failing_subscriber_does_not_starve_the_others() {
    let a = Property::new(1_i32);
    let strict = Property::new(0_i32);
    let doubled = Property::new(0_i32);
    let seen = watch(&a);

    let source = a.clone();
    Binding::try_expression(move || match source.get() {
        value if value > 1 => Err(Error::slot("too large")),
        value => Ok(value),
    })
    .attach(&strict)
    .unwrap();
    let source = a.clone();
    doubled.bind_with(move || source.get() * 2).unwrap();
    assert_eq!(doubled.get(), 2);

    let err = a.set(5).unwrap_err();
    assert!(matches!(err, Error::Slot(reason) if reason == "too large"));
    assert_eq!(a.get(), 5);
    assert_eq!(strict.get(), 1);
    assert_eq!(doubled.get(), 10);
    assert_eq!(*seen.lock(), vec![5]);
}

#[test]
fn binding_write_detaches_other_detach_on_write_bindings() {
    let a = Property::new(1_i32);
    let c = Property::new(2_i32);
    let target = Property::new(0_i32);
    let lower = target.bind_to(&a).unwrap();
    assert_eq!(lower.policy(), BindingPolicy::DetachOnWrite);

    let upper = Binding::from_property(&c).with_policy(BindingPolicy::KeepOnWrite);
    upper.attach(&target).unwrap();
    assert_eq!(target.get(), 2);
    assert!(!lower.is_attached());
    assert_eq!(target.bindings(), vec![upper.clone()]);

    c.set(3).unwrap();
    assert_eq!(target.get(), 3);
    assert!(upper.is_attached());
}

#[test]
fn clones_share_state() {
    let property = Property::new(String::from("a"));
    let alias = property.clone();
    alias.set("b".to_string()).unwrap();
    assert_eq!(property.get(), "b");
    assert_eq!(property.id(), alias.id());
}

#[test]
fn descriptor_matches_value_type() {
    let property = Property::new(1.5_f64);
    assert!(property.core().descriptor().same_type(&mk_meta::Descriptor::of::<f64>()));
    assert!(!property.is_read_only());
    assert_eq!(property.core().peek(), Value::new(1.5_f64));
}
