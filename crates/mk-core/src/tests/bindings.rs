use crate::binding::{bind_properties, bind_property_cores, untracked, Binding, BindingGroup, BindingPolicy, BindingState};
use crate::property::Property;
use crate::Error;

#[test]
fn only_top_of_stack_is_enabled() {
    let target = Property::new(0_i32);
    let lower = Binding::expression(|| 1_i32).with_policy(BindingPolicy::KeepOnWrite);
    let upper = Binding::expression(|| 2_i32);

    lower.attach(&target).unwrap();
    assert_eq!(target.get(), 1);
    upper.attach(&target).unwrap();
    assert_eq!(target.get(), 2);

    assert!(upper.is_enabled());
    assert!(!lower.is_enabled());
    assert_eq!(target.current_binding(), Some(upper.clone()));
    assert_eq!(target.bindings(), vec![lower.clone(), upper.clone()]);

    upper.detach().unwrap();
    assert!(lower.is_enabled());
    assert_eq!(target.get(), 1);
}

#[test]
fn dependencies_mirror_subscribers() {
    let a = Property::new(2_i32);
    let b = Property::new(3_i32);
    let sum = Property::new(0_i32);
    let (ra, rb) = (a.clone(), b.clone());
    let binding = sum.bind_with(move || ra.get() + rb.get()).unwrap();

    let mut dependencies = binding.dependencies();
    dependencies.sort();
    let mut expected = vec![a.id(), b.id()];
    expected.sort();
    assert_eq!(dependencies, expected);
    assert_eq!(a.core().subscriber_ids(), vec![binding.id()]);
    assert_eq!(b.core().subscriber_ids(), vec![binding.id()]);

    binding.detach().unwrap();
    assert!(binding.dependencies().is_empty());
    assert!(a.core().subscriber_ids().is_empty());
    assert!(b.core().subscriber_ids().is_empty());
}

#[test]
fn dependencies_follow_the_branch_taken() {
    let use_left = Property::new(true);
    let left = Property::new(1_i32);
    let right = Property::new(2_i32);
    let out = Property::new(0_i32);
    let (flag, l, r) = (use_left.clone(), left.clone(), right.clone());
    let binding = out
        .bind_with(move || if flag.get() { l.get() } else { r.get() })
        .unwrap();
    assert_eq!(out.get(), 1);

    right.set(20).unwrap();
    assert_eq!(out.get(), 1);
    use_left.set(false).unwrap();
    assert_eq!(out.get(), 20);
    assert!(!binding.dependencies().contains(&left.id()));

    left.set(10).unwrap();
    assert_eq!(out.get(), 20);
    assert_eq!(binding.evaluations(), 2);
}

#[test]
fn untracked_reads_are_not_dependencies() {
    let tracked = Property::new(1_i32);
    let hidden = Property::new(100_i32);
    let out = Property::new(0_i32);
    let (t, h) = (tracked.clone(), hidden.clone());
    let binding = out.bind_with(move || t.get() + untracked(|| h.get())).unwrap();
    assert_eq!(out.get(), 101);

    hidden.set(200).unwrap();
    assert_eq!(out.get(), 101);
    tracked.set(2).unwrap();
    assert_eq!(out.get(), 202);
    assert_eq!(binding.dependencies(), vec![tracked.id()]);
}

#[test]
fn attach_and_detach_misuse() {
    let target = Property::new(0_i32);
    let binding = Binding::expression(|| 5_i32);
    binding.attach(&target).unwrap();
    assert!(matches!(binding.attach(&target), Err(Error::BindingAlreadyAttached(id)) if id == binding.id()));

    binding.detach().unwrap();
    assert_eq!(binding.state(), BindingState::Detached);
    assert!(matches!(binding.detach(), Err(Error::BindingNotAttached(_))));

    let other = Property::new(0_i32);
    assert!(matches!(other.remove_binding(&binding), Err(Error::BindingNotAttached(_))));

    let (read_only, _writer) = Property::read_only(0_i32);
    assert!(matches!(binding.attach(&read_only), Err(Error::WriteReadOnly(_))));
    assert_eq!(binding.state(), BindingState::Detached);
}

#[test]
fn dropped_source_invalidates_binding() {
    let source = Property::new(3_i32);
    let target = Property::new(0_i32);
    let binding = target.bind_to(&source).unwrap();
    assert_eq!(target.get(), 3);

    drop(source);
    assert_eq!(binding.state(), BindingState::Invalid);
    assert!(target.bindings().is_empty());
    assert_eq!(target.get(), 3);
    assert!(matches!(binding.attach(&target), Err(Error::InvalidBinding(_))));
}

#[test]
fn keep_on_write_survives_direct_writes() {
    let source = Property::new(1_i32);
    let target = Property::new(0_i32);
    let binding = Binding::from_property(&source).with_policy(BindingPolicy::KeepOnWrite);
    binding.attach(&target).unwrap();

    target.set(50).unwrap();
    assert!(binding.is_attached());
    assert_eq!(target.get(), 50);

    source.set(2).unwrap();
    assert_eq!(target.get(), 2);
}

#[test]
fn suspended_binding_catches_up_when_resumed() {
    let source = Property::new(1_i32);
    let target = Property::new(0_i32);
    let binding = target.bind_to(&source).unwrap();

    binding.set_enabled(false).unwrap();
    assert!(!binding.is_enabled());
    assert!(target.current_binding().is_none());
    source.set(7).unwrap();
    assert_eq!(target.get(), 1);

    binding.set_enabled(true).unwrap();
    assert_eq!(target.get(), 7);
}

#[test]
fn group_shares_enable_state_and_detach() {
    let source = Property::new(1_i32);
    let first = Property::new(0_i32);
    let second = Property::new(0_i32);
    let group = BindingGroup::new("mirror");

    let a = Binding::from_property(&source);
    let b = Binding::from_property(&source);
    group.add(&a);
    group.add(&b);
    a.attach(&first).unwrap();
    b.attach(&second).unwrap();
    assert_eq!(group.len(), 2);
    assert_eq!(a.group().map(|group| group.name().to_owned()), Some("mirror".into()));

    group.set_enabled(false).unwrap();
    source.set(5).unwrap();
    assert_eq!((first.get(), second.get()), (1, 1));
    group.set_enabled(true).unwrap();
    assert_eq!((first.get(), second.get()), (5, 5));

    a.detach().unwrap();
    assert!(!b.is_attached());
    source.set(6).unwrap();
    assert_eq!((first.get(), second.get()), (5, 5));
}

#[test]
fn two_way_ring_keeps_values_equal() {
    let a = Property::new(1_i32);
    let b = Property::new(2_i32);
    let c = Property::new(3_i32);
    let group = bind_properties(&[&a, &b, &c]).unwrap();
    assert_eq!(group.len(), 3);
    assert_eq!(group.policy(), BindingPolicy::KeepOnWrite);
    assert_eq!((a.get(), b.get(), c.get()), (1, 1, 1));

    b.set(9).unwrap();
    assert_eq!((a.get(), b.get(), c.get()), (9, 9, 9));
    c.set(4).unwrap();
    assert_eq!((a.get(), b.get(), c.get()), (4, 4, 4));

    group.discard().unwrap();
    a.set(0).unwrap();
    assert_eq!((a.get(), b.get(), c.get()), (0, 4, 4));
}

#[test]
fn two_way_with_read_only_member_reaches_everyone() {
    let x = Property::new(0_i32);
    let (source, writer) = Property::read_only(5_i32);
    let y = Property::new(0_i32);
    let group = bind_properties(&[&x, &source, &y]).unwrap();
    assert_eq!(group.len(), 2);
    assert_eq!((x.get(), y.get()), (5, 5));

    x.set(9).unwrap();
    assert_eq!((x.get(), source.get(), y.get()), (9, 5, 9));
    y.set(3).unwrap();
    assert_eq!((x.get(), source.get(), y.get()), (3, 5, 3));

    writer.set(6).unwrap();
    assert_eq!((x.get(), source.get(), y.get()), (6, 6, 6));
    assert!(group.members().iter().all(Binding::is_attached));
}

#[test]
fn two_way_with_one_writable_member_follows_the_source() {
    let (source, writer) = Property::read_only(1_i32);
    let follower = Property::new(0_i32);
    let group = bind_properties(&[&source, &follower]).unwrap();
    assert_eq!(group.len(), 1);
    assert_eq!(follower.get(), 1);

    writer.set(2).unwrap();
    assert_eq!(follower.get(), 2);
}

#[test]
fn failed_two_way_binding_leaves_nothing_attached() {
    let a = Property::new(1_i32);
    let b = Property::new(0_i64);
    let c = Property::new(vec![0_u8]);
    let cores = [a.core().clone(), b.core().clone(), c.core().clone()];

    let err = bind_property_cores(&cores).unwrap_err();
    assert!(err.is_bad_conversion());
    assert!(a.bindings().is_empty());
    assert!(b.bindings().is_empty());
    assert!(c.bindings().is_empty());
    assert!(a.core().subscriber_ids().is_empty());
    assert!(b.core().subscriber_ids().is_empty());

    a.set(4).unwrap();
    assert_eq!(b.get(), 1);
}

#[test]
fn two_way_rejects_bad_input() {
    let lonely = Property::new(0_i32);
    assert!(matches!(bind_properties(&[&lonely]), Err(Error::InvalidArgument(_))));

    let (first, _w1) = Property::read_only(0_i32);
    let (second, _w2) = Property::read_only(0_i32);
    assert!(matches!(bind_properties(&[&first, &second]), Err(Error::InvalidArgument(_))));
}
