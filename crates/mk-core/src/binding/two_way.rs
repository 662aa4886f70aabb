use std::sync::Arc;

use mk_meta::{MetaValue, Value};
use parking_lot::Mutex;

use crate::binding::{evaluating, Binding, BindingGroup, BindingPolicy, NormalizeOutcome};
use crate::error::{Error, Result};
use crate::property::{Property, PropertyCore};

/// Keeps all `properties` equal to each other.
///
/// Each property follows its predecessor and the first follows the last,
/// closing the ring. A read-only member cannot be written, so it stays out
/// of the ring and feeds the first writable member instead; the value it
/// wins initially. Otherwise the first property's value wins. All bindings
/// use [`BindingPolicy::KeepOnWrite`] and share one group, so detaching any
/// of them dissolves the whole set.
pub fn bind_properties<T: MetaValue>(properties: &[&Property<T>]) -> Result<BindingGroup> {
    let cores: Vec<Arc<PropertyCore>> = properties
        .iter()
        .map(|property| Arc::clone(property.core()))
        .collect();
    bind_property_cores(&cores)
}

/// Untyped form of [`bind_properties`]; properties may differ in type as
/// long as their values convert.
pub fn bind_property_cores(properties: &[Arc<PropertyCore>]) -> Result<BindingGroup> {
    if properties.len() < 2 {
        return Err(Error::InvalidArgument(
            "binding properties together needs at least two of them".into(),
        ));
    }
    let (read_only, writable): (Vec<&Arc<PropertyCore>>, Vec<&Arc<PropertyCore>>) =
        properties.iter().partition(|property| property.is_read_only());
    if read_only.len() > 1 {
        return Err(Error::InvalidArgument(format!(
            "{} read-only properties cannot follow each other",
            read_only.len()
        )));
    }

    let group = BindingGroup::new("two-way");
    group.set_policy(BindingPolicy::KeepOnWrite);

    let first = writable[0];
    let last = writable[writable.len() - 1];
    let mut edges: Vec<(Binding, &Arc<PropertyCore>)> = Vec::with_capacity(writable.len());
    match read_only.first() {
        Some(source) if writable.len() == 1 => edges.push((Binding::from_source_core(source), first)),
        Some(source) => {
            let entry = merge_into_ring(source, last);
            group.set_member_normalizer(&entry, |_: &Binding, _: Value, _: usize| NormalizeOutcome::FailAndExit);
            edges.push((entry, first));
        }
        None => {}
    }
    for pair in writable.windows(2) {
        edges.push((Binding::from_source_core(pair[0]), pair[1]));
    }
    if read_only.is_empty() {
        edges.push((Binding::from_source_core(last), first));
    }

    for (binding, target) in edges {
        group.add(&binding);
        if let Err(err) = binding.attach_core(target) {
            log::debug!("two-way binding onto {} failed: {err}", target.id());
            if let Err(cleanup) = group.discard() {
                log::warn!("dissolving partial two-way binding failed: {cleanup}");
            }
            return Err(err);
        }
    }
    log::debug!("bound {} properties together", properties.len());
    Ok(group)
}

/// Binding feeding the first writable member from both the read-only
/// `source` and the ring's last member `peer`. A change of `source` wins;
/// otherwise the ring value passes through. The loop it closes when
/// `source` changes is settled by the group normalizer.
fn merge_into_ring(source: &Arc<PropertyCore>, peer: &Arc<PropertyCore>) -> Binding {
    let source = Arc::downgrade(source);
    let peer = Arc::downgrade(peer);
    let seen: Mutex<Option<Value>> = Mutex::new(None);
    Binding::from_functor(move || {
        let from_source = source.upgrade().map(|source| source.read());
        let from_peer = peer.upgrade().map(|peer| peer.read());
        let mut seen = seen.lock();
        match (from_source, from_peer) {
            (Some(value), _) if seen.as_ref() != Some(&value) => {
                *seen = Some(value.clone());
                Ok(value)
            }
            (_, Some(value)) | (Some(value), None) => Ok(value),
            (None, None) => Err(match evaluating() {
                Some(binding) => Error::InvalidBinding(binding.id()),
                None => Error::InvalidArgument("two-way members were dropped".into()),
            }),
        }
    })
}
