//! Bindings keep a target property in sync with an expression.
//!
//! An expression is either another property or a closure. Every property
//! read while the expression runs is recorded as a dependency; a change of
//! any dependency re-evaluates the binding and writes the result to the
//! target.
//!
//! ## Module Overview
//!
//! - [`Binding`]: handle to a binding and its lifecycle
//! - [`BindingGroup`]: shared enable/policy state and loop normalisation
//! - [`bind_properties`]: ring or star of bindings keeping properties equal

mod group;
mod two_way;

use core::fmt;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use mk_meta::{MetaValue, Value};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::id::{BindingId, PropertyId};
use crate::property::{Property, PropertyCore, WriteOrigin};

pub use group::{BindingGroup, NormalizeOutcome, Normalizer};
pub use two_way::{bind_properties, bind_property_cores};

use group::GroupCore;

thread_local! {
    /// Bindings whose expression is running, innermost last. `None` entries
    /// suspend dependency recording.
    static CAPTURE: RefCell<Vec<Option<Arc<BindingCore>>>> = const { RefCell::new(Vec::new()) };
    /// Bindings being evaluated on this thread, including the write phase.
    static ACTIVE: RefCell<Vec<BindingId>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn record_read(property: &Arc<PropertyCore>) {
    let current = CAPTURE.with(|stack| stack.borrow().last().cloned().flatten());
    if let Some(binding) = current {
        binding.add_dependency(property);
    }
}

/// Runs `f` without recording property reads as binding dependencies.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = CaptureScope::enter(None);
    f()
}

/// The binding whose expression is running on this thread, if any.
pub fn evaluating() -> Option<Binding> {
    CAPTURE.with(|stack| stack.borrow().last().cloned().flatten().map(Binding::from_core))
}

struct CaptureScope;

impl CaptureScope {
    fn enter(binding: Option<Arc<BindingCore>>) -> Self {
        CAPTURE.with(|stack| stack.borrow_mut().push(binding));
        CaptureScope
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        CAPTURE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Marks a binding as evaluating; `depth` counts the nested evaluations of
/// the same binding on this thread.
struct ActiveScope {
    depth: usize,
}

impl ActiveScope {
    fn enter(id: BindingId) -> Self {
        let depth = ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(id);
            stack.iter().filter(|entry| **entry == id).count()
        });
        ActiveScope { depth }
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// What a direct write to the target does to the binding.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingPolicy {
    /// The binding is detached by a direct write.
    #[default]
    DetachOnWrite,
    /// The binding survives; the written value stands until a dependency
    /// changes.
    KeepOnWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingState {
    Detached,
    Attaching,
    Attached,
    Detaching,
    /// A source property was dropped; the binding cannot be re-attached.
    Invalid,
}

type Functor = Box<dyn Fn() -> Result<Value> + Send + Sync>;

enum Expression {
    Property {
        id: PropertyId,
        source: Weak<PropertyCore>,
    },
    Functor(Functor),
}

pub(crate) struct BindingCore {
    id: BindingId,
    expression: Expression,
    target: Mutex<Option<(PropertyId, Weak<PropertyCore>)>>,
    state: Mutex<BindingState>,
    policy: Mutex<BindingPolicy>,
    /// Set while the binding is on top of its target's stack.
    active: AtomicBool,
    /// Set by `set_enabled(false)`.
    suspended: AtomicBool,
    dependencies: Mutex<Vec<(PropertyId, Weak<PropertyCore>)>>,
    group: Mutex<Option<Arc<GroupCore>>>,
    evaluations: AtomicU64,
}

impl BindingCore {
    fn new(expression: Expression) -> Arc<Self> {
        Arc::new(Self {
            id: BindingId::next(),
            expression,
            target: Mutex::new(None),
            state: Mutex::new(BindingState::Detached),
            policy: Mutex::new(BindingPolicy::default()),
            active: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            dependencies: Mutex::new(Vec::new()),
            group: Mutex::new(None),
            evaluations: AtomicU64::new(0),
        })
    }

    pub(crate) fn id(&self) -> BindingId {
        self.id
    }

    pub(crate) fn state(&self) -> BindingState {
        *self.state.lock()
    }

    pub(crate) fn policy(&self) -> BindingPolicy {
        *self.policy.lock()
    }

    fn set_policy(&self, policy: BindingPolicy) {
        *self.policy.lock() = policy;
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && !self.suspended.load(Ordering::Acquire)
            && self.state() == BindingState::Attached
    }

    fn target(&self) -> Option<Arc<PropertyCore>> {
        self.target
            .lock()
            .as_ref()
            .and_then(|(_, target)| target.upgrade())
    }

    fn target_id(&self) -> Option<PropertyId> {
        self.target.lock().as_ref().map(|(id, _)| *id)
    }

    fn group(&self) -> Option<Arc<GroupCore>> {
        self.group.lock().clone()
    }

    fn attach(self: &Arc<Self>, target: &Arc<PropertyCore>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                BindingState::Detached => *state = BindingState::Attaching,
                BindingState::Invalid => return Err(Error::InvalidBinding(self.id)),
                _ => return Err(Error::BindingAlreadyAttached(self.id)),
            }
        }
        if target.is_read_only() {
            *self.state.lock() = BindingState::Detached;
            return Err(Error::WriteReadOnly(target.id()));
        }
        *self.target.lock() = Some((target.id(), Arc::downgrade(target)));
        *self.state.lock() = BindingState::Attached;
        log::debug!("{} attached to {}", self.id, target.id());
        target.add_binding(Arc::clone(self))
    }

    fn detach(self: &Arc<Self>) -> Result<()> {
        self.detach_with(true)
    }

    /// Detach triggered by a direct write to the target: the new top binding
    /// is not re-evaluated since the write overrides it anyway.
    pub(crate) fn detach_quietly(self: &Arc<Self>) -> Result<()> {
        self.detach_with(false)
    }

    fn detach_with(self: &Arc<Self>, reevaluate: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != BindingState::Attached {
                return Err(Error::BindingNotAttached(self.id));
            }
            *state = BindingState::Detaching;
        }
        self.set_active(false);
        self.clear_dependencies();
        let target = self.target.lock().take();
        let removed = match target.and_then(|(_, target)| target.upgrade()) {
            Some(target) => target.remove_binding(self, reevaluate),
            None => Ok(()),
        };
        *self.state.lock() = BindingState::Detached;
        log::debug!("{} detached", self.id);
        let grouped = match self.group() {
            Some(group) => group.detach_members(),
            None => Ok(()),
        };
        removed.and(grouped)
    }

    /// Drops the link to a target that is resetting or going away.
    pub(crate) fn release_from_target(&self) {
        self.set_active(false);
        self.clear_dependencies();
        self.target.lock().take();
        let mut state = self.state.lock();
        if *state != BindingState::Invalid {
            *state = BindingState::Detached;
        }
    }

    pub(crate) fn on_dependency_dropped(self: &Arc<Self>, property: PropertyId) {
        self.dependencies.lock().retain(|(id, _)| *id != property);
        if matches!(self.expression, Expression::Property { id, .. } if id == property) {
            self.invalidate();
        }
    }

    fn invalidate(self: &Arc<Self>) {
        let previous = core::mem::replace(&mut *self.state.lock(), BindingState::Invalid);
        if previous == BindingState::Invalid {
            return;
        }
        log::warn!("{} lost its source property", self.id);
        self.set_active(false);
        self.clear_dependencies();
        let target = self.target.lock().take();
        if let Some(target) = target.and_then(|(_, target)| target.upgrade()) {
            if let Err(err) = target.remove_binding(self, true) {
                log::warn!("re-evaluating {} after {} was invalidated failed: {err}", target.id(), self.id);
            }
        }
    }

    pub(crate) fn evaluate(self: &Arc<Self>) -> Result<()> {
        match self.state() {
            BindingState::Attached => {}
            BindingState::Invalid => return Err(Error::InvalidBinding(self.id)),
            _ => return Ok(()),
        }
        if !self.is_enabled() {
            return Ok(());
        }
        let Some(target) = self.target() else {
            return Ok(());
        };
        let active = ActiveScope::enter(self.id);
        self.clear_dependencies();
        let value = {
            let _capture = CaptureScope::enter(Some(Arc::clone(self)));
            self.expression_value()
        };
        let mut value = match value {
            Ok(value) => value,
            Err(err) => {
                if matches!(err, Error::InvalidBinding(_)) {
                    self.invalidate();
                }
                return Err(err);
            }
        };
        if active.depth > 1 {
            match self.normalize(value, active.depth)? {
                Some(normalized) => value = normalized,
                None => return Ok(()),
            }
        }
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        target.store(value, WriteOrigin::Binding(self.id)).map(drop)
    }

    fn expression_value(&self) -> Result<Value> {
        match &self.expression {
            Expression::Property { source, .. } => source
                .upgrade()
                .map(|source| source.read())
                .ok_or(Error::InvalidBinding(self.id)),
            Expression::Functor(functor) => functor(),
        }
    }

    fn normalize(self: &Arc<Self>, value: Value, depth: usize) -> Result<Option<Value>> {
        let normalizer = self.group().and_then(|group| group.normalizer_for(self.id));
        let Some(normalizer) = normalizer else {
            log::warn!("binding loop on {} (depth {depth})", self.id);
            return Err(Error::BindingLoop {
                binding: self.id,
                depth,
            });
        };
        match normalizer.try_normalize(&Binding::from_core(Arc::clone(self)), value, depth) {
            NormalizeOutcome::Normalized(value) => Ok(Some(value)),
            NormalizeOutcome::FailAndExit => {
                log::debug!("binding loop on {} abandoned by normalizer", self.id);
                Ok(None)
            }
            NormalizeOutcome::Throw => Err(Error::BindingLoop {
                binding: self.id,
                depth,
            }),
        }
    }

    fn add_dependency(self: &Arc<Self>, property: &Arc<PropertyCore>) {
        {
            let mut dependencies = self.dependencies.lock();
            if dependencies.iter().any(|(id, _)| *id == property.id()) {
                return;
            }
            dependencies.push((property.id(), Arc::downgrade(property)));
        }
        property.subscribe(self);
    }

    fn clear_dependencies(&self) {
        let dependencies = core::mem::take(&mut *self.dependencies.lock());
        for (_, property) in dependencies {
            if let Some(property) = property.upgrade() {
                property.unsubscribe(self.id);
            }
        }
    }
}

/// Handle to a binding. Clones share the same binding.
#[derive(Clone)]
pub struct Binding {
    core: Arc<BindingCore>,
}

impl Binding {
    pub(crate) fn from_core(core: Arc<BindingCore>) -> Self {
        Self { core }
    }

    /// Binding that mirrors `source`.
    pub fn from_property<S: MetaValue>(source: &Property<S>) -> Self {
        Self::from_source_core(source.core())
    }

    pub fn from_source_core(source: &Arc<PropertyCore>) -> Self {
        Self::from_core(BindingCore::new(Expression::Property {
            id: source.id(),
            source: Arc::downgrade(source),
        }))
    }

    /// Binding evaluating `expression`; every property it reads becomes a
    /// dependency.
    pub fn expression<T, F>(expression: F) -> Self
    where
        T: MetaValue,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::from_functor(move || Ok(Value::new(expression())))
    }

    /// Like [`Binding::expression`] for expressions that may fail.
    pub fn try_expression<T, F>(expression: F) -> Self
    where
        T: MetaValue,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::from_functor(move || expression().map(Value::new))
    }

    pub fn from_functor<F>(functor: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        Self::from_core(BindingCore::new(Expression::Functor(Box::new(functor))))
    }

    pub fn with_policy(self, policy: BindingPolicy) -> Self {
        self.core.set_policy(policy);
        self
    }

    pub fn id(&self) -> BindingId {
        self.core.id
    }

    pub fn state(&self) -> BindingState {
        self.core.state()
    }

    pub fn is_attached(&self) -> bool {
        self.state() == BindingState::Attached
    }

    pub fn policy(&self) -> BindingPolicy {
        self.core.policy()
    }

    pub fn set_policy(&self, policy: BindingPolicy) {
        self.core.set_policy(policy);
    }

    /// True when attached, on top of the target's stack and not suspended.
    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    /// Suspends or resumes the binding. Resuming re-evaluates it when it is
    /// the active binding of its target.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.core.suspended.store(!enabled, Ordering::Release);
        if enabled && self.core.is_enabled() {
            self.core.evaluate()
        } else {
            Ok(())
        }
    }

    /// Pushes the binding on `target`'s stack and evaluates it.
    pub fn attach<T: MetaValue>(&self, target: &Property<T>) -> Result<()> {
        self.core.attach(target.core())
    }

    pub fn attach_core(&self, target: &Arc<PropertyCore>) -> Result<()> {
        self.core.attach(target)
    }

    /// Removes the binding from its target. Detaching a group member
    /// detaches the whole group.
    pub fn detach(&self) -> Result<()> {
        self.core.detach()
    }

    pub fn evaluate(&self) -> Result<()> {
        self.core.evaluate()
    }

    pub fn target_id(&self) -> Option<PropertyId> {
        self.core.target_id()
    }

    /// Current value of the target, without dependency tracking.
    pub fn target_value(&self) -> Option<Value> {
        self.core.target().map(|target| target.peek())
    }

    /// Properties read during the last evaluation.
    pub fn dependencies(&self) -> Vec<PropertyId> {
        self.core
            .dependencies
            .lock()
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn group(&self) -> Option<BindingGroup> {
        self.core.group().map(BindingGroup::from_core)
    }

    /// Number of completed evaluations.
    pub fn evaluations(&self) -> u64 {
        self.core.evaluations.load(Ordering::Relaxed)
    }

    pub(crate) fn core(&self) -> &Arc<BindingCore> {
        &self.core
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl Eq for Binding {}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.core.id)
            .field("state", &self.state())
            .field("policy", &self.policy())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
