//! Observable properties.
//!
//! A property stores one [`Value`] of a fixed type, emits its change signal
//! when the stored value actually changes and keeps a stack of bindings of
//! which only the top one may be enabled.
//!
//! ## Write sequence
//!
//! 1. read-only properties reject writes from everything but their writer
//! 2. every binding using [`BindingPolicy::DetachOnWrite`] is detached,
//!    except the binding performing the write, and the remaining top
//!    binding is silently re-activated
//! 3. the value is converted to the property's type
//! 4. if it differs from the stored value it is stored, subscriber bindings
//!    re-evaluate, and the change signal fires last, even when a
//!    subscriber failed

use core::fmt;
use core::marker::PhantomData;
use std::sync::{Arc, Weak};

use mk_meta::{Descriptor, MetaValue, PackedArgs, Signature, Value};
use parking_lot::Mutex;

use crate::binding::{self, Binding, BindingCore, BindingPolicy};
use crate::error::{Error, Result};
use crate::id::{BindingId, PropertyId};
use crate::signal::{Signal, SignalCore};
use crate::sync::Lockable;

/// Who is writing a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOrigin {
    Direct,
    Owner,
    Binding(BindingId),
    Reset,
}

/// Untyped property engine shared by the typed front-ends.
pub struct PropertyCore {
    id: PropertyId,
    host: Arc<Lockable>,
    descriptor: Descriptor,
    read_only: bool,
    default: Value,
    value: Mutex<Value>,
    changed: Arc<SignalCore>,
    bindings: Mutex<Vec<Arc<BindingCore>>>,
    subscribers: Mutex<Vec<(BindingId, Weak<BindingCore>)>>,
}

impl PropertyCore {
    pub fn new(host: Arc<Lockable>, default: Value, read_only: bool) -> Arc<Self> {
        let descriptor = default.descriptor();
        let changed = SignalCore::with_host(Arc::clone(&host), Signature::new(vec![descriptor]));
        Arc::new(Self {
            id: PropertyId::next(),
            host,
            descriptor,
            read_only,
            value: Mutex::new(default.clone()),
            default,
            changed,
            bindings: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> PropertyId {
        self.id
    }

    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn default_value(&self) -> Value {
        self.default.clone()
    }

    /// Change signal; carries the new value.
    pub fn changed(&self) -> &Arc<SignalCore> {
        &self.changed
    }

    /// Current value. Inside a binding evaluation the read is recorded as a
    /// dependency of that binding.
    pub fn read(self: &Arc<Self>) -> Value {
        binding::record_read(self);
        self.peek()
    }

    /// Current value without dependency tracking.
    pub fn peek(&self) -> Value {
        let _host = self.host.lock();
        self.value.lock().clone()
    }

    /// Direct write.
    pub fn write(self: &Arc<Self>, value: Value) -> Result<bool> {
        if self.read_only {
            return Err(Error::WriteReadOnly(self.id));
        }
        self.store(value, WriteOrigin::Direct)
    }

    /// Clears the binding stack and restores the default value.
    pub fn reset(self: &Arc<Self>) -> Result<bool> {
        if self.read_only {
            return Err(Error::WriteReadOnly(self.id));
        }
        let stack = {
            let _host = self.host.lock();
            core::mem::take(&mut *self.bindings.lock())
        };
        for binding in stack.iter().rev() {
            binding.release_from_target();
        }
        self.store(self.default.clone(), WriteOrigin::Reset)
    }

    pub(crate) fn store(self: &Arc<Self>, value: Value, origin: WriteOrigin) -> Result<bool> {
        let value = mk_meta::registry().convert(&value, &self.descriptor)?;
        match origin {
            WriteOrigin::Reset => {}
            WriteOrigin::Binding(binding) => self.detach_on_write(Some(binding))?,
            WriteOrigin::Direct | WriteOrigin::Owner => self.detach_on_write(None)?,
        }
        let changed = {
            let _host = self.host.lock();
            let mut current = self.value.lock();
            if *current == value {
                false
            } else {
                *current = value.clone();
                true
            }
        };
        if changed {
            match origin {
                WriteOrigin::Binding(binding) => log::trace!("{} changed by {binding}", self.id),
                _ => log::trace!("{} changed ({origin:?})", self.id),
            }
            self.notify(value)?;
        }
        Ok(changed)
    }

    /// Detaches the [`BindingPolicy::DetachOnWrite`] bindings other than
    /// `writer`, the binding performing the write.
    fn detach_on_write(self: &Arc<Self>, writer: Option<BindingId>) -> Result<()> {
        let detaching: Vec<Arc<BindingCore>> = {
            let _host = self.host.lock();
            self.bindings
                .lock()
                .iter()
                .filter(|binding| Some(binding.id()) != writer)
                .filter(|binding| binding.policy() == BindingPolicy::DetachOnWrite)
                .cloned()
                .collect()
        };
        for binding in detaching {
            match binding.detach_quietly() {
                Ok(()) | Err(Error::BindingNotAttached(_)) => {}
                Err(err) => return Err(err),
            }
        }
        if let Some(top) = self.top_binding() {
            top.set_active(true);
        }
        Ok(())
    }

    fn notify(self: &Arc<Self>, value: Value) -> Result<()> {
        let subscribers: Vec<Arc<BindingCore>> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|(_, binding)| binding.strong_count() > 0);
            subscribers
                .iter()
                .filter_map(|(_, binding)| binding.upgrade())
                .collect()
        };
        // A failing subscriber does not stop the others; the first error is
        // reported once the change signal has fired.
        let mut outcome = Ok(());
        for binding in subscribers {
            if !binding.is_enabled() {
                continue;
            }
            if let Err(err) = binding.evaluate() {
                log::debug!("{} failed to follow {}: {err}", binding.id(), self.id);
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        let fired = self.changed.activate(&PackedArgs::new(vec![value])).map(drop);
        outcome.and(fired)
    }

    pub(crate) fn add_binding(self: &Arc<Self>, binding: Arc<BindingCore>) -> Result<()> {
        let previous = {
            let _host = self.host.lock();
            let mut stack = self.bindings.lock();
            let previous = stack.last().cloned();
            stack.push(Arc::clone(&binding));
            previous
        };
        if let Some(previous) = previous {
            previous.set_active(false);
        }
        binding.set_active(true);
        if binding.is_enabled() {
            binding.evaluate()?;
        }
        Ok(())
    }

    /// Removes `binding` from the stack. When it was on top, the new top is
    /// activated and, with `reevaluate`, evaluated.
    pub(crate) fn remove_binding(self: &Arc<Self>, binding: &BindingCore, reevaluate: bool) -> Result<()> {
        let new_top = {
            let _host = self.host.lock();
            let mut stack = self.bindings.lock();
            let Some(idx) = stack.iter().position(|entry| entry.id() == binding.id()) else {
                return Ok(());
            };
            let was_top = idx + 1 == stack.len();
            stack.remove(idx);
            if was_top {
                stack.last().cloned()
            } else {
                None
            }
        };
        if let Some(top) = new_top {
            top.set_active(true);
            if reevaluate && top.is_enabled() {
                top.evaluate()?;
            }
        }
        Ok(())
    }

    pub(crate) fn top_binding(&self) -> Option<Arc<BindingCore>> {
        let _host = self.host.lock();
        self.bindings.lock().last().cloned()
    }

    pub(crate) fn subscribe(&self, binding: &Arc<BindingCore>) {
        let mut subscribers = self.subscribers.lock();
        if !subscribers.iter().any(|(id, _)| *id == binding.id()) {
            subscribers.push((binding.id(), Arc::downgrade(binding)));
        }
    }

    pub(crate) fn unsubscribe(&self, binding: BindingId) {
        self.subscribers.lock().retain(|(id, _)| *id != binding);
    }

    /// Ids of the bindings currently depending on this property.
    pub fn subscriber_ids(&self) -> Vec<BindingId> {
        self.subscribers
            .lock()
            .iter()
            .filter(|(_, binding)| binding.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Binding stack, bottom first.
    pub fn bindings(&self) -> Vec<Binding> {
        let _host = self.host.lock();
        self.bindings
            .lock()
            .iter()
            .map(|core| Binding::from_core(Arc::clone(core)))
            .collect()
    }

    /// The enabled binding, if any.
    pub fn current_binding(&self) -> Option<Binding> {
        self.top_binding()
            .filter(|binding| binding.is_enabled())
            .map(Binding::from_core)
    }
}

impl Drop for PropertyCore {
    fn drop(&mut self) {
        for binding in self.bindings.get_mut().drain(..) {
            binding.release_from_target();
        }
        for (_, binding) in self.subscribers.get_mut().drain(..) {
            if let Some(binding) = binding.upgrade() {
                binding.on_dependency_dropped(self.id);
            }
        }
    }
}

impl fmt::Debug for PropertyCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyCore")
            .field("id", &self.id)
            .field("value", &self.peek())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Typed property handle. Clones share the same property.
pub struct Property<T> {
    core: Arc<PropertyCore>,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _type: PhantomData,
        }
    }
}

impl<T: MetaValue + Default> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: MetaValue> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.core.id)
            .field("value", &self.core.peek())
            .finish()
    }
}

impl<T: MetaValue> Property<T> {
    pub fn new(default: T) -> Self {
        Self::with_host(Arc::new(Lockable::new()), default)
    }

    /// Property sharing `host` with other members of its host object.
    pub fn with_host(host: Arc<Lockable>, default: T) -> Self {
        Self::from_core_unchecked(PropertyCore::new(host, Value::new(default), false))
    }

    /// Read-only property plus the writer reserved to its owner.
    pub fn read_only(default: T) -> (Self, PropertyWriter<T>) {
        Self::read_only_with_host(Arc::new(Lockable::new()), default)
    }

    pub fn read_only_with_host(host: Arc<Lockable>, default: T) -> (Self, PropertyWriter<T>) {
        let core = PropertyCore::new(host, Value::new(default), true);
        let writer = PropertyWriter {
            core: Arc::clone(&core),
            _type: PhantomData,
        };
        (Self::from_core_unchecked(core), writer)
    }

    fn from_core_unchecked(core: Arc<PropertyCore>) -> Self {
        Self {
            core,
            _type: PhantomData,
        }
    }

    pub fn core(&self) -> &Arc<PropertyCore> {
        &self.core
    }

    pub fn id(&self) -> PropertyId {
        self.core.id
    }

    pub fn is_read_only(&self) -> bool {
        self.core.read_only
    }

    pub fn get(&self) -> T {
        self.core
            .read()
            .get::<T>()
            .expect("property value has its declared type")
    }

    pub fn set(&self, value: T) -> Result<()> {
        self.core.write(Value::new(value)).map(drop)
    }

    /// Writes any value convertible to `T`.
    pub fn set_value(&self, value: Value) -> Result<()> {
        self.core.write(value).map(drop)
    }

    pub fn reset(&self) -> Result<()> {
        self.core.reset().map(drop)
    }

    pub fn default_value(&self) -> T {
        self.core
            .default
            .get::<T>()
            .expect("property default has its declared type")
    }

    pub fn changed(&self) -> Signal<(T,)> {
        Signal::from_core(Arc::clone(&self.core.changed))
            .expect("change signal carries the property type")
    }

    /// Attaches `binding`, making it the active one.
    pub fn add_binding(&self, binding: &Binding) -> Result<()> {
        binding.attach_core(&self.core)
    }

    pub fn remove_binding(&self, binding: &Binding) -> Result<()> {
        if binding.target_id() != Some(self.core.id) {
            return Err(Error::BindingNotAttached(binding.id()));
        }
        binding.detach()
    }

    /// Binds this property to follow `source`.
    pub fn bind_to<S: MetaValue>(&self, source: &Property<S>) -> Result<Binding> {
        let binding = Binding::from_property(source);
        self.add_binding(&binding)?;
        Ok(binding)
    }

    /// Binds this property to `expression`, re-evaluated whenever a property
    /// it reads changes.
    pub fn bind_with<F>(&self, expression: F) -> Result<Binding>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let binding = Binding::expression(expression);
        self.add_binding(&binding)?;
        Ok(binding)
    }

    pub fn current_binding(&self) -> Option<Binding> {
        self.core.current_binding()
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.core.bindings()
    }
}

/// Owner-side write access to a read-only property.
pub struct PropertyWriter<T> {
    core: Arc<PropertyCore>,
    _type: PhantomData<fn() -> T>,
}

impl<T: MetaValue> PropertyWriter<T> {
    pub fn set(&self, value: T) -> Result<()> {
        self.core.store(Value::new(value), WriteOrigin::Owner).map(drop)
    }

    pub fn property_id(&self) -> PropertyId {
        self.core.id
    }
}

impl<T> fmt::Debug for PropertyWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyWriter({})", self.core.id)
    }
}
