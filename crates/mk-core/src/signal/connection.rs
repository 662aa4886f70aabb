//! Connection records and handles.

use core::fmt;
use core::marker::PhantomData;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use mk_meta::{PackedArgs, TypeRegistry};

use crate::error::{Error, Result};
use crate::event::{DeferredSignal, Event, TargetRef};
use crate::id::{ConnectionId, SignalId};
use crate::signal::holder::SlotHolder;
use crate::signal::slot::Method;
use crate::signal::SignalCore;
use crate::thread::ThreadData;

thread_local! {
    static CURRENT: RefCell<Vec<Arc<ConnectionInner>>> = const { RefCell::new(Vec::new()) };
}

/// Outcome of invoking one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Invocation {
    Invoked,
    Deferred,
    Skipped,
}

/// Public classification of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Free callable.
    Function,
    /// Receiver-bound callable on a receiver without thread affinity.
    Method,
    /// Receiver-bound callable; activations from other threads are queued on
    /// the receiver's thread.
    ThreadAffined,
    /// Forwards the activation to another signal.
    Signal,
}

pub(crate) type PackedSlot = Box<dyn Fn(&PackedArgs, &TypeRegistry) -> Result<()> + Send + Sync>;

/// A receiver held weakly by a method connection.
pub(crate) trait Receiver: Send + Sync {
    /// `None` once the receiver is gone, otherwise its thread affinity.
    fn affinity(&self) -> Option<Option<Arc<ThreadData>>>;
    fn target(&self) -> Option<TargetRef>;
    fn call(&self, args: &PackedArgs, registry: &TypeRegistry) -> Result<Invocation>;
}

pub(crate) struct BoundMethod<R, F, M> {
    receiver: Weak<R>,
    method: F,
    _marker: PhantomData<fn() -> M>,
}

impl<R, F, M> BoundMethod<R, F, M> {
    pub(crate) fn new(receiver: &Arc<R>, method: F) -> Self {
        Self {
            receiver: Arc::downgrade(receiver),
            method,
            _marker: PhantomData,
        }
    }
}

impl<R, F, M> Receiver for BoundMethod<R, F, M>
where
    R: SlotHolder + 'static,
    F: Method<R, M>,
    M: 'static,
{
    fn affinity(&self) -> Option<Option<Arc<ThreadData>>> {
        self.receiver.upgrade().map(|receiver| receiver.thread_data())
    }

    fn target(&self) -> Option<TargetRef> {
        self.receiver.upgrade().map(|receiver| TargetRef::new(&receiver))
    }

    fn call(&self, args: &PackedArgs, registry: &TypeRegistry) -> Result<Invocation> {
        match self.receiver.upgrade() {
            Some(receiver) => {
                self.method.invoke(&receiver, args, registry)?;
                Ok(Invocation::Invoked)
            }
            None => Ok(Invocation::Skipped),
        }
    }
}

pub(crate) enum ConnectionKind {
    Function(PackedSlot),
    Method(Box<dyn Receiver>),
    ThreadAffined(Box<dyn Receiver>),
    Signal(Weak<SignalCore>),
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    signal_id: SignalId,
    signal: Weak<SignalCore>,
    live: AtomicBool,
    kind: ConnectionKind,
}

impl ConnectionInner {
    pub(crate) fn new(signal: &Arc<SignalCore>, kind: ConnectionKind) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            signal_id: signal.id(),
            signal: Arc::downgrade(signal),
            live: AtomicBool::new(true),
            kind,
        })
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Clears the live flag; returns whether it was set.
    pub(crate) fn invalidate(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn disconnect(&self) -> Result<()> {
        if !self.invalidate() {
            return Err(Error::Disconnected);
        }
        if let Some(signal) = self.signal.upgrade() {
            signal.remove_connection(self.id);
        }
        log::trace!("{} disconnected from {}", self.id, self.signal_id);
        Ok(())
    }

    fn connection_type(&self) -> ConnectionType {
        match self.kind {
            ConnectionKind::Function(_) => ConnectionType::Function,
            ConnectionKind::Method(_) => ConnectionType::Method,
            ConnectionKind::ThreadAffined(_) => ConnectionType::ThreadAffined,
            ConnectionKind::Signal(_) => ConnectionType::Signal,
        }
    }

    pub(crate) fn invoke(
        self: &Arc<Self>,
        args: &PackedArgs,
        registry: &TypeRegistry,
    ) -> Result<Invocation> {
        let _current = CurrentScope::enter(self);
        match &self.kind {
            ConnectionKind::Function(slot) => slot(args, registry).map(|()| Invocation::Invoked),
            ConnectionKind::Method(receiver) => self.call_receiver(receiver.as_ref(), args, registry),
            ConnectionKind::ThreadAffined(receiver) => match receiver.affinity() {
                None => {
                    self.invalidate();
                    Ok(Invocation::Skipped)
                }
                Some(Some(thread)) if !thread.is_current() => {
                    self.defer(&thread, receiver.target(), args);
                    Ok(Invocation::Deferred)
                }
                Some(_) => receiver.call(args, registry),
            },
            ConnectionKind::Signal(target) => match target.upgrade() {
                Some(target) => target.activate(args).map(|_| Invocation::Invoked),
                None => {
                    self.invalidate();
                    Ok(Invocation::Skipped)
                }
            },
        }
    }

    fn call_receiver(
        &self,
        receiver: &dyn Receiver,
        args: &PackedArgs,
        registry: &TypeRegistry,
    ) -> Result<Invocation> {
        let outcome = receiver.call(args, registry)?;
        if outcome == Invocation::Skipped {
            self.invalidate();
        }
        Ok(outcome)
    }

    fn defer(self: &Arc<Self>, thread: &Arc<ThreadData>, target: Option<TargetRef>, args: &PackedArgs) {
        let connection = Arc::downgrade(self);
        let args = args.clone();
        let deferred = DeferredSignal::new(move || match connection.upgrade() {
            Some(connection) if connection.is_live() => connection.invoke_here(&args),
            _ => Ok(()),
        });
        log::trace!("{} deferred to {}", self.id, thread.id());
        thread.post_event(Event::deferred_signal(target, deferred));
    }

    /// Runs a receiver-bound connection on the calling thread, whatever the
    /// receiver's affinity.
    fn invoke_here(self: &Arc<Self>, args: &PackedArgs) -> Result<()> {
        let registry = mk_meta::registry();
        let _current = CurrentScope::enter(self);
        match &self.kind {
            ConnectionKind::Method(receiver) | ConnectionKind::ThreadAffined(receiver) => self
                .call_receiver(receiver.as_ref(), args, &registry)
                .map(drop),
            _ => self.invoke(args, &registry).map(drop),
        }
    }
}

struct CurrentScope;

impl CurrentScope {
    fn enter(connection: &Arc<ConnectionInner>) -> Self {
        CURRENT.with(|stack| stack.borrow_mut().push(Arc::clone(connection)));
        CurrentScope
    }
}

impl Drop for CurrentScope {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Handle to a registered connection.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Id of the signal this connection is registered with.
    pub fn signal_id(&self) -> SignalId {
        self.inner.signal_id
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.inner.connection_type()
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    /// Fails with [`Error::Disconnected`] when the connection is no longer live.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.disconnect()
    }

    /// The connection whose slot is executing on this thread, if any.
    pub fn current() -> Option<Connection> {
        CURRENT.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|inner| Connection { inner: Arc::clone(inner) })
        })
    }

    /// Converts into a guard that disconnects on drop.
    pub fn scoped(self) -> ScopedConnection {
        ScopedConnection(Some(self))
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("signal", &self.inner.signal_id)
            .field("type", &self.connection_type())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Disconnects the wrapped connection when dropped.
#[derive(Debug)]
pub struct ScopedConnection(Option<Connection>);

impl ScopedConnection {
    pub fn connection(&self) -> Option<&Connection> {
        self.0.as_ref()
    }

    /// Keeps the connection alive past the guard.
    pub fn release(mut self) -> Option<Connection> {
        self.0.take()
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.0.take() {
            let _ = connection.disconnect();
        }
    }
}
