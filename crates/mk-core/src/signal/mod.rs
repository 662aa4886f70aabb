//! Signals and their connections.
//!
//! [`SignalCore`] is the untyped engine: it owns the connection list, runs
//! activations and handles blocking and re-entry. [`Signal`] is the typed
//! front-end that packs arguments at the emit site and checks slot
//! signatures at connect time.
//!
//! ## Activation
//!
//! - a blocked signal, or one already activating on the calling thread,
//!   returns `0` without invoking anything
//! - a signal with no connections returns `-1`
//! - otherwise the connection list is copied under the host lock, the lock is
//!   released and each live connection is invoked in registration order;
//!   connections added meanwhile wait for the next activation
//! - disconnected entries are compacted away before returning
//!
//! Activations on distinct threads run concurrently.

mod connection;
mod holder;
mod slot;

use core::fmt;
use core::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use mk_meta::{PackedArgs, Signature, TypeRegistry};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::id::{ConnectionId, SignalId};
use crate::sync::Lockable;

pub use connection::{Connection, ConnectionType, ScopedConnection};
pub use holder::{SlotHolder, Slots};
pub use slot::{Arguments, Method, Slot, SlotResult};

use connection::{BoundMethod, ConnectionInner, ConnectionKind, Invocation};

#[derive(Default)]
struct SignalState {
    connections: Vec<Arc<ConnectionInner>>,
    activating: Vec<ThreadId>,
}

/// Untyped signal engine.
pub struct SignalCore {
    id: SignalId,
    signature: Signature,
    host: Arc<Lockable>,
    state: Mutex<SignalState>,
    blocked: AtomicBool,
}

impl SignalCore {
    pub fn new(signature: Signature) -> Arc<Self> {
        Self::with_host(Arc::new(Lockable::new()), signature)
    }

    /// Signal sharing `host` with the other members of its host object.
    pub fn with_host(host: Arc<Lockable>, signature: Signature) -> Arc<Self> {
        Arc::new(Self {
            id: SignalId::next(),
            signature,
            host,
            state: Mutex::new(SignalState::default()),
            blocked: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn host(&self) -> &Arc<Lockable> {
        &self.host
    }

    /// Blocks or unblocks activation; returns the previous state.
    pub fn block(&self, blocked: bool) -> bool {
        self.blocked.swap(blocked, Ordering::AcqRel)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// True while this signal is activating on the calling thread.
    pub fn is_activating(&self) -> bool {
        let thread = std::thread::current().id();
        self.state.lock().activating.contains(&thread)
    }

    pub fn connection_count(&self) -> usize {
        self.state
            .lock()
            .connections
            .iter()
            .filter(|connection| connection.is_live())
            .count()
    }

    pub(crate) fn add_connection(
        self: &Arc<Self>,
        kind: ConnectionKind,
        formal: &Signature,
    ) -> Result<Connection> {
        if !mk_meta::registry().invocable_with(formal, &self.signature) {
            return Err(Error::SignatureMismatch {
                formal: formal.to_string(),
                actual: self.signature.to_string(),
            });
        }
        let inner = ConnectionInner::new(self, kind);
        {
            let _host = self.host.lock();
            self.state.lock().connections.push(Arc::clone(&inner));
        }
        log::trace!("{} connected to {}", inner.id(), self.id);
        Ok(Connection { inner })
    }

    pub(crate) fn remove_connection(&self, id: ConnectionId) {
        let _host = self.host.lock();
        self.state
            .lock()
            .connections
            .retain(|connection| connection.id() != id);
    }

    /// Connects a callable that unpacks the arguments itself. `formal` is
    /// checked against the signal's signature.
    pub fn connect_packed<F>(self: &Arc<Self>, formal: Signature, slot: F) -> Result<Connection>
    where
        F: Fn(&PackedArgs, &TypeRegistry) -> Result<()> + Send + Sync + 'static,
    {
        self.add_connection(ConnectionKind::Function(Box::new(slot)), &formal)
    }

    /// Forwards every activation of `self` to `target`.
    pub fn connect_core(self: &Arc<Self>, target: &Arc<SignalCore>) -> Result<Connection> {
        self.add_connection(
            ConnectionKind::Signal(Arc::downgrade(target)),
            target.signature(),
        )
    }

    /// Disconnects `connection`, which must belong to this signal.
    pub fn disconnect(&self, connection: &Connection) -> Result<()> {
        if connection.signal_id() != self.id {
            return Err(Error::InvalidArgument(format!(
                "{} is not connected to {}",
                connection.id(),
                self.id
            )));
        }
        connection.disconnect()
    }

    /// Disconnects everything; returns how many live connections were removed.
    pub fn disconnect_all(&self) -> usize {
        let removed = {
            let _host = self.host.lock();
            core::mem::take(&mut self.state.lock().connections)
        };
        removed
            .into_iter()
            .filter(|connection| connection.invalidate())
            .count()
    }

    /// Invokes every live connection with `args`; see the module docs for
    /// the return value.
    ///
    /// A failing slot stops the activation and its error is returned once
    /// the connection list has been compacted.
    pub fn activate(&self, args: &PackedArgs) -> Result<i32> {
        if self.is_blocked() {
            return Ok(0);
        }
        let thread = std::thread::current().id();
        let mut host = self.host.lock();
        let snapshot = {
            let mut state = self.state.lock();
            if state.activating.contains(&thread) {
                log::trace!("{} re-entered on the same thread, ignored", self.id);
                return Ok(0);
            }
            if state.connections.is_empty() {
                return Ok(-1);
            }
            state.activating.push(thread);
            state.connections.clone()
        };
        let _mark = ActivationMark {
            state: &self.state,
            thread,
        };
        let outcome = host.unlocked(|| self.invoke_all(&snapshot, args));
        let dead = {
            let mut state = self.state.lock();
            let (live, dead): (Vec<_>, Vec<_>) = core::mem::take(&mut state.connections)
                .into_iter()
                .partition(|connection| connection.is_live());
            state.connections = live;
            dead
        };
        // Dropped slots may own handles locking this host.
        drop(host);
        drop(dead);
        outcome
    }

    fn invoke_all(&self, snapshot: &[Arc<ConnectionInner>], args: &PackedArgs) -> Result<i32> {
        let registry = mk_meta::registry();
        let mut invoked = 0;
        for connection in snapshot {
            if !connection.is_live() {
                continue;
            }
            match connection.invoke(args, &registry)? {
                Invocation::Invoked | Invocation::Deferred => invoked += 1,
                Invocation::Skipped => {}
            }
        }
        Ok(invoked)
    }
}

impl Drop for SignalCore {
    fn drop(&mut self) {
        for connection in self.state.get_mut().connections.drain(..) {
            connection.invalidate();
        }
    }
}

impl fmt::Debug for SignalCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalCore")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("connections", &self.connection_count())
            .field("blocked", &self.is_blocked())
            .finish()
    }
}

struct ActivationMark<'a> {
    state: &'a Mutex<SignalState>,
    thread: ThreadId,
}

impl Drop for ActivationMark<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(idx) = state.activating.iter().position(|t| *t == self.thread) {
            state.activating.swap_remove(idx);
        }
    }
}

/// Typed signal carrying an argument tuple `Args`.
pub struct Signal<Args = ()> {
    core: Arc<SignalCore>,
    _args: PhantomData<fn(Args)>,
}

impl<Args> Clone for Signal<Args> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _args: PhantomData,
        }
    }
}

impl<Args: Arguments> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args> fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.core, f)
    }
}

impl<Args: Arguments> Signal<Args> {
    pub fn new() -> Self {
        Self::with_host(Arc::new(Lockable::new()))
    }

    pub fn with_host(host: Arc<Lockable>) -> Self {
        Self {
            core: SignalCore::with_host(host, Args::signature()),
            _args: PhantomData,
        }
    }

    /// Typed view of an existing core. The core's signature must be exactly
    /// `Args`.
    pub fn from_core(core: Arc<SignalCore>) -> Result<Self> {
        let expected = Args::signature();
        if core.signature() != &expected {
            return Err(Error::SignatureMismatch {
                formal: expected.to_string(),
                actual: core.signature().to_string(),
            });
        }
        Ok(Self {
            core,
            _args: PhantomData,
        })
    }

    pub fn core(&self) -> &Arc<SignalCore> {
        &self.core
    }

    pub fn id(&self) -> SignalId {
        self.core.id()
    }

    pub fn emit(&self, args: Args) -> Result<i32> {
        self.core.activate(&args.pack())
    }

    /// Connects a free callable. Its parameters may be a prefix of `Args`,
    /// each convertible from the emitted type.
    pub fn connect<M, F>(&self, slot: F) -> Result<Connection>
    where
        M: 'static,
        F: Slot<M>,
    {
        let invoke: connection::PackedSlot =
            Box::new(move |args: &PackedArgs, registry: &TypeRegistry| slot.invoke(args, registry));
        self.core
            .add_connection(ConnectionKind::Function(invoke), &F::signature())
    }

    /// Connects `method` bound to a weakly held `receiver`. The connection
    /// disappears when the receiver is dropped; receivers with a thread
    /// affinity get their slots queued on that thread.
    pub fn connect_method<R, M, F>(&self, receiver: &Arc<R>, method: F) -> Result<Connection>
    where
        R: SlotHolder + 'static,
        M: 'static,
        F: Method<R, M>,
    {
        let bound = Box::new(BoundMethod::new(receiver, method));
        let kind = if receiver.thread_data().is_some() {
            ConnectionKind::ThreadAffined(bound)
        } else {
            ConnectionKind::Method(bound)
        };
        let connection = self.core.add_connection(kind, &F::signature())?;
        receiver.slots().track(&connection);
        Ok(connection)
    }

    /// Chains `target` so that it is activated with the same arguments.
    pub fn connect_signal<Other: Arguments>(&self, target: &Signal<Other>) -> Result<Connection> {
        self.core.connect_core(&target.core)
    }

    pub fn connect_packed<F>(&self, formal: Signature, slot: F) -> Result<Connection>
    where
        F: Fn(&PackedArgs, &TypeRegistry) -> Result<()> + Send + Sync + 'static,
    {
        self.core.connect_packed(formal, slot)
    }

    pub fn disconnect(&self, connection: &Connection) -> Result<()> {
        self.core.disconnect(connection)
    }

    pub fn disconnect_all(&self) -> usize {
        self.core.disconnect_all()
    }

    pub fn block(&self, blocked: bool) -> bool {
        self.core.block(blocked)
    }

    pub fn is_blocked(&self) -> bool {
        self.core.is_blocked()
    }

    pub fn connection_count(&self) -> usize {
        self.core.connection_count()
    }
}
