//! # mk-core
//!
//! Reactive object runtime of the metakernel. Objects expose typed
//! [`Signal`]s and [`Property`]s; properties can be driven by [`Binding`]s
//! that re-evaluate when the properties they read change. Every thread runs
//! a cooperative [`RunLoop`] multiplexing events, timers, I/O notifiers and
//! idle tasks, and signals crossing threads are delivered through it.
//!
//! ## Module Overview
//! - [`sync`]     – [`Lockable`] host locks and scope unlocking.
//! - [`signal`]   – Signals, connections and slot adapters.
//! - [`property`] – Typed properties with change notification.
//! - [`binding`]  – Bindings, binding groups and two-way binding.
//! - [`event`]    – Events, targets and deferred signals.
//! - [`queue`]    – Priority event queue with compression.
//! - [`source`]   – Run-loop sources (events, timers, notifiers, idle).
//! - [`run_loop`] – The per-thread run loop.
//! - [`platform`] – Pollers and the factory for run loops.
//! - [`thread`]   – Thread records, workers and applets.
//! - [`object`]   – Object tree with thread affinity.

pub mod binding;
pub mod error;
pub mod event;
pub mod id;
pub mod object;
pub mod platform;
pub mod property;
pub mod queue;
pub mod run_loop;
pub mod signal;
pub mod source;
pub mod sync;
pub mod thread;

pub use binding::{
    bind_properties, untracked, Binding, BindingGroup, BindingPolicy, BindingState, NormalizeOutcome, Normalizer,
};
pub use error::{Error, Result};
pub use event::{DeferredSignal, Event, EventPayload, EventTarget, EventType, Priority, TargetRef};
pub use id::{BindingId, ConnectionId, NotifierId, ObjectId, PropertyId, SignalId, ThreadDataId, TimerId};
pub use object::{post_event, Object};
pub use platform::{Platform, Poller, PortablePlatform};
pub use property::{Property, PropertyWriter};
pub use queue::EventQueue;
pub use run_loop::{ExecuteFlags, ExecuteStatus, RunLoop, RunLoopConfig, RunLoopKind};
pub use signal::{Connection, ConnectionType, ScopedConnection, Signal, SlotHolder, Slots};
pub use source::{IdleStatus, IoHandle, Notifier, NotifierModes, Source, Timer};
pub use sync::{Lockable, ScopeUnlock};
pub use thread::{Thread, ThreadConfig, ThreadData, ThreadKind, ThreadStatus};

pub use mk_meta::{Descriptor, MetaValue, PackedArgs, Signature, TypeRegistry, Value};

#[cfg(test)]
mod tests;
