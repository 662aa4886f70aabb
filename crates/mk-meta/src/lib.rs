//! # mk-meta
//!
//! Dynamically typed values consumed by the metakernel runtime. Signals pack
//! their arguments into [`Value`]s, properties store one, and bindings return
//! one from their expressions.
//!
//! ## Module Overview
//! - [`value`]      – Type-erased [`Value`] with type + content equality.
//! - [`descriptor`] – [`Descriptor`] and argument [`Signature`]s.
//! - [`args`]       – [`PackedArgs`] produced at an emit site.
//! - [`registry`]   – [`TypeRegistry`] with type registration and converters.
//!
//! The registry is process-wide state with an explicit lifecycle: call
//! [`init`] at startup and [`shutdown`] when done. Operations that need
//! conversions take a `&TypeRegistry`; the `*_global` conveniences resolve
//! [`registry()`] for callers that do not carry one around.

pub mod args;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod value;

pub use args::PackedArgs;
pub use descriptor::{Descriptor, Signature, ValueFlags};
pub use error::{MetaError, Result};
pub use registry::{init, install, registry, shutdown, Converter, MetaTypeId, TypeFlags, TypeInfo, TypeRegistry};
pub use value::{MetaValue, Value};

#[cfg(test)]
mod tests;
