use mk_meta::MetaError;
use thiserror::Error;

use crate::id::{BindingId, PropertyId};
use crate::source::NotifierModes;

/// Failures surfaced at the runtime's API boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("write to read-only property {0}")]
    WriteReadOnly(PropertyId),
    #[error("binding {0} is already attached")]
    BindingAlreadyAttached(BindingId),
    #[error("binding {0} is not attached")]
    BindingNotAttached(BindingId),
    #[error("binding {0} lost its source property")]
    InvalidBinding(BindingId),
    #[error("binding loop on {binding} (depth {depth})")]
    BindingLoop { binding: BindingId, depth: usize },
    #[error(transparent)]
    Meta(#[from] MetaError),
    #[error("connection is not attached to a signal")]
    Disconnected,
    #[error("slot signature {formal} is not invocable with {actual}")]
    SignatureMismatch { formal: String, actual: String },
    #[error("slot failed: {0}")]
    Slot(String),
    #[error("a thread cannot join itself")]
    AttemptThreadJoinWithin,
    #[error("thread is not joinable")]
    DetachedThread,
    #[error("invalid thread ownership change: {0}")]
    InvalidThreadOwnershipChange(String),
    #[error("thread panicked")]
    ThreadPanicked,
    #[error("notifier modes {requested:?} not supported by the backend (supported: {supported:?})")]
    UnsupportedNotifierModes {
        requested: NotifierModes,
        supported: NotifierModes,
    },
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    /// True for the variant conversion miss wrapped from `mk-meta`.
    pub fn is_bad_conversion(&self) -> bool {
        matches!(self, Error::Meta(MetaError::BadTypeConversion { .. }))
    }

    /// Builds a slot failure from any displayable error.
    pub fn slot(reason: impl core::fmt::Display) -> Self {
        Error::Slot(reason.to_string())
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
