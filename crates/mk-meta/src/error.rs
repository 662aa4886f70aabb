use thiserror::Error;

/// Errors raised by value conversion and type registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("bad type conversion from `{from}` to `{to}`")]
    BadTypeConversion { from: &'static str, to: &'static str },
    #[error("argument index {index} out of range ({len} arguments)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("type name `{0}` already registered for a different type")]
    DuplicateType(String),
}

pub type Result<T, E = MetaError> = core::result::Result<T, E>;
