//! Packed signal arguments.

use crate::descriptor::Signature;
use crate::error::{MetaError, Result};
use crate::registry::{registry, TypeRegistry};
use crate::value::{MetaValue, Value};

/// Ordered values produced at an emit site.
///
/// Carries no type metadata beyond each value's descriptor; a slot applies
/// its own formal signature through [`PackedArgs::get_in`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedArgs {
    values: Vec<Value>,
}

impl PackedArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Descriptors of the packed values, in order.
    pub fn signature(&self) -> Signature {
        self.values.iter().map(Value::descriptor).collect::<Vec<_>>().into()
    }

    /// Argument `index` converted to `T` through `registry`.
    pub fn get_in<T: MetaValue>(&self, registry: &TypeRegistry, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or(MetaError::IndexOutOfRange {
            index,
            len: self.values.len(),
        })?;
        registry.convert_to::<T>(value)
    }

    /// Argument `index` converted to `T` through the process-wide registry.
    pub fn get<T: MetaValue>(&self, index: usize) -> Result<T> {
        self.get_in(&registry(), index)
    }
}

impl From<Vec<Value>> for PackedArgs {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for PackedArgs {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
