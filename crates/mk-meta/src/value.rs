//! Type-erased values.
//!
//! A [`Value`] is cheap to clone: the payload is shared behind an `Arc`, the
//! same way the framework shares event payloads between receivers.

use core::fmt;
use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::descriptor::{Descriptor, ValueFlags};

/// Bound satisfied by every type that can travel inside a [`Value`].
pub trait MetaValue: Any + Clone + PartialEq + fmt::Debug + Send + Sync {}

impl<T> MetaValue for T where T: Any + Clone + PartialEq + fmt::Debug + Send + Sync {}

trait ErasedValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn ErasedValue) -> bool;
    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T: MetaValue> ErasedValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn ErasedValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Boxed dynamically-typed value carrying its descriptor.
#[derive(Clone)]
pub struct Value {
    data: Arc<dyn ErasedValue>,
    descriptor: Descriptor,
}

impl Value {
    pub fn new<T: MetaValue>(value: T) -> Self {
        Self {
            data: Arc::new(value),
            descriptor: Descriptor::of::<T>(),
        }
    }

    /// Returns the same payload re-described with `flags`.
    pub fn with_flags(mut self, flags: ValueFlags) -> Self {
        self.descriptor = self.descriptor.with_flags(flags);
        self
    }

    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn rtti(&self) -> TypeId {
        self.descriptor.rtti()
    }

    pub fn type_name(&self) -> &'static str {
        self.descriptor.name()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.rtti() == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.data.as_any().downcast_ref::<T>()
    }

    /// Clones the payload out when it is exactly a `T`.
    pub fn get<T: MetaValue>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Type + content equality. Passing flags are ignored.
    pub fn equal(a: &Value, b: &Value) -> bool {
        a.rtti() == b.rtti() && a.data.dyn_eq(b.data.as_ref())
    }

    /// True when both values share the same allocation.
    pub fn ptr_eq(a: &Value, b: &Value) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        Value::equal(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>(", self.descriptor)?;
        self.data.dyn_fmt(f)?;
        f.write_str(")")
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::new(())
    }
}

macro_rules! value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::new(value)
                }
            }
        )*
    };
}

value_from!(bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, String, char, ());

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::new(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_requires_same_type_and_content() {
        assert_eq!(Value::new(3_i32), Value::new(3_i32));
        assert_ne!(Value::new(3_i32), Value::new(4_i32));
        assert_ne!(Value::new(3_i32), Value::new(3_i64));
    }

    #[test]
    fn flags_do_not_affect_equality() {
        let plain = Value::new(String::from("x"));
        let as_ref = plain.clone().with_flags(ValueFlags::REFERENCE | ValueFlags::CONST);
        assert!(as_ref.descriptor().is_const());
        assert_eq!(plain, as_ref);
        assert!(Value::ptr_eq(&plain, &as_ref));
    }

    #[test]
    fn downcast_round() {
        let value = Value::from("hello");
        assert!(value.is::<String>());
        assert_eq!(value.get::<String>().as_deref(), Some("hello"));
        assert_eq!(value.get::<i32>(), None);
    }
}
