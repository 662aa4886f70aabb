//! Value descriptors and argument signatures.

use core::fmt;
use std::any::TypeId;

bitflags::bitflags! {
    /// Passing convention of a value: by value, by reference, const or not.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValueFlags: u8 {
        const REFERENCE = 0b0000_0001;
        const CONST     = 0b0000_0010;
    }
}

/// Describes one value: its concrete type and passing convention.
#[derive(Clone, Copy)]
pub struct Descriptor {
    rtti: TypeId,
    name: &'static str,
    flags: ValueFlags,
}

impl Descriptor {
    /// Descriptor of a by-value `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            rtti: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            flags: ValueFlags::empty(),
        }
    }

    /// Mutable reference to `T`.
    pub fn reference_to<T: 'static>() -> Self {
        Self::of::<T>().with_flags(ValueFlags::REFERENCE)
    }

    /// Const reference to `T`.
    pub fn const_reference_to<T: 'static>() -> Self {
        Self::of::<T>().with_flags(ValueFlags::REFERENCE | ValueFlags::CONST)
    }

    pub fn with_flags(mut self, flags: ValueFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn rtti(&self) -> TypeId {
        self.rtti
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn flags(&self) -> ValueFlags {
        self.flags
    }

    pub fn is_reference(&self) -> bool {
        self.flags.contains(ValueFlags::REFERENCE)
    }

    pub fn is_const(&self) -> bool {
        self.flags.contains(ValueFlags::CONST)
    }

    /// A non-const reference only binds to a non-const reference of the
    /// exact same type.
    pub fn is_mutable_reference(&self) -> bool {
        self.is_reference() && !self.is_const()
    }

    pub fn same_type(&self, other: &Descriptor) -> bool {
        self.rtti == other.rtti
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.rtti == other.rtti && self.flags == other.flags
    }
}

impl Eq for Descriptor {}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_reference(), self.is_const()) {
            (true, true) => write!(f, "&{}", self.name),
            (true, false) => write!(f, "&mut {}", self.name),
            (false, true) => write!(f, "const {}", self.name),
            (false, false) => f.write_str(self.name),
        }
    }
}

/// Ordered argument descriptors of a signal or slot.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Signature(Vec<Descriptor>);

impl Signature {
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        Self(descriptors)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Descriptor> {
        self.0.get(index)
    }

    pub fn push(&mut self, descriptor: Descriptor) {
        self.0.push(descriptor);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Descriptor] {
        &self.0
    }
}

impl From<Vec<Descriptor>> for Signature {
    fn from(value: Vec<Descriptor>) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (idx, descriptor) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{descriptor}")?;
        }
        f.write_str(")")
    }
}
