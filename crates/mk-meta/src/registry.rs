//! Process-wide type registry and conversion table.

use core::fmt;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::{Descriptor, Signature};
use crate::error::{MetaError, Result};
use crate::value::{MetaValue, Value};

/// Identifier handed out by [`TypeRegistry::register_type`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetaTypeId(pub u32);

impl fmt::Display for MetaTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TYPE({})", self.0)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        const BUILTIN = 0b0001;
        const NUMERIC = 0b0010;
        const TEXT    = 0b0100;
        const USER    = 0b1000;
    }
}

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub id: MetaTypeId,
    pub name: String,
    pub rtti: TypeId,
    pub flags: TypeFlags,
}

/// Converts a value of one concrete type into another. `None` means the
/// particular value cannot be represented in the target type.
pub type Converter = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    types: Vec<TypeInfo>,
    by_rtti: HashMap<TypeId, MetaTypeId>,
    by_name: HashMap<String, MetaTypeId>,
    converters: HashMap<(TypeId, TypeId), Converter>,
}

/// Type registration and conversion lookup.
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Empty registry without builtin converters.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Registry pre-populated with the primitive types and their widening,
    /// narrowing and textual conversions.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        install_builtins(&registry);
        registry
    }

    /// Registers `rtti` under `name`. Registering the same type twice returns
    /// the existing id.
    pub fn register_type(&self, name: &str, rtti: TypeId, flags: TypeFlags) -> Result<MetaTypeId> {
        let mut state = self.state.write();
        if let Some(id) = state.by_rtti.get(&rtti) {
            return Ok(*id);
        }
        if state.by_name.contains_key(name) {
            return Err(MetaError::DuplicateType(name.to_owned()));
        }
        let id = MetaTypeId(state.types.len() as u32 + 1);
        state.types.push(TypeInfo {
            id,
            name: name.to_owned(),
            rtti,
            flags,
        });
        state.by_rtti.insert(rtti, id);
        state.by_name.insert(name.to_owned(), id);
        log::trace!("registered type {name} as {id}");
        Ok(id)
    }

    pub fn register<T: MetaValue>(&self, flags: TypeFlags) -> Result<MetaTypeId> {
        self.register_type(std::any::type_name::<T>(), TypeId::of::<T>(), flags)
    }

    pub fn type_id_of(&self, rtti: TypeId) -> Option<MetaTypeId> {
        self.state.read().by_rtti.get(&rtti).copied()
    }

    pub fn type_by_name(&self, name: &str) -> Option<MetaTypeId> {
        self.state.read().by_name.get(name).copied()
    }

    pub fn info(&self, id: MetaTypeId) -> Option<TypeInfo> {
        let state = self.state.read();
        state.types.get((id.0 as usize).checked_sub(1)?).cloned()
    }

    /// Installs an infallible converter from `F` to `T`.
    pub fn register_converter<F, T, C>(&self, convert: C)
    where
        F: MetaValue,
        T: MetaValue,
        C: Fn(&F) -> T + Send + Sync + 'static,
    {
        self.register_fallible_converter::<F, T, _>(move |from| Some(convert(from)));
    }

    /// Installs a converter that may reject individual values.
    pub fn register_fallible_converter<F, T, C>(&self, convert: C)
    where
        F: MetaValue,
        T: MetaValue,
        C: Fn(&F) -> Option<T> + Send + Sync + 'static,
    {
        let converter: Converter =
            Arc::new(move |value: &Value| value.downcast_ref::<F>().and_then(&convert).map(Value::new));
        self.state
            .write()
            .converters
            .insert((TypeId::of::<F>(), TypeId::of::<T>()), converter);
    }

    pub fn find_converter(&self, from: TypeId, to: TypeId) -> Option<Converter> {
        self.state.read().converters.get(&(from, to)).cloned()
    }

    pub fn equal(&self, a: &Value, b: &Value) -> bool {
        Value::equal(a, b)
    }

    /// `(registered type id, is_ref, is_const)` of `value`.
    pub fn descriptor(&self, value: &Value) -> (Option<MetaTypeId>, bool, bool) {
        let descriptor = value.descriptor();
        (
            self.type_id_of(descriptor.rtti()),
            descriptor.is_reference(),
            descriptor.is_const(),
        )
    }

    /// Converts `value` so that it matches `to`.
    pub fn convert(&self, value: &Value, to: &Descriptor) -> Result<Value> {
        if value.rtti() == to.rtti() {
            return Ok(value.clone().with_flags(to.flags()));
        }
        self.find_converter(value.rtti(), to.rtti())
            .and_then(|convert| convert(value))
            .map(|converted| converted.with_flags(to.flags()))
            .ok_or(MetaError::BadTypeConversion {
                from: value.type_name(),
                to: to.name(),
            })
    }

    /// Typed conversion of `value` into `T`.
    pub fn convert_to<T: MetaValue>(&self, value: &Value) -> Result<T> {
        if let Some(direct) = value.downcast_ref::<T>() {
            return Ok(direct.clone());
        }
        let converted = self.convert(value, &Descriptor::of::<T>())?;
        converted.get::<T>().ok_or(MetaError::BadTypeConversion {
            from: value.type_name(),
            to: std::any::type_name::<T>(),
        })
    }

    /// Whether a formal parameter described by `formal` accepts an actual
    /// argument described by `actual`.
    ///
    /// A non-const reference binds only to a non-const reference of the same
    /// type. Everything else accepts the same type or a registered conversion.
    pub fn is_assignable(&self, formal: &Descriptor, actual: &Descriptor) -> bool {
        if formal.is_mutable_reference() {
            return actual.is_mutable_reference() && formal.same_type(actual);
        }
        formal.same_type(actual)
            || self
                .state
                .read()
                .converters
                .contains_key(&(actual.rtti(), formal.rtti()))
    }

    /// `formal` is invocable with `actual` iff it takes no more arguments and
    /// each one is assignable from the corresponding actual.
    pub fn invocable_with(&self, formal: &Signature, actual: &Signature) -> bool {
        formal.len() <= actual.len()
            && formal
                .iter()
                .zip(actual.iter())
                .all(|(formal, actual)| self.is_assignable(formal, actual))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("TypeRegistry")
            .field("types", &state.types.len())
            .field("converters", &state.converters.len())
            .finish()
    }
}

static GLOBAL: RwLock<Option<Arc<TypeRegistry>>> = parking_lot::const_rwlock(None);

/// Installs the builtin registry unless one is already present.
pub fn init() -> Arc<TypeRegistry> {
    if let Some(existing) = GLOBAL.read().as_ref() {
        return Arc::clone(existing);
    }
    let mut slot = GLOBAL.write();
    let registry = slot.get_or_insert_with(|| {
        log::debug!("initialising builtin type registry");
        Arc::new(TypeRegistry::with_builtins())
    });
    Arc::clone(registry)
}

/// Replaces the process-wide registry.
pub fn install(registry: Arc<TypeRegistry>) {
    *GLOBAL.write() = Some(registry);
}

/// Drops the process-wide registry. Holders of an `Arc` keep theirs alive.
pub fn shutdown() {
    if GLOBAL.write().take().is_some() {
        log::debug!("type registry shut down");
    }
}

/// The process-wide registry, initialised on first use.
pub fn registry() -> Arc<TypeRegistry> {
    init()
}

macro_rules! register_primitives {
    ($registry:expr, $flags:expr, $($ty:ty),*) => {
        $( let _ = $registry.register::<$ty>(TypeFlags::BUILTIN | $flags); )*
    };
}

macro_rules! widen {
    ($registry:expr, $from:ty => $($to:ty),*) => {
        $( $registry.register_converter::<$from, $to, _>(|value| <$to>::from(*value)); )*
    };
}

macro_rules! narrow {
    ($registry:expr, $from:ty => $($to:ty),*) => {
        $( $registry.register_fallible_converter::<$from, $to, _>(|value| <$to>::try_from(*value).ok()); )*
    };
}

macro_rules! textual {
    ($registry:expr, $($ty:ty),*) => {
        $(
            $registry.register_converter::<$ty, String, _>(|value| value.to_string());
            $registry.register_fallible_converter::<String, $ty, _>(|text| text.trim().parse::<$ty>().ok());
        )*
    };
}

fn install_builtins(registry: &TypeRegistry) {
    register_primitives!(registry, TypeFlags::NUMERIC, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);
    register_primitives!(registry, TypeFlags::TEXT, String, char);
    register_primitives!(registry, TypeFlags::empty(), bool, ());

    widen!(registry, i8 => i16, i32, i64, f32, f64);
    widen!(registry, i16 => i32, i64, f32, f64);
    widen!(registry, i32 => i64, f64);
    widen!(registry, u8 => u16, u32, u64, i16, i32, i64, f32, f64);
    widen!(registry, u16 => u32, u64, i32, i64, f32, f64);
    widen!(registry, u32 => u64, i64, f64);
    widen!(registry, f32 => f64);

    narrow!(registry, i64 => i32, i16, i8, u64, u32, u16, u8, usize);
    narrow!(registry, i32 => i16, i8, u32, u16, u8, usize);
    narrow!(registry, u64 => u32, u16, u8, i64, i32, usize);
    narrow!(registry, u32 => u16, u8, i32, usize);
    narrow!(registry, usize => u64, u32, i64, i32);

    registry.register_converter::<i64, f64, _>(|value| *value as f64);
    registry.register_converter::<u64, f64, _>(|value| *value as f64);
    registry.register_fallible_converter::<f64, i64, _>(|value| {
        // i64::MAX as f64 rounds up to 2^63, hence the half-open range.
        (value.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(value)).then_some(*value as i64)
    });
    registry.register_fallible_converter::<f64, i32, _>(|value| {
        (value.fract() == 0.0 && *value >= i32::MIN as f64 && *value <= i32::MAX as f64)
            .then_some(*value as i32)
    });
    registry.register_converter::<bool, i32, _>(|value| i32::from(*value));
    registry.register_converter::<char, String, _>(|value| value.to_string());

    textual!(registry, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, bool);
}
