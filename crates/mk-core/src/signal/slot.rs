//! Typed adapters between Rust callables and packed activations.

use mk_meta::{Descriptor, MetaValue, PackedArgs, Signature, TypeRegistry, Value};

use crate::error::Result;

/// Argument tuple of a typed signal.
pub trait Arguments: Send + 'static {
    fn signature() -> Signature;
    fn pack(self) -> PackedArgs;
}

/// Return types accepted from slots.
pub trait SlotResult {
    fn into_result(self) -> Result<()>;
}

impl SlotResult for () {
    fn into_result(self) -> Result<()> {
        Ok(())
    }
}

impl SlotResult for Result<()> {
    fn into_result(self) -> Result<()> {
        self
    }
}

/// Free callable connectable to a signal. `M` is the argument tuple the
/// callable takes; it only exists to keep the impls apart.
pub trait Slot<M>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn invoke(&self, args: &PackedArgs, registry: &TypeRegistry) -> Result<()>;
}

/// Callable taking a receiver reference followed by the slot arguments.
pub trait Method<R, M>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn invoke(&self, receiver: &R, args: &PackedArgs, registry: &TypeRegistry) -> Result<()>;
}

macro_rules! impl_arity {
    ($($ty:ident $var:ident $idx:tt),*) => {
        impl<$($ty: MetaValue),*> Arguments for ($($ty,)*) {
            fn signature() -> Signature {
                Signature::new(vec![$(Descriptor::of::<$ty>()),*])
            }

            fn pack(self) -> PackedArgs {
                let ($($var,)*) = self;
                PackedArgs::new(vec![$(Value::new($var)),*])
            }
        }

        impl<Func, Out, $($ty),*> Slot<($($ty,)*)> for Func
        where
            Func: Fn($($ty),*) -> Out + Send + Sync + 'static,
            Out: SlotResult,
            $($ty: MetaValue,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$(Descriptor::of::<$ty>()),*])
            }

            #[allow(unused_variables)]
            fn invoke(&self, args: &PackedArgs, registry: &TypeRegistry) -> Result<()> {
                $(let $var = args.get_in::<$ty>(registry, $idx)?;)*
                (self)($($var),*).into_result()
            }
        }

        impl<Func, Recv, Out, $($ty),*> Method<Recv, ($($ty,)*)> for Func
        where
            Func: Fn(&Recv, $($ty),*) -> Out + Send + Sync + 'static,
            Out: SlotResult,
            $($ty: MetaValue,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$(Descriptor::of::<$ty>()),*])
            }

            #[allow(unused_variables)]
            fn invoke(&self, receiver: &Recv, args: &PackedArgs, registry: &TypeRegistry) -> Result<()> {
                $(let $var = args.get_in::<$ty>(registry, $idx)?;)*
                (self)(receiver, $($var),*).into_result()
            }
        }
    };
}

impl_arity!();
impl_arity!(A a 0);
impl_arity!(A a 0, B b 1);
impl_arity!(A a 0, B b 1, C c 2);
impl_arity!(A a 0, B b 1, C c 2, D d 3);
