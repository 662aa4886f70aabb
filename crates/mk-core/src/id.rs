//! Process-unique identifiers.

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub(crate) fn next() -> Self {
                static NEXT: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);
                Self(NEXT.fetch_add(1, core::sync::atomic::Ordering::Relaxed))
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($tag, "({})"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifies a signal core.
    SignalId,
    "SIG"
);
define_id!(ConnectionId, "CONN");
define_id!(
    /// Identifies a property core.
    PropertyId,
    "PROP"
);
define_id!(BindingId, "BIND");
define_id!(ObjectId, "OBJ");
define_id!(TimerId, "TIMER");
define_id!(NotifierId, "NOTIFIER");
define_id!(
    /// Identifies a thread's ownership record.
    ThreadDataId,
    "THREAD"
);
