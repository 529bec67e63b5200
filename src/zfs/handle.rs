// zfs/handle.rs
// Typed opaque handles: each carries exactly one native address

use std::num::NonZeroUsize;

/// Common surface of the opaque handle newtypes.
///
/// A handle is only an address. It is meaningless without the library
/// context that produced it and carries no ownership of its own; owning
/// wrappers (`Dataset`, `ZfsPool`, `NvList`) decide when it is released.
pub trait OpaqueHandle: Copy + Eq + std::hash::Hash + std::fmt::Debug {
    /// Wrap a native address. Null yields `None`.
    fn from_addr(addr: usize) -> Option<Self>;

    /// The native address this handle stands for.
    fn addr(self) -> usize;
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(NonZeroUsize);

        impl OpaqueHandle for $name {
            fn from_addr(addr: usize) -> Option<Self> {
                NonZeroUsize::new(addr).map($name)
            }

            fn addr(self) -> usize {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}@{:#x}", stringify!($name), self.0.get())
            }
        }
    };
}

opaque_handle!(
    /// `libzfs_handle_t *`
    LibHandle
);
opaque_handle!(
    /// `zfs_handle_t *` (filesystem, snapshot, volume or pool root)
    ZfsHandle
);
opaque_handle!(
    /// `zpool_handle_t *`
    ZpoolHandle
);
opaque_handle!(
    /// `nvlist_t *`
    NvListPtr
);
