// zfs/byref.rs
// Out-parameter slots the native side fills in and the caller reads back

use super::handle::OpaqueHandle;
use std::ffi::{c_char, c_int, c_void};
use std::marker::PhantomData;
use std::ptr;

/// Maximum property value length (`ZFS_MAXPROPLEN`, `MAXPATHLEN`)
pub const ZFS_MAXPROPLEN: usize = 1024;

/// Maximum pool property value length (`ZPOOL_MAXPROPLEN`)
pub const ZPOOL_MAXPROPLEN: usize = 1024;

/// A C enum whose raw values round-trip through an `int` slot.
///
/// Raw values need not be ordinals; bit-valued enums like
/// `zprop_source_t` map their flag values directly.
pub trait NativeEnum: Copy {
    fn from_raw(raw: c_int) -> Option<Self>;
    fn to_raw(self) -> c_int;
}

/// `boolean_t *` out-parameter
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BooleanSlot(c_int);

impl BooleanSlot {
    pub fn new(value: bool) -> Self {
        BooleanSlot(value as c_int)
    }

    pub fn set(&mut self, value: bool) {
        self.0 = value as c_int;
    }

    /// Any nonzero value written by C reads back as `true`.
    pub fn get(&self) -> bool {
        self.0 != 0
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_int {
        &mut self.0
    }
}

/// `enum_t *` out-parameter for a [`NativeEnum`]
#[repr(transparent)]
pub struct EnumSlot<T> {
    raw: c_int,
    _marker: PhantomData<T>,
}

impl<T: NativeEnum> EnumSlot<T> {
    /// An empty slot holds raw `0`.
    pub fn new(value: Option<T>) -> Self {
        EnumSlot {
            raw: value.map(NativeEnum::to_raw).unwrap_or(0),
            _marker: PhantomData,
        }
    }

    pub fn set(&mut self, value: T) {
        self.raw = value.to_raw();
    }

    pub fn raw(&self) -> c_int {
        self.raw
    }

    /// `None` when the native side left a value this binding does not know.
    pub fn get(&self) -> Option<T> {
        T::from_raw(self.raw)
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_int {
        &mut self.raw
    }
}

impl<T: NativeEnum> Default for EnumSlot<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T: NativeEnum + std::fmt::Debug> std::fmt::Debug for EnumSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnumSlot")
            .field("raw", &self.raw)
            .field("value", &self.get())
            .finish()
    }
}

/// `T **` out-parameter for an opaque handle type
#[repr(transparent)]
pub struct PtrSlot<T> {
    ptr: *mut c_void,
    _marker: PhantomData<T>,
}

impl<T: OpaqueHandle> PtrSlot<T> {
    pub fn new() -> Self {
        PtrSlot {
            ptr: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    pub fn set(&mut self, value: Option<T>) {
        self.ptr = value.map_or(ptr::null_mut(), |h| h.addr() as *mut c_void);
    }

    /// Null reads back as `None`.
    pub fn get(&self) -> Option<T> {
        T::from_addr(self.ptr as usize)
    }

    pub fn as_mut_ptr(&mut self) -> *mut *mut c_void {
        &mut self.ptr
    }
}

impl<T: OpaqueHandle> Default for PtrSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: OpaqueHandle> std::fmt::Debug for PtrSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PtrSlot").field(&self.get()).finish()
    }
}

/// Fixed-size `char[ZFS_MAXPROPLEN]` buffer for property reads
#[repr(C)]
pub struct PropBuf {
    bytes: [u8; ZFS_MAXPROPLEN],
}

impl PropBuf {
    pub fn new() -> Self {
        PropBuf {
            bytes: [0; ZFS_MAXPROPLEN],
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_char {
        self.bytes.as_mut_ptr() as *mut c_char
    }

    /// Store `value` NUL-terminated, truncating on a char boundary if it
    /// does not fit.
    pub fn write(&mut self, value: &str) {
        let mut end = value.len().min(self.bytes.len() - 1);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.bytes[..end].copy_from_slice(&value.as_bytes()[..end]);
        self.bytes[end] = 0;
    }

    /// Contents up to the first NUL.
    pub fn read(&self) -> String {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bytes.len());
        String::from_utf8_lossy(&self.bytes[..end]).into_owned()
    }

    pub fn clear(&mut self) {
        self.bytes[0] = 0;
    }
}

impl Default for PropBuf {
    fn default() -> Self {
        Self::new()
    }
}
