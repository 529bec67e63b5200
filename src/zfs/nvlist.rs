// zfs/nvlist.rs
// Owned and borrowed views over native name/value lists

use super::backend::{NativeZfs, NV_UNIQUE_NAME};
use super::byref::{BooleanSlot, PtrSlot};
use super::error::{Result, ZfsError};
use super::handle::NvListPtr;
use super::helpers::to_cstring;
use std::ffi::{c_int, c_uint, CString};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// A value that can be stored with [`NvList::put`].
#[derive(Debug, Clone, Copy)]
pub enum NvValue<'a> {
    Str(&'a str),
    Bool(bool),
    /// Copied into the target list; the argument stays owned by the caller.
    List(&'a NvList),
}

impl<'a> From<&'a str> for NvValue<'a> {
    fn from(value: &'a str) -> Self {
        NvValue::Str(value)
    }
}

impl<'a> From<&'a String> for NvValue<'a> {
    fn from(value: &'a String) -> Self {
        NvValue::Str(value)
    }
}

impl From<bool> for NvValue<'_> {
    fn from(value: bool) -> Self {
        NvValue::Bool(value)
    }
}

impl<'a> From<&'a NvList> for NvValue<'a> {
    fn from(value: &'a NvList) -> Self {
        NvValue::List(value)
    }
}

/// Map a lookup status: `0` found, `ENOENT` absent, anything else fails.
fn found(op: &str, ret: c_int) -> Result<bool> {
    match ret {
        0 => Ok(true),
        libc::ENOENT => Ok(false),
        errno => Err(ZfsError::marshalling(op, errno)),
    }
}

fn added(op: &str, ret: c_int) -> Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(ZfsError::marshalling(op, ret))
    }
}

/// An nvlist this wrapper allocated. Freed exactly once, on drop.
pub struct NvList {
    native: Arc<dyn NativeZfs>,
    ptr: NvListPtr,
}

impl NvList {
    pub fn alloc(native: Arc<dyn NativeZfs>, flags: c_uint) -> Result<NvList> {
        let mut slot = PtrSlot::<NvListPtr>::new();
        let ret = native.nvlist_alloc(&mut slot, flags);
        if ret != 0 {
            return Err(ZfsError::marshalling("nvlist_alloc", ret));
        }
        let ptr = slot
            .get()
            .ok_or_else(|| ZfsError::marshalling("nvlist_alloc", libc::ENOMEM))?;
        trace!(nvlist = %ptr, "nvlist allocated");
        Ok(NvList { native, ptr })
    }

    /// List with unique-name semantics: a repeated key replaces its value.
    pub fn alloc_map(native: Arc<dyn NativeZfs>) -> Result<NvList> {
        Self::alloc(native, NV_UNIQUE_NAME)
    }

    /// Build a unique-name list of string pairs.
    pub fn from_map<K, V, I>(native: Arc<dyn NativeZfs>, pairs: I) -> Result<NvList>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut list = Self::alloc_map(native)?;
        for (k, v) in pairs {
            list.put(k.as_ref(), v.as_ref())?;
        }
        Ok(list)
    }

    pub fn as_ptr(&self) -> NvListPtr {
        self.ptr
    }

    /// Borrowed view of this list.
    pub fn view(&self) -> NvListRef<'_> {
        NvListRef::new(self.native.as_ref(), self.ptr)
    }

    pub fn put<'v>(&mut self, key: &str, value: impl Into<NvValue<'v>>) -> Result<()> {
        let c_key = to_cstring(key)?;
        match value.into() {
            NvValue::Str(s) => {
                let c_value = CString::new(s)
                    .map_err(|_| ZfsError::marshalling("nvlist_add_string", libc::EINVAL))?;
                added(
                    "nvlist_add_string",
                    self.native.nvlist_add_string(self.ptr, &c_key, &c_value),
                )
            }
            NvValue::Bool(b) => added(
                "nvlist_add_boolean_value",
                self.native.nvlist_add_boolean_value(self.ptr, &c_key, b),
            ),
            NvValue::List(list) => added(
                "nvlist_add_nvlist",
                self.native.nvlist_add_nvlist(self.ptr, &c_key, list.ptr),
            ),
        }
    }

    /// Add a value-less boolean pair.
    pub fn put_flag(&mut self, key: &str) -> Result<()> {
        let c_key = to_cstring(key)?;
        added(
            "nvlist_add_boolean",
            self.native.nvlist_add_boolean(self.ptr, &c_key),
        )
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.view().get_string(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.view().get_bool(key)
    }

    /// Nested list owned by `self`; it cannot outlive this list.
    pub fn get_nested(&self, key: &str) -> Result<Option<NvListRef<'_>>> {
        self.view().get_nested(key)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        self.view().contains(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.view().keys()
    }
}

impl Drop for NvList {
    fn drop(&mut self) {
        trace!(nvlist = %self.ptr, "nvlist freed");
        self.native.nvlist_free(self.ptr);
    }
}

impl fmt::Debug for NvList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NvList").field("ptr", &self.ptr).finish()
    }
}

/// An nvlist owned by something else: a parent list or a dataset handle.
/// Never freed through this view.
#[derive(Clone, Copy)]
pub struct NvListRef<'a> {
    native: &'a dyn NativeZfs,
    ptr: NvListPtr,
    _owner: PhantomData<&'a ()>,
}

impl<'a> NvListRef<'a> {
    pub(crate) fn new(native: &'a dyn NativeZfs, ptr: NvListPtr) -> Self {
        NvListRef {
            native,
            ptr,
            _owner: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> NvListPtr {
        self.ptr
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        let c_key = to_cstring(key)?;
        let mut out = None;
        let ret = self.native.nvlist_lookup_string(self.ptr, &c_key, &mut out);
        Ok(if found("nvlist_lookup_string", ret)? { out } else { None })
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        let c_key = to_cstring(key)?;
        let mut slot = BooleanSlot::default();
        let ret = self
            .native
            .nvlist_lookup_boolean_value(self.ptr, &c_key, &mut slot);
        Ok(found("nvlist_lookup_boolean_value", ret)?.then(|| slot.get()))
    }

    pub fn get_nested(&self, key: &str) -> Result<Option<NvListRef<'a>>> {
        let c_key = to_cstring(key)?;
        let mut slot = PtrSlot::<NvListPtr>::new();
        let ret = self.native.nvlist_lookup_nvlist(self.ptr, &c_key, &mut slot);
        if !found("nvlist_lookup_nvlist", ret)? {
            return Ok(None);
        }
        Ok(slot.get().map(|ptr| NvListRef::new(self.native, ptr)))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        let c_key = to_cstring(key)?;
        Ok(self.native.nvlist_exists(self.ptr, &c_key))
    }

    pub fn keys(&self) -> Vec<String> {
        self.native.nvlist_names(self.ptr)
    }
}

impl fmt::Debug for NvListRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NvListRef").field("ptr", &self.ptr).finish()
    }
}
