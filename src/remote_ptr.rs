use std::{
    fmt::{Display, Formatter, Result},
    marker::PhantomData,
};

/// Useful alias.
pub type Void = u8;

/// An address in the tracee. Never dereferenced in the tracer's own address space.
#[derive(Hash, Debug)]
/// Manually derive Copy, Clone due to quirks with PhantomData
pub struct RemotePtr<T> {
    ptr: u64,
    phantom: PhantomData<*const T>,
}

impl<T> Clone for RemotePtr<T> {
    fn clone(&self) -> Self {
        RemotePtr {
            ptr: self.ptr,
            phantom: PhantomData,
        }
    }
}

impl<T> Copy for RemotePtr<T> {}

impl<T> PartialEq for RemotePtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for RemotePtr<T> {}

impl<T> RemotePtr<T> {
    pub fn new_from_val(val: u64) -> RemotePtr<T> {
        RemotePtr {
            ptr: val,
            phantom: PhantomData,
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr == 0
    }
}

impl<T> Display for RemotePtr<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{:#x}", self.ptr)
    }
}
