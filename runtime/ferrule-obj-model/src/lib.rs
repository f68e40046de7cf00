//! Host object model for Ferrule.
//! Reference-counted objects behind a C-level slot ABI: the runtime side that
//! extension types plug their dispatch tables into.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

pub mod abi;
pub mod attrs;
pub mod builtins;
pub mod call;
pub mod errors;
mod handle_table;
pub mod ops;

pub use abi::TypeObject;
pub use handle_table::{register_back_ref, release_back_ref, reset_back_refs, resolve_back_ref};

/// Header shared by every host object. Extension cells and builtin payloads
/// start with it so a `*mut RawObject` can address any of them.
#[repr(C)]
pub struct RawObject {
    pub ob_refcnt: AtomicIsize,
    pub ob_type: *const TypeObject,
}

// Header fields are an atomic and a pointer to an immutable type object.
unsafe impl Send for RawObject {}
unsafe impl Sync for RawObject {}

/// Refcount given to statically allocated singletons so they never reach zero.
pub const IMMORTAL_REFCNT: isize = 1 << 40;

static LIVE_OBJECTS: AtomicUsize = AtomicUsize::new(0);

impl RawObject {
    pub const fn new(ty: &'static TypeObject) -> Self {
        Self {
            ob_refcnt: AtomicIsize::new(1),
            ob_type: ty as *const TypeObject,
        }
    }

    pub const fn immortal(ty: &'static TypeObject) -> Self {
        Self {
            ob_refcnt: AtomicIsize::new(IMMORTAL_REFCNT),
            ob_type: ty as *const TypeObject,
        }
    }
}

/// Count a heap allocation that will be released through a `tp_dealloc`.
pub fn object_allocated() {
    LIVE_OBJECTS.fetch_add(1, Ordering::Relaxed);
}

pub fn object_freed() {
    LIVE_OBJECTS.fetch_sub(1, Ordering::Relaxed);
}

pub fn live_objects() -> usize {
    LIVE_OBJECTS.load(Ordering::Relaxed)
}

/// # Safety
/// `ptr` must point at a live host object.
pub unsafe fn inc_ref(ptr: *mut RawObject) {
    unsafe { (*ptr).ob_refcnt.fetch_add(1, Ordering::Relaxed) };
}

/// Release one reference; the last release runs the type's `tp_dealloc`.
///
/// # Safety
/// `ptr` must point at a live host object and the caller must own the
/// reference being released.
pub unsafe fn dec_ref(ptr: *mut RawObject) {
    let prev = unsafe { (*ptr).ob_refcnt.fetch_sub(1, Ordering::AcqRel) };
    if prev <= 0 {
        release_underflow(ptr, prev);
        return;
    }
    if prev == 1 {
        let ty = unsafe { (*ptr).ob_type };
        if let Some(dealloc) = unsafe { (*ty).tp_dealloc } {
            unsafe { dealloc(ptr) };
        }
    }
}

#[cfg(feature = "refcount_verify")]
fn release_underflow(ptr: *mut RawObject, prev: isize) {
    panic!("double release of host object {ptr:p} (refcount was {prev})");
}

#[cfg(not(feature = "refcount_verify"))]
fn release_underflow(ptr: *mut RawObject, prev: isize) {
    debug_assert!(false, "double release of host object {ptr:p} (refcount was {prev})");
}

/// # Safety
/// `ptr` must point at a live host object.
pub unsafe fn ref_count(ptr: *mut RawObject) -> isize {
    unsafe { (*ptr).ob_refcnt.load(Ordering::Acquire) }
}

/// Owning handle over one host object reference.
///
/// Cloning takes another reference, dropping releases exactly one. There is
/// no null `ObjRef`: raw pointers are adopted through the fallible
/// constructors and the caller decides what a missing object means.
#[repr(transparent)]
pub struct ObjRef(NonNull<RawObject>);

impl ObjRef {
    /// Adopt a reference the caller already owns (a "new reference").
    ///
    /// # Safety
    /// A non-null `ptr` must point at a live host object whose reference the
    /// caller transfers to the handle.
    pub unsafe fn from_owned_ptr(ptr: *mut RawObject) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Take a fresh reference to an object the caller only borrows.
    ///
    /// # Safety
    /// A non-null `ptr` must point at a live host object.
    pub unsafe fn from_borrowed_ptr(ptr: *mut RawObject) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        unsafe { inc_ref(ptr.as_ptr()) };
        Some(Self(ptr))
    }

    pub fn as_ptr(&self) -> *mut RawObject {
        self.0.as_ptr()
    }

    /// Hand the reference to the caller, typically as an ABI return value.
    pub fn into_ptr(self) -> *mut RawObject {
        let ptr = self.0.as_ptr();
        std::mem::forget(self);
        ptr
    }

    pub fn ref_count(&self) -> isize {
        unsafe { ref_count(self.as_ptr()) }
    }

    pub fn type_object(&self) -> &'static TypeObject {
        unsafe { &*(*self.as_ptr()).ob_type }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_object().name()
    }

    /// Identity comparison.
    pub fn is(&self, other: &ObjRef) -> bool {
        self.0 == other.0
    }
}

impl Clone for ObjRef {
    fn clone(&self) -> Self {
        unsafe { inc_ref(self.as_ptr()) };
        Self(self.0)
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        unsafe { dec_ref(self.as_ptr()) };
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object at {:p}>", self.type_name(), self.as_ptr())
    }
}
