//! Exception kinds and the per-thread persisted error slot.

use std::cell::RefCell;
use std::ffi::CString;
use std::mem::size_of;

use crate::abi::{TPFLAGS_BASETYPE, TPFLAGS_HEAPTYPE, TPFLAGS_READY, TypeObject};
use crate::builtins::{self, InstanceObject};
use crate::{ObjRef, RawObject};

const fn exception_type(name: &'static std::ffi::CStr, base: *const TypeObject) -> TypeObject {
    let mut ty = TypeObject::new(name, size_of::<InstanceObject>());
    ty.tp_base = base;
    ty.tp_flags = TPFLAGS_BASETYPE | TPFLAGS_READY;
    ty
}

pub static BASE_EXCEPTION: TypeObject = exception_type(c"BaseException", std::ptr::null());
pub static EXCEPTION: TypeObject = exception_type(c"Exception", &BASE_EXCEPTION);
pub static STOP_ITERATION: TypeObject = exception_type(c"StopIteration", &EXCEPTION);
pub static RUNTIME_ERROR: TypeObject = exception_type(c"RuntimeError", &EXCEPTION);
pub static NOT_IMPLEMENTED_ERROR: TypeObject =
    exception_type(c"NotImplementedError", &RUNTIME_ERROR);
pub static TYPE_ERROR: TypeObject = exception_type(c"TypeError", &EXCEPTION);
pub static ATTRIBUTE_ERROR: TypeObject = exception_type(c"AttributeError", &EXCEPTION);
pub static LOOKUP_ERROR: TypeObject = exception_type(c"LookupError", &EXCEPTION);
pub static INDEX_ERROR: TypeObject = exception_type(c"IndexError", &LOOKUP_ERROR);
pub static KEY_ERROR: TypeObject = exception_type(c"KeyError", &LOOKUP_ERROR);
pub static VALUE_ERROR: TypeObject = exception_type(c"ValueError", &EXCEPTION);
pub static ARITHMETIC_ERROR: TypeObject = exception_type(c"ArithmeticError", &EXCEPTION);
pub static ZERO_DIVISION_ERROR: TypeObject =
    exception_type(c"ZeroDivisionError", &ARITHMETIC_ERROR);
pub static SYSTEM_ERROR: TypeObject = exception_type(c"SystemError", &EXCEPTION);

/// Create a new exception kind named `name` (usually `module.Name`) deriving
/// from `base`. The type lives for the rest of the process.
pub fn new_exception_type(name: &str, base: &'static TypeObject) -> Option<&'static TypeObject> {
    let Ok(c_name) = CString::new(name) else {
        err_set_string(&VALUE_ERROR, "exception name contains a NUL byte");
        return None;
    };
    if !base.is_subtype(&BASE_EXCEPTION) {
        let msg = format!("'{}' is not an exception kind", base.name());
        err_set_string(&TYPE_ERROR, &msg);
        return None;
    }
    let mut ty = exception_type(c"", base);
    ty.tp_name = c_name.into_raw();
    ty.tp_flags |= TPFLAGS_HEAPTYPE;
    Some(Box::leak(Box::new(ty)))
}

struct ErrorState {
    kind: &'static TypeObject,
    value: Option<ObjRef>,
}

thread_local! {
    static CURRENT: RefCell<Option<ErrorState>> = const { RefCell::new(None) };
}

// The previous value is dropped after the borrow ends: releasing it may run
// arbitrary deallocators that touch the error slot again.
fn replace_current(next: Option<ErrorState>) -> Option<ErrorState> {
    CURRENT.with(|cell| cell.replace(next))
}

pub fn err_set_object(kind: &'static TypeObject, value: Option<ObjRef>) {
    let previous = replace_current(Some(ErrorState { kind, value }));
    drop(previous);
}

pub fn err_set_string(kind: &'static TypeObject, message: &str) {
    err_set_object(kind, Some(builtins::str(message)));
}

pub fn err_occurred() -> Option<&'static TypeObject> {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|state| state.kind))
}

/// True when an error is pending and its kind is `kind` or derives from it.
pub fn err_matches(kind: &TypeObject) -> bool {
    err_occurred().is_some_and(|current| current.is_subtype(kind))
}

pub fn err_clear() {
    drop(replace_current(None));
}

/// Take the pending error, leaving the slot empty.
pub fn err_fetch() -> Option<(&'static TypeObject, Option<ObjRef>)> {
    replace_current(None).map(|state| (state.kind, state.value))
}

pub fn err_restore(kind: &'static TypeObject, value: Option<ObjRef>) {
    err_set_object(kind, value);
}

/// Set `SystemError` unless an error is already pending. Used where a slot
/// returned its error sentinel without setting anything.
pub fn err_ensure_set(context: &str) {
    if err_occurred().is_none() {
        let msg = format!("{context} returned an error without setting an exception");
        err_set_string(&SYSTEM_ERROR, &msg);
    }
}

/// Message carried by a pending error value when it is a string.
pub fn err_message() -> Option<String> {
    CURRENT.with(|cell| {
        let state = cell.borrow();
        let value = state.as_ref()?.value.as_ref()?;
        builtins::as_str(value).map(str::to_owned)
    })
}

/// Convenience for slot implementations: set `kind` and hand back the null
/// result pointer.
pub fn raise_null(kind: &'static TypeObject, message: &str) -> *mut RawObject {
    err_set_string(kind, message);
    std::ptr::null_mut()
}
