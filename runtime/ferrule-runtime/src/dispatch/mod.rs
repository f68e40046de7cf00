//! Trampolines: `extern "C"` functions installed in host slots.
//!
//! Every trampoline resolves `self`, calls the matching `ExtensionObject`
//! method and converts the outcome at the edge: `Ok` values go back as owned
//! pointers or raw primitives, errors are persisted and the slot's sentinel
//! is returned. Panics are not caught; unwinding out of an `extern "C"`
//! frame aborts the process.

pub(crate) mod buffer;
pub(crate) mod mapping;
pub(crate) mod number;
pub(crate) mod object;
pub(crate) mod sequence;

use ferrule_obj_model::errors as host;
use ferrule_obj_model::{ObjRef, RawObject, builtins};
use tracing::{debug, trace};

use crate::bridge::ExceptionKind;
use crate::config;
use crate::error::{ExceptionSentinel, ExtError, ExtResult};

/// Run `f` and translate a failure into the host convention.
///
/// A normal return leaves the error state empty: anything a host helper
/// left behind was handled by the implementation and is discarded.
pub fn guard<R, F>(op: &'static str, f: F) -> R
where
    R: ExceptionSentinel,
    F: FnOnce() -> ExtResult<R>,
{
    match f() {
        Ok(value) => {
            if let Some(stale) = host::err_occurred() {
                debug!(op, kind = stale.name(), "discarding error left by a recovered call");
                host::err_clear();
            }
            value
        }
        Err(err) => {
            if config::trace_dispatch() {
                debug!(op, error = %err, "trampoline translated error");
            } else {
                trace!(op, error = %err, "trampoline translated error");
            }
            err.restore();
            R::exception_sentinel()
        }
    }
}

/// New reference to a borrowed argument; null is a `SystemError`.
pub(crate) unsafe fn borrowed(ptr: *mut RawObject, op: &'static str) -> ExtResult<ObjRef> {
    unsafe { ObjRef::from_borrowed_ptr(ptr) }.ok_or_else(|| {
        ExtError::raised(
            ExceptionKind::SYSTEM_ERROR,
            format!("{op}: null argument"),
        )
    })
}

/// Optional argument: null means "absent" (deletion for assignment slots).
pub(crate) unsafe fn optional(ptr: *mut RawObject) -> Option<ObjRef> {
    unsafe { ObjRef::from_borrowed_ptr(ptr) }
}

/// Items of a positional argument tuple.
pub(crate) fn positional(args: &ObjRef) -> ExtResult<&[ObjRef]> {
    builtins::tuple_items(args).ok_or_else(|| {
        ExtError::raised(
            ExceptionKind::TYPE_ERROR,
            format!("argument list must be a tuple, not {}", args.type_name()),
        )
    })
}

/// Keyword arguments must be a dict when present.
pub(crate) fn keywords(kwargs: Option<ObjRef>) -> ExtResult<Option<ObjRef>> {
    match kwargs {
        Some(kw) if !builtins::is_dict(&kw) => Err(ExtError::raised(
            ExceptionKind::TYPE_ERROR,
            format!("keyword arguments must be a dict, not {}", kw.type_name()),
        )),
        kwargs => Ok(kwargs),
    }
}

pub(crate) fn new_ref(obj: ObjRef) -> *mut RawObject {
    obj.into_ptr()
}
