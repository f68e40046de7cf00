//! Map a raw boundary object to the implementation value it stands for.
//!
//! Non-subclassable types: the host object is the `ExtensionCell<T>`.
//! Subclassable types (`BASETYPE`): the host object is a shell carrying the
//! back-reference handle of its cell. The flag is fixed once the
//! type is registered, so checking it per call is sound.

use ferrule_obj_model::abi::TPFLAGS_BASETYPE;
use ferrule_obj_model::builtins::instance_back_ref;
use ferrule_obj_model::{RawObject, resolve_back_ref};

use crate::bridge::ExceptionKind;
use crate::error::{ExtError, ExtResult};
use crate::extension::{ExtensionCell, ExtensionObject};

/// Resolve the cell backing `raw`.
///
/// # Safety
/// `raw` must be null or a live instance of `T`'s host type (or a host
/// subclass of it), and must stay alive for `'a`.
pub unsafe fn resolve_cell<'a, T: ExtensionObject>(
    raw: *mut RawObject,
) -> ExtResult<&'a ExtensionCell<T>> {
    if raw.is_null() {
        return Err(ExtError::raised(
            ExceptionKind::SYSTEM_ERROR,
            format!("{}: null self", T::NAME),
        ));
    }
    let ty = unsafe { &*(*raw).ob_type };
    if !ty.has_flag(TPFLAGS_BASETYPE) {
        return Ok(unsafe { &*(raw as *const ExtensionCell<T>) });
    }
    let handle = unsafe { instance_back_ref(raw) };
    match resolve_back_ref(handle) {
        Some(cell) => Ok(unsafe { &*(cell as *const ExtensionCell<T>) }),
        None => Err(ExtError::raised(
            ExceptionKind::SYSTEM_ERROR,
            format!(
                "'{}' instance at {raw:p} has no {} implementation attached",
                ty.name(),
                T::NAME
            ),
        )),
    }
}

/// Resolve the implementation value backing `raw`.
///
/// # Safety
/// Same contract as [`resolve_cell`].
pub unsafe fn resolve<'a, T: ExtensionObject>(raw: *mut RawObject) -> ExtResult<&'a T> {
    unsafe { resolve_cell::<T>(raw) }.map(|cell| &cell.value)
}
