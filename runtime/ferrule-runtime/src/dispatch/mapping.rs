use std::ffi::c_int;

use ferrule_obj_model::RawObject;

use super::{borrowed, guard, new_ref, optional};
use crate::extension::ExtensionObject;
use crate::identity::resolve;

pub(crate) unsafe extern "C" fn length<T: ExtensionObject>(obj: *mut RawObject) -> isize {
    guard("mapping_length", || {
        let this = unsafe { resolve::<T>(obj) }?;
        this.mapping_length()
    })
}

pub(crate) unsafe extern "C" fn subscript<T: ExtensionObject>(
    obj: *mut RawObject,
    key: *mut RawObject,
) -> *mut RawObject {
    guard("mapping_subscript", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let key = unsafe { borrowed(key, "mapping_subscript") }?;
        this.mapping_subscript(&key).map(new_ref)
    })
}

/// A null `value` is a deletion.
pub(crate) unsafe extern "C" fn ass_subscript<T: ExtensionObject>(
    obj: *mut RawObject,
    key: *mut RawObject,
    value: *mut RawObject,
) -> c_int {
    guard("mapping_ass_subscript", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let key = unsafe { borrowed(key, "mapping_ass_subscript") }?;
        let value = unsafe { optional(value) };
        this.mapping_ass_subscript(&key, value.as_ref()).map(|()| 0)
    })
}
