use std::ffi::c_int;

use ferrule_obj_model::RawObject;

use super::{borrowed, guard, new_ref, optional};
use crate::extension::ExtensionObject;
use crate::identity::resolve;

pub(crate) unsafe extern "C" fn length<T: ExtensionObject>(obj: *mut RawObject) -> isize {
    guard("sequence_length", || {
        let this = unsafe { resolve::<T>(obj) }?;
        this.sequence_length()
    })
}

pub(crate) unsafe extern "C" fn concat<T: ExtensionObject>(
    obj: *mut RawObject,
    other: *mut RawObject,
) -> *mut RawObject {
    guard("sequence_concat", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let other = unsafe { borrowed(other, "sequence_concat") }?;
        this.sequence_concat(&other).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn repeat<T: ExtensionObject>(
    obj: *mut RawObject,
    count: isize,
) -> *mut RawObject {
    guard("sequence_repeat", || {
        let this = unsafe { resolve::<T>(obj) }?;
        this.sequence_repeat(count).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn item<T: ExtensionObject>(
    obj: *mut RawObject,
    index: isize,
) -> *mut RawObject {
    guard("sequence_item", || {
        let this = unsafe { resolve::<T>(obj) }?;
        this.sequence_item(index).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn slice<T: ExtensionObject>(
    obj: *mut RawObject,
    low: isize,
    high: isize,
) -> *mut RawObject {
    guard("sequence_slice", || {
        let this = unsafe { resolve::<T>(obj) }?;
        this.sequence_slice(low, high).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn ass_item<T: ExtensionObject>(
    obj: *mut RawObject,
    index: isize,
    value: *mut RawObject,
) -> c_int {
    guard("sequence_ass_item", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let value = unsafe { optional(value) };
        this.sequence_ass_item(index, value.as_ref()).map(|()| 0)
    })
}

pub(crate) unsafe extern "C" fn ass_slice<T: ExtensionObject>(
    obj: *mut RawObject,
    low: isize,
    high: isize,
    value: *mut RawObject,
) -> c_int {
    guard("sequence_ass_slice", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let value = unsafe { optional(value) };
        this.sequence_ass_slice(low, high, value.as_ref()).map(|()| 0)
    })
}

pub(crate) unsafe extern "C" fn inplace_concat<T: ExtensionObject>(
    obj: *mut RawObject,
    other: *mut RawObject,
) -> *mut RawObject {
    guard("sequence_inplace_concat", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let this_obj = unsafe { borrowed(obj, "sequence_inplace_concat") }?;
        let other = unsafe { borrowed(other, "sequence_inplace_concat") }?;
        this.sequence_inplace_concat(&this_obj, &other).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn inplace_repeat<T: ExtensionObject>(
    obj: *mut RawObject,
    count: isize,
) -> *mut RawObject {
    guard("sequence_inplace_repeat", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let this_obj = unsafe { borrowed(obj, "sequence_inplace_repeat") }?;
        this.sequence_inplace_repeat(&this_obj, count).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn contains<T: ExtensionObject>(
    obj: *mut RawObject,
    value: *mut RawObject,
) -> c_int {
    guard("sequence_contains", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let value = unsafe { borrowed(value, "sequence_contains") }?;
        this.sequence_contains(&value).map(c_int::from)
    })
}
