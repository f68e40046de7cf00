//! Generic attribute lookup and assignment.
//!
//! Host-side helpers report failure as `None` with the error slot set.

use std::ffi::{CString, c_int};

use crate::builtins::{self, as_str, instance_dict};
use crate::errors::{self, ATTRIBUTE_ERROR, TYPE_ERROR};
use crate::{ObjRef, RawObject};

fn no_attribute(obj: &ObjRef, name: &str) {
    let msg = format!("'{}' object has no attribute '{}'", obj.type_name(), name);
    errors::err_set_string(&ATTRIBUTE_ERROR, &msg);
}

/// Instance-dict lookup; `AttributeError` when the attribute is absent.
pub fn generic_getattr(obj: &ObjRef, name: &ObjRef) -> Option<ObjRef> {
    let Some(key) = as_str(name) else {
        errors::err_set_string(&TYPE_ERROR, "attribute name must be a string");
        return None;
    };
    if let Some(value) = instance_dict(obj).and_then(|dict| builtins::dict_get_str(dict, key)) {
        return Some(value);
    }
    no_attribute(obj, key);
    None
}

/// Store into (or delete from, when `value` is `None`) the instance dict.
pub fn generic_setattr(obj: &ObjRef, name: &ObjRef, value: Option<&ObjRef>) -> Option<()> {
    let Some(key) = as_str(name) else {
        errors::err_set_string(&TYPE_ERROR, "attribute name must be a string");
        return None;
    };
    let Some(dict) = instance_dict(obj) else {
        let msg = format!(
            "'{}' object attribute '{}' is read-only",
            obj.type_name(),
            key
        );
        errors::err_set_string(&ATTRIBUTE_ERROR, &msg);
        return None;
    };
    match value {
        Some(value) => {
            builtins::dict_set(dict, name.clone(), value.clone());
        }
        None => {
            if !builtins::dict_del(dict, name) {
                no_attribute(obj, key);
                return None;
            }
        }
    }
    Some(())
}

pub unsafe extern "C" fn generic_getattro_slot(
    obj: *mut RawObject,
    name: *mut RawObject,
) -> *mut RawObject {
    let (Some(obj), Some(name)) = (unsafe { ObjRef::from_borrowed_ptr(obj) }, unsafe {
        ObjRef::from_borrowed_ptr(name)
    }) else {
        return errors::raise_null(&errors::SYSTEM_ERROR, "getattr with a null operand");
    };
    match generic_getattr(&obj, &name) {
        Some(value) => value.into_ptr(),
        None => std::ptr::null_mut(),
    }
}

pub unsafe extern "C" fn generic_setattro_slot(
    obj: *mut RawObject,
    name: *mut RawObject,
    value: *mut RawObject,
) -> c_int {
    let (Some(obj), Some(name)) = (unsafe { ObjRef::from_borrowed_ptr(obj) }, unsafe {
        ObjRef::from_borrowed_ptr(name)
    }) else {
        errors::err_set_string(&errors::SYSTEM_ERROR, "setattr with a null operand");
        return -1;
    };
    let value = unsafe { ObjRef::from_borrowed_ptr(value) };
    match generic_setattr(&obj, &name, value.as_ref()) {
        Some(()) => 0,
        None => -1,
    }
}

/// `getattr(obj, name)` through the object's type slots.
pub fn getattr(obj: &ObjRef, name: &str) -> Option<ObjRef> {
    let ty = obj.type_object();
    if let Some(getattro) = ty.tp_getattro {
        let key = builtins::str(name);
        let result = unsafe { getattro(obj.as_ptr(), key.as_ptr()) };
        return owned_result(result, "tp_getattro");
    }
    if let Some(getattr) = ty.tp_getattr {
        let Ok(c_name) = CString::new(name) else {
            no_attribute(obj, name);
            return None;
        };
        let result = unsafe { getattr(obj.as_ptr(), c_name.as_ptr()) };
        return owned_result(result, "tp_getattr");
    }
    no_attribute(obj, name);
    None
}

/// `setattr(obj, name, value)`; `None` deletes.
pub fn setattr(obj: &ObjRef, name: &str, value: Option<&ObjRef>) -> Option<()> {
    let ty = obj.type_object();
    let raw_value = value.map_or(std::ptr::null_mut(), ObjRef::as_ptr);
    let status = if let Some(setattro) = ty.tp_setattro {
        let key = builtins::str(name);
        unsafe { setattro(obj.as_ptr(), key.as_ptr(), raw_value) }
    } else if let Some(setattr) = ty.tp_setattr {
        let Ok(c_name) = CString::new(name) else {
            no_attribute(obj, name);
            return None;
        };
        unsafe { setattr(obj.as_ptr(), c_name.as_ptr(), raw_value) }
    } else {
        let msg = format!("'{}' object has only read-only attributes", obj.type_name());
        errors::err_set_string(&TYPE_ERROR, &msg);
        return None;
    };
    if status < 0 {
        errors::err_ensure_set("tp_setattro");
        return None;
    }
    Some(())
}

pub(crate) fn owned_result(result: *mut RawObject, context: &str) -> Option<ObjRef> {
    let obj = unsafe { ObjRef::from_owned_ptr(result) };
    if obj.is_none() {
        errors::err_ensure_set(context);
    }
    obj
}
