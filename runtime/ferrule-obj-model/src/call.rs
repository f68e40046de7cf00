//! Generic call entry point.

use crate::abi::MethodFn;
use crate::attrs::{self, owned_result};
use crate::builtins::{self, as_cfunction, dict_len, tuple_items};
use crate::errors::{self, SYSTEM_ERROR, TYPE_ERROR};
use crate::ObjRef;

/// Call `callable` with a positional tuple and an optional keyword dict.
pub fn call_object(callable: &ObjRef, args: &ObjRef, kwargs: Option<&ObjRef>) -> Option<ObjRef> {
    let Some(positional) = tuple_items(args) else {
        errors::err_set_string(&SYSTEM_ERROR, "call arguments must be a tuple");
        return None;
    };
    let kwargs = match kwargs.map(|kw| (kw, dict_len(kw))) {
        None => None,
        Some((_, Some(0))) => None,
        Some((kw, Some(_))) => Some(kw),
        Some((kw, None)) => {
            let msg = format!("keyword arguments must be a dict, not {}", kw.type_name());
            errors::err_set_string(&TYPE_ERROR, &msg);
            return None;
        }
    };

    if let Some(func) = as_cfunction(callable) {
        let self_ptr = func
            .self_obj
            .as_ref()
            .map_or(std::ptr::null_mut(), ObjRef::as_ptr);
        let name = func.def.name();
        let result = match func.def.ml_meth {
            MethodFn::NoArgs(f) => {
                if !positional.is_empty() || kwargs.is_some() {
                    let msg = format!("{name}() takes no arguments");
                    errors::err_set_string(&TYPE_ERROR, &msg);
                    return None;
                }
                unsafe { f(self_ptr, std::ptr::null_mut()) }
            }
            MethodFn::VarArgs(f) => {
                if kwargs.is_some() {
                    let msg = format!("{name}() takes no keyword arguments");
                    errors::err_set_string(&TYPE_ERROR, &msg);
                    return None;
                }
                unsafe { f(self_ptr, args.as_ptr()) }
            }
            MethodFn::Keywords(f) => {
                let kw_ptr = kwargs.map_or(std::ptr::null_mut(), ObjRef::as_ptr);
                unsafe { f(self_ptr, args.as_ptr(), kw_ptr) }
            }
        };
        return owned_result(result, name);
    }

    if let Some(call) = callable.type_object().tp_call {
        let kw_ptr = kwargs.map_or(std::ptr::null_mut(), ObjRef::as_ptr);
        let result = unsafe { call(callable.as_ptr(), args.as_ptr(), kw_ptr) };
        return owned_result(result, "tp_call");
    }

    let msg = format!("'{}' object is not callable", callable.type_name());
    errors::err_set_string(&TYPE_ERROR, &msg);
    None
}

/// Look up `name` on `obj` and call it with positional `args`.
pub fn call_method(obj: &ObjRef, name: &str, args: Vec<ObjRef>) -> Option<ObjRef> {
    let callable = attrs::getattr(obj, name)?;
    call_object(&callable, &builtins::tuple(args), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawObject;
    use crate::abi::MethodDef;
    use crate::builtins::{as_int, cfunction_new, dict, dict_set, int, str, tuple};
    use crate::errors::{err_clear, err_matches};

    unsafe extern "C" fn count_args(_: *mut RawObject, args: *mut RawObject) -> *mut RawObject {
        let args = unsafe { ObjRef::from_borrowed_ptr(args) };
        let n = args.as_ref().and_then(tuple_items).map_or(0, <[ObjRef]>::len);
        int(n as i64).into_ptr()
    }

    unsafe extern "C" fn seven(_: *mut RawObject, _: *mut RawObject) -> *mut RawObject {
        int(7).into_ptr()
    }

    unsafe extern "C" fn kw_is_null(
        _: *mut RawObject,
        _: *mut RawObject,
        kw: *mut RawObject,
    ) -> *mut RawObject {
        builtins::bool(kw.is_null()).into_ptr()
    }

    fn def(meth: MethodFn) -> MethodDef {
        MethodDef {
            ml_name: c"target".as_ptr(),
            ml_meth: meth,
            ml_doc: std::ptr::null(),
        }
    }

    #[test]
    fn varargs_receive_the_tuple() {
        let f = cfunction_new(def(MethodFn::VarArgs(count_args)), None);
        let out = call_object(&f, &tuple(vec![int(1), int(2)]), None).expect("called");
        assert_eq!(as_int(&out), Some(2));
    }

    #[test]
    fn noargs_rejects_arguments() {
        let f = cfunction_new(def(MethodFn::NoArgs(seven)), None);
        assert_eq!(call_object(&f, &tuple(vec![]), None).as_ref().and_then(as_int), Some(7));
        assert!(call_object(&f, &tuple(vec![int(1)]), None).is_none());
        assert!(err_matches(&TYPE_ERROR));
        err_clear();
    }

    #[test]
    fn empty_kwargs_arrive_as_null() {
        let f = cfunction_new(def(MethodFn::Keywords(kw_is_null)), None);
        let empty = dict();
        let out = call_object(&f, &tuple(vec![]), Some(&empty)).expect("called");
        assert_eq!(builtins::as_bool(&out), Some(true));

        let full = dict();
        dict_set(&full, str("k"), int(1));
        let out = call_object(&f, &tuple(vec![]), Some(&full)).expect("called");
        assert_eq!(builtins::as_bool(&out), Some(false));
    }

    #[test]
    fn non_dict_kwargs_raise_type_error() {
        let f = cfunction_new(def(MethodFn::Keywords(kw_is_null)), None);
        assert!(call_object(&f, &tuple(vec![]), Some(&int(5))).is_none());
        assert!(err_matches(&TYPE_ERROR));
        err_clear();
    }

    #[test]
    fn non_callables_raise_type_error() {
        assert!(call_object(&int(3), &tuple(vec![]), None).is_none());
        assert!(err_matches(&TYPE_ERROR));
        err_clear();
    }
}
