use std::ffi::c_int;

use ferrule_obj_model::RawObject;

use super::{borrowed, guard, new_ref};
use crate::extension::ExtensionObject;
use crate::identity::resolve;

macro_rules! binary_slot {
    ($($slot:ident => $method:ident),* $(,)?) => {
        $(
            pub(crate) unsafe extern "C" fn $slot<T: ExtensionObject>(
                obj: *mut RawObject,
                other: *mut RawObject,
            ) -> *mut RawObject {
                guard(stringify!($method), || {
                    let this = unsafe { resolve::<T>(obj) }?;
                    let other = unsafe { borrowed(other, stringify!($method)) }?;
                    this.$method(&other).map(new_ref)
                })
            }
        )*
    };
}

macro_rules! unary_slot {
    ($($slot:ident => $method:ident),* $(,)?) => {
        $(
            pub(crate) unsafe extern "C" fn $slot<T: ExtensionObject>(
                obj: *mut RawObject,
            ) -> *mut RawObject {
                guard(stringify!($method), || {
                    let this = unsafe { resolve::<T>(obj) }?;
                    this.$method().map(new_ref)
                })
            }
        )*
    };
}

binary_slot! {
    add => number_add,
    subtract => number_subtract,
    multiply => number_multiply,
    divide => number_divide,
    remainder => number_remainder,
    divmod => number_divmod,
    lshift => number_lshift,
    rshift => number_rshift,
    and => number_and,
    xor => number_xor,
    or => number_or,
}

unary_slot! {
    negative => number_negative,
    positive => number_positive,
    absolute => number_absolute,
    invert => number_invert,
    int => number_int,
    long => number_long,
    float => number_float,
    oct => number_oct,
    hex => number_hex,
}

pub(crate) unsafe extern "C" fn power<T: ExtensionObject>(
    obj: *mut RawObject,
    exp: *mut RawObject,
    modulus: *mut RawObject,
) -> *mut RawObject {
    guard("number_power", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let exp = unsafe { borrowed(exp, "number_power") }?;
        let modulus = unsafe { borrowed(modulus, "number_power") }?;
        this.number_power(&exp, &modulus).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn nonzero<T: ExtensionObject>(obj: *mut RawObject) -> c_int {
    guard("number_nonzero", || {
        let this = unsafe { resolve::<T>(obj) }?;
        this.number_nonzero().map(c_int::from)
    })
}
