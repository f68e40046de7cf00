//! Abstract protocol entry points: what the host evaluator calls when it
//! needs `len(x)`, `x[i]`, `a + b` and friends. Each dispatches through the
//! operand's slot tables and raises `TypeError` when the slot is absent.
//!
//! Failure is `None` with the error slot set.

use std::ffi::{c_int, c_void};
use std::io::Write;

use crate::abi::{NumberMethods, compare_op};
use crate::attrs::owned_result;
use crate::builtins::{self, as_str};
use crate::errors::{self, TYPE_ERROR};
use crate::{ObjRef, RawObject};

fn unsupported(obj: &ObjRef, what: &str) {
    let msg = format!("'{}' object does not support {}", obj.type_name(), what);
    errors::err_set_string(&TYPE_ERROR, &msg);
}

fn status(rc: c_int, context: &str) -> Option<()> {
    if rc < 0 {
        errors::err_ensure_set(context);
        None
    } else {
        Some(())
    }
}

fn value_ptr(value: Option<&ObjRef>) -> *mut RawObject {
    value.map_or(std::ptr::null_mut(), ObjRef::as_ptr)
}

pub fn repr(obj: &ObjRef) -> Option<ObjRef> {
    match obj.type_object().tp_repr {
        Some(f) => owned_result(unsafe { f(obj.as_ptr()) }, "tp_repr"),
        None => Some(builtins::str(&format!("{obj:?}"))),
    }
}

pub fn str(obj: &ObjRef) -> Option<ObjRef> {
    match obj.type_object().tp_str {
        Some(f) => owned_result(unsafe { f(obj.as_ptr()) }, "tp_str"),
        None => repr(obj),
    }
}

/// `repr(obj)` as an owned Rust string.
pub fn repr_string(obj: &ObjRef) -> Option<String> {
    let text = repr(obj)?;
    as_str(&text).map(str::to_owned)
}

pub fn hash(obj: &ObjRef) -> Option<i64> {
    match obj.type_object().tp_hash {
        Some(f) => {
            let h = unsafe { f(obj.as_ptr()) };
            if h == -1 {
                errors::err_ensure_set("tp_hash");
                None
            } else {
                Some(h as i64)
            }
        }
        None => Some((obj.as_ptr() as usize >> 4) as i64),
    }
}

/// Legacy three-way comparison.
pub fn compare(a: &ObjRef, b: &ObjRef) -> Option<i32> {
    let Some(f) = a.type_object().tp_compare else {
        unsupported(a, "three-way comparison");
        return None;
    };
    let rc = unsafe { f(a.as_ptr(), b.as_ptr()) };
    if rc == -1 && errors::err_occurred().is_some() {
        return None;
    }
    Some(rc.signum())
}

pub fn rich_compare(a: &ObjRef, b: &ObjRef, op: c_int) -> Option<ObjRef> {
    let ty = a.type_object();
    if let Some(f) = ty.tp_richcompare {
        return owned_result(unsafe { f(a.as_ptr(), b.as_ptr(), op) }, "tp_richcompare");
    }
    if ty.tp_compare.is_some() {
        let ord = compare(a, b)?;
        let result = match op {
            compare_op::LT => ord < 0,
            compare_op::LE => ord <= 0,
            compare_op::EQ => ord == 0,
            compare_op::NE => ord != 0,
            compare_op::GT => ord > 0,
            compare_op::GE => ord >= 0,
            _ => {
                errors::err_set_string(&errors::SYSTEM_ERROR, "bad comparison opcode");
                return None;
            }
        };
        return Some(builtins::bool(result));
    }
    match op {
        compare_op::EQ => Some(builtins::bool(a.is(b))),
        compare_op::NE => Some(builtins::bool(!a.is(b))),
        _ => {
            unsupported(a, "ordering");
            None
        }
    }
}

/// Legacy display through the `tp_print` slot, falling back to `repr`.
///
/// # Safety
/// `fp` must be a valid, open C stream.
pub unsafe fn print(obj: &ObjRef, fp: *mut libc::FILE, flags: c_int) -> Option<()> {
    if let Some(f) = obj.type_object().tp_print {
        return status(unsafe { f(obj.as_ptr(), fp, flags) }, "tp_print");
    }
    let text = repr_string(obj)?;
    let written = unsafe { libc::fwrite(text.as_ptr() as *const c_void, 1, text.len(), fp) };
    if written != text.len() {
        errors::err_set_string(&errors::SYSTEM_ERROR, "short write to stream");
        return None;
    }
    Some(())
}

/// Render with `print` into a Rust writer by way of an in-memory stream.
pub fn print_to(obj: &ObjRef, out: &mut dyn Write) -> Option<()> {
    let mut buf: *mut libc::c_char = std::ptr::null_mut();
    let mut len: libc::size_t = 0;
    let fp = unsafe { libc::open_memstream(&mut buf, &mut len) };
    if fp.is_null() {
        errors::err_set_string(&errors::SYSTEM_ERROR, "open_memstream failed");
        return None;
    }
    let printed = unsafe { print(obj, fp, 0) };
    unsafe { libc::fclose(fp) };
    let bytes = if buf.is_null() {
        Vec::new()
    } else {
        let bytes = unsafe { std::slice::from_raw_parts(buf as *const u8, len) }.to_vec();
        unsafe { libc::free(buf as *mut c_void) };
        bytes
    };
    printed?;
    if out.write_all(&bytes).is_err() {
        errors::err_set_string(&errors::SYSTEM_ERROR, "writer rejected output");
        return None;
    }
    Some(())
}

pub fn get_iter(obj: &ObjRef) -> Option<ObjRef> {
    match obj.type_object().tp_iter {
        Some(f) => owned_result(unsafe { f(obj.as_ptr()) }, "tp_iter"),
        None => {
            unsupported(obj, "iteration");
            None
        }
    }
}

/// Advance an iterator. `Some(None)` is exhaustion, `None` is an error.
pub fn iter_next(obj: &ObjRef) -> Option<Option<ObjRef>> {
    let Some(f) = obj.type_object().tp_iternext else {
        unsupported(obj, "next()");
        return None;
    };
    let raw = unsafe { f(obj.as_ptr()) };
    match unsafe { ObjRef::from_owned_ptr(raw) } {
        Some(item) => Some(Some(item)),
        None if errors::err_occurred().is_some() => None,
        None => Some(None),
    }
}

pub fn sequence_length(obj: &ObjRef) -> Option<isize> {
    let f = obj.type_object().as_sequence().and_then(|sq| sq.sq_length);
    let Some(f) = f else {
        unsupported(obj, "len()");
        return None;
    };
    let n = unsafe { f(obj.as_ptr()) };
    if n < 0 {
        errors::err_ensure_set("sq_length");
        return None;
    }
    Some(n)
}

pub fn sequence_concat(a: &ObjRef, b: &ObjRef) -> Option<ObjRef> {
    let Some(f) = a.type_object().as_sequence().and_then(|sq| sq.sq_concat) else {
        unsupported(a, "concatenation");
        return None;
    };
    owned_result(unsafe { f(a.as_ptr(), b.as_ptr()) }, "sq_concat")
}

pub fn sequence_repeat(obj: &ObjRef, count: isize) -> Option<ObjRef> {
    let Some(f) = obj.type_object().as_sequence().and_then(|sq| sq.sq_repeat) else {
        unsupported(obj, "repetition");
        return None;
    };
    owned_result(unsafe { f(obj.as_ptr(), count) }, "sq_repeat")
}

pub fn sequence_inplace_concat(a: &ObjRef, b: &ObjRef) -> Option<ObjRef> {
    match a.type_object().as_sequence().and_then(|sq| sq.sq_inplace_concat) {
        Some(f) => owned_result(unsafe { f(a.as_ptr(), b.as_ptr()) }, "sq_inplace_concat"),
        None => sequence_concat(a, b),
    }
}

pub fn sequence_inplace_repeat(obj: &ObjRef, count: isize) -> Option<ObjRef> {
    match obj.type_object().as_sequence().and_then(|sq| sq.sq_inplace_repeat) {
        Some(f) => owned_result(unsafe { f(obj.as_ptr(), count) }, "sq_inplace_repeat"),
        None => sequence_repeat(obj, count),
    }
}

pub fn sequence_item(obj: &ObjRef, index: isize) -> Option<ObjRef> {
    let Some(f) = obj.type_object().as_sequence().and_then(|sq| sq.sq_item) else {
        unsupported(obj, "indexing");
        return None;
    };
    owned_result(unsafe { f(obj.as_ptr(), index) }, "sq_item")
}

pub fn sequence_slice(obj: &ObjRef, low: isize, high: isize) -> Option<ObjRef> {
    let Some(f) = obj.type_object().as_sequence().and_then(|sq| sq.sq_slice) else {
        unsupported(obj, "slicing");
        return None;
    };
    owned_result(unsafe { f(obj.as_ptr(), low, high) }, "sq_slice")
}

/// Item assignment; `None` deletes.
pub fn sequence_set_item(obj: &ObjRef, index: isize, value: Option<&ObjRef>) -> Option<()> {
    let Some(f) = obj.type_object().as_sequence().and_then(|sq| sq.sq_ass_item) else {
        unsupported(obj, "item assignment");
        return None;
    };
    status(unsafe { f(obj.as_ptr(), index, value_ptr(value)) }, "sq_ass_item")
}

/// Slice assignment; `None` deletes.
pub fn sequence_set_slice(
    obj: &ObjRef,
    low: isize,
    high: isize,
    value: Option<&ObjRef>,
) -> Option<()> {
    let Some(f) = obj.type_object().as_sequence().and_then(|sq| sq.sq_ass_slice) else {
        unsupported(obj, "slice assignment");
        return None;
    };
    status(
        unsafe { f(obj.as_ptr(), low, high, value_ptr(value)) },
        "sq_ass_slice",
    )
}

pub fn sequence_contains(obj: &ObjRef, value: &ObjRef) -> Option<bool> {
    let Some(f) = obj.type_object().as_sequence().and_then(|sq| sq.sq_contains) else {
        unsupported(obj, "membership tests");
        return None;
    };
    let rc = unsafe { f(obj.as_ptr(), value.as_ptr()) };
    status(rc, "sq_contains")?;
    Some(rc != 0)
}

pub fn mapping_length(obj: &ObjRef) -> Option<isize> {
    let Some(f) = obj.type_object().as_mapping().and_then(|mp| mp.mp_length) else {
        unsupported(obj, "len()");
        return None;
    };
    let n = unsafe { f(obj.as_ptr()) };
    if n < 0 {
        errors::err_ensure_set("mp_length");
        return None;
    }
    Some(n)
}

pub fn mapping_get(obj: &ObjRef, key: &ObjRef) -> Option<ObjRef> {
    let Some(f) = obj.type_object().as_mapping().and_then(|mp| mp.mp_subscript) else {
        unsupported(obj, "subscription");
        return None;
    };
    owned_result(unsafe { f(obj.as_ptr(), key.as_ptr()) }, "mp_subscript")
}

/// Subscript assignment; `None` deletes.
pub fn mapping_set(obj: &ObjRef, key: &ObjRef, value: Option<&ObjRef>) -> Option<()> {
    let Some(f) = obj.type_object().as_mapping().and_then(|mp| mp.mp_ass_subscript) else {
        unsupported(obj, "subscript assignment");
        return None;
    };
    status(
        unsafe { f(obj.as_ptr(), key.as_ptr(), value_ptr(value)) },
        "mp_ass_subscript",
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Divmod,
    Lshift,
    Rshift,
    And,
    Xor,
    Or,
}

impl BinaryOp {
    fn slot(self, nb: &NumberMethods) -> Option<crate::abi::BinaryFunc> {
        match self {
            BinaryOp::Add => nb.nb_add,
            BinaryOp::Subtract => nb.nb_subtract,
            BinaryOp::Multiply => nb.nb_multiply,
            BinaryOp::Divide => nb.nb_divide,
            BinaryOp::Remainder => nb.nb_remainder,
            BinaryOp::Divmod => nb.nb_divmod,
            BinaryOp::Lshift => nb.nb_lshift,
            BinaryOp::Rshift => nb.nb_rshift,
            BinaryOp::And => nb.nb_and,
            BinaryOp::Xor => nb.nb_xor,
            BinaryOp::Or => nb.nb_or,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
            BinaryOp::Divmod => "divmod()",
            BinaryOp::Lshift => "<<",
            BinaryOp::Rshift => ">>",
            BinaryOp::And => "&",
            BinaryOp::Xor => "^",
            BinaryOp::Or => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negative,
    Positive,
    Absolute,
    Invert,
    Int,
    Long,
    Float,
    Oct,
    Hex,
}

impl UnaryOp {
    fn slot(self, nb: &NumberMethods) -> Option<crate::abi::UnaryFunc> {
        match self {
            UnaryOp::Negative => nb.nb_negative,
            UnaryOp::Positive => nb.nb_positive,
            UnaryOp::Absolute => nb.nb_absolute,
            UnaryOp::Invert => nb.nb_invert,
            UnaryOp::Int => nb.nb_int,
            UnaryOp::Long => nb.nb_long,
            UnaryOp::Float => nb.nb_float,
            UnaryOp::Oct => nb.nb_oct,
            UnaryOp::Hex => nb.nb_hex,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Negative => "unary -",
            UnaryOp::Positive => "unary +",
            UnaryOp::Absolute => "abs()",
            UnaryOp::Invert => "unary ~",
            UnaryOp::Int => "int()",
            UnaryOp::Long => "long()",
            UnaryOp::Float => "float()",
            UnaryOp::Oct => "oct()",
            UnaryOp::Hex => "hex()",
        }
    }
}

/// Binary numeric operation through the left operand's slot. There is no
/// reflected dispatch: slots always receive their own type as `self`.
pub fn number_binary(a: &ObjRef, b: &ObjRef, op: BinaryOp) -> Option<ObjRef> {
    match a.type_object().as_number().and_then(|nb| op.slot(nb)) {
        Some(f) => owned_result(unsafe { f(a.as_ptr(), b.as_ptr()) }, op.symbol()),
        None => {
            let msg = format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                a.type_name(),
                b.type_name()
            );
            errors::err_set_string(&TYPE_ERROR, &msg);
            None
        }
    }
}

pub fn number_unary(obj: &ObjRef, op: UnaryOp) -> Option<ObjRef> {
    match obj.type_object().as_number().and_then(|nb| op.slot(nb)) {
        Some(f) => owned_result(unsafe { f(obj.as_ptr()) }, op.name()),
        None => {
            unsupported(obj, op.name());
            None
        }
    }
}

/// `pow(base, exp[, modulus])`; an absent modulus is passed as `None`.
pub fn number_power(base: &ObjRef, exp: &ObjRef, modulus: Option<&ObjRef>) -> Option<ObjRef> {
    let Some(f) = base.type_object().as_number().and_then(|nb| nb.nb_power) else {
        unsupported(base, "pow()");
        return None;
    };
    let none = builtins::none();
    let modulus = modulus.unwrap_or(&none);
    owned_result(
        unsafe { f(base.as_ptr(), exp.as_ptr(), modulus.as_ptr()) },
        "nb_power",
    )
}

/// Truth value through `nb_nonzero`, then length, else `true`.
pub fn is_true(obj: &ObjRef) -> Option<bool> {
    if let Some(b) = builtins::as_bool(obj) {
        return Some(b);
    }
    if builtins::is_none(obj) {
        return Some(false);
    }
    let ty = obj.type_object();
    if let Some(f) = ty.as_number().and_then(|nb| nb.nb_nonzero) {
        let rc = unsafe { f(obj.as_ptr()) };
        status(rc, "nb_nonzero")?;
        return Some(rc != 0);
    }
    if ty.as_sequence().and_then(|sq| sq.sq_length).is_some() {
        return sequence_length(obj).map(|n| n != 0);
    }
    if ty.as_mapping().and_then(|mp| mp.mp_length).is_some() {
        return mapping_length(obj).map(|n| n != 0);
    }
    Some(true)
}

/// Number of buffer segments and their total length.
pub fn buffer_segment_count(obj: &ObjRef) -> Option<(isize, isize)> {
    let Some(f) = obj.type_object().as_buffer().and_then(|bf| bf.bf_getsegcount) else {
        unsupported(obj, "the buffer interface");
        return None;
    };
    let mut total: isize = 0;
    let count = unsafe { f(obj.as_ptr(), &mut total) };
    if count < 0 {
        errors::err_ensure_set("bf_getsegcount");
        return None;
    }
    Some((count, total))
}

pub fn buffer_read(obj: &ObjRef, segment: isize) -> Option<(*mut c_void, isize)> {
    let Some(f) = obj.type_object().as_buffer().and_then(|bf| bf.bf_getreadbuffer) else {
        unsupported(obj, "readable buffers");
        return None;
    };
    let mut ptr: *mut c_void = std::ptr::null_mut();
    let len = unsafe { f(obj.as_ptr(), segment, &mut ptr) };
    if len < 0 {
        errors::err_ensure_set("bf_getreadbuffer");
        return None;
    }
    Some((ptr, len))
}

pub fn buffer_write(obj: &ObjRef, segment: isize) -> Option<(*mut c_void, isize)> {
    let Some(f) = obj.type_object().as_buffer().and_then(|bf| bf.bf_getwritebuffer) else {
        unsupported(obj, "writable buffers");
        return None;
    };
    let mut ptr: *mut c_void = std::ptr::null_mut();
    let len = unsafe { f(obj.as_ptr(), segment, &mut ptr) };
    if len < 0 {
        errors::err_ensure_set("bf_getwritebuffer");
        return None;
    }
    Some((ptr, len))
}
