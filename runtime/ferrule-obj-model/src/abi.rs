//! Slot ABI: function pointer shapes, protocol sub-tables and type objects.

use std::ffi::{CStr, c_char, c_int, c_long, c_void};
use std::ptr;

use crate::RawObject;
use crate::errors;

pub type DeallocFunc = unsafe extern "C" fn(*mut RawObject);
pub type PrintFunc = unsafe extern "C" fn(*mut RawObject, *mut libc::FILE, c_int) -> c_int;
pub type GetAttrFunc = unsafe extern "C" fn(*mut RawObject, *const c_char) -> *mut RawObject;
pub type SetAttrFunc =
    unsafe extern "C" fn(*mut RawObject, *const c_char, *mut RawObject) -> c_int;
pub type GetAttroFunc = unsafe extern "C" fn(*mut RawObject, *mut RawObject) -> *mut RawObject;
pub type SetAttroFunc =
    unsafe extern "C" fn(*mut RawObject, *mut RawObject, *mut RawObject) -> c_int;
pub type CompareFunc = unsafe extern "C" fn(*mut RawObject, *mut RawObject) -> c_int;
pub type RichCompareFunc =
    unsafe extern "C" fn(*mut RawObject, *mut RawObject, c_int) -> *mut RawObject;
pub type ReprFunc = unsafe extern "C" fn(*mut RawObject) -> *mut RawObject;
pub type HashFunc = unsafe extern "C" fn(*mut RawObject) -> c_long;
pub type UnaryFunc = unsafe extern "C" fn(*mut RawObject) -> *mut RawObject;
pub type BinaryFunc = unsafe extern "C" fn(*mut RawObject, *mut RawObject) -> *mut RawObject;
pub type TernaryFunc =
    unsafe extern "C" fn(*mut RawObject, *mut RawObject, *mut RawObject) -> *mut RawObject;
pub type InquiryFunc = unsafe extern "C" fn(*mut RawObject) -> c_int;
pub type LenFunc = unsafe extern "C" fn(*mut RawObject) -> isize;
pub type SsizeArgFunc = unsafe extern "C" fn(*mut RawObject, isize) -> *mut RawObject;
pub type SsizeSsizeArgFunc = unsafe extern "C" fn(*mut RawObject, isize, isize) -> *mut RawObject;
pub type SsizeObjArgProc = unsafe extern "C" fn(*mut RawObject, isize, *mut RawObject) -> c_int;
pub type SsizeSsizeObjArgProc =
    unsafe extern "C" fn(*mut RawObject, isize, isize, *mut RawObject) -> c_int;
pub type ObjObjProc = unsafe extern "C" fn(*mut RawObject, *mut RawObject) -> c_int;
pub type ObjObjArgProc =
    unsafe extern "C" fn(*mut RawObject, *mut RawObject, *mut RawObject) -> c_int;
pub type ReadBufferProc = unsafe extern "C" fn(*mut RawObject, isize, *mut *mut c_void) -> isize;
pub type WriteBufferProc = unsafe extern "C" fn(*mut RawObject, isize, *mut *mut c_void) -> isize;
pub type SegCountProc = unsafe extern "C" fn(*mut RawObject, *mut isize) -> isize;
pub type CoerceFunc = unsafe extern "C" fn(*mut *mut RawObject, *mut *mut RawObject) -> c_int;

#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct SequenceMethods {
    pub sq_length: Option<LenFunc>,
    pub sq_concat: Option<BinaryFunc>,
    pub sq_repeat: Option<SsizeArgFunc>,
    pub sq_item: Option<SsizeArgFunc>,
    pub sq_slice: Option<SsizeSsizeArgFunc>,
    pub sq_ass_item: Option<SsizeObjArgProc>,
    pub sq_ass_slice: Option<SsizeSsizeObjArgProc>,
    pub sq_contains: Option<ObjObjProc>,
    pub sq_inplace_concat: Option<BinaryFunc>,
    pub sq_inplace_repeat: Option<SsizeArgFunc>,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct MappingMethods {
    pub mp_length: Option<LenFunc>,
    pub mp_subscript: Option<BinaryFunc>,
    pub mp_ass_subscript: Option<ObjObjArgProc>,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct NumberMethods {
    pub nb_add: Option<BinaryFunc>,
    pub nb_subtract: Option<BinaryFunc>,
    pub nb_multiply: Option<BinaryFunc>,
    pub nb_divide: Option<BinaryFunc>,
    pub nb_remainder: Option<BinaryFunc>,
    pub nb_divmod: Option<BinaryFunc>,
    pub nb_power: Option<TernaryFunc>,
    pub nb_negative: Option<UnaryFunc>,
    pub nb_positive: Option<UnaryFunc>,
    pub nb_absolute: Option<UnaryFunc>,
    pub nb_nonzero: Option<InquiryFunc>,
    pub nb_invert: Option<UnaryFunc>,
    pub nb_lshift: Option<BinaryFunc>,
    pub nb_rshift: Option<BinaryFunc>,
    pub nb_and: Option<BinaryFunc>,
    pub nb_xor: Option<BinaryFunc>,
    pub nb_or: Option<BinaryFunc>,
    pub nb_coerce: Option<CoerceFunc>,
    pub nb_int: Option<UnaryFunc>,
    pub nb_long: Option<UnaryFunc>,
    pub nb_float: Option<UnaryFunc>,
    pub nb_oct: Option<UnaryFunc>,
    pub nb_hex: Option<UnaryFunc>,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct BufferProcs {
    pub bf_getreadbuffer: Option<ReadBufferProc>,
    pub bf_getwritebuffer: Option<WriteBufferProc>,
    pub bf_getsegcount: Option<SegCountProc>,
}

pub const TPFLAGS_DEFAULT: u64 = 0;
pub const TPFLAGS_HEAPTYPE: u64 = 1 << 9;
pub const TPFLAGS_BASETYPE: u64 = 1 << 10;
pub const TPFLAGS_READY: u64 = 1 << 12;

/// Rich comparison opcodes passed to `tp_richcompare`.
pub mod compare_op {
    use std::ffi::c_int;

    pub const LT: c_int = 0;
    pub const LE: c_int = 1;
    pub const EQ: c_int = 2;
    pub const NE: c_int = 3;
    pub const GT: c_int = 4;
    pub const GE: c_int = 5;
}

/// Calling convention of a builtin function, with its entry point.
#[derive(Clone, Copy)]
pub enum MethodFn {
    /// `(self, NULL)`; the call must carry no arguments.
    NoArgs(BinaryFunc),
    /// `(self, args_tuple)`.
    VarArgs(BinaryFunc),
    /// `(self, args_tuple, kwargs_dict_or_NULL)`.
    Keywords(TernaryFunc),
}

#[derive(Clone, Copy)]
pub struct MethodDef {
    pub ml_name: *const c_char,
    pub ml_meth: MethodFn,
    pub ml_doc: *const c_char,
}

impl MethodDef {
    pub fn name(&self) -> &str {
        unsafe { c_str_or(self.ml_name, "?") }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct TypeObject {
    pub tp_name: *const c_char,
    pub tp_doc: *const c_char,
    pub tp_basicsize: isize,
    pub tp_flags: u64,
    pub tp_base: *const TypeObject,
    /// Byte offset of the instance dict slot, or 0 when instances carry none.
    pub tp_dictoffset: isize,
    pub tp_dealloc: Option<DeallocFunc>,
    pub tp_print: Option<PrintFunc>,
    pub tp_getattr: Option<GetAttrFunc>,
    pub tp_setattr: Option<SetAttrFunc>,
    pub tp_compare: Option<CompareFunc>,
    pub tp_repr: Option<ReprFunc>,
    pub tp_as_number: *const NumberMethods,
    pub tp_as_sequence: *const SequenceMethods,
    pub tp_as_mapping: *const MappingMethods,
    pub tp_hash: Option<HashFunc>,
    pub tp_call: Option<TernaryFunc>,
    pub tp_str: Option<ReprFunc>,
    pub tp_getattro: Option<GetAttroFunc>,
    pub tp_setattro: Option<SetAttroFunc>,
    pub tp_as_buffer: *const BufferProcs,
    pub tp_richcompare: Option<RichCompareFunc>,
    pub tp_iter: Option<UnaryFunc>,
    pub tp_iternext: Option<UnaryFunc>,
}

// Type objects are immutable once published; the raw pointers they hold
// reference leaked or static data.
unsafe impl Send for TypeObject {}
unsafe impl Sync for TypeObject {}

impl TypeObject {
    pub const fn new(name: &'static CStr, basicsize: usize) -> Self {
        Self {
            tp_name: name.as_ptr(),
            tp_doc: ptr::null(),
            tp_basicsize: basicsize as isize,
            tp_flags: TPFLAGS_DEFAULT,
            tp_base: ptr::null(),
            tp_dictoffset: 0,
            tp_dealloc: None,
            tp_print: None,
            tp_getattr: None,
            tp_setattr: None,
            tp_compare: None,
            tp_repr: None,
            tp_as_number: ptr::null(),
            tp_as_sequence: ptr::null(),
            tp_as_mapping: ptr::null(),
            tp_hash: None,
            tp_call: None,
            tp_str: None,
            tp_getattro: None,
            tp_setattro: None,
            tp_as_buffer: ptr::null(),
            tp_richcompare: None,
            tp_iter: None,
            tp_iternext: None,
        }
    }

    pub fn name(&self) -> &'static str {
        unsafe { c_str_or(self.tp_name, "?") }
    }

    pub fn doc(&self) -> Option<&'static str> {
        if self.tp_doc.is_null() {
            return None;
        }
        Some(unsafe { c_str_or(self.tp_doc, "") })
    }

    pub fn has_flag(&self, flag: u64) -> bool {
        self.tp_flags & flag != 0
    }

    pub fn base(&self) -> Option<&'static TypeObject> {
        unsafe { self.tp_base.as_ref() }
    }

    /// True when `self` is `other` or derives from it.
    pub fn is_subtype(&self, other: &TypeObject) -> bool {
        let mut cur: *const TypeObject = self;
        while !cur.is_null() {
            if ptr::eq(cur, other) {
                return true;
            }
            cur = unsafe { (*cur).tp_base };
        }
        false
    }

    pub fn as_sequence(&self) -> Option<&SequenceMethods> {
        unsafe { self.tp_as_sequence.as_ref() }
    }

    pub fn as_mapping(&self) -> Option<&MappingMethods> {
        unsafe { self.tp_as_mapping.as_ref() }
    }

    pub fn as_number(&self) -> Option<&NumberMethods> {
        unsafe { self.tp_as_number.as_ref() }
    }

    pub fn as_buffer(&self) -> Option<&BufferProcs> {
        unsafe { self.tp_as_buffer.as_ref() }
    }
}

unsafe fn c_str_or<'a>(p: *const c_char, fallback: &'a str) -> &'a str {
    if p.is_null() {
        return fallback;
    }
    unsafe { CStr::from_ptr(p) }.to_str().unwrap_or(fallback)
}

/// One-time validation of a type object before instances may exist.
/// Returns 0 on success, or -1 with a `SystemError` set.
///
/// # Safety
/// `ty` must point at a writable type object that is not yet shared.
pub unsafe fn type_ready(ty: *mut TypeObject) -> c_int {
    let ty = unsafe { &mut *ty };
    if ty.has_flag(TPFLAGS_READY) {
        return 0;
    }
    if ty.tp_name.is_null() || unsafe { CStr::from_ptr(ty.tp_name) }.is_empty() {
        errors::err_set_string(&errors::SYSTEM_ERROR, "type_ready: type has no name");
        return -1;
    }
    if ty.tp_basicsize < std::mem::size_of::<RawObject>() as isize {
        let msg = format!("type_ready: '{}' is smaller than an object header", ty.name());
        errors::err_set_string(&errors::SYSTEM_ERROR, &msg);
        return -1;
    }
    if ty.tp_dealloc.is_none() {
        let msg = format!("type_ready: '{}' has no tp_dealloc", ty.name());
        errors::err_set_string(&errors::SYSTEM_ERROR, &msg);
        return -1;
    }
    ty.tp_flags |= TPFLAGS_READY;
    0
}
