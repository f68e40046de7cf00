//! Builtin value kinds: none, bool, int, float, str, tuple, dict, capsule,
//! builtin function and plain instances.

use std::cell::RefCell;
use std::ffi::{CString, c_int, c_long, c_void};
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::abi::{
    MethodDef, TPFLAGS_BASETYPE, TPFLAGS_HEAPTYPE, TPFLAGS_READY, TypeObject, compare_op,
};
use crate::{ObjRef, RawObject, attrs, errors, object_allocated, object_freed};

#[repr(C)]
pub struct IntObject {
    pub ob_base: RawObject,
    pub value: i64,
}

#[repr(C)]
pub struct FloatObject {
    pub ob_base: RawObject,
    pub value: f64,
}

#[repr(C)]
pub struct StrObject {
    pub ob_base: RawObject,
    pub value: String,
}

#[repr(C)]
pub struct TupleObject {
    pub ob_base: RawObject,
    pub items: Vec<ObjRef>,
}

#[repr(C)]
pub struct DictObject {
    pub ob_base: RawObject,
    pub entries: RefCell<Vec<(ObjRef, ObjRef)>>,
}

pub type CapsuleDestructor = unsafe extern "C" fn(*mut c_void);

#[repr(C)]
pub struct CapsuleObject {
    pub ob_base: RawObject,
    pub pointer: *mut c_void,
    pub destructor: Option<CapsuleDestructor>,
}

#[repr(C)]
pub struct CFunctionObject {
    pub ob_base: RawObject,
    pub def: MethodDef,
    pub self_obj: Option<ObjRef>,
}

/// Plain instance with an attribute dict. Subclass shells use this layout.
#[repr(C)]
pub struct InstanceObject {
    pub ob_base: RawObject,
    pub dict: ObjRef,
    /// Back-reference handle of the attached implementation cell; 0 if none.
    pub back_ref: AtomicU64,
}

pub static NONE_TYPE: TypeObject = TypeObject {
    tp_repr: Some(none_repr),
    ..TypeObject::new(c"NoneType", size_of::<RawObject>())
};

pub static BOOL_TYPE: TypeObject = TypeObject {
    tp_repr: Some(bool_repr),
    ..TypeObject::new(c"bool", size_of::<IntObject>())
};

pub static INT_TYPE: TypeObject = TypeObject {
    tp_dealloc: Some(dealloc_boxed::<IntObject>),
    tp_repr: Some(int_repr),
    tp_hash: Some(int_hash),
    tp_richcompare: Some(value_richcompare),
    ..TypeObject::new(c"int", size_of::<IntObject>())
};

pub static FLOAT_TYPE: TypeObject = TypeObject {
    tp_dealloc: Some(dealloc_boxed::<FloatObject>),
    tp_repr: Some(float_repr),
    tp_richcompare: Some(value_richcompare),
    ..TypeObject::new(c"float", size_of::<FloatObject>())
};

pub static STR_TYPE: TypeObject = TypeObject {
    tp_dealloc: Some(dealloc_boxed::<StrObject>),
    tp_repr: Some(str_repr),
    tp_str: Some(str_str),
    tp_hash: Some(str_hash),
    tp_richcompare: Some(value_richcompare),
    ..TypeObject::new(c"str", size_of::<StrObject>())
};

pub static TUPLE_TYPE: TypeObject = TypeObject {
    tp_dealloc: Some(dealloc_boxed::<TupleObject>),
    ..TypeObject::new(c"tuple", size_of::<TupleObject>())
};

pub static DICT_TYPE: TypeObject = TypeObject {
    tp_dealloc: Some(dealloc_boxed::<DictObject>),
    ..TypeObject::new(c"dict", size_of::<DictObject>())
};

pub static CAPSULE_TYPE: TypeObject = TypeObject {
    tp_dealloc: Some(capsule_dealloc),
    ..TypeObject::new(c"capsule", size_of::<CapsuleObject>())
};

pub static CFUNCTION_TYPE: TypeObject = TypeObject {
    tp_dealloc: Some(dealloc_boxed::<CFunctionObject>),
    tp_repr: Some(cfunction_repr),
    ..TypeObject::new(c"builtin_function_or_method", size_of::<CFunctionObject>())
};

pub static OBJECT_TYPE: TypeObject = TypeObject {
    tp_flags: TPFLAGS_BASETYPE | TPFLAGS_READY,
    tp_dictoffset: offset_of!(InstanceObject, dict) as isize,
    tp_dealloc: Some(instance_dealloc),
    tp_getattro: Some(attrs::generic_getattro_slot),
    tp_setattro: Some(attrs::generic_setattro_slot),
    ..TypeObject::new(c"object", size_of::<InstanceObject>())
};

static NONE: RawObject = RawObject::immortal(&NONE_TYPE);

static FALSE: IntObject = IntObject {
    ob_base: RawObject::immortal(&BOOL_TYPE),
    value: 0,
};

static TRUE: IntObject = IntObject {
    ob_base: RawObject::immortal(&BOOL_TYPE),
    value: 1,
};

unsafe fn static_ref(obj: &'static RawObject) -> ObjRef {
    let ptr = obj as *const RawObject as *mut RawObject;
    // Immortal refcounts never reach zero, so handing out references is sound.
    unsafe { ObjRef::from_borrowed_ptr(ptr) }.unwrap_or_else(|| unreachable!())
}

fn boxed<T>(value: T) -> ObjRef {
    object_allocated();
    let ptr = Box::into_raw(Box::new(value)) as *mut RawObject;
    match unsafe { ObjRef::from_owned_ptr(ptr) } {
        Some(obj) => obj,
        None => unreachable!("Box::into_raw never yields null"),
    }
}

unsafe extern "C" fn dealloc_boxed<T>(obj: *mut RawObject) {
    drop(unsafe { Box::from_raw(obj as *mut T) });
    object_freed();
}

unsafe fn payload<'a, T>(obj: &'a ObjRef, ty: &TypeObject) -> Option<&'a T> {
    if std::ptr::eq(obj.type_object(), ty) {
        Some(unsafe { &*(obj.as_ptr() as *const T) })
    } else {
        None
    }
}

pub fn none() -> ObjRef {
    unsafe { static_ref(&NONE) }
}

pub fn is_none(obj: &ObjRef) -> bool {
    std::ptr::eq(obj.as_ptr(), &NONE)
}

pub fn bool(value: bool) -> ObjRef {
    let obj = if value { &TRUE } else { &FALSE };
    unsafe { static_ref(&obj.ob_base) }
}

pub fn as_bool(obj: &ObjRef) -> Option<bool> {
    unsafe { payload::<IntObject>(obj, &BOOL_TYPE) }.map(|b| b.value != 0)
}

pub fn int(value: i64) -> ObjRef {
    boxed(IntObject {
        ob_base: RawObject::new(&INT_TYPE),
        value,
    })
}

pub fn as_int(obj: &ObjRef) -> Option<i64> {
    unsafe { payload::<IntObject>(obj, &INT_TYPE) }.map(|i| i.value)
}

pub fn float(value: f64) -> ObjRef {
    boxed(FloatObject {
        ob_base: RawObject::new(&FLOAT_TYPE),
        value,
    })
}

pub fn as_float(obj: &ObjRef) -> Option<f64> {
    unsafe { payload::<FloatObject>(obj, &FLOAT_TYPE) }.map(|f| f.value)
}

pub fn str(value: &str) -> ObjRef {
    boxed(StrObject {
        ob_base: RawObject::new(&STR_TYPE),
        value: value.to_owned(),
    })
}

pub fn as_str(obj: &ObjRef) -> Option<&str> {
    unsafe { payload::<StrObject>(obj, &STR_TYPE) }.map(|s| s.value.as_str())
}

pub fn tuple(items: Vec<ObjRef>) -> ObjRef {
    boxed(TupleObject {
        ob_base: RawObject::new(&TUPLE_TYPE),
        items,
    })
}

pub fn tuple_items(obj: &ObjRef) -> Option<&[ObjRef]> {
    unsafe { payload::<TupleObject>(obj, &TUPLE_TYPE) }.map(|t| t.items.as_slice())
}

pub fn dict() -> ObjRef {
    boxed(DictObject {
        ob_base: RawObject::new(&DICT_TYPE),
        entries: RefCell::new(Vec::new()),
    })
}

fn dict_entries(obj: &ObjRef) -> Option<&RefCell<Vec<(ObjRef, ObjRef)>>> {
    unsafe { payload::<DictObject>(obj, &DICT_TYPE) }.map(|d| &d.entries)
}

pub fn is_dict(obj: &ObjRef) -> bool {
    dict_entries(obj).is_some()
}

pub fn dict_get(obj: &ObjRef, key: &ObjRef) -> Option<ObjRef> {
    let entries = dict_entries(obj)?.borrow();
    entries
        .iter()
        .find(|(k, _)| objects_equal(k, key))
        .map(|(_, v)| v.clone())
}

pub fn dict_get_str(obj: &ObjRef, key: &str) -> Option<ObjRef> {
    let entries = dict_entries(obj)?.borrow();
    entries
        .iter()
        .find(|(k, _)| as_str(k) == Some(key))
        .map(|(_, v)| v.clone())
}

/// Insert or replace. Returns `false` when `obj` is not a dict.
pub fn dict_set(obj: &ObjRef, key: ObjRef, value: ObjRef) -> bool {
    let Some(cell) = dict_entries(obj) else {
        return false;
    };
    let replaced = {
        let mut entries = cell.borrow_mut();
        match entries.iter_mut().find(|(k, _)| objects_equal(k, &key)) {
            Some(slot) => Some(std::mem::replace(&mut slot.1, value)),
            None => {
                entries.push((key, value));
                None
            }
        }
    };
    drop(replaced);
    true
}

/// Remove `key`, returning whether it was present.
pub fn dict_del(obj: &ObjRef, key: &ObjRef) -> bool {
    let Some(cell) = dict_entries(obj) else {
        return false;
    };
    let removed = {
        let mut entries = cell.borrow_mut();
        entries
            .iter()
            .position(|(k, _)| objects_equal(k, key))
            .map(|idx| entries.remove(idx))
    };
    removed.is_some()
}

pub fn dict_len(obj: &ObjRef) -> Option<usize> {
    dict_entries(obj).map(|entries| entries.borrow().len())
}

pub fn dict_items(obj: &ObjRef) -> Vec<(ObjRef, ObjRef)> {
    dict_entries(obj)
        .map(|entries| entries.borrow().clone())
        .unwrap_or_default()
}

/// Identity, or value equality for int, float, str and bool.
pub fn objects_equal(a: &ObjRef, b: &ObjRef) -> bool {
    if a.is(b) {
        return true;
    }
    if let (Some(x), Some(y)) = (as_str(a), as_str(b)) {
        return x == y;
    }
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn numeric(obj: &ObjRef) -> Option<f64> {
    as_int(obj)
        .map(|i| i as f64)
        .or_else(|| as_float(obj))
        .or_else(|| as_bool(obj).map(|b| if b { 1.0 } else { 0.0 }))
}

pub fn capsule_new(pointer: *mut c_void, destructor: Option<CapsuleDestructor>) -> ObjRef {
    boxed(CapsuleObject {
        ob_base: RawObject::new(&CAPSULE_TYPE),
        pointer,
        destructor,
    })
}

pub fn capsule_pointer(obj: &ObjRef) -> Option<*mut c_void> {
    unsafe { payload::<CapsuleObject>(obj, &CAPSULE_TYPE) }.map(|c| c.pointer)
}

unsafe extern "C" fn capsule_dealloc(obj: *mut RawObject) {
    let capsule = unsafe { Box::from_raw(obj as *mut CapsuleObject) };
    if let Some(destructor) = capsule.destructor {
        unsafe { destructor(capsule.pointer) };
    }
    drop(capsule);
    object_freed();
}

pub fn cfunction_new(def: MethodDef, self_obj: Option<ObjRef>) -> ObjRef {
    boxed(CFunctionObject {
        ob_base: RawObject::new(&CFUNCTION_TYPE),
        def,
        self_obj,
    })
}

pub fn as_cfunction(obj: &ObjRef) -> Option<&CFunctionObject> {
    unsafe { payload::<CFunctionObject>(obj, &CFUNCTION_TYPE) }
}

/// Allocate a plain instance of `ty` with an empty attribute dict.
pub fn alloc_instance(ty: &'static TypeObject) -> ObjRef {
    boxed(InstanceObject {
        ob_base: RawObject::new(ty),
        dict: dict(),
        back_ref: AtomicU64::new(0),
    })
}

/// Store the back-reference handle of the cell `obj` forwards to.
///
/// # Safety
/// `obj` must come from [`alloc_instance`].
pub unsafe fn set_instance_back_ref(obj: &ObjRef, handle: u64) {
    let instance = unsafe { &*(obj.as_ptr() as *const InstanceObject) };
    instance.back_ref.store(handle, Ordering::Release);
}

/// Back-reference handle stored in an instance; 0 when nothing is attached.
///
/// # Safety
/// `obj` must point at a live instance created by [`alloc_instance`].
pub unsafe fn instance_back_ref(obj: *mut RawObject) -> u64 {
    let instance = unsafe { &*(obj as *const InstanceObject) };
    instance.back_ref.load(Ordering::Acquire)
}

/// Release the storage of an instance created by [`alloc_instance`] without
/// consulting its type's `tp_dealloc`.
///
/// # Safety
/// `obj` must come from [`alloc_instance`] and have no remaining references.
pub unsafe fn free_instance(obj: *mut RawObject) {
    unsafe { dealloc_boxed::<InstanceObject>(obj) };
}

unsafe extern "C" fn instance_dealloc(obj: *mut RawObject) {
    unsafe { free_instance(obj) };
}

/// Attribute dict of an instance whose type declares a dict offset.
pub fn instance_dict(obj: &ObjRef) -> Option<&ObjRef> {
    let offset = obj.type_object().tp_dictoffset;
    if offset <= 0 {
        return None;
    }
    let slot = unsafe { (obj.as_ptr() as *const u8).add(offset as usize) } as *const ObjRef;
    Some(unsafe { &*slot })
}

/// Create a heap subtype of `base` whose instances are plain dict-carrying
/// shells. Fails with `TypeError` when `base` is not subclassable.
pub fn new_subclass_type(base: &'static TypeObject, name: &str) -> Option<&'static TypeObject> {
    if !base.has_flag(TPFLAGS_BASETYPE) {
        let msg = format!("type '{}' is not an acceptable base type", base.name());
        errors::err_set_string(&errors::TYPE_ERROR, &msg);
        return None;
    }
    let Ok(c_name) = CString::new(name) else {
        errors::err_set_string(&errors::VALUE_ERROR, "type name contains a NUL byte");
        return None;
    };
    let mut ty = TypeObject {
        tp_name: c_name.into_raw(),
        tp_doc: std::ptr::null(),
        tp_base: base,
        tp_flags: (base.tp_flags | TPFLAGS_HEAPTYPE) & !TPFLAGS_READY,
        tp_basicsize: size_of::<InstanceObject>() as isize,
        tp_dictoffset: offset_of!(InstanceObject, dict) as isize,
        ..*base
    };
    if ty.tp_dealloc.is_none() {
        ty.tp_dealloc = Some(instance_dealloc);
    }
    if ty.tp_getattro.is_none() && ty.tp_getattr.is_none() {
        ty.tp_getattro = Some(attrs::generic_getattro_slot);
    }
    if ty.tp_setattro.is_none() && ty.tp_setattr.is_none() {
        ty.tp_setattro = Some(attrs::generic_setattro_slot);
    }
    let ty = Box::leak(Box::new(ty));
    if unsafe { crate::abi::type_ready(&mut *ty) } < 0 {
        return None;
    }
    Some(ty)
}

fn new_str_ptr(value: String) -> *mut RawObject {
    boxed(StrObject {
        ob_base: RawObject::new(&STR_TYPE),
        value,
    })
    .into_ptr()
}

unsafe fn borrowed(obj: *mut RawObject) -> Option<ObjRef> {
    unsafe { ObjRef::from_borrowed_ptr(obj) }
}

unsafe extern "C" fn none_repr(_: *mut RawObject) -> *mut RawObject {
    new_str_ptr("None".to_owned())
}

unsafe extern "C" fn bool_repr(obj: *mut RawObject) -> *mut RawObject {
    let value = unsafe { (*(obj as *const IntObject)).value };
    new_str_ptr(if value != 0 { "True" } else { "False" }.to_owned())
}

unsafe extern "C" fn int_repr(obj: *mut RawObject) -> *mut RawObject {
    let value = unsafe { (*(obj as *const IntObject)).value };
    new_str_ptr(value.to_string())
}

unsafe extern "C" fn int_hash(obj: *mut RawObject) -> c_long {
    let value = unsafe { (*(obj as *const IntObject)).value } as c_long;
    if value == -1 { -2 } else { value }
}

unsafe extern "C" fn float_repr(obj: *mut RawObject) -> *mut RawObject {
    let value = unsafe { (*(obj as *const FloatObject)).value };
    new_str_ptr(format!("{value:?}"))
}

unsafe extern "C" fn str_repr(obj: *mut RawObject) -> *mut RawObject {
    let value = unsafe { &(*(obj as *const StrObject)).value };
    new_str_ptr(format!("'{value}'"))
}

unsafe extern "C" fn str_str(obj: *mut RawObject) -> *mut RawObject {
    unsafe { crate::inc_ref(obj) };
    obj
}

unsafe extern "C" fn str_hash(obj: *mut RawObject) -> c_long {
    let value = unsafe { &(*(obj as *const StrObject)).value };
    // FNV-1a
    let mut h: u64 = 0xcbf29ce484222325;
    for b in value.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    let h = h as c_long;
    if h == -1 { -2 } else { h }
}

unsafe extern "C" fn value_richcompare(
    a: *mut RawObject,
    b: *mut RawObject,
    op: c_int,
) -> *mut RawObject {
    let (Some(a), Some(b)) = (unsafe { borrowed(a) }, unsafe { borrowed(b) }) else {
        return errors::raise_null(&errors::SYSTEM_ERROR, "comparison with a null operand");
    };
    let ordering = match (as_str(&a), as_str(&b)) {
        (Some(x), Some(y)) => Some(x.cmp(y)),
        _ => match (numeric(&a), numeric(&b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    };
    let result = match (op, ordering) {
        (compare_op::EQ, ord) => ord.is_some_and(|o| o.is_eq()),
        (compare_op::NE, ord) => !ord.is_some_and(|o| o.is_eq()),
        (compare_op::LT, Some(o)) => o.is_lt(),
        (compare_op::LE, Some(o)) => o.is_le(),
        (compare_op::GT, Some(o)) => o.is_gt(),
        (compare_op::GE, Some(o)) => o.is_ge(),
        _ => {
            let msg = format!(
                "'{}' and '{}' cannot be ordered",
                a.type_name(),
                b.type_name()
            );
            return errors::raise_null(&errors::TYPE_ERROR, &msg);
        }
    };
    bool(result).into_ptr()
}

unsafe extern "C" fn cfunction_repr(obj: *mut RawObject) -> *mut RawObject {
    let func = unsafe { &*(obj as *const CFunctionObject) };
    new_str_ptr(format!("<built-in function {}>", func.def.name()))
}
