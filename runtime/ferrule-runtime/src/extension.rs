//! Extension instance base: the contract implementation types satisfy, the
//! per-type registry and instance construction.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::ffi::c_void;
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

use ferrule_obj_model::abi::{TPFLAGS_BASETYPE, compare_op};
use ferrule_obj_model::{
    ObjRef, RawObject, TypeObject, attrs, builtins, call, object_allocated, register_back_ref,
};
use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, RwLock};
use tracing::error;

use crate::bridge::{self, ExceptionKind};
use crate::error::{ExtError, ExtResult, HostResultExt};
use crate::identity;
use crate::method::{InstanceOwner, MethodTable, bind};
use crate::type_builder::TypeBuilder;

/// Memory layout of an extension instance: host header, then the value.
/// For subclassable types this is the out-of-line cell behind a shell.
#[repr(C)]
pub struct ExtensionCell<T> {
    pub(crate) ob_base: RawObject,
    pub(crate) value: T,
}

impl<T> ExtensionCell<T> {
    pub(crate) fn new(ty: &'static TypeObject, value: T) -> Self {
        Self {
            ob_base: RawObject::new(ty),
            value,
        }
    }
}

impl<T> Drop for ExtensionCell<T> {
    fn drop(&mut self) {
        let live = self.ob_base.ob_refcnt.load(Ordering::Acquire);
        assert!(
            live == 0,
            "extension cell torn down with {live} outstanding references"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn from_raw(op: i32) -> Option<Self> {
        match op {
            compare_op::LT => Some(CompareOp::Lt),
            compare_op::LE => Some(CompareOp::Le),
            compare_op::EQ => Some(CompareOp::Eq),
            compare_op::NE => Some(CompareOp::Ne),
            compare_op::GT => Some(CompareOp::Gt),
            compare_op::GE => Some(CompareOp::Ge),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            CompareOp::Lt => compare_op::LT,
            CompareOp::Le => compare_op::LE,
            CompareOp::Eq => compare_op::EQ,
            CompareOp::Ne => compare_op::NE,
            CompareOp::Gt => compare_op::GT,
            CompareOp::Ge => compare_op::GE,
        }
    }
}

/// One segment handed out through the buffer protocol.
#[derive(Debug, Clone, Copy)]
pub struct BufferSegment {
    pub ptr: *mut c_void,
    pub len: isize,
}

/// Behaviour of an extension type.
///
/// Only the operations enabled on the type's [`TypeBuilder`] are reachable
/// from the host; everything else reports `ExtError::Unsupported`, which the
/// host sees as `NotImplementedError`. Mutation goes through interior
/// mutability: the host may hold any number of references.
#[allow(unused_variables)]
pub trait ExtensionObject: Sized + 'static {
    const NAME: &'static str;
    const DOC: Option<&'static str> = None;

    /// Advertise supported protocols and register methods. Runs once.
    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        Ok(())
    }

    fn repr(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("repr"))
    }
    fn str(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("str"))
    }
    fn hash(&self) -> ExtResult<i64> {
        Err(ExtError::Unsupported("hash"))
    }
    fn call(&self, args: &[ObjRef], kwargs: Option<&ObjRef>) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("call"))
    }
    fn print(&self, out: &mut dyn io::Write, flags: i32) -> ExtResult<()> {
        Err(ExtError::Unsupported("print"))
    }
    fn compare(&self, other: &ObjRef) -> ExtResult<i32> {
        Err(ExtError::Unsupported("compare"))
    }
    fn rich_compare(&self, other: &ObjRef, op: CompareOp) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("rich_compare"))
    }

    fn iter(&self, this: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("iter"))
    }
    /// `Ok(None)` signals exhaustion, not failure.
    fn iternext(&self) -> ExtResult<Option<ObjRef>> {
        Err(ExtError::Unsupported("iternext"))
    }

    fn getattr(&self, name: &str) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("getattr"))
    }
    fn setattr(&self, name: &str, value: Option<&ObjRef>) -> ExtResult<()> {
        Err(ExtError::Unsupported("setattr"))
    }
    fn getattro(&self, this: &ObjRef, name: &ObjRef) -> ExtResult<ObjRef> {
        generic_getattro::<Self>(this, name)
    }
    fn setattro(&self, this: &ObjRef, name: &ObjRef, value: Option<&ObjRef>) -> ExtResult<()> {
        generic_setattro(this, name, value)
    }

    fn sequence_length(&self) -> ExtResult<isize> {
        Err(ExtError::Unsupported("sequence_length"))
    }
    fn sequence_concat(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("sequence_concat"))
    }
    fn sequence_repeat(&self, count: isize) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("sequence_repeat"))
    }
    fn sequence_item(&self, index: isize) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("sequence_item"))
    }
    fn sequence_slice(&self, low: isize, high: isize) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("sequence_slice"))
    }
    /// `value` is `None` for deletion.
    fn sequence_ass_item(&self, index: isize, value: Option<&ObjRef>) -> ExtResult<()> {
        Err(ExtError::Unsupported("sequence_ass_item"))
    }
    fn sequence_ass_slice(&self, low: isize, high: isize, value: Option<&ObjRef>) -> ExtResult<()> {
        Err(ExtError::Unsupported("sequence_ass_slice"))
    }
    fn sequence_inplace_concat(&self, this: &ObjRef, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("sequence_inplace_concat"))
    }
    fn sequence_inplace_repeat(&self, this: &ObjRef, count: isize) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("sequence_inplace_repeat"))
    }
    fn sequence_contains(&self, value: &ObjRef) -> ExtResult<bool> {
        Err(ExtError::Unsupported("sequence_contains"))
    }

    fn mapping_length(&self) -> ExtResult<isize> {
        Err(ExtError::Unsupported("mapping_length"))
    }
    fn mapping_subscript(&self, key: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("mapping_subscript"))
    }
    /// `value` is `None` for deletion.
    fn mapping_ass_subscript(&self, key: &ObjRef, value: Option<&ObjRef>) -> ExtResult<()> {
        Err(ExtError::Unsupported("mapping_ass_subscript"))
    }

    fn number_add(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_add"))
    }
    fn number_subtract(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_subtract"))
    }
    fn number_multiply(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_multiply"))
    }
    fn number_divide(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_divide"))
    }
    fn number_remainder(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_remainder"))
    }
    fn number_divmod(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_divmod"))
    }
    /// `modulus` is the host's none object for two-argument `pow`.
    fn number_power(&self, exp: &ObjRef, modulus: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_power"))
    }
    fn number_negative(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_negative"))
    }
    fn number_positive(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_positive"))
    }
    fn number_absolute(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_absolute"))
    }
    fn number_nonzero(&self) -> ExtResult<bool> {
        Err(ExtError::Unsupported("number_nonzero"))
    }
    fn number_invert(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_invert"))
    }
    fn number_lshift(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_lshift"))
    }
    fn number_rshift(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_rshift"))
    }
    fn number_and(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_and"))
    }
    fn number_xor(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_xor"))
    }
    fn number_or(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_or"))
    }
    fn number_int(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_int"))
    }
    fn number_long(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_long"))
    }
    fn number_float(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_float"))
    }
    fn number_oct(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_oct"))
    }
    fn number_hex(&self) -> ExtResult<ObjRef> {
        Err(ExtError::Unsupported("number_hex"))
    }

    fn buffer_getreadbuffer(&self, segment: isize) -> ExtResult<BufferSegment> {
        Err(ExtError::Unsupported("buffer_getreadbuffer"))
    }
    fn buffer_getwritebuffer(&self, segment: isize) -> ExtResult<BufferSegment> {
        Err(ExtError::Unsupported("buffer_getwritebuffer"))
    }
    /// Segment count and total byte length.
    fn buffer_getsegcount(&self) -> ExtResult<(isize, isize)> {
        Err(ExtError::Unsupported("buffer_getsegcount"))
    }
}

/// Attribute lookup shared by every extension type: instance dict (shells
/// only), then registered methods, then the host's generic lookup.
pub fn generic_getattro<T: ExtensionObject>(this: &ObjRef, name: &ObjRef) -> ExtResult<ObjRef> {
    let Some(key) = builtins::as_str(name) else {
        return Err(bridge::raise(
            ExceptionKind::TYPE_ERROR,
            "attribute name must be a string",
        ));
    };
    if let Some(value) =
        builtins::instance_dict(this).and_then(|dict| builtins::dict_get_str(dict, key))
    {
        return Ok(value);
    }
    let methods = ExtensionType::<T>::methods()?;
    if key == "__methods__" {
        let names = methods.names().map(builtins::str).collect();
        return Ok(builtins::tuple(names));
    }
    if let Some(id) = methods.find(key) {
        let owner = InstanceOwner::<T>::new(this.clone());
        return Ok(bind(Box::new(owner), methods.method_def(id), id));
    }
    attrs::generic_getattr(this, name).or_pending()
}

pub fn generic_setattro(this: &ObjRef, name: &ObjRef, value: Option<&ObjRef>) -> ExtResult<()> {
    attrs::generic_setattr(this, name, value).or_pending()
}

/// Positional argument packs accepted by [`call_on_self`].
pub trait IntoCallArgs {
    fn into_call_args(self) -> Vec<ObjRef>;
}

impl IntoCallArgs for Vec<ObjRef> {
    fn into_call_args(self) -> Vec<ObjRef> {
        self
    }
}

macro_rules! tuple_call_args {
    (@ty $idx:tt) => { ObjRef };
    ($($idx:tt),*) => {
        impl IntoCallArgs for ($(tuple_call_args!(@ty $idx),)*) {
            fn into_call_args(self) -> Vec<ObjRef> {
                vec![$(self.$idx),*]
            }
        }
    };
}

tuple_call_args!();
tuple_call_args!(0);
tuple_call_args!(0, 1);
tuple_call_args!(0, 1, 2);
tuple_call_args!(0, 1, 2, 3);
tuple_call_args!(0, 1, 2, 3, 4);
tuple_call_args!(0, 1, 2, 3, 4, 5);
tuple_call_args!(0, 1, 2, 3, 4, 5, 6);
tuple_call_args!(0, 1, 2, 3, 4, 5, 6, 7);
tuple_call_args!(0, 1, 2, 3, 4, 5, 6, 7, 8);

/// Call the attribute `name` of `this` with positional `args`.
pub fn call_on_self(this: &ObjRef, name: &str, args: impl IntoCallArgs) -> ExtResult<ObjRef> {
    let callable = attrs::getattr(this, name).or_pending()?;
    let args = builtins::tuple(args.into_call_args());
    call::call_object(&callable, &args, None).or_pending()
}

pub(crate) struct Registered<T> {
    pub(crate) type_object: &'static TypeObject,
    /// Hidden type of out-of-line cells; only subclassable types have one.
    pub(crate) cell_type: Option<&'static TypeObject>,
    pub(crate) methods: MethodTable<T>,
}

type RegistryEntry = Result<&'static (dyn Any + Send + Sync), String>;

static REGISTRY: Lazy<RwLock<HashMap<TypeId, RegistryEntry>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Serializes type construction across threads. Reentrant so `init_type`
/// can register the types it depends on.
static BUILD_LOCK: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

/// Handle to the registered host type of `T`.
pub struct ExtensionType<T>(PhantomData<fn() -> T>);

impl<T: ExtensionObject> ExtensionType<T> {
    /// Register `T` on first use and return its type object. A failed
    /// registration is remembered and reported again without rerunning
    /// `init_type`.
    pub fn ready() -> ExtResult<&'static TypeObject> {
        Ok(Self::registered()?.type_object)
    }

    pub fn is_ready() -> bool {
        matches!(REGISTRY.read().get(&TypeId::of::<T>()), Some(Ok(_)))
    }

    pub fn methods() -> ExtResult<&'static MethodTable<T>> {
        Ok(&Self::registered()?.methods)
    }

    pub(crate) fn registered() -> ExtResult<&'static Registered<T>> {
        let key = TypeId::of::<T>();
        if let Some(entry) = REGISTRY.read().get(&key) {
            return Self::downcast(entry);
        }
        let _build = BUILD_LOCK.lock();
        if let Some(entry) = REGISTRY.read().get(&key) {
            return Self::downcast(entry);
        }
        // init_type may register other types, so the registry lock is not held.
        let built: RegistryEntry = match Self::build() {
            Ok(record) => {
                let record: &'static Registered<T> = Box::leak(Box::new(record));
                Ok(record)
            }
            Err(err) => {
                error!(type_name = T::NAME, error = %err, "extension type registration failed");
                Err(err.to_string())
            }
        };
        let mut registry = REGISTRY.write();
        let entry = registry.entry(key).or_insert(built);
        Self::downcast(entry)
    }

    fn build() -> ExtResult<Registered<T>> {
        let mut builder = TypeBuilder::<T>::new();
        T::init_type(&mut builder)?;
        builder.finalize()
    }

    fn downcast(entry: &RegistryEntry) -> ExtResult<&'static Registered<T>> {
        match entry {
            Ok(record) => record.downcast_ref::<Registered<T>>().ok_or_else(|| {
                ExtError::Registration(format!("{} registry entry has the wrong type", T::NAME))
            }),
            Err(msg) => Err(ExtError::Registration(msg.clone())),
        }
    }

    /// Create an instance of `T`'s own type.
    pub fn create(value: T) -> ExtResult<ObjRef> {
        let record = Self::registered()?;
        Self::create_in(record.type_object, value)
    }

    /// Create an instance whose host type is `subtype`, which must be `T`'s
    /// type or a host subclass of it.
    pub fn create_in(subtype: &'static TypeObject, value: T) -> ExtResult<ObjRef> {
        let record = Self::registered()?;
        if !subtype.is_subtype(record.type_object) {
            return Err(ExtError::raised(
                ExceptionKind::TYPE_ERROR,
                format!("{} is not a subtype of {}", subtype.name(), T::NAME),
            ));
        }
        match record.cell_type {
            Some(cell_type) => {
                let shell = builtins::alloc_instance(subtype);
                let cell = Box::into_raw(Box::new(ExtensionCell::new(cell_type, value)));
                object_allocated();
                let handle = register_back_ref(shell.as_ptr(), cell as *mut u8);
                unsafe { builtins::set_instance_back_ref(&shell, handle) };
                Ok(shell)
            }
            None => {
                let cell = Box::into_raw(Box::new(ExtensionCell::new(subtype, value)));
                object_allocated();
                unsafe { ObjRef::from_owned_ptr(cell as *mut RawObject) }.ok_or_else(|| {
                    ExtError::raised(ExceptionKind::SYSTEM_ERROR, "cell allocation failed")
                })
            }
        }
    }

    /// Whether the host may subclass `T`.
    pub fn is_subclassable() -> ExtResult<bool> {
        Ok(Self::registered()?.type_object.has_flag(TPFLAGS_BASETYPE))
    }
}

/// Owning handle to a host object known to be backed by `T`.
pub struct Ext<T> {
    obj: ObjRef,
    _marker: PhantomData<*const T>,
}

impl<T: ExtensionObject> Ext<T> {
    pub fn new(value: T) -> ExtResult<Self> {
        Ok(Self {
            obj: ExtensionType::<T>::create(value)?,
            _marker: PhantomData,
        })
    }

    /// Check that `obj` is an instance of `T`'s type (or a subclass).
    pub fn from_object(obj: ObjRef) -> ExtResult<Self> {
        let ty = ExtensionType::<T>::ready()?;
        if !obj.type_object().is_subtype(ty) {
            return Err(ExtError::raised(
                ExceptionKind::TYPE_ERROR,
                format!("expected {}, got {}", T::NAME, obj.type_name()),
            ));
        }
        Ok(Self {
            obj,
            _marker: PhantomData,
        })
    }

    pub fn get(&self) -> ExtResult<&T> {
        unsafe { identity::resolve::<T>(self.obj.as_ptr()) }
    }

    pub fn as_object(&self) -> &ObjRef {
        &self.obj
    }

    pub fn into_object(self) -> ObjRef {
        self.obj
    }
}

impl<T> Clone for Ext<T> {
    fn clone(&self) -> Self {
        Self {
            obj: self.obj.clone(),
            _marker: PhantomData,
        }
    }
}
