//! Erased method binding.
//!
//! A bound method is a host builtin whose `self` is a pair: a capsule owning
//! the receiver (`Box<dyn MethodOwner>`) and the index of the entry in the
//! receiver's `MethodTable`. The three call handlers below are the only entry
//! points the host ever sees; they unpack the pair, rebuild the arguments for
//! the entry's calling convention and dispatch through the owner.

use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use ferrule_obj_model::abi::{MethodDef, MethodFn};
use ferrule_obj_model::{ObjRef, RawObject, builtins};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::bridge::{self, ExceptionKind};
use crate::dispatch::{borrowed, guard, keywords, new_ref, optional, positional};
use crate::error::{ExtError, ExtResult};
use crate::extension::{ExtensionObject, ExtensionType};
use crate::identity;

/// A typed method body, tagged by the calling convention the host uses to
/// reach it.
pub enum Method<O> {
    NoArgs(fn(&O) -> ExtResult<ObjRef>),
    VarArgs(fn(&O, &[ObjRef]) -> ExtResult<ObjRef>),
    /// Keyword arguments always arrive as a dict, empty when none were given.
    Keywords(fn(&O, &[ObjRef], &ObjRef) -> ExtResult<ObjRef>),
}

impl<O> Method<O> {
    pub fn convention(&self) -> Convention {
        match self {
            Method::NoArgs(_) => Convention::NoArgs,
            Method::VarArgs(_) => Convention::VarArgs,
            Method::Keywords(_) => Convention::Keywords,
        }
    }
}

impl<O> Clone for Method<O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for Method<O> {}

impl<O> fmt::Debug for Method<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method::{:?}", self.convention())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    NoArgs,
    VarArgs,
    Keywords,
}

/// Position of an entry in its `MethodTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(usize);

impl MethodId {
    pub fn index(self) -> usize {
        self.0
    }
}

struct Entry<O> {
    name: String,
    c_name: CString,
    doc: Option<CString>,
    method: Method<O>,
}

/// Named methods of one receiver type. Append-only until frozen; frozen
/// tables are never modified again, so `MethodDef`s built from them may keep
/// pointers into the entries.
pub struct MethodTable<O> {
    entries: Vec<Entry<O>>,
    frozen: AtomicBool,
}

impl<O> MethodTable<O> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// Add `name`, replacing an earlier entry of the same name.
    pub fn add(&mut self, name: &str, method: Method<O>, doc: Option<&str>) -> ExtResult<MethodId> {
        self.ensure_open(name)?;
        if name.is_empty() {
            return Err(ExtError::Registration("method name is empty".to_owned()));
        }
        let c_name = CString::new(name)
            .map_err(|_| ExtError::Registration(format!("method name {name:?} contains NUL")))?;
        let doc = doc
            .map(CString::new)
            .transpose()
            .map_err(|_| ExtError::Registration(format!("{name}: doc contains NUL")))?;
        let entry = Entry {
            name: name.to_owned(),
            c_name,
            doc,
            method,
        };
        if let Some(id) = self.find(name) {
            self.entries[id.0] = entry;
            return Ok(id);
        }
        self.entries.push(entry);
        Ok(MethodId(self.entries.len() - 1))
    }

    pub(crate) fn ensure_open(&self, name: &str) -> ExtResult<()> {
        if self.is_frozen() {
            warn!(method = name, "method added after its table was frozen");
            return Err(ExtError::Registration(format!(
                "too late to add method {name}: table is frozen"
            )));
        }
        Ok(())
    }

    pub(crate) fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn find(&self, name: &str) -> Option<MethodId> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(MethodId)
    }

    pub fn get(&self, id: MethodId) -> Option<Method<O>> {
        self.entries.get(id.0).map(|e| e.method)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = (MethodId, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (MethodId(i), e.name.as_str()))
    }

    /// Host method definition routing `id` to the handler for its convention.
    /// The definition borrows the entry's strings; the table must outlive
    /// every callable built from it.
    pub(crate) fn method_def(&self, id: MethodId) -> MethodDef {
        let entry = &self.entries[id.0];
        let ml_meth = match entry.method.convention() {
            Convention::NoArgs => MethodFn::NoArgs(method_noargs_call_handler),
            Convention::VarArgs => MethodFn::VarArgs(method_varargs_call_handler),
            Convention::Keywords => MethodFn::Keywords(method_keyword_call_handler),
        };
        MethodDef {
            ml_name: entry.c_name.as_ptr(),
            ml_meth,
            ml_doc: entry.doc.as_ref().map_or(ptr::null(), |d| d.as_ptr()),
        }
    }

    /// Run entry `id` on `target`, checking that the call matches its
    /// convention.
    pub fn invoke(&self, target: &O, id: MethodId, args: CallArgs<'_>) -> ExtResult<ObjRef> {
        let Some(entry) = self.entries.get(id.0) else {
            return Err(ExtError::raised(
                ExceptionKind::SYSTEM_ERROR,
                format!("no method with index {}", id.0),
            ));
        };
        match (entry.method, args) {
            (Method::NoArgs(f), CallArgs::NoArgs) => f(target),
            (Method::VarArgs(f), CallArgs::VarArgs(args)) => f(target, args),
            (Method::Keywords(f), CallArgs::Keywords(args, kwargs)) => f(target, args, kwargs),
            (method, args) => Err(ExtError::raised(
                ExceptionKind::SYSTEM_ERROR,
                format!(
                    "{}: {:?} method called with {:?} arguments",
                    entry.name,
                    method.convention(),
                    args.convention()
                ),
            )),
        }
    }
}

impl<O> Default for MethodTable<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments as rebuilt by a call handler.
#[derive(Debug, Clone, Copy)]
pub enum CallArgs<'a> {
    NoArgs,
    VarArgs(&'a [ObjRef]),
    Keywords(&'a [ObjRef], &'a ObjRef),
}

impl CallArgs<'_> {
    pub fn convention(&self) -> Convention {
        match self {
            CallArgs::NoArgs => Convention::NoArgs,
            CallArgs::VarArgs(_) => Convention::VarArgs,
            CallArgs::Keywords(..) => Convention::Keywords,
        }
    }
}

/// Receiver of bound methods, with its concrete type erased.
pub trait MethodOwner {
    fn invoke(&self, id: MethodId, args: CallArgs<'_>) -> ExtResult<ObjRef>;
}

/// Receiver that is an extension instance.
pub struct InstanceOwner<T> {
    instance: ObjRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ExtensionObject> InstanceOwner<T> {
    pub fn new(instance: ObjRef) -> Self {
        Self {
            instance,
            _marker: PhantomData,
        }
    }
}

impl<T: ExtensionObject> MethodOwner for InstanceOwner<T> {
    fn invoke(&self, id: MethodId, args: CallArgs<'_>) -> ExtResult<ObjRef> {
        let this = unsafe { identity::resolve::<T>(self.instance.as_ptr()) }?;
        ExtensionType::<T>::methods()?.invoke(this, id, args)
    }
}

/// Receiver that is a module's state.
struct ModuleOwner<M: 'static> {
    state: &'static M,
    methods: &'static MethodTable<M>,
}

impl<M: 'static> MethodOwner for ModuleOwner<M> {
    fn invoke(&self, id: MethodId, args: CallArgs<'_>) -> ExtResult<ObjRef> {
        self.methods.invoke(self.state, id, args)
    }
}

unsafe extern "C" fn drop_owner(pointer: *mut c_void) {
    drop(unsafe { Box::from_raw(pointer as *mut Box<dyn MethodOwner>) });
}

fn owner_capsule(owner: Box<dyn MethodOwner>) -> ObjRef {
    let raw = Box::into_raw(Box::new(owner));
    builtins::capsule_new(raw as *mut c_void, Some(drop_owner))
}

fn bind_to_capsule(capsule: &ObjRef, def: MethodDef, id: MethodId) -> ObjRef {
    let pair = builtins::tuple(vec![capsule.clone(), builtins::int(id.0 as i64)]);
    builtins::cfunction_new(def, Some(pair))
}

/// Build a host callable that runs entry `id` on `owner`.
pub(crate) fn bind(owner: Box<dyn MethodOwner>, def: MethodDef, id: MethodId) -> ObjRef {
    bind_to_capsule(&owner_capsule(owner), def, id)
}

/// The `self` pair of a bound method, kept alive while the owner is in use.
struct Bound {
    _pair: ObjRef,
    owner: *const Box<dyn MethodOwner>,
    id: MethodId,
}

impl Bound {
    unsafe fn unpack(self_and_id: *mut RawObject) -> ExtResult<Self> {
        let pair = unsafe { borrowed(self_and_id, "bound method") }?;
        let malformed =
            || ExtError::raised(ExceptionKind::SYSTEM_ERROR, "malformed bound method");
        let (owner, id) = match builtins::tuple_items(&pair) {
            Some([capsule, id]) => {
                let owner = builtins::capsule_pointer(capsule).ok_or_else(malformed)?;
                let id = builtins::as_int(id)
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(malformed)?;
                (owner as *const Box<dyn MethodOwner>, MethodId(id))
            }
            _ => return Err(malformed()),
        };
        if owner.is_null() {
            return Err(malformed());
        }
        Ok(Self {
            _pair: pair,
            owner,
            id,
        })
    }

    fn invoke(&self, args: CallArgs<'_>) -> ExtResult<ObjRef> {
        let owner = unsafe { &**self.owner };
        owner.invoke(self.id, args)
    }
}

/// # Safety
/// `self_and_id` must be the pair built by [`bind`].
pub unsafe extern "C" fn method_noargs_call_handler(
    self_and_id: *mut RawObject,
    _args: *mut RawObject,
) -> *mut RawObject {
    guard("method_noargs", || {
        let bound = unsafe { Bound::unpack(self_and_id) }?;
        bound.invoke(CallArgs::NoArgs).map(new_ref)
    })
}

/// # Safety
/// `self_and_id` must be the pair built by [`bind`]; `args` a tuple.
pub unsafe extern "C" fn method_varargs_call_handler(
    self_and_id: *mut RawObject,
    args: *mut RawObject,
) -> *mut RawObject {
    guard("method_varargs", || {
        let bound = unsafe { Bound::unpack(self_and_id) }?;
        let args = unsafe { borrowed(args, "method_varargs") }?;
        bound.invoke(CallArgs::VarArgs(positional(&args)?)).map(new_ref)
    })
}

/// # Safety
/// `self_and_id` must be the pair built by [`bind`]; `args` a tuple and
/// `kwargs` null or a dict.
pub unsafe extern "C" fn method_keyword_call_handler(
    self_and_id: *mut RawObject,
    args: *mut RawObject,
    kwargs: *mut RawObject,
) -> *mut RawObject {
    guard("method_keyword", || {
        let bound = unsafe { Bound::unpack(self_and_id) }?;
        let args = unsafe { borrowed(args, "method_keyword") }?;
        let kwargs = keywords(unsafe { optional(kwargs) })?.unwrap_or_else(builtins::dict);
        bound
            .invoke(CallArgs::Keywords(positional(&args)?, &kwargs))
            .map(new_ref)
    })
}

/// Module-level functions backed by shared module state.
pub trait ExtensionModule: Sized + 'static {
    const NAME: &'static str;
    const DOC: Option<&'static str> = None;

    fn init_methods(methods: &mut MethodTable<Self>) -> ExtResult<()>;
}

/// An initialized extension module: its state, frozen method table and the
/// namespace dict holding one callable per method.
pub struct Module<M: 'static> {
    state: &'static M,
    methods: &'static MethodTable<M>,
    dict: ObjRef,
    exceptions: RwLock<HashMap<String, ExceptionKind>>,
}

impl<M: ExtensionModule> Module<M> {
    pub fn initialize(state: M) -> ExtResult<Self> {
        if M::NAME.is_empty() {
            return Err(ExtError::Registration("module name is empty".to_owned()));
        }
        let mut methods = MethodTable::new();
        M::init_methods(&mut methods)?;
        methods.freeze();
        let methods: &'static MethodTable<M> = Box::leak(Box::new(methods));
        let state: &'static M = Box::leak(Box::new(state));

        let owner = owner_capsule(Box::new(ModuleOwner { state, methods }));
        let dict = builtins::dict();
        let insert = |key: &str, value: ObjRef| {
            if builtins::dict_set(&dict, builtins::str(key), value) {
                Ok(())
            } else {
                Err(ExtError::fetch())
            }
        };
        insert("__name__", builtins::str(M::NAME))?;
        if let Some(doc) = M::DOC {
            insert("__doc__", builtins::str(doc))?;
        }
        for (id, name) in methods.ids() {
            insert(name, bind_to_capsule(&owner, methods.method_def(id), id))?;
        }
        debug!(module = M::NAME, methods = methods.len(), "extension module initialized");
        Ok(Self {
            state,
            methods,
            dict,
            exceptions: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &'static str {
        M::NAME
    }

    pub fn state(&self) -> &'static M {
        self.state
    }

    pub fn methods(&self) -> &'static MethodTable<M> {
        self.methods
    }

    /// Namespace dict of the module.
    pub fn dict(&self) -> &ObjRef {
        &self.dict
    }

    pub fn callable(&self, name: &str) -> Option<ObjRef> {
        builtins::dict_get_str(&self.dict, name)
    }

    /// Always fails: the table was frozen when the module was initialized.
    pub fn add_method(
        &self,
        name: &str,
        _method: Method<M>,
        _doc: Option<&str>,
    ) -> ExtResult<MethodId> {
        self.methods.ensure_open(name)?;
        Err(ExtError::Registration(format!(
            "too late to add method {name}: module {} is initialized",
            M::NAME
        )))
    }

    /// Create the exception kind `<module>.<name>` and remember it under
    /// `name`.
    pub fn add_exception(
        &self,
        name: &str,
        parent: Option<ExceptionKind>,
    ) -> ExtResult<ExceptionKind> {
        let kind = bridge::new_exception_kind(M::NAME, name, parent)?;
        self.exceptions.write().insert(name.to_owned(), kind);
        Ok(kind)
    }

    pub fn exception(&self, name: &str) -> Option<ExceptionKind> {
        self.exceptions.read().get(name).copied()
    }
}
