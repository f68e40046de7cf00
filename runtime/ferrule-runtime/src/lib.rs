//! Ferrule runtime: expose Rust implementation types as native host objects.
//!
//! An implementation type implements [`ExtensionObject`], advertises the
//! protocols it supports on a [`TypeBuilder`] and is registered on first use
//! through [`ExtensionType`]. The host then reaches it only through the
//! `extern "C"` trampolines in [`dispatch`], which resolve `self`, run the
//! Rust method and turn any [`ExtError`] into the host's error state.

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extension;
pub mod flags;
pub mod identity;
pub mod method;
pub mod type_builder;

pub use bridge::ExceptionKind;
pub use error::{ExceptionSentinel, ExtError, ExtResult, HostResultExt};
pub use extension::{
    BufferSegment, CompareOp, Ext, ExtensionCell, ExtensionObject, ExtensionType, IntoCallArgs,
    call_on_self, generic_getattro, generic_setattro,
};
pub use method::{
    CallArgs, Convention, ExtensionModule, InstanceOwner, Method, MethodId, MethodOwner,
    MethodTable, Module, method_keyword_call_handler, method_noargs_call_handler,
    method_varargs_call_handler,
};
pub use type_builder::TypeBuilder;

pub use ferrule_obj_model as host;
pub use ferrule_obj_model::ObjRef;
