//! Exception bridge: raise, match and clear the host's persisted error.
//!
//! Raising persists the error immediately; the returned `ExtError::Pending`
//! only carries the fact upward through `?` to the nearest trampoline.

use std::fmt;

use ferrule_obj_model::errors as host;
use ferrule_obj_model::{ObjRef, TypeObject};
use tracing::debug;

use crate::error::{ExtError, ExtResult};

/// A host exception kind. Compared by identity of the underlying type.
#[derive(Clone, Copy)]
pub struct ExceptionKind(&'static TypeObject);

impl ExceptionKind {
    pub const BASE_EXCEPTION: Self = Self(&host::BASE_EXCEPTION);
    pub const EXCEPTION: Self = Self(&host::EXCEPTION);
    pub const STOP_ITERATION: Self = Self(&host::STOP_ITERATION);
    pub const RUNTIME_ERROR: Self = Self(&host::RUNTIME_ERROR);
    pub const NOT_IMPLEMENTED_ERROR: Self = Self(&host::NOT_IMPLEMENTED_ERROR);
    pub const TYPE_ERROR: Self = Self(&host::TYPE_ERROR);
    pub const ATTRIBUTE_ERROR: Self = Self(&host::ATTRIBUTE_ERROR);
    pub const LOOKUP_ERROR: Self = Self(&host::LOOKUP_ERROR);
    pub const INDEX_ERROR: Self = Self(&host::INDEX_ERROR);
    pub const KEY_ERROR: Self = Self(&host::KEY_ERROR);
    pub const VALUE_ERROR: Self = Self(&host::VALUE_ERROR);
    pub const ARITHMETIC_ERROR: Self = Self(&host::ARITHMETIC_ERROR);
    pub const ZERO_DIVISION_ERROR: Self = Self(&host::ZERO_DIVISION_ERROR);
    pub const SYSTEM_ERROR: Self = Self(&host::SYSTEM_ERROR);

    pub fn from_type(ty: &'static TypeObject) -> Self {
        Self(ty)
    }

    pub fn type_object(self) -> &'static TypeObject {
        self.0
    }

    pub fn name(self) -> &'static str {
        self.0.name()
    }

    pub fn is_subclass_of(self, other: ExceptionKind) -> bool {
        self.0.is_subtype(other.0)
    }
}

impl PartialEq for ExceptionKind {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for ExceptionKind {}

impl fmt::Debug for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExceptionKind").field(&self.name()).finish()
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set `kind(reason)` as the current error.
pub fn raise(kind: ExceptionKind, reason: impl AsRef<str>) -> ExtError {
    host::err_set_string(kind.type_object(), reason.as_ref());
    ExtError::Pending
}

/// Set `kind` with an arbitrary payload object as the current error.
pub fn raise_object(kind: ExceptionKind, value: ObjRef) -> ExtError {
    host::err_set_object(kind.type_object(), Some(value));
    ExtError::Pending
}

/// Whether the current error is `kind` or derives from it.
pub fn matches(kind: ExceptionKind) -> bool {
    host::err_matches(kind.type_object())
}

pub fn clear() {
    host::err_clear();
}

pub fn occurred() -> Option<ExceptionKind> {
    host::err_occurred().map(ExceptionKind::from_type)
}

/// Take the current error as a value, leaving the slot empty.
pub fn fetch() -> Option<ExtError> {
    host::err_occurred()?;
    Some(ExtError::fetch())
}

/// Create the exception kind `module.name`, deriving from `parent`
/// (`Exception` when absent).
pub fn new_exception_kind(
    module: &str,
    name: &str,
    parent: Option<ExceptionKind>,
) -> ExtResult<ExceptionKind> {
    let parent = parent.unwrap_or(ExceptionKind::EXCEPTION);
    let qualified = format!("{module}.{name}");
    match host::new_exception_type(&qualified, parent.type_object()) {
        Some(ty) => {
            debug!(kind = %qualified, parent = %parent, "created exception kind");
            Ok(ExceptionKind::from_type(ty))
        }
        None => Err(ExtError::fetch()),
    }
}
