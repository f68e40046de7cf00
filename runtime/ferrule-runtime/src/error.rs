use std::ffi::c_int;
use std::io;

use ferrule_obj_model::errors as host;
use ferrule_obj_model::{ObjRef, RawObject, builtins};
use thiserror::Error;

use crate::bridge::ExceptionKind;

pub type ExtResult<T> = Result<T, ExtError>;

/// Error value carried through native code until a trampoline hands it to the
/// host. Only `restore` and the bridge write the host's error slot.
#[derive(Debug, Error)]
pub enum ExtError {
    #[error("{kind}: {message}")]
    Raised {
        kind: ExceptionKind,
        message: String,
    },
    #[error("{kind} (object payload)")]
    Object {
        kind: ExceptionKind,
        value: Option<ObjRef>,
    },
    /// An optional operation was dispatched to a type that never implemented it.
    #[error("extension object missing implementation of {0}")]
    Unsupported(&'static str),
    /// Misuse of type or method registration; never retried.
    #[error("registration failed: {0}")]
    Registration(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The host error slot already holds the error.
    #[error("error pending in host state")]
    Pending,
}

impl ExtError {
    pub fn raised(kind: ExceptionKind, message: impl Into<String>) -> Self {
        ExtError::Raised {
            kind,
            message: message.into(),
        }
    }

    /// Take whatever the host error slot holds. An empty slot becomes a
    /// `SystemError`, since the caller only asks after a failure signal.
    pub fn fetch() -> Self {
        match host::err_fetch() {
            Some((kind, value)) => ExtError::Object {
                kind: ExceptionKind::from_type(kind),
                value,
            },
            None => ExtError::raised(
                ExceptionKind::SYSTEM_ERROR,
                "error return without exception set",
            ),
        }
    }

    /// Exception kind this error presents to the host as.
    pub fn kind(&self) -> Option<ExceptionKind> {
        match self {
            ExtError::Raised { kind, .. } | ExtError::Object { kind, .. } => Some(*kind),
            ExtError::Unsupported(_) => Some(ExceptionKind::NOT_IMPLEMENTED_ERROR),
            ExtError::Registration(_) | ExtError::Io(_) => Some(ExceptionKind::RUNTIME_ERROR),
            ExtError::Pending => host::err_occurred().map(ExceptionKind::from_type),
        }
    }

    /// True when the error is `kind` or one of its subclasses.
    pub fn is(&self, kind: ExceptionKind) -> bool {
        self.kind().is_some_and(|k| k.is_subclass_of(kind))
    }

    /// Persist the error into the host slot. Called once, at the ABI edge.
    pub fn restore(self) {
        match self {
            ExtError::Raised { kind, message } => {
                host::err_set_string(kind.type_object(), &message);
            }
            ExtError::Object { kind, value } => {
                host::err_set_object(kind.type_object(), value);
            }
            ExtError::Unsupported(op) => {
                let msg = format!("extension object missing implementation of {op}");
                host::err_set_string(&host::NOT_IMPLEMENTED_ERROR, &msg);
            }
            ExtError::Registration(msg) => {
                host::err_set_string(&host::RUNTIME_ERROR, &msg);
            }
            ExtError::Io(err) => {
                host::err_set_string(&host::RUNTIME_ERROR, &err.to_string());
            }
            ExtError::Pending => host::err_ensure_set("extension call"),
        }
    }

    /// Message text, when the error carries one.
    pub fn message(&self) -> Option<String> {
        match self {
            ExtError::Raised { message, .. } => Some(message.clone()),
            ExtError::Object { value, .. } => value
                .as_ref()
                .and_then(builtins::as_str)
                .map(str::to_owned),
            ExtError::Pending => host::err_message(),
            other => Some(other.to_string()),
        }
    }
}

/// Host-side calls report failure as `None` with the slot set; lift that into
/// an `ExtResult` without disturbing the slot.
pub trait HostResultExt<T> {
    fn or_pending(self) -> ExtResult<T>;
}

impl<T> HostResultExt<T> for Option<T> {
    fn or_pending(self) -> ExtResult<T> {
        self.ok_or(ExtError::Pending)
    }
}

/// Value a trampoline returns to signal "error set".
pub trait ExceptionSentinel {
    fn exception_sentinel() -> Self;
}

impl ExceptionSentinel for *mut RawObject {
    fn exception_sentinel() -> Self {
        std::ptr::null_mut()
    }
}

impl ExceptionSentinel for c_int {
    fn exception_sentinel() -> Self {
        -1
    }
}

impl ExceptionSentinel for i64 {
    fn exception_sentinel() -> Self {
        -1
    }
}

impl ExceptionSentinel for isize {
    fn exception_sentinel() -> Self {
        -1
    }
}
