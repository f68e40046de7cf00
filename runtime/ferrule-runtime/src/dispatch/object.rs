use std::ffi::{CStr, c_char, c_int, c_long, c_void};
use std::io;

use ferrule_obj_model::builtins::free_instance;
use ferrule_obj_model::{RawObject, dec_ref, object_freed, release_back_ref};

use super::{borrowed, guard, keywords, new_ref, optional, positional};
use crate::bridge::ExceptionKind;
use crate::error::ExtError;
use crate::extension::{CompareOp, ExtensionCell, ExtensionObject};
use crate::identity::resolve;

/// Release a cell whose host object is the cell itself.
pub(crate) unsafe extern "C" fn dealloc<T: ExtensionObject>(obj: *mut RawObject) {
    drop(unsafe { Box::from_raw(obj as *mut ExtensionCell<T>) });
    object_freed();
}

/// Release a subclassable instance: detach and release its cell, then free
/// the shell.
pub(crate) unsafe extern "C" fn shell_dealloc<T: ExtensionObject>(obj: *mut RawObject) {
    if let Some(cell) = release_back_ref(obj) {
        unsafe { dec_ref(cell as *mut RawObject) };
    }
    unsafe { free_instance(obj) };
}

pub(crate) unsafe extern "C" fn repr<T: ExtensionObject>(obj: *mut RawObject) -> *mut RawObject {
    guard("repr", || {
        let this = unsafe { resolve::<T>(obj) }?;
        this.repr().map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn str<T: ExtensionObject>(obj: *mut RawObject) -> *mut RawObject {
    guard("str", || {
        let this = unsafe { resolve::<T>(obj) }?;
        this.str().map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn hash<T: ExtensionObject>(obj: *mut RawObject) -> c_long {
    guard("hash", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let h = this.hash()? as c_long;
        // -1 is the error sentinel for this slot.
        Ok(if h == -1 { -2 } else { h })
    })
}

pub(crate) unsafe extern "C" fn call<T: ExtensionObject>(
    obj: *mut RawObject,
    args: *mut RawObject,
    kwargs: *mut RawObject,
) -> *mut RawObject {
    guard("call", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let args = unsafe { borrowed(args, "call") }?;
        let kwargs = keywords(unsafe { optional(kwargs) })?;
        this.call(positional(&args)?, kwargs.as_ref()).map(new_ref)
    })
}

/// Writes through a C stream handed to the legacy print slot.
pub(crate) struct CFileWriter(*mut libc::FILE);

impl io::Write for CFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = unsafe { libc::fwrite(buf.as_ptr() as *const c_void, 1, buf.len(), self.0) };
        if n == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if unsafe { libc::fflush(self.0) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

pub(crate) unsafe extern "C" fn print<T: ExtensionObject>(
    obj: *mut RawObject,
    fp: *mut libc::FILE,
    flags: c_int,
) -> c_int {
    guard("print", || {
        let this = unsafe { resolve::<T>(obj) }?;
        if fp.is_null() {
            return Err(ExtError::raised(
                ExceptionKind::SYSTEM_ERROR,
                "print: null stream",
            ));
        }
        let mut out = CFileWriter(fp);
        this.print(&mut out, flags)?;
        io::Write::flush(&mut out)?;
        Ok(0)
    })
}

pub(crate) unsafe extern "C" fn compare<T: ExtensionObject>(
    obj: *mut RawObject,
    other: *mut RawObject,
) -> c_int {
    guard("compare", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let other = unsafe { borrowed(other, "compare") }?;
        Ok(this.compare(&other)?.signum())
    })
}

pub(crate) unsafe extern "C" fn rich_compare<T: ExtensionObject>(
    obj: *mut RawObject,
    other: *mut RawObject,
    op: c_int,
) -> *mut RawObject {
    guard("rich_compare", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let other = unsafe { borrowed(other, "rich_compare") }?;
        let op = CompareOp::from_raw(op).ok_or_else(|| {
            ExtError::raised(
                ExceptionKind::SYSTEM_ERROR,
                format!("rich_compare: bad opcode {op}"),
            )
        })?;
        this.rich_compare(&other, op).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn iter<T: ExtensionObject>(obj: *mut RawObject) -> *mut RawObject {
    guard("iter", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let this_obj = unsafe { borrowed(obj, "iter") }?;
        this.iter(&this_obj).map(new_ref)
    })
}

/// Exhaustion returns null with the error slot left empty.
pub(crate) unsafe extern "C" fn iternext<T: ExtensionObject>(
    obj: *mut RawObject,
) -> *mut RawObject {
    guard("iternext", || {
        let this = unsafe { resolve::<T>(obj) }?;
        Ok(this.iternext()?.map_or(std::ptr::null_mut(), new_ref))
    })
}

unsafe fn narrow_name<'a>(name: *const c_char, op: &'static str) -> Result<&'a str, ExtError> {
    if name.is_null() {
        return Err(ExtError::raised(
            ExceptionKind::SYSTEM_ERROR,
            format!("{op}: null attribute name"),
        ));
    }
    unsafe { CStr::from_ptr(name) }.to_str().map_err(|_| {
        ExtError::raised(
            ExceptionKind::ATTRIBUTE_ERROR,
            "attribute name is not valid UTF-8",
        )
    })
}

pub(crate) unsafe extern "C" fn getattr<T: ExtensionObject>(
    obj: *mut RawObject,
    name: *const c_char,
) -> *mut RawObject {
    guard("getattr", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let name = unsafe { narrow_name(name, "getattr") }?;
        this.getattr(name).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn setattr<T: ExtensionObject>(
    obj: *mut RawObject,
    name: *const c_char,
    value: *mut RawObject,
) -> c_int {
    guard("setattr", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let name = unsafe { narrow_name(name, "setattr") }?;
        let value = unsafe { optional(value) };
        this.setattr(name, value.as_ref()).map(|()| 0)
    })
}

pub(crate) unsafe extern "C" fn getattro<T: ExtensionObject>(
    obj: *mut RawObject,
    name: *mut RawObject,
) -> *mut RawObject {
    guard("getattro", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let this_obj = unsafe { borrowed(obj, "getattro") }?;
        let name = unsafe { borrowed(name, "getattro") }?;
        this.getattro(&this_obj, &name).map(new_ref)
    })
}

pub(crate) unsafe extern "C" fn setattro<T: ExtensionObject>(
    obj: *mut RawObject,
    name: *mut RawObject,
    value: *mut RawObject,
) -> c_int {
    guard("setattro", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let this_obj = unsafe { borrowed(obj, "setattro") }?;
        let name = unsafe { borrowed(name, "setattro") }?;
        let value = unsafe { optional(value) };
        this.setattro(&this_obj, &name, value.as_ref()).map(|()| 0)
    })
}
