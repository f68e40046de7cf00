use std::ffi::c_void;

use ferrule_obj_model::RawObject;

use super::guard;
use crate::bridge::ExceptionKind;
use crate::error::{ExtError, ExtResult};
use crate::extension::{BufferSegment, ExtensionObject};
use crate::identity::resolve;

/// # Safety
/// `out` must be null or valid for a pointer-sized write.
unsafe fn store_segment(segment: BufferSegment, out: *mut *mut c_void) -> ExtResult<isize> {
    if out.is_null() {
        return Err(ExtError::raised(
            ExceptionKind::SYSTEM_ERROR,
            "buffer: null segment out-pointer",
        ));
    }
    unsafe { *out = segment.ptr };
    Ok(segment.len)
}

pub(crate) unsafe extern "C" fn read<T: ExtensionObject>(
    obj: *mut RawObject,
    segment: isize,
    out: *mut *mut c_void,
) -> isize {
    guard("buffer_getreadbuffer", || {
        let this = unsafe { resolve::<T>(obj) }?;
        unsafe { store_segment(this.buffer_getreadbuffer(segment)?, out) }
    })
}

pub(crate) unsafe extern "C" fn write<T: ExtensionObject>(
    obj: *mut RawObject,
    segment: isize,
    out: *mut *mut c_void,
) -> isize {
    guard("buffer_getwritebuffer", || {
        let this = unsafe { resolve::<T>(obj) }?;
        unsafe { store_segment(this.buffer_getwritebuffer(segment)?, out) }
    })
}

/// Returns the segment count; the total length goes to `total` when non-null.
pub(crate) unsafe extern "C" fn segcount<T: ExtensionObject>(
    obj: *mut RawObject,
    total: *mut isize,
) -> isize {
    guard("buffer_getsegcount", || {
        let this = unsafe { resolve::<T>(obj) }?;
        let (count, len) = this.buffer_getsegcount()?;
        if !total.is_null() {
            unsafe { *total = len };
        }
        Ok(count)
    })
}
