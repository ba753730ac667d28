//! Exception retrieval and inspection.

use std::ffi::c_char;

use glot::{Handle, IsolateThread};

use crate::error::{GlotStatus, c_try};
use crate::{GlotHandle, fill_buffer};

/// Returns the last exception that occurred on this thread.
///
/// Must be called right after an entry point returned the pending-exception
/// status, and can be called only once per failure: retrieval drains the
/// thread's pending slot.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_get_last_exception(
    thread: &IsolateThread,
    result: *mut GlotHandle,
) -> GlotStatus {
    let exception = c_try!(thread.take_last_exception());
    let handle = c_try!(thread.allocate(exception));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

macro_rules! exception_flags {
    ($($fn_name:ident => $method:ident, $doc:expr;)*) => {
        $(
            #[doc = $doc]
            ///
            /// # Safety
            ///
            /// The caller must ensure that `result` is a valid pointer.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $fn_name(
                thread: &IsolateThread,
                exception: GlotHandle,
                result: *mut bool,
            ) -> GlotStatus {
                let exception = c_try!(thread.expect_exception(Handle::from_raw(exception)));
                unsafe { result.write(exception.$method()) };
                GlotStatus::Ok
            }
        )*
    };
}

exception_flags! {
    glot_exception_is_syntax_error => is_syntax_error,
        "Checks if the exception was caused by a parser or syntax error.";
    glot_exception_is_cancelled => is_cancelled,
        "Checks if execution was cancelled.";
    glot_exception_is_internal_error => is_internal_error,
        "Checks if the exception was caused by an internal implementation error.";
    glot_exception_has_object => has_object,
        "Checks if the exception carries a guest-level exception object.";
}

/// Returns the guest exception object attached to the exception, failing
/// generically when there is none.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_exception_get_object(
    thread: &IsolateThread,
    exception: GlotHandle,
    result: *mut GlotHandle,
) -> GlotStatus {
    let exception = c_try!(thread.expect_exception(Handle::from_raw(exception)));
    let object = c_try!(
        exception
            .object()
            .ok_or(glot::Error::InvalidArgument("exception has no guest object"))
    );
    let handle = c_try!(thread.allocate(object));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Writes the guest stack trace using the two-phase buffer protocol. The
/// string returned through a previous call is invalidated by the next call.
///
/// # Safety
///
/// The caller must ensure that `buffer` is NULL or points to `buffer_size`
/// writable bytes and that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_exception_get_stack_trace(
    thread: &IsolateThread,
    exception: GlotHandle,
    buffer: *mut c_char,
    buffer_size: usize,
    result: *mut usize,
) -> GlotStatus {
    let exception = c_try!(thread.expect_exception(Handle::from_raw(exception)));
    unsafe { fill_buffer(exception.stack_trace(), buffer, buffer_size, result) };
    GlotStatus::Ok
}
