//! Status codes and the per-thread extended error info slot.
//!
//! Every entry point reports a [`GlotStatus`]. Non-success statuses leave a
//! description in the calling thread's extended error info, retrievable once
//! with [`glot_get_last_error_info`]; the returned pointers stay valid until
//! the next failure on the same thread.

use std::cell::RefCell;
use std::ffi::{CString, c_char};

use glot::IsolateThread;

/// Exhaustive status taxonomy of the boundary surface.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlotStatus {
    Ok = 0,
    GenericFailure = 1,
    /// An exception is now retrievable with `glot_get_last_exception`.
    PendingException = 2,
    /// Type mismatch on a string-only operation.
    StringExpected = 3,
    /// Type mismatch on an array-only operation.
    ArrayExpected = 4,
}

impl From<&glot::Error> for GlotStatus {
    fn from(error: &glot::Error) -> Self {
        match error {
            glot::Error::PendingException => Self::PendingException,
            glot::Error::StringExpected => Self::StringExpected,
            glot::Error::ArrayExpected => Self::ArrayExpected,
            _ => Self::GenericFailure,
        }
    }
}

/// Description of the last boundary failure on this thread.
#[repr(C)]
pub struct GlotExtendedErrorInfo {
    /// NUL-terminated UTF-8 description. Valid until the next failure on
    /// this thread.
    pub message: *const c_char,
}

struct StoredError {
    // Boxed so the address handed out through `info` stays stable while the
    // slot itself lives in a RefCell.
    _message: CString,
    info: GlotExtendedErrorInfo,
    retrieved: bool,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<Box<StoredError>>> = const { RefCell::new(None) };
}

pub(crate) fn set_last_error(error: &glot::Error) {
    let message = CString::new(error.to_string())
        .unwrap_or_else(|_| c"invalid utf-8 in error message".to_owned());
    LAST_ERROR.with(|slot| {
        let info = GlotExtendedErrorInfo {
            message: message.as_ptr(),
        };
        *slot.borrow_mut() = Some(Box::new(StoredError {
            _message: message,
            info,
            retrieved: false,
        }));
    });
}

/// Returns information about the last failure on this thread.
///
/// Must be called right after a failure occurs and can be called only once
/// per failure. The returned pointer is valid until the next failure on this
/// thread.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_get_last_error_info(
    thread: &IsolateThread,
    result: *mut *const GlotExtendedErrorInfo,
) -> GlotStatus {
    let _ = thread;
    LAST_ERROR.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_mut() {
            Some(stored) if !stored.retrieved => {
                stored.retrieved = true;
                unsafe { result.write(&raw const stored.info) };
                GlotStatus::Ok
            }
            _ => GlotStatus::GenericFailure,
        }
    })
}

macro_rules! c_try {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(e) => {
                let status = $crate::error::GlotStatus::from(&e);
                $crate::error::set_last_error(&e);
                return status;
            }
        }
    };
}

pub(crate) use c_try;
