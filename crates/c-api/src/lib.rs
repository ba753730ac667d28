//! Flat C surface of the `glot` embedding boundary.
//!
//! Every entry point takes the attached-thread handle first, returns a
//! [`GlotStatus`](crate::error::GlotStatus), and writes results through
//! output parameters. All textual data crossing the boundary is UTF-8;
//! string length parameters accept [`GLOT_AUTO_LENGTH`] to mean "read until
//! NUL". String and stack-trace retrieval is two-phase: pass a NULL buffer
//! to query the required byte count, then a sized buffer to receive the
//! bytes.
//!
//! The generated header is written to `include/glot.h` by the build script.

use std::collections::HashMap;
use std::ffi::{CStr, c_char};
use std::sync::{Arc, OnceLock};

use glot::{Handle, Isolate, IsolateParams, IsolateThread};
use parking_lot::Mutex;

pub mod engine;
pub mod error;
pub mod exception;
pub mod value;

pub use engine::*;
pub use error::{GlotExtendedErrorInfo, GlotStatus, glot_get_last_error_info};
pub use exception::*;
pub use value::*;

use error::c_try;

/// Opaque handle to a runtime object (engine, context, builder, language,
/// value, callback info, exception) or to a reference.
pub type GlotHandle = u64;

/// Opaque isolate identity.
pub type GlotIsolateId = u64;

/// Length sentinel meaning "the string is NUL-terminated".
pub const GLOT_AUTO_LENGTH: usize = usize::MAX;

/// Opaque parameter block for isolate creation, interpreted by isolate
/// bootstrapping.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GlotIsolateParams {
    pub version: i32,
    /// Reserved virtual address space for the isolate heap, in bytes; zero
    /// means the default.
    pub reserved_address_space_size: u64,
}

fn isolates() -> &'static Mutex<HashMap<u64, Isolate>> {
    static ISOLATES: OnceLock<Mutex<HashMap<u64, Isolate>>> = OnceLock::new();
    ISOLATES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Read a UTF-8 string parameter with an explicit byte length or the
/// [`GLOT_AUTO_LENGTH`] sentinel.
///
/// # Safety
/// `ptr` must point to `length` valid bytes, or to a NUL-terminated string
/// when `length` is the sentinel.
pub(crate) unsafe fn read_utf8<'a>(
    ptr: *const c_char,
    length: usize,
) -> Result<&'a str, glot::Error> {
    if ptr.is_null() {
        return Err(glot::Error::InvalidArgument("string pointer is null"));
    }
    let bytes = if length == GLOT_AUTO_LENGTH {
        unsafe { CStr::from_ptr(ptr) }.to_bytes()
    } else {
        unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), length) }
    };
    std::str::from_utf8(bytes).map_err(|_| glot::Error::InvalidArgument("invalid UTF-8 string"))
}

/// Read a NUL-terminated UTF-8 string parameter.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn read_cstr<'a>(ptr: *const c_char) -> Result<&'a str, glot::Error> {
    unsafe { read_utf8(ptr, GLOT_AUTO_LENGTH) }
}

/// One leg of the two-phase buffer protocol: a NULL buffer queries the
/// required size, a non-NULL buffer receives up to `buffer_size` bytes with
/// the written count stored to `result`.
///
/// # Safety
/// `buffer` must point to `buffer_size` writable bytes when non-null, and
/// `result` must be a valid pointer.
pub(crate) unsafe fn fill_buffer(
    text: &str,
    buffer: *mut c_char,
    buffer_size: usize,
    result: *mut usize,
) {
    if buffer.is_null() {
        unsafe { result.write(text.len()) };
    } else {
        let written = text.len().min(buffer_size);
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr(), buffer.cast::<u8>(), written);
            result.write(written);
        }
    }
}

/// Temporarily owned attachment reconstructed from a raw thread pointer, for
/// the detach/teardown family that consumes the attachment.
unsafe fn thread_arc(thread: *const IsolateThread) -> Result<Arc<IsolateThread>, glot::Error> {
    if thread.is_null() {
        return Err(glot::Error::InvalidArgument("thread handle is null"));
    }
    unsafe {
        Arc::increment_strong_count(thread);
        Ok(Arc::from_raw(thread))
    }
}

/// Creates a new isolate, considering the passed parameters (which may be
/// NULL), and attaches the current thread to it. Every thread starts with a
/// default handle scope, released when the thread detaches.
///
/// # Safety
///
/// The caller must ensure that `params` is null or valid, and that
/// `isolate_out` and `thread_out` are valid pointers.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_isolate(
    params: *const GlotIsolateParams,
    isolate_out: *mut GlotIsolateId,
    thread_out: *mut *const IsolateThread,
) -> GlotStatus {
    let params = unsafe { params.as_ref() }.map(|p| IsolateParams {
        reserved_address_space_size: p.reserved_address_space_size,
    });
    let (isolate, thread) = c_try!(Isolate::create(params.as_ref()));
    isolates().lock().insert(isolate.id(), isolate.clone());
    unsafe {
        isolate_out.write(isolate.id());
        thread_out.write(Arc::as_ptr(&thread));
    }
    GlotStatus::Ok
}

/// Attaches the current thread to the passed isolate. If the thread is
/// already attached, the call succeeds and provides the existing attachment.
///
/// # Safety
///
/// The caller must ensure that `thread_out` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_attach_thread(
    isolate: GlotIsolateId,
    thread_out: *mut *const IsolateThread,
) -> GlotStatus {
    let found = c_try!(
        isolates()
            .lock()
            .get(&isolate)
            .cloned()
            .ok_or(glot::Error::IsolateDead)
    );
    let thread = c_try!(found.attach_current_thread());
    unsafe { thread_out.write(Arc::as_ptr(&thread)) };
    GlotStatus::Ok
}

/// Returns the calling thread's attachment to the passed isolate, or NULL
/// if the current thread is not attached.
#[unsafe(no_mangle)]
pub extern "C" fn glot_get_current_thread(isolate: GlotIsolateId) -> *const IsolateThread {
    isolates()
        .lock()
        .get(&isolate)
        .and_then(Isolate::current_thread)
        .map_or(std::ptr::null(), |thread| Arc::as_ptr(&thread))
}

/// Returns the isolate a thread is attached to, or 0 on error.
#[unsafe(no_mangle)]
pub extern "C" fn glot_get_isolate(thread: &IsolateThread) -> GlotIsolateId {
    thread.isolate().map_or(0, |isolate| isolate.id())
}

/// Detaches the passed thread from its isolate and discards all boundary
/// state associated with it. No guest code may be executing on the thread.
///
/// # Safety
///
/// The caller must ensure that `thread` is a live attachment; the handle
/// must not be used after this call returns successfully.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_detach_thread(thread: *const IsolateThread) -> GlotStatus {
    let thread = c_try!(unsafe { thread_arc(thread) });
    c_try!(IsolateThread::detach(&thread));
    GlotStatus::Ok
}

/// Detaches a batch of threads of the same isolate as `thread`. None of the
/// threads may execute guest code at the time of the call or later without
/// re-attaching; violating this is undefined. The current thread may be part
/// of the array.
///
/// # Safety
///
/// The caller must ensure that `threads` points to `length` live attachment
/// pointers of the same isolate.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_detach_threads(
    thread: *const IsolateThread,
    threads: *const *const IsolateThread,
    length: i32,
) -> GlotStatus {
    let current = c_try!(unsafe { thread_arc(thread) });
    let length = c_try!(
        usize::try_from(length)
            .map_err(|_| glot::Error::InvalidArgument("negative thread batch length"))
    );
    let mut batch = Vec::with_capacity(length);
    for i in 0..length {
        let ptr = unsafe { *threads.add(i) };
        batch.push(c_try!(unsafe { thread_arc(ptr) }));
    }
    c_try!(IsolateThread::detach_batch(&current, &batch));
    GlotStatus::Ok
}

/// Tears down the isolate the passed thread is attached to: blocks until
/// all other attached threads detach, then discards the isolate's objects
/// and references.
///
/// # Safety
///
/// The caller must ensure that `thread` is a live attachment; neither the
/// thread handle nor the isolate may be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_tear_down_isolate(thread: *const IsolateThread) -> GlotStatus {
    let thread = c_try!(unsafe { thread_arc(thread) });
    let isolate_id = thread.isolate_id();
    c_try!(IsolateThread::tear_down_isolate(&thread));
    isolates().lock().remove(&isolate_id);
    GlotStatus::Ok
}

/// Opens a handle scope. Until the scope is closed, all handles created on
/// this thread belong to it.
#[unsafe(no_mangle)]
pub extern "C" fn glot_open_handle_scope(thread: &IsolateThread) -> GlotStatus {
    c_try!(thread.open_scope());
    GlotStatus::Ok
}

/// Closes the topmost handle scope. Handles from the closed scope must not
/// be used anymore. Scopes must close in strict LIFO order per thread.
#[unsafe(no_mangle)]
pub extern "C" fn glot_close_handle_scope(thread: &IsolateThread) -> GlotStatus {
    c_try!(thread.close_scope());
    GlotStatus::Ok
}

/// Promotes a handle to a reference that stays alive, independent of any
/// scope, until `glot_delete_reference` is called.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_reference(
    thread: &IsolateThread,
    handle: GlotHandle,
    result: *mut GlotHandle,
) -> GlotStatus {
    let reference = c_try!(thread.create_reference(Handle::from_raw(handle)));
    unsafe { result.write(reference.as_raw()) };
    GlotStatus::Ok
}

/// Deletes a reference. After this point the reference must not be used
/// anymore.
#[unsafe(no_mangle)]
pub extern "C" fn glot_delete_reference(
    thread: &IsolateThread,
    reference: GlotHandle,
) -> GlotStatus {
    c_try!(thread.delete_reference(Handle::from_raw(reference)));
    GlotStatus::Ok
}
