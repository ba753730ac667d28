//! Value creation, introspection, extraction, member/array access, and the
//! callback bridge.

use std::ffi::{c_char, c_void};
use std::sync::Arc;

use glot::{
    CallbackInfo, GuestEnv, GuestError, Handle, HostFunction, InteropError, InteropResult,
    IsolateThread, UserData, Value,
};
use smallvec::SmallVec;

use crate::error::{GlotStatus, c_try};
use crate::{GlotHandle, fill_buffer, read_cstr, read_utf8};

/// Native function invoked by guest code through a callable value. Receives
/// the attached-thread handle and a callback-info handle carrying the
/// arguments and the registered data pointer; returns a value handle, or 0
/// for the null value.
pub type GlotCallback =
    extern "C" fn(thread: *const IsolateThread, callback_info: GlotHandle) -> GlotHandle;

/// Adapter from the C function-pointer shape onto the callback bridge.
struct CCallback {
    callback: GlotCallback,
}

impl HostFunction for CCallback {
    fn invoke(&self, env: &GuestEnv<'_>, info: &CallbackInfo) -> InteropResult<Value> {
        let bridge_err =
            |e: glot::Error| InteropError::Guest(GuestError::internal(e.to_string()));
        let handle = env.thread.allocate(info.clone()).map_err(bridge_err)?;
        let result = (self.callback)(std::ptr::from_ref(env.thread), handle.as_raw());
        if result == 0 {
            return env.context.null().map_err(bridge_err);
        }
        env.thread
            .expect_value(Handle::from_raw(result))
            .map_err(bridge_err)
    }
}

/// Creates a callable value that calls back into native code, passing the
/// registered `data` pointer through untouched.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer. `callback` may
/// be invoked from any thread that executes guest code in this context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_function(
    thread: &IsolateThread,
    context: GlotHandle,
    callback: GlotCallback,
    data: *mut c_void,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let value = c_try!(context.function(Arc::new(CCallback { callback }), UserData::new(data)));
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Retrieves the details of a callback invocation: the argument count, the
/// argument values, and the registered data pointer. If `argv` is non-NULL
/// it must hold space for the argument count (query it with a NULL `argv`
/// first).
///
/// # Safety
///
/// The caller must ensure that `argc` is valid, `argv` is NULL or holds
/// enough space, and `data` is NULL or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_get_callback_info(
    thread: &IsolateThread,
    callback_info: GlotHandle,
    argc: *mut usize,
    argv: *mut GlotHandle,
    data: *mut *mut c_void,
) -> GlotStatus {
    let info = c_try!(thread.expect_callback_info(Handle::from_raw(callback_info)));
    unsafe { argc.write(info.argc()) };
    if !argv.is_null() {
        for (i, arg) in info.args().iter().enumerate() {
            let handle = c_try!(thread.allocate(arg.clone()));
            unsafe { argv.add(i).write(handle.as_raw()) };
        }
    }
    if !data.is_null() {
        unsafe { data.write(info.data()) };
    }
    GlotStatus::Ok
}

/// Raises an exception in a native callback.
///
/// Invocation does not interrupt control flow: the callback must still
/// return, and only the raise state present at return time is observed by
/// the guest caller. If called multiple times, only the last exception is
/// thrown.
///
/// # Safety
///
/// The caller must ensure that `utf8_message` is a valid NUL-terminated
/// UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_throw_exception(
    thread: &IsolateThread,
    utf8_message: *const c_char,
) -> GlotStatus {
    let message = c_try!(unsafe { read_cstr(utf8_message) });
    c_try!(thread.raise(message));
    GlotStatus::Ok
}

macro_rules! int_creators {
    ($($fn_name:ident => $ty:ty, $doc:expr;)*) => {
        $(
            #[doc = $doc]
            ///
            /// # Safety
            ///
            /// The caller must ensure that `result` is a valid pointer.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $fn_name(
                thread: &IsolateThread,
                context: GlotHandle,
                value: $ty,
                result: *mut GlotHandle,
            ) -> GlotStatus {
                let context = c_try!(thread.expect_context(Handle::from_raw(context)));
                let value = c_try!(context.int(i64::from(value)));
                let handle = c_try!(thread.allocate(value));
                unsafe { result.write(handle.as_raw()) };
                GlotStatus::Ok
            }
        )*
    };
}

int_creators! {
    glot_create_int8 => i8, "Creates an integer number value from `int8_t`.";
    glot_create_int16 => i16, "Creates an integer number value from `int16_t`.";
    glot_create_int32 => i32, "Creates an integer number value from `int32_t`.";
    glot_create_int64 => i64, "Creates an integer number value from `int64_t`.";
    glot_create_uint8 => u8, "Creates an integer number value from `uint8_t`.";
    glot_create_uint16 => u16, "Creates an integer number value from `uint16_t`.";
    glot_create_uint32 => u32, "Creates an integer number value from `uint32_t`.";
}

/// Creates a boolean value.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_boolean(
    thread: &IsolateThread,
    context: GlotHandle,
    value: bool,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let value = c_try!(context.boolean(value));
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Creates a floating point number value from a C `float`.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_float(
    thread: &IsolateThread,
    context: GlotHandle,
    value: f32,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let value = c_try!(context.float32(value));
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Creates a floating point number value from a C `double`.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_double(
    thread: &IsolateThread,
    context: GlotHandle,
    value: f64,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let value = c_try!(context.float64(value));
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Creates a string value from UTF-8 bytes. Only `length` bytes are read
/// unless `GLOT_AUTO_LENGTH` is passed, in which case the string must be
/// NUL-terminated.
///
/// # Safety
///
/// The caller must ensure that `string` points to `length` valid bytes (or
/// a NUL-terminated string with the sentinel) and that `result` is a valid
/// pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_string_utf8(
    thread: &IsolateThread,
    context: GlotHandle,
    string: *const c_char,
    length: usize,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let text = c_try!(unsafe { read_utf8(string, length) });
    let value = c_try!(context.string(text));
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Creates the null value.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_null(
    thread: &IsolateThread,
    context: GlotHandle,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let value = c_try!(context.null());
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Creates an object value with no members.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_object(
    thread: &IsolateThread,
    context: GlotHandle,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let value = c_try!(context.object());
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Creates an array value from a C array of value handles.
///
/// # Safety
///
/// The caller must ensure that `value_array` points to `array_length` valid
/// value handles and that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_array(
    thread: &IsolateThread,
    context: GlotHandle,
    value_array: *const GlotHandle,
    array_length: i64,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let length = c_try!(
        usize::try_from(array_length)
            .map_err(|_| glot::Error::InvalidArgument("negative array length"))
    );
    let mut values: Vec<Value> = Vec::with_capacity(length);
    for i in 0..length {
        let raw = unsafe { *value_array.add(i) };
        values.push(c_try!(thread.expect_value(Handle::from_raw(raw))));
    }
    let value = c_try!(context.array(&values));
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

macro_rules! bool_queries {
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
                value: GlotHandle,
                result: *mut bool,
            ) -> GlotStatus {
                let value = c_try!(thread.expect_value(Handle::from_raw(value)));
                let answer = c_try!(value.$method());
                unsafe { result.write(answer) };
                GlotStatus::Ok
            }
        )*
    };
}

bool_queries! {
    glot_value_is_null => is_null, "Returns `true` if the value is null-like.";
    glot_value_is_boolean => is_boolean, "Returns `true` if the value represents a boolean.";
    glot_value_is_string => is_string, "Returns `true` if the value represents a string.";
    glot_value_is_number => is_number, "Returns `true` if the value represents a number.";
    glot_value_fits_in_int8 => fits_in_i8,
        "Returns `true` if the value is a number that fits `int8_t` without loss.";
    glot_value_fits_in_int16 => fits_in_i16,
        "Returns `true` if the value is a number that fits `int16_t` without loss.";
    glot_value_fits_in_int32 => fits_in_i32,
        "Returns `true` if the value is a number that fits `int32_t` without loss.";
    glot_value_fits_in_int64 => fits_in_i64,
        "Returns `true` if the value is a number that fits `int64_t` without loss.";
    glot_value_fits_in_uint8 => fits_in_u8,
        "Returns `true` if the value is a number that fits `uint8_t` without loss.";
    glot_value_fits_in_uint16 => fits_in_u16,
        "Returns `true` if the value is a number that fits `uint16_t` without loss.";
    glot_value_fits_in_uint32 => fits_in_u32,
        "Returns `true` if the value is a number that fits `uint32_t` without loss.";
    glot_value_fits_in_float => fits_in_f32,
        "Returns `true` if the value is a number that fits a C `float` without loss.";
    glot_value_fits_in_double => fits_in_f64,
        "Returns `true` if the value is a number that fits a C `double` without loss.";
    glot_value_has_array_elements => has_array_elements,
        "Returns `true` if the value has array elements.";
    glot_value_can_execute => can_execute, "Returns `true` if the value can be executed.";
}

/// Returns `true` if the value is an object with members.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_has_members(
    thread: &IsolateThread,
    value: GlotHandle,
    result: *mut bool,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let answer = c_try!(value.has_members());
    unsafe { result.write(answer) };
    GlotStatus::Ok
}

macro_rules! extractors {
    ($($fn_name:ident => $method:ident, $ty:ty, $doc:expr;)*) => {
        $(
            #[doc = $doc]
            ///
            /// Fails if the value's dynamic type cannot convert without loss.
            ///
            /// # Safety
            ///
            /// The caller must ensure that `result` is a valid pointer.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $fn_name(
                thread: &IsolateThread,
                value: GlotHandle,
                result: *mut $ty,
            ) -> GlotStatus {
                let value = c_try!(thread.expect_value(Handle::from_raw(value)));
                let extracted = c_try!(value.$method());
                unsafe { result.write(extracted) };
                GlotStatus::Ok
            }
        )*
    };
}

extractors! {
    glot_value_as_boolean => as_boolean, bool, "Returns the boolean content of the value.";
    glot_value_as_int8 => as_i8, i8, "Returns an `int8_t` representation of the value.";
    glot_value_as_int16 => as_i16, i16, "Returns an `int16_t` representation of the value.";
    glot_value_as_int32 => as_i32, i32, "Returns an `int32_t` representation of the value.";
    glot_value_as_int64 => as_i64, i64, "Returns an `int64_t` representation of the value.";
    glot_value_as_uint8 => as_u8, u8, "Returns a `uint8_t` representation of the value.";
    glot_value_as_uint16 => as_u16, u16, "Returns a `uint16_t` representation of the value.";
    glot_value_as_uint32 => as_u32, u32, "Returns a `uint32_t` representation of the value.";
    glot_value_as_float => as_f32, f32, "Returns a C `float` representation of the value.";
    glot_value_as_double => as_f64, f64, "Returns a C `double` representation of the value.";
}

/// Converts a string value to UTF-8 bytes using the two-phase buffer
/// protocol: with a NULL `buffer` the required byte count is written to
/// `result`; otherwise up to `buffer_size` bytes are written and `result`
/// receives the written count (re-query the size if it is smaller than
/// required).
///
/// # Safety
///
/// The caller must ensure that `buffer` is NULL or points to `buffer_size`
/// writable bytes and that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_as_string_utf8(
    thread: &IsolateThread,
    value: GlotHandle,
    buffer: *mut c_char,
    buffer_size: usize,
    result: *mut usize,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let text = c_try!(value.as_string());
    unsafe { fill_buffer(&text, buffer, buffer_size, result) };
    GlotStatus::Ok
}

/// Writes a `toString` representation of any value using the two-phase
/// buffer protocol.
///
/// # Safety
///
/// The caller must ensure that `buffer` is NULL or points to `buffer_size`
/// writable bytes and that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_to_string_utf8(
    thread: &IsolateThread,
    value: GlotHandle,
    buffer: *mut c_char,
    buffer_size: usize,
    result: *mut usize,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let text = c_try!(value.to_display_string());
    unsafe { fill_buffer(&text, buffer, buffer_size, result) };
    GlotStatus::Ok
}

/// Returns the member with the given identifier, or the null value if the
/// member does not exist.
///
/// # Safety
///
/// The caller must ensure that `utf8_identifier` is a valid NUL-terminated
/// UTF-8 string and that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_get_member(
    thread: &IsolateThread,
    value: GlotHandle,
    utf8_identifier: *const c_char,
    result: *mut GlotHandle,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let key = c_try!(unsafe { read_cstr(utf8_identifier) });
    let member = c_try!(value.get_member(thread, key));
    let handle = c_try!(thread.allocate(member));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Sets the value of the member with the given identifier.
///
/// # Safety
///
/// The caller must ensure that `utf8_identifier` is a valid NUL-terminated
/// UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_put_member(
    thread: &IsolateThread,
    value: GlotHandle,
    utf8_identifier: *const c_char,
    member: GlotHandle,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let member = c_try!(thread.expect_value(Handle::from_raw(member)));
    let key = c_try!(unsafe { read_cstr(utf8_identifier) });
    c_try!(value.put_member(thread, key, member));
    GlotStatus::Ok
}

/// Returns `true` if a member with the given identifier exists. If the
/// value has no members, returns `false`.
///
/// # Safety
///
/// The caller must ensure that `utf8_identifier` is a valid NUL-terminated
/// UTF-8 string and that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_has_member(
    thread: &IsolateThread,
    value: GlotHandle,
    utf8_identifier: *const c_char,
    result: *mut bool,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let key = c_try!(unsafe { read_cstr(utf8_identifier) });
    let answer = c_try!(value.has_member(thread, key));
    unsafe { result.write(answer) };
    GlotStatus::Ok
}

/// Returns the array element at `index`. Array indices start at 0,
/// independent of the guest language.
///
/// Returns the array-expected status if the value has no array elements and
/// a generic failure for an index that does not exist.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_get_array_element(
    thread: &IsolateThread,
    value: GlotHandle,
    index: i64,
    result: *mut GlotHandle,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let element = c_try!(value.get_array_element(thread, index));
    let handle = c_try!(thread.allocate(element));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Sets the array element at `index`.
#[unsafe(no_mangle)]
pub extern "C" fn glot_value_set_array_element(
    thread: &IsolateThread,
    value: GlotHandle,
    index: i64,
    element: GlotHandle,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let element = c_try!(thread.expect_value(Handle::from_raw(element)));
    c_try!(value.set_array_element(thread, index, element));
    GlotStatus::Ok
}

/// Removes the array element at `index`, writing `true` on success.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_remove_array_element(
    thread: &IsolateThread,
    value: GlotHandle,
    index: i64,
    result: *mut bool,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    c_try!(value.remove_array_element(thread, index));
    unsafe { result.write(true) };
    GlotStatus::Ok
}

/// Writes the number of array elements of the value.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_get_array_size(
    thread: &IsolateThread,
    value: GlotHandle,
    result: *mut i64,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let size = c_try!(value.get_array_size(thread));
    let size = c_try!(
        i64::try_from(size).map_err(|_| glot::Error::InvalidArgument("array size overflows int64"))
    );
    unsafe { result.write(size) };
    GlotStatus::Ok
}

/// Executes a value if it can be executed. All arguments must be value
/// handles.
///
/// Distinguishes a non-executable value, a closed context, wrong arguments,
/// and a guest failure during execution (pending-exception status).
///
/// # Safety
///
/// The caller must ensure that `args` points to `args_size` valid value
/// handles and that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_value_execute(
    thread: &IsolateThread,
    value: GlotHandle,
    args: *const GlotHandle,
    args_size: i32,
    result: *mut GlotHandle,
) -> GlotStatus {
    let value = c_try!(thread.expect_value(Handle::from_raw(value)));
    let args_size = c_try!(
        usize::try_from(args_size)
            .map_err(|_| glot::Error::InvalidArgument("negative argument count"))
    );
    let mut argv: SmallVec<[Value; 4]> = SmallVec::new();
    for i in 0..args_size {
        let raw = unsafe { *args.add(i) };
        argv.push(c_try!(thread.expect_value(Handle::from_raw(raw))));
    }
    let output = c_try!(value.execute(thread, &argv));
    let handle = c_try!(thread.allocate(output));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}
