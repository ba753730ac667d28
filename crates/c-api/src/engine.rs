//! Engine and context lifecycle entry points.

use std::ffi::c_char;

use glot::{Context, ContextBuilder, Engine, EngineBuilder, Handle, IsolateThread};

use crate::error::{GlotStatus, c_try};
use crate::{GlotHandle, fill_buffer, read_cstr};

/// Creates a builder that configures engine instances.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_engine_builder(
    thread: &IsolateThread,
    result: *mut GlotHandle,
) -> GlotStatus {
    let handle = c_try!(thread.allocate(EngineBuilder::new()));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Sets an option that will apply to engines constructed from this builder.
///
/// # Safety
///
/// The caller must ensure that `key_utf8` and `value_utf8` are valid,
/// NUL-terminated UTF-8 strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_engine_builder_option(
    thread: &IsolateThread,
    engine_builder: GlotHandle,
    key_utf8: *const c_char,
    value_utf8: *const c_char,
) -> GlotStatus {
    let builder = c_try!(thread.expect_engine_builder(Handle::from_raw(engine_builder)));
    let key = c_try!(unsafe { read_cstr(key_utf8) });
    let value = c_try!(unsafe { read_cstr(value_utf8) });
    builder.option(key, value);
    GlotStatus::Ok
}

/// Builds an engine from a builder. The same builder can be used to produce
/// multiple engines.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_engine_builder_build(
    thread: &IsolateThread,
    engine_builder: GlotHandle,
    result: *mut GlotHandle,
) -> GlotStatus {
    let builder = c_try!(thread.expect_engine_builder(Handle::from_raw(engine_builder)));
    let handle = c_try!(thread.allocate(builder.build()));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Creates an engine with default configuration: an execution engine that
/// holds configuration, instruments, and compiled code for all contexts
/// assigned to it.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_engine(
    thread: &IsolateThread,
    result: *mut GlotHandle,
) -> GlotStatus {
    let handle = c_try!(thread.allocate(Engine::new()));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Closes an engine and frees its native resources. Open contexts created
/// from this engine that are not currently executing are closed
/// automatically; executing contexts are cancelled only when
/// `cancel_if_executing` is set. Repeated close has no effect.
#[unsafe(no_mangle)]
pub extern "C" fn glot_engine_close(
    thread: &IsolateThread,
    engine: GlotHandle,
    cancel_if_executing: bool,
) -> GlotStatus {
    let engine = c_try!(thread.expect_engine(Handle::from_raw(engine)));
    c_try!(engine.close(cancel_if_executing));
    GlotStatus::Ok
}

/// Writes the installed languages of an engine. If `language_array` is NULL
/// only the language count is written to `size`; otherwise the caller must
/// have sized the array from a previous call.
///
/// # Safety
///
/// The caller must ensure that `size` is valid and that `language_array` is
/// NULL or points to enough space for the previously queried count.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_engine_get_languages(
    thread: &IsolateThread,
    engine: GlotHandle,
    language_array: *mut GlotHandle,
    size: *mut usize,
) -> GlotStatus {
    let engine = c_try!(thread.expect_engine(Handle::from_raw(engine)));
    let languages = c_try!(engine.languages());
    if !language_array.is_null() {
        for (i, language) in languages.iter().enumerate() {
            let handle = c_try!(thread.allocate(language.clone()));
            unsafe { language_array.add(i).write(handle.as_raw()) };
        }
    }
    unsafe { size.write(languages.len()) };
    GlotStatus::Ok
}

/// Writes the primary identification string of a language (e.g. `js`) using
/// the two-phase buffer protocol.
///
/// # Safety
///
/// The caller must ensure that `utf8_result` is NULL or points to
/// `buffer_size` writable bytes, and that `length` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_language_get_id(
    thread: &IsolateThread,
    language: GlotHandle,
    utf8_result: *mut c_char,
    buffer_size: usize,
    length: *mut usize,
) -> GlotStatus {
    let language = c_try!(thread.expect_language(Handle::from_raw(language)));
    unsafe { fill_buffer(language.id(), utf8_result, buffer_size, length) };
    GlotStatus::Ok
}

/// Reads the permitted-language allowlist. NULL or empty permits all
/// installed languages.
unsafe fn read_permitted<'a>(
    permitted_languages: *const *const c_char,
    length: usize,
) -> Result<Option<Vec<&'a str>>, glot::Error> {
    if permitted_languages.is_null() || length == 0 {
        return Ok(None);
    }
    let mut ids = Vec::with_capacity(length);
    for i in 0..length {
        let ptr = unsafe { *permitted_languages.add(i) };
        ids.push(unsafe { read_cstr(ptr) }?);
    }
    Ok(Some(ids))
}

/// Creates a builder that configures context instances, with an optional
/// allowlist of permitted language identifiers.
///
/// # Safety
///
/// The caller must ensure that `permitted_languages` is NULL or points to
/// `length` valid NUL-terminated UTF-8 strings, and that `result` is a valid
/// pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_context_builder(
    thread: &IsolateThread,
    permitted_languages: *const *const c_char,
    length: usize,
    result: *mut GlotHandle,
) -> GlotStatus {
    let permitted = c_try!(unsafe { read_permitted(permitted_languages, length) });
    let handle = c_try!(thread.allocate(ContextBuilder::new(permitted.as_deref())));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Assigns an engine to a context builder. Without one, each build creates a
/// private engine.
#[unsafe(no_mangle)]
pub extern "C" fn glot_context_builder_engine(
    thread: &IsolateThread,
    context_builder: GlotHandle,
    engine: GlotHandle,
) -> GlotStatus {
    let builder = c_try!(thread.expect_context_builder(Handle::from_raw(context_builder)));
    let engine = c_try!(thread.expect_engine(Handle::from_raw(engine)));
    builder.engine(&engine);
    GlotStatus::Ok
}

/// Sets an option on a context builder.
///
/// # Safety
///
/// The caller must ensure that `key_utf8` and `value_utf8` are valid,
/// NUL-terminated UTF-8 strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_context_builder_option(
    thread: &IsolateThread,
    context_builder: GlotHandle,
    key_utf8: *const c_char,
    value_utf8: *const c_char,
) -> GlotStatus {
    let builder = c_try!(thread.expect_context_builder(Handle::from_raw(context_builder)));
    let key = c_try!(unsafe { read_cstr(key_utf8) });
    let value = c_try!(unsafe { read_cstr(value_utf8) });
    builder.option(key, value);
    GlotStatus::Ok
}

macro_rules! capability_setters {
    ($($fn_name:ident => $method:ident, $doc:expr;)*) => {
        $(
            #[doc = $doc]
            ///
            /// Capability flags start at the most restrictive setting and are
            /// monotonically widened; passing `false` is a no-op.
            #[unsafe(no_mangle)]
            pub extern "C" fn $fn_name(
                thread: &IsolateThread,
                context_builder: GlotHandle,
                allow: bool,
            ) -> GlotStatus {
                let builder =
                    c_try!(thread.expect_context_builder(Handle::from_raw(context_builder)));
                builder.$method(allow);
                GlotStatus::Ok
            }
        )*
    };
}

capability_setters! {
    glot_context_builder_allow_all_access => allow_all_access,
        "Allows all access for contexts built from this builder.";
    glot_context_builder_allow_io => allow_io,
        "Allows IO for contexts built from this builder.";
    glot_context_builder_allow_native_access => allow_native_access,
        "Allows native access for contexts built from this builder.";
    glot_context_builder_allow_polyglot_access => allow_polyglot_access,
        "Allows polyglot access for contexts built from this builder.";
    glot_context_builder_allow_create_thread => allow_create_thread,
        "Allows thread creation for contexts built from this builder.";
    glot_context_builder_allow_experimental_options => allow_experimental_options,
        "Allows experimental options for contexts built from this builder.";
}

/// Builds a context from a builder. The same builder can be used to produce
/// multiple contexts.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_context_builder_build(
    thread: &IsolateThread,
    context_builder: GlotHandle,
    result: *mut GlotHandle,
) -> GlotStatus {
    let builder = c_try!(thread.expect_context_builder(Handle::from_raw(context_builder)));
    let context = c_try!(builder.build());
    let handle = c_try!(thread.allocate(context));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Creates a context with default configuration. A context holds all of the
/// program data and is isolated from other contexts with respect to program
/// data and evaluation semantics.
///
/// # Safety
///
/// The caller must ensure that `permitted_languages` is NULL or points to
/// `length` valid NUL-terminated UTF-8 strings, and that `result` is a valid
/// pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_create_context(
    thread: &IsolateThread,
    permitted_languages: *const *const c_char,
    length: usize,
    result: *mut GlotHandle,
) -> GlotStatus {
    let permitted = c_try!(unsafe { read_permitted(permitted_languages, length) });
    let context = c_try!(Context::new(permitted.as_deref()));
    let handle = c_try!(thread.allocate(context));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Closes a context and frees its native resources. If the context is
/// cancelled, the executing thread observes a cancellation-flagged
/// exception. Every operation on a closed context fails; repeated close has
/// no effect.
#[unsafe(no_mangle)]
pub extern "C" fn glot_context_close(
    thread: &IsolateThread,
    context: GlotHandle,
    cancel_if_executing: bool,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    c_try!(context.close(cancel_if_executing));
    GlotStatus::Ok
}

/// Evaluates guest source inside a context.
///
/// `name_utf8` labels the source for diagnostics. On a guest failure this
/// returns the pending-exception status and the exception becomes
/// retrievable with `glot_get_last_exception`.
///
/// # Safety
///
/// The caller must ensure that `language_id`, `name_utf8`, and
/// `source_utf8` are valid NUL-terminated UTF-8 strings and that `result`
/// is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_context_eval(
    thread: &IsolateThread,
    context: GlotHandle,
    language_id: *const c_char,
    name_utf8: *const c_char,
    source_utf8: *const c_char,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let language_id = c_try!(unsafe { read_cstr(language_id) });
    let name = c_try!(unsafe { read_cstr(name_utf8) });
    let source = c_try!(unsafe { read_cstr(source_utf8) });
    let value = c_try!(context.eval(thread, language_id, name, source));
    let handle = c_try!(thread.allocate(value));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Returns the engine a context belongs to.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_context_get_engine(
    thread: &IsolateThread,
    context: GlotHandle,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let engine = c_try!(context.engine());
    let handle = c_try!(thread.allocate(engine));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Returns a value whose members correspond to the symbols in the top scope
/// of the given language. Languages may allow modification of the returned
/// bindings at their discretion.
///
/// # Safety
///
/// The caller must ensure that `language_id` is a valid NUL-terminated
/// UTF-8 string and that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_context_get_bindings(
    thread: &IsolateThread,
    context: GlotHandle,
    language_id: *const c_char,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let language_id = c_try!(unsafe { read_cstr(language_id) });
    let bindings = c_try!(context.bindings(language_id));
    let handle = c_try!(thread.allocate(bindings));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}

/// Returns the polyglot bindings used to exchange symbols between the host
/// and all guest languages. The returned value always has members and its
/// members are readable and writable.
///
/// # Safety
///
/// The caller must ensure that `result` is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glot_context_get_polyglot_bindings(
    thread: &IsolateThread,
    context: GlotHandle,
    result: *mut GlotHandle,
) -> GlotStatus {
    let context = c_try!(thread.expect_context(Handle::from_raw(context)));
    let bindings = c_try!(context.polyglot_bindings());
    let handle = c_try!(thread.allocate(bindings));
    unsafe { result.write(handle.as_raw()) };
    GlotStatus::Ok
}
