use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context as _, Result};
use glot::{
    CallbackInfo, ContextBuilder, Error, GuestEnv, GuestError, HostFunction, InteropError,
    InteropResult, UserData, Value,
};

use super::common::{fixture, tear_down};

#[test]
fn evaluating_arithmetic_yields_a_numeric_value() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let value = context
        .eval(&thread, "js", "answer", "40+2")
        .context("eval")?;
    assert!(value.is_number().context("is number")?);
    assert!(value.fits_in_i32().context("fits")?);
    assert_eq!(value.as_i32().context("as i32")?, 42);
    tear_down(&thread)
}

#[test]
fn invalid_source_reports_a_syntax_error_exception() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let result = context.eval(&thread, "js", "broken", "40 +* 2");
    assert!(matches!(result, Err(Error::PendingException)));

    let exception = thread.take_last_exception().context("retrieve")?;
    assert!(exception.is_syntax_error());
    assert!(!exception.is_internal_error());
    assert!(!exception.is_cancelled());
    assert!(exception.stack_trace().contains("broken:1"));
    tear_down(&thread)
}

#[test]
fn evaluating_with_an_unknown_language_fails_without_an_exception() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let result = context.eval(&thread, "cobol", "nope", "1");
    assert!(matches!(result, Err(Error::UnknownLanguage(_))));
    assert!(matches!(
        thread.take_last_exception(),
        Err(Error::NoPendingException)
    ));
    tear_down(&thread)
}

#[test]
fn language_allowlist_is_enforced() -> Result<()> {
    let (_isolate, thread, _context) = fixture()?;
    let restricted = glot::Context::new(Some(&["wasm"])).context("context")?;
    let result = restricted.eval(&thread, "js", "denied", "1");
    assert!(matches!(result, Err(Error::LanguageNotPermitted(_))));
    tear_down(&thread)
}

struct AddCallback {
    expected_data: usize,
    seen_argc: Arc<AtomicUsize>,
    seen_expected_data: Arc<AtomicBool>,
}

impl HostFunction for AddCallback {
    fn invoke(&self, env: &GuestEnv<'_>, info: &CallbackInfo) -> InteropResult<Value> {
        self.seen_argc.store(info.argc(), Ordering::SeqCst);
        self.seen_expected_data
            .store(info.data() as usize == self.expected_data, Ordering::SeqCst);
        let guest_err = |e: Error| InteropError::Guest(GuestError::runtime(e.to_string()));
        let lhs = info.args()[0].as_i64().map_err(guest_err)?;
        let rhs = info.args()[1].as_i64().map_err(guest_err)?;
        env.context.int(lhs + rhs).map_err(guest_err)
    }
}

#[test]
fn guest_code_invokes_native_callbacks_through_bindings() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let seen_argc = Arc::new(AtomicUsize::new(0));
    let seen_expected_data = Arc::new(AtomicBool::new(false));
    let data = 0x5af3_usize;

    let function = context
        .function(
            Arc::new(AddCallback {
                expected_data: data,
                seen_argc: Arc::clone(&seen_argc),
                seen_expected_data: Arc::clone(&seen_expected_data),
            }),
            UserData::new(data as *mut c_void),
        )
        .context("create function")?;
    assert!(function.can_execute().context("can execute")?);

    let bindings = context.bindings("js").context("bindings")?;
    bindings
        .put_member(&thread, "add", function)
        .context("bind")?;

    let value = context
        .eval(&thread, "js", "call", "add(40, 2)")
        .context("eval")?;
    assert_eq!(value.as_i32().context("as i32")?, 42);
    assert_eq!(seen_argc.load(Ordering::SeqCst), 2);
    assert!(seen_expected_data.load(Ordering::SeqCst));
    tear_down(&thread)
}

struct RaisingCallback;

impl HostFunction for RaisingCallback {
    fn invoke(&self, env: &GuestEnv<'_>, _info: &CallbackInfo) -> InteropResult<Value> {
        // Raising does not transfer control; the function keeps running and
        // must return. The last raise wins.
        env.thread.raise("first raise").map_err(internal)?;
        env.thread.raise("second raise").map_err(internal)?;
        env.context.int(1).map_err(internal)
    }
}

fn internal(e: Error) -> InteropError {
    InteropError::Guest(GuestError::internal(e.to_string()))
}

#[test]
fn raised_exceptions_override_the_returned_value() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let function = context
        .function(Arc::new(RaisingCallback), UserData::null())
        .context("create function")?;
    let bindings = context.bindings("js").context("bindings")?;
    bindings
        .put_member(&thread, "boom", function)
        .context("bind")?;

    let result = context.eval(&thread, "js", "raising", "boom()");
    assert!(matches!(result, Err(Error::PendingException)));
    let exception = thread.take_last_exception().context("retrieve")?;
    assert!(!exception.is_syntax_error());
    assert_eq!(exception.message(), "second raise");
    tear_down(&thread)
}

#[test]
fn direct_execution_of_a_callable_value() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let seen_argc = Arc::new(AtomicUsize::new(0));
    let function = context
        .function(
            Arc::new(AddCallback {
                expected_data: 0,
                seen_argc: Arc::clone(&seen_argc),
                seen_expected_data: Arc::new(AtomicBool::new(false)),
            }),
            UserData::null(),
        )
        .context("create function")?;

    let args = [
        context.int(20).context("value")?,
        context.int(22).context("value")?,
    ];
    let result = function.execute(&thread, &args).context("execute")?;
    assert_eq!(result.as_i32().context("as i32")?, 42);
    assert_eq!(seen_argc.load(Ordering::SeqCst), 2);

    // Executing a non-executable value is its own failure mode.
    let number = context.int(1).context("number")?;
    assert!(matches!(
        number.execute(&thread, &[]),
        Err(Error::NotExecutable)
    ));
    tear_down(&thread)
}

#[test]
fn io_denied_contexts_surface_guest_level_exceptions() -> Result<()> {
    let (_isolate, thread, _context) = fixture()?;
    let builder = ContextBuilder::new(None);
    builder.allow_all_access(false);
    builder.allow_io(false);
    let sandboxed = builder.build().context("build")?;

    let result = sandboxed.eval(&thread, "js", "io", "readFile('/etc/hostname')");
    // A guest-level exception, not a boundary-usage failure.
    assert!(matches!(result, Err(Error::PendingException)));
    let exception = thread.take_last_exception().context("retrieve")?;
    assert!(!exception.is_syntax_error());
    assert!(!exception.is_internal_error());
    assert!(exception.has_object());
    let object = exception.object().context("object")?;
    assert!(
        object
            .as_string()
            .context("as string")?
            .contains("IO access")
    );
    tear_down(&thread)
}

#[test]
fn io_allowed_contexts_may_read_files() -> Result<()> {
    let (_isolate, thread, _context) = fixture()?;
    let builder = ContextBuilder::new(None);
    builder.allow_io(true);
    let context = builder.build().context("build")?;

    let dir = std::env::temp_dir().join(format!("glot-io-{}", std::process::id()));
    std::fs::create_dir_all(&dir).context("mkdir")?;
    let path = dir.join("greeting.txt");
    std::fs::write(&path, "hello from disk").context("write")?;

    let source = format!("readFile('{}')", path.display());
    let value = context.eval(&thread, "js", "io", &source).context("eval")?;
    assert_eq!(value.as_string().context("as string")?, "hello from disk");

    std::fs::remove_dir_all(&dir).ok();
    tear_down(&thread)
}

#[test]
fn polyglot_bindings_are_gated_by_polyglot_access() -> Result<()> {
    let (_isolate, thread, _context) = fixture()?;

    let builder = ContextBuilder::new(None);
    builder.allow_polyglot_access(true);
    let open = builder.build().context("build")?;
    open.polyglot_bindings()
        .context("bindings")?
        .put_member(&thread, "shared", open.int(5).context("value")?)
        .context("put")?;
    let value = open
        .eval(&thread, "js", "poly", "shared + 1")
        .context("eval")?;
    assert_eq!(value.as_i32().context("as i32")?, 6);

    // Without polyglot access the same symbol is invisible to the guest.
    let closed = ContextBuilder::new(None).build().context("build")?;
    closed
        .polyglot_bindings()
        .context("bindings")?
        .put_member(&thread, "shared", closed.int(5).context("value")?)
        .context("put")?;
    let result = closed.eval(&thread, "js", "poly", "shared + 1");
    assert!(matches!(result, Err(Error::PendingException)));
    let exception = thread.take_last_exception().context("retrieve")?;
    assert!(exception.message().contains("not defined"));
    tear_down(&thread)
}

#[test]
fn string_concatenation_and_member_calls() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let value = context
        .eval(&thread, "js", "concat", "'4' + 2")
        .context("eval")?;
    assert_eq!(value.as_string().context("as string")?, "42");

    // Callable values reached through member access work the same way.
    let seen_argc = Arc::new(AtomicUsize::new(0));
    let host = context.object().context("object")?;
    host.put_member(
        &thread,
        "add",
        context
            .function(
                Arc::new(AddCallback {
                    expected_data: 0,
                    seen_argc: Arc::clone(&seen_argc),
                    seen_expected_data: Arc::new(AtomicBool::new(false)),
                }),
                UserData::null(),
            )
            .context("function")?,
    )
    .context("put")?;
    context
        .bindings("js")
        .context("bindings")?
        .put_member(&thread, "host", host)
        .context("bind")?;

    let value = context
        .eval(&thread, "js", "member-call", "host.add(1, 2) * 10")
        .context("eval")?;
    assert_eq!(value.as_i32().context("as i32")?, 30);
    tear_down(&thread)
}
