use std::time::Duration;

use anyhow::{Context as _, Result};
use glot::{Error, IsolateThread};

use super::common::{fixture, tear_down};

#[test]
fn handles_fail_after_their_scope_closes() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    thread.open_scope().context("open scope")?;
    let value = context.int(7).context("create value")?;
    let handle = thread.allocate(value).context("allocate handle")?;
    assert!(thread.expect_value(handle).is_ok());
    thread.close_scope().context("close scope")?;
    assert!(matches!(thread.resolve(handle), Err(Error::StaleHandle)));
    tear_down(&thread)
}

#[test]
fn scope_close_invalidates_nested_scopes_transitively() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    thread.open_scope().context("open outer")?;
    let outer = thread.allocate(context.int(1).context("value")?)?;
    thread.open_scope().context("open inner")?;
    let inner = thread.allocate(context.int(2).context("value")?)?;
    // Closing the outer scope's frame also releases the inner frame.
    thread.close_scope().context("close inner")?;
    thread.close_scope().context("close outer")?;
    assert!(matches!(thread.resolve(outer), Err(Error::StaleHandle)));
    assert!(matches!(thread.resolve(inner), Err(Error::StaleHandle)));
    tear_down(&thread)
}

#[test]
fn references_outlive_scopes_and_require_explicit_deletion() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    thread.open_scope().context("open scope")?;
    let handle = thread.allocate(context.int(42).context("value")?)?;
    let reference = thread.create_reference(handle).context("create reference")?;
    thread.close_scope().context("close scope")?;

    let value = thread.expect_value(reference).context("resolve reference")?;
    assert_eq!(value.as_i32().context("as i32")?, 42);

    thread.delete_reference(reference).context("delete")?;
    assert!(matches!(thread.resolve(reference), Err(Error::StaleHandle)));
    tear_down(&thread)
}

#[test]
fn references_are_visible_to_other_threads_of_the_isolate() -> Result<()> {
    let (isolate, thread, context) = fixture()?;
    let handle = thread.allocate(context.int(9).context("value")?)?;
    let reference = thread.create_reference(handle).context("create reference")?;

    let worker_isolate = isolate.clone();
    let raw = reference;
    let worker = std::thread::spawn(move || -> Result<i32> {
        let worker_thread = worker_isolate
            .attach_current_thread()
            .context("attach worker")?;
        let value = worker_thread
            .expect_value(raw)
            .context("resolve reference on worker")?;
        let result = value.as_i32().context("as i32")?;
        IsolateThread::detach(&worker_thread).context("detach worker")?;
        Ok(result)
    });
    let observed = worker.join().expect("worker panicked")?;
    assert_eq!(observed, 9);
    tear_down(&thread)
}

#[test]
fn pending_exception_retrieval_is_single_shot() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let result = context.eval(&thread, "js", "bad", "40 +");
    assert!(matches!(result, Err(Error::PendingException)));

    let exception = thread.take_last_exception().context("first retrieval")?;
    assert!(exception.is_syntax_error());
    assert!(matches!(
        thread.take_last_exception(),
        Err(Error::NoPendingException)
    ));
    tear_down(&thread)
}

#[test]
fn retrieval_without_any_failure_is_an_error() -> Result<()> {
    let (_isolate, thread, _context) = fixture()?;
    assert!(matches!(
        thread.take_last_exception(),
        Err(Error::NoPendingException)
    ));
    tear_down(&thread)
}

#[test]
fn cancel_on_close_surfaces_as_cancellation_exception() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let closer_context = context.clone();
    let closer = std::thread::spawn(move || {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !closer_context.is_executing() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        closer_context.close(true).expect("close with cancel");
    });

    let result = context.eval(&thread, "js", "spin", "waitForCancel()");
    closer.join().expect("closer panicked");
    assert!(matches!(result, Err(Error::PendingException)));
    let exception = thread.take_last_exception().context("retrieve")?;
    assert!(exception.is_cancelled());
    assert!(!exception.is_syntax_error());

    // The context is closed now; everything on it fails uniformly.
    assert!(matches!(context.null(), Err(Error::ContextClosed)));
    tear_down(&thread)
}

#[test]
fn engine_close_with_cancel_interrupts_executing_contexts() -> Result<()> {
    let (_isolate, thread, _context) = fixture()?;
    let engine = glot::Engine::new();
    let builder = glot::ContextBuilder::new(None);
    builder.engine(&engine);
    let context = builder.build().context("context")?;

    let closer_engine = engine.clone();
    let closer_context = context.clone();
    let closer = std::thread::spawn(move || {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !closer_context.is_executing() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        closer_engine.close(true).expect("close engine");
    });

    let result = context.eval(&thread, "js", "spin", "waitForCancel()");
    closer.join().expect("closer panicked");
    assert!(matches!(result, Err(Error::PendingException)));
    let exception = thread.take_last_exception().context("retrieve")?;
    assert!(exception.is_cancelled());
    assert!(engine.is_closed());
    assert!(context.is_closed());
    tear_down(&thread)
}

#[test]
fn engine_close_cascades_to_idle_contexts() -> Result<()> {
    let (_isolate, thread, _context) = fixture()?;
    let engine = glot::Engine::new();
    let builder = glot::ContextBuilder::new(None);
    builder.engine(&engine);
    let first = builder.build().context("first context")?;
    let second = builder.build().context("second context")?;

    engine.close(false).context("close engine")?;
    assert!(engine.is_closed());
    assert!(first.is_closed());
    assert!(second.is_closed());
    assert!(matches!(
        first.eval(&thread, "js", "after", "1"),
        Err(Error::ContextClosed)
    ));
    tear_down(&thread)
}

#[test]
fn values_of_a_dropped_context_fail() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let value = context.int(3).context("value")?;
    context.close(false).context("close")?;
    assert!(matches!(value.as_i32(), Err(Error::ContextClosed)));
    assert!(matches!(value.is_number(), Err(Error::ContextClosed)));
    tear_down(&thread)
}
