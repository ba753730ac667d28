use std::sync::{Arc, Once};

use anyhow::{Context as _, Result};
use glot::{Context, Isolate, IsolateThread};
use glot_testlang::MiniJs;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .try_init();
    });
}

/// Isolate + attached thread + default-configuration context, with the test
/// language installed.
pub fn fixture() -> Result<(Isolate, Arc<IsolateThread>, Context)> {
    init_tracing();
    MiniJs::install();
    let (isolate, thread) = Isolate::create(None).context("failed to create isolate")?;
    let context = Context::new(None).context("failed to create context")?;
    Ok((isolate, thread, context))
}

pub fn tear_down(thread: &Arc<IsolateThread>) -> Result<()> {
    IsolateThread::tear_down_isolate(thread).context("failed to tear down isolate")
}
