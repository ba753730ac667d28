//! Engines and the engine builder.
//!
//! An engine is the shared compiled-code and instrument cache for one or more
//! contexts, and holds the set of installed guest languages. Builders are
//! mutable accumulators with a repeatable, non-consuming `build`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::{Context, ContextInner};
use crate::error::{Error, Result};
use crate::language::{self, GuestLanguage};

/// Metadata for one installed guest language. Read-only.
#[derive(Clone)]
pub struct Language {
    runtime: Arc<dyn GuestLanguage>,
}

impl Language {
    pub(crate) fn new(runtime: Arc<dyn GuestLanguage>) -> Self {
        Self { runtime }
    }

    /// Primary identification string (e.g. `js`).
    #[must_use]
    pub fn id(&self) -> &str {
        self.runtime.id()
    }

    pub(crate) fn runtime(&self) -> &Arc<dyn GuestLanguage> {
        &self.runtime
    }
}

impl core::fmt::Debug for Language {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Language").field("id", &self.id()).finish()
    }
}

#[derive(Default)]
struct BuilderState {
    options: Vec<(String, String)>,
    languages: Vec<Language>,
}

/// Accumulates engine configuration.
///
/// `build` may be called any number of times; later mutation starts a fresh
/// configuration for the next build and never affects engines already built.
#[derive(Clone)]
pub struct EngineBuilder {
    state: Arc<Mutex<BuilderState>>,
}

impl EngineBuilder {
    /// A builder seeded with the process-wide installed language set.
    #[must_use]
    pub fn new() -> Self {
        let languages = language::installed_languages()
            .into_iter()
            .map(Language::new)
            .collect();
        Self {
            state: Arc::new(Mutex::new(BuilderState {
                options: Vec::new(),
                languages,
            })),
        }
    }

    /// Append a string-keyed option. Later values for the same key win.
    pub fn option(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.state.lock().options.push((key.into(), value.into()));
        self
    }

    /// Install a language on engines built from this builder, replacing any
    /// previously installed language with the same id.
    pub fn language(&self, runtime: Arc<dyn GuestLanguage>) -> &Self {
        let mut state = self.state.lock();
        let language = Language::new(runtime);
        if let Some(existing) = state
            .languages
            .iter_mut()
            .find(|l| l.id() == language.id())
        {
            *existing = language;
        } else {
            state.languages.push(language);
        }
        self
    }

    /// Produce an immutable engine from the current configuration.
    #[must_use]
    pub fn build(&self) -> Engine {
        let state = self.state.lock();
        Engine {
            inner: Arc::new(EngineInner {
                options: state.options.clone(),
                languages: state.languages.clone(),
                contexts: Mutex::new(Vec::new()),
                closed: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct EngineInner {
    options: Vec<(String, String)>,
    languages: Vec<Language>,
    contexts: Mutex<Vec<Weak<ContextInner>>>,
    closed: std::sync::atomic::AtomicBool,
}

/// Shared compiled-code and instrument cache.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// An engine with default configuration and the installed language set.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// The installed languages.
    ///
    /// # Errors
    /// Fails if the engine is closed.
    pub fn languages(&self) -> Result<Vec<Language>> {
        if self.is_closed() {
            return Err(Error::EngineClosed);
        }
        Ok(self.inner.languages.clone())
    }

    pub(crate) fn find_language(&self, id: &str) -> Option<Language> {
        self.inner.languages.iter().find(|l| l.id() == id).cloned()
    }

    /// Last value set for `key`, if any.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.inner
            .options
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Close the engine and cascade to its contexts.
    ///
    /// Contexts not currently executing are closed; executing contexts are
    /// closed (and their operation cancelled) only when `cancel_if_executing`
    /// is set, otherwise they are left running. Repeated close is a no-op
    /// returning success.
    ///
    /// # Errors
    /// Currently infallible in practice; kept fallible for parity with the
    /// rest of the lifecycle surface.
    pub fn close(&self, cancel_if_executing: bool) -> Result<()> {
        if self
            .inner
            .closed
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return Ok(());
        }
        let contexts: Vec<_> = self.inner.contexts.lock().drain(..).collect();
        for context in contexts.into_iter().filter_map(|w| w.upgrade()) {
            let context = Context::from_inner(context);
            if !context.is_executing() {
                context.close(false)?;
            } else if cancel_if_executing {
                warn!("cancelling context still executing during engine close");
                context.close(true)?;
            } else {
                debug!("engine closed while context is executing; context left open");
            }
        }
        debug!("engine closed");
        Ok(())
    }

    pub(crate) fn register_context(&self, context: Weak<ContextInner>) {
        self.inner.contexts.lock().push(context);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_is_repeatable_and_snapshots_options() {
        let builder = EngineBuilder::new();
        builder.option("cache.size", "1");
        let first = builder.build();
        builder.option("cache.size", "2");
        let second = builder.build();
        assert_eq!(first.option("cache.size"), Some("1"));
        assert_eq!(second.option("cache.size"), Some("2"));
    }

    #[test]
    fn repeated_close_is_a_no_op() {
        let engine = Engine::new();
        engine.close(false).expect("first close");
        engine.close(false).expect("second close");
        assert!(engine.is_closed());
        assert!(matches!(engine.languages(), Err(Error::EngineClosed)));
    }
}
