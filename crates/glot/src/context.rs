//! Execution contexts and the context builder.
//!
//! A context is an isolated execution environment holding one program's data:
//! per-language top-scope bindings, the cross-language polyglot bindings, and
//! the capability flags that gate privileged guest operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::callback::{HostFunction, NativeFunction, UserData};
use crate::engine::{Engine, Language};
use crate::error::{Error, Result};
use crate::exception::Exception;
use crate::isolate::IsolateThread;
use crate::value::{
    GuestEnv, HostArray, HostBoolean, HostNull, HostNumber, HostObject, HostString, Interop,
    Number, Value,
};

/// Capability flags gating privileged guest operations.
///
/// All flags default to off (the most restrictive, sandboxed setting) and are
/// monotonically widened: a widening call with `false` is a no-op, and there
/// is no narrowing call.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Capabilities {
    pub io: bool,
    pub native_access: bool,
    pub polyglot_access: bool,
    pub create_thread: bool,
    pub experimental_options: bool,
}

impl Capabilities {
    #[must_use]
    pub const fn all() -> Self {
        Self {
            io: true,
            native_access: true,
            polyglot_access: true,
            create_thread: true,
            experimental_options: true,
        }
    }
}

#[derive(Default)]
struct BuilderState {
    engine: Option<Engine>,
    permitted: Option<Vec<String>>,
    options: Vec<(String, String)>,
    capabilities: Capabilities,
}

/// Accumulates context configuration; `build` is repeatable and
/// non-consuming.
#[derive(Clone)]
pub struct ContextBuilder {
    state: Arc<Mutex<BuilderState>>,
}

impl ContextBuilder {
    /// A builder with an optional allowlist of permitted language ids. An
    /// absent or empty allowlist permits every installed language.
    #[must_use]
    pub fn new(permitted_languages: Option<&[&str]>) -> Self {
        let permitted = match permitted_languages {
            None | Some([]) => None,
            Some(ids) => Some(ids.iter().map(ToString::to_string).collect()),
        };
        Self {
            state: Arc::new(Mutex::new(BuilderState {
                permitted,
                ..BuilderState::default()
            })),
        }
    }

    /// Attach an existing engine. Without one, each build creates a private
    /// engine with default configuration.
    pub fn engine(&self, engine: &Engine) -> &Self {
        self.state.lock().engine = Some(engine.clone());
        self
    }

    /// Append a string-keyed option. Later values for the same key win.
    pub fn option(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.state.lock().options.push((key.into(), value.into()));
        self
    }

    pub fn allow_all_access(&self, allow: bool) -> &Self {
        if allow {
            self.state.lock().capabilities = Capabilities::all();
        }
        self
    }

    pub fn allow_io(&self, allow: bool) -> &Self {
        if allow {
            self.state.lock().capabilities.io = true;
        }
        self
    }

    pub fn allow_native_access(&self, allow: bool) -> &Self {
        if allow {
            self.state.lock().capabilities.native_access = true;
        }
        self
    }

    pub fn allow_polyglot_access(&self, allow: bool) -> &Self {
        if allow {
            self.state.lock().capabilities.polyglot_access = true;
        }
        self
    }

    pub fn allow_create_thread(&self, allow: bool) -> &Self {
        if allow {
            self.state.lock().capabilities.create_thread = true;
        }
        self
    }

    pub fn allow_experimental_options(&self, allow: bool) -> &Self {
        if allow {
            self.state.lock().capabilities.experimental_options = true;
        }
        self
    }

    /// Produce a context from the current configuration.
    ///
    /// # Errors
    /// Fails if the attached engine is already closed.
    pub fn build(&self) -> Result<Context> {
        let state = self.state.lock();
        let engine = match &state.engine {
            Some(engine) => {
                if engine.is_closed() {
                    return Err(Error::EngineClosed);
                }
                engine.clone()
            }
            None => Engine::new(),
        };
        let context = Context {
            inner: Arc::new(ContextInner {
                engine: engine.clone(),
                permitted: state.permitted.clone(),
                options: state.options.clone(),
                capabilities: state.capabilities,
                closed: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                executing: AtomicUsize::new(0),
                bindings: Mutex::new(HashMap::new()),
                polyglot: Arc::new(HostObject::default()),
            }),
        };
        engine.register_context(Arc::downgrade(&context.inner));
        Ok(context)
    }
}

pub(crate) struct ContextInner {
    engine: Engine,
    permitted: Option<Vec<String>>,
    options: Vec<(String, String)>,
    capabilities: Capabilities,
    closed: AtomicBool,
    cancelled: AtomicBool,
    executing: AtomicUsize,
    bindings: Mutex<HashMap<String, Arc<HostObject>>>,
    polyglot: Arc<HostObject>,
}

/// Isolated execution environment with its own program data.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ExecGuard<'a>(&'a ContextInner);

impl<'a> ExecGuard<'a> {
    fn enter(inner: &'a ContextInner) -> Self {
        inner.executing.fetch_add(1, Ordering::AcqRel);
        Self(inner)
    }
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        self.0.executing.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Context {
    /// A context with default configuration and an optional language
    /// allowlist, backed by a private engine.
    ///
    /// # Errors
    /// Fails if construction fails.
    pub fn new(permitted_languages: Option<&[&str]>) -> Result<Self> {
        ContextBuilder::new(permitted_languages).build()
    }

    #[must_use]
    pub fn builder(permitted_languages: Option<&[&str]>) -> ContextBuilder {
        ContextBuilder::new(permitted_languages)
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.inner)
    }

    /// The engine this context belongs to.
    ///
    /// # Errors
    /// Fails if the context is closed.
    pub fn engine(&self) -> Result<Engine> {
        self.check_open()?;
        Ok(self.inner.engine.clone())
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    /// Last value set for `key`, falling back to the engine's options.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<String> {
        self.inner
            .options
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .or_else(|| self.inner.engine.option(key).map(ToString::to_string))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.inner.executing.load(Ordering::Acquire) > 0
    }

    /// Cooperative cancellation flag polled by language implementations.
    #[must_use]
    pub fn cancellation_requested(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Close this context. Repeated close is a no-op returning success; all
    /// further operations on a closed context fail uniformly.
    ///
    /// With `cancel_if_executing`, an operation currently running in this
    /// context is asynchronously interrupted and surfaces on its own thread
    /// as a cancellation-flagged exception.
    ///
    /// # Errors
    /// Currently infallible in practice; kept fallible for parity with the
    /// rest of the lifecycle surface.
    pub fn close(&self, cancel_if_executing: bool) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if cancel_if_executing && self.is_executing() {
            self.inner.cancelled.store(true, Ordering::Release);
            debug!("context closed with cancellation while executing");
        } else {
            debug!("context closed");
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ContextClosed);
        }
        Ok(())
    }

    fn resolve_language(&self, id: &str) -> Result<Language> {
        if let Some(permitted) = &self.inner.permitted {
            if !permitted.iter().any(|p| p == id) {
                return Err(Error::LanguageNotPermitted(id.to_string()));
            }
        }
        self.inner
            .engine
            .find_language(id)
            .ok_or_else(|| Error::UnknownLanguage(id.to_string()))
    }

    /// Evaluate guest source inside this context.
    ///
    /// `name` labels the source for diagnostics. The call is synchronous: it
    /// returns when guest execution completes, raises, or is cancelled.
    ///
    /// # Errors
    /// Boundary-usage failures (closed context, unknown or unpermitted
    /// language) are reported directly; guest failures park an exception in
    /// the calling thread's pending slot and report
    /// [`Error::PendingException`].
    pub fn eval(
        &self,
        thread: &IsolateThread,
        language_id: &str,
        name: &str,
        source: &str,
    ) -> Result<Value> {
        thread.check_usable()?;
        self.check_open()?;
        let language = self.resolve_language(language_id)?;
        let _guard = ExecGuard::enter(&self.inner);
        trace!(language = language_id, name, "evaluating guest source");
        let env = GuestEnv {
            thread,
            context: self,
        };
        match language.runtime().eval(&env, name, source) {
            Ok(value) => Ok(value),
            Err(guest) => {
                debug!(language = language_id, error = %guest, "guest evaluation failed");
                thread.set_pending(Exception::from_guest(guest));
                Err(Error::PendingException)
            }
        }
    }

    /// Top-scope bindings of one language: a value whose members correspond
    /// to the symbols in that language's top scope.
    ///
    /// # Errors
    /// Fails if the context is closed or the language is unknown or not
    /// permitted.
    pub fn bindings(&self, language_id: &str) -> Result<Value> {
        self.check_open()?;
        let language = self.resolve_language(language_id)?;
        let object: Arc<dyn Interop> = self
            .inner
            .bindings
            .lock()
            .entry(language.id().to_string())
            .or_default()
            .clone();
        Ok(self.wrap(object))
    }

    /// Cross-language bindings shared by all guest languages. Always has
    /// members; members are readable, writable, and removable.
    ///
    /// # Errors
    /// Fails if the context is closed.
    pub fn polyglot_bindings(&self) -> Result<Value> {
        self.check_open()?;
        let object: Arc<dyn Interop> = self.inner.polyglot.clone();
        Ok(self.wrap(object))
    }

    fn wrap(&self, object: Arc<dyn Interop>) -> Value {
        Value::bind(self.downgrade(), object)
    }

    fn create(&self, object: impl Interop) -> Result<Value> {
        self.check_open()?;
        Ok(Value::bind(self.downgrade(), Arc::new(object)))
    }

    /// The null value.
    ///
    /// # Errors
    /// Fails if the context is closed.
    pub fn null(&self) -> Result<Value> {
        self.create(HostNull)
    }

    /// # Errors
    /// Fails if the context is closed.
    pub fn boolean(&self, value: bool) -> Result<Value> {
        self.create(HostBoolean(value))
    }

    /// An integer number value. All signed and unsigned creation widths up
    /// to 64/32 bits funnel through this without loss.
    ///
    /// # Errors
    /// Fails if the context is closed.
    pub fn int(&self, value: i64) -> Result<Value> {
        self.create(HostNumber(Number::Int(value)))
    }

    /// # Errors
    /// Fails if the context is closed.
    pub fn float32(&self, value: f32) -> Result<Value> {
        self.create(HostNumber(Number::Float(f64::from(value))))
    }

    /// # Errors
    /// Fails if the context is closed.
    pub fn float64(&self, value: f64) -> Result<Value> {
        self.create(HostNumber(Number::Float(value)))
    }

    /// # Errors
    /// Fails if the context is closed.
    pub fn string(&self, value: impl Into<String>) -> Result<Value> {
        self.create(HostString(value.into()))
    }

    /// An object with no members.
    ///
    /// # Errors
    /// Fails if the context is closed.
    pub fn object(&self) -> Result<Value> {
        self.create(HostObject::default())
    }

    /// An array value holding the given elements.
    ///
    /// # Errors
    /// Fails if the context is closed.
    pub fn array(&self, values: &[Value]) -> Result<Value> {
        self.create(HostArray::from_slice(values))
    }

    /// A callable value that invokes `callback` with the call's arguments
    /// and the given data pointer.
    ///
    /// # Errors
    /// Fails if the context is closed.
    pub fn function(&self, callback: Arc<dyn HostFunction>, data: UserData) -> Result<Value> {
        self.create(NativeFunction::new(callback, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_widen_monotonically() {
        let builder = ContextBuilder::new(None);
        builder.allow_io(true);
        builder.allow_io(false);
        let context = builder.build().expect("build");
        assert!(context.capabilities().io);
        assert!(!context.capabilities().native_access);
    }

    #[test]
    fn all_access_widens_every_flag() {
        let builder = ContextBuilder::new(None);
        builder.allow_all_access(true);
        let context = builder.build().expect("build");
        assert_eq!(context.capabilities(), Capabilities::all());
    }

    #[test]
    fn closed_context_fails_uniformly() {
        let context = Context::new(None).expect("context");
        context.close(false).expect("close");
        context.close(false).expect("repeated close is a no-op");
        assert!(matches!(context.engine(), Err(Error::ContextClosed)));
        assert!(matches!(context.null(), Err(Error::ContextClosed)));
        assert!(matches!(
            context.polyglot_bindings(),
            Err(Error::ContextClosed)
        ));
    }

    #[test]
    fn builder_rejects_closed_engine() {
        let engine = Engine::new();
        engine.close(false).expect("close");
        let builder = ContextBuilder::new(None);
        builder.engine(&engine);
        assert!(matches!(builder.build(), Err(Error::EngineClosed)));
    }

    #[test]
    fn options_fall_back_to_engine() {
        let engine_builder = Engine::builder();
        engine_builder.option("log.level", "warn");
        let engine = engine_builder.build();
        let builder = ContextBuilder::new(None);
        builder.engine(&engine);
        builder.option("trace", "on");
        let context = builder.build().expect("build");
        assert_eq!(context.option("trace").as_deref(), Some("on"));
        assert_eq!(context.option("log.level").as_deref(), Some("warn"));
        assert_eq!(context.option("missing"), None);
    }
}
