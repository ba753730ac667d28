//! Embedding boundary for a multi-language execution engine.
//!
//! A native host process creates one or more [`Isolate`]s, attaches threads
//! to them, and exchanges data and control flow with guest programs through
//! opaque, scope-bound [`Handle`]s. Guest-language failures never unwind
//! across the boundary: they park a structured [`Exception`] in the calling
//! thread's single-shot pending slot.
//!
//! Typical flow:
//! 1. [`Isolate::create`] an isolate; the calling thread is attached.
//! 2. Build a [`Context`] (optionally sharing an [`Engine`]) with a
//!    [`ContextBuilder`].
//! 3. [`Context::eval`] guest source; marshal results through [`Value`].
//! 4. Drain failures with [`IsolateThread::take_last_exception`].
//!
//! Guest language implementations plug in at the [`GuestLanguage`] seam and
//! are otherwise a black box to this crate.

mod callback;
mod context;
mod engine;
mod error;
mod exception;
mod handle;
mod isolate;
mod language;
mod value;

pub use callback::{CallbackInfo, HostFunction, UserData};
pub use context::{Capabilities, Context, ContextBuilder};
pub use engine::{Engine, EngineBuilder, Language};
pub use error::{Error, Result};
pub use exception::{Exception, GuestError, GuestErrorKind};
pub use handle::{Handle, HandleObject};
pub use isolate::{Isolate, IsolateParams, IsolateThread};
pub use language::{GuestLanguage, install_language};
pub use value::{GuestEnv, Interop, InteropError, InteropResult, Number, Value};
