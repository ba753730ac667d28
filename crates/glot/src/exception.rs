//! Structured guest-failure reporting.
//!
//! Guest-language failures never unwind across the boundary. A failing
//! evaluation or execution stores an [`Exception`] in the calling thread's
//! pending slot and reports [`Error::PendingException`](crate::Error::PendingException);
//! the embedder drains the slot exactly once with
//! [`IsolateThread::take_last_exception`](crate::isolate::IsolateThread::take_last_exception).

use std::sync::{Arc, OnceLock};

use crate::value::Value;

/// Classification of a guest-language failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GuestErrorKind {
    /// Parse or syntax error raised while reading guest source.
    Syntax,
    /// Ordinary guest-level runtime failure.
    Runtime,
    /// Execution was cancelled from the outside.
    Cancelled,
    /// The runtime itself failed, not the guest program.
    Internal,
}

/// Failure produced by a guest language or by the callback bridge.
#[derive(thiserror::Error, Debug)]
#[error("[{kind:?}] {message}")]
pub struct GuestError {
    pub kind: GuestErrorKind,
    pub message: String,
    pub object: Option<Value>,
    pub frames: Vec<String>,
}

impl GuestError {
    #[must_use]
    pub fn new(kind: GuestErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            object: None,
            frames: Vec::new(),
        }
    }

    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(GuestErrorKind::Syntax, message)
    }

    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(GuestErrorKind::Runtime, message)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(GuestErrorKind::Cancelled, "execution cancelled")
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(GuestErrorKind::Internal, message)
    }

    /// Attach the guest-level exception value.
    #[must_use]
    pub fn with_object(mut self, object: Value) -> Self {
        self.object = Some(object);
        self
    }

    /// Attach guest stack frames, innermost first.
    #[must_use]
    pub fn with_frames(mut self, frames: Vec<String>) -> Self {
        self.frames = frames;
        self
    }
}

struct ExceptionData {
    kind: GuestErrorKind,
    message: String,
    object: Option<Value>,
    frames: Vec<String>,
    rendered: OnceLock<String>,
}

/// Retrieved diagnostic state for one failed entry point.
#[derive(Clone)]
pub struct Exception {
    inner: Arc<ExceptionData>,
}

impl Exception {
    pub(crate) fn from_guest(error: GuestError) -> Self {
        Self {
            inner: Arc::new(ExceptionData {
                kind: error.kind,
                message: error.message,
                object: error.object,
                frames: error.frames,
                rendered: OnceLock::new(),
            }),
        }
    }

    #[must_use]
    pub fn is_syntax_error(&self) -> bool {
        self.inner.kind == GuestErrorKind::Syntax
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.kind == GuestErrorKind::Cancelled
    }

    #[must_use]
    pub fn is_internal_error(&self) -> bool {
        self.inner.kind == GuestErrorKind::Internal
    }

    #[must_use]
    pub fn has_object(&self) -> bool {
        self.inner.object.is_some()
    }

    /// The guest-level exception value, if the language attached one.
    #[must_use]
    pub fn object(&self) -> Option<Value> {
        self.inner.object.clone()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Guest stack trace, rendered on first use.
    pub fn stack_trace(&self) -> &str {
        self.inner.rendered.get_or_init(|| {
            let mut out = self.inner.message.clone();
            for frame in &self.inner.frames {
                out.push_str("\n    at ");
                out.push_str(frame);
            }
            out
        })
    }
}

impl core::fmt::Debug for Exception {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Exception")
            .field("kind", &self.inner.kind)
            .field("message", &self.inner.message)
            .field("has_object", &self.has_object())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_kind() {
        let exc = Exception::from_guest(GuestError::syntax("unexpected token"));
        assert!(exc.is_syntax_error());
        assert!(!exc.is_cancelled());
        assert!(!exc.is_internal_error());
        assert!(!exc.has_object());

        let exc = Exception::from_guest(GuestError::cancelled());
        assert!(exc.is_cancelled());
    }

    #[test]
    fn stack_trace_is_rendered_once_and_stable() {
        let exc = Exception::from_guest(
            GuestError::runtime("boom").with_frames(vec!["main:1".into(), "main:2".into()]),
        );
        let first = exc.stack_trace().to_string();
        assert_eq!(first, "boom\n    at main:1\n    at main:2");
        assert_eq!(exc.stack_trace(), first);
    }
}
