use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Failure of a boundary entry point.
///
/// Boundary-usage errors (stale handles, closed contexts, conversion
/// mismatches) are reported here directly and never populate the per-thread
/// exception slot. Guest-language failures surface as [`Error::PendingException`]
/// with the structured diagnostic retrievable once via
/// [`IsolateThread::take_last_exception`](crate::isolate::IsolateThread::take_last_exception).
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("isolate has been torn down")]
    IsolateDead,

    #[error("thread is not attached to an isolate")]
    ThreadDetached,

    #[error("stale handle: allocating scope was closed or the handle is invalid")]
    StaleHandle,

    #[error("scope stack is unbalanced: no explicit scope is open on this thread")]
    UnbalancedScope,

    #[error("wrong handle type: expected {expected}, got {actual}")]
    WrongHandleType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("engine is closed")]
    EngineClosed,

    #[error("context is closed")]
    ContextClosed,

    #[error("language '{0}' is not installed")]
    UnknownLanguage(String),

    #[error("language '{0}' is not permitted in this context")]
    LanguageNotPermitted(String),

    #[error("value is not executable")]
    NotExecutable,

    #[error("wrong number of arguments: expected {expected}, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("cannot convert value to {0}")]
    Conversion(&'static str),

    #[error("array index {0} does not exist")]
    IndexOutOfBounds(i64),

    #[error("operation not supported by this value: {0}")]
    Unsupported(&'static str),

    /// A guest exception is now retrievable on the calling thread.
    #[error("a guest exception is pending on this thread")]
    PendingException,

    #[error("expected a string value")]
    StringExpected,

    #[error("expected an array value")]
    ArrayExpected,

    #[error("no exception is pending on this thread")]
    NoPendingException,
}
