//! Callback bridge: guest code invoking native functions as callable values.
//!
//! Raising does not transfer control. A host function that wants the guest
//! caller to see an exception records a message with
//! [`IsolateThread::raise`](crate::isolate::IsolateThread::raise) and then
//! returns normally; only the raise state present at return time is observed,
//! and the most recent raise wins.

use std::ffi::c_void;
use std::sync::Arc;

use crate::exception::GuestError;
use crate::value::{GuestEnv, Interop, InteropError, InteropResult, Value};

/// Opaque embedder pointer carried through the bridge untouched.
#[derive(Clone, Copy, Debug)]
pub struct UserData(*mut c_void);

// The pointer is never dereferenced by this layer; it is stored and handed
// back to the embedder's own callback.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    #[must_use]
    pub const fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    #[must_use]
    pub const fn null() -> Self {
        Self(core::ptr::null_mut())
    }

    #[must_use]
    pub const fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

impl Default for UserData {
    fn default() -> Self {
        Self::null()
    }
}

/// Native function callable from guest code.
pub trait HostFunction: Send + Sync + 'static {
    /// Compute the callback's result.
    ///
    /// # Errors
    /// Returns an [`InteropError`] for invocation failures; guest-visible
    /// exceptions are raised through [`IsolateThread::raise`](crate::isolate::IsolateThread::raise)
    /// instead.
    fn invoke(&self, env: &GuestEnv<'_>, info: &CallbackInfo) -> InteropResult<Value>;
}

struct CallbackInfoInner {
    args: Vec<Value>,
    data: UserData,
}

/// Call details handed to a native callback: argument values, argument
/// count, and the data pointer registered with the function.
#[derive(Clone)]
pub struct CallbackInfo {
    inner: Arc<CallbackInfoInner>,
}

impl CallbackInfo {
    pub(crate) fn new(args: Vec<Value>, data: UserData) -> Self {
        Self {
            inner: Arc::new(CallbackInfoInner { args, data }),
        }
    }

    #[must_use]
    pub fn argc(&self) -> usize {
        self.inner.args.len()
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    #[must_use]
    pub fn data(&self) -> *mut c_void {
        self.inner.data.as_ptr()
    }
}

/// Callable value wrapping a [`HostFunction`].
pub(crate) struct NativeFunction {
    callback: Arc<dyn HostFunction>,
    data: UserData,
}

impl NativeFunction {
    pub(crate) fn new(callback: Arc<dyn HostFunction>, data: UserData) -> Self {
        Self { callback, data }
    }
}

impl Interop for NativeFunction {
    fn type_name(&self) -> &'static str {
        "function"
    }

    fn display(&self) -> String {
        "[function]".to_string()
    }

    fn can_execute(&self) -> bool {
        true
    }

    fn execute(&self, env: &GuestEnv<'_>, args: &[Value]) -> InteropResult<Value> {
        env.thread.clear_raised();
        let info = CallbackInfo::new(args.to_vec(), self.data);
        let result = self.callback.invoke(env, &info);
        // A raise recorded during the invocation wins over the returned
        // value; the most recent raise is the one observed.
        if let Some(message) = env.thread.take_raised() {
            return Err(InteropError::Guest(GuestError::runtime(message)));
        }
        result
    }
}
