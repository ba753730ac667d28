//! Value marshaling between native and guest data.
//!
//! A [`Value`] is a context-bound reference to guest or host data. Guest
//! values are not a closed set of shapes: every value is viewed through the
//! [`Interop`] trait, and the dynamic capability predicates (`is_null`,
//! `has_members`, `can_execute`, ...) are the only discovery mechanism.
//! Host-created primitives implement the same trait, so native and guest data
//! are indistinguishable on the far side of the boundary.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::context::{Context, ContextInner};
use crate::error::{Error, Result};
use crate::exception::GuestError;
use crate::isolate::IsolateThread;

pub type InteropResult<T> = core::result::Result<T, InteropError>;

/// Failure inside an [`Interop`] operation, before it is mapped onto the
/// boundary status taxonomy.
#[derive(thiserror::Error, Debug)]
pub enum InteropError {
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("value has no members")]
    NoMembers,

    #[error("value has no array elements")]
    NotAnArray,

    #[error("array index {0} does not exist")]
    OutOfBounds(u64),

    #[error("wrong number of arguments: expected {expected}, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("value is not executable")]
    NotExecutable,

    #[error(transparent)]
    Guest(#[from] GuestError),
}

/// Thread and context a guest operation runs under.
///
/// Handed to [`GuestLanguage::eval`](crate::language::GuestLanguage::eval) and
/// to [`Interop::execute`]; gives language implementations access to
/// bindings, capability flags, cancellation state, and the callback bridge.
pub struct GuestEnv<'a> {
    pub thread: &'a IsolateThread,
    pub context: &'a Context,
}

/// Guest numbers, preserved exactly.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Number {
    Int(i64),
    Float(f64),
}

/// `true` when `f` is an integral double inside the exactly convertible
/// i64 range (casts saturate at the boundaries, so the range check must come
/// first).
fn float_is_exact_i64(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f >= -(2f64.powi(63)) && f < 2f64.powi(63)
}

impl Number {
    fn exact_int(self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i),
            Self::Float(f) => float_is_exact_i64(f).then(|| f as i64),
        }
    }

    fn fits_signed(self, min: i64, max: i64) -> bool {
        self.exact_int().is_some_and(|i| i >= min && i <= max)
    }

    fn fits_unsigned(self, max: u64) -> bool {
        self.exact_int()
            .is_some_and(|i| i >= 0 && (i as u64) <= max)
    }

    #[must_use]
    pub fn fits_i8(self) -> bool {
        self.fits_signed(i64::from(i8::MIN), i64::from(i8::MAX))
    }

    #[must_use]
    pub fn fits_i16(self) -> bool {
        self.fits_signed(i64::from(i16::MIN), i64::from(i16::MAX))
    }

    #[must_use]
    pub fn fits_i32(self) -> bool {
        self.fits_signed(i64::from(i32::MIN), i64::from(i32::MAX))
    }

    #[must_use]
    pub fn fits_i64(self) -> bool {
        self.exact_int().is_some()
    }

    #[must_use]
    pub fn fits_u8(self) -> bool {
        self.fits_unsigned(u64::from(u8::MAX))
    }

    #[must_use]
    pub fn fits_u16(self) -> bool {
        self.fits_unsigned(u64::from(u16::MAX))
    }

    #[must_use]
    pub fn fits_u32(self) -> bool {
        self.fits_unsigned(u64::from(u32::MAX))
    }

    #[must_use]
    pub fn fits_f32(self) -> bool {
        match self {
            Self::Int(i) => {
                let f = f64::from(i as f32);
                float_is_exact_i64(f) && f as i64 == i
            }
            Self::Float(f) => f.is_nan() || f64::from(f as f32) == f,
        }
    }

    #[must_use]
    pub fn fits_f64(self) -> bool {
        match self {
            Self::Int(i) => {
                let f = i as f64;
                float_is_exact_i64(f) && f as i64 == i
            }
            Self::Float(_) => true,
        }
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

/// Uniform polymorphic interface over guest and host values.
///
/// Implementations opt into capabilities by overriding the relevant group of
/// methods; everything defaults to "not supported". Container operations
/// traffic in [`Value`]s directly, so implementations keep full control over
/// the representation of their elements.
pub trait Interop: Send + Sync + 'static {
    /// Short human-readable type label used in diagnostics.
    fn type_name(&self) -> &'static str;

    /// `toString`-style rendering.
    fn display(&self) -> String;

    fn is_null(&self) -> bool {
        false
    }

    fn as_boolean(&self) -> Option<bool> {
        None
    }

    fn as_number(&self) -> Option<Number> {
        None
    }

    fn as_string(&self) -> Option<String> {
        None
    }

    fn has_members(&self) -> bool {
        false
    }

    fn member(&self, _key: &str) -> InteropResult<Option<Value>> {
        Err(InteropError::NoMembers)
    }

    fn put_member(&self, _key: &str, _value: Value) -> InteropResult<()> {
        Err(InteropError::NoMembers)
    }

    fn has_member(&self, _key: &str) -> InteropResult<bool> {
        Ok(false)
    }

    fn has_array_elements(&self) -> bool {
        false
    }

    fn array_size(&self) -> InteropResult<u64> {
        Err(InteropError::NotAnArray)
    }

    fn array_element(&self, _index: u64) -> InteropResult<Value> {
        Err(InteropError::NotAnArray)
    }

    fn set_array_element(&self, _index: u64, _value: Value) -> InteropResult<()> {
        Err(InteropError::NotAnArray)
    }

    fn remove_array_element(&self, _index: u64) -> InteropResult<()> {
        Err(InteropError::NotAnArray)
    }

    fn can_execute(&self) -> bool {
        false
    }

    fn execute(&self, _env: &GuestEnv<'_>, _args: &[Value]) -> InteropResult<Value> {
        Err(InteropError::NotExecutable)
    }
}

/// Context-bound reference to guest or host data.
///
/// Every operation fails once the owning context is closed.
#[derive(Clone)]
pub struct Value {
    context: Weak<ContextInner>,
    object: Arc<dyn Interop>,
}

impl Value {
    pub(crate) fn bind(context: Weak<ContextInner>, object: Arc<dyn Interop>) -> Self {
        Self { context, object }
    }

    /// The context this value belongs to.
    ///
    /// # Errors
    /// Fails if the context was closed or dropped.
    pub fn context(&self) -> Result<Context> {
        let inner = self.context.upgrade().ok_or(Error::ContextClosed)?;
        let context = Context::from_inner(inner);
        if context.is_closed() {
            return Err(Error::ContextClosed);
        }
        Ok(context)
    }

    /// The numeric content of a number value.
    ///
    /// # Errors
    /// Fails if the value is not a number or the context is closed.
    pub fn as_number(&self) -> Result<Number> {
        self.context()?;
        self.object.as_number().ok_or(Error::Conversion("number"))
    }

    pub fn is_null(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.is_null())
    }

    pub fn is_boolean(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_boolean().is_some())
    }

    pub fn is_string(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_string().is_some())
    }

    pub fn is_number(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some())
    }

    pub fn fits_in_i8(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_i8))
    }

    pub fn fits_in_i16(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_i16))
    }

    pub fn fits_in_i32(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_i32))
    }

    pub fn fits_in_i64(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_i64))
    }

    pub fn fits_in_u8(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_u8))
    }

    pub fn fits_in_u16(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_u16))
    }

    pub fn fits_in_u32(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_u32))
    }

    pub fn fits_in_f32(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_f32))
    }

    pub fn fits_in_f64(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.as_number().is_some_and(Number::fits_f64))
    }

    pub fn as_boolean(&self) -> Result<bool> {
        self.context()?;
        self.object.as_boolean().ok_or(Error::Conversion("boolean"))
    }

    pub fn as_i8(&self) -> Result<i8> {
        let n = self.as_number()?;
        n.fits_i8()
            .then(|| n.exact_int().unwrap_or_default() as i8)
            .ok_or(Error::Conversion("int8"))
    }

    pub fn as_i16(&self) -> Result<i16> {
        let n = self.as_number()?;
        n.fits_i16()
            .then(|| n.exact_int().unwrap_or_default() as i16)
            .ok_or(Error::Conversion("int16"))
    }

    pub fn as_i32(&self) -> Result<i32> {
        let n = self.as_number()?;
        n.fits_i32()
            .then(|| n.exact_int().unwrap_or_default() as i32)
            .ok_or(Error::Conversion("int32"))
    }

    pub fn as_i64(&self) -> Result<i64> {
        let n = self.as_number()?;
        n.exact_int().ok_or(Error::Conversion("int64"))
    }

    pub fn as_u8(&self) -> Result<u8> {
        let n = self.as_number()?;
        n.fits_u8()
            .then(|| n.exact_int().unwrap_or_default() as u8)
            .ok_or(Error::Conversion("uint8"))
    }

    pub fn as_u16(&self) -> Result<u16> {
        let n = self.as_number()?;
        n.fits_u16()
            .then(|| n.exact_int().unwrap_or_default() as u16)
            .ok_or(Error::Conversion("uint16"))
    }

    pub fn as_u32(&self) -> Result<u32> {
        let n = self.as_number()?;
        n.fits_u32()
            .then(|| n.exact_int().unwrap_or_default() as u32)
            .ok_or(Error::Conversion("uint32"))
    }

    pub fn as_f32(&self) -> Result<f32> {
        let n = self.as_number()?;
        if n.fits_f32() {
            Ok(n.as_f64() as f32)
        } else {
            Err(Error::Conversion("float"))
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        let n = self.as_number()?;
        if n.fits_f64() {
            Ok(n.as_f64())
        } else {
            Err(Error::Conversion("double"))
        }
    }

    /// UTF-8 content of a string value.
    ///
    /// # Errors
    /// [`Error::StringExpected`] if the value is not a string.
    pub fn as_string(&self) -> Result<String> {
        self.context()?;
        self.object.as_string().ok_or(Error::StringExpected)
    }

    /// `toString`-style rendering; defined for every value.
    pub fn to_display_string(&self) -> Result<String> {
        self.context()?;
        Ok(self.object.display())
    }

    pub fn has_members(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.has_members())
    }

    /// Member lookup; an absent member yields the null value.
    pub fn get_member(&self, thread: &IsolateThread, key: &str) -> Result<Value> {
        let context = self.context()?;
        match self.object.member(key) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => context.null(),
            Err(err) => Err(surface(thread, err)),
        }
    }

    pub fn put_member(&self, thread: &IsolateThread, key: &str, value: Value) -> Result<()> {
        self.context()?;
        self.object
            .put_member(key, value)
            .map_err(|err| surface(thread, err))
    }

    pub fn has_member(&self, thread: &IsolateThread, key: &str) -> Result<bool> {
        self.context()?;
        self.object
            .has_member(key)
            .map_err(|err| surface(thread, err))
    }

    pub fn has_array_elements(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.has_array_elements())
    }

    pub fn get_array_size(&self, thread: &IsolateThread) -> Result<u64> {
        self.context()?;
        self.object.array_size().map_err(|err| surface(thread, err))
    }

    pub fn get_array_element(&self, thread: &IsolateThread, index: i64) -> Result<Value> {
        self.context()?;
        let index = checked_index(&*self.object, index)?;
        self.object
            .array_element(index)
            .map_err(|err| surface(thread, err))
    }

    pub fn set_array_element(&self, thread: &IsolateThread, index: i64, value: Value) -> Result<()> {
        self.context()?;
        let index = checked_index(&*self.object, index)?;
        self.object
            .set_array_element(index, value)
            .map_err(|err| surface(thread, err))
    }

    pub fn remove_array_element(&self, thread: &IsolateThread, index: i64) -> Result<()> {
        self.context()?;
        let index = checked_index(&*self.object, index)?;
        self.object
            .remove_array_element(index)
            .map_err(|err| surface(thread, err))
    }

    pub fn can_execute(&self) -> Result<bool> {
        self.context()?;
        Ok(self.object.can_execute())
    }

    /// Execute a callable value (guest function or native callback).
    ///
    /// # Errors
    /// Distinguishes not-executable, closed context, wrong arity, and
    /// guest-level failure (reported as a pending exception).
    pub fn execute(&self, thread: &IsolateThread, args: &[Value]) -> Result<Value> {
        let context = self.context()?;
        let env = GuestEnv {
            thread,
            context: &context,
        };
        self.execute_raw(&env, args).map_err(|err| surface(thread, err))
    }

    /// Execution without the pending-exception surfacing, for use by
    /// language implementations that handle [`InteropError`] themselves.
    pub fn execute_raw(&self, env: &GuestEnv<'_>, args: &[Value]) -> InteropResult<Value> {
        if !self.object.can_execute() {
            return Err(InteropError::NotExecutable);
        }
        self.object.execute(env, args)
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.object.type_name())
            .finish()
    }
}

/// Map an interop failure onto the boundary error taxonomy. Guest failures
/// park an exception in the calling thread's pending slot.
fn surface(thread: &IsolateThread, err: InteropError) -> Error {
    match err {
        InteropError::Guest(guest) => {
            thread.set_pending_guest(guest);
            Error::PendingException
        }
        InteropError::NoMembers => Error::Unsupported("value has no members"),
        InteropError::NotAnArray => Error::ArrayExpected,
        InteropError::OutOfBounds(index) => {
            Error::IndexOutOfBounds(i64::try_from(index).unwrap_or(i64::MAX))
        }
        InteropError::Arity { expected, actual } => Error::Arity { expected, actual },
        InteropError::NotExecutable => Error::NotExecutable,
        InteropError::Unsupported(what) => Error::Unsupported(what),
    }
}

/// Negative indices are a generic out-of-bounds failure; "not an array" keeps
/// its distinguished condition.
fn checked_index(object: &dyn Interop, index: i64) -> Result<u64> {
    if !object.has_array_elements() {
        return Err(Error::ArrayExpected);
    }
    u64::try_from(index).map_err(|_| Error::IndexOutOfBounds(index))
}

pub(crate) struct HostNull;

impl Interop for HostNull {
    fn type_name(&self) -> &'static str {
        "null"
    }

    fn display(&self) -> String {
        "null".to_string()
    }

    fn is_null(&self) -> bool {
        true
    }
}

pub(crate) struct HostBoolean(pub(crate) bool);

impl Interop for HostBoolean {
    fn type_name(&self) -> &'static str {
        "boolean"
    }

    fn display(&self) -> String {
        self.0.to_string()
    }

    fn as_boolean(&self) -> Option<bool> {
        Some(self.0)
    }
}

pub(crate) struct HostNumber(pub(crate) Number);

impl Interop for HostNumber {
    fn type_name(&self) -> &'static str {
        "number"
    }

    fn display(&self) -> String {
        match self.0 {
            Number::Int(i) => i.to_string(),
            Number::Float(f) => f.to_string(),
        }
    }

    fn as_number(&self) -> Option<Number> {
        Some(self.0)
    }
}

pub(crate) struct HostString(pub(crate) String);

impl Interop for HostString {
    fn type_name(&self) -> &'static str {
        "string"
    }

    fn display(&self) -> String {
        self.0.clone()
    }

    fn as_string(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Member container shared by bindings, polyglot bindings, and
/// host-created empty objects.
#[derive(Default)]
pub(crate) struct HostObject {
    members: Mutex<HashMap<String, Value>>,
}

impl Interop for HostObject {
    fn type_name(&self) -> &'static str {
        "object"
    }

    fn display(&self) -> String {
        "[object]".to_string()
    }

    fn has_members(&self) -> bool {
        true
    }

    fn member(&self, key: &str) -> InteropResult<Option<Value>> {
        Ok(self.members.lock().get(key).cloned())
    }

    fn put_member(&self, key: &str, value: Value) -> InteropResult<()> {
        self.members.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn has_member(&self, key: &str) -> InteropResult<bool> {
        Ok(self.members.lock().contains_key(key))
    }
}

pub(crate) struct HostArray {
    elements: Mutex<Vec<Value>>,
}

impl HostArray {
    pub(crate) fn from_slice(values: &[Value]) -> Self {
        Self {
            elements: Mutex::new(values.to_vec()),
        }
    }
}

impl Interop for HostArray {
    fn type_name(&self) -> &'static str {
        "array"
    }

    fn display(&self) -> String {
        "[array]".to_string()
    }

    fn has_array_elements(&self) -> bool {
        true
    }

    fn array_size(&self) -> InteropResult<u64> {
        Ok(self.elements.lock().len() as u64)
    }

    fn array_element(&self, index: u64) -> InteropResult<Value> {
        self.elements
            .lock()
            .get(usize::try_from(index).map_err(|_| InteropError::OutOfBounds(index))?)
            .cloned()
            .ok_or(InteropError::OutOfBounds(index))
    }

    fn set_array_element(&self, index: u64, value: Value) -> InteropResult<()> {
        let mut elements = self.elements.lock();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| elements.get_mut(i))
            .ok_or(InteropError::OutOfBounds(index))?;
        *slot = value;
        Ok(())
    }

    fn remove_array_element(&self, index: u64) -> InteropResult<()> {
        let mut elements = self.elements.lock();
        let i = usize::try_from(index)
            .ok()
            .filter(|&i| i < elements.len())
            .ok_or(InteropError::OutOfBounds(index))?;
        elements.remove(i);
        Ok(())
    }
}
