//! Opaque handles, per-thread scope arenas, and the per-isolate reference
//! table.
//!
//! Every runtime object reachable from native code travels as a [`Handle`]: a
//! pointer-sized integer packing an arena slot and a generation tag. Handles
//! are allocated into the topmost open scope of the calling thread and become
//! invalid in one step when that scope closes; the generation tag turns most
//! stale accesses into a clean failure instead of a crash. A handle promoted
//! with [`IsolateThread::create_reference`](crate::isolate::IsolateThread::create_reference)
//! moves into the owning isolate's reference table and carries a tag bit that
//! routes resolution there instead.

use crate::callback::CallbackInfo;
use crate::context::{Context, ContextBuilder};
use crate::engine::{Engine, EngineBuilder, Language};
use crate::error::{Error, Result};
use crate::exception::Exception;
use crate::value::Value;

const REFERENCE_TAG: u64 = 1 << 63;
const SEQ_MASK: u32 = (1 << 31) - 1;

/// Opaque reference to a runtime object.
///
/// Valid only on the thread (and within the scope) that produced it, unless
/// it was promoted to a reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Handle(u64);

impl Handle {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_reference(self) -> bool {
        self.0 & REFERENCE_TAG != 0
    }

    const fn pack(index: u32, seq: u32) -> Self {
        Self(((seq as u64) << 32) | index as u64)
    }

    const fn unpack(self) -> (usize, u32) {
        let bits = self.0 & !REFERENCE_TAG;
        (bits as u32 as usize, (bits >> 32) as u32)
    }
}

/// Everything a handle can point at.
#[derive(Clone)]
pub enum HandleObject {
    Engine(Engine),
    EngineBuilder(EngineBuilder),
    Context(Context),
    ContextBuilder(ContextBuilder),
    Language(Language),
    Value(Value),
    CallbackInfo(CallbackInfo),
    Exception(Exception),
}

impl HandleObject {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Engine(_) => "engine",
            Self::EngineBuilder(_) => "engine builder",
            Self::Context(_) => "context",
            Self::ContextBuilder(_) => "context builder",
            Self::Language(_) => "language",
            Self::Value(_) => "value",
            Self::CallbackInfo(_) => "callback info",
            Self::Exception(_) => "exception",
        }
    }
}

macro_rules! handle_object_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(impl From<$ty> for HandleObject {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

handle_object_from! {
    Engine(Engine),
    EngineBuilder(EngineBuilder),
    Context(Context),
    ContextBuilder(ContextBuilder),
    Language(Language),
    Value(Value),
    CallbackInfo(CallbackInfo),
    Exception(Exception),
}

struct Entry {
    seq: u32,
    object: HandleObject,
}

/// Arena of scope-bound handles for one attached thread.
///
/// Scopes are marks into the entry vector; closing a scope truncates the
/// arena back to its mark, releasing every handle allocated inside it (and
/// inside any nested scope) in one step.
pub(crate) struct ScopeTable {
    entries: Vec<Entry>,
    marks: Vec<usize>,
    next_seq: u32,
}

impl ScopeTable {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
            marks: Vec::new(),
            next_seq: 1,
        }
    }

    fn bump_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = (self.next_seq + 1) & SEQ_MASK;
        if self.next_seq == 0 {
            self.next_seq = 1;
        }
        seq
    }

    pub(crate) fn allocate(&mut self, object: HandleObject) -> Handle {
        let seq = self.bump_seq();
        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(Entry { seq, object });
        Handle::pack(index, seq)
    }

    pub(crate) fn resolve(&self, handle: Handle) -> Result<HandleObject> {
        let (index, seq) = handle.unpack();
        self.entries
            .get(index)
            .filter(|entry| seq != 0 && entry.seq == seq)
            .map(|entry| entry.object.clone())
            .ok_or(Error::StaleHandle)
    }

    pub(crate) fn open(&mut self) {
        self.marks.push(self.entries.len());
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        let mark = self.marks.pop().ok_or(Error::UnbalancedScope)?;
        self.entries.truncate(mark);
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.marks.clear();
    }
}

struct RefSlot {
    seq: u32,
    object: Option<HandleObject>,
}

/// Scope-independent references, shared by all threads of one isolate.
pub(crate) struct ReferenceTable {
    slots: Vec<RefSlot>,
    free: Vec<u32>,
    next_seq: u32,
}

impl ReferenceTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            next_seq: 1,
        }
    }

    fn bump_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = (self.next_seq + 1) & SEQ_MASK;
        if self.next_seq == 0 {
            self.next_seq = 1;
        }
        seq
    }

    pub(crate) fn create(&mut self, object: HandleObject) -> Handle {
        let seq = self.bump_seq();
        let index = if let Some(index) = self.free.pop() {
            self.slots[index as usize] = RefSlot {
                seq,
                object: Some(object),
            };
            index
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(RefSlot {
                seq,
                object: Some(object),
            });
            index
        };
        Handle(Handle::pack(index, seq).as_raw() | REFERENCE_TAG)
    }

    pub(crate) fn resolve(&self, handle: Handle) -> Result<HandleObject> {
        let (index, seq) = handle.unpack();
        self.slots
            .get(index)
            .filter(|slot| seq != 0 && slot.seq == seq)
            .and_then(|slot| slot.object.clone())
            .ok_or(Error::StaleHandle)
    }

    pub(crate) fn delete(&mut self, handle: Handle) -> Result<()> {
        let (index, seq) = handle.unpack();
        let slot = self
            .slots
            .get_mut(index)
            .filter(|slot| seq != 0 && slot.seq == seq && slot.object.is_some())
            .ok_or(Error::StaleHandle)?;
        slot.object = None;
        self.free.push(index as u32);
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn some_object() -> HandleObject {
        HandleObject::Context(Context::new(None).expect("context"))
    }

    #[test]
    fn scope_close_invalidates_nested_handles() {
        let mut table = ScopeTable::new();
        let outer = table.allocate(some_object());
        table.open();
        let inner = table.allocate(some_object());
        table.open();
        let innermost = table.allocate(some_object());
        table.close().expect("close innermost");
        assert!(matches!(
            table.resolve(innermost),
            Err(Error::StaleHandle)
        ));
        assert!(table.resolve(inner).is_ok());
        table.close().expect("close inner");
        assert!(matches!(table.resolve(inner), Err(Error::StaleHandle)));
        assert!(table.resolve(outer).is_ok());
    }

    #[test]
    fn closing_default_scope_is_rejected() {
        let mut table = ScopeTable::new();
        assert!(matches!(table.close(), Err(Error::UnbalancedScope)));
    }

    #[test]
    fn recycled_slot_rejects_old_handle() {
        let mut table = ScopeTable::new();
        table.open();
        let old = table.allocate(some_object());
        table.close().expect("close");
        table.open();
        let new = table.allocate(some_object());
        // Same slot index, different generation.
        assert!(matches!(table.resolve(old), Err(Error::StaleHandle)));
        assert!(table.resolve(new).is_ok());
    }

    #[test]
    fn reference_slots_are_reused_with_fresh_generation() {
        let mut refs = ReferenceTable::new();
        let first = refs.create(some_object());
        assert!(first.is_reference());
        refs.delete(first).expect("delete");
        assert!(matches!(refs.resolve(first), Err(Error::StaleHandle)));
        let second = refs.create(some_object());
        assert!(matches!(refs.resolve(first), Err(Error::StaleHandle)));
        assert!(refs.resolve(second).is_ok());
        assert!(matches!(refs.delete(first), Err(Error::StaleHandle)));
    }
}
