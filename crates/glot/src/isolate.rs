//! Isolate lifecycle and per-thread attachment.
//!
//! An isolate is an independent runtime universe. Native threads explicitly
//! attach to it before doing anything else; every attached thread owns its
//! own handle scope stack and its own pending-exception slot. Nothing here
//! creates threads implicitly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::callback::CallbackInfo;
use crate::context::{Context, ContextBuilder};
use crate::engine::{Engine, EngineBuilder, Language};
use crate::error::{Error, Result};
use crate::exception::{Exception, GuestError};
use crate::handle::{Handle, HandleObject, ReferenceTable, ScopeTable};
use crate::value::Value;

static NEXT_ISOLATE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ATTACHED: RefCell<HashMap<u64, Arc<IsolateThread>>> = RefCell::new(HashMap::new());
}

/// Opaque parameter block for isolate creation.
///
/// Interpreted by isolate bootstrapping (image loading, heap sizing), which
/// is an external collaborator of this layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct IsolateParams {
    /// Reserved virtual address space for the isolate heap, in bytes.
    /// Zero means the bootstrapper's default.
    pub reserved_address_space_size: u64,
}

pub(crate) struct IsolateShared {
    id: u64,
    live: AtomicBool,
    tearing_down: AtomicBool,
    threads: Mutex<HashMap<ThreadId, Arc<IsolateThread>>>,
    detach_signal: Condvar,
    references: Mutex<ReferenceTable>,
}

/// An independent runtime universe with its own heap and global state.
#[derive(Clone)]
pub struct Isolate {
    shared: Arc<IsolateShared>,
}

impl Isolate {
    /// Create an isolate and attach the calling thread to it.
    ///
    /// # Errors
    /// Isolate lifecycle has no partial-failure state: on error nothing was
    /// created.
    pub fn create(params: Option<&IsolateParams>) -> Result<(Self, Arc<IsolateThread>)> {
        // The parameter block is consumed by isolate bootstrapping, which is
        // not part of this layer.
        let _ = params;
        let shared = Arc::new(IsolateShared {
            id: NEXT_ISOLATE_ID.fetch_add(1, Ordering::Relaxed),
            live: AtomicBool::new(true),
            tearing_down: AtomicBool::new(false),
            threads: Mutex::new(HashMap::new()),
            detach_signal: Condvar::new(),
            references: Mutex::new(ReferenceTable::new()),
        });
        let isolate = Self { shared };
        let thread = isolate.attach_current_thread()?;
        debug!(isolate = isolate.id(), "isolate created");
        Ok((isolate, thread))
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Attach the calling thread, or return its existing attachment.
    ///
    /// # Errors
    /// Fails if the isolate is dead or tearing down.
    pub fn attach_current_thread(&self) -> Result<Arc<IsolateThread>> {
        if !self.shared.live.load(Ordering::Acquire)
            || self.shared.tearing_down.load(Ordering::Acquire)
        {
            return Err(Error::IsolateDead);
        }
        let existing = ATTACHED.with(|attached| attached.borrow().get(&self.shared.id).cloned());
        if let Some(existing) = existing {
            if !existing.detached.load(Ordering::Acquire) {
                return Ok(existing);
            }
        }
        let thread = Arc::new(IsolateThread {
            isolate: Arc::downgrade(&self.shared),
            isolate_id: self.shared.id,
            owner: std::thread::current().id(),
            detached: AtomicBool::new(false),
            state: Mutex::new(ThreadState::new()),
        });
        self.shared
            .threads
            .lock()
            .insert(thread.owner, Arc::clone(&thread));
        ATTACHED.with(|attached| {
            attached
                .borrow_mut()
                .insert(self.shared.id, Arc::clone(&thread));
        });
        trace!(isolate = self.shared.id, "thread attached");
        Ok(thread)
    }

    /// The calling thread's attachment to this isolate, if any.
    #[must_use]
    pub fn current_thread(&self) -> Option<Arc<IsolateThread>> {
        ATTACHED.with(|attached| {
            attached
                .borrow()
                .get(&self.shared.id)
                .filter(|t| !t.detached.load(Ordering::Acquire))
                .cloned()
        })
    }
}

struct ThreadState {
    scopes: ScopeTable,
    pending: Option<Exception>,
    raised: Option<String>,
}

impl ThreadState {
    const fn new() -> Self {
        Self {
            scopes: ScopeTable::new(),
            pending: None,
            raised: None,
        }
    }
}

/// One native thread's attachment to an isolate.
///
/// Thread-affine: scope, handle, and exception operations only succeed on
/// the thread that created the attachment. Detaching while guest code
/// executes on this thread is undefined.
pub struct IsolateThread {
    isolate: Weak<IsolateShared>,
    isolate_id: u64,
    owner: ThreadId,
    detached: AtomicBool,
    state: Mutex<ThreadState>,
}

macro_rules! typed_resolvers {
    ($($fn_name:ident => $variant:ident($ty:ty), $label:expr;)*) => {
        $(
            /// Resolve a handle expected to carry this object type.
            ///
            /// # Errors
            /// Fails on stale handles and wrong handle types.
            pub fn $fn_name(&self, handle: Handle) -> Result<$ty> {
                match self.resolve(handle)? {
                    HandleObject::$variant(inner) => Ok(inner),
                    other => Err(Error::WrongHandleType {
                        expected: $label,
                        actual: other.kind(),
                    }),
                }
            }
        )*
    };
}

impl IsolateThread {
    /// The isolate this thread is attached to.
    ///
    /// # Errors
    /// Fails after teardown.
    pub fn isolate(&self) -> Result<Isolate> {
        Ok(Isolate {
            shared: self.shared()?,
        })
    }

    #[must_use]
    pub const fn isolate_id(&self) -> u64 {
        self.isolate_id
    }

    fn shared(&self) -> Result<Arc<IsolateShared>> {
        self.isolate
            .upgrade()
            .filter(|s| s.live.load(Ordering::Acquire))
            .ok_or(Error::IsolateDead)
    }

    pub(crate) fn check_usable(&self) -> Result<()> {
        if self.detached.load(Ordering::Acquire) {
            return Err(Error::ThreadDetached);
        }
        if std::thread::current().id() != self.owner {
            return Err(Error::InvalidArgument(
                "thread handle used from a different native thread",
            ));
        }
        self.shared()?;
        Ok(())
    }

    /// Open an explicit handle scope on this thread.
    ///
    /// # Errors
    /// Fails if the thread is unusable.
    pub fn open_scope(&self) -> Result<()> {
        self.check_usable()?;
        self.state.lock().scopes.open();
        Ok(())
    }

    /// Close the topmost explicit scope, invalidating every handle allocated
    /// inside it. Scopes must close in strict LIFO order per thread.
    ///
    /// # Errors
    /// Fails when no explicit scope is open (the default scope is released
    /// only at detach).
    pub fn close_scope(&self) -> Result<()> {
        self.check_usable()?;
        self.state.lock().scopes.close()
    }

    /// Allocate a handle for `object` in the topmost scope.
    ///
    /// # Errors
    /// Fails if the thread is unusable.
    pub fn allocate(&self, object: impl Into<HandleObject>) -> Result<Handle> {
        self.check_usable()?;
        Ok(self.state.lock().scopes.allocate(object.into()))
    }

    /// Resolve a handle allocated on this thread, or a reference of this
    /// isolate.
    ///
    /// # Errors
    /// Fails on stale handles.
    pub fn resolve(&self, handle: Handle) -> Result<HandleObject> {
        self.check_usable()?;
        if handle.is_reference() {
            self.shared()?.references.lock().resolve(handle)
        } else {
            self.state.lock().scopes.resolve(handle)
        }
    }

    typed_resolvers! {
        expect_engine => Engine(Engine), "engine";
        expect_engine_builder => EngineBuilder(EngineBuilder), "engine builder";
        expect_context => Context(Context), "context";
        expect_context_builder => ContextBuilder(ContextBuilder), "context builder";
        expect_language => Language(Language), "language";
        expect_value => Value(Value), "value";
        expect_callback_info => CallbackInfo(CallbackInfo), "callback info";
        expect_exception => Exception(Exception), "exception";
    }

    /// Promote a live handle to a scope-independent reference, valid across
    /// scope closes and across threads of the same isolate until deleted.
    ///
    /// # Errors
    /// Fails if the handle is stale.
    pub fn create_reference(&self, handle: Handle) -> Result<Handle> {
        let object = self.resolve(handle)?;
        Ok(self.shared()?.references.lock().create(object))
    }

    /// Delete a reference. Using the reference afterwards is undefined;
    /// where detection is free it fails as a stale handle.
    ///
    /// # Errors
    /// Fails if the handle is not a reference or was already deleted.
    pub fn delete_reference(&self, handle: Handle) -> Result<()> {
        self.check_usable()?;
        if !handle.is_reference() {
            return Err(Error::InvalidArgument("handle is not a reference"));
        }
        self.shared()?.references.lock().delete(handle)
    }

    pub(crate) fn set_pending(&self, exception: Exception) {
        self.state.lock().pending = Some(exception);
    }

    pub(crate) fn set_pending_guest(&self, guest: GuestError) {
        self.set_pending(Exception::from_guest(guest));
    }

    /// Drain the pending exception. Single-shot: a second call without an
    /// intervening failing entry point fails.
    ///
    /// # Errors
    /// Fails when no exception is pending.
    pub fn take_last_exception(&self) -> Result<Exception> {
        self.check_usable()?;
        self.state
            .lock()
            .pending
            .take()
            .ok_or(Error::NoPendingException)
    }

    /// Record a guest-visible exception from inside a native callback.
    ///
    /// Does not transfer control: the callback must still return, and only
    /// the raise state present at return time is observed. The most recent
    /// raise wins.
    ///
    /// # Errors
    /// Fails if the thread is unusable.
    pub fn raise(&self, message: impl Into<String>) -> Result<()> {
        self.check_usable()?;
        self.state.lock().raised = Some(message.into());
        Ok(())
    }

    pub(crate) fn clear_raised(&self) {
        self.state.lock().raised = None;
    }

    pub(crate) fn take_raised(&self) -> Option<String> {
        self.state.lock().raised.take()
    }

    /// Detach this thread from its isolate, releasing its default scope and
    /// all thread-local boundary state.
    ///
    /// # Errors
    /// Detaching an already-detached thread fails cleanly.
    pub fn detach(thread: &Arc<Self>) -> Result<()> {
        if thread.detached.swap(true, Ordering::AcqRel) {
            return Err(Error::ThreadDetached);
        }
        {
            let mut state = thread.state.lock();
            state.scopes.clear();
            state.pending = None;
            state.raised = None;
        }
        if std::thread::current().id() == thread.owner {
            ATTACHED.with(|attached| {
                attached.borrow_mut().remove(&thread.isolate_id);
            });
        }
        if let Some(shared) = thread.isolate.upgrade() {
            shared.threads.lock().remove(&thread.owner);
            shared.detach_signal.notify_all();
        }
        trace!(isolate = thread.isolate_id, "thread detached");
        Ok(())
    }

    /// Detach a batch of threads of the same isolate.
    ///
    /// The caller guarantees none of them is executing guest code now or
    /// later without re-attaching; violating that is undefined behavior, not
    /// a reported error. The current thread may be part of the batch.
    ///
    /// # Errors
    /// Fails if a thread belongs to a different isolate or is already
    /// detached.
    pub fn detach_batch(current: &Arc<Self>, threads: &[Arc<Self>]) -> Result<()> {
        current.check_usable()?;
        if threads
            .iter()
            .any(|t| t.isolate_id != current.isolate_id)
        {
            return Err(Error::InvalidArgument(
                "all threads of a batch detach must belong to the same isolate",
            ));
        }
        for thread in threads {
            Self::detach(thread)?;
        }
        Ok(())
    }

    /// Tear down the isolate this thread is attached to.
    ///
    /// Blocks until every other attached thread detaches, then detaches the
    /// calling thread, marks the isolate dead, and releases isolate-owned
    /// state including all references.
    ///
    /// # Errors
    /// Fails if the calling thread is unusable.
    pub fn tear_down_isolate(thread: &Arc<Self>) -> Result<()> {
        thread.check_usable()?;
        let shared = thread.shared()?;
        shared.tearing_down.store(true, Ordering::Release);
        {
            let mut threads = shared.threads.lock();
            while !(threads.len() == 1 && threads.contains_key(&thread.owner)) {
                shared.detach_signal.wait(&mut threads);
            }
        }
        Self::detach(thread)?;
        shared.live.store(false, Ordering::Release);
        shared.references.lock().clear();
        debug!(isolate = shared.id, "isolate torn down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_is_idempotent_per_thread() {
        let (isolate, thread) = Isolate::create(None).expect("create");
        let again = isolate.attach_current_thread().expect("attach");
        assert!(Arc::ptr_eq(&thread, &again));
        assert!(isolate.current_thread().is_some());
        IsolateThread::tear_down_isolate(&thread).expect("tear down");
    }

    #[test]
    fn detach_twice_fails_cleanly() {
        let (isolate, thread) = Isolate::create(None).expect("create");
        IsolateThread::detach(&thread).expect("detach");
        assert!(matches!(
            IsolateThread::detach(&thread),
            Err(Error::ThreadDetached)
        ));
        // The isolate itself is unaffected; re-attach works.
        let thread = isolate.attach_current_thread().expect("re-attach");
        IsolateThread::tear_down_isolate(&thread).expect("tear down");
    }

    #[test]
    fn thread_handle_is_thread_affine() {
        let (_isolate, thread) = Isolate::create(None).expect("create");
        let moved = Arc::clone(&thread);
        std::thread::spawn(move || {
            assert!(matches!(
                moved.open_scope(),
                Err(Error::InvalidArgument(_))
            ));
        })
        .join()
        .expect("join");
        IsolateThread::tear_down_isolate(&thread).expect("tear down");
    }

    #[test]
    fn teardown_waits_for_other_threads() {
        let (isolate, thread) = Isolate::create(None).expect("create");
        let other_isolate = isolate.clone();
        let (attached_tx, attached_rx) = std::sync::mpsc::channel();
        let worker = std::thread::spawn(move || {
            let other = other_isolate.attach_current_thread().expect("attach");
            attached_tx.send(()).expect("signal");
            std::thread::sleep(std::time::Duration::from_millis(50));
            IsolateThread::detach(&other).expect("detach");
        });
        attached_rx.recv().expect("worker attached");
        IsolateThread::tear_down_isolate(&thread).expect("tear down");
        assert!(!isolate.is_live());
        assert!(matches!(
            isolate.attach_current_thread(),
            Err(Error::IsolateDead)
        ));
        worker.join().expect("join");
    }

    #[test]
    fn operations_fail_after_detach() {
        let (_isolate, thread) = Isolate::create(None).expect("create");
        IsolateThread::detach(&thread).expect("detach");
        assert!(matches!(thread.open_scope(), Err(Error::ThreadDetached)));
        assert!(matches!(
            thread.take_last_exception(),
            Err(Error::ThreadDetached)
        ));
    }
}
