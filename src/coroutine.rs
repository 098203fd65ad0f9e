use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr;
use std::rc::Rc;

use crate::arch;
use crate::pool::{self, PooledCoroutine};
use crate::stack::{self, CoroutineStack};

/// Execution state of a coroutine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoroutineState {
    /// Created but never entered.
    Created,
    /// Somewhere on the active caller chain: either executing or blocked in
    /// [`Coroutine::enter`] on another coroutine.
    Running,
    /// Suspended in [`suspend`], waiting to be entered again.
    Yielded,
    /// The entry function has returned. Terminal.
    Terminated,
}

type EntryFunc = Box<dyn FnOnce(usize)>;

/// The coroutine entity. Handles ([`Coroutine`]) share one of these.
pub(crate) struct CoroutineInner {
    state: Cell<CoroutineState>,
    /// Entry function, taken exactly once by the trampoline.
    entry: RefCell<Option<EntryFunc>>,
    /// Opaque word stored by every `enter`; delivered to the entry function
    /// on the first activation and returned from `suspend` on later ones.
    entry_arg: Cell<usize>,
    /// Saved stack pointer of this coroutine. Valid only while the state is
    /// `Created` or `Yielded`; meaningless while running.
    ctx: Cell<usize>,
    /// Caller link: the context slot that must regain control when this
    /// coroutine next yields or terminates. Rebound on every `enter`, so it
    /// always refers to the most recent entering context, never a historical
    /// one.
    caller: Cell<*mut usize>,
    /// Exclusively owned call stack. Taken when the coroutine is retired.
    stack: RefCell<Option<CoroutineStack>>,
}

thread_local! {
    /// The coroutine currently running on this thread, if any.
    static CURRENT: Cell<Option<Rc<CoroutineInner>>> = const { Cell::new(None) };

    /// Context slot for the thread's root context (the code outside any
    /// coroutine). Only one root activation can be suspended at a time, since
    /// the only way back to root code is to consume this slot.
    static ROOT_CTX: Cell<usize> = const { Cell::new(0) };
}

fn current_inner() -> Option<Rc<CoroutineInner>> {
    CURRENT.with(|c| {
        let cur = c.take();
        let out = cur.clone();
        c.set(cur);
        out
    })
}

/// A handle to a stackful coroutine.
///
/// Handles are cheap to clone and all refer to the same underlying
/// coroutine. They are deliberately `!Send`: a coroutine belongs to the
/// thread that created it, along with that thread's pool and registry, and
/// never migrates.
///
/// # Abandonment
///
/// There is no operation to cancel a coroutine. Dropping every handle to a
/// suspended coroutine releases its stack and entity, but destructors of
/// values still live on that stack do not run; anything they own is leaked.
/// Callers are expected to drive every coroutine to termination.
pub struct Coroutine {
    inner: Rc<CoroutineInner>,
}

impl Coroutine {
    /// Creates a new coroutine which will execute `f` when first entered.
    ///
    /// The stack has [`DEFAULT_STACK_SIZE`](stack::DEFAULT_STACK_SIZE) bytes
    /// of usable space. Retired coroutines from this thread's pool are reused
    /// when possible, so the hot create→run→terminate cycle performs no
    /// stack allocation at steady state.
    ///
    /// # Panics
    ///
    /// Panics if a fresh stack is needed and the allocation fails.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(usize) + 'static,
    {
        let entry: EntryFunc = Box::new(f);
        if let Some(PooledCoroutine { stack, inner }) = pool::take() {
            return Self::revive(stack, inner, entry);
        }
        let stack = CoroutineStack::new(stack::DEFAULT_STACK_SIZE)
            .expect("failed to allocate coroutine stack");
        Self::fresh(stack, entry)
    }

    /// Creates a new coroutine with at least `stack_size` bytes of usable
    /// stack.
    ///
    /// Coroutines with non-default stack sizes bypass the pool entirely.
    ///
    /// # Panics
    ///
    /// Panics if the stack allocation fails.
    pub fn with_stack_size<F>(stack_size: usize, f: F) -> Self
    where
        F: FnOnce(usize) + 'static,
    {
        if stack_size == stack::DEFAULT_STACK_SIZE {
            return Self::new(f);
        }
        let stack =
            CoroutineStack::new(stack_size).expect("failed to allocate coroutine stack");
        Self::fresh(stack, Box::new(f))
    }

    fn fresh(stack: CoroutineStack, entry: EntryFunc) -> Self {
        let ctx = unsafe { arch::init_stack(stack.base(), coroutine_trampoline) };
        Coroutine {
            inner: Rc::new(CoroutineInner {
                state: Cell::new(CoroutineState::Created),
                entry: RefCell::new(Some(entry)),
                entry_arg: Cell::new(0),
                ctx: Cell::new(ctx),
                caller: Cell::new(ptr::null_mut()),
                stack: RefCell::new(Some(stack)),
            }),
        }
    }

    /// Re-arms a retired coroutine from the pool. The entity object is only
    /// reused if no stale handles to it remain; the stack is reused either
    /// way.
    fn revive(stack: CoroutineStack, inner: Rc<CoroutineInner>, entry: EntryFunc) -> Self {
        if Rc::strong_count(&inner) != 1 {
            return Self::fresh(stack, entry);
        }
        let ctx = unsafe { arch::init_stack(stack.base(), coroutine_trampoline) };
        inner.state.set(CoroutineState::Created);
        *inner.entry.borrow_mut() = Some(entry);
        inner.entry_arg.set(0);
        inner.ctx.set(ctx);
        inner.caller.set(ptr::null_mut());
        *inner.stack.borrow_mut() = Some(stack);
        Coroutine { inner }
    }

    /// Transfers control into this coroutine, blocking the calling context
    /// until the coroutine yields or terminates.
    ///
    /// `arg` is delivered to the entry function if this is the first entry,
    /// and returned from the [`suspend`] call the coroutine is blocked in
    /// otherwise.
    ///
    /// Every entry rebinds the coroutine's return target to this caller: no
    /// matter who entered it before, its next yield or termination returns
    /// control here.
    ///
    /// # Panics
    ///
    /// Panics if the coroutine is currently running (including anywhere on
    /// the active caller chain) or has already terminated.
    pub fn enter(&self, arg: usize) {
        let inner = &self.inner;
        match inner.state.get() {
            CoroutineState::Created | CoroutineState::Yielded => {}
            CoroutineState::Running => panic!("coroutine entered while already running"),
            CoroutineState::Terminated => panic!("attempt to enter a terminated coroutine"),
        }
        inner.entry_arg.set(arg);

        // Publish the coroutine in the registry, remembering the previous
        // entry so it can be restored when control comes back.
        let prev = CURRENT.with(|c| c.replace(Some(inner.clone())));

        // Rebind the caller link. The entering context's own slot doubles as
        // the save target for the switch below: for a nested entry that is
        // the entering coroutine's slot, otherwise the thread's root slot.
        let caller_slot = match &prev {
            Some(caller) => caller.ctx.as_ptr(),
            None => ROOT_CTX.with(|slot| slot.as_ptr()),
        };
        inner.caller.set(caller_slot);
        inner.state.set(CoroutineState::Running);

        unsafe { arch::switch_context(caller_slot, inner.ctx.as_ptr()) };

        // The coroutine yielded or terminated; this context is running again.
        CURRENT.with(|c| c.set(prev));

        if inner.state.get() == CoroutineState::Terminated {
            self.retire();
        }
    }

    /// Moves the stack and entity of a just-terminated coroutine into the
    /// pool. Only default-sized stacks are pooled.
    fn retire(&self) {
        let stack = self.inner.stack.borrow_mut().take();
        if let Some(stack) = stack {
            if stack.size() == stack::DEFAULT_STACK_SIZE {
                pool::put(PooledCoroutine {
                    stack,
                    inner: Rc::clone(&self.inner),
                });
            }
        }
    }

    /// Returns the current state of the coroutine.
    pub fn state(&self) -> CoroutineState {
        self.inner.state.get()
    }

    /// Returns whether this coroutine has been entered at least once.
    pub fn started(&self) -> bool {
        self.inner.state.get() != CoroutineState::Created
    }

    /// Returns whether this coroutine has finished executing. A terminated
    /// coroutine can no longer be entered.
    pub fn is_terminated(&self) -> bool {
        self.inner.state.get() == CoroutineState::Terminated
    }
}

impl Clone for Coroutine {
    fn clone(&self) -> Self {
        Coroutine {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Handles compare by identity: two handles are equal if they refer to the
/// same coroutine.
impl PartialEq for Coroutine {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Coroutine {}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &Rc::as_ptr(&self.inner))
            .field("state", &self.inner.state.get())
            .finish()
    }
}

/// Suspends the currently running coroutine, returning control to whichever
/// context most recently entered it.
///
/// Returns the argument of the [`Coroutine::enter`] call that later resumes
/// the coroutine.
///
/// # Panics
///
/// Panics if called outside of a coroutine.
pub fn suspend() -> usize {
    let inner = current_inner().expect("suspend() called outside of a coroutine");
    debug_assert_eq!(inner.state.get(), CoroutineState::Running);
    let caller = inner.caller.get();
    debug_assert!(!caller.is_null());

    inner.state.set(CoroutineState::Yielded);
    let save_slot = inner.ctx.as_ptr();

    // Keep only a raw pointer across the switch. If every handle is dropped
    // while the coroutine is suspended, the entity and stack are reclaimed
    // and this frame never runs again; if it is resumed, the resuming enter
    // holds a handle that keeps the entity alive.
    let inner_ptr = Rc::as_ptr(&inner);
    drop(inner);

    unsafe {
        arch::switch_context(save_slot, caller);
        // Re-entered: the entry that resumed us has already marked the
        // coroutine running and stored its argument.
        (*inner_ptr).entry_arg.get()
    }
}

/// Returns a handle to the coroutine currently running on this thread, or
/// `None` when called outside of any coroutine.
pub fn current() -> Option<Coroutine> {
    current_inner().map(|inner| Coroutine { inner })
}

/// Returns `true` if the caller is executing inside a coroutine.
pub fn in_coroutine() -> bool {
    CURRENT.with(|c| {
        let cur = c.take();
        let out = cur.is_some();
        c.set(cur);
        out
    })
}

/// First function executed on every fresh coroutine stack.
///
/// Runs the entry function and performs the terminal switch back to the
/// caller link. Never returns: its only exit is a switch, after which the
/// stack below it is dead and may be reused.
unsafe extern "C" fn coroutine_trampoline() -> ! {
    // Hold the coroutine by raw pointer only: this stack is discarded at the
    // final switch below, so nothing on it may own a reference count. The
    // entity is kept alive by the handle of whichever context entered it.
    let co = CURRENT.with(|c| {
        let cur = c.take();
        let ptr = cur.as_ref().map(Rc::as_ptr);
        c.set(cur);
        ptr
    });
    let co = &*co.expect("coroutine trampoline executed with no current coroutine");

    let entry = co
        .entry
        .borrow_mut()
        .take()
        .expect("coroutine entered without an entry function");
    let arg = co.entry_arg.get();

    // A panic must not cross the context boundary: there is no frame below
    // this one to unwind into, and errors are never propagated between
    // contexts implicitly.
    if panic::catch_unwind(AssertUnwindSafe(|| entry(arg))).is_err() {
        eprintln!("fatal: coroutine entry function panicked");
        process::abort();
    }

    co.state.set(CoroutineState::Terminated);
    arch::switch_and_reset(co.caller.get())
}
