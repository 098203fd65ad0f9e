//! Per-thread free list of retired coroutines.
//!
//! Creating a coroutine stack costs an `mmap` and an `mprotect`; on the hot
//! create→run→terminate path that dominates everything else. Terminated
//! coroutines are therefore retired into a thread-local pool and `create`
//! pulls from it before falling back to fresh allocation.
//!
//! The pool belongs to exactly one thread. It is never shared, never merged
//! with another thread's pool, and is torn down together with the thread.
//! Only stacks of [`DEFAULT_STACK_SIZE`](crate::stack::DEFAULT_STACK_SIZE)
//! are pooled; custom-sized stacks bypass the pool in both directions.

use std::cell::RefCell;
use std::rc::Rc;

use crate::coroutine::CoroutineInner;
use crate::stack::CoroutineStack;

/// Maximum number of retired coroutines kept per thread. Enough to keep the
/// create/terminate cycle allocation-free at steady state while bounding
/// memory across arbitrarily many cycles.
const POOL_BATCH_SIZE: usize = 64;

/// A retired coroutine: its stack, plus the entity object which may be
/// reused if no stale handles to it remain.
pub(crate) struct PooledCoroutine {
    pub(crate) stack: CoroutineStack,
    pub(crate) inner: Rc<CoroutineInner>,
}

thread_local! {
    static POOL: RefCell<Vec<PooledCoroutine>> = const { RefCell::new(Vec::new()) };
}

/// Pops a retired coroutine, if any.
pub(crate) fn take() -> Option<PooledCoroutine> {
    POOL.with(|pool| pool.borrow_mut().pop())
}

/// Retires a terminated coroutine. Dropped on the floor if the pool is full.
pub(crate) fn put(retired: PooledCoroutine) {
    POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < POOL_BATCH_SIZE {
            pool.push(retired);
        }
    });
}

#[cfg(test)]
pub(crate) fn len() -> usize {
    POOL.with(|pool| pool.borrow().len())
}
