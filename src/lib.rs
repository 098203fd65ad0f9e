//! Stackful, cooperative coroutines with symmetric control transfer.
//!
//! ## Overview
//!
//! This crate provides the primitive underneath sequential-looking
//! asynchronous code: an execution context with its own call stack that can
//! suspend itself at any point and be resumed later by whoever holds a
//! handle to it. Control transfer is symmetric and explicit: [`enter`]
//! blocks the calling context until the coroutine yields or terminates, and
//! [`suspend`] returns control to whichever context performed the most
//! recent entry. There is no scheduler and no preemption; on any one thread
//! exactly one context executes at a time.
//!
//! Every entry rebinds the coroutine's return target to the entering
//! context. A coroutine suspended by one caller can therefore be resumed
//! directly by a completely different caller, even after the original
//! caller has terminated and its resources have been recycled, and its next
//! yield or termination transfers control to the new caller.
//!
//! Terminated coroutines and their stacks are recycled through a per-thread
//! pool, keeping the create→run→terminate cycle allocation-free at steady
//! state. Coroutines never migrate between threads; handles are `!Send`, so
//! the pool and the current-coroutine registry need no locking.
//!
//! [`enter`]: Coroutine::enter
//!
//! ## Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use corostack::{in_coroutine, suspend, Coroutine};
//!
//! let done = Rc::new(Cell::new(false));
//! let done2 = done.clone();
//! let coroutine = Coroutine::new(move |_| {
//!     assert!(in_coroutine());
//!     for _ in 0..5 {
//!         suspend();
//!     }
//!     done2.set(true);
//! });
//!
//! // One entry to start the coroutine, one per yield.
//! let mut entries = 0;
//! while !done.get() {
//!     coroutine.enter(0);
//!     entries += 1;
//! }
//! assert_eq!(entries, 6);
//! assert!(coroutine.is_terminated());
//! assert!(!in_coroutine());
//! ```
//!
//! ## Passing values
//!
//! Each entry carries one opaque, register-sized word. The first entry's
//! word is the argument of the entry function; the word of every later entry
//! becomes the return value of the [`suspend`] call it resumes. Anything
//! larger travels through memory the caller controls, typically captured by
//! the entry closure.
//!
//! ## What this crate is not
//!
//! There is no I/O multiplexing, no timers, no cancellation and no panic
//! propagation across contexts: a panic that unwinds out of an entry
//! function aborts the process. A coroutine that never yields and never
//! returns blocks its thread; guaranteeing termination is the caller's
//! responsibility.
//!
//! ## Supported targets
//!
//! x86_64 and AArch64 on non-Windows platforms.

#![warn(missing_docs)]

mod arch;
mod coroutine;
mod pool;
pub mod stack;

pub use coroutine::{current, in_coroutine, suspend, Coroutine, CoroutineState};

#[cfg(test)]
mod tests;
