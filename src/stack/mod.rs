//! Stacks used by coroutines.
//!
//! Every coroutine owns a [`CoroutineStack`]: a fixed-size, exclusively owned
//! memory region with a guard page at its lower end. The guard page turns a
//! stack overflow into a fault instead of silent corruption of adjacent
//! memory. Stacks are never grown and never shared between coroutines.

use core::num::NonZeroUsize;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use self::unix::CoroutineStack;
    } else {
        compile_error!("No stack implementation for this platform");
    }
}

/// Type to represent a stack address.
pub type StackPointer = NonZeroUsize;

/// Required stack alignment at function call boundaries.
pub const STACK_ALIGNMENT: usize = crate::arch::STACK_ALIGNMENT;

/// Minimum usable size of a stack, excluding the guard page.
pub const MIN_STACK_SIZE: usize = 4096;

/// Default usable size of a coroutine stack, excluding the guard page.
///
/// Large enough for roughly a megabyte of live frames through ordinary
/// (non-tail) recursive calls, which is what deeply recursive workloads on
/// top of this crate have been observed to need.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

#[test]
fn assert_send_sync() {
    fn send<T: Send>() {}
    fn sync<T: Sync>() {}
    send::<CoroutineStack>();
    sync::<CoroutineStack>();
}
