//! Architecture-specific context switching.
//!
//! This module is the only place in the crate that manipulates raw execution
//! state (stack pointer, callee-saved registers, resume address). Everything
//! else is built strictly on top of the three operations exported here:
//!
//! - `init_stack` seeds a fresh stack so that the first switch into it starts
//!   executing the trampoline function.
//! - `switch_context` saves the currently executing context into one slot and
//!   resumes the context recorded in another slot.
//! - `switch_and_reset` resumes another context without saving the current
//!   one. Used for the final switch out of a terminating coroutine, whose
//!   stack is about to be reused or freed.
//!
//! A context slot is a single `usize` holding a stack pointer. All other
//! state of a suspended context (callee-saved registers and the address at
//! which it resumes) is stored on the suspended stack itself, just below the
//! saved stack pointer. A slot is therefore valid exactly while its owner is
//! suspended and becomes meaningless the moment the owner runs again.
//!
//! After `switch_context` returns, control has come back through a *later*
//! switch targeting our slot. Callers must not assume anything about which
//! context performed that switch, and must re-read any shared state that may
//! have changed while they were suspended.

use core::mem;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", not(windows)))] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(all(target_arch = "aarch64", not(windows)))] {
        mod aarch64;
        pub use self::aarch64::*;
    } else {
        compile_error!("Unsupported target");
    }
}

/// Signature of the function installed at the base of every fresh stack by
/// `init_stack`. It must never return: there is no frame below it to return
/// into.
pub type TrampolineFunc = unsafe extern "C" fn() -> !;

/// Helper function to push a value onto a stack.
#[inline]
unsafe fn push(sp: &mut usize, val: Option<StackWord>) {
    *sp -= mem::size_of::<StackWord>();
    if let Some(val) = val {
        *(*sp as *mut StackWord) = val;
    }
}
