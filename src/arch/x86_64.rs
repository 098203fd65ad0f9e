//! Low-level x86_64 (SysV) support.
//!
//! ## Stack layout
//!
//! A suspended context stores its resumable state at the top of its own
//! stack. The saved stack pointer in the context slot points at the resume
//! address:
//!
//! ```text
//! |             |
//! ~     ...     ~
//! |             |
//! +-------------+
//! | Saved RBP   |
//! +-------------+
//! | Saved RBX   |
//! +-------------+
//! | Resume RIP  |  <- Context slot points here.
//! +-------------+
//! ```
//!
//! The remaining callee-saved registers (R12-R15) and all caller-saved state
//! are spilled by the compiler around the inline assembly blocks via the
//! clobber lists, so they need no explicit slots in this layout.
//!
//! A freshly initialized stack looks like this:
//!
//! ```text
//! +--------------+  <- Stack base
//! | Padding      |
//! +--------------+
//! | Trampoline   |  <- Initial stack pointer. Popped by the RET that
//! +--------------+     performs the first switch into this context.
//! ```
//!
//! The padding word keeps RSP congruent to 8 (mod 16) at the trampoline
//! entry point, exactly as if it had been reached by a CALL instruction.

use core::arch::asm;

use super::{push, TrampolineFunc};
use crate::stack::StackPointer;

pub const STACK_ALIGNMENT: usize = 16;
pub type StackWord = u64;

/// Sets up the initial state on a stack so that the trampoline is executed
/// on the first switch to this stack.
///
/// Returns the stack pointer value to store in the new context's slot.
#[inline]
pub unsafe fn init_stack(base: StackPointer, trampoline: TrampolineFunc) -> usize {
    let mut sp = base.get();
    debug_assert_eq!(sp % STACK_ALIGNMENT, 0);

    // Padding to give the trampoline the post-CALL alignment it expects.
    push(&mut sp, None);

    // Entry point jumped to by the RET in switch_context().
    push(&mut sp, Some(trampoline as usize as StackWord));

    sp
}

/// Saves the current execution context into `save_slot` and resumes the
/// context whose stack pointer is stored in `resume_slot`.
///
/// When this function returns, control has come back via a later switch
/// targeting `save_slot`. `resume_slot` must hold the stack pointer of a
/// context that is suspended (or freshly initialized) and is resumed by
/// nothing else.
#[inline]
pub unsafe fn switch_context(save_slot: *mut usize, resume_slot: *const usize) {
    asm!(
        // Save RBP and RBX. Ideally this would be done by specifying them as
        // clobbers but that is not possible since they are LLVM reserved
        // registers.
        "push rbp",
        "push rbx",

        // Push the address at which this context resumes.
        "lea rax, [rip + 2f]",
        "push rax",

        // Publish our stack pointer in the save slot.
        "mov [rdi], rsp",

        // Load the target context's stack pointer and return into it. The
        // word at the top of the target stack is either the resume address
        // pushed when it suspended or the trampoline entry point installed by
        // init_stack().
        "mov rsp, [rsi]",
        "ret",

        // Resume point. Whoever switches back to us has already loaded our
        // stack pointer, so only RBX and RBP are left to restore.
        "2:",
        "pop rbx",
        "pop rbp",

        in("rdi") save_slot,
        in("rsi") resume_slot,

        // Mark all remaining registers as clobbered. Most of the work is done
        // by clobber_abi, we just add the callee-saved registers here. Doing
        // this is more efficient than manually saving them: the compiler can
        // avoid repeated saves and restores when multiple context switches
        // are performed from the same function.
        lateout("r12") _, lateout("r13") _, lateout("r14") _, lateout("r15") _,
        clobber_abi("sysv64"),
    );
}

/// Resumes the context in `resume_slot` without saving the current one.
///
/// Used for the final switch out of a terminated coroutine. Since the
/// current stack is never resumed again, nothing needs to be preserved; the
/// stack may be freed or reused by the resumed context. There must not be
/// any object with a pending destructor left on it.
#[inline]
pub unsafe fn switch_and_reset(resume_slot: *const usize) -> ! {
    asm!(
        "mov rsp, [{resume}]",
        "ret",
        resume = in(reg) resume_slot,
        options(noreturn),
    );
}
