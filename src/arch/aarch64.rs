//! Low-level AArch64 support.
//!
//! This file mirrors the x86_64 implementation; refer to x86_64.rs for the
//! general scheme. The differences are the usual AArch64 ones: the resume
//! address lives in a register rather than being popped by RET, and X19 and
//! X29 are the two callee-saved registers that LLVM reserves and that must
//! therefore be saved by hand.
//!
//! ## Stack layout
//!
//! A suspended context stores its resumable state at the top of its own
//! stack. The saved stack pointer in the context slot points at the saved
//! X19:
//!
//! ```text
//! |             |
//! ~     ...     ~
//! |             |
//! +-------------+
//! | Padding     |
//! +-------------+
//! | Resume PC   |
//! +-------------+
//! | Saved X29   |
//! +-------------+
//! | Saved X19   |  <- Context slot points here.
//! +-------------+
//! ```
//!
//! A freshly initialized stack uses the same 32-byte record with the
//! trampoline entry point as the resume PC and zeroed X19/X29, so the first
//! switch into a context is indistinguishable from an ordinary resume.

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

    // Padding.
    push(&mut sp, None);

    // Resume PC: the trampoline entry point.
    push(&mut sp, Some(trampoline as usize as StackWord));

    // Initial X29 and X19. The trampoline establishes its own frame, so the
    // values are irrelevant; zero keeps any frame pointer walk terminated.
    push(&mut sp, Some(0));
    push(&mut sp, Some(0));

    sp
}

/// Saves the current execution context into `save_slot` and resumes the
/// context whose stack pointer is stored in `resume_slot`.
///
/// See the x86_64 version for the full contract.
#[inline]
pub unsafe fn switch_context(save_slot: *mut usize, resume_slot: *const usize) {
    asm!(
        // Save X19 and X29 while also reserving space on the stack for the
        // resume PC and padding. Ideally these would be specified as clobbers
        // but that is not possible since they are LLVM reserved registers.
        "stp x19, x29, [sp, #-32]!",

        // Write the address at which this context resumes to its slot in the
        // record we just reserved.
        "adr lr, 2f",
        "str lr, [sp, #16]",

        // Publish our stack pointer in the save slot.
        "mov x9, sp",
        "str x9, [x0]",

        // Load the target context's saved stack pointer and restore its
        // register record: resume PC into LR, then X19 and X29.
        "ldr x9, [x1]",
        "ldr lr, [x9, #16]",
        "ldp x19, x29, [x9]",

        // Switch to the target stack, popping its register record, and jump
        // to its resume address (or the trampoline on a first activation).
        "add sp, x9, #32",
        "ret",

        // Resume point. The context that switched back to us has already
        // restored our stack pointer, X19 and X29.
        "2:",

        in("x0") save_slot,
        in("x1") resume_slot,

        // Mark all remaining registers as clobbered. The clobber_abi() covers
        // the caller-saved half (including LR and the vector registers); the
        // callee-saved X20-X28 are listed here so the compiler spills them.
        lateout("x20") _, lateout("x21") _, lateout("x22") _, lateout("x23") _,
        lateout("x24") _, lateout("x25") _, lateout("x26") _, lateout("x27") _,
        lateout("x28") _,
        clobber_abi("C"),
    );
}

/// Resumes the context in `resume_slot` without saving the current one.
///
/// See the x86_64 version for the full contract.
#[inline]
pub unsafe fn switch_and_reset(resume_slot: *const usize) -> ! {
    asm!(
        "ldr x9, [x0]",
        "ldr lr, [x9, #16]",
        "ldp x19, x29, [x9]",
        "add sp, x9, #32",
        "ret",
        in("x0") resume_slot,
        options(noreturn),
    );
}
