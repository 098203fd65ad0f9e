use std::io::{Error, Result};
use std::ptr;

use super::{StackPointer, MIN_STACK_SIZE};

fn page_size() -> usize {
    let pagesize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    assert!(pagesize.is_power_of_two());
    pagesize
}

/// A coroutine stack allocated with `mmap`, with a guard page below it.
pub struct CoroutineStack {
    base: StackPointer,
    mmap_len: usize,
    size: usize,
}

impl CoroutineStack {
    /// Creates a new stack with at least the given usable capacity.
    pub fn new(size: usize) -> Result<Self> {
        // Apply minimum stack size.
        let size = size.max(MIN_STACK_SIZE);

        // Round the usable size up to a page boundary and add a guard page.
        let page_size = page_size();
        let size = size
            .checked_add(page_size - 1)
            .expect("integer overflow while calculating stack size")
            & !(page_size - 1);
        let mmap_len = size + page_size;

        // OpenBSD requires MAP_STACK on anything that is used as a stack.
        cfg_if::cfg_if! {
            if #[cfg(target_os = "openbsd")] {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_STACK;
            } else {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
            }
        }

        unsafe {
            // Reserve address space for the stack plus the guard page.
            let mmap = libc::mmap(ptr::null_mut(), mmap_len, libc::PROT_NONE, map_flags, -1, 0);
            if mmap == libc::MAP_FAILED {
                return Err(Error::last_os_error());
            }

            // Create the result here. If the mprotect call fails then this
            // will be dropped and the memory will be unmapped.
            let out = Self {
                base: StackPointer::new(mmap as usize + mmap_len).unwrap(),
                mmap_len,
                size,
            };

            // Make everything except the guard page writable.
            if libc::mprotect(
                mmap.cast::<u8>().add(page_size).cast(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
            ) != 0
            {
                return Err(Error::last_os_error());
            }

            Ok(out)
        }
    }

    /// Returns the base address of the stack. This is the highest address
    /// since stacks grow downwards, and it is aligned to
    /// [`STACK_ALIGNMENT`](super::STACK_ALIGNMENT).
    #[inline]
    pub fn base(&self) -> StackPointer {
        self.base
    }

    /// Returns the lowest usable address of the stack, just above the guard
    /// page.
    #[inline]
    pub fn limit(&self) -> StackPointer {
        StackPointer::new(self.base.get() - self.size).unwrap()
    }

    /// Returns the usable size of the stack, excluding the guard page.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for CoroutineStack {
    fn default() -> Self {
        Self::new(super::DEFAULT_STACK_SIZE).expect("failed to allocate stack")
    }
}

impl Drop for CoroutineStack {
    fn drop(&mut self) {
        unsafe {
            let mmap = self.base.get() - self.mmap_len;
            let ret = libc::munmap(mmap as _, self.mmap_len);
            debug_assert_eq!(ret, 0);
        }
    }
}
