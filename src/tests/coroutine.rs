use std::cell::{Cell, RefCell};
use std::hint::black_box;
use std::rc::Rc;
use std::thread;

use crate::{current, in_coroutine, suspend, Coroutine, CoroutineState};

#[test]
fn lifecycle() {
    let done = Rc::new(Cell::new(false));

    // Create, enter, and return from a coroutine.
    let done2 = done.clone();
    let coroutine = Coroutine::new(move |_| done2.set(true));
    assert!(!coroutine.started());
    coroutine.enter(0);
    assert!(done.get());
    assert!(coroutine.is_terminated());

    // Repeat to check that no state leaks from one run into the next.
    done.set(false);
    let done2 = done.clone();
    let coroutine = Coroutine::new(move |_| done2.set(true));
    coroutine.enter(0);
    assert!(done.get());
    assert!(coroutine.is_terminated());
}

#[test]
fn in_coroutine_tracking() {
    assert!(!in_coroutine());
    assert!(current().is_none());

    let coroutine = Coroutine::new(|_| {
        assert!(in_coroutine());
        suspend();
        assert!(in_coroutine());
    });
    coroutine.enter(0);
    assert!(!in_coroutine());
    assert!(current().is_none());
    coroutine.enter(0);
    assert!(!in_coroutine());
    assert!(current().is_none());
}

#[test]
fn coroutine_self() {
    let slot: Rc<RefCell<Option<Coroutine>>> = Rc::new(RefCell::new(None));
    let slot2 = slot.clone();
    let coroutine = Coroutine::new(move |_| {
        *slot2.borrow_mut() = current();
    });
    coroutine.enter(0);
    assert_eq!(slot.borrow().as_ref(), Some(&coroutine));
}

#[test]
fn yield_five_times() {
    let done = Rc::new(Cell::new(false));
    let done2 = done.clone();
    let coroutine = Coroutine::new(move |_| {
        for _ in 0..5 {
            suspend();
        }
        done2.set(true);
    });

    // One extra iteration to return from the coroutine.
    let mut i = -1;
    while !done.get() {
        coroutine.enter(0);
        i += 1;
    }
    assert_eq!(i, 5);
}

#[test]
fn argument_protocol() {
    let seen: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let seen2 = seen.clone();
    let coroutine = Coroutine::new(move |first| {
        seen2.borrow_mut().push(first);
        let next = suspend();
        seen2.borrow_mut().push(next);
        let last = suspend();
        seen2.borrow_mut().push(last);
    });
    coroutine.enter(10);
    coroutine.enter(20);
    coroutine.enter(30);
    assert!(coroutine.is_terminated());
    assert_eq!(*seen.borrow(), [10, 20, 30]);
}

struct NestData {
    n_enter: Cell<u32>,
    n_return: Cell<u32>,
    max: u32,
}

fn nest(nd: Rc<NestData>) {
    nd.n_enter.set(nd.n_enter.get() + 1);

    if nd.n_enter.get() < nd.max {
        let nd2 = nd.clone();
        let child = Coroutine::new(move |_| nest(nd2));
        child.enter(0);
    }

    nd.n_return.set(nd.n_return.get() + 1);
}

#[test]
fn nesting() {
    let nd = Rc::new(NestData {
        n_enter: Cell::new(0),
        n_return: Cell::new(0),
        max: 128,
    });

    let nd2 = nd.clone();
    let root = Coroutine::new(move |_| nest(nd2));
    root.enter(0);

    // Must enter and return from the maximum nesting level.
    assert_eq!(nd.n_enter.get(), nd.max);
    assert_eq!(nd.n_return.get(), nd.max);
}

#[test]
fn ordering() {
    let records: Rc<RefCell<Vec<(u32, u32)>>> = Rc::new(RefCell::new(Vec::new()));

    let rec = records.clone();
    let coroutine = Coroutine::new(move |_| {
        rec.borrow_mut().push((2, 1));
        assert!(in_coroutine());
        suspend();
        rec.borrow_mut().push((2, 2));
        assert!(in_coroutine());
    });

    records.borrow_mut().push((1, 1));
    coroutine.enter(0);
    records.borrow_mut().push((1, 2));
    assert!(!in_coroutine());
    coroutine.enter(0);
    records.borrow_mut().push((1, 3));
    assert!(!in_coroutine());

    assert_eq!(*records.borrow(), [(1, 1), (2, 1), (1, 2), (2, 2), (1, 3)]);
}

/// A coroutine suspended by one caller must be resumable by another caller
/// after the first caller has terminated and its object and stack have been
/// recycled.
#[test]
fn caller_rebinding() {
    let c2 = Coroutine::new(|_| {
        suspend();
    });

    let c2_handle = c2.clone();
    let c1 = Coroutine::new(move |_| {
        c2_handle.enter(0);
    });

    // c1 enters c2; c2 yields back into c1, which then returns. Control
    // arrives here with c1 terminated and c2 still suspended, its stale
    // caller link pointing into c1.
    c1.enter(0);
    assert!(c1.is_terminated());
    assert_eq!(c2.state(), CoroutineState::Yielded);

    // Recycle c1's entity and stack through the pool and scribble over them
    // with an unrelated coroutine.
    drop(c1);
    let filler = Coroutine::new(|_| {
        black_box([0xffu8; 256]);
    });
    filler.enter(0);

    // Entering c2 directly must rebind its return target to us, not to
    // whatever is left of c1.
    c2.enter(0);
    assert!(c2.is_terminated());
    assert!(!in_coroutine());
}

#[test]
fn nested_states() {
    let child = Coroutine::new(|_| {
        suspend();
    });

    let child2 = child.clone();
    let parent = Coroutine::new(move |_| {
        let me = current().unwrap();
        assert_eq!(me.state(), CoroutineState::Running);

        child2.enter(0);
        assert_eq!(child2.state(), CoroutineState::Yielded);

        // The parent is the innermost coroutine again.
        assert_eq!(current().unwrap(), me);
        suspend();
    });

    parent.enter(0);
    assert_eq!(parent.state(), CoroutineState::Yielded);
    assert_eq!(child.state(), CoroutineState::Yielded);

    parent.enter(0);
    assert!(parent.is_terminated());

    child.enter(0);
    assert!(child.is_terminated());
}

#[test]
#[should_panic(expected = "terminated")]
fn enter_terminated() {
    let coroutine = Coroutine::new(|_| {});
    coroutine.enter(0);
    coroutine.enter(0);
}

#[test]
#[should_panic(expected = "outside of a coroutine")]
fn suspend_outside_coroutine() {
    suspend();
}

fn recursive_stack_growth(n: usize) {
    if n == 0 {
        return;
    }

    suspend();

    let mut buf = [0u8; 4096];
    // Keep the buffer alive across the recursive call so every frame stays
    // on the stack, and keep the call from becoming a tail call.
    black_box(buf.as_mut_ptr());
    recursive_stack_growth(n - 1);
    black_box(buf.as_ptr());
}

fn stack_growth_driver() {
    let done: [Rc<Cell<bool>>; 2] = [Rc::new(Cell::new(false)), Rc::new(Cell::new(false))];
    let coroutines: Vec<Coroutine> = done
        .iter()
        .map(|done| {
            let done = done.clone();
            // Grow each stack to most of a megabyte in 4 KiB chunks.
            Coroutine::new(move |_| {
                recursive_stack_growth(200);
                done.set(true);
            })
        })
        .collect();

    // Interleave the two coroutines so their deep stacks are live at the
    // same time.
    while !done[0].get() || !done[1].get() {
        for (coroutine, done) in coroutines.iter().zip(&done) {
            if !done.get() {
                coroutine.enter(0);
            }
        }
    }
}

#[test]
fn stack_growth() {
    let threads: Vec<_> = (0..4).map(|_| thread::spawn(stack_growth_driver)).collect();
    for thread in threads {
        thread.join().unwrap();
    }
}

#[test]
fn custom_stack_size() {
    // A large stack, with recursion too deep for the default size.
    let coroutine = Coroutine::with_stack_size(4 * 1024 * 1024, |_| {
        fn grow(n: usize) {
            if n == 0 {
                return;
            }
            let mut buf = [0u8; 4096];
            black_box(buf.as_mut_ptr());
            grow(n - 1);
            black_box(buf.as_ptr());
        }
        grow(500);
    });
    coroutine.enter(0);
    assert!(coroutine.is_terminated());

    // A small stack is enough for a trivial body.
    let coroutine = Coroutine::with_stack_size(64 * 1024, |_| {});
    coroutine.enter(0);
    assert!(coroutine.is_terminated());
}

/// Sequentially creating and terminating many coroutines must not grow
/// memory without bound: the pool caps retained coroutines and recycles
/// them.
#[test]
fn create_terminate_cycles() {
    let counter = Rc::new(Cell::new(0u32));
    for _ in 0..100_000 {
        let counter = counter.clone();
        let coroutine = Coroutine::new(move |_| counter.set(counter.get() + 1));
        coroutine.enter(0);
        assert!(coroutine.is_terminated());
    }
    assert_eq!(counter.get(), 100_000);
    assert!(crate::pool::len() <= 64);
}

/// Each thread drives its own independent coroutine set; nothing is shared.
#[test]
fn independent_threads() {
    let threads: Vec<_> = (0..4)
        .map(|t| {
            thread::spawn(move || {
                let trace: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
                for i in 0..1000 {
                    let trace = trace.clone();
                    let coroutine = Coroutine::new(move |arg| {
                        trace.borrow_mut().push(arg);
                        suspend();
                        trace.borrow_mut().push(arg + 1);
                    });
                    coroutine.enter(t * 10_000 + i);
                    coroutine.enter(0);
                }
                assert_eq!(trace.borrow().len(), 2000);
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
}
