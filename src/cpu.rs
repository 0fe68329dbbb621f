//! Logical CPU identity for the page allocator's per-CPU sharding.
//!
//! Callers of `alloc` and `free` must not migrate between the
//! current-CPU read and the freelist access it guards. There is no
//! interrupt controller here to enforce that by disabling interrupts, so
//! instead each OS thread that wants to act as a given logical CPU
//! registers itself with [`register_cpu`] before calling into the
//! allocator, and must not change that registration mid-call.

use crate::param::CPUS;
use std::cell::Cell;

thread_local! {
    static CURRENT_CPU: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Binds the calling thread to logical CPU `id` for subsequent
/// [`current_cpu`] reads.
///
/// # Panics
/// Panics if `id >= CPUS`.
pub fn register_cpu(id: usize) {
    assert!(id < CPUS, "register_cpu: {id} out of range");
    CURRENT_CPU.with(|c| c.set(Some(id)));
}

/// Returns the logical CPU the calling thread is currently bound to.
///
/// # Panics
/// Panics if the calling thread never called [`register_cpu`]. A thread
/// with no registered CPU has no way to honor the pinned-CPU calling
/// convention the allocator depends on.
pub fn current_cpu() -> usize {
    CURRENT_CPU
        .with(|c| c.get())
        .expect("current_cpu: thread is not registered to a CPU; call register_cpu first")
}
