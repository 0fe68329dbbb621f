//! Physical page allocator.
//!
//! Free pages are tracked as a linked list threaded through the pages
//! themselves: a free page's own first machine word stores the address of
//! the next free page, so freeing costs no separate bookkeeping
//! allocation. The freelist is sharded one-per-CPU; [`PageAllocator::alloc`]
//! and [`PageAllocator::free`] always touch the calling thread's own
//! shard first and only reach for `borrow_mutex` when the local shard is
//! empty, following the same local-shard/global-gate/peer-shard-steal
//! discipline as the buffer cache.
//!
//! Every page is poisoned on free (fill byte `1`) and on alloc (fill byte
//! `5`) so that use-after-free and use-of-uninitialized-memory bugs show
//! up as a shout instead of a whisper.

use std::alloc::{Layout, alloc as alloc_arena, dealloc};
use std::ptr;

use crate::cpu::current_cpu;
use crate::error::KernelError;
use crate::param::{CPUS, PGSIZE, pg_round_down, pg_round_up};
use crate::spinlock::SpinLock;

const FREE_POISON: u8 = 1;
const ALLOC_POISON: u8 = 5;

/// A free page's link to the next free page, stored in the page itself.
struct Run(*mut Run);

/// Head of one CPU's freelist. Wraps the raw pointer so the surrounding
/// `SpinLock` can be `Sync`; the pointer is only ever read or written
/// while that lock is held.
struct FreeListHead(*mut Run);

unsafe impl Send for FreeListHead {}

/// A sharded, page-granularity physical memory allocator.
pub struct PageAllocator {
    freelists: [SpinLock<FreeListHead>; CPUS],
    borrow_mutex: SpinLock<()>,
    base: usize,
    limit: usize,
    layout: Layout,
}

unsafe impl Send for PageAllocator {}
unsafe impl Sync for PageAllocator {}

impl PageAllocator {
    /// Reserves `total_pages` pages of backing storage and distributes
    /// them across the `CPUS` freelists in contiguous, page-aligned
    /// ranges, the last shard absorbing any remainder.
    ///
    /// # Panics
    /// Panics if `total_pages` is too small to give every CPU at least
    /// one page, or if the arena cannot be reserved.
    pub fn new(total_pages: usize) -> Self {
        assert!(
            total_pages >= CPUS,
            "page_init: need at least one page per cpu, got {total_pages} pages for {CPUS} cpus"
        );

        let arena_len = total_pages * PGSIZE;
        let layout =
            Layout::from_size_align(arena_len, PGSIZE).expect("page_init: invalid arena layout");
        let base = unsafe { alloc_arena(layout) };
        assert!(!base.is_null(), "page_init: failed to reserve page arena");
        let base = base as usize;
        let limit = base + arena_len;

        let allocator = Self {
            freelists: std::array::from_fn(|_| {
                SpinLock::new(FreeListHead(ptr::null_mut()), "kmem")
            }),
            borrow_mutex: SpinLock::new((), "kmem_borrow"),
            base,
            limit,
            layout,
        };

        let share = pg_round_down((limit - base) / CPUS);
        for cpu in 0..CPUS {
            let start = base + share * cpu;
            let end = if cpu == CPUS - 1 {
                limit
            } else {
                start + share
            };
            allocator.free_range(cpu, start, end);
        }
        allocator
    }

    fn free_range(&self, cpu: usize, start: usize, end: usize) {
        let mut addr = pg_round_up(start);
        while addr + PGSIZE <= end {
            self.push_free(cpu, addr);
            addr += PGSIZE;
        }
    }

    fn validate(&self, addr: usize) {
        assert!(
            addr.is_multiple_of(PGSIZE),
            "kfree: {addr:#x} is not page-aligned"
        );
        assert!(
            addr >= self.base && addr < self.limit,
            "kfree: {addr:#x} is outside the managed arena"
        );
    }

    fn push_free(&self, cpu: usize, addr: usize) {
        self.validate(addr);
        unsafe {
            ptr::write_bytes(addr as *mut u8, FREE_POISON, PGSIZE);
        }
        let run = addr as *mut Run;
        let mut head = self.freelists[cpu].lock();
        unsafe {
            (*run).0 = head.0;
        }
        head.0 = run;
    }

    fn pop(&self, cpu: usize) -> Option<usize> {
        let mut head = self.freelists[cpu].lock();
        if head.0.is_null() {
            return None;
        }
        let run = head.0;
        head.0 = unsafe { (*run).0 };
        Some(run as usize)
    }

    fn poison_alloc(&self, addr: usize) {
        unsafe {
            ptr::write_bytes(addr as *mut u8, ALLOC_POISON, PGSIZE);
        }
    }

    /// Allocates one physical page, returning its base address.
    ///
    /// Tries the calling thread's own CPU shard (per [`current_cpu`])
    /// first. If that shard is empty, acquires `borrow_mutex`, re-acquires
    /// the local shard (to preserve the lock-ordering discipline even
    /// though nothing is popped from it here), and scans every other
    /// shard for an idle page before giving up.
    pub fn alloc(&self) -> Result<usize, KernelError> {
        let cpu = current_cpu();
        if let Some(addr) = self.pop(cpu) {
            self.poison_alloc(addr);
            return Ok(addr);
        }

        let borrow_guard = self.borrow_mutex.lock();
        let local_guard = self.freelists[cpu].lock();
        let mut found = None;
        for j in (0..CPUS).filter(|&j| j != cpu) {
            if let Some(addr) = self.pop(j) {
                found = Some(addr);
                break;
            }
        }
        drop(borrow_guard);
        drop(local_guard);

        match found {
            Some(addr) => {
                self.poison_alloc(addr);
                Ok(addr)
            }
            None => Err(KernelError::OutOfMemory),
        }
    }

    /// Returns a page to the calling thread's own CPU shard.
    ///
    /// # Panics
    /// Panics if `addr` is not page-aligned or falls outside the managed
    /// arena: freeing garbage is a programmer error, not a recoverable
    /// condition.
    pub fn free(&self, addr: usize) {
        let cpu = current_cpu();
        self.push_free(cpu, addr);
    }

    /// Number of pages currently on `cpu`'s freelist. For tests.
    #[cfg(test)]
    fn free_list_len(&self, cpu: usize) -> usize {
        let head = self.freelists[cpu].lock();
        let mut count = 0;
        let mut run = head.0;
        while !run.is_null() {
            count += 1;
            run = unsafe { (*run).0 };
        }
        count
    }
}

impl Drop for PageAllocator {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.base as *mut u8, self.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::register_cpu;

    // Each #[test] runs on its own OS thread already, so registering the
    // calling thread directly (no nested spawn) is enough to give it a
    // CPU identity.
    fn with_cpu<R>(id: usize, f: impl FnOnce() -> R) -> R {
        register_cpu(id);
        f()
    }

    #[test]
    fn alloc_is_poisoned_and_distinct() {
        with_cpu(0, || {
            let allocator = PageAllocator::new(CPUS * 4);
            let a = allocator.alloc().unwrap();
            let b = allocator.alloc().unwrap();
            assert_ne!(a, b);
            let page = unsafe { std::slice::from_raw_parts(a as *const u8, PGSIZE) };
            assert!(page.iter().all(|&byte| byte == ALLOC_POISON));
        })
    }

    #[test]
    fn free_then_alloc_round_trips_and_reflects_in_freelist_length() {
        with_cpu(1, || {
            let allocator = PageAllocator::new(CPUS * 4);
            let before = allocator.free_list_len(1);
            let addr = allocator.alloc().unwrap();
            assert_eq!(allocator.free_list_len(1), before - 1);
            allocator.free(addr);
            assert_eq!(allocator.free_list_len(1), before);

            // push_free poisons the whole page, then overwrites its first
            // word with the freelist link; only the remainder stays pure
            // poison.
            let page = unsafe { std::slice::from_raw_parts(addr as *const u8, PGSIZE) };
            let link_size = std::mem::size_of::<usize>();
            assert!(page[link_size..].iter().all(|&byte| byte == FREE_POISON));
        })
    }

    #[test]
    fn borrows_from_peer_when_local_freelist_is_empty() {
        // With total_pages == CPUS, each shard starts with exactly one
        // page, so CPU 0's second alloc can only be satisfied by stealing
        // from another shard under borrow_mutex.
        with_cpu(0, || {
            let allocator = PageAllocator::new(CPUS);
            let first = allocator.alloc().unwrap();
            let second = allocator.alloc().unwrap();
            assert_ne!(first, second);
        })
    }

    #[test]
    fn exhaustion_is_recoverable_not_fatal() {
        with_cpu(0, || {
            let allocator = PageAllocator::new(CPUS);
            let mut pages = Vec::new();
            for _ in 0..CPUS {
                pages.push(allocator.alloc().unwrap());
            }
            assert_eq!(allocator.alloc(), Err(KernelError::OutOfMemory));
        })
    }

    #[test]
    #[should_panic(expected = "is not page-aligned")]
    fn misaligned_free_is_fatal() {
        with_cpu(0, || {
            let allocator = PageAllocator::new(CPUS);
            let addr = allocator.alloc().unwrap();
            allocator.free(addr + 1);
        })
    }
}
