//! A sharded block buffer cache and physical page allocator.
//!
//! Both subsystems shard their state to reduce contention and fall back
//! to a common discipline when a shard runs dry: release the local
//! shard's lock, acquire a single crate-wide `borrow_mutex` gate, then
//! try-lock peer shards one at a time until an idle resource turns up.
//! Holding at most one shard lock plus the gate at any moment is what
//! keeps this deadlock-free; see [`spinlock`] for the lock-ordering rule
//! itself.
//!
//! * [`buf`]: the buffer cache, sharded by `block_number mod NBUFBUCKET`.
//! * [`kalloc`]: the page allocator, sharded one freelist per CPU.

pub mod buf;
pub mod cpu;
pub mod disk;
pub mod error;
pub mod kalloc;
pub mod param;
pub mod sleeplock;
pub mod spinlock;

pub use buf::{Buffer, BufferCache};
pub use disk::{Disk, MemoryDisk};
pub use error::KernelError;
pub use kalloc::PageAllocator;
