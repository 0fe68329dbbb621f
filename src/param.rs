//! Compile-time parameters shared by the buffer cache and page allocator.
//!
//! Fixed constants, not a runtime configuration layer: both subsystems
//! size their backing storage once and never resize it.

/// Total number of cached buffers.
pub const NBUF: usize = 30;

/// Number of hash buckets the buffer cache shards across.
///
/// Recommended to be a small prime so `block_number mod NBUFBUCKET`
/// spreads load evenly.
pub const NBUFBUCKET: usize = 13;

/// File-system block size, in bytes. One buffer's payload is one block.
pub const BSIZE: usize = 1024;

/// Number of logical CPU slots the page allocator shards across.
pub const CPUS: usize = 8;

/// Physical page size, in bytes.
pub const PGSIZE: usize = 4096;

/// Round `addr` up to the next multiple of [`PGSIZE`].
pub const fn pg_round_up(addr: usize) -> usize {
    (addr + PGSIZE - 1) & !(PGSIZE - 1)
}

/// Round `addr` down to a multiple of [`PGSIZE`].
pub const fn pg_round_down(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}
