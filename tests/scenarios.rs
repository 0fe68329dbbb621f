//! End-to-end scenarios against the public API only, as opposed to the
//! module-internal unit tests alongside `buf.rs` and `kalloc.rs`.

use std::sync::Arc;

use kshard::cpu::register_cpu;
use kshard::disk::MemoryDisk;
use kshard::kalloc::PageAllocator;
use kshard::param::{CPUS, NBUF, NBUFBUCKET};
use kshard::{BufferCache, Disk};

#[test]
fn hit_after_miss_returns_same_payload_without_a_second_disk_read() {
    let disk = Arc::new(MemoryDisk::new());
    disk.write(0, 2, &{
        let mut block = [0u8; kshard::param::BSIZE];
        block[0] = 7;
        block
    });
    let cache = BufferCache::new(disk.clone());

    let buf = cache.read(0, 2);
    assert_eq!(buf.data()[0], 7);
    drop(buf);

    let writes_before = disk.written_block_count();
    let buf = cache.read(0, 2);
    assert_eq!(buf.data()[0], 7);
    assert_eq!(disk.written_block_count(), writes_before);
}

#[test]
fn write_through_persists_to_disk_and_to_cache() {
    let disk = Arc::new(MemoryDisk::new());
    let cache = BufferCache::new(disk.clone());

    {
        let mut buf = cache.read(1, 9);
        buf.data_mut()[10] = 0x42;
        buf.write();
    }

    let mut raw = [0u8; kshard::param::BSIZE];
    disk.read(1, 9, &mut raw);
    assert_eq!(raw[10], 0x42);

    let buf = cache.read(1, 9);
    assert_eq!(buf.data()[10], 0x42);
}

#[test]
fn full_bucket_borrows_an_idle_buffer_from_a_sibling_bucket() {
    let cache = BufferCache::new(Arc::new(MemoryDisk::new()));
    let per_bucket = NBUF / NBUFBUCKET + usize::from(!NBUF.is_multiple_of(NBUFBUCKET));

    // Fill every slot that hashes to bucket 0 and hold all of them live.
    let held: Vec<_> = (0..per_bucket as u32)
        .map(|k| cache.read(0, k * NBUFBUCKET as u32))
        .collect();

    // One more block hashing to bucket 0 cannot be satisfied locally; a
    // sibling bucket, untouched so far, has idle buffers to lend.
    let borrowed = cache.read(0, per_bucket as u32 * NBUFBUCKET as u32);
    assert_eq!(borrowed.block_number() % NBUFBUCKET as u32, 0);

    drop(borrowed);
    drop(held);
}

#[test]
fn allocator_borrows_across_cpus_then_reports_out_of_memory() {
    register_cpu(0);
    let allocator = PageAllocator::new(CPUS);

    let mut pages = Vec::new();
    for _ in 0..CPUS {
        pages.push(
            allocator
                .alloc()
                .expect("arena seeded with exactly CPUS pages"),
        );
    }
    // Every page, across every CPU's shard, is now checked out: CPU 0's
    // own shard is empty and so is everyone else's.
    assert!(allocator.alloc().is_err());
}

#[test]
#[should_panic(expected = "is not page-aligned")]
fn freeing_a_misaligned_address_is_a_fatal_programmer_error() {
    register_cpu(0);
    let allocator = PageAllocator::new(CPUS);
    let addr = allocator.alloc().unwrap();
    allocator.free(addr + 1);
}
