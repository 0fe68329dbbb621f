//! Buffer cache.
//!
//! The buffer cache mediates every access to on-disk blocks. Caching
//! blocks in memory reduces disk reads and gives concurrent file-system
//! operations a synchronization point per block.
//!
//! The cache is sharded into [`NBUFBUCKET`] buckets on `block_number mod
//! NBUFBUCKET`. Each bucket is an independent, spin-lock-protected, MRU-
//! ordered list of buffers; a lookup or eviction only ever touches its own
//! bucket. When a bucket has nothing left to evict, it borrows an idle
//! buffer from a peer bucket under the crate-wide `borrow_mutex` gate;
//! see the module-level lock-ordering discussion in [`crate::spinlock`].
//!
//! Interface:
//! * To get a buffer for a particular disk block, call [`BufferCache::read`].
//! * After changing buffer data, call [`Buffer::write`] to write it to disk.
//! * When done with the buffer, drop it (or call [`BufferCache::release`]).
//! * Do not use the buffer after dropping it.
//! * Only one holder at a time can use a buffer's payload, so do not keep
//!   one checked out longer than necessary.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::disk::Disk;
use crate::param::{BSIZE, NBUF, NBUFBUCKET};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::SpinLock;

/// One block's worth of cached payload.
pub struct BufData(pub [u8; BSIZE]);

impl Default for BufData {
    fn default() -> Self {
        Self([0; BSIZE])
    }
}

impl std::ops::Deref for BufData {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &[u8; BSIZE] {
        &self.0
    }
}

impl std::ops::DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut [u8; BSIZE] {
        &mut self.0
    }
}

/// Buffer metadata: identity, validity, and refcount. `slot` is the
/// buffer's fixed index into the cache's payload pool.
#[derive(Clone, Copy, Debug)]
struct BufMeta {
    slot: usize,
    device_id: u32,
    block_number: u32,
    valid: bool,
    refcount: u32,
}

/// The buffer cache.
pub struct BufferCache {
    buckets: [SpinLock<VecDeque<BufMeta>>; NBUFBUCKET],
    borrow_mutex: SpinLock<()>,
    payload: Vec<SleepLock<BufData>>,
    disk: Arc<dyn Disk>,
}

fn bucket_of(block_number: u32) -> usize {
    block_number as usize % NBUFBUCKET
}

impl BufferCache {
    /// Distributes the `NBUF` buffers across `NBUFBUCKET` buckets as
    /// evenly as possible: the first `NBUF mod NBUFBUCKET` buckets get
    /// `ceil(NBUF / NBUFBUCKET)` buffers, the rest get the floor.
    pub fn new(disk: Arc<dyn Disk>) -> Self {
        let payload = (0..NBUF)
            .map(|_| SleepLock::new(BufData::default()))
            .collect();

        let base = NBUF / NBUFBUCKET;
        let extra = NBUF % NBUFBUCKET;
        let mut slot = 0;
        let mut lists: [VecDeque<BufMeta>; NBUFBUCKET] = std::array::from_fn(|_| VecDeque::new());
        for (i, list) in lists.iter_mut().enumerate() {
            let count = base + usize::from(i < extra);
            for _ in 0..count {
                list.push_back(BufMeta {
                    slot,
                    device_id: 0,
                    block_number: 0,
                    valid: false,
                    refcount: 0,
                });
                slot += 1;
            }
        }

        Self {
            buckets: lists.map(|list| SpinLock::new(list, "bcache_bucket")),
            borrow_mutex: SpinLock::new((), "bcache_borrow"),
            payload,
            disk,
        }
    }

    /// Looks through the buffer cache for `(device_id, block_number)`. If
    /// not found, allocates a buffer (locally if possible, else by
    /// borrowing from a peer bucket). Returns the buffer locked.
    fn bget(&self, device_id: u32, block_number: u32) -> Buffer<'_> {
        let i = bucket_of(block_number);
        let mut bucket = self.buckets[i].lock();

        if let Some(pos) = bucket
            .iter()
            .position(|m| m.device_id == device_id && m.block_number == block_number)
        {
            bucket[pos].refcount += 1;
            let slot = bucket[pos].slot;
            drop(bucket);
            return self.checked_out(i, slot, device_id, block_number);
        }

        // Local-miss LRU path: scan from the tail (LRU) toward the head.
        if let Some(pos) = bucket
            .iter()
            .enumerate()
            .rev()
            .find(|(_, m)| m.refcount == 0)
            .map(|(pos, _)| pos)
        {
            let slot = {
                let meta = &mut bucket[pos];
                meta.device_id = device_id;
                meta.block_number = block_number;
                meta.valid = false;
                meta.refcount = 1;
                meta.slot
            };
            drop(bucket);
            return self.checked_out(i, slot, device_id, block_number);
        }

        // Borrow path: no idle buffer in our own bucket.
        let borrow_guard = self.borrow_mutex.lock();
        for j in (0..NBUFBUCKET).filter(|&j| j != i) {
            let Some(mut peer) = self.buckets[j].try_lock() else {
                continue;
            };
            let Some(pos) = peer
                .iter()
                .enumerate()
                .rev()
                .find(|(_, m)| m.refcount == 0)
                .map(|(pos, _)| pos)
            else {
                continue;
            };

            let mut meta = peer.remove(pos).expect("position came from this deque");
            drop(peer);
            meta.device_id = device_id;
            meta.block_number = block_number;
            meta.valid = false;
            meta.refcount = 1;
            let slot = meta.slot;
            bucket.push_front(meta);

            drop(borrow_guard);
            drop(bucket);
            return self.checked_out(i, slot, device_id, block_number);
        }

        panic!("bcache: no buffers");
    }

    fn checked_out(
        &self,
        bucket: usize,
        slot: usize,
        device_id: u32,
        block_number: u32,
    ) -> Buffer<'_> {
        let guard = self.payload[slot].lock();
        Buffer {
            cache: self,
            bucket,
            slot,
            device_id,
            block_number,
            guard: Some(guard),
        }
    }

    /// Returns a locked buffer with the contents of the indicated block.
    pub fn read(&self, device_id: u32, block_number: u32) -> Buffer<'_> {
        let mut buf = self.bget(device_id, block_number);

        let valid = self.meta(buf.bucket, buf.slot, |m| m.valid);
        if !valid {
            self.disk
                .read(device_id, block_number, buf.guard.as_mut().unwrap());
            self.meta_mut(buf.bucket, buf.slot, |m| m.valid = true);
        }
        buf
    }

    /// Releases a locked buffer. Called automatically on [`Buffer`] drop.
    /// Moves the buffer to the head (MRU) of its bucket once refcount
    /// reaches zero.
    fn release(&self, bucket: usize, slot: usize) {
        let mut list = self.buckets[bucket].lock();
        let pos = list
            .iter()
            .position(|m| m.slot == slot)
            .expect("release: buffer missing from its own bucket");
        list[pos].refcount -= 1;
        if list[pos].refcount == 0 {
            let meta = list.remove(pos).expect("position came from this deque");
            list.push_front(meta);
        }
    }

    /// Artificially increments a buffer's refcount so it is not recycled,
    /// without touching its sleep-lock. Used to keep dirty buffers
    /// resident across log commit boundaries.
    pub fn pin(&self, buf: &Buffer<'_>) {
        self.meta_mut(buf.bucket, buf.slot, |m| m.refcount += 1);
    }

    /// Undoes a prior [`BufferCache::pin`].
    pub fn unpin(&self, buf: &Buffer<'_>) {
        self.meta_mut(buf.bucket, buf.slot, |m| m.refcount -= 1);
    }

    fn meta<R>(&self, bucket: usize, slot: usize, f: impl FnOnce(&BufMeta) -> R) -> R {
        let list = self.buckets[bucket].lock();
        let m = list
            .iter()
            .find(|m| m.slot == slot)
            .expect("buffer missing from its bucket");
        f(m)
    }

    fn meta_mut<R>(&self, bucket: usize, slot: usize, f: impl FnOnce(&mut BufMeta) -> R) -> R {
        let mut list = self.buckets[bucket].lock();
        let m = list
            .iter_mut()
            .find(|m| m.slot == slot)
            .expect("buffer missing from its bucket");
        f(m)
    }
}

/// A checked-out buffer: the per-buffer sleep-lock is held for the
/// lifetime of this handle.
pub struct Buffer<'a> {
    cache: &'a BufferCache,
    bucket: usize,
    slot: usize,
    device_id: u32,
    block_number: u32,
    guard: Option<SleepLockGuard<'a, BufData>>,
}

impl Buffer<'_> {
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn block_number(&self) -> u32 {
        self.block_number
    }

    pub fn data(&self) -> &[u8; BSIZE] {
        self.guard.as_ref().unwrap()
    }

    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        self.guard.as_mut().unwrap()
    }

    /// Writes this buffer's payload to disk. The handle existing is
    /// itself proof the buffer's lock is held.
    pub fn write(&self) {
        self.cache
            .disk
            .write(self.device_id, self.block_number, self.data());
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.cache.release(self.bucket, self.slot);
    }
}
