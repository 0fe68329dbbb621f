//! The disk is an external collaborator, referenced only by interface:
//! a synchronous block read/write primitive. The buffer cache knows
//! nothing else about it.

use crate::param::BSIZE;
use std::collections::HashMap;
use std::sync::Mutex;

/// Synchronous block transfer, as seen by the buffer cache.
///
/// `read`/`write` block until the transfer completes. Transient failures
/// are not modeled here; an implementation is assumed to succeed or to
/// panic.
pub trait Disk: Send + Sync {
    fn read(&self, device_id: u32, block_number: u32, buf: &mut [u8; BSIZE]);
    fn write(&self, device_id: u32, block_number: u32, buf: &[u8; BSIZE]);
}

/// An in-memory stand-in for a block device, used by tests.
///
/// Blocks that have never been written read back as all-zero, matching a
/// freshly formatted disk.
#[derive(Default)]
pub struct MemoryDisk {
    blocks: Mutex<HashMap<(u32, u32), [u8; BSIZE]>>,
    reads: std::sync::atomic::AtomicUsize,
}

impl MemoryDisk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks actually written, for test assertions.
    pub fn written_block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    /// Number of `read` calls served, for test assertions.
    pub fn read_count(&self) -> usize {
        self.reads.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Disk for MemoryDisk {
    fn read(&self, device_id: u32, block_number: u32, buf: &mut [u8; BSIZE]) {
        self.reads
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let blocks = self.blocks.lock().unwrap();
        match blocks.get(&(device_id, block_number)) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
    }

    fn write(&self, device_id: u32, block_number: u32, buf: &[u8; BSIZE]) {
        self.blocks
            .lock()
            .unwrap()
            .insert((device_id, block_number), *buf);
    }
}
