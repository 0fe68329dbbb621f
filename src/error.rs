//! Error types for caller-recoverable conditions.
//!
//! Programmer-contract violations (misaligned free, double free, cache
//! exhaustion) are never represented here: they are fatal and raised via
//! `panic!` at the point of violation. The propagation policy is return a
//! valid result, return `None`, or halt; never log, never retry.

use core::fmt;

/// A caller-recoverable failure from the page allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No physical page was available on any CPU's freelist.
    OutOfMemory,
}

impl KernelError {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelError::OutOfMemory => "out of memory",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::error::Error for KernelError {}
