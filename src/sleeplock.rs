//! Long-term mutual exclusion.
//!
//! Unlike [`SpinLock`](crate::spinlock::SpinLock), acquiring a `SleepLock`
//! may block the calling thread instead of busy-waiting, so it is safe to
//! hold one across a disk call. Each buffer in the cache has its own
//! `SleepLock` guarding its payload; it is held by whichever caller
//! currently has the buffer checked out, between `read`/`bget` and
//! `release`.
//!
//! There is no scheduler to hand blocked threads off to, so waiting is
//! done with a condition variable guarding a `locked` flag instead.

use std::sync::{Condvar, Mutex, MutexGuard};

struct SleepLockInner {
    locked: bool,
}

pub struct SleepLock<T> {
    state: Mutex<SleepLockInner>,
    condvar: Condvar,
    data: std::cell::UnsafeCell<T>,
}

unsafe impl<T> Sync for SleepLock<T> where T: Send {}
unsafe impl<T> Send for SleepLock<T> where T: Send {}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

impl<T> SleepLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(SleepLockInner { locked: false }),
            condvar: Condvar::new(),
            data: std::cell::UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, blocking the calling thread while it is held
    /// elsewhere.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut state: MutexGuard<'_, SleepLockInner> = self.state.lock().unwrap();
        while state.locked {
            state = self.condvar.wait(state).unwrap();
        }
        state.locked = true;
        SleepLockGuard { lock: self }
    }

    /// Returns whether the lock is currently held by anyone.
    pub fn holding(&self) -> bool {
        self.state.lock().unwrap().locked
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.locked = false;
        drop(state);
        self.lock.condvar.notify_one();
    }
}

impl<T> std::ops::Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> std::ops::DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
