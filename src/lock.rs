//! A compact three-state lock built on [`futex`](crate::futex).
//!
//! The protocol follows the classic futex mutex: the word is `0` when unlocked,
//! `1` when locked with nobody waiting and `2` when locked with possible waiters.
//! Only the `2` state ever makes the unlocking thread pay for a wake-up syscall.
//!
//! Blocking and waking never leak into the caller's `errno`.

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::errno::ErrnoGuard;
use crate::futex;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

pub struct FutexMutex<T: ?Sized> {
    state: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for FutexMutex<T> {}

/// Releases the lock when dropped.
#[must_use = "if unused the FutexMutex will immediately unlock"]
pub struct FutexMutexGuard<'a, T: ?Sized> {
    lock: &'a FutexMutex<T>,
}

impl<T> FutexMutex<T> {
    #[inline(always)]
    pub const fn new(data: T) -> Self {
        FutexMutex {
            state: AtomicU32::new(UNLOCKED),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> FutexMutex<T> {
    #[inline]
    pub fn lock(&self) -> FutexMutexGuard<'_, T> {
        if let Err(state) =
            self.state
                .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        {
            self.lock_contended(state);
        }
        FutexMutexGuard { lock: self }
    }

    #[cold]
    fn lock_contended(&self, mut state: u32) {
        let _errno = ErrnoGuard::new();
        if state != CONTENDED {
            state = self.state.swap(CONTENDED, Ordering::Acquire);
        }
        while state != UNLOCKED {
            futex::wait(&self.state, CONTENDED);
            state = self.state.swap(CONTENDED, Ordering::Acquire);
        }
    }

    #[inline]
    fn unlock(&self) {
        if self.state.fetch_sub(1, Ordering::Release) != LOCKED {
            self.unlock_contended();
        }
    }

    #[cold]
    fn unlock_contended(&self) {
        let _errno = ErrnoGuard::new();
        self.state.store(UNLOCKED, Ordering::Release);
        futex::wake_one(&self.state);
    }
}

impl<T: ?Sized> fmt::Debug for FutexMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutexMutex")
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Deref for FutexMutexGuard<'_, T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for FutexMutexGuard<'_, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for FutexMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
