//! Parking primitive keyed on a single 32-bit word.
//!
//! On Linux this is a thin layer over the `futex(2)` syscall. Elsewhere waiting degrades
//! to yielding the time slice, which keeps the lock protocol correct at the cost of
//! spinning under contention.

use core::sync::atomic::AtomicU32;

/// Blocks the calling thread while `word` still holds `expected`.
///
/// Spurious returns are allowed, callers must re-check the word.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
pub fn wait(word: &AtomicU32, expected: u32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            core::ptr::null::<libc::timespec>(),
        );
    }
}

/// Wakes at most one thread blocked in [`wait`] on `word`.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
pub fn wake_one(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1,
        );
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
#[inline]
pub fn wait(word: &AtomicU32, expected: u32) {
    use core::sync::atomic::Ordering;

    if word.load(Ordering::Relaxed) == expected {
        std::thread::yield_now();
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
#[inline]
pub fn wake_one(_word: &AtomicU32) {}
