//! Access to the calling thread's `errno`, the last-error sink of the C allocation family.

use libc::c_int;

#[cfg(any(target_os = "linux", target_os = "emscripten", target_os = "redox"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "android")]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno() }
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__error() }
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno() }
}

#[inline]
pub fn get_errno() -> c_int {
    unsafe { *errno_location() }
}

#[inline]
pub fn set_errno(value: c_int) {
    unsafe { *errno_location() = value }
}

/// Snapshots `errno` on creation and writes it back on drop, so that syscalls made
/// while the guard is alive are invisible to the caller.
#[must_use]
pub struct ErrnoGuard {
    saved: c_int,
}

impl ErrnoGuard {
    #[inline]
    pub fn new() -> Self {
        ErrnoGuard { saved: get_errno() }
    }
}

impl Drop for ErrnoGuard {
    #[inline]
    fn drop(&mut self) {
        set_errno(self.saved);
    }
}
