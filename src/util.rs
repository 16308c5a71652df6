//! Overflow-aware pointer and size arithmetic.

use core::ptr::{null_mut, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::errno::ErrnoGuard;
use crate::header::BLOCK_ALIGN;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Moves `ptr` forward to the next multiple of `align`, leaving it alone if it's
/// already aligned. `None` means the aligned address would lie past the end of the
/// address space.
///
/// `align` must be a power of two, `align_offset` panics otherwise.
#[inline]
pub(crate) fn find_aligned(ptr: *const u8, align: usize) -> Option<*const u8> {
    let offset = ptr.align_offset(align);
    debug_assert_ne!(
        offset,
        usize::MAX,
        "align_offset() on a *const u8 should never fail."
    );
    checked_add(ptr, offset)
}

#[inline(always)]
pub(crate) fn raw_ptr<T>(p: Option<NonNull<T>>) -> *mut T {
    p.map_or(null_mut(), |p| p.as_ptr())
}

/// Offsets `ptr` by `offset` bytes unless the result would wrap around the address space.
#[inline(always)]
pub(crate) fn checked_add(ptr: *const u8, offset: usize) -> Option<*const u8> {
    (ptr as usize <= usize::MAX - offset).then(|| ptr.wrapping_add(offset))
}

/// Returns the smallest multiple of `y` that is greater or equal to `x`
/// or `None` if that multiple can not be contained in a `usize`.
///
/// # Panics
/// Panics if `y` is 0.
#[inline]
pub(crate) fn round_up(x: usize, y: usize) -> Option<usize> {
    if x % y == 0 {
        Some(x)
    } else {
        ((x / y) * y).checked_add(y)
    }
}

/// Rounds a requested payload size up to the block granularity.
#[inline(always)]
pub(crate) fn round_size(size: usize) -> Option<usize> {
    round_up(size, BLOCK_ALIGN)
}

/// Multiplies an element count by an element size, the way `calloc` has to.
#[inline]
pub(crate) fn array_size(n: usize, size: usize) -> Option<usize> {
    n.checked_mul(size)
}

/// Returns the size of a memory page, queried once and cached afterwards.
pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let queried = {
        let _errno = ErrnoGuard::new();
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) }
    };
    let size = match usize::try_from(queried) {
        Ok(size) if size.is_power_of_two() => size,
        _ => FALLBACK_PAGE_SIZE,
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}
