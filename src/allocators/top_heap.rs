//! A multithreaded heap exposing the C allocation family.

use crate::allocators::raw_heap::{HeapStats, RawHeap};
use crate::errno::set_errno;
use crate::error::{AllocError, Result};
use crate::growers::Grower;
use crate::header::BLOCK_ALIGN;
use crate::lock::FutexMutex;
use crate::util::{array_size, page_size, raw_ptr, round_up};

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::{null_mut, NonNull};

use libc::c_int;

/// A multithreaded heap.
///
/// This is a [`FutexMutex`] wrapper over [`RawHeap`]: every call runs as a single critical
/// section. The methods mirror the C allocation functions, failures are reported
/// through a null return (or a status code) and `errno`.
///
/// Passing a pointer that was not returned by this heap, or one that was already freed,
/// to [`free`](TopHeap::free), [`realloc`](TopHeap::realloc) and friends is undefined
/// behavior and is not detected.
#[repr(C)]
pub struct TopHeap<G: Grower> {
    inner: FutexMutex<RawHeap<G>>,
}

unsafe impl<G: Grower> Sync for TopHeap<G> {}

impl<G: Grower> TopHeap<G> {
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing it's underlying buffer for the lifetime of the returned heap.
    pub const unsafe fn with_grower(grower: G) -> Self {
        TopHeap {
            inner: FutexMutex::new(unsafe { RawHeap::with_grower(grower) }),
        }
    }

    /// Converts an engine result into the C convention, publishing the error in `errno`.
    #[inline]
    fn report(result: Result<NonNull<u8>>) -> *mut u8 {
        match result {
            Ok(mem) => mem.as_ptr(),
            Err(e) => {
                set_errno(e.errno());
                null_mut()
            }
        }
    }

    pub fn malloc(&self, size: usize) -> *mut u8 {
        let result = self.inner.lock().malloc(size);
        Self::report(result)
    }

    /// Allocates a zeroed array of `n` elements of `size` bytes each.
    pub fn calloc(&self, n: usize, size: usize) -> *mut u8 {
        let Some(total) = array_size(n, size) else {
            return Self::report(Err(AllocError::OutOfMemory));
        };
        let mem = self.malloc(total);
        if !mem.is_null() {
            unsafe { mem.write_bytes(0, total) };
        }
        mem
    }

    /// # Safety
    /// `mem` must be null or a live allocation of this heap.
    pub unsafe fn realloc(&self, mem: *mut u8, size: usize) -> *mut u8 {
        let Some(mem) = NonNull::new(mem) else {
            return self.malloc(size);
        };
        let result = unsafe { self.inner.lock().realloc(mem, size, BLOCK_ALIGN) };
        Self::report(result)
    }

    /// Like [`realloc`](TopHeap::realloc) but frees `mem` when resizing fails.
    ///
    /// # Safety
    /// `mem` must be null or a live allocation of this heap. After a null return it
    /// must not be used nor freed again.
    pub unsafe fn reallocf(&self, mem: *mut u8, size: usize) -> *mut u8 {
        let new_mem = unsafe { self.realloc(mem, size) };
        if new_mem.is_null() {
            unsafe { self.free(mem) };
        }
        new_mem
    }

    /// Resizes `mem` to an array of `n` elements of `size` bytes each.
    ///
    /// # Safety
    /// `mem` must be null or a live allocation of this heap.
    pub unsafe fn reallocarray(&self, mem: *mut u8, n: usize, size: usize) -> *mut u8 {
        let Some(total) = array_size(n, size) else {
            return Self::report(Err(AllocError::OutOfMemory));
        };
        unsafe { self.realloc(mem, total) }
    }

    /// # Safety
    /// `mem` must be null or a live allocation of this heap.
    pub unsafe fn free(&self, mem: *mut u8) {
        if mem.is_null() {
            return;
        }
        unsafe { self.inner.lock().free(mem) };
    }

    /// Allocates `size` bytes aligned to `align`, which must be a power of two.
    pub fn memalign(&self, align: usize, size: usize) -> *mut u8 {
        let result = self.inner.lock().memalign(align, size);
        Self::report(result)
    }

    /// Same as [`memalign`](TopHeap::memalign), `size` need not be a multiple of `align`.
    pub fn aligned_alloc(&self, align: usize, size: usize) -> *mut u8 {
        self.memalign(align, size)
    }

    /// Stores a `size`-byte allocation aligned to `align` in `memptr`.
    ///
    /// Returns 0 on success, `EINVAL` if `align` is not a power of two multiple of the
    /// pointer size or `ENOMEM` if there is no memory. `memptr` is only written on success.
    pub fn posix_memalign(&self, memptr: &mut *mut u8, align: usize, size: usize) -> c_int {
        if !align.is_power_of_two() || align % size_of::<*const u8>() != 0 {
            set_errno(libc::EINVAL);
            return libc::EINVAL;
        }
        let result = self.inner.lock().memalign(align, size);
        match result {
            Ok(mem) => {
                *memptr = mem.as_ptr();
                0
            }
            Err(e) => {
                set_errno(e.errno());
                e.errno()
            }
        }
    }

    /// Allocates `size` bytes aligned to the page size.
    pub fn valloc(&self, size: usize) -> *mut u8 {
        self.memalign(page_size(), size)
    }

    /// Allocates whole pages, enough of them to hold `size` bytes.
    pub fn pvalloc(&self, size: usize) -> *mut u8 {
        let page = page_size();
        let Some(size) = round_up(size, page) else {
            return Self::report(Err(AllocError::OutOfMemory));
        };
        self.memalign(page, size)
    }

    /// Returns how many bytes can be used at `mem`, or 0 for a null `mem`.
    ///
    /// # Safety
    /// `mem` must be null or a live allocation of this heap.
    pub unsafe fn usable_size(&self, mem: *mut u8) -> usize {
        match NonNull::new(mem) {
            Some(mem) => unsafe { self.inner.lock().usable_size(mem) },
            None => 0,
        }
    }

    /// Walks the heap and reports what is currently allocated.
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }
}

//---------------impl GlobalAlloc for TopHeap---------------//

unsafe impl<G: Grower> GlobalAlloc for TopHeap<G> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        raw_ptr(self.inner.lock().memalign(layout.align(), layout.size()).ok())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let mem = unsafe { self.alloc(layout) };
        if !mem.is_null() {
            unsafe { mem.write_bytes(0, layout.size()) };
        }
        mem
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.inner.lock().free(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let ptr = unsafe { NonNull::new_unchecked(ptr) };
        raw_ptr(unsafe { self.inner.lock().realloc(ptr, new_size, layout.align()) }.ok())
    }
}
