//! Unmangled C allocation functions backed by one process-wide [`TopHeap`].
//!
//! Enabled with the `c-api` feature. Linking the crate (or preloading the `cdylib`)
//! then routes every `malloc`-family call of the process through the program-break heap.

use crate::allocators::TopHeap;
use crate::growers::{BrkGrower, INITIAL_HEAP_SIZE};

use core::ffi::c_void;
use core::ptr::null_mut;

use libc::c_int;

static HEAP: TopHeap<BrkGrower> =
    unsafe { TopHeap::with_grower(BrkGrower::new(INITIAL_HEAP_SIZE)) };

#[no_mangle]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
    HEAP.malloc(size).cast()
}

#[no_mangle]
pub extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    HEAP.calloc(nmemb, size).cast()
}

#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { HEAP.realloc(ptr.cast(), size).cast() }
}

#[no_mangle]
pub unsafe extern "C" fn reallocf(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { HEAP.reallocf(ptr.cast(), size).cast() }
}

#[no_mangle]
pub unsafe extern "C" fn reallocarray(ptr: *mut c_void, nmemb: usize, size: usize) -> *mut c_void {
    unsafe { HEAP.reallocarray(ptr.cast(), nmemb, size).cast() }
}

#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    unsafe { HEAP.free(ptr.cast()) }
}

#[no_mangle]
pub extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    HEAP.aligned_alloc(alignment, size).cast()
}

#[no_mangle]
pub extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    HEAP.memalign(alignment, size).cast()
}

#[no_mangle]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> c_int {
    let mut mem = null_mut();
    let status = HEAP.posix_memalign(&mut mem, alignment, size);
    if status == 0 {
        unsafe { *memptr = mem.cast() };
    }
    status
}

#[no_mangle]
pub extern "C" fn valloc(size: usize) -> *mut c_void {
    HEAP.valloc(size).cast()
}

#[no_mangle]
pub extern "C" fn pvalloc(size: usize) -> *mut c_void {
    HEAP.pvalloc(size).cast()
}

#[no_mangle]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    unsafe { HEAP.usable_size(ptr.cast()) }
}
