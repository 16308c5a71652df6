//! [`Grower`] trait and structures that implement it.
//!
//! A grower is the backing memory provider of a heap: it hands out one contiguous
//! range of memory and can later extend its upper end. The heap never gives memory
//! back, so growers have no way to shrink.

use crate::errno::ErrnoGuard;
use crate::header::BLOCK_ALIGN;
use crate::util::{checked_add, find_aligned};

use core::ptr::NonNull;

use libc::{brk, sbrk};
use tracing::trace;

/// Size of the range requested from a grower when the heap is first touched.
pub const INITIAL_HEAP_SIZE: usize = 4096;

/// A trait for types that act as if they were a contiguous growable buffer.
///
/// # Safety
/// * copying, cloning, or moving the grower must not invalidate any pointers to the buffer
///   managed by the grower. This generally means that growers should not own but
///   reference their underlying buffers.
/// * the range returned by [`init`](Grower::init) must stay valid and only ever be
///   extended (never moved) by [`grow_to`](Grower::grow_to).
pub unsafe trait Grower {
    /// Sets up the buffer with room for at least `min_size` bytes.
    /// Returns the start and the end of the buffer, the start being
    /// [`BLOCK_ALIGN`]-aligned, or `Err(())` if the buffer can not be set up.
    ///
    /// # Safety
    /// Must be called exactly once, before any call to `grow_to`.
    unsafe fn init(&mut self, min_size: usize) -> Result<(NonNull<u8>, NonNull<u8>), ()>;

    /// Extends the buffer so that it ends at or past `new_end`.
    /// Returns the new end of the buffer or `Err(())`, in which case the buffer is unchanged.
    ///
    /// # Safety
    /// `new_end` must be past the current end of the buffer.
    unsafe fn grow_to(&mut self, new_end: *mut u8) -> Result<NonNull<u8>, ()>;
}

#[derive(Debug)]
/// A grower that internally uses [`libc::brk`] to operate
/// on the end of the process's data segment.
///
/// Every growth overshoots the requested end by half of the current heap size,
/// so a steadily growing heap only calls `brk` a logarithmic number of times.
/// Syscalls made by the grower never change the caller's `errno`.
pub struct BrkGrower {
    start: *mut u8,
    end: *mut u8,
    initial_size: usize,
}

impl BrkGrower {
    #[inline(always)]
    pub const fn new(initial_size: usize) -> Self {
        BrkGrower {
            start: core::ptr::null_mut(),
            end: core::ptr::null_mut(),
            initial_size,
        }
    }

    /// Moves the program break to `new_end`.
    ///
    /// # Safety
    /// Assumes that nothing else manages the program break.
    unsafe fn set_brk(&mut self, new_end: *mut u8) -> Result<(), ()> {
        let _errno = ErrnoGuard::new();
        if unsafe { brk(new_end.cast()) } == -1 {
            trace!(?new_end, "brk() refused to move the program break.");
            return Err(());
        }
        self.end = new_end;
        Ok(())
    }
}

impl Default for BrkGrower {
    fn default() -> Self {
        BrkGrower::new(INITIAL_HEAP_SIZE)
    }
}

unsafe impl Grower for BrkGrower {
    unsafe fn init(&mut self, min_size: usize) -> Result<(NonNull<u8>, NonNull<u8>), ()> {
        debug_assert!(self.start.is_null(), "BrkGrower initialized twice.");
        let heap_start = {
            let _errno = ErrnoGuard::new();
            unsafe { sbrk(0) }
        };
        if heap_start as isize == -1 || heap_start.is_null() {
            return Err(());
        }
        let start = find_aligned(heap_start.cast(), BLOCK_ALIGN).ok_or(())? as *mut u8;
        let end = checked_add(start, min_size.max(self.initial_size)).ok_or(())? as *mut u8;
        self.end = heap_start.cast();
        unsafe { self.set_brk(end)? };
        self.start = start;
        trace!(?start, ?end, "Program break heap initialized.");
        unsafe { Ok((NonNull::new_unchecked(start), NonNull::new_unchecked(end))) }
    }

    unsafe fn grow_to(&mut self, new_end: *mut u8) -> Result<NonNull<u8>, ()> {
        debug_assert!(!self.start.is_null());
        debug_assert!(new_end > self.end);

        // Someone else moved the break, growing now would clobber their memory.
        let current = {
            let _errno = ErrnoGuard::new();
            unsafe { sbrk(0) }
        };
        if current.cast::<u8>() != self.end {
            trace!(?current, expected = ?self.end, "Program break was moved behind our back.");
            return Err(());
        }

        let slack = (new_end as usize - self.start as usize) / 2;
        let target = checked_add(new_end, slack).unwrap_or(new_end) as *mut u8;
        unsafe { self.set_brk(target)? };
        unsafe { Ok(NonNull::new_unchecked(target)) }
    }
}

/// A grower over a caller-provided buffer, handy for heaps that must not touch the
/// program break (embedded targets, tests, secondary heaps).
///
/// The grower commits exactly what is asked for and fails once the buffer is exhausted.
#[derive(Debug)]
pub struct ArenaGrower {
    heap_end: *mut u8,
    arena_start: *mut u8,
    arena_end: *mut u8,
}

impl ArenaGrower {
    /// Creates a grower that operates on the `size` bytes starting at `buf`.
    ///
    /// # Safety
    /// `[buf, buf + size)` must be valid for reads and writes, and must not be used by
    /// anything else for as long as a heap uses the grower.
    pub const unsafe fn new(buf: *mut u8, size: usize) -> Self {
        ArenaGrower {
            heap_end: buf,
            arena_start: buf,
            arena_end: buf.wrapping_add(size),
        }
    }
}

unsafe impl Grower for ArenaGrower {
    unsafe fn init(&mut self, min_size: usize) -> Result<(NonNull<u8>, NonNull<u8>), ()> {
        let start = find_aligned(self.arena_start, BLOCK_ALIGN).ok_or(())? as *mut u8;
        let end = checked_add(start, min_size).ok_or(())? as *mut u8;
        if start.is_null() || end > self.arena_end {
            return Err(());
        }
        self.heap_end = end;
        unsafe { Ok((NonNull::new_unchecked(start), NonNull::new_unchecked(end))) }
    }

    unsafe fn grow_to(&mut self, new_end: *mut u8) -> Result<NonNull<u8>, ()> {
        debug_assert!(new_end > self.heap_end);
        if new_end > self.arena_end {
            return Err(());
        }
        self.heap_end = new_end;
        unsafe { Ok(NonNull::new_unchecked(new_end)) }
    }
}

unsafe impl<T: Grower + ?Sized> Grower for &mut T {
    unsafe fn init(&mut self, min_size: usize) -> Result<(NonNull<u8>, NonNull<u8>), ()> {
        unsafe { (**self).init(min_size) }
    }

    unsafe fn grow_to(&mut self, new_end: *mut u8) -> Result<NonNull<u8>, ()> {
        unsafe { (**self).grow_to(new_end) }
    }
}
