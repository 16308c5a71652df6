//! A singlethreaded heap engine.
//!
// For a general view of the heap's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Pointers and the top block
// `top` always holds the *payload* address of the most recently bumped block, the header
// sits right before it. Before any user allocation exists `top` is the payload address of
// the root block, whose header lives at `start`. Since the root is never freed, walking
// backwards from `top` through the back-distances always terminates on it.
// An aligned allocation made while the root is on top pads the root's size, the root
// header is rewritten to its pristine form whenever the cascade lands on it again.
//
// ## Failure atomicity
// Every operation validates and grows the arena before writing any header, and the only
// header written speculatively (the padded size of the top block in `memalign`) is
// restored on failure. A failing call leaves the heap exactly as it was.

use crate::error::{AllocError, Result};
use crate::growers::{Grower, INITIAL_HEAP_SIZE};
use crate::header::{header_of, Back, Header, BLOCK_ALIGN, HEADER_SIZE};
use crate::util::{checked_add, find_aligned, round_size};

use core::fmt::Debug;
use core::ptr::{self, copy_nonoverlapping, NonNull};

use tracing::{instrument, trace, Level};

/// Snapshot of the block chain, gathered by walking from the top block down to the root.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Blocks that are still in use, the root excluded.
    pub live_blocks: usize,
    /// Sum of the payload capacities of the live blocks.
    pub live_bytes: usize,
    /// Runs of freed blocks stranded below the top.
    pub free_runs: usize,
    /// Bytes granted by the grower so far.
    pub arena_bytes: usize,
}

/// A single threaded heap.
///
/// Memory is bumped from the top of one contiguous arena. Freed blocks are only
/// reclaimed once everything above them has been freed as well.
pub struct RawHeap<G: Grower> {
    start: *mut u8,
    end: *mut u8,
    top: *mut u8,
    grower: G,
}

impl<G: Grower> Debug for RawHeap<G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawHeap")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("top", &self.top)
            .finish()
    }
}

impl<G: Grower> RawHeap<G> {
    /// Creates a heap on top of the specified grower. Nothing is requested from the
    /// grower until the first operation.
    ///
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing it's underlying buffer for the lifetime of the returned heap.
    pub const unsafe fn with_grower(grower: G) -> Self {
        RawHeap {
            start: ptr::null_mut(),
            end: ptr::null_mut(),
            top: ptr::null_mut(),
            grower,
        }
    }

    /// Allocates `size` bytes aligned to [`BLOCK_ALIGN`].
    ///
    /// A `size` of 0 yields a unique zero-capacity block.
    pub fn malloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.ensure_init()?;
        unsafe { self.bump(size) }
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// Returns [`AllocError::InvalidArgument`] if `align` is not a power of two.
    pub fn memalign(&mut self, align: usize, size: usize) -> Result<NonNull<u8>> {
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidArgument);
        }
        self.ensure_init()?;
        unsafe { self.bump_aligned(align, size) }
    }

    /// Resizes the block at `mem` to hold at least `size` bytes, keeping its first
    /// `min(size, old capacity)` bytes. If the block has to move, the new one is
    /// aligned to `align`. On failure the original block is left untouched.
    ///
    /// # Safety
    /// `mem` must be a live allocation of this heap aligned to `align`.
    #[instrument(level = "trace", skip(self), ret(level = Level::TRACE), err(Debug, level = Level::TRACE))]
    pub unsafe fn realloc(&mut self, mem: NonNull<u8>, size: usize, align: usize) -> Result<NonNull<u8>> {
        self.ensure_init()?;
        let mem = mem.as_ptr();
        let header = unsafe { header_of(mem) };
        self.debug_check_live(mem);

        let old_size = unsafe { (*header).size };

        if size <= old_size {
            // Shrink in place, rounding can never exceed the current capacity.
            let new_size = round_size(size).unwrap_or(old_size);
            unsafe { (*header).size = new_size };
            trace!(old_size, new_size, "Shrunk in place.");
            return Ok(unsafe { NonNull::new_unchecked(mem) });
        }

        if mem == self.top {
            let size = round_size(size).ok_or(AllocError::OutOfMemory)?;
            let new_end = checked_add(mem, size).ok_or(AllocError::OutOfMemory)?;
            unsafe { self.request_more(new_end)? };
            unsafe { (*header).size = size };
            trace!(old_size, new_size = size, "Grew top block in place.");
            return Ok(unsafe { NonNull::new_unchecked(mem) });
        }

        trace!("Block is not on top, moving it.");
        let new_mem = unsafe { self.bump_aligned(align.max(BLOCK_ALIGN), size)? };
        unsafe {
            copy_nonoverlapping(mem, new_mem.as_ptr(), old_size);
            self.free_nonnull(mem);
        }
        Ok(new_mem)
    }

    /// Releases the block at `mem`, a null `mem` is ignored.
    ///
    /// # Safety
    /// `mem` must be null or a live allocation of this heap. Freeing a block twice,
    /// or a pointer that didn't come from this heap, is undefined behavior and is not
    /// detected (debug builds catch some of it).
    pub unsafe fn free(&mut self, mem: *mut u8) {
        if mem.is_null() {
            return;
        }
        debug_assert!(!self.start.is_null(), "Freeing from an uninitialized heap.");
        self.debug_check_live(mem);
        unsafe { self.free_nonnull(mem) }
    }

    /// Returns the payload capacity of the block at `mem`, which is at least the
    /// size last requested for it.
    ///
    /// # Safety
    /// `mem` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, mem: NonNull<u8>) -> usize {
        self.debug_check_live(mem.as_ptr());
        unsafe { (*header_of(mem.as_ptr())).size }
    }

    /// Walks the block chain from the top block down to the root.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats::default();
        if self.start.is_null() {
            return stats;
        }
        stats.arena_bytes = self.end as usize - self.start as usize;

        let root = self.root_payload();
        let mut p = self.top;
        while p != root {
            debug_assert!(p > root, "Walked below the root block.");
            let header = unsafe { *header_of(p) };
            match header.back() {
                Back::InUse(distance) => {
                    stats.live_blocks += 1;
                    stats.live_bytes += header.size;
                    p = p.wrapping_sub(distance);
                }
                Back::Free(distance) => {
                    stats.free_runs += 1;
                    p = p.wrapping_sub(distance);
                }
            }
        }
        stats
    }
}

impl<G: Grower> RawHeap<G> {
    /// Requests the initial range from the grower and plants the root block,
    /// unless this already happened.
    #[inline]
    fn ensure_init(&mut self) -> Result<()> {
        if !self.start.is_null() {
            return Ok(());
        }
        let (start, end) = unsafe { self.grower.init(INITIAL_HEAP_SIZE) }.map_err(|()| {
            trace!("Couldn't initialize heap.");
            AllocError::OutOfMemory
        })?;
        let start = start.as_ptr();
        debug_assert_eq!(start as usize % BLOCK_ALIGN, 0);
        debug_assert!(end.as_ptr() as usize - start as usize >= HEADER_SIZE);

        unsafe { start.cast::<Header>().write(Header::ROOT) };
        self.start = start;
        self.end = end.as_ptr();
        self.top = unsafe { start.add(HEADER_SIZE) };
        trace!(?start, end = ?self.end, "Heap initialized.");
        Ok(())
    }

    #[inline(always)]
    fn root_payload(&self) -> *mut u8 {
        self.start.wrapping_add(HEADER_SIZE)
    }

    /// Makes sure the arena reaches `new_end`, asking the grower for more if needed.
    ///
    /// # Safety
    /// The heap must be initialized.
    #[instrument(level = "trace", skip(self), err(Debug, level = Level::TRACE))]
    unsafe fn request_more(&mut self, new_end: *const u8) -> Result<()> {
        if new_end <= self.end as *const u8 {
            return Ok(());
        }
        match unsafe { self.grower.grow_to(new_end as *mut u8) } {
            Ok(end) => {
                debug_assert!(end.as_ptr() as *const u8 >= new_end);
                trace!(old_end = ?self.end, new_end = ?end.as_ptr(), "Arena grown.");
                self.end = end.as_ptr();
                Ok(())
            }
            Err(()) => {
                trace!("Growth failure, no memory.");
                Err(AllocError::OutOfMemory)
            }
        }
    }

    /// Bumps a new block of `size` bytes right past the top block.
    ///
    /// # Safety
    /// The heap must be initialized.
    #[instrument(level = "trace", skip(self), ret(level = Level::TRACE), err(Debug, level = Level::TRACE))]
    unsafe fn bump(&mut self, size: usize) -> Result<NonNull<u8>> {
        let top_size = unsafe { (*header_of(self.top)).size };
        let back = HEADER_SIZE
            .checked_add(top_size)
            .ok_or(AllocError::OutOfMemory)?;
        let new_top = checked_add(self.top, back).ok_or(AllocError::OutOfMemory)? as *mut u8;
        let size = round_size(size).ok_or(AllocError::OutOfMemory)?;
        let new_end = checked_add(new_top, size).ok_or(AllocError::OutOfMemory)?;

        unsafe { self.request_more(new_end)? };

        unsafe { header_of(new_top).write(Header::new_unchecked(size, Back::InUse(back))) };
        self.top = new_top;
        Ok(unsafe { NonNull::new_unchecked(new_top) })
    }

    /// Bumps a new block whose payload is `align`-aligned.
    ///
    /// The padding needed to reach the alignment is handed to the current top block by
    /// enlarging its size, that way the ordinary bump lands on the aligned address and
    /// no other header is disturbed.
    ///
    /// # Safety
    /// The heap must be initialized and `align` must be a power of two.
    #[instrument(level = "trace", skip(self), ret(level = Level::TRACE), err(Debug, level = Level::TRACE))]
    unsafe fn bump_aligned(&mut self, align: usize, size: usize) -> Result<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());
        if align <= BLOCK_ALIGN {
            return unsafe { self.bump(size) };
        }

        let top_header = unsafe { header_of(self.top) };
        let old_size = unsafe { (*top_header).size };

        let natural = HEADER_SIZE
            .checked_add(old_size)
            .and_then(|back| checked_add(self.top, back))
            .ok_or(AllocError::OutOfMemory)?;
        let aligned = find_aligned(natural, align).ok_or(AllocError::OutOfMemory)?;
        let padded_size = old_size
            .checked_add(aligned as usize - natural as usize)
            .ok_or(AllocError::OutOfMemory)?;
        trace!(old_size, padded_size, "Padding top block.");

        unsafe { (*top_header).size = padded_size };
        match unsafe { self.bump(size) } {
            Ok(mem) => {
                debug_assert_eq!(mem.as_ptr() as usize % align, 0);
                Ok(mem)
            }
            Err(e) => {
                unsafe { (*top_header).size = old_size };
                Err(e)
            }
        }
    }

    /// Frees a block, popping it (and any freed run beneath it) if it's on top or
    /// marking it free and merging it with a freed neighbour below otherwise.
    ///
    /// # Safety
    /// `mem` must be a live allocation of this heap.
    #[instrument(level = "trace", skip(self))]
    unsafe fn free_nonnull(&mut self, mem: *mut u8) {
        let header = unsafe { &mut *header_of(mem) };
        debug_assert!(!header.is_free(), "Block at {mem:?} is already free.");
        let mut freed = header.back().distance();

        if mem == self.top {
            self.top = unsafe { self.top.sub(freed) };
            // Cascade through the freed runs exposed by the pop.
            while let Back::Free(run) = unsafe { (*header_of(self.top)).back() } {
                trace!(top = ?self.top, run, "Popping freed run.");
                self.top = unsafe { self.top.sub(run) };
            }
            debug_assert!(self.top >= self.root_payload());
            if self.top == self.root_payload() {
                // Alignment padding may have been parked on the root.
                unsafe { self.start.cast::<Header>().write(Header::ROOT) };
            }
            trace!(top = ?self.top, "Popped top block.");
            return;
        }

        let below = unsafe { mem.sub(freed) };
        if let Back::Free(already_freed) = unsafe { (*header_of(below)).back() } {
            match freed.checked_add(already_freed) {
                Some(total) => freed = total,
                // The two runs stay separate, the cascade will pop them one at a time.
                None => trace!(freed, already_freed, "Run too long to merge, skipping."),
            }
        }
        header.set_back(Back::Free(freed));
        trace!(?mem, freed, "Marked interior block free.");
    }

    #[inline(always)]
    fn debug_check_live(&self, mem: *mut u8) {
        debug_assert_eq!(
            mem as usize % BLOCK_ALIGN,
            0,
            "All allocations should have block alignment."
        );
        debug_assert!(
            mem > self.root_payload() && mem <= self.top,
            "Pointer {mem:?} doesn't belong to the heap."
        );
        debug_assert!(
            unsafe { !(*header_of(mem)).is_free() },
            "Allocations should be preceded by in-use headers."
        );
    }
}

#[cfg(test)]
mod tests;
