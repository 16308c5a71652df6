//! A tiny heap allocator that bumps memory off the top of one contiguous arena and
//! reclaims it by coalescing frees from the top down.
//!
//! The crate aims to be a small, predictable, syscall-light replacement for the
//! platform allocator rather than a general purpose one: there are no size classes,
//! no per-thread arenas and memory is never handed back to the operating system.
//!
//! # Usage
//! ```toml
//! [dependencies]
//! topheap = "0.1"
//! ```
//!
//! ```no_run
//! use topheap::TopHeap;
//! use topheap::growers::BrkGrower;
//!
//! #[global_allocator]
//! static ALLOCATOR: TopHeap<BrkGrower> = unsafe { TopHeap::with_grower(BrkGrower::new(4096)) };
//!
//! fn main() {
//!     let v: Vec<u32> = vec![1, 2, 3];
//!     println!("Bumped {:?}", v);
//! }
//! ```
//!
//! With the `c-api` feature the crate also exports unmangled `malloc`, `calloc`,
//! `realloc`, `free`, `aligned_alloc`, `memalign`, `posix_memalign`, `valloc`,
//! `pvalloc`, `reallocarray`, `reallocf` and `malloc_usable_size`, so the whole
//! process allocates through it.
//!
//! # Heaps
//! Two heaps are exported by this crate - [`RawHeap`] and [`TopHeap`].
//! [`RawHeap`] is the singlethreaded engine, [`TopHeap`] wraps it in a small futex-based
//! lock and offers the C allocation family on top of it.
//!
//! # Mode of operation
//! - The first operation asks the [grower](#growers) for an initial range and places a
//!   *root* block at its start.
//! - An allocation places a new block right past the *top* block (the most recently
//!   allocated one) and asks the grower for more memory if the arena is too short.
//! - Freeing the top block pops it. Any already freed blocks that the pop exposes are
//!   popped with it, so the top recedes through the whole run.
//! - Freeing any other block only marks it free, merging it with a freed block right
//!   below it. Its memory becomes reusable once everything above it is freed too.
//!
//! ## Blocks
//! The arena is a sequence of blocks, each one made of a [header](#headers) followed by
//! a payload. The root block has an empty payload and is never freed.
//!
//! ## Headers
//! A header stores the payload capacity of its block and a *back-distance*: the byte
//! distance to the previous header while the block is in use, or the distance spanned
//! by the run of freed blocks ending at it once the block is free. The in-use flag is
//! packed into the lowest bit of the back-distance.
//!
//! ## Alignment
//! Headers and payloads are aligned to [`BLOCK_ALIGN`] and payload capacities are
//! multiples of it. Stricter alignments are obtained by enlarging the top block just
//! enough for the next block to start on the requested boundary.
//!
//! ## Growers
//! A grower is the heaps' backing memory provider.
//! The heaps are generic over their growers, anything implementing [`Grower`] (anything
//! that acts as a contiguous buffer which can grow) can be used. [`BrkGrower`] moves the
//! program break, [`ArenaGrower`] carves the heap out of a caller-provided buffer.
//!
//! # Logging
//! The engine is instrumented with [`tracing`] spans and events, all of them at the
//! `TRACE` level since they fire while the heap lock is held. Installing a subscriber
//! that enables `topheap=trace` while a [`TopHeap`] serves the process' allocations
//! deadlocks, as the subscriber allocates from inside the critical section.
//!
//! # Errors
//! Failures never leave the heap half-modified. The C-style methods report them as a
//! null pointer (or a status code) plus `errno`: `ENOMEM` when memory ran out or a size
//! computation overflowed and `EINVAL` for invalid alignments.
//! Freeing a pointer twice or freeing a foreign pointer is undefined behavior and is not
//! detected.
//!
//! [`RawHeap`]: allocators::RawHeap
//! [`TopHeap`]: allocators::TopHeap
//! [`Grower`]: growers::Grower
//! [`BrkGrower`]: growers::BrkGrower
//! [`ArenaGrower`]: growers::ArenaGrower
//! [`BLOCK_ALIGN`]: header::BLOCK_ALIGN

pub use crate::allocators::{HeapStats, RawHeap, TopHeap};
pub use crate::error::AllocError;

pub mod allocators;
#[cfg(feature = "c-api")]
pub mod c_api;
mod errno;
pub mod error;
mod futex;
pub mod growers;
pub mod header;
mod lock;
mod util;
