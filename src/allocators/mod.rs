//! The [`RawHeap`] engine and its thread-safe [`TopHeap`] wrapper.

pub mod raw_heap;
pub mod top_heap;

pub use raw_heap::{HeapStats, RawHeap};
pub use top_heap::TopHeap;
