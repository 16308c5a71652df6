//! Defines the [`Header`] struct, its decoded [`Back`] view and the block layout constants.

use core::mem::{align_of, size_of};

use static_assertions::{const_assert, const_assert_eq};

/// Minimum alignment of every header and every payload handed out by the heap.
/// All block sizes are rounded up to a multiple of this value.
pub const BLOCK_ALIGN: usize = 16;

pub const HEADER_SIZE: usize = size_of::<Header>();
pub const HEADER_ALIGN: usize = align_of::<Header>();

// The in-use flag lives in the low bit of the back-distance, which is only
// sound while every distance is a multiple of at least 2.
const_assert!(BLOCK_ALIGN >= 2);
const_assert_eq!(HEADER_SIZE, BLOCK_ALIGN);
const_assert_eq!(HEADER_ALIGN, BLOCK_ALIGN);

const IN_USE: usize = 1;

/// Bookkeeping placed immediately before every payload.
///
/// `size` is the payload capacity (a multiple of [`BLOCK_ALIGN`], header excluded).
///
/// # Tagging
/// `__back` packs two things: the lowest bit is set while the block is in use, and the
/// remaining bits are a byte distance measured backwards from this header. For an
/// in-use block the distance reaches the previous header. For a free block it spans the
/// whole run of contiguous free blocks ending here, so popping the top can skip the run
/// in a single step. Use [`back()`](Header::back) to get a decoded view.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct Header {
    pub size: usize,
    pub __back: usize,
}

/// Decoded form of [`Header::__back`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Back {
    /// Distance to the previous block's header.
    InUse(usize),
    /// Distance spanned by the run of free blocks that ends at this header.
    Free(usize),
}

impl Back {
    #[inline(always)]
    pub fn distance(self) -> usize {
        match self {
            Back::InUse(d) | Back::Free(d) => d,
        }
    }

    #[inline(always)]
    fn encode(self) -> usize {
        match self {
            Back::InUse(d) => d | IN_USE,
            Back::Free(d) => d & !IN_USE,
        }
    }
}

impl Header {
    /// Header of the sentinel block sitting at the very start of the heap.
    /// It is never freed, so the top-down cascade always stops on it.
    pub const ROOT: Header = Header {
        size: 0,
        __back: IN_USE,
    };

    /// Creates a header for a block with the given payload capacity and back-distance.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that both `size` and the distance in
    /// `back` are multiples of [`BLOCK_ALIGN`].
    #[inline(always)]
    pub unsafe fn new_unchecked(size: usize, back: Back) -> Header {
        debug_assert_eq!(size % BLOCK_ALIGN, 0, "size should be block aligned.");
        debug_assert_eq!(
            back.distance() % BLOCK_ALIGN,
            0,
            "distance should be block aligned."
        );
        Header {
            size,
            __back: back.encode(),
        }
    }

    #[inline(always)]
    pub fn back(&self) -> Back {
        match self.__back & IN_USE {
            0 => Back::Free(self.__back),
            _ => Back::InUse(self.__back & !IN_USE),
        }
    }

    #[inline(always)]
    pub fn set_back(&mut self, back: Back) {
        debug_assert_eq!(back.distance() % BLOCK_ALIGN, 0);
        self.__back = back.encode();
    }

    #[inline(always)]
    pub fn is_free(&self) -> bool {
        matches!(self.back(), Back::Free(_))
    }
}

/// Returns the header that precedes the payload at `payload`.
///
/// # Safety
/// `payload` must be at least [`HEADER_SIZE`] bytes past the start of the heap.
#[inline(always)]
pub(crate) unsafe fn header_of(payload: *mut u8) -> *mut Header {
    unsafe { payload.sub(HEADER_SIZE).cast() }
}
