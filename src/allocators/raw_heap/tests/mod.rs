use crate::growers::ArenaGrower;

use self::format::with_test_logging;

use super::*;


#[repr(C, align(16))]
#[derive(Copy, Clone)]
struct Chunk([u8; BLOCK_ALIGN]);

/// Creates a heap over a fresh `size`-byte buffer.
/// The buffer is returned as well since it has to outlive the heap.
fn arena_heap(size: usize) -> (Vec<Chunk>, RawHeap<ArenaGrower>) {
    let mut buf = vec![Chunk([0; BLOCK_ALIGN]); size / BLOCK_ALIGN];
    let grower = unsafe { ArenaGrower::new(buf.as_mut_ptr().cast(), size) };
    let heap = unsafe { RawHeap::with_grower(grower) };
    (buf, heap)
}

fn start_of(buf: &mut [Chunk]) -> *mut u8 {
    buf.as_mut_ptr().cast()
}

fn back_of(mem: NonNull<u8>) -> Back {
    unsafe { (*header_of(mem.as_ptr())).back() }
}

#[test]
fn test_lazy_init() {
    let (mut buf, mut heap) = arena_heap(8 * 1024);
    assert!(heap.start.is_null());
    assert_eq!(heap.stats(), HeapStats::default());

    let p = heap.malloc(1).unwrap();
    let s = start_of(&mut buf);
    assert_eq!(heap.start, s);
    assert_eq!(unsafe { *s.cast::<Header>() }, Header::ROOT);
    // The first block sits right after the root block.
    assert_eq!(p.as_ptr(), unsafe { s.add(2 * HEADER_SIZE) });
    assert_eq!(back_of(p), Back::InUse(HEADER_SIZE));
    assert_eq!(unsafe { heap.usable_size(p) }, BLOCK_ALIGN);
    assert_eq!(heap.stats().arena_bytes, INITIAL_HEAP_SIZE);
}

#[test]
fn test_alignment_and_disjointness() {
    let (_buf, mut heap) = arena_heap(64 * 1024);

    let mut objects = vec![];
    for size in (0..200).step_by(7) {
        let p = heap.malloc(size).unwrap();
        assert_eq!(p.as_ptr() as usize % BLOCK_ALIGN, 0);
        unsafe { p.as_ptr().write_bytes(size as u8, size) };
        objects.push((p, size));
    }

    for w in objects.windows(2) {
        let (p, size) = w[0];
        let (q, _) = w[1];
        assert!(unsafe { p.as_ptr().add(size) } <= unsafe { header_of(q.as_ptr()) }.cast::<u8>());
    }
    for (p, size) in objects {
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), size) };
        assert!(bytes.iter().all(|&b| b == size as u8));
    }
}

#[test]
fn test_zero_size() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let p1 = heap.malloc(0).unwrap();
    let p2 = heap.malloc(0).unwrap();
    assert_ne!(p1, p2);
    assert_eq!(unsafe { p1.as_ptr().add(HEADER_SIZE) }, p2.as_ptr());
    assert_eq!(unsafe { heap.usable_size(p1) }, 0);

    unsafe {
        heap.free(p2.as_ptr());
        heap.free(p1.as_ptr());
    }
    assert_eq!(heap.malloc(0).unwrap(), p1);
}

#[test]
fn test_pop_and_rebump() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let _a = heap.malloc(40).unwrap();
    let b = heap.malloc(100).unwrap();
    unsafe { heap.free(b.as_ptr()) };
    assert_eq!(heap.malloc(100).unwrap(), b);
}

#[test]
fn test_cascade_reclaims_everything() {
    let (_buf, mut heap) = arena_heap(8 * 1024);
    let warmup = heap.malloc(0).unwrap();
    unsafe { heap.free(warmup.as_ptr()) };
    let top_before = heap.top;

    let a = heap.malloc(24).unwrap();
    let b = heap.malloc(300).unwrap();
    unsafe {
        heap.free(b.as_ptr());
        heap.free(a.as_ptr());
    }
    assert_eq!(heap.top, top_before);
    assert_eq!(heap.stats().live_blocks, 0);
    assert_eq!(heap.malloc(24).unwrap(), a);
}

#[test]
fn test_interior_free_is_not_reused() {
    let (mut buf, mut heap) = arena_heap(8 * 1024);
    let s = start_of(&mut buf);

    let a = heap.malloc(16).unwrap();
    let b = heap.malloc(16).unwrap();
    let c = heap.malloc(16).unwrap();
    assert_eq!(a.as_ptr(), unsafe { s.add(32) });
    assert_eq!(b.as_ptr(), unsafe { s.add(64) });
    assert_eq!(c.as_ptr(), unsafe { s.add(96) });

    unsafe { heap.free(b.as_ptr()) };
    assert_eq!(back_of(b), Back::Free(32));

    let d = heap.malloc(8).unwrap();
    assert_ne!(d, b);
    assert!(d > c);

    unsafe {
        heap.free(d.as_ptr());
        heap.free(c.as_ptr());
    }
    // Popping c exposed b, which got popped along with it.
    assert_eq!(heap.top, a.as_ptr());
    assert_eq!(heap.malloc(8).unwrap(), b);
}

#[test]
fn test_free_merges_runs() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let a = heap.malloc(16).unwrap();
    let b = heap.malloc(16).unwrap();
    let c = heap.malloc(16).unwrap();
    let d = heap.malloc(16).unwrap();

    unsafe {
        heap.free(b.as_ptr());
        heap.free(c.as_ptr());
    }
    assert_eq!(back_of(b), Back::Free(32));
    assert_eq!(back_of(c), Back::Free(64));

    let stats = heap.stats();
    assert_eq!(stats.live_blocks, 2);
    assert_eq!(stats.live_bytes, 32);
    assert_eq!(stats.free_runs, 1);

    unsafe { heap.free(d.as_ptr()) };
    assert_eq!(heap.top, a.as_ptr());
    assert_eq!(heap.stats().free_runs, 0);
}

#[test]
fn test_free_out_of_order() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let a = heap.malloc(16).unwrap();
    let b = heap.malloc(48).unwrap();
    let c = heap.malloc(16).unwrap();
    let d = heap.malloc(16).unwrap();

    unsafe {
        // Freed from the top down, no block finds a freed neighbour below it to merge with.
        heap.free(c.as_ptr());
        heap.free(b.as_ptr());
        heap.free(a.as_ptr());
    }
    assert_eq!(heap.stats().free_runs, 3);

    unsafe { heap.free(d.as_ptr()) };
    assert_eq!(heap.stats(), HeapStats {
        arena_bytes: INITIAL_HEAP_SIZE,
        ..HeapStats::default()
    });
    assert_eq!(heap.top, heap.root_payload());
    assert_eq!(heap.malloc(16).unwrap(), a);
}

#[test]
fn test_merge_overflow_is_skipped() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let _a = heap.malloc(16).unwrap();
    let b = heap.malloc(16).unwrap();
    let c = heap.malloc(16).unwrap();
    let _d = heap.malloc(16).unwrap();

    unsafe {
        heap.free(b.as_ptr());
        // Pretend b's run is so long that it can't be combined with c's distance.
        (*header_of(b.as_ptr())).set_back(Back::Free(usize::MAX & !(BLOCK_ALIGN - 1)));
        heap.free(c.as_ptr());
    }
    assert_eq!(back_of(c), Back::Free(32));
}

#[test]
fn test_realloc_shrink_in_place() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let a = heap.malloc(200).unwrap();
    let _b = heap.malloc(16).unwrap();
    unsafe {
        let p = heap.realloc(a, 20, BLOCK_ALIGN).unwrap();
        assert_eq!(p, a);
        assert_eq!(heap.usable_size(p), 32);
        let p = heap.realloc(a, 0, BLOCK_ALIGN).unwrap();
        assert_eq!(p, a);
        assert_eq!(heap.usable_size(p), 0);
    }
}

#[test]
fn test_realloc_grow_top_in_place() {
    let (_buf, mut heap) = arena_heap(64 * 1024);

    let _a = heap.malloc(16).unwrap();
    let b = heap.malloc(16).unwrap();
    unsafe {
        b.as_ptr().write_bytes(0xAB, 16);
        // Big enough to need the grower.
        let p = heap.realloc(b, 16 * 1024, BLOCK_ALIGN).unwrap();
        assert_eq!(p, b);
        assert_eq!(heap.usable_size(p), 16 * 1024);
        assert!(core::slice::from_raw_parts(p.as_ptr(), 16).iter().all(|&x| x == 0xAB));
    }
    assert!(heap.stats().arena_bytes >= 16 * 1024);
    let c = heap.malloc(16).unwrap();
    assert_eq!(c.as_ptr(), unsafe { b.as_ptr().add(16 * 1024 + HEADER_SIZE) });
}

#[test]
fn test_realloc_grow_interior_moves() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let a = heap.malloc(32).unwrap();
    let b = heap.malloc(16).unwrap();
    unsafe {
        for i in 0..32 {
            a.as_ptr().add(i).write(i as u8);
        }
        let p = heap.realloc(a, 100, BLOCK_ALIGN).unwrap();
        assert_ne!(p, a);
        assert!(p > b);
        assert_eq!(heap.usable_size(p), 112);
        for i in 0..32 {
            assert_eq!(*p.as_ptr().add(i), i as u8);
        }
        assert_eq!(back_of(a), Back::Free(HEADER_SIZE));
    }
    assert_eq!(heap.stats().live_blocks, 2);
}

#[test]
fn test_realloc_failure_keeps_block() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let a = heap.malloc(16).unwrap();
    let _b = heap.malloc(16).unwrap();
    unsafe { a.as_ptr().write_bytes(7, 16) };
    let before = heap.stats();

    assert_eq!(
        unsafe { heap.realloc(a, 1 << 20, BLOCK_ALIGN) },
        Err(AllocError::OutOfMemory)
    );
    assert_eq!(heap.stats(), before);
    assert_eq!(unsafe { heap.usable_size(a) }, 16);
    assert!(unsafe { core::slice::from_raw_parts(a.as_ptr(), 16) }
        .iter()
        .all(|&x| x == 7));
}

#[test]
fn test_realloc_failure_on_top() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let a = heap.malloc(16).unwrap();
    assert_eq!(
        unsafe { heap.realloc(a, usize::MAX - 3, BLOCK_ALIGN) },
        Err(AllocError::OutOfMemory)
    );
    assert_eq!(
        unsafe { heap.realloc(a, 1 << 20, BLOCK_ALIGN) },
        Err(AllocError::OutOfMemory)
    );
    assert_eq!(unsafe { heap.usable_size(a) }, 16);
    assert_eq!(heap.top, a.as_ptr());
}

#[test]
fn test_realloc_keeps_alignment() {
    let (_buf, mut heap) = arena_heap(64 * 1024);

    let a = heap.memalign(256, 16).unwrap();
    let _b = heap.malloc(16).unwrap();
    let p = unsafe { heap.realloc(a, 1000, 256) }.unwrap();
    assert_ne!(p, a);
    assert_eq!(p.as_ptr() as usize % 256, 0);
}

#[test]
fn test_memalign() {
    let (_buf, mut heap) = arena_heap(256 * 1024);

    for shift in 0..=12 {
        let align = 1 << shift;
        for size in [0, 1, 17, 100] {
            let p = heap.memalign(align, size).unwrap();
            assert_eq!(p.as_ptr() as usize % align.max(BLOCK_ALIGN), 0);
            assert!(unsafe { heap.usable_size(p) } >= size);
            unsafe { p.as_ptr().write_bytes(0xCD, size) };
        }
    }
}

#[test]
fn test_memalign_rejects_bad_alignment() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    for align in [0, 3, 24, 48, usize::MAX] {
        assert_eq!(heap.memalign(align, 16), Err(AllocError::InvalidArgument));
    }
    // Rejections don't even initialize the heap.
    assert!(heap.start.is_null());
}

#[test]
fn test_memalign_on_root_is_reclaimed() {
    let (mut buf, mut heap) = arena_heap(8 * 1024);
    let s = start_of(&mut buf);

    let p = heap.memalign(1024, 16).unwrap();
    assert_eq!(p.as_ptr() as usize % 1024, 0);
    // Whatever padding was needed went to the root.
    assert_eq!(
        unsafe { (*s.cast::<Header>()).size },
        p.as_ptr() as usize - s as usize - 2 * HEADER_SIZE
    );

    unsafe { heap.free(p.as_ptr()) };
    assert_eq!(heap.top, heap.root_payload());
    assert_eq!(unsafe { *s.cast::<Header>() }, Header::ROOT);
    // Nothing of the padding is left behind.
    assert_eq!(heap.malloc(16).unwrap().as_ptr(), unsafe { s.add(2 * HEADER_SIZE) });
}

#[test]
fn test_cascade_onto_root_resets_padding() {
    let (mut buf, mut heap) = arena_heap(8 * 1024);
    let s = start_of(&mut buf);

    let a = heap.memalign(256, 16).unwrap();
    let b = heap.malloc(40).unwrap();
    unsafe {
        heap.free(a.as_ptr());
        heap.free(b.as_ptr());
    }
    assert_eq!(heap.top, heap.root_payload());
    assert_eq!(unsafe { *s.cast::<Header>() }, Header::ROOT);
    assert_eq!(heap.stats().free_runs, 0);
}

#[test]
fn test_memalign_failure_restores_top() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let a = heap.malloc(16).unwrap();
    assert_eq!(heap.memalign(4096, 8 * 1024), Err(AllocError::OutOfMemory));
    assert_eq!(unsafe { heap.usable_size(a) }, 16);
    assert_eq!(
        heap.memalign(usize::MAX / 2 + 1, 16),
        Err(AllocError::OutOfMemory)
    );
    assert_eq!(unsafe { heap.usable_size(a) }, 16);

    let b = heap.malloc(16).unwrap();
    assert_eq!(b.as_ptr(), unsafe { a.as_ptr().add(32) });
}

#[test]
fn test_out_of_memory() {
    let (_buf, mut heap) = arena_heap(8 * 1024);

    let a = heap.malloc(16).unwrap();
    assert_eq!(heap.malloc(usize::MAX), Err(AllocError::OutOfMemory));
    assert_eq!(heap.malloc(usize::MAX - HEADER_SIZE * 4), Err(AllocError::OutOfMemory));
    assert_eq!(heap.malloc(8 * 1024), Err(AllocError::OutOfMemory));
    assert_eq!(heap.top, a.as_ptr());

    // Memory up to the end of the buffer can still be handed out.
    let b = heap.malloc(4 * 1024).unwrap();
    assert_eq!(b.as_ptr(), unsafe { a.as_ptr().add(32) });
}

#[test]
fn test_uninitializable_heap() {
    let (_buf, mut heap) = arena_heap(1024);
    assert_eq!(heap.malloc(1), Err(AllocError::OutOfMemory));
    assert!(heap.start.is_null());
}

#[test]
fn test_stats_tracks_live_bytes() {
    let (_buf, mut heap) = arena_heap(64 * 1024);

    let sizes = [1, 16, 17, 250, 0, 4000];
    let objects: Vec<_> = sizes.iter().map(|&s| heap.malloc(s).unwrap()).collect();
    let expected: usize = sizes.iter().map(|&s| round_size(s).unwrap()).sum();

    let stats = heap.stats();
    assert_eq!(stats.live_blocks, sizes.len());
    assert_eq!(stats.live_bytes, expected);

    unsafe { heap.free(objects[3].as_ptr()) };
    let stats = heap.stats();
    assert_eq!(stats.live_blocks, sizes.len() - 1);
    assert_eq!(stats.live_bytes, expected - 256);
    assert_eq!(stats.free_runs, 1);
}

#[test]
fn test_with_logging() {
    with_test_logging(|| {
        let (_buf, mut heap) = arena_heap(8 * 1024);
        let a = heap.malloc(16).unwrap();
        let b = heap.memalign(64, 16).unwrap();
        let b = unsafe { heap.realloc(b, 64, 64) }.unwrap();
        unsafe {
            heap.free(a.as_ptr());
            heap.free(b.as_ptr());
        }
        assert_eq!(heap.malloc(16).unwrap(), a);
        assert!(heap.malloc(1 << 20).is_err());
    });
}
