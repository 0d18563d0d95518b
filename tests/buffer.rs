//! Integration tests for the atom buffer.

use ember_memory::{BufOptions, Buffer, Heap, HeapFlags, MemoryError};

fn heap() -> Heap {
    Heap::with_capacity(16 * 1024, HeapFlags::new().with_no_trace()).unwrap()
}

#[test]
fn load_and_read_back() {
    let heap = heap();
    let mut buf: Buffer<'_, u8> = Buffer::new(4, BufOptions::new(), &heap).unwrap();

    buf.load(b"hello", 0).unwrap();
    assert_eq!(buf.as_slice(), b"hello");
    assert_eq!(buf.len(), 5);

    // Loading inside the payload keeps the longer length.
    buf.load(b"ab", 1).unwrap();
    assert_eq!(buf.as_slice(), b"hablo");
    assert_eq!(buf.len(), 5);

    // Loading past the end stretches it.
    buf.load(b"xy", 6).unwrap();
    assert_eq!(buf.len(), 8);
    assert_eq!(&buf.as_slice()[6..], b"xy");
}

#[test]
fn growth_doubles_from_one_heap_unit() {
    let heap = heap();
    let mut buf: Buffer<'_, u8> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    assert_eq!(buf.capacity(), 0);

    buf.expand(100).unwrap();
    let mut expected = Heap::unit_bytes();
    while expected < 100 {
        expected <<= 1;
    }
    assert_eq!(buf.capacity(), expected);
}

#[test]
fn no_growth_allocates_exactly() {
    let heap = heap();
    let opts = BufOptions::new().with_no_growth();
    let mut buf: Buffer<'_, u8> = Buffer::new(0, opts, &heap).unwrap();

    buf.expand(100).unwrap();
    assert_eq!(buf.capacity(), 100);

    buf.expand(101).unwrap();
    assert_eq!(buf.capacity(), 101);
}

#[test]
fn expand_preserves_payload_and_length() {
    let heap = heap();
    let mut buf: Buffer<'_, u32> = Buffer::new(2, BufOptions::new(), &heap).unwrap();
    buf.load(&[0xDEAD_BEEF, 0x0BAD_F00D], 0).unwrap();

    buf.expand(500).unwrap();
    assert!(buf.capacity() >= 500);
    assert_eq!(buf.as_slice(), &[0xDEAD_BEEF, 0x0BAD_F00D]);
    assert_eq!(buf.len(), 2);
}

#[test]
fn aliasing_source_is_rejected_when_growth_is_needed() {
    let heap = heap();
    let mut buf: Buffer<'_, u8> = Buffer::new(4, BufOptions::new(), &heap).unwrap();
    buf.load(b"abcd", 0).unwrap();

    // A source inside the backing would dangle across the reallocation.
    let alias: &[u8] = unsafe { core::slice::from_raw_parts(buf.as_ptr(), 2) };
    assert_eq!(buf.load(alias, 3), Err(MemoryError::InvalidPointer));

    // Without growth the same load is fine.
    let alias: &[u8] = unsafe { core::slice::from_raw_parts(buf.as_ptr(), 2) };
    buf.load(alias, 2).unwrap();
    assert_eq!(buf.as_slice(), b"abab");
}

#[test]
fn fill_writes_native_width_atoms() {
    let heap = heap();

    let mut bytes: Buffer<'_, u8> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    bytes.fill(0xA5, 0, 8).unwrap();
    assert_eq!(bytes.as_slice(), &[0xA5; 8]);

    let mut words: Buffer<'_, u16> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    words.fill(0xBEEF, 2, 3).unwrap();
    assert_eq!(words.as_slice(), &[0, 0, 0xBEEF, 0xBEEF, 0xBEEF]);

    let mut quads: Buffer<'_, u32> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    quads.fill(0xAABB_CCDD, 0, 2).unwrap();
    assert_eq!(quads.as_slice(), &[0xAABB_CCDD; 2]);

    #[cfg(target_pointer_width = "64")]
    {
        let mut longs: Buffer<'_, u64> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
        longs.fill(0x1122_3344_5566_7788, 0, 2).unwrap();
        assert_eq!(longs.as_slice(), &[0x1122_3344_5566_7788; 2]);
    }
}

#[test]
fn shared_attachment_survives_destruction_untouched() {
    let heap = heap();
    let mut arr = [0xABu8; 256];
    {
        let opts = BufOptions::new().with_secured();
        let mut buf: Buffer<'_, u8> = Buffer::new(0, opts, &heap).unwrap();
        buf.attach_slice(&mut arr, 100, true).unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.capacity(), 256);
        assert!(buf.is_attached());
        assert!(buf.is_shared());
    }
    // No wipe, no free: the caller's bytes are exactly as they were.
    assert!(arr.iter().all(|&b| b == 0xAB));
}

#[test]
fn secured_private_attachment_is_wiped() {
    let heap = heap();
    let mut arr = [0xABu8; 32];
    {
        let opts = BufOptions::new().with_secured();
        let mut buf: Buffer<'_, u8> = Buffer::new(0, opts, &heap).unwrap();
        buf.attach_slice(&mut arr, 32, false).unwrap();
    }
    assert!(arr.iter().all(|&b| b == 0));
}

#[test]
fn attached_buffers_do_not_grow() {
    let heap = heap();
    let mut arr = [0u8; 16];
    let mut buf: Buffer<'_, u8> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    buf.attach_slice(&mut arr, 0, false).unwrap();

    // Writes within the attached capacity are fine.
    buf.load(b"0123456789abcdef", 0).unwrap();
    assert_eq!(buf.len(), 16);

    assert_eq!(buf.expand(17), Err(MemoryError::UnexpectedCall));

    buf.detach().unwrap();
    assert!(!buf.is_attached());
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.capacity(), 0);
}

#[test]
fn set_empty_wipes_secured_capacity() {
    let heap = heap();
    let opts = BufOptions::new().with_secured();
    let mut buf: Buffer<'_, u8> = Buffer::new(16, opts, &heap).unwrap();
    buf.load(b"sensitive", 0).unwrap();

    buf.set_empty();
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.capacity(), 16);

    buf.set_len(16).unwrap();
    assert_eq!(buf.as_slice(), &[0u8; 16]);
}

#[test]
fn set_len_is_bounded_by_capacity() {
    let heap = heap();
    let mut buf: Buffer<'_, u8> = Buffer::new(8, BufOptions::new(), &heap).unwrap();
    buf.set_len(8).unwrap();
    assert_eq!(buf.set_len(9), Err(MemoryError::OutOfBounds));
}

#[test]
fn unbacked_buffers_cannot_expand() {
    let mut buf: Buffer<'_, u16> = Buffer::empty(BufOptions::new());
    assert_eq!(buf.expand(1), Err(MemoryError::UnexpectedCall));
    assert_eq!(buf.len(), 0);
}

#[test]
fn equality_is_length_and_payload() {
    let heap = heap();
    let mut a: Buffer<'_, u16> = Buffer::new(0, BufOptions::new(), &heap).unwrap();
    let mut b: Buffer<'_, u16> = Buffer::new(64, BufOptions::new(), &heap).unwrap();

    a.load(&[1, 2, 3], 0).unwrap();
    b.load(&[1, 2, 3], 0).unwrap();
    assert_eq!(a, b);

    b.append(&[4]).unwrap();
    assert_ne!(a, b);
}

#[test]
fn release_returns_memory_to_the_heap() {
    let heap = heap();
    let baseline = heap.stats().unwrap().free;

    let mut buf: Buffer<'_, u8> = Buffer::new(256, BufOptions::new(), &heap).unwrap();
    assert!(heap.stats().unwrap().free < baseline);
    buf.release().unwrap();
    assert_eq!(heap.stats().unwrap().free, baseline);

    // Usable again after a release.
    buf.expand(8).unwrap();
    buf.append(b"again").unwrap();
    assert_eq!(buf.as_slice(), b"again");
}
