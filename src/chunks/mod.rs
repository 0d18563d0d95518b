//! Byte streams with cheap growth at both ends.
//!
//! Two interchangeable representations store a byte stream on the heap:
//!
//! * [`ChunkList`]: the native form: a sequence of partially filled
//!   chunks carved from the heap, so pushes and pops at either end never
//!   shift existing payload;
//! * [`FlatList`]: the contiguous equivalence: one [`Buffer<u8>`] holding
//!   the whole stream, with the same operation set.
//!
//! [`ByteList`] is the polymorphic front over both; [`ByteList::new`]
//! picks the representation selected at build time (`chunk-list` feature).
//! Either representation can also hold an *attached view* of caller-owned
//! bytes instead of heap chunks.

mod flat;
mod list;

use core::ptr::NonNull;

pub use flat::FlatList;
pub use list::ChunkList;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::heap::Heap;

/// One chunk of a [`ChunkList`]: a heap block holding `used` committed
/// bytes followed by `free` writable ones.
pub(crate) struct Chunk {
    pub(crate) data: NonNull<u8>,
    pub(crate) used: usize,
    pub(crate) free: usize,
}

impl Chunk {
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.used + self.free
    }
}

/// A contiguous writable span leased from a stream by `acquire_block` and
/// committed back with `release_block`.
///
/// The span stays leased to the caller until released; the stream does not
/// touch it in between.
#[derive(Clone, Copy, Debug)]
pub struct MemBlock {
    ptr: NonNull<u8>,
    len: usize,
}

impl MemBlock {
    pub(crate) fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Writable capacity of the lease, bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn raw(&self) -> NonNull<u8> {
        self.ptr
    }

    /// The leased span as a slice.
    ///
    /// # Safety
    /// The lease must still be outstanding (not yet released) on the
    /// stream that produced it, and no other reference to the span may
    /// exist for `'a`.
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        // SAFETY: the span is part of a live, zero-initialized chunk that
        // the stream does not touch while the lease is outstanding.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// Iterator over the committed segments of a stream, head to tail.
pub struct Segments<'a> {
    inner: SegmentsInner<'a>,
}

enum SegmentsInner<'a> {
    One(Option<&'a [u8]>),
    Chunks(std::collections::vec_deque::Iter<'a, Chunk>),
}

impl<'a> Segments<'a> {
    pub(crate) fn one(segment: &'a [u8]) -> Self {
        Self {
            inner: SegmentsInner::One(Some(segment)),
        }
    }

    pub(crate) fn chunks(iter: std::collections::vec_deque::Iter<'a, Chunk>) -> Self {
        Self {
            inner: SegmentsInner::Chunks(iter),
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        match &mut self.inner {
            SegmentsInner::One(s) => s.take(),
            SegmentsInner::Chunks(it) => it.next().map(|c| {
                // SAFETY: `used` bytes of a live chunk are committed and
                // initialized; the borrow is tied to the stream.
                unsafe { core::slice::from_raw_parts(c.data.as_ptr(), c.used) }
            }),
        }
    }
}

/// Byte stream with a build-selected representation.
pub enum ByteList<'h> {
    Chunked(ChunkList<'h>),
    Flat(FlatList<'h>),
}

impl<'h> ByteList<'h> {
    /// Creates a stream in the default representation: linked chunks with
    /// the `chunk-list` feature, contiguous otherwise.
    pub fn new(heap: &'h Heap) -> Result<Self> {
        #[cfg(feature = "chunk-list")]
        {
            Ok(Self::Chunked(ChunkList::new(heap)))
        }
        #[cfg(not(feature = "chunk-list"))]
        {
            Ok(Self::Flat(FlatList::new(heap)?))
        }
    }

    pub fn chunked(heap: &'h Heap) -> Self {
        Self::Chunked(ChunkList::new(heap))
    }

    pub fn flat(heap: &'h Heap) -> Result<Self> {
        Ok(Self::Flat(FlatList::new(heap)?))
    }

    /// Total committed bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Chunked(l) => l.len(),
            Self::Flat(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every owned chunk, or drops an attached view.
    pub fn clear(&mut self) -> Result<()> {
        match self {
            Self::Chunked(l) => l.clear(),
            Self::Flat(l) => l.clear(),
        }
    }

    /// Points the stream at caller-owned bytes without copying.
    pub fn attach(&mut self, data: &'h mut [u8]) -> Result<()> {
        match self {
            Self::Chunked(l) => l.attach(data),
            Self::Flat(l) => l.attach(data),
        }
    }

    /// Appends `data` at the chosen end, preserving stream order.
    pub fn push(&mut self, data: &[u8], to_head: bool) -> Result<()> {
        match self {
            Self::Chunked(l) => l.push(data, to_head),
            Self::Flat(l) => l.push(data, to_head),
        }
    }

    /// Copies `dst.len()` bytes out of the chosen end, optionally
    /// consuming them. Returns `Ok(false)`, not an error, when the
    /// stream holds fewer bytes.
    pub fn get(&mut self, dst: &mut [u8], from_head: bool, remove: bool) -> Result<bool> {
        match self {
            Self::Chunked(l) => l.get(dst, from_head, remove),
            Self::Flat(l) => l.get(dst, from_head, remove),
        }
    }

    /// Discards `count` bytes from the chosen end; polite `Ok(false)`
    /// when the stream is shorter.
    pub fn skip(&mut self, count: usize, from_head: bool) -> Result<bool> {
        match self {
            Self::Chunked(l) => l.skip(count, from_head),
            Self::Flat(l) => l.skip(count, from_head),
        }
    }

    /// Reserves `bytes` of writable space at the chosen end.
    pub fn pre_alloc(&mut self, bytes: usize, to_head: bool) -> Result<()> {
        match self {
            Self::Chunked(l) => l.pre_alloc(bytes, to_head),
            Self::Flat(l) => l.pre_alloc(bytes, to_head),
        }
    }

    /// Leases a contiguous writable span of at least one byte (aiming for
    /// `bytes`) at the chosen end. Commit with
    /// [`release_block`](Self::release_block).
    pub fn acquire_block(&mut self, bytes: usize, to_head: bool) -> Result<MemBlock> {
        match self {
            Self::Chunked(l) => l.acquire_block(bytes, to_head),
            Self::Flat(l) => l.acquire_block(bytes, to_head),
        }
    }

    /// Commits `used` bytes of a leased span; `used == 0` discards it.
    pub fn release_block(&mut self, blk: MemBlock, used: usize) -> Result<()> {
        match self {
            Self::Chunked(l) => l.release_block(blk, used),
            Self::Flat(l) => l.release_block(blk, used),
        }
    }

    /// Safe acquire/release round trip: the closure fills the span and
    /// returns the number of bytes to commit.
    pub fn push_with<F>(&mut self, bytes: usize, to_head: bool, f: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        match self {
            Self::Chunked(l) => l.push_with(bytes, to_head, f),
            Self::Flat(l) => l.push_with(bytes, to_head, f),
        }
    }

    /// Moves `bytes` bytes (all of `src` when 0) out of `src` into the
    /// chosen end of `self`. Whole-stream moves splice without copying in
    /// the chunked representation. Both streams must share the
    /// representation and the heap.
    pub fn move_from(&mut self, src: &mut ByteList<'h>, to_head: bool, bytes: usize) -> Result<()> {
        match (self, src) {
            (Self::Chunked(d), Self::Chunked(s)) => d.move_from(s, to_head, bytes),
            (Self::Flat(d), Self::Flat(s)) => d.move_from(s, to_head, bytes),
            _ => Err(crate::MemoryError::bad_param(
                "mixed stream representations",
            )),
        }
    }

    /// Resets the stream to empty while keeping (and, if needed, growing)
    /// `reserve` bytes of writable space; surplus chunks are returned to
    /// the heap.
    pub fn reuse(&mut self, reserve: usize) -> Result<()> {
        match self {
            Self::Chunked(l) => l.reuse(reserve),
            Self::Flat(l) => l.reuse(reserve),
        }
    }

    /// Iterates the committed segments head to tail; an attached view
    /// yields one segment.
    pub fn segments(&self) -> Segments<'_> {
        match self {
            Self::Chunked(l) => l.segments(),
            Self::Flat(l) => l.segments(),
        }
    }

    /// Index of the first `sample` at or after `offset`, counted over the
    /// whole stream.
    pub fn find_byte(&self, offset: usize, sample: u8) -> Option<usize> {
        match self {
            Self::Chunked(l) => l.find_byte(offset, sample),
            Self::Flat(l) => l.find_byte(offset, sample),
        }
    }

    /// Appends a buffer's payload (replacing the stream when `append` is
    /// false); the source is emptied unless `copy` is set. The flat
    /// representation transfers pointer ownership when it can.
    pub fn push_buffer(
        &mut self,
        src: &mut Buffer<'h, u8>,
        append: bool,
        copy: bool,
    ) -> Result<()> {
        match self {
            Self::Chunked(l) => l.push_buffer(src, append, copy),
            Self::Flat(l) => l.push_buffer(src, append, copy),
        }
    }

    /// Drains (or copies, with `copy`) the stream into a buffer.
    pub fn take_into_buffer(
        &mut self,
        dst: &mut Buffer<'h, u8>,
        append: bool,
        copy: bool,
    ) -> Result<()> {
        match self {
            Self::Chunked(l) => l.take_into_buffer(dst, append, copy),
            Self::Flat(l) => l.take_into_buffer(dst, append, copy),
        }
    }
}
