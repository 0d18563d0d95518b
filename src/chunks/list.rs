//! Linked chunk stream.
//!
//! Payload lives in heap chunks; pushes fill the free tails of existing
//! chunks before allocating, and whole-chunk moves between lists never
//! copy payload. An attached view borrows caller bytes instead of owning
//! chunks; any mutating operation collapses the view to an empty owned
//! list first.

use std::collections::VecDeque;

use core::ptr::NonNull;

use super::{Chunk, MemBlock, Segments};
use crate::buffer::Buffer;
use crate::error::{MemoryError, Result};
use crate::heap::Heap;
use crate::utils::align_up;

enum Repr {
    Owned(VecDeque<Chunk>),
    View { ptr: NonNull<u8>, len: usize },
}

/// Byte stream spread over a list of heap-backed chunks.
pub struct ChunkList<'h> {
    heap: &'h Heap,
    repr: Repr,
}

impl<'h> ChunkList<'h> {
    /// Creates an empty list drawing chunks from `heap`.
    pub fn new(heap: &'h Heap) -> Self {
        Self {
            heap,
            repr: Repr::Owned(VecDeque::new()),
        }
    }

    /// Total committed bytes.
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Owned(q) => q.iter().map(|c| c.used).sum(),
            Repr::View { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every owned chunk; an attached view just resets to an
    /// empty owned list. Keeps going past a failing free and reports the
    /// first error.
    pub fn clear(&mut self) -> Result<()> {
        if matches!(self.repr, Repr::View { .. }) {
            self.repr = Repr::Owned(VecDeque::new());
            return Ok(());
        }
        let heap = self.heap;
        let Repr::Owned(q) = &mut self.repr else {
            return Err(MemoryError::Internal);
        };
        let mut first_err = None;
        while let Some(chunk) = q.pop_front() {
            if let Err(e) = heap.free(chunk.data) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Points the list at caller-owned bytes without copying. The view is
    /// read-only; the first mutating operation drops it.
    pub fn attach(&mut self, data: &'h mut [u8]) -> Result<()> {
        self.clear()?;
        self.repr = Repr::View {
            ptr: NonNull::new(data.as_mut_ptr()).ok_or(MemoryError::InvalidPointer)?,
            len: data.len(),
        };
        Ok(())
    }

    fn make_owned(&mut self) -> Result<()> {
        if matches!(self.repr, Repr::View { .. }) {
            self.clear()?;
        }
        Ok(())
    }

    /// Allocates one chunk aiming for `want` writable bytes; the heap may
    /// return less under pressure (at least one unit) or slightly more
    /// when a split remainder is absorbed.
    fn create_chunk(heap: &'h Heap, want: usize) -> Result<Chunk> {
        let rounded = align_up(want.max(1), Heap::unit_bytes());
        let (block, capacity) = heap.allocate_in_range(1, rounded)?;
        // SAFETY: the block spans `capacity` fresh bytes; zeroing keeps
        // committed reads defined.
        unsafe { core::ptr::write_bytes(block.cast::<u8>().as_ptr(), 0, capacity) };
        Ok(Chunk {
            data: block.cast(),
            used: 0,
            free: capacity,
        })
    }

    /// Reserves at least `bytes` of writable space at the chosen end,
    /// counting the free space of the empty chunks already there.
    pub fn pre_alloc(&mut self, bytes: usize, to_head: bool) -> Result<()> {
        self.make_owned()?;
        let heap = self.heap;
        let mut want = bytes;

        let Repr::Owned(q) = &mut self.repr else {
            return Err(MemoryError::Internal);
        };
        if to_head {
            for c in q.iter() {
                if c.used != 0 || want == 0 {
                    break;
                }
                want = want.saturating_sub(c.free);
            }
        } else {
            for c in q.iter().rev() {
                if c.used != 0 || want == 0 {
                    break;
                }
                want = want.saturating_sub(c.free);
            }
        }

        while want > 0 {
            let chunk = Self::create_chunk(heap, want)?;
            want = want.saturating_sub(chunk.free);
            if to_head {
                q.push_front(chunk);
            } else {
                q.push_back(chunk);
            }
        }
        Ok(())
    }

    /// Appends `data` at the chosen end. Tail pushes fill the free tail
    /// of the last partially filled chunk first; head pushes copy source
    /// tail-ends into the leading empty chunks so stream order is
    /// preserved. New chunks are allocated as needed; chunks already
    /// committed stay committed if a later allocation fails.
    pub fn push(&mut self, data: &[u8], to_head: bool) -> Result<()> {
        self.make_owned()?;
        let mut data = data;
        loop {
            {
                let Repr::Owned(q) = &mut self.repr else {
                    return Err(MemoryError::Internal);
                };
                if to_head {
                    let first_used = q.iter().position(|c| c.used != 0).unwrap_or(q.len());
                    let mut i = first_used;
                    while i > 0 && !data.is_empty() {
                        i -= 1;
                        let c = &mut q[i];
                        if c.used != 0 {
                            return Err(MemoryError::Internal);
                        }
                        let n = c.free.min(data.len());
                        let (rest, tail) = data.split_at(data.len() - n);
                        // SAFETY: n <= c.free, so the copy stays inside
                        // the chunk's writable area.
                        unsafe {
                            core::ptr::copy_nonoverlapping(tail.as_ptr(), c.data.as_ptr(), n);
                        }
                        c.used += n;
                        c.free -= n;
                        data = rest;
                    }
                } else {
                    let mut start = q.len();
                    for i in (0..q.len()).rev() {
                        if q[i].free == 0 {
                            break;
                        }
                        start = i;
                        if q[i].used != 0 {
                            break;
                        }
                    }
                    let mut i = start;
                    while i < q.len() && !data.is_empty() {
                        let c = &mut q[i];
                        let n = c.free.min(data.len());
                        let (head, rest) = data.split_at(n);
                        // SAFETY: the free tail of the chunk holds n bytes.
                        unsafe {
                            core::ptr::copy_nonoverlapping(
                                head.as_ptr(),
                                c.data.as_ptr().add(c.used),
                                n,
                            );
                        }
                        c.used += n;
                        c.free -= n;
                        data = rest;
                        i += 1;
                    }
                }
            }
            if data.is_empty() {
                return Ok(());
            }
            self.pre_alloc(data.len(), to_head)?;
        }
    }

    /// Copies `dst.len()` bytes from the chosen end, optionally consuming
    /// them; exhausted chunks are destroyed during a remove. `Ok(false)`
    /// when the list is shorter than the request.
    pub fn get(&mut self, dst: &mut [u8], from_head: bool, remove: bool) -> Result<bool> {
        let count = dst.len();
        self.take(Some(dst), count, from_head, remove)
    }

    /// Discards `count` bytes from the chosen end; `Ok(false)` when the
    /// list is shorter.
    pub fn skip(&mut self, count: usize, from_head: bool) -> Result<bool> {
        self.take(None, count, from_head, true)
    }

    fn take(
        &mut self,
        mut dst: Option<&mut [u8]>,
        count: usize,
        from_head: bool,
        remove: bool,
    ) -> Result<bool> {
        if count == 0 {
            return Ok(true);
        }
        if self.len() < count {
            return Ok(false);
        }

        let view = match &self.repr {
            Repr::View { ptr, len } => Some((*ptr, *len)),
            Repr::Owned(_) => None,
        };
        if let Some((ptr, len)) = view {
            if let Some(d) = dst.as_deref_mut() {
                let src_off = if from_head { 0 } else { len - count };
                // SAFETY: count <= len readable bytes behind the view.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        ptr.as_ptr().add(src_off),
                        d.as_mut_ptr(),
                        count,
                    );
                }
            }
            if remove {
                let rest = len - count;
                self.repr = if rest == 0 {
                    Repr::Owned(VecDeque::new())
                } else {
                    Repr::View {
                        ptr: if from_head {
                            // SAFETY: count < len, still inside the view.
                            unsafe { NonNull::new_unchecked(ptr.as_ptr().add(count)) }
                        } else {
                            ptr
                        },
                        len: rest,
                    }
                };
            }
            return Ok(true);
        }

        let heap = self.heap;
        let Repr::Owned(q) = &mut self.repr else {
            return Err(MemoryError::Internal);
        };
        let mut remaining = count;
        if from_head {
            let mut off = 0;
            let mut i = 0;
            while remaining > 0 {
                if i >= q.len() {
                    return Err(MemoryError::Internal);
                }
                let (data, used) = (q[i].data, q[i].used);
                let n = used.min(remaining);
                if let Some(d) = dst.as_deref_mut() {
                    // SAFETY: n <= used committed bytes; dst has room for
                    // `count` bytes by construction.
                    unsafe {
                        core::ptr::copy_nonoverlapping(data.as_ptr(), d.as_mut_ptr().add(off), n);
                    }
                }
                off += n;
                remaining -= n;
                if remove {
                    if n == used {
                        let chunk = q.remove(i).ok_or(MemoryError::Internal)?;
                        heap.free(chunk.data)?;
                    } else {
                        // SAFETY: overlap-safe shift inside one chunk.
                        unsafe {
                            core::ptr::copy(data.as_ptr().add(n), data.as_ptr(), used - n);
                        }
                        let c = &mut q[i];
                        c.used -= n;
                        c.free += n;
                        i += 1;
                    }
                } else {
                    i += 1;
                }
            }
        } else {
            let mut end = count;
            let mut i = q.len();
            while remaining > 0 {
                if i == 0 {
                    return Err(MemoryError::Internal);
                }
                i -= 1;
                let (data, used) = (q[i].data, q[i].used);
                let n = used.min(remaining);
                if let Some(d) = dst.as_deref_mut() {
                    // SAFETY: the last n committed bytes of the chunk.
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            data.as_ptr().add(used - n),
                            d.as_mut_ptr().add(end - n),
                            n,
                        );
                    }
                }
                end -= n;
                remaining -= n;
                if remove {
                    if n == used {
                        let chunk = q.remove(i).ok_or(MemoryError::Internal)?;
                        heap.free(chunk.data)?;
                    } else {
                        let c = &mut q[i];
                        c.used -= n;
                        c.free += n;
                    }
                }
            }
        }
        Ok(true)
    }

    /// Leases a contiguous writable span at the chosen end: the empty
    /// chunk nearest the committed data is reused, otherwise a new chunk
    /// of at least `bytes` is allocated.
    pub fn acquire_block(&mut self, bytes: usize, to_head: bool) -> Result<MemBlock> {
        self.make_owned()?;
        let heap = self.heap;
        let Repr::Owned(q) = &mut self.repr else {
            return Err(MemoryError::Internal);
        };

        let reusable = if to_head {
            let first_used = q.iter().position(|c| c.used != 0).unwrap_or(q.len());
            first_used.checked_sub(1)
        } else {
            let after_last = q.iter().rposition(|c| c.used != 0).map_or(0, |i| i + 1);
            (after_last < q.len()).then_some(after_last)
        };

        if let Some(i) = reusable {
            return Ok(MemBlock::new(q[i].data, q[i].capacity()));
        }

        let chunk = Self::create_chunk(heap, bytes)?;
        let blk = MemBlock::new(chunk.data, chunk.capacity());
        if to_head {
            q.push_front(chunk);
        } else {
            q.push_back(chunk);
        }
        Ok(blk)
    }

    /// Commits `used` bytes of a leased span. `used == 0` destroys the
    /// chunk instead. The lease must match a chunk of this list.
    pub fn release_block(&mut self, blk: MemBlock, used: usize) -> Result<()> {
        let heap = self.heap;
        let Repr::Owned(q) = &mut self.repr else {
            return Err(MemoryError::bad_param("no outstanding lease"));
        };
        for i in 0..q.len() {
            if q[i].data != blk.raw() {
                continue;
            }
            if q[i].capacity() != blk.len() {
                return Err(MemoryError::bad_param("lease does not match chunk"));
            }
            if used > blk.len() || used < q[i].used {
                return Err(MemoryError::bad_param("committed size out of range"));
            }
            if used == 0 {
                let chunk = q.remove(i).ok_or(MemoryError::Internal)?;
                return heap.free(chunk.data);
            }
            let c = &mut q[i];
            c.free -= used - c.used;
            c.used = used;
            return Ok(());
        }
        Err(MemoryError::bad_param("lease does not match chunk"))
    }

    /// Safe acquire/release round trip: `f` fills the span and returns
    /// the number of bytes to commit (clamped to the span).
    pub fn push_with<F>(&mut self, bytes: usize, to_head: bool, f: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let blk = self.acquire_block(bytes, to_head)?;
        // SAFETY: the lease is outstanding and exclusively ours until the
        // release below.
        let used = f(unsafe { blk.as_mut_slice() }).min(blk.len());
        self.release_block(blk, used)?;
        Ok(used)
    }

    /// Moves `bytes` bytes (all of `src` when 0) from the head of `src`
    /// into the chosen end of `self`. A whole-stream move splices chunk
    /// linkage without copying payload; a partial move transfers whole
    /// chunks, pushing a split chunk's trailing fragment back into the
    /// source head.
    pub fn move_from(&mut self, src: &mut ChunkList<'h>, to_head: bool, bytes: usize) -> Result<()> {
        if !core::ptr::eq(self.heap, src.heap) {
            return Err(MemoryError::bad_param("streams use different heaps"));
        }
        if matches!(self.repr, Repr::View { .. }) {
            return Err(MemoryError::bad_param("destination is an attached view"));
        }

        // Attached source: copy out of the view, then consume it.
        let view = match &src.repr {
            Repr::View { ptr, len } => Some((*ptr, *len)),
            Repr::Owned(_) => None,
        };
        if let Some((ptr, len)) = view {
            let n = if bytes == 0 { len } else { bytes };
            if n > len {
                return Err(MemoryError::bad_param("move exceeds source"));
            }
            // SAFETY: n <= len readable bytes behind the view; the push
            // copies them before src is touched again.
            let data = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), n) };
            self.push(data, to_head)?;
            if bytes == 0 {
                return src.clear();
            }
            if !src.skip(bytes, true)? {
                return Err(MemoryError::Internal);
            }
            return Ok(());
        }

        let total = src.len();
        if total == 0 {
            return Ok(());
        }
        if bytes > total {
            return Err(MemoryError::bad_param("move exceeds source"));
        }

        if bytes == 0 || bytes == total {
            let Repr::Owned(sq) = &mut src.repr else {
                return Err(MemoryError::Internal);
            };
            let drained = core::mem::take(sq);
            let Repr::Owned(dq) = &mut self.repr else {
                return Err(MemoryError::Internal);
            };
            if to_head {
                for chunk in drained.into_iter().rev() {
                    dq.push_front(chunk);
                }
            } else {
                dq.extend(drained);
            }
            return Ok(());
        }

        let mut remaining = bytes;
        let mut insert_at = 0usize;
        while remaining > 0 {
            let mut chunk = {
                let Repr::Owned(sq) = &mut src.repr else {
                    return Err(MemoryError::Internal);
                };
                sq.pop_front().ok_or(MemoryError::Internal)?
            };
            if chunk.used > remaining {
                // The boundary falls inside this chunk: hand the trailing
                // fragment back to the source, trim the chunk, move it.
                // SAFETY: the fragment lies inside the chunk's committed
                // bytes; push copies it before the chunk is altered.
                let frag = unsafe {
                    core::slice::from_raw_parts(
                        chunk.data.as_ptr().add(remaining),
                        chunk.used - remaining,
                    )
                };
                src.push(frag, true)?;
                chunk.free += chunk.used - remaining;
                chunk.used = remaining;
                remaining = 0;
            } else {
                remaining -= chunk.used;
            }
            let Repr::Owned(dq) = &mut self.repr else {
                return Err(MemoryError::Internal);
            };
            if to_head {
                dq.insert(insert_at, chunk);
                insert_at += 1;
            } else {
                dq.push_back(chunk);
            }
        }
        Ok(())
    }

    /// Resets the list to empty in place, keeping chunks up to `reserve`
    /// bytes of writable space, destroying the surplus and allocating
    /// more at the tail when the reservation is larger than the list.
    pub fn reuse(&mut self, reserve: usize) -> Result<()> {
        if matches!(self.repr, Repr::View { .. }) {
            self.clear()?;
            return self.pre_alloc(reserve, false);
        }
        let heap = self.heap;
        let Repr::Owned(q) = &mut self.repr else {
            return Err(MemoryError::Internal);
        };

        let mut want = reserve;
        let mut idx = 0;
        while idx < q.len() && want > 0 {
            let c = &mut q[idx];
            c.free += c.used;
            c.used = 0;
            want = want.saturating_sub(c.free);
            idx += 1;
        }
        if want == 0 {
            while q.len() > idx {
                let chunk = q.remove(idx).ok_or(MemoryError::Internal)?;
                heap.free(chunk.data)?;
            }
        }
        while want > 0 {
            let chunk = Self::create_chunk(heap, want)?;
            want = want.saturating_sub(chunk.free);
            q.push_back(chunk);
        }
        Ok(())
    }

    /// Iterates committed segments head to tail. An attached view yields
    /// one segment and terminates.
    pub fn segments(&self) -> Segments<'_> {
        match &self.repr {
            Repr::View { ptr, len } => {
                // SAFETY: the view borrows caller bytes for the list's
                // lifetime; the iterator borrow is shorter.
                Segments::one(unsafe { core::slice::from_raw_parts(ptr.as_ptr(), *len) })
            }
            Repr::Owned(q) => Segments::chunks(q.iter()),
        }
    }

    /// Index of the first `sample` at or after `offset`.
    pub fn find_byte(&self, offset: usize, sample: u8) -> Option<usize> {
        find_in_segments(self.segments(), offset, sample)
    }

    /// Appends a buffer's payload (replacing the list when `append` is
    /// false). The buffer is released unless `copy` is set.
    pub fn push_buffer(
        &mut self,
        src: &mut Buffer<'h, u8>,
        append: bool,
        copy: bool,
    ) -> Result<()> {
        if !append {
            self.clear()?;
        }
        self.push(src.as_slice(), false)?;
        if !copy {
            src.release()?;
        }
        Ok(())
    }

    /// Drains (or copies, with `copy`) the whole list into `dst`,
    /// appending after its payload when `append` is set.
    pub fn take_into_buffer(
        &mut self,
        dst: &mut Buffer<'h, u8>,
        append: bool,
        copy: bool,
    ) -> Result<()> {
        let total = self.len();
        let offset = if append { dst.len() } else { 0 };
        let end = offset + total;
        dst.expand(end)?;
        dst.set_len(end)?;
        if total > 0 {
            let ok = self.get(&mut dst.as_mut_slice()[offset..end], true, !copy)?;
            if !ok {
                return Err(MemoryError::Internal);
            }
        }
        Ok(())
    }
}

impl Drop for ChunkList<'_> {
    fn drop(&mut self) {
        let _ = self.clear();
    }
}

/// Shared scan used by both representations.
pub(crate) fn find_in_segments(segments: Segments<'_>, offset: usize, sample: u8) -> Option<usize> {
    let mut base = 0;
    let mut skip = offset;
    for seg in segments {
        if skip >= seg.len() {
            skip -= seg.len();
            base += seg.len();
            continue;
        }
        if let Some(i) = seg[skip..].iter().position(|&b| b == sample) {
            return Some(base + skip + i);
        }
        base += seg.len();
        skip = 0;
    }
    None
}
