//! Contiguous chunk stream.
//!
//! Structurally a [`Buffer<u8>`]: every operation of the linked list
//! degrades to a buffer operation, at the cost of payload shifts on
//! head-side pushes and pops. Useful where iteration wants one contiguous
//! span and the copy cost is acceptable.

use core::ptr::NonNull;

use super::list::find_in_segments;
use super::{MemBlock, Segments};
use crate::buffer::{BufOptions, Buffer};
use crate::error::{MemoryError, Result};
use crate::heap::Heap;

/// Byte stream stored as one contiguous, heap-backed run.
pub struct FlatList<'h> {
    buf: Buffer<'h, u8>,
}

impl<'h> FlatList<'h> {
    /// Creates an empty stream backed by `heap`.
    pub fn new(heap: &'h Heap) -> Result<Self> {
        Ok(Self {
            buf: Buffer::new(0, BufOptions::new(), heap)?,
        })
    }

    /// Total committed bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Releases the backing (or drops an attached one).
    pub fn clear(&mut self) -> Result<()> {
        self.buf.release()
    }

    /// Attaches caller-owned bytes as the stream content. Unlike the
    /// linked form, pushes that fit the attached capacity write into the
    /// caller's memory; growing beyond it fails.
    pub fn attach(&mut self, data: &'h mut [u8]) -> Result<()> {
        let used = data.len();
        self.buf.attach_slice(data, used, true)
    }

    /// Appends `data` at the chosen end; a head push shifts the existing
    /// payload up.
    pub fn push(&mut self, data: &[u8], to_head: bool) -> Result<()> {
        let old = self.buf.len();
        let end = old + data.len();
        self.buf.expand(end)?;
        self.buf.set_len(end)?;
        let s = self.buf.as_mut_slice();
        if to_head {
            s.copy_within(0..old, data.len());
            s[..data.len()].copy_from_slice(data);
        } else {
            s[old..].copy_from_slice(data);
        }
        Ok(())
    }

    /// Copies `dst.len()` bytes from the chosen end, optionally consuming
    /// them; `Ok(false)` when the stream is shorter.
    pub fn get(&mut self, dst: &mut [u8], from_head: bool, remove: bool) -> Result<bool> {
        let count = dst.len();
        if count == 0 {
            return Ok(true);
        }
        let len = self.buf.len();
        if len < count {
            return Ok(false);
        }
        let s = self.buf.as_slice();
        if from_head {
            dst.copy_from_slice(&s[..count]);
        } else {
            dst.copy_from_slice(&s[len - count..]);
        }
        if remove {
            self.consume(count, from_head)?;
        }
        Ok(true)
    }

    /// Discards `count` bytes from the chosen end.
    pub fn skip(&mut self, count: usize, from_head: bool) -> Result<bool> {
        if count == 0 {
            return Ok(true);
        }
        if self.buf.len() < count {
            return Ok(false);
        }
        self.consume(count, from_head)?;
        Ok(true)
    }

    fn consume(&mut self, count: usize, from_head: bool) -> Result<()> {
        let len = self.buf.len();
        if len == count {
            // Emptied: give the backing up entirely.
            return self.buf.release();
        }
        if from_head {
            self.buf.as_mut_slice().copy_within(count.., 0);
        }
        self.buf.set_len(len - count)
    }

    /// Reserves capacity for `bytes` more bytes. The contiguous form has
    /// no chunk granularity, so both ends share one reservation.
    pub fn pre_alloc(&mut self, bytes: usize, _to_head: bool) -> Result<()> {
        let len = self.buf.len();
        self.buf.expand(len + bytes)
    }

    /// Leases a writable span at the chosen end. A head lease shifts the
    /// payload up by the lease size until the block is released.
    pub fn acquire_block(&mut self, bytes: usize, to_head: bool) -> Result<MemBlock> {
        let len = self.buf.len();
        let want = bytes.max(1);
        self.buf.expand(len + want)?;
        let s = self.buf.capacity_slice_mut();
        if to_head {
            s.copy_within(0..len, want);
            Ok(MemBlock::new(
                NonNull::new(s.as_mut_ptr()).ok_or(MemoryError::Internal)?,
                want,
            ))
        } else {
            // SAFETY: len + want <= capacity after the expansion.
            let ptr = unsafe { s.as_mut_ptr().add(len) };
            Ok(MemBlock::new(
                NonNull::new(ptr).ok_or(MemoryError::Internal)?,
                want,
            ))
        }
    }

    /// Commits `used` bytes of a lease. A head lease's payload is shifted
    /// back down when less than the full span was used.
    pub fn release_block(&mut self, blk: MemBlock, used: usize) -> Result<()> {
        if used > blk.len() {
            return Err(MemoryError::bad_param("committed size out of range"));
        }
        let len = self.buf.len();
        if blk.len() + len > self.buf.capacity() {
            return Err(MemoryError::bad_param("lease does not match stream"));
        }
        let base = self.buf.as_ptr() as usize;
        let addr = blk.as_ptr() as usize;
        if addr == base + len {
            // Tail lease; when the stream was empty this also covers the
            // head case, and the paths agree.
            self.buf.set_len(len + used)
        } else if addr == base {
            if used < blk.len() {
                let s = self.buf.capacity_slice_mut();
                s.copy_within(blk.len()..blk.len() + len, used);
            }
            self.buf.set_len(len + used)
        } else {
            Err(MemoryError::bad_param("lease does not match stream"))
        }
    }

    /// Safe acquire/release round trip.
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
    /// into the chosen end of `self`.
    pub fn move_from(&mut self, src: &mut FlatList<'h>, to_head: bool, bytes: usize) -> Result<()> {
        match (self.buf.heap(), src.buf.heap()) {
            (Some(a), Some(b)) if core::ptr::eq(a, b) => {}
            _ => return Err(MemoryError::bad_param("streams use different heaps")),
        }
        if self.buf.is_attached() {
            return Err(MemoryError::bad_param("destination is attached"));
        }
        let src_len = src.len();
        let n = if bytes == 0 { src_len } else { bytes };
        if n > src_len {
            return Err(MemoryError::bad_param("move exceeds source"));
        }
        if n == 0 {
            return Ok(());
        }
        self.push(&src.buf.as_slice()[..n], to_head)?;
        if n == src_len {
            src.buf.release()
        } else {
            src.consume(n, true)
        }
    }

    /// Empties the stream, keeping (and growing to) `reserve` bytes of
    /// capacity.
    pub fn reuse(&mut self, reserve: usize) -> Result<()> {
        self.buf.set_empty();
        self.buf.expand(reserve)
    }

    /// One contiguous segment.
    pub fn segments(&self) -> Segments<'_> {
        Segments::one(self.buf.as_slice())
    }

    /// Index of the first `sample` at or after `offset`.
    pub fn find_byte(&self, offset: usize, sample: u8) -> Option<usize> {
        find_in_segments(self.segments(), offset, sample)
    }

    /// Appends a buffer's payload (replacing the stream when `append` is
    /// false). With `append == false && copy == false` and compatible
    /// backings, ownership of the pointer transfers bit-for-bit.
    pub fn push_buffer(
        &mut self,
        src: &mut Buffer<'h, u8>,
        append: bool,
        copy: bool,
    ) -> Result<()> {
        if !append && !copy && !self.buf.is_attached() && !src.is_attached() {
            if let (Some(a), Some(b)) = (self.buf.heap(), src.heap()) {
                if core::ptr::eq(a, b) {
                    return match src.take_raw() {
                        Some((ptr, len, cap)) => {
                            self.buf.install_raw(ptr, len, cap)
                        }
                        None => self.buf.release(),
                    };
                }
            }
        }
        if !append {
            self.clear()?;
        }
        self.push(src.as_slice(), false)?;
        if !copy {
            src.release()?;
        }
        Ok(())
    }

    /// Drains (or copies, with `copy`) the stream into `dst`; the fast
    /// path transfers the pointer when both sides allow it.
    pub fn take_into_buffer(
        &mut self,
        dst: &mut Buffer<'h, u8>,
        append: bool,
        copy: bool,
    ) -> Result<()> {
        if !append && !copy && !self.buf.is_attached() && !dst.is_attached() {
            if let (Some(a), Some(b)) = (self.buf.heap(), dst.heap()) {
                if core::ptr::eq(a, b) {
                    return match self.buf.take_raw() {
                        Some((ptr, len, cap)) => dst.install_raw(ptr, len, cap),
                        None => dst.release(),
                    };
                }
            }
        }
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
