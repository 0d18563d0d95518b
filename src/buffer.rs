//! Atom-polymorphic resizable buffer.
//!
//! A [`Buffer`] owns a run of equally sized atoms carved from a [`Heap`],
//! or borrows one attached by the caller. Growth is geometric; a `SECURED`
//! buffer zeroizes its payload before the backing is released.
//!
//! The element width is the type parameter (`u8`, `u16`, `u32`, `u64` on
//! 64-bit targets) rather than a runtime tag, so loads and fills compile
//! down to native-width stores.

use core::ptr::NonNull;

use zeroize::Zeroize;

use crate::error::{MemoryError, Result};
use crate::heap::Heap;

mod sealed {
    pub trait Sealed {}
}

/// Element type of a buffer. Sealed: implemented for `u8`, `u16`, `u32`
/// and, on 64-bit targets, `u64`.
pub trait Atom: sealed::Sealed + Copy + PartialEq + Default + 'static {}

impl sealed::Sealed for u8 {}
impl Atom for u8 {}
impl sealed::Sealed for u16 {}
impl Atom for u16 {}
impl sealed::Sealed for u32 {}
impl Atom for u32 {}
#[cfg(target_pointer_width = "64")]
impl sealed::Sealed for u64 {}
#[cfg(target_pointer_width = "64")]
impl Atom for u64 {}

/// Buffer creation options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufOptions {
    /// Zeroize the payload whenever the backing is released or emptied,
    /// unless the memory is attached as shared.
    pub secured: bool,
    /// Expansion allocates exactly the requested size instead of doubling,
    /// and only when the buffer must actually grow.
    pub no_growth: bool,
}

impl BufOptions {
    pub const fn new() -> Self {
        Self {
            secured: false,
            no_growth: false,
        }
    }

    pub const fn with_secured(mut self) -> Self {
        self.secured = true;
        self
    }

    pub const fn with_no_growth(mut self) -> Self {
        self.no_growth = true;
        self
    }
}

/// Resizable run of atoms backed by a heap, or attached to caller memory.
///
/// Invariants: `len <= cap`; an attached backing is never freed; a
/// secured, non-shared backing is wiped before it leaves the buffer.
pub struct Buffer<'h, A: Atom> {
    heap: Option<&'h Heap>,
    ptr: Option<NonNull<A>>,
    /// Data length, atoms.
    len: usize,
    /// Allocated (or attached) capacity, atoms.
    cap: usize,
    secured: bool,
    no_growth: bool,
    attached: bool,
    shared: bool,
}

impl<'h, A: Atom> Buffer<'h, A> {
    /// Creates a buffer with `initial` atoms of zeroed capacity.
    pub fn new(initial: usize, opts: BufOptions, heap: &'h Heap) -> Result<Self> {
        let mut buf = Self {
            heap: Some(heap),
            ptr: None,
            len: 0,
            cap: 0,
            secured: opts.secured,
            no_growth: opts.no_growth,
            attached: false,
            shared: false,
        };
        if initial > 0 {
            let bytes = initial
                .checked_mul(size_of::<A>())
                .ok_or(MemoryError::OutOfBounds)?;
            let block = heap.allocate(bytes)?;
            let ptr = block.cast::<A>();
            // SAFETY: the block spans at least `bytes` freshly allocated
            // bytes; zeroing makes the whole capacity readable.
            unsafe { core::ptr::write_bytes(ptr.as_ptr().cast::<u8>(), 0, bytes) };
            buf.ptr = Some(ptr);
            buf.cap = initial;
        }
        Ok(buf)
    }

    /// Creates a capacity-less buffer with no heap. It can hold attached
    /// memory but can never expand.
    pub const fn empty(opts: BufOptions) -> Self {
        Self {
            heap: None,
            ptr: None,
            len: 0,
            cap: 0,
            secured: opts.secured,
            no_growth: opts.no_growth,
            attached: false,
            shared: false,
        }
    }

    /// Data length, atoms.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated or attached capacity, atoms.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Element width, bytes.
    #[inline]
    #[must_use]
    pub const fn atom_bytes() -> usize {
        size_of::<A>()
    }

    /// The live payload.
    pub fn as_slice(&self) -> &[A] {
        match self.ptr {
            // SAFETY: len <= cap and the backing is initialized (zeroed on
            // allocation, caller-initialized when attached).
            Some(ptr) => unsafe { core::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    /// The live payload, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [A] {
        match self.ptr {
            // SAFETY: as for `as_slice`; &mut self gives exclusive access.
            Some(ptr) => unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), self.len) },
            None => &mut [],
        }
    }

    /// Raw payload pointer; dangling when the buffer has no backing.
    pub fn as_ptr(&self) -> *const A {
        self.ptr.map_or(NonNull::dangling().as_ptr(), |p| p.as_ptr().cast_const())
    }

    /// Releases the backing: wipes it when secured (and not shared),
    /// frees it when owned, and resets length, capacity and attachment.
    /// Creation options survive.
    pub fn release(&mut self) -> Result<()> {
        if let Some(ptr) = self.ptr {
            if self.secured && !self.shared {
                self.wipe(ptr);
            }
            if !self.attached && self.cap > 0 {
                let heap = self.heap.ok_or(MemoryError::Internal)?;
                heap.free(ptr.cast())?;
            }
        }
        self.ptr = None;
        self.len = 0;
        self.cap = 0;
        self.attached = false;
        self.shared = false;
        Ok(())
    }

    /// Grows the capacity to at least `target` atoms. No-op when the
    /// buffer is already large enough. The payload and length survive; on
    /// failure the buffer is untouched.
    #[track_caller]
    pub fn expand(&mut self, target: usize) -> Result<()> {
        if target <= self.cap {
            return Ok(());
        }
        if self.attached {
            return Err(MemoryError::UnexpectedCall);
        }
        let heap = self.heap.ok_or(MemoryError::UnexpectedCall)?;

        let mut new_cap = if self.cap == 0 {
            Heap::unit_bytes()
        } else {
            self.cap << 1
        };
        if self.no_growth {
            new_cap = target;
        } else {
            while new_cap < target {
                new_cap <<= 1;
                if new_cap == 0 {
                    return Err(MemoryError::Internal);
                }
            }
        }

        let bytes = new_cap
            .checked_mul(size_of::<A>())
            .ok_or(MemoryError::Internal)?;
        let block = heap.allocate(bytes)?;
        let new_ptr = block.cast::<A>();
        // SAFETY: `bytes` freshly allocated bytes behind `new_ptr`; the old
        // payload (`len <= cap < new_cap` atoms) does not overlap it.
        unsafe {
            core::ptr::write_bytes(new_ptr.as_ptr().cast::<u8>(), 0, bytes);
            if let Some(old) = self.ptr {
                core::ptr::copy_nonoverlapping(old.as_ptr(), new_ptr.as_ptr(), self.len);
            }
        }

        let keep = self.len;
        self.release()?;
        self.ptr = Some(new_ptr);
        self.len = keep;
        self.cap = new_cap;
        Ok(())
    }

    /// Copies `data` to atom position `offset`, expanding as needed. When
    /// expansion is required the source must not alias the current
    /// backing, since it would dangle across the reallocation. The final
    /// length is `max(len, offset + data.len())`.
    #[track_caller]
    pub fn load(&mut self, data: &[A], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .ok_or(MemoryError::OutOfBounds)?;
        if end > self.cap {
            if let Some(ptr) = self.ptr {
                let base = ptr.as_ptr() as usize;
                let src = data.as_ptr() as usize;
                if src >= base && src < base + self.cap * size_of::<A>() {
                    return Err(MemoryError::InvalidPointer);
                }
            }
            self.expand(end)?;
        }
        if !data.is_empty() {
            let ptr = self.ptr.ok_or(MemoryError::Internal)?;
            // SAFETY: end <= cap after the expansion; copy is overlap-safe.
            unsafe {
                core::ptr::copy(data.as_ptr(), ptr.as_ptr().add(offset), data.len());
            }
        }
        self.len = self.len.max(end);
        Ok(())
    }

    /// Appends `data` after the current payload.
    #[track_caller]
    pub fn append(&mut self, data: &[A]) -> Result<()> {
        self.load(data, self.len)
    }

    /// Writes `count` copies of `sample` starting at atom `offset`,
    /// expanding as needed. The final length is `max(len, offset + count)`.
    #[track_caller]
    pub fn fill(&mut self, sample: A, offset: usize, count: usize) -> Result<()> {
        let end = offset.checked_add(count).ok_or(MemoryError::OutOfBounds)?;
        self.expand(end)?;
        if count > 0 {
            let ptr = self.ptr.ok_or(MemoryError::Internal)?;
            // SAFETY: end <= cap, so the run is inside the backing.
            unsafe {
                core::slice::from_raw_parts_mut(ptr.as_ptr().add(offset), count).fill(sample);
            }
        }
        self.len = self.len.max(end);
        Ok(())
    }

    /// Attaches caller-owned memory, releasing any current backing.
    /// `used` atoms of `data` become the payload; the full slice is the
    /// capacity. Shared attachments are never wiped, even when secured.
    pub fn attach_slice(&mut self, data: &'h mut [A], used: usize, shared: bool) -> Result<()> {
        if used > data.len() {
            return Err(MemoryError::bad_param("used exceeds capacity"));
        }
        self.release()?;
        self.cap = data.len();
        self.len = used;
        self.ptr = NonNull::new(data.as_mut_ptr());
        self.attached = true;
        self.shared = shared;
        Ok(())
    }

    /// Drops an attached backing without freeing it, or releases an owned
    /// one. Either way the buffer ends up empty and unattached.
    pub fn detach(&mut self) -> Result<()> {
        self.release()
    }

    /// Sets the payload length, which must not exceed the capacity.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.cap {
            return Err(MemoryError::OutOfBounds);
        }
        self.len = len;
        Ok(())
    }

    /// Empties the buffer in place, wiping the full capacity first when
    /// secured. Capacity is retained.
    pub fn set_empty(&mut self) {
        if self.secured {
            if let Some(ptr) = self.ptr {
                self.wipe(ptr);
            }
        }
        self.len = 0;
    }

    /// Takes the owned backing out of the buffer, leaving it empty.
    /// Returns `None` when there is nothing owned to take.
    pub(crate) fn take_raw(&mut self) -> Option<(NonNull<A>, usize, usize)> {
        if self.attached {
            return None;
        }
        let ptr = self.ptr.take()?;
        let out = (ptr, self.len, self.cap);
        self.len = 0;
        self.cap = 0;
        Some(out)
    }

    /// Installs an owned backing taken from another buffer of the same
    /// heap via [`take_raw`].
    pub(crate) fn install_raw(&mut self, ptr: NonNull<A>, len: usize, cap: usize) -> Result<()> {
        self.release()?;
        self.ptr = Some(ptr);
        self.len = len;
        self.cap = cap;
        Ok(())
    }

    pub(crate) fn heap(&self) -> Option<&'h Heap> {
        self.heap
    }

    /// The full capacity as a slice. Fresh backings are zeroed, so the
    /// bytes past `len` are initialized too.
    pub(crate) fn capacity_slice_mut(&mut self) -> &mut [A] {
        match self.ptr {
            // SAFETY: cap atoms are allocated (or attached) behind ptr and
            // initialized; &mut self gives exclusive access.
            Some(ptr) => unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), self.cap) },
            None => &mut [],
        }
    }

    fn wipe(&self, ptr: NonNull<A>) {
        // SAFETY: `cap` atoms are allocated (or attached) behind `ptr`.
        unsafe {
            core::slice::from_raw_parts_mut(ptr.as_ptr().cast::<u8>(), self.cap * size_of::<A>())
                .zeroize();
        }
    }
}

impl<A: Atom> Drop for Buffer<'_, A> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl<A: Atom> PartialEq for Buffer<'_, A> {
    /// Same length, same payload. Atom widths agree by construction.
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<A: Atom + core::fmt::Debug> core::fmt::Debug for Buffer<'_, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("cap", &self.cap)
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}
