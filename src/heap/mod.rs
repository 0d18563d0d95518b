//! Fixed-region heap: first-fit, coalescing allocation over a
//! caller-supplied or crate-owned byte region.
//!
//! The heap serves every dynamic allocation of the crate. One
//! [`parking_lot::Mutex`] per heap guards all public entry points; pools
//! and extension handling run on the already-locked state. With the
//! `system-fallback` feature and [`HeapFlags::use_system_fallback`], the
//! primary region spills over into extension regions drawn from the global
//! allocator, each released again the moment it is completely free.
//!
//! ```
//! use ember_memory::{Heap, HeapFlags};
//!
//! let heap = Heap::with_capacity(4096, HeapFlags::new())?;
//! let block = heap.allocate(100)?;
//! heap.free(block.cast())?;
//! let stats = heap.stats()?;
//! assert_eq!(stats.busy, 0);
//! # Ok::<(), ember_memory::MemoryError>(())
//! ```

mod region;
#[cfg(feature = "pool")]
mod pool;

use core::alloc::Layout;
use core::ptr::NonNull;

use parking_lot::Mutex;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};

pub(crate) use region::UNIT;
use region::Region;

/// Heap behavior flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapFlags {
    /// Spill to system-heap extension regions when the primary region is
    /// exhausted (requires the `system-fallback` feature).
    pub use_system_fallback: bool,
    /// Suppress diagnostic output on allocation failure.
    pub no_trace: bool,
}

impl HeapFlags {
    pub const fn new() -> Self {
        Self {
            use_system_fallback: false,
            no_trace: false,
        }
    }

    pub const fn with_system_fallback(mut self) -> Self {
        self.use_system_fallback = true;
        self
    }

    pub const fn with_no_trace(mut self) -> Self {
        self.no_trace = true;
        self
    }
}

/// Byte totals over the primary region and all extensions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Free payload bytes.
    pub free: usize,
    /// Busy payload bytes.
    pub busy: usize,
}

/// A system-allocated overflow region.
#[cfg(feature = "system-fallback")]
struct Extension {
    region: Region,
    raw: NonNull<u8>,
    layout: Layout,
}

struct HeapState {
    primary: Region,
    #[cfg(feature = "system-fallback")]
    exts: Vec<Extension>,
    #[cfg(feature = "pool")]
    pools: Vec<pool::PoolEntry>,
    #[cfg(debug_assertions)]
    allocated: usize,
    #[cfg(debug_assertions)]
    peak_allocated: usize,
    #[cfg(debug_assertions)]
    origins: std::collections::BTreeMap<usize, &'static core::panic::Location<'static>>,
}

impl HeapState {
    fn new(primary: Region) -> Self {
        Self {
            primary,
            #[cfg(feature = "system-fallback")]
            exts: Vec::new(),
            #[cfg(feature = "pool")]
            pools: Vec::new(),
            #[cfg(debug_assertions)]
            allocated: 0,
            #[cfg(debug_assertions)]
            peak_allocated: 0,
            #[cfg(debug_assertions)]
            origins: std::collections::BTreeMap::new(),
        }
    }

    #[cfg(debug_assertions)]
    fn note_alloc(
        &mut self,
        ptr: NonNull<u8>,
        bytes: usize,
        origin: &'static core::panic::Location<'static>,
    ) {
        self.allocated += bytes;
        self.peak_allocated = self.peak_allocated.max(self.allocated);
        self.origins.insert(ptr.as_ptr() as usize, origin);
    }

    #[cfg(debug_assertions)]
    fn note_free(&mut self, ptr: NonNull<u8>, bytes: usize) {
        self.allocated = self.allocated.saturating_sub(bytes);
        self.origins.remove(&(ptr.as_ptr() as usize));
    }
}

/// A first-fit, coalescing region heap.
///
/// All dynamic allocations of buffers, chunk lists and pools are carved out
/// of one primary byte region supplied at creation. The allocation quantum
/// is [`Heap::unit_bytes`]; requests are rounded up to whole units.
pub struct Heap {
    state: Mutex<HeapState>,
    flags: HeapFlags,
    /// Primary backing when the heap owns it (`with_capacity`).
    owned: Option<(NonNull<u8>, Layout)>,
}

// SAFETY: all heap state is guarded by the mutex; the raw pointers inside
// name memory exclusively owned by the heap. Handing the value to another
// thread transfers that ownership wholesale.
unsafe impl Send for Heap {}

// SAFETY: every public entry point takes the mutex for its full duration,
// so concurrent calls are serialized. Payload bytes behind pointers handed
// out by `allocate` are not touched by the heap until `free`.
unsafe impl Sync for Heap {}

impl Heap {
    /// Creates a heap over a crate-owned region of `bytes` bytes.
    pub fn with_capacity(bytes: usize, flags: HeapFlags) -> Result<Self> {
        let layout = Layout::from_size_align(bytes.max(1), UNIT)
            .map_err(|_| MemoryError::bad_param("capacity"))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { std::alloc::alloc(layout) };
        let Some(raw) = NonNull::new(raw) else {
            return Err(MemoryError::no_memory(bytes));
        };
        // SAFETY: the fresh allocation is exclusively ours.
        let primary = match unsafe { Region::init(raw, bytes) } {
            Ok(region) => region,
            Err(e) => {
                // SAFETY: raw was allocated above with this layout.
                unsafe { std::alloc::dealloc(raw.as_ptr(), layout) };
                return Err(e);
            }
        };
        #[cfg(feature = "logging")]
        if !flags.no_trace {
            debug!(bytes, "heap created");
        }
        Ok(Self {
            state: Mutex::new(HeapState::new(primary)),
            flags,
            owned: Some((raw, layout)),
        })
    }

    /// Creates a heap over a caller-supplied region.
    ///
    /// The pointer is advanced to a unit boundary and the length trimmed
    /// accordingly; the remainder must exceed one unit.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for the
    /// heap's whole lifetime, and nothing else may touch the range while
    /// the heap is live. The heap never frees the range.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize, flags: HeapFlags) -> Result<Self> {
        // SAFETY: forwarded caller contract.
        let primary = unsafe { Region::init(ptr, len)? };
        Ok(Self {
            state: Mutex::new(HeapState::new(primary)),
            flags,
            owned: None,
        })
    }

    /// The allocation and alignment quantum, bytes.
    #[must_use]
    pub const fn unit_bytes() -> usize {
        UNIT
    }

    /// Allocates at least `bytes` bytes (rounded up to whole units, at
    /// least one). The returned slice covers the usable block capacity.
    #[track_caller]
    pub fn allocate(&self, bytes: usize) -> Result<NonNull<[u8]>> {
        let origin = core::panic::Location::caller();
        let mut state = self.state.lock();
        let (ptr, capacity) = self.alloc_locked(&mut state, bytes, origin)?;
        Ok(NonNull::slice_from_raw_parts(ptr, capacity))
    }

    /// Allocates between `min` and roughly `max` bytes in one lock
    /// acquisition: the size actually requested is the largest free block
    /// capped at `max` (or `max` directly when system fallback is on).
    /// Returns the block and its usable capacity, which may exceed `max`
    /// by an absorbed split remainder.
    #[track_caller]
    pub fn allocate_in_range(&self, min: usize, max: usize) -> Result<(NonNull<[u8]>, usize)> {
        let origin = core::panic::Location::caller();
        if min > max {
            return Err(MemoryError::bad_param("min exceeds max"));
        }
        let mut state = self.state.lock();

        let fallback = cfg!(feature = "system-fallback") && self.flags.use_system_fallback;
        let size = if fallback {
            max
        } else {
            let avail = state.primary.max_free_units() * UNIT;
            if avail < min {
                self.trace_no_memory(&state, min);
                return Err(MemoryError::no_memory(min));
            }
            avail.min(max)
        };

        let (ptr, capacity) = self.alloc_locked(&mut state, size, origin)?;
        Ok((NonNull::slice_from_raw_parts(ptr, capacity), capacity))
    }

    /// Returns a block to the heap.
    ///
    /// Membership is established against the pools first, then the primary
    /// region, then the extensions. A fully freed extension is returned to
    /// the system allocator.
    pub fn free(&self, ptr: NonNull<u8>) -> Result<()> {
        let mut state = self.state.lock();
        self.free_locked(&mut state, ptr)
    }

    /// Quick check whether `ptr` points into any region of this heap.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let state = self.state.lock();
        if state.primary.contains(ptr) {
            return true;
        }
        #[cfg(feature = "system-fallback")]
        if state.exts.iter().any(|e| e.region.contains(ptr)) {
            return true;
        }
        false
    }

    /// Size of the largest free block of the primary region, bytes.
    pub fn max_free_block(&self) -> usize {
        let state = self.state.lock();
        state.primary.max_free_units() * UNIT
    }

    /// Walks and validates every region, returning byte totals.
    pub fn stats(&self) -> Result<HeapStats> {
        let state = self.state.lock();
        let (mut free, mut busy) = state.primary.walk_validated()?;
        #[cfg(feature = "system-fallback")]
        for ext in &state.exts {
            let (f, b) = ext.region.walk_validated()?;
            free += f;
            busy += b;
        }
        Ok(HeapStats {
            free: free * UNIT,
            busy: busy * UNIT,
        })
    }

    /// Bytes currently allocated, tracked in debug builds only.
    #[cfg(debug_assertions)]
    pub fn allocated(&self) -> usize {
        self.state.lock().allocated
    }

    /// High-water mark of [`allocated`](Self::allocated).
    #[cfg(debug_assertions)]
    pub fn peak_allocated(&self) -> usize {
        self.state.lock().peak_allocated
    }

    /// Allocates `bytes` from a pool of fixed-size chunks, creating the
    /// pool on first use with `qty` chunks (rounded up to a multiple of
    /// 32). A full pool, a zero `qty` and a failed pool creation all fall
    /// back to a plain allocation; either way the result is released
    /// through [`free`](Self::free).
    #[cfg(feature = "pool")]
    #[track_caller]
    pub fn alloc_from_pool(&self, bytes: usize, qty: usize) -> Result<NonNull<[u8]>> {
        let origin = core::panic::Location::caller();
        if bytes == 0 {
            return Err(MemoryError::bad_param("pool chunk size"));
        }
        let mut state = self.state.lock();
        if qty == 0 {
            let (ptr, capacity) = self.alloc_locked(&mut state, bytes, origin)?;
            return Ok(NonNull::slice_from_raw_parts(ptr, capacity));
        }

        if !state.pools.iter().any(|p| p.chunk_size() == bytes) {
            let (mask, storage, qty) = pool::estimate(bytes, qty);
            match self.alloc_locked(&mut state, mask + storage, origin) {
                // SAFETY: the block was just carved from this heap with
                // the estimated size and stays owned by the pool entry.
                Ok((block, _)) => state
                    .pools
                    .push(unsafe { pool::PoolEntry::init(block, bytes, qty) }),
                Err(_) => {
                    let (ptr, capacity) = self.alloc_locked(&mut state, bytes, origin)?;
                    return Ok(NonNull::slice_from_raw_parts(ptr, capacity));
                }
            }
        }

        let entry = state
            .pools
            .iter_mut()
            .find(|p| p.chunk_size() == bytes)
            .ok_or(MemoryError::Internal)?;
        if let Some(ptr) = entry.alloc() {
            return Ok(NonNull::slice_from_raw_parts(ptr, bytes));
        }

        // Pool is full; the chunk comes from the region instead and is
        // indistinguishable from a plain allocation on free.
        let (ptr, capacity) = self.alloc_locked(&mut state, bytes, origin)?;
        Ok(NonNull::slice_from_raw_parts(ptr, capacity))
    }

    /// Without the `pool` feature, pool requests degrade to plain
    /// allocations.
    #[cfg(not(feature = "pool"))]
    #[track_caller]
    pub fn alloc_from_pool(&self, bytes: usize, _qty: usize) -> Result<NonNull<[u8]>> {
        self.allocate(bytes)
    }

    /// Writes one CSV monitoring row `free;used;max_block;avg_frag`
    /// (bytes; `avg_frag` is free bytes per free block) for the primary
    /// region.
    #[cfg(feature = "monitor")]
    pub fn monitor<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        let (free, used, max_block, free_blocks) = {
            let state = self.state.lock();
            let mut free = 0;
            let mut used = 0;
            let mut max_block = 0;
            let mut free_blocks = 0usize;
            for block in state.primary.blocks() {
                if block.busy {
                    used += block.len;
                } else {
                    free += block.len;
                    max_block = max_block.max(block.len);
                    free_blocks += 1;
                }
            }
            (free * UNIT, used * UNIT, max_block * UNIT, free_blocks)
        };
        let avg_frag = if free_blocks == 0 { 0 } else { free / free_blocks };
        writeln!(out, "{free};{used};{max_block};{avg_frag}")
    }

    /// Logs the block chain of the primary region.
    #[cfg(feature = "logging")]
    pub fn dump(&self) {
        if self.flags.no_trace {
            return;
        }
        let state = self.state.lock();
        for block in state.primary.blocks() {
            debug!(
                offset = block.offset,
                len = block.len,
                busy = block.busy,
                "heap block"
            );
        }
        #[cfg(debug_assertions)]
        for (addr, origin) in &state.origins {
            debug!(addr, %origin, "live allocation");
        }
    }

    fn alloc_locked(
        &self,
        state: &mut HeapState,
        bytes: usize,
        origin: &'static core::panic::Location<'static>,
    ) -> Result<(NonNull<u8>, usize)> {
        #[cfg(not(debug_assertions))]
        let _ = origin;

        let units = crate::utils::ceil_div(bytes, UNIT).max(1);

        if let Some((ptr, keep)) = state.primary.alloc(units) {
            #[cfg(debug_assertions)]
            state.note_alloc(ptr, keep * UNIT, origin);
            return Ok((ptr, keep * UNIT));
        }

        #[cfg(feature = "system-fallback")]
        if self.flags.use_system_fallback {
            for i in 0..state.exts.len() {
                if let Some((ptr, keep)) = state.exts[i].region.alloc(units) {
                    #[cfg(debug_assertions)]
                    state.note_alloc(ptr, keep * UNIT, origin);
                    return Ok((ptr, keep * UNIT));
                }
            }

            let primary_units = state.primary.units();
            let ext_units = if units > primary_units - 1 {
                units + 1
            } else {
                primary_units
            };
            let layout = Layout::from_size_align(ext_units * UNIT, UNIT)
                .map_err(|_| MemoryError::no_memory(bytes))?;
            // SAFETY: layout has non-zero size.
            if let Some(raw) = NonNull::new(unsafe { std::alloc::alloc(layout) }) {
                // SAFETY: the fresh allocation is exclusively ours and
                // aligned to the unit, so no skew is lost.
                let region = unsafe { Region::init(raw, ext_units * UNIT)? };
                state.exts.push(Extension {
                    region,
                    raw,
                    layout,
                });
                #[cfg(feature = "logging")]
                if !self.flags.no_trace {
                    debug!(units = ext_units, "heap extended from system allocator");
                }
                let ext = state.exts.last_mut().ok_or(MemoryError::Internal)?;
                if let Some((ptr, keep)) = ext.region.alloc(units) {
                    #[cfg(debug_assertions)]
                    state.note_alloc(ptr, keep * UNIT, origin);
                    return Ok((ptr, keep * UNIT));
                }
                return Err(MemoryError::Internal);
            }
        }

        self.trace_no_memory(state, bytes);
        Err(MemoryError::no_memory(bytes))
    }

    fn free_locked(&self, state: &mut HeapState, ptr: NonNull<u8>) -> Result<()> {
        #[cfg(feature = "pool")]
        if let Some(i) = state.pools.iter().position(|p| p.owns(ptr.as_ptr())) {
            state.pools[i].free(ptr)?;
            if state.pools[i].is_empty() {
                let entry = state.pools.swap_remove(i);
                self.free_locked(state, entry.block_ptr())?;
            }
            return Ok(());
        }

        if state.primary.contains(ptr.as_ptr()) {
            let freed = state.primary.free(ptr)?;
            #[cfg(debug_assertions)]
            state.note_free(ptr, freed * UNIT);
            #[cfg(not(debug_assertions))]
            let _ = freed;
            return Ok(());
        }

        #[cfg(feature = "system-fallback")]
        if let Some(i) = state.exts.iter().position(|e| e.region.contains(ptr.as_ptr())) {
            let freed = state.exts[i].region.free(ptr)?;
            #[cfg(debug_assertions)]
            state.note_free(ptr, freed * UNIT);
            #[cfg(not(debug_assertions))]
            let _ = freed;
            if state.exts[i].region.is_fully_free() {
                let ext = state.exts.swap_remove(i);
                // SAFETY: the extension's backing was allocated with this
                // exact layout and nothing points into it anymore.
                unsafe { std::alloc::dealloc(ext.raw.as_ptr(), ext.layout) };
            }
            return Ok(());
        }

        Err(MemoryError::InvalidPointer)
    }

    #[allow(unused_variables)]
    fn trace_no_memory(&self, state: &HeapState, required: usize) {
        #[cfg(feature = "logging")]
        if !self.flags.no_trace {
            let mut free = 0;
            let mut busy = 0;
            for block in state.primary.blocks() {
                if block.busy {
                    busy += block.len;
                } else {
                    free += block.len;
                }
            }
            warn!(
                free = free * UNIT,
                busy = busy * UNIT,
                required,
                "heap exhausted"
            );
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        #[cfg(feature = "system-fallback")]
        for ext in self.state.get_mut().exts.drain(..) {
            // SAFETY: each extension owns its backing allocation.
            unsafe { std::alloc::dealloc(ext.raw.as_ptr(), ext.layout) };
        }
        if let Some((raw, layout)) = self.owned.take() {
            // SAFETY: with_capacity allocated this backing with this layout.
            unsafe { std::alloc::dealloc(raw.as_ptr(), layout) };
        }
    }
}
