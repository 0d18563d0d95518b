//! Integration tests for the region heap.

use ember_memory::{Heap, HeapFlags, MemoryError};

fn quiet() -> HeapFlags {
    HeapFlags::new().with_no_trace()
}

#[test]
fn coalesce_sandwich() {
    let unit = Heap::unit_bytes();
    let heap = Heap::with_capacity(4096, quiet()).unwrap();

    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(100).unwrap();
    let c = heap.allocate(100).unwrap();

    heap.free(a.cast()).unwrap();
    heap.free(c.cast()).unwrap();
    heap.free(b.cast()).unwrap();

    // One free block again: the whole region minus the initial tag.
    let stats = heap.stats().unwrap();
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.free, 4096 - unit);
    assert_eq!(heap.max_free_block(), 4096 - unit);
}

#[test]
fn first_fit_prefers_low_fragmentation_split() {
    let unit = Heap::unit_bytes();
    let heap = Heap::with_capacity(23 * unit, quiet()).unwrap();

    // Build the layout free(8) busy(4) free(8), in units.
    let a = heap.allocate(8 * unit).unwrap();
    let b = heap.allocate(4 * unit).unwrap();
    heap.free(a.cast()).unwrap();

    // Both free blocks fit; the first sits next to a busy block and loses
    // the weighted tie-break, so the second is carved.
    let d = heap.allocate(4 * unit).unwrap();
    let b_addr = b.cast::<u8>().as_ptr() as usize;
    let d_addr = d.cast::<u8>().as_ptr() as usize;
    assert_eq!(d_addr, b_addr + 5 * unit);
}

#[test]
fn zero_byte_allocation_rounds_to_one_unit() {
    let unit = Heap::unit_bytes();
    let heap = Heap::with_capacity(4096, quiet()).unwrap();

    let p = heap.allocate(0).unwrap();
    assert_eq!(p.len(), unit);
    heap.free(p.cast()).unwrap();
    assert_eq!(heap.stats().unwrap().free, 4096 - unit);
}

#[test]
fn whole_region_allocation() {
    let unit = Heap::unit_bytes();
    let heap = Heap::with_capacity(4096, quiet()).unwrap();

    let p = heap.allocate(4096 - unit).unwrap();
    let stats = heap.stats().unwrap();
    assert_eq!(stats.free, 0);
    assert_eq!(stats.busy, 4096 - unit);
    assert!(matches!(
        heap.allocate(1),
        Err(MemoryError::NoMemory { .. })
    ));

    heap.free(p.cast()).unwrap();
    assert_eq!(heap.stats().unwrap().free, 4096 - unit);
}

#[test]
fn free_then_reallocate_reuses_the_spot() {
    let heap = Heap::with_capacity(4096, quiet()).unwrap();

    let p1 = heap.allocate(200).unwrap();
    let addr1 = p1.cast::<u8>().as_ptr() as usize;
    heap.free(p1.cast()).unwrap();

    let p2 = heap.allocate(200).unwrap();
    let addr2 = p2.cast::<u8>().as_ptr() as usize;
    assert_eq!(addr1, addr2);
    assert!(heap.contains(p2.cast::<u8>().as_ptr()));
}

#[test]
fn allocate_in_range_takes_the_largest_free_block() {
    let unit = Heap::unit_bytes();
    let heap = Heap::with_capacity(64 * unit, quiet()).unwrap();

    let (_blk, got) = heap.allocate_in_range(unit, 1000 * unit).unwrap();
    assert_eq!(got, 63 * unit);

    // Region is full now; any further minimum fails politely as OOM.
    assert!(matches!(
        heap.allocate_in_range(unit, unit),
        Err(MemoryError::NoMemory { .. })
    ));
}

#[test]
fn allocate_in_range_respects_the_minimum() {
    let unit = Heap::unit_bytes();
    let heap = Heap::with_capacity(16 * unit, quiet()).unwrap();
    assert!(matches!(
        heap.allocate_in_range(32 * unit, 64 * unit),
        Err(MemoryError::NoMemory { .. })
    ));
}

#[test]
fn foreign_and_double_frees_are_rejected() {
    let heap = Heap::with_capacity(4096, quiet()).unwrap();

    let mut local = [0u8; 64];
    let foreign = core::ptr::NonNull::new(local.as_mut_ptr()).unwrap();
    assert_eq!(heap.free(foreign), Err(MemoryError::InvalidPointer));

    let p = heap.allocate(64).unwrap();
    heap.free(p.cast()).unwrap();
    assert_eq!(heap.free(p.cast()), Err(MemoryError::InvalidPointer));
}

#[test]
fn exhaustion_without_fallback_is_oom() {
    let unit = Heap::unit_bytes();
    let heap = Heap::with_capacity(8 * unit, quiet()).unwrap();
    assert!(matches!(
        heap.allocate(64 * unit),
        Err(MemoryError::NoMemory { .. })
    ));
}

#[cfg(feature = "system-fallback")]
#[test]
fn spills_to_system_extensions_and_reclaims_them() {
    let unit = Heap::unit_bytes();
    let flags = quiet().with_system_fallback();
    let heap = Heap::with_capacity(8 * unit, flags).unwrap();

    let big = heap.allocate(64 * unit).unwrap();
    assert!(heap.contains(big.cast::<u8>().as_ptr()));
    assert!(heap.stats().unwrap().busy >= 64 * unit);

    heap.free(big.cast()).unwrap();
    // The extension emptied out and went back to the system allocator;
    // only the primary region remains.
    let stats = heap.stats().unwrap();
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.free, 8 * unit - unit);
}

#[cfg(feature = "system-fallback")]
#[test]
fn extensions_serve_many_small_blocks() {
    let unit = Heap::unit_bytes();
    let flags = quiet().with_system_fallback();
    let heap = Heap::with_capacity(8 * unit, flags).unwrap();

    let mut live = Vec::new();
    for _ in 0..64 {
        live.push(heap.allocate(2 * unit).unwrap());
    }
    for p in &live {
        assert!(heap.contains(p.cast::<u8>().as_ptr()));
    }
    for p in live {
        heap.free(p.cast()).unwrap();
    }
    let stats = heap.stats().unwrap();
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.free, 8 * unit - unit);
}

#[test]
fn random_churn_keeps_the_chain_intact() {
    use rand::Rng;

    let heap = Heap::with_capacity(16 * 1024, quiet()).unwrap();
    let mut rng = rand::rng();
    let mut live = Vec::new();

    for _ in 0..2000 {
        if live.is_empty() || rng.random_bool(0.6) {
            let size = rng.random_range(1..512);
            if let Ok(p) = heap.allocate(size) {
                live.push(p);
            }
        } else {
            let i = rng.random_range(0..live.len());
            let p: core::ptr::NonNull<[u8]> = live.swap_remove(i);
            heap.free(p.cast()).unwrap();
        }
    }

    // The walk validates tag linkage on every region.
    heap.stats().unwrap();

    for p in live {
        heap.free(p.cast()).unwrap();
    }
    let end = heap.stats().unwrap();
    assert_eq!(end.busy, 0);
    // Everything coalesced back into a single block.
    assert_eq!(heap.max_free_block(), end.free);
}

#[cfg(debug_assertions)]
#[test]
fn debug_counters_track_live_bytes() {
    let heap = Heap::with_capacity(4096, quiet()).unwrap();
    let p = heap.allocate(100).unwrap();
    assert!(heap.allocated() >= 100);
    assert!(heap.peak_allocated() >= heap.allocated());
    heap.free(p.cast()).unwrap();
    assert_eq!(heap.allocated(), 0);
}

#[cfg(feature = "monitor")]
#[test]
fn monitor_emits_one_csv_row() {
    let heap = Heap::with_capacity(4096, quiet()).unwrap();
    let _keep = heap.allocate(100).unwrap();

    let mut out = Vec::new();
    heap.monitor(&mut out).unwrap();
    let row = String::from_utf8(out).unwrap();
    assert_eq!(row.trim_end().split(';').count(), 4);
}

#[test]
fn caller_supplied_region() {
    let unit = Heap::unit_bytes();
    let mut backing = vec![0u8; 1024];
    let ptr = core::ptr::NonNull::new(backing.as_mut_ptr()).unwrap();
    // SAFETY: the backing outlives the heap and nothing else touches it.
    let heap = unsafe { Heap::from_raw_parts(ptr, backing.len(), quiet()) }.unwrap();

    let p = heap.allocate(64).unwrap();
    heap.free(p.cast()).unwrap();
    let stats = heap.stats().unwrap();
    assert_eq!(stats.busy, 0);
    assert!(stats.free >= 1024 - 2 * unit);
    drop(heap);
    drop(backing);
}

#[test]
fn tiny_regions_are_rejected() {
    let unit = Heap::unit_bytes();
    assert!(Heap::with_capacity(unit, quiet()).is_err());

    let mut backing = vec![0u8; 4];
    let ptr = core::ptr::NonNull::new(backing.as_mut_ptr()).unwrap();
    // SAFETY: backing outlives the call.
    assert!(unsafe { Heap::from_raw_parts(ptr, backing.len(), quiet()) }.is_err());
}
