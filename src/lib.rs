//! # ember-memory
//!
//! Memory core for embedded-systems support: every dynamic allocation is
//! served from a fixed byte region the caller hands over once, with
//! optional spill-over to the system allocator.
//!
//! - [`Heap`]: first-fit, coalescing region allocator with bitmap pools
//!   of fixed-size chunks
//! - [`Buffer`]: resizable container of 1/2/4/8-byte atoms with
//!   attach/detach and secure wipe
//! - [`ByteList`] / [`ChunkList`] / [`FlatList`]: byte streams with
//!   cheap growth at both ends, linked or contiguous
//! - [`codec`]: UTF-8, Base64 and Base32 stream coders over the buffer
//!   surface; [`block`]: byte-block token splitting
//!
//! ## Quick start
//!
//! ```
//! use ember_memory::{Buffer, BufOptions, Heap, HeapFlags};
//!
//! let heap = Heap::with_capacity(8 * 1024, HeapFlags::new())?;
//!
//! let mut buf: Buffer<'_, u8> = Buffer::new(16, BufOptions::new(), &heap)?;
//! buf.append(b"hello")?;
//! assert_eq!(buf.as_slice(), b"hello");
//! # Ok::<(), ember_memory::MemoryError>(())
//! ```
//!
//! ## Features
//!
//! - `pool` (default): bitmap pools inside the heap
//! - `system-fallback` (default): heap extensions from the system allocator
//! - `chunk-list` (default): linked chunks as the default stream form
//! - `logging` (default): diagnostics via `tracing`
//! - `monitor`: CSV heap monitoring rows
//!
//! ## Concurrency
//!
//! One mutex per [`Heap`] serializes all allocator traffic. Buffers and
//! streams are not internally synchronized; callers serialize access to
//! any single object.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
// Unit arithmetic at the tag boundary is reviewed per-site.
#![allow(clippy::cast_possible_truncation)]

pub mod block;
pub mod buffer;
pub mod chunks;
pub mod codec;
pub mod error;
pub mod heap;
pub mod utils;

pub use crate::buffer::{Atom, BufOptions, Buffer};
pub use crate::chunks::{ByteList, ChunkList, FlatList, MemBlock, Segments};
pub use crate::error::{MemoryError, Result};
pub use crate::heap::{Heap, HeapFlags, HeapStats};

/// Convenient re-exports of the commonly used types.
pub mod prelude {
    pub use crate::block;
    pub use crate::buffer::{Atom, BufOptions, Buffer};
    pub use crate::chunks::{ByteList, ChunkList, FlatList, MemBlock};
    pub use crate::codec::{self, Base32, Base64};
    pub use crate::error::{MemoryError, Result};
    pub use crate::heap::{Heap, HeapFlags, HeapStats};
}
