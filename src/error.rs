//! Error types for ember-memory.
//!
//! One enum covers the whole core. Allocation failure is ordinary and
//! retryable; a damaged tag chain is not.

use thiserror::Error;

/// Memory core errors.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// A caller-supplied argument is outside its documented domain.
    #[error("invalid parameter: {0}")]
    BadParam(&'static str),

    /// A pointer does not name a live allocation of this heap.
    #[error("pointer does not belong to a live allocation")]
    InvalidPointer,

    /// An index or length exceeds the object's capacity.
    #[error("index or length out of bounds")]
    OutOfBounds,

    /// The heap (and its extensions, when enabled) cannot satisfy the
    /// request.
    #[error("out of memory: requested {requested} bytes")]
    NoMemory { requested: usize },

    /// The destination buffer is too small for even one output atom.
    #[error("destination buffer too small")]
    BufferTooSmall,

    /// The operation is not valid in the object's current state, e.g.
    /// expanding an attached buffer or feeding a finished coder.
    #[error("operation not valid in the current state")]
    UnexpectedCall,

    /// The block tag chain is inconsistent. The heap's invariants are no
    /// longer trustworthy; the operation is abandoned.
    #[error("heap tag chain is corrupted")]
    HeapCorrupted,

    /// An internal invariant failed to hold.
    #[error("internal invariant violated")]
    Internal,
}

impl MemoryError {
    /// True when retrying after releasing memory may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoMemory { .. })
    }

    /// Short stable code for categorization in logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParam(_) => "MEM:PARAM",
            Self::InvalidPointer => "MEM:PTR",
            Self::OutOfBounds => "MEM:BOUNDS",
            Self::NoMemory { .. } => "MEM:OOM",
            Self::BufferTooSmall => "MEM:DST",
            Self::UnexpectedCall => "MEM:STATE",
            Self::HeapCorrupted => "MEM:CORRUPT",
            Self::Internal => "MEM:INTERNAL",
        }
    }

    /// Create an out-of-memory error for a request of `requested` bytes.
    pub fn no_memory(requested: usize) -> Self {
        Self::NoMemory { requested }
    }

    /// Create a bad-parameter error with a short reason.
    pub fn bad_param(reason: &'static str) -> Self {
        Self::BadParam(reason)
    }
}

/// Result type for memory operations.
pub type Result<T> = core::result::Result<T, MemoryError>;
