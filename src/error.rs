//! Error types for index construction and search.
//!
//! Fatal errors abort the operation and leave the index either unchanged
//! (when detected before any mutation) or flagged for reset. There is no
//! silent recovery: sanitizable input problems are logged and sanitized,
//! everything else surfaces as an [`IndexError`].

use thiserror::Error;

/// Errors returned by index facades and graph builders.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The storage backend requires training before vectors can be added.
    #[error("storage has not been trained")]
    NotTrained,

    /// Input length is not a whole number of vectors of the index dimension.
    #[error("input of {len} floats is not a multiple of dimension {dim}")]
    DimensionMismatch { len: usize, dim: usize },

    /// NSG is batch-only: a second `add` on a non-empty index is a contract
    /// violation, not a rebuild request.
    #[error("NSG index is already built; it does not support incremental addition")]
    AlreadyBuilt,

    /// The base layer was imported from an external graph, which fixes the
    /// level table; incremental addition is disabled for this index.
    #[error("base layer was imported from an external graph; add is disabled")]
    ExternalBaseLayer,

    /// The supplied k-NN seed graph has too many out-of-range or self-loop
    /// entries to be trusted (≥ n/10). Smaller counts are sanitized instead.
    #[error("k-NN seed graph has {invalid} invalid entries out of {total}; it may not be a valid k-NN graph")]
    InvalidKnnGraph { invalid: usize, total: usize },

    /// Allocation of the k-NN seed graph buffer failed.
    #[error("failed to allocate {bytes} bytes for the k-NN seed graph")]
    KnnAllocation { bytes: usize },

    /// A neighbor id outside `[0, ntotal)` (and not the empty sentinel) was
    /// found after construction.
    #[error("graph contains out-of-range neighbor id {id} at node {node}")]
    CorruptGraph { node: i32, id: i32 },
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexError>;
