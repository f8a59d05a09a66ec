//! Global configuration constants for proxigraph.
//!
//! All tuning defaults live here; runtime configuration goes through the
//! [`HnswParams`](crate::hnsw::HnswParams) and [`NsgParams`](crate::nsg::NsgParams)
//! structs, which start from these values.

/// Default number of neighbors per HNSW node on layers ≥ 1.
///
/// Layer 0 uses twice this value unless overridden. Higher values improve
/// recall but increase memory and build time. Typical range: 8–64.
pub const HNSW_DEFAULT_M: usize = 32;

/// Default candidate list width during HNSW construction.
///
/// Controls the quality of the neighbor pool each insertion selects from.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 40;

/// Default candidate list width during HNSW search.
///
/// Raised to `k` automatically when a query asks for more results.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 16;

/// Hard cap on HNSW layer assignment.
///
/// The geometric level draw is unbounded in theory; in practice levels above
/// ~10 never occur for realistic index sizes.
pub const HNSW_MAX_LEVEL: usize = 16;

/// Default NSG out-degree bound.
pub const NSG_DEFAULT_R: usize = 32;

/// Margin added to `R` for the construction-time search width `L`.
pub const NSG_BUILD_L_MARGIN: usize = 32;

/// Margin added to `R` for the construction-time candidate pool cap `C`.
pub const NSG_POOL_C_MARGIN: usize = 100;

/// Default NSG search width at query time.
///
/// Raised to `k` automatically when a query asks for more results.
pub const NSG_DEFAULT_SEARCH_L: usize = 16;

/// Default out-degree of the k-NN seed graph consumed by NSG construction.
pub const NSG_DEFAULT_GK: usize = 64;

/// Number of centroids per PQ subspace. Fixed at 256 so codes fit in u8.
pub const PQ_NUM_CENTROIDS: usize = 256;

/// Number of Lloyd iterations when training PQ codebooks.
pub const PQ_KMEANS_ITERATIONS: usize = 25;
