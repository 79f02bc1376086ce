//! Vector index trait — the abstraction over ANN backends.

use crate::error::IndexError;
use crate::quote::QuoteHit;
use async_trait::async_trait;

/// A pluggable nearest-neighbor index over retrieval partitions.
///
/// A partition is one searchable collection (one knowledge base); a query is
/// restricted to the partitions the caller is allowed to read.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `limit` hits from `partitions` whose similarity to
    /// `vector` exceeds `threshold`, ordered by descending similarity.
    async fn search(
        &self,
        vector: &[f32],
        partitions: &[String],
        limit: usize,
        threshold: f32,
    ) -> std::result::Result<Vec<QuoteHit>, IndexError>;
}
