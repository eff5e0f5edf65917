//! External collaborator seams.
//!
//! Embedding generation, similarity search, and tag scoring are
//! services the core calls, not things it implements. Failures from
//! these providers are caught at call sites and degrade to neutral
//! signals rather than aborting a ranking pass.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

/// Pluggable similarity-search backend: top-K (document id, similarity)
/// pairs for a query vector. The physical index layout is out of scope.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f64)>>;
}

/// Opaque text→vector function, invoked only for chunks the differ
/// flags as New or Modified.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Identifier of the model producing the vectors, recorded on
    /// embedded chunks.
    fn model_id(&self) -> &str;
}

/// Scores a set of tags for relevance to a query/instruction context.
/// May be an LLM call or a no-op.
#[async_trait]
pub trait TagScorer: Send + Sync {
    async fn score_tags(&self, context: &str, tags: &[String]) -> Result<BTreeMap<String, f64>>;
}
