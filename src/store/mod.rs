//! Document store façade.
//!
//! Ties the per-scope indexes, relationship graphs, chunk ledger, tag
//! cache, and providers together behind one API. Provider failures
//! degrade to neutral signals instead of failing the calling
//! operation; only storage failures and cancellation propagate.

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::diff::{build_chunks, diff_chunks};
use crate::graph::RelationshipStore;
use crate::index::sanitize_filename;
use crate::intent::IntentClassifier;
use crate::model::{
    ChunkDiff, ContentChunk, DocumentMetadata, HierarchicalQueryOptions, HierarchicalQueryResult,
    MetadataFilter, QueryIntent, ScopeLevel, ScoredDocument, ScoringOptions, TagRelevanceIndex,
};
use crate::providers::{EmbeddingGenerator, SimilaritySearch, TagScorer};
use crate::scope::ScopeResolver;
use crate::scoring::{ScoreExplanation, explain, score_documents};
use crate::tags::{NoopTagScorer, TagRelevanceCache, context_checksum};
use crate::{Result, StoreError};

/// A ranked search outcome: the classified intent alongside the scored
/// candidates, best first.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub intent: QueryIntent,
    pub documents: Vec<ScoredDocument>,
}

/// Aggregate counts for the status surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub documents_per_scope: Vec<(ScopeLevel, usize)>,
    pub relationship_count: usize,
    pub tag_index_count: usize,
}

pub struct DocumentStore {
    config: Config,
    resolver: ScopeResolver,
    graphs: RwLock<HashMap<String, Arc<RelationshipStore>>>,
    tag_cache: TagRelevanceCache,
    intent: IntentClassifier,
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
    similarity: Option<Arc<dyn SimilaritySearch>>,
    tag_scorer: Arc<dyn TagScorer>,
}

impl DocumentStore {
    /// Open a store rooted at the configured storage directory. No
    /// providers are attached yet; tag scoring starts as the neutral
    /// no-op.
    pub async fn open(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|err| StoreError::Config(err.to_string()))?;

        let root = config.storage.root.clone();
        let resolver = ScopeResolver::new(root.clone(), config.scopes.clone());
        let tag_cache = TagRelevanceCache::open(root.join("tag-cache")).await?;
        let intent = IntentClassifier::new()?;

        fs::create_dir_all(root.join("chunks"))
            .await
            .with_context(|| format!("Failed to create chunk directory under {}", root.display()))?;

        info!("Opened document store at {}", root.display());
        Ok(Self {
            config,
            resolver,
            graphs: RwLock::new(HashMap::new()),
            tag_cache,
            intent,
            embedder: None,
            similarity: None,
            tag_scorer: Arc::new(NoopTagScorer),
        })
    }

    #[inline]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[inline]
    pub fn with_similarity(mut self, similarity: Arc<dyn SimilaritySearch>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    #[inline]
    pub fn with_tag_scorer(mut self, tag_scorer: Arc<dyn TagScorer>) -> Self {
        self.tag_scorer = tag_scorer;
        self
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    #[inline]
    pub fn scoring_options(&self) -> ScoringOptions {
        self.config.scoring_options()
    }

    /// Classify a raw query string into an intent with extracted
    /// filters.
    #[inline]
    pub fn classify_intent(&self, query: &str) -> Result<QueryIntent> {
        Ok(self.intent.classify(query)?)
    }

    /// Insert or update a document at one level of a project's chain.
    pub async fn upsert_document(
        &self,
        project_id: &str,
        level: ScopeLevel,
        doc: DocumentMetadata,
    ) -> Result<()> {
        self.resolver.upsert_document(project_id, level, doc).await
    }

    /// Look a document up across the project's chain, most specific
    /// scope first.
    pub async fn get_document(
        &self,
        project_id: &str,
        document_id: &str,
    ) -> Result<Option<(ScopeLevel, Arc<DocumentMetadata>)>> {
        let hierarchy = self.resolver.hierarchy_for(project_id).await;
        for scope in hierarchy.chain(ScopeLevel::Global) {
            let index = self.resolver.index_for(scope).await?;
            if let Some(doc) = index.get(document_id).await {
                return Ok(Some((scope.level, doc)));
            }
        }
        Ok(None)
    }

    /// Delete a document from every scope it appears in, cascade its
    /// relationship edges, and drop its chunk ledger. Returns whether
    /// anything was removed.
    pub async fn delete_document(&self, project_id: &str, document_id: &str) -> Result<bool> {
        let hierarchy = self.resolver.hierarchy_for(project_id).await;
        let mut removed = false;
        for scope in hierarchy.chain(ScopeLevel::Global) {
            let index = self.resolver.index_for(scope).await?;
            if index.remove(document_id).await?.is_some() {
                removed = true;
            }
        }

        if removed {
            let graph = self.graph(project_id).await?;
            let cascaded = graph.delete_for_document(document_id).await?;
            if let Err(err) = fs::remove_file(self.chunk_path(document_id)).await {
                debug!("Chunk ledger already gone for {document_id}: {err}");
            }
            info!("Deleted document {document_id} ({cascaded} relationships cascaded)");
        }
        Ok(removed)
    }

    /// Structured metadata query fanned across the project's chain.
    pub async fn query_metadata(
        &self,
        project_id: &str,
        filter: &MetadataFilter,
        options: &HierarchicalQueryOptions,
        cancel: &CancellationToken,
    ) -> Result<HierarchicalQueryResult> {
        self.resolver
            .query_hierarchical(project_id, filter, options, cancel)
            .await
    }

    /// Free-text search fanned across the project's chain.
    pub async fn search_text(
        &self,
        project_id: &str,
        text: &str,
        filter: Option<&MetadataFilter>,
        options: &HierarchicalQueryOptions,
        cancel: &CancellationToken,
    ) -> Result<HierarchicalQueryResult> {
        self.resolver
            .search_hierarchical(project_id, text, filter, options, cancel)
            .await
    }

    /// Full retrieval pipeline: classify the query, gather candidates
    /// (semantic when providers allow, text otherwise), blend in tag
    /// relevance, and rank by composite score.
    pub async fn search(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchResult> {
        let now = Utc::now();
        let intent = self.intent.classify_at(query, now)?;
        let filter = intent
            .recommend_metadata_filter()
            .then(|| intent.filters.to_metadata_filter())
            .filter(|f| !f.is_empty());

        let mut candidates = if intent.recommend_embeddings() {
            self.semantic_candidates(project_id, &intent, filter.as_ref(), limit, cancel)
                .await?
        } else {
            Vec::new()
        };
        if candidates.is_empty() {
            candidates = self
                .text_candidates(project_id, &intent, query, filter.as_ref(), limit, cancel)
                .await?;
        }

        let tag_index = self.tag_index_for(query, &candidates).await?;
        let options = self.scoring_options();
        let mut documents =
            score_documents(candidates, &options, tag_index.as_ref(), now, cancel)?;
        documents.truncate(limit);

        debug!(
            query,
            primary = ?intent.primary,
            results = documents.len(),
            "Ranked search results"
        );
        Ok(SearchResult { intent, documents })
    }

    /// Score breakdown for one ranked candidate.
    #[inline]
    pub fn explain(&self, doc: &ScoredDocument) -> ScoreExplanation {
        explain(doc, &self.scoring_options())
    }

    /// Candidates from the similarity backend, filtered by the intent's
    /// metadata filter when one was extracted. Returns an empty set
    /// when providers are missing or fail, so the caller can fall back
    /// to text search.
    async fn semantic_candidates(
        &self,
        project_id: &str,
        intent: &QueryIntent,
        filter: Option<&MetadataFilter>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredDocument>> {
        let (Some(embedder), Some(similarity)) = (&self.embedder, &self.similarity) else {
            return Ok(Vec::new());
        };
        if intent.semantic_query.is_empty() {
            return Ok(Vec::new());
        }

        let vector = match embedder.embed(&intent.semantic_query).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!("Embedding provider failed, falling back to text search: {err}");
                return Ok(Vec::new());
            }
        };
        // Over-fetch so post-filtering still fills the page.
        let hits = match similarity.search(&vector, limit.saturating_mul(3).max(limit)).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!("Similarity provider failed, falling back to text search: {err}");
                return Ok(Vec::new());
            }
        };

        let allowed: Option<HashSet<String>> = match filter {
            Some(filter) => {
                let matched = self
                    .resolver
                    .query_hierarchical(
                        project_id,
                        filter,
                        &HierarchicalQueryOptions::default(),
                        cancel,
                    )
                    .await?;
                Some(
                    matched
                        .documents
                        .into_iter()
                        .map(|d| d.metadata.id)
                        .collect(),
                )
            }
            None => None,
        };

        let hierarchy = self.resolver.hierarchy_for(project_id).await;
        let mut candidates = Vec::new();
        for (document_id, score) in hits {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if let Some(allowed) = &allowed
                && !allowed.contains(&document_id)
            {
                continue;
            }
            for scope in hierarchy.chain(ScopeLevel::Global) {
                let index = self.resolver.index_for(scope).await?;
                if let Some(doc) = index.get(&document_id).await {
                    candidates.push(ScoredDocument::new(doc, score));
                    break;
                }
            }
        }
        Ok(candidates)
    }

    /// Candidates from hierarchical text search (or a pure metadata
    /// query when the intent left no semantic residual). The scope-
    /// adjusted match score stands in for semantic similarity.
    async fn text_candidates(
        &self,
        project_id: &str,
        intent: &QueryIntent,
        query: &str,
        filter: Option<&MetadataFilter>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredDocument>> {
        let options = HierarchicalQueryOptions {
            overall_limit: Some(limit.saturating_mul(3).max(limit)),
            ..HierarchicalQueryOptions::default()
        };

        let text = if intent.semantic_query.is_empty() {
            query
        } else {
            &intent.semantic_query
        };

        let result = if text.trim().is_empty() {
            let filter = filter.cloned().unwrap_or_default();
            self.resolver
                .query_hierarchical(project_id, &filter, &options, cancel)
                .await?
        } else {
            self.resolver
                .search_hierarchical(project_id, text, filter, &options, cancel)
                .await?
        };

        Ok(result
            .documents
            .into_iter()
            .map(|d| ScoredDocument::new(Arc::new(d.metadata), d.adjusted_score))
            .collect())
    }

    /// Tag relevance index for a query context: cache hit by checksum,
    /// else a provider call over the candidates' tag union. Provider
    /// failure degrades to no index (every tag scores neutral).
    async fn tag_index_for(
        &self,
        query: &str,
        candidates: &[ScoredDocument],
    ) -> Result<Option<TagRelevanceIndex>> {
        if !self.config.tags.enabled || query.trim().is_empty() {
            return Ok(None);
        }

        let checksum = context_checksum(query);
        if let Some(cached) = self.tag_cache.get_by_checksum(&checksum).await {
            debug!("Tag index cache hit for checksum {checksum}");
            return Ok(Some(cached));
        }

        let tags: Vec<String> = candidates
            .iter()
            .flat_map(|c| c.metadata.tags.iter().cloned())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        if tags.is_empty() {
            return Ok(None);
        }

        match self.tag_scorer.score_tags(query, &tags).await {
            Ok(scores) => {
                let index = TagRelevanceIndex::new(checksum, scores);
                if let Err(err) = self.tag_cache.store(index.clone()).await {
                    warn!("Failed to cache tag relevance index: {err}");
                }
                Ok(Some(index))
            }
            Err(err) => {
                warn!("Tag scorer failed, scoring tags neutral: {err}");
                Ok(None)
            }
        }
    }

    /// Drop cached tag indexes older than the configured maximum age.
    pub async fn expire_tag_indexes(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.tags.max_age_days));
        Ok(self.tag_cache.cleanup_older_than(cutoff).await?)
    }

    #[inline]
    pub fn tag_cache(&self) -> &TagRelevanceCache {
        &self.tag_cache
    }

    fn chunk_path(&self, document_id: &str) -> PathBuf {
        self.config
            .storage
            .root
            .join("chunks")
            .join(format!("{}.json", sanitize_filename(document_id)))
    }

    /// Previously persisted chunk set for a document. Corrupt ledgers
    /// read as empty, which makes every chunk look new.
    async fn load_chunks(&self, document_id: &str) -> Vec<ContentChunk> {
        let path = self.chunk_path(document_id);
        match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(chunks) => chunks,
                Err(err) => {
                    warn!("Discarding corrupt chunk ledger {}: {err}", path.display());
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    /// Re-chunk a document's content, diff against the persisted chunk
    /// set, embed only the changed chunks, and persist the merged set.
    ///
    /// An embedding provider failure leaves the affected chunks marked
    /// unembedded rather than failing the reindex; a later pass can
    /// pick them up.
    pub async fn reindex_document(
        &self,
        document_id: &str,
        parts: &[String],
    ) -> Result<ChunkDiff> {
        let old = self.load_chunks(document_id).await;
        let fresh = build_chunks(document_id, parts);
        let mut diff = diff_chunks(&old, &fresh);

        if let Some(embedder) = &self.embedder {
            for chunk in diff.new.iter_mut().chain(diff.modified.iter_mut()) {
                match embedder.embed(&chunk.content).await {
                    Ok(_vector) => {
                        chunk.has_embedding = true;
                        chunk.embedding_model = Some(embedder.model_id().to_string());
                        chunk.embedded_at = Some(Utc::now());
                    }
                    Err(err) => {
                        warn!(
                            "Embedding failed for chunk {} of {document_id}: {err}",
                            chunk.chunk_index
                        );
                    }
                }
            }
        }

        let unchanged: Vec<ContentChunk> = old
            .iter()
            .filter(|c| diff.unchanged_ids.contains(&c.id))
            .cloned()
            .collect();
        let mut merged: Vec<ContentChunk> = unchanged;
        merged.extend(diff.new.iter().cloned());
        merged.extend(diff.modified.iter().cloned());
        merged.sort_by_key(|c| c.chunk_index);

        let content = serde_json::to_string_pretty(&merged)?;
        let path = self.chunk_path(document_id);
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write chunk ledger: {}", path.display()))?;

        info!(
            "Reindexed {document_id}: {} to embed, {:.0}% cache hit",
            diff.chunks_to_embed(),
            diff.cache_hit_rate() * 100.0
        );
        Ok(diff)
    }

    /// Persisted chunk set for a document, ordered by index.
    pub async fn chunks(&self, document_id: &str) -> Vec<ContentChunk> {
        let mut chunks = self.load_chunks(document_id).await;
        chunks.sort_by_key(|c| c.chunk_index);
        chunks
    }

    /// The relationship graph for a project, opened on first use.
    pub async fn graph(&self, project_id: &str) -> Result<Arc<RelationshipStore>> {
        {
            let graphs = self.graphs.read().await;
            if let Some(graph) = graphs.get(project_id) {
                return Ok(graph.clone());
            }
        }

        let path = self
            .config
            .storage
            .root
            .join("graphs")
            .join(format!("{}.json", sanitize_filename(project_id)));
        let graph = Arc::new(RelationshipStore::open(path).await?);
        let mut graphs = self.graphs.write().await;
        Ok(graphs
            .entry(project_id.to_string())
            .or_insert(graph)
            .clone())
    }

    /// Counts for the status surface: documents per scope level,
    /// relationship edges, and cached tag indexes.
    pub async fn stats(&self, project_id: &str) -> Result<StoreStats> {
        let hierarchy = self.resolver.hierarchy_for(project_id).await;
        let mut documents_per_scope = Vec::new();
        for scope in hierarchy.chain(ScopeLevel::Global) {
            let index = self.resolver.index_for(scope).await?;
            documents_per_scope.push((scope.level, index.len().await));
        }

        let graph = self.graph(project_id).await?;
        Ok(StoreStats {
            documents_per_scope,
            relationship_count: graph.edge_count().await,
            tag_index_count: self.tag_cache.list().await.len(),
        })
    }
}
