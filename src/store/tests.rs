use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use tempfile::TempDir;

use crate::model::{DocumentRelationship, RelationshipSource, RelationshipType};

use super::*;

fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.root = temp.path().join("store");
    config
}

async fn open_store(temp: &TempDir) -> DocumentStore {
    DocumentStore::open(test_config(temp))
        .await
        .expect("should open store successfully")
}

fn doc(id: &str, text: &str) -> DocumentMetadata {
    let mut doc = DocumentMetadata::new(id, format!("/docs/{id}.md"));
    doc.mime_type = "text/markdown".to_string();
    doc.searchable_text = Some(text.to_string());
    doc
}

struct StaticEmbedder;

#[async_trait]
impl EmbeddingGenerator for StaticEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.1, 0.2, 0.3])
    }

    fn model_id(&self) -> &str {
        "test-embedder"
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingGenerator for FailingEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Err(anyhow!("embedding service unavailable"))
    }

    fn model_id(&self) -> &str {
        "failing-embedder"
    }
}

struct StaticSimilarity {
    hits: Vec<(String, f64)>,
}

#[async_trait]
impl SimilaritySearch for StaticSimilarity {
    async fn search(&self, _query: &[f32], limit: usize) -> anyhow::Result<Vec<(String, f64)>> {
        let mut hits = self.hits.clone();
        hits.truncate(limit);
        Ok(hits)
    }
}

struct CountingTagScorer {
    calls: AtomicUsize,
}

#[async_trait]
impl TagScorer for CountingTagScorer {
    async fn score_tags(
        &self,
        _context: &str,
        tags: &[String],
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(tags.iter().map(|t| (t.clone(), 0.9)).collect())
    }
}

#[tokio::test]
async fn open_rejects_invalid_config() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let mut config = test_config(&temp);
    config.scoring.minimum_score = 2.0;
    let result = DocumentStore::open(config).await;
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[tokio::test]
async fn document_roundtrip_across_scopes() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp).await;

    store
        .upsert_document("proj", ScopeLevel::Global, doc("shared", "global knowledge"))
        .await
        .expect("should upsert document");

    let found = store
        .get_document("proj", "shared")
        .await
        .expect("should look up document");
    let (level, metadata) = found.expect("document should be found");
    assert_eq!(level, ScopeLevel::Global);
    assert_eq!(metadata.id, "shared");

    assert!(
        store
            .get_document("proj", "missing")
            .await
            .expect("should look up document")
            .is_none()
    );
}

#[tokio::test]
async fn delete_cascades_relationships_and_chunks() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp).await;

    store
        .upsert_document("proj", ScopeLevel::Project, doc("a", "alpha"))
        .await
        .expect("should upsert document");
    store
        .upsert_document("proj", ScopeLevel::Project, doc("b", "beta"))
        .await
        .expect("should upsert document");
    store
        .reindex_document("a", &["alpha content".to_string()])
        .await
        .expect("should reindex document");

    let graph = store.graph("proj").await.expect("should open graph");
    graph
        .add(DocumentRelationship::new(
            "a",
            "b",
            RelationshipType::Cites,
            0.9,
            RelationshipSource::Manual,
        ))
        .await
        .expect("should add relationship");

    let removed = store
        .delete_document("proj", "a")
        .await
        .expect("should delete document");
    assert!(removed);
    assert_eq!(graph.edge_count().await, 0);
    assert!(store.chunks("a").await.is_empty());

    let removed_again = store
        .delete_document("proj", "a")
        .await
        .expect("should handle repeat delete");
    assert!(!removed_again);
}

#[tokio::test]
async fn reindex_embeds_only_changed_chunks() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp)
        .await
        .with_embedder(Arc::new(StaticEmbedder));

    let first = store
        .reindex_document(
            "doc",
            &["intro".to_string(), "body".to_string(), "outro".to_string()],
        )
        .await
        .expect("should reindex document");
    assert_eq!(first.new.len(), 3);
    assert_eq!(first.chunks_to_embed(), 3);
    assert!(first.new.iter().all(|c| c.has_embedding));
    assert_eq!(
        first.new[0].embedding_model.as_deref(),
        Some("test-embedder")
    );

    let second = store
        .reindex_document(
            "doc",
            &[
                "intro".to_string(),
                "body revised".to_string(),
                "outro".to_string(),
            ],
        )
        .await
        .expect("should reindex document");
    assert!(second.new.is_empty());
    assert_eq!(second.modified.len(), 1);
    assert_eq!(second.unchanged_ids.len(), 2);
    assert_eq!(second.chunks_to_embed(), 1);
    assert!((second.cache_hit_rate() - 2.0 / 3.0).abs() < 1e-9);

    let chunks = store.chunks("doc").await;
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(chunks.iter().all(|c| c.has_embedding));
}

#[tokio::test]
async fn reindex_survives_embedding_failure() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp)
        .await
        .with_embedder(Arc::new(FailingEmbedder));

    let diff = store
        .reindex_document("doc", &["content".to_string()])
        .await
        .expect("reindex should not fail on provider errors");
    assert_eq!(diff.new.len(), 1);
    assert!(!diff.new[0].has_embedding);
    assert!(diff.new[0].embedding_model.is_none());
}

#[tokio::test]
async fn search_without_providers_falls_back_to_text() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp).await;

    store
        .upsert_document(
            "proj",
            ScopeLevel::Project,
            doc("local", "tokio runtime tuning notes"),
        )
        .await
        .expect("should upsert document");
    store
        .upsert_document(
            "proj",
            ScopeLevel::Global,
            doc("global", "tokio runtime tuning notes"),
        )
        .await
        .expect("should upsert document");

    let result = store
        .search("proj", "tokio runtime tuning", 10, &CancellationToken::new())
        .await
        .expect("should search successfully");

    assert_eq!(result.documents.len(), 2);
    // Equal text matches: the project-scoped document carries the
    // higher scope weight into its similarity stand-in.
    assert_eq!(result.documents[0].metadata.id, "local");
    assert!(result.documents[0].composite_score > result.documents[1].composite_score);
}

#[tokio::test]
async fn search_uses_similarity_providers_when_attached() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp)
        .await
        .with_embedder(Arc::new(StaticEmbedder))
        .with_similarity(Arc::new(StaticSimilarity {
            hits: vec![("hit".to_string(), 0.95), ("miss".to_string(), 0.9)],
        }));

    store
        .upsert_document("proj", ScopeLevel::Project, doc("hit", "relevant notes"))
        .await
        .expect("should upsert document");

    let result = store
        .search(
            "proj",
            "how do I tune the runtime",
            10,
            &CancellationToken::new(),
        )
        .await
        .expect("should search successfully");

    // "miss" has no metadata record in any scope and is dropped.
    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.documents[0].metadata.id, "hit");
    assert_eq!(result.documents[0].similarity, 0.95);
}

#[tokio::test]
async fn failing_embedder_degrades_search_to_text() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp)
        .await
        .with_embedder(Arc::new(FailingEmbedder))
        .with_similarity(Arc::new(StaticSimilarity { hits: Vec::new() }));

    store
        .upsert_document("proj", ScopeLevel::Project, doc("text", "fallback content"))
        .await
        .expect("should upsert document");

    let result = store
        .search("proj", "fallback content", 10, &CancellationToken::new())
        .await
        .expect("search should degrade, not fail");
    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.documents[0].metadata.id, "text");
}

#[tokio::test]
async fn tag_scores_are_cached_per_query_context() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let scorer = Arc::new(CountingTagScorer {
        calls: AtomicUsize::new(0),
    });
    let store = open_store(&temp).await.with_tag_scorer(scorer.clone());

    let mut tagged = doc("tagged", "rust async patterns");
    tagged.add_tag("rust");
    store
        .upsert_document("proj", ScopeLevel::Project, tagged)
        .await
        .expect("should upsert document");

    for _ in 0..2 {
        store
            .search("proj", "rust async patterns", 10, &CancellationToken::new())
            .await
            .expect("should search successfully");
    }

    // Same query context both times, so the second search reuses the
    // cached tag index instead of calling the scorer again.
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_tag_indexes_are_cleaned_up() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp).await;

    let mut stale = TagRelevanceIndex::new("checksum", BTreeMap::new());
    stale.created_at = Utc::now() - Duration::days(90);
    store
        .tag_cache()
        .store(stale)
        .await
        .expect("should store tag index");

    let expired = store
        .expire_tag_indexes()
        .await
        .expect("should expire tag indexes");
    assert_eq!(expired, 1);
    assert!(store.tag_cache().list().await.is_empty());
}

#[tokio::test]
async fn stats_reports_per_scope_counts() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp).await;

    store
        .upsert_document("proj", ScopeLevel::Project, doc("a", "alpha"))
        .await
        .expect("should upsert document");
    store
        .upsert_document("proj", ScopeLevel::Project, doc("b", "beta"))
        .await
        .expect("should upsert document");
    store
        .upsert_document("proj", ScopeLevel::Global, doc("c", "gamma"))
        .await
        .expect("should upsert document");

    let graph = store.graph("proj").await.expect("should open graph");
    graph
        .add(DocumentRelationship::new(
            "a",
            "b",
            RelationshipType::Supports,
            0.8,
            RelationshipSource::LlmDetected,
        ))
        .await
        .expect("should add relationship");

    let stats = store.stats("proj").await.expect("should gather stats");
    assert_eq!(
        stats.documents_per_scope,
        vec![(ScopeLevel::Project, 2), (ScopeLevel::Global, 1)]
    );
    assert_eq!(stats.relationship_count, 1);
}

#[tokio::test]
async fn search_cancellation_propagates() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let store = open_store(&temp).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = store.search("proj", "anything", 10, &cancel).await;
    assert!(matches!(result, Err(StoreError::Cancelled)));
}
