// Data model for the retrieval/ranking core.
// Persisted types are serde round-trippable; in-memory-only types
// (scored candidates, traversal results) are plain structs.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for a single document in a scope's index.
///
/// `id` is unique within a scope; `tags` is an unordered set stored
/// lowercased so tag matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub origin_path: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
    #[serde(default)]
    pub is_binary: bool,
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub searchable_text: Option<String>,
}

impl DocumentMetadata {
    #[inline]
    pub fn new(id: impl Into<String>, origin_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin_path: origin_path.into(),
            mime_type: "application/octet-stream".to_string(),
            size_bytes: 0,
            created_at: Some(Utc::now()),
            custom: BTreeMap::new(),
            is_binary: false,
            summary: None,
            tags: BTreeSet::new(),
            searchable_text: None,
        }
    }

    /// Add a tag, normalizing to lowercase.
    #[inline]
    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() {
            self.tags.insert(tag);
        }
    }

    #[inline]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(&tag.trim().to_lowercase())
    }

    /// Re-normalize the tag set after deserialization from an untrusted
    /// record (older records may carry mixed-case tags).
    #[inline]
    pub fn normalize_tags(&mut self) {
        let normalized = self
            .tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.tags = normalized;
    }
}

/// A bounded slice of a document's content, the unit of embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub has_embedding: bool,
    pub embedding_model: Option<String>,
    pub embedded_at: Option<DateTime<Utc>>,
}

/// Result of comparing an old chunk set against a freshly computed one.
/// Every chunk id from either set lands in exactly one category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkDiff {
    pub new: Vec<ContentChunk>,
    pub modified: Vec<ContentChunk>,
    pub unchanged_ids: Vec<String>,
    pub deleted_ids: Vec<String>,
}

impl ChunkDiff {
    /// Count of chunks that need (re-)embedding.
    #[inline]
    pub fn chunks_to_embed(&self) -> usize {
        self.new.len() + self.modified.len()
    }

    /// Fraction of surviving chunks whose embeddings can be reused.
    /// An empty comparison counts as a full hit (nothing to embed).
    #[inline]
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.unchanged_ids.len() + self.new.len() + self.modified.len();
        if total == 0 {
            1.0
        } else {
            self.unchanged_ids.len() as f64 / total as f64
        }
    }
}

/// How scores for a document's tag set are aggregated into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagAggregation {
    Maximum,
    Average,
    Sum,
}

/// Weights and knobs for the composite scorer. Weights need not sum
/// to 1; the named presets do by convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringOptions {
    pub similarity_weight: f64,
    pub tag_weight: f64,
    pub recency_weight: f64,
    pub position_weight: f64,
    pub recency_half_life_days: f64,
    pub tag_aggregation: TagAggregation,
    pub minimum_score: f64,
}

impl Default for ScoringOptions {
    #[inline]
    fn default() -> Self {
        Self {
            similarity_weight: 0.4,
            tag_weight: 0.3,
            recency_weight: 0.2,
            position_weight: 0.1,
            recency_half_life_days: 30.0,
            tag_aggregation: TagAggregation::Maximum,
            minimum_score: 0.0,
        }
    }
}

impl ScoringOptions {
    /// Preset favoring raw semantic similarity.
    #[inline]
    pub fn embedding_focused() -> Self {
        Self {
            similarity_weight: 0.7,
            tag_weight: 0.2,
            recency_weight: 0.05,
            position_weight: 0.05,
            ..Self::default()
        }
    }

    /// Preset favoring tag relevance over similarity.
    #[inline]
    pub fn tag_focused() -> Self {
        Self {
            similarity_weight: 0.2,
            tag_weight: 0.6,
            recency_weight: 0.1,
            position_weight: 0.1,
            ..Self::default()
        }
    }

    /// Preset where the composite equals the raw similarity.
    #[inline]
    pub fn similarity_only() -> Self {
        Self {
            similarity_weight: 1.0,
            tag_weight: 0.0,
            recency_weight: 0.0,
            position_weight: 0.0,
            ..Self::default()
        }
    }
}

/// A ranking candidate. Holds a shared reference to the document's
/// metadata rather than a copy; sub-scores are all in [0, 1].
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub metadata: Arc<DocumentMetadata>,
    pub similarity: f64,
    pub tag_score: f64,
    pub recency_score: f64,
    pub position_score: f64,
    pub composite_score: f64,
}

impl ScoredDocument {
    /// Wrap metadata as a candidate with a known raw similarity.
    /// Sub-scores start neutral until the scorer fills them in.
    #[inline]
    pub fn new(metadata: Arc<DocumentMetadata>, similarity: f64) -> Self {
        Self {
            metadata,
            similarity,
            tag_score: 0.5,
            recency_score: 0.5,
            position_score: 0.5,
            composite_score: 0.0,
        }
    }
}

/// Cached tag→relevance mapping produced for one query/instruction
/// context, keyed by a checksum of that context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRelevanceIndex {
    pub id: String,
    pub context_checksum: String,
    pub scores: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

/// Neutral relevance for tags the index knows nothing about.
pub const NEUTRAL_TAG_SCORE: f64 = 0.5;

impl TagRelevanceIndex {
    #[inline]
    pub fn new(context_checksum: impl Into<String>, scores: BTreeMap<String, f64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context_checksum: context_checksum.into(),
            scores,
            created_at: Utc::now(),
        }
    }

    /// Score for a single tag, neutral 0.5 when unknown.
    #[inline]
    pub fn score_for(&self, tag: &str) -> f64 {
        self.scores
            .get(&tag.trim().to_lowercase())
            .copied()
            .unwrap_or(NEUTRAL_TAG_SCORE)
    }

    /// Best score across a tag set; neutral for an empty set.
    #[inline]
    pub fn max_over<'a, I: IntoIterator<Item = &'a String>>(&self, tags: I) -> f64 {
        tags.into_iter()
            .map(|t| self.score_for(t))
            .fold(None::<f64>, |best, v| Some(best.map_or(v, |b| b.max(v))))
            .unwrap_or(NEUTRAL_TAG_SCORE)
    }

    /// Mean score across a tag set; neutral for an empty set.
    #[inline]
    pub fn average_over<'a, I: IntoIterator<Item = &'a String>>(&self, tags: I) -> f64 {
        let (sum, count) = tags
            .into_iter()
            .map(|t| self.score_for(t))
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        if count == 0 {
            NEUTRAL_TAG_SCORE
        } else {
            sum / count as f64
        }
    }
}

/// Typed, directed relationship kinds between documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    Supports,
    Contradicts,
    Cites,
    CitedBy,
    Summarizes,
    ExpandsOn,
    UpdatesVersion,
    SameAuthor,
    SameTopic,
    RespondsTo,
    ProvidesEvidence,
    DerivedFrom,
    Related,
}

impl RelationshipType {
    /// Whether traversal treats this type as symmetric. Direct
    /// outgoing/incoming queries stay strictly directional regardless.
    #[inline]
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            RelationshipType::Related | RelationshipType::SameAuthor | RelationshipType::SameTopic
        )
    }
}

impl std::fmt::Display for RelationshipType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            RelationshipType::Supports => write!(f, "Supports"),
            RelationshipType::Contradicts => write!(f, "Contradicts"),
            RelationshipType::Cites => write!(f, "Cites"),
            RelationshipType::CitedBy => write!(f, "CitedBy"),
            RelationshipType::Summarizes => write!(f, "Summarizes"),
            RelationshipType::ExpandsOn => write!(f, "ExpandsOn"),
            RelationshipType::UpdatesVersion => write!(f, "UpdatesVersion"),
            RelationshipType::SameAuthor => write!(f, "SameAuthor"),
            RelationshipType::SameTopic => write!(f, "SameTopic"),
            RelationshipType::RespondsTo => write!(f, "RespondsTo"),
            RelationshipType::ProvidesEvidence => write!(f, "ProvidesEvidence"),
            RelationshipType::DerivedFrom => write!(f, "DerivedFrom"),
            RelationshipType::Related => write!(f, "Related"),
        }
    }
}

/// Provenance of a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipSource {
    Manual,
    LlmDetected,
    CitationParsed,
    SemanticSimilarity,
    ContentOverlap,
    MetadataInferred,
}

/// Directed, confidence-weighted edge between two documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRelationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub source: RelationshipSource,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRelationship {
    #[inline]
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relationship_type: RelationshipType,
        confidence: f64,
        source: RelationshipSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship_type,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The endpoint opposite `id`, or `None` if `id` is not an endpoint.
    #[inline]
    pub fn other_endpoint(&self, id: &str) -> Option<&str> {
        if self.source_id == id {
            Some(&self.target_id)
        } else if self.target_id == id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

/// Tenancy level of a knowledge scope. Ordered from most specific
/// (`Project`) to least specific (`Global`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Project,
    Workspace,
    Global,
}

impl ScopeLevel {
    /// Default merge priority for lazily constructed hierarchies.
    #[inline]
    pub fn default_priority(self) -> i32 {
        match self {
            ScopeLevel::Project => 100,
            ScopeLevel::Workspace => 50,
            ScopeLevel::Global => 10,
        }
    }

    /// Default score multiplier applied to matches from this level.
    #[inline]
    pub fn default_weight(self) -> f64 {
        match self {
            ScopeLevel::Project => 1.0,
            ScopeLevel::Workspace => 0.8,
            ScopeLevel::Global => 0.6,
        }
    }
}

impl std::fmt::Display for ScopeLevel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ScopeLevel::Project => write!(f, "Project"),
            ScopeLevel::Workspace => write!(f, "Workspace"),
            ScopeLevel::Global => write!(f, "Global"),
        }
    }
}

/// One scope in a hierarchy: a level, an identifier, and a backing
/// store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeConfiguration {
    pub level: ScopeLevel,
    pub identifier: String,
    pub location: PathBuf,
    pub enabled: bool,
    pub priority: i32,
}

impl ScopeConfiguration {
    #[inline]
    pub fn new(level: ScopeLevel, identifier: impl Into<String>, location: PathBuf) -> Self {
        Self {
            level,
            identifier: identifier.into(),
            location,
            enabled: true,
            priority: level.default_priority(),
        }
    }
}

/// A project's inheritance chain: Project always present, Workspace
/// and Global optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeHierarchy {
    pub project: ScopeConfiguration,
    pub workspace: Option<ScopeConfiguration>,
    pub global: Option<ScopeConfiguration>,
}

impl ScopeHierarchy {
    /// Enabled scopes ordered most-specific-first, capped at `max_level`.
    #[inline]
    pub fn chain(&self, max_level: ScopeLevel) -> Vec<&ScopeConfiguration> {
        let mut scopes = Vec::with_capacity(3);
        scopes.push(&self.project);
        if let Some(workspace) = &self.workspace {
            scopes.push(workspace);
        }
        if let Some(global) = &self.global {
            scopes.push(global);
        }
        scopes
            .into_iter()
            .filter(|s| s.enabled && s.level <= max_level)
            .collect()
    }

    /// The parent of the Project scope: Workspace if configured, else
    /// Global if configured.
    #[inline]
    pub fn parent_of_project(&self) -> Option<&ScopeConfiguration> {
        self.workspace.as_ref().or(self.global.as_ref())
    }
}

/// Policy for documents that appear in multiple scopes under one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHandling {
    #[default]
    PreferMostSpecific,
    PreferLeastSpecific,
    KeepAll,
    MergeMetadata,
}

/// Caller-tunable knobs for a hierarchical query.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchicalQueryOptions {
    pub max_level: ScopeLevel,
    pub duplicate_handling: DuplicateHandling,
    pub per_scope_limit: usize,
    pub overall_limit: Option<usize>,
}

impl Default for HierarchicalQueryOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_level: ScopeLevel::Global,
            duplicate_handling: DuplicateHandling::default(),
            per_scope_limit: 100,
            overall_limit: None,
        }
    }
}

/// A match from one scope, carrying its scope attribution and the
/// weight-adjusted score used for cross-scope ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedDocument {
    pub metadata: DocumentMetadata,
    pub scope_level: ScopeLevel,
    pub scope_id: String,
    pub raw_score: f64,
    pub adjusted_score: f64,
}

/// Merged, ordered result of a hierarchical query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchicalQueryResult {
    pub documents: Vec<ScopedDocument>,
    pub scopes_queried: Vec<ScopeLevel>,
    pub total_matches: usize,
}

/// A document discovered by graph traversal: its hop distance, the
/// relationship types along the discovery path, and the product of
/// edge confidences on that path.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedDocument {
    pub document_id: String,
    pub distance: usize,
    pub path: Vec<RelationshipType>,
    pub path_confidence: f64,
}

/// Result of a bounded breadth-first traversal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphTraversalResult {
    pub start_id: String,
    pub related: Vec<RelatedDocument>,
    pub max_depth_reached: usize,
}

/// Structured filter over a scope's metadata index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub mime_type: Option<String>,
    pub mime_prefix: Option<String>,
    pub path_pattern: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub all_tags: Vec<String>,
    #[serde(default)]
    pub any_tags: Vec<String>,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl MetadataFilter {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mime_type.is_none()
            && self.mime_prefix.is_none()
            && self.path_pattern.is_none()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.all_tags.is_empty()
            && self.any_tags.is_empty()
            && self.custom.is_empty()
    }
}

/// Primary shape a query takes through the retrieval pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntentType {
    Semantic,
    MetadataFilter,
    TagSearch,
    Similarity,
    Keyword,
    Hybrid,
}

/// Filters pulled out of a raw query string by the intent classifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFilters {
    pub mime_type: Option<String>,
    pub mime_prefix: Option<String>,
    pub tags: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub reference_id: Option<String>,
    pub keywords: Vec<String>,
}

impl ExtractedFilters {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mime_type.is_none()
            && self.mime_prefix.is_none()
            && self.tags.is_empty()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.reference_id.is_none()
            && self.keywords.is_empty()
    }

    /// Lower the extracted filters into a metadata index filter.
    #[inline]
    pub fn to_metadata_filter(&self) -> MetadataFilter {
        MetadataFilter {
            mime_type: self.mime_type.clone(),
            mime_prefix: self.mime_prefix.clone(),
            created_after: self.created_after,
            created_before: self.created_before,
            any_tags: self.tags.clone(),
            ..MetadataFilter::default()
        }
    }
}

/// Classifier output: what kind of query this is and what was
/// extracted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryIntent {
    pub primary: QueryIntentType,
    pub secondary: Option<QueryIntentType>,
    pub confidence: f64,
    pub filters: ExtractedFilters,
    pub semantic_query: String,
}

impl QueryIntent {
    /// Whether this query warrants embedding-based search.
    #[inline]
    pub fn recommend_embeddings(&self) -> bool {
        matches!(
            self.primary,
            QueryIntentType::Semantic | QueryIntentType::Similarity | QueryIntentType::Hybrid
        )
    }

    /// Whether this query warrants metadata filtering.
    #[inline]
    pub fn recommend_metadata_filter(&self) -> bool {
        matches!(
            self.primary,
            QueryIntentType::MetadataFilter | QueryIntentType::TagSearch | QueryIntentType::Hybrid
        ) || !self.filters.is_empty()
    }
}
