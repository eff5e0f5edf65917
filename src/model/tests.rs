use std::collections::BTreeMap;

use super::*;

#[test]
fn tags_are_case_insensitive() {
    let mut doc = DocumentMetadata::new("doc-1", "/notes/a.md");
    doc.add_tag("Rust");
    doc.add_tag("  rust  ");
    doc.add_tag("Async");

    assert_eq!(doc.tags.len(), 2);
    assert!(doc.has_tag("RUST"));
    assert!(doc.has_tag("async"));
    assert!(!doc.has_tag("tokio"));
}

#[test]
fn normalize_tags_cleans_deserialized_records() {
    let mut doc = DocumentMetadata::new("doc-1", "/notes/a.md");
    doc.tags.insert("Mixed-Case".to_string());
    doc.tags.insert("  padded ".to_string());
    doc.tags.insert(String::new());
    doc.normalize_tags();

    assert!(doc.tags.contains("mixed-case"));
    assert!(doc.tags.contains("padded"));
    assert_eq!(doc.tags.len(), 2);
}

#[test]
fn chunk_diff_cache_hit_rate() {
    let diff = ChunkDiff {
        unchanged_ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        deleted_ids: vec!["d".to_string()],
        ..ChunkDiff::default()
    };
    assert_eq!(diff.cache_hit_rate(), 1.0);
    assert_eq!(diff.chunks_to_embed(), 0);

    let empty = ChunkDiff::default();
    assert_eq!(empty.cache_hit_rate(), 1.0);
}

#[test]
fn tag_index_neutral_for_unknown_tags() {
    let index = TagRelevanceIndex::new("checksum", BTreeMap::new());
    assert_eq!(index.score_for("anything"), NEUTRAL_TAG_SCORE);

    let tags = vec!["a".to_string(), "b".to_string()];
    assert_eq!(index.max_over(&tags), NEUTRAL_TAG_SCORE);
    assert_eq!(index.average_over(&tags), NEUTRAL_TAG_SCORE);
}

#[test]
fn tag_index_aggregation() {
    let mut scores = BTreeMap::new();
    scores.insert("rust".to_string(), 0.9);
    scores.insert("async".to_string(), 0.3);
    let index = TagRelevanceIndex::new("checksum", scores);

    let tags = vec!["rust".to_string(), "async".to_string()];
    assert_eq!(index.max_over(&tags), 0.9);
    assert!((index.average_over(&tags) - 0.6).abs() < 1e-9);

    // Unknown tags mix in the neutral default.
    let mixed = vec!["rust".to_string(), "unknown".to_string()];
    assert_eq!(index.max_over(&mixed), 0.9);
    assert!((index.average_over(&mixed) - 0.7).abs() < 1e-9);
}

#[test]
fn empty_tag_set_aggregates_to_neutral() {
    let index = TagRelevanceIndex::new("checksum", BTreeMap::new());
    let tags: Vec<String> = vec![];
    assert_eq!(index.max_over(&tags), NEUTRAL_TAG_SCORE);
    assert_eq!(index.average_over(&tags), NEUTRAL_TAG_SCORE);
}

#[test]
fn symmetric_relationship_types() {
    assert!(RelationshipType::Related.is_symmetric());
    assert!(RelationshipType::SameAuthor.is_symmetric());
    assert!(RelationshipType::SameTopic.is_symmetric());
    assert!(!RelationshipType::Supports.is_symmetric());
    assert!(!RelationshipType::Cites.is_symmetric());
    assert!(!RelationshipType::Contradicts.is_symmetric());
}

#[test]
fn relationship_confidence_is_clamped() {
    let edge = DocumentRelationship::new(
        "a",
        "b",
        RelationshipType::Supports,
        1.7,
        RelationshipSource::Manual,
    );
    assert_eq!(edge.confidence, 1.0);

    let edge = DocumentRelationship::new(
        "a",
        "b",
        RelationshipType::Supports,
        -0.2,
        RelationshipSource::Manual,
    );
    assert_eq!(edge.confidence, 0.0);
}

#[test]
fn relationship_other_endpoint() {
    let edge = DocumentRelationship::new(
        "a",
        "b",
        RelationshipType::Cites,
        0.8,
        RelationshipSource::CitationParsed,
    );
    assert_eq!(edge.other_endpoint("a"), Some("b"));
    assert_eq!(edge.other_endpoint("b"), Some("a"));
    assert_eq!(edge.other_endpoint("c"), None);
}

#[test]
fn scope_level_ordering() {
    assert!(ScopeLevel::Project < ScopeLevel::Workspace);
    assert!(ScopeLevel::Workspace < ScopeLevel::Global);
    assert_eq!(ScopeLevel::Project.default_priority(), 100);
    assert_eq!(ScopeLevel::Global.default_priority(), 10);
    assert_eq!(ScopeLevel::Project.default_weight(), 1.0);
    assert_eq!(ScopeLevel::Workspace.default_weight(), 0.8);
    assert_eq!(ScopeLevel::Global.default_weight(), 0.6);
}

#[test]
fn hierarchy_chain_respects_max_level_and_enabled() {
    let root = std::path::PathBuf::from("/tmp/store");
    let mut hierarchy = ScopeHierarchy {
        project: ScopeConfiguration::new(ScopeLevel::Project, "proj", root.join("proj")),
        workspace: Some(ScopeConfiguration::new(
            ScopeLevel::Workspace,
            "ws",
            root.join("ws"),
        )),
        global: Some(ScopeConfiguration::new(
            ScopeLevel::Global,
            "global",
            root.join("global"),
        )),
    };

    let chain = hierarchy.chain(ScopeLevel::Global);
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0].level, ScopeLevel::Project);
    assert_eq!(chain[2].level, ScopeLevel::Global);

    let chain = hierarchy.chain(ScopeLevel::Workspace);
    assert_eq!(chain.len(), 2);

    hierarchy.workspace.as_mut().unwrap().enabled = false;
    let chain = hierarchy.chain(ScopeLevel::Global);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].level, ScopeLevel::Global);
}

#[test]
fn project_parent_prefers_workspace() {
    let root = std::path::PathBuf::from("/tmp/store");
    let hierarchy = ScopeHierarchy {
        project: ScopeConfiguration::new(ScopeLevel::Project, "proj", root.join("proj")),
        workspace: Some(ScopeConfiguration::new(
            ScopeLevel::Workspace,
            "ws",
            root.join("ws"),
        )),
        global: Some(ScopeConfiguration::new(
            ScopeLevel::Global,
            "global",
            root.join("global"),
        )),
    };
    assert_eq!(
        hierarchy.parent_of_project().map(|s| s.level),
        Some(ScopeLevel::Workspace)
    );

    let no_workspace = ScopeHierarchy {
        workspace: None,
        ..hierarchy
    };
    assert_eq!(
        no_workspace.parent_of_project().map(|s| s.level),
        Some(ScopeLevel::Global)
    );
}

#[test]
fn similarity_only_preset_zeroes_other_weights() {
    let options = ScoringOptions::similarity_only();
    assert_eq!(options.similarity_weight, 1.0);
    assert_eq!(options.tag_weight, 0.0);
    assert_eq!(options.recency_weight, 0.0);
    assert_eq!(options.position_weight, 0.0);
}

#[test]
fn intent_recommendations() {
    let intent = QueryIntent {
        primary: QueryIntentType::Semantic,
        secondary: None,
        confidence: 0.6,
        filters: ExtractedFilters::default(),
        semantic_query: "how does chunking work".to_string(),
    };
    assert!(intent.recommend_embeddings());
    assert!(!intent.recommend_metadata_filter());

    let with_filters = QueryIntent {
        primary: QueryIntentType::Semantic,
        filters: ExtractedFilters {
            tags: vec!["rust".to_string()],
            ..ExtractedFilters::default()
        },
        ..intent.clone()
    };
    // Any extracted filter recommends metadata filtering regardless of
    // the primary type.
    assert!(with_filters.recommend_metadata_filter());

    let metadata = QueryIntent {
        primary: QueryIntentType::MetadataFilter,
        semantic_query: String::new(),
        ..intent
    };
    assert!(!metadata.recommend_embeddings());
    assert!(metadata.recommend_metadata_filter());
}

#[test]
fn metadata_document_serde_round_trip() {
    let mut doc = DocumentMetadata::new("doc-1", "/notes/a.md");
    doc.mime_type = "text/markdown".to_string();
    doc.add_tag("rust");
    doc.custom.insert("author".to_string(), "sam".to_string());

    let json = serde_json::to_string(&doc).expect("should serialize document metadata");
    let parsed: DocumentMetadata =
        serde_json::from_str(&json).expect("should parse document metadata");
    assert_eq!(doc, parsed);
}

#[test]
fn relationship_serde_round_trip() {
    let edge = DocumentRelationship::new(
        "a",
        "b",
        RelationshipType::ProvidesEvidence,
        0.75,
        RelationshipSource::LlmDetected,
    );
    let json = serde_json::to_string(&edge).expect("should serialize relationship");
    let parsed: DocumentRelationship =
        serde_json::from_str(&json).expect("should parse relationship");
    assert_eq!(edge, parsed);
}
