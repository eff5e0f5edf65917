use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::model::{
    DocumentMetadata, DocumentRelationship, DuplicateHandling, HierarchicalQueryOptions,
    MetadataFilter, RelationshipSource, RelationshipType, ScopeLevel,
};
use crate::store::DocumentStore;

async fn open_store() -> Result<DocumentStore> {
    let config = Config::load()?;
    Ok(DocumentStore::open(config).await?)
}

/// Show the current configuration as TOML
#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load()?;
    let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;

    match Config::config_file_path() {
        Ok(path) if path.exists() => println!("Configuration ({}):", path.display()),
        _ => println!("Configuration (defaults, no config file found):"),
    }
    println!();
    println!("{content}");
    Ok(())
}

/// Add a document from a local file and index its content chunks
pub async fn add_document(
    project: &str,
    path: &str,
    level: ScopeLevel,
    id: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    info!("Adding document from {path}");

    let file_path = Path::new(path);
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read document file: {path}"))?;

    let document_id = id.unwrap_or_else(|| {
        file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string())
    });

    let mut doc = DocumentMetadata::new(&document_id, path);
    doc.mime_type = mime_for_path(file_path).to_string();
    doc.size_bytes = content.len() as u64;
    doc.searchable_text = Some(content.clone());
    for tag in &tags {
        doc.add_tag(tag);
    }

    let store = open_store().await?;
    store.upsert_document(project, level, doc).await?;

    let parts: Vec<String> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();
    let diff = store.reindex_document(&document_id, &parts).await?;

    println!("Added document: {document_id} ({level} scope)");
    println!("  Chunks: {} total", diff.new.len() + diff.modified.len() + diff.unchanged_ids.len());
    println!("  Embedded: {}", diff.chunks_to_embed());
    println!("  Cache hit rate: {:.0}%", diff.cache_hit_rate() * 100.0);
    Ok(())
}

/// List every document visible from a project's scope chain
pub async fn list_documents(project: &str) -> Result<()> {
    let store = open_store().await?;
    let options = HierarchicalQueryOptions {
        duplicate_handling: DuplicateHandling::KeepAll,
        ..HierarchicalQueryOptions::default()
    };
    let result = store
        .query_metadata(
            project,
            &MetadataFilter::default(),
            &options,
            &CancellationToken::new(),
        )
        .await?;

    if result.documents.is_empty() {
        println!("No documents found for project '{project}'.");
        println!("Use 'docstore add <project> <file>' to add one.");
        return Ok(());
    }

    println!("Documents visible from project '{project}' ({} total):", result.documents.len());
    println!();
    for doc in &result.documents {
        println!("{} [{}]", doc.metadata.id, doc.scope_level);
        println!("   Path: {}", doc.metadata.origin_path);
        println!("   Type: {}", doc.metadata.mime_type);
        if !doc.metadata.tags.is_empty() {
            let tags: Vec<&str> = doc.metadata.tags.iter().map(String::as_str).collect();
            println!("   Tags: {}", tags.join(", "));
        }
        if let Some(created) = doc.metadata.created_at {
            println!("   Created: {}", created.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    Ok(())
}

/// Delete a document from every scope, cascading its relationships
pub async fn delete_document(project: &str, document_id: &str) -> Result<()> {
    let store = open_store().await?;
    if store.delete_document(project, document_id).await? {
        println!("Deleted document: {document_id}");
    } else {
        println!("Document not found: {document_id}");
    }
    Ok(())
}

/// Run the full retrieval pipeline and print ranked results
pub async fn search_documents(project: &str, query: &str, limit: usize) -> Result<()> {
    let store = open_store().await?;
    let result = store
        .search(project, query, limit, &CancellationToken::new())
        .await?;

    println!(
        "Query intent: {:?} (confidence {:.2})",
        result.intent.primary, result.intent.confidence
    );
    if let Some(secondary) = result.intent.secondary {
        println!("Secondary intent: {secondary:?}");
    }
    println!();

    if result.documents.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, doc) in result.documents.iter().enumerate() {
        let explanation = store.explain(doc);
        println!(
            "{}. {} (score {:.3})",
            rank + 1,
            doc.metadata.id,
            doc.composite_score
        );
        println!("   {}", explanation.summary);
        for component in &explanation.components {
            println!(
                "   {}: {:.2} x {:.2} = {:.3}",
                component.signal, component.raw, component.weight, component.contribution
            );
        }
    }
    Ok(())
}

/// Classify a query without running it
pub async fn classify_query(query: &str) -> Result<()> {
    let store = open_store().await?;
    let intent = store.classify_intent(query)?;

    println!("Primary intent: {:?}", intent.primary);
    if let Some(secondary) = intent.secondary {
        println!("Secondary intent: {secondary:?}");
    }
    println!("Confidence: {:.2}", intent.confidence);
    println!("Semantic query: \"{}\"", intent.semantic_query);
    println!("Use embeddings: {}", intent.recommend_embeddings());
    println!("Use metadata filter: {}", intent.recommend_metadata_filter());

    let filters = &intent.filters;
    if let Some(mime) = &filters.mime_type {
        println!("MIME type: {mime}");
    }
    if let Some(prefix) = &filters.mime_prefix {
        println!("MIME prefix: {prefix}");
    }
    if !filters.tags.is_empty() {
        println!("Tags: {}", filters.tags.join(", "));
    }
    if let Some(after) = filters.created_after {
        println!("Created after: {}", after.format("%Y-%m-%d"));
    }
    if let Some(before) = filters.created_before {
        println!("Created before: {}", before.format("%Y-%m-%d"));
    }
    if let Some(reference) = &filters.reference_id {
        println!("Similar to: {reference}");
    }
    if !filters.keywords.is_empty() {
        println!("Keywords: {}", filters.keywords.join(", "));
    }
    Ok(())
}

/// Promote a document from Project scope to its parent scope
pub async fn promote_document(project: &str, document_id: &str) -> Result<()> {
    let store = open_store().await?;
    match store.resolver().promote(project, document_id).await? {
        Some(level) => println!("Promoted {document_id} to {level} scope"),
        None => println!("Document not found in project scope: {document_id}"),
    }
    Ok(())
}

/// Record a typed relationship between two documents
pub async fn relate_documents(
    project: &str,
    source_id: &str,
    target_id: &str,
    relationship: &str,
    confidence: f64,
) -> Result<()> {
    let relationship_type = parse_relationship_type(relationship)?;
    let store = open_store().await?;
    let graph = store.graph(project).await?;
    graph
        .add(DocumentRelationship::new(
            source_id,
            target_id,
            relationship_type,
            confidence,
            RelationshipSource::Manual,
        ))
        .await?;
    println!("Recorded: {source_id} {relationship_type} {target_id} (confidence {confidence:.2})");
    Ok(())
}

/// Show documents related to one document via graph traversal
pub async fn show_related(project: &str, document_id: &str, depth: usize) -> Result<()> {
    let store = open_store().await?;
    let graph = store.graph(project).await?;
    let result = graph
        .traverse(document_id, depth, None, None, &CancellationToken::new())
        .await?;

    if result.related.is_empty() {
        println!("No related documents within {depth} hops of {document_id}.");
        return Ok(());
    }

    println!("Related to {document_id} (within {depth} hops):");
    for related in &result.related {
        let path: Vec<String> = related.path.iter().map(|t| t.to_string()).collect();
        println!(
            "  {} (distance {}, confidence {:.2}, via {})",
            related.document_id,
            related.distance,
            related.path_confidence,
            path.join(" -> ")
        );
    }
    Ok(())
}

/// Show store statistics for a project
pub async fn show_status(project: &str) -> Result<()> {
    let store = open_store().await?;
    let stats = store.stats(project).await?;

    println!("Store status for project '{project}':");
    for (level, count) in &stats.documents_per_scope {
        println!("  {level} documents: {count}");
    }
    println!("  Relationships: {}", stats.relationship_count);
    println!("  Cached tag indexes: {}", stats.tag_index_count);

    let expired = store.expire_tag_indexes().await?;
    if expired > 0 {
        println!("  Expired {expired} stale tag indexes");
    }
    Ok(())
}

fn parse_relationship_type(value: &str) -> Result<RelationshipType> {
    let parsed = match value.to_lowercase().as_str() {
        "supports" => RelationshipType::Supports,
        "contradicts" => RelationshipType::Contradicts,
        "cites" => RelationshipType::Cites,
        "citedby" | "cited-by" => RelationshipType::CitedBy,
        "summarizes" => RelationshipType::Summarizes,
        "expandson" | "expands-on" => RelationshipType::ExpandsOn,
        "updatesversion" | "updates-version" => RelationshipType::UpdatesVersion,
        "sameauthor" | "same-author" => RelationshipType::SameAuthor,
        "sametopic" | "same-topic" => RelationshipType::SameTopic,
        "respondsto" | "responds-to" => RelationshipType::RespondsTo,
        "providesevidence" | "provides-evidence" => RelationshipType::ProvidesEvidence,
        "derivedfrom" | "derived-from" => RelationshipType::DerivedFrom,
        "related" => RelationshipType::Related,
        other => bail!("Unknown relationship type: {other}"),
    };
    Ok(parsed)
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("md" | "markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}
