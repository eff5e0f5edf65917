//! Per-scope metadata index.
//!
//! Each scope persists one JSON record per document id under its
//! backing directory. The index is loaded explicitly and held in
//! memory; reads go against the in-memory map, writes update the
//! on-disk record first and the map second. A crash between the two
//! is a recoverable gap, not a hard guarantee.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use globset::Glob;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::model::{DocumentMetadata, MetadataFilter};

/// In-memory metadata index backed by one JSON file per document.
#[derive(Debug)]
pub struct MetadataIndex {
    dir: PathBuf,
    documents: RwLock<HashMap<String, Arc<DocumentMetadata>>>,
}

impl MetadataIndex {
    /// Load an index from `dir`, creating the directory if missing.
    /// Corrupted or unreadable records are skipped with a warning
    /// rather than aborting the load.
    pub async fn load(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

        let mut documents = HashMap::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read index directory: {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<DocumentMetadata>(&content) {
                    Ok(mut doc) => {
                        doc.normalize_tags();
                        documents.insert(doc.id.clone(), Arc::new(doc));
                    }
                    Err(err) => {
                        warn!("Skipping corrupt metadata record {}: {err}", path.display());
                    }
                },
                Err(err) => {
                    warn!(
                        "Skipping unreadable metadata record {}: {err}",
                        path.display()
                    );
                }
            }
        }

        debug!(
            "Loaded {} metadata records from {}",
            documents.len(),
            dir.display()
        );

        Ok(Self {
            dir,
            documents: RwLock::new(documents),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_filename(id)))
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<DocumentMetadata>> {
        self.documents.read().await.get(id).cloned()
    }

    /// Write the on-disk record, then update the in-memory entry.
    pub async fn upsert(&self, mut doc: DocumentMetadata) -> Result<()> {
        doc.normalize_tags();
        let path = self.record_path(&doc.id);
        let content =
            serde_json::to_string_pretty(&doc).context("Failed to serialize metadata record")?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write metadata record: {}", path.display()))?;

        let mut documents = self.documents.write().await;
        documents.insert(doc.id.clone(), Arc::new(doc));
        Ok(())
    }

    /// Remove a document. Unknown ids are a no-op returning `None`.
    pub async fn remove(&self, id: &str) -> Result<Option<Arc<DocumentMetadata>>> {
        let removed = {
            let mut documents = self.documents.write().await;
            documents.remove(id)
        };
        if removed.is_some() {
            let path = self.record_path(id);
            if let Err(err) = fs::remove_file(&path).await {
                debug!("Metadata record already gone: {err}");
            }
        }
        Ok(removed)
    }

    /// All documents matching a structured filter.
    pub async fn query(&self, filter: &MetadataFilter) -> Result<Vec<Arc<DocumentMetadata>>> {
        let compiled = CompiledFilter::new(filter)?;
        let documents = self.documents.read().await;
        let mut matches: Vec<Arc<DocumentMetadata>> = documents
            .values()
            .filter(|doc| compiled.matches(doc))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    /// Case-insensitive free-text search over searchable text, summary,
    /// path, and tags. Returns (document, score-in-[0,1]) pairs sorted
    /// by score descending, capped at `limit`.
    pub async fn search_text(
        &self,
        text: &str,
        filter: Option<&MetadataFilter>,
        limit: usize,
    ) -> Result<Vec<(Arc<DocumentMetadata>, f64)>> {
        let query = text.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let terms: Vec<&str> = query.split_whitespace().collect();
        let compiled = filter.map(CompiledFilter::new).transpose()?;

        let documents = self.documents.read().await;
        let mut scored: Vec<(Arc<DocumentMetadata>, f64)> = documents
            .values()
            .filter(|doc| compiled.as_ref().is_none_or(|f| f.matches(doc)))
            .filter_map(|doc| {
                let score = text_match_score(doc, &query, &terms);
                (score > 0.0).then(|| (doc.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Fraction of query terms found in the document's text fields, with
/// a full-phrase match scoring 1.0.
fn text_match_score(doc: &DocumentMetadata, query: &str, terms: &[&str]) -> f64 {
    let mut haystack = String::new();
    if let Some(text) = &doc.searchable_text {
        haystack.push_str(&text.to_lowercase());
        haystack.push(' ');
    }
    if let Some(summary) = &doc.summary {
        haystack.push_str(&summary.to_lowercase());
        haystack.push(' ');
    }
    haystack.push_str(&doc.origin_path.to_lowercase());
    for tag in &doc.tags {
        haystack.push(' ');
        haystack.push_str(tag);
    }

    if haystack.contains(query) {
        return 1.0;
    }

    let matched = terms.iter().filter(|term| haystack.contains(**term)).count();
    matched as f64 / terms.len() as f64
}

/// A metadata filter with its wildcard path pattern compiled once.
struct CompiledFilter<'a> {
    filter: &'a MetadataFilter,
    path_glob: Option<globset::GlobMatcher>,
}

impl<'a> CompiledFilter<'a> {
    fn new(filter: &'a MetadataFilter) -> Result<Self> {
        let path_glob = filter
            .path_pattern
            .as_deref()
            .map(|pattern| {
                Glob::new(pattern)
                    .map(|glob| glob.compile_matcher())
                    .with_context(|| format!("Invalid path pattern: {pattern}"))
            })
            .transpose()?;
        Ok(Self { filter, path_glob })
    }

    fn matches(&self, doc: &DocumentMetadata) -> bool {
        let filter = self.filter;

        if let Some(mime_type) = &filter.mime_type
            && !doc.mime_type.eq_ignore_ascii_case(mime_type)
        {
            return false;
        }
        if let Some(prefix) = &filter.mime_prefix
            && !doc
                .mime_type
                .to_ascii_lowercase()
                .starts_with(&prefix.to_ascii_lowercase())
        {
            return false;
        }
        if let Some(glob) = &self.path_glob
            && !glob.is_match(&doc.origin_path)
        {
            return false;
        }
        if let Some(after) = filter.created_after {
            match doc.created_at {
                Some(created) if created >= after => {}
                _ => return false,
            }
        }
        if let Some(before) = filter.created_before {
            match doc.created_at {
                Some(created) if created <= before => {}
                _ => return false,
            }
        }
        if !filter.all_tags.is_empty() && !filter.all_tags.iter().all(|tag| doc.has_tag(tag)) {
            return false;
        }
        if !filter.any_tags.is_empty() && !filter.any_tags.iter().any(|tag| doc.has_tag(tag)) {
            return false;
        }
        for (key, value) in &filter.custom {
            if doc.custom.get(key) != Some(value) {
                return false;
            }
        }

        true
    }
}

/// Make an identifier safe to use as a filename or directory name.
pub(crate) fn sanitize_filename(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
