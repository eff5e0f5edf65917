//! Tag relevance cache.
//!
//! LLM-derived tag scores are expensive, so they are cached per
//! query/instruction context: one JSON record per index plus a
//! manifest mapping context-checksum to record id. Identical
//! instructions reuse the cached scores instead of recomputing.


use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::diff::hash_content;
use crate::model::{NEUTRAL_TAG_SCORE, TagRelevanceIndex};
use crate::providers::TagScorer;

/// Checksum of the query/instruction text a tag index was derived from.
#[inline]
pub fn context_checksum(context: &str) -> String {
    hash_content(context)
}

const MANIFEST_FILE: &str = "manifest.json";

/// File-backed cache of [`TagRelevanceIndex`] records.
#[derive(Debug)]
pub struct TagRelevanceCache {
    dir: PathBuf,
    manifest: Mutex<BTreeMap<String, String>>,
}

impl TagRelevanceCache {
    /// Open a cache rooted at `dir`, creating it if missing. A corrupt
    /// manifest is discarded and rebuilt rather than treated as fatal.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create tag cache directory: {}", dir.display()))?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = match fs::read_to_string(&manifest_path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(err) => {
                    warn!(
                        "Discarding corrupt tag cache manifest {}: {err}",
                        manifest_path.display()
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            dir,
            manifest: Mutex::new(manifest),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("tag-index-{id}.json"))
    }

    /// Upsert an index under its context checksum, replacing any prior
    /// entry for that checksum and deleting its backing record.
    pub async fn store(&self, index: TagRelevanceIndex) -> Result<()> {
        let mut manifest = self.manifest.lock().await;

        if let Some(old_id) = manifest.get(&index.context_checksum).cloned()
            && old_id != index.id
        {
            let old_path = self.record_path(&old_id);
            if let Err(err) = fs::remove_file(&old_path).await {
                debug!("Replaced tag index record already gone: {err}");
            }
        }

        let content = serde_json::to_string_pretty(&index)
            .context("Failed to serialize tag relevance index")?;
        fs::write(self.record_path(&index.id), content)
            .await
            .context("Failed to write tag relevance index record")?;

        manifest.insert(index.context_checksum.clone(), index.id.clone());
        self.persist_manifest(&manifest).await
    }

    /// Fetch by record id. Missing or corrupt records read as absent.
    pub async fn get(&self, id: &str) -> Option<TagRelevanceIndex> {
        let path = self.record_path(id);
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(index) => Some(index),
            Err(err) => {
                warn!("Skipping corrupt tag index record {}: {err}", path.display());
                None
            }
        }
    }

    /// Cache lookup by the checksum of the producing context.
    pub async fn get_by_checksum(&self, checksum: &str) -> Option<TagRelevanceIndex> {
        let id = {
            let manifest = self.manifest.lock().await;
            manifest.get(checksum).cloned()?
        };
        self.get(&id).await
    }

    /// The most recently created index, if any.
    pub async fn get_latest(&self) -> Option<TagRelevanceIndex> {
        self.list()
            .await
            .into_iter()
            .max_by_key(|index| index.created_at)
    }

    /// All readable index records; corrupt records are skipped.
    pub async fn list(&self) -> Vec<TagRelevanceIndex> {
        let mut indexes = Vec::new();
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return indexes;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("tag-index-") || !name.ends_with(".json") {
                continue;
            }
            match fs::read_to_string(entry.path()).await {
                Ok(content) => match serde_json::from_str::<TagRelevanceIndex>(&content) {
                    Ok(index) => indexes.push(index),
                    Err(err) => {
                        warn!(
                            "Skipping corrupt tag index record {}: {err}",
                            entry.path().display()
                        );
                    }
                },
                Err(err) => {
                    warn!(
                        "Skipping unreadable tag index record {}: {err}",
                        entry.path().display()
                    );
                }
            }
        }

        indexes
    }

    /// Delete by record id. Unknown ids are a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);
        if let Err(err) = fs::remove_file(&path).await {
            debug!("Tag index record already gone: {err}");
        }

        let mut manifest = self.manifest.lock().await;
        manifest.retain(|_, record_id| record_id != id);
        self.persist_manifest(&manifest).await
    }

    /// Drop every index created before `cutoff`; returns how many were
    /// removed.
    pub async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<String> = self
            .list()
            .await
            .into_iter()
            .filter(|index| index.created_at < cutoff)
            .map(|index| index.id)
            .collect();

        for id in &expired {
            self.delete(id).await?;
        }

        if !expired.is_empty() {
            debug!("Expired {} tag relevance indexes", expired.len());
        }
        Ok(expired.len())
    }

    async fn persist_manifest(&self, manifest: &BTreeMap<String, String>) -> Result<()> {
        let content =
            serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
        fs::write(self.dir.join(MANIFEST_FILE), content)
            .await
            .context("Failed to write tag cache manifest")?;
        Ok(())
    }
}

/// Provider used when tag scoring is disabled: every tag scores the
/// neutral 0.5, preserving the composite formula's shape without an
/// LLM call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTagScorer;

#[async_trait]
impl TagScorer for NoopTagScorer {
    async fn score_tags(&self, _context: &str, tags: &[String]) -> Result<BTreeMap<String, f64>> {
        Ok(tags
            .iter()
            .map(|tag| (tag.to_lowercase(), NEUTRAL_TAG_SCORE))
            .collect())
    }
}
