//! Hierarchical scope resolution.
//!
//! A project inherits from an optional workspace and a global scope.
//! Queries fan out across the enabled chain most-specific-first, each
//! scope's matches are weighted by a per-level multiplier, and
//! duplicates across scopes are resolved by a caller-chosen policy.


use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::config::ScopeWeights;
use crate::index::{MetadataIndex, sanitize_filename};
use crate::model::{
    DocumentMetadata, DuplicateHandling, HierarchicalQueryOptions, HierarchicalQueryResult,
    MetadataFilter, ScopeConfiguration, ScopeHierarchy, ScopeLevel, ScopedDocument,
};
use crate::{Result, StoreError};

/// Resolves scope hierarchies and serves hierarchical queries.
pub struct ScopeResolver {
    root: PathBuf,
    weights: ScopeWeights,
    hierarchies: RwLock<HashMap<String, ScopeHierarchy>>,
    indexes: RwLock<HashMap<PathBuf, Arc<MetadataIndex>>>,
}

impl ScopeResolver {
    #[inline]
    pub fn new(root: PathBuf, weights: ScopeWeights) -> Self {
        Self {
            root,
            weights,
            hierarchies: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a project's hierarchy, lazily constructing a default
    /// one (Project priority 100, Global priority 10, Workspace only
    /// if configured) for unknown projects instead of failing.
    pub async fn hierarchy_for(&self, project_id: &str) -> ScopeHierarchy {
        {
            let hierarchies = self.hierarchies.read().await;
            if let Some(hierarchy) = hierarchies.get(project_id) {
                return hierarchy.clone();
            }
        }

        let hierarchy = self.default_hierarchy(project_id);
        info!("Created default scope hierarchy for project {project_id}");
        let mut hierarchies = self.hierarchies.write().await;
        hierarchies
            .entry(project_id.to_string())
            .or_insert(hierarchy)
            .clone()
    }

    /// Replace a project's hierarchy with an explicit configuration.
    pub async fn configure_hierarchy(&self, project_id: &str, hierarchy: ScopeHierarchy) {
        let mut hierarchies = self.hierarchies.write().await;
        hierarchies.insert(project_id.to_string(), hierarchy);
    }

    fn default_hierarchy(&self, project_id: &str) -> ScopeHierarchy {
        let project = ScopeConfiguration::new(
            ScopeLevel::Project,
            project_id,
            self.root.join("projects").join(sanitize_filename(project_id)),
        );
        let workspace = self.weights.workspace_id.as_ref().map(|workspace_id| {
            ScopeConfiguration::new(
                ScopeLevel::Workspace,
                workspace_id,
                self.root
                    .join("workspaces")
                    .join(sanitize_filename(workspace_id)),
            )
        });
        let global = Some(ScopeConfiguration::new(
            ScopeLevel::Global,
            "global",
            self.root.join("global"),
        ));
        ScopeHierarchy {
            project,
            workspace,
            global,
        }
    }

    /// The loaded metadata index for a scope, loading it on first use.
    pub async fn index_for(&self, scope: &ScopeConfiguration) -> Result<Arc<MetadataIndex>> {
        {
            let indexes = self.indexes.read().await;
            if let Some(index) = indexes.get(&scope.location) {
                return Ok(index.clone());
            }
        }

        let index = Arc::new(MetadataIndex::load(scope.location.clone()).await?);
        let mut indexes = self.indexes.write().await;
        Ok(indexes
            .entry(scope.location.clone())
            .or_insert(index)
            .clone())
    }

    /// Insert or update a document in one level of a project's chain.
    pub async fn upsert_document(
        &self,
        project_id: &str,
        level: ScopeLevel,
        doc: DocumentMetadata,
    ) -> Result<()> {
        let hierarchy = self.hierarchy_for(project_id).await;
        let scope = hierarchy
            .chain(ScopeLevel::Global)
            .into_iter()
            .find(|s| s.level == level)
            .cloned()
            .ok_or_else(|| {
                StoreError::Scope(format!("No {level} scope configured for {project_id}"))
            })?;
        let index = self.index_for(&scope).await?;
        index.upsert(doc).await?;
        Ok(())
    }

    /// Fan a structured metadata query across the chain and merge.
    pub async fn query_hierarchical(
        &self,
        project_id: &str,
        filter: &MetadataFilter,
        options: &HierarchicalQueryOptions,
        cancel: &CancellationToken,
    ) -> Result<HierarchicalQueryResult> {
        let hierarchy = self.hierarchy_for(project_id).await;
        let mut per_scope: Vec<(ScopeLevel, String, Vec<(Arc<DocumentMetadata>, f64)>)> =
            Vec::new();
        let mut scopes_queried = Vec::new();

        for scope in hierarchy.chain(options.max_level) {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let index = self.index_for(scope).await?;
            let mut matches: Vec<(Arc<DocumentMetadata>, f64)> = index
                .query(filter)
                .await?
                .into_iter()
                .map(|doc| (doc, 1.0))
                .collect();
            matches.truncate(options.per_scope_limit);
            scopes_queried.push(scope.level);
            per_scope.push((scope.level, scope.identifier.clone(), matches));
        }

        Ok(self.merge(per_scope, scopes_queried, options))
    }

    /// Fan a free-text search across the chain and merge.
    pub async fn search_hierarchical(
        &self,
        project_id: &str,
        text: &str,
        filter: Option<&MetadataFilter>,
        options: &HierarchicalQueryOptions,
        cancel: &CancellationToken,
    ) -> Result<HierarchicalQueryResult> {
        let hierarchy = self.hierarchy_for(project_id).await;
        let mut per_scope: Vec<(ScopeLevel, String, Vec<(Arc<DocumentMetadata>, f64)>)> =
            Vec::new();
        let mut scopes_queried = Vec::new();

        for scope in hierarchy.chain(options.max_level) {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let index = self.index_for(scope).await?;
            let matches = index
                .search_text(text, filter, options.per_scope_limit)
                .await?;
            scopes_queried.push(scope.level);
            per_scope.push((scope.level, scope.identifier.clone(), matches));
        }

        Ok(self.merge(per_scope, scopes_queried, options))
    }

    /// Merge per-scope matches under the duplicate policy, sort by
    /// adjusted score then specificity, and apply the overall cap.
    ///
    /// Scopes arrive most-specific-first, so under PreferMostSpecific
    /// the first occurrence of an id wins. PreferLeastSpecific is
    /// best-effort: each later duplicate evicts all prior entries for
    /// that id before being added.
    fn merge(
        &self,
        per_scope: Vec<(ScopeLevel, String, Vec<(Arc<DocumentMetadata>, f64)>)>,
        scopes_queried: Vec<ScopeLevel>,
        options: &HierarchicalQueryOptions,
    ) -> HierarchicalQueryResult {
        let total_matches = per_scope.iter().map(|(_, _, m)| m.len()).sum();

        let mut merged: Vec<ScopedDocument> = Vec::new();
        // Id-indexed positions for the policies that never evict.
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (level, scope_id, matches) in per_scope {
            let weight = self.weights.for_level(level);
            for (doc, raw_score) in matches {
                let candidate = ScopedDocument {
                    metadata: (*doc).clone(),
                    scope_level: level,
                    scope_id: scope_id.clone(),
                    raw_score,
                    adjusted_score: raw_score * weight,
                };

                match options.duplicate_handling {
                    DuplicateHandling::KeepAll => merged.push(candidate),
                    DuplicateHandling::PreferMostSpecific => {
                        if !positions.contains_key(&candidate.metadata.id) {
                            positions.insert(candidate.metadata.id.clone(), merged.len());
                            merged.push(candidate);
                        }
                    }
                    DuplicateHandling::PreferLeastSpecific => {
                        merged.retain(|d| d.metadata.id != candidate.metadata.id);
                        merged.push(candidate);
                    }
                    DuplicateHandling::MergeMetadata => {
                        match positions.get(&candidate.metadata.id) {
                            Some(&at) => {
                                let existing = &mut merged[at];
                                let tags = candidate.metadata.tags.clone();
                                existing.metadata.tags.extend(tags);
                                for (key, value) in &candidate.metadata.custom {
                                    existing
                                        .metadata
                                        .custom
                                        .entry(key.clone())
                                        .or_insert_with(|| value.clone());
                                }
                            }
                            None => {
                                positions.insert(candidate.metadata.id.clone(), merged.len());
                                merged.push(candidate);
                            }
                        }
                    }
                }
            }
        }

        merged.sort_by(|a, b| {
            b.adjusted_score
                .partial_cmp(&a.adjusted_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.scope_level.cmp(&b.scope_level))
        });
        if let Some(limit) = options.overall_limit {
            merged.truncate(limit);
        }

        debug!(
            total_matches,
            merged = merged.len(),
            "Merged hierarchical query results"
        );

        HierarchicalQueryResult {
            documents: merged,
            scopes_queried,
            total_matches,
        }
    }

    /// Promote a document from Project scope to its parent (Workspace
    /// if configured, else Global). Returns the destination level, or
    /// `None` when the project has no parent scope or the document is
    /// missing.
    pub async fn promote(
        &self,
        project_id: &str,
        document_id: &str,
    ) -> Result<Option<ScopeLevel>> {
        let hierarchy = self.hierarchy_for(project_id).await;
        let Some(parent) = hierarchy.parent_of_project() else {
            return Ok(None);
        };
        let parent = parent.clone();
        let moved = self
            .transfer(&hierarchy.project, &parent, document_id, false)
            .await?;
        Ok(moved.then_some(parent.level))
    }

    /// Move (or copy) a document between two scopes: read, write to
    /// the destination, then delete from the source. No rollback is
    /// attempted beyond the read having succeeded.
    pub async fn transfer(
        &self,
        from: &ScopeConfiguration,
        to: &ScopeConfiguration,
        document_id: &str,
        copy: bool,
    ) -> Result<bool> {
        let from_index = self.index_for(from).await?;
        let Some(doc) = from_index.get(document_id).await else {
            return Ok(false);
        };

        let to_index = self.index_for(to).await?;
        to_index.upsert((*doc).clone()).await?;
        if !copy {
            from_index.remove(document_id).await?;
        }

        debug!(
            "{} document {document_id} from {} to {}",
            if copy { "Copied" } else { "Moved" },
            from.identifier,
            to.identifier
        );
        Ok(true)
    }
}
