//! Document relationship graph.
//!
//! Directed, typed, confidence-weighted edges between documents,
//! persisted as a single JSON array file per scope. The edge list is
//! cached in memory and fully rewritten on every mutation; mutations
//! are serialized through a lock so concurrent writers cannot lose
//! updates.


use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use anyhow::Context;
use itertools::Itertools;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::model::{
    DocumentRelationship, GraphTraversalResult, RelatedDocument, RelationshipType,
};
use crate::{Result, StoreError};

/// File-backed relationship store for one scope.
#[derive(Debug)]
pub struct RelationshipStore {
    path: PathBuf,
    edges: Mutex<Vec<DocumentRelationship>>,
}

impl RelationshipStore {
    /// Open the store backed by `path`, loading any existing edge
    /// list. A corrupt file is treated as empty (logged, not fatal).
    pub async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create graph directory: {}", parent.display())
            })?;
        }

        let edges = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(edges) => edges,
                Err(err) => {
                    warn!(
                        "Discarding corrupt relationship file {}: {err}",
                        path.display()
                    );
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Ok(Self {
            path,
            edges: Mutex::new(edges),
        })
    }

    async fn persist(&self, edges: &[DocumentRelationship]) -> Result<()> {
        let content = serde_json::to_string_pretty(edges)?;
        fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write relationship file: {}", self.path.display()))?;
        Ok(())
    }

    pub async fn add(&self, edge: DocumentRelationship) -> Result<()> {
        self.add_batch(vec![edge]).await
    }

    /// Append edges and rewrite the backing file atomically with the
    /// cache update.
    pub async fn add_batch(&self, new_edges: Vec<DocumentRelationship>) -> Result<()> {
        if new_edges.is_empty() {
            return Ok(());
        }
        let mut edges = self.edges.lock().await;
        edges.extend(new_edges);
        self.persist(&edges).await
    }

    /// Update an edge's confidence and/or description. Unknown ids are
    /// a no-op returning `false`.
    pub async fn update(
        &self,
        id: &str,
        confidence: Option<f64>,
        description: Option<String>,
    ) -> Result<bool> {
        let mut edges = self.edges.lock().await;
        let Some(edge) = edges.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        if let Some(confidence) = confidence {
            edge.confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(description) = description {
            edge.description = Some(description);
        }
        edge.updated_at = chrono::Utc::now();
        self.persist(&edges).await?;
        Ok(true)
    }

    /// Delete an edge by id. Unknown ids are a no-op returning `false`.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut edges = self.edges.lock().await;
        let before = edges.len();
        edges.retain(|e| e.id != id);
        if edges.len() == before {
            return Ok(false);
        }
        self.persist(&edges).await?;
        Ok(true)
    }

    /// Delete every edge touching a document (either endpoint), used
    /// when the document itself is deleted. Returns how many edges went.
    pub async fn delete_for_document(&self, document_id: &str) -> Result<usize> {
        let mut edges = self.edges.lock().await;
        let before = edges.len();
        edges.retain(|e| e.source_id != document_id && e.target_id != document_id);
        let removed = before - edges.len();
        if removed > 0 {
            self.persist(&edges).await?;
            debug!("Cascade-deleted {removed} relationships for {document_id}");
        }
        Ok(removed)
    }

    /// Direct outgoing edges, strictly directional, optionally
    /// filtered by type.
    pub async fn outgoing(
        &self,
        document_id: &str,
        type_filter: Option<&[RelationshipType]>,
    ) -> Vec<DocumentRelationship> {
        let edges = self.edges.lock().await;
        edges
            .iter()
            .filter(|e| e.source_id == document_id)
            .filter(|e| type_allowed(e.relationship_type, type_filter))
            .cloned()
            .collect()
    }

    /// Direct incoming edges, strictly directional, optionally
    /// filtered by type.
    pub async fn incoming(
        &self,
        document_id: &str,
        type_filter: Option<&[RelationshipType]>,
    ) -> Vec<DocumentRelationship> {
        let edges = self.edges.lock().await;
        edges
            .iter()
            .filter(|e| e.target_id == document_id)
            .filter(|e| type_allowed(e.relationship_type, type_filter))
            .cloned()
            .collect()
    }

    /// Every edge connecting two specific documents, in either
    /// direction.
    pub async fn between(&self, a: &str, b: &str) -> Vec<DocumentRelationship> {
        let edges = self.edges.lock().await;
        edges
            .iter()
            .filter(|e| {
                (e.source_id == a && e.target_id == b) || (e.source_id == b && e.target_id == a)
            })
            .cloned()
            .collect()
    }

    /// Bounded breadth-first traversal from `start`.
    ///
    /// Edges connect both endpoints for reachability, while their type
    /// and direction are preserved in the recorded path. A global
    /// visited set means the first-discovered path to a document wins.
    /// The start document itself never appears in the results.
    pub async fn traverse(
        &self,
        start: &str,
        max_depth: usize,
        type_filter: Option<&[RelationshipType]>,
        min_confidence: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<GraphTraversalResult> {
        let edges = self.edges.lock().await;

        // Adjacency over undirected reachability.
        let mut adjacency: HashMap<&str, Vec<&DocumentRelationship>> = HashMap::new();
        for edge in edges.iter() {
            adjacency.entry(&edge.source_id).or_default().push(edge);
            adjacency.entry(&edge.target_id).or_default().push(edge);
        }

        let mut result = GraphTraversalResult {
            start_id: start.to_string(),
            ..GraphTraversalResult::default()
        };
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(start);

        let mut frontier: VecDeque<(String, usize, Vec<RelationshipType>, f64)> = VecDeque::new();
        frontier.push_back((start.to_string(), 0, Vec::new(), 1.0));

        while let Some((node, depth, path, confidence)) = frontier.pop_front() {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if depth >= max_depth {
                continue;
            }

            let Some(neighbors) = adjacency.get(node.as_str()) else {
                continue;
            };
            for edge in neighbors {
                if !type_allowed(edge.relationship_type, type_filter) {
                    continue;
                }
                if let Some(min) = min_confidence
                    && edge.confidence < min
                {
                    continue;
                }
                let Some(next) = edge.other_endpoint(&node) else {
                    continue;
                };
                if !visited.insert(next) {
                    continue;
                }

                let mut next_path = path.clone();
                next_path.push(edge.relationship_type);
                let next_confidence = confidence * edge.confidence;
                let next_depth = depth + 1;

                result.related.push(RelatedDocument {
                    document_id: next.to_string(),
                    distance: next_depth,
                    path: next_path.clone(),
                    path_confidence: next_confidence,
                });
                result.max_depth_reached = result.max_depth_reached.max(next_depth);

                frontier.push_back((next.to_string(), next_depth, next_path, next_confidence));
            }
        }

        result.related.sort_by(|a, b| {
            a.distance.cmp(&b.distance).then(
                b.path_confidence
                    .partial_cmp(&a.path_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        Ok(result)
    }

    /// Documents that corroborate `document_id`, up to two hops over
    /// supporting/evidential/citation edges.
    pub async fn supporting(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<GraphTraversalResult> {
        self.traverse(
            document_id,
            2,
            Some(&[
                RelationshipType::Supports,
                RelationshipType::ProvidesEvidence,
                RelationshipType::Cites,
            ]),
            None,
            cancel,
        )
        .await
    }

    /// Documents that conflict with `document_id`.
    pub async fn contradicting(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<GraphTraversalResult> {
        self.traverse(
            document_id,
            1,
            Some(&[RelationshipType::Contradicts]),
            None,
            cancel,
        )
        .await
    }

    /// Single-hop citation lookup (not a traversal): direct edges of
    /// type Cites/CitedBy touching the document, ordered by confidence
    /// descending.
    pub async fn citing(&self, document_id: &str) -> Vec<DocumentRelationship> {
        let types = [RelationshipType::Cites, RelationshipType::CitedBy];
        let mut direct = self.outgoing(document_id, Some(&types)).await;
        direct.extend(self.incoming(document_id, Some(&types)).await);
        direct
            .into_iter()
            .unique_by(|e| e.id.clone())
            .sorted_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .collect()
    }

    pub async fn edge_count(&self) -> usize {
        self.edges.lock().await.len()
    }
}

#[inline]
fn type_allowed(
    relationship_type: RelationshipType,
    filter: Option<&[RelationshipType]>,
) -> bool {
    filter.is_none_or(|types| types.contains(&relationship_type))
}
