//! Content-addressed chunk diffing.
//!
//! Detects which chunks of a document actually changed between two
//! ingestions so embedding generation can be skipped for the rest.
//! Chunks are identified by a SHA-256 digest of their content; two
//! chunks with equal hashes are content-identical regardless of index.


use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::model::{ChunkDiff, ContentChunk};

/// SHA-256 hex digest of a chunk's content. Empty content hashes to
/// the digest of the empty byte string, not an error.
#[inline]
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build a fresh chunk list for a document from its content parts,
/// assigning zero-based indexes and content hashes.
#[inline]
pub fn build_chunks(document_id: &str, parts: &[String]) -> Vec<ContentChunk> {
    let now = Utc::now();
    parts
        .iter()
        .enumerate()
        .map(|(chunk_index, content)| ContentChunk {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            chunk_index,
            content: content.clone(),
            content_hash: hash_content(content),
            created_at: now,
            modified_at: now,
            has_embedding: false,
            embedding_model: None,
            embedded_at: None,
        })
        .collect()
}

/// Compare a document's previously persisted chunks against a freshly
/// computed set.
///
/// Classification is by index and hash: a new chunk whose index had a
/// prior chunk with a different hash is Modified; a new chunk at an
/// index with no prior chunk is New; prior chunk ids absent from the
/// new set are Deleted; everything else is Unchanged. Hashes are
/// recomputed before comparison so stale stored hashes cannot skew the
/// result. Only New and Modified chunks should be sent to the
/// embedding provider.
pub fn diff_chunks(old: &[ContentChunk], new: &[ContentChunk]) -> ChunkDiff {
    let old_by_index: HashMap<usize, &ContentChunk> =
        old.iter().map(|c| (c.chunk_index, c)).collect();

    let mut diff = ChunkDiff::default();

    for chunk in new {
        let new_hash = hash_content(&chunk.content);
        match old_by_index.get(&chunk.chunk_index) {
            Some(previous) => {
                let old_hash = hash_content(&previous.content);
                if old_hash == new_hash {
                    diff.unchanged_ids.push(previous.id.clone());
                } else {
                    // The persisted chunk survives with new content, so
                    // it keeps its identity and creation time.
                    let mut modified = chunk.clone();
                    modified.id = previous.id.clone();
                    modified.created_at = previous.created_at;
                    modified.content_hash = new_hash;
                    modified.modified_at = Utc::now();
                    diff.modified.push(modified);
                }
            }
            None => {
                let mut added = chunk.clone();
                added.content_hash = new_hash;
                diff.new.push(added);
            }
        }
    }

    let surviving_indexes: HashSet<usize> = new.iter().map(|c| c.chunk_index).collect();
    for chunk in old {
        if !surviving_indexes.contains(&chunk.chunk_index) {
            diff.deleted_ids.push(chunk.id.clone());
        }
    }

    debug!(
        new = diff.new.len(),
        modified = diff.modified.len(),
        unchanged = diff.unchanged_ids.len(),
        deleted = diff.deleted_ids.len(),
        "Diffed chunk sets"
    );

    diff
}
