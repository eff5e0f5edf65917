//! Composite scoring engine.
//!
//! Blends semantic similarity, tag relevance, recency, and retrieval
//! position into one ranked score per candidate, with configurable
//! weights and an explanation surface for transparency.


use chrono::{DateTime, Utc};

use crate::cancel::CancellationToken;
use crate::model::{
    NEUTRAL_TAG_SCORE, ScoredDocument, ScoringOptions, TagAggregation, TagRelevanceIndex,
};
use crate::{Result, StoreError};

/// Per-signal entry in a score breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreComponent {
    pub signal: &'static str,
    pub raw: f64,
    pub weight: f64,
    pub contribution: f64,
}

/// Transparency record for one ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreExplanation {
    pub document_id: String,
    pub components: Vec<ScoreComponent>,
    pub matched_tags: Vec<String>,
    pub summary: String,
}

/// Aggregate a document's tags against a relevance index. A missing
/// index (tag scoring disabled or unavailable) is neutral.
#[inline]
pub fn tag_score(
    tags: &std::collections::BTreeSet<String>,
    index: Option<&TagRelevanceIndex>,
    aggregation: TagAggregation,
) -> f64 {
    let Some(index) = index else {
        return NEUTRAL_TAG_SCORE;
    };
    match aggregation {
        TagAggregation::Maximum => index.max_over(tags),
        TagAggregation::Average => index.average_over(tags),
        TagAggregation::Sum => {
            if tags.is_empty() {
                NEUTRAL_TAG_SCORE
            } else {
                tags.iter()
                    .map(|t| index.score_for(t))
                    .sum::<f64>()
                    .min(1.0)
            }
        }
    }
}

/// Exponential half-life decay from the document's creation time.
/// Documents with no timestamp score neutral.
#[inline]
pub fn recency_score(
    created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    half_life_days: f64,
) -> f64 {
    let Some(created_at) = created_at else {
        return 0.5;
    };
    if half_life_days <= 0.0 {
        return 0.5;
    }
    let age_days = (now - created_at).num_seconds().max(0) as f64 / 86_400.0;
    (-age_days / half_life_days).exp2()
}

/// Decaying reward for the candidate's 0-based rank in the original
/// retrieval order, normalized by candidate count.
#[inline]
pub fn position_score(rank: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.5;
    }
    1.0 - rank as f64 / total as f64
}

/// Weighted blend of the four sub-scores.
#[inline]
pub fn composite_score(doc: &ScoredDocument, options: &ScoringOptions) -> f64 {
    doc.similarity * options.similarity_weight
        + doc.tag_score * options.tag_weight
        + doc.recency_score * options.recency_weight
        + doc.position_score * options.position_weight
}

/// Fill in sub-scores and composites for every candidate, drop those
/// below the minimum score, and sort descending by composite.
///
/// Candidates must arrive in their original retrieval order; the sort
/// is stable, so equal composites retain that order.
pub fn score_documents(
    mut candidates: Vec<ScoredDocument>,
    options: &ScoringOptions,
    tag_index: Option<&TagRelevanceIndex>,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Vec<ScoredDocument>> {
    let total = candidates.len();
    for (rank, doc) in candidates.iter_mut().enumerate() {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        doc.tag_score = tag_score(&doc.metadata.tags, tag_index, options.tag_aggregation);
        doc.recency_score =
            recency_score(doc.metadata.created_at, now, options.recency_half_life_days);
        doc.position_score = position_score(rank, total);
        doc.composite_score = composite_score(doc, options);
    }

    candidates.retain(|d| d.composite_score >= options.minimum_score);
    candidates.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(candidates)
}

/// Emit a per-candidate breakdown with a one-line justification
/// favoring the dominant signal.
pub fn explain(doc: &ScoredDocument, options: &ScoringOptions) -> ScoreExplanation {
    let components = vec![
        ScoreComponent {
            signal: "similarity",
            raw: doc.similarity,
            weight: options.similarity_weight,
            contribution: doc.similarity * options.similarity_weight,
        },
        ScoreComponent {
            signal: "tags",
            raw: doc.tag_score,
            weight: options.tag_weight,
            contribution: doc.tag_score * options.tag_weight,
        },
        ScoreComponent {
            signal: "recency",
            raw: doc.recency_score,
            weight: options.recency_weight,
            contribution: doc.recency_score * options.recency_weight,
        },
        ScoreComponent {
            signal: "position",
            raw: doc.position_score,
            weight: options.position_weight,
            contribution: doc.position_score * options.position_weight,
        },
    ];

    let matched_tags: Vec<String> = doc.metadata.tags.iter().cloned().collect();
    let summary = summarize(doc, options, &matched_tags);

    ScoreExplanation {
        document_id: doc.metadata.id.clone(),
        components,
        matched_tags,
        summary,
    }
}

/// Matched tags passed in so the strong-tag line can name them.
/// Priority: strong tag match > high similarity > moderate similarity
/// > recent document > high initial rank > generic fallback.
fn summarize(doc: &ScoredDocument, options: &ScoringOptions, matched_tags: &[String]) -> String {
    if doc.tag_score >= 0.8 && options.tag_weight > 0.0 && !matched_tags.is_empty() {
        format!(
            "Strong tag match ({}) with composite score {:.2}",
            matched_tags.join(", "),
            doc.composite_score
        )
    } else if doc.similarity >= 0.8 {
        format!(
            "High semantic similarity ({:.2}) to the query",
            doc.similarity
        )
    } else if doc.similarity >= 0.6 {
        format!(
            "Moderate semantic similarity ({:.2}) to the query",
            doc.similarity
        )
    } else if doc.recency_score >= 0.8 && options.recency_weight > 0.0 {
        "Recently created document".to_string()
    } else if doc.position_score >= 0.8 && options.position_weight > 0.0 {
        "Ranked highly by the initial retrieval pass".to_string()
    } else {
        format!("Moderate overall relevance ({:.2})", doc.composite_score)
    }
}
