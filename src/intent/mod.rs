//! Query intent classification.
//!
//! Inspects a raw query string, pulls out structured filters (MIME
//! mentions, tags, date phrases, similarity references, quoted
//! keywords), and decides whether the query needs embeddings, metadata
//! filtering, or both.


use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use fancy_regex::Regex;

use crate::model::{ExtractedFilters, QueryIntent, QueryIntentType};

/// Compiled filter-extraction patterns. Build once, classify many.
#[derive(Debug)]
pub struct IntentClassifier {
    quoted: Regex,
    similar: Regex,
    tag_prefix: Regex,
    tagged: Regex,
    mime: Regex,
    relative_date: Regex,
    named_period: Regex,
    absolute_date: Regex,
}

impl IntentClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            quoted: compile(r#""([^"]+)""#)?,
            similar: compile(r"(?i)\b(?:similar to|like)\s+(?:document\s+)?([A-Za-z0-9._-]+)")?,
            tag_prefix: compile(r"(?i)\btag:([A-Za-z0-9_-]+)")?,
            tagged: compile(r"(?i)\btagged\s+(?:as\s+|with\s+)?([A-Za-z0-9_-]+)")?,
            mime: compile(
                r"(?i)\b(pdfs?|images?|pictures?|photos?|videos?|audio|markdown|spreadsheets?|text files?)\b",
            )?,
            relative_date: compile(r"(?i)\b(?:last|past)\s+(\d+)\s+(days?|weeks?|months?)\b")?,
            named_period: compile(r"(?i)\b(yesterday|today|last week|last month|this week|this month)\b")?,
            absolute_date: compile(r"(?i)\b(since|after|before|until)\s+(\d{4}-\d{2}-\d{2})\b")?,
        })
    }

    /// Classify a raw query, extracting filters and deciding the
    /// primary intent. `now` anchors relative date phrases.
    pub fn classify_at(&self, query: &str, now: DateTime<Utc>) -> Result<QueryIntent> {
        let mut filters = ExtractedFilters::default();
        let mut working = query.to_string();

        // Quoted exact keywords come out first so their contents are
        // not mistaken for filter phrases.
        for capture in self.quoted.captures_iter(&working) {
            let capture = capture.context("keyword pattern failed")?;
            filters.keywords.push(capture[1].trim().to_string());
        }
        working = self.quoted.replace_all(&working, " ").into_owned();

        if let Some(capture) = self.similar.captures(&working)? {
            filters.reference_id = Some(capture[1].to_string());
            working = self.similar.replace(&working, " ").into_owned();
        }

        for pattern in [&self.tag_prefix, &self.tagged] {
            for capture in pattern.captures_iter(&working) {
                let capture = capture.context("tag pattern failed")?;
                filters.tags.push(capture[1].to_lowercase());
            }
            working = pattern.replace_all(&working, " ").into_owned();
        }

        if let Some(capture) = self.mime.captures(&working)? {
            let (mime_type, mime_prefix) = mime_for(&capture[1].to_lowercase());
            filters.mime_type = mime_type;
            filters.mime_prefix = mime_prefix;
            working = self.mime.replace_all(&working, " ").into_owned();
        }

        self.extract_dates(&mut filters, &mut working, now)?;

        let residual = normalize_residual(&working);
        let meaningful = has_semantic_content(&residual);

        let (primary, secondary, confidence) = decide(&filters, meaningful);

        Ok(QueryIntent {
            primary,
            secondary,
            confidence,
            filters,
            semantic_query: residual,
        })
    }

    #[inline]
    pub fn classify(&self, query: &str) -> Result<QueryIntent> {
        self.classify_at(query, Utc::now())
    }

    fn extract_dates(
        &self,
        filters: &mut ExtractedFilters,
        working: &mut String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(capture) = self.relative_date.captures(working)? {
            let count: i64 = capture[1].parse().unwrap_or(1);
            let days = match capture[2].to_lowercase().as_str() {
                unit if unit.starts_with("week") => count * 7,
                unit if unit.starts_with("month") => count * 30,
                _ => count,
            };
            filters.created_after = Some(now - Duration::days(days));
            *working = self.relative_date.replace_all(working, " ").into_owned();
        }

        if let Some(capture) = self.named_period.captures(working)? {
            let days = match capture[1].to_lowercase().as_str() {
                "yesterday" => 2,
                "today" => 1,
                "last week" | "this week" => 7,
                _ => 30,
            };
            filters.created_after = Some(now - Duration::days(days));
            *working = self.named_period.replace_all(working, " ").into_owned();
        }

        for capture in self.absolute_date.captures_iter(working) {
            let capture = capture.context("date pattern failed")?;
            let Some(bound) = parse_day(&capture[2]) else {
                continue;
            };
            match capture[1].to_lowercase().as_str() {
                "before" | "until" => filters.created_before = Some(bound),
                _ => filters.created_after = Some(bound),
            }
        }
        *working = self.absolute_date.replace_all(working, " ").into_owned();

        Ok(())
    }
}

#[inline]
fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Invalid intent pattern: {pattern}"))
}

fn parse_day(text: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Utc.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}

/// Map a MIME mention to an exact type or a prefix.
fn mime_for(word: &str) -> (Option<String>, Option<String>) {
    match word.trim_end_matches('s') {
        "pdf" => (Some("application/pdf".to_string()), None),
        "image" | "picture" | "photo" => (None, Some("image/".to_string())),
        "video" => (None, Some("video/".to_string())),
        "audio" => (None, Some("audio/".to_string())),
        "markdown" => (Some("text/markdown".to_string()), None),
        "spreadsheet" => (None, Some("application/vnd".to_string())),
        _ => (None, Some("text/".to_string())),
    }
}

fn normalize_residual(working: &str) -> String {
    working.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Filler that remains after filter phrases are stripped ("show me all
/// files created") carries no semantic content on its own.
fn has_semantic_content(residual: &str) -> bool {
    const FILLER: &[&str] = &[
        "a", "all", "any", "created", "documents", "docs", "files", "find", "for", "from", "get",
        "give", "in", "me", "my", "of", "search", "show", "that", "the", "with",
    ];
    residual
        .split_whitespace()
        .any(|word| !FILLER.contains(&word.to_lowercase().trim_matches(|c: char| !c.is_alphanumeric())))
}

fn decide(
    filters: &ExtractedFilters,
    meaningful_residual: bool,
) -> (QueryIntentType, Option<QueryIntentType>, f64) {
    if filters.reference_id.is_some() {
        return (QueryIntentType::Similarity, None, 0.9);
    }

    let has_tags = !filters.tags.is_empty();
    let has_keywords = !filters.keywords.is_empty();
    let has_metadata = filters.mime_type.is_some()
        || filters.mime_prefix.is_some()
        || filters.created_after.is_some()
        || filters.created_before.is_some();

    if !filters.is_empty() && !meaningful_residual {
        if has_tags && !has_metadata && !has_keywords {
            return (QueryIntentType::TagSearch, None, 0.9);
        }
        if has_keywords && !has_metadata && !has_tags {
            return (QueryIntentType::Keyword, None, 0.85);
        }
        return (QueryIntentType::MetadataFilter, None, 0.85);
    }

    if !filters.is_empty() {
        let secondary = if has_tags && !has_metadata && !has_keywords {
            QueryIntentType::TagSearch
        } else if has_keywords && !has_metadata && !has_tags {
            QueryIntentType::Keyword
        } else {
            QueryIntentType::MetadataFilter
        };
        return (QueryIntentType::Hybrid, Some(secondary), 0.75);
    }

    (QueryIntentType::Semantic, None, 0.7)
}
