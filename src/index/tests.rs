use chrono::{Duration, Utc};
use tempfile::TempDir;

use super::*;

async fn load_index(temp: &TempDir) -> MetadataIndex {
    MetadataIndex::load(temp.path().join("scope"))
        .await
        .expect("should load index successfully")
}

fn doc(id: &str, path: &str, mime: &str) -> DocumentMetadata {
    let mut doc = DocumentMetadata::new(id, path);
    doc.mime_type = mime.to_string();
    doc
}

#[tokio::test]
async fn upsert_get_and_remove() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;
    assert!(index.is_empty().await);

    index
        .upsert(doc("doc-1", "/notes/a.md", "text/markdown"))
        .await
        .expect("should upsert document");
    assert_eq!(index.len().await, 1);

    let found = index.get("doc-1").await.expect("should find document");
    assert_eq!(found.origin_path, "/notes/a.md");

    let removed = index.remove("doc-1").await.expect("should remove document");
    assert!(removed.is_some());
    assert!(index.get("doc-1").await.is_none());

    // Removing again is a no-op.
    let removed = index.remove("doc-1").await.expect("remove should be a no-op");
    assert!(removed.is_none());
}

#[tokio::test]
async fn records_survive_reload() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    {
        let index = load_index(&temp).await;
        let mut d = doc("doc-1", "/notes/a.md", "text/markdown");
        d.add_tag("Rust");
        index.upsert(d).await.expect("should upsert document");
    }

    let reloaded = load_index(&temp).await;
    let found = reloaded.get("doc-1").await.expect("should find document");
    assert!(found.has_tag("rust"));
}

#[tokio::test]
async fn corrupt_record_is_skipped_on_load() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let dir = temp.path().join("scope");
    tokio::fs::create_dir_all(&dir)
        .await
        .expect("should create scope dir");
    tokio::fs::write(dir.join("broken.json"), "{not json")
        .await
        .expect("should write corrupt record");
    tokio::fs::write(
        dir.join("good.json"),
        serde_json::to_string(&doc("good", "/a.md", "text/markdown"))
            .expect("should serialize record"),
    )
    .await
    .expect("should write good record");

    let index = load_index(&temp).await;
    assert_eq!(index.len().await, 1);
    assert!(index.get("good").await.is_some());
}

#[tokio::test]
async fn filename_sanitization_round_trips_awkward_ids() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;

    index
        .upsert(doc("weird/id:with spaces", "/a.md", "text/plain"))
        .await
        .expect("should upsert document with awkward id");

    let reloaded = load_index(&temp).await;
    assert!(reloaded.get("weird/id:with spaces").await.is_some());
}

#[tokio::test]
async fn mime_filters() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;
    index
        .upsert(doc("md", "/a.md", "text/markdown"))
        .await
        .expect("should upsert");
    index
        .upsert(doc("png", "/b.png", "image/png"))
        .await
        .expect("should upsert");

    let exact = index
        .query(&MetadataFilter {
            mime_type: Some("image/png".to_string()),
            ..MetadataFilter::default()
        })
        .await
        .expect("should query by exact mime");
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].id, "png");

    let prefix = index
        .query(&MetadataFilter {
            mime_prefix: Some("text/".to_string()),
            ..MetadataFilter::default()
        })
        .await
        .expect("should query by mime prefix");
    assert_eq!(prefix.len(), 1);
    assert_eq!(prefix[0].id, "md");
}

#[tokio::test]
async fn path_pattern_filter() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;
    index
        .upsert(doc("a", "/notes/2024/a.md", "text/markdown"))
        .await
        .expect("should upsert");
    index
        .upsert(doc("b", "/archive/b.md", "text/markdown"))
        .await
        .expect("should upsert");

    let matches = index
        .query(&MetadataFilter {
            path_pattern: Some("/notes/**/*.md".to_string()),
            ..MetadataFilter::default()
        })
        .await
        .expect("should query by path pattern");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "a");
}

#[tokio::test]
async fn date_bound_filters() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;
    let now = Utc::now();

    let mut old = doc("old", "/old.md", "text/markdown");
    old.created_at = Some(now - Duration::days(60));
    let mut recent = doc("recent", "/recent.md", "text/markdown");
    recent.created_at = Some(now - Duration::days(1));
    let mut undated = doc("undated", "/undated.md", "text/markdown");
    undated.created_at = None;

    index.upsert(old).await.expect("should upsert");
    index.upsert(recent).await.expect("should upsert");
    index.upsert(undated).await.expect("should upsert");

    let matches = index
        .query(&MetadataFilter {
            created_after: Some(now - Duration::days(7)),
            ..MetadataFilter::default()
        })
        .await
        .expect("should query by created_after");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "recent");

    let matches = index
        .query(&MetadataFilter {
            created_before: Some(now - Duration::days(30)),
            ..MetadataFilter::default()
        })
        .await
        .expect("should query by created_before");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "old");
}

#[tokio::test]
async fn tag_and_custom_filters() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;

    let mut a = doc("a", "/a.md", "text/markdown");
    a.add_tag("rust");
    a.add_tag("async");
    a.custom.insert("team".to_string(), "core".to_string());
    let mut b = doc("b", "/b.md", "text/markdown");
    b.add_tag("rust");

    index.upsert(a).await.expect("should upsert");
    index.upsert(b).await.expect("should upsert");

    let all = index
        .query(&MetadataFilter {
            all_tags: vec!["Rust".to_string(), "ASYNC".to_string()],
            ..MetadataFilter::default()
        })
        .await
        .expect("should query by all_tags");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "a");

    let any = index
        .query(&MetadataFilter {
            any_tags: vec!["async".to_string(), "missing".to_string()],
            ..MetadataFilter::default()
        })
        .await
        .expect("should query by any_tags");
    assert_eq!(any.len(), 1);

    let custom = index
        .query(&MetadataFilter {
            custom: [("team".to_string(), "core".to_string())].into(),
            ..MetadataFilter::default()
        })
        .await
        .expect("should query by custom metadata");
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0].id, "a");
}

#[tokio::test]
async fn empty_filter_matches_everything() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;
    index.upsert(doc("a", "/a.md", "text/markdown")).await.expect("should upsert");
    index.upsert(doc("b", "/b.md", "text/markdown")).await.expect("should upsert");

    let matches = index
        .query(&MetadataFilter::default())
        .await
        .expect("should query with empty filter");
    assert_eq!(matches.len(), 2);
}

#[tokio::test]
async fn text_search_scores_and_limits() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;

    let mut exact = doc("exact", "/a.md", "text/markdown");
    exact.searchable_text = Some("Async runtime internals for Rust services".to_string());
    let mut partial = doc("partial", "/b.md", "text/markdown");
    partial.summary = Some("Notes about async programming".to_string());
    let mut unrelated = doc("unrelated", "/c.md", "text/markdown");
    unrelated.searchable_text = Some("Gardening tips".to_string());

    index.upsert(exact).await.expect("should upsert");
    index.upsert(partial).await.expect("should upsert");
    index.upsert(unrelated).await.expect("should upsert");

    let results = index
        .search_text("async runtime", None, 10)
        .await
        .expect("should search text");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0.id, "exact");
    assert_eq!(results[0].1, 1.0);
    assert!(results[1].1 < 1.0);

    let capped = index
        .search_text("async", None, 1)
        .await
        .expect("should search with limit");
    assert_eq!(capped.len(), 1);

    let none = index
        .search_text("quantum chromodynamics", None, 10)
        .await
        .expect("no matches should be an empty list");
    assert!(none.is_empty());
}

#[tokio::test]
async fn text_search_respects_filter() {
    let temp = TempDir::new().expect("should create TempDir successfully");
    let index = load_index(&temp).await;

    let mut a = doc("a", "/a.md", "text/markdown");
    a.searchable_text = Some("rust notes".to_string());
    let mut b = doc("b", "/b.png", "image/png");
    b.summary = Some("rust diagram".to_string());
    index.upsert(a).await.expect("should upsert");
    index.upsert(b).await.expect("should upsert");

    let filter = MetadataFilter {
        mime_prefix: Some("text/".to_string()),
        ..MetadataFilter::default()
    };
    let results = index
        .search_text("rust", Some(&filter), 10)
        .await
        .expect("should search with filter");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.id, "a");
}
