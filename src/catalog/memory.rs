//! In-process course index with lexical ranking.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CourseIndex, validate_record};
use crate::error::IndexError;
use crate::workflow::model::{CourseRecord, CourseSource};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "for", "in", "of", "on", "or", "the", "to", "with", "course", "courses",
    "related", "about",
];

fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

#[derive(Default)]
struct Inner {
    /// Records in first-insertion order.
    records: Vec<CourseRecord>,
    /// Normalized key -> position in `records`.
    positions: HashMap<String, usize>,
}

/// Course index held in memory.
///
/// Scores a record by the share of query terms found in its title and
/// description. Safe for concurrent use; concurrent upserts of the same key
/// resolve last-write-wins.
#[derive(Default)]
pub struct MemoryCourseIndex {
    inner: RwLock<Inner>,
}

impl MemoryCourseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored record, in insertion order.
    pub async fn records(&self) -> Vec<CourseRecord> {
        self.inner.read().await.records.clone()
    }
}

#[async_trait]
impl CourseIndex for MemoryCourseIndex {
    async fn query_similar(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<CourseRecord>, IndexError> {
        let query = tokens(text);
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().await;
        let mut scored: Vec<(usize, &CourseRecord)> = inner
            .records
            .iter()
            .filter_map(|record| {
                let doc = tokens(&record.index_text());
                let hits = query.intersection(&doc).count();
                (hits > 0).then_some((hits, record))
            })
            .collect();
        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, record)| {
                let mut record = record.clone();
                record.source = CourseSource::VectorStore;
                record
            })
            .collect())
    }

    async fn upsert_batch(&self, records: &[CourseRecord]) -> Result<Vec<String>, IndexError> {
        // Validate the whole batch before touching the index.
        for record in records {
            validate_record(record)?;
        }

        let mut inner = self.inner.write().await;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let record = record.clone().with_canonical_id();
            let key = record.normalized_key();
            ids.push(record.id.clone());
            match inner.positions.get(&key).copied() {
                Some(pos) => inner.records[pos] = record,
                None => {
                    let pos = inner.records.len();
                    inner.records.push(record);
                    inner.positions.insert(key, pos);
                }
            }
        }
        tracing::debug!(count = ids.len(), "Courses indexed in memory");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn course(title: &str, provider: &str, description: &str) -> CourseRecord {
        CourseRecord::new(title, provider, CourseSource::WebSearch).with_description(description)
    }

    #[tokio::test]
    async fn ranks_by_term_overlap() {
        let index = MemoryCourseIndex::new();
        index
            .upsert(&course("Intro to Biology", "OpenStax", "cells and genetics"))
            .await
            .unwrap();
        index
            .upsert(&course("Computer Science Basics", "Khan", "programming for beginners"))
            .await
            .unwrap();
        index
            .upsert(&course("Data Science", "edX", "computer programming with data"))
            .await
            .unwrap();

        let hits = index.query_similar("computer science programming", 5).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Computer Science Basics", "Data Science"]);
        assert!(hits.iter().all(|c| c.source == CourseSource::VectorStore));
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let index = MemoryCourseIndex::new();
        for title in ["Zeta Python", "Alpha Python", "Mid Python"] {
            index.upsert(&course(title, "P", "")).await.unwrap();
        }
        let hits = index.query_similar("python", 2).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Zeta Python", "Alpha Python"]);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_normalized_key() {
        let index = MemoryCourseIndex::new();
        let first = index
            .upsert(&course("Python 101", "Coursera", "old"))
            .await
            .unwrap();
        let second = index
            .upsert(&course("python  101!", "COURSERA", "new"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(index.len().await, 1);
        assert_eq!(index.records().await[0].description, "new");
    }

    #[tokio::test]
    async fn concurrent_upserts_collapse_to_one_record() {
        let index = Arc::new(MemoryCourseIndex::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                let title = if i % 2 == 0 { "Web Dev" } else { "WEB-DEV" };
                index
                    .upsert(&course(title, "freeCodeCamp", &format!("v{i}")))
                    .await
                    .unwrap()
            }));
        }
        let mut ids = BTreeSet::new();
        for h in handles {
            ids.insert(h.await.unwrap());
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn rejects_records_without_provider() {
        let index = MemoryCourseIndex::new();
        let err = index.upsert(&course("Orphan", " ", "")).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn invalid_record_rejects_whole_batch() {
        let index = MemoryCourseIndex::new();
        let batch = [
            course("Algebra I", "Khan", ""),
            course("Orphan", "", ""),
            course("Geometry", "Khan", ""),
        ];
        let err = index.upsert_batch(&batch).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidRecord(_)));
        assert!(index.is_empty().await);

        let ids = index.upsert_batch(&[batch[0].clone(), batch[2].clone()]).await.unwrap();
        assert_eq!(ids, vec![batch[0].id.clone(), batch[2].id.clone()]);
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn stopword_only_query_matches_nothing() {
        let index = MemoryCourseIndex::new();
        index.upsert(&course("The Course", "X", "")).await.unwrap();
        assert!(index.query_similar("the course", 5).await.unwrap().is_empty());
    }
}
