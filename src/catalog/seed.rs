//! Bulk-loading the course index from a JSON-lines catalog.
//!
//! One course per line. Field names from older catalogs are accepted
//! (`provider_of_course`, `suitable_academic_level_required`), and fields
//! nested under a `metadata` object are lifted to the top level.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::CourseIndex;
use crate::error::{ConfigError, Error};
use crate::retry::RetryPolicy;
use crate::workflow::model::{CourseRecord, CourseSource, one_or_many};

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    title: String,
    #[serde(alias = "provider_of_course")]
    provider: String,
    #[serde(default)]
    description: String,
    duration: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    prerequisites: Vec<String>,
    mode: Option<String>,
    #[serde(alias = "suitable_academic_level_required")]
    level: Option<String>,
    cost: Option<String>,
    url: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    career_outcomes: Vec<String>,
}

impl From<CatalogEntry> for CourseRecord {
    fn from(entry: CatalogEntry) -> Self {
        let mut record = CourseRecord::new(&entry.title, &entry.provider, CourseSource::VectorStore)
            .with_description(entry.description.trim());
        record.duration = entry.duration;
        record.prerequisites = entry
            .prerequisites
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        record.mode = entry.mode;
        record.level = entry.level;
        record.cost = entry.cost;
        record.url = entry.url;
        record.career_outcomes = entry.career_outcomes;
        record
    }
}

/// A catalog line that could not be turned into a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line: usize,
    pub reason: String,
}

/// Result of parsing a catalog.
#[derive(Debug, Default)]
pub struct ParsedCatalog {
    pub records: Vec<CourseRecord>,
    pub skipped: Vec<SkippedLine>,
}

fn lift_metadata(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value
        && let Some(Value::Object(meta)) = map.remove("metadata")
    {
        for (k, v) in meta {
            map.entry(k).or_insert(v);
        }
    }
    value
}

/// Parse JSON-lines catalog text. Blank lines are ignored.
pub fn parse_catalog(text: &str) -> ParsedCatalog {
    let mut parsed = ParsedCatalog::default();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry = serde_json::from_str::<Value>(line)
            .map(lift_metadata)
            .and_then(serde_json::from_value::<CatalogEntry>);
        match entry {
            Ok(entry) if entry.title.trim().is_empty() || entry.provider.trim().is_empty() => {
                parsed.skipped.push(SkippedLine {
                    line: line_no,
                    reason: "title and provider are required".to_string(),
                });
            }
            Ok(entry) => parsed.records.push(entry.into()),
            Err(e) => parsed.skipped.push(SkippedLine {
                line: line_no,
                reason: e.to_string(),
            }),
        }
    }
    parsed
}

/// Outcome of a seeding run.
#[derive(Debug, Default)]
pub struct SeedReport {
    pub indexed: usize,
    pub skipped: Vec<SkippedLine>,
}

/// Read `path` and upsert every valid course into `index`.
pub async fn seed_from_file(
    index: &dyn CourseIndex,
    path: &Path,
    retry: &RetryPolicy,
) -> Result<SeedReport, Error> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(ConfigError::from)?;
    let parsed = parse_catalog(&text);

    for skipped in &parsed.skipped {
        tracing::warn!(line = skipped.line, reason = %skipped.reason, "Skipping catalog line");
    }

    let mut report = SeedReport {
        indexed: 0,
        skipped: parsed.skipped,
    };
    for record in &parsed.records {
        retry.run("index.upsert", || index.upsert(record)).await?;
        report.indexed += 1;
    }
    tracing::info!(indexed = report.indexed, skipped = report.skipped.len(), "Catalog seeded");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::catalog::MemoryCourseIndex;

    const CATALOG: &str = r#"
{"title":"Python for Everybody","provider":"Coursera","description":"Intro to programming","prerequisites":["none"],"level":"high school"}
{"title":"CS50","provider_of_course":"Harvard","description":"Computer science","suitable_academic_level_required":"11th grade","prerequisites":"algebra, logic"}
{"title":"Nested","description":"d","metadata":{"provider_of_course":"MIT","mode":"online"}}
not json
{"title":"","provider":"X"}
"#;

    #[test]
    fn parses_aliases_and_nested_metadata() {
        let parsed = parse_catalog(CATALOG);
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.skipped.len(), 2);

        let cs50 = &parsed.records[1];
        assert_eq!(cs50.provider, "Harvard");
        assert_eq!(cs50.level.as_deref(), Some("11th grade"));
        assert_eq!(cs50.prerequisites.len(), 2);

        let nested = &parsed.records[2];
        assert_eq!(nested.provider, "MIT");
        assert_eq!(nested.mode.as_deref(), Some("online"));
    }

    #[test]
    fn skipped_lines_report_line_numbers() {
        let parsed = parse_catalog(CATALOG);
        let lines: Vec<usize> = parsed.skipped.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![5, 6]);
    }

    #[tokio::test]
    async fn seeds_index_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{CATALOG}").unwrap();

        let index = MemoryCourseIndex::new();
        let report = seed_from_file(
            &index,
            file.path(),
            &RetryPolicy::immediate(Duration::from_secs(1)),
        )
        .await
        .unwrap();

        assert_eq!(report.indexed, 3);
        assert_eq!(index.len().await, 3);
        let hits = index.query_similar("computer science", 5).await.unwrap();
        assert_eq!(hits[0].title, "CS50");
    }
}
