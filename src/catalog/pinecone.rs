//! Pinecone-backed course index.
//!
//! Vectors are keyed by the course's stable id, so an upsert of an equivalent
//! course overwrites the existing vector. The full record travels as a JSON
//! string in the vector metadata, next to the time it was first indexed;
//! query results are ordered by score, then by that timestamp.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{CourseIndex, Embedder, validate_record};
use crate::error::IndexError;
use crate::ratelimit::RateLimiter;
use crate::workflow::model::{CourseRecord, CourseSource};

const API_VERSION: &str = "2024-07";

#[derive(Debug, Default, Deserialize)]
struct VectorMetadata {
    record: Option<String>,
    indexed_at: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<VectorMetadata>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    #[serde(default)]
    metadata: Option<VectorMetadata>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: std::collections::HashMap<String, FetchedVector>,
}

/// Course index stored in a Pinecone serverless index.
pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: SecretString,
    namespace: String,
    embedder: Arc<dyn Embedder>,
    limiter: Option<Arc<RateLimiter>>,
}

impl PineconeIndex {
    pub fn new(
        host: &str,
        api_key: SecretString,
        namespace: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let host = host.trim().trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        Self {
            client: Client::new(),
            host,
            api_key,
            namespace: namespace.to_string(),
            embedder,
            limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Api-Key", self.api_key.expose_secret())
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, IndexError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| IndexError::RequestFailed(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// When the vector with `id` was first indexed, if it exists.
    async fn existing_indexed_at(&self, id: &str) -> Result<Option<f64>, IndexError> {
        let req = self
            .client
            .get(format!("{}/vectors/fetch", self.host))
            .query(&[("ids", id), ("namespace", self.namespace.as_str())]);
        let fetched: FetchResponse = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;
        Ok(fetched
            .vectors
            .get(id)
            .and_then(|v| v.metadata.as_ref())
            .and_then(|m| m.indexed_at))
    }
}

/// Decode matches into records, best score first, ties by first-indexed time.
fn rank_matches(matches: Vec<QueryMatch>) -> Vec<CourseRecord> {
    let mut decoded: Vec<(f32, f64, CourseRecord)> = matches
        .into_iter()
        .filter_map(|m| {
            let meta = m.metadata.unwrap_or_default();
            let raw = meta.record?;
            match serde_json::from_str::<CourseRecord>(&raw) {
                Ok(mut record) => {
                    record.source = CourseSource::VectorStore;
                    Some((m.score, meta.indexed_at.unwrap_or(f64::MAX), record))
                }
                Err(e) => {
                    warn!(vector_id = %m.id, error = %e, "Skipping undecodable course record");
                    None
                }
            }
        })
        .collect();

    decoded.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
    });
    decoded.into_iter().map(|(_, _, record)| record).collect()
}

#[async_trait]
impl CourseIndex for PineconeIndex {
    async fn query_similar(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<CourseRecord>, IndexError> {
        if text.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(text).await?;
        let req = self.client.post(format!("{}/query", self.host)).json(&json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "namespace": self.namespace,
        }));
        let parsed: QueryResponse = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;

        let records = rank_matches(parsed.matches);
        debug!(results = records.len(), "Pinecone query complete");
        Ok(records)
    }

    async fn upsert_batch(&self, records: &[CourseRecord]) -> Result<Vec<String>, IndexError> {
        for record in records {
            validate_record(record)?;
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }

        // Everything is prepared before the write, which goes out as one
        // request so a failure stores none of the batch.
        let mut ids = Vec::with_capacity(records.len());
        let mut vectors = Vec::with_capacity(records.len());
        for record in records {
            let record = record.clone().with_canonical_id();
            let indexed_at = match self.existing_indexed_at(&record.id).await? {
                Some(t) => t,
                None => chrono::Utc::now().timestamp_millis() as f64,
            };
            let values = self.embedder.embed(&record.index_text()).await?;
            vectors.push(vector_entry(&record, values, indexed_at)?);
            ids.push(record.id);
        }

        let req = self
            .client
            .post(format!("{}/vectors/upsert", self.host))
            .json(&json!({
                "vectors": vectors,
                "namespace": self.namespace,
            }));
        self.send(req).await?;
        debug!(count = ids.len(), "Courses upserted to Pinecone");
        Ok(ids)
    }
}

/// One upsert vector carrying the encoded record in its metadata.
fn vector_entry(
    record: &CourseRecord,
    values: Vec<f32>,
    indexed_at: f64,
) -> Result<serde_json::Value, IndexError> {
    let raw =
        serde_json::to_string(record).map_err(|e| IndexError::InvalidRecord(e.to_string()))?;
    Ok(json!({
        "id": record.id,
        "values": values,
        "metadata": {
            "title": record.title,
            "provider": record.provider,
            "key": record.normalized_key(),
            "indexed_at": indexed_at,
            "record": raw,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(title: &str) -> String {
        serde_json::to_string(&CourseRecord::new(title, "P", CourseSource::WebSearch)).unwrap()
    }

    fn hit(title: &str, score: f32, indexed_at: f64) -> QueryMatch {
        QueryMatch {
            id: title.to_string(),
            score,
            metadata: Some(VectorMetadata {
                record: Some(encoded(title)),
                indexed_at: Some(indexed_at),
            }),
        }
    }

    #[test]
    fn ranks_by_score_then_index_time() {
        let ranked = rank_matches(vec![
            hit("late tie", 0.8, 200.0),
            hit("best", 0.9, 300.0),
            hit("early tie", 0.8, 100.0),
        ]);
        let titles: Vec<_> = ranked.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["best", "early tie", "late tie"]);
        assert!(ranked.iter().all(|c| c.source == CourseSource::VectorStore));
    }

    #[test]
    fn skips_matches_without_records() {
        let ranked = rank_matches(vec![
            QueryMatch {
                id: "bare".into(),
                score: 1.0,
                metadata: None,
            },
            QueryMatch {
                id: "garbled".into(),
                score: 1.0,
                metadata: Some(VectorMetadata {
                    record: Some("{not json".into()),
                    indexed_at: None,
                }),
            },
            hit("ok", 0.5, 1.0),
        ]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].title, "ok");
    }

    #[test]
    fn query_response_parses_pinecone_shape() {
        let raw = json!({
            "matches": [{
                "id": "abc",
                "score": 0.42,
                "metadata": { "record": encoded("Intro"), "indexed_at": 5.0, "title": "Intro" }
            }],
            "namespace": "courses"
        });
        let parsed: QueryResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.matches.len(), 1);
        assert_eq!(rank_matches(parsed.matches)[0].title, "Intro");
    }

    struct NoEmbed;

    #[async_trait]
    impl Embedder for NoEmbed {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, IndexError> {
            Ok(vec![0.0])
        }
    }

    fn offline_index() -> PineconeIndex {
        PineconeIndex::new(
            "courses-abc.svc.pinecone.io/",
            SecretString::from("pc-test"),
            "courses",
            Arc::new(NoEmbed),
        )
    }

    #[test]
    fn host_gets_scheme() {
        assert_eq!(offline_index().host, "https://courses-abc.svc.pinecone.io");
    }

    #[test]
    fn vector_metadata_decodes_back_to_record() {
        let record = CourseRecord::new("Intro to Python", "Coursera", CourseSource::WebSearch)
            .with_description("Variables and loops");
        let entry = vector_entry(&record, vec![0.1, 0.2], 42.0).unwrap();
        assert_eq!(entry["id"], json!(record.id));
        assert_eq!(entry["metadata"]["key"], json!("intro to python|coursera"));

        let hit: QueryMatch = serde_json::from_value(json!({
            "id": entry["id"],
            "score": 0.7,
            "metadata": entry["metadata"],
        }))
        .unwrap();
        let ranked = rank_matches(vec![hit]);
        assert_eq!(ranked[0].id, record.id);
        assert_eq!(ranked[0].description, "Variables and loops");
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let ids = offline_index().upsert_batch(&[]).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn invalid_record_fails_before_any_request() {
        let batch = [
            CourseRecord::new("Fine", "P", CourseSource::WebSearch),
            CourseRecord::new("Orphan", "", CourseSource::WebSearch),
        ];
        let err = offline_index().upsert_batch(&batch).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidRecord(_)));
    }
}
