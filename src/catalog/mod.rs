//! Course index: similarity search over known courses plus idempotent upsert.
//!
//! Two backends:
//! - [`PineconeIndex`]: persistent vector index over HTTP, with embeddings
//!   from an [`Embedder`]
//! - [`MemoryCourseIndex`]: in-process lexical ranking, for tests and
//!   offline runs
//!
//! Both key records by [`CourseRecord::normalized_key`], so re-upserting an
//! equivalent course overwrites it in place instead of adding a duplicate.

mod embedding;
mod memory;
mod pinecone;
pub mod seed;

pub use embedding::{Embedder, OpenAiEmbedder};
pub use memory::MemoryCourseIndex;
pub use pinecone::PineconeIndex;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::workflow::model::CourseRecord;

/// A searchable store of course records.
#[async_trait]
pub trait CourseIndex: Send + Sync {
    /// Up to `top_k` records most similar to `text`, best first. Equal scores
    /// keep the order in which the records were first indexed.
    async fn query_similar(&self, text: &str, top_k: usize)
    -> Result<Vec<CourseRecord>, IndexError>;

    /// Insert or replace every record, keyed by normalized key. All or
    /// nothing: on error none of `records` is stored. Returns the stored ids
    /// in input order.
    async fn upsert_batch(&self, records: &[CourseRecord]) -> Result<Vec<String>, IndexError>;

    /// Insert or replace the record with the same normalized key.
    /// Returns the stored id.
    async fn upsert(&self, record: &CourseRecord) -> Result<String, IndexError> {
        self.upsert_batch(std::slice::from_ref(record))
            .await?
            .pop()
            .ok_or_else(|| IndexError::InvalidResponse("upsert stored no record".to_string()))
    }
}

/// Reject records that cannot be keyed.
pub(crate) fn validate_record(record: &CourseRecord) -> Result<(), IndexError> {
    if record.title.trim().is_empty() {
        return Err(IndexError::InvalidRecord("course title is empty".to_string()));
    }
    if record.provider.trim().is_empty() {
        return Err(IndexError::InvalidRecord(format!(
            "course '{}' has no provider",
            record.title
        )));
    }
    Ok(())
}
