//! Session persistence: snapshots of [`SessionState`] keyed by session id.

mod libsql_backend;
mod migrations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::workflow::{SessionState, Stage};

pub use libsql_backend::LibSqlSessionStore;

/// One row of [`SessionStore::list_recent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the snapshot for `session.id`.
    async fn save(&self, session: &SessionState) -> Result<(), DatabaseError>;

    async fn load(&self, id: &str) -> Result<Option<SessionState>, DatabaseError>;

    /// Most recently updated sessions first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<SessionSummary>, DatabaseError>;
}
