//! libSQL session store. Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use super::{SessionStore, SessionSummary, migrations};
use crate::error::DatabaseError;
use crate::workflow::{SessionState, Stage};

/// Stores one JSON snapshot per session.
///
/// A single connection is reused for all operations; `libsql::Connection`
/// is safe for concurrent async use.
pub struct LibSqlSessionStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlSessionStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Session store opened");
        Ok(store)
    }

    /// In-memory database, mostly for tests.
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Fixed-width RFC 3339 so timestamps sort lexically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_summary(row: &libsql::Row) -> Result<SessionSummary, DatabaseError> {
    let read = |i: i32| {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("list_recent row parse: {e}")))
    };
    let stage: Stage = read(1)?.parse().map_err(DatabaseError::Serialization)?;
    Ok(SessionSummary {
        id: read(0)?,
        stage,
        created_at: parse_datetime(&read(2)?),
        updated_at: parse_datetime(&read(3)?),
    })
}

#[async_trait]
impl SessionStore for LibSqlSessionStore {
    async fn save(&self, session: &SessionState) -> Result<(), DatabaseError> {
        let state = serde_json::to_string(session)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO sessions (id, stage, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (id) DO UPDATE SET
                    stage = excluded.stage,
                    state = excluded.state,
                    updated_at = excluded.updated_at",
                params![session.id.clone(), session.stage.to_string(), state, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save: {e}")))?;

        debug!(session = %session.id, stage = %session.stage, "Session saved");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<SessionState>, DatabaseError> {
        let mut rows = self
            .conn
            .query("SELECT state FROM sessions WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("load: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let state: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("load row parse: {e}")))?;
                let session = serde_json::from_str(&state)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                Ok(Some(session))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("load: {e}"))),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<SessionSummary>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, stage, created_at, updated_at FROM sessions
                 ORDER BY updated_at DESC, id ASC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_recent: {e}")))?;

        let mut sessions = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => sessions.push(row_to_summary(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_recent: {e}"))),
            }
        }
        Ok(sessions)
    }
}
