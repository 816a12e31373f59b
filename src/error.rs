//! Error types for the course advisor.

use std::time::Duration;

/// Top-level error type for the advisor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Course index error: {0}")]
    Index(#[from] IndexError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors. Fatal at startup only.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required API keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Web search client errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Search API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed search response: {0}")]
    InvalidResponse(String),

    #[error("Search timed out after {0:?}")]
    Timeout(Duration),
}

/// Course index (vector store + embeddings) errors.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Index request failed: {0}")]
    RequestFailed(String),

    #[error("Index returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed index response: {0}")]
    InvalidResponse(String),

    #[error("Index call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid course record: {0}")]
    InvalidRecord(String),
}

/// Errors from the structured language-model operations.
///
/// `Malformed` is kept apart from transport failures: it is retried with a
/// stricter prompt, never with a plain backoff.
#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Model output for {task} could not be parsed: {reason}")]
    Malformed { task: &'static str, reason: String },
}

/// Recoverable conditions raised while a workflow stage runs.
///
/// None of these end the conversation. `ExternalService` and `EmptyMessage`
/// leave the session exactly as it was handed in.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("Profile is missing: {}", .missing.join(", "))]
    ProfileIncomplete { missing: Vec<String> },

    #[error("Course discovery came back empty (attempt {attempts} of {bound})")]
    DiscoveryEmpty { attempts: u32, bound: u32 },

    #[error("{service} failed: {reason}")]
    ExternalService {
        service: &'static str,
        reason: String,
    },

    #[error("Unusable model output for {task}")]
    MalformedModelOutput { task: &'static str },

    #[error("A message is required at this stage")]
    EmptyMessage,
}

impl StageError {
    /// Whether the turn that raised this error left the session untouched.
    pub fn preserves_session(&self) -> bool {
        matches!(self, Self::ExternalService { .. } | Self::EmptyMessage)
    }
}

/// Result type alias for the advisor.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_lists_every_key() {
        let err = ConfigError::MissingKeys(vec![
            "OPENAI_API_KEY".to_string(),
            "TAVILY_API_KEY".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required API keys: OPENAI_API_KEY, TAVILY_API_KEY"
        );
    }

    #[test]
    fn only_service_failures_preserve_session() {
        let external = StageError::ExternalService {
            service: "web search",
            reason: "timeout".into(),
        };
        assert!(external.preserves_session());
        assert!(StageError::EmptyMessage.preserves_session());
        assert!(!StageError::DiscoveryEmpty { attempts: 1, bound: 3 }.preserves_session());
        assert!(!StageError::MalformedModelOutput { task: "judge" }.preserves_session());
    }

    #[test]
    fn llm_error_converts_into_advisor_error() {
        let err: AdvisorError = LlmError::Timeout(Duration::from_secs(2)).into();
        assert!(matches!(err, AdvisorError::Llm(LlmError::Timeout(_))));
    }
}
