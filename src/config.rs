//! Configuration, read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::retry::RetryPolicy;
use crate::workflow::ControllerConfig;

/// Where course records are indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    Pinecone,
    /// In-process index, lost on exit.
    Memory,
}

impl FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pinecone" => Ok(Self::Pinecone),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown index '{other}' (expected pinecone or memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub host: String,
    pub api_key: SecretString,
    pub namespace: String,
}

/// Everything the binary needs to build its clients.
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub llm: LlmConfig,
    /// Used for embeddings regardless of the chat backend.
    pub openai_api_key: SecretString,
    pub embedding_model: String,
    pub tavily_api_key: SecretString,
    pub index: IndexBackend,
    /// Set iff `index` is [`IndexBackend::Pinecone`].
    pub pinecone: Option<PineconeConfig>,
    pub top_k: usize,
    pub max_broaden_attempts: u32,
    pub call_timeout: Duration,
    pub retry_backoff: Duration,
    pub requests_per_minute: usize,
    pub session_db: Option<PathBuf>,
    pub resume: Option<String>,
    pub log_dir: PathBuf,
}

impl AdvisorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    ///
    /// Every missing required key is reported in one
    /// [`ConfigError::MissingKeys`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend: LlmBackend = parse_or(&get, "COURSE_ADVISOR_LLM_BACKEND", LlmBackend::OpenAi)?;
        let index: IndexBackend = parse_or(&get, "COURSE_ADVISOR_INDEX", IndexBackend::Pinecone)?;

        let mut required = vec!["OPENAI_API_KEY", "TAVILY_API_KEY"];
        if backend == LlmBackend::Anthropic {
            required.push("ANTHROPIC_API_KEY");
        }
        if index == IndexBackend::Pinecone {
            required.extend(["PINECONE_API_KEY", "PINECONE_INDEX_HOST"]);
        }
        let missing: Vec<String> = required
            .iter()
            .filter(|&&key| get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        let secret = |key: &str| SecretString::from(get(key).unwrap_or_default());

        let chat_key = match backend {
            LlmBackend::OpenAi => secret("OPENAI_API_KEY"),
            LlmBackend::Anthropic => secret("ANTHROPIC_API_KEY"),
        };
        let llm = LlmConfig {
            backend,
            api_key: chat_key,
            model: get("COURSE_ADVISOR_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
        };

        let pinecone = (index == IndexBackend::Pinecone).then(|| PineconeConfig {
            host: get("PINECONE_INDEX_HOST").unwrap_or_default(),
            api_key: secret("PINECONE_API_KEY"),
            namespace: get("PINECONE_NAMESPACE").unwrap_or_else(|| "courses".to_string()),
        });

        let top_k: usize = parse_or(&get, "COURSE_ADVISOR_TOP_K", 5)?;
        let max_broaden_attempts: u32 = parse_or(&get, "COURSE_ADVISOR_MAX_BROADEN_ATTEMPTS", 3)?;
        let call_timeout_secs: u64 = parse_or(&get, "COURSE_ADVISOR_CALL_TIMEOUT_SECS", 30)?;
        let backoff_ms: u64 = parse_or(&get, "COURSE_ADVISOR_RETRY_BACKOFF_MS", 500)?;
        let requests_per_minute: usize = parse_or(&get, "COURSE_ADVISOR_REQUESTS_PER_MINUTE", 60)?;

        at_least_one("COURSE_ADVISOR_TOP_K", top_k as u64)?;
        at_least_one("COURSE_ADVISOR_MAX_BROADEN_ATTEMPTS", max_broaden_attempts as u64)?;
        at_least_one("COURSE_ADVISOR_CALL_TIMEOUT_SECS", call_timeout_secs)?;
        at_least_one("COURSE_ADVISOR_REQUESTS_PER_MINUTE", requests_per_minute as u64)?;

        Ok(Self {
            llm,
            openai_api_key: secret("OPENAI_API_KEY"),
            embedding_model: get("COURSE_ADVISOR_EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            tavily_api_key: secret("TAVILY_API_KEY"),
            index,
            pinecone,
            top_k,
            max_broaden_attempts,
            call_timeout: Duration::from_secs(call_timeout_secs),
            retry_backoff: Duration::from_millis(backoff_ms),
            requests_per_minute,
            session_db: get("COURSE_ADVISOR_SESSION_DB").map(PathBuf::from),
            resume: get("COURSE_ADVISOR_RESUME"),
            log_dir: get("COURSE_ADVISOR_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_backoff: self.retry_backoff,
            call_timeout: self.call_timeout,
            ..RetryPolicy::default()
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_broaden_attempts: self.max_broaden_attempts,
            top_k: self.top_k,
            ..ControllerConfig::default()
        }
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn at_least_one(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
