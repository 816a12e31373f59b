//! Text embeddings for the vector index.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::IndexError;
use crate::ratelimit::RateLimiter;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Calls OpenAI's `/v1/embeddings`.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: SecretString,
    model: String,
    limiter: Option<Arc<RateLimiter>>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: SecretString, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.to_string(),
            limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IndexError::Embedding("cannot embed empty text".to_string()));
        }
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let resp = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&serde_json::json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| IndexError::InvalidResponse("no embedding in response".to_string()))
    }
}
