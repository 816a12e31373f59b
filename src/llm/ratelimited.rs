//! Rate-limiting decorator for any [`LlmProvider`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::ratelimit::RateLimiter;

/// Delays requests so the inner provider never sees more than the limiter
/// allows.
pub struct RateLimitedProvider {
    inner: Arc<dyn LlmProvider>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl LlmProvider for RateLimitedProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.limiter.acquire().await;
        self.inner.complete(request).await
    }
}
