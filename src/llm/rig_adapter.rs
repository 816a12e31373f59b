//! Bridge from rig-core completion models to [`LlmProvider`].

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

/// Wraps any rig `CompletionModel` so the rest of the crate only sees
/// [`LlmProvider`].
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }

    fn classify_error(&self, reason: String) -> LlmError {
        let lower = reason.to_lowercase();
        if lower.contains("401") || lower.contains("unauthorized") || lower.contains("invalid api key")
        {
            LlmError::AuthFailed {
                provider: self.provider.to_string(),
            }
        } else if lower.contains("429") || lower.contains("rate limit") {
            LlmError::RateLimited {
                provider: self.provider.to_string(),
                retry_after: None,
            }
        } else {
            LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason,
            }
        }
    }
}

/// Flatten the non-system messages into a single prompt.
///
/// The last user message is the prompt proper; anything before it is
/// rendered as a labelled transcript above it.
fn render_transcript(messages: &[ChatMessage]) -> String {
    let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
    match turns.split_last() {
        None => String::new(),
        Some((last, [])) => last.content.clone(),
        Some((last, earlier)) => {
            let mut out = String::from("Conversation so far:\n");
            for m in earlier {
                let who = if m.role == Role::User { "Student" } else { "Advisor" };
                out.push_str(&format!("{who}: {}\n", m.content));
            }
            out.push_str(&format!("\nStudent: {}", last.content));
            out
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = render_transcript(&request.messages);
        if prompt.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "request has no user or assistant messages".to_string(),
            });
        }

        let mut builder = AgentBuilder::new(self.model.clone());
        if let Some(system) = request.system_prompt() {
            builder = builder.preamble(&system);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        let agent = builder.build();

        tracing::debug!(
            provider = self.provider,
            model = %self.model_name,
            label = request.label.as_deref().unwrap_or("unlabelled"),
            "Sending completion request"
        );

        let content = agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| self.classify_error(e.to_string()))?;

        Ok(CompletionResponse::text(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_message_is_the_prompt() {
        let msgs = vec![ChatMessage::system("sys"), ChatMessage::user("hello")];
        assert_eq!(render_transcript(&msgs), "hello");
    }

    #[test]
    fn earlier_turns_become_transcript() {
        let msgs = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("I'm in 11th grade"),
            ChatMessage::assistant("What interests you?"),
            ChatMessage::user("computer science"),
        ];
        let rendered = render_transcript(&msgs);
        assert!(rendered.starts_with("Conversation so far:\nStudent: I'm in 11th grade\n"));
        assert!(rendered.contains("Advisor: What interests you?"));
        assert!(rendered.ends_with("Student: computer science"));
    }

    #[test]
    fn system_only_renders_empty() {
        assert!(render_transcript(&[ChatMessage::system("sys")]).is_empty());
    }
}
