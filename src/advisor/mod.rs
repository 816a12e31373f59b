//! Language-model operations used by the workflow stages.
//!
//! Each operation is a prompt plus a parser. Transport failures come back as
//! [`AdvisorError::Llm`]; answers that cannot be parsed come back as
//! [`AdvisorError::Malformed`] so the caller can retry with
//! [`Strictness::Strict`] before falling back to a conservative default.

pub mod parse;
pub mod prompts;

use std::sync::Arc;

use crate::error::AdvisorError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::search::SearchSnippet;
use crate::workflow::model::{
    CareerInsight, CourseRecord, InsightSubject, ProfileUpdate, StudentProfile,
    SuitabilityVerdict,
};

/// How firmly a structured prompt insists on bare JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Normal,
    Strict,
}

/// What a message sent after the guidance was delivered asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUpIntent {
    RequestCourses { hint: Option<String> },
    Conversational,
}

/// Request labels, also used by test doubles to route canned answers.
pub mod labels {
    pub const CONVERSE: &str = "converse";
    pub const EXTRACT_PROFILE: &str = "extract_profile";
    pub const EXTRACT_COURSE: &str = "extract_course";
    pub const JUDGE_SUITABILITY: &str = "judge_suitability";
    pub const CAREER_INSIGHT: &str = "career_insight";
    pub const CLASSIFY_FOLLOW_UP: &str = "classify_follow_up";
}

/// Conversation turns included when talking freely with the student.
const HISTORY_WINDOW: usize = 20;

/// The advisor's language-model client.
#[derive(Clone)]
pub struct Advisor {
    llm: Arc<dyn LlmProvider>,
}

impl Advisor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    async fn structured(
        &self,
        label: &'static str,
        prompt: String,
        max_tokens: u32,
    ) -> Result<String, AdvisorError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompt),
            ChatMessage::user("Respond now."),
        ])
        .with_temperature(0.0)
        .with_max_tokens(max_tokens)
        .with_label(label);
        Ok(self.llm.complete(request).await?.content)
    }

    /// Free-form reply to `new_message`, given the conversation so far.
    pub async fn converse(
        &self,
        history: &[ChatMessage],
        new_message: &str,
        profile: &StudentProfile,
        guidance: &str,
    ) -> Result<String, AdvisorError> {
        let mut messages = vec![ChatMessage::system(prompts::converse_system_prompt(
            profile, guidance,
        ))];
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        messages.extend(history[start..].iter().cloned());
        messages.push(ChatMessage::user(new_message));

        let request = CompletionRequest::new(messages)
            .with_temperature(0.7)
            .with_max_tokens(300)
            .with_label(labels::CONVERSE);
        let reply = self.llm.complete(request).await?.content.trim().to_string();
        if reply.is_empty() {
            return Err(AdvisorError::Malformed {
                task: "conversation",
                reason: "empty reply".to_string(),
            });
        }
        Ok(reply)
    }

    pub async fn extract_profile(
        &self,
        message: &str,
        profile: &StudentProfile,
        strictness: Strictness,
    ) -> Result<ProfileUpdate, AdvisorError> {
        let prompt = prompts::extract_profile_prompt(profile, message, strictness);
        let answer = self.structured(labels::EXTRACT_PROFILE, prompt, 400).await?;
        parse::parse_profile_update(&answer)
    }

    /// `Ok(None)` when the snippet does not describe a course.
    pub async fn extract_course(
        &self,
        snippet: &SearchSnippet,
        strictness: Strictness,
    ) -> Result<Option<CourseRecord>, AdvisorError> {
        let prompt = prompts::extract_course_prompt(snippet, strictness);
        let answer = self.structured(labels::EXTRACT_COURSE, prompt, 600).await?;
        parse::parse_course(&answer, snippet)
    }

    pub async fn judge_suitability(
        &self,
        course: &CourseRecord,
        profile: &StudentProfile,
        strictness: Strictness,
    ) -> Result<SuitabilityVerdict, AdvisorError> {
        let prompt = prompts::judge_suitability_prompt(course, profile, strictness);
        let answer = self.structured(labels::JUDGE_SUITABILITY, prompt, 300).await?;
        parse::parse_verdict(&answer, &course.id)
    }

    pub async fn generate_career_insight(
        &self,
        subject: &InsightSubject,
        courses: &[CourseRecord],
        profile: &StudentProfile,
        strictness: Strictness,
    ) -> Result<CareerInsight, AdvisorError> {
        let prompt = prompts::career_insight_prompt(subject, courses, profile, strictness);
        let answer = self.structured(labels::CAREER_INSIGHT, prompt, 800).await?;
        parse::parse_insight(&answer, subject.clone())
    }

    pub async fn classify_follow_up(
        &self,
        message: &str,
        profile: &StudentProfile,
        strictness: Strictness,
    ) -> Result<FollowUpIntent, AdvisorError> {
        let prompt = prompts::classify_follow_up_prompt(message, profile, strictness);
        let answer = self.structured(labels::CLASSIFY_FOLLOW_UP, prompt, 150).await?;
        parse::parse_follow_up(&answer)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;

    /// Replies with a fixed answer and records every request.
    struct StubLlm {
        answer: String,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl StubLlm {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            Ok(CompletionResponse::text(self.answer.clone()))
        }
    }

    #[tokio::test]
    async fn structured_requests_are_labelled_and_deterministic() {
        let llm = StubLlm::new(r#"{"accepted": true, "reasons": ["fits"]}"#);
        let advisor = Advisor::new(llm.clone());
        let course = CourseRecord::new(
            "CS50",
            "Harvard",
            crate::workflow::model::CourseSource::WebSearch,
        );

        let verdict = advisor
            .judge_suitability(&course, &StudentProfile::default(), Strictness::Normal)
            .await
            .unwrap();
        assert!(verdict.accepted);
        assert_eq!(verdict.course_id, course.id);

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].label.as_deref(), Some(labels::JUDGE_SUITABILITY));
        assert_eq!(seen[0].temperature, Some(0.0));
    }

    #[tokio::test]
    async fn converse_sends_history_and_new_message() {
        let llm = StubLlm::new("What subjects do you enjoy?");
        let advisor = Advisor::new(llm.clone());
        let history = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("Hello! What grade are you in?"),
        ];

        let reply = advisor
            .converse(&history, "11th grade", &StudentProfile::default(), "ask about interests")
            .await
            .unwrap();
        assert_eq!(reply, "What subjects do you enjoy?");

        let seen = llm.seen.lock().unwrap();
        let msgs = &seen[0].messages;
        assert_eq!(msgs.len(), 4);
        assert!(msgs[0].content.contains("ask about interests"));
        assert_eq!(msgs[3], ChatMessage::user("11th grade"));
    }

    #[tokio::test]
    async fn blank_conversation_reply_is_malformed() {
        let advisor = Advisor::new(StubLlm::new("   "));
        let err = advisor
            .converse(&[], "hi", &StudentProfile::default(), "greet")
            .await
            .unwrap_err();
        assert!(matches!(err, AdvisorError::Malformed { .. }));
    }

    #[tokio::test]
    async fn strict_prompt_differs_from_normal() {
        let llm = StubLlm::new("{}");
        let advisor = Advisor::new(llm.clone());
        let profile = StudentProfile::default();
        advisor
            .extract_profile("hi", &profile, Strictness::Normal)
            .await
            .unwrap();
        advisor
            .extract_profile("hi", &profile, Strictness::Strict)
            .await
            .unwrap();
        let seen = llm.seen.lock().unwrap();
        assert_ne!(seen[0].messages[0].content, seen[1].messages[0].content);
    }
}
