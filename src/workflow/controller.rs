//! The workflow controller.
//!
//! [`WorkflowController::advance`] runs the handler for the session's current
//! stage against a private copy of the session, looks up the firing edge in
//! the transition table and commits the copy only if every external call
//! succeeded. A failed call leaves the caller's session untouched.

use std::future::Future;
use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use super::model::{
    CareerInsight, CourseRecord, InsightSubject, StudentProfile, SuitabilityVerdict,
    skill_track_id,
};
use super::session::SessionState;
use super::stage::Stage;
use super::transitions::{Effect, StageReport, next_transition};
use crate::advisor::{Advisor, FollowUpIntent, Strictness, labels};
use crate::catalog::CourseIndex;
use crate::error::{AdvisorError, StageError};
use crate::llm::ChatMessage;
use crate::retry::RetryPolicy;
use crate::search::WebSearch;

/// Shown when an external service is still failing after the retry.
pub const TROUBLE_REPLY: &str =
    "I'm having trouble reaching one of my services right now. Please try again later.";

/// Shown when the student sends an empty message while we wait for input.
pub const EMPTY_MESSAGE_REPLY: &str =
    "I didn't catch anything there. Could you type your message again?";

const REPHRASE_REPLY: &str = "Sorry, I didn't quite follow that. Could you rephrase it? \
For example: \"I'm in 11th grade and interested in computer science.\"";

const CLOSING_REPLY: &str = "Feel free to ask me anything about these paths, \
or tell me if you'd like different courses.";

/// Tunables for the workflow.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Broadened discovery rounds allowed before giving up.
    pub max_broaden_attempts: u32,
    /// Results requested from the course index per query.
    pub top_k: usize,
    /// Accepted courses that get their own career insight.
    pub max_career_courses: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_broaden_attempts: 3,
            top_k: 5,
            max_career_courses: 3,
        }
    }
}

/// Result of one [`WorkflowController::advance`] call.
#[derive(Debug, Clone)]
pub struct Turn {
    pub session: SessionState,
    pub reply: String,
    pub stage: Stage,
    /// Recoverable conditions met during the turn.
    pub errors: Vec<StageError>,
}

impl Turn {
    /// True when an external failure stopped the turn.
    pub fn failed(&self) -> bool {
        self.errors.iter().any(StageError::preserves_session)
    }
}

/// Result of [`WorkflowController::respond`]: one student message and every
/// automated stage that ran after it.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub session: SessionState,
    pub replies: Vec<String>,
    pub stage: Stage,
    pub errors: Vec<StageError>,
}

/// An external call that still failed after its retry.
#[derive(Debug)]
struct ServiceFailure {
    service: &'static str,
    reason: String,
}

impl ServiceFailure {
    fn new(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            service,
            reason: err.to_string(),
        }
    }
}

/// A structured model answer after the strict retry.
enum Answer<T> {
    Parsed(T),
    /// Both attempts were unparseable; the caller applies its default.
    Unusable(&'static str),
}

struct StageOutcome {
    report: StageReport,
    replies: Vec<String>,
    notes: Vec<StageError>,
}

impl StageOutcome {
    fn new(report: StageReport) -> Self {
        Self {
            report,
            replies: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn reply(mut self, text: impl Into<String>) -> Self {
        self.replies.push(text.into());
        self
    }
}

/// Drives sessions through the advising workflow.
pub struct WorkflowController {
    advisor: Advisor,
    index: Arc<dyn CourseIndex>,
    search: Arc<dyn WebSearch>,
    retry: RetryPolicy,
    config: ControllerConfig,
}

impl WorkflowController {
    pub fn new(
        advisor: Advisor,
        index: Arc<dyn CourseIndex>,
        search: Arc<dyn WebSearch>,
        retry: RetryPolicy,
        config: ControllerConfig,
    ) -> Self {
        Self {
            advisor,
            index,
            search,
            retry,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Opening line for a fresh session.
    pub fn greeting(&self) -> &'static str {
        "Hi! I'm your course advisor. Tell me a bit about yourself: \
         what grade or level are you at, and what subjects interest you?"
    }

    /// Run the current stage once.
    ///
    /// `message` may be empty only when the current stage does not wait for
    /// the student; otherwise the session is returned unchanged with
    /// [`StageError::EmptyMessage`].
    pub async fn advance(&self, session: SessionState, message: &str) -> Turn {
        let message = message.trim();
        let from = session.stage;

        if from.awaits_user() && message.is_empty() {
            return Turn {
                session,
                reply: EMPTY_MESSAGE_REPLY.to_string(),
                stage: from,
                errors: vec![StageError::EmptyMessage],
            };
        }

        let span = info_span!("advance", session = %session.id, stage = %from);
        self.advance_inner(session, message).instrument(span).await
    }

    async fn advance_inner(&self, session: SessionState, message: &str) -> Turn {
        let from = session.stage;
        let mut draft = session.clone();

        let result = match from {
            Stage::CollectingProfile => self.collect_profile(&mut draft, message).await,
            Stage::DiscoveringCourses => self.discover(&mut draft).await,
            Stage::ValidatingSuitability => self.validate(&mut draft).await,
            Stage::GuidingCareer => self.guide_career(&mut draft).await,
            Stage::Done => self.follow_up(&mut draft, message).await,
        };

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(
                    service = failure.service,
                    reason = %failure.reason,
                    "External call failed after retry, session left unchanged"
                );
                return Turn {
                    session,
                    reply: TROUBLE_REPLY.to_string(),
                    stage: from,
                    errors: vec![StageError::ExternalService {
                        service: failure.service,
                        reason: failure.reason,
                    }],
                };
            }
        };

        let bound = self.config.max_broaden_attempts;
        let (to, effect) = match next_transition(from, &outcome.report, bound) {
            Some(t) => {
                debug!(guard = ?t.guard, "Guard fired");
                (t.to, t.effect)
            }
            None => {
                error!(report = ?outcome.report, "No transition matches stage report");
                (from, Effect::None)
            }
        };

        match effect {
            Effect::None => {}
            Effect::Broaden => {
                draft.broaden_attempts += 1;
                outcome.notes.push(StageError::DiscoveryEmpty {
                    attempts: draft.broaden_attempts,
                    bound,
                });
            }
            Effect::FlagNoResults => draft.no_results = true,
            Effect::ResetAttempts => draft.broaden_attempts = 0,
        }

        if !message.is_empty() {
            draft.history.push(ChatMessage::user(message));
        }
        for reply in &outcome.replies {
            draft.history.push(ChatMessage::assistant(reply.clone()));
        }
        draft.stage = to;

        if from != to {
            info!(%from, %to, "Stage transition");
            if to.is_terminal() {
                info!(insights = draft.insights.len(), "Guidance delivered");
            }
        }

        Turn {
            session: draft,
            reply: outcome.replies.join("\n\n"),
            stage: to,
            errors: outcome.notes,
        }
    }

    /// Handle one student message, then keep advancing through automated
    /// stages until the workflow needs the student again or a service fails.
    pub async fn respond(&self, session: SessionState, message: &str) -> Exchange {
        let cap = self.max_automated_steps();
        let mut turn = self.advance(session, message).await;
        let mut replies = Vec::new();
        let mut errors = Vec::new();
        let mut steps = 0;

        loop {
            if !turn.reply.is_empty() {
                replies.push(std::mem::take(&mut turn.reply));
            }
            let halted = turn.failed();
            errors.append(&mut turn.errors);
            if halted || turn.stage.awaits_user() {
                break;
            }
            if steps >= cap {
                warn!(steps, stage = %turn.stage, "Automated step limit reached");
                break;
            }
            steps += 1;
            turn = self.advance(turn.session, "").await;
        }

        Exchange {
            stage: turn.stage,
            session: turn.session,
            replies,
            errors,
        }
    }

    /// Upper bound on automated stages per exchange: every broaden loop costs
    /// a discovery and a validation step, plus the final pass to `Done`.
    fn max_automated_steps(&self) -> usize {
        2 * (self.config.max_broaden_attempts as usize + 2) + 2
    }

    // ── Model calls ─────────────────────────────────────────────────

    /// Ask the model, retrying transport failures per the retry policy and
    /// unparseable answers once with a stricter prompt.
    async fn ask<T, F, Fut>(&self, label: &'static str, call: F) -> Result<Answer<T>, ServiceFailure>
    where
        F: Fn(Strictness) -> Fut,
        Fut: Future<Output = Result<T, AdvisorError>>,
    {
        let mut last_task = label;
        for strictness in [Strictness::Normal, Strictness::Strict] {
            match self.retry.run(label, || call(strictness)).await {
                Ok(value) => return Ok(Answer::Parsed(value)),
                Err(AdvisorError::Malformed { task, reason }) => {
                    warn!(label, ?strictness, %reason, "Unusable model output");
                    last_task = task;
                }
                Err(AdvisorError::Llm(e)) => return Err(ServiceFailure::new("language model", e)),
            }
        }
        Ok(Answer::Unusable(last_task))
    }

    async fn converse(
        &self,
        history: &[ChatMessage],
        message: &str,
        profile: &StudentProfile,
        guidance: &str,
        fallback: &str,
    ) -> Result<String, ServiceFailure> {
        let result = self
            .retry
            .run(labels::CONVERSE, || {
                self.advisor.converse(history, message, profile, guidance)
            })
            .await;
        match result {
            Ok(reply) => Ok(reply),
            Err(AdvisorError::Malformed { .. }) => Ok(fallback.to_string()),
            Err(AdvisorError::Llm(e)) => Err(ServiceFailure::new("language model", e)),
        }
    }

    // ── Stage handlers ──────────────────────────────────────────────

    async fn collect_profile(
        &self,
        draft: &mut SessionState,
        message: &str,
    ) -> Result<StageOutcome, ServiceFailure> {
        let known = draft.profile.clone();
        let known = &known;
        let update = match self
            .ask(labels::EXTRACT_PROFILE, move |s| {
                self.advisor.extract_profile(message, known, s)
            })
            .await?
        {
            Answer::Parsed(update) => update,
            Answer::Unusable(task) => {
                let mut outcome = StageOutcome::new(StageReport::Profile { complete: false })
                    .reply(REPHRASE_REPLY);
                outcome.notes.push(StageError::MalformedModelOutput { task });
                return Ok(outcome);
            }
        };

        draft.profile.merge(&update);

        if draft.profile.is_complete() {
            return Ok(
                StageOutcome::new(StageReport::Profile { complete: true })
                    .reply(profile_summary(&draft.profile)),
            );
        }

        let missing = draft.profile.missing_fields();
        let guidance = format!(
            "Ask the student, in one friendly question, about their {}.",
            missing.join(" and ")
        );
        let fallback = format!("Could you tell me about your {}?", missing.join(" and "));
        let reply = self
            .converse(&draft.history, message, &draft.profile, &guidance, &fallback)
            .await?;

        let mut outcome = StageOutcome::new(StageReport::Profile { complete: false }).reply(reply);
        outcome.notes.push(StageError::ProfileIncomplete { missing });
        Ok(outcome)
    }

    async fn discover(&self, draft: &mut SessionState) -> Result<StageOutcome, ServiceFailure> {
        let attempts = draft.broaden_attempts;
        let bound = self.config.max_broaden_attempts;
        let top_k = self.config.top_k;
        let query = discovery_query(&draft.profile, attempts, draft.discovery_hint.as_deref());
        let query = query.as_str();
        let excluded = draft.excluded_course_ids();
        debug!(attempts, query, "Discovering courses");

        // Over-fetch so excluded courses do not crowd out fresh ones.
        let fetch = top_k + excluded.len();
        let indexed = self
            .retry
            .run("index.query", || self.index.query_similar(query, fetch))
            .await
            .map_err(|e| ServiceFailure::new("course index", e))?;
        let mut found = fresh_courses(indexed, &excluded);
        found.truncate(top_k);
        let mut notes = Vec::new();

        if found.is_empty() {
            let snippets = self
                .retry
                .run("web.search", || self.search.search(query))
                .await
                .map_err(|e| ServiceFailure::new("web search", e))?;

            let mut extracted = Vec::new();
            for snippet in &snippets {
                match self
                    .ask(labels::EXTRACT_COURSE, move |s| {
                        self.advisor.extract_course(snippet, s)
                    })
                    .await?
                {
                    Answer::Parsed(Some(record)) => extracted.push(record),
                    Answer::Parsed(None) => {}
                    Answer::Unusable(task) => {
                        debug!(url = %snippet.url, "Skipping snippet with unusable extraction");
                        notes.push(StageError::MalformedModelOutput { task });
                    }
                }
            }

            found = fresh_courses(extracted, &excluded);
            // One batch: a failed write leaves the index as the next round
            // found it, so that round searches the web again.
            if !found.is_empty() {
                self.retry
                    .run("index.upsert", || self.index.upsert_batch(&found))
                    .await
                    .map_err(|e| ServiceFailure::new("course index", e))?;
            }
            info!(snippets = snippets.len(), indexed = found.len(), "Web search fallback complete");
        }

        let reply = if !found.is_empty() {
            let lines: Vec<String> = found.iter().map(course_line).collect();
            format!(
                "I found {} course{} that might fit:\n{}",
                found.len(),
                if found.len() == 1 { "" } else { "s" },
                lines.join("\n")
            )
        } else if attempts < bound {
            "I couldn't find matching courses yet, so I'm broadening the search.".to_string()
        } else {
            "I couldn't find any courses matching your profile, even after broadening the search."
                .to_string()
        };

        let report = StageReport::Discovery {
            candidates: found.len(),
            attempts,
        };
        draft.candidates = found;

        let mut outcome = StageOutcome::new(report).reply(reply);
        outcome.notes.extend(notes);
        Ok(outcome)
    }

    async fn validate(&self, draft: &mut SessionState) -> Result<StageOutcome, ServiceFailure> {
        let attempts = draft.broaden_attempts;
        let bound = self.config.max_broaden_attempts;

        if draft.no_results {
            return Ok(StageOutcome::new(StageReport::Suitability {
                accepted: 0,
                no_results: true,
                attempts,
            })
            .reply(
                "Since I couldn't find specific courses, let's look at career paths \
                 for your interests instead.",
            ));
        }

        let profile = draft.profile.clone();
        let profile = &profile;
        let candidates = draft.candidates.clone();
        let mut notes = Vec::new();
        let mut lines = Vec::new();
        let mut accepted = 0;

        for course in &candidates {
            let verdict = match self
                .ask(labels::JUDGE_SUITABILITY, move |s| {
                    self.advisor.judge_suitability(course, profile, s)
                })
                .await?
            {
                Answer::Parsed(verdict) => verdict,
                Answer::Unusable(task) => {
                    notes.push(StageError::MalformedModelOutput { task });
                    SuitabilityVerdict::could_not_assess(&course.id)
                }
            };
            if verdict.accepted {
                accepted += 1;
            }
            lines.push(verdict_line(course, &verdict));
            draft.record_verdict(verdict);
        }

        let mut summary = lines.join("\n");
        if accepted == 0 {
            summary.push_str("\n\n");
            summary.push_str(if attempts < bound {
                "None of these are a good fit, so I'll look for alternatives."
            } else {
                "None of the courses I found are a good fit. \
                 I'll share general career guidance for your interests instead."
            });
        }

        let mut outcome = StageOutcome::new(StageReport::Suitability {
            accepted,
            no_results: false,
            attempts,
        })
        .reply(summary);
        outcome.notes.extend(notes);
        Ok(outcome)
    }

    async fn guide_career(&self, draft: &mut SessionState) -> Result<StageOutcome, ServiceFailure> {
        let profile = draft.profile.clone();
        let mut notes = Vec::new();
        let mut insights = Vec::new();
        let mut sections = Vec::new();

        if draft.no_results {
            let subject = InsightSubject::SkillTrack {
                track_id: skill_track_id(&profile.interests),
            };
            let insight = self.insight_for(&subject, &[], &profile, &mut notes).await?;
            let heading = format!(
                "your interests ({})",
                profile.interests.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            sections.push(format_insight(&insight, &heading));
            insights.push(insight);
        } else {
            let accepted: Vec<CourseRecord> = draft
                .accepted_courses()
                .into_iter()
                .take(self.config.max_career_courses)
                .cloned()
                .collect();
            for course in &accepted {
                let subject = InsightSubject::Course {
                    course_id: course.id.clone(),
                };
                let insight = self
                    .insight_for(&subject, std::slice::from_ref(course), &profile, &mut notes)
                    .await?;
                sections.push(format_insight(&insight, &course.title));
                insights.push(insight);
            }
        }

        draft.insights = insights;

        let mut outcome = StageOutcome::new(StageReport::Career);
        outcome.replies.extend(sections);
        outcome.replies.push(CLOSING_REPLY.to_string());
        outcome.notes = notes;
        Ok(outcome)
    }

    async fn insight_for(
        &self,
        subject: &InsightSubject,
        courses: &[CourseRecord],
        profile: &StudentProfile,
        notes: &mut Vec<StageError>,
    ) -> Result<CareerInsight, ServiceFailure> {
        match self
            .ask(labels::CAREER_INSIGHT, move |s| {
                self.advisor
                    .generate_career_insight(subject, courses, profile, s)
            })
            .await?
        {
            Answer::Parsed(insight) => Ok(insight),
            Answer::Unusable(task) => {
                notes.push(StageError::MalformedModelOutput { task });
                Ok(CareerInsight::empty(
                    subject.clone(),
                    "Detailed career information isn't available for this one right now.",
                ))
            }
        }
    }

    async fn follow_up(
        &self,
        draft: &mut SessionState,
        message: &str,
    ) -> Result<StageOutcome, ServiceFailure> {
        let profile = draft.profile.clone();
        let profile = &profile;
        let mut notes = Vec::new();

        let intent = match self
            .ask(labels::CLASSIFY_FOLLOW_UP, move |s| {
                self.advisor.classify_follow_up(message, profile, s)
            })
            .await?
        {
            Answer::Parsed(intent) => intent,
            Answer::Unusable(task) => {
                notes.push(StageError::MalformedModelOutput { task });
                FollowUpIntent::Conversational
            }
        };

        let mut outcome = match intent {
            FollowUpIntent::RequestCourses { hint } => {
                draft.discovery_hint = Some(hint.unwrap_or_else(|| message.to_string()));
                draft.candidates.clear();
                draft.insights.clear();
                draft.no_results = false;
                StageOutcome::new(StageReport::FollowUp {
                    wants_courses: true,
                })
                .reply("Sure, let me look for some different courses.")
            }
            FollowUpIntent::Conversational => {
                let recommended: Vec<String> =
                    draft.accepted_courses().iter().map(|c| course_line(c)).collect();
                let guidance = if recommended.is_empty() {
                    "Answer the student's question. No specific course was recommended; \
                     career guidance was given for their interests."
                        .to_string()
                } else {
                    format!(
                        "Answer the student's question. Courses already recommended:\n{}",
                        recommended.join("\n")
                    )
                };
                let reply = self
                    .converse(
                        &draft.history,
                        message,
                        profile,
                        &guidance,
                        "Could you tell me a bit more about what you'd like to know?",
                    )
                    .await?;
                StageOutcome::new(StageReport::FollowUp {
                    wants_courses: false,
                })
                .reply(reply)
            }
        };
        outcome.notes.extend(notes);
        Ok(outcome)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Discovery query for a given broaden attempt.
///
/// 0: full profile plus any follow-up hint. 1: drops preferences and
/// constraints. 2: interests only. 3 and up: introductory courses related to
/// the interests and career goals.
pub fn discovery_query(profile: &StudentProfile, attempt: u32, hint: Option<&str>) -> String {
    let interests = profile.interests.iter().cloned().collect::<Vec<_>>().join(", ");
    let level = profile.education_level.as_deref().unwrap_or("").trim();
    let hint = hint.map(str::trim).filter(|h| !h.is_empty());

    let mut parts: Vec<String> = Vec::new();
    match attempt {
        0 | 1 => {
            if let Some(hint) = hint {
                parts.push(hint.to_string());
            }
            parts.push(format!("{interests} courses"));
            if !level.is_empty() {
                parts.push(format!("for {level} students"));
            }
            if attempt == 0 {
                for (k, v) in &profile.preferences {
                    parts.push(format!("{k}: {v}"));
                }
                if !profile.constraints.is_empty() {
                    let constraints: Vec<&str> =
                        profile.constraints.iter().map(String::as_str).collect();
                    parts.push(format!("constraints: {}", constraints.join(", ")));
                }
            }
        }
        2 => parts.push(interests),
        _ => {
            let mut topics: Vec<String> = profile.interests.iter().cloned().collect();
            topics.extend(profile.career_goals.iter().cloned());
            parts.push(format!("introductory courses related to {}", topics.join(", ")));
        }
    }
    parts.join("; ")
}

/// Dedupe by id and drop excluded courses, keeping first-seen order.
fn fresh_courses(
    records: Vec<CourseRecord>,
    excluded: &std::collections::BTreeSet<String>,
) -> Vec<CourseRecord> {
    let mut seen = std::collections::HashSet::new();
    records
        .into_iter()
        .filter(|r| !excluded.contains(&r.id) && seen.insert(r.id.clone()))
        .collect()
}

fn profile_summary(profile: &StudentProfile) -> String {
    let interests: Vec<&str> = profile.interests.iter().map(String::as_str).collect();
    format!(
        "Thanks! So you're at the {} level and interested in {}. Let me find some courses for you.",
        profile.education_level.as_deref().unwrap_or("unknown"),
        interests.join(", ")
    )
}

fn course_line(course: &CourseRecord) -> String {
    let mut line = format!("- {} ({})", course.title, course.provider);
    if let Some(duration) = &course.duration {
        line.push_str(&format!(", {duration}"));
    }
    line
}

fn verdict_line(course: &CourseRecord, verdict: &SuitabilityVerdict) -> String {
    let mark = if verdict.accepted { "✅" } else { "❌" };
    let reason = verdict.reasons.first().map(String::as_str).unwrap_or("");
    format!("{mark} {}: {reason}", course.title)
}

fn format_insight(insight: &CareerInsight, heading: &str) -> String {
    let mut out = format!("🎯 Career paths after {heading}");
    if let Some(note) = &insight.note
        && insight.is_empty()
    {
        out.push_str(&format!("\n{note}"));
        return out;
    }
    for opportunity in &insight.opportunities {
        out.push_str(&format!("\n- {opportunity}"));
    }
    if !insight.progression.is_empty() {
        out.push_str(&format!("\n📈 Progression: {}", insight.progression.join(" → ")));
    }
    if !insight.skill_gaps.is_empty() {
        let skills: Vec<&str> = insight.skill_gaps.iter().map(String::as_str).collect();
        out.push_str(&format!("\n🔧 Skills to build: {}", skills.join(", ")));
    }
    if !insight.industry_trends.is_empty() {
        out.push_str(&format!("\n📊 Trends: {}", insight.industry_trends.join("; ")));
    }
    if let Some(salary) = &insight.salary_info {
        out.push_str(&format!("\n💰 Salary: {salary}"));
    }
    out
}
