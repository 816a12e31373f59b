//! Parsing the model's JSON answers into domain types.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::FollowUpIntent;
use crate::error::AdvisorError;
use crate::search::SearchSnippet;
use crate::workflow::model::{
    CareerInsight, CourseRecord, CourseSource, InsightSubject, ProfileUpdate,
    SuitabilityVerdict, one_or_many,
};

/// Pull the JSON object (or bare `null`) out of a model answer that may be
/// wrapped in prose or a markdown code block.
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') || trimmed == "null" {
        return trimmed.to_string();
    }

    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                let inner = after[..end].trim();
                if inner.starts_with('{') || inner == "null" {
                    return inner.to_string();
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

fn parse_json<T: DeserializeOwned>(task: &'static str, text: &str) -> Result<T, AdvisorError> {
    serde_json::from_str(&extract_json_object(text)).map_err(|e| AdvisorError::Malformed {
        task,
        reason: e.to_string(),
    })
}

fn clean(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

// ── Profile ─────────────────────────────────────────────────────────

pub fn parse_profile_update(text: &str) -> Result<ProfileUpdate, AdvisorError> {
    parse_json("profile extraction", text)
}

// ── Course extraction ───────────────────────────────────────────────

#[derive(Deserialize)]
struct CourseAnswer {
    #[serde(default)]
    is_course: Option<bool>,
    #[serde(default)]
    title: String,
    #[serde(default, alias = "provider_of_course")]
    provider: String,
    #[serde(default)]
    description: String,
    duration: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    prerequisites: Vec<String>,
    #[serde(alias = "suitable_academic_level_required")]
    level: Option<String>,
    mode: Option<String>,
    cost: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    career_outcomes: Vec<String>,
}

/// `Ok(None)` when the snippet is not a course.
pub fn parse_course(text: &str, snippet: &SearchSnippet) -> Result<Option<CourseRecord>, AdvisorError> {
    let Some(answer) = parse_json::<Option<CourseAnswer>>("course extraction", text)? else {
        return Ok(None);
    };
    if answer.is_course == Some(false) || answer.title.trim().is_empty() {
        return Ok(None);
    }

    let provider = if answer.provider.trim().is_empty() {
        snippet.domain().unwrap_or_else(|| "Unknown provider".to_string())
    } else {
        answer.provider
    };

    let mut record = CourseRecord::new(&answer.title, &provider, CourseSource::WebSearch)
        .with_description(answer.description.trim())
        .with_url(snippet.url.clone());
    record.duration = answer.duration;
    record.prerequisites = clean(answer.prerequisites).into_iter().collect();
    record.level = answer.level;
    record.mode = answer.mode;
    record.cost = answer.cost;
    record.career_outcomes = clean(answer.career_outcomes);
    Ok(Some(record))
}

// ── Suitability ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct VerdictAnswer {
    #[serde(alias = "suitable", alias = "is_suitable")]
    accepted: bool,
    #[serde(default, alias = "reason", deserialize_with = "one_or_many")]
    reasons: Vec<String>,
}

pub fn parse_verdict(text: &str, course_id: &str) -> Result<SuitabilityVerdict, AdvisorError> {
    let answer: VerdictAnswer = parse_json("suitability judgment", text)?;
    let mut reasons = clean(answer.reasons);
    if reasons.is_empty() {
        reasons.push(if answer.accepted {
            "matches the student's profile".to_string()
        } else {
            "does not match the student's profile".to_string()
        });
    }
    Ok(SuitabilityVerdict {
        course_id: course_id.to_string(),
        accepted: answer.accepted,
        reasons,
    })
}

// ── Career insight ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct InsightAnswer {
    #[serde(default, alias = "opportunities", deserialize_with = "one_or_many")]
    immediate_opportunities: Vec<String>,
    #[serde(default, alias = "progression", deserialize_with = "one_or_many")]
    career_progression: Vec<String>,
    #[serde(default, alias = "skill_gaps", deserialize_with = "one_or_many")]
    recommended_skills: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    industry_trends: Vec<String>,
    #[serde(default)]
    salary_info: Option<serde_json::Value>,
}

pub fn parse_insight(text: &str, subject: InsightSubject) -> Result<CareerInsight, AdvisorError> {
    let answer: InsightAnswer = parse_json("career insight", text)?;
    let salary_info = match answer.salary_info {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => Some(other.to_string()),
    };
    Ok(CareerInsight {
        subject,
        opportunities: clean(answer.immediate_opportunities),
        progression: clean(answer.career_progression),
        skill_gaps: clean(answer.recommended_skills)
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect::<BTreeSet<_>>(),
        industry_trends: clean(answer.industry_trends),
        salary_info,
        note: None,
    })
}

// ── Follow-up ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct FollowUpAnswer {
    intent: String,
    #[serde(default)]
    hint: Option<String>,
}

pub fn parse_follow_up(text: &str) -> Result<FollowUpIntent, AdvisorError> {
    let answer: FollowUpAnswer = parse_json("follow-up classification", text)?;
    match answer.intent.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
        "new_courses" | "courses" | "request_courses" => Ok(FollowUpIntent::RequestCourses {
            hint: answer
                .hint
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
        }),
        "conversation" | "conversational" | "chat" => Ok(FollowUpIntent::Conversational),
        other => Err(AdvisorError::Malformed {
            task: "follow-up classification",
            reason: format!("unknown intent '{other}'"),
        }),
    }
}
