//! System prompts for the advisor's language-model tasks.
//!
//! Every structured task has a normal and a strict variant. The strict one is
//! used after the model's first answer could not be parsed.

use super::Strictness;
use crate::search::SearchSnippet;
use crate::workflow::model::{CourseRecord, InsightSubject, StudentProfile};

const STRICT_SUFFIX: &str = "\n\nIMPORTANT: Your previous answer could not be parsed. \
Output a single JSON object and nothing else: no prose, no markdown, no code fences. \
Use exactly the keys listed above.";

fn finish(prompt: String, strictness: Strictness) -> String {
    match strictness {
        Strictness::Normal => prompt,
        Strictness::Strict => prompt + STRICT_SUFFIX,
    }
}

/// Persona for free-form conversation. `guidance` says what to aim for this turn.
pub fn converse_system_prompt(profile: &StudentProfile, guidance: &str) -> String {
    format!(
        "\
You are a friendly course advisor helping a student find courses and plan a career.
Keep replies short: 1-3 sentences. Ask at most one question at a time.
Acknowledge what the student just told you before asking anything new.

What you know about the student so far:
{profile}

For this reply: {guidance}",
        profile = profile.describe(),
    )
}

pub fn extract_profile_prompt(
    profile: &StudentProfile,
    message: &str,
    strictness: Strictness,
) -> String {
    finish(
        format!(
            "\
Extract student profile details from the message below.

Known profile:
{profile}

Message:
\"{message}\"

Return a JSON object with these keys (omit or use null for anything not stated):
- \"education_level\": string, e.g. \"11th grade\", \"undergraduate\"
- \"interests\": array of short subject names, e.g. [\"computer science\"]
- \"career_goals\": array of strings
- \"constraints\": array of strings (budget, schedule, location limits)
- \"preferred_mode\": \"online\", \"offline\" or \"hybrid\"
- \"availability\": string, e.g. \"weekends\", \"2 hours/day\"
- \"academic_background\": string

Only include what the message actually says. Do not guess.

Respond with ONLY valid JSON, no other text.",
            profile = profile.describe(),
        ),
        strictness,
    )
}

pub fn extract_course_prompt(snippet: &SearchSnippet, strictness: Strictness) -> String {
    finish(
        format!(
            "\
Decide whether this web search result describes a specific course, and if so extract it.

Title: {title}
URL: {url}
Content:
{content}

If it is NOT a specific course (a listicle, forum post, news article), return:
{{\"is_course\": false}}

Otherwise return a JSON object with:
- \"is_course\": true
- \"title\": course name
- \"provider\": institution or platform offering it
- \"description\": one or two sentences
- \"duration\": string or null
- \"prerequisites\": array of strings
- \"level\": suitable academic level, or null
- \"mode\": \"online\", \"offline\", \"hybrid\" or null
- \"cost\": string or null
- \"career_outcomes\": array of strings

Respond with ONLY valid JSON, no other text.",
            title = snippet.title,
            url = snippet.url,
            content = snippet.content,
        ),
        strictness,
    )
}

pub fn judge_suitability_prompt(
    course: &CourseRecord,
    profile: &StudentProfile,
    strictness: Strictness,
) -> String {
    finish(
        format!(
            "\
Judge whether this course suits this student.

Student:
{profile}

Course:
{course}

Consider academic level, prerequisites, stated interests, preferred mode,
availability and constraints. Reject courses that are clearly too advanced
or unrelated to the student's interests.

Return a JSON object:
{{\"accepted\": true or false, \"reasons\": [\"short reason\", ...]}}

Give 1-3 reasons, most important first.

Respond with ONLY valid JSON, no other text.",
            profile = profile.describe(),
            course = course.describe(),
        ),
        strictness,
    )
}

pub fn career_insight_prompt(
    subject: &InsightSubject,
    courses: &[CourseRecord],
    profile: &StudentProfile,
    strictness: Strictness,
) -> String {
    let focus = match subject {
        InsightSubject::Course { .. } => {
            let listed: Vec<String> = courses.iter().map(CourseRecord::describe).collect();
            format!("Completed course(s):\n{}", listed.join("\n\n"))
        }
        InsightSubject::SkillTrack { track_id } => format!(
            "No specific course was found. Give guidance for the skill track \
             '{track_id}' built from the student's interests."
        ),
    };

    finish(
        format!(
            "\
Give career guidance for a student.

Student:
{profile}

{focus}

Return a JSON object with:
- \"immediate_opportunities\": array of roles or internships open right after
- \"career_progression\": array of steps, earliest first
- \"recommended_skills\": array of skills the student should still build
- \"industry_trends\": array of short trend statements
- \"salary_info\": short string, or null

Respond with ONLY valid JSON, no other text.",
            profile = profile.describe(),
        ),
        strictness,
    )
}

pub fn classify_follow_up_prompt(
    message: &str,
    profile: &StudentProfile,
    strictness: Strictness,
) -> String {
    finish(
        format!(
            "\
The student already received course recommendations and career guidance.
Classify their new message.

Student:
{profile}

Message:
\"{message}\"

Return a JSON object:
- \"intent\": \"new_courses\" if they want different or additional course
  recommendations, otherwise \"conversation\"
- \"hint\": for new_courses, a short search phrase capturing what they want
  now (e.g. \"shorter online python courses\"); otherwise null

Respond with ONLY valid JSON, no other text.",
            profile = profile.describe(),
        ),
        strictness,
    )
}
