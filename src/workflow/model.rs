//! Domain records carried through an advising session.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ── Student profile ─────────────────────────────────────────────────

/// What the student has told us about themselves.
///
/// Built up turn by turn during profile collection. Set-valued fields hold
/// trimmed lowercase entries so repeated mentions collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub education_level: Option<String>,
    pub interests: BTreeSet<String>,
    pub preferences: BTreeMap<String, String>,
    pub constraints: BTreeSet<String>,
    pub career_goals: BTreeSet<String>,
}

impl StudentProfile {
    /// Education level set and at least one interest.
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Human-readable names of the required fields still unset.
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self
            .education_level
            .as_deref()
            .is_none_or(|l| l.trim().is_empty())
        {
            missing.push("education level".to_string());
        }
        if self.interests.is_empty() {
            missing.push("interests".to_string());
        }
        missing
    }

    /// Fold an extracted update into the profile. Returns true if anything changed.
    pub fn merge(&mut self, update: &ProfileUpdate) -> bool {
        let before = self.clone();

        if let Some(level) = update.education_level.as_deref().map(str::trim)
            && !level.is_empty()
        {
            self.education_level = Some(level.to_string());
        }
        self.interests.extend(normalize_all(&update.interests));
        self.constraints.extend(normalize_all(&update.constraints));
        self.career_goals.extend(normalize_all(&update.career_goals));

        for (key, value) in update.preference_pairs() {
            self.preferences.insert(key, value);
        }

        *self != before
    }

    /// One-paragraph description used in prompts.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(level) = &self.education_level {
            parts.push(format!("Education level: {level}"));
        }
        if !self.interests.is_empty() {
            parts.push(format!("Interests: {}", join(&self.interests)));
        }
        if !self.career_goals.is_empty() {
            parts.push(format!("Career goals: {}", join(&self.career_goals)));
        }
        if !self.preferences.is_empty() {
            let prefs: Vec<String> = self
                .preferences
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            parts.push(format!("Preferences: {}", prefs.join(", ")));
        }
        if !self.constraints.is_empty() {
            parts.push(format!("Constraints: {}", join(&self.constraints)));
        }
        if parts.is_empty() {
            "Nothing known yet.".to_string()
        } else {
            parts.join("\n")
        }
    }
}

fn normalize_all(values: &[String]) -> impl Iterator<Item = String> + '_ {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Profile fields extracted from one student message.
///
/// Every field is optional; the model fills in only what the message states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub education_level: Option<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub interests: Vec<String>,
    pub preferences: BTreeMap<String, String>,
    #[serde(deserialize_with = "one_or_many")]
    pub constraints: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub career_goals: Vec<String>,
    pub academic_background: Option<String>,
    pub preferred_mode: Option<String>,
    pub availability: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Explicit preferences plus the dedicated preference fields, normalized.
    fn preference_pairs(&self) -> Vec<(String, String)> {
        let named = [
            ("academic_background", &self.academic_background),
            ("mode", &self.preferred_mode),
            ("availability", &self.availability),
        ];
        self.preferences
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain(
                named
                    .into_iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone()))),
            )
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect()
    }
}

/// Accept `null`, a single string, or a list of strings.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Some(OneOrMany::Many(v)) => v,
    })
}

// ── Courses ─────────────────────────────────────────────────────────

/// Where a candidate course was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseSource {
    VectorStore,
    WebSearch,
}

/// Canonical `title|provider` key used to deduplicate courses.
///
/// Lowercased, with every run of non-alphanumeric characters collapsed to a
/// single space and the ends trimmed.
pub fn normalized_key(title: &str, provider: &str) -> String {
    format!("{}|{}", canonical(title), canonical(provider))
}

fn canonical(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Stable course id: UUIDv5 of the normalized key.
pub fn course_id(title: &str, provider: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, normalized_key(title, provider).as_bytes()).to_string()
}

/// A course candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: String,
    pub title: String,
    pub provider: String,
    pub duration: Option<String>,
    pub prerequisites: BTreeSet<String>,
    pub description: String,
    pub source: CourseSource,
    pub mode: Option<String>,
    pub level: Option<String>,
    pub cost: Option<String>,
    pub url: Option<String>,
    pub career_outcomes: Vec<String>,
}

impl CourseRecord {
    pub fn new(title: &str, provider: &str, source: CourseSource) -> Self {
        let title = title.trim().to_string();
        let provider = provider.trim().to_string();
        Self {
            id: course_id(&title, &provider),
            title,
            provider,
            duration: None,
            prerequisites: BTreeSet::new(),
            description: String::new(),
            source,
            mode: None,
            level: None,
            cost: None,
            url: None,
            career_outcomes: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn normalized_key(&self) -> String {
        normalized_key(&self.title, &self.provider)
    }

    /// Recompute `id` from title and provider. Records from outside the
    /// crate go through this before they are indexed.
    pub fn with_canonical_id(mut self) -> Self {
        self.id = course_id(&self.title, &self.provider);
        self
    }

    /// Text embedded and matched against discovery queries.
    pub fn index_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.description)
    }

    /// Multi-line summary used in prompts.
    pub fn describe(&self) -> String {
        let mut lines = vec![
            format!("Title: {}", self.title),
            format!("Provider: {}", self.provider),
        ];
        let optional = [
            ("Duration", &self.duration),
            ("Level", &self.level),
            ("Mode", &self.mode),
            ("Cost", &self.cost),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                lines.push(format!("{name}: {v}"));
            }
        }
        if !self.prerequisites.is_empty() {
            lines.push(format!("Prerequisites: {}", join(&self.prerequisites)));
        }
        if !self.description.is_empty() {
            lines.push(format!("Description: {}", self.description));
        }
        if !self.career_outcomes.is_empty() {
            lines.push(format!("Career outcomes: {}", self.career_outcomes.join(", ")));
        }
        lines.join("\n")
    }
}

// ── Verdicts and insights ───────────────────────────────────────────

/// Accept/reject judgment for one course against the current profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuitabilityVerdict {
    pub course_id: String,
    pub accepted: bool,
    pub reasons: Vec<String>,
}

impl SuitabilityVerdict {
    /// Reject used when the model's judgment could not be read.
    pub fn could_not_assess(course_id: &str) -> Self {
        Self {
            course_id: course_id.to_string(),
            accepted: false,
            reasons: vec!["could not assess suitability".to_string()],
        }
    }
}

/// What a career insight is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightSubject {
    Course { course_id: String },
    SkillTrack { track_id: String },
}

/// Skill-track id derived from the student's interests, e.g.
/// `track-computer-science`.
pub fn skill_track_id(interests: &BTreeSet<String>) -> String {
    let joined = interests.iter().cloned().collect::<Vec<_>>().join(" ");
    let slug = canonical(&joined).replace(' ', "-");
    if slug.is_empty() {
        "track-general".to_string()
    } else {
        format!("track-{slug}")
    }
}

/// Career guidance tied to an accepted course or to a skill track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareerInsight {
    pub subject: InsightSubject,
    pub opportunities: Vec<String>,
    pub progression: Vec<String>,
    pub skill_gaps: BTreeSet<String>,
    pub industry_trends: Vec<String>,
    pub salary_info: Option<String>,
    /// Set when the insight is a placeholder rather than model output.
    pub note: Option<String>,
}

impl CareerInsight {
    pub fn empty(subject: InsightSubject, note: impl Into<String>) -> Self {
        Self {
            subject,
            opportunities: Vec::new(),
            progression: Vec::new(),
            skill_gaps: BTreeSet::new(),
            industry_trends: Vec::new(),
            salary_info: None,
            note: Some(note.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.opportunities.is_empty()
            && self.progression.is_empty()
            && self.skill_gaps.is_empty()
            && self.industry_trends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_gate_needs_level_and_interest() {
        let mut profile = StudentProfile::default();
        assert_eq!(profile.missing_fields(), vec!["education level", "interests"]);

        profile.merge(&ProfileUpdate {
            interests: vec!["Computer Science".into()],
            ..Default::default()
        });
        assert!(!profile.is_complete());
        assert_eq!(profile.missing_fields(), vec!["education level"]);

        profile.merge(&ProfileUpdate {
            education_level: Some("  11th grade ".into()),
            ..Default::default()
        });
        assert!(profile.is_complete());
        assert_eq!(profile.education_level.as_deref(), Some("11th grade"));
        assert!(profile.interests.contains("computer science"));
    }

    #[test]
    fn blank_level_does_not_count() {
        let mut profile = StudentProfile::default();
        profile.merge(&ProfileUpdate {
            education_level: Some("   ".into()),
            interests: vec!["art".into()],
            ..Default::default()
        });
        assert!(!profile.is_complete());
    }

    #[test]
    fn merge_reports_changes_and_collapses_duplicates() {
        let mut profile = StudentProfile::default();
        let update = ProfileUpdate {
            interests: vec!["Robotics".into(), " robotics ".into()],
            preferred_mode: Some("online".into()),
            ..Default::default()
        };
        assert!(profile.merge(&update));
        assert_eq!(profile.interests.len(), 1);
        assert_eq!(profile.preferences.get("mode").map(String::as_str), Some("online"));
        assert!(!profile.merge(&update));
    }

    #[test]
    fn profile_update_accepts_strings_or_lists() {
        let update: ProfileUpdate = serde_json::from_str(
            r#"{"education_level":"college","interests":"math, physics","career_goals":null}"#,
        )
        .unwrap();
        assert_eq!(update.interests, vec!["math", "physics"]);
        assert!(update.career_goals.is_empty());

        let empty: ProfileUpdate = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn normalized_key_collapses_punctuation_and_case() {
        assert_eq!(
            normalized_key("  Intro to  C.S. ", "Coursera, Inc."),
            "intro to c s|coursera inc"
        );
        assert_eq!(
            normalized_key("Intro to C S", "coursera inc"),
            normalized_key("INTRO---TO c.s.", "Coursera Inc")
        );
    }

    #[test]
    fn equal_keys_give_equal_ids() {
        let a = CourseRecord::new("Python for Everybody", "Coursera", CourseSource::WebSearch);
        let b = CourseRecord::new("python for everybody!", "COURSERA", CourseSource::VectorStore);
        let c = CourseRecord::new("Python for Everybody", "edX", CourseSource::WebSearch);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn canonical_id_overrides_foreign_id() {
        let mut record = CourseRecord::new("Data 101", "MIT", CourseSource::VectorStore);
        record.id = "custom".into();
        let record = record.with_canonical_id();
        assert_eq!(record.id, course_id("Data 101", "MIT"));
    }

    #[test]
    fn skill_track_slug() {
        let interests: BTreeSet<String> =
            ["computer science".to_string(), "robotics".to_string()].into();
        assert_eq!(skill_track_id(&interests), "track-computer-science-robotics");
        assert_eq!(skill_track_id(&BTreeSet::new()), "track-general");
    }

    #[test]
    fn insight_subject_serializes_tagged() {
        let subject = InsightSubject::SkillTrack {
            track_id: "track-art".into(),
        };
        let json = serde_json::to_value(&subject).unwrap();
        assert_eq!(json["kind"], "skill_track");
        assert_eq!(json["track_id"], "track-art");
    }
}
