//! Session state: the value threaded through every controller call.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{CareerInsight, CourseRecord, StudentProfile, SuitabilityVerdict};
use super::stage::Stage;
use crate::llm::ChatMessage;

/// Everything known about one advising conversation.
///
/// Owned by the caller and passed by value into the controller, which hands
/// back a new value. Nothing here is shared between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub profile: StudentProfile,
    /// Working set from the latest discovery round.
    pub candidates: Vec<CourseRecord>,
    /// Latest verdict per course id.
    pub verdicts: BTreeMap<String, SuitabilityVerdict>,
    pub insights: Vec<CareerInsight>,
    pub stage: Stage,
    pub history: Vec<ChatMessage>,
    /// Consecutive broadened discovery rounds since the last reset.
    pub broaden_attempts: u32,
    /// Discovery gave up without finding an acceptable course.
    pub no_results: bool,
    /// Extra search terms from a follow-up request for different courses.
    pub discovery_hint: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            profile: StudentProfile::default(),
            candidates: Vec::new(),
            verdicts: BTreeMap::new(),
            insights: Vec::new(),
            stage: Stage::default(),
            history: Vec::new(),
            broaden_attempts: 0,
            no_results: false,
            discovery_hint: None,
        }
    }

    pub fn record_verdict(&mut self, verdict: SuitabilityVerdict) {
        self.verdicts.insert(verdict.course_id.clone(), verdict);
    }

    pub fn is_accepted(&self, course_id: &str) -> bool {
        self.verdicts.get(course_id).is_some_and(|v| v.accepted)
    }

    /// Candidates whose latest verdict is an accept, in candidate order.
    pub fn accepted_courses(&self) -> Vec<&CourseRecord> {
        self.candidates
            .iter()
            .filter(|c| self.is_accepted(&c.id))
            .collect()
    }

    /// Course ids that discovery should not offer again.
    ///
    /// Rejected courses are always excluded. While a follow-up asked for
    /// different courses, every course already judged is excluded.
    pub fn excluded_course_ids(&self) -> BTreeSet<String> {
        let asking_for_new = self.discovery_hint.is_some();
        self.verdicts
            .values()
            .filter(|v| asking_for_new || !v.accepted)
            .map(|v| v.course_id.clone())
            .collect()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::CourseSource;

    fn verdict(id: &str, accepted: bool) -> SuitabilityVerdict {
        SuitabilityVerdict {
            course_id: id.to_string(),
            accepted,
            reasons: vec![],
        }
    }

    #[test]
    fn new_session_starts_collecting_profile() {
        let session = SessionState::new();
        assert_eq!(session.stage, Stage::CollectingProfile);
        assert!(Uuid::parse_str(&session.id).is_ok());
        assert_eq!(session.broaden_attempts, 0);
    }

    #[test]
    fn latest_verdict_wins() {
        let mut session = SessionState::with_id("s");
        session.record_verdict(verdict("a", false));
        session.record_verdict(verdict("a", true));
        assert_eq!(session.verdicts.len(), 1);
        assert!(session.is_accepted("a"));
    }

    #[test]
    fn accepted_courses_follow_candidate_order() {
        let mut session = SessionState::with_id("s");
        let first = CourseRecord::new("B course", "X", CourseSource::VectorStore);
        let second = CourseRecord::new("A course", "X", CourseSource::VectorStore);
        session.candidates = vec![first.clone(), second.clone()];
        session.record_verdict(verdict(&second.id, true));
        session.record_verdict(verdict(&first.id, true));
        let titles: Vec<_> = session.accepted_courses().iter().map(|c| c.title.clone()).collect();
        assert_eq!(titles, vec!["B course", "A course"]);
    }

    #[test]
    fn exclusions_widen_with_hint() {
        let mut session = SessionState::with_id("s");
        session.record_verdict(verdict("ok", true));
        session.record_verdict(verdict("bad", false));
        assert_eq!(session.excluded_course_ids(), BTreeSet::from(["bad".to_string()]));

        session.discovery_hint = Some("something shorter".into());
        assert_eq!(session.excluded_course_ids().len(), 2);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut session = SessionState::with_id("s");
        session.history.push(ChatMessage::user("hello"));
        session.stage = Stage::Done;
        let json = serde_json::to_string(&session).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
