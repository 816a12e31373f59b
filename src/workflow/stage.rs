//! Workflow stages: the nodes of the advising state machine.

use serde::{Deserialize, Serialize};

/// The stages of an advising session.
///
/// Starts at `CollectingProfile`; `Done` is terminal for the automated flow
/// but still accepts follow-up messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    CollectingProfile,
    DiscoveringCourses,
    ValidatingSuitability,
    GuidingCareer,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::CollectingProfile,
        Stage::DiscoveringCourses,
        Stage::ValidatingSuitability,
        Stage::GuidingCareer,
        Stage::Done,
    ];

    /// Whether this stage waits for the student to say something.
    ///
    /// The other stages run automatically on an empty message.
    pub fn awaits_user(&self) -> bool {
        matches!(self, Self::CollectingProfile | Self::Done)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Check if a transition from `self` to `target` is an edge of the graph.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, target),
            (CollectingProfile, CollectingProfile)
                | (CollectingProfile, DiscoveringCourses)
                | (DiscoveringCourses, DiscoveringCourses)
                | (DiscoveringCourses, ValidatingSuitability)
                | (ValidatingSuitability, DiscoveringCourses)
                | (ValidatingSuitability, GuidingCareer)
                | (GuidingCareer, Done)
                | (Done, Done)
                | (Done, DiscoveringCourses)
        )
    }

    /// Short human-readable name, used in status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CollectingProfile => "Profile collection",
            Self::DiscoveringCourses => "Course discovery",
            Self::ValidatingSuitability => "Course suitability",
            Self::GuidingCareer => "Career path",
            Self::Done => "Done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CollectingProfile => "collecting_profile",
            Self::DiscoveringCourses => "discovering_courses",
            Self::ValidatingSuitability => "validating_suitability",
            Self::GuidingCareer => "guiding_career",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.to_string() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_edges() {
        use Stage::*;
        assert!(CollectingProfile.can_transition_to(DiscoveringCourses));
        assert!(DiscoveringCourses.can_transition_to(ValidatingSuitability));
        assert!(ValidatingSuitability.can_transition_to(DiscoveringCourses));
        assert!(ValidatingSuitability.can_transition_to(GuidingCareer));
        assert!(GuidingCareer.can_transition_to(Done));
        assert!(Done.can_transition_to(DiscoveringCourses));
    }

    #[test]
    fn no_shortcuts() {
        use Stage::*;
        assert!(!CollectingProfile.can_transition_to(ValidatingSuitability));
        assert!(!CollectingProfile.can_transition_to(Done));
        assert!(!DiscoveringCourses.can_transition_to(GuidingCareer));
        assert!(!GuidingCareer.can_transition_to(CollectingProfile));
        assert!(!Done.can_transition_to(CollectingProfile));
    }

    #[test]
    fn only_profile_and_done_wait_for_input() {
        let waiting: Vec<Stage> = Stage::ALL.into_iter().filter(|s| s.awaits_user()).collect();
        assert_eq!(waiting, vec![Stage::CollectingProfile, Stage::Done]);
    }

    #[test]
    fn sessions_start_collecting_and_end_done() {
        assert_eq!(Stage::default(), Stage::CollectingProfile);
        let terminal: Vec<Stage> = Stage::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Stage::Done]);
    }

    #[test]
    fn display_matches_serde() {
        for stage in Stage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
            assert_eq!(stage.to_string().parse::<Stage>(), Ok(stage));
        }
        assert!("finished".parse::<Stage>().is_err());
    }
}
