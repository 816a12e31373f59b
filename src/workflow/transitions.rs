//! The transition table of the advising workflow.
//!
//! Each stage handler produces a [`StageReport`]. The controller looks up the
//! single row of [`TRANSITIONS`] whose `from` matches the current stage and
//! whose guard holds for the report, moves to `to`, and applies the row's
//! [`Effect`]. Keeping every edge in one static table makes the full graph
//! enumerable in tests.

use super::stage::Stage;

/// What a stage handler observed, in the terms the guards care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageReport {
    Profile {
        complete: bool,
    },
    Discovery {
        candidates: usize,
        /// Broaden attempts already spent before this round.
        attempts: u32,
    },
    Suitability {
        accepted: usize,
        no_results: bool,
        attempts: u32,
    },
    Career,
    FollowUp {
        wants_courses: bool,
    },
}

/// Named predicates over a [`StageReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    ProfileComplete,
    ProfileIncomplete,
    CandidatesFound,
    DiscoveryEmptyWithinBound,
    DiscoveryExhausted,
    NoResultsFlagged,
    CourseAccepted,
    AllRejectedWithinBound,
    AllRejectedExhausted,
    InsightsGenerated,
    FollowUpRequestsCourses,
    FollowUpConversational,
}

impl Guard {
    /// Evaluate the guard. `bound` is the maximum number of broaden attempts.
    pub fn holds(&self, report: &StageReport, bound: u32) -> bool {
        use StageReport as R;
        match (self, *report) {
            (Self::ProfileComplete, R::Profile { complete }) => complete,
            (Self::ProfileIncomplete, R::Profile { complete }) => !complete,

            (Self::CandidatesFound, R::Discovery { candidates, .. }) => candidates > 0,
            (Self::DiscoveryEmptyWithinBound, R::Discovery { candidates, attempts }) => {
                candidates == 0 && attempts < bound
            }
            (Self::DiscoveryExhausted, R::Discovery { candidates, attempts }) => {
                candidates == 0 && attempts >= bound
            }

            (Self::NoResultsFlagged, R::Suitability { no_results, .. }) => no_results,
            (Self::CourseAccepted, R::Suitability { accepted, no_results, .. }) => {
                !no_results && accepted > 0
            }
            (
                Self::AllRejectedWithinBound,
                R::Suitability {
                    accepted,
                    no_results,
                    attempts,
                },
            ) => !no_results && accepted == 0 && attempts < bound,
            (
                Self::AllRejectedExhausted,
                R::Suitability {
                    accepted,
                    no_results,
                    attempts,
                },
            ) => !no_results && accepted == 0 && attempts >= bound,

            (Self::InsightsGenerated, R::Career) => true,

            (Self::FollowUpRequestsCourses, R::FollowUp { wants_courses }) => wants_courses,
            (Self::FollowUpConversational, R::FollowUp { wants_courses }) => !wants_courses,

            _ => false,
        }
    }
}

/// Session bookkeeping attached to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Spend one broaden attempt.
    Broaden,
    /// Give up broadening and mark the session as having no results.
    FlagNoResults,
    /// Start a fresh broaden budget.
    ResetAttempts,
}

/// One edge of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Stage,
    pub guard: Guard,
    pub to: Stage,
    pub effect: Effect,
}

const fn edge(from: Stage, guard: Guard, to: Stage, effect: Effect) -> Transition {
    Transition {
        from,
        guard,
        to,
        effect,
    }
}

/// Every edge of the workflow.
pub static TRANSITIONS: &[Transition] = &[
    edge(
        Stage::CollectingProfile,
        Guard::ProfileIncomplete,
        Stage::CollectingProfile,
        Effect::None,
    ),
    edge(
        Stage::CollectingProfile,
        Guard::ProfileComplete,
        Stage::DiscoveringCourses,
        Effect::None,
    ),
    edge(
        Stage::DiscoveringCourses,
        Guard::CandidatesFound,
        Stage::ValidatingSuitability,
        Effect::None,
    ),
    edge(
        Stage::DiscoveringCourses,
        Guard::DiscoveryEmptyWithinBound,
        Stage::DiscoveringCourses,
        Effect::Broaden,
    ),
    edge(
        Stage::DiscoveringCourses,
        Guard::DiscoveryExhausted,
        Stage::ValidatingSuitability,
        Effect::FlagNoResults,
    ),
    edge(
        Stage::ValidatingSuitability,
        Guard::NoResultsFlagged,
        Stage::GuidingCareer,
        Effect::None,
    ),
    edge(
        Stage::ValidatingSuitability,
        Guard::CourseAccepted,
        Stage::GuidingCareer,
        Effect::ResetAttempts,
    ),
    edge(
        Stage::ValidatingSuitability,
        Guard::AllRejectedWithinBound,
        Stage::DiscoveringCourses,
        Effect::Broaden,
    ),
    edge(
        Stage::ValidatingSuitability,
        Guard::AllRejectedExhausted,
        Stage::GuidingCareer,
        Effect::FlagNoResults,
    ),
    edge(
        Stage::GuidingCareer,
        Guard::InsightsGenerated,
        Stage::Done,
        Effect::None,
    ),
    edge(
        Stage::Done,
        Guard::FollowUpRequestsCourses,
        Stage::DiscoveringCourses,
        Effect::ResetAttempts,
    ),
    edge(
        Stage::Done,
        Guard::FollowUpConversational,
        Stage::Done,
        Effect::None,
    ),
];

/// The edge that fires for `report` in stage `from`, if any.
pub fn next_transition(from: Stage, report: &StageReport, bound: u32) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.guard.holds(report, bound))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUND: u32 = 3;

    fn reports_for(stage: Stage) -> Vec<StageReport> {
        let mut out = Vec::new();
        match stage {
            Stage::CollectingProfile => {
                out.push(StageReport::Profile { complete: true });
                out.push(StageReport::Profile { complete: false });
            }
            Stage::DiscoveringCourses => {
                for candidates in [0, 1, 4] {
                    for attempts in 0..=BOUND + 1 {
                        out.push(StageReport::Discovery {
                            candidates,
                            attempts,
                        });
                    }
                }
            }
            Stage::ValidatingSuitability => {
                for accepted in [0, 2] {
                    for no_results in [false, true] {
                        if no_results && accepted > 0 {
                            continue;
                        }
                        for attempts in 0..=BOUND + 1 {
                            out.push(StageReport::Suitability {
                                accepted,
                                no_results,
                                attempts,
                            });
                        }
                    }
                }
            }
            Stage::GuidingCareer => out.push(StageReport::Career),
            Stage::Done => {
                out.push(StageReport::FollowUp {
                    wants_courses: true,
                });
                out.push(StageReport::FollowUp {
                    wants_courses: false,
                });
            }
        }
        out
    }

    #[test]
    fn exactly_one_edge_fires_per_report() {
        for stage in Stage::ALL {
            for report in reports_for(stage) {
                let firing: Vec<_> = TRANSITIONS
                    .iter()
                    .filter(|t| t.from == stage && t.guard.holds(&report, BOUND))
                    .collect();
                assert_eq!(firing.len(), 1, "{stage} with {report:?}: {firing:?}");
            }
        }
    }

    #[test]
    fn every_edge_is_a_graph_edge() {
        for t in TRANSITIONS {
            assert!(t.from.can_transition_to(t.to), "{t:?}");
        }
    }

    #[test]
    fn incomplete_profile_never_advances() {
        let t = next_transition(
            Stage::CollectingProfile,
            &StageReport::Profile { complete: false },
            BOUND,
        )
        .unwrap();
        assert_eq!(t.to, Stage::CollectingProfile);
    }

    #[test]
    fn empty_discovery_loops_until_bound_then_forwards() {
        for attempts in 0..BOUND {
            let t = next_transition(
                Stage::DiscoveringCourses,
                &StageReport::Discovery {
                    candidates: 0,
                    attempts,
                },
                BOUND,
            )
            .unwrap();
            assert_eq!((t.to, t.effect), (Stage::DiscoveringCourses, Effect::Broaden));
        }
        let t = next_transition(
            Stage::DiscoveringCourses,
            &StageReport::Discovery {
                candidates: 0,
                attempts: BOUND,
            },
            BOUND,
        )
        .unwrap();
        assert_eq!(
            (t.to, t.effect),
            (Stage::ValidatingSuitability, Effect::FlagNoResults)
        );
    }

    #[test]
    fn rejections_loop_back_until_bound() {
        let within = next_transition(
            Stage::ValidatingSuitability,
            &StageReport::Suitability {
                accepted: 0,
                no_results: false,
                attempts: BOUND - 1,
            },
            BOUND,
        )
        .unwrap();
        assert_eq!(within.to, Stage::DiscoveringCourses);

        let exhausted = next_transition(
            Stage::ValidatingSuitability,
            &StageReport::Suitability {
                accepted: 0,
                no_results: false,
                attempts: BOUND,
            },
            BOUND,
        )
        .unwrap();
        assert_eq!(
            (exhausted.to, exhausted.effect),
            (Stage::GuidingCareer, Effect::FlagNoResults)
        );
    }

    #[test]
    fn mismatched_report_fires_nothing() {
        assert!(next_transition(Stage::GuidingCareer, &StageReport::Profile { complete: true }, BOUND).is_none());
    }
}
