//! The advising workflow: stages, the transition table and the controller
//! that drives a session through them.

pub mod controller;
pub mod model;
pub mod session;
pub mod stage;
pub mod transitions;

pub use controller::{ControllerConfig, Exchange, Turn, WorkflowController};
pub use model::{
    CareerInsight, CourseRecord, CourseSource, InsightSubject, ProfileUpdate, StudentProfile,
    SuitabilityVerdict,
};
pub use session::SessionState;
pub use stage::Stage;
pub use transitions::{Effect, Guard, StageReport, Transition, TRANSITIONS, next_transition};
