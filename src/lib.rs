//! Course Advisor: a conversational course-recommendation assistant.
//!
//! A [`workflow::WorkflowController`] walks each session through profile
//! collection, course discovery, suitability checks and career guidance.

pub mod advisor;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod ratelimit;
pub mod retry;
pub mod search;
pub mod store;
pub mod workflow;
