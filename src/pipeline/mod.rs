//! Turn-taking pipeline: stage messages and the turn controller.

pub mod coordinator;
pub mod messages;
