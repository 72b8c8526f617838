//! Application layer: validation, population and commits.

pub mod committer;
pub mod populator;
pub mod submission;
pub mod threads;
pub mod validator;
