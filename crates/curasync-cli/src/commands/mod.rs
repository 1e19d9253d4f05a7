//! CLI command implementations.

pub mod upload;
pub mod workflow;
