//! Core domain types and traits for curasync.
//!
//! This crate contains:
//! - Run identifiers and common error types
//! - Workflow, step and trigger definitions
//! - The `Executor` trait and command types
//! - Push event parsing
//! - Storage abstractions (objects, parameters, secrets)
//! - The derived data description schema

pub mod error;
pub mod executor;
pub mod id;
pub mod push;
pub mod schema;
pub mod store;
pub mod workflow;

pub use error::{Error, Result};
pub use id::RunId;
