//! Configuration for curasync.
//!
//! This crate handles:
//! - Workflow definitions (KDL)
//! - Variable interpolation
//! - Environment-backed settings

pub mod error;
pub mod settings;
pub mod variables;
pub mod workflow;

pub use error::{ConfigError, ConfigResult};
pub use settings::{InvestigatorMap, ServerSettings};
pub use variables::{GitContext, RunScope, VariableContext};
pub use workflow::{default_workflow, load_workflow, parse_workflow};
