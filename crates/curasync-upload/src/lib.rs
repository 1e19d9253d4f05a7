//! Upload of curated electrophysiology assets.
//!
//! Curation files committed to the repository are turned into derived data
//! assets: each one is copied to S3 under a prefix named after its raw asset
//! folder, next to a generated `data_description.json`, and the prefix is then
//! registered with Code Ocean.

pub mod codeocean;
pub mod discovery;
pub mod error;
pub mod plan;
pub mod uploader;

pub use codeocean::{CodeOceanClient, CodeOceanCredentials, Registrar, RunCapsuleRequest};
pub use discovery::{CommitSummary, GitRepo};
pub use error::{CodeOceanError, UploadError, UploadResult};
pub use plan::{UploadPlan, process_name};
pub use uploader::{Discovery, UploadMode, UploadReport, Uploader, discover};
