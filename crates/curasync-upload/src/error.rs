//! Uploader errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("'{0}' is not a valid asset name")]
    InvalidAssetName(String),

    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("{failed} of {total} assets could not be uploaded")]
    Incomplete { failed: usize, total: usize },

    #[error(transparent)]
    Store(#[from] curasync_core::Error),

    #[error(transparent)]
    CodeOcean(#[from] CodeOceanError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

#[derive(Debug, Error)]
pub enum CodeOceanError {
    #[error("invalid Code Ocean domain '{domain}': {message}")]
    InvalidDomain { domain: String, message: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Code Ocean returned {status}: {body}")]
    Status { status: u16, body: String },
}
