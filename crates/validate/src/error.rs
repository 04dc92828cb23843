//! Error types for validation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidateError {
    /// Server or browser engine failed to start or stop. Fatal to the process.
    #[error("Resource lifecycle error: {0}")]
    ResourceLifecycle(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Navigation to {url} timed out after {seconds}s")]
    NavigationTimeout { url: String, seconds: u64 },

    #[error("Tool {tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Sync(#[from] sitemirror_sync::SyncError),

    #[error(transparent)]
    Common(#[from] sitemirror_common::Error),
}

impl ValidateError {
    /// Whether this error must abort the whole process rather than one
    /// route's result
    pub fn is_fatal(&self) -> bool {
        matches!(self, ValidateError::ResourceLifecycle(_) | ValidateError::Common(_))
    }
}

pub type ValidateResult<T> = Result<T, ValidateError>;
