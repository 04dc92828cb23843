//! Error types for synchronization

use std::path::PathBuf;

use sitemirror_common::Route;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Retrieval failed for {url}: {reason}")]
    Retrieval { url: String, reason: String },

    #[error("No primary content region found for route {route}")]
    MissingContentRegion { route: Route },

    #[error("Primary content for route {route} is empty")]
    BelowContentThreshold { route: Route },

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Cannot read shared fragment {path}: {source}")]
    Fragment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] sitemirror_common::Error),
}

impl SyncError {
    /// Errors that only concern one route and are retried on the next round
    pub fn is_route_level(&self) -> bool {
        matches!(
            self,
            SyncError::Retrieval { .. }
                | SyncError::MissingContentRegion { .. }
                | SyncError::BelowContentThreshold { .. }
                | SyncError::Io(_)
        )
    }
}

/// Why the site index could not be used for discovery
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("bad index path {path}: {source}")]
    BadPath {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("index not retrievable: {0}")]
    Unreachable(#[source] Box<SyncError>),

    #[error("xml parse failed: {0}")]
    Malformed(#[from] roxmltree::Error),

    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),

    #[error("index lists no same-origin locations")]
    NoLocations,

    #[error("index lists no same-origin indexes")]
    NoNestedIndexes,
}

pub type SyncResult<T> = Result<T, SyncError>;
