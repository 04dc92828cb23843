//! HTTP retrieval of live documents

use std::time::Duration;

use sitemirror_common::SyncConfig;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Thin wrapper over a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Retrieval {
                url: String::new(),
                reason: format!("cannot build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    /// GET `url` and return the body; non-success statuses are errors
    pub async fn fetch_text(&self, url: &str) -> SyncResult<String> {
        debug!("GET {}", url);

        let retrieval = |e: reqwest::Error| SyncError::Retrieval {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let resp = self.client.get(url).send().await.map_err(retrieval)?;
        let resp = resp.error_for_status().map_err(retrieval)?;
        resp.text().await.map_err(retrieval)
    }
}
