//! Network fetcher collaborator: retrieve linked PDF documents.
//!
//! The hyperlink resolver only *discovers* URLs; retrieving them is this
//! collaborator's job. The pipeline bounds every fetch with the configured
//! timeout and treats any failure as a pruned branch, so implementations
//! just report what happened.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Why a fetch produced no bytes.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from '{url}'")]
    Http { url: String, status: u16 },

    #[error("Fetch timed out after {secs}s for '{url}'")]
    Timeout { url: String, secs: u64 },

    #[error("Transport error fetching '{url}': {reason}")]
    Transport { url: String, reason: String },

    #[error("'{url}' does not look like a PDF (content-type '{content_type}')")]
    NotPdf { url: String, content_type: String },
}

/// Fetch a URL to bytes, or say why not.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher with a per-request timeout and a PDF sanity
/// check on the response.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl NetworkFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        info!("Fetching linked document: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // Accept either a PDF content-type or a .pdf-looking URL; linked
        // portals frequently serve PDFs as octet-stream.
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let url_says_pdf = url.to_ascii_lowercase().contains(".pdf");
        if !content_type.contains("pdf")
            && !content_type.contains("octet-stream")
            && !url_says_pdf
        {
            return Err(FetchError::NotPdf {
                url: url.to_string(),
                content_type,
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_display() {
        let e = FetchError::Http {
            url: "https://example.com/a.pdf".into(),
            status: 404,
        };
        assert!(e.to_string().contains("404"));
    }
}
