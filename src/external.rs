//! External-reference collaborator
//!
//! `EXTERNAL_REF(<url>)` reads the computed result of a cell served by another
//! instance. The remote answers with the usual `{ "value", "result" }` shape,
//! of which only `result` is used.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::CellResponse;

/// Default bound on a single remote fetch
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalError {
    #[error("invalid locator {0:?}")]
    InvalidLocator(String),

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response from {url}: {message}")]
    Body { url: String, message: String },

    #[error("external references are disabled")]
    Disabled,

    #[error("fetch cancelled")]
    Cancelled,
}

/// Fetches the computed result of a remote cell
#[async_trait]
pub trait ExternalRef: Send + Sync {
    async fn fetch_result(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExternalError>;
}

/// HTTP implementation with a client-level timeout
pub struct HttpExternalRef {
    client: reqwest::Client,
}

impl HttpExternalRef {
    pub fn new(timeout: Duration) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    async fn fetch(&self, locator: &str) -> Result<String, ExternalError> {
        let url = reqwest::Url::parse(locator)
            .map_err(|_| ExternalError::InvalidLocator(locator.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExternalError::InvalidLocator(locator.to_string()));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExternalError::Request {
                url: locator.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExternalError::Status {
                url: locator.to_string(),
                status: status.as_u16(),
            });
        }

        let cell: CellResponse = response.json().await.map_err(|e| ExternalError::Body {
            url: locator.to_string(),
            message: e.to_string(),
        })?;

        debug!(url = %locator, result = %cell.result, "external reference fetched");
        Ok(cell.result)
    }
}

#[async_trait]
impl ExternalRef for HttpExternalRef {
    async fn fetch_result(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExternalError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExternalError::Cancelled),
            result = self.fetch(locator) => result,
        }
    }
}

/// Rejects every fetch
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExternalRef;

#[async_trait]
impl ExternalRef for NoExternalRef {
    async fn fetch_result(
        &self,
        _locator: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, ExternalError> {
        Err(ExternalError::Disabled)
    }
}
