//! HTTP client for the peer-facing replication endpoints of a discovery node.

use std::time::Duration;
use reqwest::StatusCode;
use shared::protocol::STORE_PATH;
use shared::types::Entry;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {uri} failed: {source}")]
    Request {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {uri} timed out")]
    Timeout { uri: String },

    #[error("{uri} responded with status {status}")]
    Status { uri: String, status: StatusCode },

    #[error("malformed snapshot from {uri}: {source}")]
    Decode {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Pulls snapshots from, and pushes entries to, peer discovery nodes.
/// Every call is bounded by the timeout given at construction.
#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::Client,
}

impl StoreClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Request {
                uri: String::new(),
                source,
            })?;
        Ok(Self { http })
    }

    /// Fetch the peer's full raw entry set, tombstones included
    pub async fn fetch_all(&self, base_uri: &str) -> Result<Vec<Entry>, ClientError> {
        let uri = store_uri(base_uri);
        let response = self
            .http
            .get(&uri)
            .send()
            .await
            .map_err(|source| request_error(&uri, source))?;

        if !response.status().is_success() {
            return Err(ClientError::Status { uri, status: response.status() });
        }

        response
            .json::<Vec<Entry>>()
            .await
            .map_err(|source| ClientError::Decode { uri, source })
    }

    /// Offer one entry to the peer for merging
    pub async fn push(&self, base_uri: &str, entry: &Entry) -> Result<(), ClientError> {
        let uri = store_uri(base_uri);
        let response = self
            .http
            .post(&uri)
            .json(entry)
            .send()
            .await
            .map_err(|source| request_error(&uri, source))?;

        if !response.status().is_success() {
            return Err(ClientError::Status { uri, status: response.status() });
        }

        tracing::trace!("Pushed entry {} to {}", entry.node_id, uri);
        Ok(())
    }
}

fn request_error(uri: &str, source: reqwest::Error) -> ClientError {
    if source.is_timeout() {
        ClientError::Timeout { uri: uri.to_string() }
    } else {
        ClientError::Request { uri: uri.to_string(), source }
    }
}

fn store_uri(base_uri: &str) -> String {
    format!("{}{}", base_uri.trim_end_matches('/'), STORE_PATH)
}
