//! Pulling advertisements from a peer's HTTP publisher.

use crate::transport::HeadResponse;
use adchain_merkle::{Advertisement, Cid, RemoteDag, SyncError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// A [`RemoteDag`] backed by another node's HTTP publisher.
#[derive(Clone, Debug)]
pub struct HttpRemoteDag {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteDag {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The root the peer currently serves, if it has published one.
    pub async fn head(&self) -> Result<Option<Cid>, SyncError> {
        let res = self
            .client
            .get(format!("{}/head", self.base_url))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let res = res
            .error_for_status()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let head: HeadResponse = res
            .json()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Some(head.root))
    }
}

#[async_trait]
impl RemoteDag for HttpRemoteDag {
    async fn fetch(&self, cid: &Cid) -> Result<Advertisement, SyncError> {
        let res = self
            .client
            .get(format!("{}/ad/{}", self.base_url, cid))
            .send()
            .await
            .map_err(|e| SyncError::FetchFailed {
                cid: *cid,
                reason: e.to_string(),
            })?;

        match res.status() {
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(*cid)),
            status if !status.is_success() => Err(SyncError::FetchFailed {
                cid: *cid,
                reason: format!("unexpected status {}", status),
            }),
            _ => res.json().await.map_err(|e| SyncError::FetchFailed {
                cid: *cid,
                reason: e.to_string(),
            }),
        }
    }
}
