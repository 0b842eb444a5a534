//! Client for the remote index API.
//!
//! The index reports the latest head it knows for a provider and whether a
//! given advertisement has been durably indexed.

use crate::config::{ConfigError, EngineConfig};
use crate::error::EngineError;
use adchain_merkle::Cid;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from a single index query.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Request(String),

    #[error("index returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("index response could not be parsed: {0}")]
    Parse(String),

    #[error("index rejected the query (code {code}: {message})")]
    Rejected { code: i64, message: String },

    #[error("index response carried no data (code {code}: {message})")]
    MissingData { code: i64, message: String },

    #[error("index returned an invalid cid: {0}")]
    InvalidCid(String),
}

/// Response envelope used by every index endpoint.
#[derive(Debug, Deserialize)]
pub struct IndexResponse<T> {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(alias = "Data")]
    pub data: Option<T>,
}

impl<T> IndexResponse<T> {
    /// Unwrap the payload. An envelope whose `code` is outside the 2xx range
    /// is an error body even when it carries data.
    pub fn into_data(self) -> Result<T, IndexError> {
        let code = self.code.unwrap_or(200);
        if !(200..300).contains(&code) {
            return Err(IndexError::Rejected {
                code,
                message: self.message,
            });
        }
        self.data.ok_or(IndexError::MissingData {
            code,
            message: self.message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct HeadData {
    #[serde(rename = "Cid")]
    cid: String,
}

/// Inclusion status of one advertisement in the index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInclusion {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "Provider", default)]
    pub provider: Option<String>,
    #[serde(rename = "InPando")]
    pub in_pando: bool,
    #[serde(rename = "InSnapShot", default)]
    pub in_snapshot: bool,
    #[serde(rename = "SnapShotID", default)]
    pub snapshot_id: Option<String>,
    #[serde(rename = "SnapShotHeight", default)]
    pub snapshot_height: u64,
}

/// Remote index queries the engine depends on.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Latest head the index knows for a provider.
    async fn provider_head(&self, provider: &str) -> Result<Cid, IndexError>;

    /// Whether `cid` has been durably indexed.
    async fn inclusion(&self, cid: &Cid) -> Result<MetaInclusion, IndexError>;
}

/// [`IndexClient`] over the index HTTP API.
#[derive(Clone, Debug)]
pub struct HttpIndexClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIndexClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from the engine configuration's index settings.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let url = config
            .index_url
            .as_deref()
            .ok_or(ConfigError::Missing("index_url"))?;
        Ok(Self::new(url, config.index_timeout())?)
    }

    async fn get_data<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, IndexError> {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(IndexError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: IndexResponse<T> =
            serde_json::from_str(&body).map_err(|e| IndexError::Parse(e.to_string()))?;
        envelope.into_data()
    }
}

#[async_trait]
impl IndexClient for HttpIndexClient {
    async fn provider_head(&self, provider: &str) -> Result<Cid, IndexError> {
        let head: HeadData = self
            .get_data("/provider/head", &[("peerid", provider)])
            .await?;
        head.cid
            .parse()
            .map_err(|_| IndexError::InvalidCid(head.cid.clone()))
    }

    async fn inclusion(&self, cid: &Cid) -> Result<MetaInclusion, IndexError> {
        let cid = cid.to_string();
        self.get_data("/metadata/inclusion", &[("cid", cid.as_str())])
            .await
    }
}
