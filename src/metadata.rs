//! Best-effort EC2 instance metadata for the dashboard.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AppError;

/// Label shown on the dashboard and path under the metadata base URL.
pub const METADATA_FIELDS: &[(&str, &str)] = &[
    ("Instance ID", "instance-id"),
    ("Instance Type", "instance-type"),
    ("Availability Zone", "placement/availability-zone"),
    ("Public IPv4", "public-ipv4"),
];

pub const UNAVAILABLE_MESSAGE: &str =
    "Instance metadata is unavailable. If you are running locally, this is expected.";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetadataField {
    pub label: String,
    pub value: String,
}

#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn fetch(&self) -> Result<Vec<MetadataField>, AppError>;
}

/// Client for the instance metadata service.
#[derive(Clone)]
pub struct ImdsClient {
    http: reqwest::Client,
    base_url: String,
}

impl ImdsClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("build metadata http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<String, reqwest::Error> {
        let body = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body.trim().to_string())
    }
}

#[async_trait]
impl MetadataClient for ImdsClient {
    async fn fetch(&self) -> Result<Vec<MetadataField>, AppError> {
        let mut fields = Vec::with_capacity(METADATA_FIELDS.len());
        for (label, path) in METADATA_FIELDS {
            // The first failure means the service is not there; stop asking.
            let value = self
                .get(path)
                .await
                .map_err(|e| AppError::MetadataServiceUnavailable(e.to_string()))?;
            fields.push(MetadataField {
                label: label.to_string(),
                value,
            });
        }
        debug!(count = fields.len(), "instance metadata fetched");
        Ok(fields)
    }
}

/// Used when lookups are switched off.
pub struct DisabledMetadata;

#[async_trait]
impl MetadataClient for DisabledMetadata {
    async fn fetch(&self) -> Result<Vec<MetadataField>, AppError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MetadataView {
    Disabled,
    Available { fields: Vec<MetadataField> },
    Unavailable { message: String },
}

/// Never fails: errors become the `Unavailable` placeholder.
pub async fn lookup(client: &dyn MetadataClient, enabled: bool) -> MetadataView {
    if !enabled {
        return MetadataView::Disabled;
    }
    match client.fetch().await {
        Ok(fields) => MetadataView::Available { fields },
        Err(e) => {
            warn!(error = %e, "instance metadata lookup failed");
            MetadataView::Unavailable {
                message: UNAVAILABLE_MESSAGE.to_string(),
            }
        }
    }
}
