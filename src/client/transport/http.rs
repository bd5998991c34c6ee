//! Batched JSON POST transport.

use crate::client::transport::{MeasurementsByName, Transport};
use crate::client::BufferedMeasurement;
use crate::core::{Result, TallyError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Posts the whole flush as one JSON array and expects `201 Created`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport posting to `url`, bounding each request by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The ingestion URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &MeasurementsByName) -> Result<usize> {
        let measurements: Vec<&BufferedMeasurement> = batch.values().flatten().collect();
        let count = measurements.len();

        let response = self.client.post(&self.url).json(&measurements).send().await?;
        let status = response.status();

        if status == StatusCode::CREATED {
            return Ok(count);
        }

        if status.is_client_error() {
            let body = response.text().await.map_err(|e| {
                TallyError::transport(format!(
                    "Server replied with {}, but error message couldn't be read: {}",
                    status.as_u16(),
                    e
                ))
            })?;
            let body = body.trim();
            if !body.is_empty() {
                return Err(TallyError::Rejected {
                    status: status.as_u16(),
                    body: body.to_string(),
                });
            }
        }

        Err(TallyError::transport(format!(
            "Server replied with error {}",
            status.as_u16()
        )))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
