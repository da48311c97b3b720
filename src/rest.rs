use crate::error::{EvokError, Result};
use crate::protocol::device_records;
use crate::types::DeviceAddress;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

/// Client for the controller's read-only `/rest/all` endpoint
///
/// Returns richer per-device metadata (aliases in particular) than the
/// WebSocket snapshot.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    url: Url,
}

impl RestClient {
    /// Create a client for the given endpoint URL
    ///
    /// `timeout` bounds the whole request, body included.
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch every device record
    ///
    /// Evok 2 answers with a bare array, Evok 3 wraps it in `{"data": [...]}`.
    /// Records without `dev` or `circuit` are skipped.
    pub async fn fetch_all(&self) -> Result<Vec<(DeviceAddress, Map<String, Value>)>> {
        tracing::debug!("Fetching device info from {}", self.url);

        let body: Value = self
            .http
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let records = match body {
            Value::Array(_) => body,
            Value::Object(mut envelope) => match envelope.remove("data") {
                Some(data @ Value::Array(_)) => data,
                _ => {
                    return Err(EvokError::InvalidResponse(
                        "No device list in /rest/all response".to_string(),
                    ))
                }
            },
            _ => {
                return Err(EvokError::InvalidResponse(
                    "Unexpected /rest/all response".to_string(),
                ))
            }
        };

        Ok(device_records(records))
    }
}
