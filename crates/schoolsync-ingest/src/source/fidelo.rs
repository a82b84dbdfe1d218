//! HTTP client for the Fidelo booking system
//!
//! Report endpoints are slow on large date ranges. The request timeout is
//! configurable and can be disabled entirely.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

use super::{DateRange, RecordSource, SourceError, SourcePayload};

// ============================================================================
// Client Constants
// ============================================================================

/// Default request timeout: 30 minutes
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// Date format the report filters expect
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Longest error body kept in [`SourceError::Status`]
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct FideloConfig {
    pub base_url: String,
    /// Report path, e.g. `api/1.0/gui2/<hash>/search`
    pub endpoint: String,
    pub token: String,
    pub from_param: String,
    pub until_param: String,
    pub date_format: String,
    /// `None` waits as long as the server takes
    pub timeout: Option<Duration>,
}

impl FideloConfig {
    pub fn new(base_url: impl Into<String>, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint: endpoint.into(),
            token: token.into(),
            from_param: "filter[from]".to_string(),
            until_param: "filter[until]".to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }
}

pub struct FideloClient {
    client: Client,
    config: FideloConfig,
}

impl FideloClient {
    pub fn new(config: FideloConfig) -> Result<Self, SourceError> {
        let mut builder = Client::builder().user_agent(concat!("schoolsync/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl RecordSource for FideloClient {
    fn name(&self) -> &str {
        "fidelo"
    }

    async fn fetch(&self, range: &DateRange) -> Result<SourcePayload, SourceError> {
        let url = self.config.url();
        let from = range.from.format(&self.config.date_format).to_string();
        let until = range.until.format(&self.config.date_format).to_string();

        info!(url = %url, from = %from, until = %until, "fetching records from Fidelo");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.token)
            .query(&[
                (self.config.from_param.as_str(), from.as_str()),
                (self.config.until_param.as_str(), until.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SourceError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "received Fidelo payload");
        SourcePayload::from_slice(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_cleanly() {
        let config = FideloConfig::new("https://school.fidelo.com/", "/api/1.0/gui2/abc/search", "t");
        assert_eq!(config.url(), "https://school.fidelo.com/api/1.0/gui2/abc/search");
    }

    #[test]
    fn test_defaults() {
        let config = FideloConfig::new("https://x", "y", "t");
        assert_eq!(config.timeout, Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)));
        assert_eq!(config.date_format, DEFAULT_DATE_FORMAT);
    }
}
