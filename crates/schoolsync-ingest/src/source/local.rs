//! Sources that do not talk to the network: saved payload files and
//! in-memory fixtures.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{DateRange, RecordSource, SourceError, SourcePayload};

/// Reads a saved payload from disk. The date range is ignored.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for JsonFileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(&self, _range: &DateRange) -> Result<SourcePayload, SourceError> {
        info!(path = %self.path.display(), "reading payload file");
        let bytes = tokio::fs::read(&self.path).await?;
        SourcePayload::from_slice(&bytes)
    }
}

/// Returns a fixed payload, or a fixed failure
pub struct StaticSource {
    result: Result<serde_json::Value, (u16, String)>,
}

impl StaticSource {
    pub fn new(payload: serde_json::Value) -> Self {
        Self { result: Ok(payload) }
    }

    /// A source that always fails with an HTTP status
    pub fn failing(status: u16, body: impl Into<String>) -> Self {
        Self {
            result: Err((status, body.into())),
        }
    }
}

#[async_trait]
impl RecordSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, _range: &DateRange) -> Result<SourcePayload, SourceError> {
        match &self.result {
            Ok(payload) => serde_json::from_value(payload.clone()).map_err(|e| SourceError::Malformed(e.to_string())),
            Err((status @ (401 | 403), _)) => Err(SourceError::Unauthorized(*status)),
            Err((status, body)) => Err(SourceError::Status {
                status: *status,
                body: body.clone(),
            }),
        }
    }
}
