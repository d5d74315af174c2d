pub mod hubspot;
pub mod types;

use crate::domain::deal::RawDeal;
use serde::Serialize;

/// Why the deal source could not deliver deals. Any of these aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("deal source not configured: {0}")]
    NotConfigured(String),
    #[error("deal source rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("deal source unreachable: {0}")]
    Connectivity(String),
    #[error("deal source error: HTTP {status} - {body}")]
    Upstream { status: u16, body: String },
    #[error("deal source returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait::async_trait]
pub trait DealSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Returns up to `limit` deals in source order.
    async fn fetch(&self, limit: usize) -> Result<Vec<RawDeal>, FetchError>;

    /// Raw source records, for debugging passthrough endpoints.
    async fn fetch_raw(&self, limit: usize) -> Result<Vec<serde_json::Value>, FetchError>;

    async fn check_connection(&self) -> ConnectionStatus;
}
