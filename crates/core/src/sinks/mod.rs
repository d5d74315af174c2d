//! Best-effort side-effect sinks.
//!
//! Sinks report failure through their outcome values and never return an
//! error, so the orchestrator can log and move on. A sink without credentials
//! reports `not_configured`, which is a skip rather than a failure.

pub mod messages;
pub mod sheets;
pub mod slack;

use crate::domain::deal::AnalyzedDeal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_written: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not_configured: bool,
}

impl ExportOutcome {
    pub fn synced(rows_written: usize) -> Self {
        Self {
            synced: true,
            rows_written: Some(rows_written),
            error: None,
            not_configured: false,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            synced: false,
            rows_written: None,
            error: Some(error.into()),
            not_configured: false,
        }
    }

    pub fn not_configured(reason: impl Into<String>) -> Self {
        Self {
            not_configured: true,
            ..Self::failed(reason)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyOutcome {
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not_configured: bool,
}

impl NotifyOutcome {
    pub fn sent(timestamp: Option<String>) -> Self {
        Self {
            sent: true,
            timestamp,
            error: None,
            not_configured: false,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            sent: false,
            timestamp: None,
            error: Some(error.into()),
            not_configured: false,
        }
    }

    pub fn not_configured(reason: impl Into<String>) -> Self {
        Self {
            not_configured: true,
            ..Self::failed(reason)
        }
    }
}

/// Rows read back from an export target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRows {
    pub sheet_id: String,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[async_trait::async_trait]
pub trait ExportSink: Send + Sync {
    async fn export(&self, target_id: &str, deals: &[AnalyzedDeal]) -> ExportOutcome;

    async fn read(&self, target_id: &str, range: Option<&str>) -> anyhow::Result<ExportRows>;
}

#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_alert(&self, high_risk: &[AnalyzedDeal]) -> NotifyOutcome;

    async fn send_summary(
        &self,
        total: usize,
        high_risk_count: usize,
        avg_score: f64,
    ) -> NotifyOutcome;
}
