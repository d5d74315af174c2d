use crate::domain::deal::{AnalysisRunResult, AnalyzedDeal, RiskSummary};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Holds the most recent completed analysis run.
///
/// The whole run result is swapped behind a single `Arc`, so readers see
/// either the previous run or the new one in full.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    current: Arc<RwLock<Option<Arc<AnalysisRunResult>>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored run, returning the one it superseded.
    pub async fn replace(&self, result: AnalysisRunResult) -> Option<Arc<AnalysisRunResult>> {
        let next = Arc::new(result);
        let mut current = self.current.write().await;
        current.replace(next)
    }

    pub async fn current(&self) -> Option<Arc<AnalysisRunResult>> {
        self.current.read().await.clone()
    }

    pub async fn deals(&self) -> Vec<AnalyzedDeal> {
        self.current()
            .await
            .map(|r| r.deals.clone())
            .unwrap_or_default()
    }

    pub async fn last_run_timestamp(&self) -> Option<DateTime<Utc>> {
        self.current().await.map(|r| r.run_timestamp)
    }

    pub async fn summary(&self) -> RiskSummary {
        match self.current().await {
            Some(run) => RiskSummary::from_deals(&run.deals, Some(run.run_timestamp)),
            None => RiskSummary::from_deals(&[], None),
        }
    }
}
