//! End-to-end analysis run: fetch, score, commit, export, notify.
//!
//! Only a deal-source failure (or an overlapping run) produces an error
//! outcome. Scoring degrades per deal inside [`RiskScorer`], and sink failures
//! are logged and attached as warnings. The result store is written exactly
//! once per run, after every deal is scored, so a run that fails or is
//! dropped early leaves the previous result visible.

use crate::config::Settings;
use crate::crm::hubspot::HubSpotDealSource;
use crate::crm::DealSource;
use crate::domain::deal::{
    mean_score, AnalysisRunResult, AnalyzedDeal, RawDeal, RunOutcome, RunStatus,
};
use crate::llm;
use crate::scoring::RiskScorer;
use crate::sinks::sheets::GoogleSheetsExporter;
use crate::sinks::slack::SlackNotifier;
use crate::sinks::{ExportSink, NotificationSink};
use crate::storage::{ResultStore, RunLock};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_FETCH_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub fetch_limit: usize,
    /// Number of deals scored at once. Results keep fetch order regardless.
    pub scoring_concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            scoring_concurrency: 1,
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            fetch_limit: settings.fetch_limit,
            scoring_concurrency: settings.scoring_concurrency,
        }
    }
}

/// Per-run switches supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub export_target: Option<String>,
    pub notify: bool,
}

#[derive(Clone)]
pub struct AnalysisPipeline {
    source: Arc<dyn DealSource>,
    scorer: RiskScorer,
    exporter: Arc<dyn ExportSink>,
    notifier: Arc<dyn NotificationSink>,
    store: ResultStore,
    run_lock: RunLock,
    options: PipelineOptions,
}

impl AnalysisPipeline {
    pub fn new(
        source: Arc<dyn DealSource>,
        scorer: RiskScorer,
        exporter: Arc<dyn ExportSink>,
        notifier: Arc<dyn NotificationSink>,
        store: ResultStore,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            scorer,
            exporter,
            notifier,
            store,
            run_lock: RunLock::new(),
            options,
        }
    }

    /// Wires the HubSpot source, the configured scoring provider, Google Sheets
    /// and Slack from settings. Missing credentials leave the matching
    /// collaborator in its not-configured mode.
    pub fn from_settings(settings: &Settings, store: ResultStore) -> anyhow::Result<Self> {
        let source = HubSpotDealSource::from_settings(settings)?;
        let scorer = RiskScorer::new(llm::from_settings(settings)?);
        let exporter = GoogleSheetsExporter::from_settings(settings)?;
        let notifier = SlackNotifier::from_settings(settings)?;

        if settings.hubspot_token.is_none() {
            tracing::warn!("HUBSPOT_TOKEN not set; analysis runs will fail at fetch");
        }
        if !scorer.is_configured() {
            tracing::warn!("no scoring provider configured; deals get a neutral score");
        }
        if !notifier.is_configured() {
            tracing::warn!("Slack not configured; notifications will be skipped");
        }

        Ok(Self::new(
            Arc::new(source),
            scorer,
            Arc::new(exporter),
            Arc::new(notifier),
            store,
            PipelineOptions::from_settings(settings),
        ))
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn source(&self) -> &Arc<dyn DealSource> {
        &self.source
    }

    pub fn exporter(&self) -> &Arc<dyn ExportSink> {
        &self.exporter
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.is_running()
    }

    pub async fn run(&self, req: RunRequest) -> RunOutcome {
        let Some(_guard) = self.run_lock.try_acquire() else {
            tracing::warn!("analysis run rejected; another run in progress");
            return RunOutcome::error("analysis already running", Utc::now());
        };

        let run_id = Uuid::new_v4();
        let t0 = std::time::Instant::now();

        let raw_deals = match self.source.fetch(self.options.fetch_limit).await {
            Ok(deals) => deals,
            Err(err) => {
                tracing::error!(
                    %run_id,
                    source = self.source.source_name(),
                    error = %err,
                    "deal fetch failed; run aborted"
                );
                return RunOutcome::error(err.to_string(), Utc::now());
            }
        };

        tracing::info!(
            %run_id,
            fetched = raw_deals.len(),
            scorer_configured = self.scorer.is_configured(),
            "scoring deals"
        );

        let deals = self.score_all(&raw_deals).await;

        let run_timestamp = Utc::now();
        self.store
            .replace(AnalysisRunResult {
                run_id,
                deals: deals.clone(),
                run_timestamp,
                status: RunStatus::Success,
                error: None,
            })
            .await;

        let mut warnings = Vec::new();

        if let Some(target) = req.export_target.as_deref() {
            let outcome = self.exporter.export(target, &deals).await;
            if outcome.not_configured {
                tracing::debug!(%run_id, sheet_id = target, reason = ?outcome.error, "export skipped");
            } else if !outcome.synced {
                let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(%run_id, sheet_id = target, %error, "export failed");
                warnings.push(format!("export failed: {error}"));
            }
        }

        if req.notify {
            warnings.extend(self.notify(run_id, &deals).await);
        }

        tracing::info!(
            %run_id,
            deals = deals.len(),
            warnings = warnings.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "analysis run complete"
        );

        RunOutcome::success(deals.len(), run_timestamp, warnings)
    }

    async fn score_all(&self, raw_deals: &[RawDeal]) -> Vec<AnalyzedDeal> {
        let pending: Vec<_> = raw_deals
            .iter()
            .cloned()
            .map(|deal| {
                let scorer = self.scorer.clone();
                async move {
                    let assessment = scorer.score(&deal).await;
                    (deal, assessment)
                }
            })
            .collect();
        let scored =
            futures::stream::iter(pending).buffered(self.options.scoring_concurrency.max(1));
        let mut scored = std::pin::pin!(scored);

        // Stamped as results arrive in fetch order, which keeps timestamps non-decreasing.
        let mut out = Vec::with_capacity(raw_deals.len());
        while let Some((deal, assessment)) = scored.next().await {
            out.push(AnalyzedDeal::new(&deal, assessment, Utc::now()));
        }
        out
    }

    async fn notify(&self, run_id: Uuid, deals: &[AnalyzedDeal]) -> Vec<String> {
        let mut warnings = Vec::new();
        let (high_risk, _rest): (Vec<AnalyzedDeal>, Vec<AnalyzedDeal>) =
            deals.iter().cloned().partition(AnalyzedDeal::is_high_risk);

        if !high_risk.is_empty() {
            let outcome = self.notifier.send_alert(&high_risk).await;
            if outcome.not_configured {
                tracing::debug!(%run_id, reason = ?outcome.error, "risk alert skipped");
            } else if !outcome.sent {
                let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(%run_id, high_risk = high_risk.len(), %error, "risk alert failed");
                warnings.push(format!("risk alert failed: {error}"));
            }
        }

        let outcome = self
            .notifier
            .send_summary(deals.len(), high_risk.len(), mean_score(deals))
            .await;
        if outcome.not_configured {
            tracing::debug!(%run_id, reason = ?outcome.error, "summary notification skipped");
        } else if !outcome.sent {
            let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            tracing::warn!(%run_id, %error, "summary notification failed");
            warnings.push(format!("summary notification failed: {error}"));
        }

        warnings
    }
}
