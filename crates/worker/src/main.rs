use clap::Parser;
use dealrisk_core::pipeline::{AnalysisPipeline, RunRequest};
use dealrisk_core::storage::ResultStore;
use std::future::Future;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "dealrisk_worker")]
struct Args {
    /// Maximum number of deals to fetch. Overrides ANALYSIS_FETCH_LIMIT.
    #[arg(long)]
    limit: Option<usize>,

    /// Spreadsheet to export to. Defaults to DEFAULT_SHEET_ID.
    #[arg(long)]
    sheet_id: Option<String>,

    /// Skip Slack notifications.
    #[arg(long)]
    no_notify: bool,

    /// Score deals but skip export and notifications.
    #[arg(long)]
    dry_run: bool,

    /// Re-run every N seconds until interrupted.
    #[arg(long)]
    interval_secs: Option<u64>,
}

impl Args {
    fn run_request(&self, default_sheet_id: Option<&str>) -> RunRequest {
        if self.dry_run {
            return RunRequest::default();
        }
        RunRequest {
            export_target: self
                .sheet_id
                .clone()
                .or_else(|| default_sheet_id.map(str::to_string)),
            notify: !self.no_notify,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = dealrisk_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(limit) = args.limit {
        anyhow::ensure!(limit >= 1, "--limit must be >= 1");
        settings.fetch_limit = limit;
    }

    let pipeline = AnalysisPipeline::from_settings(&settings, ResultStore::new())?;
    let req = args.run_request(settings.default_sheet_id.as_deref());

    let Some(interval_secs) = args.interval_secs else {
        let ok = run_once(&pipeline, req).await;
        anyhow::ensure!(ok, "analysis run failed");
        return Ok(());
    };

    anyhow::ensure!(interval_secs >= 1, "--interval-secs must be >= 1");
    run_scheduled(
        &pipeline,
        req,
        Duration::from_secs(interval_secs),
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
    )
    .await;
    Ok(())
}

/// Runs the pipeline on every tick until `shutdown` resolves. A run still in
/// flight at shutdown is dropped, which leaves the stored result untouched.
async fn run_scheduled(
    pipeline: &AnalysisPipeline,
    req: RunRequest,
    every: Duration,
    shutdown: impl Future<Output = ()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut shutdown = std::pin::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                tracing::info!("shutdown requested; stopping scheduler");
                return;
            }
        }
        tokio::select! {
            _ = run_once(pipeline, req.clone()) => {}
            _ = &mut shutdown => {
                tracing::info!("shutdown requested; abandoning in-flight run");
                return;
            }
        }
    }
}

async fn run_once(pipeline: &AnalysisPipeline, req: RunRequest) -> bool {
    let outcome = pipeline.run(req).await;
    if !outcome.is_success() {
        let err = anyhow::anyhow!("analysis run failed: {}", outcome.message);
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "analysis run failed");
        return false;
    }

    let summary = pipeline.store().summary().await;
    tracing::info!(
        deals = outcome.deals_count.unwrap_or(0),
        high_risk = summary.high_risk_count,
        medium_risk = summary.medium_risk_count,
        low_risk = summary.low_risk_count,
        avg_risk_score = summary.avg_risk_score,
        warnings = ?outcome.warnings,
        "analysis run complete"
    );
    if let Ok(json) = serde_json::to_string(&outcome) {
        println!("{json}");
    }
    true
}

fn init_sentry(settings: &dealrisk_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealrisk_core::config::Settings;
    use dealrisk_core::crm::{ConnectionStatus, DealSource, FetchError};
    use dealrisk_core::domain::deal::RawDeal;
    use dealrisk_core::pipeline::PipelineOptions;
    use dealrisk_core::scoring::RiskScorer;
    use dealrisk_core::sinks::sheets::GoogleSheetsExporter;
    use dealrisk_core::sinks::slack::SlackNotifier;
    use std::sync::Arc;

    #[test]
    fn dry_run_disables_side_effects() {
        let args = Args::parse_from(["dealrisk_worker", "--dry-run", "--sheet-id", "s1"]);
        let req = args.run_request(Some("default"));
        assert!(req.export_target.is_none());
        assert!(!req.notify);
    }

    #[test]
    fn sheet_id_falls_back_to_default() {
        let args = Args::parse_from(["dealrisk_worker"]);
        let req = args.run_request(Some("default"));
        assert_eq!(req.export_target.as_deref(), Some("default"));
        assert!(req.notify);

        let args = Args::parse_from(["dealrisk_worker", "--sheet-id", "s1", "--no-notify"]);
        let req = args.run_request(Some("default"));
        assert_eq!(req.export_target.as_deref(), Some("s1"));
        assert!(!req.notify);
    }

    struct HangingSource;

    #[async_trait::async_trait]
    impl DealSource for HangingSource {
        fn source_name(&self) -> &'static str {
            "hanging"
        }

        async fn fetch(&self, _limit: usize) -> Result<Vec<RawDeal>, FetchError> {
            std::future::pending().await
        }

        async fn fetch_raw(&self, _limit: usize) -> Result<Vec<serde_json::Value>, FetchError> {
            std::future::pending().await
        }

        async fn check_connection(&self) -> ConnectionStatus {
            ConnectionStatus {
                connected: false,
                status_code: None,
                error: None,
            }
        }
    }

    fn unconfigured_settings() -> Settings {
        Settings {
            hubspot_token: None,
            hubspot_base_url: None,
            scoring_provider: None,
            openai_api_key: None,
            anthropic_api_key: None,
            slack_bot_token: None,
            slack_channel: None,
            google_sheets_access_token: None,
            default_sheet_id: None,
            sentry_dsn: None,
            fetch_limit: 10,
            scoring_concurrency: 1,
        }
    }

    #[tokio::test]
    async fn shutdown_interrupts_an_in_flight_run() {
        let settings = unconfigured_settings();
        let pipeline = AnalysisPipeline::new(
            Arc::new(HangingSource),
            RiskScorer::default(),
            Arc::new(GoogleSheetsExporter::from_settings(&settings).unwrap()),
            Arc::new(SlackNotifier::from_settings(&settings).unwrap()),
            ResultStore::new(),
            PipelineOptions::from_settings(&settings),
        );

        let stopped = tokio::time::timeout(
            Duration::from_secs(2),
            run_scheduled(
                &pipeline,
                RunRequest::default(),
                Duration::from_secs(60),
                tokio::time::sleep(Duration::from_millis(50)),
            ),
        )
        .await;

        assert!(stopped.is_ok());
        assert!(!pipeline.is_running());
        assert!(pipeline.store().current().await.is_none());
    }
}
