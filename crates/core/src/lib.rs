pub mod crm;
pub mod domain;
pub mod llm;
pub mod pipeline;
pub mod scoring;
pub mod sinks;
pub mod storage;

pub mod config {
    use crate::pipeline::DEFAULT_FETCH_LIMIT;
    use anyhow::Context;

    const DEFAULT_SCORING_CONCURRENCY: usize = 1;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub hubspot_token: Option<String>,
        pub hubspot_base_url: Option<String>,
        pub scoring_provider: Option<String>,
        pub openai_api_key: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub slack_bot_token: Option<String>,
        pub slack_channel: Option<String>,
        pub google_sheets_access_token: Option<String>,
        pub default_sheet_id: Option<String>,
        pub sentry_dsn: Option<String>,
        pub fetch_limit: usize,
        pub scoring_concurrency: usize,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let fetch_limit = match non_empty_var("ANALYSIS_FETCH_LIMIT") {
                Some(s) => s
                    .parse::<usize>()
                    .with_context(|| format!("ANALYSIS_FETCH_LIMIT is not a number: {s}"))?,
                None => DEFAULT_FETCH_LIMIT,
            };
            anyhow::ensure!(fetch_limit >= 1, "ANALYSIS_FETCH_LIMIT must be >= 1");

            let scoring_concurrency = match non_empty_var("SCORING_CONCURRENCY") {
                Some(s) => s
                    .parse::<usize>()
                    .with_context(|| format!("SCORING_CONCURRENCY is not a number: {s}"))?,
                None => DEFAULT_SCORING_CONCURRENCY,
            };
            anyhow::ensure!(
                scoring_concurrency >= 1,
                "SCORING_CONCURRENCY must be >= 1"
            );

            Ok(Self {
                hubspot_token: non_empty_var("HUBSPOT_TOKEN"),
                hubspot_base_url: non_empty_var("HUBSPOT_BASE_URL"),
                scoring_provider: non_empty_var("SCORING_PROVIDER"),
                openai_api_key: non_empty_var("OPENAI_API_KEY"),
                anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
                slack_bot_token: non_empty_var("SLACK_BOT_TOKEN"),
                slack_channel: non_empty_var("SLACK_CHANNEL"),
                google_sheets_access_token: non_empty_var("GOOGLE_SHEETS_ACCESS_TOKEN"),
                default_sheet_id: non_empty_var("DEFAULT_SHEET_ID"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                fetch_limit,
                scoring_concurrency,
            })
        }

        pub fn require_hubspot_token(&self) -> anyhow::Result<&str> {
            self.hubspot_token
                .as_deref()
                .context("HUBSPOT_TOKEN is required")
        }

        pub fn require_openai_api_key(&self) -> anyhow::Result<&str> {
            self.openai_api_key
                .as_deref()
                .context("OPENAI_API_KEY is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }
    }

    // Empty values count as unset so `FOO=` in a .env file disables a collaborator.
    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
