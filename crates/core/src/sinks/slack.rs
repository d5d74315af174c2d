use crate::config::Settings;
use crate::domain::deal::AnalyzedDeal;
use crate::sinks::messages::{risk_alert_text, summary_text};
use crate::sinks::{NotificationSink, NotifyOutcome};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://slack.com/api";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    base_url: String,
    bot_token: Option<String>,
    channel: Option<String>,
}

impl SlackNotifier {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url =
            std::env::var("SLACK_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build Slack http client")?;

        Ok(Self {
            http,
            base_url,
            bot_token: settings.slack_bot_token.clone(),
            channel: settings.slack_channel.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.channel.is_some()
    }

    async fn post_message(&self, text: &str) -> NotifyOutcome {
        let (Some(token), Some(channel)) = (self.bot_token.as_deref(), self.channel.as_deref())
        else {
            return NotifyOutcome::not_configured(
                "SLACK_BOT_TOKEN or SLACK_CHANNEL not configured",
            );
        };

        match self.try_post_message(token, channel, text).await {
            Ok(ts) => NotifyOutcome::sent(ts),
            Err(err) => NotifyOutcome::failed(format!("{err:#}")),
        }
    }

    async fn try_post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}/chat.postMessage", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "channel": channel, "text": text }))
            .send()
            .await
            .context("Slack request failed")?;

        let status = res.status();
        let body = res
            .json::<PostMessageResponse>()
            .await
            .with_context(|| format!("failed to decode Slack response (HTTP {status})"))?;
        body.into_result()
    }
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl PostMessageResponse {
    fn into_result(self) -> Result<Option<String>> {
        if !self.ok {
            anyhow::bail!(
                "Slack API error: {}",
                self.error.as_deref().unwrap_or("unknown_error")
            );
        }
        Ok(self.ts)
    }
}

#[async_trait::async_trait]
impl NotificationSink for SlackNotifier {
    async fn send_alert(&self, high_risk: &[AnalyzedDeal]) -> NotifyOutcome {
        self.post_message(&risk_alert_text(high_risk)).await
    }

    async fn send_summary(
        &self,
        total: usize,
        high_risk_count: usize,
        avg_score: f64,
    ) -> NotifyOutcome {
        self.post_message(&summary_text(total, high_risk_count, avg_score))
            .await
    }
}
