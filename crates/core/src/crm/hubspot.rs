use crate::config::Settings;
use crate::crm::types::{DealsPage, HubSpotDeal, DEAL_PROPERTIES};
use crate::crm::{ConnectionStatus, DealSource, FetchError};
use crate::domain::deal::RawDeal;
use anyhow::Context;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";
const DEALS_PATH: &str = "/crm/v3/objects/deals";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_RETRIES: u32 = 2;
const MAX_RETRIES: u32 = 6;
const MAX_BACKOFF_SECS: u64 = 30;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct HubSpotDealSource {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retries: u32,
}

impl HubSpotDealSource {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings
            .hubspot_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("HUBSPOT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("HUBSPOT_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .clamp(1, MAX_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HubSpot http client")?;

        Ok(Self {
            http,
            base_url,
            token: settings.hubspot_token.clone(),
            retries,
        })
    }

    fn token(&self) -> Result<&str, FetchError> {
        self.token
            .as_deref()
            .ok_or_else(|| FetchError::NotConfigured("HUBSPOT_TOKEN not set".to_string()))
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), DEALS_PATH)
    }

    async fn fetch_page_once(
        &self,
        page_size: usize,
        after: Option<&str>,
    ) -> Result<DealsPage, FetchError> {
        let token = self.token()?;

        let mut query = vec![
            ("limit", page_size.to_string()),
            ("properties", DEAL_PROPERTIES.join(",")),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let res = self
            .http
            .get(self.url())
            .bearer_auth(token)
            .query(&query)
            .send()
            .await
            .map_err(|e| FetchError::Connectivity(e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| FetchError::Connectivity(format!("failed to read response: {e}")))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str::<DealsPage>(&text)
            .map_err(|e| FetchError::InvalidResponse(format!("{e}: {text}")))
    }

    async fn fetch_page(
        &self,
        page_size: usize,
        after: Option<&str>,
    ) -> Result<DealsPage, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_page_once(page_size, after).await {
                Ok(page) => return Ok(page),
                Err(err) => {
                    if attempt >= self.retries || !is_retryable(&err) {
                        return Err(err);
                    }
                    let backoff = backoff_for(attempt);
                    tracing::warn!(attempt, ?backoff, error = %err, "HubSpot fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// 1s, 2s, 4s, ... capped at [`MAX_BACKOFF_SECS`].
fn backoff_for(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(5);
    Duration::from_secs((1u64 << exp).min(MAX_BACKOFF_SECS))
}

fn is_retryable(err: &FetchError) -> bool {
    match err {
        FetchError::Connectivity(_) => true,
        FetchError::Upstream { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

#[async_trait::async_trait]
impl DealSource for HubSpotDealSource {
    fn source_name(&self) -> &'static str {
        "hubspot"
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<RawDeal>, FetchError> {
        let raw = self.fetch_raw(limit).await?;
        raw.into_iter()
            .map(|v| {
                serde_json::from_value::<HubSpotDeal>(v)
                    .map(HubSpotDeal::into_raw_deal)
                    .map_err(|e| FetchError::InvalidResponse(format!("malformed deal record: {e}")))
            })
            .collect()
    }

    async fn fetch_raw(&self, limit: usize) -> Result<Vec<Value>, FetchError> {
        let mut out: Vec<Value> = Vec::with_capacity(limit.min(MAX_PAGE_SIZE));
        let mut after: Option<String> = None;

        while out.len() < limit {
            let page_size = (limit - out.len()).min(MAX_PAGE_SIZE);
            let page = self.fetch_page(page_size, after.as_deref()).await?;
            let next = page.next_after().map(str::to_string);

            tracing::debug!(
                page_len = page.results.len(),
                collected = out.len(),
                has_next = next.is_some(),
                "HubSpot deals page"
            );

            out.extend(page.results);
            match next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        out.truncate(limit);
        Ok(out)
    }

    async fn check_connection(&self) -> ConnectionStatus {
        match self.fetch_page_once(1, None).await {
            Ok(_) => ConnectionStatus {
                connected: true,
                status_code: Some(200),
                error: None,
            },
            Err(err) => {
                let status_code = match &err {
                    FetchError::Unauthorized { status } | FetchError::Upstream { status, .. } => {
                        Some(*status)
                    }
                    _ => None,
                };
                ConnectionStatus {
                    connected: false,
                    status_code,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(token: Option<&str>) -> HubSpotDealSource {
        HubSpotDealSource {
            http: reqwest::Client::new(),
            base_url: "http://127.0.0.1:9/".to_string(),
            token: token.map(str::to_string),
            retries: 1,
        }
    }

    #[test]
    fn url_joins_base_without_double_slash() {
        assert_eq!(source(None).url(), "http://127.0.0.1:9/crm/v3/objects/deals");
    }

    #[tokio::test]
    async fn missing_token_is_not_configured() {
        let err = source(None).fetch(10).await.unwrap_err();
        assert!(matches!(err, FetchError::NotConfigured(_)));

        let status = source(None).check_connection().await;
        assert!(!status.connected);
        assert!(status.error.unwrap().contains("HUBSPOT_TOKEN"));
    }

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(2), Duration::from_secs(2));
        assert_eq!(backoff_for(4), Duration::from_secs(8));
        assert_eq!(backoff_for(6), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff_for(100), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[test]
    fn only_transient_failures_are_retried() {
        assert!(is_retryable(&FetchError::Connectivity("reset".to_string())));
        assert!(is_retryable(&FetchError::Upstream {
            status: 503,
            body: String::new()
        }));
        assert!(is_retryable(&FetchError::Upstream {
            status: 429,
            body: String::new()
        }));
        assert!(!is_retryable(&FetchError::Upstream {
            status: 400,
            body: String::new()
        }));
        assert!(!is_retryable(&FetchError::Unauthorized { status: 401 }));
    }
}
