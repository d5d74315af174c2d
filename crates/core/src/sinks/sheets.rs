use crate::config::Settings;
use crate::domain::deal::AnalyzedDeal;
use crate::sinks::{ExportOutcome, ExportRows, ExportSink};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";
const DEFAULT_WORKSHEET: &str = "Sheet1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const HEADER: [&str; 7] = [
    "deal_id",
    "deal_name",
    "amount",
    "stage",
    "risk_score",
    "risk_reason",
    "timestamp",
];

/// Writes analyzed deals to the first worksheet of a Google spreadsheet.
///
/// Authenticates with a pre-issued OAuth access token
/// (`GOOGLE_SHEETS_ACCESS_TOKEN`); minting tokens from a service-account key
/// is left to the deployment.
#[derive(Debug, Clone)]
pub struct GoogleSheetsExporter {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    worksheet: String,
}

impl GoogleSheetsExporter {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = std::env::var("GOOGLE_SHEETS_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let worksheet = std::env::var("GOOGLE_SHEETS_WORKSHEET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WORKSHEET.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build Google Sheets http client")?;

        Ok(Self {
            http,
            base_url,
            access_token: settings.google_sheets_access_token.clone(),
            worksheet,
        })
    }

    fn token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .context("Google Sheets credentials not provided (set GOOGLE_SHEETS_ACCESS_TOKEN)")
    }

    fn values_url(&self, sheet_id: &str, range: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("invalid Google Sheets base url: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Google Sheets base url cannot be a base"))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", sheet_id, "values", range]);
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let res = req
            .bearer_auth(self.token()?)
            .send()
            .await
            .with_context(|| format!("Google Sheets {what} request failed"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read Google Sheets {what} response"))?;
        if !status.is_success() {
            anyhow::bail!("Google Sheets {what} HTTP {status}: {text}");
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str::<Value>(&text)
            .with_context(|| format!("Google Sheets {what} response is not JSON: {text}"))
    }

    async fn try_export(&self, sheet_id: &str, deals: &[AnalyzedDeal]) -> Result<usize> {
        let rows = export_rows(deals);

        let clear_url = self.values_url(sheet_id, &format!("{}:clear", self.worksheet))?;
        self.send(self.http.post(clear_url).json(&json!({})), "clear")
            .await?;

        let update_url = self.values_url(sheet_id, &format!("{}!A1", self.worksheet))?;
        self.send(
            self.http
                .put(update_url)
                .query(&[("valueInputOption", "RAW")])
                .json(&json!({ "values": rows })),
            "update",
        )
        .await?;

        Ok(rows.len() - 1)
    }
}

#[async_trait::async_trait]
impl ExportSink for GoogleSheetsExporter {
    async fn export(&self, target_id: &str, deals: &[AnalyzedDeal]) -> ExportOutcome {
        if target_id.trim().is_empty() {
            return ExportOutcome::failed("sheet_id is required");
        }
        if self.access_token.is_none() {
            return ExportOutcome::not_configured(
                "Google Sheets credentials not provided (set GOOGLE_SHEETS_ACCESS_TOKEN)",
            );
        }

        match self.try_export(target_id.trim(), deals).await {
            Ok(rows_written) => {
                tracing::info!(sheet_id = target_id, rows_written, "exported deals to sheet");
                ExportOutcome::synced(rows_written)
            }
            Err(err) => ExportOutcome::failed(format!("{err:#}")),
        }
    }

    async fn read(&self, target_id: &str, range: Option<&str>) -> Result<ExportRows> {
        anyhow::ensure!(!target_id.trim().is_empty(), "sheet_id is required");

        let range = range
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.worksheet);
        let url = self.values_url(target_id.trim(), range)?;
        let body = self.send(self.http.get(url), "read").await?;
        let parsed = serde_json::from_value::<ValueRange>(body)
            .context("failed to decode Google Sheets value range")?;

        Ok(ExportRows {
            sheet_id: target_id.trim().to_string(),
            rows: parsed.values,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Header row followed by one row per deal, in deal order.
pub fn export_rows(deals: &[AnalyzedDeal]) -> Vec<Vec<Value>> {
    let mut rows = Vec::with_capacity(deals.len() + 1);
    rows.push(HEADER.iter().map(|h| json!(h)).collect());
    for deal in deals {
        rows.push(vec![
            json!(deal.deal_id),
            json!(deal.deal_name),
            json!(deal.amount),
            json!(deal.stage),
            json!(deal.risk_score),
            json!(deal.risk_reason),
            json!(deal.timestamp.to_rfc3339()),
        ]);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn exporter(token: Option<&str>) -> GoogleSheetsExporter {
        GoogleSheetsExporter {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: token.map(str::to_string),
            worksheet: "Pipeline Q1".to_string(),
        }
    }

    fn deal() -> AnalyzedDeal {
        AnalyzedDeal {
            deal_id: "101".to_string(),
            deal_name: "Acme".to_string(),
            stage: "Proposal".to_string(),
            amount: 1000.0,
            risk_score: 80,
            risk_reason: "Signed LOI".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 27, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn rows_start_with_header() {
        let rows = export_rows(&[deal()]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], json!("deal_id"));
        assert_eq!(rows[0][6], json!("timestamp"));
        assert_eq!(rows[1][0], json!("101"));
        assert_eq!(rows[1][2], json!(1000.0));
        assert_eq!(rows[1][4], json!(80));
        assert_eq!(rows[1][6], json!("2026-01-27T10:00:00+00:00"));
    }

    #[test]
    fn values_url_encodes_worksheet_names() {
        let url = exporter(None).values_url("abc123", "Pipeline Q1!A1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/Pipeline%20Q1!A1"
        );
    }

    #[tokio::test]
    async fn blank_target_is_rejected() {
        let outcome = exporter(Some("t")).export("  ", &[deal()]).await;
        assert_eq!(outcome, ExportOutcome::failed("sheet_id is required"));
    }

    #[tokio::test]
    async fn missing_token_reports_not_configured() {
        let outcome = exporter(None).export("abc123", &[deal()]).await;
        assert!(!outcome.synced);
        assert!(outcome.not_configured);
        assert!(outcome.error.unwrap().contains("GOOGLE_SHEETS_ACCESS_TOKEN"));
    }
}
