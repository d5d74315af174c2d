//! Per-deal risk scoring.
//!
//! [`RiskScorer::score`] always yields a valid [`RiskAssessment`]: a missing
//! scoring service produces a neutral score, and every service or parse
//! failure degrades to the same neutral score with a short error reason.

use crate::domain::deal::{RawDeal, RiskAssessment, UNKNOWN};
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::ScoringService;
use serde_json::Value;
use std::sync::Arc;

pub const NEUTRAL_SCORE: u8 = 50;
pub const NOT_CONFIGURED_REASON: &str = "service not configured";
const MAX_ERROR_REASON_CHARS: usize = 50;

#[derive(Clone, Default)]
pub struct RiskScorer {
    service: Option<Arc<dyn ScoringService>>,
}

impl RiskScorer {
    pub fn new(service: Option<Arc<dyn ScoringService>>) -> Self {
        Self { service }
    }

    pub fn is_configured(&self) -> bool {
        self.service.is_some()
    }

    pub async fn score(&self, deal: &RawDeal) -> RiskAssessment {
        let Some(service) = &self.service else {
            return RiskAssessment {
                risk_score: NEUTRAL_SCORE,
                risk_reason: NOT_CONFIGURED_REASON.to_string(),
            };
        };

        let prompt = risk_prompt(deal);
        let result = match service.complete(&prompt).await {
            Ok(reply) => reply.validate_and_into_assessment(),
            Err(err) => Err(err),
        };

        match result {
            Ok(assessment) => assessment,
            Err(err) => {
                tracing::warn!(
                    deal_id = %deal.id,
                    provider = ?service.provider(),
                    error = %err,
                    "risk scoring failed; using neutral score"
                );
                if let Some(raw) = raw_llm_response(&err) {
                    tracing::debug!(deal_id = %deal.id, raw_llm_response = %raw, "unusable scoring reply");
                }
                RiskAssessment {
                    risk_score: NEUTRAL_SCORE,
                    risk_reason: error_reason(&err),
                }
            }
        }
    }
}

impl std::fmt::Debug for RiskScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskScorer")
            .field("provider", &self.service.as_ref().map(|s| s.provider()))
            .finish()
    }
}

pub fn risk_prompt(deal: &RawDeal) -> String {
    let name = deal.name.as_deref().unwrap_or(UNKNOWN);
    let stage = deal.stage.as_deref().unwrap_or(UNKNOWN);
    let amount = deal
        .amount
        .map(|a| a.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    format!(
        "Analyze this sales deal and provide a risk score (0-100, where 100 is safest):\n\
Deal: {name}\n\
Amount: {amount}\n\
Stage: {stage}\n\n\
Respond with JUST a JSON object (no markdown, no code blocks): \
{{\"risk_score\": <0-100>, \"risk_reason\": \"<brief reason>\"}}"
    )
}

/// Raw model output carried by an [`LlmDiagnosticsError`], as JSON when it
/// parses and wrapped as `{"raw_text": ..}` when it does not.
fn raw_llm_response(err: &anyhow::Error) -> Option<Value> {
    let diag = err.downcast_ref::<LlmDiagnosticsError>()?;
    match diag.raw_output.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .ok()
            .or_else(|| Some(serde_json::json!({ "raw_text": raw }))),
        None => diag.raw_response_json.clone(),
    }
}

// Reasons end up in chat messages and spreadsheet cells, so keep them short.
fn error_reason(err: &anyhow::Error) -> String {
    format!("Analysis error: {err}")
        .chars()
        .take(MAX_ERROR_REASON_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contract::LlmRiskReply;
    use crate::llm::Provider;
    use serde_json::json;
    use std::sync::Mutex;

    struct StubService {
        reply: fn() -> anyhow::Result<LlmRiskReply>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubService {
        fn new(reply: fn() -> anyhow::Result<LlmRiskReply>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ScoringService for StubService {
        fn provider(&self) -> Provider {
            Provider::OpenAI
        }

        async fn complete(&self, prompt: &str) -> anyhow::Result<LlmRiskReply> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            (self.reply)()
        }
    }

    fn deal() -> RawDeal {
        RawDeal {
            id: "1".to_string(),
            name: Some("Acme Corp Contract".to_string()),
            stage: Some("Proposal".to_string()),
            amount: Some(1000.0),
            last_modified: None,
        }
    }

    #[tokio::test]
    async fn unconfigured_scorer_returns_neutral_without_calling_out() {
        let a = RiskScorer::default().score(&deal()).await;
        assert_eq!(a.risk_score, 50);
        assert_eq!(a.risk_reason, "service not configured");
    }

    #[tokio::test]
    async fn clamps_service_scores() {
        let stub = StubService::new(|| {
            Ok(LlmRiskReply {
                risk_score: Some(json!(250)),
                risk_reason: Some("Very safe".to_string()),
            })
        });
        let scorer = RiskScorer::new(Some(stub.clone()));
        let a = scorer.score(&deal()).await;
        assert_eq!(a.risk_score, 100);
        assert_eq!(a.risk_reason, "Very safe");
        assert_eq!(stub.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn service_errors_degrade_to_short_reason() {
        let stub = StubService::new(|| {
            Err(anyhow::anyhow!(
                "connection reset by peer while talking to the scoring endpoint at some long url"
            ))
        });
        let a = RiskScorer::new(Some(stub)).score(&deal()).await;
        assert_eq!(a.risk_score, 50);
        assert!(a.risk_reason.starts_with("Analysis error: connection reset"));
        assert!(a.risk_reason.chars().count() <= 50);
    }

    #[tokio::test]
    async fn malformed_scores_degrade_to_neutral() {
        let stub = StubService::new(|| {
            Ok(LlmRiskReply {
                risk_score: Some(json!("very risky")),
                risk_reason: None,
            })
        });
        let a = RiskScorer::new(Some(stub)).score(&deal()).await;
        assert_eq!(a.risk_score, 50);
        assert!(a.risk_reason.starts_with("Analysis error"));
    }

    #[test]
    fn raw_llm_response_is_recovered_from_diagnostics() {
        let diag = |raw_output: Option<&str>, raw_response_json: Option<Value>| {
            anyhow::Error::from(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "parse",
                detail: "no usable reply".to_string(),
                raw_output: raw_output.map(str::to_string),
                raw_response_json,
            })
        };

        assert_eq!(
            raw_llm_response(&diag(Some(r#"{"risk_score": "?"}"#), None)),
            Some(json!({"risk_score": "?"}))
        );
        assert_eq!(
            raw_llm_response(&diag(Some("I cannot score this"), None)),
            Some(json!({"raw_text": "I cannot score this"}))
        );
        assert_eq!(
            raw_llm_response(&diag(None, Some(json!({"content": []})))),
            Some(json!({"content": []}))
        );
        assert_eq!(raw_llm_response(&anyhow::anyhow!("timeout")), None);
    }

    #[tokio::test]
    async fn diagnostics_errors_degrade_to_neutral() {
        let stub = StubService::new(|| {
            Err(LlmDiagnosticsError {
                provider: Provider::OpenAI,
                stage: "parse",
                detail: "empty choices".to_string(),
                raw_output: Some("not json".to_string()),
                raw_response_json: None,
            }
            .into())
        });
        let a = RiskScorer::new(Some(stub)).score(&deal()).await;
        assert_eq!(a.risk_score, 50);
        assert!(a.risk_reason.starts_with("Analysis error: OpenAI parse"));
    }

    #[test]
    fn prompt_embeds_fields_and_unknown_sentinel() {
        let prompt = risk_prompt(&deal());
        assert!(prompt.contains("Deal: Acme Corp Contract"));
        assert!(prompt.contains("Amount: 1000"));
        assert!(prompt.contains("Stage: Proposal"));
        assert!(prompt.contains("\"risk_score\": <0-100>"));

        let bare = RawDeal {
            id: "2".to_string(),
            name: None,
            stage: None,
            amount: None,
            last_modified: None,
        };
        let prompt = risk_prompt(&bare);
        assert!(prompt.contains("Deal: Unknown"));
        assert!(prompt.contains("Amount: Unknown"));
        assert!(prompt.contains("Stage: Unknown"));
    }
}
