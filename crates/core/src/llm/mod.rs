pub mod anthropic;
pub mod error;
pub mod json;
pub mod openai;

use crate::config::Settings;
use crate::domain::contract::LlmRiskReply;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAI,
}

impl Provider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAI),
            _ => None,
        }
    }
}

/// A language-model backend that answers a risk prompt with `{risk_score, risk_reason}`.
#[async_trait::async_trait]
pub trait ScoringService: Send + Sync {
    fn provider(&self) -> Provider;

    async fn complete(&self, prompt: &str) -> anyhow::Result<LlmRiskReply>;
}

/// Picks the configured scoring backend.
///
/// `SCORING_PROVIDER` wins when set; otherwise the first provider with a key
/// (OpenAI, then Anthropic). `Ok(None)` means no credential is configured,
/// which is a supported mode rather than an error.
pub fn from_settings(settings: &Settings) -> anyhow::Result<Option<Arc<dyn ScoringService>>> {
    let provider = match settings.scoring_provider.as_deref() {
        Some(raw) => Some(
            Provider::parse(raw)
                .ok_or_else(|| anyhow::anyhow!("unknown SCORING_PROVIDER: {raw}"))?,
        ),
        None if settings.openai_api_key.is_some() => Some(Provider::OpenAI),
        None if settings.anthropic_api_key.is_some() => Some(Provider::Anthropic),
        None => None,
    };

    let service: Option<Arc<dyn ScoringService>> = match provider {
        Some(Provider::OpenAI) if settings.openai_api_key.is_some() => {
            Some(Arc::new(openai::OpenAiClient::from_settings(settings)?))
        }
        Some(Provider::Anthropic) if settings.anthropic_api_key.is_some() => {
            Some(Arc::new(anthropic::AnthropicClient::from_settings(settings)?))
        }
        Some(p) => {
            tracing::warn!(provider = ?p, "scoring provider selected but its API key is missing");
            None
        }
        None => None,
    };

    Ok(service)
}
