use crate::config::Settings;
use crate::domain::contract::LlmRiskReply;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{Provider, ScoringService};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_MAX_TOKENS: u32 = 256;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const TEMPERATURE: f64 = 0.3;

const TOOL_NAME_EMIT_RISK: &str = "emit_risk";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("SCORING_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["risk_score", "risk_reason"],
            "properties": {
                "risk_score": {"type": "integer", "minimum": 0, "maximum": 100},
                "risk_reason": {"type": "string"}
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_RISK,
            description: "Emit the deal risk score and a brief reason",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_RISK,
        }
    }

    fn request(&self, prompt: &str) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
            messages: vec![Message {
                role: "user",
                content: prompt.to_string(),
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        }
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_reply(res: &CreateMessageResponse) -> anyhow::Result<Option<LlmRiskReply>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_RISK {
                    let parsed = serde_json::from_value::<LlmRiskReply>(input.clone())
                        .context("failed to decode tool_use.input into LlmRiskReply")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    fn reply_from_response(
        res: &CreateMessageResponse,
        raw_json: serde_json::Value,
    ) -> anyhow::Result<LlmRiskReply> {
        if let Some(reply) = Self::response_tool_reply(res)? {
            return Ok(reply);
        }

        // Text fallback when the model ignored the forced tool.
        let text = Self::response_text(res);
        json::parse_reply(&text).map_err(|err| {
            anyhow::Error::from(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "parse",
                detail: err.to_string(),
                raw_output: Some(text),
                raw_response_json: Some(raw_json),
            })
        })
    }
}

#[async_trait::async_trait]
impl ScoringService for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<LlmRiskReply> {
        let (raw_json, res) = self.create_message(self.request(prompt)).await?;
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            tracing::warn!(max_tokens = self.max_tokens, "Anthropic stop_reason=max_tokens");
        }
        Self::reply_from_response(&res, raw_json)
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tool_use_reply() {
        let raw = json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {
                    "type": "tool_use",
                    "id": "toolu_1",
                    "name": TOOL_NAME_EMIT_RISK,
                    "input": {"risk_score": 85, "risk_reason": "Signed MSA, clear timeline"}
                }
            ],
            "stop_reason": "tool_use"
        });
        let res: CreateMessageResponse = serde_json::from_value(raw.clone()).unwrap();

        let reply = AnthropicClient::reply_from_response(&res, raw).unwrap();
        let assessment = reply.validate_and_into_assessment().unwrap();
        assert_eq!(assessment.risk_score, 85);
        assert_eq!(assessment.risk_reason, "Signed MSA, clear timeline");
    }

    #[test]
    fn falls_back_to_text_blocks() {
        let raw = json!({
            "content": [{"type": "text", "text": "{\"risk_score\": 20, \"risk_reason\": \"No budget\"}"}]
        });
        let res: CreateMessageResponse = serde_json::from_value(raw.clone()).unwrap();
        let reply = AnthropicClient::reply_from_response(&res, raw).unwrap();
        assert_eq!(reply.risk_score, Some(json!(20)));
    }

    #[test]
    fn unparseable_text_carries_diagnostics() {
        let raw = json!({"content": [{"type": "text", "text": "I cannot score this deal."}]});
        let res: CreateMessageResponse = serde_json::from_value(raw.clone()).unwrap();
        let err = AnthropicClient::reply_from_response(&res, raw).unwrap_err();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, "parse");
        assert_eq!(diag.raw_output.as_deref(), Some("I cannot score this deal."));
    }

    #[test]
    fn request_forces_the_risk_tool() {
        let client = AnthropicClient {
            http: reqwest::Client::new(),
            api_key: "k".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        };
        let body = serde_json::to_value(client.request("score me")).unwrap();
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "emit_risk"}));
        assert_eq!(body["messages"][0]["content"], "score me");
        assert_eq!(
            body["tools"][0]["input_schema"]["required"],
            json!(["risk_score", "risk_reason"])
        );
    }
}
