use crate::domain::deal::RiskAssessment;
use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_SCORE: i64 = 50;
const DEFAULT_REASON: &str = "AI Analysis";

/// The two-field reply requested from the scoring service.
///
/// `risk_score` stays an untyped JSON value here: models return integers,
/// floats, numeric strings and occasionally garbage, and the coercion rules
/// live in [`LlmRiskReply::validate_and_into_assessment`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRiskReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_reason: Option<String>,
}

impl LlmRiskReply {
    pub fn validate_and_into_assessment(self) -> anyhow::Result<RiskAssessment> {
        let raw = match self.risk_score {
            None => DEFAULT_SCORE,
            Some(value) => coerce_score(&value)?,
        };

        let risk_reason = self
            .risk_reason
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_REASON.to_string());

        Ok(RiskAssessment {
            risk_score: raw.clamp(0, 100) as u8,
            risk_reason,
        })
    }
}

// Integer coercion truncates toward zero; range clamping happens in the caller.
fn coerce_score(value: &Value) -> anyhow::Result<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            if n.as_u64().is_some() {
                return Ok(i64::MAX);
            }
            let f = n.as_f64().context("risk_score is not representable")?;
            ensure!(f.is_finite(), "risk_score is not finite: {f}");
            Ok(f.trunc() as i64)
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .with_context(|| format!("risk_score is not an integer: {s:?}")),
        Value::Null => bail!("risk_score is null"),
        other => bail!("risk_score is not numeric: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assess(v: Value) -> anyhow::Result<RiskAssessment> {
        serde_json::from_value::<LlmRiskReply>(v)
            .unwrap()
            .validate_and_into_assessment()
    }

    #[test]
    fn accepts_in_range_integer() {
        let a = assess(json!({"risk_score": 82, "risk_reason": "Strong champion"})).unwrap();
        assert_eq!(a.risk_score, 82);
        assert_eq!(a.risk_reason, "Strong champion");
    }

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(assess(json!({"risk_score": 150})).unwrap().risk_score, 100);
        assert_eq!(assess(json!({"risk_score": -20})).unwrap().risk_score, 0);
        assert_eq!(
            assess(json!({"risk_score": 18446744073709551615u64}))
                .unwrap()
                .risk_score,
            100
        );
    }

    #[test]
    fn truncates_floats_and_parses_numeric_strings() {
        assert_eq!(assess(json!({"risk_score": 64.9})).unwrap().risk_score, 64);
        assert_eq!(assess(json!({"risk_score": " 77 "})).unwrap().risk_score, 77);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let a = assess(json!({})).unwrap();
        assert_eq!(a.risk_score, 50);
        assert_eq!(a.risk_reason, "AI Analysis");

        // serde maps an explicit null onto the absent case.
        let a = assess(json!({"risk_score": null, "risk_reason": "  "})).unwrap();
        assert_eq!(a.risk_score, 50);
        assert_eq!(a.risk_reason, "AI Analysis");
    }

    #[test]
    fn rejects_non_numeric_scores() {
        assert!(assess(json!({"risk_score": "high"})).is_err());
        assert!(assess(json!({"risk_score": [1, 2]})).is_err());
        assert!(assess(json!({"risk_score": true})).is_err());
    }
}
