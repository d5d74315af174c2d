use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel substituted for missing deal attributes.
pub const UNKNOWN: &str = "Unknown";

/// Scores at or above this value are high risk.
pub const HIGH_RISK_THRESHOLD: u8 = 70;
/// Scores at or above this value (and below [`HIGH_RISK_THRESHOLD`]) are medium risk.
pub const MEDIUM_RISK_THRESHOLD: u8 = 40;

/// A deal as supplied by the deal source. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeal {
    pub id: String,
    pub name: Option<String>,
    pub stage: Option<String>,
    pub amount: Option<f64>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub risk_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedDeal {
    pub deal_id: String,
    pub deal_name: String,
    pub stage: String,
    pub amount: f64,
    pub risk_score: u8,
    pub risk_reason: String,
    pub timestamp: DateTime<Utc>,
}

impl AnalyzedDeal {
    pub fn new(deal: &RawDeal, assessment: RiskAssessment, timestamp: DateTime<Utc>) -> Self {
        Self {
            deal_id: deal.id.clone(),
            deal_name: deal.name.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            stage: deal.stage.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            amount: deal.amount.unwrap_or(0.0),
            risk_score: assessment.risk_score.min(100),
            risk_reason: assessment.risk_reason,
            timestamp,
        }
    }

    pub fn band(&self) -> RiskBand {
        RiskBand::for_score(self.risk_score)
    }

    pub fn is_high_risk(&self) -> bool {
        self.band() == RiskBand::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    High,
    Medium,
    Low,
}

impl RiskBand {
    pub fn for_score(score: u8) -> Self {
        if score >= HIGH_RISK_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_RISK_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

/// The full result of one completed analysis run, as held by the result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRunResult {
    pub run_id: Uuid,
    pub deals: Vec<AnalyzedDeal>,
    pub run_timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// What a caller gets back from triggering a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deals_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunOutcome {
    pub fn success(deals_count: usize, timestamp: DateTime<Utc>, warnings: Vec<String>) -> Self {
        Self {
            status: RunStatus::Success,
            message: format!("Analyzed {deals_count} deals"),
            timestamp,
            deals_count: Some(deals_count),
            warnings,
        }
    }

    pub fn error(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Error,
            message: message.into(),
            timestamp,
            deals_count: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total_deals: usize,
    pub high_risk_count: usize,
    pub medium_risk_count: usize,
    pub low_risk_count: usize,
    pub avg_risk_score: f64,
    pub last_analysis: Option<DateTime<Utc>>,
}

impl RiskSummary {
    pub fn from_deals(deals: &[AnalyzedDeal], last_analysis: Option<DateTime<Utc>>) -> Self {
        let mut summary = Self {
            total_deals: deals.len(),
            high_risk_count: 0,
            medium_risk_count: 0,
            low_risk_count: 0,
            avg_risk_score: 0.0,
            last_analysis,
        };

        for deal in deals {
            match deal.band() {
                RiskBand::High => summary.high_risk_count += 1,
                RiskBand::Medium => summary.medium_risk_count += 1,
                RiskBand::Low => summary.low_risk_count += 1,
            }
        }

        summary.avg_risk_score = (mean_score(deals) * 10.0).round() / 10.0;
        summary
    }
}

/// Arithmetic mean of the risk scores, 0 for an empty slice.
pub fn mean_score(deals: &[AnalyzedDeal]) -> f64 {
    if deals.is_empty() {
        return 0.0;
    }
    let total: u64 = deals.iter().map(|d| u64::from(d.risk_score)).sum();
    total as f64 / deals.len() as f64
}
